use super::*;
use crate::config::PanexamConfig;
use crate::domain::{
    ErrorType, ExamSpecification, ExamState, ExamType, PatientSize, SensorEvent,
    SensorEventKind, TechnicalFactors,
};
use crate::events::{sensor_event_channel, ExamEvent, SensorEventPump};
use crate::frame::AcquisitionFrame;
use crate::ports::{
    FileImageStore, MemoryImageStore, SimulatedDevice, SimulatedSensor, StaticTrajectorySource,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::broadcast;

struct TestHarness {
    orchestrator: Arc<AcquisitionOrchestrator>,
    device: Arc<SimulatedDevice>,
    sensor: Arc<SimulatedSensor>,
    store: Arc<MemoryImageStore>,
}

fn create_test_config() -> PanexamConfig {
    let mut config = PanexamConfig::default();
    config.sensor.frame_width = 4;
    config.sensor.frame_height = 8;
    config.sensor.frames_standard = 3;
    config.sensor.frames_child = 3;
    config.sensor.frames_bitewing = 2;
    config.sensor.frames_tmj = 2;
    config.sensor.frame_interval_ms = 1;
    config.pipeline.filters = vec!["normalize".to_string()];
    config.pipeline.output_dir = "/tmp/panexam-test".to_string();
    config
}

fn create_test_harness(config: PanexamConfig) -> TestHarness {
    let device = Arc::new(SimulatedDevice::new());
    let sensor = Arc::new(SimulatedSensor::manual());
    let store = Arc::new(MemoryImageStore::new());

    let orchestrator = AcquisitionOrchestrator::builder()
        .config(config)
        .device(device.clone())
        .sensor(sensor.clone())
        .image_store(store.clone())
        .build()
        .unwrap();

    TestHarness {
        orchestrator: Arc::new(orchestrator),
        device,
        sensor,
        store,
    }
}

fn standard_spec() -> ExamSpecification {
    ExamSpecification::new(
        ExamType::PanStandard,
        PatientSize::Medium,
        TechnicalFactors::new(70.0, 8.0, false),
    )
}

fn record_states(orchestrator: &AcquisitionOrchestrator) -> Arc<Mutex<Vec<ExamState>>> {
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    orchestrator.register_state_update_callback(move |state| sink.lock().push(state));
    states
}

fn complete_frame(orchestrator: &AcquisitionOrchestrator) {
    orchestrator.handle_sensor_event(SensorEventKind::Completed, true, 0);
}

fn push_frame(orchestrator: &AcquisitionOrchestrator, frame: AcquisitionFrame) {
    orchestrator.process_sensor_event(SensorEvent::completed_with_frame(frame));
}

fn rejection_reasons(receiver: &mut broadcast::Receiver<ExamEvent>) -> Vec<String> {
    std::iter::from_fn(|| receiver.try_recv().ok())
        .filter_map(|event| match event {
            ExamEvent::FrameRejected { reason, .. } => Some(reason),
            _ => None,
        })
        .collect()
}

fn wait_for_terminal(orchestrator: &AcquisitionOrchestrator, limit: Duration) -> ExamState {
    let deadline = Instant::now() + limit;
    loop {
        let state = orchestrator.get_exam_state();
        if state.is_terminal() || Instant::now() > deadline {
            return state;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_prepare_then_start_reaches_acquiring_once() {
    let harness = create_test_harness(create_test_config());
    let states = record_states(&harness.orchestrator);

    assert!(harness.orchestrator.prepare_exam(standard_spec()));
    assert!(harness.orchestrator.start_acquisition());

    assert_eq!(
        *states.lock(),
        vec![ExamState::Preparing, ExamState::Ready, ExamState::Acquiring]
    );
    assert_eq!(harness.device.exam_type(), Some(ExamType::PanStandard));
    assert!(harness.device.trajectory().is_some());
    assert_eq!(
        harness.sensor.last_parameters().map(|p| p.frame_count),
        Some(3)
    );
}

#[test]
fn test_start_outside_ready_is_rejected() {
    let harness = create_test_harness(create_test_config());
    let orchestrator = &harness.orchestrator;

    assert!(!orchestrator.start_acquisition());
    assert_eq!(orchestrator.get_exam_state(), ExamState::Idle);

    orchestrator.prepare_exam(standard_spec());
    orchestrator.start_acquisition();
    assert!(!orchestrator.start_acquisition());
    assert_eq!(orchestrator.get_exam_state(), ExamState::Acquiring);
    assert_eq!(harness.sensor.start_count(), 1);
}

#[test]
fn test_three_frame_exam_completes() {
    let harness = create_test_harness(create_test_config());
    let orchestrator = &harness.orchestrator;
    let states = record_states(orchestrator);

    orchestrator.prepare_exam(standard_spec());
    orchestrator.start_acquisition();
    for _ in 0..3 {
        complete_frame(orchestrator);
    }

    assert_eq!(orchestrator.get_exam_state(), ExamState::Completed);
    assert_eq!(
        states.lock()[3..],
        [
            ExamState::Reconstructing,
            ExamState::PostProcessing,
            ExamState::Completed
        ]
    );

    let path = orchestrator.get_acquired_image_path().unwrap();
    assert!(path.starts_with("/tmp/panexam-test"));
    assert!(path.to_string_lossy().ends_with(".png"));

    let (image, metadata) = harness.store.get(&path).unwrap();
    assert_eq!((image.width(), image.height()), (12, 8));
    assert_eq!(metadata.filters, vec!["normalize".to_string()]);
    assert_eq!(metadata.frame_count, 3);

    let result = orchestrator.exam_result();
    assert!(result.is_complete());
    assert_eq!(result.frames_lost, 0);
    assert!(orchestrator.is_exam_complete());

    let stored = orchestrator.last_image().unwrap();
    assert_eq!(*stored, image);
    assert_eq!(orchestrator.acquired_frames().len(), 3);
}

#[test]
fn test_progress_is_bounded_and_reaches_one() {
    let harness = create_test_harness(create_test_config());
    let orchestrator = &harness.orchestrator;
    let progress = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&progress);
    orchestrator.register_progress_callback(move |p| sink.lock().push(p));

    orchestrator.prepare_exam(standard_spec());
    orchestrator.start_acquisition();
    for _ in 0..3 {
        complete_frame(orchestrator);
    }

    let progress = progress.lock();
    assert!(progress.iter().all(|p| (0.0..=1.0).contains(p)));
    assert_eq!(progress.first(), Some(&0.0));
    assert_eq!(progress.last(), Some(&1.0));
    assert!(progress.contains(&(1.0 / 3.0)));
}

#[test]
fn test_out_of_range_factors_are_rejected_without_transition() {
    let harness = create_test_harness(create_test_config());
    let orchestrator = &harness.orchestrator;
    let states = record_states(orchestrator);

    assert!(!orchestrator.configure_technical_factors(-5.0, 10.0, false));
    assert_eq!(orchestrator.get_exam_state(), ExamState::Idle);
    assert!(states.lock().is_empty());

    orchestrator.prepare_exam(standard_spec());
    assert!(!orchestrator.configure_technical_factors(-5.0, 10.0, false));
    assert!(!orchestrator.configure_technical_factors(70.0, f32::NAN, false));
    assert_eq!(orchestrator.get_exam_state(), ExamState::Ready);

    assert!(orchestrator.configure_technical_factors(80.0, 10.0, true));
    assert_eq!(harness.device.configured_factors(), Some((80.0, 10.0)));
    assert!(harness.device.mrt_enabled());
    assert_eq!(orchestrator.get_exam_state(), ExamState::Ready);
}

#[test]
fn test_device_refusing_factors_fails_the_run() {
    let harness = create_test_harness(create_test_config());
    let orchestrator = &harness.orchestrator;

    orchestrator.prepare_exam(standard_spec());
    harness.device.update_faults(|f| f.reject_factors = true);

    assert!(!orchestrator.configure_technical_factors(75.0, 9.0, false));
    let result = orchestrator.exam_result();
    assert_eq!(result.state, ExamState::Failed);
    assert_eq!(
        result.failure.map(|f| f.kind),
        Some(ErrorType::ConfigurationError)
    );
}

#[test]
fn test_sensor_error_fails_with_diagnostics() {
    let harness = create_test_harness(create_test_config());
    let orchestrator = &harness.orchestrator;
    let states = record_states(orchestrator);

    orchestrator.prepare_exam(standard_spec());
    orchestrator.start_acquisition();
    complete_frame(orchestrator);
    orchestrator.handle_sensor_event(SensorEventKind::Error, false, 42);

    assert_eq!(orchestrator.get_exam_state(), ExamState::Failed);
    assert!(orchestrator.get_acquired_image_path().is_none());

    let diagnostics = orchestrator.get_sensor_diagnostics();
    assert_eq!(diagnostics.last_error_code, Some(42));
    assert!(diagnostics.last_error.is_some());
    assert_eq!(diagnostics.frames_acquired, 1);
    assert_eq!(diagnostics.frames_lost, 2);

    let failure = orchestrator.exam_result().failure.unwrap();
    assert_eq!(failure.kind, ErrorType::SensorFault);
    assert_eq!(failure.error_code, 42);
    assert!(harness.device.reset_count() >= 1);
    assert!(!harness.sensor.is_acquiring());

    let failed = states.lock().iter().filter(|s| **s == ExamState::Failed).count();
    assert_eq!(failed, 1);
}

#[test]
fn test_unconfirmed_completion_is_a_timeout() {
    let harness = create_test_harness(create_test_config());
    let orchestrator = &harness.orchestrator;

    orchestrator.prepare_exam(standard_spec());
    orchestrator.start_acquisition();
    orchestrator.handle_sensor_event(SensorEventKind::Completed, false, 0);

    let failure = orchestrator.exam_result().failure.unwrap();
    assert_eq!(failure.kind, ErrorType::AcquisitionTimeout);
}

#[test]
fn test_abort_is_idempotent() {
    let harness = create_test_harness(create_test_config());
    let orchestrator = &harness.orchestrator;
    let states = record_states(orchestrator);

    orchestrator.prepare_exam(standard_spec());
    orchestrator.start_acquisition();
    complete_frame(orchestrator);

    assert!(orchestrator.abort_acquisition());
    assert!(orchestrator.abort_acquisition());
    assert_eq!(orchestrator.get_exam_state(), ExamState::Aborted);

    let aborted = states.lock().iter().filter(|s| **s == ExamState::Aborted).count();
    assert_eq!(aborted, 1);
    assert!(!harness.sensor.is_acquiring());
}

#[test]
fn test_abort_accounts_for_lost_frames() {
    for received in 0..3u32 {
        let harness = create_test_harness(create_test_config());
        let orchestrator = &harness.orchestrator;

        orchestrator.prepare_exam(standard_spec());
        orchestrator.start_acquisition();
        for _ in 0..received {
            complete_frame(orchestrator);
        }
        orchestrator.abort_acquisition();

        let result = orchestrator.exam_result();
        assert_eq!(result.frames_acquired, received);
        assert_eq!(result.frames_lost, 3 - received);
        assert!(result.image_path.is_none());
        assert!(orchestrator.last_image().is_none());
        assert!(harness.store.is_empty());
    }
}

#[test]
fn test_abort_rejected_outside_cancellable_states() {
    let harness = create_test_harness(create_test_config());
    assert!(!harness.orchestrator.abort_acquisition());
    assert_eq!(harness.orchestrator.get_exam_state(), ExamState::Idle);
}

#[test]
fn test_abort_from_ready() {
    let harness = create_test_harness(create_test_config());
    let orchestrator = &harness.orchestrator;

    orchestrator.prepare_exam(standard_spec());
    assert!(orchestrator.abort_acquisition());
    assert_eq!(orchestrator.get_exam_state(), ExamState::Aborted);
    assert_eq!(harness.sensor.start_count(), 0);
}

#[test]
fn test_events_after_abort_change_nothing() {
    let harness = create_test_harness(create_test_config());
    let orchestrator = &harness.orchestrator;

    orchestrator.prepare_exam(standard_spec());
    orchestrator.start_acquisition();
    complete_frame(orchestrator);
    orchestrator.abort_acquisition();

    complete_frame(orchestrator);
    orchestrator.handle_sensor_event(SensorEventKind::Error, false, 9);

    let result = orchestrator.exam_result();
    assert_eq!(result.state, ExamState::Aborted);
    assert_eq!(result.frames_acquired, 1);
    assert!(result.failure.is_none());
}

#[test]
fn test_missing_readout_fails_with_frame_loss() {
    let harness = create_test_harness(create_test_config());
    let orchestrator = &harness.orchestrator;
    harness.sensor.update_faults(|f| {
        f.drop_frames.insert(1);
    });

    orchestrator.prepare_exam(standard_spec());
    orchestrator.start_acquisition();
    for _ in 0..3 {
        complete_frame(orchestrator);
    }

    let result = orchestrator.exam_result();
    assert_eq!(result.state, ExamState::Failed);
    assert_eq!(result.failure.unwrap().kind, ErrorType::FrameLossExceeded);
    assert_eq!(result.frames_acquired, 2);
    assert_eq!(result.frames_lost, 1);
    assert_eq!(orchestrator.get_sensor_diagnostics().frames_rejected, 1);
}

#[test]
fn test_invalid_and_duplicate_payloads_are_rejected() {
    let harness = create_test_harness(create_test_config());
    let orchestrator = &harness.orchestrator;
    let mut events = orchestrator.subscribe();

    orchestrator.prepare_exam(standard_spec());
    orchestrator.start_acquisition();
    push_frame(orchestrator, AcquisitionFrame::uniform(0, 4, 8, 10));
    push_frame(orchestrator, AcquisitionFrame::uniform(0, 4, 8, 10));

    assert_eq!(orchestrator.get_exam_state(), ExamState::Acquiring);
    assert_eq!(rejection_reasons(&mut events), vec!["duplicate sequence index"]);

    // An unusable readout settles its index; the sweep ends once frame 2 arrives
    push_frame(orchestrator, AcquisitionFrame::uniform(1, 4, 8, 10).invalidated());
    assert_eq!(orchestrator.get_exam_state(), ExamState::Acquiring);
    push_frame(orchestrator, AcquisitionFrame::uniform(2, 4, 8, 10));

    let result = orchestrator.exam_result();
    assert_eq!(result.state, ExamState::Failed);
    assert_eq!(result.failure.unwrap().kind, ErrorType::FrameLossExceeded);
    assert_eq!(result.frames_acquired, 2);
    assert_eq!(result.frames_lost, 1);
}

#[test]
fn test_rejected_frames_do_not_end_the_sweep() {
    let harness = create_test_harness(create_test_config());
    let orchestrator = &harness.orchestrator;
    let mut events = orchestrator.subscribe();

    orchestrator.prepare_exam(standard_spec());
    orchestrator.start_acquisition();
    push_frame(orchestrator, AcquisitionFrame::uniform(0, 4, 8, 10));
    push_frame(orchestrator, AcquisitionFrame::uniform(0, 4, 8, 10));
    push_frame(orchestrator, AcquisitionFrame::uniform(9, 4, 8, 10));
    push_frame(orchestrator, AcquisitionFrame::uniform(1, 4, 8, 10));
    push_frame(orchestrator, AcquisitionFrame::uniform(1, 4, 8, 10));
    assert_eq!(orchestrator.get_exam_state(), ExamState::Acquiring);

    push_frame(orchestrator, AcquisitionFrame::uniform(2, 4, 8, 10));

    let result = orchestrator.exam_result();
    assert_eq!(result.state, ExamState::Completed);
    assert_eq!(result.frames_acquired, 3);
    assert_eq!(result.frames_lost, 0);
    assert_eq!(orchestrator.get_sensor_diagnostics().frames_rejected, 3);
    assert_eq!(
        rejection_reasons(&mut events),
        vec![
            "duplicate sequence index",
            "sequence index out of range",
            "duplicate sequence index"
        ]
    );
}

#[test]
fn test_readout_after_rejection_uses_next_open_index() {
    let harness = create_test_harness(create_test_config());
    let orchestrator = &harness.orchestrator;

    orchestrator.prepare_exam(standard_spec());
    orchestrator.start_acquisition();
    push_frame(orchestrator, SimulatedSensor::pattern_frame(0, 4, 8));
    push_frame(orchestrator, SimulatedSensor::pattern_frame(0, 4, 8));
    complete_frame(orchestrator);
    complete_frame(orchestrator);

    assert_eq!(orchestrator.get_exam_state(), ExamState::Completed);
    let indices: Vec<u32> = orchestrator
        .acquired_frames()
        .iter()
        .map(|f| f.sequence_index)
        .collect();
    assert_eq!(indices, vec![0, 1, 2]);
}

#[test]
fn test_any_arrival_order_completes() {
    let orders = [
        [0, 1, 2],
        [0, 2, 1],
        [1, 0, 2],
        [1, 2, 0],
        [2, 0, 1],
        [2, 1, 0],
    ];
    for order in orders {
        let harness = create_test_harness(create_test_config());
        let orchestrator = &harness.orchestrator;

        orchestrator.prepare_exam(standard_spec());
        orchestrator.start_acquisition();
        for index in order {
            push_frame(orchestrator, SimulatedSensor::pattern_frame(index, 4, 8));
        }

        assert_eq!(
            orchestrator.get_exam_state(),
            ExamState::Completed,
            "order {:?}",
            order
        );
        let image = orchestrator.last_image().unwrap();
        assert_eq!((image.width(), image.height()), (12, 8));
    }
}

#[test]
fn test_events_from_an_earlier_exam_are_dropped() {
    let harness = create_test_harness(create_test_config());
    let orchestrator = &harness.orchestrator;

    orchestrator.prepare_exam(standard_spec());
    orchestrator.start_acquisition();
    let first = orchestrator.exam_id().unwrap();
    orchestrator.abort_acquisition();

    orchestrator.prepare_exam(standard_spec());
    orchestrator.start_acquisition();
    orchestrator.process_sensor_event(SensorEvent::error(7).for_exam(first));
    orchestrator.process_sensor_event(
        SensorEvent::completed_with_frame(AcquisitionFrame::uniform(0, 4, 8, 10)).for_exam(first),
    );

    assert_eq!(orchestrator.get_exam_state(), ExamState::Acquiring);
    let diagnostics = orchestrator.get_sensor_diagnostics();
    assert_eq!(diagnostics.frames_acquired, 0);
    assert_eq!(diagnostics.last_error_code, None);

    let current = orchestrator.exam_id().unwrap();
    for index in 0..3 {
        orchestrator.process_sensor_event(
            SensorEvent::completed_with_frame(SimulatedSensor::pattern_frame(index, 4, 8))
                .for_exam(current),
        );
    }
    assert_eq!(orchestrator.get_exam_state(), ExamState::Completed);
}

#[test]
fn test_sensor_error_before_acquisition_fails_the_run() {
    let harness = create_test_harness(create_test_config());
    let orchestrator = &harness.orchestrator;
    let states = record_states(orchestrator);

    orchestrator.prepare_exam(standard_spec());
    orchestrator.handle_sensor_event(SensorEventKind::Error, false, 42);

    assert_eq!(orchestrator.get_exam_state(), ExamState::Failed);
    assert_eq!(orchestrator.get_sensor_diagnostics().last_error_code, Some(42));
    assert_eq!(
        orchestrator.exam_result().failure.map(|f| f.kind),
        Some(ErrorType::SensorFault)
    );
    assert_eq!(
        *states.lock(),
        vec![ExamState::Preparing, ExamState::Ready, ExamState::Failed]
    );

    // Completions outside Acquiring still change nothing
    complete_frame(orchestrator);
    assert_eq!(orchestrator.exam_result().frames_acquired, 0);
}

#[test]
fn test_inconsistent_frames_fail_reconstruction() {
    let harness = create_test_harness(create_test_config());
    let orchestrator = &harness.orchestrator;

    orchestrator.prepare_exam(standard_spec());
    orchestrator.start_acquisition();
    for (index, width) in [(0, 4), (1, 5), (2, 4)] {
        orchestrator.process_sensor_event(SensorEvent::completed_with_frame(
            AcquisitionFrame::uniform(index, width, 8, 100),
        ));
    }

    let result = orchestrator.exam_result();
    assert_eq!(result.state, ExamState::Failed);
    assert_eq!(result.failure.unwrap().kind, ErrorType::ReconstructionFailure);
    assert!(orchestrator.get_acquired_image_path().is_none());
}

#[test]
fn test_store_failure_fails_post_processing() {
    let harness = create_test_harness(create_test_config());
    let orchestrator = &harness.orchestrator;
    harness.store.set_fail_writes(true);

    orchestrator.prepare_exam(standard_spec());
    orchestrator.start_acquisition();
    for _ in 0..3 {
        complete_frame(orchestrator);
    }

    let result = orchestrator.exam_result();
    assert_eq!(result.state, ExamState::Failed);
    assert_eq!(result.failure.unwrap().kind, ErrorType::PostProcessingFailure);
    assert!(result.image_path.is_none());
}

#[test]
fn test_keep_raw_stores_both_images() {
    let mut config = create_test_config();
    config.pipeline.keep_raw = true;
    let harness = create_test_harness(config);
    let orchestrator = &harness.orchestrator;

    orchestrator.prepare_exam(standard_spec());
    orchestrator.start_acquisition();
    for _ in 0..3 {
        complete_frame(orchestrator);
    }

    assert_eq!(harness.store.len(), 2);
    let raw = harness
        .store
        .paths()
        .into_iter()
        .find(|p| p.to_string_lossy().ends_with("_raw.png"))
        .unwrap();
    assert!(harness.store.get(&raw).unwrap().1.filters.is_empty());
}

#[test]
fn test_missing_trajectory_fails_prepare() {
    let config = create_test_config();
    let device = Arc::new(SimulatedDevice::new());
    let orchestrator = AcquisitionOrchestrator::builder()
        .sensor(Arc::new(SimulatedSensor::manual()))
        .config(config)
        .device(device.clone())
        .trajectories(Arc::new(StaticTrajectorySource::new()))
        .image_store(Arc::new(MemoryImageStore::new()))
        .build()
        .unwrap();
    let states = record_states(&orchestrator);

    assert!(!orchestrator.prepare_exam(standard_spec()));
    assert_eq!(*states.lock(), vec![ExamState::Preparing, ExamState::Failed]);
    assert_eq!(
        orchestrator.exam_result().failure.map(|f| f.kind),
        Some(ErrorType::TrajectoryError)
    );
    assert!(device.reset_count() >= 1);
}

#[test]
fn test_unreachable_sensor_fails_prepare() {
    let harness = create_test_harness(create_test_config());
    harness.sensor.update_faults(|f| f.unreachable = true);

    assert!(!harness.orchestrator.prepare_exam(standard_spec()));
    assert_eq!(
        harness.orchestrator.exam_result().failure.map(|f| f.kind),
        Some(ErrorType::SensorUnavailable)
    );
}

#[test]
fn test_out_of_range_specification_fails_prepare() {
    let harness = create_test_harness(create_test_config());
    let mut spec = standard_spec();
    spec.factors.kv = 150.0;

    assert!(!harness.orchestrator.prepare_exam(spec));
    assert_eq!(
        harness.orchestrator.exam_result().failure.map(|f| f.kind),
        Some(ErrorType::ConfigurationError)
    );
}

#[test]
fn test_prepare_requires_finished_run() {
    let harness = create_test_harness(create_test_config());
    let orchestrator = &harness.orchestrator;

    orchestrator.prepare_exam(standard_spec());
    let first = orchestrator.exam_id();
    orchestrator.start_acquisition();
    assert!(!orchestrator.prepare_exam(standard_spec()));
    assert_eq!(orchestrator.exam_id(), first);

    orchestrator.abort_acquisition();
    assert!(orchestrator.prepare_exam(standard_spec()));
    assert_ne!(orchestrator.exam_id(), first);
    assert_eq!(orchestrator.get_exam_state(), ExamState::Ready);
    assert_eq!(orchestrator.exam_result().frames_lost, 0);
}

#[test]
fn test_sensor_rejecting_start_keeps_ready() {
    let harness = create_test_harness(create_test_config());
    let orchestrator = &harness.orchestrator;

    orchestrator.prepare_exam(standard_spec());
    harness.sensor.update_faults(|f| f.reject_start = true);

    assert!(!orchestrator.start_acquisition());
    assert_eq!(orchestrator.get_exam_state(), ExamState::Ready);
}

#[test]
fn test_validate_prerequisites_is_pure() {
    let harness = create_test_harness(create_test_config());
    let orchestrator = &harness.orchestrator;

    assert!(orchestrator.validate_prerequisites(PatientSize::Large).valid);

    harness.device.update_faults(|f| f.unreachable = true);
    let result = orchestrator.validate_prerequisites(PatientSize::Large);
    assert!(!result.valid);
    assert!(!result.message.is_empty());
    assert_eq!(orchestrator.get_exam_state(), ExamState::Idle);
}

#[test]
fn test_recommended_factors_come_from_config() {
    let mut config = create_test_config();
    config.factors.large_kv = 77.0;
    let harness = create_test_harness(config);

    let factors = harness
        .orchestrator
        .get_recommended_factors(PatientSize::Large);
    assert_eq!(factors.kv, 77.0);
    assert_eq!(
        harness.orchestrator.get_recommended_factors(PatientSize::Child),
        harness.orchestrator.config().factors.recommended(PatientSize::Child)
    );
}

#[test]
fn test_handle_error_notifies_once() {
    let harness = create_test_harness(create_test_config());
    let orchestrator = &harness.orchestrator;
    let states = record_states(orchestrator);

    orchestrator.prepare_exam(standard_spec());
    assert!(orchestrator.handle_error(ErrorType::DeviceUnavailable, "cable pulled", 5));
    assert!(!orchestrator.handle_error(ErrorType::SensorFault, "late", 6));

    let failed = states.lock().iter().filter(|s| **s == ExamState::Failed).count();
    assert_eq!(failed, 1);
    assert_eq!(
        orchestrator.exam_result().failure.map(|f| f.error_code),
        Some(5)
    );

    let diagnostics = orchestrator.get_sensor_diagnostics();
    assert_eq!(diagnostics.last_error_code, Some(5));
    assert_eq!(diagnostics.last_error.as_deref(), Some("cable pulled"));
}

#[test]
fn test_callbacks_may_reenter_the_orchestrator() {
    let harness = create_test_harness(create_test_config());
    let orchestrator = &harness.orchestrator;
    let weak = Arc::downgrade(orchestrator);

    orchestrator.register_state_update_callback(move |state| {
        if state == ExamState::Acquiring {
            if let Some(orchestrator) = weak.upgrade() {
                assert_eq!(orchestrator.get_exam_state(), ExamState::Acquiring);
                orchestrator.abort_acquisition();
            }
        }
    });

    orchestrator.prepare_exam(standard_spec());
    assert!(orchestrator.start_acquisition());
    assert_eq!(orchestrator.get_exam_state(), ExamState::Aborted);
}

#[test]
fn test_concurrent_abort_and_events_end_in_one_terminal_state() {
    for _ in 0..20 {
        let harness = create_test_harness(create_test_config());
        let orchestrator = Arc::clone(&harness.orchestrator);
        let terminal = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&terminal);
        orchestrator.register_state_update_callback(move |state| {
            if state.is_terminal() {
                sink.lock().push(state);
            }
        });

        orchestrator.prepare_exam(standard_spec());
        orchestrator.start_acquisition();

        let events = {
            let orchestrator = Arc::clone(&orchestrator);
            std::thread::spawn(move || {
                for _ in 0..3 {
                    complete_frame(&orchestrator);
                }
            })
        };
        let abort = {
            let orchestrator = Arc::clone(&orchestrator);
            std::thread::spawn(move || orchestrator.abort_acquisition())
        };
        events.join().unwrap();
        let aborted = abort.join().unwrap();

        let state = orchestrator.get_exam_state();
        assert_eq!(terminal.lock().len(), 1);
        assert_eq!(terminal.lock()[0], state);
        if state == ExamState::Aborted {
            assert!(aborted);
            assert!(orchestrator.get_acquired_image_path().is_none());
        } else {
            assert_eq!(state, ExamState::Completed);
        }
    }
}

#[test]
fn test_end_to_end_with_pump_and_file_store() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = create_test_config();
    config.pipeline.output_dir = temp_dir.path().to_string_lossy().into_owned();

    let (sender, receiver) = sensor_event_channel(config.system.sensor_queue_capacity);
    let sensor = Arc::new(SimulatedSensor::autonomous(sender));
    let orchestrator = Arc::new(
        AcquisitionOrchestrator::builder()
            .config(config)
            .device(Arc::new(SimulatedDevice::new()))
            .sensor(sensor)
            .image_store(Arc::new(FileImageStore::new()))
            .build()
            .unwrap(),
    );
    let pump = SensorEventPump::spawn(receiver, Arc::clone(&orchestrator)).unwrap();

    assert!(orchestrator.prepare_exam(standard_spec()));
    assert!(orchestrator.start_acquisition());
    let state = wait_for_terminal(&orchestrator, Duration::from_secs(5));
    assert_eq!(pump.shutdown(), 3);

    assert_eq!(state, ExamState::Completed);
    let path = orchestrator.get_acquired_image_path().unwrap();
    assert!(path.exists());
    assert!(FileImageStore::sidecar_path(&path).exists());
}

#[tokio::test]
async fn test_bus_reports_frames_and_completion() {
    let harness = create_test_harness(create_test_config());
    let orchestrator = &harness.orchestrator;
    let mut receiver = orchestrator.subscribe();

    orchestrator.prepare_exam(standard_spec());
    orchestrator.start_acquisition();
    for _ in 0..3 {
        complete_frame(orchestrator);
    }

    let mut accepted = 0;
    let mut completed = None;
    while let Ok(event) = receiver.try_recv() {
        match event {
            ExamEvent::FrameAccepted { .. } => accepted += 1,
            ExamEvent::ExamCompleted { image_path, .. } => completed = Some(image_path),
            _ => {}
        }
    }

    assert_eq!(accepted, 3);
    assert_eq!(completed, orchestrator.get_acquired_image_path());
}
