use super::run::ExamRun;
use super::OrchestratorBuilder;
use crate::config::PanexamConfig;
use crate::domain::{ErrorType, ExamState};
use crate::events::EventDispatcher;
use crate::ports::{DevicePort, ImageStore, SensorPort, TrajectorySource};
use crate::reconstruction::ReconstructionPipeline;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use tracing::{debug, warn};

/// Central state machine of a panoramic exam.
///
/// Commands arrive from the caller thread, sensor events from whichever
/// thread drives [`AcquisitionOrchestrator::process_sensor_event`]. Both are
/// serialized through one lock around the run state; observers are notified
/// after that lock has been released.
pub struct AcquisitionOrchestrator {
    pub(super) config: PanexamConfig,
    pub(super) device: Arc<dyn DevicePort>,
    pub(super) sensor: Arc<dyn SensorPort>,
    pub(super) trajectories: Arc<dyn TrajectorySource>,
    pub(super) store: Arc<dyn ImageStore>,
    pub(super) pipeline: ReconstructionPipeline,
    pub(super) dispatcher: EventDispatcher,
    pub(super) run: Mutex<ExamRun>,
}

impl AcquisitionOrchestrator {
    /// Create an orchestrator around already constructed collaborators
    pub fn new(
        config: PanexamConfig,
        device: Arc<dyn DevicePort>,
        sensor: Arc<dyn SensorPort>,
        trajectories: Arc<dyn TrajectorySource>,
        store: Arc<dyn ImageStore>,
        pipeline: ReconstructionPipeline,
    ) -> Self {
        let dispatcher = EventDispatcher::new(config.system.event_bus_capacity);
        debug!(
            "Orchestrator created with device '{}' and sensor '{}'",
            device.name(),
            sensor.name()
        );
        Self {
            config,
            device,
            sensor,
            trajectories,
            store,
            pipeline,
            dispatcher,
            run: Mutex::new(ExamRun::new()),
        }
    }

    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub fn config(&self) -> &PanexamConfig {
        &self.config
    }

    /// Release the lock, then hand everything queued under it to observers
    pub(super) fn finish(&self, mut run: MutexGuard<'_, ExamRun>) {
        let notices = run.take_notices();
        drop(run);
        self.dispatcher.deliver(notices);
    }

    /// Fail the run while holding the lock, stopping hardware best-effort
    pub(super) fn fail_locked(
        &self,
        run: &mut ExamRun,
        kind: ErrorType,
        message: &str,
        error_code: i32,
    ) -> bool {
        let was_acquiring = run.state == ExamState::Acquiring;
        if !run.fail(kind, message, error_code) {
            debug!(
                "Ignoring {} for exam {}: run already in {}",
                kind,
                run.exam_label(),
                run.state
            );
            return false;
        }

        if was_acquiring {
            if let Err(e) = self.sensor.stop_acquisition() {
                warn!("Sensor stop after failure did not succeed: {}", e);
            }
        }
        if let Err(e) = self.device.reset() {
            warn!("Device reset after failure did not succeed: {}", e);
        }
        true
    }
}
