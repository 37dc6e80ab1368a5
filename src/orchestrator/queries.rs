use super::AcquisitionOrchestrator;
use crate::domain::{
    ExamId, ExamResult, ExamState, PatientSize, SensorDiagnosticInfo, SensorStatus,
    TechnicalFactors,
};
use crate::events::{EventFilter, EventReceiver, ExamEvent};
use crate::frame::AcquisitionFrame;
use crate::reconstruction::PanoramicImage;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

impl AcquisitionOrchestrator {
    pub fn get_exam_state(&self) -> ExamState {
        self.run.lock().state
    }

    pub fn exam_id(&self) -> Option<ExamId> {
        self.run.lock().exam_id
    }

    /// Observe every state transition. Called once per transition, after the
    /// orchestrator has released its lock.
    pub fn register_state_update_callback<F>(&self, callback: F)
    where
        F: Fn(ExamState) + Send + Sync + 'static,
    {
        self.dispatcher.register_state_callback(Arc::new(callback));
    }

    /// Observe progress in [0.0, 1.0]
    pub fn register_progress_callback<F>(&self, callback: F)
    where
        F: Fn(f32) + Send + Sync + 'static,
    {
        self.dispatcher.register_progress_callback(Arc::new(callback));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExamEvent> {
        self.dispatcher.subscribe()
    }

    pub fn subscribe_filtered<S: Into<String>>(
        &self,
        filter: EventFilter,
        name: S,
    ) -> EventReceiver {
        self.dispatcher.subscribe_filtered(filter, name)
    }

    /// Path of the stored image; `None` unless the run completed
    pub fn get_acquired_image_path(&self) -> Option<PathBuf> {
        let run = self.run.lock();
        if run.state == ExamState::Completed {
            run.image_path.clone()
        } else {
            None
        }
    }

    /// Processed image of the completed run
    pub fn last_image(&self) -> Option<Arc<PanoramicImage>> {
        let run = self.run.lock();
        if run.state == ExamState::Completed {
            run.image.clone()
        } else {
            None
        }
    }

    /// Frames stored for the current run, in sequence order
    pub fn acquired_frames(&self) -> Vec<AcquisitionFrame> {
        self.run.lock().accumulator.ordered_frames()
    }

    pub fn is_sensor_available(&self) -> bool {
        self.sensor.is_available()
    }

    pub fn get_sensor_diagnostics(&self) -> SensorDiagnosticInfo {
        // Query the port before taking the run lock
        let status = self.sensor.status();
        let run = self.run.lock();
        let stats = run.accumulator.stats();

        SensorDiagnosticInfo {
            connected: !matches!(status, SensorStatus::Disconnected | SensorStatus::Timeout),
            status,
            frames_expected: stats.frames_expected,
            frames_acquired: stats.frames_acquired,
            frames_lost: stats.frames_lost,
            frames_rejected: stats.frames_rejected,
            last_error_code: run.last_error_code,
            last_error: run.last_error.clone(),
            last_event_at: run.last_event_at,
        }
    }

    pub fn get_recommended_factors(&self, patient_size: PatientSize) -> TechnicalFactors {
        self.config.factors.recommended(patient_size)
    }

    /// Outcome of the current or most recent run
    pub fn exam_result(&self) -> ExamResult {
        let run = self.run.lock();
        ExamResult {
            exam_id: run.exam_id,
            specification: run.specification.clone(),
            state: run.state,
            frames_expected: run.accumulator.frames_expected(),
            frames_acquired: run.accumulator.frames_acquired(),
            frames_lost: run.accumulator.frames_lost(),
            image_path: if run.state == ExamState::Completed {
                run.image_path.clone()
            } else {
                None
            },
            failure: run.failure.clone(),
        }
    }

    pub fn is_exam_complete(&self) -> bool {
        self.get_exam_state() == ExamState::Completed
    }
}
