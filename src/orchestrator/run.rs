use crate::accumulator::FrameAccumulator;
use crate::domain::{
    ErrorType, ExamFailure, ExamId, ExamSpecification, ExamState, TechnicalFactors,
};
use crate::events::{ExamEvent, Notice};
use crate::reconstruction::PanoramicImage;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Everything the orchestrator's lock guards
#[derive(Debug)]
pub(super) struct ExamRun {
    pub state: ExamState,
    pub exam_id: Option<ExamId>,
    pub specification: Option<ExamSpecification>,
    /// Factors last accepted by the device for this run
    pub factors: Option<TechnicalFactors>,
    pub accumulator: FrameAccumulator,
    pub image_path: Option<PathBuf>,
    /// Processed image of a completed run
    pub image: Option<Arc<PanoramicImage>>,
    pub failure: Option<ExamFailure>,
    pub last_error_code: Option<i32>,
    pub last_error: Option<String>,
    pub last_event_at: Option<DateTime<Utc>>,
    notices: Vec<Notice>,
}

impl ExamRun {
    pub fn new() -> Self {
        Self {
            state: ExamState::Idle,
            exam_id: None,
            specification: None,
            factors: None,
            accumulator: FrameAccumulator::new(),
            image_path: None,
            image: None,
            failure: None,
            last_error_code: None,
            last_error: None,
            last_event_at: None,
            notices: Vec::new(),
        }
    }

    /// Discard the previous run and adopt a new specification
    pub fn begin(&mut self, specification: ExamSpecification) -> ExamId {
        let exam_id = ExamId::new();
        self.exam_id = Some(exam_id);
        self.specification = Some(specification);
        self.factors = None;
        self.accumulator.reset(0);
        self.image_path = None;
        self.image = None;
        self.failure = None;
        self.last_error_code = None;
        self.last_error = None;
        self.last_event_at = None;
        exam_id
    }

    /// Move along a legal edge and queue the observer notice
    pub fn transition(&mut self, next: ExamState) -> bool {
        let from = self.state;
        if !from.can_transition_to(next) {
            warn!("Rejected state transition {} -> {}", from, next);
            return false;
        }

        self.state = next;
        info!("Exam {} state {} -> {}", self.exam_label(), from, next);
        self.notices.push(Notice::State(next));
        self.notices.push(Notice::Event(ExamEvent::StateChanged {
            exam_id: self.exam_id,
            from,
            to: next,
        }));
        true
    }

    pub fn progress(&mut self, fraction: f32) {
        let fraction = fraction.clamp(0.0, 1.0);
        self.notices.push(Notice::Progress(fraction));
        self.notices.push(Notice::Event(ExamEvent::Progress {
            exam_id: self.exam_id,
            fraction,
        }));
    }

    pub fn event(&mut self, event: ExamEvent) {
        self.notices.push(Notice::Event(event));
    }

    /// Record the failure and move to Failed; false if the run already ended
    pub fn fail(&mut self, kind: ErrorType, message: &str, error_code: i32) -> bool {
        if self.state.is_terminal() {
            return false;
        }

        let failure = ExamFailure {
            kind,
            message: message.to_string(),
            error_code,
            at: Utc::now(),
        };
        self.failure = Some(failure.clone());
        self.image_path = None;
        self.accumulator.finalize();

        if !self.transition(ExamState::Failed) {
            return false;
        }
        self.event(ExamEvent::ExamFailed {
            exam_id: self.exam_id,
            failure,
        });
        true
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    pub fn exam_label(&self) -> String {
        self.exam_id
            .map(|id| id.short())
            .unwrap_or_else(|| "-".to_string())
    }
}
