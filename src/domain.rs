//! Value types shared by the ports, the pipeline and the orchestrator.
//!
//! Everything here is an immutable carrier. State transitions live in
//! [`crate::orchestrator`]; this module only answers questions about a value.

use crate::frame::AcquisitionFrame;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Identifier assigned to each accepted exam run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExamId(Uuid);

impl ExamId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Short form used in file names and log lines
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for ExamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Panoramic exam programs supported by the positioning device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExamType {
    PanStandard,
    PanChild,
    Bitewing,
    Tmj,
}

impl ExamType {
    pub fn label(&self) -> &'static str {
        match self {
            ExamType::PanStandard => "pan_standard",
            ExamType::PanChild => "pan_child",
            ExamType::Bitewing => "bitewing",
            ExamType::Tmj => "tmj",
        }
    }
}

impl fmt::Display for ExamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for ExamType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pan_standard" | "standard" => Ok(ExamType::PanStandard),
            "pan_child" | "child" => Ok(ExamType::PanChild),
            "bitewing" => Ok(ExamType::Bitewing),
            "tmj" => Ok(ExamType::Tmj),
            other => Err(format!("unknown exam type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatientSize {
    Child,
    Small,
    Medium,
    Large,
}

impl PatientSize {
    pub fn label(&self) -> &'static str {
        match self {
            PatientSize::Child => "child",
            PatientSize::Small => "small",
            PatientSize::Medium => "medium",
            PatientSize::Large => "large",
        }
    }
}

impl fmt::Display for PatientSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for PatientSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "child" => Ok(PatientSize::Child),
            "small" => Ok(PatientSize::Small),
            "medium" => Ok(PatientSize::Medium),
            "large" => Ok(PatientSize::Large),
            other => Err(format!("unknown patient size '{}'", other)),
        }
    }
}

/// Radiation technical factors for one exposure
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TechnicalFactors {
    /// Tube voltage in kilovolt
    pub kv: f32,
    /// Tube current in milliampere
    pub ma: f32,
    /// Modulated radiation during the sweep
    pub mrt_enabled: bool,
}

impl TechnicalFactors {
    pub fn new(kv: f32, ma: f32, mrt_enabled: bool) -> Self {
        Self { kv, ma, mrt_enabled }
    }
}

/// What the caller asks for; immutable once `prepare_exam` accepts it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamSpecification {
    pub exam_type: ExamType,
    pub patient_size: PatientSize,
    pub factors: TechnicalFactors,
}

impl ExamSpecification {
    pub fn new(exam_type: ExamType, patient_size: PatientSize, factors: TechnicalFactors) -> Self {
        Self {
            exam_type,
            patient_size,
            factors,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub message: String,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            message: String::new(),
        }
    }

    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self {
            valid: false,
            message: message.into(),
        }
    }
}

/// Lifecycle of one exam run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExamState {
    Idle,
    Preparing,
    Ready,
    Acquiring,
    Reconstructing,
    PostProcessing,
    Completed,
    Aborted,
    Failed,
}

impl ExamState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExamState::Completed | ExamState::Aborted | ExamState::Failed
        )
    }

    /// A fresh `prepare_exam` is only accepted from these states
    pub fn accepts_new_exam(&self) -> bool {
        *self == ExamState::Idle || self.is_terminal()
    }

    /// Legal edges of the acquisition state machine
    pub fn can_transition_to(&self, next: ExamState) -> bool {
        use ExamState::*;
        match (self, next) {
            (s, Preparing) => s.accepts_new_exam(),
            (Preparing, Ready) => true,
            (Ready, Acquiring) => true,
            (Acquiring, Reconstructing) => true,
            (Reconstructing, PostProcessing) => true,
            (PostProcessing, Completed) => true,
            (Preparing | Ready | Acquiring, Aborted) => true,
            (s, Failed) => !s.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for ExamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Failure taxonomy reported through `handle_error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorType {
    ConfigurationError,
    SensorUnavailable,
    DeviceUnavailable,
    TrajectoryError,
    AcquisitionTimeout,
    SensorFault,
    FrameLossExceeded,
    ReconstructionFailure,
    PostProcessingFailure,
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ErrorType::ConfigurationError => "configuration error",
            ErrorType::SensorUnavailable => "sensor unavailable",
            ErrorType::DeviceUnavailable => "device unavailable",
            ErrorType::TrajectoryError => "trajectory error",
            ErrorType::AcquisitionTimeout => "acquisition timeout",
            ErrorType::SensorFault => "sensor fault",
            ErrorType::FrameLossExceeded => "frame loss exceeded",
            ErrorType::ReconstructionFailure => "reconstruction failure",
            ErrorType::PostProcessingFailure => "post-processing failure",
        };
        f.write_str(text)
    }
}

/// Diagnostic record of the failure that ended a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamFailure {
    pub kind: ErrorType,
    pub message: String,
    pub error_code: i32,
    pub at: DateTime<Utc>,
}

impl fmt::Display for ExamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {}): {}", self.kind, self.error_code, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceStatus {
    Disconnected,
    Ready,
    Busy,
    Fault { code: i32 },
    /// The status query did not answer within the port's bound
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorStatus {
    Disconnected,
    Ready,
    Acquiring,
    Fault { code: i32 },
    Timeout,
}

/// Read-only snapshot of sensor health and the current run's frame counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDiagnosticInfo {
    pub connected: bool,
    pub status: SensorStatus,
    pub frames_expected: u32,
    pub frames_acquired: u32,
    pub frames_lost: u32,
    pub frames_rejected: u32,
    pub last_error_code: Option<i32>,
    pub last_error: Option<String>,
    pub last_event_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorEventKind {
    Completed,
    Error,
}

/// Asynchronous notification raised by a sensor; consumed once
#[derive(Debug, Clone)]
pub struct SensorEvent {
    pub kind: SensorEventKind,
    pub success: bool,
    pub error_code: i32,
    /// Frame payload when the sensor pushes data with the completion
    pub frame: Option<AcquisitionFrame>,
    /// Exam whose sweep raised the event; untagged events apply to the
    /// current run
    pub exam_id: Option<ExamId>,
}

impl SensorEvent {
    pub fn completed() -> Self {
        Self {
            kind: SensorEventKind::Completed,
            success: true,
            error_code: 0,
            frame: None,
            exam_id: None,
        }
    }

    pub fn completed_with_frame(frame: AcquisitionFrame) -> Self {
        Self {
            frame: Some(frame),
            ..Self::completed()
        }
    }

    pub fn error(error_code: i32) -> Self {
        Self {
            kind: SensorEventKind::Error,
            success: false,
            error_code,
            frame: None,
            exam_id: None,
        }
    }

    /// Tag the event with the exam whose sweep raised it
    pub fn for_exam(mut self, exam_id: ExamId) -> Self {
        self.exam_id = Some(exam_id);
        self
    }

    pub fn is_failure(&self) -> bool {
        !self.success || self.kind == SensorEventKind::Error
    }
}

/// Outcome of the most recent run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamResult {
    pub exam_id: Option<ExamId>,
    pub specification: Option<ExamSpecification>,
    pub state: ExamState,
    pub frames_expected: u32,
    pub frames_acquired: u32,
    pub frames_lost: u32,
    pub image_path: Option<PathBuf>,
    pub failure: Option<ExamFailure>,
}

impl ExamResult {
    pub fn is_complete(&self) -> bool {
        self.state == ExamState::Completed
    }
}
