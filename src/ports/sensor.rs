use crate::domain::{ExamId, ExamType, SensorStatus};
use crate::error::Result;
use crate::frame::AcquisitionFrame;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Parameters handed to the sensor when a sweep is started
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionParameters {
    pub exam_id: ExamId,
    pub exam_type: ExamType,
    pub frame_count: u32,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Expected spacing between frame completions
    pub frame_interval: Duration,
}

/// Capability: imaging sensor
///
/// # Contract
/// - `start_acquisition` returns immediately: `Ok` means the sweep was
///   accepted, `Err` means it was rejected (busy, disconnected). Outcomes
///   arrive later as [`crate::domain::SensorEvent`]s through the
///   [`crate::events::SensorEventSender`] the sensor was built with.
/// - `read_frame` returns the readout for a completed frame, or `None` when
///   that readout is unavailable.
/// - `status` never fails and is bounded like [`super::DevicePort::status`].
pub trait SensorPort: Send + Sync {
    fn name(&self) -> &str;

    fn connect(&self) -> Result<()>;

    fn disconnect(&self) -> Result<()>;

    fn start_acquisition(&self, params: &AcquisitionParameters) -> Result<()>;

    fn stop_acquisition(&self) -> Result<()>;

    fn read_frame(&self, sequence_index: u32) -> Option<AcquisitionFrame>;

    fn status(&self) -> SensorStatus;

    fn is_available(&self) -> bool {
        matches!(self.status(), SensorStatus::Ready | SensorStatus::Acquiring)
    }
}
