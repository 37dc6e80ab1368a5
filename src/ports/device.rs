use super::Trajectory;
use crate::domain::{DeviceStatus, ExamType};
use crate::error::Result;

/// Capability: positioning and radiation device
///
/// # Contract
/// - `reset` is safe from a disconnected state and succeeds as a no-op there
/// - configuration calls (`set_exam_type`, `set_technical_factors`,
///   `enable_mrt`, `send_trajectory`) are only issued while no acquisition
///   is running; the orchestrator guarantees this
/// - `status` never fails; an unanswered query is reported as
///   [`DeviceStatus::Timeout`] after the implementation's own bound
///
/// # Thread Safety
/// All methods take `&self`; implementations use interior mutability.
pub trait DevicePort: Send + Sync {
    fn name(&self) -> &str;

    fn connect(&self) -> Result<()>;

    fn disconnect(&self) -> Result<()>;

    fn reset(&self) -> Result<()>;

    fn set_exam_type(&self, exam_type: ExamType) -> Result<()>;

    fn set_technical_factors(&self, kv: f32, ma: f32) -> Result<()>;

    fn enable_mrt(&self, enabled: bool) -> Result<()>;

    fn send_trajectory(&self, trajectory: &Trajectory) -> Result<()>;

    fn status(&self) -> DeviceStatus;

    fn is_connected(&self) -> bool {
        matches!(self.status(), DeviceStatus::Ready | DeviceStatus::Busy)
    }
}
