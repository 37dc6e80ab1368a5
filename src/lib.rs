pub mod accumulator;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod frame;
pub mod orchestrator;
pub mod ports;
pub mod reconstruction;

pub use accumulator::{AccumulatorStats, FrameAccumulator, FrameAdmission};
pub use config::PanexamConfig;
pub use domain::{
    DeviceStatus, ErrorType, ExamFailure, ExamId, ExamResult, ExamSpecification, ExamState,
    ExamType, PatientSize, SensorDiagnosticInfo, SensorEvent, SensorEventKind, SensorStatus,
    TechnicalFactors, ValidationResult,
};
pub use error::{PanexamError, Result};
pub use events::{
    sensor_event_channel, EventDispatcher, EventFilter, EventReceiver, ExamEvent,
    SensorEventPump, SensorEventSender,
};
pub use frame::AcquisitionFrame;
pub use orchestrator::{AcquisitionOrchestrator, OrchestratorBuilder};
pub use ports::{
    AcquisitionParameters, DevicePort, FileImageStore, ImageMetadata, ImageStore,
    MemoryImageStore, SensorPort, SimulatedDevice, SimulatedSensor, StaticTrajectorySource,
    Trajectory, TrajectorySource,
};
pub use reconstruction::{
    FilterRegistry, ImageFilter, PanoramicImage, ReconstructionError, ReconstructionPipeline,
};
