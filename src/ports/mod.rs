//! Capability ports between the orchestrator and its collaborators.
//!
//! Every port is an object-safe `Send + Sync` trait taking `&self`, so one
//! instance can be shared between the caller thread, the sensor event pump
//! and the simulator workers.

mod device;
mod sensor;
mod simulator;
mod storage;
mod trajectory;


pub use device::DevicePort;
pub use sensor::{AcquisitionParameters, SensorPort};
pub use simulator::{DeviceFaults, SensorFaults, SimulatedDevice, SimulatedSensor};
pub use storage::{FileImageStore, ImageMetadata, ImageStore, MemoryImageStore};
pub use trajectory::{StaticTrajectorySource, Trajectory, TrajectorySource};
