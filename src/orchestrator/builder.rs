use super::AcquisitionOrchestrator;
use crate::config::PanexamConfig;
use crate::error::{PanexamError, Result};
use crate::ports::{
    DevicePort, FileImageStore, ImageStore, SensorPort, StaticTrajectorySource, TrajectorySource,
};
use crate::reconstruction::{FilterRegistry, ReconstructionPipeline};
use std::sync::Arc;

/// Builder for [`AcquisitionOrchestrator`]
///
/// Device and sensor are required. Trajectories default to the built-in
/// table, images to PNG files, filters to the built-in registry.
pub struct OrchestratorBuilder {
    config: Option<PanexamConfig>,
    device: Option<Arc<dyn DevicePort>>,
    sensor: Option<Arc<dyn SensorPort>>,
    trajectories: Option<Arc<dyn TrajectorySource>>,
    store: Option<Arc<dyn ImageStore>>,
    registry: Option<FilterRegistry>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            device: None,
            sensor: None,
            trajectories: None,
            store: None,
            registry: None,
        }
    }

    pub fn config(mut self, config: PanexamConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn device(mut self, device: Arc<dyn DevicePort>) -> Self {
        self.device = Some(device);
        self
    }

    pub fn sensor(mut self, sensor: Arc<dyn SensorPort>) -> Self {
        self.sensor = Some(sensor);
        self
    }

    pub fn trajectories(mut self, trajectories: Arc<dyn TrajectorySource>) -> Self {
        self.trajectories = Some(trajectories);
        self
    }

    pub fn image_store(mut self, store: Arc<dyn ImageStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn filter_registry(mut self, registry: FilterRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Result<AcquisitionOrchestrator> {
        let config = self.config.unwrap_or_default();
        let device = self
            .device
            .ok_or_else(|| PanexamError::system("A device port must be specified"))?;
        let sensor = self
            .sensor
            .ok_or_else(|| PanexamError::system("A sensor port must be specified"))?;
        let trajectories = self
            .trajectories
            .unwrap_or_else(|| Arc::new(StaticTrajectorySource::with_defaults()));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(FileImageStore::new()));
        let registry = self.registry.unwrap_or_else(FilterRegistry::with_builtins);

        let pipeline = ReconstructionPipeline::from_config(&config.pipeline, &registry)?;

        Ok(AcquisitionOrchestrator::new(
            config,
            device,
            sensor,
            trajectories,
            store,
            pipeline,
        ))
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
