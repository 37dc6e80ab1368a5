use crate::domain::ExamType;
use crate::error::{PanexamError, Result};
use std::collections::HashMap;
use tracing::debug;

/// Sweep path for one exam program; the payload is opaque to this crate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trajectory {
    pub exam_type: ExamType,
    pub payload: Vec<u8>,
}

/// Source of trajectory data, keyed by exam program
pub trait TrajectorySource: Send + Sync {
    fn load_trajectory(&self, exam_type: ExamType) -> Result<Trajectory>;
}

/// In-memory trajectory table
#[derive(Debug, Default)]
pub struct StaticTrajectorySource {
    trajectories: HashMap<ExamType, Vec<u8>>,
}

impl StaticTrajectorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with a synthetic trajectory for every exam program
    pub fn with_defaults() -> Self {
        let mut source = Self::new();
        for (exam_type, steps) in [
            (ExamType::PanStandard, 180u16),
            (ExamType::PanChild, 150),
            (ExamType::Bitewing, 90),
            (ExamType::Tmj, 120),
        ] {
            let payload = (0..steps).flat_map(|step| step.to_le_bytes()).collect();
            source.insert(exam_type, payload);
        }
        source
    }

    pub fn insert(&mut self, exam_type: ExamType, payload: Vec<u8>) {
        self.trajectories.insert(exam_type, payload);
    }

    pub fn remove(&mut self, exam_type: ExamType) {
        self.trajectories.remove(&exam_type);
    }
}

impl TrajectorySource for StaticTrajectorySource {
    fn load_trajectory(&self, exam_type: ExamType) -> Result<Trajectory> {
        let payload = self.trajectories.get(&exam_type).ok_or_else(|| {
            PanexamError::port("trajectory", format!("no trajectory for {}", exam_type))
        })?;
        debug!(
            "Loaded {} trajectory ({} bytes)",
            exam_type,
            payload.len()
        );
        Ok(Trajectory {
            exam_type,
            payload: payload.clone(),
        })
    }
}
