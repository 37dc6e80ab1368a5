use crate::domain::{ExamType, PatientSize, TechnicalFactors};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PanexamConfig {
    pub device: DeviceConfig,
    pub sensor: SensorConfig,
    pub factors: FactorConfig,
    pub pipeline: PipelineConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DeviceConfig {
    /// Lowest tube voltage accepted (kV)
    #[serde(default = "default_kv_min")]
    pub kv_min: f32,

    /// Highest tube voltage accepted (kV)
    #[serde(default = "default_kv_max")]
    pub kv_max: f32,

    /// Lowest tube current accepted (mA)
    #[serde(default = "default_ma_min")]
    pub ma_min: f32,

    /// Highest tube current accepted (mA)
    #[serde(default = "default_ma_max")]
    pub ma_max: f32,

    /// Upper bound for a status query before it reports a timeout
    #[serde(default = "default_status_timeout_ms")]
    pub status_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SensorConfig {
    /// Width of one frame strip in pixels
    #[serde(default = "default_frame_width")]
    pub frame_width: u32,

    /// Height of one frame strip in pixels
    #[serde(default = "default_frame_height")]
    pub frame_height: u32,

    /// Frames per sweep, by exam program
    #[serde(default = "default_frames_standard")]
    pub frames_standard: u32,
    #[serde(default = "default_frames_child")]
    pub frames_child: u32,
    #[serde(default = "default_frames_bitewing")]
    pub frames_bitewing: u32,
    #[serde(default = "default_frames_tmj")]
    pub frames_tmj: u32,

    /// Delay between simulated frame completions
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
}

/// Recommended technical factors per patient size
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FactorConfig {
    #[serde(default = "default_child_kv")]
    pub child_kv: f32,
    #[serde(default = "default_child_ma")]
    pub child_ma: f32,
    #[serde(default = "default_small_kv")]
    pub small_kv: f32,
    #[serde(default = "default_small_ma")]
    pub small_ma: f32,
    #[serde(default = "default_medium_kv")]
    pub medium_kv: f32,
    #[serde(default = "default_medium_ma")]
    pub medium_ma: f32,
    #[serde(default = "default_large_kv")]
    pub large_kv: f32,
    #[serde(default = "default_large_ma")]
    pub large_ma: f32,

    /// Whether recommendations enable modulated radiation
    #[serde(default = "default_mrt_default")]
    pub mrt_default: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PipelineConfig {
    /// Post-processing filters, applied in this order
    #[serde(default = "default_filters")]
    pub filters: Vec<String>,

    /// Directory receiving processed images
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Also persist the unfiltered reconstruction
    #[serde(default = "default_keep_raw")]
    pub keep_raw: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Exam event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Bounded queue between sensor drivers and the orchestrator
    #[serde(default = "default_sensor_queue_capacity")]
    pub sensor_queue_capacity: usize,
}

impl SensorConfig {
    pub fn frames_for(&self, exam_type: ExamType) -> u32 {
        match exam_type {
            ExamType::PanStandard => self.frames_standard,
            ExamType::PanChild => self.frames_child,
            ExamType::Bitewing => self.frames_bitewing,
            ExamType::Tmj => self.frames_tmj,
        }
    }
}

impl DeviceConfig {
    pub fn kv_in_range(&self, kv: f32) -> bool {
        kv.is_finite() && kv >= self.kv_min && kv <= self.kv_max
    }

    pub fn ma_in_range(&self, ma: f32) -> bool {
        ma.is_finite() && ma >= self.ma_min && ma <= self.ma_max
    }
}

impl FactorConfig {
    pub fn recommended(&self, size: PatientSize) -> TechnicalFactors {
        let (kv, ma) = match size {
            PatientSize::Child => (self.child_kv, self.child_ma),
            PatientSize::Small => (self.small_kv, self.small_ma),
            PatientSize::Medium => (self.medium_kv, self.medium_ma),
            PatientSize::Large => (self.large_kv, self.large_ma),
        };
        TechnicalFactors::new(kv, ma, self.mrt_default)
    }
}

impl PanexamConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("panexam.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("device.kv_min", default_kv_min() as f64)?
            .set_default("device.kv_max", default_kv_max() as f64)?
            .set_default("device.ma_min", default_ma_min() as f64)?
            .set_default("device.ma_max", default_ma_max() as f64)?
            .set_default("device.status_timeout_ms", default_status_timeout_ms() as i64)?
            .set_default("sensor.frame_width", default_frame_width())?
            .set_default("sensor.frame_height", default_frame_height())?
            .set_default("sensor.frames_standard", default_frames_standard())?
            .set_default("sensor.frames_child", default_frames_child())?
            .set_default("sensor.frames_bitewing", default_frames_bitewing())?
            .set_default("sensor.frames_tmj", default_frames_tmj())?
            .set_default("sensor.frame_interval_ms", default_frame_interval_ms() as i64)?
            .set_default("factors.child_kv", default_child_kv() as f64)?
            .set_default("factors.child_ma", default_child_ma() as f64)?
            .set_default("factors.small_kv", default_small_kv() as f64)?
            .set_default("factors.small_ma", default_small_ma() as f64)?
            .set_default("factors.medium_kv", default_medium_kv() as f64)?
            .set_default("factors.medium_ma", default_medium_ma() as f64)?
            .set_default("factors.large_kv", default_large_kv() as f64)?
            .set_default("factors.large_ma", default_large_ma() as f64)?
            .set_default("factors.mrt_default", default_mrt_default())?
            .set_default("pipeline.filters", default_filters())?
            .set_default("pipeline.output_dir", default_output_dir())?
            .set_default("pipeline.keep_raw", default_keep_raw())?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .set_default(
                "system.sensor_queue_capacity",
                default_sensor_queue_capacity() as i64,
            )?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables, e.g. PANEXAM_DEVICE__KV_MAX=85
            .add_source(
                Environment::with_prefix("PANEXAM")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: PanexamConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.device.kv_min > 0.0 && self.device.kv_min < self.device.kv_max) {
            return Err(ConfigError::Message(
                "Device kv range must be positive and kv_min < kv_max".to_string(),
            ));
        }

        if !(self.device.ma_min > 0.0 && self.device.ma_min < self.device.ma_max) {
            return Err(ConfigError::Message(
                "Device ma range must be positive and ma_min < ma_max".to_string(),
            ));
        }

        if self.sensor.frame_width == 0 || self.sensor.frame_height == 0 {
            return Err(ConfigError::Message(
                "Sensor frame geometry must be greater than 0".to_string(),
            ));
        }

        for exam_type in [
            ExamType::PanStandard,
            ExamType::PanChild,
            ExamType::Bitewing,
            ExamType::Tmj,
        ] {
            if self.sensor.frames_for(exam_type) == 0 {
                return Err(ConfigError::Message(format!(
                    "Frames per sweep for {} must be greater than 0",
                    exam_type
                )));
            }
        }

        for size in [
            PatientSize::Child,
            PatientSize::Small,
            PatientSize::Medium,
            PatientSize::Large,
        ] {
            let factors = self.factors.recommended(size);
            if !self.device.kv_in_range(factors.kv) || !self.device.ma_in_range(factors.ma) {
                return Err(ConfigError::Message(format!(
                    "Recommended factors for {} patients ({} kV, {} mA) are outside the device range",
                    size, factors.kv, factors.ma
                )));
            }
        }

        if self.pipeline.output_dir.trim().is_empty() {
            return Err(ConfigError::Message(
                "Pipeline output_dir must not be empty".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        if self.system.sensor_queue_capacity == 0 {
            return Err(ConfigError::Message(
                "Sensor queue capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for PanexamConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig {
                kv_min: default_kv_min(),
                kv_max: default_kv_max(),
                ma_min: default_ma_min(),
                ma_max: default_ma_max(),
                status_timeout_ms: default_status_timeout_ms(),
            },
            sensor: SensorConfig {
                frame_width: default_frame_width(),
                frame_height: default_frame_height(),
                frames_standard: default_frames_standard(),
                frames_child: default_frames_child(),
                frames_bitewing: default_frames_bitewing(),
                frames_tmj: default_frames_tmj(),
                frame_interval_ms: default_frame_interval_ms(),
            },
            factors: FactorConfig {
                child_kv: default_child_kv(),
                child_ma: default_child_ma(),
                small_kv: default_small_kv(),
                small_ma: default_small_ma(),
                medium_kv: default_medium_kv(),
                medium_ma: default_medium_ma(),
                large_kv: default_large_kv(),
                large_ma: default_large_ma(),
                mrt_default: default_mrt_default(),
            },
            pipeline: PipelineConfig {
                filters: default_filters(),
                output_dir: default_output_dir(),
                keep_raw: default_keep_raw(),
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
                sensor_queue_capacity: default_sensor_queue_capacity(),
            },
        }
    }
}

// Default value functions
fn default_kv_min() -> f32 {
    60.0
}
fn default_kv_max() -> f32 {
    90.0
}
fn default_ma_min() -> f32 {
    2.0
}
fn default_ma_max() -> f32 {
    16.0
}
fn default_status_timeout_ms() -> u64 {
    500
}

fn default_frame_width() -> u32 {
    24
}
fn default_frame_height() -> u32 {
    256
}
fn default_frames_standard() -> u32 {
    64
}
fn default_frames_child() -> u32 {
    48
}
fn default_frames_bitewing() -> u32 {
    32
}
fn default_frames_tmj() -> u32 {
    40
}
fn default_frame_interval_ms() -> u64 {
    20
}

fn default_child_kv() -> f32 {
    64.0
}
fn default_child_ma() -> f32 {
    5.0
}
fn default_small_kv() -> f32 {
    66.0
}
fn default_small_ma() -> f32 {
    7.0
}
fn default_medium_kv() -> f32 {
    70.0
}
fn default_medium_ma() -> f32 {
    8.0
}
fn default_large_kv() -> f32 {
    74.0
}
fn default_large_ma() -> f32 {
    10.0
}
fn default_mrt_default() -> bool {
    false
}

fn default_filters() -> Vec<String> {
    vec!["normalize".to_string()]
}
fn default_output_dir() -> String {
    "./images".to_string()
}
fn default_keep_raw() -> bool {
    false
}

fn default_event_bus_capacity() -> usize {
    256
}
fn default_sensor_queue_capacity() -> usize {
    64
}
