use super::AcquisitionOrchestrator;
use crate::domain::{
    DeviceStatus, ErrorType, ExamSpecification, ExamState, PatientSize, SensorStatus,
    TechnicalFactors, ValidationResult,
};
use crate::error::PanexamError;
use crate::events::ExamEvent;
use crate::ports::AcquisitionParameters;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A preparation step that failed, classified for `handle_error`
struct StepFailure {
    kind: ErrorType,
    message: String,
}

impl StepFailure {
    fn new<S: Into<String>>(kind: ErrorType, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    fn from_port(kind: ErrorType, context: &str, error: PanexamError) -> Self {
        Self::new(kind, format!("{}: {}", context, error))
    }
}

impl AcquisitionOrchestrator {
    /// Check that an exam for `patient_size` could be prepared right now.
    ///
    /// Pure query: callable from any state, mutates nothing.
    pub fn validate_prerequisites(&self, patient_size: PatientSize) -> ValidationResult {
        match self.device.status() {
            DeviceStatus::Timeout => {
                return ValidationResult::invalid("Device did not answer the status query")
            }
            DeviceStatus::Fault { code } => {
                return ValidationResult::invalid(format!("Device reports fault {}", code))
            }
            DeviceStatus::Busy => return ValidationResult::invalid("Device is busy"),
            DeviceStatus::Disconnected | DeviceStatus::Ready => {}
        }

        match self.sensor.status() {
            SensorStatus::Timeout => {
                return ValidationResult::invalid("Sensor did not answer the status query")
            }
            SensorStatus::Fault { code } => {
                return ValidationResult::invalid(format!("Sensor reports fault {}", code))
            }
            SensorStatus::Acquiring => return ValidationResult::invalid("Sensor is acquiring"),
            SensorStatus::Disconnected | SensorStatus::Ready => {}
        }

        let factors = self.config.factors.recommended(patient_size);
        if let Err(message) = self.check_factor_range(factors.kv, factors.ma) {
            return ValidationResult::invalid(format!(
                "No usable factors for {} patients: {}",
                patient_size, message
            ));
        }

        ValidationResult::ok()
    }

    /// Accept `specification` for a new run and bring the hardware to Ready.
    ///
    /// Only accepted from Idle or a terminal state. Any failure after
    /// acceptance ends the run in Failed through `handle_error`.
    pub fn prepare_exam(&self, specification: ExamSpecification) -> bool {
        let mut run = self.run.lock();
        if !run.state.accepts_new_exam() {
            warn!(
                "prepare_exam rejected: exam {} is still {}",
                run.exam_label(),
                run.state
            );
            return false;
        }

        let exam_id = run.begin(specification.clone());
        run.transition(ExamState::Preparing);
        info!(
            "Preparing exam {} ({} for {} patient)",
            exam_id.short(),
            specification.exam_type,
            specification.patient_size
        );

        let prepared = match self.prepare_hardware(&specification) {
            Ok(()) => {
                run.factors = Some(specification.factors);
                run.transition(ExamState::Ready)
            }
            Err(step) => {
                self.fail_locked(&mut run, step.kind, &step.message, 0);
                false
            }
        };

        self.finish(run);
        prepared
    }

    /// Change the factors of the prepared run. Out-of-range values are
    /// rejected without touching the run.
    pub fn configure_technical_factors(&self, kv: f32, ma: f32, enable_mrt: bool) -> bool {
        let mut run = self.run.lock();
        if !matches!(run.state, ExamState::Preparing | ExamState::Ready) {
            warn!(
                "configure_technical_factors rejected in state {}",
                run.state
            );
            return false;
        }

        if let Err(message) = self.check_factor_range(kv, ma) {
            warn!("configure_technical_factors rejected: {}", message);
            return false;
        }

        let applied = self
            .device
            .set_technical_factors(kv, ma)
            .and_then(|_| self.device.enable_mrt(enable_mrt));

        let configured = match applied {
            Ok(()) => {
                run.factors = Some(TechnicalFactors::new(kv, ma, enable_mrt));
                debug!(
                    "Factors set to {} kV / {} mA (MRT {})",
                    kv,
                    ma,
                    if enable_mrt { "on" } else { "off" }
                );
                true
            }
            Err(e) => {
                let message = format!("Device refused technical factors: {}", e);
                self.fail_locked(&mut run, ErrorType::ConfigurationError, &message, 0);
                false
            }
        };

        self.finish(run);
        configured
    }

    /// Start the sweep of the prepared run. Stays in Ready when the sensor
    /// rejects the start.
    pub fn start_acquisition(&self) -> bool {
        let mut run = self.run.lock();
        if run.state != ExamState::Ready {
            warn!("start_acquisition rejected in state {}", run.state);
            return false;
        }

        let (Some(exam_id), Some(specification)) = (run.exam_id, run.specification.clone()) else {
            warn!("start_acquisition rejected: no prepared exam");
            return false;
        };

        let frames_expected = self.config.sensor.frames_for(specification.exam_type);
        if frames_expected == 0 {
            let message = format!("No frames configured for {}", specification.exam_type);
            self.fail_locked(&mut run, ErrorType::ConfigurationError, &message, 0);
            self.finish(run);
            return false;
        }

        let params = AcquisitionParameters {
            exam_id,
            exam_type: specification.exam_type,
            frame_count: frames_expected,
            frame_width: self.config.sensor.frame_width,
            frame_height: self.config.sensor.frame_height,
            frame_interval: Duration::from_millis(self.config.sensor.frame_interval_ms),
        };

        if let Err(e) = self.sensor.start_acquisition(&params) {
            warn!("Sensor rejected acquisition start: {}", e);
            return false;
        }

        run.accumulator.reset(frames_expected);
        run.transition(ExamState::Acquiring);
        run.progress(0.0);
        info!(
            "Acquisition started for exam {}: {} frames expected",
            exam_id.short(),
            frames_expected
        );

        self.finish(run);
        true
    }

    /// Cancel the run. Idempotent once the run has ended; rejected while
    /// the pipeline owns the run.
    pub fn abort_acquisition(&self) -> bool {
        let mut run = self.run.lock();
        match run.state {
            state if state.is_terminal() => {
                debug!("abort_acquisition ignored: run already {}", state);
                return true;
            }
            ExamState::Preparing | ExamState::Ready | ExamState::Acquiring => {}
            state => {
                warn!("abort_acquisition rejected in state {}", state);
                return false;
            }
        }

        if run.state == ExamState::Acquiring {
            if let Err(e) = self.sensor.stop_acquisition() {
                warn!("Sensor stop during abort did not succeed: {}", e);
            }
        }
        if let Err(e) = self.device.reset() {
            warn!("Device reset during abort did not succeed: {}", e);
        }

        let frames_lost = run.accumulator.finalize();
        run.transition(ExamState::Aborted);
        let exam_id = run.exam_id;
        run.event(ExamEvent::ExamAborted {
            exam_id,
            frames_lost,
        });

        self.finish(run);
        true
    }

    /// Report a failure from outside the event path. Returns false when the
    /// run had already ended, in which case nothing is notified.
    pub fn handle_error(&self, kind: ErrorType, message: &str, error_code: i32) -> bool {
        let mut run = self.run.lock();
        let failed = self.fail_locked(&mut run, kind, message, error_code);
        if failed {
            run.last_error_code = Some(error_code);
            run.last_error = Some(message.to_string());
        }
        self.finish(run);
        failed
    }

    fn check_factor_range(&self, kv: f32, ma: f32) -> Result<(), String> {
        let device = &self.config.device;
        if !device.kv_in_range(kv) {
            return Err(format!(
                "kv {} outside [{}, {}]",
                kv, device.kv_min, device.kv_max
            ));
        }
        if !device.ma_in_range(ma) {
            return Err(format!(
                "ma {} outside [{}, {}]",
                ma, device.ma_min, device.ma_max
            ));
        }
        Ok(())
    }

    fn validate_configuration(&self, specification: &ExamSpecification) -> Result<(), StepFailure> {
        let factors = &specification.factors;
        self.check_factor_range(factors.kv, factors.ma)
            .map_err(|message| StepFailure::new(ErrorType::ConfigurationError, message))?;

        if self.config.sensor.frames_for(specification.exam_type) == 0 {
            return Err(StepFailure::new(
                ErrorType::ConfigurationError,
                format!("No frames configured for {}", specification.exam_type),
            ));
        }
        Ok(())
    }

    fn prepare_trajectory(&self, specification: &ExamSpecification) -> Result<(), StepFailure> {
        let trajectory = self
            .trajectories
            .load_trajectory(specification.exam_type)
            .map_err(|e| {
                StepFailure::from_port(ErrorType::TrajectoryError, "Trajectory load failed", e)
            })?;

        self.device
            .send_trajectory(&trajectory)
            .map_err(|e| {
                StepFailure::from_port(ErrorType::TrajectoryError, "Trajectory send failed", e)
            })
    }

    /// Validate, connect and arm; runs with the run lock held
    fn prepare_hardware(&self, specification: &ExamSpecification) -> Result<(), StepFailure> {
        self.validate_configuration(specification)?;

        self.device
            .connect()
            .map_err(|e| {
                StepFailure::from_port(ErrorType::DeviceUnavailable, "Device connect failed", e)
            })?;
        self.sensor
            .connect()
            .map_err(|e| {
                StepFailure::from_port(ErrorType::SensorUnavailable, "Sensor connect failed", e)
            })?;
        if !self.sensor.is_available() {
            return Err(StepFailure::new(
                ErrorType::SensorUnavailable,
                format!("Sensor reports {:?}", self.sensor.status()),
            ));
        }

        let factors = &specification.factors;
        self.device
            .set_exam_type(specification.exam_type)
            .and_then(|_| self.device.set_technical_factors(factors.kv, factors.ma))
            .and_then(|_| self.device.enable_mrt(factors.mrt_enabled))
            .map_err(|e| {
                StepFailure::from_port(
                    ErrorType::ConfigurationError,
                    "Device configuration failed",
                    e,
                )
            })?;

        self.prepare_trajectory(specification)
    }
}
