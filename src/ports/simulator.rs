//! Simulated device and sensor.
//!
//! Both simulators double as test doubles: every failure mode the
//! orchestrator has to survive can be switched on at runtime.

use super::{AcquisitionParameters, DevicePort, SensorPort, Trajectory};
use crate::config::DeviceConfig;
use crate::domain::{DeviceStatus, ExamType, SensorEvent, SensorStatus};
use crate::error::{PanexamError, Result};
use crate::events::SensorEventSender;
use crate::frame::AcquisitionFrame;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Default, Clone)]
struct DeviceState {
    connected: bool,
    exam_type: Option<ExamType>,
    factors: Option<(f32, f32)>,
    mrt_enabled: bool,
    trajectory: Option<Trajectory>,
    resets: u32,
}

/// Failure switches for [`SimulatedDevice`]
#[derive(Debug, Default, Clone)]
pub struct DeviceFaults {
    /// Status queries time out and connects fail
    pub unreachable: bool,
    pub fail_connect: bool,
    pub reject_trajectory: bool,
    pub reject_factors: bool,
    pub fail_reset: bool,
    /// Time the device takes to answer a status query
    pub status_delay: Option<Duration>,
}

/// Positioning device simulator
pub struct SimulatedDevice {
    status_timeout: Duration,
    state: Mutex<DeviceState>,
    faults: Mutex<DeviceFaults>,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDevice {
    const DEFAULT_STATUS_TIMEOUT: Duration = Duration::from_millis(500);

    pub fn new() -> Self {
        Self::with_status_timeout(Self::DEFAULT_STATUS_TIMEOUT)
    }

    pub fn from_config(config: &DeviceConfig) -> Self {
        Self::with_status_timeout(Duration::from_millis(config.status_timeout_ms))
    }

    /// Status queries slower than `timeout` report [`DeviceStatus::Timeout`]
    pub fn with_status_timeout(timeout: Duration) -> Self {
        Self {
            status_timeout: timeout,
            state: Mutex::new(DeviceState::default()),
            faults: Mutex::new(DeviceFaults::default()),
        }
    }

    pub fn set_faults(&self, faults: DeviceFaults) {
        *self.faults.lock() = faults;
    }

    pub fn update_faults<F: FnOnce(&mut DeviceFaults)>(&self, update: F) {
        update(&mut self.faults.lock());
    }

    pub fn reset_count(&self) -> u32 {
        self.state.lock().resets
    }

    pub fn configured_factors(&self) -> Option<(f32, f32)> {
        self.state.lock().factors
    }

    pub fn mrt_enabled(&self) -> bool {
        self.state.lock().mrt_enabled
    }

    pub fn exam_type(&self) -> Option<ExamType> {
        self.state.lock().exam_type
    }

    pub fn trajectory(&self) -> Option<Trajectory> {
        self.state.lock().trajectory.clone()
    }

    fn require_connected(&self, operation: &str) -> Result<()> {
        if self.state.lock().connected {
            Ok(())
        } else {
            Err(PanexamError::port(
                "device",
                format!("{} requires a connected device", operation),
            ))
        }
    }
}

impl DevicePort for SimulatedDevice {
    fn name(&self) -> &str {
        "simulated-device"
    }

    fn connect(&self) -> Result<()> {
        let faults = self.faults.lock().clone();
        if faults.unreachable || faults.fail_connect {
            return Err(PanexamError::port("device", "connection refused"));
        }
        let mut state = self.state.lock();
        if !state.connected {
            info!("Simulated device connected");
            state.connected = true;
        }
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.connected = false;
        state.trajectory = None;
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        if self.faults.lock().fail_reset {
            return Err(PanexamError::port("device", "reset timed out"));
        }
        let mut state = self.state.lock();
        state.resets += 1;
        if state.connected {
            state.trajectory = None;
            debug!("Simulated device reset");
        }
        Ok(())
    }

    fn set_exam_type(&self, exam_type: ExamType) -> Result<()> {
        self.require_connected("set_exam_type")?;
        self.state.lock().exam_type = Some(exam_type);
        Ok(())
    }

    fn set_technical_factors(&self, kv: f32, ma: f32) -> Result<()> {
        self.require_connected("set_technical_factors")?;
        if self.faults.lock().reject_factors {
            return Err(PanexamError::port("device", "generator refused factors"));
        }
        self.state.lock().factors = Some((kv, ma));
        Ok(())
    }

    fn enable_mrt(&self, enabled: bool) -> Result<()> {
        self.require_connected("enable_mrt")?;
        self.state.lock().mrt_enabled = enabled;
        Ok(())
    }

    fn send_trajectory(&self, trajectory: &Trajectory) -> Result<()> {
        self.require_connected("send_trajectory")?;
        if self.faults.lock().reject_trajectory {
            return Err(PanexamError::port("device", "trajectory checksum mismatch"));
        }
        self.state.lock().trajectory = Some(trajectory.clone());
        Ok(())
    }

    fn status(&self) -> DeviceStatus {
        let faults = self.faults.lock().clone();
        if faults.unreachable {
            return DeviceStatus::Timeout;
        }
        if let Some(delay) = faults.status_delay {
            if delay > self.status_timeout {
                std::thread::sleep(self.status_timeout);
                debug!("Simulated device status query timed out");
                return DeviceStatus::Timeout;
            }
            std::thread::sleep(delay);
        }
        if self.state.lock().connected {
            DeviceStatus::Ready
        } else {
            DeviceStatus::Disconnected
        }
    }
}

#[derive(Debug, Default)]
struct SensorState {
    connected: bool,
    acquiring: bool,
    params: Option<AcquisitionParameters>,
    /// Stop flag of the sweep in flight
    run_stop: Option<Arc<AtomicBool>>,
    starts: u32,
}

/// Failure switches for [`SimulatedSensor`]
#[derive(Debug, Default, Clone)]
pub struct SensorFaults {
    pub unreachable: bool,
    pub fail_connect: bool,
    pub reject_start: bool,
    /// Frames whose readout is lost
    pub drop_frames: HashSet<u32>,
    /// Frames delivered with the validity flag cleared
    pub corrupt_frames: HashSet<u32>,
    /// Raise an error event with this code instead of the given frame
    pub error_at: Option<(u32, i32)>,
}

/// Imaging sensor simulator.
///
/// In autonomous mode each accepted sweep spawns a worker thread that emits
/// one `Completed` event per frame through the event sender. In manual mode
/// nothing is emitted; the caller drives events and the orchestrator pulls
/// frames through [`SensorPort::read_frame`].
pub struct SimulatedSensor {
    events: Option<SensorEventSender>,
    autonomous: bool,
    state: Mutex<SensorState>,
    faults: Mutex<SensorFaults>,
}

impl SimulatedSensor {
    /// Sensor that emits frames on its own
    pub fn autonomous(events: SensorEventSender) -> Self {
        Self {
            events: Some(events),
            autonomous: true,
            state: Mutex::new(SensorState::default()),
            faults: Mutex::new(SensorFaults::default()),
        }
    }

    /// Sensor that only answers readouts
    pub fn manual() -> Self {
        Self {
            events: None,
            autonomous: false,
            state: Mutex::new(SensorState::default()),
            faults: Mutex::new(SensorFaults::default()),
        }
    }

    pub fn set_faults(&self, faults: SensorFaults) {
        *self.faults.lock() = faults;
    }

    pub fn update_faults<F: FnOnce(&mut SensorFaults)>(&self, update: F) {
        update(&mut self.faults.lock());
    }

    pub fn is_acquiring(&self) -> bool {
        self.state.lock().acquiring
    }

    pub fn start_count(&self) -> u32 {
        self.state.lock().starts
    }

    pub fn last_parameters(&self) -> Option<AcquisitionParameters> {
        self.state.lock().params.clone()
    }

    /// Deterministic test pattern: a gradient that varies per strip
    pub fn pattern_frame(index: u32, width: u32, height: u32) -> AcquisitionFrame {
        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                let column = index * width + x;
                let value = (column * 37 + y * 11) % 4096;
                pixels.push((value * 16) as u16);
            }
        }
        AcquisitionFrame::new(index, pixels, width, height)
    }

    fn readout(
        &self,
        index: u32,
        params: &AcquisitionParameters,
        faults: &SensorFaults,
    ) -> Option<AcquisitionFrame> {
        if index >= params.frame_count || faults.drop_frames.contains(&index) {
            return None;
        }
        let frame = Self::pattern_frame(index, params.frame_width, params.frame_height);
        if faults.corrupt_frames.contains(&index) {
            Some(frame.invalidated())
        } else {
            Some(frame)
        }
    }

    fn spawn_sweep(
        &self,
        params: AcquisitionParameters,
        stop: Arc<AtomicBool>,
        events: SensorEventSender,
    ) -> Result<()> {
        let faults = self.faults.lock().clone();
        let exam_id = params.exam_id;

        std::thread::Builder::new()
            .name("simulated-sensor".to_string())
            .spawn(move || {
                for index in 0..params.frame_count {
                    std::thread::sleep(params.frame_interval);
                    if stop.load(Ordering::Relaxed) {
                        debug!("Simulated sweep stopped before frame {}", index);
                        return;
                    }

                    if let Some((at, code)) = faults.error_at {
                        if at == index {
                            warn!("Simulated sensor raising error {} at frame {}", code, index);
                            events.send(SensorEvent::error(code).for_exam(exam_id));
                            return;
                        }
                    }

                    let event = if faults.drop_frames.contains(&index) {
                        SensorEvent::completed()
                    } else {
                        let frame = SimulatedSensor::pattern_frame(
                            index,
                            params.frame_width,
                            params.frame_height,
                        );
                        let frame = if faults.corrupt_frames.contains(&index) {
                            frame.invalidated()
                        } else {
                            frame
                        };
                        SensorEvent::completed_with_frame(frame)
                    };

                    trace!("Simulated sensor completed frame {}", index);
                    if !events.send(event.for_exam(exam_id)) {
                        return;
                    }
                }
                debug!("Simulated sweep finished");
            })?;

        Ok(())
    }
}

impl SensorPort for SimulatedSensor {
    fn name(&self) -> &str {
        "simulated-sensor"
    }

    fn connect(&self) -> Result<()> {
        let faults = self.faults.lock().clone();
        if faults.unreachable || faults.fail_connect {
            return Err(PanexamError::port("sensor", "sensor not detected"));
        }
        let mut state = self.state.lock();
        if !state.connected {
            info!("Simulated sensor connected");
            state.connected = true;
        }
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(stop) = state.run_stop.take() {
            stop.store(true, Ordering::Relaxed);
        }
        state.connected = false;
        state.acquiring = false;
        Ok(())
    }

    fn start_acquisition(&self, params: &AcquisitionParameters) -> Result<()> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(PanexamError::port("sensor", "sensor disconnected"));
        }
        if state.acquiring {
            return Err(PanexamError::port("sensor", "sensor busy"));
        }
        if self.faults.lock().reject_start {
            return Err(PanexamError::port("sensor", "start rejected"));
        }

        let stop = Arc::new(AtomicBool::new(false));
        state.acquiring = true;
        state.params = Some(params.clone());
        state.run_stop = Some(Arc::clone(&stop));
        state.starts += 1;
        drop(state);

        if self.autonomous {
            if let Some(events) = &self.events {
                self.spawn_sweep(params.clone(), stop, events.clone())?;
            }
        }

        debug!(
            "Simulated sensor accepted sweep of {} frames",
            params.frame_count
        );
        Ok(())
    }

    fn stop_acquisition(&self) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(stop) = state.run_stop.take() {
            stop.store(true, Ordering::Relaxed);
        }
        state.acquiring = false;
        Ok(())
    }

    fn read_frame(&self, sequence_index: u32) -> Option<AcquisitionFrame> {
        let params = self.state.lock().params.clone()?;
        let faults = self.faults.lock().clone();
        self.readout(sequence_index, &params, &faults)
    }

    fn status(&self) -> SensorStatus {
        if self.faults.lock().unreachable {
            return SensorStatus::Timeout;
        }
        let state = self.state.lock();
        match (state.connected, state.acquiring) {
            (false, _) => SensorStatus::Disconnected,
            (true, true) => SensorStatus::Acquiring,
            (true, false) => SensorStatus::Ready,
        }
    }
}
