//! Event glue between hardware, the orchestrator and external observers.
//!
//! Two directions are handled here:
//!
//! - sensor → orchestrator: drivers push [`SensorEvent`]s into a bounded
//!   channel through a [`SensorEventSender`]; a [`SensorEventPump`] worker
//!   thread drains it and calls [`AcquisitionOrchestrator::process_sensor_event`].
//! - orchestrator → observers: the orchestrator queues [`Notice`]s while it
//!   holds its state lock and hands them to [`EventDispatcher::deliver`] once
//!   the lock is released. Callbacks therefore run on whichever thread caused
//!   the transition, and may call back into the orchestrator.

use crate::domain::{ExamFailure, ExamId, ExamState, SensorEvent};
use crate::error::{PanexamError, Result};
use crate::orchestrator::AcquisitionOrchestrator;
use crossbeam::channel::{self, RecvTimeoutError, SendTimeoutError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

/// Events published on the exam bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExamEvent {
    StateChanged {
        exam_id: Option<ExamId>,
        from: ExamState,
        to: ExamState,
    },
    Progress {
        exam_id: Option<ExamId>,
        fraction: f32,
    },
    FrameAccepted {
        exam_id: Option<ExamId>,
        index: u32,
    },
    FrameRejected {
        exam_id: Option<ExamId>,
        index: u32,
        reason: String,
    },
    ExamFailed {
        exam_id: Option<ExamId>,
        failure: ExamFailure,
    },
    ExamCompleted {
        exam_id: Option<ExamId>,
        image_path: PathBuf,
    },
    ExamAborted {
        exam_id: Option<ExamId>,
        frames_lost: u32,
    },
}

impl ExamEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            ExamEvent::StateChanged { from, to, .. } => format!("State {} -> {}", from, to),
            ExamEvent::Progress { fraction, .. } => {
                format!("Progress {:.0}%", fraction * 100.0)
            }
            ExamEvent::FrameAccepted { index, .. } => format!("Frame {} accepted", index),
            ExamEvent::FrameRejected { index, reason, .. } => {
                format!("Frame {} rejected: {}", index, reason)
            }
            ExamEvent::ExamFailed { failure, .. } => format!("Exam failed: {}", failure),
            ExamEvent::ExamCompleted { image_path, .. } => {
                format!("Exam completed: {}", image_path.display())
            }
            ExamEvent::ExamAborted { frames_lost, .. } => {
                format!("Exam aborted ({} frames lost)", frames_lost)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            ExamEvent::StateChanged { .. } => "state_changed",
            ExamEvent::Progress { .. } => "progress",
            ExamEvent::FrameAccepted { .. } => "frame_accepted",
            ExamEvent::FrameRejected { .. } => "frame_rejected",
            ExamEvent::ExamFailed { .. } => "exam_failed",
            ExamEvent::ExamCompleted { .. } => "exam_completed",
            ExamEvent::ExamAborted { .. } => "exam_aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExamEvent::ExamFailed { .. }
                | ExamEvent::ExamCompleted { .. }
                | ExamEvent::ExamAborted { .. }
        )
    }
}

/// Something the orchestrator wants observers to see, queued under its lock
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    State(ExamState),
    Progress(f32),
    Event(ExamEvent),
}

pub type StateCallback = Arc<dyn Fn(ExamState) + Send + Sync>;
pub type ProgressCallback = Arc<dyn Fn(f32) + Send + Sync>;

/// Delivers orchestrator notifications to callbacks and to the broadcast bus
pub struct EventDispatcher {
    sender: broadcast::Sender<ExamEvent>,
    state_observers: RwLock<Vec<StateCallback>>,
    progress_observers: RwLock<Vec<ProgressCallback>>,
}

impl EventDispatcher {
    /// Create a new dispatcher with the given bus capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            state_observers: RwLock::new(Vec::new()),
            progress_observers: RwLock::new(Vec::new()),
        }
    }

    pub fn register_state_callback(&self, callback: StateCallback) {
        self.state_observers.write().push(callback);
    }

    pub fn register_progress_callback(&self, callback: ProgressCallback) {
        self.progress_observers.write().push(callback);
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<ExamEvent> {
        self.sender.subscribe()
    }

    /// Subscribe with a filter
    pub fn subscribe_filtered<S: Into<String>>(
        &self,
        filter: EventFilter,
        name: S,
    ) -> EventReceiver {
        EventReceiver::new(self.subscribe(), filter, name.into())
    }

    /// Get the number of active bus subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Deliver queued notices in order. Must not be called with the
    /// orchestrator's state lock held.
    pub fn deliver(&self, notices: Vec<Notice>) {
        if notices.is_empty() {
            return;
        }

        // Snapshot the observer lists so callbacks may register further observers
        let state_observers: Vec<StateCallback> = self.state_observers.read().clone();
        let progress_observers: Vec<ProgressCallback> = self.progress_observers.read().clone();

        for notice in notices {
            match notice {
                Notice::State(state) => {
                    for observer in &state_observers {
                        observer(state);
                    }
                }
                Notice::Progress(fraction) => {
                    for observer in &progress_observers {
                        observer(fraction);
                    }
                }
                Notice::Event(event) => self.publish(event),
            }
        }
    }

    /// Publish an event to all bus subscribers
    pub fn publish(&self, event: ExamEvent) {
        trace!("Publishing event: {}", event.description());

        match &event {
            ExamEvent::ExamFailed { failure, .. } => error!("Exam failed: {}", failure),
            ExamEvent::ExamAborted { frames_lost, .. } => {
                warn!("Exam aborted with {} frames lost", frames_lost)
            }
            ExamEvent::ExamCompleted { image_path, .. } => {
                info!("Exam completed: {}", image_path.display())
            }
            _ => {}
        }

        // No subscribers is not an error for the orchestrator
        if let Err(e) = self.sender.send(event) {
            trace!("No bus subscribers for event: {}", e.0.description());
        }
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
    /// Accept only events of one exam
    Exam(ExamId),
    /// Custom filter function
    Custom(fn(&ExamEvent) -> bool),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &ExamEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Exam(id) => event_exam_id(event) == Some(*id),
            EventFilter::Custom(filter_fn) => filter_fn(event),
        }
    }
}

fn event_exam_id(event: &ExamEvent) -> Option<ExamId> {
    match event {
        ExamEvent::StateChanged { exam_id, .. }
        | ExamEvent::Progress { exam_id, .. }
        | ExamEvent::FrameAccepted { exam_id, .. }
        | ExamEvent::FrameRejected { exam_id, .. }
        | ExamEvent::ExamFailed { exam_id, .. }
        | ExamEvent::ExamCompleted { exam_id, .. }
        | ExamEvent::ExamAborted { exam_id, .. } => *exam_id,
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<ExamEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(
        receiver: broadcast::Receiver<ExamEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next filtered event; lagging skips ahead instead of failing
    pub async fn recv(&mut self) -> Result<ExamEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(PanexamError::system("event bus closed"));
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<ExamEvent>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(PanexamError::system("event bus closed"));
                }
            }
        }
    }
}

/// Create the bounded sensor → orchestrator channel
pub fn sensor_event_channel(
    capacity: usize,
) -> (SensorEventSender, channel::Receiver<SensorEvent>) {
    let (tx, rx) = channel::bounded(capacity.max(1));
    (
        SensorEventSender {
            inner: tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}

/// Handle given to sensor drivers for raising events
#[derive(Clone)]
pub struct SensorEventSender {
    inner: channel::Sender<SensorEvent>,
    dropped: Arc<AtomicU64>,
}

impl SensorEventSender {
    const SEND_TIMEOUT: Duration = Duration::from_millis(250);

    /// Queue an event, waiting a bounded time for space; returns false when
    /// the event could not be queued
    pub fn send(&self, event: SensorEvent) -> bool {
        match self.inner.send_timeout(event, Self::SEND_TIMEOUT) {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Sensor event queue full, event dropped");
                false
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                debug!("Sensor event queue closed, event dropped");
                false
            }
        }
    }

    /// Events that could not be queued
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Worker thread that feeds queued sensor events into the orchestrator
pub struct SensorEventPump {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<u64>>,
}

impl SensorEventPump {
    const POLL_INTERVAL: Duration = Duration::from_millis(50);

    pub fn spawn(
        receiver: channel::Receiver<SensorEvent>,
        orchestrator: Arc<AcquisitionOrchestrator>,
    ) -> Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&shutdown);

        let handle = std::thread::Builder::new()
            .name("sensor-event-pump".to_string())
            .spawn(move || {
                let mut handled = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    match receiver.recv_timeout(Self::POLL_INTERVAL) {
                        Ok(event) => {
                            orchestrator.process_sensor_event(event);
                            handled += 1;
                        }
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => {
                            debug!("All sensor event senders dropped");
                            break;
                        }
                    }
                }
                debug!("Sensor event pump stopped after {} events", handled);
                handled
            })?;

        info!("Sensor event pump started");
        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Stop the worker and return how many events it delivered
    pub fn shutdown(mut self) -> u64 {
        self.stop()
    }

    fn stop(&mut self) -> u64 {
        self.shutdown.store(true, Ordering::Relaxed);
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_else(|_| {
                error!("Sensor event pump panicked");
                0
            }),
            None => 0,
        }
    }
}

impl Drop for SensorEventPump {
    fn drop(&mut self) {
        self.stop();
    }
}
