use crate::frame::AcquisitionFrame;
use tracing::{debug, trace, warn};

/// Outcome of offering a frame to the accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAdmission {
    Accepted,
    /// Sequence index at or beyond `frames_expected`
    OutOfRange,
    /// A frame with this index is already stored
    Duplicate,
    /// The frame is flagged invalid or its buffer does not match its geometry
    Invalid,
}

impl FrameAdmission {
    pub fn reason(&self) -> &'static str {
        match self {
            FrameAdmission::Accepted => "accepted",
            FrameAdmission::OutOfRange => "sequence index out of range",
            FrameAdmission::Duplicate => "duplicate sequence index",
            FrameAdmission::Invalid => "invalid frame data",
        }
    }
}

/// Snapshot of accumulator counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccumulatorStats {
    pub frames_expected: u32,
    pub frames_acquired: u32,
    pub frames_lost: u32,
    pub frames_rejected: u32,
    /// Slots whose readout was missing or unusable
    pub frames_unreadable: u32,
}

#[derive(Debug, Clone)]
enum Slot {
    Open,
    /// The sensor reported this index but no usable frame came with it
    Unreadable,
    Filled(AcquisitionFrame),
}

/// Indexed frame store for one exam run.
///
/// Slots are pre-sized to `frames_expected` and keyed by sequence index, so
/// writes outside the sweep or twice to the same slot are refused instead of
/// growing the buffer. Duplicates and out-of-range frames leave the sweep
/// accounting untouched; only a stored frame or an unreadable in-range index
/// settles a slot. The accumulator is not internally synchronised; the
/// orchestrator guards it with the same lock as the exam state.
#[derive(Debug, Default)]
pub struct FrameAccumulator {
    slots: Vec<Slot>,
    frames_expected: u32,
    frames_acquired: u32,
    frames_lost: u32,
    frames_rejected: u32,
    frames_unreadable: u32,
    finalized: bool,
}

impl FrameAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the buffer and size it for a new run
    pub fn reset(&mut self, expected_count: u32) {
        self.slots = vec![Slot::Open; expected_count as usize];
        self.frames_expected = expected_count;
        self.frames_acquired = 0;
        self.frames_lost = 0;
        self.frames_rejected = 0;
        self.frames_unreadable = 0;
        self.finalized = false;
        debug!("Frame accumulator reset for {} frames", expected_count);
    }

    /// Store a frame in its slot; rejected frames leave the buffer untouched
    pub fn add_frame(&mut self, frame: AcquisitionFrame) -> FrameAdmission {
        let index = frame.sequence_index;

        let admission = match self.slots.get(index as usize) {
            None => FrameAdmission::OutOfRange,
            Some(Slot::Filled(_)) => FrameAdmission::Duplicate,
            Some(_) if !frame.is_usable() => FrameAdmission::Invalid,
            Some(_) => FrameAdmission::Accepted,
        };

        match admission {
            FrameAdmission::Accepted => {
                if let Slot::Unreadable = self.slots[index as usize] {
                    self.frames_unreadable -= 1;
                }
                self.slots[index as usize] = Slot::Filled(frame);
                self.frames_acquired += 1;
                trace!(
                    "Stored frame {} ({}/{})",
                    index,
                    self.frames_acquired,
                    self.frames_expected
                );
            }
            rejected => {
                self.frames_rejected += 1;
                warn!("Rejected frame {}: {}", index, rejected.reason());
                // A corrupt readout still settles its index
                if rejected == FrameAdmission::Invalid {
                    self.mark_unreadable(index);
                }
            }
        }

        admission
    }

    /// Count a completion whose frame could not be read out
    pub fn record_missing(&mut self, index: u32) {
        self.frames_rejected += 1;
        warn!("No readout available for frame {}", index);
        self.mark_unreadable(index);
    }

    fn mark_unreadable(&mut self, index: u32) {
        if let Some(Slot::Open) = self.slots.get(index as usize) {
            self.slots[index as usize] = Slot::Unreadable;
            self.frames_unreadable += 1;
        }
    }

    /// Lowest index the sensor has not reported yet; the index implied by a
    /// completion without payload
    pub fn next_index(&self) -> u32 {
        self.slots
            .iter()
            .position(|slot| matches!(slot, Slot::Open))
            .map_or(self.frames_expected, |index| index as u32)
    }

    pub fn is_complete(&self) -> bool {
        self.frames_acquired == self.frames_expected
    }

    /// Every index of the sweep has been reported, stored or not
    pub fn sweep_ended(&self) -> bool {
        self.frames_acquired + self.frames_unreadable >= self.frames_expected
    }

    /// Close the run's accounting and return the number of lost frames
    pub fn finalize(&mut self) -> u32 {
        if !self.finalized {
            self.frames_lost = self.frames_expected.saturating_sub(self.frames_acquired);
            self.finalized = true;
            debug!(
                "Frame accounting finalized: {}/{} acquired, {} lost",
                self.frames_acquired, self.frames_expected, self.frames_lost
            );
        }
        self.frames_lost
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn frames_expected(&self) -> u32 {
        self.frames_expected
    }

    pub fn frames_acquired(&self) -> u32 {
        self.frames_acquired
    }

    /// Zero until `finalize` has run
    pub fn frames_lost(&self) -> u32 {
        self.frames_lost
    }

    pub fn frames_rejected(&self) -> u32 {
        self.frames_rejected
    }

    /// Fraction of the sweep received so far
    pub fn progress(&self) -> f32 {
        if self.frames_expected == 0 {
            return 0.0;
        }
        self.frames_acquired as f32 / self.frames_expected as f32
    }

    /// Stored frames in sequence order; pixel buffers are shared, not copied
    pub fn ordered_frames(&self) -> Vec<AcquisitionFrame> {
        self.slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Filled(frame) => Some(frame.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn stats(&self) -> AccumulatorStats {
        AccumulatorStats {
            frames_expected: self.frames_expected,
            frames_acquired: self.frames_acquired,
            frames_lost: self.frames_lost,
            frames_rejected: self.frames_rejected,
            frames_unreadable: self.frames_unreadable,
        }
    }
}
