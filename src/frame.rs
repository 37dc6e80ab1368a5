use chrono::{DateTime, Utc};
use std::sync::Arc;

/// One raw sensor readout contributing a vertical strip to the panoramic image
#[derive(Debug, Clone)]
pub struct AcquisitionFrame {
    /// Position of the frame within the sweep, starting at 0
    pub sequence_index: u32,
    /// Capture time reported by the sensor
    pub timestamp: DateTime<Utc>,
    /// 16-bit grayscale pixels, row-major (shared ownership for efficiency)
    pub pixels: Arc<Vec<u16>>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Cleared by the sensor when the readout is known to be corrupt
    pub valid: bool,
}

impl AcquisitionFrame {
    /// Create a new frame instance
    pub fn new(sequence_index: u32, pixels: Vec<u16>, width: u32, height: u32) -> Self {
        Self {
            sequence_index,
            timestamp: Utc::now(),
            pixels: Arc::new(pixels),
            width,
            height,
            valid: true,
        }
    }

    /// Frame filled with a single value; used by simulators
    pub fn uniform(sequence_index: u32, width: u32, height: u32, value: u16) -> Self {
        Self::new(
            sequence_index,
            vec![value; width as usize * height as usize],
            width,
            height,
        )
    }

    pub fn invalidated(mut self) -> Self {
        self.valid = false;
        self
    }

    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Validate pixel buffer length against the declared geometry
    pub fn validate_size(&self) -> bool {
        self.width > 0 && self.height > 0 && self.pixels.len() == self.expected_len()
    }

    /// Frame is usable for reconstruction
    pub fn is_usable(&self) -> bool {
        self.valid && self.validate_size()
    }

    pub fn pixel(&self, x: u32, y: u32) -> u16 {
        self.pixels[y as usize * self.width as usize + x as usize]
    }
}
