use super::ReconstructionError;

/// Stitched 16-bit grayscale panoramic image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanoramicImage {
    width: u32,
    height: u32,
    pixels: Vec<u16>,
}

impl PanoramicImage {
    pub fn new(width: u32, height: u32, pixels: Vec<u16>) -> Result<Self, ReconstructionError> {
        let expected = width as usize * height as usize;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(ReconstructionError::InvalidImage {
                width,
                height,
                len: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u16] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u16] {
        &mut self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> u16 {
        self.pixels[y as usize * self.width as usize + x as usize]
    }

    pub fn row(&self, y: u32) -> &[u16] {
        let start = y as usize * self.width as usize;
        &self.pixels[start..start + self.width as usize]
    }

    /// Smallest and largest pixel value
    pub fn value_range(&self) -> (u16, u16) {
        self.pixels
            .iter()
            .fold((u16::MAX, u16::MIN), |(lo, hi), &p| (lo.min(p), hi.max(p)))
    }
}
