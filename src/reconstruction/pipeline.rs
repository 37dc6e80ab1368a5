use super::{FilterRegistry, ImageFilter, PanoramicImage, ReconstructionError};
use crate::config::PipelineConfig;
use crate::frame::AcquisitionFrame;
use std::sync::Arc;
use tracing::{debug, info};

/// Stitches a frame sweep into one panoramic image and runs the filter chain
pub struct ReconstructionPipeline {
    filters: Vec<Arc<dyn ImageFilter>>,
}

impl ReconstructionPipeline {
    pub fn new(filters: Vec<Arc<dyn ImageFilter>>) -> Self {
        Self { filters }
    }

    /// Build the configured filter chain from a registry
    pub fn from_config(
        config: &PipelineConfig,
        registry: &FilterRegistry,
    ) -> Result<Self, ReconstructionError> {
        let filters = registry.resolve(&config.filters)?;
        info!(
            "Reconstruction pipeline configured with filters: [{}]",
            config.filters.join(", ")
        );
        Ok(Self::new(filters))
    }

    pub fn filter_names(&self) -> Vec<String> {
        self.filters.iter().map(|f| f.name().to_string()).collect()
    }

    /// Stitching plus one stage per filter
    pub fn stage_count(&self) -> usize {
        1 + self.filters.len()
    }

    /// Stitch frames left to right in sequence-index order.
    ///
    /// The sweep must start at index 0 with no gaps, every frame must be
    /// usable, and all frames must share the same strip geometry.
    pub fn reconstruct(
        &self,
        frames: &[AcquisitionFrame],
    ) -> Result<PanoramicImage, ReconstructionError> {
        let first = frames.first().ok_or(ReconstructionError::NoFrames)?;

        let mut ordered: Vec<&AcquisitionFrame> = frames.iter().collect();
        ordered.sort_by_key(|f| f.sequence_index);

        let (strip_width, height) = (first.width, first.height);
        for (expected, frame) in ordered.iter().enumerate() {
            let expected = expected as u32;
            if frame.sequence_index != expected {
                return Err(ReconstructionError::SequenceGap {
                    expected,
                    found: frame.sequence_index,
                });
            }
            if frame.width != strip_width || frame.height != height {
                return Err(ReconstructionError::InconsistentDimensions {
                    index: frame.sequence_index,
                    expected: (strip_width, height),
                    found: (frame.width, frame.height),
                });
            }
            if !frame.is_usable() {
                return Err(ReconstructionError::InvalidFrame {
                    index: frame.sequence_index,
                });
            }
        }

        let strip = strip_width as usize;
        let width = strip * ordered.len();
        let mut pixels = vec![0u16; width * height as usize];

        for (column, frame) in ordered.iter().enumerate() {
            for (y, src) in frame.pixels.chunks_exact(strip).enumerate() {
                let start = y * width + column * strip;
                pixels[start..start + strip].copy_from_slice(src);
            }
        }

        debug!(
            "Stitched {} frames into {}x{} panoramic image",
            ordered.len(),
            width,
            height
        );

        PanoramicImage::new(width as u32, height, pixels)
    }

    /// Apply `filters` to `image` strictly in the given order.
    ///
    /// `on_stage` is called after each filter with the number of filters
    /// applied so far.
    pub fn apply_filters<F>(
        image: PanoramicImage,
        filters: &[Arc<dyn ImageFilter>],
        mut on_stage: F,
    ) -> Result<PanoramicImage, ReconstructionError>
    where
        F: FnMut(usize),
    {
        let mut image = image;
        for (done, filter) in filters.iter().enumerate() {
            debug!("Applying filter '{}'", filter.name());
            image = filter.apply(image)?;
            on_stage(done + 1);
        }
        Ok(image)
    }

    /// Run the configured filter chain
    pub fn post_process<F>(
        &self,
        image: PanoramicImage,
        on_stage: F,
    ) -> Result<PanoramicImage, ReconstructionError>
    where
        F: FnMut(usize),
    {
        Self::apply_filters(image, &self.filters, on_stage)
    }
}
