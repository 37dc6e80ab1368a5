mod filters;
mod panoramic;
mod pipeline;

use thiserror::Error;

pub use filters::{FilterRegistry, FlipHorizontal, Identity, ImageFilter, Invert, Normalize};
pub use panoramic::PanoramicImage;
pub use pipeline::ReconstructionPipeline;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconstructionError {
    #[error("No frames to reconstruct")]
    NoFrames,

    #[error("Frame sequence gap: expected index {expected}, found {found}")]
    SequenceGap { expected: u32, found: u32 },

    #[error("Frame {index} is {found:?}, expected {expected:?}")]
    InconsistentDimensions {
        index: u32,
        expected: (u32, u32),
        found: (u32, u32),
    },

    #[error("Frame {index} is not usable")]
    InvalidFrame { index: u32 },

    #[error("Image buffer of {len} pixels does not match {width}x{height}")]
    InvalidImage { width: u32, height: u32, len: usize },

    #[error("Unknown filter: {name}")]
    UnknownFilter { name: String },

    #[error("Filter {name} failed: {message}")]
    Filter { name: String, message: String },
}
