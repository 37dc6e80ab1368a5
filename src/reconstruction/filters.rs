use super::{PanoramicImage, ReconstructionError};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Opaque post-processing transform
///
/// Filters are applied by the pipeline in the configured order. They own no
/// state the orchestrator depends on and may fail, which ends the run with a
/// post-processing failure.
pub trait ImageFilter: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, image: PanoramicImage) -> Result<PanoramicImage, ReconstructionError>;
}

impl fmt::Debug for dyn ImageFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageFilter({})", self.name())
    }
}

pub struct Identity;

impl ImageFilter for Identity {
    fn name(&self) -> &str {
        "identity"
    }

    fn apply(&self, image: PanoramicImage) -> Result<PanoramicImage, ReconstructionError> {
        Ok(image)
    }
}

/// Swap dark and bright (film-style rendering)
pub struct Invert;

impl ImageFilter for Invert {
    fn name(&self) -> &str {
        "invert"
    }

    fn apply(&self, mut image: PanoramicImage) -> Result<PanoramicImage, ReconstructionError> {
        for p in image.pixels_mut() {
            *p = u16::MAX - *p;
        }
        Ok(image)
    }
}

/// Linear contrast stretch onto the full 16-bit range
pub struct Normalize;

impl ImageFilter for Normalize {
    fn name(&self) -> &str {
        "normalize"
    }

    fn apply(&self, mut image: PanoramicImage) -> Result<PanoramicImage, ReconstructionError> {
        let (lo, hi) = image.value_range();
        if hi <= lo {
            return Ok(image);
        }
        let span = (hi - lo) as u32;
        for p in image.pixels_mut() {
            *p = ((*p - lo) as u32 * u16::MAX as u32 / span) as u16;
        }
        Ok(image)
    }
}

/// Mirror left/right, for devices sweeping in the opposite direction
pub struct FlipHorizontal;

impl ImageFilter for FlipHorizontal {
    fn name(&self) -> &str {
        "flip_horizontal"
    }

    fn apply(&self, mut image: PanoramicImage) -> Result<PanoramicImage, ReconstructionError> {
        let width = image.width() as usize;
        for row in image.pixels_mut().chunks_mut(width) {
            row.reverse();
        }
        Ok(image)
    }
}

/// Name-to-filter lookup used to turn configured names into a filter chain
#[derive(Default)]
pub struct FilterRegistry {
    filters: HashMap<String, Arc<dyn ImageFilter>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in filters
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(Identity));
        registry.register(Arc::new(Invert));
        registry.register(Arc::new(Normalize));
        registry.register(Arc::new(FlipHorizontal));
        registry
    }

    /// Add or replace a filter under its own name
    pub fn register(&mut self, filter: Arc<dyn ImageFilter>) {
        debug!("Registering image filter '{}'", filter.name());
        self.filters.insert(filter.name().to_string(), filter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ImageFilter>> {
        self.filters.get(name).cloned()
    }

    /// Resolve names in order, failing on the first unknown one
    pub fn resolve<S: AsRef<str>>(
        &self,
        names: &[S],
    ) -> Result<Vec<Arc<dyn ImageFilter>>, ReconstructionError> {
        names
            .iter()
            .map(|name| {
                self.get(name.as_ref())
                    .ok_or_else(|| ReconstructionError::UnknownFilter {
                        name: name.as_ref().to_string(),
                    })
            })
            .collect()
    }
}
