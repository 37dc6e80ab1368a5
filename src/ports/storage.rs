use crate::domain::{ExamId, ExamType, PatientSize, TechnicalFactors};
use crate::error::{PanexamError, Result};
use crate::reconstruction::PanoramicImage;
use chrono::{DateTime, Utc};
use image::{ImageBuffer, ImageFormat, Luma};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Exam metadata persisted next to every image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub exam_id: ExamId,
    pub exam_type: ExamType,
    pub patient_size: PatientSize,
    pub factors: TechnicalFactors,
    pub frame_count: u32,
    pub width: u32,
    pub height: u32,
    /// Filters applied, in order; empty for raw reconstructions
    pub filters: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Persistence of finished images; the encoding is the store's business
pub trait ImageStore: Send + Sync {
    fn save(&self, image: &PanoramicImage, path: &Path, metadata: &ImageMetadata) -> Result<()>;
}

/// Writes 16-bit grayscale PNG files with a JSON sidecar
#[derive(Debug, Default)]
pub struct FileImageStore;

impl FileImageStore {
    pub fn new() -> Self {
        Self
    }

    pub fn sidecar_path(path: &Path) -> PathBuf {
        path.with_extension("json")
    }
}

impl ImageStore for FileImageStore {
    fn save(&self, image: &PanoramicImage, path: &Path, metadata: &ImageMetadata) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let buffer: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_raw(image.width(), image.height(), image.pixels().to_vec())
                .ok_or_else(|| {
                    PanexamError::port("image_store", "pixel buffer does not match image size")
                })?;
        buffer.save_with_format(path, ImageFormat::Png)?;

        let metadata_json = serde_json::to_string_pretty(metadata)?;
        let sidecar = Self::sidecar_path(path);
        fs::write(&sidecar, metadata_json)?;

        debug!(
            "Saved {}x{} image to {} (metadata {})",
            image.width(),
            image.height(),
            path.display(),
            sidecar.display()
        );
        Ok(())
    }
}

/// Keeps images in memory; can be told to fail
#[derive(Default)]
pub struct MemoryImageStore {
    images: Mutex<HashMap<PathBuf, (PanoramicImage, ImageMetadata)>>,
    fail_writes: AtomicBool,
}

impl MemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    pub fn get(&self, path: &Path) -> Option<(PanoramicImage, ImageMetadata)> {
        self.images.lock().get(path).cloned()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.images.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.images.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ImageStore for MemoryImageStore {
    fn save(&self, image: &PanoramicImage, path: &Path, metadata: &ImageMetadata) -> Result<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(PanexamError::port("image_store", "write refused"));
        }
        self.images
            .lock()
            .insert(path.to_path_buf(), (image.clone(), metadata.clone()));
        Ok(())
    }
}
