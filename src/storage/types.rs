use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;

/// 5 GiB
pub const DEFAULT_MAX_DISK_BYTES: u64 = 5 * 1024 * 1024 * 1024;
/// JPEG quality on the 1-100 scale (0.8 of full quality).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;
/// Allocation cap for a single decode.
pub const DEFAULT_MAX_DECODE_BYTES: u64 = 512 * 1024 * 1024;

// ============================================================================
// Error Types
// ============================================================================

/// Failures inside the cache worker.
///
/// Never returned from the public cache operations; they are logged and the
/// operation degrades to a miss or a no-op.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("JPEG decode failed: {0}")]
    Jpeg(#[from] jpeg_decoder::Error),

    #[error("Target size {width}x{height} at scale {scale} has no pixels")]
    EmptyBound { width: u32, height: u32, scale: f64 },

    #[error("Cache worker is gone")]
    WorkerGone,
}

// ============================================================================
// Configuration
// ============================================================================

/// Settings for one cache instance. Each instance owns its `root`.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding one file per entry.
    pub root: PathBuf,
    pub max_disk_bytes: u64,
    /// 1-100
    pub jpeg_quality: u8,
    pub max_decode_bytes: u64,
}

impl CacheConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_disk_bytes: DEFAULT_MAX_DISK_BYTES,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            max_decode_bytes: DEFAULT_MAX_DECODE_BYTES,
        }
    }

    /// Bytes left on disk after an eviction pass: 80% of the budget.
    pub fn eviction_target(&self) -> u64 {
        self.max_disk_bytes - self.max_disk_bytes / 5
    }
}

// ============================================================================
// Keys and Entries
// ============================================================================

/// Requested rendition size in display points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetSize {
    pub width: u32,
    pub height: u32,
}

impl TargetSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Longest edge in pixels at `scale`, or `None` if that rounds to zero.
    pub fn pixel_bound(&self, scale: f64) -> Option<u32> {
        let bound = (self.width.max(self.height) as f64 * scale).floor();
        if bound.is_finite() && bound >= 1.0 {
            Some(bound.min(u32::MAX as f64) as u32)
        } else {
            None
        }
    }
}

/// One file in the cache directory, as seen by the eviction pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: std::time::SystemTime,
}

/// Aggregate cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_size_bytes: u64,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}
