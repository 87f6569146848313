//! Disk-backed image rendition cache.
//!
//! One file per entry under a single root, named by the percent-encoded
//! locator and target size. No index file: membership comes from the
//! directory listing and recency from file modification times.

mod disk;
mod image_cache;
mod thumbnail;
mod types;

pub use disk::{cache_key, plan_eviction};
pub use image_cache::ImageCache;
pub use thumbnail::decode;
pub use types::{
    CacheConfig, CacheEntry, CacheError, CacheStats, TargetSize, DEFAULT_JPEG_QUALITY,
    DEFAULT_MAX_DECODE_BYTES, DEFAULT_MAX_DISK_BYTES,
};
