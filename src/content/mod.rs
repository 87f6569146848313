//! Cache-first image loading.
//!
//! Composes the disk cache with a remote image source: a hit is returned
//! straight from disk, a miss is fetched, decoded, handed to the cache in
//! the background and returned.

mod loader;

pub use loader::ImageLoader;
