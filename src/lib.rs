//! Paginated photo feed with a disk-backed image cache.
//!
//! - [`feed`] drives load, reload, load-more and search over a remote page source
//! - [`storage`] persists downsampled renditions under a byte budget
//! - [`content`] composes the cache with a remote image source
//! - [`remote`] holds the source traits and their HTTP implementations

pub mod config;
pub mod content;
pub mod feed;
pub mod remote;
pub mod storage;
pub mod util;
