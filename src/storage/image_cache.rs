use image::DynamicImage;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::thread;
use tokio::sync::{mpsc, oneshot};

use super::disk::DiskStore;
use super::types::{CacheConfig, CacheError, CacheStats, TargetSize};
use crate::util::panic_message;

const WORKER_NAME: &str = "image-cache-disk";

/// Work items for the disk worker, executed one at a time in send order.
enum Job {
    Lookup {
        locator: String,
        size: TargetSize,
        reply: oneshot::Sender<Option<DynamicImage>>,
    },
    Store {
        bytes: Vec<u8>,
        locator: String,
        size: TargetSize,
        scale: f64,
        reply: Option<oneshot::Sender<()>>,
    },
    Evict {
        reply: oneshot::Sender<usize>,
    },
    Clear {
        reply: oneshot::Sender<()>,
    },
    Usage {
        reply: oneshot::Sender<u64>,
    },
    Stats {
        reply: oneshot::Sender<CacheStats>,
    },
}

impl Job {
    fn name(&self) -> &'static str {
        match self {
            Job::Lookup { .. } => "lookup",
            Job::Store { .. } => "store",
            Job::Evict { .. } => "evict",
            Job::Clear { .. } => "clear",
            Job::Usage { .. } => "usage",
            Job::Stats { .. } => "stats",
        }
    }
}

/// Disk-backed cache of downsampled image renditions.
///
/// Every read, write, downsample and eviction pass runs on one dedicated
/// worker thread that owns the cache directory, so concurrent callers need
/// no locking of their own. Operations never fail: errors are logged and
/// surface as a miss, a zero, or a no-op.
///
/// Cloning yields another handle to the same worker. The worker exits once
/// every handle is dropped and its queue has drained.
#[derive(Clone, Debug)]
pub struct ImageCache {
    jobs: mpsc::UnboundedSender<Job>,
    root: PathBuf,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl ImageCache {
    /// Create the cache root and start the worker.
    pub fn open(config: CacheConfig) -> Result<Self, CacheError> {
        let root = config.root.clone();
        let store = DiskStore::open(config)?;
        let (jobs, rx) = mpsc::unbounded_channel();

        thread::Builder::new()
            .name(WORKER_NAME.to_string())
            .spawn(move || run_worker(store, rx))?;

        tracing::debug!(root = %root.display(), "Image cache opened");
        Ok(Self { jobs, root })
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    fn submit(&self, job: Job) {
        if self.jobs.send(job).is_err() {
            tracing::warn!("Image cache worker has stopped");
        }
    }

    /// Cached rendition of `locator` at `size`, or `None` on a miss.
    ///
    /// Unreadable or undecodable entries count as misses.
    pub async fn lookup(&self, locator: &str, size: TargetSize) -> Option<DynamicImage> {
        let (reply, rx) = oneshot::channel();
        self.submit(Job::Lookup {
            locator: locator.to_string(),
            size,
            reply,
        });
        rx.await.ok().flatten()
    }

    /// Downsample and persist `bytes`, then run an eviction pass.
    ///
    /// Resolves once the worker has finished the job, whether or not it
    /// succeeded.
    pub async fn store(&self, bytes: Vec<u8>, locator: &str, size: TargetSize, scale: f64) {
        let (reply, rx) = oneshot::channel();
        self.submit(Job::Store {
            bytes,
            locator: locator.to_string(),
            size,
            scale,
            reply: Some(reply),
        });
        let _ = rx.await;
    }

    /// Queue a store without waiting for it.
    pub fn store_detached(&self, bytes: Vec<u8>, locator: &str, size: TargetSize, scale: f64) {
        self.submit(Job::Store {
            bytes,
            locator: locator.to_string(),
            size,
            scale,
            reply: None,
        });
    }

    /// Run an eviction pass now. Returns the number of entries removed.
    pub async fn evict_if_over_budget(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        self.submit(Job::Evict { reply });
        rx.await.unwrap_or(0)
    }

    /// Remove every entry and recreate the empty root.
    pub async fn clear(&self) {
        let (reply, rx) = oneshot::channel();
        self.submit(Job::Clear { reply });
        let _ = rx.await;
    }

    /// Total bytes of committed entries.
    pub async fn current_disk_usage(&self) -> u64 {
        let (reply, rx) = oneshot::channel();
        self.submit(Job::Usage { reply });
        rx.await.unwrap_or(0)
    }

    pub async fn stats(&self) -> CacheStats {
        let (reply, rx) = oneshot::channel();
        self.submit(Job::Stats { reply });
        rx.await.unwrap_or_default()
    }
}

fn run_worker(store: DiskStore, mut rx: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = rx.blocking_recv() {
        let name = job.name();
        // A panicking decoder must not take the worker down with it; the
        // job's reply sender is dropped and the caller sees a miss.
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handle(&store, job))) {
            tracing::error!(job = name, panic = %panic_message(panic), "Image cache job panicked");
        }
    }
    tracing::debug!(root = %store.root().display(), "Image cache worker stopped");
}

fn handle(store: &DiskStore, job: Job) {
    match job {
        Job::Lookup {
            locator,
            size,
            reply,
        } => {
            let image = match store.read(&locator, size) {
                Ok(image) => image,
                Err(e) => {
                    tracing::debug!(locator = %locator, error = %e, "Unreadable cache entry");
                    None
                }
            };
            let _ = reply.send(image);
        }
        Job::Store {
            bytes,
            locator,
            size,
            scale,
            reply,
        } => {
            match store.write(&bytes, &locator, size, scale) {
                Ok(written) => {
                    tracing::debug!(locator = %locator, bytes = written, "Cached rendition");
                    if let Err(e) = store.evict_if_over_budget() {
                        tracing::warn!(error = %e, "Eviction pass failed");
                    }
                }
                Err(e) => {
                    tracing::debug!(locator = %locator, error = %e, "Failed to cache rendition");
                }
            }
            if let Some(reply) = reply {
                let _ = reply.send(());
            }
        }
        Job::Evict { reply } => {
            let removed = store.evict_if_over_budget().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Eviction pass failed");
                0
            });
            let _ = reply.send(removed);
        }
        Job::Clear { reply } => {
            if let Err(e) = store.clear() {
                tracing::warn!(error = %e, "Failed to clear image cache");
            }
            let _ = reply.send(());
        }
        Job::Usage { reply } => {
            let usage = store.usage().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to measure image cache");
                0
            });
            let _ = reply.send(usage);
        }
        Job::Stats { reply } => {
            let stats = store.stats().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to read image cache stats");
                CacheStats::default()
            });
            let _ = reply.send(stats);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::thumbnail::tests::png_bytes;

    fn temp_config(name: &str) -> CacheConfig {
        let dir = std::env::temp_dir().join(format!(
            "photofeed_cache_{}_{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        CacheConfig::new(dir)
    }

    #[tokio::test]
    async fn test_failed_store_is_a_miss() {
        let config = temp_config("bad_store");
        let root = config.root.clone();
        let cache = ImageCache::open(config).unwrap();
        let size = TargetSize::new(10, 10);

        cache.store(b"nope".to_vec(), "https://x.example/bad", size, 2.0).await;

        assert!(cache.lookup("https://x.example/bad", size).await.is_none());
        assert_eq!(cache.current_disk_usage().await, 0);
        std::fs::remove_dir_all(root).unwrap();
    }

    #[tokio::test]
    async fn test_detached_store_is_ordered_before_later_lookup() {
        let config = temp_config("detached");
        let root = config.root.clone();
        let cache = ImageCache::open(config).unwrap();
        let size = TargetSize::new(20, 20);

        cache.store_detached(png_bytes(64, 64), "https://x.example/d", size, 1.0);
        let img = cache.lookup("https://x.example/d", size).await.unwrap();

        assert_eq!((img.width(), img.height()), (20, 20));
        std::fs::remove_dir_all(root).unwrap();
    }

    #[tokio::test]
    async fn test_stats_after_store() {
        let config = temp_config("stats");
        let root = config.root.clone();
        let cache = ImageCache::open(config).unwrap();

        cache.store(png_bytes(32, 32), "https://x.example/s", TargetSize::new(8, 8), 1.0).await;
        let stats = cache.stats().await;

        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.total_size_bytes, cache.current_disk_usage().await);
        assert!(stats.oldest_entry.is_some());
        assert_eq!(stats.oldest_entry, stats.newest_entry);
        std::fs::remove_dir_all(root).unwrap();
    }
}
