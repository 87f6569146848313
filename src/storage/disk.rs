use chrono::{DateTime, Utc};
use image::DynamicImage;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use super::thumbnail;
use super::types::{CacheConfig, CacheEntry, CacheError, CacheStats, TargetSize};

/// In-progress writes carry this prefix and are invisible to lookups.
const TEMP_PREFIX: &str = ".tmp.";

/// Filename for a rendition of `locator` at `size`.
///
/// Display scale is not part of the key: the same logical size at two
/// scales maps to one file, and the later store wins.
pub fn cache_key(locator: &str, size: TargetSize) -> String {
    let raw = format!("{}_{}x{}", locator, size.width, size.height);
    urlencoding::encode(&raw).into_owned()
}

/// Entries to delete so the remaining total is at most `target` bytes.
///
/// Oldest modification time first, ties broken by path so the plan is
/// deterministic. Returns nothing when `total` is within `max_bytes`.
pub fn plan_eviction(mut entries: Vec<CacheEntry>, max_bytes: u64, target: u64) -> Vec<CacheEntry> {
    let mut total: u64 = entries.iter().map(|e| e.size_bytes).sum();
    if total <= max_bytes {
        return Vec::new();
    }

    entries.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));

    let mut planned = Vec::new();
    for entry in entries {
        if total <= target {
            break;
        }
        total = total.saturating_sub(entry.size_bytes);
        planned.push(entry);
    }
    planned
}

/// Synchronous disk operations on one cache directory.
///
/// Not thread-safe by itself; the cache worker is its only caller.
#[derive(Debug)]
pub struct DiskStore {
    config: CacheConfig,
}

impl DiskStore {
    /// Create the cache root if missing.
    pub fn open(config: CacheConfig) -> Result<Self, CacheError> {
        fs::create_dir_all(&config.root)?;
        Ok(Self { config })
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn entry_path(&self, locator: &str, size: TargetSize) -> PathBuf {
        self.config.root.join(cache_key(locator, size))
    }

    /// Decoded entry, or `None` if absent.
    pub fn read(&self, locator: &str, size: TargetSize) -> Result<Option<DynamicImage>, CacheError> {
        let path = self.entry_path(locator, size);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        thumbnail::decode(&bytes, self.config.max_decode_bytes).map(Some)
    }

    /// Downsample, encode and persist `bytes` as the entry for `locator` at `size`.
    ///
    /// Returns the number of bytes written.
    pub fn write(
        &self,
        bytes: &[u8],
        locator: &str,
        size: TargetSize,
        scale: f64,
    ) -> Result<u64, CacheError> {
        let jpeg = thumbnail::render(
            bytes,
            size,
            scale,
            self.config.jpeg_quality,
            self.config.max_decode_bytes,
        )?;
        let dest = self.entry_path(locator, size);
        atomic_write(&self.config.root, &dest, &jpeg)?;
        Ok(jpeg.len() as u64)
    }

    /// Every committed entry. Unreadable files are skipped.
    pub fn entries(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let mut entries = Vec::new();
        for dirent in fs::read_dir(&self.config.root)? {
            let Ok(dirent) = dirent else { continue };
            if dirent.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                continue;
            }
            let Ok(meta) = dirent.metadata() else { continue };
            if !meta.is_file() {
                continue;
            }
            entries.push(CacheEntry {
                path: dirent.path(),
                size_bytes: meta.len(),
                modified: meta.modified().unwrap_or(UNIX_EPOCH),
            });
        }
        Ok(entries)
    }

    pub fn usage(&self) -> Result<u64, CacheError> {
        Ok(self.entries()?.iter().map(|e| e.size_bytes).sum())
    }

    /// Delete the oldest entries if the directory is over budget.
    ///
    /// Returns the number of entries removed.
    pub fn evict_if_over_budget(&self) -> Result<usize, CacheError> {
        let entries = self.entries()?;
        let plan = plan_eviction(
            entries,
            self.config.max_disk_bytes,
            self.config.eviction_target(),
        );
        if plan.is_empty() {
            return Ok(0);
        }

        let mut removed = 0;
        let mut freed = 0u64;
        for entry in &plan {
            match fs::remove_file(&entry.path) {
                Ok(()) => {
                    removed += 1;
                    freed += entry.size_bytes;
                }
                Err(e) => {
                    tracing::warn!(path = %entry.path.display(), error = %e, "Failed to evict cache entry");
                }
            }
        }

        tracing::info!(removed, freed_bytes = freed, "Evicted image cache entries");
        Ok(removed)
    }

    /// Remove every entry and recreate the empty root.
    pub fn clear(&self) -> Result<(), CacheError> {
        match fs::remove_dir_all(&self.config.root) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&self.config.root)?;
        Ok(())
    }

    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let entries = self.entries()?;
        let oldest = entries.iter().map(|e| e.modified).min();
        let newest = entries.iter().map(|e| e.modified).max();
        Ok(CacheStats {
            total_entries: entries.len(),
            total_size_bytes: entries.iter().map(|e| e.size_bytes).sum(),
            oldest_entry: oldest.map(DateTime::<Utc>::from),
            newest_entry: newest.map(DateTime::<Utc>::from),
        })
    }
}

/// Write to a temp file in `dir`, then rename over `dest`.
///
/// Readers see either the previous entry or the complete new one.
fn atomic_write(dir: &Path, dest: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp = dir.join(format!("{TEMP_PREFIX}{nanos}"));

    let result = (|| -> io::Result<()> {
        let mut file = fs::File::create(&temp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&temp, dest)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&temp);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::thumbnail::tests::png_bytes;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::time::Duration;

    fn temp_root(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "photofeed_disk_{}_{}",
            name,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn entry(name: &str, size: u64, secs: u64) -> CacheEntry {
        CacheEntry {
            path: PathBuf::from(name),
            size_bytes: size,
            modified: UNIX_EPOCH + Duration::from_secs(secs),
        }
    }

    #[test]
    fn test_cache_key_percent_encodes() {
        let key = cache_key("https://picsum.photos/id/0/5000/3333", TargetSize::new(120, 80));
        assert_eq!(key, "https%3A%2F%2Fpicsum.photos%2Fid%2F0%2F5000%2F3333_120x80");
        assert!(!key.contains('/'));
    }

    #[test]
    fn test_cache_key_distinguishes_sizes() {
        let a = cache_key("https://a.example/1", TargetSize::new(10, 20));
        let b = cache_key("https://a.example/1", TargetSize::new(20, 10));
        assert_ne!(a, b);
    }

    #[test]
    fn test_plan_under_budget_is_empty() {
        let plan = plan_eviction(vec![entry("a", 50, 1), entry("b", 50, 2)], 100, 80);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_plan_removes_oldest_until_target() {
        let entries = vec![
            entry("new", 40, 30),
            entry("old", 40, 10),
            entry("mid", 40, 20),
        ];
        // 120 > 100; target 80 needs one 40-byte removal.
        let plan = plan_eviction(entries, 100, 80);
        let names: Vec<_> = plan.iter().map(|e| e.path.to_string_lossy().into_owned()).collect();
        assert_eq!(names, vec!["old"]);
    }

    #[test]
    fn test_plan_breaks_ties_by_path() {
        let plan = plan_eviction(vec![entry("b", 60, 5), entry("a", 60, 5)], 100, 80);
        assert_eq!(plan[0].path, PathBuf::from("a"));
    }

    #[test]
    fn test_write_read_roundtrip() {
        let root = temp_root("roundtrip");
        let store = DiskStore::open(CacheConfig::new(&root)).unwrap();
        let size = TargetSize::new(50, 50);

        assert!(store.read("https://x.example/1", size).unwrap().is_none());

        let written = store.write(&png_bytes(300, 200), "https://x.example/1", size, 2.0).unwrap();
        assert!(written > 0);

        let img = store.read("https://x.example/1", size).unwrap().unwrap();
        assert!(img.width().max(img.height()) <= 100);
        assert_eq!(store.usage().unwrap(), written);

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_corrupt_entry_is_an_error() {
        let root = temp_root("corrupt");
        let store = DiskStore::open(CacheConfig::new(&root)).unwrap();
        let size = TargetSize::new(10, 10);
        fs::write(root.join(cache_key("https://x.example/c", size)), b"garbage").unwrap();

        assert!(store.read("https://x.example/c", size).is_err());
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_temp_files_are_not_entries() {
        let root = temp_root("temp");
        let store = DiskStore::open(CacheConfig::new(&root)).unwrap();
        fs::write(root.join(".tmp.123"), b"partial").unwrap();
        fs::write(root.join("entry"), b"done").unwrap();

        let entries = store.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(store.usage().unwrap(), 4);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_clear_recreates_root() {
        let root = temp_root("clear");
        let store = DiskStore::open(CacheConfig::new(&root)).unwrap();
        fs::write(root.join("a"), b"1234").unwrap();

        store.clear().unwrap();
        assert!(root.is_dir());
        assert_eq!(store.stats().unwrap(), CacheStats::default());
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_evict_removes_oldest_files() {
        let root = temp_root("evict");
        let mut config = CacheConfig::new(&root);
        config.max_disk_bytes = 1000;
        let store = DiskStore::open(config).unwrap();

        for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
            let path = root.join(name);
            fs::write(&path, vec![0u8; 300]).unwrap();
            let file = fs::File::options().write(true).open(&path).unwrap();
            file.set_modified(UNIX_EPOCH + Duration::from_secs(1_000 + i as u64)).unwrap();
        }

        // 1200 > 1000; down to <= 800 means dropping "a" and "b".
        assert_eq!(store.evict_if_over_budget().unwrap(), 2);
        assert!(!root.join("a").exists());
        assert!(!root.join("b").exists());
        assert!(root.join("c").exists());
        assert_eq!(store.usage().unwrap(), 600);
        fs::remove_dir_all(&root).unwrap();
    }

    proptest! {
        #[test]
        fn prop_plan_reaches_target_removing_oldest_prefix(
            sizes in proptest::collection::vec(1u64..500, 0..30),
            max in 1u64..5000,
        ) {
            let entries: Vec<CacheEntry> = sizes
                .iter()
                .enumerate()
                .map(|(i, s)| entry(&format!("{i:03}"), *s, i as u64))
                .collect();
            let total: u64 = sizes.iter().sum();
            let target = max - max / 5;

            let plan = plan_eviction(entries.clone(), max, target);
            let freed: u64 = plan.iter().map(|e| e.size_bytes).sum();

            if total <= max {
                prop_assert!(plan.is_empty());
            } else {
                prop_assert!(total - freed <= target);
                // Exactly the oldest entries, and no more than needed.
                prop_assert_eq!(&plan[..], &entries[..plan.len()]);
                let last = plan.last().map(|e| e.size_bytes).unwrap_or(0);
                prop_assert!(total - freed + last > target);
            }
        }
    }
}
