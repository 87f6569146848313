//! Configuration file parser for ~/.config/photofeed/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::EngineConfig;
use crate::remote::DEFAULT_BASE_URL;
use crate::storage::{CacheConfig, DEFAULT_JPEG_QUALITY, DEFAULT_MAX_DISK_BYTES};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the photo listing API.
    pub api_base_url: String,

    /// Items per page.
    pub page_size: usize,

    /// Timeout for each page or image request.
    pub request_timeout_secs: u64,

    /// Pause before retrying a failed page fetch.
    pub retry_delay_ms: u64,

    /// Image cache directory. `None` uses the platform cache directory.
    pub cache_dir: Option<PathBuf>,

    /// Disk budget for the image cache.
    pub max_disk_bytes: u64,

    /// JPEG quality for cached renditions, 1-100.
    pub jpeg_quality: u8,

    /// Pixels per display point.
    pub display_scale: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_BASE_URL.to_string(),
            page_size: 100,
            request_timeout_secs: 30,
            retry_delay_ms: 250,
            cache_dir: None,
            max_disk_bytes: DEFAULT_MAX_DISK_BYTES,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            display_scale: 2.0,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 8] = [
        "api_base_url",
        "page_size",
        "request_timeout_secs",
        "retry_delay_ms",
        "cache_dir",
        "max_disk_bytes",
        "jpeg_quality",
        "display_scale",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Out-of-range values → `Err(ConfigError::Invalid)`
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(
            path = %path.display(),
            api_base_url = %config.api_base_url,
            page_size = config.page_size,
            "Loaded configuration"
        );
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("page_size must be at least 1".into()));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::Invalid(format!(
                "jpeg_quality must be 1-100, got {}",
                self.jpeg_quality
            )));
        }
        if !(self.display_scale.is_finite() && self.display_scale > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "display_scale must be positive, got {}",
                self.display_scale
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// `~/.config/photofeed/config.toml`, if `HOME` is set.
    pub fn default_path() -> Option<PathBuf> {
        home_dir().map(|home| home.join(".config").join("photofeed").join("config.toml"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            page_size: self.page_size,
            request_timeout: self.request_timeout(),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    /// Cache settings rooted at `cache_dir`, or `~/.cache/photofeed/ImageCache`,
    /// or a temp directory when `HOME` is unset.
    pub fn cache_config(&self) -> CacheConfig {
        let root = self.cache_dir.clone().unwrap_or_else(|| {
            home_dir()
                .map(|home| home.join(".cache"))
                .unwrap_or_else(std::env::temp_dir)
                .join("photofeed")
                .join("ImageCache")
        });
        let mut cache = CacheConfig::new(root);
        cache.max_disk_bytes = self.max_disk_bytes;
        cache.jpeg_quality = self.jpeg_quality;
        cache
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(name: &str, content: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("photofeed_config_test_{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api_base_url, "https://picsum.photos");
        assert_eq!(config.page_size, 100);
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.retry_delay_ms, 250);
        assert!(config.cache_dir.is_none());
        assert_eq!(config.max_disk_bytes, 5 * 1024 * 1024 * 1024);
        assert_eq!(config.jpeg_quality, 80);
        assert_eq!(config.display_scale, 2.0);
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/photofeed_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_empty_file_returns_default() {
        let (dir, path) = write_config("empty", "   \n  \n");
        assert_eq!(Config::load(&path).unwrap(), Config::default());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let (dir, path) = write_config("partial", "page_size = 30\n");

        let config = Config::load(&path).unwrap();
        assert_eq!(config.page_size, 30);
        assert_eq!(config.request_timeout_secs, 30); // default
        assert_eq!(config.jpeg_quality, 80); // default

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let content = r#"
api_base_url = "http://localhost:8080"
page_size = 20
request_timeout_secs = 5
retry_delay_ms = 0
cache_dir = "/var/tmp/photofeed-cache"
max_disk_bytes = 1048576
jpeg_quality = 90
display_scale = 3.0
"#;
        let (dir, path) = write_config("full", content);

        let config = Config::load(&path).unwrap();
        assert_eq!(config.api_base_url, "http://localhost:8080");
        assert_eq!(config.page_size, 20);
        assert_eq!(config.display_scale, 3.0);

        let engine = config.engine_config();
        assert_eq!(engine.page_size, 20);
        assert_eq!(engine.request_timeout, Duration::from_secs(5));
        assert_eq!(engine.retry_delay, Duration::ZERO);

        let cache = config.cache_config();
        assert_eq!(cache.root, PathBuf::from("/var/tmp/photofeed-cache"));
        assert_eq!(cache.max_disk_bytes, 1_048_576);
        assert_eq!(cache.jpeg_quality, 90);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (dir, path) = write_config("invalid", "this is not [valid toml");

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let (dir, path) = write_config("unknown", "page_size = 10\ntheme = \"dark\"\n");
        assert_eq!(Config::load(&path).unwrap().page_size, 10);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let (dir, path) = write_config("wrongtype", "page_size = \"many\"\n");
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        for (name, content) in [
            ("zero_page", "page_size = 0\n"),
            ("quality", "jpeg_quality = 0\n"),
            ("scale", "display_scale = -1.0\n"),
            ("timeout", "request_timeout_secs = 0\n"),
        ] {
            let (dir, path) = write_config(name, content);
            let result = Config::load(&path);
            assert!(
                matches!(result, Err(ConfigError::Invalid(_))),
                "{name}: expected Invalid, got {result:?}"
            );
            std::fs::remove_dir_all(&dir).ok();
        }
    }

    #[test]
    fn test_too_large_file_rejected() {
        let (dir, path) = write_config("too_large", &"a".repeat(1_048_577));

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_cache_config_default_root_ends_with_image_cache() {
        let cache = Config::default().cache_config();
        assert!(cache.root.ends_with("photofeed/ImageCache"));
        assert_eq!(cache.max_disk_bytes, DEFAULT_MAX_DISK_BYTES);
    }
}
