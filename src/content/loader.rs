use image::DynamicImage;
use std::sync::Arc;

use crate::remote::{FetchError, ImageSource};
use crate::storage::{self, ImageCache, TargetSize, DEFAULT_MAX_DECODE_BYTES};
use crate::util::validate_locator;

/// Loads images for display, going to the network only on a cache miss.
#[derive(Clone)]
pub struct ImageLoader {
    cache: ImageCache,
    source: Arc<dyn ImageSource>,
    max_decode_bytes: u64,
}

impl ImageLoader {
    pub fn new(cache: ImageCache, source: Arc<dyn ImageSource>) -> Self {
        Self {
            cache,
            source,
            max_decode_bytes: DEFAULT_MAX_DECODE_BYTES,
        }
    }

    pub fn with_max_decode_bytes(mut self, max: u64) -> Self {
        self.max_decode_bytes = max;
        self
    }

    pub fn cache(&self) -> &ImageCache {
        &self.cache
    }

    /// Image for `locator` rendered at `size` points and `scale`.
    ///
    /// A miss returns the full decoded download; the downsampled rendition
    /// is written to the cache without delaying the caller. Cache failures
    /// never surface here.
    pub async fn load(
        &self,
        locator: &str,
        size: TargetSize,
        scale: f64,
    ) -> Result<DynamicImage, FetchError> {
        validate_locator(locator).map_err(|e| {
            tracing::debug!(locator, error = %e, "Rejected image locator");
            FetchError::InvalidLocator
        })?;

        if let Some(image) = self.cache.lookup(locator, size).await {
            tracing::trace!(locator, "Image cache hit");
            return Ok(image);
        }

        let bytes = self.source.fetch_bytes(locator).await?;
        let max_alloc = self.max_decode_bytes;
        let (image, bytes) = tokio::task::spawn_blocking(move || {
            let decoded = storage::decode(&bytes, max_alloc);
            (decoded, bytes)
        })
        .await
        .map_err(|e| FetchError::Unknown(format!("decode task failed: {e}")))?;

        let image = image.map_err(|e| {
            tracing::debug!(locator, error = %e, "Downloaded image did not decode");
            FetchError::DecodingFailure
        })?;

        self.cache.store_detached(bytes, locator, size, scale);
        Ok(image)
    }
}
