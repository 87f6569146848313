use async_trait::async_trait;
use std::time::Duration;

use super::http::{build_client, get_limited};
use super::{FetchError, ImageSource, DEFAULT_TIMEOUT_SECS};
use crate::util::validate_locator;

const MAX_IMAGE_SIZE: usize = 32 * 1024 * 1024; // 32MB

/// Image source that GETs the locator directly.
#[derive(Clone)]
pub struct HttpImageSource {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpImageSource {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        Ok(Self {
            client: build_client(timeout)?,
            timeout,
        })
    }

    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

impl Default for HttpImageSource {
    fn default() -> Self {
        let timeout = Duration::from_secs(DEFAULT_TIMEOUT_SECS);
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn fetch_bytes(&self, locator: &str) -> Result<Vec<u8>, FetchError> {
        let url = validate_locator(locator).map_err(|e| {
            tracing::debug!(locator, error = %e, "Rejected image locator");
            FetchError::InvalidLocator
        })?;

        let bytes = get_limited(&self.client, url.as_str(), self.timeout, MAX_IMAGE_SIZE).await?;
        tracing::trace!(locator, bytes = bytes.len(), "Fetched image bytes");
        Ok(bytes)
    }
}
