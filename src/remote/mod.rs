//! Remote collaborators: the paginated item list and the raw image bytes.
//!
//! Both are expressed as object-safe traits so the feed engine and the image
//! loader can be wired against HTTP in production and against in-memory fakes
//! in tests:
//!
//! - [`PageSource`] - `fetch_page(page, page_size)` for the feed engine
//! - [`ImageSource`] - `fetch_bytes(locator)` for the image loader
//!
//! Every failure is reported through the single [`FetchError`] taxonomy.

mod http;
mod images;
mod pages;

use async_trait::async_trait;
use thiserror::Error;

use crate::feed::Item;

pub use http::build_client;
pub use images::HttpImageSource;
pub use pages::{HttpPageSource, PhotoDto, DEFAULT_BASE_URL};

/// Default timeout applied to every remote request.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Errors surfaced by remote sources.
///
/// Variants carry only owned strings so the error can be cloned into
/// observable state and broadcast to several subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The locator could not be turned into a request URL
    #[error("Invalid URL")]
    InvalidLocator,
    /// The request exceeded its timeout budget
    #[error("Request timed out")]
    Timeout,
    /// DNS, connect or TLS failure before any response arrived
    #[error("No internet connection")]
    NoConnectivity,
    /// The server answered with a 5xx status
    #[error("Server is unavailable")]
    ServerUnavailable,
    /// The body could not be decoded into the expected shape
    #[error("Failed to decode response")]
    DecodingFailure,
    /// Anything else, with a short description
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Source of item pages, consumed by the feed engine.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch one page (1-based) of at most `page_size` items.
    async fn fetch_page(&self, page: u32, page_size: usize) -> Result<Vec<Item>, FetchError>;
}

/// Source of raw encoded image bytes, consumed by the image loader.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch_bytes(&self, locator: &str) -> Result<Vec<u8>, FetchError>;
}
