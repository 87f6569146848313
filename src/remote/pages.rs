use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use super::http::{build_client, get_limited};
use super::{FetchError, PageSource, DEFAULT_TIMEOUT_SECS};
use crate::feed::Item;

/// Default list API host.
pub const DEFAULT_BASE_URL: &str = "https://picsum.photos";

const LIST_PATH: &str = "v2/list";
const MAX_PAGE_SIZE_BYTES: usize = 10 * 1024 * 1024; // 10MB

/// One element of the list endpoint's JSON array.
///
/// `url` is the photo's landing page; `download_url` is the fetchable image
/// and becomes the item's source locator.
#[derive(Debug, Clone, Deserialize)]
pub struct PhotoDto {
    pub id: String,
    pub author: String,
    pub width: i64,
    pub height: i64,
    pub url: String,
    pub download_url: String,
}

impl From<PhotoDto> for Item {
    fn from(dto: PhotoDto) -> Self {
        Item {
            id: dto.id,
            author: dto.author,
            width: dto.width,
            height: dto.height,
            source_locator: dto.download_url,
        }
    }
}

/// Page source backed by the `{base}/v2/list?page=N&limit=M` endpoint.
#[derive(Clone)]
pub struct HttpPageSource {
    client: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpPageSource {
    /// Create a source for `base_url` with its own HTTP client.
    ///
    /// # Errors
    ///
    /// [`FetchError::InvalidLocator`] if `base_url` does not parse.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = build_client(timeout)?;
        Self::with_client(client, base_url, timeout)
    }

    /// Create a source sharing an existing client.
    pub fn with_client(
        client: reqwest::Client,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        // Url::join replaces the last segment unless the base ends with '/'.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&normalized).map_err(|_| FetchError::InvalidLocator)?;
        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    /// Source pointed at the public list API with the default timeout.
    pub fn picsum() -> Result<Self, FetchError> {
        Self::new(DEFAULT_BASE_URL, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    fn page_url(&self, page: u32, page_size: usize) -> Result<Url, FetchError> {
        let mut url = self
            .base_url
            .join(LIST_PATH)
            .map_err(|_| FetchError::InvalidLocator)?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("limit", &page_size.to_string());
        Ok(url)
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch_page(&self, page: u32, page_size: usize) -> Result<Vec<Item>, FetchError> {
        let url = self.page_url(page, page_size)?;
        tracing::debug!(url = %url, page, page_size, "Fetching page");

        let body = get_limited(&self.client, url.as_str(), self.timeout, MAX_PAGE_SIZE_BYTES).await?;

        let dtos: Vec<PhotoDto> = serde_json::from_slice(&body).map_err(|e| {
            tracing::debug!(page, error = %e, "Page body is not a photo list");
            FetchError::DecodingFailure
        })?;

        Ok(dtos.into_iter().map(Item::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TWO_PHOTOS: &str = r#"[
        {"id":"0","author":"Alejandro Escamilla","width":5000,"height":3333,
         "url":"https://unsplash.com/photos/yC-Yzbqy7PY",
         "download_url":"https://picsum.photos/id/0/5000/3333"},
        {"id":"1","author":"Alejandro Escamilla","width":5000,"height":3333,
         "url":"https://unsplash.com/photos/LNRyGwIJr5c",
         "download_url":"https://picsum.photos/id/1/5000/3333","extra":true}
    ]"#;

    fn source_for(server: &MockServer) -> HttpPageSource {
        HttpPageSource::new(&server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_page_decodes_items() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/list"))
            .and(query_param("page", "2"))
            .and(query_param("limit", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_string(TWO_PHOTOS))
            .expect(1)
            .mount(&server)
            .await;

        let items = source_for(&server).fetch_page(2, 100).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "0");
        assert_eq!(items[1].author, "Alejandro Escamilla");
        assert_eq!(
            items[1].source_locator,
            "https://picsum.photos/id/1/5000/3333"
        );
    }

    #[tokio::test]
    async fn test_server_error_maps_to_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = source_for(&server).fetch_page(1, 10).await.unwrap_err();
        assert_eq!(err, FetchError::ServerUnavailable);
    }

    #[tokio::test]
    async fn test_client_error_maps_to_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        match source_for(&server).fetch_page(1, 10).await.unwrap_err() {
            FetchError::Unknown(detail) => assert!(detail.contains("404")),
            e => panic!("Expected Unknown, got {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_malformed_body_maps_to_decoding_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"not\":\"a list\"}"))
            .mount(&server)
            .await;

        let err = source_for(&server).fetch_page(1, 10).await.unwrap_err();
        assert_eq!(err, FetchError::DecodingFailure);
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("[]")
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let source = HttpPageSource::new(&server.uri(), Duration::from_millis(50)).unwrap();
        let err = source.fetch_page(1, 10).await.unwrap_err();
        assert_eq!(err, FetchError::Timeout);
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let result = HttpPageSource::new("not a url", Duration::from_secs(1));
        assert!(matches!(result, Err(FetchError::InvalidLocator)));
    }

    #[test]
    fn test_page_url_keeps_base_path() {
        let source =
            HttpPageSource::new("https://example.com/api", Duration::from_secs(1)).unwrap();
        let url = source.page_url(3, 25).unwrap();
        assert_eq!(url.as_str(), "https://example.com/api/v2/list?page=3&limit=25");
    }
}
