use futures::StreamExt;
use std::time::Duration;

use super::FetchError;

/// Map a transport-level reqwest error into the fetch taxonomy.
pub(super) fn classify(err: &reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else if err.is_connect() {
        FetchError::NoConnectivity
    } else if err.is_builder() {
        FetchError::InvalidLocator
    } else if err.is_decode() || err.is_body() {
        FetchError::DecodingFailure
    } else {
        FetchError::Unknown(err.to_string())
    }
}

/// GET `url` with a hard timeout and return the body, capped at `limit` bytes.
///
/// - 5xx maps to [`FetchError::ServerUnavailable`]
/// - any other non-2xx maps to [`FetchError::Unknown`] with the status code
/// - a body shorter than its Content-Length is reported as a decoding failure
pub(super) async fn get_limited(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let response = tokio::time::timeout(timeout, client.get(url).send())
        .await
        .map_err(|_| FetchError::Timeout)?
        .map_err(|e| classify(&e))?;

    let status = response.status();
    if status.is_server_error() {
        tracing::debug!(url = %url, status = %status, "Server error response");
        return Err(FetchError::ServerUnavailable);
    }
    if !status.is_success() {
        return Err(FetchError::Unknown(format!("HTTP status {}", status.as_u16())));
    }

    // The body read shares the same budget as the request itself.
    tokio::time::timeout(timeout, read_limited_bytes(response, limit))
        .await
        .map_err(|_| FetchError::Timeout)?
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::Unknown(format!(
                "Response too large ({len} bytes, limit {limit})"
            )));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| classify(&e))?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::Unknown(format!(
                "Response too large (limit {limit} bytes)"
            )));
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            tracing::debug!(
                expected = expected,
                received = bytes.len(),
                "Incomplete response body"
            );
            return Err(FetchError::DecodingFailure);
        }
    }

    Ok(bytes)
}

/// Build the shared HTTP client used by both remote sources.
///
/// Redirects are followed for at most five hops, and loops are rejected.
/// Image locators commonly redirect once from a stable URL to a CDN.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, FetchError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .redirect(redirect_policy())
        .build()
        .map_err(|e| FetchError::Unknown(format!("Failed to build HTTP client: {e}")))
}

fn redirect_policy() -> reqwest::redirect::Policy {
    reqwest::redirect::Policy::custom(|attempt| {
        if attempt.previous().len() >= 5 {
            return attempt.error("Too many redirects (max 5)");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );

        attempt.follow()
    })
}
