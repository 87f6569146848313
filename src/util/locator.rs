use thiserror::Error;
use url::Url;

/// Reasons a source locator cannot be fetched.
#[derive(Error, Debug)]
pub enum LocatorError {
    /// The locator string could not be parsed as a URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
    /// Credentials embedded in a locator would end up in cache filenames.
    #[error("URL must not carry credentials")]
    EmbeddedCredentials,
}

/// Validates a source locator before it is fetched or cached.
///
/// Rejects:
/// - strings that do not parse as absolute URLs
/// - schemes other than `http`/`https` (e.g. `file://`, `data:`)
/// - URLs without a host
/// - URLs with `user:password@` credentials
///
/// Locators come from the list API rather than from user input, so private
/// and loopback hosts are allowed.
///
/// # Examples
///
/// ```
/// use photofeed::util::validate_locator;
///
/// let url = validate_locator("https://picsum.photos/id/0/5000/3333").unwrap();
/// assert_eq!(url.host_str(), Some("picsum.photos"));
///
/// assert!(validate_locator("file:///etc/passwd").is_err());
/// assert!(validate_locator("https://user:pw@example.com/a.jpg").is_err());
/// ```
pub fn validate_locator(locator: &str) -> Result<Url, LocatorError> {
    let url = Url::parse(locator.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(LocatorError::UnsupportedScheme(scheme.to_owned())),
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(LocatorError::MissingHost);
    }

    if !url.username().is_empty() || url.password().is_some() {
        return Err(LocatorError::EmbeddedCredentials);
    }

    Ok(url)
}
