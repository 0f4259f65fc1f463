use futures::StreamExt;
use reqwest::redirect::Policy;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;

/// Feed documents larger than this are rejected (10MB).
pub const MAX_FEED_SIZE: usize = 10 * 1024 * 1024;

/// Maximum redirect hops followed for a single request.
const MAX_REDIRECTS: usize = 5;

/// Errors that can occur while talking to a feed or payload host.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, proxy, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Response body exceeded the size limit
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Server answered with an empty body
    #[error("Empty response body")]
    EmptyBody,
}

/// Build the HTTP client shared by every fetch and download of a cycle.
///
/// The proxy (when enabled) and the request timeout are applied here, so they
/// hold for all outbound calls made through the returned client.
pub fn build_http_client(config: &Config) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .redirect(create_redirect_policy())
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .connect_timeout(config.request_timeout())
        .timeout(config.request_timeout());

    if let Some(proxy) = config.active_proxy() {
        tracing::info!(proxy = %proxy.url(), "Routing requests through proxy");
        builder = builder.proxy(reqwest::Proxy::all(proxy.url())?);
    }

    builder.build()
}

fn create_redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("Too many redirects");
        }

        // Detect loops
        let url = attempt.url();
        for prev in attempt.previous() {
            if prev.as_str() == url.as_str() {
                return attempt.error("Redirect loop detected");
            }
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

/// Fetch the raw document behind a feed link.
///
/// Issues exactly one GET. Transport failures, non-2xx statuses, oversize or
/// empty bodies are all errors; the caller decides they mean "no items".
pub async fn fetch_feed(
    client: &reqwest::Client,
    link: &str,
    timeout: Duration,
) -> Result<Vec<u8>, FetchError> {
    get_bytes(client, link, timeout, MAX_FEED_SIZE).await
}

/// Single bounded GET returning the full body.
pub(crate) async fn get_bytes(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // The outer timeout also bounds reading the body, not just the headers
    let request = async {
        let response = client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        read_limited_bytes(response, limit).await
    };

    let bytes = tokio::time::timeout(timeout, request)
        .await
        .map_err(|_| FetchError::Timeout(timeout))??;

    if bytes.is_empty() {
        return Err(FetchError::EmptyBody);
    }
    Ok(bytes)
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
