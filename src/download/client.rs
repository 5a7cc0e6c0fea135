//! HTTP client wrapper for ranged downloads.
//!
//! This module provides the `HttpClient` struct which issues the single GET a
//! transfer needs, adding a `Range` header when resuming, with connect/read
//! timeout configuration and status mapping.

use std::time::Duration;

use reqwest::header::{CONTENT_LENGTH, RANGE};
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, instrument};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::DownloadError;

/// User-Agent sent with every transfer.
pub const DEFAULT_USER_AGENT: &str = concat!("browser-downloads/", env!("CARGO_PKG_VERSION"));

/// HTTP client for streaming transfers.
///
/// This client is designed to be created once and shared by every transfer,
/// taking advantage of connection pooling. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

/// Response of a transfer request, with the resume decision already made.
#[derive(Debug)]
pub struct TransferResponse {
    /// The streaming response.
    pub response: Response,
    /// Offset the body starts at: the requested offset for `206 Partial
    /// Content`, 0 when the server ignored the range and sent the whole file.
    pub start_offset: u64,
    /// Bytes the body will carry, when announced.
    pub content_length: Option<u64>,
}

impl HttpClient {
    /// Creates a new HTTP client with default timeouts.
    ///
    /// Default configuration:
    /// - Connect timeout: 30 seconds
    /// - Read timeout: 5 minutes without data
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::ClientBuild`] if the TLS backend or system
    /// configuration cannot be initialized.
    pub fn new() -> Result<Self, DownloadError> {
        Self::with_timeouts(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            Duration::from_secs(READ_TIMEOUT_SECS),
        )
    }

    /// Creates a new HTTP client with explicit timeout values.
    ///
    /// The read timeout applies between two reads, not to the whole body, so
    /// long transfers are never cut off while bytes keep arriving.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::ClientBuild`] if the client cannot be built.
    #[instrument(level = "debug")]
    pub fn with_timeouts(
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .user_agent(DEFAULT_USER_AGENT)
            .build()
            .map_err(|source| DownloadError::ClientBuild { source })?;
        Ok(Self { client })
    }

    /// Sends the GET for a transfer starting at `offset`.
    ///
    /// When `offset > 0` the request carries `Range: bytes=<offset>-`.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` if:
    /// - The URL is invalid
    /// - The request fails (network error, timeout)
    /// - The server returns a non-success status
    #[instrument(skip(self), fields(url = %url))]
    pub async fn open(&self, url: &str, offset: u64) -> Result<TransferResponse, DownloadError> {
        let parsed = Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;

        let mut request = self.client.get(parsed);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| DownloadError::from_request(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http_status(url, status.as_u16()));
        }

        let start_offset = if offset > 0 && status == StatusCode::PARTIAL_CONTENT {
            offset
        } else {
            if offset > 0 {
                debug!(offset, status = status.as_u16(), "server ignored range request");
            }
            0
        };
        let content_length = announced_length(&response);

        debug!(
            status = status.as_u16(),
            start_offset,
            content_length = ?content_length,
            "transfer response received"
        );

        Ok(TransferResponse {
            response,
            start_offset,
            content_length,
        })
    }
}

/// Reads the announced body length.
///
/// The `Content-Length` header is preferred over the body size hint: a body
/// delimited by connection close has no header and counts as unknown.
fn announced_length(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}
