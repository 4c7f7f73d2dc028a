//! Byte-range capable transport behind a trait so transfers can be driven
//! from memory in tests.

use crate::config::DownloadConfig;
use crate::error::{DownloadError, Result, StrataError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::{header, Client, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Body chunks of a fetched resource.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

pub struct FetchResponse {
    /// Full length of the resource, when the server reported it.
    pub total_bytes: Option<u64>,
    /// True when the body starts at the requested offset rather than byte 0.
    pub resumed: bool,
    pub body: ByteStream,
}

impl std::fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchResponse")
            .field("total_bytes", &self.total_bytes)
            .field("resumed", &self.resumed)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Start streaming `url` from byte `offset`. Servers may ignore the
    /// offset; `FetchResponse::resumed` says whether they honoured it.
    async fn fetch(&self, url: &str, offset: u64) -> Result<FetchResponse>;
}

/// HTTP(S) fetcher on a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        Self::with_connect_timeout(DownloadConfig::REQUEST_TIMEOUT)
    }

    /// Only connection setup is bounded; large bodies may stream for hours.
    pub fn with_connect_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .user_agent(concat!("strata/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(DownloadError::from)?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, offset: u64) -> Result<FetchResponse> {
        let parsed = url::Url::parse(url).map_err(|e| DownloadError::Network {
            message: format!("Invalid URL {}: {}", url, e),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DownloadError::Network {
                message: format!("Unsupported URL scheme: {}", parsed.scheme()),
            }
            .into());
        }

        let mut request = self.client.get(parsed);
        if offset > 0 {
            request = request.header(header::RANGE, format!("bytes={}-", offset));
        }
        let response = request.send().await.map_err(DownloadError::from)?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Network {
                message: format!("Download failed with status {}", status),
            }
            .into());
        }

        let resumed = offset > 0 && status == StatusCode::PARTIAL_CONTENT;
        let total_bytes = response
            .content_length()
            .map(|len| if resumed { len + offset } else { len });
        debug!(url, offset, resumed, ?total_bytes, "Fetch started");

        let body = response
            .bytes_stream()
            .map_err(|e| StrataError::from(DownloadError::from(e)))
            .boxed();
        Ok(FetchResponse {
            total_bytes,
            resumed,
            body,
        })
    }
}
