//! Size- and time-bounded HTTP calls.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use http::header::{ACCEPT, HeaderValue};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tintbox::{FetchError, UpstreamConfig};
use tracing::{debug, instrument};

/// Bytes of an error response kept in [`FetchError::Upstream`].
pub const DEFAULT_ERROR_TEXT_BYTES: usize = 1024;

/// HTTP client wrapper that maps every outcome onto [`FetchError`].
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
    max_body_bytes: u64,
    error_text_bytes: usize,
}

impl HttpFetcher {
    /// Creates a fetcher with the limits from `config`.
    pub fn new(client: Client, config: &UpstreamConfig) -> Self {
        Self::builder(client)
            .timeout(config.timeout)
            .max_body_bytes(config.max_body_bytes)
            .build()
    }

    /// Creates a builder with the default limits of [`UpstreamConfig`].
    pub fn builder(client: Client) -> HttpFetcherBuilder {
        let defaults = UpstreamConfig::default();
        HttpFetcherBuilder {
            client,
            timeout: defaults.timeout,
            max_body_bytes: defaults.max_body_bytes,
            error_text_bytes: DEFAULT_ERROR_TEXT_BYTES,
        }
    }

    /// The per-request deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The body ceiling in bytes.
    pub fn max_body_bytes(&self) -> u64 {
        self.max_body_bytes
    }

    /// `GET url` and return the body.
    pub async fn get_bytes(&self, url: &str) -> Result<Bytes, FetchError> {
        self.execute(self.client.get(url)).await
    }

    /// `GET url` and decode the body as JSON.
    pub async fn get_json<T>(&self, url: &str) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
    {
        let request = self
            .client
            .get(url)
            .header(ACCEPT, HeaderValue::from_static("application/json"));
        let body = self.execute(request).await?;
        serde_json::from_slice(&body).map_err(|error| FetchError::Decode(error.to_string()))
    }

    /// Sends `request` under the deadline and reads the body within the
    /// ceiling.
    #[instrument(skip_all, level = "debug")]
    pub async fn execute(&self, request: RequestBuilder) -> Result<Bytes, FetchError> {
        let response = request
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|error| self.map_error(error))?;

        let status = response.status();
        if !status.is_success() {
            let text = self.error_text(response).await;
            debug!(status = status.as_u16(), "upstream returned an error status");
            return Err(FetchError::Upstream {
                status: status.as_u16(),
                text,
            });
        }

        if let Some(declared) = response.content_length()
            && declared > self.max_body_bytes
        {
            debug!(declared, limit = self.max_body_bytes, "declared body over limit");
            return Err(FetchError::ResponseTooLarge {
                limit: self.max_body_bytes,
                declared: Some(declared),
            });
        }

        self.read_body(response).await
    }

    async fn read_body(&self, mut response: Response) -> Result<Bytes, FetchError> {
        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| self.map_error(e))? {
            if (body.len() + chunk.len()) as u64 > self.max_body_bytes {
                debug!(limit = self.max_body_bytes, "streamed body over limit, aborting");
                return Err(FetchError::ResponseTooLarge {
                    limit: self.max_body_bytes,
                    declared: None,
                });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }

    /// Reads at most `error_text_bytes` of an error body. Read failures only
    /// shorten the text.
    async fn error_text(&self, mut response: Response) -> String {
        let mut text = BytesMut::new();
        while text.len() < self.error_text_bytes {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    let room = self.error_text_bytes - text.len();
                    text.extend_from_slice(&chunk[..chunk.len().min(room)]);
                }
                Ok(None) | Err(_) => break,
            }
        }
        String::from_utf8_lossy(&text).into_owned()
    }

    fn map_error(&self, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Transport(Arc::new(error))
        }
    }
}

/// Builder for [`HttpFetcher`].
#[derive(Debug)]
pub struct HttpFetcherBuilder {
    client: Client,
    timeout: Duration,
    max_body_bytes: u64,
    error_text_bytes: usize,
}

impl HttpFetcherBuilder {
    /// Sets the per-request deadline, covering the body read.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the body ceiling in bytes.
    pub fn max_body_bytes(mut self, max_body_bytes: u64) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    /// Sets how much of an error response is kept as its text.
    pub fn error_text_bytes(mut self, error_text_bytes: usize) -> Self {
        self.error_text_bytes = error_text_bytes;
        self
    }

    /// Builds the fetcher.
    pub fn build(self) -> HttpFetcher {
        HttpFetcher {
            client: self.client,
            timeout: self.timeout,
            max_body_bytes: self.max_body_bytes,
            error_text_bytes: self.error_text_bytes,
        }
    }
}
