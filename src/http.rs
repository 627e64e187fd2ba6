//! HTTP transport for stream and artwork downloads.
//!
//! The retrieval core only needs two capabilities, modelled by
//! [`Transport`]:
//! * A streaming GET that can resume at a byte offset
//! * A HEAD probe that tells whether a payload exists and how large it is
//!
//! [`Client`] implements both over `reqwest`, with:
//! * A fixed desktop browser User-Agent
//! * Connect and read timeouts from the configuration
//! * Rate limiting of probes so that best-effort resolution does not hammer
//!   the CDN
//!
//! # Error Classification
//!
//! Transport failures are mapped so that the streamer can tell what to
//! retry:
//! * TLS handshake or certificate failures carry a [`TlsError`]
//! * Connection resets, timeouts and truncated bodies map to `Aborted`,
//!   `DeadlineExceeded`, `DataLoss` or `Unavailable`
//! * HTTP status failures map to `FailedPrecondition`
//!
//! # Example
//!
//! ```rust
//! use deeload::http::{Client, Transport};
//!
//! let client = Client::new(&config)?;
//! let response = client.get(&url, 0).await?;
//! println!("{:?} bytes", response.content_length);
//! ```

use std::{error::Error as _, num::NonZeroU32, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream::BoxStream, StreamExt, TryStreamExt};
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{
    header::{HeaderMap, CONTENT_LENGTH, CONTENT_RANGE, RANGE},
    Url,
};
use thiserror::Error;

use crate::{
    config::Config,
    error::{Error, ErrorKind, Result},
};

/// User-Agent sent with every request.
pub const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/79.0.3945.130 Safari/537.36";

/// Marker for failures in the transport security layer.
#[derive(Clone, Debug, Error)]
#[error("transport security failure: {0}")]
pub struct TlsError(pub String);

/// Whether `error` was caused by the transport security layer.
#[must_use]
pub fn is_tls_error(error: &Error) -> bool {
    error.downcast::<TlsError>().is_some()
}

/// A response whose body is still to be read.
pub struct Response {
    /// Declared length of the body.
    pub content_length: Option<u64>,

    /// Range descriptor of a resumed response.
    pub content_range: Option<String>,

    pub body: BoxStream<'static, Result<Bytes>>,
}

/// Streamable HTTP capability.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Starts a GET request for `url`, asking for the bytes from `offset`
    /// onwards when it is not zero.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server answers with an
    /// error status.
    async fn get(&self, url: &Url, offset: u64) -> Result<Response>;

    /// Probes `url`. Returns the declared length, or `None` if the server
    /// answers with an error status.
    ///
    /// # Errors
    ///
    /// Returns an error if the request itself fails.
    async fn head(&self, url: &Url) -> Result<Option<u64>>;
}

/// HTTP client with rate limited probes.
pub struct Client {
    /// Client for payload requests.
    inner: reqwest::Client,

    /// Rate limiter for HEAD probes.
    rate_limiter: DefaultDirectRateLimiter,
}

impl Client {
    /// Probe rate limit interval.
    const RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(5);

    /// Maximum probes per interval.
    const RATE_LIMIT_CALLS_PER_INTERVAL: u8 = 50;

    /// Duration to keep idle connections alive.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .user_agent(&config.user_agent)
            .build()?;

        let replenish_interval =
            Self::RATE_LIMIT_INTERVAL / u32::from(Self::RATE_LIMIT_CALLS_PER_INTERVAL);
        let burst = NonZeroU32::new(Self::RATE_LIMIT_CALLS_PER_INTERVAL.into())
            .ok_or_else(|| Error::internal("calls per interval is zero"))?;
        let quota = Quota::with_period(replenish_interval)
            .ok_or_else(|| Error::internal("quota time interval is zero"))?
            .allow_burst(burst);

        Ok(Self {
            inner: http_client,
            rate_limiter: governor::RateLimiter::direct(quota),
        })
    }

    /// Maps a `reqwest` error, singling out transport security failures.
    fn classify(error: reqwest::Error) -> Error {
        let mut source = error.source();
        while let Some(cause) = source {
            let message = cause.to_string().to_lowercase();
            if message.contains("tls") || message.contains("certificate") {
                return Error::new(ErrorKind::Unavailable, TlsError(message));
            }
            source = cause.source();
        }

        Error::from(error)
    }

    fn header(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<&str> {
        headers.get(name).and_then(|value| value.to_str().ok())
    }
}

#[async_trait]
impl Transport for Client {
    async fn get(&self, url: &Url, offset: u64) -> Result<Response> {
        let mut request = self.inner.get(url.clone());
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }

        let response = request
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(Self::classify)?;

        let headers = response.headers();
        let content_length =
            Self::header(headers, CONTENT_LENGTH).and_then(|value| value.trim().parse().ok());
        let content_range = Self::header(headers, CONTENT_RANGE).map(ToOwned::to_owned);
        trace!("GET {url}: length {content_length:?}, range {content_range:?}");

        Ok(Response {
            content_length,
            content_range,
            body: response.bytes_stream().map_err(Self::classify).boxed(),
        })
    }

    async fn head(&self, url: &Url) -> Result<Option<u64>> {
        self.rate_limiter.until_ready().await;

        let response = self
            .inner
            .head(url.clone())
            .send()
            .await
            .map_err(Self::classify)?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            debug!("HEAD {url}: {status}");
            return Ok(None);
        }

        let length = Self::header(response.headers(), CONTENT_LENGTH)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or_default();
        Ok(Some(length))
    }
}
