//! Streaming of track payloads.
//!
//! [`TrackStreamer`] downloads the payload at a track's selected URL into a
//! sink, decrypting it on the way. The body is regrouped into chunks of
//! [`ChunkCipher::CHUNK_SIZE`] bytes, which is the unit the cipher works on.
//! A chunk is written to the sink only once it is complete, so that the
//! number of source bytes committed is always aligned on a chunk boundary.
//!
//! # Resumption
//!
//! When the connection fails mid-stream, the request is repeated from the
//! committed offset with a `Range` header. Transport security failures are
//! retried right away; resets, timeouts and truncated bodies after an
//! exponential backoff delay. Other failures are final.

use std::time::Duration;

use exponential_backoff::Backoff;
use futures_util::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use url::Url;

use crate::{
    config::Config,
    decrypt::{self, ChunkCipher},
    error::{EmptyPayload, Error, ErrorKind, Result},
    events::{Event, ItemState, Listener},
    http::{self, Transport},
    job::DownloadJob,
    track::Track,
};

/// Bounds of the resumption loop.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of times a stream is resumed before giving up.
    pub retries: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for RetryPolicy {
    fn from(config: &Config) -> Self {
        Self {
            retries: config.stream_retries,
            min_delay: config.retry_min_delay,
            max_delay: config.retry_max_delay,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Retry {
    Immediately,
    AfterDelay,
}

impl Retry {
    fn classify(error: &Error) -> Option<Self> {
        if http::is_tls_error(error) {
            return Some(Self::Immediately);
        }

        match error.kind {
            ErrorKind::Aborted
            | ErrorKind::DeadlineExceeded
            | ErrorKind::DataLoss
            | ErrorKind::Unavailable => Some(Self::AfterDelay),
            _ => None,
        }
    }
}

/// Downloads and decrypts payloads.
pub struct TrackStreamer<'a> {
    transport: &'a dyn Transport,
    listener: &'a dyn Listener,
    policy: RetryPolicy,
}

impl<'a> TrackStreamer<'a> {
    #[must_use]
    pub fn new(transport: &'a dyn Transport, listener: &'a dyn Listener, policy: RetryPolicy) -> Self {
        Self {
            transport,
            listener,
            policy,
        }
    }

    /// Streams the payload of `track` into `sink`, starting `start` bytes
    /// into the payload, and returns the payload offset reached.
    ///
    /// `start` should be a multiple of [`ChunkCipher::CHUNK_SIZE`] for
    /// encrypted payloads.
    ///
    /// # Errors
    ///
    /// Returns:
    /// - `Cancelled` when the job was cancelled
    /// - `FailedPrecondition` when the track has no URL, the server refuses
    ///   the request or declares an empty payload
    /// - `ResourceExhausted` when the sink is out of space
    /// - the last transient error once the retries are used up
    pub async fn stream<W>(
        &self,
        sink: &mut W,
        track: &Track,
        job: &DownloadJob,
        start: u64,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let url = track
            .download_url()
            .cloned()
            .ok_or_else(|| Error::failed_precondition(format!("{track} has no stream url")))?;

        let backoff = Backoff::new(
            self.policy.retries.saturating_add(1),
            self.policy.min_delay,
            self.policy.max_delay,
        );
        let mut delays = (&backoff).into_iter();
        let mut offset = start;

        loop {
            Self::check_cancelled(job)?;

            let error = match self.attempt(sink, track, job, &url, &mut offset).await {
                Ok(()) => return Ok(offset),
                Err(e) => e,
            };

            let Some(retry) = Retry::classify(&error) else {
                return Err(error);
            };
            let Some(Some(delay)) = delays.next() else {
                warn!("{track}: giving up after {} retries: {error}", self.policy.retries);
                return Err(error);
            };

            match retry {
                Retry::Immediately => {
                    warn!("{track}: {error}, resuming at {offset}");
                }
                Retry::AfterDelay => {
                    warn!(
                        "{track}: {error}, resuming at {offset} in {}ms",
                        delay.as_millis()
                    );
                    let token = job.cancellation_token();
                    tokio::select! {
                        () = token.cancelled() => return Err(Self::cancelled(job)),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    fn cancelled(job: &DownloadJob) -> Error {
        Error::cancelled(format!("{} was cancelled", job.id()))
    }

    fn check_cancelled(job: &DownloadJob) -> Result<()> {
        if job.is_cancelled() {
            return Err(Self::cancelled(job));
        }
        Ok(())
    }

    /// Makes one request, advancing `offset` past every chunk written.
    async fn attempt<W>(
        &self,
        sink: &mut W,
        track: &Track,
        job: &DownloadJob,
        url: &Url,
        offset: &mut u64,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let start = *offset;
        let response = self.transport.get(url, start).await?;

        // A server that ignores the range answers with the whole payload.
        let mut skip = 0;
        let mut remaining = response.content_length;
        if start > 0 {
            match response.content_range.as_deref() {
                None => {
                    debug!("{track}: range ignored, skipping {start} bytes");
                    skip = start;
                    remaining = remaining.map(|length| length.saturating_sub(start));
                }
                Some(range) if range_start(range) == Some(start) => {}
                Some(range) => {
                    return Err(Error::out_of_range(format!(
                        "asked for bytes from {start} but got {range}"
                    )));
                }
            }
        }

        if remaining == Some(0) {
            return Err(Error::failed_precondition(EmptyPayload));
        }
        let total = remaining.map_or(0, |remaining| remaining + start);

        let state = if start > 0 {
            ItemState::Downloading {
                resumed: true,
                size: None,
                range: response.content_range.clone(),
            }
        } else {
            ItemState::Downloading {
                resumed: false,
                size: remaining,
                range: None,
            }
        };
        self.listener.send(Event::DownloadInfo {
            job: job.id(),
            item: track.item_data(),
            state,
        });

        let crypted = decrypt::is_crypted(url);
        let mut cipher = if start > 0 {
            ChunkCipher::resumed(track.id, crypted)
        } else {
            ChunkCipher::new(track.id, crypted)
        };

        let mut body = response.body;
        let mut pending = Vec::with_capacity(2 * ChunkCipher::CHUNK_SIZE);
        let mut received = 0u64;

        while let Some(bytes) = body.next().await {
            Self::check_cancelled(job)?;

            let mut bytes = bytes?;
            if skip > 0 {
                let skipped = bytes.len().min(usize::try_from(skip).unwrap_or(usize::MAX));
                skip -= skipped as u64;
                bytes = bytes.slice(skipped..);
            }
            received += bytes.len() as u64;
            pending.extend_from_slice(&bytes);

            while pending.len() >= ChunkCipher::CHUNK_SIZE {
                let chunk = pending.drain(..ChunkCipher::CHUNK_SIZE).collect();
                self.commit(sink, &mut cipher, chunk, job, offset, total)
                    .await?;
            }
        }

        if let Some(remaining) = remaining {
            if received < remaining {
                return Err(Error::data_loss(format!(
                    "body ended after {received} of {remaining} bytes"
                )));
            }
        }

        if !pending.is_empty() {
            self.commit(sink, &mut cipher, pending, job, offset, total)
                .await?;
        }
        sink.flush().await?;

        Ok(())
    }

    async fn commit<W>(
        &self,
        sink: &mut W,
        cipher: &mut ChunkCipher,
        mut chunk: Vec<u8>,
        job: &DownloadJob,
        offset: &mut u64,
        total: u64,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let len = chunk.len() as u64;
        cipher.process(&mut chunk)?;
        sink.write_all(&chunk).await?;

        *offset += len;
        job.chunk_progress(len, *offset, total, self.listener);
        Ok(())
    }
}

/// First byte offset of a `Content-Range` value like `bytes 100-199/200`.
fn range_start(range: &str) -> Option<u64> {
    let range = range.trim().strip_prefix("bytes")?.trim_start();
    let (first, _) = range.split_once('-')?;
    first.trim().parse().ok()
}
