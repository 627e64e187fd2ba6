//! Artwork collaborator.
//!
//! Images are saved next to downloads and cached for embedding. The image
//! CDN does not have every picture at every size, so a failed request for a
//! picture larger than 1200 pixels is retried at 1200x1200.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use exponential_backoff::Backoff;
use futures_util::TryStreamExt;
use regex_lite::Regex;

use crate::{
    config::Overwrite,
    error::{DownloadFailed, Error, ErrorKind, Reason, Result},
    http::Transport,
    streamer::RetryPolicy,
};

#[async_trait]
pub trait Artwork: Send + Sync {
    /// Saves the image at `url` to `path`.
    ///
    /// Returns the path written, or `None` if the image is not available.
    /// An existing file is kept unless `overwrite` says otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadFailed`] with `noSpaceLeft` when the disk is full,
    /// or the error that made the download fail for good.
    async fn save(&self, url: &str, path: &Path, overwrite: Overwrite) -> Result<Option<PathBuf>>;
}

/// Largest size every CDN picture is available at.
const SAFE_SIZE: u32 = 1200;

/// Downloads artwork through a [`Transport`].
pub struct HttpArtwork {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    size: Regex,
}

impl HttpArtwork {
    /// Creates a downloader for artwork.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the size pattern does not compile.
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Result<Self> {
        Ok(Self {
            transport,
            policy,
            size: Regex::new(r"/(\d+)x(\d+)-").map_err(Error::internal)?,
        })
    }

    /// Returns the URL of the same picture at a size the CDN always has, if
    /// `url` asks for a larger one.
    fn smaller(&self, url: &str) -> Option<String> {
        if !url.contains("cdns-images") {
            return None;
        }

        let captures = self.size.captures(url)?;
        let width: u32 = captures.get(1)?.as_str().parse().ok()?;
        if width <= SAFE_SIZE {
            return None;
        }

        let whole = captures.get(0)?.as_str();
        Some(url.replacen(whole, &format!("/{SAFE_SIZE}x{SAFE_SIZE}-"), 1))
    }

    async fn fetch(&self, url: &url::Url) -> Result<Vec<u8>> {
        let response = self.transport.get(url, 0).await?;
        let chunks: Vec<bytes::Bytes> = response.body.try_collect().await?;
        Ok(chunks.concat())
    }
}

#[async_trait]
impl Artwork for HttpArtwork {
    async fn save(&self, url: &str, path: &Path, overwrite: Overwrite) -> Result<Option<PathBuf>> {
        let exists = tokio::fs::metadata(path)
            .await
            .is_ok_and(|metadata| metadata.is_file());
        if exists
            && !matches!(
                overwrite,
                Overwrite::Overwrite | Overwrite::OnlyTags | Overwrite::KeepBoth
            )
        {
            return Ok(Some(path.to_owned()));
        }

        let backoff = Backoff::new(
            self.policy.retries.saturating_add(1),
            self.policy.min_delay,
            self.policy.max_delay,
        );
        let mut delays = (&backoff).into_iter();
        let mut url = url.to_owned();

        let image = loop {
            let parsed = url::Url::parse(&url)?;
            let error = match self.fetch(&parsed).await {
                Ok(image) => break image,
                Err(e) => e,
            };

            match error.kind {
                ErrorKind::FailedPrecondition => {
                    if let Some(smaller) = self.smaller(&url) {
                        warn!("{url} not available, trying {SAFE_SIZE}x{SAFE_SIZE}");
                        url = smaller;
                        continue;
                    }
                    error!("couldn't download {url}: {error}");
                    return Ok(None);
                }
                ErrorKind::Aborted
                | ErrorKind::DeadlineExceeded
                | ErrorKind::DataLoss
                | ErrorKind::Unavailable => {
                    let Some(Some(delay)) = delays.next() else {
                        return Err(error);
                    };
                    warn!("{url}: {error}, retrying in {}ms", delay.as_millis());
                    tokio::time::sleep(delay).await;
                }
                _ => return Err(error),
            }
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if let Err(e) = tokio::fs::write(path, &image).await {
            let error = Error::from(e);
            if tokio::fs::remove_file(path).await.is_ok() {
                debug!("removed partial {}", path.display());
            }
            if error.is_storage_full() {
                return Err(DownloadFailed::new(Reason::NoSpaceLeft).into());
            }
            return Err(error);
        }

        Ok(Some(path.to_owned()))
    }
}
