//! Events emitted while jobs are downloaded.
//!
//! The orchestrator pushes events to an injected [`Listener`] for UI or log
//! rendering. Every event names the job it belongs to by its id
//! (`{type}_{id}_{bitrate}`), and item-level events carry the identity of the
//! track concerned.
//!
//! # Example
//!
//! ```rust
//! use deeload::events::{Event, QueueUpdate};
//!
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let downloader = Downloader::new(catalog, transport, library, artwork, Arc::new(tx), config);
//!
//! while let Some(event) = rx.recv().await {
//!     if let Event::QueueUpdate { update: QueueUpdate::Progress(p), .. } = event {
//!         println!("{p}%");
//!     }
//! }
//! ```

use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::{job::ItemError, track::ItemData};

/// Progress of a single item through its pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemState {
    GetTags,
    GotTags,
    GetBitrate,
    /// The requested format was unavailable and a lower one is tried.
    BitrateFallback,
    GotBitrate,
    GetAlbumArt,
    GotAlbumArt,
    /// The payload started streaming. Fresh downloads carry the declared
    /// size, resumed ones the range the server answered with.
    Downloading {
        resumed: bool,
        size: Option<u64>,
        range: Option<String>,
    },
    Downloaded,
    AlreadyDownloaded,
    Tagging,
    Tagged,
    /// A replacement was found through metadata search.
    SearchFallback,
}

/// How a failing item is going to be recovered.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Solution {
    Fallback,
    Search,
}

/// Change to a job's entry in a download queue.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum QueueUpdate {
    /// Aggregate progress in percent. Only even values are reported.
    Progress(u8),

    Downloaded {
        path: PathBuf,
        extras: Option<PathBuf>,
    },

    /// An item failed for good.
    Failed(ItemError),

    /// A post-processing step failed.
    PostFailed(ItemError),
}

/// Events that can be emitted by the downloader.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Event {
    DownloadInfo {
        job: String,
        item: ItemData,
        state: ItemState,
    },

    /// An item failed and is being recovered.
    DownloadWarn {
        job: String,
        item: ItemData,
        reason: String,
        solution: Solution,
    },

    QueueUpdate {
        job: String,
        update: QueueUpdate,
    },

    /// The running item of a cancelled job stopped. Sent once per job.
    CurrentItemCancelled { job: String },

    RemovedFromQueue { job: String },

    FinishDownload { job: String },
}

/// Push-style event sink.
pub trait Listener: Send + Sync {
    fn send(&self, event: Event);
}

/// Discards all events.
impl Listener for () {
    fn send(&self, _event: Event) {}
}

/// Forwards events to a channel. Events sent after the receiver was dropped
/// are discarded.
impl Listener for UnboundedSender<Event> {
    fn send(&self, event: Event) {
        if let Err(e) = UnboundedSender::send(self, event) {
            trace!("listener gone: {e}");
        }
    }
}

/// Renders events through the logging facade.
#[derive(Copy, Clone, Debug, Default)]
pub struct LogListener;

impl Listener for LogListener {
    fn send(&self, event: Event) {
        match event {
            Event::DownloadInfo { job, item, state } => match state {
                ItemState::Downloading {
                    resumed: false,
                    size,
                    ..
                } => info!("{job} {item} downloading {} bytes", size.unwrap_or_default()),
                ItemState::Downloading {
                    resumed: true,
                    range,
                    ..
                } => info!(
                    "{job} {item} resuming at {}",
                    range.as_deref().unwrap_or("unknown range")
                ),
                ItemState::BitrateFallback => info!("{job} {item} fallback to lower bitrate"),
                ItemState::Downloaded | ItemState::AlreadyDownloaded | ItemState::Tagged => {
                    info!("{job} {item} {state:?}");
                }
                state => debug!("{job} {item} {state:?}"),
            },
            Event::DownloadWarn {
                job,
                item,
                reason,
                solution,
            } => warn!("{job} {item} {reason}, trying {solution:?}"),
            Event::QueueUpdate { job, update } => match update {
                QueueUpdate::Progress(progress) => debug!("{job} {progress}%"),
                QueueUpdate::Downloaded { path, .. } => info!("{job} saved {}", path.display()),
                QueueUpdate::Failed(error) | QueueUpdate::PostFailed(error) => {
                    error!("{job} {error}");
                }
            },
            Event::CurrentItemCancelled { job } => info!("{job} cancelled"),
            Event::RemovedFromQueue { job } => debug!("{job} removed from queue"),
            Event::FinishDownload { job } => info!("{job} finished"),
        }
    }
}
