//! Download jobs and their bookkeeping.
//!
//! A job wraps either one track ([`JobKind::Single`]) or an ordered list of
//! tracks ([`JobKind::Collection`]). Workers of a batch update the job
//! concurrently, so all counters live behind a single mutex, and the
//! cancellation flag is a [`CancellationToken`] that is polled at the
//! pipeline's check points.
//!
//! # Progress
//!
//! Progress is a percentage accumulated as payload bytes arrive:
//! * A single job reports the position within its only payload
//! * A collection adds each chunk's share of its item, divided by the
//!   number of items
//!
//! Updates are forwarded to the listener only when the rounded percentage
//! changed and is even.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
    events::{Event, Listener, QueueUpdate},
    protocol::media::Format,
    track::{ItemData, Track},
};

/// Lifecycle of a job.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub enum JobState {
    #[default]
    Queued,
    Running,
    Completed,
    Canceled,
}

/// Tracks of a job.
#[derive(Clone, Debug)]
pub enum JobKind {
    Single(Track),
    Collection(Vec<Track>),
}

/// Where an error was raised.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorScope {
    /// Downloading an item.
    Track,
    /// Post-processing a job.
    Post,
}

/// Error recorded in a job's error log.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ItemError {
    pub message: String,
    /// Stable identifier of a known failure reason.
    pub errid: Option<String>,
    pub data: ItemData,
    pub scope: ErrorScope,
    /// Post-processing step that failed.
    pub position: Option<String>,
}

impl fmt::Display for ItemError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.position {
            Some(position) => write!(f, "{position} {}: {}", self.data, self.message),
            None => write!(f, "{}: {}", self.data, self.message),
        }
    }
}

/// A file written by a job.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct FileRecord {
    pub data: ItemData,
    pub path: PathBuf,
    /// Path relative to the job's extras directory.
    pub filename: String,
    pub searched: bool,
}

/// Descriptive fields of a job.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct JobInfo {
    /// Kind of link the job was created from: `track`, `album`, `playlist`,
    /// or the name of a plugin.
    #[serde(rename = "type")]
    pub typ: String,
    pub source_id: String,
    pub bitrate: Format,
    pub title: String,
    pub artist: String,
    pub cover: String,
}

#[derive(Debug, Default)]
struct Ledger {
    downloaded: usize,
    failed: usize,
    progress: u8,
    progress_next: f64,
    errors: Vec<ItemError>,
    files: Vec<FileRecord>,
    extras_path: Option<PathBuf>,
    state: JobState,
}

/// Serialisable snapshot of a job.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct JobSummary {
    pub id: String,
    #[serde(flatten)]
    pub info: JobInfo,
    pub size: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub progress: u8,
    pub state: JobState,
    pub errors: Vec<ItemError>,
    pub files: Vec<FileRecord>,
    pub extras_path: Option<PathBuf>,
}

/// A unit of download work.
#[derive(Debug)]
pub struct DownloadJob {
    pub info: JobInfo,
    pub kind: JobKind,
    /// Directory downloads are written under.
    pub root: PathBuf,
    ledger: Mutex<Ledger>,
    cancel: CancellationToken,
}

impl DownloadJob {
    #[must_use]
    pub fn new(info: JobInfo, kind: JobKind, root: impl Into<PathBuf>) -> Self {
        Self {
            info,
            kind,
            root: root.into(),
            ledger: Mutex::new(Ledger::default()),
            cancel: CancellationToken::new(),
        }
    }

    /// Unique id composed of type, source id and bitrate code.
    #[must_use]
    pub fn id(&self) -> String {
        format!(
            "{}_{}_{}",
            self.info.typ,
            self.info.source_id,
            self.info.bitrate.code()
        )
    }

    /// Number of items.
    #[must_use]
    pub fn size(&self) -> usize {
        match &self.kind {
            JobKind::Single(_) => 1,
            JobKind::Collection(tracks) => tracks.len(),
        }
    }

    #[must_use]
    pub fn is_collection(&self) -> bool {
        matches!(self.kind, JobKind::Collection(_))
    }

    /// Returns the ledger, or when the lock is poisoned because a worker
    /// panicked, the ledger as that worker left it.
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token that is cancelled together with the job.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn state(&self) -> JobState {
        self.ledger().state
    }

    pub fn set_state(&self, state: JobState) {
        self.ledger().state = state;
    }

    #[must_use]
    pub fn progress(&self) -> u8 {
        self.ledger().progress
    }

    #[must_use]
    pub fn downloaded(&self) -> usize {
        self.ledger().downloaded
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.ledger().failed
    }

    #[must_use]
    pub fn errors(&self) -> Vec<ItemError> {
        self.ledger().errors.clone()
    }

    #[must_use]
    pub fn files(&self) -> Vec<FileRecord> {
        self.ledger().files.clone()
    }

    #[must_use]
    pub fn extras_path(&self) -> Option<PathBuf> {
        self.ledger().extras_path.clone()
    }

    /// Sets the extras directory unless one was set before.
    pub fn offer_extras_path(&self, path: &Path) {
        self.ledger().extras_path.get_or_insert_with(|| path.to_owned());
    }

    /// Forwards the rounded progress if it changed and is even.
    fn update_progress(&self, listener: &dyn Listener) {
        let update = {
            let mut ledger = self.ledger();
            #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let rounded = ledger.progress_next.round().clamp(0.0, 100.0) as u8;
            if rounded != ledger.progress && rounded % 2 == 0 {
                ledger.progress = rounded;
                Some(rounded)
            } else {
                None
            }
        };

        if let Some(progress) = update {
            listener.send(Event::QueueUpdate {
                job: self.id(),
                update: QueueUpdate::Progress(progress),
            });
        }
    }

    /// Accounts for a chunk of `len` bytes that brought the item to
    /// `position` out of `total` bytes.
    pub fn chunk_progress(&self, len: u64, position: u64, total: u64, listener: &dyn Listener) {
        if total == 0 {
            return;
        }

        {
            let mut ledger = self.ledger();
            #[expect(clippy::cast_precision_loss)]
            match &self.kind {
                JobKind::Single(_) => {
                    ledger.progress_next = position as f64 / total as f64 * 100.0;
                }
                JobKind::Collection(tracks) => {
                    ledger.progress_next +=
                        len as f64 / total as f64 / tracks.len().max(1) as f64 * 100.0;
                }
            }
        }
        self.update_progress(listener);
    }

    /// Accounts for an item that is done, whether it was written or not.
    pub fn complete_track_progress(&self, listener: &dyn Listener) {
        self.adjust_track_progress(true);
        self.update_progress(listener);
    }

    /// Withdraws the contribution of an item that is going to be
    /// downloaded again.
    pub fn remove_track_progress(&self, listener: &dyn Listener) {
        self.adjust_track_progress(false);
        self.update_progress(listener);
    }

    fn adjust_track_progress(&self, complete: bool) {
        let mut ledger = self.ledger();
        #[expect(clippy::cast_precision_loss)]
        match &self.kind {
            JobKind::Single(_) => ledger.progress_next = if complete { 100.0 } else { 0.0 },
            JobKind::Collection(tracks) => {
                let share = 100.0 / tracks.len().max(1) as f64;
                if complete {
                    ledger.progress_next += share;
                } else {
                    ledger.progress_next -= share;
                }
            }
        }
    }

    pub fn record_download(&self, file: FileRecord) {
        let mut ledger = self.ledger();
        ledger.downloaded += 1;
        ledger.files.push(file);
    }

    pub fn record_failure(&self, error: ItemError) {
        let mut ledger = self.ledger();
        ledger.failed += 1;
        ledger.errors.push(error);
    }

    pub fn record_post_error(&self, error: ItemError) {
        self.ledger().errors.push(error);
    }

    #[must_use]
    pub fn summary(&self) -> JobSummary {
        let ledger = self.ledger();
        JobSummary {
            id: self.id(),
            info: self.info.clone(),
            size: self.size(),
            downloaded: ledger.downloaded,
            failed: ledger.failed,
            progress: ledger.progress,
            state: ledger.state,
            errors: ledger.errors.clone(),
            files: ledger.files.clone(),
            extras_path: ledger.extras_path.clone(),
        }
    }
}

impl fmt::Display for DownloadJob {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} \"{}", self.id(), self.info.title)?;
        if !self.info.artist.is_empty() {
            write!(f, " by {}", self.info.artist)?;
        }
        write!(f, "\"")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ChannelListener;

    fn info(typ: &str) -> JobInfo {
        JobInfo {
            typ: typ.to_owned(),
            source_id: "302127".to_owned(),
            bitrate: Format::FLAC,
            title: "Discovery".to_owned(),
            ..JobInfo::default()
        }
    }

    #[test]
    fn id_combines_type_source_and_bitrate() {
        let job = DownloadJob::new(info("album"), JobKind::Collection(vec![]), "/tmp");
        assert_eq!(job.id(), "album_302127_9");
    }

    #[test]
    fn only_even_changes_are_reported() {
        let listener = ChannelListener::new();
        let job = DownloadJob::new(info("track"), JobKind::Single(Track::default()), "/tmp");

        job.chunk_progress(10, 10, 1000, &listener);
        job.chunk_progress(10, 15, 1000, &listener);
        job.chunk_progress(10, 21, 1000, &listener);
        job.chunk_progress(10, 30, 1000, &listener);
        job.chunk_progress(10, 1000, 1000, &listener);

        assert_eq!(listener.progress(), vec![2, 100]);
        assert_eq!(job.progress(), 100);
    }

    #[test]
    fn collection_items_contribute_their_share() {
        let listener = ChannelListener::new();
        let tracks = vec![Track::default(); 5];
        let job = DownloadJob::new(info("album"), JobKind::Collection(tracks), "/tmp");

        job.chunk_progress(500, 500, 1000, &listener);
        assert_eq!(job.progress(), 10);

        job.complete_track_progress(&listener);
        assert_eq!(job.progress(), 30);

        job.remove_track_progress(&listener);
        assert_eq!(job.progress(), 10);
        assert_eq!(listener.progress(), vec![10, 30, 10]);
    }

    #[test]
    fn summary_reflects_ledger() {
        let job = DownloadJob::new(info("album"), JobKind::Collection(vec![]), "/music");
        job.record_failure(ItemError {
            message: "Track not yet encoded!".to_owned(),
            errid: Some("notEncoded".to_owned()),
            data: ItemData::default(),
            scope: ErrorScope::Track,
            position: None,
        });
        job.offer_extras_path(Path::new("/music/Daft Punk"));
        job.offer_extras_path(Path::new("/music/elsewhere"));

        let summary = job.summary();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.extras_path, Some(PathBuf::from("/music/Daft Punk")));

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["type"], "album");
        assert_eq!(json["bitrate"], "FLAC");
    }
}
