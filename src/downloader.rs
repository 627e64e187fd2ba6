//! Download orchestration.
//!
//! [`Downloader`] drives jobs through their pipeline. For each item:
//!
//! 1. Resolve the track details through the catalog
//! 2. Reject tracks that were not encoded yet
//! 3. Select a format
//! 4. Decide on a destination and fetch the embedded artwork
//! 5. Apply the overwrite policy
//! 6. Stream the payload and tag the file
//!
//! An item that fails with a [`DownloadFailed`] carrying its track is
//! retried with an alternative version: the fallback track, a track with
//! the same ISRC on another album, or a track found by searching its
//! metadata. Only when all of those are exhausted the item fails for good.
//!
//! Collections are downloaded with a bounded number of items in flight.
//! Failed items never abort their siblings, and results are reported in
//! the order of the collection regardless of completion order.
//!
//! After all items are done, job-wide files are written: artwork, error
//! and search logs, a playlist manifest, and the configured command is run.
//! Failures there are reported but never fail the job.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use futures_util::{stream, StreamExt};
use tokio::{fs, process::Command};

use crate::{
    artwork::Artwork,
    catalog::Catalog,
    config::{Config, Overwrite},
    error::{DownloadFailed, Error, ErrorKind, Reason, Result},
    events::{Event, ItemState, Listener, QueueUpdate, Solution},
    http::Transport,
    job::{DownloadJob, ErrorScope, FileRecord, ItemError, JobKind, JobState},
    library::{self, Library, NotFlac},
    metadata::ImageFormat,
    protocol::media::Format,
    selector::{FormatSelector, SelectionError},
    streamer::{RetryPolicy, TrackStreamer},
    track::{ItemData, Track, TrackId},
};

/// Artwork to save after the job is done.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArtRequest {
    /// URLs with the extension to save them with.
    pub urls: Vec<(String, &'static str)>,
    pub dir: PathBuf,
    /// File name without extension.
    pub filename: String,
}

/// Outcome of one item of a job.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ItemResult {
    pub data: ItemData,
    pub path: Option<PathBuf>,
    /// Path relative to the extras directory.
    pub filename: Option<String>,
    pub searched: bool,
    pub error: Option<ItemError>,
    pub album_art: Option<ArtRequest>,
    pub artist_art: Option<ArtRequest>,
}

/// Downloads jobs.
pub struct Downloader {
    catalog: Arc<dyn Catalog>,
    transport: Arc<dyn Transport>,
    library: Arc<dyn Library>,
    artwork: Arc<dyn Artwork>,
    listener: Arc<dyn Listener>,
    config: Config,
}

impl Downloader {
    #[must_use]
    pub fn new(
        catalog: Arc<dyn Catalog>,
        transport: Arc<dyn Transport>,
        library: Arc<dyn Library>,
        artwork: Arc<dyn Artwork>,
        listener: Arc<dyn Listener>,
        config: Config,
    ) -> Self {
        Self {
            catalog,
            transport,
            library,
            artwork,
            listener,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Downloads all items of `job`.
    ///
    /// Returns one result per item, in order. Items that observed the
    /// cancellation of the job have no result.
    pub async fn start(&self, job: &DownloadJob) -> Vec<Option<ItemResult>> {
        Run::new(self, job).start().await
    }
}

/// State of one job being downloaded.
struct Run<'a> {
    downloader: &'a Downloader,
    job: &'a DownloadJob,
    job_id: String,
    /// Playlist artwork, taken from the first item that has one.
    playlist_art: Mutex<Option<Vec<(String, &'static str)>>>,
}

/// Outcome of a single pass through the item pipeline.
enum Attempt {
    Done(ItemResult),
    /// Download again, the format that was tried is not available.
    Again(Track),
}

impl<'a> Run<'a> {
    fn new(downloader: &'a Downloader, job: &'a DownloadJob) -> Self {
        Self {
            downloader,
            job,
            job_id: job.id(),
            playlist_art: Mutex::new(None),
        }
    }

    fn config(&self) -> &Config {
        &self.downloader.config
    }

    fn listener(&self) -> &dyn Listener {
        &*self.downloader.listener
    }

    fn send(&self, event: Event) {
        self.downloader.listener.send(event);
    }

    fn info(&self, item: &ItemData, state: ItemState) {
        trace!("{} {item} {state:?}", self.job_id);
        self.send(Event::DownloadInfo {
            job: self.job_id.clone(),
            item: item.clone(),
            state,
        });
    }

    fn warn(&self, item: &ItemData, failed: &DownloadFailed, solution: Solution) {
        warn!("{item} {} trying {solution:?}", failed.message());
        self.send(Event::DownloadWarn {
            job: self.job_id.clone(),
            item: item.clone(),
            reason: failed.errid(),
            solution,
        });
    }

    async fn start(&self) -> Vec<Option<ItemResult>> {
        info!("starting {}", self.job);
        self.job.set_state(JobState::Running);

        let results = match &self.job.kind {
            JobKind::Single(track) => {
                let result = self.download_wrapper(track.clone()).await;
                if let Some(result) = &result {
                    if !self.job.is_cancelled() {
                        self.after_single(result).await;
                    }
                }
                vec![result]
            }
            JobKind::Collection(tracks) => {
                let mut results: Vec<Option<ItemResult>> = vec![None; tracks.len()];

                let items = tracks.iter().cloned().enumerate().map(|(i, mut track)| {
                    track.position.get_or_insert(i);
                    (i, track)
                });
                let mut pending = stream::iter(items)
                    .map(|(i, track)| async move { (i, self.download_wrapper(track).await) })
                    .buffer_unordered(self.config().queue_concurrency.max(1));
                while let Some((i, result)) = pending.next().await {
                    results[i] = result;
                }

                if !self.job.is_cancelled() {
                    self.after_collection(&results).await;
                }
                results
            }
        };

        if self.job.is_cancelled() {
            info!("{} cancelled", self.job);
            self.job.set_state(JobState::Canceled);
            self.send(Event::CurrentItemCancelled {
                job: self.job_id.clone(),
            });
            self.send(Event::RemovedFromQueue {
                job: self.job_id.clone(),
            });
        } else {
            info!(
                "{} finished: {} downloaded, {} failed",
                self.job,
                self.job.downloaded(),
                self.job.failed()
            );
            self.job.set_state(JobState::Completed);
            self.send(Event::FinishDownload {
                job: self.job_id.clone(),
            });
        }

        results
    }

    /// Downloads `track`, trying alternatives on failure. Returns `None`
    /// when the job was cancelled.
    async fn download_wrapper(&self, track: Track) -> Option<ItemResult> {
        let item = track.item_data();
        let mut current = track;
        let mut visited = HashSet::from([current.id]);

        loop {
            let error = match self.download(current.clone()).await {
                Ok(result) => return Some(result),
                Err(e) if e.is_cancelled() => return None,
                Err(e) => e,
            };

            let failed = match error.into_inner::<DownloadFailed>() {
                Ok(failed) => failed,
                Err(error) => {
                    let message = error.to_string();
                    return Some(self.fail(item, message, None));
                }
            };

            let Some(failed_track) = failed.track.as_deref() else {
                return Some(self.fail_download(item, &failed));
            };

            match self.alternative(&item, failed_track, &failed, &mut visited).await {
                Ok(Some(alternative)) => current = alternative,
                Ok(None) => {
                    let failed = failed.clone().exhausted();
                    return Some(self.fail_download(item, &failed));
                }
                Err(e) if e.is_cancelled() => return None,
                Err(e) => {
                    let message = e.to_string();
                    return Some(self.fail(item, message, None));
                }
            }
        }
    }

    /// Looks for another version of `track`. Warnings are reported for the
    /// requested `item`.
    async fn alternative(
        &self,
        item: &ItemData,
        track: &Track,
        failed: &DownloadFailed,
        visited: &mut HashSet<TrackId>,
    ) -> Result<Option<Track>> {
        let catalog = &*self.downloader.catalog;

        if let Some(fallback_id) = track.fallback_id.filter(|id| visited.insert(*id)) {
            self.warn(item, failed, Solution::Fallback);
            let data = catalog.track_with_fallback(fallback_id).await?;
            return Ok(Some(track.with_essentials(&data)));
        }

        if self.config().fallback_isrc && !track.isrc.is_empty() {
            let mut albums = track.albums_fallback.clone();
            while let Some(album_id) = albums.pop() {
                let tracks = match catalog.album_tracks(album_id).await {
                    Ok(tracks) => tracks,
                    Err(e) => {
                        debug!("{item} album {album_id} not available: {e}");
                        continue;
                    }
                };

                let Some(found) = tracks
                    .iter()
                    .find(|candidate| candidate.isrc == track.isrc && !visited.contains(&candidate.id))
                else {
                    continue;
                };

                visited.insert(found.id);
                self.warn(item, failed, Solution::Fallback);
                let data = catalog.track_with_fallback(found.id).await?;
                let mut alternative = track.with_essentials(&data);
                alternative.albums_fallback = albums;
                return Ok(Some(alternative));
            }
        }

        if self.config().fallback_search && !track.searched {
            self.warn(item, failed, Solution::Search);
            let found = catalog
                .search_track(&track.artist.name, &track.title, &track.album.title)
                .await?;
            if let Some(id) = found.filter(|id| !id.is_none() && visited.insert(*id)) {
                let data = catalog.track_with_fallback(id).await?;
                let mut alternative = track.with_essentials(&data);
                alternative.searched = true;
                self.info(item, ItemState::SearchFallback);
                return Ok(Some(alternative));
            }
        }

        Ok(None)
    }

    fn fail_download(&self, item: ItemData, failed: &DownloadFailed) -> ItemResult {
        self.fail(item, failed.message().to_owned(), Some(failed.errid()))
    }

    fn fail(&self, item: ItemData, message: String, errid: Option<String>) -> ItemResult {
        error!("{item} {message}");
        self.job.complete_track_progress(self.listener());

        let error = ItemError {
            message,
            errid,
            data: item.clone(),
            scope: ErrorScope::Track,
            position: None,
        };
        self.job.record_failure(error.clone());
        self.send(Event::QueueUpdate {
            job: self.job_id.clone(),
            update: QueueUpdate::Failed(error.clone()),
        });

        ItemResult {
            data: item,
            error: Some(error),
            ..ItemResult::default()
        }
    }

    async fn download(&self, mut track: Track) -> Result<ItemResult> {
        loop {
            match self.download_once(track).await? {
                Attempt::Done(result) => return Ok(result),
                Attempt::Again(next) => track = next,
            }
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.job.is_cancelled() {
            return Err(Error::cancelled(format!("{} was cancelled", self.job_id)));
        }
        Ok(())
    }

    #[expect(clippy::too_many_lines)]
    async fn download_once(&self, track: Track) -> Result<Attempt> {
        let downloader = self.downloader;
        let config = self.config();

        self.check_cancelled()?;
        if track.id.is_none() {
            return Err(DownloadFailed::new(Reason::NotOnDeezer).into());
        }

        let item = track.item_data();
        self.info(&item, ItemState::GetTags);
        let track = downloader.catalog.track_details(&track).await?;
        self.info(&item, ItemState::GotTags);
        let item = track.item_data();

        if !track.is_encoded() {
            return Err(DownloadFailed::with_track(Reason::NotEncoded, track).into());
        }

        self.info(&item, ItemState::GetBitrate);
        let selection = FormatSelector::new(
            &*downloader.catalog,
            &*downloader.transport,
            self.job.info.bitrate,
        )
        .degrade(config.fallback_bitrate)
        .feeling_lucky(config.feeling_lucky)
        .notify(self.listener(), self.job_id.clone())
        .select(&track)
        .await;

        let selection = match selection {
            Ok(selection) => selection,
            Err(e) => {
                let failed = match e.downcast::<SelectionError>() {
                    Some(SelectionError::WrongLicense(_)) => DownloadFailed::new(Reason::WrongLicense),
                    Some(SelectionError::WrongGeolocation(_)) => {
                        DownloadFailed::with_track(Reason::WrongGeolocation, track)
                    }
                    Some(SelectionError::PreferredBitrateNotFound) => {
                        DownloadFailed::with_track(Reason::WrongBitrate, track)
                    }
                    Some(SelectionError::SpatialUnavailable) => DownloadFailed::new(Reason::No360RA),
                    None => return Err(e),
                };
                return Err(failed.into());
            }
        };
        self.info(&item, ItemState::GotBitrate);

        let format = selection.format;
        let mut track = downloader.library.apply_settings(selection.track);
        let destination = downloader.library.destination(&track, self.job);
        fs::create_dir_all(&destination.dir).await?;

        let extension = format.extension();
        let mut path = destination
            .dir
            .join(format!("{}{extension}", destination.filename));
        if let Some(extras) = &destination.extras_path {
            self.job.offer_extras_path(extras);
        }

        self.info(&item, ItemState::GetAlbumArt);
        let cover = self.embedded_cover(&track).await;
        self.info(&item, ItemState::GotAlbumArt);

        let album_art = destination
            .cover_path
            .clone()
            .map(|dir| self.album_art(&track, dir));
        let artist_art = destination
            .artist_path
            .clone()
            .map(|dir| self.artist_art(&track, dir));
        if track.playlist.is_some() {
            self.offer_playlist_art(&track);
        }

        let policy = config.overwrite_file;
        let mut already_downloaded = is_file(&path).await;
        if !already_downloaded && policy == Overwrite::DontCheckExt {
            for ext in [".mp3", ".flac", ".opus", ".m4a"] {
                let sibling = destination
                    .dir
                    .join(format!("{}{ext}", destination.filename));
                if is_file(&sibling).await {
                    already_downloaded = true;
                    break;
                }
            }
        }
        if already_downloaded && policy == Overwrite::KeepBoth {
            let mut n = 1;
            loop {
                path = destination
                    .dir
                    .join(format!("{} ({n}){extension}", destination.filename));
                if !is_file(&path).await {
                    break;
                }
                n += 1;
            }
            already_downloaded = false;
        }

        if !already_downloaded || policy == Overwrite::Overwrite {
            if track.download_url().is_none() {
                return Err(DownloadFailed::with_track(Reason::NotAvailable, track).into());
            }

            if let Err(e) = self.write_payload(&track, &path).await {
                if fs::remove_file(&path).await.is_ok() {
                    debug!("removed incomplete {}", path.display());
                }
                if e.is_storage_full() {
                    return Err(DownloadFailed::new(Reason::NoSpaceLeft).into());
                }
                return Err(match e.kind {
                    ErrorKind::FailedPrecondition => {
                        DownloadFailed::with_track(Reason::NotAvailable, track).into()
                    }
                    _ => e,
                });
            }
            self.info(&item, ItemState::Downloaded);
        } else {
            self.info(&item, ItemState::AlreadyDownloaded);
            self.job.complete_track_progress(self.listener());
        }

        let retag = matches!(policy, Overwrite::OnlyTags | Overwrite::Overwrite);
        if (!already_downloaded || retag) && !track.local {
            self.info(&item, ItemState::Tagging);
            if let Err(e) = downloader
                .library
                .tag(&path, &track, cover.as_deref())
                .await
            {
                if e.downcast::<NotFlac>().is_none() {
                    return Err(e);
                }

                warn!("{item} Track not available in FLAC, falling back if necessary");
                if let Err(e) = fs::remove_file(&path).await {
                    warn!("could not remove {}: {e}", path.display());
                }
                self.job.remove_track_progress(self.listener());
                track.mark_unavailable(Format::FLAC);
                return Ok(Attempt::Again(track));
            }
            self.info(&item, ItemState::Tagged);
        }

        let extras = destination
            .extras_path
            .clone()
            .unwrap_or_else(|| self.job.root.clone());
        let filename = path
            .strip_prefix(&extras)
            .unwrap_or(&path)
            .display()
            .to_string();

        self.job.record_download(FileRecord {
            data: item.clone(),
            path: path.clone(),
            filename: filename.clone(),
            searched: track.searched,
        });
        self.send(Event::QueueUpdate {
            job: self.job_id.clone(),
            update: QueueUpdate::Downloaded {
                path: path.clone(),
                extras: self.job.extras_path(),
            },
        });

        Ok(Attempt::Done(ItemResult {
            data: item,
            path: Some(path),
            filename: Some(filename),
            searched: track.searched,
            error: None,
            album_art,
            artist_art,
        }))
    }

    async fn write_payload(&self, track: &Track, path: &Path) -> Result<()> {
        let mut file = fs::File::create(path).await?;
        TrackStreamer::new(
            &*self.downloader.transport,
            self.listener(),
            RetryPolicy::from(self.config()),
        )
        .stream(&mut file, track, self.job, 0)
        .await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Fetches the album cover to embed, once per album or playlist.
    async fn embedded_cover(&self, track: &Track) -> Option<PathBuf> {
        let config = self.config();
        let picture = &track.album.picture;
        if picture.is_empty() {
            return None;
        }

        let size = config.embedded_artwork_size;
        let url = picture.url(size, config.embedded_image_format());
        let ext = if url.ends_with(".png") { "png" } else { "jpg" };
        let key = match &track.playlist {
            Some(playlist) if track.album.id == 0 => format!("pl{}", playlist.id),
            _ => format!("alb{}", track.album.id),
        };
        let path = config.artwork_cache_dir.join(format!("{key}_{size}.{ext}"));

        match self
            .downloader
            .artwork
            .save(&url, &path, Overwrite::DontOverwrite)
            .await
        {
            Ok(path) => path,
            Err(e) => {
                warn!("{} could not fetch cover: {e}", track.item_data());
                None
            }
        }
    }

    fn album_art(&self, track: &Track, dir: PathBuf) -> ArtRequest {
        let config = self.config();
        let format = config.local_image_format();
        let picture = &track.album.picture;

        let mut urls = Vec::new();
        if !picture.is_empty() && !(picture.is_static() && format == ImageFormat::Png) {
            urls.push((
                picture.url(config.local_artwork_size, format),
                format.extension(),
            ));
        }

        ArtRequest {
            urls,
            dir,
            filename: library::sanitize(&config.cover_image_template),
        }
    }

    fn artist_art(&self, track: &Track, dir: PathBuf) -> ArtRequest {
        let config = self.config();
        let picture = &track.album.artist.picture;

        let mut urls = Vec::new();
        if !picture.is_empty() && matches!(config.local_image_format(), ImageFormat::Jpg(_)) {
            let format = ImageFormat::Jpg(config.jpeg_image_quality);
            urls.push((
                picture.url(config.local_artwork_size, format),
                format.extension(),
            ));
        }

        ArtRequest {
            urls,
            dir,
            filename: library::sanitize(&config.artist_image_template),
        }
    }

    fn offer_playlist_art(&self, track: &Track) {
        let Some(playlist) = &track.playlist else {
            return;
        };
        let config = self.config();
        let format = config.local_image_format();

        let mut playlist_art = self
            .playlist_art
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        playlist_art.get_or_insert_with(|| {
            let picture = &playlist.picture;
            if picture.is_empty() || (picture.is_static() && format == ImageFormat::Png) {
                Vec::new()
            } else {
                vec![(
                    picture.url(config.local_artwork_size, format),
                    format.extension(),
                )]
            }
        });
    }

    fn post_error(&self, position: &str, error: &Error, data: Option<&ItemData>) {
        error!("{position} {error}");
        let error = ItemError {
            message: error.to_string(),
            errid: None,
            data: data.cloned().unwrap_or_default(),
            scope: ErrorScope::Post,
            position: Some(position.to_owned()),
        };
        self.job.record_post_error(error.clone());
        self.send(Event::QueueUpdate {
            job: self.job_id.clone(),
            update: QueueUpdate::PostFailed(error),
        });
    }

    async fn save_art(&self, art: &ArtRequest) -> Result<()> {
        for (url, ext) in &art.urls {
            let path = art.dir.join(format!("{}.{ext}", art.filename));
            self.downloader
                .artwork
                .save(url, &path, self.config().overwrite_file)
                .await?;
        }
        Ok(())
    }

    async fn save_item_art(&self, result: &ItemResult) {
        let config = self.config();

        if config.save_artwork {
            if let Some(art) = &result.album_art {
                if let Err(e) = self.save_art(art).await {
                    self.post_error("SaveLocalAlbumArt", &e, Some(&result.data));
                }
            }
        }

        if config.save_artwork_artist {
            if let Some(art) = &result.artist_art {
                if let Err(e) = self.save_art(art).await {
                    self.post_error("SaveLocalArtistArt", &e, Some(&result.data));
                }
            }
        }
    }

    fn extras_path(&self) -> PathBuf {
        self.job.offer_extras_path(&self.config().download_location);
        self.job
            .extras_path()
            .unwrap_or_else(|| self.config().download_location.clone())
    }

    async fn after_single(&self, result: &ItemResult) {
        let config = self.config();
        let extras = self.extras_path();

        self.save_item_art(result).await;

        if config.log_searched && result.searched {
            let line = format!("{} - {}", result.data.artist, result.data.title);
            if let Err(e) = append_line(&extras.join("searched.txt"), &line).await {
                self.post_error("CreateSearchedLog", &e, None);
            }
        }

        if !config.execute_command.is_empty() {
            if let Some(filename) = &result.filename {
                let command = config
                    .execute_command
                    .replace("%folder%", &quote(&extras.to_string_lossy()))
                    .replace("%filename%", &quote(filename));
                if let Err(e) = execute(&command).await {
                    self.post_error("ExecuteCommand", &e, None);
                }
            }
        }
    }

    async fn after_collection(&self, results: &[Option<ItemResult>]) {
        let config = self.config();
        let extras = self.extras_path();

        let mut playlist = Vec::with_capacity(results.len());
        let mut errors = String::new();
        let mut searched = String::new();

        for result in results {
            let Some(result) = result else {
                return;
            };

            if let Some(error) = &result.error {
                errors.push_str(&format!(
                    "{} | {} - {} | {}\r\n",
                    error.data.id, error.data.artist, error.data.title, error.message
                ));
            }
            if result.searched {
                searched.push_str(&format!("{} - {}\r\n", result.data.artist, result.data.title));
            }

            self.save_item_art(result).await;
            playlist.push(result.filename.clone().unwrap_or_default());
        }

        if config.log_errors && !errors.is_empty() {
            if let Err(e) = fs::write(extras.join("errors.txt"), errors).await {
                self.post_error("CreateErrorLog", &e.into(), None);
            }
        }

        if config.log_searched && !searched.is_empty() {
            if let Err(e) = fs::write(extras.join("searched.txt"), searched).await {
                self.post_error("CreateSearchedLog", &e.into(), None);
            }
        }

        if config.save_artwork {
            let urls = self
                .playlist_art
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(urls) = urls {
                let art = ArtRequest {
                    urls,
                    dir: extras.clone(),
                    filename: library::sanitize(&config.cover_image_template),
                };
                if let Err(e) = self.save_art(&art).await {
                    self.post_error("SavePlaylistArt", &e, None);
                }
            }
        }

        if config.create_m3u8_file {
            let mut name = library::sanitize(&config.playlist_filename);
            if name.is_empty() {
                "playlist".clone_into(&mut name);
            }
            let manifest: String = playlist.iter().map(|line| format!("{line}\n")).collect();
            if let Err(e) = fs::write(extras.join(format!("{name}.m3u8")), manifest).await {
                self.post_error("CreatePlaylistFile", &e.into(), None);
            }
        }

        if !config.execute_command.is_empty() {
            let command = config
                .execute_command
                .replace("%folder%", &quote(&extras.to_string_lossy()));
            if let Err(e) = execute(&command).await {
                self.post_error("ExecuteCommand", &e, None);
            }
        }
    }
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .is_ok_and(|metadata| metadata.is_file())
}

async fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut contents = match fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    if !contents.lines().any(|existing| existing == line) {
        contents.push_str(line);
        contents.push_str("\r\n");
        fs::write(path, contents).await?;
    }
    Ok(())
}

/// Quotes `s` for use as a single shell word.
fn quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c));
    if safe {
        s.to_owned()
    } else {
        format!("'{}'", s.replace('\'', r#"'"'"'"#))
    }
}

async fn execute(command: &str) -> Result<()> {
    debug!("executing {command}");
    let status = Command::new("sh").arg("-c").arg(command).status().await?;
    if !status.success() {
        return Err(Error::unknown(format!("{command} exited with {status}")));
    }
    Ok(())
}
