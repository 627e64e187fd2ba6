//! In-memory collaborators for tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use url::Url;

use crate::{
    catalog::{Catalog, Listing, MediaError},
    error::{Error, Result},
    events::{Event, Listener, QueueUpdate},
    http::{Response, Transport},
    metadata::{Album, Playlist},
    protocol::{
        gateway::{TrackData, User},
        media::Format,
    },
    track::{AlbumId, TrackId},
};

/// Deterministic payload of `len` bytes that does not start with zeros.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| u8::try_from(i % 251 + 1).unwrap())
        .collect()
}

/// Records every event it receives.
#[derive(Debug, Default)]
pub struct ChannelListener {
    events: Mutex<Vec<Event>>,
}

impl ChannelListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Progress values reported so far, in order.
    pub fn progress(&self) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::QueueUpdate {
                    update: QueueUpdate::Progress(progress),
                    ..
                } => Some(progress),
                _ => None,
            })
            .collect()
    }
}

impl Listener for ChannelListener {
    fn send(&self, event: Event) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

enum Answer {
    Url(Url),
    Refusal(MediaError),
}

/// Catalog serving canned records.
#[derive(Default)]
pub struct MockCatalog {
    user: User,
    tracks: HashMap<TrackId, TrackData>,
    urls: HashMap<(String, Format), Answer>,
    album_tracks: HashMap<AlbumId, Vec<TrackData>>,
    albums: HashMap<AlbumId, Listing<Album>>,
    playlists: HashMap<u64, Listing<Playlist>>,
    private_playlists: Vec<u64>,
    searches: HashMap<(String, String), TrackId>,
    calls: Mutex<Vec<String>>,
}

impl MockCatalog {
    pub fn new(user: User) -> Self {
        Self {
            user,
            ..Self::default()
        }
    }

    /// URL the catalog authorises for `token` in `format`.
    pub fn url_for(token: &str, format: Format) -> Url {
        Url::parse(&format!("https://cdn.example.com/stream/{token}/{format}")).unwrap()
    }

    pub fn with_track(mut self, data: TrackData) -> Self {
        self.tracks.insert(data.id, data);
        self
    }

    pub fn with_url(mut self, token: &str, format: Format) -> Self {
        self.urls.insert(
            (token.to_owned(), format),
            Answer::Url(Self::url_for(token, format)),
        );
        self
    }

    pub fn with_refusal(mut self, token: &str, format: Format, refusal: MediaError) -> Self {
        self.urls
            .insert((token.to_owned(), format), Answer::Refusal(refusal));
        self
    }

    pub fn with_album_tracks(mut self, id: AlbumId, tracks: Vec<TrackData>) -> Self {
        self.album_tracks.insert(id, tracks);
        self
    }

    pub fn with_album(mut self, listing: Listing<Album>) -> Self {
        self.albums.insert(listing.info.id, listing);
        self
    }

    pub fn with_playlist(mut self, listing: Listing<Playlist>) -> Self {
        self.playlists.insert(listing.info.id, listing);
        self
    }

    /// Makes playlist `id` private to another user.
    pub fn with_private_playlist(mut self, id: u64) -> Self {
        self.private_playlists.push(id);
        self
    }

    pub fn with_search(mut self, artist: &str, title: &str, id: TrackId) -> Self {
        self.searches
            .insert((artist.to_owned(), title.to_owned()), id);
        self
    }

    /// Requests made so far, like `stream_url token-1 FLAC`.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, call: String) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

#[async_trait]
impl Catalog for MockCatalog {
    fn user(&self) -> User {
        self.user.clone()
    }

    async fn track(&self, id: TrackId) -> Result<TrackData> {
        self.record(format!("track {id}"));
        self.tracks
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("track {id} not found")))
    }

    async fn track_with_fallback(&self, id: TrackId) -> Result<TrackData> {
        self.record(format!("track_with_fallback {id}"));
        self.tracks
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("track {id} not found")))
    }

    async fn stream_url(&self, track_token: &str, format: Format) -> Result<Option<Url>> {
        self.record(format!("stream_url {track_token} {format}"));
        match self.urls.get(&(track_token.to_owned(), format)) {
            Some(Answer::Url(url)) => Ok(Some(url.clone())),
            Some(Answer::Refusal(refusal)) => Err(refusal.clone().into()),
            None => Ok(None),
        }
    }

    async fn album_tracks(&self, id: AlbumId) -> Result<Vec<TrackData>> {
        self.record(format!("album_tracks {id}"));
        self.album_tracks
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("album {id} not found")))
    }

    async fn search_track(&self, artist: &str, title: &str, album: &str) -> Result<Option<TrackId>> {
        self.record(format!("search_track {artist} - {title} ({album})"));
        Ok(self
            .searches
            .get(&(artist.to_owned(), title.to_owned()))
            .copied())
    }

    async fn track_by_isrc(&self, isrc: &str) -> Result<TrackData> {
        self.record(format!("track_by_isrc {isrc}"));
        self.tracks
            .values()
            .find(|data| data.isrc == isrc)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("isrc {isrc} not found")))
    }

    async fn album(&self, id: AlbumId) -> Result<Listing<Album>> {
        self.albums
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("album {id} not found")))
    }

    async fn playlist(&self, id: u64) -> Result<Listing<Playlist>> {
        if self.private_playlists.contains(&id) {
            return Err(Error::permission_denied(format!("playlist {id} is private")));
        }
        self.playlists
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("playlist {id} not found")))
    }
}

struct Failure {
    after: usize,
    error: fn() -> Error,
}

/// Transport serving payloads from memory.
///
/// Scripted failures apply to the next GET requests in order: the body
/// breaks off with the error after the given number of bytes.
pub struct MockTransport {
    payloads: HashMap<String, Vec<u8>>,
    heads: HashMap<String, Option<u64>>,
    delays: HashMap<String, Duration>,
    ignore_range: bool,
    failures: Mutex<VecDeque<Failure>>,
    requests: Mutex<Vec<(String, u64)>>,
    chunk_size: usize,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            payloads: HashMap::new(),
            heads: HashMap::new(),
            delays: HashMap::new(),
            ignore_range: false,
            failures: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            chunk_size: 1000,
        }
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload(mut self, url: &Url, payload: Vec<u8>) -> Self {
        self.payloads.insert(url.to_string(), payload);
        self
    }

    pub fn with_head(mut self, url: &Url, length: Option<u64>) -> Self {
        self.heads.insert(url.to_string(), length);
        self
    }

    /// Holds back responses for `url` by `delay`.
    pub fn with_delay(mut self, url: &Url, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }

    /// Answers every GET with the whole payload, like a server that does
    /// not support ranges.
    pub fn ignore_range(mut self) -> Self {
        self.ignore_range = true;
        self
    }

    pub fn fail_after(self, after: usize, error: fn() -> Error) -> Self {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Failure { after, error });
        self
    }

    /// GET requests made so far, with their offsets.
    pub fn requests(&self) -> Vec<(String, u64)> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, url: &Url, offset: u64) -> Result<Response> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((url.to_string(), offset));

        if let Some(delay) = self.delays.get(url.as_str()) {
            tokio::time::sleep(*delay).await;
        }

        let payload = self
            .payloads
            .get(url.as_str())
            .ok_or_else(|| Error::failed_precondition(format!("404 Not Found: {url}")))?;
        let total = payload.len();
        let offset = if self.ignore_range { 0 } else { offset };
        let start = usize::try_from(offset).unwrap().min(total);
        let remaining = &payload[start..];

        let failure = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        let served = failure
            .as_ref()
            .map_or(remaining.len(), |failure| failure.after.min(remaining.len()));
        let mut items: Vec<Result<Bytes>> = remaining[..served]
            .chunks(self.chunk_size)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        if let Some(failure) = failure {
            items.push(Err((failure.error)()));
        }

        Ok(Response {
            content_length: Some(remaining.len() as u64),
            content_range: (offset > 0)
                .then(|| format!("bytes {start}-{}/{total}", total.saturating_sub(1))),
            body: stream::iter(items).boxed(),
        })
    }

    async fn head(&self, url: &Url) -> Result<Option<u64>> {
        Ok(self.heads.get(url.as_str()).copied().flatten())
    }
}
