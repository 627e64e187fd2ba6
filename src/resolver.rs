//! Link resolution.
//!
//! Turns a link pasted by the user into a [`DownloadJob`]. Deezer links are
//! handled by [`DeezerResolver`]. Links to other services are left to plugin
//! resolvers registered with [`Resolvers`], which are tried in order of
//! priority until one of them accepts the link.

use std::{cmp::Reverse, path::Path, sync::Arc};

use async_trait::async_trait;
use regex_lite::Regex;
use thiserror::Error;

use crate::{
    catalog::Catalog,
    error::{Error, ErrorKind, Result},
    job::{DownloadJob, JobInfo, JobKind},
    metadata::{Album, ImageFormat, Picture},
    protocol::{gateway::TrackData, media::Format},
    track::{AlbumId, Track, TrackId},
};

/// Kind and identifier of a Deezer link.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Link {
    /// A track id, or `isrc:<code>`.
    Track(String),
    Album(String),
    Playlist(String),
    Artist(String),
    ArtistTop(String),
    ArtistDiscography(String),
}

/// Reasons a link cannot be turned into a job.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum GenerationError {
    #[error("Link ID is invalid!")]
    InvalidId { link: String },

    #[error("Track not found on deezer!")]
    TrackNotFound { link: String },

    #[error("Album not found on deezer!")]
    AlbumNotFound { link: String },

    #[error("Playlist not found on deezer!")]
    PlaylistNotFound { link: String },

    #[error("Track ISRC is not available on deezer")]
    IsrcNotFound { link: String },

    #[error("You can't download others private playlists.")]
    NotYourPrivatePlaylist { link: String },

    #[error("Link is not supported.")]
    LinkNotSupported { link: String },

    #[error("Link is not recognized.")]
    LinkNotRecognized { link: String },
}

impl GenerationError {
    /// The link that failed to resolve.
    #[must_use]
    pub fn link(&self) -> &str {
        match self {
            Self::InvalidId { link }
            | Self::TrackNotFound { link }
            | Self::AlbumNotFound { link }
            | Self::PlaylistNotFound { link }
            | Self::IsrcNotFound { link }
            | Self::NotYourPrivatePlaylist { link }
            | Self::LinkNotSupported { link }
            | Self::LinkNotRecognized { link } => link,
        }
    }

    /// Stable identifier as reported to users.
    #[must_use]
    pub fn errid(&self) -> &'static str {
        match self {
            Self::InvalidId { .. } => "invalidID",
            Self::TrackNotFound { .. } => "trackNotOnDeezer",
            Self::AlbumNotFound { .. } => "albumNotOnDeezer",
            Self::PlaylistNotFound { .. } => "playlistNotOnDeezer",
            Self::IsrcNotFound { .. } => "ISRCnotOnDeezer",
            Self::NotYourPrivatePlaylist { .. } => "notYourPrivatePlaylist",
            Self::LinkNotSupported { .. } => "unsupportedURL",
            Self::LinkNotRecognized { .. } => "invalidURL",
        }
    }
}

impl From<GenerationError> for Error {
    fn from(e: GenerationError) -> Self {
        match e {
            GenerationError::InvalidId { .. } | GenerationError::LinkNotRecognized { .. } => {
                Self::invalid_argument(e)
            }
            GenerationError::TrackNotFound { .. }
            | GenerationError::AlbumNotFound { .. }
            | GenerationError::PlaylistNotFound { .. }
            | GenerationError::IsrcNotFound { .. } => Self::not_found(e),
            GenerationError::NotYourPrivatePlaylist { .. } => Self::permission_denied(e),
            GenerationError::LinkNotSupported { .. } => Self::unimplemented(e),
        }
    }
}

/// Recognises Deezer links.
#[derive(Clone, Debug)]
pub struct LinkParser {
    track: Regex,
    album: Regex,
    playlist: Regex,
    artist_top: Regex,
    artist_discography: Regex,
    artist: Regex,
}

impl LinkParser {
    /// # Errors
    ///
    /// Returns `Error::Internal` if a pattern does not compile.
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| Regex::new(pattern).map_err(Error::internal);
        Ok(Self {
            track: compile(r"/track/(.+)")?,
            album: compile(r"/album/(.+)")?,
            playlist: compile(r"/playlist/(\d+)")?,
            artist_top: compile(r"/artist/(\d+)/top_track")?,
            artist_discography: compile(r"/artist/(\d+)/discography")?,
            artist: compile(r"/artist/(\d+)")?,
        })
    }

    /// Returns the kind and id of a Deezer link, or `None` for links to
    /// other services and Deezer pages that cannot be downloaded.
    ///
    /// Query strings and a trailing slash are ignored.
    #[must_use]
    pub fn parse(&self, link: &str) -> Option<Link> {
        let link = strip(link);
        if !link.contains("deezer.com") {
            return None;
        }

        let capture = |regex: &Regex| {
            regex
                .captures(link)
                .and_then(|captures| captures.get(1))
                .map(|id| id.as_str().to_owned())
        };

        if let Some(id) = capture(&self.track) {
            Some(Link::Track(id))
        } else if let Some(id) = capture(&self.playlist) {
            Some(Link::Playlist(id))
        } else if let Some(id) = capture(&self.album) {
            Some(Link::Album(id))
        } else if let Some(id) = capture(&self.artist_top) {
            Some(Link::ArtistTop(id))
        } else if let Some(id) = capture(&self.artist_discography) {
            Some(Link::ArtistDiscography(id))
        } else {
            capture(&self.artist).map(Link::Artist)
        }
    }
}

fn strip(link: &str) -> &str {
    let link = link.split(['?', '&']).next().unwrap_or_default();
    link.strip_suffix('/').unwrap_or(link)
}

/// Parses `link` with a fresh [`LinkParser`].
///
/// # Errors
///
/// Returns `Error::Internal` if a pattern does not compile.
pub fn parse_link(link: &str) -> Result<Option<Link>> {
    Ok(LinkParser::new()?.parse(link))
}

/// Turns links into jobs.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Name for logging.
    fn name(&self) -> &str;

    /// Resolvers with a higher priority are tried first.
    fn priority(&self) -> i32 {
        0
    }

    /// Creates a job for `link` downloading at `bitrate` into `root`.
    ///
    /// Returns `None` if the link is not for this resolver.
    ///
    /// # Errors
    ///
    /// Returns a [`GenerationError`] if the link is for this resolver but
    /// cannot be resolved, or any error of the underlying service.
    async fn resolve(&self, link: &str, bitrate: Format, root: &Path)
        -> Result<Option<DownloadJob>>;
}

/// Registry of resolvers, tried in order of priority.
#[derive(Clone, Default)]
pub struct Resolvers {
    resolvers: Vec<Arc<dyn Resolver>>,
}

impl Resolvers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `resolver`. Resolvers of equal priority are tried in the order
    /// they were registered.
    pub fn register(&mut self, resolver: Arc<dyn Resolver>) {
        debug!(
            "registering resolver {} with priority {}",
            resolver.name(),
            resolver.priority()
        );
        self.resolvers.push(resolver);
        self.resolvers
            .sort_by_key(|resolver| Reverse(resolver.priority()));
    }

    /// Resolves `link` with the first resolver that accepts it.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::LinkNotRecognized`] if no resolver accepts
    /// the link, or the error of the resolver that accepted it.
    pub async fn resolve(&self, link: &str, bitrate: Format, root: &Path) -> Result<DownloadJob> {
        for resolver in &self.resolvers {
            if let Some(job) = resolver.resolve(link, bitrate, root).await? {
                info!("{} resolved {link} to {job}", resolver.name());
                return Ok(job);
            }
        }

        Err(GenerationError::LinkNotRecognized {
            link: link.to_owned(),
        }
        .into())
    }
}

/// Size of the cover shown with a job.
const THUMBNAIL_SIZE: u32 = 75;

fn thumbnail(picture: &Picture) -> String {
    if picture.is_empty() {
        return String::new();
    }
    picture.url(THUMBNAIL_SIZE, ImageFormat::Jpg(80))
}

/// Resolves Deezer track, album and playlist links through a [`Catalog`].
pub struct DeezerResolver {
    catalog: Arc<dyn Catalog>,
    parser: LinkParser,
}

impl DeezerResolver {
    /// # Errors
    ///
    /// Returns `Error::Internal` if the link patterns do not compile.
    pub fn new(catalog: Arc<dyn Catalog>) -> Result<Self> {
        Ok(Self {
            catalog,
            parser: LinkParser::new()?,
        })
    }

    fn single(track: Track, bitrate: Format, root: &Path) -> DownloadJob {
        let info = JobInfo {
            typ: "track".to_owned(),
            source_id: track.id.to_string(),
            bitrate,
            title: track.title.clone(),
            artist: track.artist.name.clone(),
            cover: thumbnail(&track.album.picture),
        };
        DownloadJob::new(info, JobKind::Single(track), root)
    }

    async fn track(&self, link: &str, id: &str, bitrate: Format, root: &Path) -> Result<DownloadJob> {
        let data = if let Some(isrc) = id.strip_prefix("isrc:") {
            self.catalog
                .track_by_isrc(isrc)
                .await
                .map_err(|e| not_found(e, GenerationError::IsrcNotFound { link: link.to_owned() }))?
        } else {
            let id: TrackId = id.parse().map_err(|_| GenerationError::InvalidId {
                link: link.to_owned(),
            })?;
            self.catalog
                .track(id)
                .await
                .map_err(|e| not_found(e, GenerationError::TrackNotFound { link: link.to_owned() }))?
        };

        Ok(Self::single(Track::from(data), bitrate, root))
    }

    async fn album(&self, link: &str, id: &str, bitrate: Format, root: &Path) -> Result<DownloadJob> {
        let id: AlbumId = id.parse().map_err(|_| GenerationError::InvalidId {
            link: link.to_owned(),
        })?;
        let listing = self
            .catalog
            .album(id)
            .await
            .map_err(|e| not_found(e, GenerationError::AlbumNotFound { link: link.to_owned() }))?;

        let album = listing.info;
        let tracks = collect(listing.tracks, |track| {
            track.album = album.clone();
            if track.artist.name.is_empty() {
                track.artist = album.artist.clone();
            }
        });

        if let [track] = tracks.as_slice() {
            return Ok(Self::single(track.clone(), bitrate, root));
        }

        let info = JobInfo {
            typ: "album".to_owned(),
            source_id: album.id.to_string(),
            bitrate,
            title: album.title.clone(),
            artist: album.artist.name.clone(),
            cover: thumbnail(&album.picture),
        };
        Ok(DownloadJob::new(info, JobKind::Collection(tracks), root))
    }

    async fn playlist(&self, link: &str, id: &str, bitrate: Format, root: &Path) -> Result<DownloadJob> {
        let id: u64 = id.parse().map_err(|_| GenerationError::InvalidId {
            link: link.to_owned(),
        })?;
        let listing = self.catalog.playlist(id).await.map_err(|e| match e.kind {
            ErrorKind::NotFound => GenerationError::PlaylistNotFound {
                link: link.to_owned(),
            }
            .into(),
            ErrorKind::PermissionDenied => GenerationError::NotYourPrivatePlaylist {
                link: link.to_owned(),
            }
            .into(),
            _ => e,
        })?;

        let playlist = listing.info;
        let tracks = collect(listing.tracks, |track| {
            track.playlist = Some(playlist.clone());
        });

        let info = JobInfo {
            typ: "playlist".to_owned(),
            source_id: playlist.id.to_string(),
            bitrate,
            title: playlist.title.clone(),
            artist: playlist.owner.clone(),
            cover: thumbnail(&playlist.picture),
        };
        Ok(DownloadJob::new(info, JobKind::Collection(tracks), root))
    }
}

/// Converts listed tracks in order, numbering them.
fn collect(tracks: Vec<TrackData>, mut annotate: impl FnMut(&mut Track)) -> Vec<Track> {
    tracks
        .into_iter()
        .enumerate()
        .map(|(position, data)| {
            let mut track = Track::from(data);
            track.position = Some(position);
            annotate(&mut track);
            track
        })
        .collect()
}

/// Replaces a not found error with `replacement`.
fn not_found(error: Error, replacement: GenerationError) -> Error {
    if error.kind == ErrorKind::NotFound {
        replacement.into()
    } else {
        error
    }
}

#[async_trait]
impl Resolver for DeezerResolver {
    fn name(&self) -> &str {
        "deezer"
    }

    fn priority(&self) -> i32 {
        i32::MAX
    }

    async fn resolve(
        &self,
        link: &str,
        bitrate: Format,
        root: &Path,
    ) -> Result<Option<DownloadJob>> {
        let Some(parsed) = self.parser.parse(link) else {
            return Ok(None);
        };

        let job = match parsed {
            Link::Track(id) => self.track(link, &id, bitrate, root).await?,
            Link::Album(id) => self.album(link, &id, bitrate, root).await?,
            Link::Playlist(id) => self.playlist(link, &id, bitrate, root).await?,
            Link::Artist(_) | Link::ArtistTop(_) | Link::ArtistDiscography(_) => {
                return Err(GenerationError::LinkNotSupported {
                    link: link.to_owned(),
                }
                .into());
            }
        };
        Ok(Some(job))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::{
        catalog::Listing,
        metadata::{Artist, Playlist},
        protocol::gateway::User,
        testing::MockCatalog,
    };

    fn data(id: i64) -> TrackData {
        TrackData {
            id: TrackId::from(id),
            title: format!("Track {id}"),
            artist: "Daft Punk".to_owned(),
            isrc: format!("GBDUW00000{id:02}"),
            album_picture: "2e018122cb56986277102d2041a592c8".to_owned(),
            ..TrackData::default()
        }
    }

    fn resolver(catalog: MockCatalog) -> DeezerResolver {
        DeezerResolver::new(Arc::new(catalog)).unwrap()
    }

    fn generation_error(error: &Error) -> GenerationError {
        error.downcast::<GenerationError>().unwrap().clone()
    }

    #[test]
    fn links_are_classified() {
        let parser = LinkParser::new().unwrap();
        assert_eq!(
            parser.parse("https://www.deezer.com/en/track/3135556?utm_source=deezer"),
            Some(Link::Track("3135556".to_owned()))
        );
        assert_eq!(
            parser.parse("https://www.deezer.com/album/302127/"),
            Some(Link::Album("302127".to_owned()))
        );
        assert_eq!(
            parser.parse("https://deezer.com/playlist/908622995&foo=bar"),
            Some(Link::Playlist("908622995".to_owned()))
        );
        assert_eq!(
            parser.parse("https://www.deezer.com/artist/27/top_track"),
            Some(Link::ArtistTop("27".to_owned()))
        );
        assert_eq!(
            parser.parse("https://www.deezer.com/artist/27/discography"),
            Some(Link::ArtistDiscography("27".to_owned()))
        );
        assert_eq!(
            parser.parse("https://www.deezer.com/artist/27"),
            Some(Link::Artist("27".to_owned()))
        );
        assert_eq!(parser.parse("https://www.deezer.com/en/show/1"), None);
        assert_eq!(parser.parse("https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC"), None);
    }

    #[tokio::test]
    async fn track_links_become_single_jobs() {
        let resolver = resolver(MockCatalog::new(User::default()).with_track(data(1)));

        let job = resolver
            .resolve("https://www.deezer.com/track/1", Format::FLAC, Path::new("/music"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(job.id(), "track_1_9");
        assert_eq!(job.info.title, "Track 1");
        assert_eq!(
            job.info.cover,
            "https://e-cdns-images.dzcdn.net/images/cover/2e018122cb56986277102d2041a592c8/75x75-000000-80-0-0.jpg"
        );
        assert_eq!(job.root, PathBuf::from("/music"));
        assert!(!job.is_collection());
    }

    #[tokio::test]
    async fn isrc_links_are_looked_up() {
        let resolver = resolver(MockCatalog::new(User::default()).with_track(data(4)));

        let job = resolver
            .resolve("https://www.deezer.com/track/isrc:GBDUW0000004", Format::MP3_320, Path::new("/music"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.info.source_id, "4");

        let error = resolver
            .resolve("https://www.deezer.com/track/isrc:XX", Format::MP3_320, Path::new("/music"))
            .await
            .unwrap_err();
        assert_eq!(generation_error(&error).errid(), "ISRCnotOnDeezer");
    }

    #[tokio::test]
    async fn bad_track_links_are_reported() {
        let resolver = resolver(MockCatalog::new(User::default()));

        let error = resolver
            .resolve("https://www.deezer.com/track/abc", Format::MP3_320, Path::new("/music"))
            .await
            .unwrap_err();
        assert_eq!(generation_error(&error).errid(), "invalidID");

        let error = resolver
            .resolve("https://www.deezer.com/track/42", Format::MP3_320, Path::new("/music"))
            .await
            .unwrap_err();
        let failure = generation_error(&error);
        assert_eq!(failure.errid(), "trackNotOnDeezer");
        assert_eq!(failure.link(), "https://www.deezer.com/track/42");
        assert_eq!(failure.to_string(), "Track not found on deezer!");
    }

    #[tokio::test]
    async fn albums_become_numbered_collections() {
        let album = Album {
            id: 302_127,
            title: "Discovery".to_owned(),
            artist: Artist::new(27, "Daft Punk"),
            picture: Picture::new("2e018122cb56986277102d2041a592c8", "cover"),
            track_total: 3,
            disc_total: 1,
        };
        let catalog = MockCatalog::new(User::default()).with_album(Listing {
            info: album,
            tracks: vec![data(1), data(2), data(3)],
        });

        let job = resolver(catalog)
            .resolve("https://www.deezer.com/album/302127", Format::MP3_320, Path::new("/music"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(job.id(), "album_302127_3");
        assert_eq!(job.info.artist, "Daft Punk");
        let JobKind::Collection(tracks) = &job.kind else {
            panic!("expected a collection");
        };
        assert_eq!(tracks.len(), 3);
        assert_eq!(tracks[2].position, Some(2));
        assert_eq!(tracks[2].album.title, "Discovery");
    }

    #[tokio::test]
    async fn private_playlists_are_refused() {
        let catalog = MockCatalog::new(User::default())
            .with_private_playlist(7)
            .with_playlist(Listing {
                info: Playlist {
                    id: 8,
                    title: "Mix".to_owned(),
                    owner: "someone".to_owned(),
                    ..Playlist::default()
                },
                tracks: vec![data(1), data(2)],
            });
        let resolver = resolver(catalog);

        let error = resolver
            .resolve("https://www.deezer.com/playlist/7", Format::MP3_320, Path::new("/music"))
            .await
            .unwrap_err();
        assert_eq!(generation_error(&error).errid(), "notYourPrivatePlaylist");

        let job = resolver
            .resolve("https://www.deezer.com/playlist/8", Format::MP3_320, Path::new("/music"))
            .await
            .unwrap()
            .unwrap();
        let JobKind::Collection(tracks) = &job.kind else {
            panic!("expected a collection");
        };
        assert!(tracks.iter().all(|track| track.playlist.is_some()));
    }

    struct Plugin {
        priority: i32,
        name: &'static str,
    }

    #[async_trait]
    impl Resolver for Plugin {
        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        async fn resolve(
            &self,
            link: &str,
            bitrate: Format,
            root: &Path,
        ) -> Result<Option<DownloadJob>> {
            if !link.contains("spotify.com") {
                return Ok(None);
            }
            let info = JobInfo {
                typ: self.name.to_owned(),
                source_id: "1".to_owned(),
                bitrate,
                ..JobInfo::default()
            };
            Ok(Some(DownloadJob::new(info, JobKind::Collection(Vec::new()), root)))
        }
    }

    #[tokio::test]
    async fn plugins_are_tried_by_priority() {
        let mut resolvers = Resolvers::new();
        resolvers.register(Arc::new(resolver(MockCatalog::new(User::default()))));
        resolvers.register(Arc::new(Plugin {
            priority: 1,
            name: "low",
        }));
        resolvers.register(Arc::new(Plugin {
            priority: 5,
            name: "high",
        }));

        let job = resolvers
            .resolve("https://open.spotify.com/playlist/1", Format::MP3_320, Path::new("/music"))
            .await
            .unwrap();
        assert_eq!(job.info.typ, "high");

        let error = resolvers
            .resolve("https://example.com/song", Format::MP3_320, Path::new("/music"))
            .await
            .unwrap_err();
        assert_eq!(generation_error(&error).errid(), "invalidURL");

        let error = resolvers
            .resolve("https://www.deezer.com/artist/27", Format::MP3_320, Path::new("/music"))
            .await
            .unwrap_err();
        assert_eq!(generation_error(&error).errid(), "unsupportedURL");
    }
}
