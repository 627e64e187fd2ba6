//! Remote catalog collaborator.
//!
//! Metadata retrieval and stream URL authorisation live outside this crate.
//! [`Catalog`] is the narrow interface the selector and the orchestrator
//! consume. Implementations map their service errors onto
//! [`struct@Error`] and report entitlement refusals as [`MediaError`] so that
//! format selection can interpret them.

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::{
    error::{Error, Result},
    metadata::{Album, Playlist},
    protocol::{
        gateway::{TrackData, User},
        media::Format,
    },
    track::{AlbumId, Track, TrackId},
};

/// Refusal to authorise a stream URL.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum MediaError {
    /// The account tier does not cover the format.
    #[error("license does not cover the requested format")]
    WrongLicense,

    /// The track may not be streamed from the account's country.
    #[error("track is not streamable from the current country")]
    WrongGeolocation,
}

impl From<MediaError> for Error {
    fn from(e: MediaError) -> Self {
        Self::permission_denied(e)
    }
}

/// Album or playlist with its tracks, in order.
#[derive(Clone, Debug, Default)]
pub struct Listing<T> {
    pub info: T,
    pub tracks: Vec<TrackData>,
}

#[async_trait]
pub trait Catalog: Send + Sync {
    /// Entitlements of the logged in account.
    fn user(&self) -> User;

    /// Fetches the essential data of a track.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if there is no such track.
    async fn track(&self, id: TrackId) -> Result<TrackData>;

    /// Fetches the essential data of a track, including its fallback and
    /// the albums carrying the same recording.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if there is no such track.
    async fn track_with_fallback(&self, id: TrackId) -> Result<TrackData>;

    /// Authorises a stream URL for the track behind `track_token`.
    ///
    /// Returns `None` if the service has no URL for the format.
    ///
    /// # Errors
    ///
    /// Returns a [`MediaError`] when the account is not entitled to the
    /// format or the track is geo-restricted.
    async fn stream_url(&self, track_token: &str, format: Format) -> Result<Option<Url>>;

    /// Resolves everything needed to download `track`.
    ///
    /// The default fetches the essential data when the track carries no
    /// token yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the track cannot be fetched. Implementations
    /// report missing albums and missing sessions as
    /// [`DownloadFailed`](crate::error::DownloadFailed).
    async fn track_details(&self, track: &Track) -> Result<Track> {
        if !track.track_token.is_empty() || track.local {
            return Ok(track.clone());
        }

        let data = self.track_with_fallback(track.id).await?;
        let mut details = track.with_essentials(&data);
        if details.isrc.is_empty() {
            details.isrc.clone_from(&data.isrc);
        }
        if details.albums_fallback.is_empty() {
            details.albums_fallback = data.albums_fallback.iter().map(|album| album.id).collect();
        }
        Ok(details)
    }

    /// Tracks of an album page, used for ISRC matching.
    ///
    /// # Errors
    ///
    /// Returns `Error::Unimplemented` unless overridden.
    async fn album_tracks(&self, id: AlbumId) -> Result<Vec<TrackData>> {
        Err(Error::unimplemented(format!("album {id} lookup")))
    }

    /// Finds a track by metadata.
    ///
    /// # Errors
    ///
    /// Returns `Error::Unimplemented` unless overridden.
    async fn search_track(&self, artist: &str, title: &str, album: &str) -> Result<Option<TrackId>> {
        Err(Error::unimplemented(format!(
            "search for {artist} - {title} ({album})"
        )))
    }

    /// Finds a track by its ISRC.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if no track has the code, or
    /// `Error::Unimplemented` unless overridden.
    async fn track_by_isrc(&self, isrc: &str) -> Result<TrackData> {
        Err(Error::unimplemented(format!("track lookup by isrc {isrc}")))
    }

    /// Fetches an album with its tracks.
    ///
    /// # Errors
    ///
    /// Returns `Error::Unimplemented` unless overridden.
    async fn album(&self, id: AlbumId) -> Result<Listing<Album>> {
        Err(Error::unimplemented(format!("album {id} lookup")))
    }

    /// Fetches a playlist with its tracks.
    ///
    /// # Errors
    ///
    /// Returns `Error::PermissionDenied` for a private playlist of another
    /// user, or `Error::Unimplemented` unless overridden.
    async fn playlist(&self, id: u64) -> Result<Listing<Playlist>> {
        Err(Error::unimplemented(format!("playlist {id} lookup")))
    }
}
