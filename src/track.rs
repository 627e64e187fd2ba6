use std::{
    collections::HashMap,
    fmt,
    num::ParseIntError,
    str::FromStr,
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;
use veil::Redact;

use crate::{
    metadata::{Album, Artist, Picture, Playlist},
    protocol::{gateway::TrackData, media::Format},
};

/// Album identifier. Zero when unknown.
pub type AlbumId = u64;

/// Track identifier.
///
/// Positive for catalog tracks, negative for files uploaded by the user and
/// zero for "no track".
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
)]
#[serde(transparent)]
pub struct TrackId(i64);

impl TrackId {
    #[must_use]
    pub fn is_local(self) -> bool {
        self.0 < 0
    }

    #[must_use]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl From<i64> for TrackId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<TrackId> for i64 {
    fn from(id: TrackId) -> Self {
        id.0
    }
}

impl FromStr for TrackId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Payload size of one format as known to the selector.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct FileSize {
    pub bytes: u64,
    /// Whether `bytes` was observed by probing rather than declared.
    pub tested: bool,
}

/// Identity of an item as reported to listeners.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct ItemData {
    pub id: TrackId,
    pub title: String,
    pub artist: String,
}

impl fmt::Display for ItemData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{} - {}]", self.artist, self.title)
    }
}

/// A track as it moves through resolution and download.
///
/// Descriptive fields are snapshots from the catalog. The essential fields
/// (identity, token, checksum, sizes and URLs) are replaced wholesale when a
/// fallback version is substituted, see [`Track::with_essentials`].
#[derive(Clone, Default, PartialEq, Redact)]
pub struct Track {
    pub id: TrackId,
    pub fallback_id: Option<TrackId>,
    /// Albums that may carry the same recording, tried by ISRC.
    pub albums_fallback: Vec<AlbumId>,
    pub isrc: String,

    pub title: String,
    pub artist: Artist,
    pub album: Album,
    pub playlist: Option<Playlist>,
    /// Position within the collection it was requested with.
    pub position: Option<usize>,
    pub duration: Duration,

    /// Content checksum. Empty when the track was not encoded yet.
    pub md5: String,
    pub media_version: String,
    #[redact]
    pub track_token: String,
    pub token_expiry: Option<SystemTime>,
    pub filesizes: HashMap<Format, FileSize>,

    /// Whether this is a user-uploaded file.
    pub local: bool,

    /// Resolved stream URLs per format.
    #[redact]
    pub urls: HashMap<Format, Url>,
    /// Selected format.
    pub bitrate: Option<Format>,
    /// Whether this track was found through metadata search.
    pub searched: bool,
}

impl Track {
    /// Returns a copy of this track with the essential data of `data`: the
    /// identity, token, checksum, sizes and fallback of another version. The
    /// descriptive metadata is kept and resolved URLs are dropped.
    #[must_use]
    pub fn with_essentials(&self, data: &TrackData) -> Self {
        Self {
            id: data.id,
            fallback_id: data.fallback_id(),
            duration: data.duration,
            md5: data.md5.clone(),
            media_version: data.media_version.clone(),
            track_token: data.track_token.clone(),
            token_expiry: data.expiry,
            filesizes: Self::declared_sizes(data),
            local: data.id.is_local(),
            urls: HashMap::new(),
            ..self.clone()
        }
    }

    /// Returns a copy of this track carrying the token of `data`.
    #[must_use]
    pub fn with_token(&self, data: &TrackData) -> Self {
        Self {
            track_token: data.track_token.clone(),
            token_expiry: data.expiry,
            ..self.clone()
        }
    }

    fn declared_sizes(data: &TrackData) -> HashMap<Format, FileSize> {
        data.filesizes()
            .into_iter()
            .map(|(format, bytes)| {
                (
                    format,
                    FileSize {
                        bytes,
                        tested: false,
                    },
                )
            })
            .collect()
    }

    /// Whether the track has been encoded by the service.
    #[must_use]
    pub fn is_encoded(&self) -> bool {
        !self.md5.is_empty()
    }

    /// Whether the track token expired at `now`. A track without a known
    /// expiry is considered expired.
    #[must_use]
    pub fn is_token_expired(&self, now: SystemTime) -> bool {
        self.token_expiry.is_none_or(|expiry| now > expiry)
    }

    /// Sizes of local files are declared as the miscellaneous format.
    fn size_key(format: Format) -> Format {
        match format {
            Format::LOCAL => Format::DEFAULT,
            other => other,
        }
    }

    /// Known payload size of `format`, zero when unknown or unavailable.
    #[must_use]
    pub fn filesize(&self, format: Format) -> u64 {
        self.filesizes
            .get(&Self::size_key(format))
            .map_or(0, |size| size.bytes)
    }

    /// Whether `format` was tested and found to be missing.
    #[must_use]
    pub fn is_unavailable(&self, format: Format) -> bool {
        self.filesizes
            .get(&Self::size_key(format))
            .is_some_and(|size| size.tested && size.bytes == 0)
    }

    /// Records the size observed when probing `format`.
    pub fn record_probe(&mut self, format: Format, bytes: u64) {
        self.filesizes.insert(
            Self::size_key(format),
            FileSize {
                bytes,
                tested: true,
            },
        );
    }

    /// Marks `format` as unavailable so that selection skips it.
    pub fn mark_unavailable(&mut self, format: Format) {
        self.record_probe(format, 0);
        self.urls.remove(&format);
    }

    /// URL resolved for the selected format.
    #[must_use]
    pub fn download_url(&self) -> Option<&Url> {
        self.bitrate.and_then(|format| self.urls.get(&format))
    }

    #[must_use]
    pub fn item_data(&self) -> ItemData {
        ItemData {
            id: self.id,
            title: self.title.clone(),
            artist: self.artist.name.clone(),
        }
    }
}

impl From<TrackData> for Track {
    fn from(data: TrackData) -> Self {
        Self {
            id: data.id,
            fallback_id: data.fallback_id(),
            albums_fallback: data.albums_fallback.iter().map(|album| album.id).collect(),
            isrc: data.isrc.clone(),
            title: data.title.split_whitespace().collect::<Vec<_>>().join(" "),
            artist: Artist::new(0, data.artist.clone()),
            album: Album {
                id: data.album_id,
                title: data.album_title.clone(),
                artist: Artist::new(0, data.artist.clone()),
                picture: Picture::new(data.album_picture.clone(), "cover"),
                ..Album::default()
            },
            duration: data.duration,
            md5: data.md5.clone(),
            media_version: data.media_version.clone(),
            track_token: data.track_token.clone(),
            token_expiry: data.expiry,
            filesizes: Self::declared_sizes(&data),
            local: data.id.is_local(),
            ..Self::default()
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: \"{} - {}\"", self.id, self.artist.name, self.title)?;
        if let Some(expiry) = self.token_expiry {
            if expiry <= SystemTime::now() {
                write!(f, " (token expired {})", OffsetDateTime::from(expiry))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(id: i64) -> TrackData {
        TrackData {
            id: TrackId::from(id),
            title: format!("Version {id}"),
            md5: format!("{id:032x}"),
            media_version: "2".to_owned(),
            track_token: format!("token-{id}"),
            filesize_flac: 30_000_000,
            ..TrackData::default()
        }
    }

    #[test]
    fn substitution_leaves_original_untouched() {
        let mut original = Track::from(data(1));
        original.searched = true;
        original
            .urls
            .insert(Format::FLAC, Url::parse("https://example.com/1").unwrap());

        let substitute = original.with_essentials(&data(2));

        assert_eq!(substitute.id, TrackId::from(2));
        assert_eq!(substitute.track_token, "token-2");
        assert_eq!(substitute.title, "Version 1");
        assert!(substitute.searched);
        assert!(substitute.urls.is_empty());

        assert_eq!(original.id, TrackId::from(1));
        assert_eq!(original.urls.len(), 1);
    }

    #[test]
    fn unavailable_formats_are_remembered() {
        let mut track = Track::from(data(1));
        assert_eq!(track.filesize(Format::FLAC), 30_000_000);

        track.mark_unavailable(Format::FLAC);
        assert_eq!(
            track.filesizes[&Format::FLAC],
            FileSize {
                bytes: 0,
                tested: true
            }
        );
    }

    #[test]
    fn tokens_without_expiry_are_expired() {
        let mut track = Track::from(data(1));
        assert!(track.is_token_expired(SystemTime::now()));

        track.token_expiry = Some(SystemTime::now() + Duration::from_secs(3600));
        assert!(!track.is_token_expired(SystemTime::now()));
        assert!(!format!("{track:?}").contains("token-1"));
    }

    #[test]
    fn ids_parse_and_classify() {
        assert_eq!("-42".parse::<TrackId>().unwrap(), TrackId::from(-42));
        assert!(TrackId::from(-42).is_local());
        assert!(TrackId::default().is_none());
        assert!("abc".parse::<TrackId>().is_err());
    }
}
