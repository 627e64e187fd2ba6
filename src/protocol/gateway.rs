//! Records as returned by Deezer's gateway API.
//!
//! Only the fields needed to resolve and stream a track are modelled. The
//! gateway is inconsistent about number encoding, so identifiers and sizes
//! are accepted both as strings and as numbers.
//!
//! # Wire Format
//!
//! ```json
//! {
//!     "SNG_ID": "3135556",
//!     "SNG_TITLE": "Harder, Better, Faster, Stronger",
//!     "ART_NAME": "Daft Punk",
//!     "ALB_ID": "302127",
//!     "ALB_TITLE": "Discovery",
//!     "ALB_PICTURE": "2e018122cb56986277102d2041a592c8",
//!     "ISRC": "GBDUW0000059",
//!     "MD5_ORIGIN": "51afcde9f56a132096c0496cc95eb24b",
//!     "MEDIA_VERSION": "4",
//!     "TRACK_TOKEN": "secret",
//!     "TRACK_TOKEN_EXPIRE": 1700000000,
//!     "DURATION": "224",
//!     "FILESIZE_MP3_128": "3596157",
//!     "FILESIZE_MP3_320": "8990592",
//!     "FILESIZE_FLAC": "0",
//!     "FALLBACK": { "SNG_ID": "..." },
//!     "ALBUM_FALLBACK": [{ "ALB_ID": "..." }]
//! }
//! ```

use std::{
    collections::HashMap,
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};
use serde_with::{
    formats::Flexible, serde_as, DisplayFromStr, DurationSeconds, PickFirst, TimestampSeconds,
};
use veil::Redact;

use super::media::Format;
use crate::track::{AlbumId, TrackId};

/// Essential track data from the gateway.
#[serde_as]
#[derive(Clone, Default, PartialEq, Deserialize, Serialize, Redact)]
pub struct TrackData {
    /// Track identifier. Negative for user-uploaded files.
    #[serde(rename = "SNG_ID")]
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub id: TrackId,

    #[serde(default, rename = "SNG_TITLE")]
    pub title: String,

    /// Main artist only.
    #[serde(default, rename = "ART_NAME")]
    pub artist: String,

    #[serde(default, rename = "ALB_ID")]
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub album_id: AlbumId,

    #[serde(default, rename = "ALB_TITLE")]
    pub album_title: String,

    /// Checksum of the album cover.
    #[serde(default, rename = "ALB_PICTURE")]
    pub album_picture: String,

    #[serde(default, rename = "ISRC")]
    pub isrc: String,

    /// Content checksum. Empty when the track was not encoded yet.
    #[serde(default, rename = "MD5_ORIGIN")]
    pub md5: String,

    #[serde(default, rename = "MEDIA_VERSION")]
    pub media_version: String,

    /// Token authorising stream URL resolution.
    #[serde(default, rename = "TRACK_TOKEN")]
    #[redact]
    pub track_token: String,

    #[serde(default, rename = "TRACK_TOKEN_EXPIRE")]
    #[serde_as(as = "Option<TimestampSeconds<i64, Flexible>>")]
    pub expiry: Option<SystemTime>,

    #[serde(default, rename = "DURATION")]
    #[serde_as(as = "DurationSeconds<String, Flexible>")]
    pub duration: Duration,

    #[serde(default, rename = "FILESIZE_MP3_128")]
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub filesize_mp3_128: u64,

    #[serde(default, rename = "FILESIZE_MP3_320")]
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub filesize_mp3_320: u64,

    #[serde(default, rename = "FILESIZE_FLAC")]
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub filesize_flac: u64,

    #[serde(default, rename = "FILESIZE_MP4_RA1")]
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub filesize_mp4_ra1: u64,

    #[serde(default, rename = "FILESIZE_MP4_RA2")]
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub filesize_mp4_ra2: u64,

    #[serde(default, rename = "FILESIZE_MP4_RA3")]
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub filesize_mp4_ra3: u64,

    /// Size of whatever MP3 is on file.
    #[serde(default, rename = "FILESIZE")]
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub filesize: u64,

    /// Alternative version to use when this one is unavailable.
    #[serde(default, rename = "FALLBACK")]
    pub fallback: Option<Fallback>,

    /// Other albums carrying a recording with the same ISRC.
    #[serde(default, rename = "ALBUM_FALLBACK")]
    pub albums_fallback: Vec<AlbumRef>,
}

impl TrackData {
    /// Identifier of the fallback version, if there is one.
    #[must_use]
    pub fn fallback_id(&self) -> Option<TrackId> {
        self.fallback
            .as_ref()
            .map(|fallback| fallback.id)
            .filter(|id| !id.is_none())
    }

    /// Declared payload size per format.
    #[must_use]
    pub fn filesizes(&self) -> HashMap<Format, u64> {
        HashMap::from([
            (Format::MP3_128, self.filesize_mp3_128),
            (Format::MP3_320, self.filesize_mp3_320),
            (Format::FLAC, self.filesize_flac),
            (Format::MP4_RA1, self.filesize_mp4_ra1),
            (Format::MP4_RA2, self.filesize_mp4_ra2),
            (Format::MP4_RA3, self.filesize_mp4_ra3),
            (Format::DEFAULT, self.filesize),
        ])
    }
}

/// Reference to a fallback track.
#[serde_as]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct Fallback {
    #[serde(rename = "SNG_ID")]
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub id: TrackId,
}

/// Reference to an album.
#[serde_as]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct AlbumRef {
    #[serde(rename = "ALB_ID")]
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub id: AlbumId,
}

/// Streaming entitlements of the logged in account.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct User {
    #[serde(default)]
    pub can_stream_lossless: bool,

    #[serde(default)]
    pub can_stream_hq: bool,

    /// ISO 3166-1 alpha-2 country code.
    #[serde(default)]
    pub country: String,
}
