//! Audio formats as known to Deezer's media services.
//!
//! Every format has a numeric code used in stream paths and as its quality
//! rank, a protocol name used when authorising stream URLs, and a file
//! extension.
//!
//! | Format     | Code | Name       | Extension |
//! |------------|------|------------|-----------|
//! | `LOCAL`    | 0    | `MP3_MISC` | `.mp3`    |
//! | `MP3_128`  | 1    | `MP3_128`  | `.mp3`    |
//! | `MP3_320`  | 3    | `MP3_320`  | `.mp3`    |
//! | `DEFAULT`  | 8    | `MP3_MISC` | `.mp3`    |
//! | `FLAC`     | 9    | `FLAC`     | `.flac`   |
//! | `MP4_RA1`  | 13   | `MP4_RA1`  | `.mp4`    |
//! | `MP4_RA2`  | 14   | `MP4_RA2`  | `.mp4`    |
//! | `MP4_RA3`  | 15   | `MP4_RA3`  | `.mp4`    |
//!
//! The `MP4_RA*` formats are 360 Reality Audio (spatial) encodings.

use std::{fmt, str::FromStr};

use serde_with::{DeserializeFromStr, SerializeDisplay};

use crate::{error::Error, protocol::gateway::User};

/// Audio format and quality level.
#[derive(
    Copy,
    Clone,
    Default,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    DeserializeFromStr,
    SerializeDisplay,
    Debug,
    Hash,
)]
#[expect(non_camel_case_types)]
#[repr(u8)]
pub enum Format {
    /// User-uploaded file (0)
    LOCAL = 0,
    /// 128 kbps MP3 (1)
    MP3_128 = 1,
    /// 320 kbps MP3 (3, default ceiling)
    #[default]
    MP3_320 = 3,
    /// Whatever MP3 the service has on file (8)
    DEFAULT = 8,
    /// FLAC lossless (9)
    FLAC = 9,
    /// 360 Reality Audio, low quality (13)
    MP4_RA1 = 13,
    /// 360 Reality Audio, medium quality (14)
    MP4_RA2 = 14,
    /// 360 Reality Audio, high quality (15)
    MP4_RA3 = 15,
}

impl Format {
    /// Regular candidates, best first.
    pub const STEREO: [Self; 3] = [Self::FLAC, Self::MP3_320, Self::MP3_128];

    /// Spatial candidates, best first.
    pub const SPATIAL: [Self; 3] = [Self::MP4_RA3, Self::MP4_RA2, Self::MP4_RA1];

    /// Numeric code, also the quality rank of the format.
    #[must_use]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Protocol name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::LOCAL | Self::DEFAULT => "MP3_MISC",
            Self::MP3_128 => "MP3_128",
            Self::MP3_320 => "MP3_320",
            Self::FLAC => "FLAC",
            Self::MP4_RA1 => "MP4_RA1",
            Self::MP4_RA2 => "MP4_RA2",
            Self::MP4_RA3 => "MP4_RA3",
        }
    }

    /// File extension including the leading dot.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::FLAC => ".flac",
            Self::MP4_RA1 | Self::MP4_RA2 | Self::MP4_RA3 => ".mp4",
            _ => ".mp3",
        }
    }

    #[must_use]
    pub fn is_spatial(self) -> bool {
        Self::SPATIAL.contains(&self)
    }

    /// Whether the account tier of `user` covers this format.
    ///
    /// Lossless and spatial formats need a lossless subscription, 320 kbps
    /// needs a high quality one.
    #[must_use]
    pub fn is_licensed(self, user: &User) -> bool {
        match self {
            Self::FLAC | Self::MP4_RA1 | Self::MP4_RA2 | Self::MP4_RA3 => {
                user.can_stream_lossless
            }
            Self::MP3_320 => user.can_stream_hq,
            _ => true,
        }
    }
}

impl TryFrom<u8> for Format {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        let format = match code {
            0 => Self::LOCAL,
            1 => Self::MP3_128,
            3 => Self::MP3_320,
            8 => Self::DEFAULT,
            9 => Self::FLAC,
            13 => Self::MP4_RA1,
            14 => Self::MP4_RA2,
            15 => Self::MP4_RA3,
            _ => return Err(Error::invalid_argument(format!("unknown format code {code}"))),
        };
        Ok(format)
    }
}

impl FromStr for Format {
    type Err = Error;

    /// Parses a format from its protocol name, its numeric code, or one of
    /// the usual shorthands (`flac`, `lossless`, `320`, `128`, `360`,
    /// `360_hq`, `360_mq`, `360_lq`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let format = match s.trim().to_lowercase().as_str() {
            "flac" | "lossless" | "9" => Self::FLAC,
            "mp3_320" | "320" | "3" => Self::MP3_320,
            "mp3_128" | "128" | "1" => Self::MP3_128,
            "mp4_ra3" | "360" | "360_hq" | "15" => Self::MP4_RA3,
            "mp4_ra2" | "360_mq" | "14" => Self::MP4_RA2,
            "mp4_ra1" | "360_lq" | "13" => Self::MP4_RA1,
            "mp3_misc" | "default" | "8" => Self::DEFAULT,
            "local" | "0" => Self::LOCAL,
            other => {
                return Err(Error::invalid_argument(format!("unknown format {other}")));
            }
        };
        Ok(format)
    }
}

impl fmt::Display for Format {
    /// Shows the variant name, e.g. "`MP3_320`" or "`DEFAULT`".
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
