//! Download settings.
//!
//! Settings are read from a TOML file. Every field has a default, so an
//! empty file is a valid configuration:
//!
//! ```toml
//! download_location = "/music"
//! fallback_bitrate = true
//! overwrite_file = "b"
//! connect_timeout = 10
//! ```
//!
//! Writing settings back is left to the application.

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DeserializeFromStr, DurationSeconds, SerializeDisplay};

use crate::{
    error::{Error, Result},
    http::USER_AGENT,
    metadata::ImageFormat,
};

/// What to do when the destination file already exists.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, Hash, DeserializeFromStr, SerializeDisplay,
)]
pub enum Overwrite {
    /// Download again and tag.
    Overwrite,
    /// Keep the existing file.
    #[default]
    DontOverwrite,
    /// Keep an existing file with any audio extension.
    DontCheckExt,
    /// Download to a numbered sibling.
    KeepBoth,
    /// Only tag the existing file.
    OnlyTags,
}

impl Overwrite {
    /// Single-letter alias of the policy.
    #[must_use]
    pub fn letter(self) -> char {
        match self {
            Self::Overwrite => 'y',
            Self::DontOverwrite => 'n',
            Self::DontCheckExt => 'e',
            Self::KeepBoth => 'b',
            Self::OnlyTags => 't',
        }
    }
}

impl FromStr for Overwrite {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let policy = match s.trim() {
            "y" | "Overwrite" => Self::Overwrite,
            "n" | "DontOverwrite" => Self::DontOverwrite,
            "e" | "DontCheckExt" => Self::DontCheckExt,
            "b" | "KeepBoth" => Self::KeepBoth,
            "t" | "OnlyTags" => Self::OnlyTags,
            _ => return Err(Error::invalid_argument(format!("unknown overwrite policy {s}"))),
        };
        Ok(policy)
    }
}

impl fmt::Display for Overwrite {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// Format of artwork saved next to the downloads.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, Hash, DeserializeFromStr, SerializeDisplay,
)]
pub enum ArtworkFormat {
    #[default]
    Jpg,
    Png,
}

impl FromStr for ArtworkFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(Self::Jpg),
            "png" => Ok(Self::Png),
            _ => Err(Error::invalid_argument(format!("unknown artwork format {s}"))),
        }
    }
}

impl fmt::Display for ArtworkFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Jpg => write!(f, "jpg"),
            Self::Png => write!(f, "png"),
        }
    }
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Root directory downloads are written under.
    pub download_location: PathBuf,

    /// Directory embedded artwork is cached in.
    pub artwork_cache_dir: PathBuf,

    /// Number of collection items downloaded at the same time.
    pub queue_concurrency: usize,

    /// Build legacy URLs when no URL can be authorised.
    pub feeling_lucky: bool,
    /// Settle for lower formats than the one requested by the job.
    pub fallback_bitrate: bool,
    /// Look up unavailable tracks by artist, title and album.
    pub fallback_search: bool,
    /// Look up unavailable tracks by ISRC on other albums.
    pub fallback_isrc: bool,

    pub overwrite_file: Overwrite,

    pub log_errors: bool,
    pub log_searched: bool,
    pub create_m3u8_file: bool,
    /// Name of the manifest, without extension.
    pub playlist_filename: String,

    pub save_artwork: bool,
    pub save_artwork_artist: bool,
    pub embedded_artwork_size: u32,
    pub embedded_artwork_png: bool,
    pub local_artwork_size: u32,
    pub local_artwork_format: ArtworkFormat,
    pub jpeg_image_quality: u8,
    pub cover_image_template: String,
    pub artist_image_template: String,

    /// Shell command run after a job, with `%folder%` and `%filename%`
    /// substituted.
    pub execute_command: String,

    pub user_agent: String,

    #[serde_as(as = "DurationSeconds<u64>")]
    pub connect_timeout: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub read_timeout: Duration,

    /// Times a stream is resumed after a transient failure.
    pub stream_retries: u32,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub retry_min_delay: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub retry_max_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let music = std::env::var_os("HOME")
            .map_or_else(|| PathBuf::from("."), PathBuf::from)
            .join("Music")
            .join("deeload");

        Self {
            download_location: music,
            artwork_cache_dir: std::env::temp_dir().join("deeload-imgs"),
            queue_concurrency: 3,
            feeling_lucky: false,
            fallback_bitrate: false,
            fallback_search: false,
            fallback_isrc: false,
            overwrite_file: Overwrite::default(),
            log_errors: true,
            log_searched: false,
            create_m3u8_file: false,
            playlist_filename: "playlist".to_owned(),
            save_artwork: true,
            save_artwork_artist: false,
            embedded_artwork_size: 800,
            embedded_artwork_png: false,
            local_artwork_size: 1400,
            local_artwork_format: ArtworkFormat::default(),
            jpeg_image_quality: 90,
            cover_image_template: "cover".to_owned(),
            artist_image_template: "folder".to_owned(),
            execute_command: String::new(),
            user_agent: USER_AGENT.to_owned(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            stream_retries: 10,
            retry_min_delay: Duration::from_secs(2),
            retry_max_delay: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Parses settings from TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or a setting is invalid.
    pub fn parse(toml: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads settings from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or its contents are
    /// invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = Self::parse(&contents)?;
        debug!("loaded settings from {}", path.display());
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.queue_concurrency == 0 {
            return Err(Error::invalid_argument("queue concurrency must be at least 1"));
        }
        if self.retry_min_delay > self.retry_max_delay {
            return Err(Error::invalid_argument(
                "retry minimum delay exceeds the maximum delay",
            ));
        }
        Ok(())
    }

    /// Format of embedded artwork.
    #[must_use]
    pub fn embedded_image_format(&self) -> ImageFormat {
        if self.embedded_artwork_png {
            ImageFormat::Png
        } else {
            ImageFormat::Jpg(self.jpeg_image_quality)
        }
    }

    /// Format of artwork saved next to the downloads.
    #[must_use]
    pub fn local_image_format(&self) -> ImageFormat {
        match self.local_artwork_format {
            ArtworkFormat::Jpg => ImageFormat::Jpg(self.jpeg_image_quality),
            ArtworkFormat::Png => ImageFormat::Png,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn empty_file_takes_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.queue_concurrency, 3);
        assert_eq!(config.overwrite_file, Overwrite::DontOverwrite);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.embedded_image_format(), ImageFormat::Jpg(90));
        assert!(config.artwork_cache_dir.ends_with("deeload-imgs"));
    }

    #[test]
    fn letter_aliases_are_accepted() {
        let config = Config::parse(
            r#"
            overwrite_file = "b"
            local_artwork_format = "png"
            stream_retries = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.overwrite_file, Overwrite::KeepBoth);
        assert_eq!(config.local_image_format(), ImageFormat::Png);
        assert_eq!(config.stream_retries, 3);
        assert_eq!("OnlyTags".parse::<Overwrite>().unwrap(), Overwrite::OnlyTags);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let error = Config::parse("queue_concurrency = 0").unwrap_err();
        assert_eq!(error.kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn reads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "fallback_search = true\nread_timeout = 5\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert!(config.fallback_search);
        assert_eq!(config.read_timeout, Duration::from_secs(5));
    }
}
