//! Descriptive catalog records: albums, artists, playlists and their
//! artwork.
//!
//! These are snapshots handed out by the catalog. Retrieval only reads
//! [`Album::disc_total`]; everything else is for the library collaborator
//! that names and tags files.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::track::AlbumId;

/// Host serving content-addressed artwork.
pub const IMAGE_HOST: &str = "e-cdns-images.dzcdn.net";

/// Encoding requested for an artwork URL.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum ImageFormat {
    /// JPEG at the given quality (0-100).
    Jpg(u8),
    Png,
}

impl ImageFormat {
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpg(_) => "jpg",
            Self::Png => "png",
        }
    }
}

/// Reference to an image.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum Picture {
    /// Content-addressed image on Deezer's image CDN.
    Deezer {
        /// Image checksum. Empty when there is no image.
        md5: String,
        /// Image family: `cover`, `artist`, `playlist`, ...
        kind: String,
    },

    /// Image with a fixed URL, like those of external catalogs.
    Static(String),
}

impl Default for Picture {
    fn default() -> Self {
        Self::Deezer {
            md5: String::new(),
            kind: "cover".to_owned(),
        }
    }
}

impl Picture {
    #[must_use]
    pub fn new(md5: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::Deezer {
            md5: md5.into(),
            kind: kind.into(),
        }
    }

    /// Recognises image CDN URLs like
    /// `https://e-cdns-images.dzcdn.net/images/artist/<md5>/56x56-000000-80-0-0.jpg`
    /// and keeps anything else as a static picture.
    #[must_use]
    pub fn from_url(url: &str) -> Self {
        if url.contains("dzcdn.net") {
            if let Some((_, path)) = url.split_once("images/") {
                let mut parts = path.splitn(3, '/');
                if let (Some(kind), Some(md5), Some(_)) = (parts.next(), parts.next(), parts.next())
                {
                    return Self::new(md5, kind);
                }
            }
        }

        Self::Static(url.to_owned())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Deezer { md5, .. } => md5.is_empty(),
            Self::Static(url) => url.is_empty(),
        }
    }

    #[must_use]
    pub fn is_static(&self) -> bool {
        matches!(self, Self::Static(_))
    }

    /// URL of the image at `size`x`size` pixels. Static pictures ignore both
    /// arguments.
    #[must_use]
    pub fn url(&self, size: u32, format: ImageFormat) -> String {
        match self {
            Self::Static(url) => url.clone(),
            Self::Deezer { md5, kind } => {
                let base = format!("https://{IMAGE_HOST}/images/{kind}/{md5}/{size}x{size}");
                match format {
                    ImageFormat::Jpg(quality) => format!("{base}-000000-{quality}-0-0.jpg"),
                    ImageFormat::Png => format!("{base}-none-100-0-0.png"),
                }
            }
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct Artist {
    pub id: u64,
    pub name: String,
    pub picture: Picture,
}

impl Artist {
    #[must_use]
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            picture: Picture::new("", "artist"),
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct Album {
    pub id: AlbumId,
    pub title: String,
    pub artist: Artist,
    pub picture: Picture,
    pub track_total: usize,
    pub disc_total: usize,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct Playlist {
    pub id: u64,
    pub title: String,
    pub owner: String,
    pub picture: Picture,
    pub track_total: usize,
}

impl fmt::Display for Album {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: \"{} - {}\"", self.id, self.artist.name, self.title)
    }
}

impl fmt::Display for Playlist {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: \"{}\"", self.id, self.title)
    }
}
