//! Stream address codec.
//!
//! Deezer's CDN addresses a payload by an obfuscated path derived from the
//! track identifiers:
//!
//! 1. Join checksum, format code, track ID and media version with `0xA4`
//! 2. Prefix the MD5 hex digest of the joined string, delimit with `0xA4`
//! 3. Pad with `.` to the next multiple of 16 bytes, adding a full block
//!    when already aligned
//! 4. Encrypt with AES-128 in ECB mode under a fixed key
//! 5. Hex-encode in lowercase
//!
//! Two URL families are built from the same path: `mobile` (encrypted
//! payload) and `api`.
//!
//! # Examples
//!
//! ```rust
//! use deeload::{codec, protocol::media::Format};
//!
//! let url = codec::crypted_stream_url(track_id, &md5, "1", Format::MP3_128)?;
//! let path = codec::reverse_stream_url(url.as_str())?;
//! assert_eq!(path.track_id, track_id);
//! ```

use aes::{
    cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit},
    Aes128,
};
use md5::{Digest, Md5};
use url::Url;

use crate::{
    error::{Error, Result},
    protocol::media::Format,
    track::TrackId,
};

/// Key of the path cipher.
const PATH_KEY: &[u8; 16] = b"jo6aey6haid2Teih";

/// Delimiter between path fields.
const DELIMITER: u8 = 0xA4;

/// AES block length.
const BLOCK_SIZE: usize = 16;

/// Decoded stream path.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct StreamPath {
    pub track_id: TrackId,
    pub md5: String,
    pub media_version: String,
    pub format: Format,
}

fn cipher() -> Aes128 {
    Aes128::new(GenericArray::from_slice(PATH_KEY))
}

/// Derives the obfuscated path for a payload.
#[must_use]
pub fn stream_path(track_id: TrackId, md5: &str, media_version: &str, format: Format) -> String {
    let fields = [
        md5.to_owned(),
        format.code().to_string(),
        track_id.to_string(),
        media_version.to_owned(),
    ];
    let joined = fields.map(String::into_bytes).join(&DELIMITER);
    let digest = format!("{:x}", Md5::digest(&joined));

    let mut buffer = Vec::with_capacity(digest.len() + joined.len() + 2 * BLOCK_SIZE);
    buffer.extend_from_slice(digest.as_bytes());
    buffer.push(DELIMITER);
    buffer.extend_from_slice(&joined);
    buffer.push(DELIMITER);

    let padding = BLOCK_SIZE - buffer.len() % BLOCK_SIZE;
    buffer.resize(buffer.len() + padding, b'.');

    let cipher = cipher();
    for block in buffer.chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }

    hex::encode(buffer)
}

/// Decodes an obfuscated path back into its identifiers.
///
/// # Errors
///
/// Returns `Error::InvalidArgument` if the path is not valid hex, is not a
/// whole number of cipher blocks, or does not decrypt into the expected
/// fields.
pub fn reverse_stream_path(path: &str) -> Result<StreamPath> {
    let mut buffer = hex::decode(path.trim())?;
    if buffer.is_empty() || buffer.len() % BLOCK_SIZE != 0 {
        return Err(Error::invalid_argument(format!(
            "stream path of {} bytes is not a multiple of {BLOCK_SIZE}",
            buffer.len()
        )));
    }

    let cipher = cipher();
    for block in buffer.chunks_exact_mut(BLOCK_SIZE) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }

    let fields = buffer
        .split(|byte| *byte == DELIMITER)
        .map(|field| {
            String::from_utf8(field.to_vec())
                .map_err(|_| Error::invalid_argument("stream path field is not valid text"))
        })
        .collect::<Result<Vec<_>>>()?;

    let [_digest, md5, format, track_id, media_version, _padding] =
        <[String; 6]>::try_from(fields).map_err(|fields| {
            Error::invalid_argument(format!(
                "stream path has {} fields instead of 6",
                fields.len()
            ))
        })?;

    Ok(StreamPath {
        track_id: track_id.parse()?,
        md5,
        media_version,
        format: Format::try_from(format.parse::<u8>()?)?,
    })
}

fn cdn_url(
    family: &str,
    track_id: TrackId,
    md5: &str,
    media_version: &str,
    format: Format,
) -> Result<Url> {
    let shard = md5
        .chars()
        .next()
        .ok_or_else(|| Error::invalid_argument(format!("track {track_id} has no checksum")))?;
    let path = stream_path(track_id, md5, media_version, format);
    let url = format!("https://e-cdns-proxy-{shard}.dzcdn.net/{family}/1/{path}").parse()?;
    Ok(url)
}

/// URL of the encrypted payload.
///
/// # Errors
///
/// Returns `Error::InvalidArgument` if `md5` is empty.
pub fn crypted_stream_url(
    track_id: TrackId,
    md5: &str,
    media_version: &str,
    format: Format,
) -> Result<Url> {
    cdn_url("mobile", track_id, md5, media_version, format)
}

/// URL of the payload through the `api` family.
///
/// # Errors
///
/// Returns `Error::InvalidArgument` if `md5` is empty.
pub fn stream_url(
    track_id: TrackId,
    md5: &str,
    media_version: &str,
    format: Format,
) -> Result<Url> {
    cdn_url("api", track_id, md5, media_version, format)
}

/// Decodes the path of a stream URL of either family.
///
/// # Errors
///
/// Returns `Error::InvalidArgument` if the URL has no `/1/` segment or its
/// path does not decode.
pub fn reverse_stream_url(url: &str) -> Result<StreamPath> {
    let (_, path) = url
        .split_once("/1/")
        .ok_or_else(|| Error::invalid_argument(format!("{url} is not a stream url")))?;
    reverse_stream_path(path)
}
