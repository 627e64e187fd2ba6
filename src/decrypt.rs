//! Chunk decryption for Deezer's protected media content.
//!
//! Payloads of "crypted" streams are delivered in stripes:
//! * Content is read in chunks of three 2KB blocks
//! * The first block of every full chunk is encrypted
//! * Encryption uses Blowfish in CBC mode with a fixed IV
//! * The cipher state is reset for each chunk
//!
//! A chunk shorter than one block (the tail of a stream) is never encrypted.
//!
//! Some encodings additionally carry a run of zero bytes in front of the
//! container header. [`ChunkCipher`] removes that run from the first chunk of
//! a track.
//!
//! # Examples
//!
//! ```rust
//! use deeload::{decrypt::ChunkCipher, track::TrackId};
//!
//! # fn main() -> deeload::error::Result<()> {
//! let mut cipher = ChunkCipher::new(TrackId::from(3_135_556), true);
//! let mut chunk = vec![0x2a; ChunkCipher::CHUNK_SIZE];
//! cipher.process(&mut chunk)?;
//! # Ok(())
//! # }
//! ```

use std::ops::Deref;

use blowfish::{
    cipher::{BlockDecryptMut, KeyIvInit},
    Blowfish,
};
use cbc::cipher::block_padding::NoPadding;
use md5::{Digest, Md5};
use url::Url;

use crate::{
    error::{Error, Result},
    track::TrackId,
};

/// Length of decryption keys in bytes.
pub const KEY_LENGTH: usize = 16;

/// Raw key bytes.
pub type RawKey = [u8; KEY_LENGTH];

/// Secret mixed into every track key.
pub const TRACK_SECRET: &[u8; KEY_LENGTH] = b"g4el58wc0zvf9na1";

/// Validated decryption key.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Key(RawKey);

impl Deref for Key {
    type Target = RawKey;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Calculates the track-specific decryption key.
///
/// Each key byte combines both halves of the lowercase MD5 hex digest of the
/// decimal track ID with [`TRACK_SECRET`].
#[must_use]
pub fn key_for_track_id(track_id: TrackId) -> Key {
    let track_hash = format!("{:x}", Md5::digest(track_id.to_string()));
    let track_hash = track_hash.as_bytes();

    let mut key = RawKey::default();
    for i in 0..KEY_LENGTH {
        key[i] = track_hash[i] ^ track_hash[i + KEY_LENGTH] ^ TRACK_SECRET[i];
    }
    Key(key)
}

/// Whether the payload behind `url` is delivered encrypted.
#[must_use]
pub fn is_crypted(url: &Url) -> bool {
    let path = url.path();
    path.contains("/mobile/") || path.contains("/media/")
}

/// Decrypts the leading block of a chunk in place.
///
/// Chunks shorter than one block are left untouched, as are all bytes past
/// the first block.
///
/// # Errors
///
/// Returns `Error::Internal` if the cipher cannot be initialised or rejects
/// the block.
pub fn decrypt_chunk(key: &Key, chunk: &mut [u8]) -> Result<()> {
    if chunk.len() < ChunkCipher::BLOCK_SIZE {
        return Ok(());
    }

    let cipher = cbc::Decryptor::<Blowfish>::new_from_slices(&**key, ChunkCipher::CBC_BF_IV)
        .map_err(|e| Error::internal(e.to_string()))?;
    cipher
        .decrypt_padded_mut::<NoPadding>(&mut chunk[..ChunkCipher::BLOCK_SIZE])
        .map_err(|e| Error::internal(e.to_string()))?;

    Ok(())
}

/// Removes the leading zero run from the first chunk of a payload.
///
/// Only applies when the chunk starts with a zero byte and does not carry an
/// `ftyp` box header at offset 4. A chunk made of zeros only is emptied.
///
/// Returns the number of bytes removed.
pub fn strip_leading_padding(chunk: &mut Vec<u8>) -> usize {
    if chunk.first() != Some(&0) || chunk.get(4..8) == Some(b"ftyp".as_slice()) {
        return 0;
    }

    let start = chunk
        .iter()
        .position(|byte| *byte != 0)
        .unwrap_or(chunk.len());
    chunk.drain(..start);
    start
}

/// Per-track chunk processor.
///
/// Feed it the chunks of one payload in order, each [`Self::CHUNK_SIZE`]
/// bytes long except the last.
#[derive(Clone, Debug)]
pub struct ChunkCipher {
    key: Option<Key>,
    first: bool,
}

impl ChunkCipher {
    /// Fixed IV for CBC decryption.
    const CBC_BF_IV: &[u8; 8] = b"\x00\x01\x02\x03\x04\x05\x06\x07";

    /// Size of each block in bytes (2KB).
    pub const BLOCK_SIZE: usize = 2 * 1024;

    /// Number of blocks in a stripe (3).
    pub const STRIPE_COUNT: usize = 3;

    /// Size of a chunk as read from the stream.
    pub const CHUNK_SIZE: usize = Self::BLOCK_SIZE * Self::STRIPE_COUNT;

    /// Creates a processor for a payload starting at offset zero.
    #[must_use]
    pub fn new(track_id: TrackId, crypted: bool) -> Self {
        Self {
            key: crypted.then(|| key_for_track_id(track_id)),
            first: true,
        }
    }

    /// Creates a processor for a payload resumed somewhere after its start,
    /// which never carries the leading zero run.
    #[must_use]
    pub fn resumed(track_id: TrackId, crypted: bool) -> Self {
        Self {
            first: false,
            ..Self::new(track_id, crypted)
        }
    }

    #[must_use]
    pub fn is_crypted(&self) -> bool {
        self.key.is_some()
    }

    /// Decrypts one chunk in place and repairs it if it's the first one.
    ///
    /// # Errors
    ///
    /// Returns an error if decryption fails.
    pub fn process(&mut self, chunk: &mut Vec<u8>) -> Result<()> {
        if let Some(key) = self.key.as_ref() {
            decrypt_chunk(key, chunk)?;
        }

        if std::mem::take(&mut self.first) {
            let stripped = strip_leading_padding(chunk);
            if stripped > 0 {
                debug!("stripped {stripped} leading zero bytes");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use blowfish::cipher::{BlockEncryptMut, KeyIvInit};

    use super::*;

    fn encrypt_block(key: &Key, block: &mut [u8]) {
        let cipher =
            cbc::Encryptor::<Blowfish>::new_from_slices(&**key, ChunkCipher::CBC_BF_IV).unwrap();
        let len = block.len();
        cipher
            .encrypt_padded_mut::<NoPadding>(block, len)
            .unwrap();
    }

    #[test]
    fn key_mixes_digest_halves_with_secret() {
        let id = TrackId::from(3_135_556);
        let hash = format!("{:x}", Md5::digest("3135556"));
        let hash = hash.as_bytes();

        let key = key_for_track_id(id);
        for i in 0..KEY_LENGTH {
            assert_eq!(key[i], hash[i] ^ hash[i + 16] ^ TRACK_SECRET[i]);
        }
    }

    #[test]
    fn only_the_leading_block_is_decrypted() {
        let key = key_for_track_id(TrackId::from(111));

        let plain: Vec<u8> = b"A".repeat(16).repeat(ChunkCipher::BLOCK_SIZE / 16);
        let tail: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();

        let mut chunk = plain.clone();
        encrypt_block(&key, &mut chunk);
        assert_ne!(chunk, plain);
        chunk.extend_from_slice(&tail);

        decrypt_chunk(&key, &mut chunk).unwrap();
        assert_eq!(&chunk[..ChunkCipher::BLOCK_SIZE], plain.as_slice());
        assert_eq!(&chunk[ChunkCipher::BLOCK_SIZE..], tail.as_slice());
    }

    #[test]
    fn short_chunks_pass_through() {
        let key = key_for_track_id(TrackId::from(111));
        let original = vec![7u8; ChunkCipher::BLOCK_SIZE - 1];
        let mut chunk = original.clone();
        decrypt_chunk(&key, &mut chunk).unwrap();
        assert_eq!(chunk, original);
    }

    #[test]
    fn leading_zeros_are_stripped() {
        let mut chunk = vec![0, 0, 0, 0, 0x66, 0x4c, 0x61, 0x43, 0, 1];
        assert_eq!(strip_leading_padding(&mut chunk), 4);
        assert_eq!(chunk, vec![0x66, 0x4c, 0x61, 0x43, 0, 1]);
    }

    #[test]
    fn container_header_is_kept() {
        let original = vec![0, 0, 0, 0x20, b'f', b't', b'y', b'p', b'M', b'4', b'A'];
        let mut chunk = original.clone();
        assert_eq!(strip_leading_padding(&mut chunk), 0);
        assert_eq!(chunk, original);

        let original = vec![b'I', b'D', b'3', 0, 0];
        let mut chunk = original.clone();
        assert_eq!(strip_leading_padding(&mut chunk), 0);
        assert_eq!(chunk, original);
    }

    #[test]
    fn only_the_first_chunk_is_repaired() {
        let mut cipher = ChunkCipher::new(TrackId::from(1), false);
        assert!(!cipher.is_crypted());

        let mut first = vec![0, 0, 1, 2, 3, 4, 5, 6, 7];
        cipher.process(&mut first).unwrap();
        assert_eq!(first, vec![1, 2, 3, 4, 5, 6, 7]);

        let mut second = vec![0, 0, 1, 2, 3, 4, 5, 6, 7];
        cipher.process(&mut second).unwrap();
        assert_eq!(second, vec![0, 0, 1, 2, 3, 4, 5, 6, 7]);

        let mut resumed = ChunkCipher::resumed(TrackId::from(1), false);
        let mut chunk = vec![0, 0, 1];
        resumed.process(&mut chunk).unwrap();
        assert_eq!(chunk, vec![0, 0, 1]);
    }

    #[test]
    fn crypted_urls_are_recognised() {
        let mobile = Url::parse("https://e-cdns-proxy-0.dzcdn.net/mobile/1/abcdef").unwrap();
        let media = Url::parse("https://media.deezer.com/media/1/abc").unwrap();
        let api = Url::parse("https://e-cdns-proxy-0.dzcdn.net/api/1/abcdef").unwrap();
        assert!(is_crypted(&mobile));
        assert!(is_crypted(&media));
        assert!(!is_crypted(&api));
    }
}
