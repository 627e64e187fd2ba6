//! Deezer track retrieval.
//!
//! Turns tracks into decrypted files on disk:
//!
//! * [`codec`] derives and reverses the obfuscated stream addresses
//! * [`decrypt`] undoes the stripe encryption of payloads
//! * [`selector`] picks the best format the account may stream
//! * [`streamer`] writes payloads with bounded, resumable retries
//! * [`downloader`] runs single tracks and collections through all of the
//!   above, with fallbacks and post-processing
//!
//! Metadata, tagging and artwork are provided by the application through
//! the [`catalog::Catalog`], [`library::Library`] and [`artwork::Artwork`]
//! traits. Progress is reported to an [`events::Listener`].
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod artwork;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod decrypt;
pub mod downloader;
pub mod error;
pub mod events;
pub mod http;
pub mod job;
pub mod library;
pub mod metadata;
pub mod protocol;
pub mod resolver;
pub mod selector;
pub mod streamer;
pub mod track;

#[cfg(test)]
mod testing;
