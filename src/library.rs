//! File naming and tagging collaborator.
//!
//! Where a track lands on disk and how its tags are written is the business
//! of the application. The orchestrator asks a [`Library`] for both.
//! [`FlatLibrary`] is a minimal implementation that writes singles to the
//! download root and collections to one folder per job.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncReadExt;

use crate::{
    error::{Error, Result},
    job::{DownloadJob, JobKind},
    track::Track,
};

/// The payload of a track tagged as FLAC is something else.
///
/// Reported by [`Library::tag`] so that the track can be downloaded again in
/// another format.
#[derive(Clone, Copy, Debug, Default, Error)]
#[error("payload is not a FLAC stream")]
pub struct NotFlac;

/// Where a track and its extras are written.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Destination {
    /// Directory of the audio file.
    pub dir: PathBuf,
    /// File name without extension.
    pub filename: String,
    /// Directory for job-wide files like logs and manifests.
    pub extras_path: Option<PathBuf>,
    /// Directory to save album artwork in, if any.
    pub cover_path: Option<PathBuf>,
    /// Directory to save artist artwork in, if any.
    pub artist_path: Option<PathBuf>,
}

#[async_trait]
pub trait Library: Send + Sync {
    /// Applies text and casing preferences to the metadata of `track`.
    fn apply_settings(&self, track: Track) -> Track {
        track
    }

    /// Decides where `track` of `job` is written.
    fn destination(&self, track: &Track, job: &DownloadJob) -> Destination;

    /// Writes the tags of `track` into the file at `path`, embedding the
    /// artwork at `cover` if given.
    ///
    /// # Errors
    ///
    /// Returns an error wrapping [`NotFlac`] when a file that should be FLAC
    /// turns out not to be, or any other error when tagging fails.
    async fn tag(&self, path: &Path, track: &Track, cover: Option<&Path>) -> Result<()>;
}

/// Replaces characters that are not allowed in file names.
#[must_use]
pub fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    cleaned.trim().trim_end_matches('.').to_owned()
}

/// Library without tagging support.
///
/// Singles are written as `<root>/<artist> - <title>`, collection items as
/// `<root>/<job title>/<nn> - <artist> - <title>`. Tagging only checks that
/// FLAC files carry a FLAC signature.
#[derive(Copy, Clone, Debug, Default)]
pub struct FlatLibrary;

impl FlatLibrary {
    const FLAC_SIGNATURE: &[u8; 4] = b"fLaC";
}

#[async_trait]
impl Library for FlatLibrary {
    fn destination(&self, track: &Track, job: &DownloadJob) -> Destination {
        let name = sanitize(&format!("{} - {}", track.artist.name, track.title));

        match &job.kind {
            JobKind::Single(_) => Destination {
                dir: job.root.clone(),
                filename: name,
                extras_path: Some(job.root.clone()),
                cover_path: None,
                artist_path: None,
            },
            JobKind::Collection(tracks) => {
                let dir = job.root.join(sanitize(&job.info.title));
                let width = tracks.len().to_string().len().max(2);
                let filename = match track.position {
                    Some(position) => format!("{:0width$} - {name}", position + 1),
                    None => name,
                };
                Destination {
                    dir: dir.clone(),
                    filename,
                    extras_path: Some(dir.clone()),
                    cover_path: Some(dir.clone()),
                    artist_path: Some(dir),
                }
            }
        }
    }

    async fn tag(&self, path: &Path, track: &Track, _cover: Option<&Path>) -> Result<()> {
        if path.extension().is_some_and(|ext| ext == "flac") {
            let mut file = tokio::fs::File::open(path).await?;
            let mut signature = [0; 4];
            let is_flac = match file.read_exact(&mut signature).await {
                Ok(_) => &signature == Self::FLAC_SIGNATURE,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => false,
                Err(e) => return Err(e.into()),
            };
            if !is_flac {
                return Err(Error::failed_precondition(NotFlac));
            }
        }

        trace!("{track}: no tags written to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{job::JobInfo, metadata::Artist};

    fn track(position: Option<usize>) -> Track {
        Track {
            title: "Aerodynamic".to_owned(),
            artist: Artist::new(27, "Daft Punk"),
            position,
            ..Track::default()
        }
    }

    #[test]
    fn names_are_sanitized() {
        assert_eq!(sanitize("AC/DC: Live?"), "AC_DC_ Live_");
        assert_eq!(sanitize(" trailing dot. "), "trailing dot");
    }

    #[test]
    fn collection_items_get_numbered() {
        let info = JobInfo {
            title: "Discovery".to_owned(),
            ..JobInfo::default()
        };
        let job = DownloadJob::new(
            info,
            JobKind::Collection(vec![Track::default(); 14]),
            "/music",
        );

        let destination = FlatLibrary.destination(&track(Some(2)), &job);
        assert_eq!(destination.dir, PathBuf::from("/music/Discovery"));
        assert_eq!(destination.filename, "03 - Daft Punk - Aerodynamic");
        assert_eq!(destination.cover_path, Some(PathBuf::from("/music/Discovery")));
    }

    #[test]
    fn singles_go_to_the_root() {
        let job = DownloadJob::new(JobInfo::default(), JobKind::Single(track(None)), "/music");
        let destination = FlatLibrary.destination(&track(None), &job);
        assert_eq!(destination.dir, PathBuf::from("/music"));
        assert_eq!(destination.filename, "Daft Punk - Aerodynamic");
        assert!(destination.cover_path.is_none());
    }

    #[tokio::test]
    async fn rejects_flac_files_without_signature() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("fake.flac");
        tokio::fs::write(&fake, b"ID3\x04 not flac").await.unwrap();
        let real = dir.path().join("real.flac");
        tokio::fs::write(&real, b"fLaC\x00\x00\x00\x22").await.unwrap();

        let error = FlatLibrary.tag(&fake, &track(None), None).await.unwrap_err();
        assert!(error.downcast::<NotFlac>().is_some());
        FlatLibrary.tag(&real, &track(None), None).await.unwrap();
    }
}
