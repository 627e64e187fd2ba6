//! Format selection.
//!
//! Picks the best format a track can be streamed in, given a quality ceiling
//! and the entitlements of the account. Candidates are tried from the best
//! to the worst:
//! * Spatial requests only consider the spatial formats
//! * Other requests only consider the stereo formats
//! * Without permission to degrade, both sets are tried and the first
//!   refusal is final
//!
//! When a candidate has no URL, the fallback chain of the track is followed
//! before the next candidate is tried. The selected track may therefore be
//! another version than the one requested.

use std::{collections::HashSet, time::SystemTime};

use thiserror::Error;
use url::Url;

use crate::{
    catalog::{Catalog, MediaError},
    codec,
    error::{Error, Result},
    events::{Event, ItemState, Listener},
    http::Transport,
    protocol::media::Format,
    track::Track,
};

/// Reasons format selection can fail.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum SelectionError {
    #[error("account is not licensed to stream {0}")]
    WrongLicense(Format),

    #[error("track is not streamable from {0}")]
    WrongGeolocation(String),

    #[error("track is not available at the preferred bitrate")]
    PreferredBitrateNotFound,

    #[error("track is not available in 360 Reality Audio")]
    SpatialUnavailable,
}

impl From<SelectionError> for Error {
    fn from(e: SelectionError) -> Self {
        match e {
            SelectionError::WrongLicense(_) | SelectionError::WrongGeolocation(_) => {
                Self::permission_denied(e)
            }
            SelectionError::PreferredBitrateNotFound | SelectionError::SpatialUnavailable => {
                Self::unavailable(e)
            }
        }
    }
}

/// Outcome of a successful selection.
#[derive(Clone, Debug, PartialEq)]
pub struct Selection {
    /// The track to stream, with `bitrate` set. Carries another identity
    /// than the requested track when a fallback version was substituted.
    pub track: Track,
    pub format: Format,
    /// Whether a lower format than the ceiling was settled for.
    pub fell_back: bool,
}

/// Refusals observed while resolving URLs.
#[derive(Copy, Clone, Debug, Default)]
struct Refusal {
    wrong_license: bool,
    geolocked: bool,
}

/// Chooses the format to stream a track in.
pub struct FormatSelector<'a> {
    catalog: &'a dyn Catalog,
    transport: &'a dyn Transport,
    preferred: Format,
    degrade: bool,
    feeling_lucky: bool,
    notify: Option<(&'a dyn Listener, String)>,
}

impl<'a> FormatSelector<'a> {
    #[must_use]
    pub fn new(catalog: &'a dyn Catalog, transport: &'a dyn Transport, preferred: Format) -> Self {
        Self {
            catalog,
            transport,
            preferred,
            degrade: false,
            feeling_lucky: false,
            notify: None,
        }
    }

    /// Permits settling for a lower format than the preferred one.
    #[must_use]
    pub fn degrade(mut self, degrade: bool) -> Self {
        self.degrade = degrade;
        self
    }

    /// Permits building legacy URLs when authorisation yields none.
    #[must_use]
    pub fn feeling_lucky(mut self, feeling_lucky: bool) -> Self {
        self.feeling_lucky = feeling_lucky;
        self
    }

    /// Reports degrading to `listener` as part of job `job`.
    #[must_use]
    pub fn notify(mut self, listener: &'a dyn Listener, job: impl Into<String>) -> Self {
        self.notify = Some((listener, job.into()));
        self
    }

    fn candidates(&self) -> Vec<Format> {
        if !self.degrade {
            Format::SPATIAL
                .into_iter()
                .chain(Format::STEREO)
                .collect()
        } else if self.preferred.is_spatial() {
            Format::SPATIAL.to_vec()
        } else {
            Format::STEREO.to_vec()
        }
    }

    /// Selects the format to stream `track` in.
    ///
    /// # Errors
    ///
    /// Returns a [`SelectionError`] when no acceptable format is available,
    /// or the catalog error when the catalog cannot be reached.
    pub async fn select(&self, track: &Track) -> Result<Selection> {
        let mut track = track.clone();
        let mut refusal = Refusal::default();

        if track.local {
            let url = self.resolve(&mut track, Format::LOCAL, &mut refusal).await?;
            return Ok(Self::selected(track, Format::LOCAL, url, false));
        }

        if track.is_token_expired(SystemTime::now()) {
            debug!("{track}: renewing track token");
            let data = self.catalog.track_with_fallback(track.id).await?;
            track = track.with_token(&data);
        }

        let spatial = self.preferred.is_spatial();
        let mut has_alternative = track.fallback_id.is_some();
        let mut fell_back = false;

        for format in self.candidates() {
            if format.code() > self.preferred.code() {
                continue;
            }

            let mut current = track.clone();
            let mut url = self.resolve(&mut current, format, &mut refusal).await?;

            let mut visited = HashSet::from([current.id]);
            while url.is_none() && has_alternative {
                let Some(fallback_id) = current.fallback_id.filter(|id| visited.insert(*id))
                else {
                    break;
                };

                debug!("{track}: trying fallback {fallback_id} at {format}");
                let data = self.catalog.track_with_fallback(fallback_id).await?;
                current = current.with_essentials(&data);
                has_alternative = current.fallback_id.is_some();
                url = self.resolve(&mut current, format, &mut refusal).await?;
            }

            if url.is_some() {
                return Ok(Self::selected(current, format, url, fell_back));
            }

            if !self.degrade {
                if spatial {
                    return Err(SelectionError::SpatialUnavailable.into());
                }
                if refusal.wrong_license {
                    return Err(SelectionError::WrongLicense(format).into());
                }
                if refusal.geolocked {
                    return Err(SelectionError::WrongGeolocation(self.catalog.user().country).into());
                }
                return Err(SelectionError::PreferredBitrateNotFound.into());
            }

            if !fell_back {
                fell_back = true;
                info!("{} Fallback to lower bitrate", track.item_data());
                if let Some((listener, job)) = &self.notify {
                    listener.send(Event::DownloadInfo {
                        job: job.clone(),
                        item: track.item_data(),
                        state: ItemState::BitrateFallback,
                    });
                }
            }
        }

        if spatial {
            return Err(SelectionError::SpatialUnavailable.into());
        }

        let url = self.resolve(&mut track, Format::DEFAULT, &mut refusal).await?;
        Ok(Self::selected(track, Format::DEFAULT, url, fell_back))
    }

    fn selected(mut track: Track, format: Format, url: Option<Url>, fell_back: bool) -> Selection {
        if let Some(url) = url {
            track.urls.insert(format, url);
        }
        track.bitrate = Some(format);
        Selection {
            track,
            format,
            fell_back,
        }
    }

    /// Resolves a URL for `track` in `format`, recording refusals and probe
    /// results as it goes.
    async fn resolve(
        &self,
        track: &mut Track,
        format: Format,
        refusal: &mut Refusal,
    ) -> Result<Option<Url>> {
        refusal.wrong_license = !format.is_licensed(&self.catalog.user());

        let mut url = None;
        if track.filesize(format) > 0 {
            match self.catalog.stream_url(&track.track_token, format).await {
                Ok(authorised) => url = authorised,
                Err(e) => match e.downcast::<MediaError>() {
                    Some(MediaError::WrongLicense) => {
                        refusal.wrong_license = true;
                    }
                    Some(MediaError::WrongGeolocation) => {
                        refusal.wrong_license = false;
                        refusal.geolocked = true;
                    }
                    None => return Err(e),
                },
            }
        }

        if url.is_none() && self.feeling_lucky && !track.is_unavailable(format) {
            url = self.probe(track, format).await;
        }

        Ok(url)
    }

    /// Builds the legacy URL of `format` and checks that it exists.
    async fn probe(&self, track: &mut Track, format: Format) -> Option<Url> {
        let candidate =
            codec::crypted_stream_url(track.id, &track.md5, &track.media_version, format).ok()?;

        match self.transport.head(&candidate).await {
            Ok(Some(length)) => {
                track.record_probe(format, length);
                (length > 0).then_some(candidate)
            }
            Ok(None) => None,
            Err(e) => {
                debug!("{track}: probing {format} failed: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::ErrorKind,
        track::TrackId,
        protocol::gateway::{Fallback, TrackData, User},
        testing::{ChannelListener, MockCatalog, MockTransport},
    };

    fn data(id: i64) -> TrackData {
        TrackData {
            id: TrackId::from(id),
            title: "One More Time".to_owned(),
            artist: "Daft Punk".to_owned(),
            md5: format!("{id:032x}"),
            media_version: "1".to_owned(),
            track_token: format!("token-{id}"),
            expiry: Some(SystemTime::now() + std::time::Duration::from_secs(3600)),
            filesize_mp3_128: 3_000_000,
            filesize_mp3_320: 8_000_000,
            filesize_flac: 30_000_000,
            filesize: 3_000_000,
            ..TrackData::default()
        }
    }

    fn premium() -> User {
        User {
            can_stream_lossless: true,
            can_stream_hq: true,
            country: "NL".to_owned(),
        }
    }

    #[tokio::test]
    async fn ceiling_is_never_exceeded() {
        let catalog = MockCatalog::new(premium())
            .with_url("token-1", Format::FLAC)
            .with_url("token-1", Format::MP3_320);
        let transport = MockTransport::new();
        let track = Track::from(data(1));

        let selection = FormatSelector::new(&catalog, &transport, Format::MP3_320)
            .degrade(true)
            .select(&track)
            .await
            .unwrap();

        assert_eq!(selection.format, Format::MP3_320);
        assert_eq!(selection.track.bitrate, Some(Format::MP3_320));
        assert!(selection.track.download_url().is_some());
        assert!(!selection.fell_back);
        assert!(!catalog.calls().iter().any(|call| call.contains("FLAC")));
    }

    #[tokio::test]
    async fn degrades_past_unlicensed_formats() {
        let user = User {
            can_stream_hq: false,
            ..User::default()
        };
        let catalog = MockCatalog::new(user)
            .with_refusal("token-1", Format::MP3_320, MediaError::WrongLicense)
            .with_url("token-1", Format::MP3_128);
        let transport = MockTransport::new();
        let listener = ChannelListener::new();

        let selection = FormatSelector::new(&catalog, &transport, Format::MP3_320)
            .degrade(true)
            .notify(&listener, "track_1_3")
            .select(&Track::from(data(1)))
            .await
            .unwrap();

        assert_eq!(selection.format, Format::MP3_128);
        assert!(selection.fell_back);
        assert_eq!(
            listener
                .events()
                .iter()
                .filter(|event| matches!(
                    event,
                    Event::DownloadInfo {
                        state: ItemState::BitrateFallback,
                        ..
                    }
                ))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn unlicensed_format_is_final_without_degrade() {
        let catalog = MockCatalog::new(User::default()).with_refusal(
            "token-1",
            Format::MP3_320,
            MediaError::WrongLicense,
        );
        let transport = MockTransport::new();

        let error = FormatSelector::new(&catalog, &transport, Format::MP3_320)
            .select(&Track::from(data(1)))
            .await
            .unwrap_err();

        assert_eq!(error.kind, ErrorKind::PermissionDenied);
        assert_eq!(
            error.downcast::<SelectionError>(),
            Some(&SelectionError::WrongLicense(Format::MP3_320))
        );
    }

    #[tokio::test]
    async fn geolocked_track_reports_country() {
        let catalog = MockCatalog::new(premium()).with_refusal(
            "token-1",
            Format::MP3_128,
            MediaError::WrongGeolocation,
        );
        let transport = MockTransport::new();

        let error = FormatSelector::new(&catalog, &transport, Format::MP3_128)
            .select(&Track::from(data(1)))
            .await
            .unwrap_err();

        assert_eq!(
            error.downcast::<SelectionError>(),
            Some(&SelectionError::WrongGeolocation("NL".to_owned()))
        );
    }

    #[tokio::test]
    async fn spatial_without_entitlement_never_tries_stereo() {
        let mut record = data(1);
        record.filesize_mp4_ra3 = 10_000_000;
        let catalog = MockCatalog::new(User::default())
            .with_refusal("token-1", Format::MP4_RA3, MediaError::WrongLicense)
            .with_url("token-1", Format::MP3_128);
        let transport = MockTransport::new();

        let error = FormatSelector::new(&catalog, &transport, Format::MP4_RA3)
            .select(&Track::from(record))
            .await
            .unwrap_err();

        assert_eq!(
            error.downcast::<SelectionError>(),
            Some(&SelectionError::SpatialUnavailable)
        );
        assert!(catalog
            .calls()
            .iter()
            .all(|call| call.contains("MP4_RA")));
    }

    #[tokio::test]
    async fn follows_fallback_chain() {
        let mut original = data(1);
        original.fallback = Some(Fallback {
            id: TrackId::from(2),
        });
        let catalog = MockCatalog::new(premium())
            .with_track(data(2))
            .with_url("token-2", Format::MP3_320);
        let transport = MockTransport::new();

        let selection = FormatSelector::new(&catalog, &transport, Format::MP3_320)
            .select(&Track::from(original))
            .await
            .unwrap();

        assert_eq!(selection.track.id, TrackId::from(2));
        assert_eq!(selection.track.title, "One More Time");
        assert_eq!(selection.format, Format::MP3_320);
    }

    #[tokio::test]
    async fn cyclic_fallbacks_terminate() {
        let mut first = data(1);
        first.fallback = Some(Fallback {
            id: TrackId::from(2),
        });
        let mut second = data(2);
        second.fallback = Some(Fallback {
            id: TrackId::from(1),
        });
        let catalog = MockCatalog::new(premium())
            .with_track(first.clone())
            .with_track(second);
        let transport = MockTransport::new();

        let error = FormatSelector::new(&catalog, &transport, Format::MP3_320)
            .select(&Track::from(first))
            .await
            .unwrap_err();

        assert_eq!(
            error.downcast::<SelectionError>(),
            Some(&SelectionError::PreferredBitrateNotFound)
        );
    }

    #[tokio::test]
    async fn feeling_lucky_probes_legacy_url() {
        let catalog = MockCatalog::new(premium());
        let track = Track::from(data(1));
        let legacy =
            codec::crypted_stream_url(track.id, &track.md5, "1", Format::MP3_320).unwrap();
        let transport = MockTransport::new().with_head(&legacy, Some(7_500_000));

        let selection = FormatSelector::new(&catalog, &transport, Format::MP3_320)
            .feeling_lucky(true)
            .select(&track)
            .await
            .unwrap();

        assert_eq!(selection.track.download_url(), Some(&legacy));
        assert_eq!(selection.track.filesize(Format::MP3_320), 7_500_000);
        assert!(selection.track.filesizes[&Format::MP3_320].tested);
    }

    #[tokio::test]
    async fn exhausted_candidates_settle_for_default() {
        let catalog = MockCatalog::new(premium()).with_url("token-1", Format::DEFAULT);
        let transport = MockTransport::new();

        let selection = FormatSelector::new(&catalog, &transport, Format::FLAC)
            .degrade(true)
            .select(&Track::from(data(1)))
            .await
            .unwrap();

        assert_eq!(selection.format, Format::DEFAULT);
        assert!(selection.fell_back);
        assert!(selection.track.download_url().is_some());
    }

    #[tokio::test]
    async fn local_tracks_skip_ranking() {
        let mut record = data(-7);
        record.filesize = 0;
        let catalog = MockCatalog::new(premium());
        let transport = MockTransport::new();

        let selection = FormatSelector::new(&catalog, &transport, Format::FLAC)
            .select(&Track::from(record))
            .await
            .unwrap();

        assert_eq!(selection.format, Format::LOCAL);
        assert!(catalog.calls().is_empty());
    }

    #[tokio::test]
    async fn expired_tokens_are_renewed() {
        let mut stale = data(1);
        stale.track_token = "stale".to_owned();
        stale.expiry = Some(SystemTime::UNIX_EPOCH);
        let catalog = MockCatalog::new(premium())
            .with_track(data(1))
            .with_url("token-1", Format::MP3_320);
        let transport = MockTransport::new();

        let selection = FormatSelector::new(&catalog, &transport, Format::MP3_320)
            .select(&Track::from(stale))
            .await
            .unwrap();

        assert_eq!(selection.track.track_token, "token-1");
        assert_eq!(selection.format, Format::MP3_320);
    }
}
