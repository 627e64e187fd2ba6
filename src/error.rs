//! Error handling for deeload.
//!
//! Provides a unified error type based on gRPC status codes, plus the
//! download failure catalogue that is reported per item.
//!
//! # Error Categories
//!
//! Errors are categorized into standard types:
//! * Authentication/authorization failures (wrong license, not logged in)
//! * Resource state (track not found, already downloaded)
//! * Transient network conditions (timeouts, resets, truncated bodies)
//! * Local resource exhaustion (no space left on the target drive)
//! * Cancellation of a job
//!
//! Domain errors such as [`DownloadFailed`] are boxed inside [`struct@Error`]
//! and can be recovered with [`Error::downcast`].
//!
//! # Example
//!
//! ```rust
//! use deeload::error::{DownloadFailed, Error, Reason, Result};
//!
//! fn check(md5: &str) -> Result<()> {
//!     if md5.is_empty() {
//!         return Err(DownloadFailed::new(Reason::NotEncoded).into());
//!     }
//!     Ok(())
//! }
//! ```

#![allow(clippy::enum_glob_use)]

use std::fmt;
use thiserror::Error;

use crate::track::Track;

/// Main error type combining error kind and details.
#[derive(Debug)]
pub struct Error {
    /// Classification of the error
    pub kind: ErrorKind,

    /// Details of the underlying error
    pub error: Box<dyn std::error::Error + Send + Sync>,
}

impl Error {
    /// Attempts to downcast the underlying error to a concrete type.
    ///
    /// Used by the orchestrator to recover a [`DownloadFailed`] or an
    /// entitlement error from a generic `Error`.
    #[must_use]
    pub fn downcast<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.error.downcast_ref::<E>()
    }

    /// Consumes the error and returns the underlying error as `E`, if it is
    /// one.
    ///
    /// # Errors
    ///
    /// Returns `self` unchanged when the underlying error is of another type.
    pub fn into_inner<E>(self) -> std::result::Result<E, Self>
    where
        E: std::error::Error + 'static,
    {
        let kind = self.kind;
        self.error
            .downcast::<E>()
            .map(|inner| *inner)
            .map_err(|error| Self { kind, error })
    }

    /// Whether this error represents an observed cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    /// Whether a local write ran out of space.
    ///
    /// Other errors of kind `ResourceExhausted`, like redirect loops, do not
    /// qualify.
    #[must_use]
    pub fn is_storage_full(&self) -> bool {
        if let Some(e) = self.downcast::<std::io::Error>() {
            return matches!(
                e.kind(),
                std::io::ErrorKind::StorageFull | std::io::ErrorKind::WriteZero
            );
        }
        self.downcast::<DownloadFailed>()
            .is_some_and(|failed| failed.reason == Reason::NoSpaceLeft)
    }
}

/// Standard result type for deeload operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories based on gRPC status codes.
///
/// See [gRPC status codes](https://github.com/googleapis/googleapis/blob/master/google/rpc/code.proto)
/// for the original definitions.
#[expect(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Eq, Error, Hash, Ord, PartialEq, PartialOrd)]
#[repr(u32)]
pub enum ErrorKind {
    /// HTTP Mapping: 499 Client Closed Request
    #[error("operation was cancelled")]
    Cancelled = 1,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("unknown error")]
    Unknown = 2,

    /// HTTP Mapping: 400 Bad Request
    #[error("invalid argument specified")]
    InvalidArgument = 3,

    /// HTTP Mapping: 504 Gateway Timeout
    #[error("operation timed out")]
    DeadlineExceeded = 4,

    /// HTTP Mapping: 404 Not Found
    #[error("not found")]
    NotFound = 5,

    /// HTTP Mapping: 409 Conflict
    #[error("attempt to create what already exists")]
    AlreadyExists = 6,

    /// HTTP Mapping: 403 Forbidden
    #[error("permission denied")]
    PermissionDenied = 7,

    /// HTTP Mapping: 401 Unauthorized
    #[error("no valid authentication credentials")]
    Unauthenticated = 16,

    /// HTTP Mapping: 429 Too Many Requests
    #[error("resource has been exhausted")]
    ResourceExhausted = 8,

    /// HTTP Mapping: 400 Bad Request
    #[error("invalid state")]
    FailedPrecondition = 9,

    /// HTTP Mapping: 409 Conflict
    #[error("operation aborted")]
    Aborted = 10,

    /// HTTP Mapping: 400 Bad Request
    #[error("out of range")]
    OutOfRange = 11,

    /// HTTP Mapping: 501 Not Implemented
    #[error("not implemented")]
    Unimplemented = 12,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("internal error")]
    Internal = 13,

    /// HTTP Mapping: 503 Service Unavailable
    #[error("service unavailable")]
    Unavailable = 14,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("unrecoverable data loss or corruption")]
    DataLoss = 15,
}

macro_rules! constructors {
    ($($(#[$meta:meta])* $name:ident => $kind:ident,)*) => {
        impl Error {
            $(
                $(#[$meta])*
                pub fn $name<E>(error: E) -> Self
                where
                    E: Into<Box<dyn std::error::Error + Send + Sync>>,
                {
                    Self::new(ErrorKind::$kind, error)
                }
            )*
        }
    };
}

impl Error {
    /// Creates a new error with specified kind and details.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::new(ErrorKind::NotFound, "track 3135556 not found");
    /// assert_eq!(err.kind, ErrorKind::NotFound);
    /// ```
    pub fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind,
            error: error.into(),
        }
    }
}

constructors! {
    /// Creates an error for operations that were interrupted mid-execution,
    /// like a connection reset while streaming.
    aborted => Aborted,
    /// Creates an error for duplicate resource creation attempts.
    already_exists => AlreadyExists,
    /// Creates an error for cancelled operations. Raised at the cooperative
    /// check points of a job once its cancellation flag is set.
    cancelled => Cancelled,
    /// Creates an error for data corruption or loss, like a body that ended
    /// before its declared length.
    data_loss => DataLoss,
    /// Creates an error for operations that exceeded their deadline.
    deadline_exceeded => DeadlineExceeded,
    /// Creates an error for operations that failed due to current state.
    failed_precondition => FailedPrecondition,
    /// Creates an error for unexpected internal errors.
    internal => Internal,
    /// Creates an error for invalid arguments.
    invalid_argument => InvalidArgument,
    /// Creates an error for missing resources.
    not_found => NotFound,
    /// Creates an error for values outside valid range.
    out_of_range => OutOfRange,
    /// Creates an error for permission denied conditions, like a license
    /// tier that does not cover the requested format.
    permission_denied => PermissionDenied,
    /// Creates an error for exhausted resources, like a full disk.
    resource_exhausted => ResourceExhausted,
    /// Creates an error for authentication failures.
    unauthenticated => Unauthenticated,
    /// Creates an error for unavailable services.
    unavailable => Unavailable,
    /// Creates an error for unimplemented features.
    unimplemented => Unimplemented,
    /// Creates an error that doesn't fit any other category.
    unknown => Unknown,
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

/// Formats the error for display, showing both kind and details.
///
/// Format: "{kind}: {details}"
impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: ", self.kind)?;
        self.error.fmt(fmt)
    }
}

/// Reasons a single item of a download job can fail.
///
/// Each reason has a stable identifier (as reported to listeners) and a
/// human-readable message.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Reason {
    NotOnDeezer,
    NotEncoded,
    WrongBitrate,
    WrongLicense,
    WrongGeolocation,
    No360RA,
    NotAvailable,
    NoSpaceLeft,
    AlbumDoesntExists,
    NotLoggedIn,
}

impl Reason {
    /// Stable identifier of the reason.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::NotOnDeezer => "notOnDeezer",
            Self::NotEncoded => "notEncoded",
            Self::WrongBitrate => "wrongBitrate",
            Self::WrongLicense => "wrongLicense",
            Self::WrongGeolocation => "wrongGeolocation",
            Self::No360RA => "no360RA",
            Self::NotAvailable => "notAvailable",
            Self::NoSpaceLeft => "noSpaceLeft",
            Self::AlbumDoesntExists => "albumDoesntExists",
            Self::NotLoggedIn => "notLoggedIn",
        }
    }

    /// Message for the reason. With `no_alternative` set, the message tells
    /// that the fallback chain was exhausted as well, when the reason has
    /// such a variant.
    #[must_use]
    pub fn message(self, no_alternative: bool) -> &'static str {
        match (self, no_alternative) {
            (Self::NotOnDeezer, _) => "Track not available on Deezer!",
            (Self::NotEncoded, false) => "Track not yet encoded!",
            (Self::NotEncoded, true) => "Track not yet encoded and no alternative found!",
            (Self::WrongBitrate, false) => "Track not found at desired bitrate.",
            (Self::WrongBitrate, true) => {
                "Track not found at desired bitrate and no alternative found!"
            }
            (Self::WrongLicense, _) => {
                "Your account can't stream the track at the desired bitrate."
            }
            (Self::WrongGeolocation, false) => {
                "Your account can't stream the track from your current country."
            }
            (Self::WrongGeolocation, true) => {
                "Your account can't stream the track from your current country and no alternative found."
            }
            (Self::No360RA, _) => "Track is not available in Reality Audio 360.",
            (Self::NotAvailable, false) => "Track not available on deezer's servers!",
            (Self::NotAvailable, true) => {
                "Track not available on deezer's servers and no alternative found!"
            }
            (Self::NoSpaceLeft, _) => {
                "No space left on target drive, clean up some space for the tracks"
            }
            (Self::AlbumDoesntExists, _) => {
                "Track's album does not exsist, failed to gather info."
            }
            (Self::NotLoggedIn, _) => "You need to login to download tracks.",
        }
    }

    /// Error category used when the failure is converted into an [`struct@Error`].
    #[must_use]
    pub fn kind(self) -> ErrorKind {
        match self {
            Self::NotOnDeezer | Self::AlbumDoesntExists => ErrorKind::NotFound,
            Self::NotEncoded | Self::WrongBitrate | Self::No360RA | Self::NotAvailable => {
                ErrorKind::Unavailable
            }
            Self::WrongLicense | Self::WrongGeolocation => ErrorKind::PermissionDenied,
            Self::NoSpaceLeft => ErrorKind::ResourceExhausted,
            Self::NotLoggedIn => ErrorKind::Unauthenticated,
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Failure of a single item, optionally carrying the track it failed for so
/// that the fallback chain can be tried.
#[derive(Clone, Debug, Error)]
#[error("{}", self.message())]
pub struct DownloadFailed {
    pub reason: Reason,
    pub no_alternative: bool,
    pub track: Option<Box<Track>>,
}

impl DownloadFailed {
    #[must_use]
    pub fn new(reason: Reason) -> Self {
        Self {
            reason,
            no_alternative: false,
            track: None,
        }
    }

    #[must_use]
    pub fn with_track(reason: Reason, track: Track) -> Self {
        Self {
            reason,
            no_alternative: false,
            track: Some(Box::new(track)),
        }
    }

    /// Marks the failure as final after the fallback chain was exhausted.
    #[must_use]
    pub fn exhausted(mut self) -> Self {
        self.no_alternative = true;
        self
    }

    /// Identifier as reported to listeners, suffixed with `NoAlternative`
    /// when the fallback chain was exhausted.
    #[must_use]
    pub fn errid(&self) -> String {
        if self.no_alternative {
            format!("{}NoAlternative", self.reason.id())
        } else {
            self.reason.id().to_owned()
        }
    }

    #[must_use]
    pub fn message(&self) -> &'static str {
        self.reason.message(self.no_alternative)
    }
}

impl From<DownloadFailed> for Error {
    fn from(e: DownloadFailed) -> Self {
        Self::new(e.reason.kind(), e)
    }
}

/// A declared payload length of zero.
#[derive(Clone, Copy, Debug, Default, Error)]
#[error("server declared an empty payload")]
pub struct EmptyPayload;

/// Converts IO errors into appropriate error kinds.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            NotFound => Self::not_found(err),
            PermissionDenied => Self::permission_denied(err),
            AddrInUse | AlreadyExists => Self::already_exists(err),
            AddrNotAvailable | ConnectionRefused | NotConnected => Self::unavailable(err),
            BrokenPipe | ConnectionReset | ConnectionAborted => Self::aborted(err),
            Interrupted | WouldBlock => Self::cancelled(err),
            UnexpectedEof => Self::data_loss(err),
            TimedOut => Self::deadline_exceeded(err),
            InvalidInput | InvalidData => Self::invalid_argument(err),
            WriteZero | StorageFull => Self::resource_exhausted(err),
            _ => Self::unknown(err),
        }
    }
}

/// Converts HTTP client errors into appropriate error kinds.
///
/// Maps HTTP errors based on their nature:
/// * Body errors -> `DataLoss`
/// * Decode errors -> `InvalidArgument`
/// * Connect errors -> `Unavailable`
/// * Timeout errors -> `DeadlineExceeded`
/// * Status errors -> `FailedPrecondition`
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::deadline_exceeded(err);
        }

        if err.is_body() {
            return Self::data_loss(err);
        }

        if err.is_decode() {
            return Self::invalid_argument(err);
        }

        if err.is_builder() {
            return Self::internal(err);
        }

        if err.is_connect() {
            return Self::unavailable(err);
        }

        if err.is_redirect() {
            return Self::resource_exhausted(err);
        }

        if err.is_status() {
            return Self::failed_precondition(err);
        }

        if err.is_request() {
            return Self::aborted(err);
        }

        Self::unknown(err)
    }
}

/// Converts JSON errors through IO error mapping.
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        std::io::Error::from(err).into()
    }
}

/// Converts configuration parsing errors to `InvalidArgument`.
impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

/// Converts URL parsing errors to `InvalidArgument`.
impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

/// Converts hex decoding errors to `InvalidArgument`.
impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

/// Converts integer parsing errors to `InvalidArgument`.
impl From<std::num::ParseIntError> for Error {
    fn from(e: std::num::ParseIntError) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

/// Converts mutex poisoning errors to `Internal`.
impl<T> From<std::sync::PoisonError<std::sync::MutexGuard<'_, T>>> for Error {
    fn from(e: std::sync::PoisonError<std::sync::MutexGuard<'_, T>>) -> Self {
        Self::internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_failures_are_suffixed() {
        let failure = DownloadFailed::new(Reason::NotAvailable).exhausted();
        assert_eq!(failure.errid(), "notAvailableNoAlternative");
        assert_eq!(
            failure.message(),
            "Track not available on deezer's servers and no alternative found!"
        );
    }

    #[test]
    fn download_failures_survive_boxing() {
        let error = Error::from(DownloadFailed::new(Reason::NoSpaceLeft));
        assert_eq!(error.kind, ErrorKind::ResourceExhausted);

        let failure = error.into_inner::<DownloadFailed>().unwrap();
        assert_eq!(failure.reason, Reason::NoSpaceLeft);
        assert!(!failure.no_alternative);
    }

    #[test]
    fn storage_full_is_resource_exhaustion() {
        let io = std::io::Error::from(std::io::ErrorKind::StorageFull);
        let error = Error::from(io);
        assert_eq!(error.kind, ErrorKind::ResourceExhausted);
        assert!(error.is_storage_full());
    }

    #[test]
    fn only_local_writes_are_storage_full() {
        let io = std::io::Error::from(std::io::ErrorKind::WriteZero);
        assert!(Error::from(io).is_storage_full());
        assert!(Error::from(DownloadFailed::new(Reason::NoSpaceLeft)).is_storage_full());

        let redirects = Error::resource_exhausted("too many redirects");
        assert_eq!(redirects.kind, ErrorKind::ResourceExhausted);
        assert!(!redirects.is_storage_full());
    }
}
