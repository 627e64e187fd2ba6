//! Wire types of Deezer services.
//!
//! * [`gateway`] - track records and account entitlements from the gateway API
//! * [`media`] - the format catalogue of the media service

pub mod gateway;
pub mod media;

use crate::error::Result;
use serde::Deserialize;
use std::fmt::Debug;

/// Parses a JSON response of `origin`.
///
/// The parsed structure is logged at TRACE level. When parsing fails, the
/// body is logged as generic JSON at TRACE level if it is valid JSON, or as
/// text at ERROR level otherwise.
///
/// # Errors
///
/// Returns an error if `body` is not valid JSON or does not match `T`.
pub fn json<T>(body: &str, origin: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Debug,
{
    match serde_json::from_str(body) {
        Ok(result) => {
            trace!("{origin}: {result:#?}");
            Ok(result)
        }
        Err(e) => {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
                trace!("{origin}: {json:#?}");
            } else {
                error!("{origin}: failed parsing response ({e:?})");
                trace!("{body}");
            }
            Err(e.into())
        }
    }
}
