//! Unverified introspection of the claims embedded in a JWT
//!
//! Credentials are only inspected to decide when to refresh them. No
//! signature is checked here; the party that consumes the token is
//! responsible for verifying it.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use credence_clock::UnixTime;
use serde::{de, Deserialize, Deserializer};
use serde_json::{Map, Value};
use thiserror::Error;

/// The timing claims of a JWT payload
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimingClaims {
    /// The `exp` claim, if present
    pub expires_at: Option<UnixTime>,
    /// The `nbf` claim, if present
    pub not_before: Option<UnixTime>,
}

/// The token could not be introspected for timing claims
#[derive(Debug, Error)]
pub enum MalformedClaims {
    /// The token does not have the three `.`-separated sections of a JWT
    #[error("token is not a compact JWT")]
    NotAJwt,
    /// The payload section is not valid base64url
    #[error("JWT payload is not valid base64url")]
    Encoding(#[from] base64::DecodeError),
    /// The payload is not a JSON object, or its timing claims are not
    /// numeric
    #[error("JWT payload has malformed claims")]
    Payload(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct RawClaims {
    #[serde(default, deserialize_with = "numeric_date")]
    exp: Option<UnixTime>,
    #[serde(default, deserialize_with = "numeric_date")]
    nbf: Option<UnixTime>,
}

/// RFC 7519 NumericDate: seconds since the epoch, possibly fractional
fn numeric_date<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<UnixTime>, D::Error> {
    let Some(value) = Option::<f64>::deserialize(deserializer)? else {
        return Ok(None);
    };

    if !value.is_finite() || value < 0.0 {
        return Err(de::Error::invalid_value(
            de::Unexpected::Float(value),
            &"a non-negative NumericDate",
        ));
    }

    Ok(Some(UnixTime(value.floor() as u64)))
}

fn payload(token: &str) -> Result<Vec<u8>, MalformedClaims> {
    let sections: Vec<&str> = token.split('.').collect();
    let payload = match sections.as_slice() {
        [_, payload, _] => payload,
        _ => return Err(MalformedClaims::NotAJwt),
    };

    Ok(URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?)
}

/// Reads the `exp` and `nbf` claims out of a compact JWT without verifying it
pub fn timing_claims(token: &str) -> Result<TimingClaims, MalformedClaims> {
    let raw: RawClaims = serde_json::from_slice(&payload(token)?)?;

    Ok(TimingClaims {
        expires_at: raw.exp,
        not_before: raw.nbf,
    })
}

/// Decodes every claim in a compact JWT's payload without verifying it
pub fn all_claims(token: &str) -> Result<Map<String, Value>, MalformedClaims> {
    Ok(serde_json::from_slice(&payload(token)?)?)
}
