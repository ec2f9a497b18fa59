//! DTOs for the OAuth2 refresh token grant

use std::{collections::BTreeMap, fmt};

use credence_clock::DurationSecs;
use serde::{Deserialize, Serialize, Serializer};

use crate::{AccessToken, IdToken, RefreshToken, RefreshTokenRef, Scope, ScopeRef};

/// A successful token endpoint response
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    /// The issued access token
    pub access_token: AccessToken,

    /// A new refresh token, if the authority rotates refresh tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<RefreshToken>,

    /// An OpenID Connect ID token, if one was issued
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<IdToken>,

    /// The lifetime of the access token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<DurationSecs>,

    /// The type of the access token, usually `Bearer`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    /// The scope granted, if it differs from the scope requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
}

/// The body of a refresh token grant request
pub(crate) struct RefreshGrantForm<'a> {
    pub refresh_token: &'a RefreshTokenRef,
    pub scope: Option<&'a ScopeRef>,
    pub client_authentication: BTreeMap<&'static str, String>,
}

impl fmt::Debug for RefreshGrantForm<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        struct Redacted<'a>(&'a BTreeMap<&'static str, String>);

        impl fmt::Debug for Redacted<'_> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.debug_map()
                    .entries(self.0.iter().map(|(k, v)| match *k {
                        "client_id" => (k, v.as_str()),
                        _ => (k, "***"),
                    }))
                    .finish()
            }
        }

        let client_authentication = Redacted(&self.client_authentication);
        f.debug_struct("RefreshGrantForm")
            .field("refresh_token", &self.refresh_token)
            .field("scope", &self.scope)
            .field("client_authentication", &client_authentication)
            .finish()
    }
}

impl Serialize for RefreshGrantForm<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeMap;

        let len = 2 + usize::from(self.scope.is_some()) + self.client_authentication.len();
        let mut ser = serializer.serialize_map(Some(len))?;
        ser.serialize_entry("grant_type", "refresh_token")?;
        ser.serialize_entry("refresh_token", self.refresh_token)?;
        if let Some(scope) = self.scope {
            ser.serialize_entry("scope", scope)?;
        }
        for (key, value) in &self.client_authentication {
            ser.serialize_entry(key, value)?;
        }
        ser.end()
    }
}
