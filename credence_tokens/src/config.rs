//! Deserializable configuration for providers and refresh grants
//!
//! Keys use `camelCase`, so configuration can be loaded from the same JSON
//! documents that configure the rest of a service.

use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{error::ConfigurationError, ClientId, ClientSecret, IdentityPoolId, Scope};

/// Configuration for a [`FederatedTokenProvider`](crate::FederatedTokenProvider)
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FederatedProviderConfig {
    /// The identity pool to request tokens from
    #[serde(default)]
    pub pool_id: String,

    /// Provider names mapped to the developer's user identifiers
    #[serde(default)]
    pub logins: BTreeMap<String, String>,

    /// How long before expiry a token is refreshed, in milliseconds
    #[serde(default)]
    pub early_refresh_ms: u64,
}

impl FederatedProviderConfig {
    /// Constructs a configuration for the given identity pool
    pub fn new(pool_id: impl Into<String>) -> Self {
        Self {
            pool_id: pool_id.into(),
            ..Self::default()
        }
    }

    /// Adds a developer login
    pub fn with_login(mut self, provider: impl Into<String>, user: impl Into<String>) -> Self {
        self.logins.insert(provider.into(), user.into());
        self
    }

    /// Sets the early refresh window in milliseconds
    pub fn with_early_refresh_ms(mut self, early_refresh_ms: u64) -> Self {
        self.early_refresh_ms = early_refresh_ms;
        self
    }

    /// The configured identity pool
    pub fn pool_id(&self) -> Result<IdentityPoolId, ConfigurationError> {
        non_empty(&self.pool_id)
            .map(IdentityPoolId::from)
            .ok_or(ConfigurationError::MissingPoolId)
    }

    /// The early refresh window
    pub fn early_refresh(&self) -> Duration {
        Duration::from_millis(self.early_refresh_ms)
    }
}

/// Configuration for an OAuth2 refresh token grant
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshGrantConfig {
    /// The authority's token endpoint
    #[serde(default)]
    pub token_url: String,

    /// The client identifier registered with the authority
    #[serde(default)]
    pub client_id: String,

    /// The client secret, when the client authenticates with one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<ClientSecret>,

    /// The scope to request on refresh
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,

    /// How long before expiry an access token is refreshed, in milliseconds
    #[serde(default)]
    pub early_refresh_ms: u64,
}

impl RefreshGrantConfig {
    /// The configured client identifier
    pub fn client_id(&self) -> Result<ClientId, ConfigurationError> {
        non_empty(&self.client_id)
            .map(ClientId::from)
            .ok_or(ConfigurationError::MissingClientId)
    }

    /// The early refresh window
    pub fn early_refresh(&self) -> Duration {
        Duration::from_millis(self.early_refresh_ms)
    }
}

#[cfg(feature = "http")]
#[cfg_attr(docsrs, doc(cfg(feature = "http")))]
mod http {
    use std::sync::Arc;

    use super::{non_empty, RefreshGrantConfig};
    use crate::{
        client_auth::ClientAuthentication, error::ConfigurationError,
        provider::CredentialProvider, sources::oauth2::HttpRefreshGrant,
    };

    impl RefreshGrantConfig {
        /// The configured token endpoint
        pub fn token_url(&self) -> Result<reqwest::Url, ConfigurationError> {
            let missing = || ConfigurationError::InvalidTokenUrl {
                url: self.token_url.clone(),
                source: "no token url configured".into(),
            };
            let url = non_empty(&self.token_url).ok_or_else(missing)?;

            reqwest::Url::parse(&url).map_err(|e| ConfigurationError::InvalidTokenUrl {
                url,
                source: Box::new(e),
            })
        }

        /// Builds the refresh grant this configuration describes
        ///
        /// A `federated` provider takes precedence over a configured client
        /// secret. One of the two is required.
        pub fn build_grant(
            &self,
            client: reqwest::Client,
            federated: Option<Arc<dyn CredentialProvider>>,
        ) -> Result<HttpRefreshGrant, ConfigurationError> {
            let authentication = match (federated, &self.client_secret) {
                (Some(provider), _) => ClientAuthentication::Federated(provider),
                (None, Some(secret)) => ClientAuthentication::ClientSecret(secret.clone()),
                (None, None) => return Err(ConfigurationError::MissingClientAuthentication),
            };

            Ok(HttpRefreshGrant::new(
                client,
                self.token_url()?,
                self.client_id()?,
                authentication,
            ))
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_owned())
}
