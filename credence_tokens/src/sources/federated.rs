//! A credential requester that exchanges a developer identity for an OpenID token
//!
//! The exchange itself is performed by an [`IdentityBroker`], which is
//! expected to wrap a call such as Amazon Cognito's
//! `GetOpenIdTokenForDeveloperIdentity`. The broker's request and response
//! bodies are modeled here so that brokers only need to handle transport and
//! request signing.

use std::{collections::BTreeMap, error, sync::Arc};

use async_trait::async_trait;
use credence_clock::{Clock, System};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::CredentialRequester;
use crate::{AccessToken, Credential, IdentityPoolId, IdentityPoolIdRef};

/// A request for an OpenID token on behalf of a developer-authenticated
/// identity
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeveloperIdentityRequest {
    /// The identity pool the identity belongs to
    pub identity_pool_id: IdentityPoolId,

    /// Provider names mapped to the developer's user identifiers
    #[serde(default)]
    pub logins: BTreeMap<String, String>,
}

/// The broker's answer to a [`DeveloperIdentityRequest`]
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeveloperIdentityResponse {
    /// The identity the token was issued for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_id: Option<String>,

    /// The issued OpenID token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<AccessToken>,
}

/// A service that issues OpenID tokens for developer-authenticated identities
#[async_trait]
pub trait IdentityBroker: Send + Sync {
    /// The error type returned in the event that the exchange fails
    type Error: error::Error + Send + Sync + 'static;

    /// Requests an OpenID token for the identity described by `request`
    async fn get_open_id_token_for_developer_identity(
        &self,
        request: &DeveloperIdentityRequest,
    ) -> Result<DeveloperIdentityResponse, Self::Error>;
}

#[async_trait]
impl<B: IdentityBroker + ?Sized> IdentityBroker for Arc<B> {
    type Error = B::Error;

    async fn get_open_id_token_for_developer_identity(
        &self,
        request: &DeveloperIdentityRequest,
    ) -> Result<DeveloperIdentityResponse, Self::Error> {
        (**self)
            .get_open_id_token_for_developer_identity(request)
            .await
    }
}

/// An error obtaining a federated token
#[derive(Debug, Error)]
pub enum FederatedTokenError {
    /// The identity broker rejected the request or could not be reached
    #[error("identity broker request failed")]
    Broker(#[source] Box<dyn error::Error + Send + Sync + 'static>),
    /// The identity broker responded without a token
    #[error("identity broker returned no token")]
    EmptyToken,
}

/// Requests federated tokens from an [`IdentityBroker`]
#[derive(Debug)]
pub struct FederatedTokenRequester<B, C = System> {
    broker: B,
    request: DeveloperIdentityRequest,
    clock: C,
}

impl<B> FederatedTokenRequester<B, System> {
    /// Constructs a new requester for the given pool and logins
    pub fn new(
        broker: B,
        identity_pool_id: IdentityPoolId,
        logins: BTreeMap<String, String>,
    ) -> Self {
        Self {
            broker,
            request: DeveloperIdentityRequest {
                identity_pool_id,
                logins,
            },
            clock: System,
        }
    }
}

impl<B, C> FederatedTokenRequester<B, C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> FederatedTokenRequester<B, D> {
        FederatedTokenRequester {
            broker: self.broker,
            request: self.request,
            clock,
        }
    }

    /// The identity pool tokens are requested from
    pub fn identity_pool_id(&self) -> &IdentityPoolIdRef {
        &self.request.identity_pool_id
    }

    /// The request sent to the broker on every refresh
    pub fn request(&self) -> &DeveloperIdentityRequest {
        &self.request
    }
}

#[async_trait]
impl<B, C> CredentialRequester for FederatedTokenRequester<B, C>
where
    B: IdentityBroker,
    C: Clock + Send + Sync,
{
    type Error = FederatedTokenError;

    async fn request_credential(
        &mut self,
        _prior: Option<&Credential>,
    ) -> Result<Credential, Self::Error> {
        tracing::debug!(
            identity_pool_id = %self.request.identity_pool_id,
            logins = self.request.logins.len(),
            "requesting federated token"
        );

        let response = self
            .broker
            .get_open_id_token_for_developer_identity(&self.request)
            .await
            .map_err(|e| FederatedTokenError::Broker(Box::new(e)))?;

        let token = response
            .token
            .filter(|t| !t.as_str().is_empty())
            .ok_or(FederatedTokenError::EmptyToken)?;

        let credential = Credential::new(token, self.clock.now(), None);

        tracing::info!(
            identity_id = response.identity_id.as_deref(),
            expires_at = credential.expires_at().map(|t| t.0),
            "received federated token"
        );

        Ok(credential)
    }
}
