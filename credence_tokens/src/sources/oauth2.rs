//! A credential requester that uses an OAuth2 refresh token grant

use std::error;

use async_trait::async_trait;
use credence_clock::{Clock, System};

use super::CredentialRequester;
use crate::{Credential, RefreshToken, RefreshTokenRef, Scope, ScopeRef};

pub mod dto;
#[cfg(feature = "http")]
#[cfg_attr(docsrs, doc(cfg(feature = "http")))]
mod http;

#[cfg(feature = "http")]
pub use http::{FormBody, HttpRefreshGrant, JsonBody, RequestType, TokenRequestError};

/// An exchange of a refresh token for new tokens
#[async_trait]
pub trait RefreshGrant: Send + Sync {
    /// The error type returned in the event that the exchange fails
    type Error: error::Error + Send + Sync + 'static;

    /// Exchanges `refresh_token` for new tokens, optionally narrowed to `scope`
    async fn exchange(
        &self,
        refresh_token: &RefreshTokenRef,
        scope: Option<&ScopeRef>,
    ) -> Result<dto::TokenResponse, Self::Error>;
}

/// Requests access tokens using a long-lived, possibly rotating, refresh token
///
/// Wrap this in a [`TokenCache`](crate::TokenCache) to share one access token
/// across a process.
#[derive(Debug)]
pub struct RefreshTokenRequester<G, C = System> {
    grant: G,
    refresh_token: RefreshToken,
    scope: Option<Scope>,
    clock: C,
}

impl<G> RefreshTokenRequester<G, System> {
    /// Constructs a new requester starting from `refresh_token`
    pub fn new(grant: G, refresh_token: RefreshToken) -> Self {
        Self {
            grant,
            refresh_token,
            scope: None,
            clock: System,
        }
    }
}

impl<G, C> RefreshTokenRequester<G, C> {
    /// Requests tokens narrowed to `scope`
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> RefreshTokenRequester<G, D> {
        RefreshTokenRequester {
            grant: self.grant,
            refresh_token: self.refresh_token,
            scope: self.scope,
            clock,
        }
    }

    /// The refresh token that will be used for the next exchange
    pub fn refresh_token(&self) -> &RefreshTokenRef {
        &self.refresh_token
    }
}

#[async_trait]
impl<G, C> CredentialRequester for RefreshTokenRequester<G, C>
where
    G: RefreshGrant,
    C: Clock + Send + Sync,
{
    type Error = G::Error;

    async fn request_credential(
        &mut self,
        _prior: Option<&Credential>,
    ) -> Result<Credential, Self::Error> {
        let response = self
            .grant
            .exchange(&self.refresh_token, self.scope.as_deref())
            .await?;

        let credential =
            Credential::from_claims(response.access_token, self.clock.now(), response.expires_in);

        if let Some(refresh_token) = response.refresh_token {
            tracing::info!("received new refresh token");
            self.refresh_token = refresh_token;
        }

        Ok(credential)
    }
}
