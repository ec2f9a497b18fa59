//! Request-scoped access and refresh token pairs
//!
//! A user session typically carries its own access token, refresh token and
//! ID token. These functions decide whether such a pair is still usable and
//! exchange the refresh token when it is not. Nothing is cached here: the
//! caller stores the returned pair wherever its session lives.
//!
//! For a single process-wide pair, wrap a
//! [`RefreshTokenRequester`](crate::sources::oauth2::RefreshTokenRequester) in
//! a [`TokenCache`](crate::TokenCache) instead.

use std::time::Duration;

use credence_clock::{Clock, DurationSecs, UnixTime};
use serde_json::{Map, Value};

use crate::{
    claims::{self, MalformedClaims},
    error::{PairError, RefreshFailed},
    sources::oauth2::{dto::TokenResponse, RefreshGrant},
    Credential, IdToken, IdTokenRef, RefreshToken, RefreshTokenRef, ScopeRef,
};

/// An access token along with the tokens that accompanied it
#[derive(Debug)]
pub struct TokenPair {
    access: Credential,
    refresh_token: Option<RefreshToken>,
    id_token: Option<IdToken>,
    expires_in: Option<DurationSecs>,
}

impl TokenPair {
    /// Constructs a token pair
    pub fn new(
        access: Credential,
        refresh_token: Option<RefreshToken>,
        id_token: Option<IdToken>,
    ) -> Self {
        let expires_in = access.until_expired_at(access.obtained_at());
        Self {
            access,
            refresh_token,
            id_token,
            expires_in,
        }
    }

    /// Constructs a token pair from a token endpoint response
    ///
    /// The access token's expiry is read from its claims, falling back to
    /// `expires_in` for opaque tokens.
    pub fn from_response(response: TokenResponse, obtained_at: UnixTime) -> Self {
        let expires_in = response.expires_in;
        let access = Credential::from_claims(response.access_token, obtained_at, expires_in);
        Self {
            access,
            refresh_token: response.refresh_token,
            id_token: response.id_token,
            expires_in,
        }
    }

    /// The access token
    #[inline]
    pub fn access(&self) -> &Credential {
        &self.access
    }

    /// The refresh token, if any
    pub fn refresh_token(&self) -> Option<&RefreshTokenRef> {
        self.refresh_token.as_deref()
    }

    /// The ID token, if any
    pub fn id_token(&self) -> Option<&IdTokenRef> {
        self.id_token.as_deref()
    }

    /// The claims carried by the ID token, if any
    ///
    /// The ID token is decoded but not verified. It was received directly
    /// from the authority's token endpoint, so it is only as trustworthy as
    /// that connection.
    pub fn id_token_claims(&self) -> Result<Option<Map<String, Value>>, MalformedClaims> {
        self.id_token
            .as_deref()
            .map(|t| claims::all_claims(t.as_str()))
            .transpose()
    }

    /// The access token lifetime reported when the pair was issued
    #[inline]
    pub fn expires_in(&self) -> Option<DurationSecs> {
        self.expires_in
    }
}

/// Refreshes the pair if its access token is no longer fresh
///
/// Returns `Ok(None)` when the access token can still be used, or the
/// replacement pair after a successful refresh.
pub async fn validate_and_refresh<G, C>(
    pair: &TokenPair,
    grant: &G,
    clock: &C,
    early_refresh: Duration,
    scope: Option<&ScopeRef>,
) -> Result<Option<TokenPair>, PairError>
where
    G: RefreshGrant,
    C: Clock,
{
    let status = pair.access.status_with_clock(clock, early_refresh);
    if status.is_usable() {
        tracing::trace!("access token is fresh");
        return Ok(None);
    }

    tracing::debug!(?status, "access token needs refresh");
    refresh_pair(pair.refresh_token(), grant, clock, scope)
        .await
        .map(Some)
}

/// Exchanges a refresh token for a new token pair
///
/// If the authority does not rotate the refresh token, the one that was used
/// is carried over into the new pair.
pub async fn refresh_pair<G, C>(
    refresh_token: Option<&RefreshTokenRef>,
    grant: &G,
    clock: &C,
    scope: Option<&ScopeRef>,
) -> Result<TokenPair, PairError>
where
    G: RefreshGrant,
    C: Clock,
{
    let refresh_token = refresh_token.ok_or(PairError::MissingRefreshToken)?;

    let response = match grant.exchange(refresh_token, scope).await {
        Ok(response) => response,
        Err(error) => {
            tracing::warn!(
                error = (&error as &dyn std::error::Error),
                "refresh token exchange failed"
            );
            return Err(RefreshFailed::new(error).into());
        }
    };

    let mut pair = TokenPair::from_response(response, clock.now());
    let rotated = pair.refresh_token.is_some();
    if !rotated {
        pair.refresh_token = Some(refresh_token.to_owned());
    }

    tracing::info!(
        rotated,
        has_id_token = pair.id_token.is_some(),
        expires_at = pair.access.expires_at().map(|t| t.0),
        "refreshed token pair"
    );

    Ok(pair)
}
