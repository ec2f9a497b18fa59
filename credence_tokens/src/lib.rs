//! Cached credentials with single-flight refresh
//!
//! Services that call other services on their own behalf need short-lived
//! bearer credentials: federated identity tokens, OAuth2 access tokens and
//! the like. This crate keeps the most recent credential in a [`TokenCache`],
//! hands it out while it remains fresh, and refreshes it when it is about to
//! expire. However many tasks ask for a credential at the same moment, at most
//! one refresh is in flight, and every one of them receives its outcome.
//!
//! When a refresh fails, the previously cached credential is returned instead,
//! even if it has gone stale. An error is only reported when there is nothing
//! to fall back to.
//!
//! # Sources
//!
//! Credentials are obtained from a [`CredentialRequester`][sources::CredentialRequester]:
//!
//! * [`FederatedTokenRequester`][sources::federated::FederatedTokenRequester] exchanges a
//!   developer-authenticated identity for an OpenID token through an
//!   [`IdentityBroker`][sources::federated::IdentityBroker].
//! * [`RefreshTokenRequester`][sources::oauth2::RefreshTokenRequester] exchanges a rotating
//!   OAuth2 refresh token through a [`RefreshGrant`][sources::oauth2::RefreshGrant].
//!
//! Request-scoped access/refresh token pairs, such as those held in a user's
//! session, are handled by the functions in [`pair`].
//!
//! # Example
//!
//! ```no_run
//! use credence_tokens::{
//!     sources::oauth2::{HttpRefreshGrant, RefreshTokenRequester},
//!     ClientAuthentication, ClientId, ClientSecret, RefreshToken, TokenCache,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let grant = HttpRefreshGrant::new(
//!     reqwest::Client::new(),
//!     reqwest::Url::parse("https://auth.example.com/oauth/token")?,
//!     ClientId::from_static("my-client"),
//!     ClientAuthentication::ClientSecret(ClientSecret::from_static("my-secret")),
//! );
//!
//! let requester = RefreshTokenRequester::new(grant, RefreshToken::from_static("refresh"));
//! let cache = TokenCache::new(requester).with_early_refresh_ms(30_000);
//!
//! let credential = cache.get_credential().await?;
//! println!("{}", credential.value());
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! * `http` (default): Provides [`HttpRefreshGrant`][sources::oauth2::HttpRefreshGrant],
//!   a refresh grant against an OAuth2 token endpoint using [reqwest].

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
pub mod cache;
pub mod claims;
pub mod client_auth;
pub mod config;
mod credential;
mod error;
pub mod pair;
pub mod provider;
pub mod sources;

pub use braids::*;
pub use cache::{validate, TokenCache};
pub use client_auth::{AuthKind, ClientAuthentication};
pub use config::{FederatedProviderConfig, RefreshGrantConfig};
pub use credential::{Credential, CredentialStatus, Expiry};
pub use error::{ConfigurationError, Error, PairError, RefreshFailed, RefreshInterrupted};
pub use pair::TokenPair;
pub use provider::{CredentialProvider, FederatedTokenProvider};
