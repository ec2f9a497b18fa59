//! Errors surfaced to callers of credential providers

use std::{error::Error as StdError, sync::Arc};

use thiserror::Error;

type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// A required construction parameter is missing or invalid
///
/// These errors are fatal and are reported before any network activity.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// No identity pool identifier was supplied
    #[error("identity pool id is required")]
    MissingPoolId,
    /// No client identifier was supplied
    #[error("client id is required")]
    MissingClientId,
    /// Neither a client secret nor a federated provider was supplied to
    /// authenticate the client
    #[error("client authentication is required")]
    MissingClientAuthentication,
    /// The token endpoint URL could not be parsed
    #[error("token url '{url}' is invalid")]
    InvalidTokenUrl {
        /// The rejected URL
        url: String,
        /// The parse failure
        source: Box<dyn StdError + Send + Sync + 'static>,
    },
}

/// A refresh attempt against the credential requester failed
///
/// This error is cheap to clone so that a single failure can be reported to
/// every caller that was waiting on the same refresh.
#[derive(Clone, Debug, Error)]
#[error("credential refresh failed")]
pub struct RefreshFailed {
    #[source]
    source: SharedError,
}

impl RefreshFailed {
    pub(crate) fn new(source: impl StdError + Send + Sync + 'static) -> Self {
        Self {
            source: Arc::new(source),
        }
    }

    /// The error reported by the credential requester
    pub fn requester_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.source
    }
}

/// The refresh task ended without reporting an outcome
///
/// This happens when the credential requester panics.
#[derive(Clone, Copy, Debug, Error)]
#[error("credential refresh ended without an outcome")]
pub struct RefreshInterrupted {
    _p: (),
}

pub(crate) const fn refresh_interrupted() -> RefreshInterrupted {
    RefreshInterrupted { _p: () }
}

/// An error obtaining a credential
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The refresh failed and there was no previously obtained credential to
    /// fall back to
    #[error("no credential available")]
    NoCredentialAvailable(#[source] RefreshFailed),
}

impl Error {
    /// The underlying refresh failure
    pub fn refresh_failure(&self) -> &RefreshFailed {
        match self {
            Error::NoCredentialAvailable(failure) => failure,
        }
    }
}

/// An error refreshing a request-scoped access/refresh token pair
#[derive(Clone, Debug, Error)]
pub enum PairError {
    /// No refresh token is available, so no refresh grant can be attempted
    #[error("missing refresh token")]
    MissingRefreshToken,
    /// The refresh grant exchange failed
    #[error(transparent)]
    RefreshFailed(#[from] RefreshFailed),
}
