//! Credential requesters

use crate::Credential;
use async_trait::async_trait;
use std::error;

pub mod federated;
pub mod oauth2;

/// An asynchronous source of fresh credentials
///
/// Implementations perform the network exchange with an identity service.
/// The cache never calls a requester concurrently with itself, and may call
/// it again after a failure, so a requester must tolerate being retried.
#[async_trait]
pub trait CredentialRequester: Send + Sync {
    /// The error type returned in the event that obtaining a credential fails
    type Error: error::Error + Send + Sync + 'static;

    /// Requests a new credential
    ///
    /// `prior` is the most recently cached credential, if any.
    async fn request_credential(
        &mut self,
        prior: Option<&Credential>,
    ) -> Result<Credential, Self::Error>;
}
