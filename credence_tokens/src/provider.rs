//! The credential provider interface and the federated identity facade

use std::sync::Arc;

use async_trait::async_trait;
use credence_clock::{Clock, System};
use tracing::Dispatch;

use crate::{
    cache::TokenCache,
    client_auth::AuthKind,
    config::FederatedProviderConfig,
    error::ConfigurationError,
    sources::federated::{FederatedTokenRequester, IdentityBroker},
    Credential, Error, IdentityPoolId, IdentityPoolIdRef,
};

/// Provides a usable credential on demand
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Gets a credential that is valid now, refreshing it if required
    async fn get_credential(&self) -> Result<Arc<Credential>, Error>;
}

#[async_trait]
impl<P: CredentialProvider + ?Sized> CredentialProvider for Arc<P> {
    async fn get_credential(&self) -> Result<Arc<Credential>, Error> {
        (**self).get_credential().await
    }
}

/// Federated tokens for a developer-authenticated identity, cached with
/// single-flight refresh
#[derive(Debug)]
pub struct FederatedTokenProvider<B, C = System> {
    pool_id: IdentityPoolId,
    cache: TokenCache<FederatedTokenRequester<B, C>, C>,
}

impl<B> FederatedTokenProvider<B, System> {
    /// Constructs a new provider from configuration
    ///
    /// Fails if no identity pool is configured.
    pub fn new(config: FederatedProviderConfig, broker: B) -> Result<Self, ConfigurationError> {
        Self::new_with_clock(config, broker, System)
    }
}

impl<B, C: Clone> FederatedTokenProvider<B, C> {
    /// Constructs a new provider that measures time with `clock`
    ///
    /// Useful for testing purposes
    pub fn new_with_clock(
        config: FederatedProviderConfig,
        broker: B,
        clock: C,
    ) -> Result<Self, ConfigurationError> {
        let pool_id = config.pool_id()?;
        let early_refresh = config.early_refresh();

        let requester = FederatedTokenRequester::new(broker, pool_id.clone(), config.logins)
            .with_clock(clock.clone());
        let cache = TokenCache::new(requester)
            .with_early_refresh(early_refresh)
            .with_name(format!("federated:{}", pool_id))
            .with_clock(clock);

        Ok(Self { pool_id, cache })
    }
}

impl<B, C> FederatedTokenProvider<B, C> {
    /// The identity pool tokens are issued from
    pub fn pool_id(&self) -> &IdentityPoolIdRef {
        &self.pool_id
    }

    /// The kind of client authentication these tokens serve
    #[inline]
    pub fn kind(&self) -> AuthKind {
        AuthKind::Federated
    }

    /// The underlying cache
    pub fn cache(&self) -> &TokenCache<FederatedTokenRequester<B, C>, C> {
        &self.cache
    }
}

impl<B, C> FederatedTokenProvider<B, C>
where
    B: IdentityBroker + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Gets a usable federated token, refreshing it if required
    pub async fn get_credential(&self) -> Result<Arc<Credential>, Error> {
        self.cache.get_credential().await
    }

    /// Gets a usable federated token, reporting log events to `dispatch`
    pub async fn get_credential_with(
        &self,
        dispatch: &Dispatch,
    ) -> Result<Arc<Credential>, Error> {
        self.cache.get_credential_with(dispatch).await
    }
}

#[async_trait]
impl<B, C> CredentialProvider for FederatedTokenProvider<B, C>
where
    B: IdentityBroker + 'static,
    C: Clock + Send + Sync + 'static,
{
    async fn get_credential(&self) -> Result<Arc<Credential>, Error> {
        self.cache.get_credential().await
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeMap,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use color_eyre::Result;
    use credence_clock::{SharedTestClock, UnixTime};
    use thiserror::Error;

    use super::*;
    use crate::{
        claims::test_support::jwt_expiring_at,
        sources::federated::{DeveloperIdentityRequest, DeveloperIdentityResponse},
        AccessToken,
    };

    const T: u64 = 1_700_000_000;

    #[derive(Debug, Error)]
    #[error("broker offline")]
    struct Offline;

    #[derive(Debug)]
    struct Broker {
        calls: Arc<AtomicUsize>,
        clock: SharedTestClock,
    }

    #[async_trait]
    impl IdentityBroker for Broker {
        type Error = Offline;

        async fn get_open_id_token_for_developer_identity(
            &self,
            request: &DeveloperIdentityRequest,
        ) -> Result<DeveloperIdentityResponse, Offline> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(
                request.logins.get("login.example").map(String::as_str),
                Some("dev-1")
            );
            Ok(DeveloperIdentityResponse {
                identity_id: Some("identity".to_owned()),
                token: Some(AccessToken::new(jwt_expiring_at(self.clock.now().0 + 600))),
            })
        }
    }

    fn config() -> FederatedProviderConfig {
        FederatedProviderConfig::new("us-east-1:pool")
            .with_login("login.example", "dev-1")
            .with_early_refresh_ms(60_000)
    }

    #[tokio::test]
    async fn facade_caches_federated_tokens() -> Result<()> {
        let clock = SharedTestClock::new(UnixTime(T));
        let calls = Arc::new(AtomicUsize::new(0));
        let broker = Broker {
            calls: Arc::clone(&calls),
            clock: clock.clone(),
        };
        let provider = FederatedTokenProvider::new_with_clock(config(), broker, clock.clone())?;

        assert_eq!(provider.pool_id().as_str(), "us-east-1:pool");
        assert_eq!(provider.kind(), AuthKind::Federated);
        assert_eq!(provider.cache().early_refresh(), Duration::from_secs(60));

        let first = provider.get_credential().await?;
        clock.set(UnixTime(T + 539));
        provider.get_credential().await?;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.set(UnixTime(T + 540));
        let second = provider.get_credential().await?;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(second.expires_at(), Some(UnixTime(T + 1_140)));
        assert!(first.expires_at() < second.expires_at());
        Ok(())
    }

    #[tokio::test]
    async fn facade_serves_as_a_shared_provider() -> Result<()> {
        let clock = SharedTestClock::new(UnixTime(T));
        let broker = Broker {
            calls: Arc::default(),
            clock: clock.clone(),
        };
        let provider: Arc<dyn CredentialProvider> =
            Arc::new(FederatedTokenProvider::new_with_clock(config(), broker, clock)?);

        let credential = provider.get_credential().await?;

        assert_eq!(credential.expires_at(), Some(UnixTime(T + 600)));
        Ok(())
    }

    #[test]
    fn missing_pool_id_is_rejected() {
        let config = FederatedProviderConfig {
            pool_id: "  ".to_owned(),
            logins: BTreeMap::new(),
            early_refresh_ms: 0,
        };
        let broker = Broker {
            calls: Arc::default(),
            clock: SharedTestClock::default(),
        };

        let result = FederatedTokenProvider::new(config, broker);

        assert!(matches!(result, Err(ConfigurationError::MissingPoolId)));
    }
}
