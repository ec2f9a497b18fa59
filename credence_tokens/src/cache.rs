//! A credential cache that coordinates a single refresh among concurrent callers
//!
//! [`TokenCache`] hands out the cached credential for as long as it remains
//! fresh. Once the credential is missing, unverifiable, expired, or inside the
//! early refresh window, the first caller to notice starts a refresh and every
//! other caller that arrives before it finishes waits on that same refresh.
//!
//! # Failure policy
//!
//! When a refresh fails and a credential was previously obtained, that
//! credential is returned even if it has gone stale. Availability is favored
//! over freshness: a slightly stale credential is often still accepted by the
//! relying party, while an error is certain to fail the request. Only when
//! nothing has ever been cached does a failed refresh surface as
//! [`Error::NoCredentialAvailable`].

use std::{
    borrow::Cow,
    error, fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use credence_clock::{Clock, System};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{instrument::WithSubscriber, Dispatch, Instrument};

use crate::{
    error::{refresh_interrupted, Error, RefreshFailed},
    provider::CredentialProvider,
    sources::CredentialRequester,
    Credential,
};

/// Determines whether a credential may be used without refreshing it
///
/// Returns `false` if there is no credential, if its expiry cannot be
/// determined, or if `now + early_refresh` has reached its expiry. The
/// check is pure; all time is supplied by the caller.
pub fn validate(
    credential: Option<&Credential>,
    now_millis: u64,
    early_refresh: Duration,
) -> bool {
    credential
        .map(|c| c.status_at(now_millis, early_refresh))
        .map_or(false, |status| status.is_usable())
}

/// The outcome of a refresh, as observed by every caller waiting on it
#[derive(Clone, Debug)]
enum Resolution {
    Refreshed(Arc<Credential>),
    Stale {
        credential: Arc<Credential>,
        failure: RefreshFailed,
    },
    Failed(RefreshFailed),
}

type InFlight = watch::Receiver<Option<Resolution>>;

#[derive(Default)]
struct CacheState {
    current: Option<Arc<Credential>>,
    in_flight: Option<InFlight>,
}

struct Shared<R> {
    requester: AsyncMutex<R>,
    state: Mutex<CacheState>,
}

impl<R> Shared<R> {
    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        // State is only mutated in short critical sections that cannot leave
        // it half-written, so a poisoned lock is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies a refresh result and clears the in-flight marker in one step
    fn complete<E>(&self, result: Result<Credential, E>) -> Resolution
    where
        E: error::Error + Send + Sync + 'static,
    {
        let mut state = self.lock_state();
        state.in_flight = None;

        match result {
            Ok(credential) => {
                let newer_cached = state
                    .current
                    .clone()
                    .filter(|current| credential.obtained_at() < current.obtained_at());

                if let Some(current) = newer_cached {
                    tracing::warn!(
                        cached_obtained_at = current.obtained_at().0,
                        received_obtained_at = credential.obtained_at().0,
                        "received credential is older than the cached one"
                    );
                    return Resolution::Refreshed(current);
                }

                tracing::info!(
                    obtained_at = credential.obtained_at().0,
                    expires_at = credential.expires_at().map(|t| t.0),
                    "cached new credential"
                );
                let credential = Arc::new(credential);
                state.current = Some(Arc::clone(&credential));
                Resolution::Refreshed(credential)
            }
            Err(error) => {
                tracing::error!(
                    error = (&error as &dyn error::Error),
                    has_fallback = state.current.is_some(),
                    "credential refresh failed"
                );
                let failure = RefreshFailed::new(error);
                match &state.current {
                    Some(current) => Resolution::Stale {
                        credential: Arc::clone(current),
                        failure,
                    },
                    None => Resolution::Failed(failure),
                }
            }
        }
    }
}

/// Clears the in-flight marker if the refresh task unwinds before completing
struct InFlightGuard<'a, R> {
    shared: &'a Shared<R>,
    completed: bool,
}

impl<R> InFlightGuard<'_, R> {
    fn complete<E>(&mut self, result: Result<Credential, E>) -> Resolution
    where
        E: error::Error + Send + Sync + 'static,
    {
        self.completed = true;
        self.shared.complete(result)
    }
}

impl<R> Drop for InFlightGuard<'_, R> {
    fn drop(&mut self) {
        if !self.completed {
            tracing::error!("credential refresh ended without an outcome");
            self.shared.lock_state().in_flight = None;
        }
    }
}

async fn refresh<R>(
    shared: Arc<Shared<R>>,
    prior: Option<Arc<Credential>>,
    tx: watch::Sender<Option<Resolution>>,
) where
    R: CredentialRequester,
{
    let mut guard = InFlightGuard {
        shared: &shared,
        completed: false,
    };

    tracing::debug!("requesting new credential");
    let result = {
        let mut requester = shared.requester.lock().await;
        requester.request_credential(prior.as_deref()).await
    };

    let resolution = guard.complete(result);
    if tx.send(Some(resolution)).is_err() {
        tracing::trace!("no callers were waiting on the refresh");
    }
}

/// A credential cache with single-flight refresh
///
/// Clones share the same cached credential and in-flight refresh.
///
/// Refreshes run on a spawned Tokio task, so callers must be within a Tokio
/// runtime. A caller that stops waiting does not cancel a refresh; it runs
/// to completion and its outcome is delivered to every other waiter.
pub struct TokenCache<R, C = System> {
    name: Cow<'static, str>,
    early_refresh: Duration,
    clock: C,
    shared: Arc<Shared<R>>,
}

impl<R> TokenCache<R, System> {
    /// Constructs a new, empty cache that obtains credentials from `requester`
    ///
    /// The early refresh window defaults to zero, so a credential is used up
    /// until the moment it expires.
    pub fn new(requester: R) -> Self {
        Self {
            name: Cow::Borrowed("credential"),
            early_refresh: Duration::ZERO,
            clock: System,
            shared: Arc::new(Shared {
                requester: AsyncMutex::new(requester),
                state: Mutex::new(CacheState::default()),
            }),
        }
    }
}

impl<R, C> TokenCache<R, C> {
    /// Sets the early refresh window
    ///
    /// A credential is refreshed once it is within `early_refresh` of its
    /// expiry, rather than waiting for it to expire.
    pub fn with_early_refresh(mut self, early_refresh: Duration) -> Self {
        self.early_refresh = early_refresh;
        self
    }

    /// Sets the early refresh window in milliseconds
    pub fn with_early_refresh_ms(self, early_refresh_ms: u64) -> Self {
        self.with_early_refresh(Duration::from_millis(early_refresh_ms))
    }

    /// Sets the name reported in log events for this cache
    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> TokenCache<R, D> {
        TokenCache {
            name: self.name,
            early_refresh: self.early_refresh,
            clock,
            shared: self.shared,
        }
    }

    /// Gets the early refresh window
    #[inline]
    pub fn early_refresh(&self) -> Duration {
        self.early_refresh
    }

    /// Gets the most recently obtained credential, regardless of its validity
    pub fn current(&self) -> Option<Arc<Credential>> {
        self.shared.lock_state().current.clone()
    }

    /// Whether a refresh is currently in flight
    pub fn is_refreshing(&self) -> bool {
        self.shared.lock_state().in_flight.is_some()
    }

    fn resolve(&self, resolution: Option<Resolution>) -> Result<Arc<Credential>, Error> {
        match resolution {
            Some(Resolution::Refreshed(credential)) => Ok(credential),
            Some(Resolution::Stale {
                credential,
                failure,
            }) => {
                tracing::warn!(
                    cache = %self.name,
                    error = (&failure as &dyn error::Error),
                    expires_at = credential.expires_at().map(|t| t.0),
                    "refresh failed, using previously cached credential"
                );
                Ok(credential)
            }
            Some(Resolution::Failed(failure)) => Err(Error::NoCredentialAvailable(failure)),
            None => {
                let failure = RefreshFailed::new(refresh_interrupted());
                match self.current() {
                    Some(credential) => {
                        tracing::warn!(
                            cache = %self.name,
                            "refresh was interrupted, using previously cached credential"
                        );
                        Ok(credential)
                    }
                    None => Err(Error::NoCredentialAvailable(failure)),
                }
            }
        }
    }
}

impl<R, C> TokenCache<R, C>
where
    R: CredentialRequester + 'static,
    C: Clock,
{
    /// Gets a usable credential, refreshing it if required
    ///
    /// Returns the cached credential while it is fresh. Otherwise joins the
    /// in-flight refresh, starting one if none is running.
    pub async fn get_credential(&self) -> Result<Arc<Credential>, Error> {
        let mut in_flight = {
            let mut state = self.shared.lock_state();

            if let Some(current) = &state.current {
                let status = current.status_at(self.clock.now_millis(), self.early_refresh);
                if status.is_usable() {
                    tracing::trace!(cache = %self.name, "using cached credential");
                    return Ok(Arc::clone(current));
                }
                tracing::debug!(cache = %self.name, ?status, "cached credential needs refresh");
            }

            match state.in_flight.clone() {
                Some(in_flight) => {
                    tracing::debug!(cache = %self.name, "awaiting in-flight refresh");
                    in_flight
                }
                None => self.start_refresh(&mut state),
            }
        };

        let resolution = in_flight
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|r| Option::clone(&r));

        self.resolve(resolution)
    }

    /// Gets a usable credential, reporting log events to `dispatch`
    ///
    /// Events from a refresh started by this call are reported to the same
    /// dispatcher.
    pub async fn get_credential_with(
        &self,
        dispatch: &Dispatch,
    ) -> Result<Arc<Credential>, Error> {
        self.get_credential()
            .with_subscriber(dispatch.clone())
            .await
    }

    fn start_refresh(&self, state: &mut CacheState) -> InFlight {
        tracing::debug!(cache = %self.name, "starting refresh");

        let (tx, rx) = watch::channel(None);
        state.in_flight = Some(rx.clone());

        let span = tracing::debug_span!("credential_refresh", cache = %self.name);
        let task = refresh(Arc::clone(&self.shared), state.current.clone(), tx);
        tokio::spawn(task.instrument(span).with_current_subscriber());

        rx
    }
}

#[async_trait]
impl<R, C> CredentialProvider for TokenCache<R, C>
where
    R: CredentialRequester + 'static,
    C: Clock + Send + Sync,
{
    async fn get_credential(&self) -> Result<Arc<Credential>, Error> {
        TokenCache::get_credential(self).await
    }
}

impl<R, C: Clone> Clone for TokenCache<R, C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            early_refresh: self.early_refresh,
            clock: self.clock.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R, C: fmt::Debug> fmt::Debug for TokenCache<R, C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.shared.lock_state();
        f.debug_struct("TokenCache")
            .field("name", &self.name)
            .field("early_refresh", &self.early_refresh)
            .field("clock", &self.clock)
            .field("current", &state.current)
            .field("refreshing", &state.in_flight.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use color_eyre::Result;
    use credence_clock::{DurationSecs, SharedTestClock, UnixTime};
    use thiserror::Error;
    use tokio::sync::Notify;
    use tracing_test::traced_test;

    use super::*;
    use crate::{error::RefreshInterrupted, AccessToken};

    const T: u64 = 1_700_000_000;

    #[derive(Debug, Error)]
    #[error("identity service unavailable")]
    struct Unavailable;

    type Respond =
        Box<dyn FnMut(usize, UnixTime) -> Result<Credential, Unavailable> + Send + Sync>;

    struct Scripted {
        calls: Arc<AtomicUsize>,
        clock: SharedTestClock,
        delay: Duration,
        gate: Option<Arc<Notify>>,
        respond: Respond,
    }

    impl Scripted {
        fn new(
            clock: &SharedTestClock,
            respond: impl FnMut(usize, UnixTime) -> Result<Credential, Unavailable>
                + Send
                + Sync
                + 'static,
        ) -> Self {
            Self {
                calls: Arc::default(),
                clock: clock.clone(),
                delay: Duration::ZERO,
                gate: None,
                respond: Box::new(respond),
            }
        }

        fn delayed(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn gated(mut self, gate: Arc<Notify>) -> Self {
            self.gate = Some(gate);
            self
        }

        fn calls(&self) -> Arc<AtomicUsize> {
            Arc::clone(&self.calls)
        }
    }

    #[async_trait]
    impl CredentialRequester for Scripted {
        type Error = Unavailable;

        async fn request_credential(
            &mut self,
            _prior: Option<&Credential>,
        ) -> Result<Credential, Self::Error> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            (self.respond)(call, self.clock.now())
        }
    }

    fn token(value: &str, now: UnixTime, lifetime: u64) -> Credential {
        Credential::with_lifetime(
            AccessToken::new(value.to_owned()),
            now,
            DurationSecs(lifetime),
        )
    }

    fn numbered(call: usize, now: UnixTime) -> Result<Credential, Unavailable> {
        Ok(token(&format!("token-{}", call + 1), now, 60))
    }

    #[test]
    fn validate_rejects_missing_and_unverifiable() {
        let now = UnixTime(T).as_millis();
        assert!(!validate(None, now, Duration::ZERO));

        let opaque = Credential::new(AccessToken::from_static("opaque"), UnixTime(T), None);
        assert!(!validate(Some(&opaque), now, Duration::ZERO));
    }

    #[test]
    fn validate_applies_early_refresh_window() {
        let credential = token("abc", UnixTime(T), 60);
        let now = UnixTime(T + 50).as_millis();

        assert!(validate(Some(&credential), now, Duration::from_secs(9)));
        assert!(!validate(Some(&credential), now, Duration::from_secs(10)));
        let expiry = UnixTime(T + 60).as_millis();
        assert!(!validate(Some(&credential), expiry, Duration::ZERO));
    }

    #[tokio::test]
    async fn fresh_credential_is_served_from_cache() -> Result<()> {
        let clock = SharedTestClock::new(UnixTime(T));
        let requester = Scripted::new(&clock, numbered);
        let calls = requester.calls();
        let cache = TokenCache::new(requester).with_clock(clock.clone());

        let first = cache.get_credential().await?;
        clock.advance(Duration::from_secs(30));
        let second = cache.get_credential().await?;

        assert_eq!(first.value().as_str(), "token-1");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn refreshes_exactly_at_expiry() -> Result<()> {
        let clock = SharedTestClock::new(UnixTime(T - 60));
        let requester = Scripted::new(&clock, numbered);
        let calls = requester.calls();
        let cache = TokenCache::new(requester)
            .with_early_refresh_ms(0)
            .with_clock(clock.clone());

        let first = cache.get_credential().await?;
        assert_eq!(first.expires_at(), Some(UnixTime(T)));

        clock.set(UnixTime(T - 1));
        let hit = cache.get_credential().await?;
        assert_eq!(hit.value().as_str(), "token-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.set(UnixTime(T));
        let refreshed = cache.get_credential().await?;
        assert_eq!(refreshed.value().as_str(), "token-2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn refreshes_inside_early_window() -> Result<()> {
        let clock = SharedTestClock::new(UnixTime(T));
        let requester = Scripted::new(&clock, numbered);
        let calls = requester.calls();
        let cache = TokenCache::new(requester)
            .with_early_refresh_ms(10_000)
            .with_clock(clock.clone());

        cache.get_credential().await?;
        clock.set(UnixTime(T + 49));
        cache.get_credential().await?;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.set(UnixTime(T + 50));
        let refreshed = cache.get_credential().await?;
        assert_eq!(refreshed.value().as_str(), "token-2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn simultaneous_callers_share_one_request() -> Result<()> {
        let clock = SharedTestClock::new(UnixTime(T));
        let requester = Scripted::new(&clock, |_, now| Ok(token("abc", now, 60)))
            .delayed(Duration::from_millis(50));
        let calls = requester.calls();
        let cache = TokenCache::new(requester).with_clock(clock);

        let (a, b) = tokio::join!(cache.get_credential(), cache.get_credential());

        assert_eq!(a?.value().as_str(), "abc");
        assert_eq!(b?.value().as_str(), "abc");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!cache.is_refreshing());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn many_concurrent_callers_share_one_request() -> Result<()> {
        let clock = SharedTestClock::new(UnixTime(T));
        let gate = Arc::new(Notify::new());
        let requester = Scripted::new(&clock, numbered).gated(Arc::clone(&gate));
        let calls = requester.calls();
        let cache = TokenCache::new(requester).with_clock(clock);

        let callers: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_credential().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.notify_one();

        for caller in callers {
            let credential = caller.await??;
            assert_eq!(credential.value().as_str(), "token-1");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn failed_refresh_falls_back_to_stale_credential() -> Result<()> {
        let clock = SharedTestClock::new(UnixTime(T));
        let requester = Scripted::new(&clock, |call, now| match call {
            0 => Ok(token("old-token", now, 60)),
            _ => Err(Unavailable),
        });
        let calls = requester.calls();
        let cache = TokenCache::new(requester).with_clock(clock.clone());

        cache.get_credential().await?;
        clock.set(UnixTime(T + 120));

        let stale = cache.get_credential().await?;
        assert_eq!(stale.value().as_str(), "old-token");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(logs_contain("using previously cached credential"));
        Ok(())
    }

    #[tokio::test]
    async fn failed_refresh_without_fallback_is_an_error() {
        let clock = SharedTestClock::new(UnixTime(T));
        let requester = Scripted::new(&clock, |_, _| Err(Unavailable));
        let cache = TokenCache::new(requester).with_clock(clock);

        let error = cache.get_credential().await.unwrap_err();

        assert!(matches!(error, Error::NoCredentialAvailable(_)));
        assert_eq!(
            error.refresh_failure().requester_error().to_string(),
            "identity service unavailable"
        );
        assert!(cache.current().is_none());
        assert!(!cache.is_refreshing());
    }

    #[tokio::test]
    async fn failure_does_not_block_later_refreshes() -> Result<()> {
        let clock = SharedTestClock::new(UnixTime(T));
        let requester = Scripted::new(&clock, |call, now| match call {
            0 => Err(Unavailable),
            _ => Ok(token("recovered", now, 60)),
        });
        let calls = requester.calls();
        let cache = TokenCache::new(requester).with_clock(clock);

        assert!(cache.get_credential().await.is_err());
        let credential = cache.get_credential().await?;

        assert_eq!(credential.value().as_str(), "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_without_fallback_reaches_every_waiter() -> Result<()> {
        let clock = SharedTestClock::new(UnixTime(T));
        let gate = Arc::new(Notify::new());
        let requester = Scripted::new(&clock, |_, _| Err(Unavailable))
            .gated(Arc::clone(&gate));
        let calls = requester.calls();
        let cache = TokenCache::new(requester).with_clock(clock);

        let callers: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_credential().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.notify_one();

        for caller in callers {
            let result = caller.await?;
            assert!(matches!(result, Err(Error::NoCredentialAvailable(_))));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!cache.is_refreshing());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_hands_stale_credential_to_every_waiter() -> Result<()> {
        let clock = SharedTestClock::new(UnixTime(T));
        let gate = Arc::new(Notify::new());
        let requester = Scripted::new(&clock, |call, now| match call {
            0 => Ok(token("old-token", now, 60)),
            _ => Err(Unavailable),
        })
        .gated(Arc::clone(&gate));
        let calls = requester.calls();
        let cache = TokenCache::new(requester).with_clock(clock.clone());

        gate.notify_one();
        cache.get_credential().await?;
        clock.set(UnixTime(T + 120));

        let callers: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_credential().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.notify_one();

        for caller in callers {
            let credential = caller.await??;
            assert_eq!(credential.value().as_str(), "old-token");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_waiter_does_not_cancel_the_refresh() -> Result<()> {
        let clock = SharedTestClock::new(UnixTime(T));
        let gate = Arc::new(Notify::new());
        let requester = Scripted::new(&clock, numbered).gated(Arc::clone(&gate));
        let calls = requester.calls();
        let cache = TokenCache::new(requester).with_clock(clock);

        let first = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_credential().await })
        };
        let second = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_credential().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        first.abort();
        assert!(first.await.unwrap_err().is_cancelled());
        assert!(cache.is_refreshing());

        gate.notify_one();

        let credential = second.await??;
        assert_eq!(credential.value().as_str(), "token-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn each_stale_check_after_success_triggers_one_refresh() -> Result<()> {
        let clock = SharedTestClock::new(UnixTime(T));
        let requester = Scripted::new(&clock, numbered);
        let calls = requester.calls();
        let cache = TokenCache::new(requester).with_clock(clock.clone());

        for round in 1..=3 {
            let credential = cache.get_credential().await?;
            assert_eq!(credential.value().as_str(), format!("token-{}", round));
            assert!(!cache.is_refreshing());
            assert_eq!(calls.load(Ordering::SeqCst), round);
            clock.advance(Duration::from_secs(60));
        }
        Ok(())
    }

    #[tokio::test]
    async fn older_credentials_do_not_replace_newer_ones() -> Result<()> {
        let clock = SharedTestClock::new(UnixTime(T));
        let requester = Scripted::new(&clock, |call, now| match call {
            0 => Ok(token("newer", now, 60)),
            _ => Ok(token("older", UnixTime(T - 100), 10)),
        });
        let cache = TokenCache::new(requester).with_clock(clock.clone());

        cache.get_credential().await?;
        clock.set(UnixTime(T + 60));
        let credential = cache.get_credential().await?;

        assert_eq!(credential.value().as_str(), "newer");
        Ok(())
    }

    #[tokio::test]
    async fn panicking_requester_does_not_wedge_the_cache() -> Result<()> {
        let clock = SharedTestClock::new(UnixTime(T));
        let requester = Scripted::new(&clock, |call, now| match call {
            0 => panic!("requester bug"),
            _ => Ok(token("after-panic", now, 60)),
        });
        let cache = TokenCache::new(requester).with_clock(clock);

        let error = cache.get_credential().await.unwrap_err();
        assert!(error
            .refresh_failure()
            .requester_error()
            .downcast_ref::<RefreshInterrupted>()
            .is_some());
        assert!(!cache.is_refreshing());

        let credential = cache.get_credential().await?;
        assert_eq!(credential.value().as_str(), "after-panic");
        Ok(())
    }

    #[tokio::test]
    async fn interrupted_refresh_falls_back_to_cached_credential() -> Result<()> {
        let clock = SharedTestClock::new(UnixTime(T));
        let requester = Scripted::new(&clock, |call, now| match call {
            0 => Ok(token("first", now, 60)),
            _ => panic!("requester bug"),
        });
        let calls = requester.calls();
        let cache = TokenCache::new(requester).with_clock(clock.clone());

        let first = cache.get_credential().await?;
        clock.set(UnixTime(T + 120));

        let fallback = cache.get_credential().await?;

        assert!(Arc::ptr_eq(&first, &fallback));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!cache.is_refreshing());
        Ok(())
    }

    #[tokio::test]
    async fn injected_dispatch_receives_refresh_events() -> Result<()> {
        use tracing_subscriber::{layer::Context, prelude::*, Layer};

        struct Counting(Arc<AtomicUsize>);

        impl<S: tracing::Subscriber> Layer<S> for Counting {
            fn on_event(&self, _: &tracing::Event<'_>, _: Context<'_, S>) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let events = Arc::new(AtomicUsize::new(0));
        let layer = Counting(Arc::clone(&events));
        let dispatch = Dispatch::new(tracing_subscriber::registry().with(layer));

        let clock = SharedTestClock::new(UnixTime(T));
        let requester = Scripted::new(&clock, numbered);
        let cache = TokenCache::new(requester).with_clock(clock);

        cache.get_credential_with(&dispatch).await?;

        assert!(events.load(Ordering::SeqCst) > 0);
        Ok(())
    }
}
