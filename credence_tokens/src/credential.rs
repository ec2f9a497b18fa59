use std::time::Duration;

use credence_clock::{Clock, DurationSecs, UnixTime};

use crate::{
    claims::{self, TimingClaims},
    AccessTokenRef,
};

/// Where a credential's validity window came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expiry {
    /// The issuing source declared an expiration time
    Declared(UnixTime),
    /// The timing claims embedded in the token itself
    Claimed(TimingClaims),
    /// The source declared nothing and the token could not be introspected
    Unparsable,
}

/// A credential's lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialStatus {
    /// The credential is valid and outside of the early refresh window
    Fresh,
    /// The credential is still valid, but within the early refresh window
    Expiring,
    /// The credential is no longer valid
    Expired,
    /// The credential carries a `nbf` claim that has not yet been reached
    NotYetValid,
    /// The credential's expiry cannot be determined
    Unverifiable,
}

impl CredentialStatus {
    /// Whether a credential in this status may be handed out without a refresh
    #[inline]
    pub fn is_usable(self) -> bool {
        matches!(self, CredentialStatus::Fresh)
    }
}

/// A bearer credential along with what is known about its lifetime
///
/// Credentials are immutable. Refreshing produces a new credential rather
/// than updating an existing one.
#[derive(Debug)]
pub struct Credential {
    value: Box<AccessTokenRef>,
    obtained_at: UnixTime,
    expiry: Expiry,
}

impl Credential {
    /// Constructs a credential
    ///
    /// When `expires_at` is `None`, the expiry is introspected from the
    /// token's embedded `exp`/`nbf` claims.
    pub fn new<A>(value: A, obtained_at: UnixTime, expires_at: Option<UnixTime>) -> Self
    where
        A: AsRef<AccessTokenRef>,
    {
        let value = value.as_ref().to_owned().into_boxed_ref();
        let expiry = match expires_at {
            Some(at) => Expiry::Declared(at),
            None => introspect(&value),
        };

        Self {
            value,
            obtained_at,
            expiry,
        }
    }

    /// Constructs a credential that the issuer declared valid for `lifetime`
    /// from `obtained_at`
    pub fn with_lifetime<A>(value: A, obtained_at: UnixTime, lifetime: DurationSecs) -> Self
    where
        A: AsRef<AccessTokenRef>,
    {
        Self::new(value, obtained_at, Some(obtained_at + lifetime))
    }

    /// Constructs a credential whose expiry is read from the token's claims
    ///
    /// If the token cannot be introspected, `fallback_lifetime` (when
    /// provided) is used as a declared lifetime instead.
    pub fn from_claims<A>(
        value: A,
        obtained_at: UnixTime,
        fallback_lifetime: Option<DurationSecs>,
    ) -> Self
    where
        A: AsRef<AccessTokenRef>,
    {
        let mut credential = Self::new(value, obtained_at, None);
        if let (Expiry::Unparsable, Some(lifetime)) = (credential.expiry, fallback_lifetime) {
            credential.expiry = Expiry::Declared(obtained_at + lifetime);
        }
        credential
    }

    /// Gets the bearer value
    #[inline]
    pub fn value(&self) -> &AccessTokenRef {
        &self.value
    }

    /// Gets the time the credential was obtained
    #[inline]
    pub fn obtained_at(&self) -> UnixTime {
        self.obtained_at
    }

    /// Gets where the credential's validity window came from
    #[inline]
    pub fn expiry(&self) -> &Expiry {
        &self.expiry
    }

    /// Gets the time at which the credential expires, if known
    ///
    /// A token with claims but no `exp` claim does not expire and reports
    /// `None`, as does a credential whose expiry is unparsable.
    pub fn expires_at(&self) -> Option<UnixTime> {
        match self.expiry {
            Expiry::Declared(at) => Some(at),
            Expiry::Claimed(claims) => claims.expires_at,
            Expiry::Unparsable => None,
        }
    }

    /// Gets the credential's status based on the current time as reported by
    /// the provided clock
    #[inline]
    pub fn status_with_clock<C: Clock>(
        &self,
        clock: &C,
        early_refresh: Duration,
    ) -> CredentialStatus {
        self.status_at(clock.now_millis(), early_refresh)
    }

    /// Gets the credential's status as of `now_millis` (milliseconds since
    /// the Unix epoch)
    ///
    /// A credential is treated as expiring once
    /// `now + early_refresh >= expires_at`.
    pub fn status_at(&self, now_millis: u64, early_refresh: Duration) -> CredentialStatus {
        let (expires_at, not_before) = match self.expiry {
            Expiry::Unparsable => return CredentialStatus::Unverifiable,
            Expiry::Declared(at) => (Some(at), None),
            Expiry::Claimed(claims) => (claims.expires_at, claims.not_before),
        };

        if let Some(nbf) = not_before {
            if now_millis < nbf.as_millis() {
                return CredentialStatus::NotYetValid;
            }
        }

        let Some(expires_at) = expires_at else {
            return CredentialStatus::Fresh;
        };

        let expires_at = expires_at.as_millis();
        let window = u64::try_from(early_refresh.as_millis()).unwrap_or(u64::MAX);

        if now_millis >= expires_at {
            CredentialStatus::Expired
        } else if now_millis.saturating_add(window) >= expires_at {
            CredentialStatus::Expiring
        } else {
            CredentialStatus::Fresh
        }
    }

    /// Gets a duration for how much longer the credential would be valid as
    /// of the provided time
    ///
    /// Credentials that never expire, or whose expiry is unknown, report
    /// `None`.
    pub fn until_expired_at(&self, time: UnixTime) -> Option<DurationSecs> {
        self.expires_at().map(|at| at - time)
    }
}

fn introspect(value: &AccessTokenRef) -> Expiry {
    match claims::timing_claims(value.as_str()) {
        Ok(claims) => Expiry::Claimed(claims),
        Err(error) => {
            tracing::debug!(
                error = (&error as &dyn std::error::Error),
                "credential expiry cannot be introspected"
            );
            Expiry::Unparsable
        }
    }
}
