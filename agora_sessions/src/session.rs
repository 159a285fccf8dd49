use aliri_clock::{Clock, System, UnixTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{AccessToken, AccessTokenRef, RenewalToken, RenewalTokenRef};

/// Raw expiry values below this are seconds since the epoch.
const SECONDS_CUTOFF: u64 = 1_000_000_000_000;

/// Some issuing servers report the renewal token they revoked as the
/// literal string `"null"` rather than omitting the field.
const NULL_TOKEN: &str = "null";

/// An absolute instant, in milliseconds since the Unix epoch
///
/// Issuing servers are inconsistent about whether instants are reported
/// in seconds or milliseconds, so raw values are normalized on the way
/// in: anything below 10^12 is interpreted as seconds and scaled up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct UnixMillis(pub u64);

impl UnixMillis {
    /// Normalizes a raw seconds-or-milliseconds value into milliseconds
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        if raw < SECONDS_CUTOFF {
            Self(raw * 1000)
        } else {
            Self(raw)
        }
    }
}

impl From<UnixTime> for UnixMillis {
    #[inline]
    fn from(t: UnixTime) -> Self {
        Self(t.0 * 1000)
    }
}

impl Serialize for UnixMillis {
    #[inline]
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for UnixMillis {
    #[inline]
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u64::deserialize(deserializer)?;
        Ok(Self::from_raw(raw))
    }
}

/// The current sign-in session
///
/// At most one session exists at a time. Writing a session to a
/// [`SessionStore`][crate::store::SessionStore] fully replaces the prior
/// one; there are no partial-field updates.
#[derive(Debug, Serialize, Deserialize)]
pub struct Session {
    access_token: Box<AccessTokenRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    renewal_token: Option<Box<RenewalTokenRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_expiry: Option<UnixMillis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    grant_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
}

impl Session {
    /// Constructs a session from freshly issued credentials
    pub fn new(
        access_token: AccessToken,
        renewal_token: Option<RenewalToken>,
        access_expiry: Option<UnixMillis>,
    ) -> Self {
        Self {
            access_token: access_token.into_boxed_ref(),
            renewal_token: renewal_token.map(RenewalToken::into_boxed_ref),
            access_expiry,
            grant_type: None,
            role: None,
        }
    }

    /// Attaches the opaque grant-type label forwarded by the issuing server
    pub fn with_grant_type(mut self, grant_type: Option<String>) -> Self {
        self.grant_type = grant_type;
        self
    }

    /// Attaches the opaque role label forwarded by the issuing server
    pub fn with_role(mut self, role: Option<String>) -> Self {
        self.role = role;
        self
    }

    /// Gets the current access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// Gets the renewal token, if a usable one is held
    ///
    /// A missing renewal token and the literal `"null"` tombstone are
    /// both treated as absent.
    pub fn renewal_token(&self) -> Option<&RenewalTokenRef> {
        self.renewal_token
            .as_deref()
            .filter(|token| token.as_str() != NULL_TOKEN)
    }

    /// Gets the instant after which the access token must not be used
    #[inline]
    pub fn access_expiry(&self) -> Option<UnixMillis> {
        self.access_expiry
    }

    /// Gets the opaque grant-type label, if the issuing server sent one
    #[inline]
    pub fn grant_type(&self) -> Option<&str> {
        self.grant_type.as_deref()
    }

    /// Gets the opaque role label, if the issuing server sent one
    #[inline]
    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    /// Explicitly clones the session
    pub fn clone_it(&self) -> Self {
        Self {
            access_token: self.access_token.to_owned().into_boxed_ref(),
            renewal_token: self
                .renewal_token
                .as_deref()
                .map(|t| t.to_owned().into_boxed_ref()),
            access_expiry: self.access_expiry,
            grant_type: self.grant_type.clone(),
            role: self.role.clone(),
        }
    }

    /// Whether the access token is expired as of the provided time
    ///
    /// Fail-closed: a session with no recorded expiry is already
    /// expired, and the expiry instant itself is out of bounds.
    #[inline]
    pub fn is_expired_at(&self, now: UnixTime) -> bool {
        match self.access_expiry {
            Some(expiry) => UnixMillis::from(now) >= expiry,
            None => true,
        }
    }

    /// Whether the access token is expired according to the provided clock
    #[inline]
    pub fn is_expired_with_clock<C: Clock>(&self, clock: &C) -> bool {
        self.is_expired_at(clock.now())
    }

    /// Whether the access token is expired right now
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_with_clock(&System)
    }
}
