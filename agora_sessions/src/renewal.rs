//! The credential-renewal exchange

use std::{fmt, sync::Arc};

use aliri_clock::{Clock, System};
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::{
    store::{SessionStore, StoreError},
    AccessToken, RenewalToken, Session, UnixMillis,
};

/// A source able to produce a replacement session
///
/// The coordinator invokes a source exactly once per renewal cycle.
/// Sources are side-effect-free beyond the exchange itself: persisting
/// the replacement session, restarting dependents, and tearing down on
/// failure all belong to the coordinator.
#[async_trait]
pub trait RenewalSource: Send + Sync {
    /// Exchanges the current renewal credential for a replacement session
    async fn renew(&self) -> Result<Session, RenewalError>;
}

/// An error while attempting to renew the session
#[derive(Debug, Error)]
pub enum RenewalError {
    /// No usable renewal credential is held
    #[error("no renewal credential is available")]
    CredentialMissing,
    /// The renewal endpoint answered success but the grant was incomplete
    #[error("renewal endpoint returned an incomplete grant")]
    ContractViolation(#[from] serde_json::Error),
    /// An error from the renewal endpoint with an error body
    #[error("error renewing session: {body}")]
    ErrorWithBody {
        /// The underlying request error
        source: reqwest::Error,
        /// The body of the error
        body: String,
    },
    /// Unable to send the renewal request
    #[error("error sending renewal request")]
    RequestSend(#[source] reqwest::Error),
    /// Unable to read the renewal response
    #[error("error reading renewal response body")]
    BodyRead(#[source] reqwest::Error),
    /// The session store failed while renewing
    #[error("unable to persist the renewed session")]
    Store(#[source] StoreError),
    /// The renewal was abandoned before it settled
    ///
    /// Only reachable when the task leading the exchange is cancelled
    /// mid-flight.
    #[error("renewal abandoned before completion")]
    Interrupted,
}

/// The renewal endpoint's success contract
///
/// A response missing a required field is a decode error, surfaced as
/// [`RenewalError::ContractViolation`].
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenewalGrant {
    access_credential: AccessToken,
    renewal_credential: RenewalToken,
    #[serde(default)]
    access_expires_in: Option<u64>,
    #[serde(default)]
    grant_type: Option<String>,
    #[serde(default)]
    role: Option<String>,
}

/// Renews sessions against the board's renewal endpoint
///
/// The renewal credential is presented as the exchange's own bearer
/// credential; the access credential plays no part. The exchange runs on
/// a bare [`reqwest::Client`] so it can never recurse through the
/// gateway it serves.
pub struct RenewalClient<C = System> {
    client: reqwest::Client,
    renew_url: reqwest::Url,
    store: Arc<dyn SessionStore>,
    clock: C,
}

impl RenewalClient<System> {
    /// Constructs a new renewal client
    pub fn new(
        client: reqwest::Client,
        renew_url: reqwest::Url,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            client,
            renew_url,
            store,
            clock: System,
        }
    }
}

impl<C> RenewalClient<C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> RenewalClient<D> {
        RenewalClient {
            client: self.client,
            renew_url: self.renew_url,
            store: self.store,
            clock,
        }
    }
}

impl<C: Clock> RenewalClient<C> {
    #[tracing::instrument(err, skip(self), fields(renew_url = %self.renew_url))]
    async fn request_session(&self) -> Result<Session, RenewalError> {
        let held = self.store.read().await.map_err(RenewalError::Store)?;
        let renewal_token = held
            .as_ref()
            .and_then(Session::renewal_token)
            .ok_or(RenewalError::CredentialMissing)?
            .to_owned();

        tracing::trace!("requesting replacement credentials");

        let resp = self
            .client
            .post(self.renew_url.clone())
            .bearer_auth(renewal_token.as_str())
            .send()
            .await
            .map_err(RenewalError::RequestSend)?;

        tracing::debug!(
            response.status = resp.status().as_u16(),
            "received renewal response"
        );

        if let Err(error) = resp.error_for_status_ref() {
            let body = resp.text().await.map_err(RenewalError::BodyRead)?;
            return Err(RenewalError::ErrorWithBody {
                source: error,
                body,
            });
        }

        let body = resp.bytes().await.map_err(RenewalError::BodyRead)?;
        let grant: RenewalGrant = serde_json::from_slice(&body)?;

        let now = UnixMillis::from(self.clock.now());
        let access_expiry = grant
            .access_expires_in
            .map(|secs| UnixMillis(now.0 + secs * 1000));

        tracing::info!(
            has_expiry = access_expiry.is_some(),
            "received replacement credentials"
        );

        Ok(
            Session::new(
                grant.access_credential,
                Some(grant.renewal_credential),
                access_expiry,
            )
            .with_grant_type(grant.grant_type)
            .with_role(grant.role),
        )
    }
}

#[async_trait]
impl<C: Clock + Send + Sync> RenewalSource for RenewalClient<C> {
    async fn renew(&self) -> Result<Session, RenewalError> {
        self.request_session().await
    }
}

impl<C: fmt::Debug> fmt::Debug for RenewalClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RenewalClient")
            .field("renew_url", &self.renew_url)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

/// A renewal source that returns clones of a fixed session
///
/// Useful for tests and demos where no renewal endpoint is available.
#[derive(Debug)]
pub struct StaticRenewalSource {
    session: Session,
}

impl StaticRenewalSource {
    /// Constructs a source that always yields `session`
    pub fn new(session: Session) -> Self {
        Self { session }
    }
}

#[async_trait]
impl RenewalSource for StaticRenewalSource {
    async fn renew(&self) -> Result<Session, RenewalError> {
        Ok(self.session.clone_it())
    }
}
