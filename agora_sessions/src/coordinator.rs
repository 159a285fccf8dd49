//! Single-flight coordination of credential renewal
//!
//! Any number of calls can fail on an expired access credential at the
//! same moment. The coordinator guarantees that exactly one renewal
//! exchange runs per cycle: the first failure leads the exchange, every
//! later failure suspends in a FIFO queue, and the whole queue settles
//! together with the exchange's outcome.

use std::{
    error, fmt, mem,
    sync::{Arc, Mutex, MutexGuard},
};

use tokio::sync::oneshot;

use crate::{
    notify::NotificationStream,
    renewal::{RenewalError, RenewalSource},
    store::SessionStore,
    terminator::SessionTerminator,
    AccessToken,
};

type Waiter = oneshot::Sender<Result<AccessToken, Arc<RenewalError>>>;

enum RenewalState {
    Idle,
    Renewing { waiters: Vec<Waiter> },
}

/// Coordinates renewal exchanges so that at most one is ever in flight
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct RenewalCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<RenewalState>,
    source: Arc<dyn RenewalSource>,
    store: Arc<dyn SessionStore>,
    notifications: Arc<dyn NotificationStream>,
    terminator: SessionTerminator,
}

impl RenewalCoordinator {
    /// Constructs a new coordinator
    pub fn new(
        source: Arc<dyn RenewalSource>,
        store: Arc<dyn SessionStore>,
        notifications: Arc<dyn NotificationStream>,
        terminator: SessionTerminator,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(RenewalState::Idle),
                source,
                store,
                notifications,
                terminator,
            }),
        }
    }

    /// Obtains a freshly renewed access token
    ///
    /// If a renewal is already in flight, this call suspends behind it
    /// and settles with that renewal's outcome. Otherwise it performs
    /// the exchange itself. On success the replacement session has been
    /// written to the store before this returns; on failure the session
    /// has been torn down before this returns.
    pub async fn renew(&self) -> Result<AccessToken, Arc<RenewalError>> {
        let rx = {
            let mut state = self.inner.lock_state();
            match &mut *state {
                RenewalState::Renewing { waiters } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                RenewalState::Idle => {
                    *state = RenewalState::Renewing {
                        waiters: Vec::new(),
                    };
                    None
                }
            }
        };

        match rx {
            Some(rx) => {
                tracing::debug!("renewal already in flight, joining the queue");
                rx.await
                    .unwrap_or(Err(Arc::new(RenewalError::Interrupted)))
            }
            None => self.lead().await,
        }
    }

    async fn lead(&self) -> Result<AccessToken, Arc<RenewalError>> {
        let guard = DrainOnDrop { inner: &self.inner };
        let outcome = self.exchange_and_commit().await;

        // The queue is taken and the state reset in one lock scope, so a
        // failure arriving after this point starts a fresh cycle.
        let waiters = self.inner.take_waiters();
        mem::forget(guard);

        tracing::debug!(queued = waiters.len(), "settling queued calls");
        for waiter in waiters {
            // a queued call that gave up waiting is fine to skip
            let _ = waiter.send(outcome.clone());
        }

        outcome
    }

    async fn exchange_and_commit(&self) -> Result<AccessToken, Arc<RenewalError>> {
        let committed = match self.inner.source.renew().await {
            Ok(session) => match self.inner.store.write(&session).await {
                Ok(()) => Ok(session),
                Err(error) => Err(RenewalError::Store(error)),
            },
            Err(error) => Err(error),
        };

        match committed {
            Ok(session) => {
                if let Err(error) = self
                    .inner
                    .notifications
                    .restart_with_token(session.access_token())
                    .await
                {
                    tracing::warn!(
                        error = (&*error as &dyn error::Error),
                        "unable to restart the notification stream with the renewed credential"
                    );
                }
                tracing::info!("session renewed");
                Ok(session.access_token().to_owned())
            }
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    "renewal failed, tearing the session down"
                );
                self.inner.terminator.terminate().await;
                Err(Arc::new(error))
            }
        }
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, RenewalState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_waiters(&self) -> Vec<Waiter> {
        match mem::replace(&mut *self.lock_state(), RenewalState::Idle) {
            RenewalState::Renewing { waiters } => waiters,
            RenewalState::Idle => Vec::new(),
        }
    }
}

impl fmt::Debug for RenewalCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = match &*self.inner.lock_state() {
            RenewalState::Idle => "Idle".to_owned(),
            RenewalState::Renewing { waiters } => format!("Renewing({} queued)", waiters.len()),
        };
        f.debug_struct("RenewalCoordinator")
            .field("state", &state)
            .finish_non_exhaustive()
    }
}

/// Settles the queue if the leading call is dropped mid-exchange, so
/// queued calls are never stranded.
struct DrainOnDrop<'a> {
    inner: &'a Inner,
}

impl Drop for DrainOnDrop<'_> {
    fn drop(&mut self) {
        let waiters = self.inner.take_waiters();
        if !waiters.is_empty() {
            tracing::warn!(abandoned = waiters.len(), "renewal abandoned with calls queued");
        }
        for waiter in waiters {
            let _ = waiter.send(Err(Arc::new(RenewalError::Interrupted)));
        }
    }
}
