//! Session teardown

use std::{error, fmt, sync::Arc};

use crate::{notify::NotificationStream, store::SessionStore};

/// A navigation primitive able to replace the current location
///
/// Teardown replaces the location rather than pushing a new one, so
/// "back" cannot return into the authenticated area afterwards.
pub trait Navigator: Send + Sync {
    /// Replaces the current location with `location`
    fn replace_location(&self, location: &str);
}

/// A navigator that only records the redirect in the log
///
/// For headless deployments with no navigation surface to speak of.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullNavigator;

impl Navigator for NullNavigator {
    fn replace_location(&self, location: &str) {
        tracing::info!(%location, "location replaced (no navigator attached)");
    }
}

/// Tears down the current session
///
/// Clears every persisted session field, stops the live-notification
/// stream, and redirects to the unauthenticated entry point, in that
/// order. Idempotent: with no session held, only the redirect is
/// observable.
#[derive(Clone)]
pub struct SessionTerminator {
    store: Arc<dyn SessionStore>,
    notifications: Arc<dyn NotificationStream>,
    navigator: Arc<dyn Navigator>,
    entry_point: String,
}

impl SessionTerminator {
    /// Constructs a terminator redirecting to `entry_point`
    pub fn new(
        store: Arc<dyn SessionStore>,
        notifications: Arc<dyn NotificationStream>,
        navigator: Arc<dyn Navigator>,
        entry_point: impl Into<String>,
    ) -> Self {
        Self {
            store,
            notifications,
            navigator,
            entry_point: entry_point.into(),
        }
    }

    /// Clears the session, stops dependents, and leaves the
    /// authenticated area
    ///
    /// Teardown never fails: a store or stream that cannot be reached is
    /// logged and skipped so the redirect always happens.
    pub async fn terminate(&self) {
        if let Err(error) = self.store.clear().await {
            tracing::warn!(
                error = (&*error as &dyn error::Error),
                "unable to clear the session store during teardown"
            );
        }

        if let Err(error) = self.notifications.stop().await {
            tracing::warn!(
                error = (&*error as &dyn error::Error),
                "unable to stop the notification stream during teardown"
            );
        }

        self.navigator.replace_location(&self.entry_point);
    }
}

impl fmt::Debug for SessionTerminator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SessionTerminator")
            .field("entry_point", &self.entry_point)
            .finish_non_exhaustive()
    }
}
