//! An in-memory session store

use std::sync::Mutex;

use async_trait::async_trait;

use super::{SessionStore, StoreError};
use crate::Session;

/// A session store held entirely in process memory
///
/// Nothing survives the process; useful for tests and short-lived
/// tools that sign in on every run.
#[derive(Default, Debug)]
pub struct InMemorySessionStore {
    session: Mutex<Option<Session>>,
}

impl InMemorySessionStore {
    /// Constructs a new, empty in-memory session store
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn read(&self) -> Result<Option<Session>, StoreError> {
        Ok(self.slot().as_ref().map(Session::clone_it))
    }

    async fn write(&self, session: &Session) -> Result<(), StoreError> {
        *self.slot() = Some(session.clone_it());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        *self.slot() = None;
        Ok(())
    }
}
