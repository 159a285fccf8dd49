//! Session persistence

use async_trait::async_trait;
use std::error;

use crate::Session;

#[cfg(feature = "file")]
pub mod file;
pub mod memory;

#[cfg(feature = "file")]
pub use file::FileSessionStore;
pub use memory::InMemorySessionStore;

/// The error type shared by [`SessionStore`] implementations
pub type StoreError = Box<dyn error::Error + Send + Sync + 'static>;

/// A durable holder for the current session
///
/// A store holds at most one session and exposes no partial-field
/// operations: `write` fully replaces whatever was held before, and
/// `clear` removes every persisted field together. Callers that need to
/// change a single field must read, modify, and write the whole session.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Reads the current session, if one is held
    async fn read(&self) -> Result<Option<Session>, StoreError>;

    /// Replaces the held session with `session`
    async fn write(&self, session: &Session) -> Result<(), StoreError>;

    /// Removes the held session and every related field
    async fn clear(&self) -> Result<(), StoreError>;
}
