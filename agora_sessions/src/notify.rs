//! The live-notification subsystem boundary

use std::error;

use async_trait::async_trait;

use crate::AccessTokenRef;

/// The error type surfaced by a notification stream
pub type NotifyError = Box<dyn error::Error + Send + Sync + 'static>;

/// The live-notification stream attached to the authenticated UI
///
/// The gateway drives this subsystem only as a best-effort side effect:
/// a failure to restart or stop the stream is logged and never escalated
/// to the request that triggered it.
#[async_trait]
pub trait NotificationStream: Send + Sync {
    /// Restarts the stream with a freshly issued access token
    async fn restart_with_token(&self, token: &AccessTokenRef) -> Result<(), NotifyError>;

    /// Stops the stream
    async fn stop(&self) -> Result<(), NotifyError>;
}

/// A notification stream that does nothing
///
/// For deployments without a live-notification subsystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullNotificationStream;

#[async_trait]
impl NotificationStream for NullNotificationStream {
    async fn restart_with_token(&self, _: &AccessTokenRef) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), NotifyError> {
        Ok(())
    }
}
