use std::sync::Arc;

use thiserror::Error;

use crate::renewal::RenewalError;

/// A terminal error produced by the request gateway itself
///
/// Anything else a caller observes is either the transport's own error
/// or the server's response, passed through untouched.
#[derive(Debug, Error)]
pub enum GateError {
    /// The access credential was already expired before dispatch
    ///
    /// The request was cancelled without reaching the network, and the
    /// session has been torn down. Distinguishable from a server
    /// rejection: the server never saw this call.
    #[error("access credential expired before the request was sent")]
    PreflightExpired,

    /// A renewal was attempted on the caller's behalf and failed
    ///
    /// The session has been torn down. The caller sees the renewal
    /// failure, not the authorization failure that triggered it.
    #[error("session renewal failed: {0}")]
    Renewal(Arc<RenewalError>),
}

impl From<Arc<RenewalError>> for GateError {
    fn from(error: Arc<RenewalError>) -> Self {
        GateError::Renewal(error)
    }
}
