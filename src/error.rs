use thiserror::Error;
use uuid::Uuid;

use crate::remote::RemoteError;

/// Errors surfaced by the sync layer.
///
/// `StaleResponse` is internal bookkeeping: public operations translate it
/// into a silent no-op and never return it.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote could not be reached or answered with garbage
    #[error("Network failure: {0}")]
    NetworkFailure(#[source] RemoteError),

    #[error("Sign in required")]
    Unauthenticated,

    /// Article or comment does not exist (or has no server identity yet)
    #[error("Not found")]
    NotFound,

    #[error("Stale response discarded")]
    StaleResponse,

    /// An optimistic mutation was rejected and has been rolled back.
    ///
    /// `original_body` carries the user's text for an add, so it can be
    /// offered again.
    #[error("Could not sync with server: {cause}")]
    ReconciliationFailure {
        correlation_id: Option<Uuid>,
        original_body: Option<String>,
        #[source]
        cause: RemoteError,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Local cache error: {0}")]
    Storage(String),
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Unauthenticated => SyncError::Unauthenticated,
            RemoteError::NotFound => SyncError::NotFound,
            other => SyncError::NetworkFailure(other),
        }
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(err: anyhow::Error) -> Self {
        SyncError::Storage(format!("{err:#}"))
    }
}

impl SyncError {
    /// True when retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::NetworkFailure(e) => matches!(
                e,
                RemoteError::Network(_) | RemoteError::Timeout(_) | RemoteError::HttpStatus(500..)
            ),
            SyncError::ReconciliationFailure { cause, .. } => matches!(
                cause,
                RemoteError::Network(_) | RemoteError::Timeout(_) | RemoteError::HttpStatus(500..)
            ),
            SyncError::Unauthenticated
            | SyncError::NotFound
            | SyncError::StaleResponse
            | SyncError::InvalidInput(_)
            | SyncError::Storage(_) => false,
        }
    }
}
