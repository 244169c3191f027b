use impulse_core::StoreError;

/// Errors inside the replication layer.
///
/// These never cross the sync boundary to CRUD callers: the session loop
/// absorbs them into the reported [`SyncStatus`](crate::SyncStatus).
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Network or connection failure. Recoverable; the session backs off
    /// and retries.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote rejected our credentials or the endpoint. Not retried;
    /// the user has to reconfigure.
    #[error("authentication rejected: {0}")]
    AuthDenied(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
