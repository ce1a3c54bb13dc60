use thiserror::Error;

/// Failures that cross the host and remote seams.
///
/// The dispatcher decides how loudly to report each variant: a stale identity
/// is dropped quietly, a malformed action is logged, everything else becomes
/// one user notification.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("remote request failed: {0}")]
    TransientRemote(String),

    #[error("library item no longer resolves: {0}")]
    StaleIdentity(String),

    #[error("malformed action: {0}")]
    MalformedAction(String),

    #[error("a sync is already in progress")]
    ConcurrentSyncRejected,

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("host request failed: {0}")]
    Host(String),
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
