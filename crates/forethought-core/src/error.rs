//! Error types for the task lifecycle engine.

use uuid::Uuid;

/// Input rejected before any credential or storage call is made.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("task text cannot be empty")]
    EmptyText,

    #[error("unknown recurrence type: {0} (expected none, daily, weekly or monthly)")]
    UnknownRecurrence(String),

    #[error("unknown interaction type: {0} (expected checkbox or hold)")]
    UnknownInteraction(String),

    #[error("duration goal cannot be negative: {0}")]
    NegativeDuration(i64),

    #[error("duration goal is out of range: {0}")]
    DurationOutOfRange(i64),

    #[error("invalid task id: {0}")]
    InvalidId(String),
}

/// Failure reported by a [`TaskStore`](crate::store::TaskStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    NotFound(Uuid),

    #[error("storage backend failed: {0:#}")]
    Backend(anyhow::Error),
}

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        Self::Backend(err)
    }
}

/// Error surfaced by every coordinator operation.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("task not found: {0}")]
    NotFound(Uuid),

    /// The projection was already acted upon; reload the view.
    #[error("projected task {0} no longer matches stored state")]
    ProjectionExpired(Uuid),

    /// A completion-only write found the task already completed.
    #[error("task {0} is already completed")]
    AlreadyCompleted(Uuid),

    #[error("storage unavailable: {0:#}")]
    StorageUnavailable(anyhow::Error),

    #[error("credentials unavailable: {0:#}")]
    AuthUnavailable(anyhow::Error),
}

impl From<StoreError> for LifecycleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(uuid) => Self::NotFound(uuid),
            StoreError::Backend(inner) => Self::StorageUnavailable(inner),
        }
    }
}

pub type Result<T> = std::result::Result<T, LifecycleError>;
