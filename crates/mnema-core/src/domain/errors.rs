use thiserror::Error;

/// Failures surfaced by the storage port. Transient failures are retryable
/// and are absorbed into the pending snapshot; fatal failures end the
/// session.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Transient storage failure: {0}")]
    Transient(String),

    #[error("Fatal storage failure: {0}")]
    Fatal(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("No active session")]
    NoActiveSession,

    #[error("A session is already active")]
    SessionAlreadyActive,

    #[error("No current item")]
    NoCurrentItem,

    #[error("Duplicate item id: {0}")]
    DuplicateItemId(String),

    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Non-finite interval computed for item {0}")]
    InvalidInterval(String),

    #[error("Transient persistence failure: {0}")]
    PersistTransient(String),

    #[error("Fatal persistence failure: {0}")]
    PersistFatal(String),
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Transient(msg) => CoreError::PersistTransient(msg),
            StorageError::Fatal(msg) => CoreError::PersistFatal(msg),
        }
    }
}
