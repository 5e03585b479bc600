use thiserror::Error;

/// Error taxonomy for the indexing/serving core.
///
/// `NotFound` surfaces to the caller and is never retried. `Probe` covers
/// transient external-tool failures (non-zero exit, timeout) that degrade to
/// defaults after the retry budget. `Db` and `Io` wrap the single failed
/// operation; callers roll back that transaction or skip that item.
#[derive(Debug, Error)]
pub enum VindexError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("probe failed: {0}")]
    Probe(String),

    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, VindexError>;

impl VindexError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, VindexError::NotFound(_))
    }
}
