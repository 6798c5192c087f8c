use thiserror::Error;

/// Errors from Durable Log Store operations (used by trait definitions in
/// duraflow-core and implemented by each storage backend).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage connection error")]
    Connection,

    #[error("storage query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

impl StoreError {
    /// Whether this error is the conditional-write rejection (a successful
    /// record already exists, or the instance is in an absorbing state).
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}
