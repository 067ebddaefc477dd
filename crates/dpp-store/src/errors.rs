use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("run not found")]
    NotFound,

    #[error("duplicate idempotency key for tenant")]
    DuplicateIdempotencyKey,

    #[error("CAS predicate did not match (stale version or state)")]
    CasMismatch,

    #[error("unreadable row: {0}")]
    RowDecode(String),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}
