/// The error type shared by the non-ledger store traits (funding queue,
/// chain, treasury, allocation, reconciliation).
///
/// The ledger defines its own richer store error because balance safety
/// failures carry domain data; everything else only needs the
/// found / conflicted / unavailable trichotomy, which is what retry policies
/// key off: `Unavailable` is transient and retryable, the others are not.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint was hit. Callers that enqueue idempotently
    /// treat this as success; everyone else treats it as a bug.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Connection failures and other transient storage errors. Retryable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        Self::Conflict(what.into())
    }

    pub fn unavailable(what: impl Into<String>) -> Self {
        Self::Unavailable(what.into())
    }
}
