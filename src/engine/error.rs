use thiserror::Error;

/// Per-chunk fetch failure.
///
/// Transient failures are retry candidates; permanent failures and
/// cancellation are fatal for the chunk and propagate to the engine.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transient fetch failure: {0}")]
    Transient(String),

    #[error("permanent fetch failure: {0}")]
    Permanent(String),

    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("metadata probe failed: {0}")]
    Metadata(String),

    #[error("invalid chunk plan: {0}")]
    InvalidPlan(String),

    #[error("HTTP client construction failed: {0}")]
    Client(String),

    #[error("chunk fetch failed: {0}")]
    ChunkFetch(FetchError),

    #[error("size mismatch: wrote {actual} of {expected} bytes")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
