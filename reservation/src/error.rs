use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// Boxed cause of a backing store failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned by lease operations.
///
/// Contention is not an error: a lease held by someone else is reported as
/// `Ok(false)` from acquisition.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The backing store could not be reached or answered with a protocol
    /// error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// This lease instance already holds the key.
    #[error("lease on {key} is already held by this instance")]
    Reentrant { key: String },

    #[error("invalid lease configuration: {0}")]
    InvalidConfig(&'static str),

    /// A caller-supplied cancellation token fired while waiting.
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    pub fn as_store(&self) -> Option<&StoreError> {
        match self {
            Error::Store(err) => Some(err),
            _ => None,
        }
    }
}

/// The store operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    SetIfAbsent,
    Get,
    Delete,
    RefreshExpiry,
    Connect,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StoreOp::SetIfAbsent => "set-if-absent",
            StoreOp::Get => "get",
            StoreOp::Delete => "delete",
            StoreOp::RefreshExpiry => "refresh-expiry",
            StoreOp::Connect => "connect",
        })
    }
}

/// Transport or backend failure reported by a [`Store`](crate::Store).
#[derive(Debug, thiserror::Error)]
#[error("store {op} failed: {source}")]
pub struct StoreError {
    op: StoreOp,
    #[source]
    source: BoxError,
}

impl StoreError {
    pub fn new(op: StoreOp, source: impl Into<BoxError>) -> StoreError {
        StoreError {
            op,
            source: source.into(),
        }
    }

    pub fn op(&self) -> StoreOp {
        self.op
    }
}
