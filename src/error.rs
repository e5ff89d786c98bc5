//! Domain error types for the control plane.
//!
//! These are the errors that cross module boundaries. The HTTP layer maps
//! them onto status codes in `http::AppError`; cache errors never escape the
//! ban coordinator (they are logged and absorbed there).

/// Result type for control-plane operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Control-plane errors with structured context.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Address failed IP/CIDR validation. Rejected before any I/O.
    #[error("invalid IP address or CIDR: {0}")]
    InvalidAddress(String),

    /// No row matches the id/address under the caller's tenant.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Uniqueness conflict that is not resolvable as an upsert.
    #[error("{0}")]
    Conflict(String),

    /// SQLite driver error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Set-cache error. Absorbed by the ban coordinator, never surfaced
    /// to HTTP callers.
    #[error("cache error: {0}")]
    Cache(String),

    /// Anything else: lock poisoning, task join failures.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when retrying the same request cannot make things worse
    /// (reads and upsert-based writes are individually atomic).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Internal(_))
    }
}
