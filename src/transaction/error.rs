//! Transaction error types.

use thiserror::Error;

/// Result type for transaction operations.
pub type TransactionResult<T> = Result<T, TransactionError>;

/// An error raised by the database driver, passed through untouched.
pub type DriverError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum TransactionError {
    /// `commit` or `rollback` with no physical transaction open.
    #[error("not in transaction")]
    NotInTransaction,

    /// The session has no database behind it (never configured, or closed).
    #[error("invalid session: no database session is configured")]
    InvalidSession,

    /// `close` while nesting levels are still unresolved.
    #[error("transaction still open at nesting depth {depth}")]
    StillOpen { depth: usize },

    /// A rollback that should undo a nested level found no savepoint.
    #[error("savepoint stack underflow at nesting depth {depth}")]
    SavepointUnderflow { depth: usize },

    #[error("context cancelled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("driver error: {0}")]
    Driver(#[source] DriverError),
}

impl TransactionError {
    pub fn driver(err: impl Into<DriverError>) -> Self {
        Self::Driver(err.into())
    }

    /// Whether the error came from the database rather than from
    /// coordinator bookkeeping.
    pub fn is_driver(&self) -> bool {
        matches!(self, Self::Driver(_))
    }

    pub fn is_context(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }

    /// Downcast the driver error to its concrete type.
    pub fn driver_error<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            Self::Driver(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}
