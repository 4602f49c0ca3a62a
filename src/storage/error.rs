//! Errors raised by the Git storage layer.

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::types::{InvalidNameError, RowKey, TableName};

#[derive(Debug, Error)]
pub enum StorageError {
    // Repository and refs.
    #[error("git: {0}")]
    Git(#[from] git2::Error),

    #[error("no gitnest repository at {}", .0.display())]
    NotInitialized(PathBuf),

    #[error("repository has no commits")]
    EmptyRepository,

    #[error("no commit {0}")]
    CommitNotFound(String),

    #[error("no reference {0}")]
    RefNotFound(String),

    #[error("branch {0} exists already")]
    BranchAlreadyExists(String),

    // Tables and rows.
    #[error("no table {0}")]
    TableNotFound(TableName),

    #[error("table {0} exists already")]
    TableAlreadyExists(TableName),

    #[error("no row {key} in {table}")]
    RowNotFound { table: TableName, key: RowKey },

    #[error("row {key} exists already in {table}")]
    RowAlreadyExists { table: TableName, key: RowKey },

    #[error("row {key} is unreadable: {reason}")]
    CorruptedData { key: RowKey, reason: String },

    #[error("row data must be a JSON object")]
    NotAnObject,

    #[error(transparent)]
    InvalidName(#[from] InvalidNameError),

    #[error("row encoding: {0}")]
    Serialization(#[from] serde_json::Error),

    // Transactions.
    #[error("transaction {tx_id} has no savepoint {name}")]
    SavepointNotFound { tx_id: String, name: String },

    /// Raised on commit when `main` no longer points at the transaction's
    /// base commit.
    #[error("{branch} moved while the transaction was open")]
    ConcurrentModification { branch: String },

    #[error("transaction {0} already committed or rolled back")]
    TransactionFinished(String),

    #[error("interrupted: {0}")]
    Interrupted(&'static str),

    #[error("bug: {0}")]
    Internal(String),
}

impl StorageError {
    /// Something looked up by name or id does not exist.
    pub fn is_missing(&self) -> bool {
        matches!(
            self,
            Self::CommitNotFound(_)
                | Self::RefNotFound(_)
                | Self::TableNotFound(_)
                | Self::RowNotFound { .. }
                | Self::SavepointNotFound { .. }
        )
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            Self::BranchAlreadyExists(_) | Self::TableAlreadyExists(_) | Self::RowAlreadyExists { .. }
        )
    }

    /// The same call may succeed in a fresh transaction.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. } | Self::Interrupted(_))
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_vs_duplicate() {
        let users = TableName::new("users").unwrap();

        let missing = StorageError::TableNotFound(users.clone());
        assert!(missing.is_missing());
        assert!(!missing.is_duplicate());

        let dup = StorageError::RowAlreadyExists {
            table: users,
            key: RowKey::new("r1").unwrap(),
        };
        assert!(dup.is_duplicate());
        assert!(!dup.is_missing());

        let savepoint = StorageError::SavepointNotFound {
            tx_id: "tx".into(),
            name: "sp_a".into(),
        };
        assert!(savepoint.is_missing());
        assert_eq!(savepoint.to_string(), "transaction tx has no savepoint sp_a");
    }

    #[test]
    fn test_transient() {
        let moved = StorageError::ConcurrentModification { branch: "main".into() };
        assert!(moved.is_transient());
        assert!(StorageError::Interrupted("context cancelled").is_transient());
        assert!(!StorageError::EmptyRepository.is_transient());
        assert!(!StorageError::TransactionFinished("tx".into()).is_transient());
    }
}
