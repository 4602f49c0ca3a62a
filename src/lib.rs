//! gitnest - nested transactions over a single physical transaction
//!
//! Callers `begin`, `commit` and `rollback` freely in nested scopes while
//! only one real database transaction is ever open. Each `begin` is backed
//! by a savepoint, commits are votes that only take effect once every scope
//! has voted, and rollbacks undo the innermost scope immediately.
//!
//! The crate ships a Git-backed reference database: tables are trees, rows
//! are JSON blobs, a transaction is a branch and a savepoint is a ref.
//!
//! # Example
//!
//! ```no_run
//! use gitnest::db::{Session, SessionConfig};
//! use gitnest::storage::{Row, RowKey, TableName};
//! use serde_json::json;
//!
//! let mut session = Session::connect(SessionConfig::new("./my_database")).unwrap();
//! let users = TableName::new("users").unwrap();
//!
//! session.begin().unwrap().create_table(&users).unwrap();
//! let row = Row::from_value(RowKey::generate(), json!({"name": "Alice"})).unwrap();
//! session.begin().unwrap().insert(&users, row).unwrap();
//! session.rollback().unwrap(); // undoes the insert only
//! session.commit().unwrap();   // commits the table
//! ```

pub mod db;
pub mod storage;
pub mod transaction;
