//! Git-backed storage for gitnest.
//!
//! Tables are trees, rows are JSON blobs, and history is the commit graph.
//! The transaction coordinator only sees this layer through the
//! [`Driver`](crate::transaction::Driver) implementation on
//! [`GitRepository`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              GitRepository  /  GitTransaction               │
//! │     (tables, rows, transaction branches, savepoint refs)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │    tree     │       │    blob     │       │    refs     │
//!  │  (tables)   │       │   (rows)    │       │ (branches)  │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//!         │                     │                     │
//!         └─────────────────────┼─────────────────────┘
//!                               │
//!                               ▼
//!                        ┌─────────────┐
//!                        │   commit    │
//!                        │  (history)  │
//!                        └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use gitnest::storage::{GitRepository, Row, RowKey, TableName};
//! use gitnest::transaction::{Driver, PhysicalTransaction, TxContext};
//!
//! let repo = GitRepository::open_or_init("./my_database")?;
//! let mut tx = repo.begin_transaction(&TxContext::background())?;
//!
//! let users = TableName::new("users")?;
//! tx.create_table(&users)?;
//! tx.insert(&users, Row::from_value(RowKey::generate(), json!({"name": "Alice"}))?)?;
//! tx.commit()?;
//! ```

mod blob;
mod commit;
mod error;
mod refs;
mod repository;
mod transaction;
mod tree;
mod types;

pub use blob::Row;
pub use commit::CommitMessage;
pub use error::{StorageError, StorageResult};
pub use repository::GitRepository;
pub use transaction::GitTransaction;
pub use types::{BlobId, BranchName, CommitId, GitSignature, InvalidNameError, RowKey, TableName, TreeId};

pub(crate) use types::check_charset;
