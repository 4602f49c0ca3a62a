//! Nested transactions over a single physical transaction.
//!
//! The first `begin` opens a real database transaction; every `begin`
//! pushes a savepoint. `commit` is a vote: only the vote that balances all
//! outstanding begins issues `COMMIT`. `rollback` is immediate, undoing the
//! innermost scope with `ROLLBACK TO SAVEPOINT` or, once nothing unvoted
//! remains underneath, the whole transaction with `ROLLBACK`.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   NestedTransactions                        │
//! │   (owns the physical handle, applies state transitions)     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │ NestingState│       │  Savepoint  │       │   Driver    │
//!  │   (pure)    │       │   names     │       │ (database)  │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use gitnest::transaction::{NestedTransactions, TxContext};
//!
//! let mut txs = NestedTransactions::new();
//! let ctx = TxContext::background();
//!
//! txs.begin(&repo, &ctx)?;             // BEGIN; SAVEPOINT sp_..
//! txs.begin(&repo, &ctx)?.insert(..)?; // SAVEPOINT sp_..
//! txs.rollback()?;                     // ROLLBACK TO SAVEPOINT sp_..
//! txs.commit()?;                       // COMMIT
//! ```

mod context;
mod coordinator;
mod driver;
mod error;
mod savepoint;
mod state;

pub use context::TxContext;
pub use coordinator::NestedTransactions;
pub use driver::{Driver, PhysicalTransaction};
pub use error::{DriverError, TransactionError, TransactionResult};
pub use savepoint::{SavepointIdSource, SavepointName, UlidSavepoints};
pub use state::{NestingState, PhysicalOp, Transition};

#[cfg(test)]
pub(crate) use coordinator::tests as fake;
