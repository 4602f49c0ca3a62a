//! The database collaborator contract.
//!
//! The coordinator never runs SQL itself. It asks a [`Driver`] to open one
//! physical transaction and then drives that [`PhysicalTransaction`]
//! through savepoints, a final commit, or a full rollback.

use crate::transaction::context::TxContext;
use crate::transaction::savepoint::SavepointName;

/// A database session able to open physical transactions.
pub trait Driver {
    type Transaction: PhysicalTransaction;
    type Error: std::error::Error + Send + Sync + 'static;

    fn ping(&self) -> Result<(), Self::Error>;

    fn close(&mut self) -> Result<(), Self::Error>;

    /// Issue `BEGIN`. Implementations should honor `ctx` while blocking.
    fn begin_transaction(&self, ctx: &TxContext) -> Result<Self::Transaction, Self::Error>;
}

/// One live database transaction.
pub trait PhysicalTransaction {
    type Error: std::error::Error + Send + Sync + 'static;

    fn create_savepoint(&mut self, name: &SavepointName) -> Result<(), Self::Error>;

    /// Undo everything since `name`. The savepoint itself stays valid.
    fn rollback_to_savepoint(&mut self, name: &SavepointName) -> Result<(), Self::Error>;

    fn commit(&mut self) -> Result<(), Self::Error>;

    fn rollback(&mut self) -> Result<(), Self::Error>;
}
