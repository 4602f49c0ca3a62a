//! The nested transaction coordinator.
//!
//! [`NestedTransactions`] holds at most one physical transaction and maps
//! logical `begin` / `commit` / `rollback` calls onto it through
//! [`NestingState`]. A transition's next state is adopted only after all of
//! its physical operations succeeded.

use std::fmt;

use tracing::{debug, trace, warn};

use crate::transaction::context::TxContext;
use crate::transaction::driver::{Driver, PhysicalTransaction};
use crate::transaction::error::{TransactionError, TransactionResult};
use crate::transaction::savepoint::{SavepointIdSource, SavepointName, UlidSavepoints};
use crate::transaction::state::{NestingState, PhysicalOp, Transition};

pub struct NestedTransactions<T> {
    physical: Option<T>,
    state: NestingState,
    ids: Box<dyn SavepointIdSource>,
}

impl<T: PhysicalTransaction> NestedTransactions<T> {
    pub fn new() -> Self {
        Self::with_id_source(UlidSavepoints)
    }

    pub fn with_id_source(ids: impl SavepointIdSource + 'static) -> Self {
        Self {
            physical: None,
            state: NestingState::Closed,
            ids: Box::new(ids),
        }
    }

    /// Enter a nested scope and return the physical transaction to run
    /// statements on.
    ///
    /// The first call since the last close opens a physical transaction
    /// through `driver`. Every call creates one savepoint. On error nothing
    /// is counted. If the savepoint fails on a transaction this call opened,
    /// that transaction is rolled back and the savepoint error is returned.
    pub fn begin<D>(&mut self, driver: &D, ctx: &TxContext) -> TransactionResult<&mut T>
    where
        D: Driver<Transaction = T>,
    {
        ctx.check()?;

        let Transition { next, ops } = self.state.on_begin(self.ids.next_id());

        let mut opened = None;
        for op in &ops {
            if *op == PhysicalOp::Begin {
                let tx = driver
                    .begin_transaction(ctx)
                    .map_err(TransactionError::driver)?;
                debug!("physical transaction opened");
                opened = Some(tx);
                continue;
            }

            let tx = match opened.as_mut() {
                Some(tx) => tx,
                None => self
                    .physical
                    .as_mut()
                    .ok_or(TransactionError::NotInTransaction)?,
            };
            if let Err(err) = perform(tx, op) {
                // A transaction opened by this call must not outlive it.
                if let Some(mut tx) = opened.take() {
                    if let Err(rollback_err) = tx.rollback() {
                        warn!(error = %rollback_err, "rollback of half-opened transaction failed");
                    }
                }
                return Err(TransactionError::driver(err));
            }
        }

        if opened.is_some() {
            self.physical = opened;
        }
        self.state = next;
        trace!(depth = self.state.depth(), votes = self.state.votes(), "begin");

        self.physical.as_mut().ok_or(TransactionError::NotInTransaction)
    }

    /// Vote to commit the innermost scope. The vote that balances every
    /// outstanding begin commits the physical transaction.
    pub fn commit(&mut self) -> TransactionResult<()> {
        let transition = self.state.on_commit()?;
        self.settle(transition)?;
        trace!(depth = self.state.depth(), votes = self.state.votes(), "commit vote");
        Ok(())
    }

    /// Undo the innermost scope immediately.
    pub fn rollback(&mut self) -> TransactionResult<()> {
        let transition = self.state.on_rollback()?;
        self.settle(transition)?;
        trace!(depth = self.state.depth(), votes = self.state.votes(), "rollback");
        Ok(())
    }

    fn settle(&mut self, Transition { next, ops }: Transition) -> TransactionResult<()> {
        let tx = self
            .physical
            .as_mut()
            .ok_or(TransactionError::NotInTransaction)?;
        for op in &ops {
            perform(tx, op).map_err(TransactionError::driver)?;
        }

        if !next.is_open() {
            self.physical = None;
        }
        self.state = next;
        Ok(())
    }

    pub fn transaction(&self) -> Option<&T> {
        self.physical.as_ref()
    }

    pub fn transaction_mut(&mut self) -> Option<&mut T> {
        self.physical.as_mut()
    }

    pub fn state(&self) -> &NestingState {
        &self.state
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    pub fn depth(&self) -> usize {
        self.state.depth()
    }

    pub fn votes(&self) -> usize {
        self.state.votes()
    }

    pub fn savepoints(&self) -> &[SavepointName] {
        self.state.savepoints()
    }
}

impl<T: PhysicalTransaction> Default for NestedTransactions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for NestedTransactions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NestedTransactions")
            .field("physical", &self.physical.is_some())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

fn perform<T: PhysicalTransaction>(tx: &mut T, op: &PhysicalOp) -> Result<(), T::Error> {
    match op {
        // Opening goes through the driver, never through a handle.
        PhysicalOp::Begin => {}
        PhysicalOp::Savepoint(name) => {
            tx.create_savepoint(name)?;
            trace!(savepoint = %name, "savepoint created");
        }
        PhysicalOp::RollbackTo(name) => {
            tx.rollback_to_savepoint(name)?;
            debug!(savepoint = %name, "rolled back to savepoint");
        }
        PhysicalOp::Commit => {
            tx.commit()?;
            debug!("physical transaction committed");
        }
        PhysicalOp::Rollback => {
            tx.rollback()?;
            debug!("physical transaction rolled back");
        }
    }
    Ok(())
}
