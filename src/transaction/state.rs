//! Nesting bookkeeping as a pure state machine.
//!
//! Every transition computes the next state together with the physical
//! operations that must succeed before that state may be adopted. Nothing
//! here touches a database.

use crate::transaction::error::{TransactionError, TransactionResult};
use crate::transaction::savepoint::SavepointName;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NestingState {
    /// No physical transaction.
    #[default]
    Closed,
    /// One physical transaction with `depth` unresolved begins, `votes`
    /// commit calls, and one savepoint per live begin.
    Open {
        depth: usize,
        votes: usize,
        savepoints: Vec<SavepointName>,
    },
}

/// A statement to issue against the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhysicalOp {
    Begin,
    Savepoint(SavepointName),
    RollbackTo(SavepointName),
    Commit,
    Rollback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: NestingState,
    pub ops: Vec<PhysicalOp>,
}

impl NestingState {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    pub fn depth(&self) -> usize {
        match self {
            Self::Closed => 0,
            Self::Open { depth, .. } => *depth,
        }
    }

    pub fn votes(&self) -> usize {
        match self {
            Self::Closed => 0,
            Self::Open { votes, .. } => *votes,
        }
    }

    pub fn savepoints(&self) -> &[SavepointName] {
        match self {
            Self::Closed => &[],
            Self::Open { savepoints, .. } => savepoints,
        }
    }

    /// Enter a nested scope. Opens the physical transaction when closed;
    /// always pushes `name`.
    pub fn on_begin(&self, name: SavepointName) -> Transition {
        match self {
            Self::Closed => Transition {
                next: Self::Open {
                    depth: 1,
                    votes: 0,
                    savepoints: vec![name.clone()],
                },
                ops: vec![PhysicalOp::Begin, PhysicalOp::Savepoint(name)],
            },
            Self::Open {
                depth,
                votes,
                savepoints,
            } => {
                let mut savepoints = savepoints.clone();
                savepoints.push(name.clone());
                Transition {
                    next: Self::Open {
                        depth: depth + 1,
                        votes: *votes,
                        savepoints,
                    },
                    ops: vec![PhysicalOp::Savepoint(name)],
                }
            }
        }
    }

    /// Cast a commit vote. Only the vote that catches up with the depth
    /// commits; earlier votes leave the savepoint stack alone.
    pub fn on_commit(&self) -> TransactionResult<Transition> {
        let Self::Open {
            depth,
            votes,
            savepoints,
        } = self
        else {
            return Err(TransactionError::NotInTransaction);
        };

        let votes = votes + 1;
        if votes == *depth {
            return Ok(Transition {
                next: Self::Closed,
                ops: vec![PhysicalOp::Commit],
            });
        }

        Ok(Transition {
            next: Self::Open {
                depth: *depth,
                votes,
                savepoints: savepoints.clone(),
            },
            ops: Vec::new(),
        })
    }

    /// Undo the innermost scope. Rolls the whole transaction back once the
    /// remaining depth is fully voted.
    pub fn on_rollback(&self) -> TransactionResult<Transition> {
        let Self::Open {
            depth,
            votes,
            savepoints,
        } = self
        else {
            return Err(TransactionError::NotInTransaction);
        };

        let remaining = depth.saturating_sub(1);
        if remaining <= *votes {
            return Ok(Transition {
                next: Self::Closed,
                ops: vec![PhysicalOp::Rollback],
            });
        }

        let mut savepoints = savepoints.clone();
        let top = savepoints
            .pop()
            .ok_or(TransactionError::SavepointUnderflow { depth: *depth })?;

        Ok(Transition {
            next: Self::Open {
                depth: remaining,
                votes: *votes,
                savepoints,
            },
            ops: vec![PhysicalOp::RollbackTo(top)],
        })
    }
}
