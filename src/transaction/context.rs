//! Caller context for opening a physical transaction.
//!
//! A context carries an optional deadline and a cancellation flag shared by
//! all of its clones. The coordinator checks it before any state change and
//! forwards it unchanged to the driver when a physical transaction opens.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::transaction::error::{TransactionError, TransactionResult};

#[derive(Debug, Clone, Default)]
pub struct TxContext {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl TxContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            ..Self::default()
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel this context and every clone of it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// `Err` once the context is cancelled or past its deadline.
    pub fn check(&self) -> TransactionResult<()> {
        if self.is_cancelled() {
            return Err(TransactionError::Cancelled);
        }
        if self.is_expired() {
            return Err(TransactionError::DeadlineExceeded);
        }
        Ok(())
    }
}
