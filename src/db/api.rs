//! Session API - the user-facing handle for gitnest.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use tracing::warn;

use crate::storage::{CommitId, GitRepository, GitSignature, Row, StorageError, TableName};
use crate::transaction::{Driver, NestedTransactions, TransactionError, TxContext};

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("database not found: {0}")]
    NotFound(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SessionError {
    pub fn is_not_in_transaction(&self) -> bool {
        matches!(self, Self::Transaction(TransactionError::NotInTransaction))
    }

    pub fn is_invalid_session(&self) -> bool {
        matches!(self, Self::Transaction(TransactionError::InvalidSession))
    }
}

/// Options for [`Session::connect`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Path to the database directory.
    pub path: PathBuf,
    /// Initialize a new repository when none exists.
    pub create_if_missing: bool,
    /// Author and committer of every commit.
    pub signature: GitSignature,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".gitnest"),
            create_if_missing: true,
            signature: GitSignature::default(),
        }
    }
}

impl SessionConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn signature(mut self, signature: GitSignature) -> Self {
        self.signature = signature;
        self
    }
}

/// A database session with nested transactions.
///
/// The session owns the driver and the coordinator. Once closed, every
/// operation fails with [`TransactionError::InvalidSession`].
pub struct Session<D: Driver> {
    driver: Option<D>,
    transactions: NestedTransactions<D::Transaction>,
}

impl<D: Driver> Session<D> {
    pub fn new(driver: D) -> Self {
        Self::with_transactions(driver, NestedTransactions::new())
    }

    /// Use a pre-built coordinator, e.g. one with a custom savepoint id
    /// source.
    pub fn with_transactions(driver: D, transactions: NestedTransactions<D::Transaction>) -> Self {
        Self {
            driver: Some(driver),
            transactions,
        }
    }

    fn live_driver(&self) -> SessionResult<&D> {
        self.driver
            .as_ref()
            .ok_or(SessionError::Transaction(TransactionError::InvalidSession))
    }

    pub fn ping(&self) -> SessionResult<()> {
        self.live_driver()?
            .ping()
            .map_err(|e| TransactionError::driver(e).into())
    }

    /// Close the underlying driver. Refused while a transaction is open;
    /// closing twice is a no-op. If the driver fails to close, the session
    /// stays usable.
    pub fn close(&mut self) -> SessionResult<()> {
        if self.transactions.is_open() {
            return Err(TransactionError::StillOpen {
                depth: self.transactions.depth(),
            }
            .into());
        }
        let Some(driver) = self.driver.as_mut() else {
            return Ok(());
        };
        driver.close().map_err(TransactionError::driver)?;
        self.driver = None;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.driver.is_none()
    }

    /// Enter a nested scope with a background context.
    pub fn begin(&mut self) -> SessionResult<&mut D::Transaction> {
        self.begin_with_context(&TxContext::background())
    }

    pub fn begin_with_context(&mut self, ctx: &TxContext) -> SessionResult<&mut D::Transaction> {
        let driver = self
            .driver
            .as_ref()
            .ok_or(TransactionError::InvalidSession)?;
        Ok(self.transactions.begin(driver, ctx)?)
    }

    pub fn commit(&mut self) -> SessionResult<()> {
        self.live_driver()?;
        Ok(self.transactions.commit()?)
    }

    pub fn rollback(&mut self) -> SessionResult<()> {
        self.live_driver()?;
        Ok(self.transactions.rollback()?)
    }

    /// Run `f` in a nested scope: commit on `Ok`, roll back on `Err`.
    ///
    /// If that rollback fails too, `f`'s error is returned and the rollback
    /// failure is logged; the scope then stays open.
    pub fn with_transaction<F, T>(&mut self, f: F) -> SessionResult<T>
    where
        F: FnOnce(&mut Self) -> SessionResult<T>,
    {
        self.begin()?;
        match f(self) {
            Ok(result) => {
                self.commit()?;
                Ok(result)
            }
            Err(e) => {
                if let Err(rollback_err) = self.rollback() {
                    warn!(error = %rollback_err, "rollback after failed scope did not complete");
                }
                Err(e)
            }
        }
    }

    /// The open physical transaction, if any.
    pub fn tx(&self) -> Option<&D::Transaction> {
        self.transactions.transaction()
    }

    pub fn tx_mut(&mut self) -> Option<&mut D::Transaction> {
        self.transactions.transaction_mut()
    }

    /// The underlying driver; `None` once closed.
    pub fn driver(&self) -> Option<&D> {
        self.driver.as_ref()
    }

    pub fn transactions(&self) -> &NestedTransactions<D::Transaction> {
        &self.transactions
    }
}

impl<D: Driver + fmt::Debug> fmt::Debug for Session<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("driver", &self.driver)
            .field("transactions", &self.transactions)
            .finish()
    }
}

impl Session<GitRepository> {
    /// Open the Git-backed database described by `config`.
    pub fn connect(config: SessionConfig) -> SessionResult<Self> {
        if config.path.as_os_str().is_empty() {
            return Err(SessionError::InvalidConfig("database path is empty".into()));
        }

        let repo = if config.create_if_missing {
            GitRepository::open_or_init(&config.path)?
        } else if config.path.exists() {
            GitRepository::open(&config.path)?
        } else {
            return Err(SessionError::NotFound(config.path));
        };

        Ok(Self::new(repo.with_signature(config.signature)))
    }

    /// Commit that reads go to: the open transaction's tip, else `main`.
    pub fn snapshot(&self) -> SessionResult<CommitId> {
        if let Some(tx) = self.tx() {
            return Ok(tx.tip());
        }
        Ok(self.live_driver()?.head()?)
    }

    pub fn list_tables(&self) -> SessionResult<Vec<TableName>> {
        let at = self.snapshot()?;
        Ok(self.live_driver()?.list_tables(at)?)
    }

    pub fn scan(&self, table: &TableName) -> SessionResult<Vec<Row>> {
        let at = self.snapshot()?;
        Ok(self.live_driver()?.scan_table(table, at)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RowKey;
    use crate::transaction::fake::{FailOn, RecordingDriver, SequentialSavepoints};
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Session<GitRepository>, TableName, TableName, TableName) {
        let dir = TempDir::new().unwrap();
        let mut session = Session::connect(SessionConfig::new(dir.path())).unwrap();
        let (t1, t2, t3) = (
            TableName::new("t1").unwrap(),
            TableName::new("t2").unwrap(),
            TableName::new("t3").unwrap(),
        );

        let tx = session.begin().unwrap();
        for t in [&t1, &t2, &t3] {
            tx.create_table(t).unwrap();
        }
        session.commit().unwrap();
        (dir, session, t1, t2, t3)
    }

    fn row(key: &str) -> Row {
        Row::from_value(RowKey::new(key).unwrap(), json!({ "id": key })).unwrap()
    }

    fn count(session: &Session<GitRepository>, table: &TableName) -> usize {
        session.scan(table).unwrap().len()
    }

    #[test]
    fn test_scenario_a_sequential_scopes() {
        let (_dir, mut session, t1, _, _) = setup();
        let before = session.snapshot().unwrap();

        session.begin().unwrap().insert(&t1, row("r1")).unwrap();
        session.commit().unwrap();
        let after_first = session.snapshot().unwrap();
        assert_ne!(before, after_first);

        session.begin().unwrap();
        session.commit().unwrap();
        assert_eq!(count(&session, &t1), 1);
        assert!(!session.transactions().is_open());
    }

    #[test]
    fn test_scenario_b_rollback() {
        let (_dir, mut session, t1, _, _) = setup();
        session.begin().unwrap().insert(&t1, row("r1")).unwrap();
        assert_eq!(count(&session, &t1), 1);

        session.rollback().unwrap();
        assert_eq!(count(&session, &t1), 0);
        assert!(session.tx().is_none());
    }

    #[test]
    fn test_scenario_c_partial_undo() {
        let (_dir, mut session, t1, t2, _) = setup();
        session.begin().unwrap();
        session.begin().unwrap().insert(&t1, row("r1")).unwrap();
        session.commit().unwrap();
        session.begin().unwrap().insert(&t2, row("r2")).unwrap();
        session.rollback().unwrap();

        // Undo is visible inside the transaction right away.
        assert_eq!(count(&session, &t2), 0);
        assert_eq!(count(&session, &t1), 1);

        session.commit().unwrap();
        assert_eq!(count(&session, &t1), 1);
        assert_eq!(count(&session, &t2), 0);
    }

    #[test]
    fn test_scenario_d_nested_commits() {
        let (_dir, mut session, t1, t2, t3) = setup();
        let main_before = session.driver().unwrap().head().unwrap();

        session.begin().unwrap();
        for (t, key) in [(&t1, "r1"), (&t2, "r2"), (&t3, "r3")] {
            session.begin().unwrap().insert(t, row(key)).unwrap();
            session.commit().unwrap();
            assert_eq!(session.driver().unwrap().head().unwrap(), main_before);
        }
        session.commit().unwrap();

        for t in [&t1, &t2, &t3] {
            assert_eq!(count(&session, t), 1);
        }
    }

    #[test]
    fn test_scenario_e_outer_rollback() {
        let (_dir, mut session, t1, t2, t3) = setup();
        session.begin().unwrap();
        session.begin().unwrap().insert(&t1, row("r1")).unwrap();
        session.commit().unwrap();
        session.begin().unwrap().insert(&t2, row("r2")).unwrap();
        session.rollback().unwrap();
        session.begin().unwrap().insert(&t3, row("r3")).unwrap();
        session.commit().unwrap();
        session.rollback().unwrap();

        assert!(!session.transactions().is_open());
        for t in [&t1, &t2, &t3] {
            assert_eq!(count(&session, t), 0);
        }
        assert!(session.driver().unwrap().list_transaction_branches().unwrap().is_empty());
    }

    #[test]
    fn test_rollback_rewinds_to_voted_inner_level() {
        let (_dir, mut session, t1, _, _) = setup();
        let keys = |session: &Session<GitRepository>| -> Vec<String> {
            session
                .scan(&t1)
                .unwrap()
                .into_iter()
                .map(|row| row.key.as_str().to_string())
                .collect()
        };

        session.begin().unwrap();
        session.begin().unwrap().insert(&t1, row("a_level2")).unwrap();
        session.begin().unwrap().insert(&t1, row("b_level3")).unwrap();
        session.commit().unwrap();
        session.tx_mut().unwrap().insert(&t1, row("c_level2")).unwrap();

        // Level 2's rollback rewinds to level 3's savepoint: level 2 keeps
        // its first write, level 3's voted write is gone.
        session.rollback().unwrap();
        assert_eq!(keys(&session), vec!["a_level2"]);
        assert_eq!(session.transactions().depth(), 2);

        session.commit().unwrap();
        assert!(!session.transactions().is_open());
        assert_eq!(keys(&session), vec!["a_level2"]);
    }

    #[test]
    fn test_with_transaction_keeps_scope_error_when_rollback_fails() {
        let driver = RecordingDriver::default();
        let mut session = Session::with_transactions(
            driver.clone(),
            NestedTransactions::with_id_source(SequentialSavepoints::default()),
        );

        driver.fail(FailOn::Rollback);
        let result: SessionResult<()> =
            session.with_transaction(|_| Err(SessionError::InvalidConfig("scope failed".into())));
        assert!(matches!(result, Err(SessionError::InvalidConfig(ref msg)) if msg == "scope failed"));
        assert!(session.transactions().is_open());

        driver.heal();
        session.rollback().unwrap();
        assert_eq!(driver.statements(), vec!["BEGIN", "SAVEPOINT sp_1", "ROLLBACK"]);
    }

    #[test]
    fn test_not_in_transaction() {
        let (_dir, mut session, _, _, _) = setup();
        assert!(session.commit().unwrap_err().is_not_in_transaction());
        assert!(session.rollback().unwrap_err().is_not_in_transaction());
    }

    #[test]
    fn test_with_transaction_nests() {
        let (_dir, mut session, t1, t2, _) = setup();
        let result = session.with_transaction(|s| {
            s.tx_mut().unwrap().insert(&t1, row("r1"))?;
            let inner: SessionResult<()> = s.with_transaction(|s| {
                s.tx_mut().unwrap().insert(&t2, row("r2"))?;
                Err(SessionError::InvalidConfig("abort inner".into()))
            });
            assert!(inner.is_err());
            Ok(s.transactions().depth())
        });

        assert_eq!(result.unwrap(), 1);
        assert_eq!(count(&session, &t1), 1);
        assert_eq!(count(&session, &t2), 0);
    }

    #[test]
    fn test_close_lifecycle() {
        let (_dir, mut session, _, _, _) = setup();
        session.ping().unwrap();

        session.begin().unwrap();
        assert!(matches!(
            session.close(),
            Err(SessionError::Transaction(TransactionError::StillOpen { depth: 1 }))
        ));
        session.commit().unwrap();

        session.close().unwrap();
        assert!(session.is_closed());
        session.close().unwrap();

        assert!(session.ping().unwrap_err().is_invalid_session());
        assert!(session.begin().unwrap_err().is_invalid_session());
        assert!(session.commit().unwrap_err().is_invalid_session());
    }

    #[test]
    fn test_failed_close_keeps_driver() {
        let driver = RecordingDriver::default();
        let mut session = Session::with_transactions(
            driver.clone(),
            NestedTransactions::with_id_source(SequentialSavepoints::default()),
        );

        driver.fail(FailOn::Close);
        assert!(session.close().is_err());
        assert!(!session.is_closed());
        session.ping().unwrap();

        driver.heal();
        session.close().unwrap();
        assert_eq!(driver.statements(), vec!["CLOSE"]);
    }

    #[test]
    fn test_connect_config() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing");

        let result = Session::connect(SessionConfig::new(&missing).create_if_missing(false));
        assert!(matches!(result, Err(SessionError::NotFound(_))));

        let result = Session::connect(SessionConfig::new(""));
        assert!(matches!(result, Err(SessionError::InvalidConfig(_))));

        let session = Session::connect(
            SessionConfig::new(&missing).signature(GitSignature::new("Ada", "ada@example.com")),
        )
        .unwrap();
        assert_eq!(session.driver().unwrap().signature().name, "Ada");
    }
}
