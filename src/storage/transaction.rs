//! Physical transactions on a Git-backed database.
//!
//! A transaction is a branch `tx/{ulid}` forked from `main`. Every write is
//! a commit on that branch; savepoints are refs pinned to the branch tip.
//! Committing fast-forwards `main`, rolling back deletes the branch.

use chrono::{DateTime, Utc};
use tracing::warn;
use ulid::Ulid;

use crate::storage::blob::Row;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::repository::GitRepository;
use crate::storage::types::{BranchName, CommitId, RowKey, TableName};
use crate::transaction::{Driver, PhysicalTransaction, SavepointName, TxContext};

#[derive(Debug)]
pub struct GitTransaction {
    repo: GitRepository,
    tx_id: String,
    branch: BranchName,
    base_commit: CommitId,
    tip: CommitId,
    savepoints: Vec<SavepointName>,
    started_at: DateTime<Utc>,
    finished: bool,
}

impl GitTransaction {
    /// Fork a transaction branch off the current `main`.
    pub fn begin(repo: GitRepository) -> StorageResult<Self> {
        let tx_id = Ulid::new().to_string().to_lowercase();
        let base_commit = repo.head()?;
        let branch = repo.create_transaction_branch(&tx_id, base_commit)?;

        Ok(Self {
            repo,
            tx_id,
            branch,
            base_commit,
            tip: base_commit,
            savepoints: Vec::new(),
            started_at: Utc::now(),
            finished: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.tx_id
    }

    pub fn branch(&self) -> &BranchName {
        &self.branch
    }

    /// `main` as it was when the transaction began.
    pub fn base_commit(&self) -> CommitId {
        self.base_commit
    }

    /// Latest commit on the transaction branch.
    pub fn tip(&self) -> CommitId {
        self.tip
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn savepoints(&self) -> &[SavepointName] {
        &self.savepoints
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    // ==================== Tables ====================

    pub fn create_table(&mut self, table: &TableName) -> StorageResult<()> {
        self.ensure_active()?;
        let next = self.repo.create_table(table, self.tip, &self.tx_id)?;
        self.advance(next)
    }

    pub fn list_tables(&self) -> StorageResult<Vec<TableName>> {
        self.repo.list_tables(self.tip)
    }

    pub fn table_exists(&self, table: &TableName) -> StorageResult<bool> {
        self.repo.table_exists(table, self.tip)
    }

    // ==================== Rows ====================

    pub fn insert(&mut self, table: &TableName, row: Row) -> StorageResult<()> {
        self.ensure_active()?;
        let next = self.repo.insert_row(table, &row, self.tip, &self.tx_id)?;
        self.advance(next)
    }

    pub fn delete(&mut self, table: &TableName, key: &RowKey) -> StorageResult<()> {
        self.ensure_active()?;
        let next = self.repo.delete_row(table, key, self.tip, &self.tx_id)?;
        self.advance(next)
    }

    /// Reads see this transaction's own writes.
    pub fn read(&self, table: &TableName, key: &RowKey) -> StorageResult<Option<Row>> {
        self.repo.read_row(table, key, self.tip)
    }

    pub fn scan(&self, table: &TableName) -> StorageResult<Vec<Row>> {
        self.repo.scan_table(table, self.tip)
    }

    // ==================== Internals ====================

    fn ensure_active(&self) -> StorageResult<()> {
        if self.finished {
            return Err(StorageError::TransactionFinished(self.tx_id.clone()));
        }
        Ok(())
    }

    fn advance(&mut self, next: CommitId) -> StorageResult<()> {
        self.repo.update_branch(&self.branch, next)?;
        self.tip = next;
        Ok(())
    }

    /// Remove the branch and every savepoint ref. Failures are ignored; a
    /// stale ref only wastes space.
    fn cleanup(&mut self) {
        for name in self.savepoints.drain(..) {
            let _ = self.repo.delete_savepoint(&self.tx_id, name.as_str());
        }
        let _ = self.repo.delete_transaction_branch(&self.tx_id);
        self.finished = true;
    }
}

impl PhysicalTransaction for GitTransaction {
    type Error = StorageError;

    fn create_savepoint(&mut self, name: &SavepointName) -> StorageResult<()> {
        self.ensure_active()?;
        self.repo.create_savepoint(&self.tx_id, name.as_str(), self.tip)?;
        self.savepoints.push(name.clone());
        Ok(())
    }

    /// Reset the tip to `name`. Savepoints created after it are released;
    /// `name` itself stays usable.
    fn rollback_to_savepoint(&mut self, name: &SavepointName) -> StorageResult<()> {
        self.ensure_active()?;
        let position = self
            .savepoints
            .iter()
            .rposition(|sp| sp == name)
            .ok_or_else(|| StorageError::SavepointNotFound {
                tx_id: self.tx_id.clone(),
                name: name.to_string(),
            })?;

        let target = self.repo.resolve_savepoint(&self.tx_id, name.as_str())?;
        self.advance(target)?;

        // The tip has moved; a ref left behind here is removed with the rest
        // on commit or rollback.
        for later in self.savepoints.split_off(position + 1) {
            if let Err(err) = self.repo.delete_savepoint(&self.tx_id, later.as_str()) {
                warn!(tx_id = %self.tx_id, savepoint = %later, error = %err, "stale savepoint ref");
            }
        }
        Ok(())
    }

    /// Publish the branch by fast-forwarding `main`. Fails with
    /// `ConcurrentModification` if `main` moved; the transaction then stays
    /// open and can still be rolled back.
    fn commit(&mut self) -> StorageResult<()> {
        self.ensure_active()?;
        if self.tip != self.base_commit {
            self.repo.fast_forward_main(&self.branch, self.base_commit)?;
        }
        self.cleanup();
        Ok(())
    }

    fn rollback(&mut self) -> StorageResult<()> {
        self.ensure_active()?;
        self.cleanup();
        Ok(())
    }
}

impl Drop for GitTransaction {
    fn drop(&mut self) {
        if !self.finished {
            warn!(tx_id = %self.tx_id, "dropping unfinished transaction, discarding branch");
            self.cleanup();
        }
    }
}

impl Driver for GitRepository {
    type Transaction = GitTransaction;
    type Error = StorageError;

    fn ping(&self) -> StorageResult<()> {
        self.head().map(|_| ())
    }

    /// Every write is already durable in the object database.
    fn close(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn begin_transaction(&self, ctx: &TxContext) -> StorageResult<GitTransaction> {
        if ctx.is_cancelled() {
            return Err(StorageError::Interrupted("context cancelled"));
        }
        if ctx.is_expired() {
            return Err(StorageError::Interrupted("context deadline exceeded"));
        }
        GitTransaction::begin(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, GitRepository) {
        let dir = TempDir::new().unwrap();
        let repo = GitRepository::init(dir.path()).unwrap();
        (dir, repo)
    }

    fn sp(name: &str) -> SavepointName {
        SavepointName::new(name).unwrap()
    }

    fn table(name: &str) -> TableName {
        TableName::new(name).unwrap()
    }

    fn row(key: &str) -> Row {
        Row::from_value(RowKey::new(key).unwrap(), json!({ "k": key })).unwrap()
    }

    #[test]
    fn test_commit_publishes_to_main() {
        let (_dir, repo) = setup();
        let mut tx = repo.begin_transaction(&TxContext::background()).unwrap();
        tx.create_table(&table("t1")).unwrap();
        tx.insert(&table("t1"), row("r1")).unwrap();

        // Not visible on main yet.
        assert!(!repo.table_exists(&table("t1"), repo.head().unwrap()).unwrap());

        tx.commit().unwrap();
        let head = repo.head().unwrap();
        assert_eq!(head, tx.tip());
        assert_eq!(repo.count_rows(&table("t1"), head).unwrap(), 1);
        assert!(repo.list_transaction_branches().unwrap().is_empty());
    }

    #[test]
    fn test_rollback_discards_branch() {
        let (_dir, repo) = setup();
        let before = repo.head().unwrap();
        let mut tx = repo.begin_transaction(&TxContext::background()).unwrap();
        tx.create_table(&table("t1")).unwrap();
        tx.rollback().unwrap();

        assert_eq!(repo.head().unwrap(), before);
        assert!(repo.list_transaction_branches().unwrap().is_empty());
        assert!(matches!(
            tx.create_table(&table("t2")),
            Err(StorageError::TransactionFinished(_))
        ));
    }

    #[test]
    fn test_rollback_to_savepoint_releases_later_ones() {
        let (_dir, repo) = setup();
        let mut tx = repo.begin_transaction(&TxContext::background()).unwrap();
        tx.create_table(&table("t1")).unwrap();

        tx.create_savepoint(&sp("sp_a")).unwrap();
        tx.insert(&table("t1"), row("r1")).unwrap();
        tx.create_savepoint(&sp("sp_b")).unwrap();
        tx.insert(&table("t1"), row("r2")).unwrap();

        tx.rollback_to_savepoint(&sp("sp_a")).unwrap();
        assert!(tx.scan(&table("t1")).unwrap().is_empty());
        assert_eq!(tx.savepoints(), &[sp("sp_a")]);
        assert_eq!(repo.list_savepoints(tx.id()).unwrap(), vec!["sp_a"]);

        // The target survives and can be reused.
        tx.insert(&table("t1"), row("r3")).unwrap();
        tx.rollback_to_savepoint(&sp("sp_a")).unwrap();
        assert!(tx.read(&table("t1"), &RowKey::new("r3").unwrap()).unwrap().is_none());

        let missing = tx.rollback_to_savepoint(&sp("sp_b"));
        assert!(matches!(missing, Err(StorageError::SavepointNotFound { .. })));
    }

    #[test]
    fn test_rollback_to_savepoint_survives_missing_later_ref() {
        let (_dir, repo) = setup();
        let mut tx = repo.begin_transaction(&TxContext::background()).unwrap();
        tx.create_table(&table("t1")).unwrap();

        tx.create_savepoint(&sp("sp_a")).unwrap();
        tx.insert(&table("t1"), row("r1")).unwrap();
        tx.create_savepoint(&sp("sp_b")).unwrap();
        repo.delete_savepoint(tx.id(), "sp_b").unwrap();

        tx.rollback_to_savepoint(&sp("sp_a")).unwrap();
        assert!(tx.scan(&table("t1")).unwrap().is_empty());
        assert_eq!(tx.savepoints(), &[sp("sp_a")]);
        assert_eq!(repo.list_savepoints(tx.id()).unwrap(), vec!["sp_a"]);
    }

    #[test]
    fn test_concurrent_commit_conflicts() {
        let (_dir, repo) = setup();
        let ctx = TxContext::background();
        let mut first = repo.begin_transaction(&ctx).unwrap();
        let mut second = repo.begin_transaction(&ctx).unwrap();

        first.create_table(&table("t1")).unwrap();
        second.create_table(&table("t2")).unwrap();
        first.commit().unwrap();

        assert!(matches!(second.commit(), Err(StorageError::ConcurrentModification { .. })));
        assert!(!second.is_finished());
        second.rollback().unwrap();
        assert!(!repo.table_exists(&table("t2"), repo.head().unwrap()).unwrap());
    }

    #[test]
    fn test_read_only_commit_tolerates_moved_main() {
        let (_dir, repo) = setup();
        let ctx = TxContext::background();
        let mut reader = repo.begin_transaction(&ctx).unwrap();
        let mut writer = repo.begin_transaction(&ctx).unwrap();
        writer.create_table(&table("t1")).unwrap();
        writer.commit().unwrap();

        reader.commit().unwrap();
        assert!(repo.table_exists(&table("t1"), repo.head().unwrap()).unwrap());
    }

    #[test]
    fn test_drop_cleans_up() {
        let (_dir, repo) = setup();
        {
            let mut tx = repo.begin_transaction(&TxContext::background()).unwrap();
            tx.create_savepoint(&sp("sp_a")).unwrap();
            assert_eq!(repo.list_transaction_branches().unwrap().len(), 1);
        }
        assert!(repo.list_transaction_branches().unwrap().is_empty());
    }

    #[test]
    fn test_driver_honors_context() {
        let (_dir, repo) = setup();
        let ctx = TxContext::background();
        ctx.cancel();
        assert!(matches!(
            repo.begin_transaction(&ctx),
            Err(StorageError::Interrupted(_))
        ));
        assert!(repo.ping().is_ok());
    }
}
