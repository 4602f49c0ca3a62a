//! Thread-safe wrapper around `git2::Repository`.
//!
//! All reads take a commit id explicitly, so callers decide whether they
//! look at `main` or at a transaction tip. Writes never move refs on their
//! own: they return the new commit and the caller moves its branch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::Repository;
use parking_lot::RwLock;

use crate::storage::blob::{self, Row};
use crate::storage::commit::{self, CommitBuilder, CommitMessage};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::refs::RefManager;
use crate::storage::tree::TreeMutator;
use crate::storage::types::{BranchName, CommitId, GitSignature, RowKey, TableName};

/// Handle to a Git-backed database. Cheap to clone; clones share the
/// underlying repository.
#[derive(Clone)]
pub struct GitRepository {
    inner: Arc<GitRepositoryInner>,
    signature: GitSignature,
}

struct GitRepositoryInner {
    repo: RwLock<Repository>,
    path: PathBuf,
}

impl GitRepository {
    fn wrap(repo: Repository, path: &Path) -> Self {
        Self {
            inner: Arc::new(GitRepositoryInner {
                repo: RwLock::new(repo),
                path: path.to_path_buf(),
            }),
            signature: GitSignature::default(),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let repo = Repository::open(path).map_err(|_| StorageError::NotInitialized(path.to_path_buf()))?;
        Ok(Self::wrap(repo, path))
    }

    /// Create a repository with an empty initial commit on `main`.
    pub fn init(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let storage = Self::wrap(Repository::init(path)?, path);
        storage.with_repo_mut(|repo| {
            let initial = commit::create_initial_commit(repo, &storage.signature)?;
            RefManager::init_main_branch(repo, initial)
        })?;
        Ok(storage)
    }

    pub fn open_or_init(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if path.join(".git").exists() {
            Self::open(path)
        } else {
            Self::init(path)
        }
    }

    /// Use `signature` for commits written through this handle.
    pub fn with_signature(mut self, signature: GitSignature) -> Self {
        self.signature = signature;
        self
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn signature(&self) -> &GitSignature {
        &self.signature
    }

    pub fn with_repo<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Repository) -> StorageResult<T>,
    {
        let repo = self.inner.repo.read();
        f(&repo)
    }

    pub fn with_repo_mut<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Repository) -> StorageResult<T>,
    {
        let repo = self.inner.repo.write();
        f(&repo)
    }

    /// Tip of `main`.
    pub fn head(&self) -> StorageResult<CommitId> {
        self.with_repo(RefManager::head_commit)
    }

    pub fn resolve_branch(&self, branch: &BranchName) -> StorageResult<CommitId> {
        self.with_repo(|repo| RefManager::resolve_branch(repo, branch))
    }

    // ==================== Reads ====================

    pub fn list_tables(&self, at: CommitId) -> StorageResult<Vec<TableName>> {
        self.with_repo(|repo| Ok(commit::get_tree_at_commit(repo, at)?.list_tables()))
    }

    pub fn table_exists(&self, table: &TableName, at: CommitId) -> StorageResult<bool> {
        self.with_repo(|repo| Ok(commit::get_tree_at_commit(repo, at)?.table_exists(table)))
    }

    pub fn read_row(&self, table: &TableName, key: &RowKey, at: CommitId) -> StorageResult<Option<Row>> {
        self.with_repo(|repo| {
            let tree = commit::get_tree_at_commit(repo, at)?;
            match tree.row_blob_id(repo, table, key)? {
                Some(blob_id) => {
                    let bytes = blob::read_blob(repo, blob_id)?;
                    Ok(Some(blob::deserialize_row(&bytes, key)?))
                }
                None => Ok(None),
            }
        })
    }

    /// Read every row of a table into memory, ordered by key.
    pub fn scan_table(&self, table: &TableName, at: CommitId) -> StorageResult<Vec<Row>> {
        self.with_repo(|repo| {
            let tree = commit::get_tree_at_commit(repo, at)?;
            let mut rows = Vec::new();
            for key in tree.list_rows(repo, table)? {
                let blob_id = tree
                    .row_blob_id(repo, table, &key)?
                    .ok_or_else(|| StorageError::RowNotFound {
                        table: table.clone(),
                        key: key.clone(),
                    })?;
                let bytes = blob::read_blob(repo, blob_id)?;
                rows.push(blob::deserialize_row(&bytes, &key)?);
            }
            rows.sort_by(|a, b| a.key.as_str().cmp(b.key.as_str()));
            Ok(rows)
        })
    }

    pub fn count_rows(&self, table: &TableName, at: CommitId) -> StorageResult<usize> {
        self.with_repo(|repo| Ok(commit::get_tree_at_commit(repo, at)?.list_rows(repo, table)?.len()))
    }

    // ==================== Writes ====================

    pub fn create_table(&self, table: &TableName, at: CommitId, tx_id: &str) -> StorageResult<CommitId> {
        self.with_repo_mut(|repo| {
            let tree = commit::get_tree_at_commit(repo, at)?;
            let mut mutator = TreeMutator::from_tree(repo, &tree)?;
            mutator.create_table(table)?;

            CommitBuilder::new(repo)
                .tree(mutator.write()?)
                .parent(at)
                .message(CommitMessage::create_table(table.as_str(), tx_id))
                .signature(self.signature.clone())
                .commit()
        })
    }

    /// Insert a row; fails if the key is already taken.
    pub fn insert_row(&self, table: &TableName, row: &Row, at: CommitId, tx_id: &str) -> StorageResult<CommitId> {
        self.with_repo_mut(|repo| {
            let tree = commit::get_tree_at_commit(repo, at)?;
            if tree.row_exists(repo, table, &row.key)? {
                return Err(StorageError::RowAlreadyExists {
                    table: table.clone(),
                    key: row.key.clone(),
                });
            }

            let blob_id = blob::write_blob(repo, row)?;
            let mut mutator = TreeMutator::from_tree(repo, &tree)?;
            mutator.upsert_row(table, &row.key, blob_id)?;

            CommitBuilder::new(repo)
                .tree(mutator.write()?)
                .parent(at)
                .message(CommitMessage::insert(table.as_str(), row.key.as_str(), tx_id))
                .signature(self.signature.clone())
                .commit()
        })
    }

    pub fn delete_row(&self, table: &TableName, key: &RowKey, at: CommitId, tx_id: &str) -> StorageResult<CommitId> {
        self.with_repo_mut(|repo| {
            let tree = commit::get_tree_at_commit(repo, at)?;
            let mut mutator = TreeMutator::from_tree(repo, &tree)?;
            mutator.delete_row(table, key)?;

            CommitBuilder::new(repo)
                .tree(mutator.write()?)
                .parent(at)
                .message(CommitMessage::delete(table.as_str(), key.as_str(), tx_id))
                .signature(self.signature.clone())
                .commit()
        })
    }

    // ==================== Transaction refs ====================

    pub fn create_transaction_branch(&self, tx_id: &str, base: CommitId) -> StorageResult<BranchName> {
        let branch = BranchName::for_transaction(tx_id);
        self.with_repo_mut(|repo| RefManager::create_branch(repo, &branch, base))?;
        Ok(branch)
    }

    pub fn delete_transaction_branch(&self, tx_id: &str) -> StorageResult<()> {
        self.with_repo_mut(|repo| RefManager::delete_branch(repo, &BranchName::for_transaction(tx_id)))
    }

    pub fn list_transaction_branches(&self) -> StorageResult<Vec<BranchName>> {
        self.with_repo(RefManager::list_transaction_branches)
    }

    pub fn update_branch(&self, branch: &BranchName, target: CommitId) -> StorageResult<()> {
        self.with_repo_mut(|repo| RefManager::update_branch(repo, branch, target))
    }

    /// Move `main` to the tip of `tx_branch`, provided `main` is still at
    /// `expected_main`.
    pub fn fast_forward_main(&self, tx_branch: &BranchName, expected_main: CommitId) -> StorageResult<CommitId> {
        self.with_repo_mut(|repo| {
            let tip = RefManager::resolve_branch(repo, tx_branch)?;
            RefManager::update_branch_if_unchanged(repo, &BranchName::main(), expected_main, tip)?;
            Ok(tip)
        })
    }

    pub fn create_savepoint(&self, tx_id: &str, name: &str, at: CommitId) -> StorageResult<()> {
        self.with_repo_mut(|repo| RefManager::create_savepoint(repo, tx_id, name, at))
    }

    pub fn resolve_savepoint(&self, tx_id: &str, name: &str) -> StorageResult<CommitId> {
        self.with_repo(|repo| RefManager::resolve_savepoint(repo, tx_id, name))
    }

    pub fn delete_savepoint(&self, tx_id: &str, name: &str) -> StorageResult<()> {
        self.with_repo_mut(|repo| RefManager::delete_savepoint(repo, tx_id, name))
    }

    pub fn list_savepoints(&self, tx_id: &str) -> StorageResult<Vec<String>> {
        self.with_repo(|repo| RefManager::list_savepoints(repo, tx_id))
    }
}

impl std::fmt::Debug for GitRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRepository")
            .field("path", &self.inner.path)
            .field("signature", &self.signature)
            .finish()
    }
}
