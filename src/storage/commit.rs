//! Commit creation.
//!
//! Every write inside a physical transaction becomes one commit on the
//! transaction branch; the messages below tag each commit with its tx id.

use git2::Repository;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::tree::{self, TreeHandle};
use crate::storage::types::{CommitId, GitSignature, TreeId};

/// Fluent builder over `Repository::commit`.
pub struct CommitBuilder<'a> {
    repo: &'a Repository,
    tree_id: Option<TreeId>,
    parents: Vec<CommitId>,
    message: String,
    signature: GitSignature,
    update_ref: Option<String>,
}

impl<'a> CommitBuilder<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        Self {
            repo,
            tree_id: None,
            parents: Vec::new(),
            message: String::new(),
            signature: GitSignature::default(),
            update_ref: None,
        }
    }

    pub fn tree(mut self, tree_id: TreeId) -> Self {
        self.tree_id = Some(tree_id);
        self
    }

    pub fn parent(mut self, parent: CommitId) -> Self {
        self.parents.push(parent);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn signature(mut self, signature: GitSignature) -> Self {
        self.signature = signature;
        self
    }

    /// Move this ref to the new commit as part of the write.
    pub fn update_ref(mut self, refname: impl Into<String>) -> Self {
        self.update_ref = Some(refname.into());
        self
    }

    pub fn commit(self) -> StorageResult<CommitId> {
        let tree_id = self
            .tree_id
            .ok_or_else(|| StorageError::Internal("commit requires a tree".to_string()))?;
        let tree = self.repo.find_tree(tree_id.raw())?;
        let sig = self.signature.to_git2_signature()?;

        let parents = self
            .parents
            .iter()
            .map(|id| self.repo.find_commit(id.raw()))
            .collect::<Result<Vec<_>, _>>()?;
        let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();

        let oid = self.repo.commit(
            self.update_ref.as_deref(),
            &sig,
            &sig,
            &self.message,
            &tree,
            &parent_refs,
        )?;
        Ok(CommitId::new(oid))
    }
}

pub fn get_tree_at_commit(repo: &Repository, commit_id: CommitId) -> StorageResult<TreeHandle<'_>> {
    let commit = repo
        .find_commit(commit_id.raw())
        .map_err(|_| StorageError::CommitNotFound(commit_id.to_string()))?;
    Ok(TreeHandle::new(commit.tree()?))
}

pub fn create_initial_commit(repo: &Repository, signature: &GitSignature) -> StorageResult<CommitId> {
    CommitBuilder::new(repo)
        .tree(tree::create_initial_tree(repo)?)
        .message("[gitnest] Initialize repository")
        .signature(signature.clone())
        .update_ref("HEAD")
        .commit()
}

/// Commit message formats.
pub struct CommitMessage;

impl CommitMessage {
    pub fn insert(table: &str, key: &str, tx_id: &str) -> String {
        format!("[INSERT] {}/{} tx:{}", table, key, tx_id)
    }

    pub fn delete(table: &str, key: &str, tx_id: &str) -> String {
        format!("[DELETE] {}/{} tx:{}", table, key, tx_id)
    }

    pub fn create_table(table: &str, tx_id: &str) -> String {
        format!("[CREATE TABLE] {} tx:{}", table, tx_id)
    }
}
