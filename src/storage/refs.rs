//! Branch and savepoint references.
//!
//! - `refs/heads/main` is the committed state.
//! - `refs/heads/tx/{tx_id}` is the tip of an open physical transaction.
//! - `refs/savepoints/{tx_id}/{name}` marks a savepoint inside that
//!   transaction and is deleted when the transaction finishes.

use git2::{BranchType, Repository};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BranchName, CommitId};

pub struct RefManager;

impl RefManager {
    pub const SAVEPOINT_NAMESPACE: &'static str = "refs/savepoints/";

    pub fn resolve_branch(repo: &Repository, branch: &BranchName) -> StorageResult<CommitId> {
        Self::resolve(repo, &branch.as_ref_path())
    }

    fn resolve(repo: &Repository, ref_path: &str) -> StorageResult<CommitId> {
        let commit = repo
            .find_reference(ref_path)
            .and_then(|reference| reference.peel_to_commit())
            .map_err(|_| StorageError::RefNotFound(ref_path.to_string()))?;
        Ok(CommitId::new(commit.id()))
    }

    pub fn head_commit(repo: &Repository) -> StorageResult<CommitId> {
        let head = repo.head().map_err(|e| {
            if e.code() == git2::ErrorCode::UnbornBranch {
                StorageError::EmptyRepository
            } else {
                StorageError::Git(e)
            }
        })?;
        Ok(CommitId::new(head.peel_to_commit()?.id()))
    }

    pub fn branch_exists(repo: &Repository, branch: &BranchName) -> bool {
        repo.find_reference(&branch.as_ref_path()).is_ok()
    }

    pub fn create_branch(repo: &Repository, branch: &BranchName, target: CommitId) -> StorageResult<()> {
        if Self::branch_exists(repo, branch) {
            return Err(StorageError::BranchAlreadyExists(branch.to_string()));
        }
        let commit = repo.find_commit(target.raw())?;
        repo.branch(branch.as_str(), &commit, false)?;
        Ok(())
    }

    /// Force-move a branch.
    pub fn update_branch(repo: &Repository, branch: &BranchName, target: CommitId) -> StorageResult<()> {
        let mut reference = repo
            .find_reference(&branch.as_ref_path())
            .map_err(|_| StorageError::RefNotFound(branch.to_string()))?;
        reference.set_target(target.raw(), &format!("move {} to {}", branch, target.short()))?;
        Ok(())
    }

    /// Compare-and-swap: move `branch` only if it still points at `expected`.
    pub fn update_branch_if_unchanged(
        repo: &Repository,
        branch: &BranchName,
        expected: CommitId,
        new_target: CommitId,
    ) -> StorageResult<()> {
        if Self::resolve_branch(repo, branch)? != expected {
            return Err(StorageError::ConcurrentModification {
                branch: branch.to_string(),
            });
        }
        Self::update_branch(repo, branch, new_target)
    }

    pub fn delete_branch(repo: &Repository, branch: &BranchName) -> StorageResult<()> {
        repo.find_branch(branch.as_str(), BranchType::Local)
            .map_err(|_| StorageError::RefNotFound(branch.to_string()))?
            .delete()?;
        Ok(())
    }

    pub fn list_transaction_branches(repo: &Repository) -> StorageResult<Vec<BranchName>> {
        let mut result = Vec::new();
        for entry in repo.branches(Some(BranchType::Local))? {
            let (branch, _) = entry?;
            if let Some(name) = branch.name()? {
                if name.starts_with(BranchName::TX_PREFIX) {
                    result.push(BranchName::new(name)?);
                }
            }
        }
        Ok(result)
    }

    /// Ensure `main` exists at `initial_commit` and HEAD points at it.
    pub fn init_main_branch(repo: &Repository, initial_commit: CommitId) -> StorageResult<()> {
        let main = BranchName::main();
        if !Self::branch_exists(repo, &main) {
            Self::create_branch(repo, &main, initial_commit)?;
        }
        repo.set_head(&main.as_ref_path())?;
        Ok(())
    }

    pub fn savepoint_ref_path(tx_id: &str, name: &str) -> String {
        format!("{}{}/{}", Self::SAVEPOINT_NAMESPACE, tx_id, name)
    }

    pub fn create_savepoint(repo: &Repository, tx_id: &str, name: &str, at: CommitId) -> StorageResult<()> {
        let path = Self::savepoint_ref_path(tx_id, name);
        repo.reference(&path, at.raw(), false, &format!("savepoint {} at {}", name, at.short()))?;
        Ok(())
    }

    pub fn resolve_savepoint(repo: &Repository, tx_id: &str, name: &str) -> StorageResult<CommitId> {
        Self::resolve(repo, &Self::savepoint_ref_path(tx_id, name)).map_err(|_| {
            StorageError::SavepointNotFound {
                tx_id: tx_id.to_string(),
                name: name.to_string(),
            }
        })
    }

    pub fn delete_savepoint(repo: &Repository, tx_id: &str, name: &str) -> StorageResult<()> {
        let path = Self::savepoint_ref_path(tx_id, name);
        repo.find_reference(&path)
            .map_err(|_| StorageError::SavepointNotFound {
                tx_id: tx_id.to_string(),
                name: name.to_string(),
            })?
            .delete()?;
        Ok(())
    }

    /// Names of all savepoint refs recorded for a transaction.
    pub fn list_savepoints(repo: &Repository, tx_id: &str) -> StorageResult<Vec<String>> {
        let prefix = Self::savepoint_ref_path(tx_id, "");
        let mut names = Vec::new();
        for reference in repo.references_glob(&format!("{}*", prefix))? {
            if let Some(name) = reference?.name().and_then(|n| n.strip_prefix(&prefix)) {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::commit::create_initial_commit;
    use crate::storage::types::GitSignature;
    use tempfile::TempDir;

    fn setup_repo_with_commit() -> (TempDir, Repository, CommitId) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let commit_id = create_initial_commit(&repo, &GitSignature::default()).unwrap();
        RefManager::init_main_branch(&repo, commit_id).unwrap();
        (dir, repo, commit_id)
    }

    #[test]
    fn test_head_is_main() {
        let (_dir, repo, initial) = setup_repo_with_commit();
        assert_eq!(RefManager::head_commit(&repo).unwrap(), initial);
        assert_eq!(RefManager::resolve_branch(&repo, &BranchName::main()).unwrap(), initial);
    }

    #[test]
    fn test_transaction_branch_lifecycle() {
        let (_dir, repo, base) = setup_repo_with_commit();
        let branch = BranchName::for_transaction("tx001");

        RefManager::create_branch(&repo, &branch, base).unwrap();
        let duplicate = RefManager::create_branch(&repo, &branch, base);
        assert!(matches!(duplicate, Err(StorageError::BranchAlreadyExists(_))));
        assert_eq!(RefManager::list_transaction_branches(&repo).unwrap(), vec![branch.clone()]);

        RefManager::delete_branch(&repo, &branch).unwrap();
        assert!(!RefManager::branch_exists(&repo, &branch));
    }

    #[test]
    fn test_update_branch_if_unchanged() {
        let (_dir, repo, base) = setup_repo_with_commit();
        let branch = BranchName::new("work").unwrap();
        RefManager::create_branch(&repo, &branch, base).unwrap();

        let tree = repo.find_commit(base.raw()).unwrap().tree().unwrap();
        let sig = git2::Signature::now("Test", "test@test.com").unwrap();
        let parent = repo.find_commit(base.raw()).unwrap();
        let next = CommitId::new(repo.commit(None, &sig, &sig, "next", &tree, &[&parent]).unwrap());

        RefManager::update_branch_if_unchanged(&repo, &branch, base, next).unwrap();
        let stale = RefManager::update_branch_if_unchanged(&repo, &branch, base, next);
        assert!(matches!(stale, Err(StorageError::ConcurrentModification { .. })));
    }

    #[test]
    fn test_savepoint_refs() {
        let (_dir, repo, base) = setup_repo_with_commit();

        RefManager::create_savepoint(&repo, "tx001", "sp_a", base).unwrap();
        RefManager::create_savepoint(&repo, "tx001", "sp_b", base).unwrap();
        RefManager::create_savepoint(&repo, "tx002", "sp_c", base).unwrap();

        assert_eq!(RefManager::resolve_savepoint(&repo, "tx001", "sp_a").unwrap(), base);
        let mut names = RefManager::list_savepoints(&repo, "tx001").unwrap();
        names.sort();
        assert_eq!(names, vec!["sp_a".to_string(), "sp_b".to_string()]);

        RefManager::delete_savepoint(&repo, "tx001", "sp_a").unwrap();
        let missing = RefManager::resolve_savepoint(&repo, "tx001", "sp_a");
        assert!(matches!(missing, Err(StorageError::SavepointNotFound { .. })));
    }
}
