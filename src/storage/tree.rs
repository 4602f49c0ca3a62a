//! Tree reads and copy-on-write tree edits.
//!
//! The root tree holds one subtree per table; each table subtree holds one
//! `{key}.json` blob per row. Trees are immutable, so edits go through
//! [`TreeMutator`], which rebuilds only the table subtrees it touched.

use std::collections::HashMap;

use git2::{FileMode, ObjectType, Oid, Repository, Tree, TreeBuilder};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BlobId, RowKey, TableName, TreeId};

/// Read-only view of the root tree at one commit.
pub struct TreeHandle<'repo> {
    tree: Tree<'repo>,
}

impl<'repo> TreeHandle<'repo> {
    pub(crate) fn new(tree: Tree<'repo>) -> Self {
        Self { tree }
    }

    pub fn id(&self) -> TreeId {
        TreeId::new(self.tree.id())
    }

    /// Table directories, skipping `_`-prefixed metadata entries.
    pub fn list_tables(&self) -> Vec<TableName> {
        self.tree
            .iter()
            .filter(|entry| entry.kind() == Some(ObjectType::Tree))
            .filter_map(|entry| {
                let name = entry.name()?;
                if name.starts_with('_') {
                    return None;
                }
                TableName::new(name).ok()
            })
            .collect()
    }

    pub fn table_exists(&self, table: &TableName) -> bool {
        self.tree
            .get_name(table.as_str())
            .is_some_and(|entry| entry.kind() == Some(ObjectType::Tree))
    }

    fn table_tree(&self, repo: &'repo Repository, table: &TableName) -> StorageResult<Tree<'repo>> {
        match self.tree.get_name(table.as_str()) {
            Some(entry) if entry.kind() == Some(ObjectType::Tree) => Ok(repo.find_tree(entry.id())?),
            _ => Err(StorageError::TableNotFound(table.clone())),
        }
    }

    pub fn list_rows(&self, repo: &'repo Repository, table: &TableName) -> StorageResult<Vec<RowKey>> {
        let table_tree = self.table_tree(repo, table)?;
        let keys = table_tree
            .iter()
            .filter(|entry| entry.kind() == Some(ObjectType::Blob))
            .filter_map(|entry| {
                let key = entry.name()?.strip_suffix(".json")?;
                RowKey::new(key).ok()
            })
            .collect();
        Ok(keys)
    }

    pub fn row_blob_id(
        &self,
        repo: &'repo Repository,
        table: &TableName,
        key: &RowKey,
    ) -> StorageResult<Option<BlobId>> {
        let table_tree = self.table_tree(repo, table)?;
        let blob_id = table_tree
            .get_name(&key.file_name())
            .filter(|entry| entry.kind() == Some(ObjectType::Blob))
            .map(|entry| BlobId::new(entry.id()));
        Ok(blob_id)
    }

    pub fn row_exists(
        &self,
        repo: &'repo Repository,
        table: &TableName,
        key: &RowKey,
    ) -> StorageResult<bool> {
        Ok(self.row_blob_id(repo, table, key)?.is_some())
    }
}

/// Accumulates table and row edits on top of a base tree.
pub struct TreeMutator<'repo> {
    repo: &'repo Repository,
    root: TreeBuilder<'repo>,
    /// Subtree ids of the tables present in the base tree (or created here).
    tables: HashMap<String, Oid>,
    /// Builders for tables edited in this batch.
    touched: HashMap<String, TreeBuilder<'repo>>,
}

impl<'repo> TreeMutator<'repo> {
    pub fn from_tree(repo: &'repo Repository, base: &TreeHandle<'_>) -> StorageResult<Self> {
        let root = repo.treebuilder(Some(&base.tree))?;
        let tables = base
            .tree
            .iter()
            .filter(|entry| entry.kind() == Some(ObjectType::Tree))
            .filter_map(|entry| Some((entry.name()?.to_string(), entry.id())))
            .collect();

        Ok(Self {
            repo,
            root,
            tables,
            touched: HashMap::new(),
        })
    }

    pub fn create_table(&mut self, table: &TableName) -> StorageResult<()> {
        if self.tables.contains_key(table.as_str()) {
            return Err(StorageError::TableAlreadyExists(table.clone()));
        }
        let empty = self.repo.treebuilder(None)?.write()?;
        self.root.insert(table.as_str(), empty, FileMode::Tree.into())?;
        self.tables.insert(table.as_str().to_string(), empty);
        Ok(())
    }

    fn table_builder(&mut self, table: &TableName) -> StorageResult<&mut TreeBuilder<'repo>> {
        let name = table.as_str();
        let Some(&base_id) = self.tables.get(name) else {
            return Err(StorageError::TableNotFound(table.clone()));
        };
        if !self.touched.contains_key(name) {
            let base = self.repo.find_tree(base_id)?;
            let builder = self.repo.treebuilder(Some(&base))?;
            self.touched.insert(name.to_string(), builder);
        }
        self.touched
            .get_mut(name)
            .ok_or_else(|| StorageError::Internal(format!("lost tree builder for {}", name)))
    }

    pub fn upsert_row(&mut self, table: &TableName, key: &RowKey, blob_id: BlobId) -> StorageResult<()> {
        let builder = self.table_builder(table)?;
        builder.insert(key.file_name(), blob_id.raw(), FileMode::Blob.into())?;
        Ok(())
    }

    pub fn delete_row(&mut self, table: &TableName, key: &RowKey) -> StorageResult<()> {
        let builder = self.table_builder(table)?;
        if builder.get(key.file_name())?.is_none() {
            return Err(StorageError::RowNotFound {
                table: table.clone(),
                key: key.clone(),
            });
        }
        builder.remove(key.file_name())?;
        Ok(())
    }

    /// Write touched table subtrees, then the root. Returns the new root.
    pub fn write(mut self) -> StorageResult<TreeId> {
        for (name, builder) in self.touched {
            let table_id = builder.write()?;
            self.root.insert(&name, table_id, FileMode::Tree.into())?;
        }
        Ok(TreeId::new(self.root.write()?))
    }
}

/// Empty root tree for the first commit of a new repository.
pub fn create_initial_tree(repo: &Repository) -> StorageResult<TreeId> {
    Ok(TreeId::new(repo.treebuilder(None)?.write()?))
}
