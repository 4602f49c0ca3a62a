//! Names and object ids used throughout the store.
//!
//! Everything that ends up in a tree path or a ref name goes through one of
//! the validated newtypes here first.

use std::fmt;

use git2::Oid;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Declares a typed wrapper for one kind of git object id.
macro_rules! object_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub(crate) Oid);

        impl $name {
            pub(crate) fn new(oid: Oid) -> Self {
                Self(oid)
            }

            pub(crate) fn raw(&self) -> Oid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

object_id! {
    /// A snapshot of the whole database.
    CommitId
}
object_id!(TreeId);
object_id!(BlobId);

impl CommitId {
    pub fn from_hex(hex: &str) -> Result<Self, git2::Error> {
        Oid::from_str(hex).map(Self)
    }

    /// First seven hex digits, as `git log --oneline` prints them.
    pub fn short(&self) -> String {
        self.0.to_string().chars().take(7).collect()
    }
}

/// Characters allowed in table names and row keys.
fn is_path_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-')
}

/// Fails on the first character `allowed` rejects, reporting its index.
pub(crate) fn check_charset(
    name: &str,
    allowed: impl Fn(char) -> bool,
) -> Result<(), InvalidNameError> {
    name.chars()
        .enumerate()
        .find(|&(_, c)| !allowed(c))
        .map_or(Ok(()), |(position, char)| {
            Err(InvalidNameError::InvalidCharacter { char, position })
        })
}

fn check_len(name: &str, max: usize) -> Result<(), InvalidNameError> {
    match name.len() {
        0 => Err(InvalidNameError::Empty),
        len if len > max => Err(InvalidNameError::TooLong(len)),
        _ => Ok(()),
    }
}

/// A table, stored as a top-level directory of the commit tree.
///
/// At most 64 path-safe characters, leading with a letter or `_`. A few
/// underscore names are held back for metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableName(String);

impl TableName {
    const MAX_LEN: usize = 64;
    const RESERVED: &'static [&'static str] = &["_schema", "_meta", "_system", "_git"];

    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        check_len(&name, Self::MAX_LEN)?;
        match name.chars().next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            Some(c) => return Err(InvalidNameError::InvalidStart(c)),
            None => return Err(InvalidNameError::Empty),
        }
        check_charset(&name, is_path_safe)?;
        if Self::RESERVED.iter().any(|r| r.eq_ignore_ascii_case(&name)) {
            return Err(InvalidNameError::Reserved(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TableName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Primary key of a row; the row is stored as `{key}.json`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowKey(String);

impl RowKey {
    const MAX_LEN: usize = 128;

    pub fn new(key: impl Into<String>) -> Result<Self, InvalidNameError> {
        let key = key.into();
        check_len(&key, Self::MAX_LEN)?;
        check_charset(&key, is_path_safe)?;
        Ok(Self(key))
    }

    /// A fresh key that sorts by creation time.
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn file_name(&self) -> String {
        format!("{}.json", self.0)
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Short name of a local branch: `main`, or `tx/{id}` for an open
/// physical transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BranchName(String);

impl BranchName {
    pub const MAIN: &'static str = "main";
    pub const TX_PREFIX: &'static str = "tx/";

    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        if name.is_empty() {
            return Err(InvalidNameError::Empty);
        }
        let malformed = name.split('/').any(|part| part.is_empty() || part == "..");
        if malformed || name.contains("..") {
            return Err(InvalidNameError::InvalidPath(name));
        }
        Ok(Self(name))
    }

    pub fn main() -> Self {
        Self(Self::MAIN.into())
    }

    pub fn for_transaction(tx_id: &str) -> Self {
        Self([Self::TX_PREFIX, tx_id].concat())
    }

    /// `Some(id)` for `tx/{id}` branches.
    pub fn transaction_id(&self) -> Option<&str> {
        self.0.strip_prefix(Self::TX_PREFIX)
    }

    pub fn as_ref_path(&self) -> String {
        ["refs/heads/", &self.0].concat()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity stamped on every commit gitnest writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSignature {
    pub name: String,
    pub email: String,
}

impl GitSignature {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    pub(crate) fn to_git2_signature(&self) -> Result<git2::Signature<'static>, git2::Error> {
        git2::Signature::now(&self.name, &self.email)
    }
}

impl Default for GitSignature {
    fn default() -> Self {
        Self::new("gitnest", "gitnest@localhost")
    }
}

/// A table, row, branch or savepoint name that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidNameError {
    #[error("empty name")]
    Empty,
    #[error("name is {0} bytes, over the limit")]
    TooLong(usize),
    #[error("name may not begin with {0:?}")]
    InvalidStart(char),
    #[error("{char:?} not allowed (index {position})")]
    InvalidCharacter { char: char, position: usize },
    #[error("{0:?} is reserved")]
    Reserved(String),
    #[error("malformed path {0:?}")]
    InvalidPath(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names() {
        for ok in ["orders", "line_items", "t1", "_scratch", "audit-log"] {
            assert!(TableName::new(ok).is_ok(), "{}", ok);
        }

        assert_eq!(TableName::new(""), Err(InvalidNameError::Empty));
        assert_eq!(TableName::new("9lives"), Err(InvalidNameError::InvalidStart('9')));
        assert_eq!(
            TableName::new("orders/2024"),
            Err(InvalidNameError::InvalidCharacter { char: '/', position: 6 })
        );
        assert!(matches!(TableName::new("_META"), Err(InvalidNameError::Reserved(_))));
        assert_eq!(TableName::new("x".repeat(65)), Err(InvalidNameError::TooLong(65)));
    }

    #[test]
    fn test_row_keys() {
        assert!(RowKey::new("k-1_a").is_ok());
        assert_eq!(
            RowKey::new("a.json"),
            Err(InvalidNameError::InvalidCharacter { char: '.', position: 1 })
        );
        assert_eq!(RowKey::new(""), Err(InvalidNameError::Empty));

        let first = RowKey::generate();
        assert_ne!(first, RowKey::generate());
        assert_eq!(first.as_str().len(), 26);
        assert_eq!(first.file_name(), format!("{}.json", first));
    }

    #[test]
    fn test_branch_names() {
        let branch = BranchName::for_transaction("01j0");
        assert_eq!(branch.as_str(), "tx/01j0");
        assert_eq!(branch.transaction_id(), Some("01j0"));
        assert_eq!(branch.as_ref_path(), "refs/heads/tx/01j0");
        assert_eq!(BranchName::main().transaction_id(), None);

        for bad in ["x/../y", "/x", "x/", "x//y"] {
            assert!(matches!(BranchName::new(bad), Err(InvalidNameError::InvalidPath(_))), "{}", bad);
        }
    }

    #[test]
    fn test_commit_id_short() {
        let id = CommitId::from_hex("0123456789abcdef0123456789abcdef01234567").unwrap();
        assert_eq!(id.short(), "0123456");
        assert_eq!(id.to_string().len(), 40);
    }
}
