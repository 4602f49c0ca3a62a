//! Savepoint names and where they come from.

use std::fmt;
use std::sync::OnceLock;

use parking_lot::Mutex;
use ulid::Generator;

use crate::storage::{check_charset, InvalidNameError};

/// A name usable as a bare SQL savepoint identifier: starts with an ASCII
/// letter, continues with ASCII alphanumerics or `_`. Hyphens are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SavepointName(String);

impl SavepointName {
    pub const MAX_LEN: usize = 64;

    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        let Some(first) = name.chars().next() else {
            return Err(InvalidNameError::Empty);
        };
        if name.len() > Self::MAX_LEN {
            return Err(InvalidNameError::TooLong(name.len()));
        }
        if !first.is_ascii_alphabetic() {
            return Err(InvalidNameError::InvalidStart(first));
        }
        check_charset(&name, |c| c.is_ascii_alphanumeric() || c == '_')?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `SAVEPOINT <name>`
    pub fn create_sql(&self) -> String {
        format!("SAVEPOINT {}", self.0)
    }

    /// `ROLLBACK TO SAVEPOINT <name>`
    pub fn rollback_sql(&self) -> String {
        format!("ROLLBACK TO SAVEPOINT {}", self.0)
    }
}

impl fmt::Display for SavepointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SavepointName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Supplies a fresh savepoint name for every nested `begin`.
pub trait SavepointIdSource: Send {
    fn next_id(&mut self) -> SavepointName;
}

/// Default source: `sp_` followed by a lowercase ULID.
///
/// All instances draw from one process-wide monotonic generator, so names
/// never repeat within a process.
///
/// # Panics
///
/// Panics if the generator overflows its random component within a single
/// millisecond, which needs 2^80 names in that millisecond.
#[derive(Debug, Clone, Copy, Default)]
pub struct UlidSavepoints;

impl UlidSavepoints {
    pub const PREFIX: &'static str = "sp_";

    fn generator() -> &'static Mutex<Generator> {
        static GENERATOR: OnceLock<Mutex<Generator>> = OnceLock::new();
        GENERATOR.get_or_init(|| Mutex::new(Generator::new()))
    }
}

impl SavepointIdSource for UlidSavepoints {
    fn next_id(&mut self) -> SavepointName {
        let ulid = Self::generator()
            .lock()
            .generate()
            .expect("savepoint id space exhausted within one millisecond");
        // Crockford base32 is alphanumeric, so the name is valid by construction.
        SavepointName(format!("{}{}", Self::PREFIX, ulid.to_string().to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_savepoint_name_validation() {
        assert!(SavepointName::new("sp_abc123").is_ok());
        assert!(SavepointName::new("Level2").is_ok());
        assert_eq!(SavepointName::new(""), Err(InvalidNameError::Empty));
        assert_eq!(SavepointName::new("_sp"), Err(InvalidNameError::InvalidStart('_')));
        assert_eq!(SavepointName::new("9sp"), Err(InvalidNameError::InvalidStart('9')));
        assert_eq!(
            SavepointName::new("sp-1"),
            Err(InvalidNameError::InvalidCharacter { char: '-', position: 2 })
        );
        assert_eq!(SavepointName::new("s".repeat(65)), Err(InvalidNameError::TooLong(65)));
    }

    #[test]
    fn test_sql_rendering() {
        let name = SavepointName::new("sp_1").unwrap();
        assert_eq!(name.create_sql(), "SAVEPOINT sp_1");
        assert_eq!(name.rollback_sql(), "ROLLBACK TO SAVEPOINT sp_1");
    }

    #[test]
    fn test_ulid_names_are_valid_and_unique() {
        let mut source = UlidSavepoints;
        let mut other = UlidSavepoints;
        let mut seen = HashSet::new();

        for _ in 0..1000 {
            for name in [source.next_id(), other.next_id()] {
                assert!(name.as_str().starts_with("sp_"));
                assert_eq!(name.as_str().len(), 3 + 26);
                assert_eq!(SavepointName::new(name.as_str()), Ok(name.clone()));
                assert!(seen.insert(name));
            }
        }
    }
}
