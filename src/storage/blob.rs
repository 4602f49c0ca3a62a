//! Row blobs.
//!
//! Every row is one pretty-printed JSON blob. Metadata fields carry a `_`
//! prefix so they cannot collide with user columns:
//!
//! ```text
//! {
//!   "_pk": "abc123",
//!   "_version": 1,
//!   "_written_at": "2024-01-01T00:00:00Z",
//!   "name": "abc"
//! }
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BlobId, RowKey};

/// A stored row: primary key, write metadata and column values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub key: RowKey,
    pub version: u64,
    pub written_at: DateTime<Utc>,
    pub data: BTreeMap<String, Value>,
}

impl Row {
    pub fn new(key: RowKey, data: BTreeMap<String, Value>) -> Self {
        Self {
            key,
            version: 1,
            written_at: Utc::now(),
            data,
        }
    }

    /// Build a row from a JSON object; anything else is rejected.
    pub fn from_value(key: RowKey, value: Value) -> StorageResult<Self> {
        match value {
            Value::Object(map) => Ok(Self::new(key, map.into_iter().collect())),
            _ => Err(StorageError::NotAnObject),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.data.get(column)
    }

    /// Column values as a JSON object, metadata excluded.
    pub fn to_value(&self) -> Value {
        Value::Object(self.data.clone().into_iter().collect())
    }
}

#[derive(Serialize, Deserialize)]
struct RowJson {
    #[serde(rename = "_pk")]
    pk: String,
    #[serde(rename = "_version")]
    version: u64,
    #[serde(rename = "_written_at")]
    written_at: DateTime<Utc>,
    #[serde(flatten)]
    data: BTreeMap<String, Value>,
}

pub fn serialize_row(row: &Row) -> StorageResult<Vec<u8>> {
    let json = RowJson {
        pk: row.key.as_str().to_string(),
        version: row.version,
        written_at: row.written_at,
        data: row.data.clone(),
    };
    Ok(serde_json::to_vec_pretty(&json)?)
}

/// Decode a row blob, checking the embedded key against the file name.
pub fn deserialize_row(bytes: &[u8], expected_key: &RowKey) -> StorageResult<Row> {
    let json: RowJson = serde_json::from_slice(bytes)?;

    if json.pk != expected_key.as_str() {
        return Err(StorageError::CorruptedData {
            key: expected_key.clone(),
            reason: format!("blob carries primary key '{}'", json.pk),
        });
    }

    Ok(Row {
        key: expected_key.clone(),
        version: json.version,
        written_at: json.written_at,
        data: json.data,
    })
}

pub fn write_blob(repo: &git2::Repository, row: &Row) -> StorageResult<BlobId> {
    let bytes = serialize_row(row)?;
    Ok(BlobId::new(repo.blob(&bytes)?))
}

pub fn read_blob(repo: &git2::Repository, blob_id: BlobId) -> StorageResult<Vec<u8>> {
    let blob = repo.find_blob(blob_id.raw())?;
    Ok(blob.content().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value() {
        let key = RowKey::new("abc").unwrap();
        let row = Row::from_value(key.clone(), json!({"id": "abc", "n": 2})).unwrap();
        assert_eq!(row.version, 1);
        assert_eq!(row.get("n"), Some(&json!(2)));
        assert_eq!(row.to_value(), json!({"id": "abc", "n": 2}));

        let err = Row::from_value(key, json!([1, 2])).unwrap_err();
        assert!(matches!(err, StorageError::NotAnObject));
    }

    #[test]
    fn test_metadata_fields_present() {
        let key = RowKey::new("abc").unwrap();
        let row = Row::from_value(key.clone(), json!({"name": "Alice"})).unwrap();
        let bytes = serialize_row(&row).unwrap();

        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["_pk"], json!("abc"));
        assert_eq!(parsed["_version"], json!(1));
        assert!(parsed.get("_written_at").is_some());

        let restored = deserialize_row(&bytes, &key).unwrap();
        assert_eq!(restored.data, row.data);
    }

    #[test]
    fn test_key_mismatch_detection() {
        let row = Row::new(RowKey::new("correct").unwrap(), BTreeMap::new());
        let bytes = serialize_row(&row).unwrap();

        let result = deserialize_row(&bytes, &RowKey::new("wrong").unwrap());
        assert!(matches!(result, Err(StorageError::CorruptedData { .. })));
    }
}
