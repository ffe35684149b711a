//! Key-value persistence used for the gallery and settings documents.
//!
//! Values are JSON documents stored under fixed string keys. The durable
//! implementation lives in [`crate::database`]; [`MemoryStore`] is the
//! session-only fallback used when the database cannot be opened.

use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Key holding the ordered list of generated image records.
pub const GALLERY_KEY: &str = "generated-images";
/// Key holding the application settings (credential list).
pub const SETTINGS_KEY: &str = "app-settings";
/// Key holding a generation request parked until API keys are saved.
pub const PENDING_BATCH_KEY: &str = "pending-batch";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage query failed: {0}")]
    Query(#[from] rusqlite::Error),
    #[error("stored value under '{key}' is not valid JSON: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("value for '{key}' could not be serialized: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Transformation applied by [`KeyValueStore::update`].
pub type DocumentUpdate<'a> =
    dyn FnMut(Option<serde_json::Value>) -> Result<serde_json::Value, StorageError> + 'a;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StorageError>;

    fn set(&self, key: &str, value: &serde_json::Value) -> Result<(), StorageError>;

    /// Reads the current value, passes it to `apply` and stores the result,
    /// with no other writer able to interleave. Returns the stored value.
    fn update(
        &self,
        key: &str,
        apply: &mut DocumentUpdate<'_>,
    ) -> Result<serde_json::Value, StorageError>;

    /// Short label used in log lines.
    fn backend_name(&self) -> &'static str;
}

/// Reads and deserializes a typed document. Absent keys yield `Ok(None)`.
pub fn load_document<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    let Some(value) = store.get(key)? else {
        return Ok(None);
    };
    serde_json::from_value(value)
        .map(Some)
        .map_err(|source| StorageError::Decode {
            key: key.to_string(),
            source,
        })
}

pub fn save_document<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    document: &T,
) -> Result<(), StorageError> {
    let value = serde_json::to_value(document).map_err(|source| StorageError::Encode {
        key: key.to_string(),
        source,
    })?;
    store.set(key, &value)
}

/// Applies `apply` to the stored document (or `T::default()` when absent)
/// as one atomic read-modify-write and returns the document as written.
pub fn update_document<T, F>(
    store: &dyn KeyValueStore,
    key: &str,
    mut apply: F,
) -> Result<T, StorageError>
where
    T: DeserializeOwned + Serialize + Default,
    F: FnMut(&mut T),
{
    let mut written = None;
    store.update(key, &mut |current| {
        let mut document: T = match current {
            Some(value) => {
                serde_json::from_value(value).map_err(|source| StorageError::Decode {
                    key: key.to_string(),
                    source,
                })?
            }
            None => T::default(),
        };
        apply(&mut document);
        let value = serde_json::to_value(&document).map_err(|source| StorageError::Encode {
            key: key.to_string(),
            source,
        })?;
        written = Some(document);
        Ok(value)
    })?;

    written.ok_or_else(|| StorageError::Unavailable(format!("update of '{}' did not run", key)))
}

/// Session-only store. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StorageError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StorageError::Unavailable("memory store lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &serde_json::Value) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::Unavailable("memory store lock poisoned".to_string()))?;
        entries.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn update(
        &self,
        key: &str,
        apply: &mut DocumentUpdate<'_>,
    ) -> Result<serde_json::Value, StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::Unavailable("memory store lock poisoned".to_string()))?;
        let updated = apply(entries.get(key).cloned())?;
        entries.insert(key.to_string(), updated.clone());
        Ok(updated)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Sample {
        names: Vec<String>,
    }

    #[test]
    fn absent_key_loads_as_none() {
        let store = MemoryStore::new();
        let loaded: Option<Sample> = load_document(&store, "missing").unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn saved_document_loads_back() {
        let store = MemoryStore::new();
        let sample = Sample {
            names: vec!["a".into(), "b".into()],
        };
        save_document(&store, "sample", &sample).unwrap();
        let loaded: Option<Sample> = load_document(&store, "sample").unwrap();
        assert_eq!(loaded, Some(sample));
    }

    #[test]
    fn mistyped_document_reports_decode_error() {
        let store = MemoryStore::new();
        store
            .set("sample", &serde_json::json!({ "names": 42 }))
            .unwrap();
        let result: Result<Option<Sample>, _> = load_document(&store, "sample");
        assert!(matches!(result, Err(StorageError::Decode { .. })));
    }

    #[test]
    fn update_document_starts_from_default_and_builds_on_stored_value() {
        let store = MemoryStore::new();
        let first: Sample = update_document(&store, "sample", |sample: &mut Sample| {
            sample.names.push("a".into())
        })
        .unwrap();
        assert_eq!(first.names, vec!["a"]);

        update_document(&store, "sample", |sample: &mut Sample| sample.names.push("b".into()))
            .unwrap();
        let loaded: Option<Sample> = load_document(&store, "sample").unwrap();
        assert_eq!(loaded.unwrap().names, vec!["a", "b"]);
    }

    #[test]
    fn failed_update_leaves_stored_value_untouched() {
        let store = MemoryStore::new();
        store
            .set("sample", &serde_json::json!({ "names": 42 }))
            .unwrap();
        let result = update_document(&store, "sample", |sample: &mut Sample| sample.names.clear());
        assert!(matches!(result, Err(StorageError::Decode { .. })));
        assert_eq!(
            store.get("sample").unwrap(),
            Some(serde_json::json!({ "names": 42 }))
        );
    }
}
