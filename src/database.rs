use crate::storage::{DocumentUpdate, KeyValueStore, StorageError};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, TransactionBehavior};
use std::path::Path;

mod kv_queries;

/// Durable key-value store backed by SQLite through an r2d2 connection pool.
#[derive(Clone)]
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

fn pool_error(err: r2d2::Error) -> StorageError {
    StorageError::Unavailable(err.to_string())
}

const DEFAULT_DB_POOL_SIZE: u32 = 2;
const IN_MEMORY_PATH: &str = ":memory:";

fn db_pool_size(db_path: &Path) -> u32 {
    // Every pooled connection to ":memory:" would get its own private database.
    if db_path == Path::new(IN_MEMORY_PATH) {
        return 1;
    }

    if let Ok(raw) = std::env::var("PROMPT_GALLERY_DB_POOL_SIZE") {
        if let Ok(parsed) = raw.parse::<u32>() {
            return parsed.clamp(1, 8);
        }
    }

    DEFAULT_DB_POOL_SIZE
}

fn apply_connection_pragmas(conn: &Connection) -> SqlResult<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         PRAGMA temp_store=MEMORY;
         PRAGMA busy_timeout=5000;",
    )?;
    Ok(())
}

impl Database {
    /// Opens or creates the SQLite database at the given path using a connection pool.
    pub fn new(db_path: &Path) -> Result<Self, StorageError> {
        let manager =
            SqliteConnectionManager::file(db_path).with_init(|conn| apply_connection_pragmas(conn));
        let pool = Pool::builder()
            .max_size(db_pool_size(db_path))
            .build(manager)
            .map_err(pool_error)?;

        let db = Database { pool };
        db.init_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::new(Path::new(IN_MEMORY_PATH))
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.pool.get().map_err(pool_error)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )?;
        Ok(())
    }
}

impl KeyValueStore for Database {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StorageError> {
        let Some(raw) = self.get_raw(key)? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StorageError::Decode {
                key: key.to_string(),
                source,
            })
    }

    fn set(&self, key: &str, value: &serde_json::Value) -> Result<(), StorageError> {
        let raw = serde_json::to_string(value).map_err(|source| StorageError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.put_raw(key, &raw)
    }

    fn update(
        &self,
        key: &str,
        apply: &mut DocumentUpdate<'_>,
    ) -> Result<serde_json::Value, StorageError> {
        let mut written = None;
        self.update_raw(key, &mut |current| {
            let current = current
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .map_err(|source| StorageError::Decode {
                    key: key.to_string(),
                    source,
                })?;
            let value = apply(current)?;
            let raw = serde_json::to_string(&value).map_err(|source| StorageError::Encode {
                key: key.to_string(),
                source,
            })?;
            written = Some(value);
            Ok(raw)
        })?;

        written.ok_or_else(|| StorageError::Unavailable(format!("update of '{}' did not run", key)))
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_missing_key_is_none() {
        let db = Database::open_in_memory().expect("failed to create in-memory db");
        assert!(db.get("generated-images").unwrap().is_none());
    }

    #[test]
    fn test_set_overwrites_previous_value() {
        let db = Database::open_in_memory().expect("failed to create in-memory db");
        db.set("app-settings", &json!({ "apiKeys": ["k1"] }))
            .unwrap();
        db.set("app-settings", &json!({ "apiKeys": ["k2", "k3"] }))
            .unwrap();

        let value = db.get("app-settings").unwrap().unwrap();
        assert_eq!(value, json!({ "apiKeys": ["k2", "k3"] }));
    }

    #[test]
    fn test_values_survive_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("gallery.db");

        {
            let db = Database::new(&db_path).expect("failed to create db");
            db.set("generated-images", &json!([{ "id": "1", "url": "u", "prompt": "p" }]))
                .unwrap();
        }

        let reopened = Database::new(&db_path).expect("failed to reopen db");
        let value = reopened.get("generated-images").unwrap().unwrap();
        assert_eq!(value[0]["prompt"], "p");
    }

    #[test]
    fn test_corrupt_value_reports_decode_error() {
        let db = Database::open_in_memory().expect("failed to create in-memory db");
        db.put_raw("generated-images", "{not json").unwrap();
        assert!(matches!(
            db.get("generated-images"),
            Err(StorageError::Decode { .. })
        ));
    }

    #[test]
    fn test_update_reads_latest_value_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("gallery.db");
        let first = Database::new(&db_path).expect("failed to create db");
        let second = Database::new(&db_path).expect("failed to open second handle");

        for (db, item) in [(&first, "a"), (&second, "b"), (&first, "c")] {
            db.update("generated-images", &mut |current| {
                let mut items = current.unwrap_or_else(|| json!([]));
                if let Some(list) = items.as_array_mut() {
                    list.push(json!(item));
                }
                Ok(items)
            })
            .unwrap();
        }

        assert_eq!(
            second.get("generated-images").unwrap().unwrap(),
            json!(["a", "b", "c"])
        );
    }

    #[test]
    fn test_failed_update_writes_nothing() {
        let db = Database::open_in_memory().expect("failed to create in-memory db");
        db.set("a", &json!(1)).unwrap();
        let result = db.update("a", &mut |_| Err(StorageError::Unavailable("rejected".into())));
        assert!(result.is_err());
        assert_eq!(db.get("a").unwrap(), Some(json!(1)));
    }
}
