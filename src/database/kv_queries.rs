use super::*;

const UPSERT_SQL: &str = "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
     ON CONFLICT(key) DO UPDATE SET
         value=excluded.value,
         updated_at=excluded.updated_at";

fn select_value(conn: &Connection, key: &str) -> SqlResult<Option<String>> {
    conn.query_row(
        "SELECT value FROM kv_store WHERE key = ?1",
        params![key],
        |row| row.get::<_, String>(0),
    )
    .optional()
}

impl Database {
    // ────────────────────────────── Key-value queries ──────────────────────────────

    pub(crate) fn get_raw(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.pool.get().map_err(pool_error)?;
        Ok(select_value(&conn, key)?)
    }

    /// Upserts a document in a single statement so a reader never sees a
    /// half-written collection.
    pub(crate) fn put_raw(&self, key: &str, raw: &str) -> Result<(), StorageError> {
        let conn = self.pool.get().map_err(pool_error)?;
        let now = chrono::Utc::now().timestamp_millis();
        conn.execute(UPSERT_SQL, params![key, raw, now])?;
        Ok(())
    }

    /// Read-modify-write under `BEGIN IMMEDIATE`, so writers in other
    /// connections or processes wait on the busy timeout instead of
    /// overwriting each other. Nothing is written when `apply` fails.
    pub(crate) fn update_raw(
        &self,
        key: &str,
        apply: &mut dyn FnMut(Option<String>) -> Result<String, StorageError>,
    ) -> Result<(), StorageError> {
        let mut conn = self.pool.get().map_err(pool_error)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = select_value(&tx, key)?;
        let updated = apply(current)?;
        let now = chrono::Utc::now().timestamp_millis();
        tx.execute(UPSERT_SQL, params![key, updated, now])?;

        tx.commit()?;
        Ok(())
    }
}
