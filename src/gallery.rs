use crate::storage::{self, KeyValueStore, GALLERY_KEY};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// One generated image kept in the gallery.
///
/// Records are never edited in place; the gallery only appends or removes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImageRecord {
    pub id: String,
    /// `data:` URI of the image payload.
    pub url: String,
    pub prompt: String,
}

impl GeneratedImageRecord {
    /// Creates a record with a fresh id. `step` disambiguates records created
    /// in the same millisecond; the random suffix covers separate batches.
    pub fn new(url: String, prompt: String, step: usize) -> Self {
        Self {
            id: new_record_id(step),
            url,
            prompt,
        }
    }
}

fn new_record_id(step: usize) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", millis, step, &suffix[..8])
}

/// Ordered, append-only collection of records persisted under a fixed key.
///
/// Every mutation is applied to the stored collection in one atomic
/// read-modify-write, so changes made by other processes sharing the store
/// are kept. A failed write is logged, the change is applied in memory only,
/// and the error is held for the caller to report.
pub struct GalleryStore {
    store: Arc<dyn KeyValueStore>,
    records: Vec<GeneratedImageRecord>,
    storage_error: Option<String>,
    /// The cached records hold changes the store never received.
    unsaved: bool,
}

impl GalleryStore {
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let (records, storage_error) =
            match storage::load_document::<Vec<GeneratedImageRecord>>(store.as_ref(), GALLERY_KEY) {
                Ok(Some(records)) => (records, None),
                Ok(None) => (Vec::new(), None),
                Err(error) => {
                    log::warn!(
                        "Gallery could not be read from {} storage, starting empty: {}",
                        store.backend_name(),
                        error
                    );
                    (
                        Vec::new(),
                        Some(format!("Saved gallery could not be read: {}", error)),
                    )
                }
            };

        log::info!(
            "Loaded {} gallery records from {} storage",
            records.len(),
            store.backend_name()
        );

        Self {
            store,
            records,
            storage_error,
            unsaved: false,
        }
    }

    pub fn append(&mut self, record: GeneratedImageRecord) {
        self.mutate(|records| records.push(record.clone()));
    }

    /// Removes the record with the given id. Unknown ids are a no-op.
    pub fn remove_by_id(&mut self, id: &str) -> bool {
        let mut removed = false;
        self.mutate(|records| {
            let before = records.len();
            records.retain(|record| record.id != id);
            removed = records.len() < before;
        });
        removed
    }

    pub fn clear(&mut self) -> usize {
        let mut removed = 0;
        self.mutate(|records| {
            removed = records.len();
            records.clear();
        });
        removed
    }

    /// Re-reads the stored collection to pick up changes made elsewhere.
    /// Skipped while the cache holds changes that could not be saved.
    pub fn refresh(&mut self) {
        if self.unsaved {
            return;
        }
        match storage::load_document::<Vec<GeneratedImageRecord>>(self.store.as_ref(), GALLERY_KEY)
        {
            Ok(records) => self.records = records.unwrap_or_default(),
            Err(error) => {
                log::warn!("Gallery refresh failed, keeping cached records: {}", error);
                self.storage_error = Some(format!("Saved gallery could not be read: {}", error));
            }
        }
    }

    pub fn all(&self) -> &[GeneratedImageRecord] {
        &self.records
    }

    pub fn get(&self, id: &str) -> Option<&GeneratedImageRecord> {
        self.records.iter().find(|record| record.id == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.records.iter().map(|record| record.id.clone()).collect()
    }

    /// Records whose ids are in `ids`, in gallery order.
    pub fn records_for(&self, ids: &HashSet<String>) -> Vec<GeneratedImageRecord> {
        self.records
            .iter()
            .filter(|record| ids.contains(&record.id))
            .cloned()
            .collect()
    }

    /// Returns and clears the last storage failure, if any.
    pub fn take_storage_error(&mut self) -> Option<String> {
        self.storage_error.take()
    }

    /// Runs `apply` against the stored collection, falling back to the cached
    /// one when storage fails. `apply` may run twice; it must derive its
    /// outputs from the collection it is given.
    fn mutate<F>(&mut self, mut apply: F)
    where
        F: FnMut(&mut Vec<GeneratedImageRecord>),
    {
        match storage::update_document(self.store.as_ref(), GALLERY_KEY, &mut apply) {
            Ok(records) => {
                self.records = records;
                self.unsaved = false;
            }
            Err(error) => {
                apply(&mut self.records);
                self.unsaved = true;
                log::error!(
                    "Failed to persist {} gallery records to {} storage; keeping them in memory: {}",
                    self.records.len(),
                    self.store.backend_name(),
                    error
                );
                self.storage_error = Some(format!(
                    "Gallery changes could not be saved and will be lost on exit: {}",
                    error
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DocumentUpdate, MemoryStore, StorageError};

    struct FailingStore;

    impl KeyValueStore for FailingStore {
        fn get(&self, _key: &str) -> Result<Option<serde_json::Value>, StorageError> {
            Err(StorageError::Unavailable("disk gone".into()))
        }

        fn set(&self, _key: &str, _value: &serde_json::Value) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("disk gone".into()))
        }

        fn update(
            &self,
            _key: &str,
            _apply: &mut DocumentUpdate<'_>,
        ) -> Result<serde_json::Value, StorageError> {
            Err(StorageError::Unavailable("disk gone".into()))
        }

        fn backend_name(&self) -> &'static str {
            "failing"
        }
    }

    fn record(id: &str, prompt: &str) -> GeneratedImageRecord {
        GeneratedImageRecord {
            id: id.to_string(),
            url: format!("data:image/jpeg;base64,{id}"),
            prompt: prompt.to_string(),
        }
    }

    #[test]
    fn absent_key_starts_empty() {
        let mut gallery = GalleryStore::load(Arc::new(MemoryStore::new()));
        assert!(gallery.is_empty());
        assert!(gallery.take_storage_error().is_none());
    }

    #[test]
    fn append_keeps_prior_records_in_order() {
        let mut gallery = GalleryStore::load(Arc::new(MemoryStore::new()));
        gallery.append(record("1", "a cat"));
        gallery.append(record("2", "a dog"));
        gallery.append(record("3", "a bird"));

        let prompts: Vec<_> = gallery.all().iter().map(|r| r.prompt.as_str()).collect();
        assert_eq!(prompts, vec!["a cat", "a dog", "a bird"]);
    }

    #[test]
    fn reload_round_trips_records_in_order() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut gallery = GalleryStore::load(store.clone());
        for i in 0..5 {
            gallery.append(record(&i.to_string(), &format!("prompt {i}")));
        }

        let reloaded = GalleryStore::load(store);
        assert_eq!(reloaded.all(), gallery.all());
    }

    #[test]
    fn remove_by_id_persists_and_ignores_unknown_ids() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut gallery = GalleryStore::load(store.clone());
        gallery.append(record("1", "a"));
        gallery.append(record("2", "b"));

        assert!(gallery.remove_by_id("1"));
        assert!(!gallery.remove_by_id("missing"));
        assert_eq!(gallery.ids(), vec!["2".to_string()]);

        let reloaded = GalleryStore::load(store);
        assert_eq!(reloaded.ids(), vec!["2".to_string()]);
    }

    #[test]
    fn clear_empties_persisted_collection() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut gallery = GalleryStore::load(store.clone());
        gallery.append(record("1", "a"));
        assert_eq!(gallery.clear(), 1);
        assert!(GalleryStore::load(store).is_empty());
    }

    #[test]
    fn records_for_follows_gallery_order() {
        let mut gallery = GalleryStore::load(Arc::new(MemoryStore::new()));
        gallery.append(record("1", "a"));
        gallery.append(record("2", "b"));
        gallery.append(record("3", "c"));

        let wanted: HashSet<String> = ["3".to_string(), "1".to_string()].into_iter().collect();
        let ids: Vec<_> = gallery
            .records_for(&wanted)
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["1", "3"]);
    }

    #[test]
    fn unavailable_storage_degrades_to_memory() {
        let mut gallery = GalleryStore::load(Arc::new(FailingStore));
        assert!(gallery
            .take_storage_error()
            .unwrap()
            .contains("could not be read"));

        gallery.append(record("1", "still works"));
        gallery.refresh();
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery.get("1").unwrap().prompt, "still works");
        assert!(gallery
            .take_storage_error()
            .unwrap()
            .contains("could not be saved"));

        assert!(gallery.remove_by_id("1"));
        assert!(gallery.is_empty());
        assert!(gallery.take_storage_error().is_some());
        assert!(gallery.take_storage_error().is_none());
    }

    #[test]
    fn two_handles_on_one_store_keep_each_others_changes() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut first = GalleryStore::load(store.clone());
        let mut second = GalleryStore::load(store.clone());

        first.append(record("1", "from first"));
        second.append(record("2", "from second"));
        first.append(record("3", "first again"));
        assert_eq!(first.ids(), vec!["1", "2", "3"]);

        assert!(second.remove_by_id("1"));
        first.append(record("4", "after delete"));
        assert_eq!(first.ids(), vec!["2", "3", "4"]);

        second.refresh();
        assert_eq!(second.ids(), first.ids());
        assert_eq!(GalleryStore::load(store).ids(), vec!["2", "3", "4"]);
    }

    #[test]
    fn record_ids_are_unique_within_a_burst() {
        let ids: HashSet<String> = (0..200)
            .map(|step| GeneratedImageRecord::new(String::new(), String::new(), step % 2).id)
            .collect();
        assert_eq!(ids.len(), 200);
    }
}
