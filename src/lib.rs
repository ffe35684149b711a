pub mod config;
pub mod credentials;
pub mod database;
pub mod export;
pub mod gallery;
pub mod image_data;
pub mod imagen_api;
pub mod prompts;
pub mod runner;
pub mod selection;
pub mod storage;

mod commands;

pub use commands::{
    cancel_generation, check_credentials, clear_gallery, delete_image, deselect_all,
    download_image, download_selected, export_manifest, generate_images, get_settings,
    import_prompts, is_generating, list_images, save_settings, selected_ids, toggle_select,
    toggle_select_all, CredentialCheck, GalleryImage, GenerateResponse, Notification,
    NotificationLevel, SaveSettingsResponse, SettingsView,
};

use config::RuntimeConfig;
use credentials::AppSettings;
use database::Database;
use gallery::GalleryStore;
use imagen_api::GenerationOptions;
use selection::SelectionSet;
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, RwLock};
use storage::{KeyValueStore, MemoryStore, StorageError, PENDING_BATCH_KEY};

/// A generation request that could not start because no API key was set.
/// It is stored so that saving keys, possibly in a later run, hands it back
/// to be resumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingBatch {
    pub prompts: Vec<String>,
    pub options: GenerationOptions,
}

/// Shared application state for command functions.
pub struct AppState {
    pub store: Arc<dyn KeyValueStore>,
    pub gallery: tokio::sync::Mutex<GalleryStore>,
    pub selection: Mutex<SelectionSet>,
    pub settings: RwLock<AppSettings>,
    pub generating: Arc<AtomicBool>,
    pub cancel: Arc<AtomicBool>,
    pub config: RuntimeConfig,
}

impl AppState {
    pub fn new(store: Arc<dyn KeyValueStore>, config: RuntimeConfig) -> Self {
        let settings = AppSettings::load(store.as_ref());
        let gallery = GalleryStore::load(store.clone());

        Self {
            store,
            gallery: tokio::sync::Mutex::new(gallery),
            selection: Mutex::new(SelectionSet::new()),
            settings: RwLock::new(settings),
            generating: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    /// Opens the on-disk store under the configured data directory.
    pub fn open(config: RuntimeConfig) -> Self {
        let store = open_store(&config);
        Self::new(store, config)
    }

    /// Stores `batch` as the request to resume once keys are saved,
    /// replacing any earlier one.
    pub fn park_batch(&self, batch: PendingBatch) -> Result<(), StorageError> {
        storage::save_document(self.store.as_ref(), PENDING_BATCH_KEY, &Some(batch))
    }

    /// Removes and returns the parked request, if any.
    pub fn take_parked_batch(&self) -> Result<Option<PendingBatch>, StorageError> {
        let mut taken = None;
        storage::update_document(
            self.store.as_ref(),
            PENDING_BATCH_KEY,
            |parked: &mut Option<PendingBatch>| taken = parked.take(),
        )?;
        Ok(taken)
    }
}

/// Opens the SQLite store under the configured data directory, falling back
/// to an in-memory store when the directory or database cannot be used.
/// Nothing written in the fallback survives the process.
pub fn open_store(config: &RuntimeConfig) -> Arc<dyn KeyValueStore> {
    let data_dir = &config.data_dir;
    if let Err(error) = std::fs::create_dir_all(data_dir) {
        log::warn!(
            "Failed to create data directory {}, storage is not persistent: {}",
            data_dir.display(),
            error
        );
        return Arc::new(MemoryStore::new());
    }

    let db_path = config.db_path();
    match Database::new(&db_path) {
        Ok(db) => {
            log::info!("Using gallery database at {}", db_path.display());
            Arc::new(db)
        }
        Err(error) => {
            log::warn!(
                "Failed to open database {}, storage is not persistent: {}",
                db_path.display(),
                error
            );
            Arc::new(MemoryStore::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gallery::GeneratedImageRecord;

    fn config_in(dir: &std::path::Path) -> RuntimeConfig {
        RuntimeConfig {
            data_dir: dir.to_path_buf(),
            ..RuntimeConfig::default()
        }
    }

    #[test]
    fn open_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&config_in(dir.path()));
        assert_eq!(store.backend_name(), "sqlite");
        store
            .set("app-settings", &serde_json::json!({ "apiKeys": ["k1"] }))
            .unwrap();
        drop(store);

        let state = AppState::open(config_in(dir.path()));
        assert_eq!(state.settings.read().unwrap().api_keys, vec!["k1"]);
    }

    #[test]
    fn open_store_falls_back_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let store = open_store(&config_in(&blocker));
        assert_eq!(store.backend_name(), "memory");
    }

    #[tokio::test]
    async fn states_sharing_a_directory_do_not_lose_appends() {
        let dir = tempfile::tempdir().unwrap();
        let first = AppState::open(config_in(dir.path()));
        let second = AppState::open(config_in(dir.path()));

        let url = "data:image/jpeg;base64,/9j/4A==".to_string();
        first
            .gallery
            .lock()
            .await
            .append(GeneratedImageRecord::new(url.clone(), "from first".into(), 0));
        second
            .gallery
            .lock()
            .await
            .append(GeneratedImageRecord::new(url, "from second".into(), 0));

        let reopened = AppState::open(config_in(dir.path()));
        let gallery = reopened.gallery.lock().await;
        let prompts: Vec<_> = gallery.all().iter().map(|r| r.prompt.as_str()).collect();
        assert_eq!(prompts, vec!["from first", "from second"]);
    }

    #[test]
    fn parked_batch_is_taken_once() {
        let state = AppState::new(Arc::new(MemoryStore::new()), RuntimeConfig::default());
        assert_eq!(state.take_parked_batch().unwrap(), None);

        let batch = PendingBatch {
            prompts: vec!["a cat".into()],
            options: GenerationOptions::default(),
        };
        state.park_batch(batch.clone()).unwrap();
        assert_eq!(state.take_parked_batch().unwrap(), Some(batch));
        assert_eq!(state.take_parked_batch().unwrap(), None);
    }
}
