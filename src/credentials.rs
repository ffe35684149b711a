use crate::storage::{self, KeyValueStore, StorageError, SETTINGS_KEY};
use serde::{Deserialize, Serialize};

/// Persisted application settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    #[serde(default)]
    pub api_keys: Vec<String>,
}

impl AppSettings {
    /// Loads the settings document. A missing document means first run.
    pub fn load(store: &dyn KeyValueStore) -> Self {
        match storage::load_document::<AppSettings>(store, SETTINGS_KEY) {
            Ok(Some(settings)) => settings,
            Ok(None) => AppSettings::default(),
            Err(error) => {
                log::warn!("Failed to read settings, using defaults: {}", error);
                AppSettings::default()
            }
        }
    }

    pub fn save(&self, store: &dyn KeyValueStore) -> Result<(), StorageError> {
        storage::save_document(store, SETTINGS_KEY, self)
    }
}

/// Splits free-form key input on runs of line breaks, commas, or spaces.
///
/// Order is preserved and duplicates are kept.
pub fn parse_credentials(raw: &str) -> Vec<String> {
    raw.split(|ch: char| matches!(ch, '\n' | '\r' | ',' | ' '))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Non-empty, ordered list of API credentials rotated round-robin per job.
#[derive(Debug, Clone)]
pub struct CredentialPool {
    keys: Vec<String>,
}

impl CredentialPool {
    /// Returns `None` for an empty list; generation cannot run without a key.
    pub fn new(keys: Vec<String>) -> Option<Self> {
        if keys.is_empty() {
            return None;
        }
        Some(Self { keys })
    }

    /// Credential for job `step`, independent of earlier outcomes.
    pub fn for_step(&self, step: usize) -> &str {
        &self.keys[step % self.keys.len()]
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Masks a key for display, keeping only its last four characters.
pub fn mask_credential(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let visible: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), visible)
}
