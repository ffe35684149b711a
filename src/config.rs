use crate::imagen_api::{DEFAULT_API_BASE, DEFAULT_MODEL};
use crate::runner::{RunnerConfig, DEFAULT_CALL_TIMEOUT, DEFAULT_STEP_DELAY};
use std::path::PathBuf;
use std::time::Duration;

pub const DATA_DIR_ENV: &str = "PROMPT_GALLERY_DATA_DIR";
pub const API_BASE_ENV: &str = "PROMPT_GALLERY_API_BASE";
pub const MODEL_ENV: &str = "PROMPT_GALLERY_MODEL";
pub const STEP_DELAY_ENV: &str = "PROMPT_GALLERY_STEP_DELAY_MS";
pub const CALL_TIMEOUT_ENV: &str = "PROMPT_GALLERY_CALL_TIMEOUT_SECS";

const APP_DIR_NAME: &str = "prompt-gallery";
pub const DB_FILE_NAME: &str = "prompt-gallery.db";

const MAX_STEP_DELAY_MS: u64 = 60_000;
const MIN_CALL_TIMEOUT_SECS: u64 = 5;
const MAX_CALL_TIMEOUT_SECS: u64 = 600;

/// Runtime settings read from the environment at startup.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub data_dir: PathBuf,
    pub api_base: String,
    pub model: String,
    pub step_delay: Duration,
    pub call_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            step_delay: DEFAULT_STEP_DELAY,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source. Unparsable numbers fall
    /// back to defaults; parsed ones are clamped to sane bounds.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let step_delay_ms = non_empty(STEP_DELAY_ENV)
            .and_then(|raw| raw.parse::<u64>().ok())
            .map(|parsed| parsed.min(MAX_STEP_DELAY_MS));
        let call_timeout_secs = non_empty(CALL_TIMEOUT_ENV)
            .and_then(|raw| raw.parse::<u64>().ok())
            .map(|parsed| parsed.clamp(MIN_CALL_TIMEOUT_SECS, MAX_CALL_TIMEOUT_SECS));

        Self {
            data_dir: non_empty(DATA_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            api_base: non_empty(API_BASE_ENV).unwrap_or(defaults.api_base),
            model: non_empty(MODEL_ENV).unwrap_or(defaults.model),
            step_delay: step_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.step_delay),
            call_timeout: call_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.call_timeout),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE_NAME)
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            step_delay: self.step_delay,
            call_timeout: self.call_timeout,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> RuntimeConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        RuntimeConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_without_variables() {
        let config = config_from(&[]);
        assert_eq!(config.step_delay, Duration::from_millis(3_000));
        assert_eq!(config.call_timeout, Duration::from_secs(120));
        assert_eq!(config.model, DEFAULT_MODEL);
        assert!(config.data_dir.ends_with(APP_DIR_NAME));
    }

    #[test]
    fn numeric_values_are_clamped() {
        let config = config_from(&[(STEP_DELAY_ENV, "999999"), (CALL_TIMEOUT_ENV, "1")]);
        assert_eq!(config.step_delay, Duration::from_millis(MAX_STEP_DELAY_MS));
        assert_eq!(config.call_timeout, Duration::from_secs(MIN_CALL_TIMEOUT_SECS));
    }

    #[test]
    fn invalid_or_blank_values_fall_back() {
        let config = config_from(&[
            (STEP_DELAY_ENV, "soon"),
            (MODEL_ENV, "   "),
            (DATA_DIR_ENV, "/tmp/gallery"),
        ]);
        assert_eq!(config.step_delay, DEFAULT_STEP_DELAY);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.db_path(), PathBuf::from("/tmp/gallery").join(DB_FILE_NAME));
    }
}
