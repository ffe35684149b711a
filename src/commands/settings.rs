// ────────────────────────── Settings ──────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct SettingsView {
    pub key_count: usize,
    pub masked_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SaveSettingsResponse {
    pub notification: Notification,
    /// Generation request to resume now that keys are configured.
    pub resume: Option<PendingBatch>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CredentialCheck {
    pub key: String,
    #[serde(flatten)]
    pub status: CredentialStatus,
}

pub fn get_settings(state: &AppState) -> Result<SettingsView, String> {
    let settings = state.settings.read().map_err(lock_error)?;
    Ok(SettingsView {
        key_count: settings.api_keys.len(),
        masked_keys: settings
            .api_keys
            .iter()
            .map(|key| mask_credential(key))
            .collect(),
    })
}

/// Replaces the credential list with the keys parsed from `raw_keys`.
///
/// A failed write keeps the new keys for this session only. When keys are now
/// present, no batch is running and a request was left pending for lack of
/// keys, that request is handed back for the caller to run.
pub fn save_settings(raw_keys: &str, state: &AppState) -> Result<SaveSettingsResponse, String> {
    let settings = AppSettings {
        api_keys: parse_credentials(raw_keys),
    };

    let notification = match settings.save(state.store.as_ref()) {
        Ok(()) => Notification::success("Settings saved successfully!"),
        Err(error) => {
            log::error!("Failed to persist settings: {}", error);
            Notification::error(format!(
                "Settings apply to this session only, saving failed: {}",
                error
            ))
        }
    };
    log::info!("Saved {} API key(s)", settings.api_keys.len());

    let has_keys = !settings.api_keys.is_empty();
    *state.settings.write().map_err(lock_error)? = settings;

    let resume = if has_keys && !state.generating.load(Ordering::Acquire) {
        state.take_parked_batch().unwrap_or_else(|error| {
            log::warn!("Failed to read parked generation request: {}", error);
            None
        })
    } else {
        None
    };
    if let Some(batch) = &resume {
        log::info!("Resuming parked request of {} prompts", batch.prompts.len());
    }

    Ok(SaveSettingsResponse {
        notification,
        resume,
    })
}

/// Asks the provider whether each configured key is accepted.
pub async fn check_credentials(
    client: &ImagenClient,
    state: &AppState,
) -> Result<Vec<CredentialCheck>, String> {
    let keys = state.settings.read().map_err(lock_error)?.api_keys.clone();
    if keys.is_empty() {
        return Err(RunError::MissingCredentials.to_string());
    }

    let mut checks = Vec::with_capacity(keys.len());
    for key in &keys {
        let status = client.check_credential(key).await;
        if !status.ok {
            log::warn!("Key {} rejected: {}", mask_credential(key), status.message);
        }
        checks.push(CredentialCheck {
            key: mask_credential(key),
            status,
        });
    }
    Ok(checks)
}
