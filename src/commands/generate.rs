// ────────────────────────── Generation ──────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct GenerateResponse {
    pub summary: Option<BatchSummary>,
    pub notifications: Vec<Notification>,
    /// Credentials are missing or were rejected; the caller should open the
    /// key settings.
    pub settings_required: bool,
}

impl GenerateResponse {
    fn rejected(notification: Notification, settings_required: bool) -> Self {
        Self {
            summary: None,
            notifications: vec![notification],
            settings_required,
        }
    }
}

/// Runs one batch over the non-blank lines of `prompt_input`.
///
/// Only one batch runs at a time. Missing keys park the request in the store
/// so that saving keys, in this run or a later one, can resume it.
pub async fn generate_images<G, F>(
    state: &AppState,
    generator: &G,
    prompt_input: &str,
    options: GenerationOptions,
    on_event: F,
) -> Result<GenerateResponse, String>
where
    G: ImageGenerator + ?Sized,
    F: FnMut(&RunEvent),
{
    let batch = JobBatch::parse(prompt_input);
    let api_keys = state.settings.read().map_err(lock_error)?.api_keys.clone();

    if api_keys.is_empty() {
        if let Some(batch) = &batch {
            let parked = PendingBatch {
                prompts: batch.prompts().to_vec(),
                options,
            };
            if let Err(error) = state.park_batch(parked) {
                log::warn!("Failed to park generation request: {}", error);
            }
        }
        return Ok(GenerateResponse::rejected(
            Notification::error(RunError::MissingCredentials.to_string()),
            true,
        ));
    }

    let Some(batch) = batch else {
        return Ok(GenerateResponse::rejected(
            Notification::error(RunError::EmptyBatch.to_string()),
            false,
        ));
    };

    if state
        .generating
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return Err(RunError::BatchInProgress.to_string());
    }

    struct RunningGuard {
        flag: std::sync::Arc<std::sync::atomic::AtomicBool>,
    }

    impl Drop for RunningGuard {
        fn drop(&mut self) {
            self.flag.store(false, Ordering::Release);
        }
    }

    let _running_guard = RunningGuard {
        flag: state.generating.clone(),
    };

    state.cancel.store(false, Ordering::Release);
    let runner = JobRunner::with_cancel_flag(state.config.runner_config(), state.cancel.clone());
    let summary = runner
        .run(
            generator,
            batch.prompts(),
            options,
            &api_keys,
            &state.gallery,
            on_event,
        )
        .await
        .map_err(|error| error.to_string())?;

    let mut notifications: Vec<Notification> = summary
        .outcomes
        .iter()
        .filter_map(|outcome| match outcome {
            JobOutcome::Success(_) => None,
            JobOutcome::Failure { prompt, reason } | JobOutcome::Fatal { prompt, reason } => Some(
                Notification::error(format!(
                    "Failed on prompt: \"{}\". Error: {}",
                    prompt, reason
                )),
            ),
        })
        .collect();
    let storage_failure = gallery_storage_notification(&mut *state.gallery.lock().await);
    notifications.extend(storage_failure);
    if summary.cancelled {
        notifications.push(Notification::info(format!(
            "Generation cancelled after {} of {} prompts.",
            summary.processed, summary.total
        )));
    }

    let settings_required = summary.fatal.is_some();
    Ok(GenerateResponse {
        summary: Some(summary),
        notifications,
        settings_required,
    })
}

/// Requests the running batch to stop before its next call. Returns whether
/// a batch was running.
pub fn cancel_generation(state: &AppState) -> bool {
    let running = state.generating.load(Ordering::Acquire);
    if running {
        state.cancel.store(true, Ordering::Release);
        log::info!("Cancellation requested for running batch");
    }
    running
}

pub fn is_generating(state: &AppState) -> bool {
    state.generating.load(Ordering::Acquire)
}

/// Appends a text file's contents to the prompt input.
pub async fn import_prompts(existing: &str, path: &Path) -> Result<String, String> {
    prompts::import_prompt_file(existing, path).await
}
