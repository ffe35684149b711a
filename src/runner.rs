//! Sequential prompt-batch generation.
//!
//! A batch walks its prompts in order, rotating through the credential pool,
//! calling the generator once per prompt and appending each success to the
//! gallery as soon as it arrives. Calls are spaced by a fixed delay to stay
//! under provider rate limits. Invalid-credential and billing failures end
//! the batch; every other failure is reported and the batch moves on.

use crate::credentials::CredentialPool;
use crate::gallery::{GalleryStore, GeneratedImageRecord};
use crate::image_data::{data_uri_from_base64, decode_image_payload};
use crate::imagen_api::{
    GenerationOptions, GenerationRequest, ImageGenerator, ProviderError, ProviderErrorKind,
};
use crate::prompts::{prompt_preview, JobBatch};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub const DEFAULT_STEP_DELAY: Duration = Duration::from_millis(3_000);
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Phrases that mark a failure as fatal for the whole batch when the
/// provider gives no structured error kind.
const FATAL_MESSAGE_MARKERS: [&str; 4] = [
    "Invalid API Key",
    "Billing Required",
    "API key not valid",
    "billed users",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunError {
    #[error("API key is missing. Please add one in Settings.")]
    MissingCredentials,
    #[error("Please enter at least one prompt.")]
    EmptyBatch,
    #[error("A generation batch is already running.")]
    BatchInProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Credential or billing problem: stop the batch and ask for new keys.
    Fatal,
    Recoverable,
}

pub fn classify_failure(error: &ProviderError) -> FailureClass {
    match error.kind {
        ProviderErrorKind::InvalidCredential | ProviderErrorKind::BillingRequired => {
            FailureClass::Fatal
        }
        _ if FATAL_MESSAGE_MARKERS
            .iter()
            .any(|marker| error.message.contains(marker)) =>
        {
            FailureClass::Fatal
        }
        _ => FailureClass::Recoverable,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobProgress {
    pub current: usize,
    pub total: usize,
    pub preview: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Success(GeneratedImageRecord),
    Failure { prompt: String, reason: String },
    Fatal { prompt: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    Progress(JobProgress),
    Outcome(JobOutcome),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Reason of the fatal failure that ended the batch, if any.
    pub fatal: Option<String>,
    pub cancelled: bool,
    pub outcomes: Vec<JobOutcome>,
}

impl BatchSummary {
    fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    fn record(&mut self, outcome: JobOutcome) {
        self.processed += 1;
        match &outcome {
            JobOutcome::Success(_) => self.succeeded += 1,
            JobOutcome::Failure { .. } => self.failed += 1,
            JobOutcome::Fatal { reason, .. } => self.fatal = Some(reason.clone()),
        }
        self.outcomes.push(outcome);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunnerConfig {
    pub step_delay: Duration,
    pub call_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            step_delay: DEFAULT_STEP_DELAY,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// Runs prompt batches one step at a time.
pub struct JobRunner {
    config: RunnerConfig,
    cancel: Arc<AtomicBool>,
}

impl JobRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shares an externally owned cancellation flag.
    pub fn with_cancel_flag(config: RunnerConfig, cancel: Arc<AtomicBool>) -> Self {
        Self { config, cancel }
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Runs one batch to completion, fatal abort, or cancellation.
    ///
    /// `on_event` sees a progress event before every external call and an
    /// outcome event after it. Records appended before an early stop stay in
    /// the gallery.
    pub async fn run<G, F>(
        &self,
        generator: &G,
        prompts: &[String],
        options: GenerationOptions,
        credentials: &[String],
        gallery: &Mutex<GalleryStore>,
        mut on_event: F,
    ) -> Result<BatchSummary, RunError>
    where
        G: ImageGenerator + ?Sized,
        F: FnMut(&RunEvent),
    {
        let pool = CredentialPool::new(credentials.to_vec()).ok_or(RunError::MissingCredentials)?;
        let batch = JobBatch::from_prompts(prompts).ok_or(RunError::EmptyBatch)?;
        let total = batch.len();
        let mut summary = BatchSummary::new(total);

        log::info!(
            "Starting batch of {} prompts with {} credential(s), style {}, ratio {}",
            total,
            pool.len(),
            options.style,
            options.aspect_ratio
        );

        for (index, prompt) in batch.prompts().iter().enumerate() {
            if self.is_cancelled() {
                log::info!("Batch cancelled before prompt {}/{}", index + 1, total);
                summary.cancelled = true;
                break;
            }

            on_event(&RunEvent::Progress(JobProgress {
                current: index + 1,
                total,
                preview: prompt_preview(prompt),
            }));

            let request = GenerationRequest {
                prompt,
                options,
                credential: pool.for_step(index),
            };
            let outcome = match self.call_generator(generator, &request).await {
                Ok(url) => {
                    let record = GeneratedImageRecord::new(url, prompt.clone(), index);
                    gallery.lock().await.append(record.clone());
                    log::info!("Prompt {}/{} succeeded ({})", index + 1, total, record.id);
                    JobOutcome::Success(record)
                }
                Err(error) => match classify_failure(&error) {
                    FailureClass::Fatal => {
                        log::error!(
                            "Prompt {}/{} failed fatally, stopping batch: {}",
                            index + 1,
                            total,
                            error
                        );
                        JobOutcome::Fatal {
                            prompt: prompt.clone(),
                            reason: error.message,
                        }
                    }
                    FailureClass::Recoverable => {
                        log::warn!("Prompt {}/{} failed: {}", index + 1, total, error);
                        JobOutcome::Failure {
                            prompt: prompt.clone(),
                            reason: error.message,
                        }
                    }
                },
            };

            let is_fatal = matches!(outcome, JobOutcome::Fatal { .. });
            on_event(&RunEvent::Outcome(outcome.clone()));
            summary.record(outcome);

            if is_fatal {
                break;
            }
            if index + 1 < total {
                tokio::time::sleep(self.config.step_delay).await;
            }
        }

        log::info!(
            "Batch finished: {}/{} processed, {} succeeded, {} failed{}{}",
            summary.processed,
            summary.total,
            summary.succeeded,
            summary.failed,
            if summary.fatal.is_some() { ", aborted" } else { "" },
            if summary.cancelled { ", cancelled" } else { "" }
        );

        Ok(summary)
    }

    /// Calls the generator under the call timeout and returns the image as a
    /// validated data URI.
    async fn call_generator<G>(
        &self,
        generator: &G,
        request: &GenerationRequest<'_>,
    ) -> Result<String, ProviderError>
    where
        G: ImageGenerator + ?Sized,
    {
        let payload =
            match tokio::time::timeout(self.config.call_timeout, generator.generate(request)).await
            {
                Ok(result) => result?,
                Err(_) => {
                    return Err(ProviderError::new(
                        ProviderErrorKind::Timeout,
                        format!(
                            "No response within {} seconds",
                            self.config.call_timeout.as_secs()
                        ),
                    ))
                }
            };

        let url = data_uri_from_base64(&payload.mime, &payload.base64);
        decode_image_payload(&url).map_err(|error| {
            ProviderError::new(
                ProviderErrorKind::Other,
                format!("Provider returned an unreadable image: {}", error),
            )
        })?;
        Ok(url)
    }
}
