use crate::{
    credentials::{mask_credential, parse_credentials, AppSettings},
    export::{self as archive, FileExportResult, ImageFetcher, ManifestFormat},
    imagen_api::{CredentialStatus, GenerationOptions, ImageGenerator, ImagenClient},
    prompts::{self, JobBatch},
    runner::{BatchSummary, JobOutcome, JobRunner, RunError, RunEvent},
    AppState, PendingBatch,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Success,
    Info,
    Error,
}

/// User-facing message produced by a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

impl Notification {
    fn success(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Success,
            message: message.into(),
        }
    }

    fn info(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Info,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Error,
            message: message.into(),
        }
    }
}

fn lock_error<T>(_: T) -> String {
    "Application state lock poisoned".to_string()
}

/// Error notification for a gallery change that did not reach storage.
fn gallery_storage_notification(
    gallery: &mut crate::gallery::GalleryStore,
) -> Option<Notification> {
    gallery.take_storage_error().map(Notification::error)
}

include!("commands/settings.rs");

include!("commands/generate.rs");

include!("commands/gallery.rs");

include!("commands/export.rs");
