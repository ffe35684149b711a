use crate::gallery::GeneratedImageRecord;
use crate::image_data::{
    decode_image_payload, extension_from_mime, is_data_uri, mime_from_image_bytes,
};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name used when the caller does not pick one.
pub const DEFAULT_ARCHIVE_NAME: &str = "pixel-art-pack.zip";
const ARCHIVE_NAME_CHARS: usize = 30;
const DOWNLOAD_NAME_CHARS: usize = 20;
const ENTRY_EXTENSION: &str = "jpeg";
const FETCH_TIMEOUT_SECONDS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("No images selected for export")]
    NothingSelected,
    #[error("Failed to fetch image for prompt \"{prompt}\": {reason}")]
    Fetch { prompt: String, reason: String },
    #[error("ZIP write error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Manifest error: {0}")]
    Manifest(String),
}

/// Resolves an image reference (data URI or URL) to its bytes.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, String>;
}

/// Decodes data URIs in place and downloads http(s) URLs.
pub struct DefaultFetcher {
    client: reqwest::Client,
}

impl DefaultFetcher {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECONDS))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageFetcher for DefaultFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, String> {
        if is_data_uri(url) {
            return decode_image_payload(url)
                .map(|(bytes, _)| bytes)
                .map_err(|error| error.to_string());
        }

        let lowered = url.trim_start().to_ascii_lowercase();
        if !lowered.starts_with("http://") && !lowered.starts_with("https://") {
            return Err("unsupported image reference".to_string());
        }

        let response = self
            .client
            .get(url.trim())
            .send()
            .await
            .map_err(|error| error.to_string())?;
        if !response.status().is_success() {
            return Err(format!("download failed with status {}", response.status()));
        }
        response
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(|error| error.to_string())
    }
}

/// Turns a prompt into a file stem: whitespace runs become `_`, path
/// separators are replaced, and the result is cut to `max_chars` characters.
pub fn sanitize_prompt_stem(prompt: &str, max_chars: usize) -> String {
    let mut sanitized = String::with_capacity(prompt.len());
    let mut in_whitespace = false;
    for ch in prompt.chars() {
        if ch.is_whitespace() {
            if !in_whitespace {
                sanitized.push('_');
            }
            in_whitespace = true;
            continue;
        }
        in_whitespace = false;
        if ch == '/' || ch == '\\' || ch.is_control() {
            sanitized.push('_');
        } else {
            sanitized.push(ch);
        }
    }

    let stem: String = sanitized.chars().take(max_chars).collect();
    if stem.is_empty() {
        "image".to_string()
    } else {
        stem
    }
}

/// Archive entry names for `records`, in order. Repeated stems get `_1`,
/// `_2`, ... appended so no entry overwrites another.
pub fn archive_entry_names(records: &[GeneratedImageRecord]) -> Vec<String> {
    let mut seen_names = HashSet::<String>::new();
    let mut names = Vec::with_capacity(records.len());

    for record in records {
        let stem = sanitize_prompt_stem(&record.prompt, ARCHIVE_NAME_CHARS);
        let mut entry_name = format!("{}.{}", stem, ENTRY_EXTENSION);
        let mut counter = 1u32;
        while seen_names.contains(&entry_name) {
            entry_name = format!("{}_{}.{}", stem, counter, ENTRY_EXTENSION);
            counter += 1;
        }
        seen_names.insert(entry_name.clone());
        names.push(entry_name);
    }

    names
}

#[derive(Debug, Clone)]
pub struct ArchiveOutput {
    pub bytes: Vec<u8>,
    pub entry_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileExportResult {
    pub exported_count: usize,
    pub output_path: String,
    pub total_bytes: u64,
}

/// Builds a ZIP archive with one entry per record.
///
/// Every image is fetched before anything is written; if one fetch fails the
/// whole build fails and no archive is produced.
pub async fn build_archive<F>(
    records: &[GeneratedImageRecord],
    fetcher: &F,
) -> Result<ArchiveOutput, ExportError>
where
    F: ImageFetcher + ?Sized,
{
    if records.is_empty() {
        return Err(ExportError::NothingSelected);
    }

    let mut payloads = Vec::with_capacity(records.len());
    for record in records {
        let bytes = fetcher
            .fetch(&record.url)
            .await
            .map_err(|reason| ExportError::Fetch {
                prompt: record.prompt.clone(),
                reason,
            })?;
        payloads.push(bytes);
    }

    let entry_names = archive_entry_names(records);
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let zip_options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .compression_level(Some(6));

    for (entry_name, bytes) in entry_names.iter().zip(&payloads) {
        zip.start_file(entry_name.as_str(), zip_options)?;
        zip.write_all(bytes)?;
    }

    let bytes = zip.finish()?.into_inner();
    log::info!(
        "Built archive with {} entries ({} bytes)",
        entry_names.len(),
        bytes.len()
    );

    Ok(ArchiveOutput { bytes, entry_names })
}

/// Builds the archive and writes it to `output_path`.
pub async fn write_archive<F>(
    records: &[GeneratedImageRecord],
    fetcher: &F,
    output_path: &Path,
) -> Result<FileExportResult, ExportError>
where
    F: ImageFetcher + ?Sized,
{
    let archive = build_archive(records, fetcher).await?;
    tokio::fs::write(output_path, &archive.bytes).await?;

    Ok(FileExportResult {
        exported_count: archive.entry_names.len(),
        output_path: output_path.to_string_lossy().to_string(),
        total_bytes: archive.bytes.len() as u64,
    })
}

/// Saves a single image into `output_dir` under a short prompt-derived name,
/// never overwriting an existing file. The extension follows the image bytes
/// and defaults to `.jpeg`.
pub async fn download_image<F>(
    record: &GeneratedImageRecord,
    fetcher: &F,
    output_dir: &Path,
) -> Result<PathBuf, ExportError>
where
    F: ImageFetcher + ?Sized,
{
    let bytes = fetcher
        .fetch(&record.url)
        .await
        .map_err(|reason| ExportError::Fetch {
            prompt: record.prompt.clone(),
            reason,
        })?;

    tokio::fs::create_dir_all(output_dir).await?;
    let stem = sanitize_prompt_stem(&record.prompt, DOWNLOAD_NAME_CHARS);
    let extension =
        extension_from_mime(mime_from_image_bytes(&bytes)).unwrap_or(ENTRY_EXTENSION);
    let mut counter = 0usize;
    let output_path = loop {
        let candidate_name = if counter == 0 {
            format!("{}.{}", stem, extension)
        } else {
            format!("{}_{}.{}", stem, counter, extension)
        };
        let candidate = output_dir.join(candidate_name);
        if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            break candidate;
        }
        counter += 1;
    };

    tokio::fs::write(&output_path, &bytes).await?;
    Ok(output_path)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Json,
    Csv,
}

impl std::str::FromStr for ManifestFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ManifestFormat::Json),
            "csv" => Ok(ManifestFormat::Csv),
            _ => Err("Unsupported manifest format. Use 'json' or 'csv'.".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ManifestEntry<'a> {
    id: &'a str,
    filename: String,
    prompt: &'a str,
}

/// Lists the records with the entry names an archive of the same records
/// would use.
pub fn build_manifest(
    records: &[GeneratedImageRecord],
    format: ManifestFormat,
) -> Result<String, ExportError> {
    let entries: Vec<ManifestEntry<'_>> = records
        .iter()
        .zip(archive_entry_names(records))
        .map(|(record, filename)| ManifestEntry {
            id: &record.id,
            filename,
            prompt: &record.prompt,
        })
        .collect();

    match format {
        ManifestFormat::Json => serde_json::to_string_pretty(&entries)
            .map_err(|error| ExportError::Manifest(error.to_string())),
        ManifestFormat::Csv => {
            build_csv_manifest(&entries).map_err(|error| ExportError::Manifest(error.to_string()))
        }
    }
}

fn build_csv_manifest(entries: &[ManifestEntry<'_>]) -> Result<String, csv::Error> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(["id", "filename", "prompt"])?;
    for entry in entries {
        wtr.write_record([entry.id, entry.filename.as_str(), entry.prompt])?;
    }

    let bytes = wtr.into_inner().map_err(|e| e.into_error())?;
    Ok(String::from_utf8(bytes).unwrap_or_default())
}
