// ────────────────────────── Export ──────────────────────────

async fn selected_records(
    state: &AppState,
) -> Result<Vec<crate::gallery::GeneratedImageRecord>, String> {
    let mut gallery = state.gallery.lock().await;
    gallery.refresh();
    let ids = state.selection.lock().map_err(lock_error)?.ids().clone();
    let records = gallery.records_for(&ids);
    if records.is_empty() {
        return Err("No images selected.".to_string());
    }
    Ok(records)
}

/// Writes the selected images into one ZIP archive, in gallery order.
/// Nothing is written when any image cannot be fetched.
pub async fn download_selected<F>(
    output_path: Option<&Path>,
    fetcher: &F,
    state: &AppState,
) -> Result<FileExportResult, String>
where
    F: ImageFetcher + ?Sized,
{
    let records = selected_records(state).await?;
    let output_path = output_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(archive::DEFAULT_ARCHIVE_NAME));

    log::info!(
        "Downloading {} images to {}",
        records.len(),
        output_path.display()
    );
    archive::write_archive(&records, fetcher, &output_path)
        .await
        .map_err(|error| error.to_string())
}

/// Saves one image into `output_dir`.
pub async fn download_image<F>(
    id: &str,
    output_dir: &Path,
    fetcher: &F,
    state: &AppState,
) -> Result<PathBuf, String>
where
    F: ImageFetcher + ?Sized,
{
    let record = state
        .gallery
        .lock()
        .await
        .get(id)
        .cloned()
        .ok_or_else(|| format!("Image not found: {}", id))?;

    archive::download_image(&record, fetcher, output_dir)
        .await
        .map_err(|error| error.to_string())
}

/// Writes an id/filename/prompt listing of the selected images.
pub async fn export_manifest(
    format: &str,
    output_path: &Path,
    state: &AppState,
) -> Result<FileExportResult, String> {
    let format: ManifestFormat = format.parse()?;
    let records = selected_records(state).await?;
    let content = archive::build_manifest(&records, format).map_err(|e| e.to_string())?;

    tokio::fs::write(output_path, &content)
        .await
        .map_err(|e| e.to_string())?;

    Ok(FileExportResult {
        exported_count: records.len(),
        output_path: output_path.to_string_lossy().to_string(),
        total_bytes: content.len() as u64,
    })
}

#[cfg(test)]
mod export_tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::gallery::GeneratedImageRecord;
    use crate::image_data::data_uri_from_bytes;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct DataUriFetcher;

    #[async_trait]
    impl ImageFetcher for DataUriFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, String> {
            crate::image_data::decode_image_payload(url)
                .map(|(bytes, _)| bytes)
                .map_err(|error| error.to_string())
        }
    }

    async fn state_with(prompts: &[&str]) -> (AppState, Vec<String>) {
        let state = AppState::new(Arc::new(MemoryStore::new()), RuntimeConfig::default());
        let mut ids = Vec::new();
        let mut gallery = state.gallery.lock().await;
        for (step, prompt) in prompts.iter().enumerate() {
            let record = GeneratedImageRecord::new(
                data_uri_from_bytes("image/jpeg", prompt.as_bytes()),
                prompt.to_string(),
                step,
            );
            ids.push(record.id.clone());
            gallery.append(record);
        }
        drop(gallery);
        (state, ids)
    }

    #[tokio::test]
    async fn archive_requires_a_selection() {
        let (state, _) = state_with(&["a cat"]).await;
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("pack.zip");

        let error = download_selected(Some(&output), &DataUriFetcher, &state)
            .await
            .unwrap_err();
        assert_eq!(error, "No images selected.");
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn archive_holds_selected_records_only() {
        let (state, ids) = state_with(&["a cat", "a dog", "a cat"]).await;
        toggle_select(&ids[0], &state).await.unwrap();
        toggle_select(&ids[2], &state).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("pack.zip");

        let result = download_selected(Some(&output), &DataUriFetcher, &state)
            .await
            .unwrap();
        assert_eq!(result.exported_count, 2);

        let file = std::fs::File::open(&output).unwrap();
        let mut zip = zip::ZipArchive::new(file).unwrap();
        let names: Vec<String> = (0..zip.len())
            .map(|index| zip.by_index(index).unwrap().name().to_string())
            .collect();
        assert_eq!(names, vec!["a_cat.jpeg", "a_cat_1.jpeg"]);
    }

    #[tokio::test]
    async fn single_download_and_manifest() {
        let (state, ids) = state_with(&["a robot DJ"]).await;
        let dir = tempfile::tempdir().unwrap();

        let path = download_image(&ids[0], dir.path(), &DataUriFetcher, &state)
            .await
            .unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"a robot DJ");
        assert!(download_image("missing", dir.path(), &DataUriFetcher, &state)
            .await
            .is_err());

        toggle_select_all(&state).await.unwrap();
        let manifest = dir.path().join("manifest.csv");
        let result = export_manifest("csv", &manifest, &state).await.unwrap();
        assert_eq!(result.exported_count, 1);
        let content = std::fs::read_to_string(&manifest).unwrap();
        assert!(content.contains("a_robot_DJ.jpeg"));

        assert!(export_manifest("yaml", &manifest, &state).await.is_err());
    }
}
