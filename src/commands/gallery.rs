// ────────────────────────── Gallery & selection ──────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct GalleryImage {
    pub id: String,
    pub prompt: String,
    pub selected: bool,
}

pub async fn list_images(state: &AppState) -> Result<Vec<GalleryImage>, String> {
    let mut gallery = state.gallery.lock().await;
    gallery.refresh();
    let selection = state.selection.lock().map_err(lock_error)?;
    Ok(gallery
        .all()
        .iter()
        .map(|record| GalleryImage {
            id: record.id.clone(),
            prompt: record.prompt.clone(),
            selected: selection.is_selected(&record.id),
        })
        .collect())
}

/// Removes one record and drops it from the selection. Unknown ids change
/// nothing.
pub async fn delete_image(id: &str, state: &AppState) -> Result<Notification, String> {
    let (removed, storage_failure) = {
        let mut gallery = state.gallery.lock().await;
        let removed = gallery.remove_by_id(id);
        (removed, gallery_storage_notification(&mut gallery))
    };
    state.selection.lock().map_err(lock_error)?.remove(id);

    if let Some(notification) = storage_failure {
        return Ok(notification);
    }
    if removed {
        log::info!("Deleted image {}", id);
        Ok(Notification::info("Image deleted."))
    } else {
        Ok(Notification::info("Image was already removed."))
    }
}

pub async fn clear_gallery(state: &AppState) -> Result<Notification, String> {
    let (removed, storage_failure) = {
        let mut gallery = state.gallery.lock().await;
        let removed = gallery.clear();
        (removed, gallery_storage_notification(&mut gallery))
    };
    state.selection.lock().map_err(lock_error)?.deselect_all();

    if let Some(notification) = storage_failure {
        return Ok(notification);
    }

    if removed == 0 {
        return Ok(Notification::info("Gallery is already empty."));
    }
    log::info!("Cleared {} images from the gallery", removed);
    Ok(Notification::success("Gallery cleared."))
}

/// Flips selection of an existing record and returns its new state.
pub async fn toggle_select(id: &str, state: &AppState) -> Result<bool, String> {
    if state.gallery.lock().await.get(id).is_none() {
        return Err(format!("Image not found: {}", id));
    }
    Ok(state.selection.lock().map_err(lock_error)?.toggle(id))
}

/// Selects every record, or clears the selection when all are selected.
/// Returns the number selected afterwards.
pub async fn toggle_select_all(state: &AppState) -> Result<usize, String> {
    let all_ids = state.gallery.lock().await.ids();
    let mut selection = state.selection.lock().map_err(lock_error)?;
    selection.retain_existing(&all_ids);
    Ok(selection.toggle_all(&all_ids))
}

pub fn deselect_all(state: &AppState) -> Result<(), String> {
    state.selection.lock().map_err(lock_error)?.deselect_all();
    Ok(())
}

/// Selected ids in gallery order.
pub async fn selected_ids(state: &AppState) -> Result<Vec<String>, String> {
    let all_ids = state.gallery.lock().await.ids();
    let selection = state.selection.lock().map_err(lock_error)?;
    Ok(all_ids
        .into_iter()
        .filter(|id| selection.is_selected(id))
        .collect())
}
