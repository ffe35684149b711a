use std::collections::HashSet;

/// Ids of the gallery records currently selected for bulk operations.
///
/// Not persisted. Callers prune it whenever records leave the gallery.
#[derive(Debug, Clone, Default)]
pub struct SelectionSet {
    ids: HashSet<String>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flips the selection state of `id` and returns the new state.
    pub fn toggle(&mut self, id: &str) -> bool {
        if self.ids.remove(id) {
            false
        } else {
            self.ids.insert(id.to_string());
            true
        }
    }

    pub fn select_all<I, S>(&mut self, all_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = all_ids.into_iter().map(Into::into).collect();
    }

    pub fn deselect_all(&mut self) {
        self.ids.clear();
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn count(&self) -> usize {
        self.ids.len()
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.ids.remove(id)
    }

    /// Drops any selected id that no longer names an existing record.
    pub fn retain_existing(&mut self, existing_ids: &[String]) {
        let existing: HashSet<&str> = existing_ids.iter().map(String::as_str).collect();
        self.ids.retain(|id| existing.contains(id.as_str()));
    }

    pub fn is_all_selected(&self, all_ids: &[String]) -> bool {
        !all_ids.is_empty() && all_ids.iter().all(|id| self.ids.contains(id))
    }

    /// The "Select All" button: deselects when everything is already
    /// selected, otherwise selects every id. Returns the resulting count.
    pub fn toggle_all(&mut self, all_ids: &[String]) -> usize {
        if self.is_all_selected(all_ids) {
            self.deselect_all();
        } else {
            self.select_all(all_ids.iter().cloned());
        }
        self.count()
    }

    pub fn ids(&self) -> &HashSet<String> {
        &self.ids
    }
}
