use std::path::Path;

/// Number of characters shown in progress messages.
pub const PREVIEW_CHARS: usize = 20;

/// Ordered prompts derived from free-form input, one per non-blank line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobBatch {
    prompts: Vec<String>,
}

impl JobBatch {
    pub fn parse(input: &str) -> Option<Self> {
        Self::from_prompts(input.lines())
    }

    /// Trims each prompt and drops blanks. Returns `None` if nothing remains.
    pub fn from_prompts<I, S>(prompts: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let prompts: Vec<String> = prompts
            .into_iter()
            .map(|prompt| prompt.as_ref().trim().to_string())
            .filter(|prompt| !prompt.is_empty())
            .collect();
        if prompts.is_empty() {
            return None;
        }
        Some(Self { prompts })
    }

    pub fn prompts(&self) -> &[String] {
        &self.prompts
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}

/// First [`PREVIEW_CHARS`] characters of a prompt.
pub fn prompt_preview(prompt: &str) -> String {
    prompt.chars().take(PREVIEW_CHARS).collect()
}

/// Appends imported text to the existing prompt input, on a new line when
/// there is already content.
pub fn append_imported_text(existing: &str, imported: &str) -> String {
    if existing.is_empty() {
        imported.to_string()
    } else {
        format!("{existing}\n{imported}")
    }
}

pub async fn import_prompt_file(existing: &str, path: &Path) -> Result<String, String> {
    let imported = tokio::fs::read_to_string(path)
        .await
        .map_err(|error| format!("Failed to read prompt file {}: {}", path.display(), error))?;
    Ok(append_imported_text(existing, &imported))
}
