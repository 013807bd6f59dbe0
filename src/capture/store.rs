use crate::capture::ExecutionContext;
use crate::error::Result;
use crate::fsutil::{file_safe, timestamp_slug};
use std::fs;
use std::path::{Path, PathBuf};

/// Writes captured contexts as pretty-printed JSON records.
#[derive(Debug, Clone)]
pub struct ExceptionStore {
    folder: PathBuf,
}

impl ExceptionStore {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Save `<folder>/<YYYYmmdd_HHMMSS>_<function>.json`.
    pub fn save(&self, context: &ExecutionContext) -> Result<PathBuf> {
        fs::create_dir_all(&self.folder)?;
        let path = self.folder.join(format!(
            "{}_{}.json",
            timestamp_slug(),
            file_safe(&context.function_info.name)
        ));
        let json = serde_json::to_string_pretty(context)?;
        fs::write(&path, json)?;
        Ok(path)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<ExecutionContext> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
