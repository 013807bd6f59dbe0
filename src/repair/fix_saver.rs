use crate::capture::ExecutionContext;
use crate::error::Result;
use crate::fsutil::{file_safe, timestamp_slug};
use std::fs;
use std::path::{Path, PathBuf};

/// Folder created next to a source file when no fixes folder is configured.
pub const DEFAULT_FIXES_DIR: &str = "_mend_fixes";

/// Keeps every accepted (and optionally rejected) candidate as a `.mend` file
/// with a provenance header.
#[derive(Debug, Clone, Default)]
pub struct FixSaver {
    folder: Option<PathBuf>,
}

impl FixSaver {
    pub fn new(folder: Option<PathBuf>) -> Self {
        Self { folder }
    }

    fn folder_for(&self, context: &ExecutionContext) -> PathBuf {
        if let Some(folder) = &self.folder {
            return folder.clone();
        }
        context
            .function_info
            .file_path
            .as_deref()
            .and_then(Path::parent)
            .map(|dir| dir.join(DEFAULT_FIXES_DIR))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_FIXES_DIR))
    }

    pub fn save_accepted(&self, context: &ExecutionContext, code: &str) -> Result<PathBuf> {
        self.save(context, code, "fix", None)
    }

    pub fn save_rejected(&self, context: &ExecutionContext, code: &str, reason: &str) -> Result<PathBuf> {
        self.save(context, code, "rejected", Some(reason))
    }

    fn save(&self, context: &ExecutionContext, code: &str, suffix: &str, rejection: Option<&str>) -> Result<PathBuf> {
        let folder = self.folder_for(context);
        fs::create_dir_all(&folder)?;

        let path = folder.join(format!(
            "{}_{}_{}.mend",
            timestamp_slug(),
            file_safe(&context.function_info.name),
            suffix
        ));

        let mut text = provenance_header(context);
        if let Some(reason) = rejection {
            text.push_str(&format!("# Rejected: {}\n", reason));
        }
        text.push('\n');
        text.push_str(code);
        if !code.ends_with('\n') {
            text.push('\n');
        }

        fs::write(&path, text)?;
        Ok(path)
    }
}

fn provenance_header(context: &ExecutionContext) -> String {
    let info = &context.function_info;
    let file = info
        .file_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| format!("<memory:{}>", info.module));

    let mut header = format!(
        "# Fix generated by mend on {}\n# Original file: {}\n# Function: {}\n# Error: {}: {}\n",
        context.timestamp.format("%Y-%m-%d %H:%M:%S"),
        file,
        info.qualified_name,
        context.error.kind,
        context.error.message,
    );
    if let Some(hint) = &context.ai_hint {
        header.push_str(&format!("# Hint: {}\n", hint));
    }
    header
}
