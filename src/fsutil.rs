//! Small filesystem helpers shared by the artifact writers and the patcher.

use crate::error::{MendError, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Second-granularity timestamp used in artifact file names.
pub fn timestamp_slug() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Write `contents` to a temp file next to `path`, then rename it over `path`.
///
/// Readers see either the old file or the new one, never a partial write.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let persist_error = |reason: String| MendError::Persist {
        path: path.display().to_string(),
        reason,
    };

    let mut temp = NamedTempFile::new_in(&dir).map_err(|e| persist_error(e.to_string()))?;
    temp.write_all(contents)
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|e| persist_error(e.to_string()))?;

    // Keep the target's permissions across the rename.
    if let Ok(meta) = fs::metadata(path) {
        let _ = fs::set_permissions(temp.path(), meta.permissions());
    }

    temp.persist(path).map_err(|e| persist_error(e.error.to_string()))?;
    Ok(())
}

/// Make a function name safe to embed in a file name.
pub fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("calc.mend");
        fs::write(&path, "old").unwrap();

        write_atomic(&path, b"new").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");

        let leftovers = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_write_atomic_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("calc.mend");
        assert!(matches!(write_atomic(&path, b"x"), Err(MendError::Persist { .. })));
    }

    #[test]
    fn test_timestamp_and_names() {
        assert_eq!(timestamp_slug().len(), "20240101_120000".len());
        assert_eq!(file_safe("math::div/2"), "math__div_2");
    }
}
