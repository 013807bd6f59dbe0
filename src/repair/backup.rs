use crate::error::{MendError, Result};
use crate::fsutil::{timestamp_slug, write_atomic};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Verbatim copies of source files taken before they are patched.
#[derive(Debug, Clone)]
pub struct BackupManager {
    folder: PathBuf,
}

impl BackupManager {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Copy `original` to `<folder>/<stem>.<YYYYmmdd_HHMMSS>.<ext>`.
    ///
    /// Two backups of the same file within one second share a name; the later
    /// one wins.
    pub fn backup(&self, original: &Path) -> Result<PathBuf> {
        let stem = original
            .file_stem()
            .ok_or_else(|| MendError::Configuration(format!("invalid file path: {}", original.display())))?
            .to_string_lossy();

        let name = match original.extension() {
            Some(ext) => format!("{}.{}.{}", stem, timestamp_slug(), ext.to_string_lossy()),
            None => format!("{}.{}", stem, timestamp_slug()),
        };

        fs::create_dir_all(&self.folder)?;
        let backup_path = self.folder.join(name);
        fs::copy(original, &backup_path)?;

        info!(file = %original.display(), backup = %backup_path.display(), "Created backup");
        Ok(backup_path)
    }

    /// Write a backup's content back over `target`.
    pub fn restore(backup: &Path, target: &Path) -> Result<()> {
        let content = fs::read(backup)?;
        write_atomic(target, &content)?;
        info!(backup = %backup.display(), file = %target.display(), "Restored backup");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_backup_and_restore_round_trip() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("calc.mend");
        let original = "@heal\nfn divide(a, b) {\n    return a / b;\n}\n";
        fs::write(&source, original).unwrap();

        let manager = BackupManager::new(dir.path().join("backups"));
        let backup = manager.backup(&source).unwrap();

        let name = backup.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("calc."));
        assert!(name.ends_with(".mend"));
        assert_eq!(fs::read_to_string(&backup).unwrap(), original);

        fs::write(&source, "fn divide(a, b) { return 0; }").unwrap();
        BackupManager::restore(&backup, &source).unwrap();
        assert_eq!(fs::read_to_string(&source).unwrap(), original);
    }

    #[test]
    fn test_backup_of_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let manager = BackupManager::new(dir.path().join("backups"));
        assert!(manager.backup(&dir.path().join("nope.mend")).is_err());
    }
}
