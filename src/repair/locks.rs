use crate::error::{MendError, Result};
use fs2::FileExt;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

const LOCK_TIMEOUT_SECS: u64 = 30;
const LOCK_RETRY_MS: u64 = 50;

static PROCESS_LOCKS: Lazy<FileLocks> = Lazy::new(FileLocks::new);

/// One async lock per source file, so two repairs never patch the same file
/// at once. Keys are canonical paths.
///
/// Every acquisition also takes an exclusive advisory lock on a sidecar file
/// next to the target, which keeps other processes out as well. The sidecar
/// is used instead of the target because patches replace the target inode.
#[derive(Debug, Default)]
pub struct FileLocks {
    locks: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

/// Held while a file is being backed up, patched and reloaded.
#[derive(Debug)]
pub struct FileGuard {
    _local: OwnedMutexGuard<()>,
    file: File,
}

impl Drop for FileGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl FileLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The table shared by every healer in this process.
    pub fn global() -> &'static FileLocks {
        &PROCESS_LOCKS
    }

    /// Wait for exclusive access to `path`. Released when the guard drops.
    pub async fn acquire(&self, path: &Path) -> Result<FileGuard> {
        let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        let local = lock.lock_owned().await;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_file_path(&key))?;

        let start = Instant::now();
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => break,
                Err(err) if err.kind() != ErrorKind::WouldBlock => return Err(err.into()),
                Err(_) => {
                    if start.elapsed() >= Duration::from_secs(LOCK_TIMEOUT_SECS) {
                        return Err(MendError::LockTimeout {
                            path: key.display().to_string(),
                            secs: LOCK_TIMEOUT_SECS,
                        });
                    }
                    tokio::time::sleep(Duration::from_millis(LOCK_RETRY_MS)).await;
                }
            }
        }

        Ok(FileGuard { _local: local, file })
    }
}

/// Sidecar used for the advisory lock: `.<name>.lock` beside the file.
pub fn lock_file_path(path: &Path) -> PathBuf {
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    path.with_file_name(format!(".{}.lock", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn script(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, "").unwrap();
        path
    }

    #[tokio::test]
    async fn test_same_file_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let path = script(&dir, "calc.mend");
        let locks = FileLocks::new();

        let guard = locks.acquire(&path).await.unwrap();
        let second = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&path)).await;
        assert!(second.is_err());

        drop(guard);
        let third = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&path)).await;
        assert!(third.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_different_files_do_not_block() {
        let dir = TempDir::new().unwrap();
        let a = script(&dir, "a.mend");
        let b = script(&dir, "b.mend");
        let locks = FileLocks::new();

        let _a = locks.acquire(&a).await.unwrap();
        let other = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&b)).await;
        assert!(other.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_relative_and_canonical_paths_share_a_lock() {
        let dir = TempDir::new().unwrap();
        let path = script(&dir, "calc.mend");
        let dotted = dir.path().join(".").join("calc.mend");
        let locks = FileLocks::new();

        let _guard = locks.acquire(&path).await.unwrap();
        let second = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&dotted)).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_global_table_is_shared() {
        let dir = TempDir::new().unwrap();
        let path = script(&dir, "calc.mend");

        let _guard = FileLocks::global().acquire(&path).await.unwrap();
        let second = tokio::time::timeout(Duration::from_millis(50), FileLocks::global().acquire(&path)).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_advisory_lock_excludes_other_holders() {
        let dir = TempDir::new().unwrap();
        let path = script(&dir, "calc.mend");
        let sidecar = lock_file_path(&path.canonicalize().unwrap());
        assert_eq!(sidecar.file_name().unwrap(), ".calc.mend.lock");

        let guard = FileLocks::new().acquire(&path).await.unwrap();

        // A separate open file description stands in for another process.
        let outsider = File::open(&sidecar).unwrap();
        assert!(FileExt::try_lock_exclusive(&outsider).is_err());

        drop(guard);
        assert!(FileExt::try_lock_exclusive(&outsider).is_ok());
        FileExt::unlock(&outsider).unwrap();
    }

    #[tokio::test]
    async fn test_separate_tables_wait_on_the_advisory_lock() {
        let dir = TempDir::new().unwrap();
        let path = script(&dir, "calc.mend");

        let guard = FileLocks::new().acquire(&path).await.unwrap();
        let other = FileLocks::new();
        let blocked = tokio::time::timeout(Duration::from_millis(200), other.acquire(&path)).await;
        assert!(blocked.is_err());

        drop(guard);
        let after = tokio::time::timeout(Duration::from_millis(500), other.acquire(&path)).await;
        assert!(after.unwrap().is_ok());
    }
}
