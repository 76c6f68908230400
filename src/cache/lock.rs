//! Advisory lock on the cache directory.
//!
//! The lock is the file `builder.lockfile` inside the cache directory. Its
//! presence means another build owns the cache; there is no staleness
//! detection, so after a crash a human has to remove it. While held, the file
//! is also locked with an OS exclusive lock.

use anyhow::{Context, Result};
use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::constants::LOCK_FILE;
use crate::core::BuilderError;

/// Exclusive ownership of one cache directory for the duration of a build.
///
/// Dropping the lock unlocks and removes the lock file.
#[derive(Debug)]
pub struct BuildLock {
    file: Option<File>,
    path: PathBuf,
}

impl BuildLock {
    /// Take the lock on `cache_dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError::LockHeld`] if the lock file already exists or
    /// is locked by another process, and an I/O error if it cannot be created.
    pub async fn acquire(cache_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(cache_dir)
            .await
            .with_context(|| format!("Failed to create cache directory: {}", cache_dir.display()))?;

        let path = cache_dir.join(LOCK_FILE);
        let path_clone = path.clone();

        let file = tokio::task::spawn_blocking(move || -> Result<File> {
            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path_clone) {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    return Err(BuilderError::LockHeld {
                        path: path_clone.display().to_string(),
                    }
                    .into());
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to create lock file: {}", path_clone.display())
                    });
                }
            };

            if !file.try_lock_exclusive().unwrap_or(false) {
                let _ = std::fs::remove_file(&path_clone);
                return Err(BuilderError::LockHeld {
                    path: path_clone.display().to_string(),
                }
                .into());
            }

            writeln!(file, "{}", std::process::id())
                .with_context(|| format!("Failed to write lock file: {}", path_clone.display()))?;
            Ok(file)
        })
        .await
        .context("Failed to spawn blocking task for lock acquisition")??;

        debug!(path = %path.display(), "Build lock acquired");
        Ok(Self {
            file: Some(file),
            path,
        })
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock at the end of a run.
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError::LockRemoved`] if the lock file disappeared while
    /// the build was running, which means the cache may have been shared.
    pub fn release(mut self) -> Result<(), BuilderError> {
        let existed = self.path.exists();
        self.unlock_and_remove();
        if existed {
            debug!(path = %self.path.display(), "Build lock released");
            Ok(())
        } else {
            Err(BuilderError::LockRemoved {
                path: self.path.display().to_string(),
            })
        }
    }

    fn unlock_and_remove(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        if let Err(e) = FileExt::unlock(&file) {
            warn!(path = %self.path.display(), "Failed to unlock build lock: {e}");
        }
        drop(file);
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), "Failed to remove build lock: {e}"),
        }
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        self.unlock_and_remove();
    }
}

/// Whether a lock file is present in `cache_dir`.
#[must_use]
pub fn is_locked(cache_dir: &Path) -> bool {
    cache_dir.join(LOCK_FILE).exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let temp = TempDir::new().unwrap();
        let cache = temp.path().join("cache");

        let lock = BuildLock::acquire(&cache).await.unwrap();
        assert!(cache.join(LOCK_FILE).exists());
        assert!(is_locked(&cache));

        lock.release().unwrap();
        assert!(!cache.join(LOCK_FILE).exists());
    }

    #[tokio::test]
    async fn test_second_acquire_fails_while_held() {
        let temp = TempDir::new().unwrap();
        let _lock = BuildLock::acquire(temp.path()).await.unwrap();

        let err = BuildLock::acquire(temp.path()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuilderError>(),
            Some(BuilderError::LockHeld { .. })
        ));
    }

    #[tokio::test]
    async fn test_stale_lock_file_blocks() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(LOCK_FILE), "").unwrap();

        let err = BuildLock::acquire(temp.path()).await.unwrap_err();
        assert!(err.to_string().contains(LOCK_FILE));
        assert!(temp.path().join(LOCK_FILE).exists());
    }

    #[tokio::test]
    async fn test_drop_removes_lock_file() {
        let temp = TempDir::new().unwrap();
        {
            let _lock = BuildLock::acquire(temp.path()).await.unwrap();
        }
        assert!(!is_locked(temp.path()));
        let _again = BuildLock::acquire(temp.path()).await.unwrap();
    }

    #[tokio::test]
    async fn test_release_reports_removed_lock() {
        let temp = TempDir::new().unwrap();
        let lock = BuildLock::acquire(temp.path()).await.unwrap();
        std::fs::remove_file(temp.path().join(LOCK_FILE)).unwrap();

        let err = lock.release().unwrap_err();
        assert!(matches!(err, BuilderError::LockRemoved { .. }));
    }
}
