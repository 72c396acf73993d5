use crate::CoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Exclusive advisory lock on one root scope, released on drop.
///
/// Every bookkeeping transaction that touches a scope runs while holding its
/// lock. Operations on different roots use different lock files and never
/// wait on each other.
pub struct RootLock {
    lock_file: File,
    path: PathBuf,
}

fn open_lock_file(lock_path: &Path) -> Result<File, CoreError> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(lock_path)?)
}

impl RootLock {
    /// Block until the lock is ours.
    pub fn acquire(lock_path: &Path) -> Result<Self, CoreError> {
        let file = open_lock_file(lock_path)?;
        file.lock_exclusive()
            .map_err(|e| CoreError::Io(std::io::Error::new(std::io::ErrorKind::WouldBlock, e)))?;
        debug!("acquired root lock {}", lock_path.display());
        Ok(Self {
            lock_file: file,
            path: lock_path.to_path_buf(),
        })
    }

    /// Take the lock if nobody holds it. `Ok(None)` means contention.
    pub fn try_acquire(lock_path: &Path) -> Result<Option<Self>, CoreError> {
        let file = open_lock_file(lock_path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("acquired root lock {}", lock_path.display());
                Ok(Some(Self {
                    lock_file: file,
                    path: lock_path.to_path_buf(),
                }))
            }
            Err(_) => Ok(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RootLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            std::process::exit(1);
        }
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        eprintln!("\nshutdown requested, finishing current operation...");
    });
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("locks").join("root.lock");

        {
            let lock = RootLock::acquire(&lock_path).unwrap();
            assert!(lock_path.exists());
            assert_eq!(lock.path(), lock_path);
        }
    }

    #[test]
    fn try_acquire_returns_none_when_held() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("root.lock");

        let _lock = RootLock::acquire(&lock_path).unwrap();
        let result = RootLock::try_acquire(&lock_path).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("root.lock");

        {
            let _lock = RootLock::acquire(&lock_path).unwrap();
        }

        let lock2 = RootLock::try_acquire(&lock_path).unwrap();
        assert!(lock2.is_some());
    }

    #[test]
    fn distinct_roots_do_not_contend() {
        let dir = tempfile::tempdir().unwrap();
        let _a = RootLock::acquire(&dir.path().join("a.lock")).unwrap();
        assert!(RootLock::try_acquire(&dir.path().join("b.lock"))
            .unwrap()
            .is_some());
    }
}
