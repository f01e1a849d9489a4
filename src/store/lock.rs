//! Advisory lock files.
//!
//! Locks are `flock`-style (via `fs2`), so a killed process releases its lock
//! when the OS closes the descriptor and no stale-lock cleanup is needed.
use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Held advisory lock; released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn stamp_owner(&mut self) {
        // Owner info is diagnostic only; a failed stamp does not release the lock.
        let owner = format!(
            "pid={} at={}\n",
            std::process::id(),
            chrono::Utc::now().to_rfc3339()
        );
        if self.file.set_len(0).is_ok() {
            let _ = self.file.write_all(owner.as_bytes());
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    // Open without truncating so we never clobber another holder's stamp.
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("open lock {}", path.display()))
}

/// Try to take the lock without waiting; `None` means another holder has it.
pub fn try_lock(path: &Path) -> Result<Option<FileLock>> {
    let file = open_lock_file(path)?;
    match file.try_lock_exclusive() {
        Ok(()) => {
            let mut lock = FileLock {
                file,
                path: path.to_path_buf(),
            };
            lock.stamp_owner();
            Ok(Some(lock))
        }
        Err(err) if is_contended(&err) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("lock {}", path.display())),
    }
}

/// Take the lock, waiting for the current holder to release it.
pub fn lock_blocking(path: &Path) -> Result<FileLock> {
    let file = open_lock_file(path)?;
    file.lock_exclusive()
        .with_context(|| format!("lock {}", path.display()))?;
    let mut lock = FileLock {
        file,
        path: path.to_path_buf(),
    };
    lock.stamp_owner();
    Ok(lock)
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
