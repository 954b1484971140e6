//! Data directory lock
//!
//! sled takes an exclusive lock on its database; a second pedocore process
//! pointed at the same data directory would fail deep inside storage setup.
//! This lock fails fast with an actionable message instead.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the PID file written into the data directory.
pub const LOCK_FILE_NAME: &str = ".pedocore.lock";

/// Holds the data directory lock for the lifetime of the value.
#[derive(Debug)]
pub struct DataDirLock {
    lock_path: PathBuf,
    held: bool,
}

impl DataDirLock {
    /// Acquire the lock for `data_dir`, creating the directory if needed.
    ///
    /// Fails when another live pedocore process holds it. A lock left by a
    /// dead process is replaced.
    pub fn acquire<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let lock_path = data_dir.join(LOCK_FILE_NAME);

        if lock_path.exists() {
            match read_pid(&lock_path) {
                Some(pid) if pid_is_live(pid) => {
                    bail!(
                        "Another pedocore process (PID {}) is using {}.\n\
                         Stop it, or remove {} if it is no longer running.",
                        pid,
                        data_dir.display(),
                        lock_path.display()
                    );
                }
                _ => {
                    tracing::info!(path = %lock_path.display(), "Replacing stale data directory lock");
                    fs::remove_file(&lock_path).with_context(|| {
                        format!("Failed to remove stale lock {}", lock_path.display())
                    })?;
                }
            }
        }

        let pid = std::process::id();
        fs::write(&lock_path, format!("{pid}\n"))
            .with_context(|| format!("Failed to write lock file {}", lock_path.display()))?;
        tracing::debug!(pid, path = %lock_path.display(), "Data directory lock acquired");

        Ok(Self {
            lock_path,
            held: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }

    /// Remove the lock file. Also runs on drop.
    pub fn release(&mut self) {
        if !self.held {
            return;
        }
        self.held = false;
        match fs::remove_file(&self.lock_path) {
            Ok(()) => tracing::debug!(path = %self.lock_path.display(), "Data directory lock released"),
            Err(e) => tracing::warn!(error = %e, "Failed to remove data directory lock"),
        }
    }
}

impl Drop for DataDirLock {
    fn drop(&mut self) {
        self.release();
    }
}

fn read_pid(lock_path: &Path) -> Option<u32> {
    fs::read_to_string(lock_path).ok()?.trim().parse().ok()
}

/// Whether `pid` is a running pedocore process.
#[cfg(unix)]
fn pid_is_live(pid: u32) -> bool {
    fs::read_to_string(format!("/proc/{pid}/cmdline"))
        .map(|cmdline| cmdline.contains("pedocore"))
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn pid_is_live(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_acquire_writes_pid() {
        let dir = tempdir().unwrap();
        let lock = DataDirLock::acquire(dir.path()).unwrap();
        let pid: u32 = fs::read_to_string(lock.path()).unwrap().trim().parse().unwrap();
        assert_eq!(pid, std::process::id());
    }

    #[test]
    fn test_released_on_drop() {
        let dir = tempdir().unwrap();
        let path = {
            let lock = DataDirLock::acquire(dir.path()).unwrap();
            lock.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_stale_lock_replaced() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(LOCK_FILE_NAME), "999999999\n").unwrap();
        assert!(DataDirLock::acquire(dir.path()).is_ok());
    }

    #[test]
    fn test_garbage_lock_replaced() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(LOCK_FILE_NAME), "not a pid").unwrap();
        assert!(DataDirLock::acquire(dir.path()).is_ok());
    }

    #[test]
    fn test_creates_missing_data_dir() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a/b");
        let _lock = DataDirLock::acquire(&nested).unwrap();
        assert!(nested.is_dir());
    }
}
