//! Advisory lock serializing bootstraps against the same key file.
//!
//! The lock is an OS file lock on `<keys_file>.lock`, so the kernel drops it
//! when the holder exits, however it exits. The file itself stays behind and
//! only records who held it last.

use std::fs::{File, OpenOptions, TryLockError};
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{BootstrapError, BootstrapResult};

/// Held for the duration of the branch-through-persist sequence.
/// Released on drop or process exit.
#[derive(Debug)]
pub struct BootstrapLock {
    path: PathBuf,
    file: File,
}

impl BootstrapLock {
    pub fn acquire(path: &Path) -> BootstrapResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                BootstrapError::Storage(format!(
                    "Failed to create lock directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| {
                BootstrapError::Storage(format!(
                    "Failed to open lock file {}: {}",
                    path.display(),
                    e
                ))
            })?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                let holder = std::fs::read_to_string(path).unwrap_or_default();
                return Err(BootstrapError::Config(format!(
                    "another bootstrap is running (lock file {} held by {})",
                    path.display(),
                    holder.trim()
                )));
            }
            Err(TryLockError::Error(e)) => {
                return Err(BootstrapError::Storage(format!(
                    "Failed to lock {}: {}",
                    path.display(),
                    e
                )));
            }
        }

        // Holder note only; a failure here leaves the lock itself intact.
        let note = format!(
            "pid {} since {}\n",
            std::process::id(),
            chrono::Utc::now().to_rfc3339()
        );
        if let Err(e) = file
            .set_len(0)
            .and_then(|_| file.rewind())
            .and_then(|_| file.write_all(note.as_bytes()))
        {
            warn!("Failed to record lock holder in {}: {}", path.display(), e);
        }
        debug!("Acquired bootstrap lock {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }
}

impl Drop for BootstrapLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!("Failed to release lock {}: {}", self.path.display(), e);
        } else {
            debug!("Released bootstrap lock {}", self.path.display());
        }
    }
}
