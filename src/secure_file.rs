//! Crash-safe, owner-only file writes.
//!
//! 1. Write to a temporary file in the same directory as the target
//! 2. Restrict it to owner read/write and `sync_all()` it
//! 3. Atomically rename it onto the target
//!
//! After a crash the target holds either its previous content or the new
//! content, never a partial write.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

/// Error type for secure file writes.
#[derive(Debug, thiserror::Error)]
pub enum SecureFileError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Path has no parent directory: {0}")]
    NoParentDir(PathBuf),

    #[error("Refusing to overwrite existing file: {0}")]
    AlreadyExists(PathBuf),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> SecureFileError + '_ {
    move |source| SecureFileError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(unix)]
fn restrict_to_owner(file: &fs::File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_to_owner(_file: &fs::File) -> io::Result<()> {
    Ok(())
}

/// Fsync the parent directory so the rename itself is durable.
#[cfg(unix)]
fn fsync_dir(path: &Path) -> io::Result<()> {
    fs::File::open(path)?.sync_all()
}

#[cfg(not(unix))]
fn fsync_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Write `data` to an owner-only temp file next to `path` without
/// publishing it yet.
pub fn stage(path: &Path, data: &[u8]) -> Result<NamedTempFile, SecureFileError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    if path.file_name().is_none() {
        return Err(SecureFileError::NoParentDir(path.to_path_buf()));
    }

    fs::create_dir_all(&parent).map_err(io_err(&parent))?;

    let prefix = format!(
        ".{}.",
        path.file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("secret")
    );
    let mut temp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(&parent)
        .map_err(io_err(&parent))?;

    restrict_to_owner(temp.as_file()).map_err(io_err(temp.path()))?;
    temp.write_all(data).map_err(io_err(path))?;
    temp.as_file().sync_all().map_err(io_err(path))?;

    Ok(temp)
}

/// Publish a staged temp file at `path`.
///
/// With `overwrite = false` an existing target is left untouched and
/// [`SecureFileError::AlreadyExists`] is returned.
pub fn publish(temp: NamedTempFile, path: &Path, overwrite: bool) -> Result<(), SecureFileError> {
    let result = if overwrite {
        temp.persist(path)
    } else {
        temp.persist_noclobber(path)
    };

    if let Err(e) = result {
        // Dropping the returned handle removes the temp file.
        drop(e.file);
        if e.error.kind() == io::ErrorKind::AlreadyExists {
            return Err(SecureFileError::AlreadyExists(path.to_path_buf()));
        }
        return Err(SecureFileError::Io {
            path: path.to_path_buf(),
            source: e.error,
        });
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fsync_dir(parent).map_err(io_err(parent))?;
    }
    Ok(())
}

/// Atomically write `data` to `path` with owner-only permissions.
pub fn write_private(path: &Path, data: &[u8], overwrite: bool) -> Result<(), SecureFileError> {
    let temp = stage(path, data)?;
    publish(temp, path, overwrite)
}
