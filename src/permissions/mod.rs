//! Permission policy
//!
//! The staged copy carries the destination's mode before transfer, and the
//! transport preserves it on the remote side. In preserve mode the
//! digest-named directory additionally needs execute bits for every class
//! that may read the file, otherwise the file is unreachable.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Permission errors
#[derive(Error, Debug)]
#[error("Failed to set mode {mode:04o} on '{}': {source}", .path.display())]
pub struct PermissionError {
    pub path: PathBuf,
    pub mode: u32,
    #[source]
    pub source: io::Error,
}

/// Directory variant of a file mode: the file mode plus an execute bit for
/// every class (owner, group, other) that has read access.
///
/// ```
/// use hashdrop::permissions::directory_mode;
///
/// assert_eq!(directory_mode(0o644), 0o755);
/// assert_eq!(directory_mode(0o640), 0o750);
/// assert_eq!(directory_mode(0o600), 0o700);
/// ```
pub fn directory_mode(file_mode: u32) -> u32 {
    file_mode | ((file_mode & 0o444) >> 2)
}

/// Applies a destination's permission bits to staged artifacts
#[derive(Debug, Clone, Copy)]
pub struct PermissionPolicy {
    file_mode: u32,
}

impl PermissionPolicy {
    pub fn new(file_mode: u32) -> Self {
        Self { file_mode }
    }

    pub fn file_mode(&self) -> u32 {
        self.file_mode
    }

    pub fn directory_mode(&self) -> u32 {
        directory_mode(self.file_mode)
    }

    /// Apply the file mode to `file`
    pub fn apply_to_file(&self, file: &Path) -> Result<(), PermissionError> {
        set_mode(file, self.file_mode)
    }

    /// Apply the file mode to `file` and the directory mode to `dir`
    pub fn apply_to_directory(&self, dir: &Path, file: &Path) -> Result<(), PermissionError> {
        set_mode(file, self.file_mode)?;
        set_mode(dir, self.directory_mode())
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), PermissionError> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|source| {
        PermissionError {
            path: path.to_path_buf(),
            mode,
            source,
        }
    })?;
    tracing::debug!(path = %path.display(), mode = %format!("{:04o}", mode), "Applied mode");
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(path: &Path, mode: u32) -> Result<(), PermissionError> {
    // Only the owner write bit maps onto non-unix permissions.
    let mut permissions = fs::metadata(path)
        .map_err(|source| PermissionError {
            path: path.to_path_buf(),
            mode,
            source,
        })?
        .permissions();
    permissions.set_readonly(mode & 0o200 == 0);
    fs::set_permissions(path, permissions).map_err(|source| PermissionError {
        path: path.to_path_buf(),
        mode,
        source,
    })
}
