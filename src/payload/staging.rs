//! Per-invocation staging directory
//!
//! Every artifact the pipeline creates (private copies of inputs, generated
//! archives, the digest-named directory of preserve mode) lives under one
//! uniquely named directory that is removed when the [`StagingArea`] drops,
//! on success, on error and on early return alike.
//!
//! # Example
//!
//! ```no_run
//! use hashdrop::payload::staging::StagingArea;
//!
//! # fn main() -> std::io::Result<()> {
//! let staging = StagingArea::new()?;
//! let file = staging.write_file("note.txt", b"Hello, World!")?;
//! assert!(file.starts_with(staging.path()));
//! # Ok(())
//! # }
//! ```

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Prefix of every staging directory name.
pub const STAGING_PREFIX: &str = "hashdrop-";

/// Scratch directory for one upload
///
/// Automatically cleaned up when dropped (RAII pattern).
#[derive(Debug)]
pub struct StagingArea {
    path: PathBuf,
}

impl StagingArea {
    /// Create a staging directory under the system temp dir
    pub fn new() -> io::Result<Self> {
        Self::new_in(std::env::temp_dir())
    }

    /// Create a staging directory under `root`
    pub fn new_in<P: AsRef<Path>>(root: P) -> io::Result<Self> {
        let path = root
            .as_ref()
            .join(format!("{}{}", STAGING_PREFIX, uuid::Uuid::new_v4()));
        fs::create_dir_all(&path)?;
        tracing::debug!(path = %path.display(), "Created staging area");
        Ok(Self { path })
    }

    /// Get the path to the staging directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of a new, empty subdirectory
    pub fn subdir(&self, name: &str) -> io::Result<PathBuf> {
        let dir = self.path.join(name);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Write `data` to `name` inside the staging directory
    pub fn write_file(&self, name: &str, data: &[u8]) -> io::Result<PathBuf> {
        let path = self.path.join(name);
        let mut file = File::create(&path)?;
        file.write_all(data)?;
        file.flush()?;
        Ok(path)
    }

    /// Stream `reader` into `name` inside the staging directory
    pub fn copy_from<R: Read>(&self, name: &str, reader: &mut R) -> io::Result<PathBuf> {
        let path = self.path.join(name);
        let mut file = File::create(&path)?;
        io::copy(reader, &mut file)?;
        file.flush()?;
        Ok(path)
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = remove_tree(&self.path) {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to clean up staging area"
                );
            } else {
                tracing::debug!(path = %self.path.display(), "Removed staging area");
            }
        }
    }
}

/// Remove a tree even when restrictive modes were applied to its contents.
fn remove_tree(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(first) => {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                for entry in walkdir::WalkDir::new(path).into_iter().flatten() {
                    if entry.file_type().is_dir() {
                        let _ = fs::set_permissions(entry.path(), fs::Permissions::from_mode(0o700));
                    }
                }
                fs::remove_dir_all(path).map_err(|_| first)
            }
            #[cfg(not(unix))]
            {
                Err(first)
            }
        }
    }
}
