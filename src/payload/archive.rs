//! Deterministic zip archives
//!
//! Archive bytes depend only on the relative paths and contents of the
//! archived files: entries are written in sorted order with a fixed
//! timestamp and fixed modes, so identical input trees hash identically.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

/// Mode recorded for every archived file.
pub const ENTRY_FILE_MODE: u32 = 0o644;

/// Mode recorded for every archived directory.
pub const ENTRY_DIR_MODE: u32 = 0o755;

fn entry_options(mode: u32) -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(mode)
}

/// Zip-style relative name of `path` below `root`, always `/`-separated.
fn entry_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Archive the contents of `source_dir` (not the directory itself) into `target`.
///
/// Returns the number of file entries written.
pub fn create_archive(source_dir: &Path, target: &Path) -> Result<usize, zip::result::ZipError> {
    let file = File::create(target)?;
    let mut writer = ZipWriter::new(file);
    let mut files = 0usize;

    for entry in WalkDir::new(source_dir)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.map_err(io::Error::from)?;
        let Some(name) = entry_name(source_dir, entry.path()) else {
            continue;
        };

        if entry.file_type().is_dir() {
            writer.add_directory(format!("{}/", name), entry_options(ENTRY_DIR_MODE))?;
        } else {
            writer.start_file(name, entry_options(ENTRY_FILE_MODE))?;
            let mut reader = BufReader::new(File::open(entry.path())?);
            io::copy(&mut reader, &mut writer)?;
            files += 1;
        }
    }

    writer.finish()?;
    tracing::debug!(
        source = %source_dir.display(),
        archive = %target.display(),
        files,
        "Created archive"
    );
    Ok(files)
}
