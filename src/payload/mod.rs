//! Input consolidation
//!
//! Turns the user-supplied inputs into exactly one staged file: a private
//! copy of a single input, or a deterministic archive when several inputs
//! (or a directory) are given. The staged file and everything created
//! alongside it live in a [`StagingArea`] owned by the resulting
//! [`ConsolidatedPayload`].

use bytes::Bytes;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod archive;
pub mod staging;

use staging::StagingArea;

/// Name of the generated archive inside the staging area.
const ARCHIVE_NAME: &str = "archive.zip";

/// Staged name used for inputs without a file name (stdin).
const ANONYMOUS_NAME: &str = "payload";

/// Payload errors
#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("No input given")]
    Empty,

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Inputs '{first}' and '{second}' would both be archived as '{name}'")]
    NameCollision {
        name: String,
        first: String,
        second: String,
    },

    #[error("Failed to read input '{input}': {source}")]
    Input {
        input: String,
        #[source]
        source: io::Error,
    },

    #[error("Staging error: {0}")]
    Io(#[from] io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl PayloadError {
    /// Whether the failure stems from conflicting or unusable arguments
    pub fn is_invalid_args(&self) -> bool {
        matches!(
            self,
            PayloadError::Empty | PayloadError::InvalidArgs(_) | PayloadError::NameCollision { .. }
        )
    }
}

/// One user-supplied input
#[derive(Debug, Clone)]
pub enum InputSource {
    /// A file or directory on the local filesystem
    Path(PathBuf),
    /// Standard input, read to its end
    Stdin,
    /// In-memory content with a file name
    Bytes { name: String, data: Bytes },
}

impl InputSource {
    /// Name used in messages
    pub fn display_name(&self) -> String {
        match self {
            InputSource::Path(path) => path.display().to_string(),
            InputSource::Stdin => "<stdin>".to_string(),
            InputSource::Bytes { name, .. } => name.clone(),
        }
    }

    /// Final path component, if the input has one
    pub fn base_name(&self) -> Option<String> {
        match self {
            InputSource::Path(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            InputSource::Stdin => None,
            InputSource::Bytes { name, .. } => Path::new(name)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
        }
    }

    /// Extension including its leading dot, or empty
    pub fn extension(&self) -> String {
        self.base_name()
            .map(|name| extension_of(&name))
            .unwrap_or_default()
    }

    fn is_dir(&self) -> bool {
        matches!(self, InputSource::Path(path) if path.is_dir())
    }
}

/// Extension of a file name, including the leading dot.
///
/// Leading dots of hidden files do not start an extension.
pub fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

/// Ordered, non-empty list of inputs
#[derive(Debug, Clone)]
pub struct InputSet {
    inputs: Vec<InputSource>,
}

impl InputSet {
    pub fn new(inputs: Vec<InputSource>) -> Result<Self, PayloadError> {
        if inputs.is_empty() {
            return Err(PayloadError::Empty);
        }
        Ok(Self { inputs })
    }

    /// A set with one input
    pub fn single(input: InputSource) -> Self {
        Self {
            inputs: vec![input],
        }
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InputSource> {
        self.inputs.iter()
    }

    /// Whether consolidation will produce an archive
    pub fn needs_archive(&self) -> bool {
        self.inputs.len() > 1 || self.inputs.iter().any(InputSource::is_dir)
    }
}

/// How the staged payload was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Private copy of the only input
    Single,
    /// Archive generated from several inputs or a directory
    Archive,
}

/// The one staged file that will be uploaded
#[derive(Debug)]
pub struct ConsolidatedPayload {
    path: PathBuf,
    kind: PayloadKind,
    original_extension: String,
    original_base_name: Option<String>,
    staging: StagingArea,
}

impl ConsolidatedPayload {
    /// Path of the staged file
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> PayloadKind {
        self.kind
    }

    /// Extension of the input (with leading dot); empty for archives
    pub fn original_extension(&self) -> &str {
        &self.original_extension
    }

    pub fn original_base_name(&self) -> Option<&str> {
        self.original_base_name.as_deref()
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// Size of the staged file in bytes
    pub fn size(&self) -> io::Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    /// Move the staged file into a new directory `dir_name` under the
    /// staging area, keeping its original base name.
    ///
    /// Returns the new directory.
    pub fn place_in_directory(&mut self, dir_name: &str) -> Result<PathBuf, PayloadError> {
        let base_name = self.original_base_name.clone().ok_or_else(|| {
            PayloadError::InvalidArgs("preserving the name requires a named input".into())
        })?;
        let dir = self.staging.subdir("out")?.join(dir_name);
        fs::create_dir(&dir)?;
        let target = dir.join(&base_name);
        fs::rename(&self.path, &target)?;
        self.path = target;
        Ok(dir)
    }
}

/// Input Consolidator
pub struct Consolidator {
    staging_root: PathBuf,
}

impl Default for Consolidator {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

impl Consolidator {
    /// Create a consolidator staging under `staging_root`
    pub fn new<P: Into<PathBuf>>(staging_root: P) -> Self {
        Self {
            staging_root: staging_root.into(),
        }
    }

    /// Consolidate `inputs` into one staged payload
    #[tracing::instrument(name = "payload.consolidate", skip(self, inputs), fields(inputs = inputs.len()), err)]
    pub fn consolidate(
        &self,
        inputs: &InputSet,
        preserve_name: bool,
    ) -> Result<ConsolidatedPayload, PayloadError> {
        if preserve_name && inputs.len() > 1 {
            return Err(PayloadError::InvalidArgs(
                "preserving the file name is not possible with multiple inputs".into(),
            ));
        }

        if inputs.needs_archive() {
            let base_names = Self::check_collisions(inputs)?;
            let staging = StagingArea::new_in(&self.staging_root)?;
            let collect = staging.subdir("collect")?;
            for input in inputs.iter() {
                Self::stage_into(input, &collect)?;
            }
            let path = staging.path().join(ARCHIVE_NAME);
            archive::create_archive(&collect, &path)?;

            // A lone directory keeps a usable name for preserve mode.
            let original_base_name = match base_names.as_slice() {
                [only] if inputs.len() == 1 => Some(format!("{}.zip", only)),
                _ => None,
            };
            if preserve_name && original_base_name.is_none() {
                return Err(PayloadError::InvalidArgs(
                    "preserving the name requires a named input".into(),
                ));
            }

            return Ok(ConsolidatedPayload {
                path,
                kind: PayloadKind::Archive,
                original_extension: String::new(),
                original_base_name,
                staging,
            });
        }

        let Some(input) = inputs.iter().next() else {
            return Err(PayloadError::Empty);
        };
        let original_base_name = input.base_name();
        if preserve_name && original_base_name.is_none() {
            return Err(PayloadError::InvalidArgs(format!(
                "preserving the name requires a named input, got {}",
                input.display_name()
            )));
        }

        let staging = StagingArea::new_in(&self.staging_root)?;
        let staged_name = original_base_name.as_deref().unwrap_or(ANONYMOUS_NAME);
        let path = Self::stage_file(input, &staging, staged_name)?;

        Ok(ConsolidatedPayload {
            path,
            kind: PayloadKind::Single,
            original_extension: input.extension(),
            original_base_name,
            staging,
        })
    }

    /// Flattened base names of every input; fails on the first duplicate.
    fn check_collisions(inputs: &InputSet) -> Result<Vec<String>, PayloadError> {
        let mut seen: BTreeMap<String, String> = BTreeMap::new();
        let mut names = Vec::with_capacity(inputs.len());
        for input in inputs.iter() {
            let name = input.base_name().ok_or_else(|| {
                PayloadError::InvalidArgs(format!(
                    "{} cannot be combined with other inputs",
                    input.display_name()
                ))
            })?;
            if let Some(first) = seen.get(&name) {
                return Err(PayloadError::NameCollision {
                    name,
                    first: first.clone(),
                    second: input.display_name(),
                });
            }
            seen.insert(name.clone(), input.display_name());
            names.push(name);
        }
        Ok(names)
    }

    fn stage_file(
        input: &InputSource,
        staging: &StagingArea,
        name: &str,
    ) -> Result<PathBuf, PayloadError> {
        let read_error = |source: io::Error| PayloadError::Input {
            input: input.display_name(),
            source,
        };
        match input {
            InputSource::Path(path) => {
                let mut reader = BufReader::new(File::open(path).map_err(read_error)?);
                staging.copy_from(name, &mut reader).map_err(read_error)
            }
            InputSource::Stdin => {
                let stdin = io::stdin();
                let mut reader = stdin.lock();
                staging.copy_from(name, &mut reader).map_err(read_error)
            }
            InputSource::Bytes { data, .. } => Ok(staging.write_file(name, data)?),
        }
    }

    /// Copy one input below `dir` under its base name.
    fn stage_into(input: &InputSource, dir: &Path) -> Result<(), PayloadError> {
        let read_error = |source: io::Error| PayloadError::Input {
            input: input.display_name(),
            source,
        };
        let name = input.base_name().unwrap_or_else(|| ANONYMOUS_NAME.to_string());
        let target = dir.join(&name);
        match input {
            InputSource::Path(path) if path.is_dir() => {
                for entry in walkdir::WalkDir::new(path).follow_links(true) {
                    let entry = entry.map_err(|e| read_error(io::Error::from(e)))?;
                    let relative = entry.path().strip_prefix(path).unwrap_or(entry.path());
                    let destination = target.join(relative);
                    if entry.file_type().is_dir() {
                        fs::create_dir_all(&destination)?;
                    } else {
                        fs::copy(entry.path(), &destination).map_err(read_error)?;
                    }
                }
            }
            InputSource::Path(path) => {
                fs::copy(path, &target).map_err(read_error)?;
            }
            InputSource::Stdin => {
                let stdin = io::stdin();
                let mut reader = stdin.lock();
                let mut file = File::create(&target)?;
                io::copy(&mut reader, &mut file).map_err(read_error)?;
            }
            InputSource::Bytes { data, .. } => fs::write(&target, data)?,
        }
        Ok(())
    }
}
