//! Content-addressed naming
//!
//! The remote name of an upload is derived from the SHA-1 digest of the
//! exact bytes that are transferred:
//!
//! ```text
//! flat:      <base64url(sha1(content))[..hash_length]><extension>
//! preserve:  <base64url(sha1(content))[..hash_length]>/<original file name>
//! ```
//!
//! Truncation is a configurable length/collision trade-off; the full
//! unpadded encoding is 27 characters.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use thiserror::Error;

/// Characters escaped when a file name becomes a URL path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Addressing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Extension '{0}' must not contain a path separator")]
    InvalidExtension(String),

    #[error("Hash length {0} is outside 1..={max}", max = MAX_ENCODED_LENGTH)]
    InvalidHashLength(usize),

    #[error("File name '{0}' cannot be used as a remote name")]
    InvalidFileName(String),
}

/// Length of the unpadded URL-safe base64 encoding of a SHA-1 digest.
pub const MAX_ENCODED_LENGTH: usize = 27;

/// Raw 160-bit content digest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentDigest([u8; 20]);

impl ContentDigest {
    /// Digest of an in-memory buffer
    pub fn of_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Digest of a file, streamed
    pub fn of_file(path: &Path) -> io::Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut hasher = Sha1::new();
        io::copy(&mut reader, &mut hasher)?;
        Ok(Self(hasher.finalize().into()))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Lowercase hex, for logs
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// URL-safe base64 of the digest, truncated to `hash_length` characters
    pub fn encode(&self, hash_length: usize) -> Result<String, AddressError> {
        if hash_length == 0 || hash_length > MAX_ENCODED_LENGTH {
            return Err(AddressError::InvalidHashLength(hash_length));
        }
        let mut encoded = URL_SAFE_NO_PAD.encode(self.0);
        encoded.truncate(hash_length);
        Ok(encoded)
    }
}

/// Normalize an explicit extension override: `txt` and `.txt` both become
/// `.txt`, an empty override means no extension.
pub fn normalize_extension(raw: &str) -> Result<String, AddressError> {
    if raw.contains('/') || raw.contains('\\') {
        return Err(AddressError::InvalidExtension(raw.to_string()));
    }
    if raw.is_empty() || raw.starts_with('.') {
        Ok(raw.to_string())
    } else {
        Ok(format!(".{}", raw))
    }
}

/// Pick the extension of a flat upload: explicit override, then the
/// original extension, then none.
pub fn resolve_extension(
    override_ext: Option<&str>,
    original: &str,
) -> Result<String, AddressError> {
    let extension = match override_ext {
        Some(raw) => normalize_extension(raw)?,
        None => original.to_string(),
    };
    if extension.contains('/') || extension.contains('\\') {
        return Err(AddressError::InvalidExtension(extension));
    }
    Ok(extension)
}

/// Naming strategy for the remote copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NamingStrategy {
    /// `<hash><ext>`
    #[default]
    Flat,
    /// `<hash>/<original name>`
    PreserveName,
}

/// Computed remote name of an upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressedName {
    Flat {
        file_name: String,
    },
    Preserved {
        directory: String,
        file_name: String,
    },
}

impl AddressedName {
    /// `<hash><extension>`
    pub fn flat(encoded: &str, extension: &str) -> Result<Self, AddressError> {
        if extension.contains('/') || extension.contains('\\') {
            return Err(AddressError::InvalidExtension(extension.to_string()));
        }
        Ok(AddressedName::Flat {
            file_name: format!("{}{}", encoded, extension),
        })
    }

    /// `<hash>/<file_name>`
    pub fn preserved(encoded: &str, file_name: &str) -> Result<Self, AddressError> {
        if file_name.is_empty()
            || file_name == "."
            || file_name == ".."
            || file_name.contains('/')
            || file_name.contains('\\')
        {
            return Err(AddressError::InvalidFileName(file_name.to_string()));
        }
        Ok(AddressedName::Preserved {
            directory: encoded.to_string(),
            file_name: file_name.to_string(),
        })
    }

    /// Whether the transfer is a directory
    pub fn is_recursive(&self) -> bool {
        matches!(self, AddressedName::Preserved { .. })
    }

    /// Path relative to the destination's remote directory
    pub fn relative_path(&self) -> String {
        match self {
            AddressedName::Flat { file_name } => file_name.clone(),
            AddressedName::Preserved {
                directory,
                file_name,
            } => format!("{}/{}", directory, file_name),
        }
    }

    /// Target handed to the transport
    ///
    /// Both layouts name the remote entry itself, so a missing `remote_dir`
    /// fails the copy instead of being created in place of the digest
    /// directory.
    pub fn remote_target(&self, remote_dir: &str) -> String {
        match self {
            AddressedName::Flat { file_name } => join_remote(remote_dir, file_name),
            AddressedName::Preserved { directory, .. } => join_remote(remote_dir, directory),
        }
    }

    /// Public URL under `base`
    pub fn url(&self, base: &str) -> String {
        match self {
            AddressedName::Flat { file_name } => format!("{}{}", base, file_name),
            AddressedName::Preserved {
                directory,
                file_name,
            } => format!(
                "{}{}/{}",
                base,
                directory,
                utf8_percent_encode(file_name, PATH_SEGMENT)
            ),
        }
    }
}

/// Join a remote directory and a name with `/`, without doubling separators.
pub fn join_remote(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}
