//! Layered registry loader
//!
//! Sources are merged lowest precedence first: built-in defaults, the user
//! file, the system file, then an explicitly passed file. Later sources
//! override earlier ones key by key. Key names are case-insensitive, section
//! names are kept exactly as written.

use super::{ConfigError, RawSection, Registry, DEFAULT_SECTION};
use ini::{Ini, ParseOption};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Built-in registry defaults, the lowest-precedence source.
pub const BUILTIN_DEFAULTS: &str = "[DEFAULT]\nhashlength = 8\n";

/// User-level registry file name, resolved against the home directory.
pub const USER_CONFIG_NAME: &str = ".drop.cfg";

/// System-level registry file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/drop.cfg";

/// Configuration loader
#[derive(Debug, Clone, Default)]
pub struct RegistryLoader {
    /// Optional sources, in increasing precedence. Missing files are skipped.
    optional: Vec<PathBuf>,
    /// Highest-precedence source. Must exist when set.
    explicit: Option<PathBuf>,
}

impl RegistryLoader {
    /// Loader over `~/.drop.cfg` and `/etc/drop.cfg`.
    pub fn standard() -> Self {
        let mut optional = Vec::new();
        if let Some(home) = dirs::home_dir() {
            optional.push(home.join(USER_CONFIG_NAME));
        }
        optional.push(PathBuf::from(SYSTEM_CONFIG_PATH));
        Self {
            optional,
            explicit: None,
        }
    }

    /// Loader over exactly the given optional sources.
    pub fn with_sources<I, P>(sources: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            optional: sources.into_iter().map(Into::into).collect(),
            explicit: None,
        }
    }

    /// Add an explicitly requested file on top of every other source.
    pub fn explicit<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.explicit = Some(path.as_ref().to_path_buf());
        self
    }

    /// Merge all sources and validate them into a [`Registry`].
    pub fn load(&self) -> Result<Registry, ConfigError> {
        let mut sections = BTreeMap::new();
        merge_ini(&mut sections, "<builtin>", BUILTIN_DEFAULTS)?;

        for path in &self.optional {
            tracing::debug!(path = %path.display(), exists = path.exists(), "Registry source");
            if path.is_file() {
                merge_file(&mut sections, path)?;
            }
        }

        if let Some(path) = &self.explicit {
            if !path.is_file() {
                return Err(ConfigError::MissingFile(path.display().to_string()));
            }
            tracing::debug!(path = %path.display(), "Explicit registry source");
            merge_file(&mut sections, path)?;
        }

        let registry = Registry::from_sections(sections)?;
        tracing::debug!(
            destinations = registry.names().count(),
            default = ?registry.default_name(),
            "Loaded destination registry"
        );
        Ok(registry)
    }
}

fn merge_file(sections: &mut BTreeMap<String, RawSection>, path: &Path) -> Result<(), ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    merge_ini(sections, &path.display().to_string(), &content)
}

/// Parse one INI source and lay its keys over `sections`.
///
/// Section names are taken verbatim (dots included); the `[DEFAULT]` section
/// is recognized in any casing and stored under [`DEFAULT_SECTION`].
fn merge_ini(
    sections: &mut BTreeMap<String, RawSection>,
    origin: &str,
    content: &str,
) -> Result<(), ConfigError> {
    let options = ParseOption {
        enabled_quote: false,
        enabled_escape: false,
        ..ParseOption::default()
    };
    let ini = Ini::load_from_str_opt(content, options).map_err(|source| ConfigError::Parse {
        path: origin.to_string(),
        source,
    })?;

    for (name, properties) in ini.iter() {
        let Some(name) = name else {
            for (key, _) in properties.iter() {
                tracing::warn!(source = origin, key, "Ignoring registry key outside of any section");
            }
            continue;
        };
        let name = if name.eq_ignore_ascii_case(DEFAULT_SECTION) {
            DEFAULT_SECTION.to_string()
        } else {
            name.to_string()
        };
        let section = sections.entry(name.clone()).or_default();
        for (key, value) in properties.iter() {
            if !section.set(key, value) {
                tracing::debug!(source = origin, section = %name, key, "Ignoring unknown registry key");
            }
        }
    }
    Ok(())
}
