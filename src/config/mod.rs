//! Destination registry
//!
//! The registry is a sectioned key-value store: one `[DEFAULT]` section with
//! process-wide settings, every other section a named upload destination.
//! Raw sections are validated once into strongly typed [`Destination`] and
//! [`Defaults`] values; the resulting [`Registry`] is immutable.

use std::collections::BTreeMap;
use std::sync::OnceLock;
use thiserror::Error;

mod loader;

pub use loader::RegistryLoader;

/// Name of the section that supplies process-wide defaults (matched case-insensitively).
pub const DEFAULT_SECTION: &str = "DEFAULT";

/// Hash length used when neither the destination nor `[DEFAULT]` sets one.
pub const DEFAULT_HASH_LENGTH: usize = 8;

/// Longest usable hash: unpadded URL-safe base64 of a 20-byte SHA-1 digest.
pub const MAX_HASH_LENGTH: usize = 27;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

fn env_var_pattern() -> &'static regex_lite::Regex {
    static PATTERN: OnceLock<regex_lite::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]+))?\}")
            .expect("env var pattern is valid")
    })
}

/// Expand environment variables in a string.
///
/// Supports `${VAR_NAME}` (placeholder kept if unset) and
/// `${VAR_NAME:-default}`.
///
/// # Examples
///
/// ```ignore
/// std::env::set_var("DROP_USER", "alice");
/// assert_eq!(expand_env_vars("~${DROP_USER}/www"), "~alice/www");
/// assert_eq!(expand_env_vars("${MISSING:-x}"), "x");
/// ```
pub(crate) fn expand_env_vars(s: &str) -> String {
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in env_var_pattern().captures_iter(s) {
        let Some(full_match) = cap.get(0) else {
            continue;
        };
        let var_name = &cap[1];

        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                None => full_match.as_str().to_string(),
            },
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);
    result
}

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Parse an octal permission mode: `644`, `0644` or `0o644`.
pub(crate) fn parse_mode(raw: &str) -> Option<u32> {
    let digits = raw.trim();
    let digits = digits
        .strip_prefix("0o")
        .or_else(|| digits.strip_prefix("0O"))
        .unwrap_or(digits);
    if digits.is_empty() {
        return None;
    }
    u32::from_str_radix(digits, 8)
        .ok()
        .filter(|mode| *mode <= 0o7777)
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: ini::ParseError,
    },

    #[error("Config file not found: {0}")]
    MissingFile(String),

    #[error("Destination '{section}' is missing required key '{key}'")]
    MissingKey { section: String, key: &'static str },

    #[error("Destination '{section}' has invalid {key} '{value}': {reason}")]
    InvalidValue {
        section: String,
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// One section as it appears in the registry, before validation.
///
/// Every value is a string; typing happens in [`Registry::from_sections`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawSection {
    pub remoteserver: Option<String>,
    pub remotedir: Option<String>,
    pub url: Option<String>,
    pub chmod: Option<String>,
    pub hashlength: Option<String>,
    pub destination: Option<String>,
    pub clipboard: Option<String>,
}

impl RawSection {
    /// Store `value` under `key`. Key names are case-insensitive.
    ///
    /// Returns `false` for keys the registry does not know.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> bool {
        let slot = match key.to_ascii_lowercase().as_str() {
            "remoteserver" => &mut self.remoteserver,
            "remotedir" => &mut self.remotedir,
            "url" => &mut self.url,
            "chmod" => &mut self.chmod,
            "hashlength" => &mut self.hashlength,
            "destination" => &mut self.destination,
            "clipboard" => &mut self.clipboard,
            _ => return false,
        };
        *slot = Some(value.into());
        true
    }

    /// Value of `field`, falling back to the same key in `[DEFAULT]`.
    fn inherit<'a>(
        &'a self,
        defaults: &'a RawSection,
        field: fn(&RawSection) -> &Option<String>,
    ) -> Option<&'a str> {
        field(self)
            .as_deref()
            .or_else(|| field(defaults).as_deref())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

/// Process-wide settings from the `[DEFAULT]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Defaults {
    /// Destination used when none is named on the command line.
    pub destination: Option<String>,
    pub hash_length: usize,
    /// Command line that receives each produced URL on stdin.
    pub clipboard: Option<String>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            destination: None,
            hash_length: DEFAULT_HASH_LENGTH,
            clipboard: None,
        }
    }
}

/// A validated upload target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub name: String,
    /// Connection target handed to the transport, e.g. `user@host`.
    pub remote_host: String,
    /// Base directory on the remote host. May be empty (remote home).
    pub remote_dir: String,
    /// Prefix of every composed public URL.
    pub public_url_base: String,
    pub file_mode: u32,
    pub hash_length: usize,
}

/// Immutable view over all configured destinations.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    defaults: Defaults,
    destinations: BTreeMap<String, Destination>,
}

impl Registry {
    /// Load the registry from the standard layered sources.
    pub fn load() -> Result<Self, ConfigError> {
        RegistryLoader::standard().load()
    }

    /// Validate raw sections into a registry.
    ///
    /// The `[DEFAULT]` section (any casing) supplies [`Defaults`] and
    /// fallback values for every destination key.
    pub fn from_sections(
        sections: BTreeMap<String, RawSection>,
    ) -> Result<Self, ConfigError> {
        let mut defaults_raw = RawSection::default();
        let mut named = Vec::new();
        for (name, section) in sections {
            if name.eq_ignore_ascii_case(DEFAULT_SECTION) {
                defaults_raw = section;
            } else {
                named.push((name, section));
            }
        }

        let hash_length = match defaults_raw.hashlength.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => parse_hash_length(DEFAULT_SECTION, raw)?,
            _ => DEFAULT_HASH_LENGTH,
        };
        let defaults = Defaults {
            destination: non_empty(defaults_raw.destination.as_deref()),
            hash_length,
            clipboard: non_empty(defaults_raw.clipboard.as_deref()),
        };

        let mut destinations = BTreeMap::new();
        for (name, section) in named {
            let destination = Self::validate_destination(&name, &section, &defaults_raw, &defaults)?;
            destinations.insert(name, destination);
        }

        Ok(Self {
            defaults,
            destinations,
        })
    }

    fn validate_destination(
        name: &str,
        section: &RawSection,
        defaults_raw: &RawSection,
        defaults: &Defaults,
    ) -> Result<Destination, ConfigError> {
        let required = |key: &'static str, field: fn(&RawSection) -> &Option<String>| {
            section
                .inherit(defaults_raw, field)
                .map(expand_env_vars)
                .ok_or_else(|| ConfigError::MissingKey {
                    section: name.to_string(),
                    key,
                })
        };

        let remote_host = required("remoteserver", |s| &s.remoteserver)?;
        // An empty remotedir is legitimate (the remote login directory),
        // but the key itself must be present.
        let remote_dir = section
            .remotedir
            .as_deref()
            .or(defaults_raw.remotedir.as_deref())
            .map(|v| expand_env_vars(v.trim()))
            .ok_or_else(|| ConfigError::MissingKey {
                section: name.to_string(),
                key: "remotedir",
            })?;
        let public_url_base = required("url", |s| &s.url)?;
        let raw_mode = required("chmod", |s| &s.chmod)?;

        if !is_valid_http_url(&public_url_base) {
            return Err(ConfigError::InvalidValue {
                section: name.to_string(),
                key: "url",
                value: public_url_base,
                reason: "must start with http:// or https://".into(),
            });
        }

        let file_mode = parse_mode(&raw_mode).ok_or_else(|| ConfigError::InvalidValue {
            section: name.to_string(),
            key: "chmod",
            value: raw_mode.clone(),
            reason: "expected an octal mode such as 644".into(),
        })?;

        let hash_length = match section.hashlength.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => parse_hash_length(name, raw)?,
            _ => defaults.hash_length,
        };

        Ok(Destination {
            name: name.to_string(),
            remote_host,
            remote_dir,
            public_url_base,
            file_mode,
            hash_length,
        })
    }

    pub fn defaults(&self) -> &Defaults {
        &self.defaults
    }

    /// Name of the configured default destination, if any.
    pub fn default_name(&self) -> Option<&str> {
        self.defaults.destination.as_deref()
    }

    /// All destination names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.destinations.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&Destination> {
        self.destinations.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.destinations.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_hash_length(section: &str, raw: &str) -> Result<usize, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidValue {
        section: section.to_string(),
        key: "hashlength",
        value: raw.to_string(),
        reason,
    };
    let length: usize = raw
        .parse()
        .map_err(|_| invalid("expected a positive integer".into()))?;
    if length == 0 || length > MAX_HASH_LENGTH {
        return Err(invalid(format!("must be between 1 and {}", MAX_HASH_LENGTH)));
    }
    Ok(length)
}
