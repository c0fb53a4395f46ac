//! Destination resolution
//!
//! Maps an optional user-supplied token to exactly one registry destination:
//! no token selects the configured default, an exact name wins over prefix
//! matches, and a prefix must identify a single destination.

use crate::config::{Destination, Registry};
use thiserror::Error;

/// Resolver errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("No destination given and no default destination configured")]
    NoDefault,

    #[error("Default destination '{0}' is not a configured destination")]
    UnknownDefault(String),

    #[error("No destination matches '{0}'")]
    NotFound(String),

    #[error("Destination '{token}' is ambiguous, matches: {}", .matches.join(", "))]
    Ambiguous { token: String, matches: Vec<String> },
}

impl ResolveError {
    /// Whether this failure is a registry problem rather than a bad token.
    pub fn is_config_error(&self) -> bool {
        matches!(self, ResolveError::NoDefault | ResolveError::UnknownDefault(_))
    }
}

/// Destination Resolver
///
/// Works on a name snapshot so resolution is a pure function of
/// `(token, names, default)`.
pub struct DestinationResolver<'a> {
    names: Vec<&'a str>,
    default: Option<&'a str>,
}

impl<'a> DestinationResolver<'a> {
    /// Create a resolver over every destination in the registry
    pub fn new(registry: &'a Registry) -> Self {
        Self {
            names: registry.names().collect(),
            default: registry.default_name(),
        }
    }

    /// Create a resolver over an explicit name list
    pub fn from_names(names: &[&'a str], default: Option<&'a str>) -> Self {
        Self {
            names: names.to_vec(),
            default,
        }
    }

    /// Resolve a token to a destination name
    pub fn resolve(&self, token: Option<&str>) -> Result<&'a str, ResolveError> {
        let token = match token {
            Some(token) if !token.is_empty() => token,
            _ => {
                let default = self.default.ok_or(ResolveError::NoDefault)?;
                return self
                    .names
                    .iter()
                    .copied()
                    .find(|name| *name == default)
                    .ok_or_else(|| ResolveError::UnknownDefault(default.to_string()));
            }
        };

        if let Some(exact) = self.names.iter().copied().find(|name| *name == token) {
            return Ok(exact);
        }

        let mut matches: Vec<&'a str> = self
            .names
            .iter()
            .copied()
            .filter(|name| name.starts_with(token))
            .collect();

        match matches.len() {
            0 => Err(ResolveError::NotFound(token.to_string())),
            1 => Ok(matches[0]),
            _ => {
                matches.sort_unstable();
                Err(ResolveError::Ambiguous {
                    token: token.to_string(),
                    matches: matches.into_iter().map(str::to_string).collect(),
                })
            }
        }
    }
}

/// Resolve a token against a registry and return the destination itself
pub fn resolve_destination<'a>(
    registry: &'a Registry,
    token: Option<&str>,
) -> Result<&'a Destination, ResolveError> {
    let name = DestinationResolver::new(registry).resolve(token)?;
    registry
        .get(name)
        .ok_or_else(|| ResolveError::NotFound(name.to_string()))
}
