//! Transport module
//!
//! Moves the staged payload to the remote host. The pipeline only depends on
//! the [`Transporter`] trait; [`scp::ScpTransporter`] is the production
//! implementation.

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

pub mod scp;

pub use scp::ScpTransporter;

/// Transfer errors
///
/// Every variant carries the exact command line that was attempted.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed ({status}); check that the remote directory exists, the command is valid and login works{}", stderr_suffix(.stderr))]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
}

fn stderr_suffix(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {}", stderr)
    }
}

impl TransferError {
    /// The command line that was attempted
    pub fn command(&self) -> &str {
        match self {
            TransferError::Spawn { command, .. } | TransferError::Failed { command, .. } => command,
        }
    }
}

/// Remote file mover
///
/// Either the whole transfer succeeds or an error is returned. Implementations
/// never retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transporter: Send + Sync {
    /// Copy `local` to `remote_path` on `remote_host`; directories need `recursive`
    async fn transfer(
        &self,
        local: &Path,
        remote_host: &str,
        remote_path: &str,
        recursive: bool,
    ) -> Result<(), TransferError>;
}
