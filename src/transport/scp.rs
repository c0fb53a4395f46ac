//! `scp` transport
//!
//! Runs `scp -p -q [-r] <local> <host>:<remote>`. `-p` keeps the mode applied
//! to the staged copy, so the remote file ends up with the destination's
//! permission bits.

use super::{TransferError, Transporter};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;

/// Default transfer program
pub const DEFAULT_PROGRAM: &str = "scp";

/// Transporter backed by the `scp` command
#[derive(Debug, Clone)]
pub struct ScpTransporter {
    program: OsString,
    extra_args: Vec<OsString>,
}

impl Default for ScpTransporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ScpTransporter {
    /// Use `scp` from `PATH`
    pub fn new() -> Self {
        Self::with_program(DEFAULT_PROGRAM)
    }

    /// Use a specific program with scp-compatible arguments
    pub fn with_program<S: Into<OsString>>(program: S) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
        }
    }

    /// Add an argument placed before the source and target, e.g. `-P 2222`
    pub fn arg<S: Into<OsString>>(mut self, arg: S) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Full argument list for one transfer
    pub fn arguments(
        &self,
        local: &Path,
        remote_host: &str,
        remote_path: &str,
        recursive: bool,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-p".into(), "-q".into()];
        if recursive {
            args.push("-r".into());
        }
        args.extend(self.extra_args.iter().cloned());
        args.push(local.as_os_str().to_os_string());
        args.push(format!("{}:{}", remote_host, remote_path).into());
        args
    }

    /// Printable command line, quoting arguments that contain whitespace
    pub fn command_line(&self, args: &[OsString]) -> String {
        std::iter::once(&self.program)
            .chain(args.iter())
            .map(|arg| {
                let arg = arg.to_string_lossy();
                if arg.is_empty() || arg.chars().any(|c| c.is_whitespace() || c == '\'') {
                    format!("'{}'", arg.replace('\'', r"'\''"))
                } else {
                    arg.into_owned()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl Transporter for ScpTransporter {
    #[tracing::instrument(
        name = "transport.scp",
        skip(self, local),
        fields(local = %local.display()),
        err
    )]
    async fn transfer(
        &self,
        local: &Path,
        remote_host: &str,
        remote_path: &str,
        recursive: bool,
    ) -> Result<(), TransferError> {
        let args = self.arguments(local, remote_host, remote_path, recursive);
        let command = self.command_line(&args);
        let start_time = Instant::now();

        tracing::debug!(command = %command, "Starting transfer");

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| TransferError::Spawn {
                command: command.clone(),
                source,
            })?;

        let duration = start_time.elapsed();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            tracing::error!(
                command = %command,
                status = %output.status,
                duration_ms = duration.as_millis(),
                "Transfer failed"
            );
            return Err(TransferError::Failed {
                command,
                status: output.status.to_string(),
                stderr,
            });
        }

        tracing::info!(
            remote_host = %remote_host,
            remote_path = %remote_path,
            duration_ms = duration.as_millis(),
            "Transfer completed"
        );
        Ok(())
    }
}
