//! Optional URL side effects
//!
//! A [`UrlSink`] receives every produced URL, e.g. to put it on the
//! clipboard. The pipeline works identically without one; a failing sink is
//! logged and never fails the upload.

use std::io::Write;
use std::process::{Command, Stdio};
use thiserror::Error;

/// Sink errors
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Empty sink command")]
    EmptyCommand,

    #[error("Failed to run `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}")]
    Failed { command: String, status: String },
}

/// Receiver of produced URLs
pub trait UrlSink: Send + Sync {
    fn publish(&self, url: &str) -> Result<(), SinkError>;
}

/// Pipes the URL into a command's stdin, e.g. `xclip -selection clipboard`
#[derive(Debug, Clone)]
pub struct CommandSink {
    program: String,
    args: Vec<String>,
}

impl CommandSink {
    /// Parse a whitespace-separated command line
    pub fn parse(command_line: &str) -> Result<Self, SinkError> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or(SinkError::EmptyCommand)?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl UrlSink for CommandSink {
    fn publish(&self, url: &str) -> Result<(), SinkError> {
        let command = self.command_line();
        let io_error = |source| SinkError::Io {
            command: command.clone(),
            source,
        };

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .map_err(io_error)?;

        // Close stdin and reap the child even when the write fails.
        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(url.as_bytes()),
            None => Ok(()),
        };
        let status = child.wait().map_err(io_error)?;
        written.map_err(io_error)?;
        if !status.success() {
            return Err(SinkError::Failed {
                command,
                status: status.to_string(),
            });
        }
        tracing::debug!(command = %command, "Published URL");
        Ok(())
    }
}
