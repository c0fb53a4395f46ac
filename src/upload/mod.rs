//! Upload pipeline
//!
//! One invocation runs strictly in sequence:
//!
//! ```text
//! validate -> resolve destination -> consolidate inputs -> digest
//!          -> name -> apply modes -> transfer -> compose URL -> sink
//! ```
//!
//! Every temporary artifact belongs to the payload's staging area and is
//! removed when [`Uploader::upload`] returns, whatever the outcome.

use crate::addressing::{
    normalize_extension, resolve_extension, AddressError, AddressedName, ContentDigest,
    NamingStrategy,
};
use crate::config::{ConfigError, Registry};
use crate::payload::{Consolidator, InputSet, PayloadError, PayloadKind};
use crate::permissions::{PermissionError, PermissionPolicy};
use crate::resolver::{resolve_destination, ResolveError};
use crate::selftest::VerificationError;
use crate::sink::UrlSink;
use crate::transport::{TransferError, Transporter};
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;

/// Upload errors
///
/// Every variant is terminal for the invocation.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error("Failed to hash payload: {0}")]
    Digest(#[source] std::io::Error),
}

impl UploadError {
    /// Stable short label of the failure class
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::InvalidArgs(_) | UploadError::Address(_) => "invalid_args",
            UploadError::Payload(e) if e.is_invalid_args() => "invalid_args",
            UploadError::Payload(_) | UploadError::Digest(_) => "io",
            UploadError::Config(_) => "config",
            UploadError::Resolve(e) if e.is_config_error() => "config",
            UploadError::Resolve(ResolveError::Ambiguous { .. }) => "ambiguous",
            UploadError::Resolve(_) => "not_found",
            UploadError::Permission(_) => "permission",
            UploadError::Transfer(_) => "transfer",
            UploadError::Verification(_) => "verification",
        }
    }

    pub fn is_invalid_args(&self) -> bool {
        self.kind() == "invalid_args"
    }
}

/// What to upload and how to name it
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub destination: Option<String>,
    pub inputs: InputSet,
    pub extension: Option<String>,
    pub strategy: NamingStrategy,
}

impl UploadRequest {
    /// Flat upload of `inputs` to the default destination
    pub fn new(inputs: InputSet) -> Self {
        Self {
            destination: None,
            inputs,
            extension: None,
            strategy: NamingStrategy::Flat,
        }
    }

    /// Destination name or unique prefix
    pub fn destination<S: Into<String>>(mut self, token: S) -> Self {
        self.destination = Some(token.into());
        self
    }

    /// Override the extension of the remote file
    pub fn extension<S: Into<String>>(mut self, extension: S) -> Self {
        self.extension = Some(extension.into());
        self
    }

    /// Keep the original file name inside a digest-named directory
    pub fn preserve_name(mut self, preserve: bool) -> Self {
        self.strategy = if preserve {
            NamingStrategy::PreserveName
        } else {
            NamingStrategy::Flat
        };
        self
    }

    /// Reject conflicting arguments before any work is done
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.strategy == NamingStrategy::PreserveName {
            if self.extension.is_some() {
                return Err(UploadError::InvalidArgs(
                    "an extension override cannot be combined with preserving the file name"
                        .into(),
                ));
            }
            if self.inputs.len() > 1 {
                return Err(UploadError::InvalidArgs(
                    "preserving the file name is not possible with multiple inputs".into(),
                ));
            }
        }
        if let Some(extension) = &self.extension {
            normalize_extension(extension)
                .map_err(|e| UploadError::InvalidArgs(e.to_string()))?;
        }
        Ok(())
    }
}

/// Result of a completed upload
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    /// Public URL of the uploaded content
    pub url: String,
    /// Resolved destination name
    pub destination: String,
    pub name: AddressedName,
    pub digest: ContentDigest,
    pub kind: PayloadKind,
    pub bytes: u64,
}

/// Runs the upload pipeline against one registry and transport
pub struct Uploader<'a> {
    registry: &'a Registry,
    transporter: &'a dyn Transporter,
    sink: Option<&'a dyn UrlSink>,
    staging_root: PathBuf,
}

impl<'a> Uploader<'a> {
    pub fn new(registry: &'a Registry, transporter: &'a dyn Transporter) -> Self {
        Self {
            registry,
            transporter,
            sink: None,
            staging_root: std::env::temp_dir(),
        }
    }

    /// Publish every produced URL to `sink`
    pub fn with_sink(mut self, sink: &'a dyn UrlSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Create staging areas below `root` instead of the system temp dir
    pub fn staging_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.staging_root = root.into();
        self
    }

    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    /// Run the whole pipeline for one request
    #[tracing::instrument(
        name = "upload",
        skip(self, request),
        fields(
            destination = tracing::field::Empty,
            digest = tracing::field::Empty,
            inputs = request.inputs.len()
        ),
        err
    )]
    pub async fn upload(&self, request: &UploadRequest) -> Result<UploadOutcome, UploadError> {
        let start_time = Instant::now();
        request.validate()?;

        let destination = resolve_destination(self.registry, request.destination.as_deref())?;
        let span = tracing::Span::current();
        span.record("destination", destination.name.as_str());

        let preserve = request.strategy == NamingStrategy::PreserveName;
        let mut payload = Consolidator::new(&self.staging_root).consolidate(&request.inputs, preserve)?;
        let bytes = payload.size().map_err(UploadError::Digest)?;

        let digest = ContentDigest::of_file(payload.path()).map_err(UploadError::Digest)?;
        let encoded = digest.encode(destination.hash_length)?;
        span.record("digest", encoded.as_str());
        tracing::debug!(sha1 = %digest.to_hex(), encoded = %encoded, bytes, "Computed content digest");

        let policy = PermissionPolicy::new(destination.file_mode);
        let (name, local) = match request.strategy {
            NamingStrategy::Flat => {
                let extension =
                    resolve_extension(request.extension.as_deref(), payload.original_extension())?;
                let name = AddressedName::flat(&encoded, &extension)?;
                policy.apply_to_file(payload.path())?;
                (name, payload.path().to_path_buf())
            }
            NamingStrategy::PreserveName => {
                let base_name = payload
                    .original_base_name()
                    .ok_or_else(|| {
                        UploadError::InvalidArgs("preserving the name requires a named input".into())
                    })?
                    .to_string();
                let name = AddressedName::preserved(&encoded, &base_name)?;
                let dir = payload.place_in_directory(&encoded)?;
                policy.apply_to_directory(&dir, payload.path())?;
                (name, dir)
            }
        };

        let remote_target = name.remote_target(&destination.remote_dir);
        self.transporter
            .transfer(
                &local,
                &destination.remote_host,
                &remote_target,
                name.is_recursive(),
            )
            .await?;

        let url = name.url(&destination.public_url_base);

        if let Some(sink) = self.sink {
            if let Err(e) = sink.publish(&url) {
                tracing::warn!(error = %e, "Failed to publish URL");
            }
        }

        tracing::info!(
            url = %url,
            bytes,
            duration_ms = start_time.elapsed().as_millis(),
            "Upload completed"
        );

        Ok(UploadOutcome {
            url,
            destination: destination.name.clone(),
            name,
            digest,
            kind: payload.kind(),
            bytes,
        })
    }
}
