//! Hashdrop Library
//!
//! Uploads files to a remote web directory over `scp` and returns a public
//! URL named after the content's SHA-1 digest.
//!
//! # Features
//!
//! - **Content Addressing**: `base64url(sha1(content))`, truncated per destination
//! - **Destinations**: named registry entries, selectable by unique prefix
//! - **Archiving**: several inputs are bundled into one deterministic zip
//! - **Preserve Mode**: original file name inside a digest-named directory
//! - **Self-Test**: upload a timestamped payload and read it back over HTTP
//!
//! # Example
//!
//! ```no_run
//! use hashdrop::config::Registry;
//! use hashdrop::payload::{InputSet, InputSource};
//! use hashdrop::transport::ScpTransporter;
//! use hashdrop::upload::{UploadRequest, Uploader};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = Registry::load()?;
//!     let transporter = ScpTransporter::new();
//!     let request = UploadRequest::new(InputSet::single(InputSource::Path("notes.txt".into())));
//!
//!     let outcome = Uploader::new(&registry, &transporter).upload(&request).await?;
//!     println!("{}", outcome.url);
//!     Ok(())
//! }
//! ```

pub mod addressing;
pub mod config;
pub mod payload;
pub mod permissions;
pub mod resolver;
pub mod selftest;
pub mod sink;
pub mod transport;
pub mod upload;

// Re-export commonly used types
pub use config::Registry;
pub use upload::{UploadError, UploadOutcome, UploadRequest, Uploader};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
