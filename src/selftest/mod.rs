//! End-to-end self-test
//!
//! Uploads a freshly generated, timestamped payload through the unmodified
//! pipeline, then fetches the public URL and compares the bytes.
//!
//! # Example
//!
//! ```no_run
//! use hashdrop::config::Registry;
//! use hashdrop::selftest::{SelfTest, Verifier};
//! use hashdrop::transport::ScpTransporter;
//! use hashdrop::upload::Uploader;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Registry::load()?;
//! let transporter = ScpTransporter::new();
//! let uploader = Uploader::new(&registry, &transporter);
//!
//! let test = SelfTest::new(Verifier::new()?);
//! let outcome = test.run(&uploader, Some("web")).await?;
//! println!("verified {}", outcome.url);
//! # Ok(())
//! # }
//! ```

use crate::payload::{InputSet, InputSource};
use crate::upload::{UploadError, UploadOutcome, UploadRequest, Uploader};
use bytes::Bytes;
use chrono::{DateTime, Local};
use std::time::Duration;
use thiserror::Error;

/// Marker that starts every generated payload
pub const TEST_MARKER: &str = "TEST ";

/// Extension of uploaded test payloads
pub const TEST_EXTENSION: &str = "test";

/// Name of the synthetic input
pub const TEST_INPUT_NAME: &str = "selftest";

/// Upper bound for the read-back request
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Verification errors
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Fetching {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Different data found at {url}: expected {expected} bytes, got {actual} bytes")]
    Mismatch {
        url: String,
        expected: usize,
        actual: usize,
    },
}

/// Payload for a given moment: marker, timestamp, newline
pub fn payload_at(moment: DateTime<Local>) -> Bytes {
    Bytes::from(format!(
        "{}{}\n",
        TEST_MARKER,
        moment.format("%Y-%m-%d %H:%M:%S%.6f")
    ))
}

/// Payload for the current moment
pub fn generate_payload() -> Bytes {
    payload_at(Local::now())
}

/// Unauthenticated HTTP read-back
#[derive(Debug, Clone)]
pub struct Verifier {
    client: reqwest::Client,
}

impl Verifier {
    /// Verifier with [`DEFAULT_FETCH_TIMEOUT`]
    pub fn new() -> Result<Self, VerificationError> {
        Self::with_timeout(DEFAULT_FETCH_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, VerificationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(VerificationError::Client)?;
        Ok(Self { client })
    }

    /// GET `url` and return the body
    #[tracing::instrument(name = "selftest.fetch", skip(self), err)]
    pub async fn fetch(&self, url: &str) -> Result<Bytes, VerificationError> {
        let fetch_error = |source| VerificationError::Fetch {
            url: url.to_string(),
            source,
        };
        let response = self.client.get(url).send().await.map_err(fetch_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(VerificationError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response.bytes().await.map_err(fetch_error)
    }

    /// Fetch `url` and compare it byte for byte with `expected`
    pub async fn verify(&self, url: &str, expected: &[u8]) -> Result<(), VerificationError> {
        let actual = self.fetch(url).await?;
        if actual.as_ref() != expected {
            tracing::error!(url = %url, expected = expected.len(), actual = actual.len(), "Read-back mismatch");
            return Err(VerificationError::Mismatch {
                url: url.to_string(),
                expected: expected.len(),
                actual: actual.len(),
            });
        }
        tracing::info!(url = %url, bytes = actual.len(), "Read-back matches upload");
        Ok(())
    }
}

/// One self-test run
#[derive(Debug, Clone)]
pub struct SelfTest {
    payload: Bytes,
    verifier: Verifier,
}

impl SelfTest {
    /// Self-test with a payload generated now
    pub fn new(verifier: Verifier) -> Self {
        Self::with_payload(generate_payload(), verifier)
    }

    pub fn with_payload(payload: Bytes, verifier: Verifier) -> Self {
        Self { payload, verifier }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Upload request carrying the synthetic payload
    pub fn request(&self, destination: Option<&str>) -> UploadRequest {
        let inputs = InputSet::single(InputSource::Bytes {
            name: TEST_INPUT_NAME.to_string(),
            data: self.payload.clone(),
        });
        let request = UploadRequest::new(inputs).extension(TEST_EXTENSION);
        match destination {
            Some(token) => request.destination(token),
            None => request,
        }
    }

    /// Compare what `url` serves with the payload
    pub async fn verify(&self, url: &str) -> Result<(), VerificationError> {
        self.verifier.verify(url, &self.payload).await
    }

    /// Upload the payload and verify the read-back
    pub async fn run(
        &self,
        uploader: &Uploader<'_>,
        destination: Option<&str>,
    ) -> Result<UploadOutcome, UploadError> {
        let outcome = uploader.upload(&self.request(destination)).await?;
        self.verify(&outcome.url).await?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_payload_format() {
        let moment = Local.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
        assert_eq!(
            payload_at(moment),
            Bytes::from_static(b"TEST 2024-03-01 12:30:05.000000\n")
        );
    }

    #[test]
    fn test_request_uses_test_extension() {
        let test = SelfTest::new(Verifier::new().unwrap());
        let request = test.request(Some("web"));
        assert_eq!(request.extension.as_deref(), Some(TEST_EXTENSION));
        assert_eq!(request.destination.as_deref(), Some("web"));
        assert!(test.payload().starts_with(TEST_MARKER.as_bytes()));
    }

    #[tokio::test]
    async fn test_verify_match_and_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok.test"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"TEST x\n".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bad.test"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"other".to_vec()))
            .mount(&server)
            .await;

        let verifier = Verifier::new().unwrap();
        verifier
            .verify(&format!("{}/ok.test", server.uri()), b"TEST x\n")
            .await
            .unwrap();

        let err = verifier
            .verify(&format!("{}/bad.test", server.uri()), b"TEST x\n")
            .await
            .unwrap_err();
        assert!(matches!(err, VerificationError::Mismatch { expected: 7, actual: 5, .. }));
    }

    #[tokio::test]
    async fn test_verify_not_found() {
        let server = MockServer::start().await;
        let err = Verifier::new()
            .unwrap()
            .verify(&format!("{}/missing.test", server.uri()), b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, VerificationError::Status { status: 404, .. }));
    }
}
