//! Upload pipeline tests
//!
//! Runs the full resolver -> consolidator -> addresser -> transport -> URL
//! pipeline against a transporter that copies into a local "remote" tree and
//! publishes every copied file on a wiremock server, so the self-test can
//! read uploads back over HTTP.

use async_trait::async_trait;
use bytes::Bytes;
use hashdrop::addressing::ContentDigest;
use hashdrop::config::{RawSection, Registry};
use hashdrop::payload::{InputSet, InputSource, PayloadKind};
use hashdrop::selftest::{SelfTest, VerificationError, Verifier};
use hashdrop::transport::{TransferError, Transporter};
use hashdrop::upload::{UploadError, UploadRequest, Uploader};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Test transport
// ============================================================================

/// Copies uploads below `root` the way scp lays them out remotely and serves
/// every copied file at `/drop/<relative path>`.
struct LocalTransporter {
    root: PathBuf,
    server: Option<MockServer>,
    corrupt: bool,
    calls: AtomicUsize,
}

impl LocalTransporter {
    fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            server: None,
            corrupt: false,
            calls: AtomicUsize::new(0),
        }
    }

    fn serving(mut self, server: MockServer) -> Self {
        self.server = Some(server);
        self
    }

    fn corrupting(mut self) -> Self {
        self.corrupt = true;
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn publish(&self, relative: &str, file: &Path) {
        let Some(server) = &self.server else {
            return;
        };
        let mut body = fs::read(file).unwrap();
        if self.corrupt {
            body.push(b'!');
        }
        Mock::given(method("GET"))
            .and(path(format!("/drop/{}", relative)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(server)
            .await;
    }

    fn refuse(local: &Path, remote_path: &str, reason: &str) -> TransferError {
        TransferError::Failed {
            command: format!("scp -p -q {} local:{}", local.display(), remote_path),
            status: "exit status: 1".into(),
            stderr: reason.to_string(),
        }
    }
}

/// Follows scp's placement rules: an existing directory target receives the
/// source inside it, any other target is created as the copy, and a missing
/// parent is an error.
#[async_trait]
impl Transporter for LocalTransporter {
    async fn transfer(
        &self,
        local: &Path,
        _remote_host: &str,
        remote_path: &str,
        recursive: bool,
    ) -> Result<(), TransferError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut target = self.root.join(remote_path.trim_start_matches('/'));
        if target.is_dir() {
            target = target.join(local.file_name().unwrap());
        }
        if !target.parent().map(Path::is_dir).unwrap_or(false) {
            return Err(Self::refuse(local, remote_path, "No such file or directory"));
        }
        let served_root = target
            .strip_prefix(self.root.join("www/drop"))
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| PathBuf::from(target.file_name().unwrap()));

        if recursive {
            for entry in walkdir::WalkDir::new(local) {
                let entry = entry.unwrap();
                let relative = entry.path().strip_prefix(local).unwrap();
                let dest = target.join(relative);
                if entry.file_type().is_dir() {
                    fs::create_dir_all(&dest).unwrap();
                } else {
                    fs::copy(entry.path(), &dest).unwrap();
                    let served = served_root.join(relative);
                    self.publish(&served.to_string_lossy(), entry.path()).await;
                }
            }
        } else {
            if local.is_dir() {
                return Err(Self::refuse(local, remote_path, "not a regular file"));
            }
            fs::copy(local, &target).unwrap();
            self.publish(&served_root.to_string_lossy(), local).await;
        }
        Ok(())
    }
}

/// Transport that always fails
struct FailingTransporter;

#[async_trait]
impl Transporter for FailingTransporter {
    async fn transfer(
        &self,
        local: &Path,
        remote_host: &str,
        remote_path: &str,
        _recursive: bool,
    ) -> Result<(), TransferError> {
        Err(TransferError::Failed {
            command: format!("scp -p -q {} {}:{}", local.display(), remote_host, remote_path),
            status: "exit status: 1".into(),
            stderr: "Connection refused".into(),
        })
    }
}

// ============================================================================
// Fixtures
// ============================================================================

fn registry(url_base: &str, hash_length: &str) -> Registry {
    let mut sections = BTreeMap::new();
    sections.insert(
        "DEFAULT".to_string(),
        RawSection {
            destination: Some("local".into()),
            ..Default::default()
        },
    );
    sections.insert(
        "local".to_string(),
        RawSection {
            remoteserver: Some("tester@localhost".into()),
            remotedir: Some("/www/drop".into()),
            url: Some(url_base.to_string()),
            chmod: Some("644".into()),
            hashlength: Some(hash_length.into()),
            ..Default::default()
        },
    );
    Registry::from_sections(sections).unwrap()
}

fn named(name: &str, data: &[u8]) -> InputSource {
    InputSource::Bytes {
        name: name.into(),
        data: Bytes::copy_from_slice(data),
    }
}

/// Local stand-in for the remote host with `/www/drop` in place.
fn remote_root() -> tempfile::TempDir {
    let remote = tempfile::tempdir().unwrap();
    fs::create_dir_all(remote.path().join("www/drop")).unwrap();
    remote
}

fn is_empty_dir(dir: &Path) -> bool {
    fs::read_dir(dir).unwrap().next().is_none()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_flat_upload_layout_and_url() {
    let remote = remote_root();
    let staging = tempfile::tempdir().unwrap();
    let registry = registry("https://files.example.org/drop/", "8");
    let transporter = LocalTransporter::new(remote.path());

    let request = UploadRequest::new(InputSet::single(named("hello.txt", b"hello")));
    let outcome = Uploader::new(&registry, &transporter)
        .staging_root(staging.path())
        .upload(&request)
        .await
        .unwrap();

    assert_eq!(outcome.url, "https://files.example.org/drop/qvTGHdzF.txt");
    assert_eq!(outcome.kind, PayloadKind::Single);
    assert_eq!(
        fs::read(remote.path().join("www/drop/qvTGHdzF.txt")).unwrap(),
        b"hello"
    );
    assert!(is_empty_dir(staging.path()));
}

#[cfg(unix)]
#[tokio::test]
async fn test_flat_upload_applies_mode() {
    use std::os::unix::fs::PermissionsExt;

    let remote = remote_root();
    let staging = tempfile::tempdir().unwrap();
    let mut registry_sections = BTreeMap::new();
    registry_sections.insert(
        "private".to_string(),
        RawSection {
            remoteserver: Some("h".into()),
            remotedir: Some("/".into()),
            url: Some("https://h/".into()),
            chmod: Some("0600".into()),
            ..Default::default()
        },
    );
    let registry = Registry::from_sections(registry_sections).unwrap();
    let transporter = LocalTransporter::new(remote.path());

    let outcome = Uploader::new(&registry, &transporter)
        .staging_root(staging.path())
        .upload(&UploadRequest::new(InputSet::single(named("k.pem", b"key"))).destination("private"))
        .await
        .unwrap();

    let file_name = outcome.url.trim_start_matches("https://h/");
    let mode = fs::metadata(remote.path().join(file_name))
        .unwrap()
        .permissions()
        .mode();
    // fs::copy carries the staged mode over.
    assert_eq!(mode & 0o777, 0o600);
}

#[tokio::test]
async fn test_preserve_upload_layout_and_url() {
    let remote = remote_root();
    let staging = tempfile::tempdir().unwrap();
    let registry = registry("https://files.example.org/drop/", "8");
    let transporter = LocalTransporter::new(remote.path());

    let request =
        UploadRequest::new(InputSet::single(named("Quarterly Report.pdf", b"hello"))).preserve_name(true);
    let outcome = Uploader::new(&registry, &transporter)
        .staging_root(staging.path())
        .upload(&request)
        .await
        .unwrap();

    assert_eq!(
        outcome.url,
        "https://files.example.org/drop/qvTGHdzF/Quarterly%20Report.pdf"
    );
    assert_eq!(
        fs::read(remote.path().join("www/drop/qvTGHdzF/Quarterly Report.pdf")).unwrap(),
        b"hello"
    );
    assert!(is_empty_dir(staging.path()));
}

#[tokio::test]
async fn test_preserve_upload_into_missing_remote_dir_fails() {
    let remote = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();
    let registry = registry("https://files.example.org/drop/", "8");
    let transporter = LocalTransporter::new(remote.path());

    let request = UploadRequest::new(InputSet::single(named("hello.txt", b"hello"))).preserve_name(true);
    let err = Uploader::new(&registry, &transporter)
        .staging_root(staging.path())
        .upload(&request)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "transfer");
    assert_eq!(transporter.calls(), 1);
    // Nothing was created in place of the digest directory.
    assert!(is_empty_dir(remote.path()));
    assert!(is_empty_dir(staging.path()));
}

#[tokio::test]
async fn test_hash_length_is_respected_exactly() {
    let remote = remote_root();
    for length in [1usize, 4, 13, 27] {
        let registry = registry("https://h/", &length.to_string());
        let transporter = LocalTransporter::new(remote.path());
        let outcome = Uploader::new(&registry, &transporter)
            .upload(&UploadRequest::new(InputSet::single(named("blob", b"data"))))
            .await
            .unwrap();

        let name = outcome.url.trim_start_matches("https://h/");
        assert_eq!(name.len(), length, "hash length {}", length);
        let full = ContentDigest::of_bytes(b"data").encode(27).unwrap();
        assert!(full.starts_with(name));
    }
}

#[tokio::test]
async fn test_distinct_content_gets_distinct_names() {
    let remote = remote_root();
    let registry = registry("https://h/", "10");
    let transporter = LocalTransporter::new(remote.path());
    let uploader = Uploader::new(&registry, &transporter);

    let mut urls = std::collections::HashSet::new();
    for _ in 0..20 {
        let data: [u8; 32] = rand::random();
        let outcome = uploader
            .upload(&UploadRequest::new(InputSet::single(named("r.bin", &data))))
            .await
            .unwrap();
        urls.insert(outcome.url);
    }
    assert_eq!(urls.len(), 20);
}

#[tokio::test]
async fn test_multi_file_archive_upload() {
    let remote = remote_root();
    let staging = tempfile::tempdir().unwrap();
    let registry = registry("https://h/", "8");
    let transporter = LocalTransporter::new(remote.path());

    let inputs = InputSet::new(vec![named("a.txt", b"a"), named("b.txt", b"b")]).unwrap();
    let outcome = Uploader::new(&registry, &transporter)
        .staging_root(staging.path())
        .upload(&UploadRequest::new(inputs).extension("zip"))
        .await
        .unwrap();

    assert_eq!(outcome.kind, PayloadKind::Archive);
    assert!(outcome.url.ends_with(".zip"));
    assert_eq!(transporter.calls(), 1);
    assert!(is_empty_dir(staging.path()));
}

#[tokio::test]
async fn test_preserve_with_two_inputs_makes_no_transport_call() {
    let remote = remote_root();
    let staging = tempfile::tempdir().unwrap();
    let registry = registry("https://h/", "8");
    let transporter = LocalTransporter::new(remote.path());

    let inputs = InputSet::new(vec![named("a.txt", b"a"), named("b.txt", b"b")]).unwrap();
    let err = Uploader::new(&registry, &transporter)
        .staging_root(staging.path())
        .upload(&UploadRequest::new(inputs).preserve_name(true))
        .await
        .unwrap_err();

    assert!(err.is_invalid_args());
    assert_eq!(transporter.calls(), 0);
    assert!(is_empty_dir(&remote.path().join("www/drop")));
    assert!(is_empty_dir(staging.path()));
}

#[tokio::test]
async fn test_traversal_extension_rejected_before_transport() {
    let remote = remote_root();
    let registry = registry("https://h/", "8");
    let transporter = LocalTransporter::new(remote.path());

    let err = Uploader::new(&registry, &transporter)
        .upload(&UploadRequest::new(InputSet::single(named("a.txt", b"a"))).extension("../evil"))
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::InvalidArgs(_)));
    assert_eq!(transporter.calls(), 0);
}

#[tokio::test]
async fn test_collision_uploads_nothing() {
    let inputs_dir = tempfile::tempdir().unwrap();
    let remote = remote_root();
    let staging = tempfile::tempdir().unwrap();
    fs::create_dir_all(inputs_dir.path().join("one")).unwrap();
    fs::create_dir_all(inputs_dir.path().join("two")).unwrap();
    fs::write(inputs_dir.path().join("one/a.txt"), b"1").unwrap();
    fs::write(inputs_dir.path().join("two/a.txt"), b"2").unwrap();

    let registry = registry("https://h/", "8");
    let transporter = LocalTransporter::new(remote.path());
    let inputs = InputSet::new(vec![
        InputSource::Path(inputs_dir.path().join("one/a.txt")),
        InputSource::Path(inputs_dir.path().join("two/a.txt")),
    ])
    .unwrap();

    let err = Uploader::new(&registry, &transporter)
        .staging_root(staging.path())
        .upload(&UploadRequest::new(inputs))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "invalid_args");
    assert_eq!(transporter.calls(), 0);
    assert!(is_empty_dir(staging.path()));
}

#[tokio::test]
async fn test_transfer_failure_reports_command_and_cleans_up() {
    let staging = tempfile::tempdir().unwrap();
    let registry = registry("https://h/", "8");

    let err = Uploader::new(&registry, &FailingTransporter)
        .staging_root(staging.path())
        .upload(&UploadRequest::new(InputSet::single(named("a.txt", b"a"))))
        .await
        .unwrap_err();

    match &err {
        UploadError::Transfer(e) => {
            assert!(e.command().contains("tester@localhost:/www/drop/"));
            assert!(err.to_string().contains("Connection refused"));
        }
        other => panic!("Expected Transfer error, got {:?}", other),
    }
    assert!(is_empty_dir(staging.path()));
}

#[tokio::test]
async fn test_self_test_round_trip() {
    let server = MockServer::start().await;
    let registry = registry(&format!("{}/drop/", server.uri()), "8");
    let remote = remote_root();
    let staging = tempfile::tempdir().unwrap();
    let transporter = LocalTransporter::new(remote.path()).serving(server);
    let uploader = Uploader::new(&registry, &transporter).staging_root(staging.path());

    let test = SelfTest::new(Verifier::new().unwrap());
    let outcome = test.run(&uploader, None).await.unwrap();

    assert!(outcome.url.ends_with(".test"));
    assert_eq!(outcome.bytes, test.payload().len() as u64);
    assert!(is_empty_dir(staging.path()));
}

#[tokio::test]
async fn test_self_test_detects_mismatch() {
    let server = MockServer::start().await;
    let registry = registry(&format!("{}/drop/", server.uri()), "8");
    let remote = remote_root();
    let transporter = LocalTransporter::new(remote.path())
        .serving(server)
        .corrupting();
    let uploader = Uploader::new(&registry, &transporter);

    let test = SelfTest::new(Verifier::new().unwrap());
    let err = test.run(&uploader, Some("loc")).await.unwrap_err();

    assert_eq!(err.kind(), "verification");
    assert!(matches!(
        err,
        UploadError::Verification(VerificationError::Mismatch { .. })
    ));
}
