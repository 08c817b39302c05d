//! Upload sinks.
//!
//! An `UploadSink` transmits one frame's bytes to an object store and resolves
//! to exactly one `UploadResult`. The pipeline never retries: a failure is
//! terminal for that attempt. Repeated uploads to the same destination
//! overwrite it (last write wins).
//!
//! Sinks:
//! - `HttpObjectStore`: HTTP(S) object-storage endpoint (PUT)
//! - `LocalObjectStore`: filesystem directory (`file://` or plain path)

pub mod http;
pub mod local;

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use url::Url;

use crate::error::UploadError;
use crate::frame::Frame;

pub use http::HttpObjectStore;
pub use local::LocalObjectStore;

pub const DEFAULT_DESTINATION: &str = "test-photo.png";
pub const DEFAULT_UPLOAD_ENDPOINT: &str = "uploads";
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const UPLOAD_THREAD_NAME: &str = "upload";

// ----------------------------------------------------------------------------
// Destination
// ----------------------------------------------------------------------------

/// Fixed object path inside the store, e.g. `captures/front.png`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Destination(String);

impl Destination {
    pub fn parse(path: &str) -> Result<Self> {
        if path.is_empty() {
            return Err(anyhow!("destination must not be empty"));
        }
        if path.starts_with('/') || path.ends_with('/') {
            return Err(anyhow!(
                "destination '{}' must be a relative object path without leading or trailing '/'",
                path
            ));
        }
        if path.contains('\\') || path.contains('\0') {
            return Err(anyhow!("destination '{}' contains a forbidden character", path));
        }
        for segment in path.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(anyhow!(
                    "destination '{}' contains an invalid segment '{}'",
                    path,
                    segment
                ));
            }
        }
        Ok(Self(path.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Last path segment.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl Default for Destination {
    fn default() -> Self {
        Self(DEFAULT_DESTINATION.to_string())
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content type implied by the destination's extension.
pub fn guess_content_type(destination: &Destination) -> &'static str {
    let name = destination.file_name();
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}

// ----------------------------------------------------------------------------
// Results and the sink trait
// ----------------------------------------------------------------------------

/// Terminal outcome of one upload attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UploadResult {
    Success { locator: Url },
    Failure { reason: String },
}

impl UploadResult {
    pub fn is_success(&self) -> bool {
        matches!(self, UploadResult::Success { .. })
    }

    pub fn locator(&self) -> Option<&Url> {
        match self {
            UploadResult::Success { locator } => Some(locator),
            UploadResult::Failure { .. } => None,
        }
    }
}

impl From<std::result::Result<Url, UploadError>> for UploadResult {
    fn from(result: std::result::Result<Url, UploadError>) -> Self {
        match result {
            Ok(locator) => UploadResult::Success { locator },
            Err(err) => UploadResult::Failure {
                reason: err.to_string(),
            },
        }
    }
}

/// A remote (or local) object store.
pub trait UploadSink: Send + Sync {
    fn name(&self) -> &str;

    /// Blocking write of `bytes` to `destination`. Overwrites silently.
    fn put_object(
        &self,
        destination: &Destination,
        bytes: &[u8],
    ) -> std::result::Result<Url, UploadError>;
}

/// Configuration for an upload sink.
#[derive(Clone, Debug)]
pub struct UploadConfig {
    /// `http(s)://` store endpoint, `file://` URL, or local directory.
    pub endpoint: String,
    pub destination: Destination,
    /// Overrides the content type guessed from the destination extension.
    pub content_type: Option<String>,
    /// File holding a bearer token for HTTP stores.
    pub token_path: Option<PathBuf>,
    pub timeout: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_UPLOAD_ENDPOINT.to_string(),
            destination: Destination::default(),
            content_type: None,
            token_path: None,
            timeout: DEFAULT_UPLOAD_TIMEOUT,
        }
    }
}

/// Build the sink named by `config.endpoint`.
pub fn sink_from_config(config: &UploadConfig) -> Result<Arc<dyn UploadSink>> {
    let endpoint = config.endpoint.trim();
    if endpoint.is_empty() {
        return Err(anyhow!("upload endpoint must not be empty"));
    }
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        let token = match &config.token_path {
            Some(path) => Some(read_token(path)?),
            None => None,
        };
        let store = HttpObjectStore::new(
            endpoint,
            token,
            config.content_type.clone(),
            config.timeout,
        )?;
        return Ok(Arc::new(store));
    }
    if endpoint.starts_with("file://") {
        let url = Url::parse(endpoint).context("parse file endpoint")?;
        let root = url
            .to_file_path()
            .map_err(|_| anyhow!("file endpoint '{}' is not a local path", endpoint))?;
        return Ok(Arc::new(LocalObjectStore::new(root)?));
    }
    if endpoint.contains("://") {
        return Err(anyhow!(
            "unsupported upload endpoint '{}'; expected http(s)://, file:// or a directory",
            endpoint
        ));
    }
    Ok(Arc::new(LocalObjectStore::new(endpoint)?))
}

fn read_token(path: &std::path::Path) -> Result<String> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read upload token {}", path.display()))?;
    let token = raw.trim().to_string();
    if token.is_empty() {
        return Err(anyhow!("upload token file {} is empty", path.display()));
    }
    Ok(token)
}

// ----------------------------------------------------------------------------
// Asynchronous upload
// ----------------------------------------------------------------------------

/// An upload running on its own thread. Resolves exactly once.
pub struct PendingUpload {
    receiver: mpsc::Receiver<UploadResult>,
}

impl PendingUpload {
    /// Block until the upload finishes.
    pub fn wait(self) -> UploadResult {
        self.receiver.recv().unwrap_or_else(|_| worker_gone())
    }

    /// Wait up to `timeout`. `None` means still running; the result can be
    /// taken by a later call. An upload thread that died without reporting
    /// resolves to a `Failure`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<UploadResult> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(mpsc::RecvTimeoutError::Timeout) => None,
            Err(mpsc::RecvTimeoutError::Disconnected) => Some(worker_gone()),
        }
    }

    pub fn try_result(&self) -> Option<UploadResult> {
        self.receiver.try_recv().ok()
    }
}

fn worker_gone() -> UploadResult {
    UploadResult::Failure {
        reason: "upload worker exited without a result".to_string(),
    }
}

/// Start uploading `frame` and return a handle to its pending result.
pub fn upload(sink: Arc<dyn UploadSink>, destination: Destination, frame: Frame) -> PendingUpload {
    let (tx, rx) = mpsc::channel();
    upload_with(sink, destination, frame, move |result| {
        let _ = tx.send(result);
    });
    PendingUpload { receiver: rx }
}

/// Fire-and-forget upload. `on_complete` is called exactly once, from the
/// upload thread (or inline if the thread cannot be started).
pub fn upload_with<F>(
    sink: Arc<dyn UploadSink>,
    destination: Destination,
    frame: Frame,
    on_complete: F,
) where
    F: FnOnce(UploadResult) + Send + 'static,
{
    let slot = Arc::new(Mutex::new(Some(on_complete)));
    let worker_slot = slot.clone();
    let spawned = thread::Builder::new()
        .name(UPLOAD_THREAD_NAME.to_string())
        .spawn(move || {
            let result = run_upload(sink.as_ref(), &destination, frame);
            if let Some(callback) = take_callback(&worker_slot) {
                callback(result);
            }
        });
    if let Err(e) = spawned {
        log::error!("upload: failed to start upload thread: {}", e);
        if let Some(callback) = take_callback(&slot) {
            callback(UploadResult::Failure {
                reason: format!("start upload thread: {}", e),
            });
        }
    }
}

fn take_callback<F>(slot: &Mutex<Option<F>>) -> Option<F> {
    match slot.lock() {
        Ok(mut guard) => guard.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    }
}

fn run_upload(sink: &dyn UploadSink, destination: &Destination, frame: Frame) -> UploadResult {
    let started = Instant::now();
    log::debug!(
        "{}: uploading frame #{} ({} bytes, sha256 {}) to {}",
        sink.name(),
        frame.sequence(),
        frame.len(),
        frame.content_sha256(),
        destination
    );
    let result = sink.put_object(destination, frame.as_bytes());
    match &result {
        Ok(locator) => log::info!(
            "{}: upload successful ({} bytes in {}ms) -> {}",
            sink.name(),
            frame.len(),
            started.elapsed().as_millis(),
            locator
        ),
        Err(err) => log::error!("{}: upload to {} failed: {}", sink.name(), destination, err),
    }
    UploadResult::from(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_rejects_unsafe_paths() {
        for bad in ["", "/abs.png", "dir/", "a//b.png", "../up.png", "a/./b", "a\\b"] {
            assert!(Destination::parse(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn destination_accepts_nested_paths_with_spaces() {
        let dest = Destination::parse("robots/Test Photo.PNG").expect("parse");
        assert_eq!(dest.segments().collect::<Vec<_>>(), vec!["robots", "Test Photo.PNG"]);
        assert_eq!(dest.file_name(), "Test Photo.PNG");
        assert_eq!(guess_content_type(&dest), "image/png");
    }

    #[test]
    fn content_type_falls_back_to_octet_stream() {
        let dest = Destination::parse("frame").expect("parse");
        assert_eq!(guess_content_type(&dest), "application/octet-stream");
        let dest = Destination::parse("snap.JPEG").expect("parse");
        assert_eq!(guess_content_type(&dest), "image/jpeg");
    }

    #[test]
    fn upload_result_from_error_keeps_reason_only() {
        let result = UploadResult::from(Err(UploadError::new(
            crate::error::UploadErrorKind::Quota,
            "bucket full",
        )));
        assert_eq!(
            result,
            UploadResult::Failure {
                reason: "quota: bucket full".to_string()
            }
        );
        assert!(result.locator().is_none());
    }

    #[test]
    fn wait_timeout_reports_dead_upload_thread() {
        let (tx, rx) = mpsc::channel::<UploadResult>();
        drop(tx);
        let pending = PendingUpload { receiver: rx };
        assert_eq!(
            pending.wait_timeout(Duration::from_millis(10)),
            Some(UploadResult::Failure {
                reason: "upload worker exited without a result".to_string()
            })
        );
    }

    #[test]
    fn wait_timeout_is_none_while_running() {
        let (_tx, rx) = mpsc::channel::<UploadResult>();
        let pending = PendingUpload { receiver: rx };
        assert!(pending.wait_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn unsupported_endpoint_scheme_is_rejected() {
        let config = UploadConfig {
            endpoint: "gs://bucket".to_string(),
            ..UploadConfig::default()
        };
        assert!(sink_from_config(&config).is_err());
    }
}
