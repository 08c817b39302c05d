//! Capture sources.
//!
//! A `CaptureSource` owns one imaging device for its whole lifetime. The device
//! lives on its own thread (`camera-device`) where the blocking `acquire` runs;
//! a worker thread (`camera-background`) waits on it with the capture timeout.
//! Callers request a capture without blocking; the registered callback later
//! receives exactly one `Frame` or `CaptureError` per accepted request, on the
//! worker thread. A device that is still blocked when the timeout passes yields
//! `Timeout`, and whatever it returns later is zeroized and dropped.
//!
//! Device backends:
//! - `stub://` synthetic device (testing, demos)
//! - HTTP(S) snapshot cameras
//! - Local still-image files
//! - V4L2 devices (feature: capture-v4l2)
//!
//! The capture layer MUST NOT:
//! - Retry a failed acquisition
//! - Queue or coalesce a second request while one is in flight
//! - Log frame content

pub mod snapshot;
pub mod still;
pub mod stub;
#[cfg(feature = "capture-v4l2")]
pub mod v4l2;

use anyhow::anyhow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use zeroize::Zeroize;

use crate::error::CaptureError;
use crate::frame::Frame;

pub use snapshot::SnapshotDevice;
pub use still::StillImageDevice;
pub use stub::StubDevice;
#[cfg(feature = "capture-v4l2")]
pub use v4l2::V4l2Device;

pub const DEFAULT_CAPTURE_DEVICE: &str = "stub://camera";
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);
const WORKER_THREAD_NAME: &str = "camera-background";
const DEVICE_THREAD_NAME: &str = "camera-device";

/// Configuration for a capture source.
#[derive(Clone, Debug)]
pub struct CaptureConfig {
    /// Device locator: `stub://name`, `http(s)://snapshot-url`, `/dev/videoN`, or a file path.
    pub device: String,
    /// Upper bound on a single acquisition. Slower acquisitions surface as `Timeout`.
    pub timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_CAPTURE_DEVICE.to_string(),
            timeout: DEFAULT_CAPTURE_TIMEOUT,
        }
    }
}

/// A hardware (or synthetic) imaging device.
///
/// Implementations are driven from the capture worker thread only: `open` once,
/// then `acquire` once per request. The device is released when it is dropped.
pub trait CaptureDevice: Send {
    fn describe(&self) -> String;

    fn open(&mut self) -> Result<(), CaptureError>;

    /// Blocking acquisition of one frame's bytes.
    fn acquire(&mut self) -> Result<Vec<u8>, CaptureError>;
}

/// Build the device backend named by `config.device`.
pub fn device_from_config(config: &CaptureConfig) -> Result<Box<dyn CaptureDevice>, CaptureError> {
    let device = config.device.trim();
    if device.is_empty() {
        return Err(CaptureError::DeviceUnavailable(
            "capture device not configured".to_string(),
        ));
    }
    if device.starts_with("stub://") {
        return Ok(Box::new(StubDevice::parse(device)?));
    }
    if device.starts_with("http://") || device.starts_with("https://") {
        return Ok(Box::new(SnapshotDevice::new(device, config.timeout)?));
    }
    if device.starts_with("/dev/video") {
        #[cfg(feature = "capture-v4l2")]
        {
            return Ok(Box::new(V4l2Device::new(device)));
        }
        #[cfg(not(feature = "capture-v4l2"))]
        {
            return Err(CaptureError::DeviceUnavailable(format!(
                "{} requires the capture-v4l2 feature",
                device
            )));
        }
    }
    if device.contains("://") {
        return Err(CaptureError::DeviceUnavailable(format!(
            "unsupported capture device scheme in '{}'",
            device
        )));
    }
    Ok(Box::new(StillImageDevice::new(device)))
}

pub(crate) fn io_capture_error(context: &str, err: std::io::Error) -> CaptureError {
    match err.kind() {
        std::io::ErrorKind::PermissionDenied => {
            CaptureError::PermissionDenied(format!("{}: {}", context, err))
        }
        _ => CaptureError::DeviceUnavailable(format!("{}: {}", context, err)),
    }
}

enum WorkerMessage {
    /// Start one acquisition.
    Capture,
    /// Bytes (or error) back from the device thread for `request`.
    Acquired {
        request: u64,
        result: Result<Vec<u8>, CaptureError>,
    },
    Stop,
}

/// Handle to a device running on its capture worker.
///
/// Dropping the handle (or calling `shutdown`) cancels any in-flight capture.
/// The device is released once its thread finishes the acquisition it is in;
/// shutdown waits at most one capture timeout for that before detaching.
pub struct CaptureSource {
    description: String,
    messages: Option<mpsc::Sender<WorkerMessage>>,
    in_flight: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
    frames_captured: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
    device_released: Option<mpsc::Receiver<()>>,
    release_grace: Duration,
}

impl CaptureSource {
    /// Open the device named by `config` and register `callback` for capture results.
    pub fn initialize<F>(config: &CaptureConfig, callback: F) -> Result<Self, CaptureError>
    where
        F: FnMut(Result<Frame, CaptureError>) + Send + 'static,
    {
        let device = device_from_config(config)?;
        Self::with_device(device, config.timeout, callback)
    }

    /// Run a caller-supplied device.
    ///
    /// The device is opened on its own thread; an open failure is returned
    /// here and `callback` is never invoked.
    pub fn with_device<F>(
        device: Box<dyn CaptureDevice>,
        timeout: Duration,
        callback: F,
    ) -> Result<Self, CaptureError>
    where
        F: FnMut(Result<Frame, CaptureError>) + Send + 'static,
    {
        let description = device.describe();
        let (messages, inbox) = mpsc::channel();
        let (acquisitions, requests) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let (released_tx, released_rx) = mpsc::sync_channel(1);

        let results = messages.clone();
        thread::Builder::new()
            .name(DEVICE_THREAD_NAME.to_string())
            .spawn(move || run_device(device, requests, results, ready_tx, released_tx))
            .map_err(|e| {
                CaptureError::DeviceUnavailable(format!("spawn capture device thread: {}", e))
            })?;

        let opened = ready_rx.recv().unwrap_or_else(|_| {
            Err(CaptureError::DeviceUnavailable(
                "capture device thread exited while opening device".to_string(),
            ))
        });
        if let Err(err) = opened {
            let _ = released_rx.recv_timeout(timeout);
            log::error!("CaptureSource: failed to open {}: {}", description, err);
            return Err(err);
        }

        let in_flight = Arc::new(AtomicBool::new(false));
        let cancelled = Arc::new(AtomicBool::new(false));
        let frames_captured = Arc::new(AtomicU64::new(0));
        let worker = CaptureWorker {
            description: description.clone(),
            acquisitions,
            callback: Box::new(callback),
            timeout,
            in_flight: in_flight.clone(),
            cancelled: cancelled.clone(),
            frames_captured: frames_captured.clone(),
        };
        // On spawn failure the worker (and its acquisition sender) is dropped,
        // which ends the device thread.
        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || worker.run(inbox))
            .map_err(|e| {
                CaptureError::DeviceUnavailable(format!("spawn capture worker: {}", e))
            })?;

        log::info!(
            "CaptureSource: {} ready on {} (timeout {}ms)",
            description,
            WORKER_THREAD_NAME,
            timeout.as_millis()
        );
        Ok(Self {
            description,
            messages: Some(messages),
            in_flight,
            cancelled,
            frames_captured,
            worker: Some(handle),
            device_released: Some(released_rx),
            release_grace: timeout,
        })
    }

    /// Start an asynchronous acquisition.
    ///
    /// Returns `Busy` if a capture is already in flight; the pending one is unaffected.
    pub fn request_capture(&self) -> Result<(), CaptureError> {
        let messages = self.messages.as_ref().ok_or_else(|| {
            CaptureError::DeviceUnavailable("capture source shut down".to_string())
        })?;
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CaptureError::Busy);
        }
        if messages.send(WorkerMessage::Capture).is_err() {
            self.in_flight.store(false, Ordering::SeqCst);
            return Err(CaptureError::DeviceUnavailable(
                "capture worker stopped".to_string(),
            ));
        }
        log::debug!("CaptureSource: capture requested on {}", self.description);
        Ok(())
    }

    pub fn is_capturing(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::SeqCst)
    }

    pub fn describe(&self) -> &str {
        &self.description
    }

    /// Release the device. An in-flight capture is cancelled: its callback does not fire.
    pub fn shutdown(mut self) -> anyhow::Result<()> {
        self.stop_worker()
    }

    fn stop_worker(&mut self) -> anyhow::Result<()> {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(messages) = self.messages.take() {
            let _ = messages.send(WorkerMessage::Stop);
        }
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| anyhow!("capture worker thread panicked"))?;
        }
        if let Some(released) = self.device_released.take() {
            match released.recv_timeout(self.release_grace) {
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                    log::info!("CaptureSource: {} shut down", self.description);
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    log::warn!(
                        "CaptureSource: {} still acquiring after {}ms, detaching device thread",
                        self.description,
                        self.release_grace.as_millis()
                    );
                }
            }
        }
        Ok(())
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        if let Err(e) = self.stop_worker() {
            log::error!("CaptureSource: {}", e);
        }
    }
}

/// Owns the device: opens it, then runs one blocking `acquire` per request.
/// The device is dropped on this thread, then `released` is signalled.
fn run_device(
    mut device: Box<dyn CaptureDevice>,
    requests: mpsc::Receiver<u64>,
    results: mpsc::Sender<WorkerMessage>,
    ready: mpsc::SyncSender<Result<(), CaptureError>>,
    released: mpsc::SyncSender<()>,
) {
    match device.open() {
        Err(err) => {
            let _ = ready.send(Err(err));
        }
        Ok(()) => {
            let _ = ready.send(Ok(()));
            while let Ok(request) = requests.recv() {
                let result = device.acquire();
                if let Err(mpsc::SendError(WorkerMessage::Acquired { result, .. })) =
                    results.send(WorkerMessage::Acquired { request, result })
                {
                    discard(result);
                    break;
                }
            }
        }
    }
    let description = device.describe();
    drop(device);
    log::debug!("CaptureSource: released {}", description);
    let _ = released.send(());
}

fn discard(result: Result<Vec<u8>, CaptureError>) {
    if let Ok(mut bytes) = result {
        bytes.zeroize();
    }
}

type CaptureCallback = Box<dyn FnMut(Result<Frame, CaptureError>) + Send>;

struct CaptureWorker {
    description: String,
    acquisitions: mpsc::Sender<u64>,
    callback: CaptureCallback,
    timeout: Duration,
    in_flight: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
    frames_captured: Arc<AtomicU64>,
}

impl CaptureWorker {
    fn run(mut self, inbox: mpsc::Receiver<WorkerMessage>) {
        let mut next_request = 0u64;
        // (request id, start) of the acquisition being waited on.
        let mut pending: Option<(u64, Instant)> = None;

        loop {
            let message = match pending {
                Some((_, started)) => {
                    let remaining = self.timeout.saturating_sub(started.elapsed());
                    match inbox.recv_timeout(remaining) {
                        Ok(message) => message,
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            pending = None;
                            log::warn!(
                                "CaptureSource: {} did not deliver within {}ms",
                                self.description,
                                self.timeout.as_millis()
                            );
                            self.finish(Err(CaptureError::Timeout(self.timeout)));
                            continue;
                        }
                        Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match inbox.recv() {
                    Ok(message) => message,
                    Err(_) => break,
                },
            };

            match message {
                WorkerMessage::Stop => break,
                WorkerMessage::Capture => {
                    next_request += 1;
                    if self.acquisitions.send(next_request).is_err() {
                        self.finish(Err(CaptureError::DeviceUnavailable(
                            "capture device thread stopped".to_string(),
                        )));
                        continue;
                    }
                    pending = Some((next_request, Instant::now()));
                }
                WorkerMessage::Acquired { request, result } => match pending {
                    Some((expected, started)) if expected == request => {
                        pending = None;
                        let result = self.frame_from(result, started.elapsed());
                        self.finish(result);
                    }
                    _ => {
                        log::debug!(
                            "CaptureSource: dropping late result #{} from {}",
                            request,
                            self.description
                        );
                        discard(result);
                    }
                },
            }
        }
        log::debug!("CaptureSource: worker for {} exiting", self.description);
    }

    fn frame_from(
        &self,
        acquired: Result<Vec<u8>, CaptureError>,
        elapsed: Duration,
    ) -> Result<Frame, CaptureError> {
        let bytes = acquired?;
        if elapsed > self.timeout {
            discard(Ok(bytes));
            return Err(CaptureError::Timeout(self.timeout));
        }
        let sequence = self.frames_captured.load(Ordering::SeqCst) + 1;
        self.frames_captured.store(sequence, Ordering::SeqCst);
        log::debug!(
            "CaptureSource: frame #{} ({} bytes) in {}ms",
            sequence,
            bytes.len(),
            elapsed.as_millis()
        );
        Ok(Frame::new(bytes, sequence))
    }

    fn finish(&mut self, result: Result<Frame, CaptureError>) {
        if self.cancelled.load(Ordering::SeqCst) {
            log::debug!(
                "CaptureSource: dropping result of cancelled capture on {}",
                self.description
            );
            return;
        }
        self.in_flight.store(false, Ordering::SeqCst);
        (self.callback)(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_scheme_is_rejected() {
        let config = CaptureConfig {
            device: "rtsp://camera/stream".to_string(),
            ..CaptureConfig::default()
        };
        let err = device_from_config(&config).err().expect("scheme rejected");
        assert!(matches!(err, CaptureError::DeviceUnavailable(_)));
    }

    #[test]
    fn empty_device_is_rejected() {
        let config = CaptureConfig {
            device: "  ".to_string(),
            ..CaptureConfig::default()
        };
        assert!(device_from_config(&config).is_err());
    }

    #[cfg(not(feature = "capture-v4l2"))]
    #[test]
    fn v4l2_paths_require_feature() {
        let config = CaptureConfig {
            device: "/dev/video0".to_string(),
            ..CaptureConfig::default()
        };
        let err = device_from_config(&config).err().expect("feature required");
        assert!(err.to_string().contains("capture-v4l2"));
    }

    #[test]
    fn io_permission_errors_map_to_permission_denied() {
        let err = io_capture_error(
            "open",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope"),
        );
        assert!(matches!(err, CaptureError::PermissionDenied(_)));
    }
}
