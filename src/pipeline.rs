//! Capture-then-upload pipeline.
//!
//! A trigger asks the capture source for one frame. When the capture worker
//! delivers it, the frame is handed straight to the upload sink and the
//! terminal upload result is published as a `PipelineEvent`.
//!
//! State machine: `Idle -> Capturing -> Uploading -> Idle`, or
//! `Idle -> Capturing -> Idle` when the capture fails (no upload is attempted).
//! Triggers arriving in any state other than `Idle` are rejected, not queued.

use anyhow::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::capture::{device_from_config, CaptureDevice, CaptureSource};
use crate::config::RelayConfig;
use crate::error::{CaptureError, TriggerError};
use crate::frame::Frame;
use crate::upload::{sink_from_config, upload_with, Destination, UploadResult, UploadSink};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Capturing,
    Uploading,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Capturing => "capturing",
            PipelineState::Uploading => "uploading",
        }
    }
}

/// Terminal outcome of one accepted trigger.
#[derive(Debug)]
pub enum PipelineEvent {
    CaptureFailed {
        error: CaptureError,
    },
    UploadFinished {
        sequence: u64,
        bytes: usize,
        result: UploadResult,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineCounters {
    pub triggers: u64,
    pub rejected_triggers: u64,
    pub frames_captured: u64,
    pub capture_failures: u64,
    pub uploads_started: u64,
    pub uploads_succeeded: u64,
    pub uploads_failed: u64,
}

#[derive(Default)]
struct Counters {
    triggers: AtomicU64,
    rejected_triggers: AtomicU64,
    frames_captured: AtomicU64,
    capture_failures: AtomicU64,
    uploads_started: AtomicU64,
    uploads_succeeded: AtomicU64,
    uploads_failed: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn snapshot(&self) -> PipelineCounters {
        PipelineCounters {
            triggers: self.triggers.load(Ordering::SeqCst),
            rejected_triggers: self.rejected_triggers.load(Ordering::SeqCst),
            frames_captured: self.frames_captured.load(Ordering::SeqCst),
            capture_failures: self.capture_failures.load(Ordering::SeqCst),
            uploads_started: self.uploads_started.load(Ordering::SeqCst),
            uploads_succeeded: self.uploads_succeeded.load(Ordering::SeqCst),
            uploads_failed: self.uploads_failed.load(Ordering::SeqCst),
        }
    }
}

/// Live view of a pipeline's counters.
///
/// Outlives the pipeline and does not hold its event channel open, so a
/// final snapshot can be taken after in-flight uploads have drained.
#[derive(Clone)]
pub struct PipelineStats {
    counters: Arc<Counters>,
}

impl PipelineStats {
    pub fn snapshot(&self) -> PipelineCounters {
        self.counters.snapshot()
    }
}

struct Shared {
    state: Mutex<PipelineState>,
    counters: Arc<Counters>,
    events: Mutex<mpsc::Sender<PipelineEvent>>,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, next: PipelineState) {
        *self.lock_state() = next;
    }

    fn emit(&self, event: PipelineEvent) {
        let events = self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Nobody listening is fine: results are already logged.
        let _ = events.send(event);
    }

    fn on_capture(
        self: &Arc<Self>,
        captured: std::result::Result<Frame, CaptureError>,
        sink: &Arc<dyn UploadSink>,
        destination: &Destination,
    ) {
        let frame = match captured {
            Ok(frame) => frame,
            Err(error) => {
                Counters::bump(&self.counters.capture_failures);
                log::error!("Pipeline: capture failed, skipping upload: {}", error);
                self.set_state(PipelineState::Idle);
                self.emit(PipelineEvent::CaptureFailed { error });
                return;
            }
        };

        Counters::bump(&self.counters.frames_captured);
        Counters::bump(&self.counters.uploads_started);
        self.set_state(PipelineState::Uploading);

        let sequence = frame.sequence();
        let bytes = frame.len();
        log::info!(
            "Pipeline: frame #{} captured ({} bytes), uploading to {}",
            sequence,
            bytes,
            destination
        );

        let shared = Arc::clone(self);
        upload_with(sink.clone(), destination.clone(), frame, move |result| {
            if result.is_success() {
                Counters::bump(&shared.counters.uploads_succeeded);
            } else {
                Counters::bump(&shared.counters.uploads_failed);
            }
            shared.set_state(PipelineState::Idle);
            shared.emit(PipelineEvent::UploadFinished {
                sequence,
                bytes,
                result,
            });
        });
    }
}

/// One capture source wired to one upload sink and destination.
pub struct Pipeline {
    capture: CaptureSource,
    destination: Destination,
    shared: Arc<Shared>,
}

impl Pipeline {
    /// Start a pipeline over an already-built device and sink.
    ///
    /// Returns the pipeline plus the receiver for its terminal events.
    pub fn new(
        device: Box<dyn CaptureDevice>,
        capture_timeout: Duration,
        sink: Arc<dyn UploadSink>,
        destination: Destination,
    ) -> std::result::Result<(Self, mpsc::Receiver<PipelineEvent>), CaptureError> {
        let (events, receiver) = mpsc::channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(PipelineState::Idle),
            counters: Arc::new(Counters::default()),
            events: Mutex::new(events),
        });

        let callback_shared = shared.clone();
        let callback_destination = destination.clone();
        let capture = CaptureSource::with_device(device, capture_timeout, move |captured| {
            callback_shared.on_capture(captured, &sink, &callback_destination);
        })?;

        log::info!(
            "Pipeline: {} -> {} ready",
            capture.describe(),
            destination
        );
        Ok((
            Self {
                capture,
                destination,
                shared,
            },
            receiver,
        ))
    }

    /// Build device and sink from configuration.
    pub fn from_config(config: &RelayConfig) -> Result<(Self, mpsc::Receiver<PipelineEvent>)> {
        let sink = sink_from_config(&config.upload)?;
        let device = device_from_config(&config.capture)?;
        let pipeline = Self::new(
            device,
            config.capture.timeout,
            sink,
            config.upload.destination.clone(),
        )?;
        Ok(pipeline)
    }

    /// Handle one trigger (the "button press").
    ///
    /// Accepted only while idle. The outcome arrives later as a `PipelineEvent`.
    pub fn trigger(&self) -> std::result::Result<(), TriggerError> {
        Counters::bump(&self.shared.counters.triggers);
        {
            let mut state = self.shared.lock_state();
            if *state != PipelineState::Idle {
                Counters::bump(&self.shared.counters.rejected_triggers);
                log::warn!("Pipeline: trigger rejected while {}", state.as_str());
                return Err(TriggerError::Busy(*state));
            }
            *state = PipelineState::Capturing;
        }

        if let Err(err) = self.capture.request_capture() {
            self.shared.set_state(PipelineState::Idle);
            log::error!("Pipeline: capture request failed: {}", err);
            return Err(TriggerError::Capture(err));
        }
        log::debug!("Pipeline: capture requested");
        Ok(())
    }

    pub fn state(&self) -> PipelineState {
        *self.shared.lock_state()
    }

    pub fn counters(&self) -> PipelineCounters {
        self.shared.counters.snapshot()
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            counters: self.shared.counters.clone(),
        }
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Release the capture device. An upload already running finishes on its
    /// own thread and still publishes its event.
    pub fn shutdown(self) -> Result<()> {
        let counters = self.counters();
        log::info!(
            "Pipeline: shutting down (triggers={} frames={} uploads ok={} failed={})",
            counters.triggers,
            counters.frames_captured,
            counters.uploads_succeeded,
            counters.uploads_failed
        );
        self.capture.shutdown()
    }
}
