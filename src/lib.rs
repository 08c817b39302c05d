//! Camera relay
//!
//! Captures one frame from a camera when triggered and uploads the raw bytes to
//! an object store, logging the outcome.
//!
//! # Architecture
//!
//! - **Capture**: a `CaptureSource` owns one device on a dedicated worker thread
//!   and delivers each result (frame or error) to a registered callback.
//! - **Upload**: an `UploadSink` writes bytes to a fixed destination and
//!   resolves to exactly one `UploadResult`.
//! - **Pipeline**: joins the two. One capture and one upload in flight at most;
//!   a trigger while busy is rejected. Failures are logged, never retried.
//!
//! # Module Structure
//!
//! - `frame`: captured bytes (`Frame`)
//! - `capture`: device backends and the capture worker
//! - `upload`: object-store sinks and asynchronous upload handles
//! - `pipeline`: trigger handling, state machine, events
//! - `config`: file + environment configuration
//! - `ui`: terminal progress for the one-shot CLI

pub mod capture;
pub mod config;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod ui;
pub mod upload;

pub use capture::{
    device_from_config, CaptureConfig, CaptureDevice, CaptureSource, SnapshotDevice,
    StillImageDevice, StubDevice,
};
#[cfg(feature = "capture-v4l2")]
pub use capture::V4l2Device;
pub use config::RelayConfig;
pub use error::{CaptureError, TriggerError, UploadError, UploadErrorKind};
pub use frame::Frame;
pub use pipeline::{Pipeline, PipelineCounters, PipelineEvent, PipelineState, PipelineStats};
pub use upload::{
    sink_from_config, upload, upload_with, Destination, HttpObjectStore, LocalObjectStore,
    PendingUpload, UploadConfig, UploadResult, UploadSink,
};
