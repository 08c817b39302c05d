//! Error kinds surfaced by the capture and upload halves of the pipeline.
//!
//! Both kinds are terminal for the attempt that produced them. They are logged,
//! never retried, and carry no transient/permanent distinction.

use std::time::Duration;

use crate::pipeline::PipelineState;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaptureError {
    /// Device missing, busy at the OS level, or returned no data.
    DeviceUnavailable(String),
    /// The OS or remote camera refused access.
    PermissionDenied(String),
    /// Acquisition did not complete within the configured timeout.
    Timeout(Duration),
    /// A capture is already in flight on this source.
    Busy,
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::DeviceUnavailable(reason) => write!(f, "device unavailable: {}", reason),
            CaptureError::PermissionDenied(reason) => write!(f, "permission denied: {}", reason),
            CaptureError::Timeout(after) => {
                write!(f, "acquisition timed out after {}ms", after.as_millis())
            }
            CaptureError::Busy => write!(f, "capture already in flight"),
        }
    }
}
impl std::error::Error for CaptureError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadErrorKind {
    Network,
    Auth,
    Quota,
    Rejected,
    Io,
}

impl UploadErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadErrorKind::Network => "network",
            UploadErrorKind::Auth => "auth",
            UploadErrorKind::Quota => "quota",
            UploadErrorKind::Rejected => "rejected",
            UploadErrorKind::Io => "io",
        }
    }
}

/// Opaque upload failure. Only `reason` travels into `UploadResult::Failure`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadError {
    pub kind: UploadErrorKind,
    pub reason: String,
}

impl UploadError {
    pub fn new(kind: UploadErrorKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.reason)
    }
}
impl std::error::Error for UploadError {}

/// A trigger that was refused before any capture started.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TriggerError {
    Busy(PipelineState),
    Capture(CaptureError),
}

impl std::fmt::Display for TriggerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerError::Busy(state) => write!(f, "pipeline busy ({})", state.as_str()),
            TriggerError::Capture(err) => write!(f, "capture request failed: {}", err),
        }
    }
}

impl std::error::Error for TriggerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TriggerError::Busy(_) => None,
            TriggerError::Capture(err) => Some(err),
        }
    }
}
