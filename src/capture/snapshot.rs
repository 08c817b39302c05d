//! HTTP(S) snapshot camera device.
//!
//! Each capture issues one `GET` against a still-image endpoint (the
//! `/capture` or `/snapshot.jpg` style URL most IP and ESP32 cameras expose)
//! and passes the body through unchanged.

use std::io::Read;
use std::time::Duration;

use url::Url;

use super::CaptureDevice;
use crate::error::CaptureError;

const MAX_SNAPSHOT_BYTES: usize = 5 * 1024 * 1024;

pub struct SnapshotDevice {
    url: String,
    timeout: Duration,
    agent: ureq::Agent,
}

impl SnapshotDevice {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, CaptureError> {
        let parsed = Url::parse(url).map_err(|e| {
            CaptureError::DeviceUnavailable(format!("invalid snapshot url '{}': {}", url, e))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(CaptureError::DeviceUnavailable(format!(
                "unsupported snapshot scheme '{}'; expected http(s)",
                parsed.scheme()
            )));
        }
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self {
            url: url.to_string(),
            timeout,
            agent,
        })
    }

    fn map_request_error(&self, err: ureq::Error) -> CaptureError {
        match err {
            ureq::Error::Status(code @ (401 | 403), _) => {
                CaptureError::PermissionDenied(format!("snapshot endpoint returned {}", code))
            }
            ureq::Error::Status(code, _) => {
                CaptureError::DeviceUnavailable(format!("snapshot endpoint returned {}", code))
            }
            ureq::Error::Transport(transport) => {
                if transport_timed_out(&transport) {
                    CaptureError::Timeout(self.timeout)
                } else {
                    CaptureError::DeviceUnavailable(format!(
                        "fetch snapshot from {}: {}",
                        self.url, transport
                    ))
                }
            }
        }
    }
}

impl CaptureDevice for SnapshotDevice {
    fn describe(&self) -> String {
        self.url.clone()
    }

    fn open(&mut self) -> Result<(), CaptureError> {
        log::info!("SnapshotDevice: using {}", self.url);
        Ok(())
    }

    fn acquire(&mut self) -> Result<Vec<u8>, CaptureError> {
        let response = self
            .agent
            .get(&self.url)
            .call()
            .map_err(|e| self.map_request_error(e))?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_SNAPSHOT_BYTES as u64 + 1)
            .read_to_end(&mut bytes)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                    CaptureError::Timeout(self.timeout)
                }
                _ => CaptureError::DeviceUnavailable(format!("read snapshot: {}", e)),
            })?;

        if bytes.len() > MAX_SNAPSHOT_BYTES {
            return Err(CaptureError::DeviceUnavailable(format!(
                "snapshot exceeded {} bytes",
                MAX_SNAPSHOT_BYTES
            )));
        }
        if bytes.is_empty() {
            return Err(CaptureError::DeviceUnavailable("empty snapshot".to_string()));
        }
        Ok(bytes)
    }
}

fn transport_timed_out(transport: &ureq::Transport) -> bool {
    std::error::Error::source(transport)
        .and_then(|source| source.downcast_ref::<std::io::Error>())
        .map(|io| {
            matches!(
                io.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            )
        })
        .unwrap_or(false)
}
