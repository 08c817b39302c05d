//! Synthetic capture device for `stub://` locators.
//!
//! `stub://<name>[?fail=permission|unavailable&open=permission|unavailable&delay_ms=N&len=N]`
//!
//! Frames start with the PNG signature and are padded with a pattern that
//! changes per capture. `len=0` yields empty frames.

use std::thread;
use std::time::Duration;

use url::Url;

use super::CaptureDevice;
use crate::error::CaptureError;

const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const DEFAULT_STUB_LEN: usize = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StubFailure {
    Permission,
    Unavailable,
}

impl StubFailure {
    fn parse(value: &str) -> Result<Self, CaptureError> {
        match value {
            "permission" => Ok(StubFailure::Permission),
            "unavailable" => Ok(StubFailure::Unavailable),
            other => Err(CaptureError::DeviceUnavailable(format!(
                "unknown stub failure mode '{}'",
                other
            ))),
        }
    }

    fn into_error(self, name: &str) -> CaptureError {
        match self {
            StubFailure::Permission => {
                CaptureError::PermissionDenied(format!("stub camera '{}' permission revoked", name))
            }
            StubFailure::Unavailable => {
                CaptureError::DeviceUnavailable(format!("stub camera '{}' unavailable", name))
            }
        }
    }
}

#[derive(Debug)]
pub struct StubDevice {
    name: String,
    fail_capture: Option<StubFailure>,
    fail_open: Option<StubFailure>,
    delay: Duration,
    len: usize,
    frame_count: u64,
}

impl StubDevice {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fail_capture: None,
            fail_open: None,
            delay: Duration::ZERO,
            len: DEFAULT_STUB_LEN,
            frame_count: 0,
        }
    }

    pub fn parse(locator: &str) -> Result<Self, CaptureError> {
        let url = Url::parse(locator).map_err(|e| {
            CaptureError::DeviceUnavailable(format!("invalid stub locator '{}': {}", locator, e))
        })?;
        if url.scheme() != "stub" {
            return Err(CaptureError::DeviceUnavailable(format!(
                "not a stub locator: {}",
                locator
            )));
        }
        let name = url.host_str().unwrap_or("camera");
        let mut device = Self::new(name);
        for (key, value) in url.query_pairs() {
            match &*key {
                "fail" => device.fail_capture = Some(StubFailure::parse(&value)?),
                "open" => device.fail_open = Some(StubFailure::parse(&value)?),
                "delay_ms" => device.delay = Duration::from_millis(parse_number(&key, &value)?),
                "len" => device.len = parse_number(&key, &value)? as usize,
                other => {
                    log::warn!("StubDevice: ignoring unknown option '{}'", other);
                }
            }
        }
        Ok(device)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_len(mut self, len: usize) -> Self {
        self.len = len;
        self
    }

    pub fn failing(mut self, failure: StubFailure) -> Self {
        self.fail_capture = Some(failure);
        self
    }

    fn synthetic_bytes(&self) -> Vec<u8> {
        if self.len == 0 {
            return Vec::new();
        }
        let mut bytes = Vec::with_capacity(self.len.max(PNG_SIGNATURE.len()));
        bytes.extend_from_slice(&PNG_SIGNATURE);
        let mut i = 0u64;
        while bytes.len() < self.len {
            bytes.push(((i + self.frame_count) % 256) as u8);
            i += 1;
        }
        bytes.truncate(self.len);
        bytes
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64, CaptureError> {
    value.parse().map_err(|_| {
        CaptureError::DeviceUnavailable(format!("stub option {} must be an integer", key))
    })
}

impl CaptureDevice for StubDevice {
    fn describe(&self) -> String {
        format!("stub://{}", self.name)
    }

    fn open(&mut self) -> Result<(), CaptureError> {
        if let Some(failure) = self.fail_open {
            return Err(failure.into_error(&self.name));
        }
        log::info!("StubDevice: opened {} (synthetic)", self.name);
        Ok(())
    }

    fn acquire(&mut self) -> Result<Vec<u8>, CaptureError> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if let Some(failure) = self.fail_capture {
            return Err(failure.into_error(&self.name));
        }
        self.frame_count += 1;
        Ok(self.synthetic_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_options_from_query() {
        let device = StubDevice::parse("stub://porch?fail=permission&delay_ms=25&len=16")
            .expect("parse stub");
        assert_eq!(device.name, "porch");
        assert_eq!(device.fail_capture, Some(StubFailure::Permission));
        assert_eq!(device.delay, Duration::from_millis(25));
        assert_eq!(device.len, 16);
    }

    #[test]
    fn rejects_unknown_failure_mode() {
        assert!(StubDevice::parse("stub://porch?fail=explode").is_err());
        assert!(StubDevice::parse("stub://porch?len=many").is_err());
    }

    #[test]
    fn frames_start_with_png_signature() {
        let mut device = StubDevice::new("test").with_len(32);
        device.open().expect("open");
        let bytes = device.acquire().expect("acquire");
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[..8], &PNG_SIGNATURE[..]);
    }

    #[test]
    fn zero_len_yields_empty_frames() {
        let mut device = StubDevice::new("test").with_len(0);
        assert!(device.acquire().expect("acquire").is_empty());
    }

    #[test]
    fn short_len_truncates_signature() {
        let mut device = StubDevice::new("test").with_len(2);
        assert_eq!(device.acquire().expect("acquire"), vec![0x89, 0x50]);
    }

    #[test]
    fn open_failure_is_reported() {
        let mut device = StubDevice::parse("stub://gone?open=unavailable").expect("parse");
        assert!(matches!(
            device.open(),
            Err(CaptureError::DeviceUnavailable(_))
        ));
    }
}
