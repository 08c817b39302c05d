//! Local still-image device.
//!
//! Re-reads one image file on every capture. Useful for kiosks that drop a
//! fresh snapshot onto disk, and for exercising the pipeline without hardware.

use std::path::{Path, PathBuf};

use super::{io_capture_error, CaptureDevice};
use crate::error::CaptureError;

#[derive(Debug)]
pub struct StillImageDevice {
    path: PathBuf,
}

impl StillImageDevice {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl CaptureDevice for StillImageDevice {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn open(&mut self) -> Result<(), CaptureError> {
        let metadata = std::fs::metadata(&self.path)
            .map_err(|e| io_capture_error(&format!("stat {}", self.path.display()), e))?;
        if !metadata.is_file() {
            return Err(CaptureError::DeviceUnavailable(format!(
                "{} is not a regular file",
                self.path.display()
            )));
        }
        log::info!("StillImageDevice: opened {}", self.path.display());
        Ok(())
    }

    fn acquire(&mut self) -> Result<Vec<u8>, CaptureError> {
        std::fs::read(&self.path)
            .map_err(|e| io_capture_error(&format!("read {}", self.path.display()), e))
    }
}
