//! V4L2 capture device.
//!
//! Opens a local device node (e.g. /dev/video0) on the capture worker, asks for
//! MJPEG so every buffer is a self-contained JPEG, and hands out one dequeued
//! buffer per capture. The device and its mmap stream are dropped together.

use ouroboros::self_referencing;

use super::{io_capture_error, CaptureDevice};
use crate::error::CaptureError;

const STREAM_BUFFERS: u32 = 4;

pub struct V4l2Device {
    path: String,
    state: Option<V4l2State>,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Device {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            state: None,
            active_width: 0,
            active_height: 0,
        }
    }
}

impl CaptureDevice for V4l2Device {
    fn describe(&self) -> String {
        self.path.clone()
    }

    fn open(&mut self) -> Result<(), CaptureError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.path)
            .map_err(|e| io_capture_error(&format!("open v4l2 device {}", self.path), e))?;
        let mut format = device
            .format()
            .map_err(|e| io_capture_error("read v4l2 format", e))?;
        format.fourcc = v4l::FourCC::new(b"MJPG");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Device: failed to set MJPEG on {}: {}", self.path, err);
                device
                    .format()
                    .map_err(|e| io_capture_error("read v4l2 format after set failure", e))?
            }
        };
        self.active_width = format.width;
        self.active_height = format.height;

        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
                    .map_err(|e| io_capture_error("create v4l2 buffer stream", e))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Device: opened {} ({}x{} {})",
            self.path,
            self.active_width,
            self.active_height,
            format.fourcc
        );
        Ok(())
    }

    fn acquire(&mut self) -> Result<Vec<u8>, CaptureError> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().ok_or_else(|| {
            CaptureError::DeviceUnavailable(format!("v4l2 device {} not open", self.path))
        })?;
        let (buf, meta) = state
            .with_mut(|fields| fields.stream.next())
            .map_err(|e| io_capture_error("capture v4l2 frame", e))?;
        let used = (meta.bytesused as usize).min(buf.len());
        let used = if used == 0 { buf.len() } else { used };
        Ok(buf[..used].to_vec())
    }
}
