//! Captured frame container.
//!
//! A `Frame` is produced once per capture request and is owned by the pipeline
//! until it is handed to an upload sink, after which it is dropped.
//!
//! - Bytes are passed through in whatever encoding the device backend yields.
//! - There is no `Clone`: one capture, one owner, one upload.
//! - Bytes are zeroized on drop to limit how long image data lingers in memory.

use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};
use zeroize::Zeroize;

/// One captured image as raw bytes.
pub struct Frame {
    data: Vec<u8>,
    sequence: u64,
    captured_at: Instant,
}

// Explicitly NOT implementing Clone. A frame is handed off, never duplicated.

impl Frame {
    /// Create a new frame. `sequence` is the per-source capture counter.
    pub fn new(data: Vec<u8>, sequence: u64) -> Self {
        Self {
            data,
            sequence,
            captured_at: Instant::now(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Capture counter assigned by the source (starts at 1).
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Time since the device delivered the bytes.
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    /// Hex SHA-256 of the frame bytes. Safe to log; used for upload integrity headers.
    pub fn content_sha256(&self) -> String {
        content_sha256(&self.data)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print frame content.
        f.debug_struct("Frame")
            .field("len", &self.data.len())
            .field("sequence", &self.sequence)
            .finish()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

pub(crate) fn content_sha256(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
