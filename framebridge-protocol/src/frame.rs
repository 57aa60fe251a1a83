//! Complete frames and structural validation

use bytes::Bytes;
use std::time::Instant;

/// JPEG start-of-image marker
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// Pixel format tag carried by raw-frame chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameFormat {
    Mjpeg,
    Rgb24,
    Yuv420,
    /// Tag this build does not know about, kept verbatim
    Other(u8),
}

impl FrameFormat {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => FrameFormat::Mjpeg,
            1 => FrameFormat::Rgb24,
            2 => FrameFormat::Yuv420,
            other => FrameFormat::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            FrameFormat::Mjpeg => 0,
            FrameFormat::Rgb24 => 1,
            FrameFormat::Yuv420 => 2,
            FrameFormat::Other(value) => value,
        }
    }
}

/// Format and dimensions of a raw frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFrameInfo {
    pub format: FrameFormat,
    pub width: u16,
    pub height: u16,
}

/// Structural check applied to a frame once all its chunks are joined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameValidation {
    /// Frame must begin with the JPEG SOI marker
    #[default]
    Jpeg,
    /// Accept any byte sequence
    None,
}

impl FrameValidation {
    pub fn check(self, data: &[u8]) -> bool {
        match self {
            FrameValidation::Jpeg => is_jpeg(data),
            FrameValidation::None => true,
        }
    }
}

/// Check for the JPEG start-of-image marker
#[inline]
pub fn is_jpeg(data: &[u8]) -> bool {
    data.len() >= 2 && data[..2] == JPEG_SOI
}

/// A fully reassembled frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteFrame {
    pub frame_id: u32,
    /// Payloads of chunks `0..total_chunks` joined in order
    pub data: Bytes,
    /// Present for frames received on the raw path
    pub raw: Option<RawFrameInfo>,
    pub completed_at: Instant,
}

impl CompleteFrame {
    pub fn new(frame_id: u32, data: Bytes, raw: Option<RawFrameInfo>) -> Self {
        CompleteFrame {
            frame_id,
            data,
            raw,
            completed_at: Instant::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
