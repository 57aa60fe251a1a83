//! Chunk Wire Format and Serialization
//!
//! A frame is carried as one or more UDP datagrams ("chunks"). Every chunk starts
//! with a big-endian header naming the frame it belongs to, how many chunks the
//! frame was split into, and this chunk's position. The raw-frame variant also
//! carries the pixel format and dimensions of the frame.
//!
//! ```text
//! compressed: [u32 frame_id][u8 total][u8 index][u16 payload_size][payload]
//! raw:        [u32 frame_id][u8 total][u8 index][u8 format][u16 payload_size]
//!             [u16 width][u16 height][payload]
//! ```

use crate::frame::{FrameFormat, RawFrameInfo};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of the compressed chunk header in bytes
pub const HEADER_SIZE: usize = 8;

/// Size of the raw-frame chunk header in bytes
pub const RAW_HEADER_SIZE: usize = 13;

/// Largest datagram the listener will read
pub const MAX_DATAGRAM_SIZE: usize = 65_536;

/// Default payload bytes per chunk used by producers
pub const DEFAULT_MAX_PAYLOAD: usize = 1400;

/// Most chunks a single frame can be split into (u8 counter)
pub const MAX_CHUNKS_PER_FRAME: usize = u8::MAX as usize;

/// Chunk errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    #[error("Insufficient data: expected {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("Frame declares zero chunks")]
    ZeroChunks,

    #[error("Chunk index {index} out of range for {total} chunks")]
    IndexOutOfRange { index: u8, total: u8 },

    #[error("Payload of {0} bytes does not fit a u16 length")]
    PayloadTooLarge(usize),

    #[error("Frame of {size} bytes needs more than {max} chunks")]
    TooManyChunks { size: usize, max: usize },
}

/// Which header layout a listener expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkVariant {
    /// 8-byte header, JPEG payloads
    #[default]
    Compressed,
    /// 13-byte header carrying format and dimensions
    Raw,
}

impl ChunkVariant {
    /// Header length for this variant
    pub fn header_size(self) -> usize {
        match self {
            ChunkVariant::Compressed => HEADER_SIZE,
            ChunkVariant::Raw => RAW_HEADER_SIZE,
        }
    }
}

/// Parsed chunk header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Frame this chunk belongs to
    pub frame_id: u32,
    /// Number of chunks the frame was split into
    pub total_chunks: u8,
    /// Position of this chunk within the frame
    pub chunk_index: u8,
    /// Declared payload length
    pub payload_size: u16,
    /// Present only for the raw variant
    pub raw: Option<RawFrameInfo>,
}

impl ChunkHeader {
    /// Header length on the wire
    pub fn size(&self) -> usize {
        if self.raw.is_some() {
            RAW_HEADER_SIZE
        } else {
            HEADER_SIZE
        }
    }

    /// Parse a header from bytes (network byte order)
    pub fn from_bytes(bytes: &[u8], variant: ChunkVariant) -> Result<Self, ChunkError> {
        let expected = variant.header_size();
        if bytes.len() < expected {
            return Err(ChunkError::InsufficientData {
                expected,
                actual: bytes.len(),
            });
        }

        let mut buf = &bytes[..expected];
        let frame_id = buf.get_u32();
        let total_chunks = buf.get_u8();
        let chunk_index = buf.get_u8();

        let (payload_size, raw) = match variant {
            ChunkVariant::Compressed => (buf.get_u16(), None),
            ChunkVariant::Raw => {
                let format = FrameFormat::from_u8(buf.get_u8());
                let payload_size = buf.get_u16();
                let width = buf.get_u16();
                let height = buf.get_u16();
                (
                    payload_size,
                    Some(RawFrameInfo {
                        format,
                        width,
                        height,
                    }),
                )
            }
        };

        if total_chunks == 0 {
            return Err(ChunkError::ZeroChunks);
        }
        if chunk_index >= total_chunks {
            return Err(ChunkError::IndexOutOfRange {
                index: chunk_index,
                total: total_chunks,
            });
        }

        Ok(ChunkHeader {
            frame_id,
            total_chunks,
            chunk_index,
            payload_size,
            raw,
        })
    }

    /// Serialize header to bytes (network byte order)
    pub fn to_bytes(&self, buf: &mut BytesMut) {
        buf.put_u32(self.frame_id);
        buf.put_u8(self.total_chunks);
        buf.put_u8(self.chunk_index);
        match self.raw {
            None => buf.put_u16(self.payload_size),
            Some(info) => {
                buf.put_u8(info.format.as_u8());
                buf.put_u16(self.payload_size);
                buf.put_u16(info.width);
                buf.put_u16(info.height);
            }
        }
    }
}

/// One datagram: header plus payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub header: ChunkHeader,
    pub payload: Bytes,
}

impl Chunk {
    /// Parse a chunk from a received datagram
    ///
    /// The payload is exactly `payload_size` bytes; trailing bytes are ignored
    /// and a datagram shorter than the declared payload is rejected.
    pub fn from_bytes(bytes: &[u8], variant: ChunkVariant) -> Result<Self, ChunkError> {
        let header = ChunkHeader::from_bytes(bytes, variant)?;
        let start = header.size();
        let end = start + header.payload_size as usize;

        if bytes.len() < end {
            return Err(ChunkError::InsufficientData {
                expected: end,
                actual: bytes.len(),
            });
        }

        Ok(Chunk {
            header,
            payload: Bytes::copy_from_slice(&bytes[start..end]),
        })
    }

    /// Total size on the wire
    pub fn size(&self) -> usize {
        self.header.size() + self.payload.len()
    }

    /// Serialize the chunk to bytes
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.size());
        self.header.to_bytes(&mut buf);
        buf.put_slice(&self.payload);
        buf
    }
}

/// Split a frame into chunks of at most `max_payload` bytes
///
/// Pass `raw` to produce the raw-frame header layout. An empty frame still
/// produces one (empty) chunk so the receiver sees it.
pub fn fragment_frame(
    frame_id: u32,
    data: &[u8],
    max_payload: usize,
    raw: Option<RawFrameInfo>,
) -> Result<Vec<Chunk>, ChunkError> {
    let max_payload = max_payload.clamp(1, u16::MAX as usize);
    let total = ((data.len() + max_payload - 1) / max_payload).max(1);

    if total > MAX_CHUNKS_PER_FRAME {
        return Err(ChunkError::TooManyChunks {
            size: data.len(),
            max: MAX_CHUNKS_PER_FRAME,
        });
    }

    let data = Bytes::copy_from_slice(data);
    let chunks = (0..total)
        .map(|index| {
            let start = index * max_payload;
            let end = (start + max_payload).min(data.len());
            let payload = data.slice(start..end);
            Chunk {
                header: ChunkHeader {
                    frame_id,
                    total_chunks: total as u8,
                    chunk_index: index as u8,
                    payload_size: payload.len() as u16,
                    raw,
                },
                payload,
            }
        })
        .collect();

    Ok(chunks)
}
