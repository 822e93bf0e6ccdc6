//! Length-prefixed framing for tokens and size headers.
//!
//! Every token and size header is one frame. The payload that follows an
//! accepted pull is *not* framed; its length comes from the size header.

use bytes::{BufMut, Bytes, BytesMut};

use crate::ProtoError;

/// Bytes in a frame header.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Largest accepted frame body. Tokens and size headers are well under 1 KiB
/// once encrypted.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Largest accepted encrypted payload.
pub const MAX_PAYLOAD_SIZE: u64 = 64 * 1024 * 1024;

/// Frame header: the body length as big-endian `u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    len: u32,
}

impl FrameHeader {
    /// Header for a body of `len` bytes.
    pub fn new(len: usize) -> Result<Self, ProtoError> {
        if len > MAX_FRAME_SIZE {
            return Err(too_large(len as u64));
        }
        let len = u32::try_from(len).map_err(|_| too_large(len as u64))?;
        Ok(Self { len })
    }

    /// Parse and validate a received header.
    pub fn from_bytes(bytes: [u8; FRAME_HEADER_SIZE]) -> Result<Self, ProtoError> {
        let len = u32::from_be_bytes(bytes);
        if len as usize > MAX_FRAME_SIZE {
            return Err(too_large(u64::from(len)));
        }
        Ok(Self { len })
    }

    /// Encoded header bytes.
    pub const fn to_bytes(self) -> [u8; FRAME_HEADER_SIZE] {
        self.len.to_be_bytes()
    }

    /// Length of the body that follows.
    pub const fn body_len(self) -> usize {
        self.len as usize
    }
}

/// Prefix `body` with its frame header.
pub fn encode_frame(body: &[u8]) -> Result<Bytes, ProtoError> {
    let header = FrameHeader::new(body.len())?;
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + body.len());
    buf.put_slice(&header.to_bytes());
    buf.put_slice(body);
    Ok(buf.freeze())
}

/// Validate an announced payload size and convert it to a buffer length.
pub fn payload_len(size: u64) -> Result<usize, ProtoError> {
    if size > MAX_PAYLOAD_SIZE {
        return Err(ProtoError::PayloadTooLarge { size, max: MAX_PAYLOAD_SIZE });
    }
    usize::try_from(size).map_err(|_| ProtoError::PayloadTooLarge { size, max: MAX_PAYLOAD_SIZE })
}

fn too_large(size: u64) -> ProtoError {
    ProtoError::FrameTooLarge { size, max: MAX_FRAME_SIZE as u64 }
}
