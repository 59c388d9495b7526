//! Frame type combining header and body.
//!
//! A `Frame` is a pure data holder: the header plus already-encoded body
//! bytes. Conversions to and from [`crate::Message`] live in the message
//! module.

use bytes::{BufMut, Bytes};

use crate::{
    FrameHeader,
    errors::{ProtocolError, Result},
};

/// Transport packet: `[FrameHeader: 24 bytes] + [body: payload_size bytes]`.
///
/// # Invariants
///
/// - `payload.len() == header.payload_size()`, enforced by [`Frame::new`] and
///   verified by [`Frame::decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header
    pub header: FrameHeader,

    /// Encoded body bytes
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame, setting the header's payload size from `payload`.
    #[must_use]
    pub fn new(mut header: FrameHeader, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        header.set_payload_size(u32::try_from(payload.len()).unwrap_or(u32::MAX));
        Self { header, payload }
    }

    /// Total encoded size.
    pub fn encoded_len(&self) -> usize {
        FrameHeader::SIZE + self.payload.len()
    }

    /// Write header and body to `dst`.
    ///
    /// # Errors
    ///
    /// - `PayloadTooLarge` if the body exceeds [`FrameHeader::MAX_PAYLOAD_SIZE`]
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        if self.payload.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.payload);
        Ok(())
    }

    /// Parse one frame from the start of `bytes`. Trailing bytes are ignored.
    ///
    /// # Errors
    ///
    /// - Any header error from [`FrameHeader::from_bytes`]
    /// - `FrameTooShort` if the body is truncated
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = FrameHeader::from_bytes(bytes)?;
        let end = FrameHeader::SIZE + header.payload_size() as usize;

        if bytes.len() < end {
            return Err(ProtocolError::FrameTooShort { expected: end, actual: bytes.len() });
        }

        Ok(Self { header, payload: Bytes::copy_from_slice(&bytes[FrameHeader::SIZE..end]) })
    }
}
