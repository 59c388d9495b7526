//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding or decoding frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer is shorter than the data it claims to hold.
    #[error("frame too short: need {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Bytes required
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// Magic number does not identify a Cohort frame.
    #[error("invalid magic: {0:#06x}")]
    InvalidMagic(u16),

    /// Protocol version is not supported by this build.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Payload exceeds the configured maximum.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Actual payload size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Header tag byte does not map to a known message tag.
    #[error("unknown message tag: {0:#04x}")]
    UnknownTag(u8),

    /// CBOR serialization failed.
    #[error("CBOR encode error: {0}")]
    CborEncode(String),

    /// CBOR deserialization failed.
    #[error("CBOR decode error: {0}")]
    CborDecode(String),
}

impl ProtocolError {
    /// True when the bytes could never have been a valid frame, as opposed
    /// to a frame with a body we could not interpret.
    pub fn is_framing_error(&self) -> bool {
        matches!(
            self,
            Self::FrameTooShort { .. }
                | Self::InvalidMagic(_)
                | Self::UnsupportedVersion(_)
                | Self::PayloadTooLarge { .. }
        )
    }
}
