//! Fixed-size frame header.
//!
//! The header is 24 bytes of raw big-endian binary so a router can deliver a
//! frame (and enforce per-channel ordering) without touching the CBOR body.

use std::fmt;

use crate::{
    NodeId,
    errors::{ProtocolError, Result},
};

/// Message tag. Identifies which payload the body carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Tag {
    /// Mutual exclusion request
    Request = 0x01,
    /// Mutual exclusion permission
    Reply = 0x02,
    /// Token-tree privilege hand-off
    Token = 0x03,
    /// Snapshot marker
    Marker = 0x04,
    /// Termination report from child to parent
    Terminate = 0x05,
    /// Work activation, engages the receiver in the termination tree
    Activate = 0x06,
    /// Application data
    Data = 0x07,
}

impl Tag {
    /// Parse a wire tag. `None` for unknown values.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Request),
            0x02 => Some(Self::Reply),
            0x03 => Some(Self::Token),
            0x04 => Some(Self::Marker),
            0x05 => Some(Self::Terminate),
            0x06 => Some(Self::Activate),
            0x07 => Some(Self::Data),
            _ => None,
        }
    }

    /// Wire value.
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// True for tags that belong to a coordination protocol rather than the
    /// application.
    pub const fn is_control(self) -> bool {
        !matches!(self, Self::Data)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Request => "REQUEST",
            Self::Reply => "REPLY",
            Self::Token => "TOKEN",
            Self::Marker => "MARKER",
            Self::Terminate => "TERMINATE",
            Self::Activate => "ACTIVATE",
            Self::Data => "DATA",
        };
        f.write_str(name)
    }
}

/// Frame header (big endian).
///
/// ```text
/// 0      2     3     4        8           12               20             24
/// │magic │ ver │ tag │ sender │ recipient │ channel seq    │ payload size │
/// ```
///
/// The tag byte is kept raw so that frames with tags from a newer protocol
/// revision still parse; [`FrameHeader::tag`] reports whether it is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    tag: u8,
    sender: NodeId,
    recipient: NodeId,
    seq: u64,
    payload_size: u32,
}

impl FrameHeader {
    /// Serialized header size.
    pub const SIZE: usize = 24;

    /// Magic number: "CH" in ASCII.
    pub const MAGIC: u16 = 0x4348;

    /// Current protocol version.
    pub const VERSION: u8 = 0x01;

    /// Maximum body size (1 MiB).
    pub const MAX_PAYLOAD_SIZE: u32 = 1024 * 1024;

    /// Header for a frame on channel `sender -> recipient`.
    pub fn new(tag: Tag, sender: NodeId, recipient: NodeId, seq: u64) -> Self {
        Self { tag: tag.to_u8(), sender, recipient, seq, payload_size: 0 }
    }

    /// Parse a header from the first [`Self::SIZE`] bytes of `bytes`.
    ///
    /// # Errors
    ///
    /// - `FrameTooShort` if fewer than 24 bytes are available
    /// - `InvalidMagic` / `UnsupportedVersion` for foreign frames
    /// - `PayloadTooLarge` if the declared size exceeds the limit
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(ProtocolError::FrameTooShort { expected: Self::SIZE, actual: bytes.len() });
        }

        let magic = u16::from_be_bytes([bytes[0], bytes[1]]);
        if magic != Self::MAGIC {
            return Err(ProtocolError::InvalidMagic(magic));
        }

        if bytes[2] != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(bytes[2]));
        }

        let payload_size = u32::from_be_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
        if payload_size > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_size as usize,
                max: Self::MAX_PAYLOAD_SIZE as usize,
            });
        }

        Ok(Self {
            tag: bytes[3],
            sender: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            recipient: u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            seq: u64::from_be_bytes([
                bytes[12], bytes[13], bytes[14], bytes[15], bytes[16], bytes[17], bytes[18],
                bytes[19],
            ]),
            payload_size,
        })
    }

    /// Serialize to wire bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..2].copy_from_slice(&Self::MAGIC.to_be_bytes());
        out[2] = Self::VERSION;
        out[3] = self.tag;
        out[4..8].copy_from_slice(&self.sender.to_be_bytes());
        out[8..12].copy_from_slice(&self.recipient.to_be_bytes());
        out[12..20].copy_from_slice(&self.seq.to_be_bytes());
        out[20..24].copy_from_slice(&self.payload_size.to_be_bytes());
        out
    }

    /// Raw tag byte.
    pub fn tag_byte(&self) -> u8 {
        self.tag
    }

    /// Parsed tag, `None` if unknown.
    pub fn tag(&self) -> Option<Tag> {
        Tag::from_u8(self.tag)
    }

    /// Sending process.
    pub fn sender(&self) -> NodeId {
        self.sender
    }

    /// Receiving process.
    pub fn recipient(&self) -> NodeId {
        self.recipient
    }

    /// Sequence number on the `sender -> recipient` channel.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Declared body size.
    pub fn payload_size(&self) -> u32 {
        self.payload_size
    }

    pub(crate) fn set_payload_size(&mut self, size: u32) {
        self.payload_size = size;
    }

    #[cfg(test)]
    pub(crate) fn set_tag_byte(&mut self, tag: u8) {
        self.tag = tag;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let mut header = FrameHeader::new(Tag::Marker, 3, 7, 42);
        header.set_payload_size(11);

        let parsed = FrameHeader::from_bytes(&header.to_bytes()).expect("valid header");
        assert_eq!(parsed, header);
        assert_eq!(parsed.tag(), Some(Tag::Marker));
        assert_eq!(parsed.sender(), 3);
        assert_eq!(parsed.recipient(), 7);
        assert_eq!(parsed.seq(), 42);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = FrameHeader::new(Tag::Data, 0, 1, 0).to_bytes();
        bytes[0] = 0xFF;
        assert!(matches!(FrameHeader::from_bytes(&bytes), Err(ProtocolError::InvalidMagic(_))));
    }

    #[test]
    fn rejects_future_version() {
        let mut bytes = FrameHeader::new(Tag::Data, 0, 1, 0).to_bytes();
        bytes[2] = 9;
        assert_eq!(FrameHeader::from_bytes(&bytes), Err(ProtocolError::UnsupportedVersion(9)));
    }

    #[test]
    fn rejects_oversized_payload_claim() {
        let mut bytes = FrameHeader::new(Tag::Data, 0, 1, 0).to_bytes();
        bytes[20..24].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(
            FrameHeader::from_bytes(&bytes),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn unknown_tag_parses_but_is_reported() {
        let mut header = FrameHeader::new(Tag::Data, 0, 1, 0);
        header.set_tag_byte(0x7F);
        let parsed = FrameHeader::from_bytes(&header.to_bytes()).expect("header still parses");
        assert_eq!(parsed.tag(), None);
        assert_eq!(parsed.tag_byte(), 0x7F);
    }

    #[test]
    fn only_data_is_application_traffic() {
        assert!(!Tag::Data.is_control());
        assert!(Tag::Marker.is_control());
        assert!(Tag::Terminate.is_control());
    }
}
