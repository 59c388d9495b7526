//! Messages exchanged between nodes.
//!
//! The tag is derived from the payload variant, so a message can never carry
//! a tag that disagrees with its body. On the wire the tag lives only in the
//! frame header; the CBOR body is `[timestamp, fields...]` with no variant
//! discriminator.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    Frame, FrameHeader, LogicalClock, NodeId, Tag,
    errors::{ProtocolError, Result},
};

/// Body of a `REQUEST`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestBody {
    /// Request priority. Permission voting orders requests by
    /// `(stamp, sender)`; the token tree ignores it.
    pub stamp: u64,
}

/// Body of a `MARKER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerBody {
    /// Snapshot round the marker belongs to.
    pub round: u64,
}

/// Body of a `DATA` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataBody {
    /// Opaque application bytes.
    pub body: Vec<u8>,
}

/// Message payload. Each variant maps to exactly one [`Tag`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Ask for the critical section
    Request(RequestBody),
    /// Grant permission to enter the critical section
    Reply,
    /// Hand over the token-tree privilege
    Token,
    /// Snapshot marker
    Marker(MarkerBody),
    /// Child reports completion to its parent
    Terminate,
    /// Engage the receiver in the sender's work
    Activate,
    /// Application data
    Data(DataBody),
}

impl Payload {
    /// Tag for this payload.
    pub const fn tag(&self) -> Tag {
        match self {
            Self::Request(_) => Tag::Request,
            Self::Reply => Tag::Reply,
            Self::Token => Tag::Token,
            Self::Marker(_) => Tag::Marker,
            Self::Terminate => Tag::Terminate,
            Self::Activate => Tag::Activate,
            Self::Data(_) => Tag::Data,
        }
    }

    /// Convenience constructor for a data payload.
    pub fn data(body: impl Into<Vec<u8>>) -> Self {
        Self::Data(DataBody { body: body.into() })
    }
}

/// A message as seen by the recipient.
///
/// # Invariants
///
/// - `timestamp` is the sender's clock immediately after its send event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Sending process
    pub sender: NodeId,
    /// Sender's clock at send time
    pub timestamp: LogicalClock,
    /// Message body
    pub payload: Payload,
}

impl Message {
    /// Create a message.
    pub fn new(sender: NodeId, timestamp: LogicalClock, payload: Payload) -> Self {
        Self { sender, timestamp, payload }
    }

    /// Tag derived from the payload.
    pub fn tag(&self) -> Tag {
        self.payload.tag()
    }

    /// Encode into a frame for the `sender -> recipient` channel.
    ///
    /// # Errors
    ///
    /// - `CborEncode` if serialization fails
    /// - `PayloadTooLarge` if the body exceeds the frame limit
    pub fn into_frame(&self, recipient: NodeId, seq: u64) -> Result<Frame> {
        let ts = &self.timestamp;
        let body = match &self.payload {
            Payload::Request(inner) => encode_body(&(ts, inner))?,
            Payload::Marker(inner) => encode_body(&(ts, inner))?,
            Payload::Data(inner) => encode_body(&(ts, inner))?,
            Payload::Reply | Payload::Token | Payload::Terminate | Payload::Activate => {
                encode_body(&(ts,))?
            },
        };

        if body.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: body.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        let header = FrameHeader::new(self.tag(), self.sender, recipient, seq);
        Ok(Frame::new(header, body))
    }

    /// Decode a message from a frame.
    ///
    /// # Errors
    ///
    /// - `UnknownTag` if the header tag is not recognized
    /// - `CborDecode` if the body does not match the tag's schema
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let tag = frame
            .header
            .tag()
            .ok_or_else(|| ProtocolError::UnknownTag(frame.header.tag_byte()))?;
        let bytes: &[u8] = &frame.payload;

        let (timestamp, payload) = match tag {
            Tag::Request => {
                let (ts, inner): (LogicalClock, RequestBody) = decode_body(bytes)?;
                (ts, Payload::Request(inner))
            },
            Tag::Marker => {
                let (ts, inner): (LogicalClock, MarkerBody) = decode_body(bytes)?;
                (ts, Payload::Marker(inner))
            },
            Tag::Data => {
                let (ts, inner): (LogicalClock, DataBody) = decode_body(bytes)?;
                (ts, Payload::Data(inner))
            },
            Tag::Reply => (decode_body::<(LogicalClock,)>(bytes)?.0, Payload::Reply),
            Tag::Token => (decode_body::<(LogicalClock,)>(bytes)?.0, Payload::Token),
            Tag::Terminate => (decode_body::<(LogicalClock,)>(bytes)?.0, Payload::Terminate),
            Tag::Activate => (decode_body::<(LogicalClock,)>(bytes)?.0, Payload::Activate),
        };

        Ok(Self { sender: frame.header.sender(), timestamp, payload })
    }
}

fn encode_body<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf)
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))?;
    Ok(buf)
}

fn decode_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(message: &Message) -> Message {
        let frame = message.into_frame(1, 0).expect("encode");
        Message::from_frame(&frame).expect("decode")
    }

    #[test]
    fn request_round_trip() {
        let msg = Message::new(2, LogicalClock::Scalar(14), Payload::Request(RequestBody {
            stamp: 14,
        }));
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn unit_payload_round_trip_with_vector_clock() {
        let msg = Message::new(0, LogicalClock::Vector(vec![3, 1, 4]), Payload::Terminate);
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn header_carries_routing() {
        let msg = Message::new(4, LogicalClock::Scalar(1), Payload::data(b"hi".to_vec()));
        let frame = msg.into_frame(6, 12).expect("encode");
        assert_eq!(frame.header.tag(), Some(Tag::Data));
        assert_eq!(frame.header.sender(), 4);
        assert_eq!(frame.header.recipient(), 6);
        assert_eq!(frame.header.seq(), 12);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let msg = Message::new(0, LogicalClock::Scalar(1), Payload::Reply);
        let mut frame = msg.into_frame(1, 0).expect("encode");
        frame.header.set_tag_byte(0x55);

        assert_eq!(Message::from_frame(&frame), Err(ProtocolError::UnknownTag(0x55)));
    }

    #[test]
    fn body_schema_mismatch_is_a_decode_error() {
        let msg = Message::new(0, LogicalClock::Scalar(1), Payload::Reply);
        let frame = msg.into_frame(1, 0).expect("encode");
        let relabeled = Frame::new(FrameHeader::new(Tag::Marker, 0, 1, 0), frame.payload);

        assert!(matches!(Message::from_frame(&relabeled), Err(ProtocolError::CborDecode(_))));
    }
}
