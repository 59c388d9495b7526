//! Property-based tests for frame and message encoding.
//!
//! Decoding is the boundary where untrusted bytes enter a node, so the main
//! property is that it never panics and never accepts a frame whose declared
//! size disagrees with the buffer.

use cohort_proto::{
    Frame, FrameHeader, LogicalClock, MarkerBody, Message, Payload, ProtocolError, RequestBody,
};
use proptest::prelude::*;

fn arbitrary_clock() -> impl Strategy<Value = LogicalClock> {
    prop_oneof![
        any::<u64>().prop_map(LogicalClock::Scalar),
        prop::collection::vec(any::<u64>(), 1..8).prop_map(LogicalClock::Vector),
    ]
}

fn arbitrary_payload() -> impl Strategy<Value = Payload> {
    prop_oneof![
        any::<u64>().prop_map(|stamp| Payload::Request(RequestBody { stamp })),
        Just(Payload::Reply),
        Just(Payload::Token),
        any::<u64>().prop_map(|round| Payload::Marker(MarkerBody { round })),
        Just(Payload::Terminate),
        Just(Payload::Activate),
        prop::collection::vec(any::<u8>(), 0..256).prop_map(Payload::data),
    ]
}

fn arbitrary_message() -> impl Strategy<Value = Message> {
    (any::<u32>(), arbitrary_clock(), arbitrary_payload())
        .prop_map(|(sender, timestamp, payload)| Message::new(sender, timestamp, payload))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Property: arbitrary bytes never panic the decoder
    #[test]
    fn prop_decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        if let Ok(frame) = Frame::decode(&bytes) {
            let _ = Message::from_frame(&frame);
        }
    }

    /// Property: a message survives the full wire path with routing intact
    #[test]
    fn prop_message_wire_path(
        message in arbitrary_message(),
        recipient in any::<u32>(),
        seq in any::<u64>(),
    ) {
        let frame = message.into_frame(recipient, seq).expect("encode");
        let mut wire = Vec::new();
        frame.encode(&mut wire).expect("frame encode");

        let decoded_frame = Frame::decode(&wire).expect("frame decode");
        prop_assert_eq!(decoded_frame.header.recipient(), recipient);
        prop_assert_eq!(decoded_frame.header.seq(), seq);

        let decoded = Message::from_frame(&decoded_frame).expect("message decode");
        prop_assert_eq!(decoded, message);
    }

    /// Property: any truncation of a valid frame is rejected, never misread
    #[test]
    fn prop_truncation_is_rejected(message in arbitrary_message(), cut in 0usize..64) {
        let frame = message.into_frame(0, 0).expect("encode");
        let mut wire = Vec::new();
        frame.encode(&mut wire).expect("frame encode");

        let keep = wire.len().saturating_sub(cut + 1);
        wire.truncate(keep);

        let result = Frame::decode(&wire);
        prop_assert!(
            matches!(result, Err(ProtocolError::FrameTooShort { .. })),
            "expected FrameTooShort, got {:?}",
            result
        );
    }
}

#[test]
fn header_size_is_fixed() {
    let message = Message::new(0, LogicalClock::Scalar(0), Payload::Reply);
    let frame = message.into_frame(1, 0).expect("encode");
    assert_eq!(frame.encoded_len(), FrameHeader::SIZE + frame.payload.len());
}
