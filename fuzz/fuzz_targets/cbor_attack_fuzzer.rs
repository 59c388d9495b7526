//! Fuzz target for message body decoding
//!
//! # Strategy
//!
//! - Deeply nested: arrays nested to arbitrary depth
//! - Huge lengths: CBOR claiming massive byte string or array lengths
//! - Random bytes: arbitrary bodies under every tag
//! - Tag confusion: a valid body relabelled with another tag
//!
//! # Invariants
//!
//! - Decoding never panics
//! - Huge claimed lengths are rejected, not allocated
//! - A body under the wrong tag is an error or a well-formed message

#![no_main]

use arbitrary::Arbitrary;
use cohort_proto::{Frame, FrameHeader, LogicalClock, Message, Payload, Tag};
use libfuzzer_sys::fuzz_target;

const TAGS: [Tag; 7] =
    [Tag::Request, Tag::Reply, Tag::Token, Tag::Marker, Tag::Terminate, Tag::Activate, Tag::Data];

#[derive(Debug, Clone, Arbitrary)]
enum CborAttack {
    DeeplyNested { depth: u8 },
    HugeLength { claimed_len_exponent: u8 },
    RandomBytes { bytes: Vec<u8> },
    TagConfusion { stamp: u64, vector: Vec<u64>, tag: u8 },
}

fn decode_under(tag: Tag, body: Vec<u8>) {
    let frame = Frame::new(FrameHeader::new(tag, 0, 1, 0), body);
    let _ = Message::from_frame(&frame);
}

fuzz_target!(|attack: CborAttack| {
    match attack {
        CborAttack::DeeplyNested { depth } => {
            let mut body = vec![0x81; usize::from(depth % 64)];
            body.push(0x01);
            for tag in TAGS {
                decode_under(tag, body.clone());
            }
        }

        CborAttack::HugeLength { claimed_len_exponent } => {
            let exponent = u32::from(claimed_len_exponent % 32);
            let claimed = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
            for prefix in [0x5A_u8, 0x9A] {
                let mut body = vec![0x82, 0x01, prefix];
                body.extend_from_slice(&claimed.to_be_bytes());
                body.extend(vec![0x01; (claimed as usize).min(8)]);
                for tag in TAGS {
                    decode_under(tag, body.clone());
                }
            }
        }

        CborAttack::RandomBytes { bytes } => {
            for tag in TAGS {
                decode_under(tag, bytes.clone());
            }
        }

        CborAttack::TagConfusion { stamp, vector, tag } => {
            let clock = if vector.is_empty() {
                LogicalClock::Scalar(stamp)
            } else {
                LogicalClock::Vector(vector.into_iter().take(64).collect())
            };
            let message = Message::new(0, clock, Payload::data(stamp.to_be_bytes().to_vec()));
            let Ok(frame) = message.into_frame(1, 0) else {
                return;
            };
            let relabelled = TAGS[usize::from(tag) % TAGS.len()];
            decode_under(relabelled, frame.payload.to_vec());
        }
    }
});
