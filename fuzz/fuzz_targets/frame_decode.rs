//! Fuzz target for Frame::decode
//!
//! Arbitrary byte sequences must never panic the decoder. Any frame that
//! decodes must re-encode to the same prefix of the input.

#![no_main]

use cohort_proto::{Frame, Message};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(frame) = Frame::decode(data) else {
        return;
    };

    let mut wire = Vec::new();
    frame.encode(&mut wire).expect("decoded frame re-encodes");
    assert_eq!(&data[..wire.len()], &wire[..]);

    let _ = Message::from_frame(&frame);
});
