//! Fuzz target for Node::receive
//!
//! Frames from the wire may be forged: wrong recipient, replayed sequence
//! numbers, tags that do not fit the node's protocol state. A node must
//! reject them with an error and never panic.

#![no_main]

use cohort_core::{MutexStrategy, Node, NodeConfig};
use cohort_proto::Frame;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&selector, mut rest)) = data.split_first() else {
        return;
    };

    let config = NodeConfig {
        mutex: if selector & 1 == 0 {
            MutexStrategy::PermissionVoting
        } else {
            MutexStrategy::TokenTree { root: 0 }
        },
        ..NodeConfig::default()
    };
    let mut node = Node::new(1, 3, vec![0, 2], &config, 0);

    while let Ok(frame) = Frame::decode(rest) {
        let _ = node.receive(&frame);
        rest = &rest[frame.encoded_len()..];
    }
});
