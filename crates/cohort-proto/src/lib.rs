//! Wire types for the Cohort coordination simulator.
//!
//! Every interaction between nodes is a [`Message`]: a sender, a logical
//! timestamp taken from the sender's clock at send time, and a [`Payload`]
//! whose variant determines the [`Tag`]. Inside a simulation messages are
//! passed as values; for a real transport they are converted into a
//! [`Frame`] (fixed binary header + CBOR body).
//!
//! # Layout
//!
//! ```text
//! ┌──────────────────────── FrameHeader (24 bytes) ────────────────────────┐
//! │ magic │ ver │ tag │ sender │ recipient │ channel seq │ payload size    │
//! └────────────────────────────────────────────────────────────────────────┘
//! ┌──────────────────────── CBOR body ─────────────────────────────────────┐
//! │ [timestamp, payload fields...]                                         │
//! └────────────────────────────────────────────────────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod clock;
pub mod errors;
mod frame;
mod header;
mod message;

pub use clock::{ClockKind, LogicalClock};
pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use header::{FrameHeader, Tag};
pub use message::{DataBody, MarkerBody, Message, Payload, RequestBody};

/// Process identifier. Nodes are numbered `0..node_count`.
pub type NodeId = u32;
