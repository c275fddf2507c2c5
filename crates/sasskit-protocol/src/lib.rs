//! Wire layer for the embedded stylesheet compiler protocol.
//!
//! Both sides of the protocol exchange frames of the form
//! `varint(length) || payload`, where the payload is a protobuf-encoded
//! message envelope. This crate owns the framing, the envelope types, and
//! the hand-maintained codec; it knows nothing about processes or sessions.

pub mod codec;
pub mod proto;
pub mod varint;
pub mod wire;

pub use codec::{decode_inbound, decode_outbound, encode_inbound, encode_outbound};
pub use proto::{InboundMessage, OutboundMessage, PROTOCOL_ERROR_ID};
pub use varint::{read_frame, read_varint, write_frame, write_varint, FrameError, MAX_FRAME_LEN};
pub use wire::DecodeError;
