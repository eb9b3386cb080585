//! Wire-format codec
//!
//! Stateless conversion between the structured message/bundle model and
//! its binary wire form. All multi-byte values are big-endian; strings and
//! blobs are zero-padded to 4-byte boundaries.

pub mod decode;
pub mod encode;
pub mod time;
pub mod types;

pub use decode::{decode_arguments, decode_packet, peek_bundle_time};
pub use encode::{encode_message, encode_packet};
pub use time::{TimeTag, SECONDS_1900_TO_1970};
pub use types::{Argument, Bundle, Message, MidiMessage, Packet, Rgba};

/// Literal bundle header as it appears on the wire (padded to 8 bytes)
pub const BUNDLE_HEADER: &[u8; 8] = b"#bundle\0";
