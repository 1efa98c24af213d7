//! Packet codec, type tags, payload helpers and record framing for EmotiBit.
//!
//! EmotiBit devices and hosts exchange short ASCII packets. Each packet is a
//! six-field header followed by zero or more payload fields, separated by
//! commas and terminated by a newline.
//!
//! ## Wire Format
//!
//! ```text
//! +--------------+------------------------------------+
//! | timestamp_ms | u32, sender clock                  |
//! +--------------+------------------------------------+
//! | packet_num   | u16, per-channel sequence          |
//! +--------------+------------------------------------+
//! | data_length  | u16, number of payload fields      |
//! +--------------+------------------------------------+
//! | type_tag     | two ASCII characters               |
//! +--------------+------------------------------------+
//! | version      | u8, protocol version               |
//! +--------------+------------------------------------+
//! | reliability  | u8, 0..100                         |
//! +--------------+------------------------------------+
//! | payload...   | data_length fields                 |
//! +--------------+------------------------------------+
//! | '\n'         | record delimiter                   |
//! +--------------+------------------------------------+
//! ```
//!
//! Example: `1024,7,2,EA,1,100,0.512,0.514\n`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod framing;
pub mod header;
pub mod packet;
pub mod payload;
pub mod type_tag;

// Re-export main types
pub use error::WireError;
pub use framing::{split_datagram, DatagramSplit, FramedPacket, StreamFramer, DEFAULT_MAX_PENDING};
pub use header::{
    PacketHeader, DEFAULT_RELIABILITY, HEADER_LENGTH, MAX_HEADER_CHAR_LENGTH, PACKET_DELIMITER,
    PAYLOAD_DELIMITER, PROTOCOL_VERSION,
};
pub use packet::{encode, now_timestamp_ms, Packet, PacketBuilder};
pub use payload::{get_element, get_keyed_value, split_fields, Element};
pub use type_tag::{label, TypeTag, EMOTIBIT_AVAILABLE};
