//! Six-field packet header.
//!
//! Two decoders live here. [`PacketHeader::decode`] walks raw packet text and is
//! lenient about the payload: it never checks the declared length against what
//! follows. [`PacketHeader::from_fields`] works on a pre-split field list and
//! rejects packets whose declared length exceeds the fields present.

use crate::error::WireError;
use crate::type_tag::TypeTag;
use serde::{Deserialize, Serialize};

/// Number of fields in a header
pub const HEADER_LENGTH: usize = 6;

/// Longest header text a device emits, delimiters included
pub const MAX_HEADER_CHAR_LENGTH: usize = 35;

/// Delimiter between fields
pub const PAYLOAD_DELIMITER: char = ',';

/// Delimiter terminating a packet
pub const PACKET_DELIMITER: char = '\n';

/// Protocol version this host speaks
pub const PROTOCOL_VERSION: u8 = 1;

/// Reliability value for packets this host emits
pub const DEFAULT_RELIABILITY: u8 = 100;

/// Packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    /// Sender clock in milliseconds
    pub timestamp_ms: u32,
    /// Per-channel sequence number
    pub packet_number: u16,
    /// Number of payload fields
    pub data_length: u16,
    /// Packet kind
    pub type_tag: TypeTag,
    /// Protocol version
    pub protocol_version: u8,
    /// Sender reliability score
    pub data_reliability: u8,
}

impl PacketHeader {
    /// Create a header with the default version and reliability
    pub fn new(type_tag: TypeTag, packet_number: u16, data_length: u16, timestamp_ms: u32) -> Self {
        Self {
            timestamp_ms,
            packet_number,
            data_length,
            type_tag,
            protocol_version: PROTOCOL_VERSION,
            data_reliability: DEFAULT_RELIABILITY,
        }
    }

    /// Decode the header at the start of `text`.
    ///
    /// Returns the header and the byte offset where the payload begins, or `None`
    /// when nothing follows the reliability field.
    pub fn decode(text: &str) -> Result<(Self, Option<usize>), WireError> {
        let mut cursor = 0;

        let timestamp = next_field(text, &mut cursor).ok_or(WireError::MalformedHeader("timestamp"))?;
        if timestamp.is_empty() {
            return Err(WireError::MalformedHeader("timestamp"));
        }
        let timestamp_ms = parse_numeric(timestamp, "timestamp")?;

        let packet_number = next_field(text, &mut cursor)
            .ok_or(WireError::MalformedHeader("packet number"))
            .and_then(|f| parse_numeric(f, "packet number"))?;

        let data_length = next_field(text, &mut cursor)
            .ok_or(WireError::MalformedHeader("data length"))
            .and_then(|f| parse_numeric(f, "data length"))?;

        let type_tag = next_field(text, &mut cursor)
            .ok_or(WireError::MalformedHeader("type tag"))
            .and_then(|f| TypeTag::from_field(f).map_err(|_| WireError::MalformedHeader("type tag")))?;

        let protocol_version = next_field(text, &mut cursor)
            .ok_or(WireError::MalformedHeader("protocol version"))
            .and_then(|f| parse_numeric(f, "protocol version"))?;

        // reliability ends the header; a missing comma just means no payload
        let rest = &text[cursor..];
        let (reliability, data_start) = match rest.find(PAYLOAD_DELIMITER) {
            Some(pos) => (&rest[..pos], Some(cursor + pos + 1)),
            None => (rest, None),
        };
        let data_reliability = parse_numeric(reliability, "reliability")?;

        let header = Self {
            timestamp_ms,
            packet_number,
            data_length,
            type_tag,
            protocol_version,
            data_reliability,
        };
        Ok((header, data_start))
    }

    /// Decode from a pre-split field list, enforcing the declared data length
    pub fn from_fields<S: AsRef<str>>(fields: &[S]) -> Result<Self, WireError> {
        if fields.len() < HEADER_LENGTH {
            return Err(WireError::MalformedHeader("field count"));
        }
        let field = |i: usize, name: &'static str| {
            let f = fields[i].as_ref();
            if f.is_empty() {
                Err(WireError::MalformedHeader(name))
            } else {
                Ok(f)
            }
        };

        let header = Self {
            timestamp_ms: parse_numeric(field(0, "timestamp")?, "timestamp")?,
            packet_number: parse_numeric(field(1, "packet number")?, "packet number")?,
            data_length: parse_numeric(field(2, "data length")?, "data length")?,
            type_tag: TypeTag::from_field(field(3, "type tag")?)
                .map_err(|_| WireError::MalformedHeader("type tag"))?,
            protocol_version: parse_numeric(field(4, "protocol version")?, "protocol version")?,
            data_reliability: parse_numeric(field(5, "reliability")?, "reliability")?,
        };

        let available = fields.len() - HEADER_LENGTH;
        if available < header.data_length as usize {
            return Err(WireError::Truncated {
                declared: header.data_length as usize,
                available,
            });
        }
        Ok(header)
    }

    /// Encode the header fields without a trailing delimiter
    pub fn encode(&self) -> String {
        format!(
            "{ts},{num},{len},{tag},{ver},{rel}",
            ts = self.timestamp_ms,
            num = self.packet_number,
            len = self.data_length,
            tag = self.type_tag,
            ver = self.protocol_version,
            rel = self.data_reliability,
        )
    }
}

/// Return the text between `cursor` and the next delimiter, advancing past it
fn next_field<'a>(text: &'a str, cursor: &mut usize) -> Option<&'a str> {
    let rest = text.get(*cursor..)?;
    let pos = rest.find(PAYLOAD_DELIMITER)?;
    *cursor += pos + 1;
    Some(&rest[..pos])
}

fn parse_numeric<T: std::str::FromStr>(field: &str, name: &'static str) -> Result<T, WireError> {
    field.trim().parse().map_err(|_| WireError::MalformedHeader(name))
}
