//! Packet encoding and decoding.

use crate::error::WireError;
use crate::header::{
    PacketHeader, DEFAULT_RELIABILITY, HEADER_LENGTH, PACKET_DELIMITER, PAYLOAD_DELIMITER,
    PROTOCOL_VERSION,
};
use crate::payload::split_fields;
use crate::type_tag::TypeTag;
use std::time::{SystemTime, UNIX_EPOCH};

/// A decoded packet: header plus ordered payload fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet header
    pub header: PacketHeader,
    /// Payload fields in wire order
    pub fields: Vec<String>,
}

impl Packet {
    /// Decode with the lenient header contract.
    ///
    /// Every field after the header is kept, whatever the declared length.
    pub fn parse(text: &str) -> Result<Self, WireError> {
        let (header, data_start) = PacketHeader::decode(text)?;
        let fields = match data_start {
            Some(start) => text[start..]
                .trim_end_matches(['\r', PACKET_DELIMITER])
                .split(PAYLOAD_DELIMITER)
                .map(str::to_string)
                .collect(),
            None => Vec::new(),
        };
        Ok(Self { header, fields })
    }

    /// Decode with the strict contract: the declared data length must be present.
    ///
    /// Empty tokens are dropped before counting. Fields past the declared length
    /// are ignored.
    pub fn parse_strict(text: &str) -> Result<Self, WireError> {
        let tokens = split_fields(text);
        let header = PacketHeader::from_fields(&tokens)?;
        let end = HEADER_LENGTH + header.data_length as usize;
        let fields = tokens[HEADER_LENGTH..end].iter().map(|f| f.to_string()).collect();
        Ok(Self { header, fields })
    }

    /// Packet type
    pub fn type_tag(&self) -> TypeTag {
        self.header.type_tag
    }
}

/// Builder for outgoing packets
#[derive(Debug, Clone)]
pub struct PacketBuilder {
    type_tag: TypeTag,
    packet_number: u16,
    timestamp_ms: Option<u32>,
    protocol_version: u8,
    reliability: u8,
    fields: Vec<String>,
}

impl PacketBuilder {
    /// Start a packet of the given kind
    pub fn new(type_tag: TypeTag, packet_number: u16) -> Self {
        Self {
            type_tag,
            packet_number,
            timestamp_ms: None,
            protocol_version: PROTOCOL_VERSION,
            reliability: DEFAULT_RELIABILITY,
            fields: Vec::new(),
        }
    }

    /// Append one payload field
    pub fn field(mut self, value: impl ToString) -> Self {
        self.fields.push(value.to_string());
        self
    }

    /// Append a key/value pair
    pub fn keyed(self, key: &str, value: impl ToString) -> Self {
        self.field(key).field(value)
    }

    /// Append several payload fields
    pub fn fields<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.fields.extend(values.into_iter().map(|v| v.as_ref().to_string()));
        self
    }

    /// Override the protocol version
    pub fn protocol_version(mut self, version: u8) -> Self {
        self.protocol_version = version;
        self
    }

    /// Override the reliability score
    pub fn reliability(mut self, reliability: u8) -> Self {
        self.reliability = reliability;
        self
    }

    /// Pin the timestamp instead of reading the clock at build time
    pub fn timestamp_ms(mut self, timestamp_ms: u32) -> Self {
        self.timestamp_ms = Some(timestamp_ms);
        self
    }

    /// Produce the packet text, record delimiter included
    pub fn build(self) -> String {
        let header = PacketHeader {
            timestamp_ms: self.timestamp_ms.unwrap_or_else(now_timestamp_ms),
            packet_number: self.packet_number,
            data_length: self.fields.len().min(u16::MAX as usize) as u16,
            type_tag: self.type_tag,
            protocol_version: self.protocol_version,
            data_reliability: self.reliability,
        };

        let mut out = header.encode();
        for field in &self.fields {
            out.push(PAYLOAD_DELIMITER);
            out.push_str(field);
        }
        out.push(PACKET_DELIMITER);
        out
    }
}

/// Encode a packet in one call
pub fn encode<S: AsRef<str>>(
    type_tag: TypeTag,
    packet_number: u16,
    fields: &[S],
    protocol_version: u8,
    reliability: u8,
) -> String {
    PacketBuilder::new(type_tag, packet_number)
        .fields(fields)
        .protocol_version(protocol_version)
        .reliability(reliability)
        .build()
}

/// Wall clock milliseconds truncated to the 32-bit header field
pub fn now_timestamp_ms() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_hello() {
        let text = encode::<&str>(TypeTag::HELLO_EMOTIBIT, 7, &[], 1, 100);
        assert!(text.ends_with('\n'));

        let (header, data_start) = PacketHeader::decode(&text).unwrap();
        assert_eq!(header.type_tag.as_str(), "HE");
        assert_eq!(header.packet_number, 7);
        assert_eq!(header.data_length, 0);
        assert!(data_start.is_none());
    }

    #[test]
    fn test_encode_decode_payload() {
        for (tag, n) in [("EA", 0u16), ("B%", 1), ("zz", 32768), ("T1", u16::MAX)] {
            let tag: TypeTag = tag.parse().unwrap();
            let text = encode(tag, n, &["0.25", "-3"], PROTOCOL_VERSION, DEFAULT_RELIABILITY);
            let packet = Packet::parse(&text).unwrap();
            assert_eq!(packet.header.type_tag, tag);
            assert_eq!(packet.header.packet_number, n);
            assert_eq!(packet.header.data_length, 2);
            assert_eq!(packet.fields, vec!["0.25", "-3"]);
        }
    }

    #[test]
    fn test_every_accepted_tag_survives_encoding() {
        let mut accepted = 0;
        for a in 0u8..=127 {
            for b in 0u8..=127 {
                let Ok(tag) = TypeTag::new([a, b]) else {
                    continue;
                };
                accepted += 1;
                let text = encode(tag, 3, &["x"], PROTOCOL_VERSION, DEFAULT_RELIABILITY);
                let (header, data_start) = PacketHeader::decode(&text)
                    .unwrap_or_else(|e| panic!("tag {:?} did not decode: {}", tag, e));
                assert_eq!(header.type_tag, tag);
                assert_eq!(header.packet_number, 3);
                assert_eq!(header.data_length, 1);
                assert_eq!(&text[data_start.unwrap()..], "x\n");
            }
        }
        // printable ASCII without the comma: 94 characters per position
        assert_eq!(accepted, 94 * 94);
    }

    #[test]
    fn test_builder_keyed_fields() {
        let text = PacketBuilder::new(TypeTag::EMOTIBIT_CONNECT, 4)
            .keyed("CP", 3133)
            .keyed("DP", 3132)
            .timestamp_ms(10)
            .build();
        assert_eq!(text, "10,4,4,EC,1,100,CP,3133,DP,3132\n");
    }

    #[test]
    fn test_parse_strict_truncated() {
        assert!(matches!(
            Packet::parse_strict("1,2,3,EA,1,100,0.5\n"),
            Err(WireError::Truncated { declared: 3, available: 1 })
        ));

        let packet = Packet::parse_strict("1,2,1,EA,1,100,0.5,9.9\n").unwrap();
        assert_eq!(packet.fields, vec!["0.5"]);
    }

    #[test]
    fn test_parse_lenient_keeps_all_fields() {
        let packet = Packet::parse("1,2,3,EA,1,100,0.5\n").unwrap();
        assert_eq!(packet.header.data_length, 3);
        assert_eq!(packet.fields, vec!["0.5"]);
        assert_eq!(packet.type_tag(), TypeTag::EDA);
    }
}
