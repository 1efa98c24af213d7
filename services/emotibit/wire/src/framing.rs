//! Splitting byte streams and datagrams into packets.

use crate::header::{PacketHeader, PACKET_DELIMITER};
use bytes::{Buf, BytesMut};
use tracing::{debug, warn};

/// Buffered bytes without a record delimiter before the framer gives up on them
pub const DEFAULT_MAX_PENDING: usize = 64 * 1024;

/// A packet cut from a stream, header already decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramedPacket {
    /// Packet text without the record delimiter
    pub text: String,
    /// Decoded header
    pub header: PacketHeader,
    /// Offset of the payload within `text`
    pub data_start: Option<usize>,
}

/// Incremental framer for stream sockets.
///
/// Bytes are appended as they arrive; complete records are handed out one at a
/// time. Empty records and records whose header does not decode are skipped.
#[derive(Debug)]
pub struct StreamFramer {
    buf: BytesMut,
    max_pending: usize,
    diagnostics: bool,
    skipped_empty: u64,
    skipped_malformed: u64,
}

impl StreamFramer {
    /// Create a framer with the default pending limit
    pub fn new() -> Self {
        Self::with_max_pending(DEFAULT_MAX_PENDING)
    }

    /// Create a framer that discards more than `max_pending` undelimited bytes
    pub fn with_max_pending(max_pending: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            max_pending,
            diagnostics: false,
            skipped_empty: 0,
            skipped_malformed: 0,
        }
    }

    /// Log skipped records at debug level
    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }

    /// Append received bytes
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        if self.buf.len() > self.max_pending && !self.buf.contains(&(PACKET_DELIMITER as u8)) {
            warn!(
                "Discarding {} buffered bytes without a packet delimiter",
                self.buf.len()
            );
            self.buf.clear();
        }
    }

    /// Next well-formed packet, or `None` when no complete record is buffered
    pub fn next_packet(&mut self) -> Option<FramedPacket> {
        loop {
            let pos = self.buf.iter().position(|b| *b == PACKET_DELIMITER as u8)?;
            let record = self.buf.split_to(pos);
            self.buf.advance(1);

            let text = String::from_utf8_lossy(&record);
            let text = text.trim_end_matches('\r');
            if text.is_empty() {
                self.skipped_empty += 1;
                if self.diagnostics {
                    debug!("EMPTY MESSAGE");
                }
                continue;
            }

            match PacketHeader::decode(text) {
                Ok((header, data_start)) => {
                    return Some(FramedPacket {
                        text: text.to_string(),
                        header,
                        data_start,
                    })
                }
                Err(e) => {
                    self.skipped_malformed += 1;
                    if self.diagnostics {
                        debug!("Skipping packet {:?}: {}", text, e);
                    }
                }
            }
        }
    }

    /// Bytes waiting for a delimiter
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Empty records skipped so far
    pub fn skipped_empty(&self) -> u64 {
        self.skipped_empty
    }

    /// Malformed records skipped so far
    pub fn skipped_malformed(&self) -> u64 {
        self.skipped_malformed
    }
}

impl Default for StreamFramer {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of splitting one datagram
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DatagramSplit<'a> {
    /// Non-empty records, delimiter removed
    pub packets: Vec<&'a str>,
    /// Empty records encountered
    pub empty: usize,
    /// Text after the last delimiter, if any
    pub unterminated: Option<&'a str>,
}

/// Split a datagram at the record delimiter.
///
/// Headers are not decoded here; callers decode each record and skip the ones
/// that fail.
pub fn split_datagram(text: &str) -> DatagramSplit<'_> {
    let mut split = DatagramSplit::default();
    let mut rest = text;
    while let Some(pos) = rest.find(PACKET_DELIMITER) {
        let record = rest[..pos].trim_end_matches('\r');
        if record.is_empty() {
            split.empty += 1;
        } else {
            split.packets.push(record);
        }
        rest = &rest[pos + 1..];
    }
    if !rest.is_empty() {
        split.unterminated = Some(rest);
    }
    split
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::type_tag::TypeTag;

    #[test]
    fn test_stream_framer_two_packets() {
        let mut framer = StreamFramer::new();
        framer.extend(b"1,2,3,EA,1,100,0.5\n1,3,3,EA,1,100,0.7\n");

        let first = framer.next_packet().unwrap();
        assert_eq!(first.header.type_tag, TypeTag::EDA);
        assert_eq!(first.header.packet_number, 2);
        assert_eq!(&first.text[first.data_start.unwrap()..], "0.5");

        let second = framer.next_packet().unwrap();
        assert_eq!(second.header.packet_number, 3);
        assert!(framer.next_packet().is_none());
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_stream_framer_skips_empty_and_malformed() {
        let mut framer = StreamFramer::new().with_diagnostics(true);
        framer.extend(b"\n\ngarbage\n9,1,0,PO,1,100\r\n");

        let packet = framer.next_packet().unwrap();
        assert_eq!(packet.header.type_tag, TypeTag::PONG);
        assert_eq!(packet.text, "9,1,0,PO,1,100");
        assert_eq!(framer.skipped_empty(), 2);
        assert_eq!(framer.skipped_malformed(), 1);
    }

    #[test]
    fn test_stream_framer_partial_record() {
        let mut framer = StreamFramer::new();
        framer.extend(b"5,1,1,EA,1,1");
        assert!(framer.next_packet().is_none());
        assert_eq!(framer.pending(), 12);

        framer.extend(b"00,0.1\n5,2");
        let packet = framer.next_packet().unwrap();
        assert_eq!(packet.text, "5,1,1,EA,1,100,0.1");
        assert!(framer.next_packet().is_none());
        assert_eq!(framer.pending(), 3);
    }

    #[test]
    fn test_stream_framer_drops_oversized_garbage() {
        let mut framer = StreamFramer::with_max_pending(8);
        framer.extend(b"0123456789");
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_split_datagram() {
        let split = split_datagram("1,2,3,EA,1,100,0.5\n\n1,3,3,EA,1,100,0.7\ntail");
        assert_eq!(split.packets, vec!["1,2,3,EA,1,100,0.5", "1,3,3,EA,1,100,0.7"]);
        assert_eq!(split.empty, 1);
        assert_eq!(split.unterminated, Some("tail"));

        let split = split_datagram("");
        assert!(split.packets.is_empty());
        assert!(split.unterminated.is_none());
    }
}
