//! Answers to REQUEST_DATA.
//!
//! A device lists the elements it wants as payload fields. Each recognised
//! element gets its own reply packet, then one ACK naming the request.

use crate::keepalive::PacketCounter;
use chrono::{DateTime, Local, TimeZone};
use emotibit_wire::{PacketBuilder, TypeTag};
use tracing::debug;

/// Format of the TIMESTAMP_LOCAL payload
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S-%6f";

/// Format a local timestamp for a TIMESTAMP_LOCAL reply
pub fn format_timestamp<Tz: TimeZone>(time: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    time.format(TIMESTAMP_FORMAT).to_string()
}

/// Build the replies to one REQUEST_DATA packet, ACK last.
///
/// `fields` are the request's payload fields; `request_number` is its packet
/// number. Reply numbers come from `counter`.
pub fn respond_to_request<S: AsRef<str>>(
    fields: &[S],
    request_number: u16,
    counter: &PacketCounter,
    diagnostics: bool,
) -> Vec<String> {
    let mut replies = Vec::new();

    for element in fields {
        let element = element.as_ref().trim();
        match element.parse::<TypeTag>() {
            Ok(TypeTag::TIMESTAMP_LOCAL) => {
                let stamp = format_timestamp(&Local::now());
                replies.push(
                    PacketBuilder::new(TypeTag::TIMESTAMP_LOCAL, counter.next())
                        .field(stamp)
                        .build(),
                );
            }
            Ok(TypeTag::TIMESTAMP_UTC) => {
                // reserved: devices tolerate the missing reply
                if diagnostics {
                    debug!("TIMESTAMP_UTC requested, not answered");
                }
            }
            _ => {
                if diagnostics {
                    debug!("Ignoring unrecognised request element {:?}", element);
                }
            }
        }
    }

    replies.push(
        PacketBuilder::new(TypeTag::ACK, counter.next())
            .field(request_number)
            .field(TypeTag::REQUEST_DATA)
            .build(),
    );
    replies
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use emotibit_wire::Packet;

    #[test]
    fn test_timestamp_format() {
        let time = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_micro_opt(7, 5, 3, 12)
            .unwrap()
            .and_utc();
        assert_eq!(format_timestamp(&time), "2024-03-09_07-05-03-000012");
    }

    #[test]
    fn test_timestamp_local_then_ack() {
        let counter = PacketCounter::new();
        let replies = respond_to_request(&["TL", "TU", "ZZ"], 41, &counter, true);
        assert_eq!(replies.len(), 2);

        let tl = Packet::parse(&replies[0]).unwrap();
        assert_eq!(tl.header.type_tag, TypeTag::TIMESTAMP_LOCAL);
        assert_eq!(tl.header.data_length, 1);
        assert_eq!(tl.header.packet_number, 0);
        assert_eq!(tl.fields[0].len(), "2024-03-09_07-05-03-000012".len());

        let ack = Packet::parse(&replies[1]).unwrap();
        assert_eq!(ack.header.type_tag, TypeTag::ACK);
        assert_eq!(ack.header.packet_number, 1);
        assert_eq!(ack.fields, vec!["41", "RD"]);
    }

    #[test]
    fn test_empty_request_is_only_acked() {
        let counter = PacketCounter::new();
        let replies = respond_to_request::<&str>(&[], 3, &counter, false);
        assert_eq!(replies.len(), 1);
        assert!(replies[0].contains(",AK,"));
    }
}
