//! Discovery and connection packets: HELLO_EMOTIBIT, HELLO_HOST,
//! EMOTIBIT_CONNECT, PONG and EMOTIBIT_DISCONNECT.

use emotibit_wire::{get_keyed_value, label, PacketBuilder, PacketHeader, TypeTag, EMOTIBIT_AVAILABLE};
use std::net::IpAddr;

/// A parsed HELLO_HOST answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloHost {
    /// Device id, or the sender address when absent
    pub id: String,
    /// Advertised status value
    pub data_port: i32,
}

impl HelloHost {
    /// Whether the device advertised itself as free
    pub fn available(&self) -> bool {
        self.data_port == EMOTIBIT_AVAILABLE
    }
}

/// HELLO_EMOTIBIT sent to broadcast and unicast advertising targets
pub fn build_hello_emotibit(packet_number: u16) -> String {
    PacketBuilder::new(TypeTag::HELLO_EMOTIBIT, packet_number).build()
}

/// Ask a device to stream to our control and data ports
pub fn build_connect(packet_number: u16, control_port: u16, data_port: u16) -> String {
    PacketBuilder::new(TypeTag::EMOTIBIT_CONNECT, packet_number)
        .keyed(label::CONTROL_PORT, control_port)
        .keyed(label::DATA_PORT, data_port)
        .build()
}

/// Tell the connected device to stop streaming
pub fn build_disconnect(packet_number: u16) -> String {
    PacketBuilder::new(TypeTag::EMOTIBIT_DISCONNECT, packet_number).build()
}

/// Parse a HELLO_HOST packet.
///
/// Returns `None` for other packet kinds and for HELLO_HOST without a numeric
/// DATA_PORT.
pub fn parse_hello_host(text: &str, header: &PacketHeader, data_start: Option<usize>, sender: IpAddr) -> Option<HelloHost> {
    if header.type_tag != TypeTag::HELLO_HOST {
        return None;
    }
    let start = data_start?;
    let (port, _) = get_keyed_value(text, label::DATA_PORT, start)?;
    let data_port = port.trim().parse().ok()?;
    let id = get_keyed_value(text, label::DEVICE_ID, start)
        .map(|(id, _)| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| sender.to_string());
    Some(HelloHost { id, data_port })
}

/// DATA_PORT named by a PONG packet
pub fn parse_pong(text: &str, header: &PacketHeader, data_start: Option<usize>) -> Option<u16> {
    if header.type_tag != TypeTag::PONG {
        return None;
    }
    let (port, _) = get_keyed_value(text, label::DATA_PORT, data_start?)?;
    port.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn sender() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, 40))
    }

    fn hello(text: &str) -> Option<HelloHost> {
        let (header, start) = PacketHeader::decode(text).unwrap();
        parse_hello_host(text, &header, start, sender())
    }

    #[test]
    fn test_parse_hello_host_with_id() {
        let found = hello("100,3,4,HH,1,100,DP,-1,DI,MD-V5-0000123\n").unwrap();
        assert_eq!(found.id, "MD-V5-0000123");
        assert!(found.available());

        let busy = hello("100,3,4,HH,1,100,DP,3132,DI,MD-V5-0000123\n").unwrap();
        assert!(!busy.available());
    }

    #[test]
    fn test_parse_hello_host_defaults_id_to_ip() {
        let found = hello("100,3,2,HH,1,100,DP,-1\n").unwrap();
        assert_eq!(found.id, "192.168.1.40");
    }

    #[test]
    fn test_parse_hello_host_requires_data_port() {
        assert!(hello("100,3,2,HH,1,100,DI,abc\n").is_none());
        assert!(hello("100,3,0,HH,1,100\n").is_none());
        assert!(hello("100,3,2,HH,1,100,DP,x\n").is_none());
        assert!(hello("100,3,2,PO,1,100,DP,-1\n").is_none());
    }

    #[test]
    fn test_connect_packet_carries_ports() {
        let text = build_connect(9, 3133, 3132);
        let (header, start) = PacketHeader::decode(&text).unwrap();
        assert_eq!(header.type_tag, TypeTag::EMOTIBIT_CONNECT);
        assert_eq!(header.data_length, 4);
        assert_eq!(get_keyed_value(&text, "CP", start.unwrap()).unwrap().0, "3133");
        assert_eq!(get_keyed_value(&text, "DP", start.unwrap()).unwrap().0, "3132");
    }

    #[test]
    fn test_parse_pong() {
        let text = "55,8,2,PO,1,100,DP,3132\n";
        let (header, start) = PacketHeader::decode(text).unwrap();
        assert_eq!(parse_pong(text, &header, start), Some(3132));

        let text = build_hello_emotibit(1);
        let (header, start) = PacketHeader::decode(&text).unwrap();
        assert_eq!(parse_pong(&text, &header, start), None);
    }

    #[test]
    fn test_disconnect_packet() {
        let (header, start) = PacketHeader::decode(&build_disconnect(2)).unwrap();
        assert_eq!(header.type_tag, TypeTag::EMOTIBIT_DISCONNECT);
        assert!(start.is_none());
    }
}
