//! Basic usage example for the EmotiBit wire protocol.

use emotibit_wire::{
    get_keyed_value, label, split_datagram, Packet, PacketBuilder, PacketHeader, StreamFramer,
    TypeTag,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== EmotiBit Wire Protocol Example ===\n");

    // 1. Build a connect request
    println!("1. Building an EMOTIBIT_CONNECT packet...");
    let text = PacketBuilder::new(TypeTag::EMOTIBIT_CONNECT, 12)
        .keyed(label::CONTROL_PORT, 3133)
        .keyed(label::DATA_PORT, 3132)
        .build();
    print!("   {}", text);

    // 2. Decode it again
    println!("\n2. Decoding the header...");
    let (header, data_start) = PacketHeader::decode(&text)?;
    println!(
        "   type={} number={} length={}",
        header.type_tag, header.packet_number, header.data_length
    );
    if let Some(start) = data_start {
        if let Some((port, _)) = get_keyed_value(&text, label::DATA_PORT, start) {
            println!("   data port = {}", port);
        }
    }

    // 3. Split a datagram carrying several samples
    println!("\n3. Splitting a datagram...");
    let datagram = "1,2,3,EA,1,100,0.5\n1,3,3,EA,1,100,0.7\n";
    for record in split_datagram(datagram).packets {
        let packet = Packet::parse(record)?;
        println!("   {} -> {:?}", packet.header.type_tag, packet.fields);
    }

    // 4. Feed a byte stream in pieces
    println!("\n4. Framing a byte stream...");
    let mut framer = StreamFramer::new();
    framer.extend(b"10,1,0,PO,1,1");
    framer.extend(b"00\n");
    while let Some(packet) = framer.next_packet() {
        println!("   framed {}", packet.text);
    }

    println!("\n=== Example completed successfully! ===");
    Ok(())
}
