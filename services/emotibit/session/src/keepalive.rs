//! Keepalive PING packets and per-channel packet counters.

use emotibit_wire::{label, PacketBuilder, TypeTag};
use std::sync::atomic::{AtomicU16, Ordering};

/// Build a PING naming our data port
pub fn build_ping(packet_number: u16, data_port: u16) -> String {
    PacketBuilder::new(TypeTag::PING, packet_number)
        .keyed(label::DATA_PORT, data_port)
        .build()
}

/// Monotonic packet counter wrapping at 65536
#[derive(Debug, Default)]
pub struct PacketCounter(AtomicU16);

impl PacketCounter {
    /// Counter starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the current number and advance
    pub fn next(&self) -> u16 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    /// Number the next packet will carry
    pub fn peek(&self) -> u16 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counters for the three channels
#[derive(Debug, Default)]
pub struct ChannelCounters {
    /// Advertising socket packets
    pub advertising: PacketCounter,
    /// Data socket packets
    pub data: PacketCounter,
    /// Control socket packets
    pub control: PacketCounter,
}
