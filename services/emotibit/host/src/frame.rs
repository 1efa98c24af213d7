//! Per-tick sample decoding.
//!
//! Queued packet text is re-split and decoded once per tick. Each type tag
//! contributes at most one sample: the numeric values of the last packet seen
//! for that tag during the tick.

use emotibit_wire::{split_datagram, Packet, PacketHeader, TypeTag};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Numeric payload of one packet
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    /// Numeric payload values in wire order
    pub values: Vec<f32>,
    /// Header of the packet the values came from
    pub header: PacketHeader,
}

/// Samples delivered by one tick, keyed by type tag
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SensorFrame {
    samples: BTreeMap<TypeTag, Sample>,
}

impl SensorFrame {
    /// Empty frame
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a packet's values, replacing any earlier sample for its tag
    pub fn insert(&mut self, header: PacketHeader, values: Vec<f32>) {
        self.samples.insert(header.type_tag, Sample { values, header });
    }

    /// Sample for a tag
    pub fn get(&self, tag: TypeTag) -> Option<&Sample> {
        self.samples.get(&tag)
    }

    /// Values for a tag
    pub fn values(&self, tag: TypeTag) -> Option<&[f32]> {
        self.samples.get(&tag).map(|s| s.values.as_slice())
    }

    /// Samples in tag order
    pub fn iter(&self) -> impl Iterator<Item = (TypeTag, &Sample)> {
        self.samples.iter().map(|(tag, sample)| (*tag, sample))
    }

    /// Number of tags with a sample
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no tag produced a sample
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl IntoIterator for SensorFrame {
    type Item = (TypeTag, Sample);
    type IntoIter = std::collections::btree_map::IntoIter<TypeTag, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.into_iter()
    }
}

fn numeric_values(fields: &[String]) -> Vec<f32> {
    fields
        .iter()
        .filter_map(|field| field.trim().parse::<f32>().ok())
        .collect()
}

/// Decode queued packet text into a frame.
///
/// Entries may hold several delimited packets. Packets that fail to decode are
/// skipped without affecting their neighbours; REQUEST_DATA never produces a
/// sample, and neither does a packet with no numeric value. With `strict` the
/// declared data length must be present in the payload.
pub fn process_queued<I, S>(entries: I, strict: bool, diagnostics: bool) -> SensorFrame
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut frame = SensorFrame::new();

    for entry in entries {
        let entry = entry.as_ref();
        let split = split_datagram(entry);
        let records = split.packets.into_iter().chain(split.unterminated);

        for record in records {
            let parsed = if strict {
                Packet::parse_strict(record)
            } else {
                Packet::parse(record)
            };
            let packet = match parsed {
                Ok(packet) => packet,
                Err(e) => {
                    if diagnostics {
                        debug!("Skipping queued packet {:?}: {}", record, e);
                    }
                    continue;
                }
            };

            if packet.header.type_tag == TypeTag::REQUEST_DATA {
                continue;
            }
            let values = numeric_values(&packet.fields);
            if values.is_empty() {
                continue;
            }
            frame.insert(packet.header, values);
        }
    }
    frame
}
