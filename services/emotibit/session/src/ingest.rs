//! Data ingestion loop.
//!
//! Each iteration reads at most one datagram from the data socket, splits it
//! into packets, answers REQUEST_DATA in place and queues everything else for
//! the host's next tick.

use crate::config::pace;
use crate::error::is_transient;
use crate::responder::respond_to_request;
use crate::state::{HostShared, HostStats};
use emotibit_wire::{split_datagram, PacketHeader, TypeTag, PACKET_DELIMITER, PAYLOAD_DELIMITER};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Largest datagram read from the data socket
pub const MAX_DATAGRAM: usize = 65_507;

/// Tracks packet numbers to spot immediate repeats
#[derive(Debug, Default, Clone)]
pub struct SequenceTracker {
    last: Option<u16>,
}

impl SequenceTracker {
    /// Record a packet number; returns `true` when it repeats the previous one
    pub fn observe(&mut self, packet_number: u16) -> bool {
        let repeat = self.last == Some(packet_number);
        self.last = Some(packet_number);
        repeat
    }

    /// Last packet number seen
    pub fn last(&self) -> Option<u16> {
        self.last
    }
}

/// Reader for the data socket
pub struct DataIngestor {
    shared: Arc<HostShared>,
    sequence: SequenceTracker,
    buf: Vec<u8>,
}

impl DataIngestor {
    /// Create an ingestor over shared host state
    pub fn new(shared: Arc<HostShared>) -> Self {
        Self {
            shared,
            sequence: SequenceTracker::default(),
            buf: vec![0u8; MAX_DATAGRAM],
        }
    }

    /// Process at most one pending datagram; returns packets handled
    pub async fn poll_once(&mut self) -> usize {
        let (len, from) = match self.shared.data_socket.try_recv_from(&mut self.buf) {
            Ok(received) => received,
            Err(e) if is_transient(&e) => return 0,
            Err(e) => {
                warn!("Data socket read failed: {}", e);
                return 0;
            }
        };

        let (device_ip, connected) = {
            let connection = self.shared.connection.lock().await;
            (connection.device_ip(), connection.is_connected())
        };
        if let Some(ip) = device_ip {
            if from.ip() != ip {
                if self.shared.diagnostics() {
                    debug!("Ignoring datagram from {} while bound to {}", from, ip);
                }
                return 0;
            }
        }
        HostStats::bump(&self.shared.stats.datagrams);

        let text = String::from_utf8_lossy(&self.buf[..len]).into_owned();
        self.handle_datagram(&text, from, connected).await
    }

    async fn handle_datagram(&mut self, text: &str, from: SocketAddr, connected: bool) -> usize {
        let diagnostics = self.shared.diagnostics();
        let split = split_datagram(text);
        if split.empty > 0 && diagnostics {
            debug!("EMPTY MESSAGE x{} from {}", split.empty, from);
        }
        if let Some(tail) = split.unterminated {
            HostStats::bump(&self.shared.stats.malformed);
            if diagnostics {
                debug!("Malformed message without {:?} delimiter: {:?}", PACKET_DELIMITER, tail);
            }
        }

        let mut handled = 0;
        let mut first = true;
        for record in split.packets {
            let (header, data_start) = match PacketHeader::decode(record) {
                Ok(decoded) => decoded,
                Err(e) => {
                    HostStats::bump(&self.shared.stats.malformed);
                    if diagnostics {
                        debug!("Dropping packet {:?}: {}", record, e);
                    }
                    continue;
                }
            };

            if first {
                first = false;
                if connected {
                    self.rebind_target(from).await;
                }
            }

            if self.sequence.observe(header.packet_number) {
                HostStats::bump(&self.shared.stats.duplicates);
                if diagnostics {
                    debug!("Duplicate packet number {} ({})", header.packet_number, header.type_tag);
                }
                if self.shared.config.drop_duplicate_packets {
                    continue;
                }
            }

            if header.type_tag == TypeTag::REQUEST_DATA {
                let fields: Vec<&str> = data_start
                    .map(|start| record[start..].split(PAYLOAD_DELIMITER).collect())
                    .unwrap_or_default();
                self.answer_request(&fields, header.packet_number, from).await;
            } else {
                self.shared.enqueue(record.to_string());
            }
            handled += 1;
        }
        handled
    }

    async fn rebind_target(&self, from: SocketAddr) {
        let mut target = self.shared.data_target.lock().await;
        if *target != Some(from) {
            info!("Data replies now go to {}", from);
            *target = Some(from);
        }
    }

    async fn answer_request(&self, fields: &[&str], request_number: u16, from: SocketAddr) {
        let replies = respond_to_request(
            fields,
            request_number,
            &self.shared.counters.data,
            self.shared.diagnostics(),
        );
        let target = self.shared.data_target.lock().await.unwrap_or(from);
        for reply in replies {
            if let Err(e) = self.shared.data_socket.send_to(reply.as_bytes(), target).await {
                warn!("Failed to answer REQUEST_DATA to {}: {}", target, e);
            }
        }
        HostStats::bump(&self.shared.stats.requests_answered);
    }

    /// Poll until the stop flag is raised
    pub async fn run(mut self) {
        debug!("Data loop started");
        while !self.shared.stop_data.load(Ordering::SeqCst) {
            self.poll_once().await;
            pace(self.shared.config.data_thread_sleep_us).await;
        }
        debug!("Data loop stopped");
    }
}

/// Run the data loop over shared host state
pub async fn run_data_loop(shared: Arc<HostShared>) {
    DataIngestor::new(shared).run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::bound_host;
    use emotibit_wire::Packet;
    use std::net::IpAddr;
    use std::time::{Duration, Instant};
    use tokio::time::sleep;

    async fn poll_until_handled(ingestor: &mut DataIngestor) -> usize {
        for _ in 0..100 {
            let handled = ingestor.poll_once().await;
            if handled > 0 {
                return handled;
            }
            sleep(Duration::from_millis(5)).await;
        }
        0
    }

    #[test]
    fn test_sequence_tracker() {
        let mut tracker = SequenceTracker::default();
        assert!(!tracker.observe(1));
        assert!(tracker.observe(1));
        assert!(!tracker.observe(2));
        assert!(!tracker.observe(1));
        assert_eq!(tracker.last(), Some(1));
    }

    #[tokio::test]
    async fn test_datagram_packets_are_queued() {
        let (shared, mut channels, device) = bound_host(Default::default()).await;
        let mut ingestor = DataIngestor::new(shared.clone());

        device
            .send_to(b"1,2,3,EA,1,100,0.5\n1,3,3,EA,1,100,0.7\n", ("127.0.0.1", shared.ports.data))
            .await
            .unwrap();
        assert_eq!(poll_until_handled(&mut ingestor).await, 2);

        assert_eq!(channels.inbound.try_recv().unwrap(), "1,2,3,EA,1,100,0.5");
        assert_eq!(channels.inbound.try_recv().unwrap(), "1,3,3,EA,1,100,0.7");
        assert!(channels.inbound.try_recv().is_err());
        assert_eq!(shared.stats.snapshot().enqueued, 2);
    }

    #[tokio::test]
    async fn test_malformed_packets_do_not_block_neighbours() {
        let (shared, mut channels, device) = bound_host(Default::default()).await;
        let mut ingestor = DataIngestor::new(shared.clone());

        device
            .send_to(b"junk\n\n1,3,1,T0,1,100,30.5\npartial", ("127.0.0.1", shared.ports.data))
            .await
            .unwrap();
        assert_eq!(poll_until_handled(&mut ingestor).await, 1);
        assert_eq!(channels.inbound.try_recv().unwrap(), "1,3,1,T0,1,100,30.5");
        assert_eq!(shared.stats.snapshot().malformed, 2);
    }

    #[tokio::test]
    async fn test_request_data_is_answered_not_queued() {
        let (shared, mut channels, device) = bound_host(Default::default()).await;
        let mut ingestor = DataIngestor::new(shared.clone());

        device
            .send_to(b"5,9,1,RD,1,100,TL\n", ("127.0.0.1", shared.ports.data))
            .await
            .unwrap();
        assert_eq!(poll_until_handled(&mut ingestor).await, 1);
        assert!(channels.inbound.try_recv().is_err());

        let mut buf = [0u8; 512];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), device.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let tl = Packet::parse(std::str::from_utf8(&buf[..n]).unwrap()).unwrap();
        assert_eq!(tl.header.type_tag, TypeTag::TIMESTAMP_LOCAL);

        let (n, _) = tokio::time::timeout(Duration::from_secs(2), device.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let ack = Packet::parse(std::str::from_utf8(&buf[..n]).unwrap()).unwrap();
        assert_eq!(ack.header.type_tag, TypeTag::ACK);
        assert_eq!(ack.fields, vec!["9", "RD"]);
        assert_eq!(shared.stats.snapshot().requests_answered, 1);
    }

    #[tokio::test]
    async fn test_duplicates_dropped_when_configured() {
        let config = crate::config::HostConfig {
            drop_duplicate_packets: true,
            ..Default::default()
        };
        let (shared, mut channels, device) = bound_host(config).await;
        let mut ingestor = DataIngestor::new(shared.clone());

        device
            .send_to(b"1,4,1,EA,1,100,1\n1,4,1,EA,1,100,1\n1,5,1,EA,1,100,2\n", ("127.0.0.1", shared.ports.data))
            .await
            .unwrap();
        assert_eq!(poll_until_handled(&mut ingestor).await, 2);
        assert_eq!(channels.inbound.try_recv().unwrap(), "1,4,1,EA,1,100,1");
        assert_eq!(channels.inbound.try_recv().unwrap(), "1,5,1,EA,1,100,2");
        assert_eq!(shared.stats.snapshot().duplicates, 1);
    }

    #[tokio::test]
    async fn test_duplicates_kept_by_default() {
        let (shared, mut channels, device) = bound_host(Default::default()).await;
        let mut ingestor = DataIngestor::new(shared.clone());

        device
            .send_to(b"1,4,1,EA,1,100,1\n1,4,1,EA,1,100,1\n", ("127.0.0.1", shared.ports.data))
            .await
            .unwrap();
        assert_eq!(poll_until_handled(&mut ingestor).await, 2);
        assert!(channels.inbound.try_recv().is_ok());
        assert!(channels.inbound.try_recv().is_ok());
        assert_eq!(shared.stats.snapshot().duplicates, 1);
    }

    #[tokio::test]
    async fn test_foreign_sender_filtered_and_target_rebound() {
        let (shared, mut channels, device) = bound_host(Default::default()).await;
        let mut ingestor = DataIngestor::new(shared.clone());
        let data_addr = ("127.0.0.1", shared.ports.data);

        let foreign: IpAddr = "10.1.2.3".parse().unwrap();
        shared.connection.lock().await.begin("far", foreign, Instant::now());
        device.send_to(b"1,1,1,EA,1,100,1\n", data_addr).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(ingestor.poll_once().await, 0);
        assert!(channels.inbound.try_recv().is_err());

        shared.connection.lock().await.reset();
        let local: IpAddr = "127.0.0.1".parse().unwrap();
        {
            let mut connection = shared.connection.lock().await;
            connection.begin("near", local, Instant::now());
            connection.on_pong(local, 1, 1, Instant::now());
        }
        device.send_to(b"1,2,1,EA,1,100,1\n", data_addr).await.unwrap();
        assert_eq!(poll_until_handled(&mut ingestor).await, 1);
        assert_eq!(*shared.data_target.lock().await, Some(device.local_addr().unwrap()));
    }
}
