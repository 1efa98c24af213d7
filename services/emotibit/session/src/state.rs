//! State shared between the advertising loop, the data loop and the host.

use crate::config::HostConfig;
use crate::connection::ConnectionState;
use crate::error::Result;
use crate::handshake::build_disconnect;
use crate::keepalive::ChannelCounters;
use crate::registry::DeviceRegistry;
use crate::transport::{bind_advertising, bind_control, bind_data, flush_udp, ControlChannel, HostPorts};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Capacity of the info packet channel
pub const INFO_CHANNEL_CAPACITY: usize = 256;

/// Running counters
#[derive(Debug, Default)]
pub struct HostStats {
    /// Datagrams read from the data socket
    pub datagrams: AtomicU64,
    /// Packets queued for delivery
    pub enqueued: AtomicU64,
    /// Packets dropped for a bad header or framing
    pub malformed: AtomicU64,
    /// Packets repeating the previous packet number
    pub duplicates: AtomicU64,
    /// REQUEST_DATA packets answered
    pub requests_answered: AtomicU64,
}

/// Point-in-time copy of [`HostStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Datagrams read from the data socket
    pub datagrams: u64,
    /// Packets queued for delivery
    pub enqueued: u64,
    /// Packets dropped for a bad header or framing
    pub malformed: u64,
    /// Packets repeating the previous packet number
    pub duplicates: u64,
    /// REQUEST_DATA packets answered
    pub requests_answered: u64,
}

impl HostStats {
    /// Copy the counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            datagrams: self.datagrams.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            requests_answered: self.requests_answered.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Receiving ends handed to the host facade
#[derive(Debug)]
pub struct HostChannels {
    /// Raw packet text queued by the data loop
    pub inbound: mpsc::UnboundedReceiver<String>,
    /// Packets neither discovery nor the handshake consumed
    pub info: mpsc::Receiver<String>,
}

/// Everything the background loops share with the host
#[derive(Debug)]
pub struct HostShared {
    /// Host configuration
    pub config: HostConfig,
    /// Bound ports
    pub ports: HostPorts,
    /// Advertising socket
    pub advertising_socket: UdpSocket,
    /// Data socket
    pub data_socket: UdpSocket,
    /// Control listener and peer
    pub control: ControlChannel,
    /// Discovered devices
    pub registry: RwLock<DeviceRegistry>,
    /// Connection state machine
    pub connection: Mutex<ConnectionState>,
    /// Where data channel replies go
    pub data_target: Mutex<Option<SocketAddr>>,
    /// Packet counters per channel
    pub counters: ChannelCounters,
    /// Running statistics
    pub stats: HostStats,
    /// Stop flag for the advertising loop
    pub stop_advertising: AtomicBool,
    /// Stop flag for the data loop
    pub stop_data: AtomicBool,
    inbound: mpsc::UnboundedSender<String>,
    info: mpsc::Sender<String>,
}

impl HostShared {
    /// Bind all three sockets and build fresh state
    pub async fn bind(config: HostConfig) -> Result<(Arc<Self>, HostChannels)> {
        let advertising_socket = bind_advertising().await?;
        let data_socket = bind_data(
            config.advertising_port.saturating_add(1),
            config.port_search_attempts,
            config.data_receive_buffer,
        )?;
        let data_port = data_socket.local_addr()?.port();
        let control = ControlChannel::new(
            bind_control(data_port.saturating_add(1), config.port_search_attempts).await?,
        )?;

        let ports = HostPorts {
            advertising: advertising_socket.local_addr()?.port(),
            data: data_port,
            control: control.port(),
        };
        info!(
            "Host sockets bound: advertising={}, data={}, control={}",
            ports.advertising, ports.data, ports.control
        );

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (info_tx, info_rx) = mpsc::channel(INFO_CHANNEL_CAPACITY);

        let shared = Arc::new(Self {
            config,
            ports,
            advertising_socket,
            data_socket,
            control,
            registry: RwLock::new(DeviceRegistry::new()),
            connection: Mutex::new(ConnectionState::new()),
            data_target: Mutex::new(None),
            counters: ChannelCounters::default(),
            stats: HostStats::default(),
            stop_advertising: AtomicBool::new(false),
            stop_data: AtomicBool::new(false),
            inbound: inbound_tx,
            info: info_tx,
        });
        let channels = HostChannels {
            inbound: inbound_rx,
            info: info_rx,
        };
        Ok((shared, channels))
    }

    /// Whether per-packet diagnostics are on
    pub fn diagnostics(&self) -> bool {
        self.config.debug_logs
    }

    /// Queue packet text for the next tick
    pub fn enqueue(&self, text: String) {
        if self.inbound.send(text).is_ok() {
            HostStats::bump(&self.stats.enqueued);
        }
    }

    /// Hand an unconsumed packet to the host, dropping it when nobody keeps up
    pub fn forward_info(&self, text: String) {
        if self.diagnostics() {
            debug!("Info packet: {}", text);
        }
        if self.info.try_send(text).is_err() && self.diagnostics() {
            debug!("Info packet channel full, dropping packet");
        }
    }

    /// Ask both loops to stop at their next iteration
    pub fn request_stop(&self) {
        self.stop_advertising.store(true, Ordering::SeqCst);
        self.stop_data.store(true, Ordering::SeqCst);
    }

    /// Start connecting to a registered, available device.
    ///
    /// Returns `false` without touching any state when the device is unknown,
    /// unavailable, or a connection is already in progress.
    pub async fn begin_connect(&self, device_id: &str) -> bool {
        let target = {
            let registry = self.registry.read().await;
            registry.get(device_id).filter(|d| d.available).map(|d| d.ip)
        };
        let Some(ip) = target else {
            debug!("Device {} is not registered or not available", device_id);
            return false;
        };
        if ip.is_unspecified() {
            return false;
        }
        let now = std::time::Instant::now();
        self.connection.lock().await.begin(device_id, ip, now)
    }

    /// Leave Connecting or Connected.
    ///
    /// Sends EMOTIBIT_DISCONNECT when the control peer is the connected device,
    /// discards datagrams already queued on the data socket and clears the
    /// connection fields. Returns whether a connection existed.
    pub async fn disconnect(&self) -> bool {
        let device_ip = {
            let mut connection = self.connection.lock().await;
            let ip = connection.device_ip();
            connection.reset();
            ip
        };
        let Some(ip) = device_ip else {
            return false;
        };

        let packet = build_disconnect(self.counters.control.next());
        if self.control.send_to_peer(ip, &packet).await {
            debug!("Sent EMOTIBIT_DISCONNECT to {}", ip);
        }

        *self.data_target.lock().await = None;
        let flushed = flush_udp(&self.data_socket);
        if flushed > 0 {
            debug!("Flushed {} pending data datagrams", flushed);
        }
        true
    }

    /// Release sockets one by one. Failures are logged and never stop later releases.
    pub async fn release(self) {
        let Self {
            advertising_socket,
            data_socket,
            control,
            inbound,
            info,
            ..
        } = self;

        if let Err(e) = control.close_peer().await {
            warn!("Failed to shut down control connection: {}", e);
        }
        drop(control);
        debug!("Control listener released");

        drop(data_socket);
        debug!("Data socket released");

        drop(advertising_socket);
        debug!("Advertising socket released");

        drop(inbound);
        drop(info);
    }
}

/// Wall clock milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Bind a host whose advertising port is a loopback socket standing in for a device
    pub(crate) async fn bound_host(config: HostConfig) -> (Arc<HostShared>, HostChannels, UdpSocket) {
        let device = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = HostConfig {
            advertising_port: device.local_addr().unwrap().port(),
            local_ips: vec!["127.0.0.1".to_string()],
            ..config
        };
        let (shared, channels) = HostShared::bind(config).await.unwrap();
        (shared, channels, device)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::bound_host;
    use super::*;
    use std::net::IpAddr;
    use std::time::Instant;

    #[tokio::test]
    async fn test_bind_assigns_ports_above_advertising() {
        let (shared, _channels, device) = bound_host(HostConfig::default()).await;
        let base = device.local_addr().unwrap().port();
        assert!(shared.ports.data > base);
        assert_eq!((shared.ports.data - base) % 2, 1);
        assert!(shared.ports.control > shared.ports.data);
        assert_eq!((shared.ports.control - shared.ports.data) % 2, 1);
    }

    #[tokio::test]
    async fn test_begin_connect_requires_available_device() {
        let (shared, _channels, _device) = bound_host(HostConfig::default()).await;
        let ip: IpAddr = "127.0.0.1".parse().unwrap();

        assert!(!shared.begin_connect("missing").await);

        shared.registry.write().await.observe("busy", ip, false, now_ms());
        assert!(!shared.begin_connect("busy").await);
        assert!(!shared.connection.lock().await.is_connecting());

        shared.registry.write().await.observe("free", ip, true, now_ms());
        assert!(shared.begin_connect("free").await);
        assert!(shared.connection.lock().await.is_connecting());
        assert!(!shared.begin_connect("free").await);
    }

    #[tokio::test]
    async fn test_disconnect_clears_state() {
        let (shared, _channels, _device) = bound_host(HostConfig::default()).await;
        assert!(!shared.disconnect().await);

        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        shared.connection.lock().await.begin("dev", ip, Instant::now());
        *shared.data_target.lock().await = Some("127.0.0.1:9".parse().unwrap());

        assert!(shared.disconnect().await);
        assert!(shared.connection.lock().await.device_ip().is_none());
        assert!(shared.data_target.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_release_after_stop() {
        let (shared, _channels, _device) = bound_host(HostConfig::default()).await;
        shared.request_stop();
        assert!(shared.stop_advertising.load(Ordering::SeqCst));
        assert!(shared.stop_data.load(Ordering::SeqCst));
        let data_port = shared.ports.data;

        let shared = Arc::try_unwrap(shared).unwrap();
        shared.release().await;

        // the data port is free again
        let rebound = std::net::UdpSocket::bind(("0.0.0.0", data_port));
        assert!(rebound.is_ok());
    }
}
