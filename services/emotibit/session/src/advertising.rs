//! Discovery and advertising loop.
//!
//! Each iteration of the loop:
//!
//! 1. sends HELLO_EMOTIBIT to the targets the [`AdvertisingPlanner`] picks,
//! 2. reads at most one advertising datagram per check interval and feeds it
//!    to discovery and the connection handshake,
//! 3. sends keepalive PINGs or EMOTIBIT_CONNECT retries, and enforces the
//!    connection timeouts,
//! 4. ages out silent devices,
//! 5. services the control listener.

use crate::config::{pace, HostConfig};
use crate::connection::{ConnectionTimeout, PongOutcome};
use crate::error::{is_transient, SessionError};
use crate::handshake::{build_connect, build_hello_emotibit, parse_hello_host, parse_pong};
use crate::keepalive::build_ping;
use crate::network::{available_networks, Subnet};
use crate::state::{now_ms, HostShared};
use emotibit_wire::{split_datagram, PacketHeader};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Largest advertising datagram read
const MAX_ADVERTISING_DATAGRAM: usize = 4096;

/// Decides where HELLO_EMOTIBIT goes on each iteration.
///
/// A round starts every send interval. A round either sends one broadcast to
/// the current subnet, or runs a unicast sweep over the host id range, a few
/// ids per step. Once a device subnet is known all advertising stays on it.
#[derive(Debug, Clone)]
pub struct AdvertisingPlanner {
    send_interval: Duration,
    unicast_delay: Duration,
    per_loop: u32,
    range: (u8, u8),
    broadcast: bool,
    unicast: bool,

    networks: Vec<Subnet>,
    device_subnet: Option<Subnet>,
    last_round: Option<Instant>,
    last_unicast: Option<Instant>,
    send_in_progress: bool,
    host_id: u8,
    broadcast_index: usize,
    unicast_index: usize,
}

impl AdvertisingPlanner {
    /// Planner with timers reset
    pub fn new(config: &HostConfig) -> Self {
        let range = config.unicast_range();
        Self {
            send_interval: config.send_advertising_interval(),
            unicast_delay: config.unicast_min_loop_delay(),
            per_loop: config.n_unicast_ips_per_loop.max(1),
            range,
            broadcast: config.enable_broadcast,
            unicast: config.enable_unicast,
            networks: Vec::new(),
            device_subnet: None,
            last_round: None,
            last_unicast: None,
            send_in_progress: false,
            host_id: range.0,
            broadcast_index: 0,
            unicast_index: 0,
        }
    }

    /// Record the subnet a device answered from. The first one wins.
    pub fn note_device_subnet(&mut self, subnet: Subnet) -> bool {
        if self.device_subnet.is_some() {
            return false;
        }
        info!("Advertising narrowed to device subnet {}", subnet);
        self.device_subnet = Some(subnet);
        true
    }

    /// Subnet devices were found on
    pub fn device_subnet(&self) -> Option<Subnet> {
        self.device_subnet
    }

    /// Subnets currently swept
    pub fn networks(&self) -> &[Subnet] {
        match &self.device_subnet {
            Some(subnet) => std::slice::from_ref(subnet),
            None => &self.networks,
        }
    }

    /// Targets for this iteration.
    ///
    /// `refresh` is called at the start of a round while no device subnet is
    /// known, to pick up interface changes.
    pub fn plan<F>(&mut self, now: Instant, connecting: bool, refresh: F) -> Vec<Ipv4Addr>
    where
        F: FnOnce() -> Vec<Subnet>,
    {
        let start_round = self
            .last_round
            .map_or(true, |t| now.duration_since(t) >= self.send_interval);
        if start_round {
            self.last_round = Some(now);
            self.send_in_progress = true;
            if self.device_subnet.is_none() {
                self.networks = refresh();
                if self.broadcast_index >= self.networks.len() {
                    self.broadcast_index = 0;
                }
                if self.unicast_index >= self.networks.len() {
                    self.unicast_index = 0;
                }
            }
        }

        let found = self.device_subnet.is_some();
        let count = self.networks().len();
        if count == 0 {
            self.send_in_progress = false;
            return Vec::new();
        }

        if self.broadcast && start_round && !connecting {
            let index = if found { 0 } else { self.broadcast_index };
            let target = self.networks()[index].broadcast();
            if !found {
                self.broadcast_index = (self.broadcast_index + 1) % count;
            }
            self.send_in_progress = false;
            return vec![target];
        }

        if !(self.unicast && self.send_in_progress) {
            return Vec::new();
        }
        let step_due = self
            .last_unicast
            .map_or(true, |t| now.duration_since(t) >= self.unicast_delay);
        if !step_due {
            return Vec::new();
        }
        self.last_unicast = Some(now);

        let subnet = self.networks()[if found { 0 } else { self.unicast_index }];
        let mut targets = Vec::with_capacity(self.per_loop as usize);
        for _ in 0..self.per_loop {
            targets.push(subnet.host(self.host_id));
            if self.host_id < self.range.1 {
                self.host_id += 1;
                continue;
            }

            self.host_id = self.range.0;
            if found {
                self.send_in_progress = false;
            } else {
                self.unicast_index += 1;
                if self.unicast_index >= count {
                    self.unicast_index = 0;
                    self.send_in_progress = false;
                }
            }
            break;
        }
        targets
    }
}

/// The advertising loop and its timers
pub struct Advertiser {
    shared: Arc<HostShared>,
    planner: AdvertisingPlanner,
    last_check: Option<Instant>,
    last_expiry: Option<Instant>,
    warned_no_network: bool,
    buf: Vec<u8>,
}

impl Advertiser {
    /// Advertiser over shared host state
    pub fn new(shared: Arc<HostShared>) -> Self {
        let planner = AdvertisingPlanner::new(&shared.config);
        Self {
            shared,
            planner,
            last_check: None,
            last_expiry: None,
            warned_no_network: false,
            buf: vec![0u8; MAX_ADVERTISING_DATAGRAM],
        }
    }

    /// Planner state
    pub fn planner(&self) -> &AdvertisingPlanner {
        &self.planner
    }

    fn device_addr(&self, ip: IpAddr) -> SocketAddr {
        SocketAddr::new(ip, self.shared.config.advertising_port)
    }

    async fn send(&self, text: &str, to: SocketAddr) {
        if let Err(e) = self.shared.advertising_socket.send_to(text.as_bytes(), to).await {
            if self.shared.diagnostics() || !is_transient(&e) {
                debug!("Advertising send to {} failed: {}", to, e);
            }
        }
    }

    /// Send this iteration's HELLO_EMOTIBIT packets
    pub async fn send_advertising(&mut self, now: Instant) {
        let connecting = self.shared.connection.lock().await.is_connecting();
        let config = &self.shared.config;
        let targets = self
            .planner
            .plan(now, connecting, || available_networks(config));

        if self.planner.networks().is_empty() {
            if !self.warned_no_network {
                warn!("Advertising idle: {}", SessionError::NoAvailableNetwork);
                self.warned_no_network = true;
            }
            return;
        }
        self.warned_no_network = false;

        for target in targets {
            let packet = build_hello_emotibit(self.shared.counters.advertising.next());
            self.send(&packet, self.device_addr(IpAddr::V4(target))).await;
        }
    }

    /// Read one advertising datagram if the check interval has elapsed
    pub async fn process_advertising(&mut self, now: Instant) -> Vec<String> {
        let due = self
            .last_check
            .map_or(true, |t| now.duration_since(t) >= self.shared.config.check_advertising_interval());
        if !due {
            return Vec::new();
        }
        self.last_check = Some(now);

        let (len, from) = match self.shared.advertising_socket.try_recv_from(&mut self.buf) {
            Ok(received) => received,
            Err(e) if is_transient(&e) => return Vec::new(),
            Err(e) => {
                warn!("Advertising socket read failed: {}", e);
                return Vec::new();
            }
        };
        let text = String::from_utf8_lossy(&self.buf[..len]).into_owned();
        self.process_datagram(&text, from, now).await
    }

    /// Feed one advertising datagram to discovery and the handshake.
    ///
    /// Returns the packets neither consumed.
    pub async fn process_datagram(&mut self, text: &str, from: SocketAddr, now: Instant) -> Vec<String> {
        let diagnostics = self.shared.diagnostics();
        let mut info_packets = Vec::new();
        let mut registered = false;

        for record in split_datagram(text).packets {
            let (header, data_start) = match PacketHeader::decode(record) {
                Ok(decoded) => decoded,
                Err(e) => {
                    if diagnostics {
                        debug!("Dropping advertising packet {:?} from {}: {}", record, from, e);
                    }
                    continue;
                }
            };

            if let Some(hello) = parse_hello_host(record, &header, data_start, from.ip()) {
                if let Some(subnet) = Subnet::of_ip(from.ip()) {
                    self.planner.note_device_subnet(subnet);
                }
                self.shared
                    .registry
                    .write()
                    .await
                    .observe(&hello.id, from.ip(), hello.available(), now_ms());
                registered = true;
                continue;
            }

            if let Some(port) = parse_pong(record, &header, data_start) {
                let outcome = self
                    .shared
                    .connection
                    .lock()
                    .await
                    .on_pong(from.ip(), port, self.shared.ports.data, now);
                if outcome != PongOutcome::Ignored {
                    continue;
                }
            }

            info_packets.push(record.to_string());
        }

        if registered && self.shared.config.auto_connect {
            self.auto_connect().await;
        }
        info_packets
    }

    async fn auto_connect(&self) {
        if self.shared.connection.lock().await.device_ip().is_some() {
            return;
        }
        let candidate = self
            .shared
            .registry
            .read()
            .await
            .first_available()
            .map(|d| d.id.clone());
        if let Some(id) = candidate {
            info!("Auto-connecting to {}", id);
            self.shared.begin_connect(&id).await;
        }
    }

    /// Keepalive PINGs, EMOTIBIT_CONNECT retries and connection timeouts
    pub async fn maintain_connection(&mut self, now: Instant) {
        let config = &self.shared.config;
        let (device_ip, ping, connect, timeout) = {
            let mut connection = self.shared.connection.lock().await;
            (
                connection.device_ip(),
                connection.ping_due(now, config.ping_interval()),
                connection.connect_due(now, config.connect_retry_interval()),
                connection.check_timeouts(
                    now,
                    config.start_connection_timeout(),
                    config.connection_timeout(),
                ),
            )
        };
        let Some(ip) = device_ip else {
            return;
        };

        match timeout {
            Some(ConnectionTimeout::Start) => {
                warn!("Connecting to {} timed out", ip);
                self.shared.connection.lock().await.reset();
                return;
            }
            Some(ConnectionTimeout::Keepalive) => {
                warn!("Connection to {} lost: no PONG within {:?}", ip, config.connection_timeout());
                self.shared.disconnect().await;
                return;
            }
            None => {}
        }

        let ports = self.shared.ports;
        if ping {
            let packet = build_ping(self.shared.counters.advertising.next(), ports.data);
            self.send(&packet, self.device_addr(ip)).await;
        }
        if connect {
            let packet = build_connect(self.shared.counters.advertising.next(), ports.control, ports.data);
            self.send(&packet, self.device_addr(ip)).await;
        }
    }

    /// Mark silent devices unavailable and purge long-silent ones
    pub async fn expire_devices(&mut self, now: Instant) {
        let due = self
            .last_expiry
            .map_or(true, |t| now.duration_since(t) >= self.shared.config.check_advertising_interval());
        if !due {
            return;
        }
        self.last_expiry = Some(now);

        let keep = self.shared.connection.lock().await.device_id().map(str::to_string);
        let config = &self.shared.config;
        self.shared.registry.write().await.expire(
            now_ms(),
            config.availability_timeout_ms,
            config.purge_timeout_ms,
            keep.as_deref(),
        );
    }

    /// Accept and read the control connection
    pub async fn service_control(&self) -> Vec<String> {
        self.shared.control.poll_accept().await;
        self.shared.control.poll_read(self.shared.diagnostics()).await
    }

    /// One loop iteration
    pub async fn iterate(&mut self) {
        let now = Instant::now();
        self.send_advertising(now).await;

        let mut info_packets = self.process_advertising(now).await;
        info_packets.extend(self.service_control().await);
        for packet in info_packets {
            self.shared.forward_info(packet);
        }

        self.maintain_connection(now).await;
        self.expire_devices(now).await;
    }

    /// Loop until the stop flag is raised
    pub async fn run(mut self) {
        debug!("Advertising loop started");
        while !self.shared.stop_advertising.load(Ordering::SeqCst) {
            self.iterate().await;
            pace(self.shared.config.advertising_thread_sleep_us).await;
        }
        debug!("Advertising loop stopped");
    }
}

/// Run the advertising loop over shared host state
pub async fn run_advertising_loop(shared: Arc<HostShared>) {
    Advertiser::new(shared).run().await
}
