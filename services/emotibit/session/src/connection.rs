//! Connection state machine.
//!
//! ```text
//!   Disconnected --begin()--> Connecting --matching PONG--> Connected
//!        ^                        |                            |
//!        +------ reset() / start timeout / keepalive timeout --+
//! ```
//!
//! The state is pure bookkeeping over `Instant`s; the loops that own the
//! sockets decide what to send based on the `*_due` queries.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Connection phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionPhase {
    /// No device selected
    Disconnected,
    /// EMOTIBIT_CONNECT sent, waiting for PONG
    Connecting,
    /// Device streaming to this host
    Connected,
}

/// Result of feeding a PONG to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PongOutcome {
    /// Connecting became Connected
    Established,
    /// Keepalive refreshed
    Refreshed,
    /// PONG did not match the current device or port
    Ignored,
}

/// A timeout detected by [`ConnectionState::check_timeouts`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionTimeout {
    /// No PONG arrived while connecting
    Start,
    /// PONGs stopped while connected
    Keepalive,
}

/// Connection fields for the single supported device
#[derive(Debug, Clone)]
pub struct ConnectionState {
    phase: ConnectionPhase,
    device_id: Option<String>,
    device_ip: Option<IpAddr>,
    started: Option<Instant>,
    last_pong: Option<Instant>,
    last_ping: Option<Instant>,
    last_connect_sent: Option<Instant>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionState {
    /// Disconnected state
    pub fn new() -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            device_id: None,
            device_ip: None,
            started: None,
            last_pong: None,
            last_ping: None,
            last_connect_sent: None,
        }
    }

    /// Current phase
    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// Selected device id
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    /// Selected device address
    pub fn device_ip(&self) -> Option<IpAddr> {
        self.device_ip
    }

    /// Whether a device is connected
    pub fn is_connected(&self) -> bool {
        self.phase == ConnectionPhase::Connected
    }

    /// Whether a connect attempt is pending
    pub fn is_connecting(&self) -> bool {
        self.phase == ConnectionPhase::Connecting
    }

    /// Start connecting to a device. Only valid from Disconnected.
    pub fn begin(&mut self, device_id: &str, ip: IpAddr, now: Instant) -> bool {
        if self.phase != ConnectionPhase::Disconnected {
            debug!(
                "Ignoring connect to {}: already {:?} with {:?}",
                device_id, self.phase, self.device_id
            );
            return false;
        }
        info!("Connecting to {} at {}", device_id, ip);
        self.phase = ConnectionPhase::Connecting;
        self.device_id = Some(device_id.to_string());
        self.device_ip = Some(ip);
        self.started = Some(now);
        self.last_pong = None;
        self.last_ping = None;
        self.last_connect_sent = None;
        true
    }

    /// Feed a PONG from `ip` that named `data_port`
    pub fn on_pong(&mut self, ip: IpAddr, data_port: u16, our_data_port: u16, now: Instant) -> PongOutcome {
        if self.device_ip != Some(ip) || data_port != our_data_port {
            return PongOutcome::Ignored;
        }
        match self.phase {
            ConnectionPhase::Connecting => {
                info!("Connected to {:?} at {}", self.device_id, ip);
                self.phase = ConnectionPhase::Connected;
                self.last_pong = Some(now);
                PongOutcome::Established
            }
            ConnectionPhase::Connected => {
                self.last_pong = Some(now);
                PongOutcome::Refreshed
            }
            ConnectionPhase::Disconnected => PongOutcome::Ignored,
        }
    }

    /// Whether a keepalive PING should go out now; records the send when it should
    pub fn ping_due(&mut self, now: Instant, interval: Duration) -> bool {
        if !self.is_connected() {
            return false;
        }
        let due = self.last_ping.map_or(true, |t| now.duration_since(t) >= interval);
        if due {
            self.last_ping = Some(now);
        }
        due
    }

    /// Whether EMOTIBIT_CONNECT should be resent now; records the send when it should
    pub fn connect_due(&mut self, now: Instant, retry: Duration) -> bool {
        if !self.is_connecting() {
            return false;
        }
        let due = self
            .last_connect_sent
            .map_or(true, |t| now.duration_since(t) >= retry);
        if due {
            self.last_connect_sent = Some(now);
        }
        due
    }

    /// Detect a stalled connect attempt or a silent connected device
    pub fn check_timeouts(
        &self,
        now: Instant,
        start_timeout: Duration,
        keepalive_timeout: Duration,
    ) -> Option<ConnectionTimeout> {
        match self.phase {
            ConnectionPhase::Connecting => self
                .started
                .filter(|t| now.duration_since(*t) > start_timeout)
                .map(|_| ConnectionTimeout::Start),
            ConnectionPhase::Connected => self
                .last_pong
                .filter(|t| now.duration_since(*t) > keepalive_timeout)
                .map(|_| ConnectionTimeout::Keepalive),
            ConnectionPhase::Disconnected => None,
        }
    }

    /// Back to Disconnected with every field cleared
    pub fn reset(&mut self) {
        if self.phase != ConnectionPhase::Disconnected {
            info!("Disconnected from {:?}", self.device_id);
        }
        *self = Self::new();
    }
}
