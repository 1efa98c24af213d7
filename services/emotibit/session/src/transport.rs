//! UDP and TCP sockets for the advertising, data and control channels.
//!
//! The data socket starts one port above the advertising port and the control
//! listener one port above the data socket; both move up by two when a port is
//! taken.

use crate::error::{is_transient, Result, SessionError};
use emotibit_wire::StreamFramer;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, ErrorKind};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Ports bound by a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPorts {
    /// Local port of the advertising socket
    pub advertising: u16,
    /// Data socket port, announced to devices as DATA_PORT
    pub data: u16,
    /// Control listener port, announced to devices as CONTROL_PORT
    pub control: u16,
}

/// Ports tried for a socket: `first`, `first + 2`, ... without overflowing
fn candidate_ports(first: u16, attempts: u16) -> impl Iterator<Item = u16> {
    (0..attempts.max(1)).map_while(move |i| first.checked_add(i.checked_mul(2)?))
}

fn is_conflict(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::AddrInUse | ErrorKind::PermissionDenied)
}

/// Bind the advertising socket on an ephemeral port with broadcast enabled
pub async fn bind_advertising() -> Result<UdpSocket> {
    let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))).await?;
    socket.set_broadcast(true)?;
    debug!("Advertising socket bound to {}", socket.local_addr()?);
    Ok(socket)
}

fn bind_data_once(port: u16, receive_buffer: usize) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(false)?;
    if let Err(e) = socket.set_recv_buffer_size(receive_buffer) {
        warn!("Failed to set data receive buffer to {}: {}", receive_buffer, e);
    }
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)).into())?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

/// Bind the data socket on the first free candidate port
pub fn bind_data(first_port: u16, attempts: u16, receive_buffer: usize) -> Result<UdpSocket> {
    for port in candidate_ports(first_port, attempts) {
        match bind_data_once(port, receive_buffer) {
            Ok(socket) => {
                info!("Data socket bound to port {}", port);
                return Ok(socket);
            }
            Err(e) if is_conflict(&e) => debug!("Data port {} unavailable: {}", port, e),
            Err(e) => return Err(e.into()),
        }
    }
    Err(SessionError::BindConflict {
        socket: "data",
        first_port,
        attempts,
    })
}

/// Bind the control listener on the first free candidate port
pub async fn bind_control(first_port: u16, attempts: u16) -> Result<TcpListener> {
    for port in candidate_ports(first_port, attempts) {
        match TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).await {
            Ok(listener) => {
                info!("Control listener bound to port {}", port);
                return Ok(listener);
            }
            Err(e) if is_conflict(&e) => debug!("Control port {} unavailable: {}", port, e),
            Err(e) => return Err(e.into()),
        }
    }
    Err(SessionError::BindConflict {
        socket: "control",
        first_port,
        attempts,
    })
}

/// Receive every datagram already queued on a socket and discard it
pub fn flush_udp(socket: &UdpSocket) -> usize {
    let mut buf = [0u8; 2048];
    let mut flushed = 0;
    while socket.try_recv_from(&mut buf).is_ok() {
        flushed += 1;
    }
    flushed
}

struct ControlPeer {
    stream: TcpStream,
    addr: SocketAddr,
    framer: StreamFramer,
}

/// Control channel: a TCP listener holding at most one device connection
pub struct ControlChannel {
    listener: TcpListener,
    port: u16,
    peer: Mutex<Option<ControlPeer>>,
}

impl std::fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlChannel").field("port", &self.port).finish()
    }
}

impl ControlChannel {
    /// Wrap a bound listener
    pub fn new(listener: TcpListener) -> io::Result<Self> {
        let port = listener.local_addr()?.port();
        Ok(Self {
            listener,
            port,
            peer: Mutex::new(None),
        })
    }

    /// Listening port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Accept a pending connection without waiting.
    ///
    /// A new connection replaces the previous one.
    pub async fn poll_accept(&self) -> Option<SocketAddr> {
        match self.listener.accept().now_or_never()? {
            Ok((stream, addr)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Failed to set nodelay on control stream: {}", e);
                }
                let previous = self.peer.lock().await.replace(ControlPeer {
                    stream,
                    addr,
                    framer: StreamFramer::new(),
                });
                if let Some(previous) = previous {
                    debug!("Control connection from {} replaced by {}", previous.addr, addr);
                }
                info!("Control connection accepted from {}", addr);
                Some(addr)
            }
            Err(e) => {
                if !is_transient(&e) {
                    warn!("Control accept failed: {}", e);
                }
                None
            }
        }
    }

    /// Read whatever the peer has sent and return the complete packets
    pub async fn poll_read(&self, diagnostics: bool) -> Vec<String> {
        let mut guard = self.peer.lock().await;
        let Some(peer) = guard.as_mut() else {
            return Vec::new();
        };

        let mut buf = [0u8; 1024];
        let mut closed = false;
        loop {
            match peer.stream.try_read(&mut buf) {
                Ok(0) => {
                    closed = true;
                    break;
                }
                Ok(n) => peer.framer.extend(&buf[..n]),
                Err(e) if is_transient(&e) => break,
                Err(e) => {
                    debug!("Control read from {} failed: {}", peer.addr, e);
                    closed = true;
                    break;
                }
            }
        }

        let mut packets = Vec::new();
        while let Some(packet) = peer.framer.next_packet() {
            packets.push(packet.text);
        }
        if diagnostics && peer.framer.skipped_malformed() > 0 {
            debug!(
                "Control stream from {} skipped {} malformed packets so far",
                peer.addr,
                peer.framer.skipped_malformed()
            );
        }
        if closed {
            info!("Control connection from {} closed", peer.addr);
            *guard = None;
        }
        packets
    }

    /// Address of the connected peer
    pub async fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer.lock().await.as_ref().map(|p| p.addr)
    }

    /// Send a packet if the peer is `ip`; returns whether it was written
    pub async fn send_to_peer(&self, ip: IpAddr, text: &str) -> bool {
        let guard = self.peer.lock().await;
        let Some(peer) = guard.as_ref() else {
            return false;
        };
        if peer.addr.ip() != ip {
            debug!("Control peer {} is not {}, not sending", peer.addr, ip);
            return false;
        }

        let mut bytes = text.as_bytes();
        while !bytes.is_empty() {
            match peer.stream.try_write(bytes) {
                Ok(n) => bytes = &bytes[n..],
                Err(e) => {
                    warn!("Control write to {} failed: {}", peer.addr, e);
                    return false;
                }
            }
        }
        true
    }

    /// Shut down the peer connection, if any
    pub async fn close_peer(&self) -> io::Result<()> {
        let peer = self.peer.lock().await.take();
        match peer {
            Some(mut peer) => peer.stream.shutdown().await,
            None => Ok(()),
        }
    }
}
