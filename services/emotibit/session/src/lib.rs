//! Device discovery, connection handshake and data ingestion for EmotiBit hosts.
//!
//! A host binds three sockets and runs two background loops over shared state:
//!
//! - **Advertising**: broadcasts or unicasts HELLO_EMOTIBIT across the local
//!   subnets, registers devices that answer with HELLO_HOST, drives the
//!   EMOTIBIT_CONNECT / PONG handshake and keeps the connection alive with PING.
//! - **Data**: reads datagrams from the data socket, answers REQUEST_DATA in
//!   place and queues every other packet for the host's next tick.
//!
//! ## Example
//!
//! ```rust,no_run
//! use emotibit_session::{run_advertising_loop, run_data_loop, HostConfig, HostShared};
//!
//! # async fn example() -> emotibit_session::Result<()> {
//! let (shared, mut channels) = HostShared::bind(HostConfig::default()).await?;
//! tokio::spawn(run_advertising_loop(shared.clone()));
//! tokio::spawn(run_data_loop(shared.clone()));
//!
//! while let Some(packet) = channels.inbound.recv().await {
//!     println!("{}", packet);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod advertising;
pub mod config;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod ingest;
pub mod keepalive;
pub mod network;
pub mod registry;
pub mod responder;
pub mod state;
pub mod transport;

pub use advertising::{run_advertising_loop, Advertiser, AdvertisingPlanner};
pub use config::{pace, HostConfig, WIFI_ADVERTISING_PORT};
pub use connection::{ConnectionPhase, ConnectionState, ConnectionTimeout, PongOutcome};
pub use error::{Result, SessionError};
pub use handshake::{build_connect, build_disconnect, build_hello_emotibit, parse_hello_host, parse_pong, HelloHost};
pub use ingest::{run_data_loop, DataIngestor, SequenceTracker};
pub use keepalive::{build_ping, ChannelCounters, PacketCounter};
pub use network::{available_networks, Subnet};
pub use registry::{DeviceRecord, DeviceRegistry, ExpiryReport};
pub use responder::respond_to_request;
pub use state::{now_ms, HostChannels, HostShared, HostStats, StatsSnapshot};
pub use transport::{ControlChannel, HostPorts};
