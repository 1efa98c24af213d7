//! Host facade for EmotiBit devices on a local Wi-Fi network.
//!
//! [`WifiHost`] owns the sockets and background loops of a host. The embedding
//! application drives it with [`WifiHost::tick`], which decodes everything the
//! data loop queued since the previous tick and hands one sample per type tag
//! to the registered [`DataHandler`]s.
//!
//! ## Example
//!
//! ```rust,no_run
//! use emotibit_host::{HostConfig, TypeTag, WifiHost};
//! use std::time::Duration;
//!
//! # async fn example() -> emotibit_host::Result<()> {
//! let mut host = WifiHost::new();
//! host.initialize(HostConfig::default()).await?;
//! host.register_data_callback(TypeTag::EDA, |tag: TypeTag, values: &[f32], _: &emotibit_host::PacketHeader| {
//!     println!("{} {:?}", tag, values);
//! });
//!
//! for device in host.devices().await {
//!     if device.available && host.connect(&device.id).await? {
//!         break;
//!     }
//! }
//!
//! loop {
//!     host.tick(Duration::from_millis(20));
//!     tokio::time::sleep(Duration::from_millis(20)).await;
//! #   break;
//! }
//! host.destroy().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod frame;
pub mod host;

pub use error::{HostError, Result};
pub use frame::{process_queued, Sample, SensorFrame};
pub use host::{DataHandler, HostPhase, WifiHost};

pub use emotibit_session::{ConnectionPhase, DeviceRecord, HostConfig, HostPorts, StatsSnapshot};
pub use emotibit_wire::{PacketHeader, TypeTag};
