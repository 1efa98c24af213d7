//! Host facade: lifecycle, connection control and tick-driven delivery.

use crate::error::{HostError, Result};
use crate::frame::{process_queued, SensorFrame};
use emotibit_session::{
    run_advertising_loop, run_data_loop, ConnectionPhase, DeviceRecord, HostChannels, HostConfig, HostPorts,
    HostShared, StatsSnapshot,
};
use emotibit_wire::{PacketHeader, TypeTag};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Receives decoded samples for one type tag
pub trait DataHandler: Send {
    /// Called once per tick for the tag's latest sample
    fn on_sample(&mut self, tag: TypeTag, values: &[f32], header: &PacketHeader);
}

impl<F> DataHandler for F
where
    F: FnMut(TypeTag, &[f32], &PacketHeader) + Send,
{
    fn on_sample(&mut self, tag: TypeTag, values: &[f32], header: &PacketHeader) {
        self(tag, values, header)
    }
}

/// Lifecycle phase of a [`WifiHost`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPhase {
    /// Never initialized
    Uninitialized,
    /// Sockets bound and both loops running
    Initialized,
    /// Torn down; may be initialized again
    Destroyed,
}

struct Running {
    shared: Arc<HostShared>,
    channels: HostChannels,
    advertising: JoinHandle<()>,
    data: JoinHandle<()>,
}

enum Lifecycle {
    Uninitialized,
    Initialized(Running),
    Destroyed,
}

/// Wi-Fi host for EmotiBit devices.
///
/// `initialize` binds the sockets and starts the advertising and data loops.
/// The embedding application then calls [`WifiHost::tick`] once per frame to
/// receive decoded samples, and [`WifiHost::destroy`] when done.
pub struct WifiHost {
    state: Lifecycle,
    callbacks: HashMap<TypeTag, Box<dyn DataHandler>>,
}

impl Default for WifiHost {
    fn default() -> Self {
        Self::new()
    }
}

impl WifiHost {
    /// Uninitialized host
    pub fn new() -> Self {
        Self {
            state: Lifecycle::Uninitialized,
            callbacks: HashMap::new(),
        }
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> HostPhase {
        match self.state {
            Lifecycle::Uninitialized => HostPhase::Uninitialized,
            Lifecycle::Initialized(_) => HostPhase::Initialized,
            Lifecycle::Destroyed => HostPhase::Destroyed,
        }
    }

    fn running(&self) -> Result<&Running> {
        match &self.state {
            Lifecycle::Initialized(running) => Ok(running),
            _ => Err(HostError::NotInitialized),
        }
    }

    /// Bind sockets and start both loops.
    ///
    /// A running host is destroyed first, so all state starts fresh.
    pub async fn initialize(&mut self, config: HostConfig) -> Result<HostPorts> {
        if matches!(self.state, Lifecycle::Initialized(_)) {
            info!("Re-initializing host");
            self.destroy().await;
        }

        let (shared, channels) = HostShared::bind(config).await?;
        let ports = shared.ports;
        let advertising = tokio::spawn(run_advertising_loop(shared.clone()));
        let data = tokio::spawn(run_data_loop(shared.clone()));

        self.state = Lifecycle::Initialized(Running {
            shared,
            channels,
            advertising,
            data,
        });
        info!(
            "Host initialized on ports advertising={}, data={}, control={}",
            ports.advertising, ports.data, ports.control
        );
        Ok(ports)
    }

    /// Start connecting to a discovered device.
    ///
    /// Returns `false` with no state change when the device is unknown,
    /// unavailable, or another connection is in progress.
    pub async fn connect(&self, device_id: &str) -> Result<bool> {
        let running = self.running()?;
        Ok(running.shared.begin_connect(device_id).await)
    }

    /// Drop the current connection and discard data not yet ticked
    pub async fn disconnect(&mut self) -> Result<bool> {
        let running = match &mut self.state {
            Lifecycle::Initialized(running) => running,
            _ => return Err(HostError::NotInitialized),
        };
        let was_connected = running.shared.disconnect().await;

        let mut discarded = 0usize;
        while running.channels.inbound.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            debug!("Discarded {} queued packets on disconnect", discarded);
        }
        Ok(was_connected)
    }

    /// Register the handler for one type tag, replacing any previous one
    pub fn register_data_callback<H>(&mut self, tag: TypeTag, handler: H)
    where
        H: DataHandler + 'static,
    {
        self.callbacks.insert(tag, Box::new(handler));
    }

    /// Remove the handler for a type tag; returns whether one was registered
    pub fn unregister_data_callback(&mut self, tag: TypeTag) -> bool {
        self.callbacks.remove(&tag).is_some()
    }

    /// Drain queued packets, decode them and deliver one sample per type tag.
    ///
    /// `delta` is the time since the previous tick; draining does not depend
    /// on it. Returns the frame that was delivered, empty when not initialized.
    pub fn tick(&mut self, delta: Duration) -> SensorFrame {
        let Lifecycle::Initialized(running) = &mut self.state else {
            return SensorFrame::new();
        };

        let mut queued = Vec::new();
        while let Ok(text) = running.channels.inbound.try_recv() {
            queued.push(text);
        }
        if queued.is_empty() {
            return SensorFrame::new();
        }

        let config = &running.shared.config;
        let frame = process_queued(&queued, config.strict_length, config.debug_logs);
        if config.debug_logs {
            debug!(
                "Tick after {:?}: {} packets, {} samples",
                delta,
                queued.len(),
                frame.len()
            );
        }

        for (tag, sample) in frame.iter() {
            if let Some(handler) = self.callbacks.get_mut(&tag) {
                handler.on_sample(tag, &sample.values, &sample.header);
            }
        }
        frame
    }

    /// Stop both loops and release every socket.
    ///
    /// Each loop gets the configured shutdown timeout to finish and is aborted
    /// after that. Calling this again, or before `initialize`, does nothing.
    pub async fn destroy(&mut self) {
        let running = match std::mem::replace(&mut self.state, Lifecycle::Destroyed) {
            Lifecycle::Initialized(running) => running,
            Lifecycle::Uninitialized => {
                self.state = Lifecycle::Uninitialized;
                return;
            }
            Lifecycle::Destroyed => return,
        };
        let Running {
            shared,
            channels,
            advertising,
            data,
        } = running;

        shared.request_stop();
        let wait = shared.config.shutdown_timeout();
        join_loop("advertising", advertising, wait).await;
        join_loop("data", data, wait).await;
        drop(channels);

        match Arc::try_unwrap(shared) {
            Ok(shared) => shared.release().await,
            Err(shared) => warn!(
                "Host state still referenced ({} handles), sockets close when the last one drops",
                Arc::strong_count(&shared)
            ),
        }
        info!("Host destroyed");
    }

    /// Bound ports
    pub fn ports(&self) -> Result<HostPorts> {
        Ok(self.running()?.shared.ports)
    }

    /// Snapshot of discovered devices, sorted by id
    pub async fn devices(&self) -> Vec<DeviceRecord> {
        match self.running() {
            Ok(running) => running.shared.registry.read().await.list(),
            Err(_) => Vec::new(),
        }
    }

    /// Connection phase
    pub async fn connection_phase(&self) -> ConnectionPhase {
        match self.running() {
            Ok(running) => running.shared.connection.lock().await.phase(),
            Err(_) => ConnectionPhase::Disconnected,
        }
    }

    /// Id of the connected device, once the handshake has completed
    pub async fn connected_device(&self) -> Option<String> {
        let running = self.running().ok()?;
        let connection = running.shared.connection.lock().await;
        if connection.is_connected() {
            connection.device_id().map(str::to_string)
        } else {
            None
        }
    }

    /// Packets discovery and the handshake did not consume
    pub fn drain_info_packets(&mut self) -> Vec<String> {
        let Lifecycle::Initialized(running) = &mut self.state else {
            return Vec::new();
        };
        let mut packets = Vec::new();
        while let Ok(packet) = running.channels.info.try_recv() {
            packets.push(packet);
        }
        packets
    }

    /// Running counters
    pub fn stats(&self) -> Result<StatsSnapshot> {
        Ok(self.running()?.shared.stats.snapshot())
    }
}

async fn join_loop(name: &str, mut handle: JoinHandle<()>, wait: Duration) {
    match timeout(wait, &mut handle).await {
        Ok(Ok(())) => debug!("{} loop joined", name),
        Ok(Err(e)) => warn!("{} loop ended abnormally: {}", name, e),
        Err(_) => {
            warn!("{} loop did not stop within {:?}, aborting", name, wait);
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("{} loop failed while aborting: {}", name, e);
                }
            }
        }
    }
}

impl Drop for WifiHost {
    fn drop(&mut self) {
        if let Lifecycle::Initialized(running) = &self.state {
            running.shared.request_stop();
            running.advertising.abort();
            running.data.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emotibit_wire::{get_keyed_value, label, PacketHeader};
    use std::sync::Mutex;
    use tokio::net::UdpSocket;
    use tokio::time::{sleep, Instant};

    async fn device_and_config() -> (UdpSocket, HostConfig) {
        let device = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = HostConfig {
            advertising_port: device.local_addr().unwrap().port(),
            local_ips: vec!["127.0.0.1".to_string()],
            ..Default::default()
        };
        (device, config)
    }

    /// Read from the device socket until a packet of `tag` arrives
    async fn recv_tagged(device: &UdpSocket, tag: TypeTag) -> String {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut buf = [0u8; 1024];
        while Instant::now() < deadline {
            let Ok(Ok((n, _))) = timeout(Duration::from_millis(200), device.recv_from(&mut buf)).await else {
                continue;
            };
            let text = String::from_utf8_lossy(&buf[..n]).into_owned();
            if let Ok((header, _)) = PacketHeader::decode(&text) {
                if header.type_tag == tag {
                    return text;
                }
            }
        }
        panic!("no {} packet arrived", tag);
    }

    #[tokio::test]
    async fn test_operations_before_initialize() {
        let mut host = WifiHost::new();
        assert_eq!(host.phase(), HostPhase::Uninitialized);
        assert!(matches!(host.connect("x").await, Err(HostError::NotInitialized)));
        assert!(matches!(host.ports(), Err(HostError::NotInitialized)));
        assert!(host.tick(Duration::from_millis(16)).is_empty());
        assert!(host.devices().await.is_empty());
        assert_eq!(host.connection_phase().await, ConnectionPhase::Disconnected);

        host.destroy().await;
        assert_eq!(host.phase(), HostPhase::Uninitialized);
    }

    #[tokio::test]
    async fn test_callbacks_register_and_unregister() {
        let mut host = WifiHost::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        host.register_data_callback(TypeTag::EDA, move |tag: TypeTag, values: &[f32], _: &PacketHeader| {
            sink.lock().unwrap().push((tag, values.to_vec()));
        });
        assert!(host.unregister_data_callback(TypeTag::EDA));
        assert!(!host.unregister_data_callback(TypeTag::EDA));

        let sink = seen.clone();
        host.register_data_callback(TypeTag::EDA, move |tag: TypeTag, values: &[f32], _: &PacketHeader| {
            sink.lock().unwrap().push((tag, values.to_vec()));
        });

        let (device, config) = device_and_config().await;
        let ports = host.initialize(config).await.unwrap();
        device
            .send_to(b"1,2,3,EA,1,100,0.5\n1,3,3,EA,1,100,0.7\n1,4,1,T1,1,100,30\n", ("127.0.0.1", ports.data))
            .await
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut frame = SensorFrame::new();
        while frame.is_empty() && Instant::now() < deadline {
            sleep(Duration::from_millis(20)).await;
            frame = host.tick(Duration::from_millis(20));
        }
        assert_eq!(frame.values(TypeTag::EDA), Some(&[0.7f32][..]));
        assert_eq!(frame.values(TypeTag::TEMPERATURE_1), Some(&[30.0f32][..]));
        // only EA has a handler
        assert_eq!(*seen.lock().unwrap(), vec![(TypeTag::EDA, vec![0.7f32])]);

        host.destroy().await;
    }

    #[tokio::test]
    async fn test_connect_ignores_unknown_device() {
        let (_device, config) = device_and_config().await;
        let mut host = WifiHost::new();
        host.initialize(config).await.unwrap();

        assert!(!host.connect("nobody").await.unwrap());
        assert_eq!(host.connection_phase().await, ConnectionPhase::Disconnected);
        assert!(!host.disconnect().await.unwrap());
        host.destroy().await;
    }

    #[tokio::test]
    async fn test_end_to_end_handshake_and_delivery() {
        let (device, config) = device_and_config().await;
        let mut host = WifiHost::new();
        let ports = host.initialize(config).await.unwrap();
        let advertising = ("127.0.0.1", ports.advertising);

        device
            .send_to(b"1,1,4,HH,1,100,DP,-1,DI,MD-V4-0001\n", advertising)
            .await
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while host.devices().await.is_empty() && Instant::now() < deadline {
            sleep(Duration::from_millis(20)).await;
        }
        let devices = host.devices().await;
        assert_eq!(devices.len(), 1);
        assert!(devices[0].available);

        assert!(host.connect("MD-V4-0001").await.unwrap());
        assert_eq!(host.connection_phase().await, ConnectionPhase::Connecting);
        assert!(host.connected_device().await.is_none());

        let connect = recv_tagged(&device, TypeTag::EMOTIBIT_CONNECT).await;
        let (_, start) = PacketHeader::decode(&connect).unwrap();
        let (data_port, _) = get_keyed_value(&connect, label::DATA_PORT, start.unwrap()).unwrap();
        assert_eq!(data_port.trim(), ports.data.to_string());
        let (control_port, _) = get_keyed_value(&connect, label::CONTROL_PORT, start.unwrap()).unwrap();
        assert_eq!(control_port.trim(), ports.control.to_string());

        let pong = format!("2,2,2,PO,1,100,DP,{}\n", ports.data);
        device.send_to(pong.as_bytes(), advertising).await.unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while host.connection_phase().await != ConnectionPhase::Connected && Instant::now() < deadline {
            sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(host.connected_device().await.as_deref(), Some("MD-V4-0001"));

        device
            .send_to(b"1,2,3,EA,1,100,0.5\n1,3,3,EA,1,100,0.7\n", ("127.0.0.1", ports.data))
            .await
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut frame = SensorFrame::new();
        while frame.is_empty() && Instant::now() < deadline {
            sleep(Duration::from_millis(20)).await;
            frame = host.tick(Duration::from_millis(20));
        }
        assert_eq!(frame.values(TypeTag::EDA), Some(&[0.7f32][..]));
        assert_eq!(host.stats().unwrap().enqueued, 2);

        assert!(host.disconnect().await.unwrap());
        assert_eq!(host.connection_phase().await, ConnectionPhase::Disconnected);
        host.destroy().await;
    }

    #[tokio::test]
    async fn test_destroy_twice_and_reinitialize() {
        let (_device, config) = device_and_config().await;
        let mut host = WifiHost::new();
        let ports = host.initialize(config.clone()).await.unwrap();
        assert_eq!(host.phase(), HostPhase::Initialized);

        host.destroy().await;
        assert_eq!(host.phase(), HostPhase::Destroyed);
        host.destroy().await;
        assert_eq!(host.phase(), HostPhase::Destroyed);
        assert!(host.stats().is_err());
        assert!(host.drain_info_packets().is_empty());

        // sockets are released, so their ports bind again
        let data = tokio::net::UdpSocket::bind(("0.0.0.0", ports.data)).await.unwrap();
        let control = tokio::net::TcpListener::bind(("0.0.0.0", ports.control)).await.unwrap();
        drop((data, control));

        host.initialize(config.clone()).await.unwrap();
        // initializing a running host starts over
        host.initialize(config).await.unwrap();
        assert_eq!(host.phase(), HostPhase::Initialized);
        assert_eq!(host.stats().unwrap(), StatsSnapshot::default());
        host.destroy().await;
    }

    #[tokio::test]
    async fn test_unconsumed_advertising_packets_are_info() {
        let (device, config) = device_and_config().await;
        let mut host = WifiHost::new();
        let ports = host.initialize(config).await.unwrap();

        device
            .send_to(b"5,1,0,RB,1,100\n", ("127.0.0.1", ports.advertising))
            .await
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut info = Vec::new();
        while info.is_empty() && Instant::now() < deadline {
            sleep(Duration::from_millis(20)).await;
            info = host.drain_info_packets();
        }
        assert_eq!(info, vec!["5,1,0,RB,1,100".to_string()]);
        host.destroy().await;
    }
}
