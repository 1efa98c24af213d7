//! Host configuration.
//!
//! Every field has a default, so an empty YAML or JSON document is a valid
//! configuration. Keys are snake_case; the PascalCase names used by existing
//! EmotiBit host configuration files are accepted as aliases.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Port devices listen on for advertising traffic
pub const WIFI_ADVERTISING_PORT: u16 = 3131;

/// EmotiBit host configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Device advertising port; the data port search starts one above it
    #[serde(alias = "AdvertisingPort")]
    pub advertising_port: u16,
    /// Interval between advertising rounds (ms)
    #[serde(alias = "SendAdvertisingInterval")]
    pub send_advertising_interval_ms: u64,
    /// Interval between advertising socket reads (ms)
    #[serde(alias = "CheckAdvertisingInterval")]
    pub check_advertising_interval_ms: u64,
    /// Advertising loop pause per iteration (µs); 0 yields, negative never yields
    #[serde(alias = "AdvertisingThreadSleep")]
    pub advertising_thread_sleep_us: i64,
    /// Data loop pause per iteration (µs); 0 yields, negative never yields
    #[serde(alias = "DataThreadSleep")]
    pub data_thread_sleep_us: i64,
    /// Send HELLO_EMOTIBIT to the subnet broadcast address
    #[serde(alias = "EnableBroadcast")]
    pub enable_broadcast: bool,
    /// Sweep individual addresses with HELLO_EMOTIBIT
    #[serde(alias = "EnableUnicast")]
    pub enable_unicast: bool,
    /// Emit per-packet diagnostics
    #[serde(alias = "DebugLogs")]
    pub debug_logs: bool,
    /// First host id of the unicast sweep
    #[serde(alias = "UnicastIpRangeLowerBound")]
    pub unicast_ip_range_lower_bound: u8,
    /// Last host id of the unicast sweep
    #[serde(alias = "UnicastIpRangeUpperBound")]
    pub unicast_ip_range_upper_bound: u8,
    /// Addresses advertised to per unicast step
    #[serde(alias = "NUnicastIpsPerLoop")]
    pub n_unicast_ips_per_loop: u32,
    /// Minimum delay between unicast steps (ms)
    #[serde(alias = "UnicastMinLoopDelay")]
    pub unicast_min_loop_delay_ms: u64,
    /// Local addresses whose subnets are advertised on; empty means discover
    #[serde(alias = "LocalIPs")]
    pub local_ips: Vec<String>,
    /// Subnet patterns allowed for advertising, `*` matches any octet
    #[serde(alias = "NetworkIncludeList")]
    pub network_include_list: Vec<String>,
    /// Subnet patterns never advertised on
    #[serde(alias = "NetworkExcludeList")]
    pub network_exclude_list: Vec<String>,
    /// Keepalive PING interval while connected (ms)
    pub ping_interval_ms: u64,
    /// Connected without PONG for this long forces a disconnect (ms)
    pub connection_timeout_ms: u64,
    /// Connecting for this long aborts the attempt (ms)
    pub start_connection_timeout_ms: u64,
    /// EMOTIBIT_CONNECT resend interval (ms)
    pub connect_retry_interval_ms: u64,
    /// Devices unseen this long are marked unavailable (ms)
    pub availability_timeout_ms: u64,
    /// Devices unseen this long are removed (ms)
    pub purge_timeout_ms: u64,
    /// Bound on joining each background loop at shutdown (ms)
    pub shutdown_timeout_ms: u64,
    /// Connect to the first available device discovered
    pub auto_connect: bool,
    /// Enforce declared payload length when decoding queued packets
    pub strict_length: bool,
    /// Drop packets repeating the previous packet number
    pub drop_duplicate_packets: bool,
    /// Attempts when searching for free data and control ports
    pub port_search_attempts: u16,
    /// Receive buffer requested for the data socket (bytes)
    pub data_receive_buffer: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            advertising_port: WIFI_ADVERTISING_PORT,
            send_advertising_interval_ms: 1000,
            check_advertising_interval_ms: 100,
            advertising_thread_sleep_us: 1000,
            data_thread_sleep_us: 1000,
            enable_broadcast: true,
            enable_unicast: true,
            debug_logs: false,
            unicast_ip_range_lower_bound: 2,
            unicast_ip_range_upper_bound: 254,
            n_unicast_ips_per_loop: 1,
            unicast_min_loop_delay_ms: 3,
            local_ips: Vec::new(),
            network_include_list: vec!["*.*.*.*".to_string()],
            network_exclude_list: vec!["0.0.0.0".to_string()],
            ping_interval_ms: 500,
            connection_timeout_ms: 10_000,
            start_connection_timeout_ms: 5_000,
            connect_retry_interval_ms: 100,
            availability_timeout_ms: 5_000,
            purge_timeout_ms: 15_000,
            shutdown_timeout_ms: 2_000,
            auto_connect: false,
            strict_length: false,
            drop_duplicate_packets: false,
            port_search_attempts: 32,
            data_receive_buffer: 1 << 15,
        }
    }
}

impl HostConfig {
    /// Advertising round interval
    pub fn send_advertising_interval(&self) -> Duration {
        Duration::from_millis(self.send_advertising_interval_ms)
    }

    /// Advertising read interval
    pub fn check_advertising_interval(&self) -> Duration {
        Duration::from_millis(self.check_advertising_interval_ms)
    }

    /// Minimum delay between unicast steps
    pub fn unicast_min_loop_delay(&self) -> Duration {
        Duration::from_millis(self.unicast_min_loop_delay_ms)
    }

    /// Keepalive interval
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Keepalive timeout
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Connect attempt timeout
    pub fn start_connection_timeout(&self) -> Duration {
        Duration::from_millis(self.start_connection_timeout_ms)
    }

    /// Connect resend interval
    pub fn connect_retry_interval(&self) -> Duration {
        Duration::from_millis(self.connect_retry_interval_ms)
    }

    /// Shutdown join bound
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Unicast host id range, normalised so the lower bound is not above the upper
    pub fn unicast_range(&self) -> (u8, u8) {
        let lo = self.unicast_ip_range_lower_bound;
        let hi = self.unicast_ip_range_upper_bound;
        (lo.min(hi), lo.max(hi))
    }
}

/// Pause a polling loop between iterations.
///
/// Negative values return immediately without yielding, which spins the
/// worker thread; zero yields to the scheduler; positive values sleep.
pub async fn pace(sleep_us: i64) {
    match sleep_us {
        us if us < 0 => {}
        0 => tokio::task::yield_now().await,
        us => tokio::time::sleep(Duration::from_micros(us as u64)).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.advertising_port, 3131);
        assert_eq!(config.send_advertising_interval(), Duration::from_secs(1));
        assert_eq!(config.check_advertising_interval(), Duration::from_millis(100));
        assert!(config.enable_broadcast && config.enable_unicast);
        assert_eq!(config.unicast_range(), (2, 254));
        assert_eq!(config.network_include_list, vec!["*.*.*.*"]);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(2));
        assert!(!config.auto_connect);
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: HostConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, HostConfig::default());
    }

    #[test]
    fn test_pascal_case_aliases() {
        let yaml = r#"
SendAdvertisingInterval: 250
EnableUnicast: false
DebugLogs: true
LocalIPs: ["10.0.0.5"]
NetworkExcludeList: ["10.0.1.*"]
ping_interval_ms: 750
"#;
        let config: HostConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.send_advertising_interval_ms, 250);
        assert!(!config.enable_unicast);
        assert!(config.debug_logs);
        assert_eq!(config.local_ips, vec!["10.0.0.5"]);
        assert_eq!(config.network_exclude_list, vec!["10.0.1.*"]);
        assert_eq!(config.ping_interval_ms, 750);
        assert_eq!(config.check_advertising_interval_ms, 100);
    }

    #[test]
    fn test_unicast_range_normalised() {
        let config = HostConfig {
            unicast_ip_range_lower_bound: 200,
            unicast_ip_range_upper_bound: 10,
            ..Default::default()
        };
        assert_eq!(config.unicast_range(), (10, 200));
    }

    #[tokio::test]
    async fn test_pace_variants() {
        pace(-1).await;
        pace(0).await;
        pace(10).await;
    }
}
