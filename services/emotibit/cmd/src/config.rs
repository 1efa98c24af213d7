//! Configuration handling for the emotibit-link binary.
//!
//! Settings come from a YAML or JSON file, then `EMOTIBIT_*` environment
//! variables, then command line flags.

use anyhow::Result;
use emotibit_host::HostConfig;
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

/// Binary configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkConfig {
    /// Host settings
    pub host: HostConfig,
    /// Device to connect to once it is discovered
    pub device: Option<String>,
}

/// Root of the config file
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RootConfig {
    host: Option<HostConfig>,
    link: Option<LinkSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LinkSection {
    device: Option<String>,
}

fn parse_root(path: &Path, content: &str) -> Result<RootConfig> {
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        Ok(serde_json::from_str(content)?)
    } else {
        Ok(serde_yaml::from_str(content)?)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl LinkConfig {
    /// Load configuration from a file and the environment.
    ///
    /// A missing or unparsable file falls back to defaults with a warning.
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        let mut config = Self::default();

        match std::fs::read_to_string(path) {
            Ok(content) => match parse_root(path, &content) {
                Ok(root) => {
                    config.apply_root_config(root);
                    info!("Loaded configuration from {:?}", path);
                }
                Err(e) => warn!("Failed to parse config file {:?}, using defaults: {}", path, e),
            },
            Err(_) => warn!("Config file {:?} not found, using defaults", path),
        }

        config.apply_environment_overrides();

        info!(
            "Host configuration: advertising_port={}, broadcast={}, unicast={}, auto_connect={}, device={:?}",
            config.host.advertising_port,
            config.host.enable_broadcast,
            config.host.enable_unicast,
            config.host.auto_connect,
            config.device
        );
        Ok(config)
    }

    fn apply_root_config(&mut self, root: RootConfig) {
        if let Some(host) = root.host {
            self.host = host;
        }
        if let Some(link) = root.link {
            self.device = link.device.filter(|d| !d.trim().is_empty());
        }
    }

    /// Apply `EMOTIBIT_*` environment variable overrides
    pub fn apply_environment_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("EMOTIBIT_ADVERTISING_PORT").and_then(|v| v.trim().parse().ok()) {
            self.host.advertising_port = port;
            info!("Advertising port overridden by environment: {}", port);
        }

        let flags: [(&str, &mut bool); 5] = [
            ("EMOTIBIT_ENABLE_BROADCAST", &mut self.host.enable_broadcast),
            ("EMOTIBIT_ENABLE_UNICAST", &mut self.host.enable_unicast),
            ("EMOTIBIT_DEBUG_LOGS", &mut self.host.debug_logs),
            ("EMOTIBIT_AUTO_CONNECT", &mut self.host.auto_connect),
            ("EMOTIBIT_STRICT_LENGTH", &mut self.host.strict_length),
        ];
        for (key, slot) in flags {
            if let Some(flag) = lookup(key).as_deref().and_then(parse_flag) {
                *slot = flag;
                info!("{} overridden by environment: {}", key, flag);
            }
        }

        if let Some(ips) = lookup("EMOTIBIT_LOCAL_IPS") {
            self.host.local_ips = parse_list(&ips);
            info!("Local IPs overridden by environment: {:?}", self.host.local_ips);
        }

        if let Some(device) = lookup("EMOTIBIT_DEVICE").filter(|d| !d.trim().is_empty()) {
            info!("Device overridden by environment: {}", device);
            self.device = Some(device);
        }
    }
}
