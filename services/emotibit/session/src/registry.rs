//! Registry of devices discovered through advertising.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use tracing::{debug, info};

/// A device that has answered advertising
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Device id, or the sender address when the device sent none
    pub id: String,
    /// Address the device answered from
    pub ip: IpAddr,
    /// Whether the device is free to accept a host
    pub available: bool,
    /// Wall clock time of the last answer (ms since the Unix epoch)
    pub last_seen_ms: u64,
}

/// What an expiry sweep changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpiryReport {
    /// Ids marked unavailable
    pub marked_unavailable: Vec<String>,
    /// Ids removed
    pub purged: Vec<String>,
}

/// Device registry keyed by device id
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, DeviceRecord>,
}

impl DeviceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a device from a HELLO_HOST answer.
    ///
    /// Returns `true` when the id was not known before.
    pub fn observe(&mut self, id: &str, ip: IpAddr, available: bool, now_ms: u64) -> bool {
        match self.devices.get_mut(id) {
            Some(record) => {
                if record.ip != ip {
                    debug!("Device {} moved from {} to {}", id, record.ip, ip);
                }
                if record.available != available {
                    debug!("Device {} availability changed to {}", id, available);
                }
                record.ip = ip;
                record.available = available;
                record.last_seen_ms = now_ms;
                false
            }
            None => {
                info!("Discovered device {} at {} (available: {})", id, ip, available);
                self.devices.insert(
                    id.to_string(),
                    DeviceRecord {
                        id: id.to_string(),
                        ip,
                        available,
                        last_seen_ms: now_ms,
                    },
                );
                true
            }
        }
    }

    /// Look up a device
    pub fn get(&self, id: &str) -> Option<&DeviceRecord> {
        self.devices.get(id)
    }

    /// All devices sorted by id
    pub fn list(&self) -> Vec<DeviceRecord> {
        let mut devices: Vec<DeviceRecord> = self.devices.values().cloned().collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    /// First available device in id order
    pub fn first_available(&self) -> Option<&DeviceRecord> {
        self.devices
            .values()
            .filter(|d| d.available)
            .min_by(|a, b| a.id.cmp(&b.id))
    }

    /// Number of devices
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Age out silent devices.
    ///
    /// Devices unseen for `availability_timeout_ms` become unavailable; devices
    /// unseen for `purge_timeout_ms` are removed unless their id is `keep`.
    pub fn expire(
        &mut self,
        now_ms: u64,
        availability_timeout_ms: u64,
        purge_timeout_ms: u64,
        keep: Option<&str>,
    ) -> ExpiryReport {
        let mut report = ExpiryReport::default();

        self.devices.retain(|id, record| {
            let silent = now_ms.saturating_sub(record.last_seen_ms);
            if silent > purge_timeout_ms && keep != Some(id.as_str()) {
                report.purged.push(id.clone());
                return false;
            }
            if silent > availability_timeout_ms && record.available {
                record.available = false;
                report.marked_unavailable.push(id.clone());
            }
            true
        });

        for id in &report.marked_unavailable {
            debug!("Device {} marked unavailable after silence", id);
        }
        for id in &report.purged {
            info!("Device {} removed after silence", id);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, last))
    }

    #[test]
    fn test_observe_inserts_then_updates() {
        let mut registry = DeviceRegistry::new();
        assert!(registry.observe("MD-1", ip(20), true, 1_000));
        assert!(!registry.observe("MD-1", ip(21), false, 2_000));

        assert_eq!(registry.len(), 1);
        let record = registry.get("MD-1").unwrap();
        assert_eq!(record.ip, ip(21));
        assert!(!record.available);
        assert_eq!(record.last_seen_ms, 2_000);
    }

    #[test]
    fn test_first_available() {
        let mut registry = DeviceRegistry::new();
        registry.observe("b", ip(2), true, 0);
        registry.observe("a", ip(1), false, 0);
        registry.observe("c", ip(3), true, 0);
        assert_eq!(registry.first_available().unwrap().id, "b");
        assert_eq!(
            registry.list().iter().map(|d| d.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
    }

    #[test]
    fn test_expire_marks_then_purges() {
        let mut registry = DeviceRegistry::new();
        registry.observe("old", ip(1), true, 0);
        registry.observe("stale", ip(2), true, 8_000);
        registry.observe("fresh", ip(3), true, 19_000);
        registry.observe("held", ip(4), true, 0);

        let report = registry.expire(20_000, 5_000, 15_000, Some("held"));
        assert_eq!(report.purged, vec!["old".to_string()]);
        assert!(report.marked_unavailable.contains(&"stale".to_string()));
        assert!(report.marked_unavailable.contains(&"held".to_string()));

        assert!(registry.get("old").is_none());
        assert!(!registry.get("stale").unwrap().available);
        assert!(registry.get("fresh").unwrap().available);
        assert!(registry.get("held").is_some());

        // already unavailable devices are not reported again
        let report = registry.expire(21_000, 5_000, 15_000, Some("held"));
        assert!(report.marked_unavailable.is_empty());
    }
}
