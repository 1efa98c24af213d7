//! Local subnet discovery and filtering.
//!
//! A device subnet is the first three octets of an IPv4 address. Advertising
//! targets `<subnet>.255` for broadcast and `<subnet>.<id>` for unicast.

use crate::config::HostConfig;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use tracing::{debug, warn};

/// First three octets of an IPv4 network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subnet([u8; 3]);

impl Subnet {
    /// Subnet containing `ip`
    pub fn of(ip: Ipv4Addr) -> Self {
        let [a, b, c, _] = ip.octets();
        Self([a, b, c])
    }

    /// Subnet of an arbitrary address, if IPv4
    pub fn of_ip(ip: IpAddr) -> Option<Self> {
        match ip {
            IpAddr::V4(v4) => Some(Self::of(v4)),
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(Self::of),
        }
    }

    /// `<subnet>.255`
    pub fn broadcast(&self) -> Ipv4Addr {
        self.host(255)
    }

    /// `<subnet>.<host_id>`
    pub fn host(&self, host_id: u8) -> Ipv4Addr {
        let [a, b, c] = self.0;
        Ipv4Addr::new(a, b, c, host_id)
    }

    /// Whether this subnet matches a dotted pattern.
    ///
    /// Octets compare pairwise over the shorter of the two; `*` matches any octet.
    pub fn matches(&self, pattern: &str) -> bool {
        let octets: Vec<String> = self.0.iter().map(|o| o.to_string()).collect();
        octets
            .iter()
            .zip(pattern.trim().split('.'))
            .all(|(octet, pat)| pat == "*" || pat == octet)
    }

    /// Include-list and exclude-list check
    pub fn is_allowed(&self, include: &[String], exclude: &[String]) -> bool {
        include.iter().any(|p| self.matches(p)) && !exclude.iter().any(|p| self.matches(p))
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.0;
        write!(f, "{}.{}.{}", a, b, c)
    }
}

impl FromStr for Subnet {
    type Err = std::net::AddrParseError;

    /// Accepts either a full address or three octets
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.parse::<Ipv4Addr>() {
            Ok(ip) => Ok(Self::of(ip)),
            Err(_) => format!("{}.0", s).parse::<Ipv4Addr>().map(Self::of),
        }
    }
}

/// IPv4 addresses of local interfaces, loopback excluded
pub fn local_ipv4_addresses() -> Vec<Ipv4Addr> {
    match local_ip_address::list_afinet_netifas() {
        Ok(interfaces) => interfaces
            .into_iter()
            .filter_map(|(name, ip)| match ip {
                IpAddr::V4(v4) if !v4.is_loopback() && !v4.is_unspecified() => {
                    debug!("Found interface {} with address {}", name, v4);
                    Some(v4)
                }
                _ => None,
            })
            .collect(),
        Err(e) => {
            warn!("Failed to list network interfaces: {}", e);
            Vec::new()
        }
    }
}

/// Subnets eligible for advertising, in discovery order without repeats.
///
/// Uses the configured local addresses, or the machine's interfaces when none
/// are configured.
pub fn available_networks(config: &HostConfig) -> Vec<Subnet> {
    let candidates: Vec<Ipv4Addr> = if config.local_ips.is_empty() {
        local_ipv4_addresses()
    } else {
        config
            .local_ips
            .iter()
            .filter_map(|ip| match ip.trim().parse() {
                Ok(ip) => Some(ip),
                Err(_) => {
                    warn!("Ignoring invalid local address {:?}", ip);
                    None
                }
            })
            .collect()
    };
    filter_networks(&candidates, &config.network_include_list, &config.network_exclude_list)
}

/// Reduce addresses to allowed, distinct subnets
pub fn filter_networks(ips: &[Ipv4Addr], include: &[String], exclude: &[String]) -> Vec<Subnet> {
    let mut networks: Vec<Subnet> = Vec::new();
    for ip in ips {
        let subnet = Subnet::of(*ip);
        if !networks.contains(&subnet) && subnet.is_allowed(include, exclude) {
            networks.push(subnet);
        }
    }
    networks
}
