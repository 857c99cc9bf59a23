//! Presence Protocol
//!
//! Nodes periodically announce `(cluster_name, command_port, addresses)`
//! over a multicast datagram channel. A receiver admits the announcer only
//! if one of the announced addresses lies on a network it can reach from
//! its own interfaces, which keeps announcements from leaking across
//! unrelated network segments.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::node::NodeId;

/// Presence announcement datagram payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    /// Cluster namespace the announcer belongs to
    pub cluster_name: String,
    /// Port the announcer's publication channel is bound to
    pub cmd_port: u16,
    /// Announcer's interface addresses as `a.b.c.d/prefix` strings
    pub addresses: Vec<String>,
}

impl Announcement {
    /// Serialize the announcement to datagram bytes
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize an announcement from datagram bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Resolve which announced address is reachable from `local_interfaces`
    /// and build the announcer's node identity from it. Returns `None` when
    /// no announced address shares a network with any local interface.
    pub fn resolve_node_id(&self, local_interfaces: &[InterfaceAddr]) -> Option<NodeId> {
        for addr in &self.addresses {
            let Ok(remote) = addr.parse::<InterfaceAddr>() else {
                tracing::debug!("Skipping unparseable announced address: {}", addr);
                continue;
            };
            if local_interfaces.iter().any(|local| local.same_network(&remote)) {
                return Some(NodeId::new(remote.address.to_string(), self.cmd_port));
            }
        }
        None
    }
}

/// An IPv4 interface address with its network prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceAddr {
    /// Interface address
    pub address: Ipv4Addr,
    /// Network prefix length (0..=32)
    pub prefix: u8,
}

impl InterfaceAddr {
    /// Create a new interface address
    pub fn new(address: Ipv4Addr, prefix: u8) -> Self {
        Self { address, prefix }
    }

    /// Network mask derived from the prefix length
    fn mask(&self) -> u32 {
        if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.prefix))
        }
    }

    /// True when `other` falls inside this interface's network. The local
    /// prefix decides the network width, matching how a host judges
    /// reachability of a remote address.
    pub fn same_network(&self, other: &InterfaceAddr) -> bool {
        let mask = self.mask();
        (u32::from(self.address) & mask) == (u32::from(other.address) & mask)
    }
}

impl std::str::FromStr for InterfaceAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => {
                let prefix: u8 = prefix
                    .parse()
                    .map_err(|_| Error::InvalidAddress(s.to_string()))?;
                if prefix > 32 {
                    return Err(Error::InvalidAddress(s.to_string()));
                }
                (addr, prefix)
            }
            // A bare address is treated as host-only.
            None => (s, 32),
        };

        let address: Ipv4Addr = addr
            .parse()
            .map_err(|_| Error::InvalidAddress(s.to_string()))?;

        Ok(Self { address, prefix })
    }
}

impl std::fmt::Display for InterfaceAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix)
    }
}

/// Parse the configured interface list, rejecting the whole configuration
/// when any entry is malformed.
pub fn parse_interfaces(specs: &[String]) -> Result<Vec<InterfaceAddr>> {
    specs.iter().map(|s| s.parse()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(s: &str) -> InterfaceAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_announcement_round_trip() {
        let ann = Announcement {
            cluster_name: "default_cluster".to_string(),
            cmd_port: 21000,
            addresses: vec!["10.0.0.1/24".to_string(), "192.168.7.2/16".to_string()],
        };

        let bytes = ann.encode().unwrap();
        let restored = Announcement::decode(&bytes).unwrap();
        assert_eq!(restored, ann);
    }

    #[test]
    fn test_same_network_uses_local_prefix() {
        let local = iface("10.0.0.5/24");
        assert!(local.same_network(&iface("10.0.0.200/24")));
        assert!(!local.same_network(&iface("10.0.1.200/24")));

        // A wider local prefix accepts more.
        let wide = iface("10.0.0.5/8");
        assert!(wide.same_network(&iface("10.200.0.1/24")));
    }

    #[test]
    fn test_resolve_picks_reachable_address() {
        let ann = Announcement {
            cluster_name: "c".to_string(),
            cmd_port: 21000,
            addresses: vec!["172.16.0.9/12".to_string(), "10.0.0.9/24".to_string()],
        };

        let locals = vec![iface("10.0.0.1/24")];
        let id = ann.resolve_node_id(&locals).unwrap();
        assert_eq!(id, NodeId::new("10.0.0.9", 21000));
    }

    #[test]
    fn test_resolve_none_when_cross_network() {
        let ann = Announcement {
            cluster_name: "c".to_string(),
            cmd_port: 21000,
            addresses: vec!["172.16.0.9/12".to_string()],
        };

        let locals = vec![iface("10.0.0.1/24")];
        assert!(ann.resolve_node_id(&locals).is_none());
    }

    #[test]
    fn test_parse_rejects_bad_specs() {
        assert!("10.0.0.1/24".parse::<InterfaceAddr>().is_ok());
        assert!("10.0.0.1".parse::<InterfaceAddr>().is_ok());
        assert!("10.0.0/24".parse::<InterfaceAddr>().is_err());
        assert!("10.0.0.1/40".parse::<InterfaceAddr>().is_err());
        assert!(parse_interfaces(&["10.0.0.1/24".into(), "bogus".into()]).is_err());
    }
}
