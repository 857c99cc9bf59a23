//! Node Identity
//!
//! A node is identified by its address and command port within a cluster
//! namespace. The derived ordering (address lexicographic, then port) is the
//! total order the election's best-candidate rule converges on.

use serde::{Deserialize, Serialize};

/// Wildcard address component. A node id with this address compares equal to
/// any id with the same port under [`NodeId::matches`]. Loopback test
/// comparisons only; never used on network paths.
pub const WILDCARD_ADDRESS: &str = "*";

/// Unique identity of a cluster peer: `(address, port)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId {
    /// IP address the node's command channel is reachable at
    pub address: String,
    /// Command (publication) port
    pub port: u16,
}

impl NodeId {
    /// Create a new node id
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// Wildcard-aware comparison: if either side carries the `*` address,
    /// only the ports are compared.
    pub fn matches(&self, other: &NodeId) -> bool {
        if self.address == WILDCARD_ADDRESS || other.address == WILDCARD_ADDRESS {
            return self.port == other.port;
        }
        self == other
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_is_address_then_port() {
        let a = NodeId::new("10.0.0.1", 11000);
        let b = NodeId::new("10.0.0.2", 11000);
        let c = NodeId::new("10.0.0.2", 12000);

        assert!(a < b);
        assert!(b < c);
        assert_eq!([&a, &b, &c].iter().max().copied(), Some(&c));
    }

    #[test]
    fn test_wildcard_matches_any_address_with_same_port() {
        let wild = NodeId::new(WILDCARD_ADDRESS, 11000);
        let real = NodeId::new("192.168.1.5", 11000);
        let other_port = NodeId::new("192.168.1.5", 11001);

        assert!(wild.matches(&real));
        assert!(real.matches(&wild));
        assert!(!wild.matches(&other_port));
    }

    #[test]
    fn test_structural_equality() {
        let a = NodeId::new("10.0.0.1", 11000);
        let b = NodeId::new("10.0.0.1", 11000);
        assert_eq!(a, b);
        assert!(a.matches(&b));
    }
}
