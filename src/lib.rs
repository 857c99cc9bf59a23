//! Quorumd - Distributed Database Cluster Manager
//!
//! The management control plane for a distributed database cluster: peer
//! nodes discover each other over multicast presence announcements, agree on
//! cluster membership, elect a single coordinating leader, and detect
//! network partitions.
//!
//! # Architecture
//!
//! Each node runs one [`controller::Controller`] driving a cooperative,
//! single-threaded protocol cycle: advance the logical clock, broadcast
//! heartbeats, evict partitioned peers, elect a leader when there is none,
//! and drain inbound presence and publication channels. All protocol
//! timeouts are expressed in logical ticks, which makes the state machine
//! deterministic and testable without wall-clock dependence.
//!
//! # Features
//!
//! - Multicast presence discovery with cluster-name and network scoping
//! - Tick-based heartbeat tracking and batched partition eviction
//! - Bully-style leader election with epochs and deterministic convergence
//! - Minority-partition safety: only the majority side may elect
//! - Local health capture each cycle via a pluggable sampler
//! - In-process loopback transport for deterministic multi-node simulation

pub mod config;
pub mod controller;
pub mod election;
pub mod error;
pub mod health;
pub mod heartbeat;
pub mod message;
pub mod node;
pub mod presence;
pub mod transport;

pub use config::Config;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::controller::{Controller, StopHandle};
    pub use crate::election::Election;
    pub use crate::error::{Error, Result};
    pub use crate::health::{HealthSample, HealthSampler, NullHealth, SystemHealth};
    pub use crate::message::{ElectLeader, Envelope, Heartbeat};
    pub use crate::node::NodeId;
    pub use crate::presence::Announcement;
    pub use crate::transport::{MemoryHub, Transport, UdpTransport};
}
