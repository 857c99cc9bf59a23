//! Cluster Transport
//!
//! Two channels per node: a multicast presence channel for discovery
//! datagrams, and a publication channel every admitted peer subscribes to.
//! All receive paths are non-blocking; "nothing to read this cycle" is
//! `Ok(None)`, never an error.

mod memory;
mod udp;

pub use memory::{MemoryHub, MemoryTransport};
pub use udp::UdpTransport;

use crate::error::Result;
use crate::message::Envelope;
use crate::node::NodeId;
use crate::presence::Announcement;

/// Broadcast/subscribe messaging over which all coordination happens.
pub trait Transport: Send {
    /// Broadcast a presence announcement to the local network segment.
    fn announce(&mut self, ann: &Announcement) -> Result<()>;

    /// Poll one pending presence datagram, if any.
    fn poll_announcement(&mut self) -> Result<Option<Announcement>>;

    /// Publish an envelope to every peer subscribed to this node.
    fn publish(&mut self, env: &Envelope) -> Result<()>;

    /// Poll one pending envelope from the subscription channel, if any.
    fn poll_message(&mut self) -> Result<Option<Envelope>>;

    /// Open a persistent subscription to a peer's publication channel.
    fn subscribe(&mut self, peer: &NodeId) -> Result<()>;

    /// Drop the subscription to a peer (its messages are no longer accepted).
    fn unsubscribe(&mut self, peer: &NodeId) -> Result<()>;

    /// Release all sockets. Idempotent.
    fn shutdown(&mut self) -> Result<()>;
}
