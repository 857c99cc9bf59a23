//! Cluster Wire Protocol
//!
//! Defines the publication envelope and the message payloads exchanged
//! between management nodes. The envelope carries a raw kind discriminant so
//! that receivers can skip kinds they do not understand.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::node::NodeId;

/// Message kind discriminants.
///
/// Kinds are plain integers on the wire: an older node receiving a kind it
/// does not know simply drops the envelope.
pub mod kind {
    /// Periodic liveness beacon
    pub const HEARTBEAT: u32 = 1;
    /// Leader election vote
    pub const ELECT_LEADER: u32 = 2;
}

/// Human-readable kind name for logging
pub fn kind_name(kind: u32) -> &'static str {
    match kind {
        kind::HEARTBEAT => "Heartbeat",
        kind::ELECT_LEADER => "ElectLeader",
        _ => "Unknown",
    }
}

/// Publication envelope: `(message_kind, payload_bytes)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Message kind discriminant
    pub kind: u32,
    /// Opaque, kind-specific payload
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Wrap an already-encoded payload
    pub fn new(kind: u32, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }

    /// Serialize the envelope to bytes
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize an envelope from bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Periodic liveness beacon published by every node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Cluster namespace the sender belongs to
    pub cluster_name: String,
    /// Identity of the sender
    pub node_id: NodeId,
}

impl Heartbeat {
    /// Encode into a publication envelope
    pub fn to_envelope(&self) -> Result<Envelope> {
        Ok(Envelope::new(kind::HEARTBEAT, bincode::serialize(self)?))
    }

    /// Decode from an envelope payload
    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(payload)?)
    }
}

/// Leader election vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectLeader {
    /// Node the voter wants as leader
    pub candidate: NodeId,
    /// Node casting the vote
    pub voter: NodeId,
    /// Election round this vote belongs to
    pub epoch: u64,
}

impl ElectLeader {
    /// Encode into a publication envelope
    pub fn to_envelope(&self) -> Result<Envelope> {
        Ok(Envelope::new(kind::ELECT_LEADER, bincode::serialize(self)?))
    }

    /// Decode from an envelope payload
    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(payload)?)
    }
}
