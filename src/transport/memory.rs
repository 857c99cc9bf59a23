//! In-Process Transport
//!
//! A loopback hub connecting any number of nodes inside one process with
//! the same multicast/pub-sub semantics as the UDP transport. Delivery is
//! immediate and lossless, which makes multi-node protocol runs fully
//! deterministic; this is what the simulation tests step controllers over.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::Result;
use crate::message::Envelope;
use crate::node::NodeId;
use crate::presence::Announcement;
use crate::transport::Transport;

#[derive(Debug, Default)]
struct Mailbox {
    /// Pending presence datagrams, encoded as on the wire
    presence: VecDeque<Vec<u8>>,
    /// Pending publication envelopes, encoded as on the wire
    inbox: VecDeque<Vec<u8>>,
    /// Peers this node is subscribed to
    subscriptions: HashSet<NodeId>,
}

#[derive(Debug, Default)]
struct HubInner {
    nodes: HashMap<NodeId, Mailbox>,
}

/// Shared loopback segment. Clone it to hand the same segment to several
/// transports.
#[derive(Debug, Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubInner>>,
}

impl MemoryHub {
    /// Create an empty segment
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node to the segment and return its transport endpoint.
    pub fn attach(&self, node_id: NodeId) -> MemoryTransport {
        self.lock().nodes.entry(node_id.clone()).or_default();
        MemoryTransport {
            hub: self.clone(),
            node_id,
            detached: false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        // A panic while holding the hub lock only ever happens in a failing
        // test; the queued datagrams are still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One node's endpoint on a [`MemoryHub`].
#[derive(Debug)]
pub struct MemoryTransport {
    hub: MemoryHub,
    node_id: NodeId,
    detached: bool,
}

impl Transport for MemoryTransport {
    fn announce(&mut self, ann: &Announcement) -> Result<()> {
        let bytes = ann.encode()?;
        let mut hub = self.hub.lock();
        // Multicast semantics: every attached node sees the datagram,
        // including the sender itself.
        for mailbox in hub.nodes.values_mut() {
            mailbox.presence.push_back(bytes.clone());
        }
        Ok(())
    }

    fn poll_announcement(&mut self) -> Result<Option<Announcement>> {
        let bytes = {
            let mut hub = self.hub.lock();
            hub.nodes
                .get_mut(&self.node_id)
                .and_then(|mb| mb.presence.pop_front())
        };
        match bytes {
            Some(bytes) => Ok(Some(Announcement::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn publish(&mut self, env: &Envelope) -> Result<()> {
        let bytes = env.encode()?;
        let mut hub = self.hub.lock();
        for mailbox in hub.nodes.values_mut() {
            if mailbox.subscriptions.contains(&self.node_id) {
                mailbox.inbox.push_back(bytes.clone());
            }
        }
        Ok(())
    }

    fn poll_message(&mut self) -> Result<Option<Envelope>> {
        let bytes = {
            let mut hub = self.hub.lock();
            hub.nodes
                .get_mut(&self.node_id)
                .and_then(|mb| mb.inbox.pop_front())
        };
        match bytes {
            Some(bytes) => Ok(Some(Envelope::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn subscribe(&mut self, peer: &NodeId) -> Result<()> {
        let mut hub = self.hub.lock();
        if let Some(mailbox) = hub.nodes.get_mut(&self.node_id) {
            mailbox.subscriptions.insert(peer.clone());
        }
        Ok(())
    }

    fn unsubscribe(&mut self, peer: &NodeId) -> Result<()> {
        let mut hub = self.hub.lock();
        if let Some(mailbox) = hub.nodes.get_mut(&self.node_id) {
            mailbox.subscriptions.remove(peer);
        }
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        if !self.detached {
            self.hub.lock().nodes.remove(&self.node_id);
            self.detached = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(n: u8) -> NodeId {
        NodeId::new(format!("10.0.0.{}", n), 11000)
    }

    #[test]
    fn test_announce_reaches_everyone_including_sender() {
        let hub = MemoryHub::new();
        let mut a = hub.attach(node(1));
        let mut b = hub.attach(node(2));

        let ann = Announcement {
            cluster_name: "c".to_string(),
            cmd_port: 11000,
            addresses: vec!["10.0.0.1/24".to_string()],
        };
        a.announce(&ann).unwrap();

        assert_eq!(a.poll_announcement().unwrap(), Some(ann.clone()));
        assert_eq!(b.poll_announcement().unwrap(), Some(ann));
        assert!(b.poll_announcement().unwrap().is_none());
    }

    #[test]
    fn test_publish_reaches_only_subscribers() {
        let hub = MemoryHub::new();
        let mut a = hub.attach(node(1));
        let mut b = hub.attach(node(2));
        let mut c = hub.attach(node(3));

        b.subscribe(&node(1)).unwrap();

        a.publish(&Envelope::new(7, vec![9])).unwrap();
        assert!(b.poll_message().unwrap().is_some());
        assert!(c.poll_message().unwrap().is_none());

        b.unsubscribe(&node(1)).unwrap();
        a.publish(&Envelope::new(7, vec![9])).unwrap();
        assert!(b.poll_message().unwrap().is_none());
    }

    #[test]
    fn test_shutdown_detaches_from_segment() {
        let hub = MemoryHub::new();
        let mut a = hub.attach(node(1));
        let mut b = hub.attach(node(2));
        b.subscribe(&node(1)).unwrap();

        b.shutdown().unwrap();
        a.publish(&Envelope::new(1, vec![])).unwrap();
        a.announce(&Announcement {
            cluster_name: "c".to_string(),
            cmd_port: 11000,
            addresses: vec![],
        })
        .unwrap();

        // Detached endpoints read empty and shutting down twice is fine.
        assert!(b.poll_message().unwrap().is_none());
        assert!(b.poll_announcement().unwrap().is_none());
        assert!(b.shutdown().is_ok());
    }
}
