//! UDP Transport
//!
//! Presence runs over a well-known multicast group. The publication channel
//! is a UDP socket bound to the node's command port: publishing sends the
//! envelope to every subscribed peer's command port, and inbound datagrams
//! are accepted only from peers this node is subscribed to. Sockets are
//! non-blocking; a would-block read means "no data this cycle".

use std::collections::HashSet;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

use crate::config::ManagementConfig;
use crate::error::{Error, Result};
use crate::message::Envelope;
use crate::node::NodeId;
use crate::presence::Announcement;
use crate::transport::Transport;

/// Multicast TTL for presence datagrams
const MULTICAST_TTL: u32 = 8;

/// Receive buffer size; both channels carry small control datagrams
const RECV_BUF: usize = 8192;

/// UDP transport for one management node.
pub struct UdpTransport {
    /// Socket presence announcements are sent from
    announce_socket: Option<UdpSocket>,
    /// Socket bound to the multicast group for inbound announcements
    presence_socket: Option<UdpSocket>,
    /// Socket bound to the command port; carries publications both ways
    cmd_socket: Option<UdpSocket>,
    /// Multicast destination for announcements
    announce_target: SocketAddr,
    /// Peers whose publications we accept (and who receive ours)
    subscriptions: HashSet<NodeId>,
}

impl UdpTransport {
    /// Bind the presence and command sockets for this node.
    pub fn bind(management: &ManagementConfig) -> Result<Self> {
        let group: Ipv4Addr = management
            .multicast_group
            .parse()
            .map_err(|_| Error::InvalidAddress(management.multicast_group.clone()))?;

        let announce_socket = UdpSocket::bind("0.0.0.0:0")
            .map_err(|e| Error::Network(format!("Failed to bind announce socket: {}", e)))?;
        announce_socket
            .set_multicast_ttl_v4(MULTICAST_TTL)
            .map_err(|e| Error::Network(format!("Failed to set multicast TTL: {}", e)))?;

        let presence_socket =
            UdpSocket::bind(("0.0.0.0", management.multicast_port)).map_err(|e| {
                Error::Network(format!(
                    "Failed to bind presence listener on port {}: {}",
                    management.multicast_port, e
                ))
            })?;
        if let Err(e) = presence_socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED) {
            // Hosts without a multicast route can still run a single-node
            // cluster; discovery just stays silent.
            tracing::warn!("Failed to join multicast group {}: {}", group, e);
        }
        presence_socket.set_nonblocking(true)?;

        let cmd_socket = UdpSocket::bind(("0.0.0.0", management.cmd_port)).map_err(|e| {
            Error::Network(format!(
                "Failed to bind command socket on port {}: {}",
                management.cmd_port, e
            ))
        })?;
        cmd_socket.set_nonblocking(true)?;

        Ok(Self {
            announce_socket: Some(announce_socket),
            presence_socket: Some(presence_socket),
            cmd_socket: Some(cmd_socket),
            announce_target: SocketAddr::from((group, management.multicast_port)),
            subscriptions: HashSet::new(),
        })
    }

    /// Non-blocking receive that maps would-block to `None`.
    fn try_recv(socket: &UdpSocket) -> Result<Option<(Vec<u8>, SocketAddr)>> {
        let mut buf = [0u8; RECV_BUF];
        match socket.recv_from(&mut buf) {
            Ok((len, src)) => Ok(Some((buf[..len].to_vec(), src))),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn peer_addr(peer: &NodeId) -> Result<SocketAddr> {
        let ip: Ipv4Addr = peer
            .address
            .parse()
            .map_err(|_| Error::InvalidAddress(peer.address.clone()))?;
        Ok(SocketAddr::from((ip, peer.port)))
    }
}

impl Transport for UdpTransport {
    fn announce(&mut self, ann: &Announcement) -> Result<()> {
        let Some(socket) = self.announce_socket.as_ref() else {
            return Err(Error::ShuttingDown);
        };
        let bytes = ann.encode()?;
        if let Err(e) = socket.send_to(&bytes, self.announce_target) {
            // Some networks filter multicast; periodic re-announcement is
            // the recovery path, so this is not fatal.
            tracing::debug!("Presence announce failed: {}", e);
        }
        Ok(())
    }

    fn poll_announcement(&mut self) -> Result<Option<Announcement>> {
        let Some(socket) = self.presence_socket.as_ref() else {
            return Ok(None);
        };
        match Self::try_recv(socket)? {
            Some((bytes, src)) => match Announcement::decode(&bytes) {
                Ok(ann) => Ok(Some(ann)),
                Err(e) => {
                    tracing::debug!("Dropping malformed announcement from {}: {}", src, e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    fn publish(&mut self, env: &Envelope) -> Result<()> {
        let Some(socket) = self.cmd_socket.as_ref() else {
            return Err(Error::ShuttingDown);
        };
        let bytes = env.encode()?;
        for peer in &self.subscriptions {
            let addr = Self::peer_addr(peer)?;
            if let Err(e) = socket.send_to(&bytes, addr) {
                // An unreachable peer is the partition detector's problem.
                tracing::trace!("Publish to {} failed: {}", peer, e);
            }
        }
        Ok(())
    }

    fn poll_message(&mut self) -> Result<Option<Envelope>> {
        let Some(socket) = self.cmd_socket.as_ref() else {
            return Ok(None);
        };
        match Self::try_recv(socket)? {
            Some((bytes, src)) => {
                let sender = NodeId::new(src.ip().to_string(), src.port());
                if !self.subscriptions.contains(&sender) {
                    tracing::debug!("Dropping message from unsubscribed source {}", sender);
                    return Ok(None);
                }
                match Envelope::decode(&bytes) {
                    Ok(env) => Ok(Some(env)),
                    Err(e) => {
                        tracing::debug!("Dropping malformed envelope from {}: {}", sender, e);
                        Ok(None)
                    }
                }
            }
            None => Ok(None),
        }
    }

    fn subscribe(&mut self, peer: &NodeId) -> Result<()> {
        // Validate the address up front so eviction never has to.
        Self::peer_addr(peer)?;
        self.subscriptions.insert(peer.clone());
        Ok(())
    }

    fn unsubscribe(&mut self, peer: &NodeId) -> Result<()> {
        self.subscriptions.remove(peer);
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.announce_socket = None;
        self.presence_socket = None;
        self.cmd_socket = None;
        self.subscriptions.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(cmd_port: u16, mcast_port: u16) -> ManagementConfig {
        ManagementConfig {
            cluster_name: "test".to_string(),
            multicast_group: "224.0.0.251".to_string(),
            multicast_port: mcast_port,
            cmd_port,
            interfaces: vec!["127.0.0.1/8".to_string()],
        }
    }

    #[test]
    fn test_bind_and_shutdown_is_idempotent() {
        let mut t = UdpTransport::bind(&config(34561, 34571)).unwrap();
        assert!(t.shutdown().is_ok());
        assert!(t.shutdown().is_ok());
        // After shutdown the channels read as empty rather than erroring.
        assert!(t.poll_announcement().unwrap().is_none());
        assert!(t.poll_message().unwrap().is_none());
    }

    #[test]
    fn test_unicast_publish_between_two_transports() {
        let mut a = UdpTransport::bind(&config(34562, 34572)).unwrap();
        let mut b = UdpTransport::bind(&config(34563, 34573)).unwrap();

        let a_id = NodeId::new("127.0.0.1", 34562);
        let b_id = NodeId::new("127.0.0.1", 34563);
        a.subscribe(&b_id).unwrap();
        b.subscribe(&a_id).unwrap();

        let env = Envelope::new(42, vec![1, 2, 3]);
        a.publish(&env).unwrap();

        // Loopback delivery is fast but not instant.
        let mut received = None;
        for _ in 0..50 {
            if let Some(env) = b.poll_message().unwrap() {
                received = Some(env);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }

        let received = received.expect("envelope should arrive over loopback");
        assert_eq!(received.kind, 42);
        assert_eq!(received.payload, vec![1, 2, 3]);
    }

    #[test]
    fn test_unsubscribed_source_is_dropped() {
        let mut a = UdpTransport::bind(&config(34564, 34574)).unwrap();
        let mut b = UdpTransport::bind(&config(34565, 34575)).unwrap();

        // a sends to b, but b never subscribed to a.
        let b_id = NodeId::new("127.0.0.1", 34565);
        a.subscribe(&b_id).unwrap();
        a.publish(&Envelope::new(1, vec![])).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(b.poll_message().unwrap().is_none());
    }
}
