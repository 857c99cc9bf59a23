//! Cluster Controller
//!
//! Owns all mutable protocol state for one management node: the membership
//! set, heartbeat table, election state, and leader identity. A single
//! synchronous `process()` cycle drives the whole protocol, so no internal
//! locking is needed; message handlers run inside the same cycle that polls
//! them. `run()` repeats the cycle at a fixed wall-clock cadence until the
//! stop flag is raised.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::election::Election;
use crate::error::Result;
use crate::health::{HealthSample, HealthSampler, SystemHealth};
use crate::heartbeat::HeartbeatTable;
use crate::message::{kind, kind_name, ElectLeader, Heartbeat};
use crate::node::NodeId;
use crate::presence::{Announcement, InterfaceAddr};
use crate::transport::Transport;

/// Upper bound on datagrams drained from each channel per cycle, so a
/// flooded socket cannot starve the rest of the protocol.
const MAX_DRAIN_PER_CYCLE: usize = 64;

/// Message handler entry in the dispatch table.
type Handler = fn(&mut Controller, &[u8]) -> Result<()>;

/// Cloneable handle that stops a running controller from another task or a
/// signal handler. The run loop observes the flag at the next cycle
/// boundary; the in-flight cycle always completes.
#[derive(Debug, Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    /// Request the run loop to stop. Idempotent.
    pub fn stop(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}

/// The management controller for one cluster node.
pub struct Controller {
    config: Config,
    node_id: NodeId,
    interfaces: Vec<InterfaceAddr>,
    transport: Box<dyn Transport>,
    health: Box<dyn HealthSampler>,
    handlers: HashMap<u32, Handler>,

    membership: BTreeSet<NodeId>,
    heartbeats: HeartbeatTable,
    current_election: Option<Election>,
    election_epoch: u64,
    leader_node_id: Option<NodeId>,

    /// Local logical clock, one tick per processing cycle
    node_time: u64,
    /// Cluster-wide logical clock, advanced only while this node leads
    cluster_time: u64,
    current_cluster_size: usize,
    /// High-water mark of the cluster size; never decreases, so a planned
    /// permanent scale-down below half the peak leaves the survivors
    /// classified as a minority (known limitation inherited from the
    /// protocol definition)
    peak_cluster_size: usize,
    engine_suspended: bool,
    last_health: Option<HealthSample>,
    last_announce: Option<Instant>,

    stop_flag: Arc<AtomicBool>,
    shut_down: bool,
}

impl Controller {
    /// Create a controller sampling health from the local host.
    pub fn new(config: Config, transport: Box<dyn Transport>) -> Result<Self> {
        Self::with_health(config, transport, Box::new(SystemHealth::new()))
    }

    /// Create a controller with an explicit health sampler.
    pub fn with_health(
        config: Config,
        transport: Box<dyn Transport>,
        health: Box<dyn HealthSampler>,
    ) -> Result<Self> {
        config.validate()?;
        let node_id = config.node_id()?;
        let interfaces = config.interfaces()?;

        let mut handlers: HashMap<u32, Handler> = HashMap::new();
        handlers.insert(kind::HEARTBEAT, Self::on_heartbeat as Handler);
        handlers.insert(kind::ELECT_LEADER, Self::on_elect_leader as Handler);

        let mut membership = BTreeSet::new();
        membership.insert(node_id.clone());

        Ok(Self {
            config,
            node_id,
            interfaces,
            transport,
            health,
            handlers,
            membership,
            heartbeats: HeartbeatTable::new(),
            current_election: None,
            election_epoch: 0,
            leader_node_id: None,
            node_time: 0,
            cluster_time: 0,
            current_cluster_size: 1,
            peak_cluster_size: 1,
            engine_suspended: false,
            last_health: None,
            last_announce: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
            shut_down: false,
        })
    }

    // ========== Accessors ==========

    /// This node's identity
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Current leader, if one is known
    pub fn leader_node_id(&self) -> Option<&NodeId> {
        self.leader_node_id.as_ref()
    }

    /// True when this node is the current leader
    pub fn is_leader(&self) -> bool {
        self.leader_node_id.as_ref() == Some(&self.node_id)
    }

    /// All known cluster members, including self
    pub fn nodes(&self) -> &BTreeSet<NodeId> {
        &self.membership
    }

    /// Election in progress, if any
    pub fn current_election(&self) -> Option<&Election> {
        self.current_election.as_ref()
    }

    /// Current election epoch
    pub fn election_epoch(&self) -> u64 {
        self.election_epoch
    }

    /// Local logical clock
    pub fn node_time(&self) -> u64 {
        self.node_time
    }

    /// Cluster-wide logical clock (authoritative only on the leader)
    pub fn cluster_time(&self) -> u64 {
        self.cluster_time
    }

    /// Live member count
    pub fn current_cluster_size(&self) -> usize {
        self.current_cluster_size
    }

    /// Historical maximum member count
    pub fn peak_cluster_size(&self) -> usize {
        self.peak_cluster_size
    }

    /// True when live membership has fallen below half the historical peak
    pub fn is_minority(&self) -> bool {
        self.current_cluster_size * 2 < self.peak_cluster_size
    }

    /// True while leader-dependent engine tasks are suspended
    pub fn engine_suspended(&self) -> bool {
        self.engine_suspended
    }

    /// Most recent local health snapshot
    pub fn last_health(&self) -> Option<&HealthSample> {
        self.last_health.as_ref()
    }

    // ========== Lifecycle ==========

    /// Handle for stopping the run loop from elsewhere
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: Arc::clone(&self.stop_flag),
        }
    }

    /// Raise the stop flag. Idempotent; the current cycle completes first.
    pub fn stop(&self) {
        tracing::info!("Setting stop flag for management process");
        self.stop_flag.store(true, Ordering::Relaxed);
    }

    /// Release all sockets and subscriptions. Call after `stop()`; safe to
    /// call more than once.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        if let Err(e) = self.transport.shutdown() {
            tracing::warn!("Transport shutdown failed: {}", e);
        }
        self.shut_down = true;
        tracing::info!("Management process {} shut down", self.node_id);
    }

    /// Drive `process()` at the configured cycle cadence until stopped.
    pub async fn run(&mut self) -> Result<()> {
        tracing::info!(
            "Started management process for cluster '{}' as {}",
            self.config.management.cluster_name,
            self.node_id
        );
        let mut interval = tokio::time::interval(self.config.cycle_interval());
        self.announce_presence()?;

        while !self.stop_flag.load(Ordering::Relaxed) {
            interval.tick().await;
            self.process()?;
        }

        tracing::info!("Stopped management process {}", self.node_id);
        Ok(())
    }

    // ========== Per-cycle protocol ==========

    /// One processing cycle. The step order is load-bearing: partitions are
    /// detected before the election step so a just-evicted leader is never
    /// treated as extant, and inbound messages are drained after the
    /// election step so a locally started election can absorb votes arriving
    /// within the same cycle.
    pub fn process(&mut self) -> Result<()> {
        if self.shut_down {
            tracing::debug!("process() called after shutdown; ignoring");
            return Ok(());
        }

        self.maybe_announce()?;

        self.node_time += 1;
        if self.node_time % self.config.timing.heartbeat_period == 0 {
            self.broadcast_heartbeat()?;
        }

        let sample = self.health.capture(self.node_time);
        tracing::trace!(
            tick = self.node_time,
            cpu = sample.cpu_percent,
            mem_used = sample.memory_used,
            "Captured local health sample"
        );
        self.last_health = Some(sample);

        self.detect_partitions();
        self.election_step()?;
        self.drain_presence()?;
        self.drain_messages()?;

        // A minority-side node is not authoritative even if it still holds
        // the leader id, so suspension gates all leader-delegated work.
        if self.is_leader() && !self.engine_suspended {
            self.cluster_time += 1;
            self.run_leader_tasks();
        }

        Ok(())
    }

    // ========== Presence ==========

    /// Broadcast this node's presence to the local network segment.
    pub fn announce_presence(&mut self) -> Result<()> {
        let ann = Announcement {
            cluster_name: self.config.management.cluster_name.clone(),
            cmd_port: self.config.management.cmd_port,
            addresses: self.config.management.interfaces.clone(),
        };
        self.transport.announce(&ann)?;
        self.last_announce = Some(Instant::now());
        Ok(())
    }

    /// Re-announce when the wall-clock announce interval has elapsed.
    fn maybe_announce(&mut self) -> Result<()> {
        let due = match self.last_announce {
            Some(at) => at.elapsed() >= self.config.announce_period(),
            None => true,
        };
        if due {
            self.announce_presence()?;
        }
        Ok(())
    }

    /// Admission path for one presence announcement.
    fn admit(&mut self, ann: Announcement) -> Result<()> {
        if ann.cluster_name != self.config.management.cluster_name {
            tracing::debug!(
                "Ignoring announcement for foreign cluster '{}'",
                ann.cluster_name
            );
            return Ok(());
        }

        let Some(candidate) = ann.resolve_node_id(&self.interfaces) else {
            tracing::debug!("Ignoring announcement with no reachable address");
            return Ok(());
        };

        if candidate == self.node_id {
            tracing::trace!("Ignoring own presence announcement");
            return Ok(());
        }

        if self.membership.contains(&candidate) {
            tracing::debug!("Node {} already admitted", candidate);
            return Ok(());
        }

        self.add_node(candidate)
    }

    /// Admit a new peer: membership, subscription, and heartbeat tracking
    /// are updated together, and the leader is invalidated because the
    /// quorum composition changed.
    fn add_node(&mut self, node: NodeId) -> Result<()> {
        tracing::info!(
            "Admitting node {} into cluster '{}'",
            node,
            self.config.management.cluster_name
        );
        self.transport.subscribe(&node)?;
        self.membership.insert(node.clone());
        self.heartbeats.record(node, self.node_time);

        self.current_cluster_size = self.membership.len();
        self.peak_cluster_size = self.peak_cluster_size.max(self.current_cluster_size);

        if self.leader_node_id.take().is_some() {
            tracing::info!("Membership changed, clearing leader pending re-election");
        }

        if self.engine_suspended && !self.is_minority() {
            self.resume_engine_tasks();
        }

        Ok(())
    }

    // ========== Heartbeat & partition detection ==========

    fn broadcast_heartbeat(&mut self) -> Result<()> {
        let hb = Heartbeat {
            cluster_name: self.config.management.cluster_name.clone(),
            node_id: self.node_id.clone(),
        };
        self.transport.publish(&hb.to_envelope()?)?;
        Ok(())
    }

    /// Evict peers silent beyond the partition threshold, in one batch.
    fn detect_partitions(&mut self) {
        let evicted = self
            .heartbeats
            .partitioned(self.node_time, self.config.timing.node_partition_threshold);
        if evicted.is_empty() {
            return;
        }

        for node in &evicted {
            tracing::warn!(
                "Node {} silent for more than {} ticks, evicting as partitioned",
                node,
                self.config.timing.node_partition_threshold
            );
            self.membership.remove(node);
            self.heartbeats.remove(node);
            if let Err(e) = self.transport.unsubscribe(node) {
                tracing::warn!("Failed to drop subscription to {}: {}", node, e);
            }
        }

        if let Some(leader) = &self.leader_node_id {
            if evicted.contains(leader) {
                tracing::warn!("Partitioned node {} was the leader, clearing leader", leader);
                self.leader_node_id = None;
            }
        }

        self.current_cluster_size = self.membership.len();

        if self.is_minority() && !self.engine_suspended {
            tracing::warn!(
                "Minority partition: {} live of {} peak members; suspending leader-dependent tasks",
                self.current_cluster_size,
                self.peak_cluster_size
            );
            if self.current_election.take().is_some() {
                tracing::warn!("Abandoning election in progress on minority side");
            }
            self.suspend_engine_tasks();
        }
    }

    // ========== Election ==========

    /// Conclude, abandon, or start an election as the tick demands. A
    /// minority-side node neither starts nor decides elections.
    fn election_step(&mut self) -> Result<()> {
        if self.is_minority() {
            return Ok(());
        }

        match &self.current_election {
            Some(e) if e.ready(self.node_time) => {
                let winner = e.winner().cloned();
                self.current_election = None;
                self.election_epoch += 1;
                match winner {
                    Some(winner) => {
                        tracing::info!(
                            "Election concluded: {} is leader (epoch {})",
                            winner,
                            self.election_epoch
                        );
                        self.leader_node_id = Some(winner);
                    }
                    // Unreachable once ready() holds; guarded rather than
                    // trusted.
                    None => self.leader_node_id = None,
                }
            }
            Some(e) if e.undecideable(self.node_time) => {
                tracing::warn!("{} undecided after its window, retrying with a fresh round", e);
                self.current_election = None;
                self.leader_node_id = None;
                self.election_epoch += 1;
            }
            Some(_) => {}
            None => {
                let settled = self.node_time > self.config.timing.settle_time;
                if self.leader_node_id.is_none() && settled {
                    self.start_election()?;
                }
            }
        }

        Ok(())
    }

    /// Freeze the current membership into a new election round, cast our own
    /// vote for the deterministic best candidate, and broadcast it.
    fn start_election(&mut self) -> Result<()> {
        let mut election = Election::new(
            self.membership.clone(),
            self.node_time,
            self.config.timing.election_duration,
            self.election_epoch,
        );

        // Membership always contains self, so a best candidate exists.
        let Some(candidate) = election.best_candidate().cloned() else {
            tracing::debug!("No candidates available, skipping election");
            return Ok(());
        };

        tracing::info!(
            "Starting election (epoch {}) over {} nodes, voting for {}",
            self.election_epoch,
            self.membership.len(),
            candidate
        );

        election.tally(&candidate, &self.node_id);
        let vote = ElectLeader {
            candidate,
            voter: self.node_id.clone(),
            epoch: self.election_epoch,
        };
        self.transport.publish(&vote.to_envelope()?)?;
        self.current_election = Some(election);
        Ok(())
    }

    // ========== Inbound message handling ==========

    fn drain_presence(&mut self) -> Result<()> {
        for _ in 0..MAX_DRAIN_PER_CYCLE {
            match self.transport.poll_announcement()? {
                Some(ann) => self.admit(ann)?,
                None => break,
            }
        }
        Ok(())
    }

    fn drain_messages(&mut self) -> Result<()> {
        for _ in 0..MAX_DRAIN_PER_CYCLE {
            let Some(env) = self.transport.poll_message()? else {
                break;
            };
            match self.handlers.get(&env.kind).copied() {
                Some(handler) => handler(self, &env.payload)?,
                None => {
                    tracing::debug!(
                        "Ignoring unknown message kind {} ({})",
                        env.kind,
                        kind_name(env.kind)
                    );
                }
            }
        }
        Ok(())
    }

    /// `HEARTBEAT` handler: refresh the sender's last-seen tick.
    fn on_heartbeat(&mut self, payload: &[u8]) -> Result<()> {
        let hb = match Heartbeat::decode(payload) {
            Ok(hb) => hb,
            Err(e) => {
                tracing::debug!("Dropping malformed heartbeat: {}", e);
                return Ok(());
            }
        };

        if hb.cluster_name != self.config.management.cluster_name {
            tracing::debug!("Dropping heartbeat for foreign cluster '{}'", hb.cluster_name);
            return Ok(());
        }
        if hb.node_id == self.node_id {
            return Ok(());
        }
        if !self.membership.contains(&hb.node_id) {
            tracing::debug!("Dropping heartbeat from unrecognized node {}", hb.node_id);
            return Ok(());
        }

        self.heartbeats.record(hb.node_id, self.node_time);
        Ok(())
    }

    /// `ELECT_LEADER` handler: defer to newer epochs, join the round if we
    /// have not already, and tally the vote.
    fn on_elect_leader(&mut self, payload: &[u8]) -> Result<()> {
        let vote = match ElectLeader::decode(payload) {
            Ok(vote) => vote,
            Err(e) => {
                tracing::debug!("Dropping malformed election message: {}", e);
                return Ok(());
            }
        };

        if vote.epoch > self.election_epoch {
            tracing::debug!(
                "Election epoch {} supersedes local epoch {}, deferring",
                vote.epoch,
                self.election_epoch
            );
            self.election_epoch = vote.epoch;
            self.current_election = None;
            self.leader_node_id = None;
        } else if vote.epoch < self.election_epoch {
            tracing::debug!(
                "Dropping stale election message (epoch {} < {})",
                vote.epoch,
                self.election_epoch
            );
            return Ok(());
        }

        if self.current_election.is_none() {
            // A vote reaching a node that has not noticed it is leaderless
            // still pulls it into the round. Minority-side nodes stay out.
            if self.is_minority() {
                tracing::debug!("In minority partition, not joining election");
                return Ok(());
            }
            self.start_election()?;
        }

        if let Some(election) = self.current_election.as_mut() {
            election.tally(&vote.candidate, &vote.voter);
        }
        Ok(())
    }

    // ========== Leader-delegated tasks ==========

    /// Placeholder for work delegated to the leader by the database engine;
    /// the cluster clock advance in `process()` is the authoritative part.
    fn run_leader_tasks(&mut self) {
        tracing::trace!(
            cluster_time = self.cluster_time,
            "Leader tasks complete"
        );
    }

    fn suspend_engine_tasks(&mut self) {
        self.engine_suspended = true;
        tracing::warn!("Delegated engine tasks suspended until membership recovers");
    }

    fn resume_engine_tasks(&mut self) {
        self.engine_suspended = false;
        tracing::info!(
            "Membership recovered ({} of {} peak), resuming delegated engine tasks",
            self.current_cluster_size,
            self.peak_cluster_size
        );
    }
}
