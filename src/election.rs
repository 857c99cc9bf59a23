//! Leader Election
//!
//! An ephemeral, bounded-duration voting round over a membership snapshot
//! frozen at election start. Every correctly functioning node computes the
//! same best candidate (the maximum node id), so a cluster converges on one
//! leader without any coordination beyond vote broadcasts. The round lives
//! until it concludes with a majority or is abandoned.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::node::NodeId;

/// Default election duration in ticks
pub const DEFAULT_ELECTION_DURATION: u64 = 10;

/// State of one election round.
#[derive(Debug, Clone)]
pub struct Election {
    /// Vote tally per candidate, zero-initialized over the frozen node set
    votes: HashMap<NodeId, u32>,
    /// Nodes that have already cast a vote
    voters: HashSet<NodeId>,
    /// Membership snapshot the round is decided over
    nodes: BTreeSet<NodeId>,
    /// Tick the round started at
    started: u64,
    /// Ticks the round stays open for
    duration: u64,
    /// Election sequence number, used to supersede stale rounds
    epoch: u64,
}

impl Election {
    /// Start a round over the given membership snapshot.
    pub fn new(nodes: BTreeSet<NodeId>, started: u64, duration: u64, epoch: u64) -> Self {
        let votes = nodes.iter().map(|n| (n.clone(), 0)).collect();
        Self {
            votes,
            voters: HashSet::new(),
            nodes,
            started,
            duration,
            epoch,
        }
    }

    /// Epoch of this round
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Number of votes cast so far
    pub fn voter_count(&self) -> usize {
        self.voters.len()
    }

    /// The candidate every node should converge on: the maximum id in the
    /// frozen snapshot. Deterministic across nodes by construction.
    pub fn best_candidate(&self) -> Option<&NodeId> {
        self.nodes.iter().next_back()
    }

    /// Tally a vote from `voter` for `candidate`. Duplicate votes and votes
    /// from nodes outside the frozen snapshot are dropped.
    pub fn tally(&mut self, candidate: &NodeId, voter: &NodeId) {
        if self.voters.contains(voter) {
            tracing::warn!("Duplicate vote from node {} ignored", voter);
            return;
        }
        if !self.nodes.contains(voter) {
            tracing::warn!("Vote from unknown node {} ignored", voter);
            return;
        }

        *self.votes.entry(candidate.clone()).or_insert(0) += 1;
        self.voters.insert(voter.clone());
    }

    /// The round's time window has elapsed.
    pub fn concluded(&self, now: u64) -> bool {
        now.saturating_sub(self.started) > self.duration
    }

    /// More than half the frozen snapshot has voted and a single candidate
    /// leads the tally outright.
    pub fn has_majority(&self) -> bool {
        if self.voters.len() * 2 <= self.nodes.len() {
            return false;
        }

        let mut counts: Vec<u32> = self.votes.values().copied().collect();
        counts.sort_unstable_by(|a, b| b.cmp(a));

        match (counts.first(), counts.get(1)) {
            (Some(_), None) => true,
            (Some(top), Some(second)) => top > second,
            (None, _) => false,
        }
    }

    /// The round is decided: its window has elapsed with a majority.
    pub fn ready(&self, now: u64) -> bool {
        self.concluded(now) && self.has_majority()
    }

    /// The round's window has elapsed without a majority; the caller should
    /// abandon it and start fresh.
    pub fn undecideable(&self, now: u64) -> bool {
        self.concluded(now) && !self.has_majority()
    }

    /// Winner of the round. Only meaningful once [`Election::ready`] holds;
    /// ties cannot occur then because the top count is strictly highest.
    pub fn winner(&self) -> Option<&NodeId> {
        self.votes
            .iter()
            .max_by(|(na, ca), (nb, cb)| ca.cmp(cb).then_with(|| na.cmp(nb)))
            .map(|(node, _)| node)
    }
}

impl std::fmt::Display for Election {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Election (epoch {}, {} voters, {} nodes)",
            self.epoch,
            self.voters.len(),
            self.nodes.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(n: u8) -> NodeId {
        NodeId::new(format!("10.0.0.{}", n), 11000)
    }

    fn three_node_election() -> Election {
        let nodes: BTreeSet<NodeId> = [node(1), node(2), node(3)].into_iter().collect();
        Election::new(nodes, 10, DEFAULT_ELECTION_DURATION, 0)
    }

    #[test]
    fn test_tally_vote() {
        let mut e = three_node_election();

        e.tally(&node(1), &node(1));
        assert!(!e.ready(11));
        assert_eq!(e.voter_count(), 1);

        e.tally(&node(1), &node(2));
        assert!(!e.ready(12));
        assert_eq!(e.voter_count(), 2);
    }

    #[test]
    fn test_duplicate_vote_is_ignored() {
        let mut e = three_node_election();

        e.tally(&node(1), &node(2));
        e.tally(&node(3), &node(2));

        assert_eq!(e.voter_count(), 1);
        assert_eq!(e.votes[&node(1)], 1);
        assert_eq!(e.votes[&node(3)], 0);
    }

    #[test]
    fn test_vote_from_unknown_node_is_ignored() {
        let mut e = three_node_election();

        e.tally(&node(1), &node(9));
        assert_eq!(e.voter_count(), 0);
        assert_eq!(e.votes[&node(1)], 0);
    }

    #[test]
    fn test_election_ready_needs_duration_and_majority() {
        let mut e = three_node_election();
        e.tally(&node(1), &node(1));
        e.tally(&node(1), &node(2));
        e.tally(&node(1), &node(3));

        // Majority reached but the window has not elapsed.
        assert!(e.has_majority());
        assert!(!e.ready(15));

        assert!(e.ready(25));
        assert_eq!(e.winner(), Some(&node(1)));
    }

    #[test]
    fn test_election_undecideable_on_split_vote() {
        let mut e = three_node_election();
        e.tally(&node(1), &node(1));
        e.tally(&node(2), &node(2));

        assert!(e.undecideable(25));
        assert!(!e.ready(25));
    }

    #[test]
    fn test_minority_of_voters_is_not_enough() {
        let mut e = three_node_election();
        e.tally(&node(3), &node(3));

        // One voter of three is not more than half.
        assert!(e.undecideable(25));
    }

    #[test]
    fn test_best_candidate_is_max_of_snapshot() {
        let e = three_node_election();
        assert_eq!(e.best_candidate(), Some(&node(3)));
    }

    #[test]
    fn test_unanimous_vote_for_best_candidate() {
        let mut e = three_node_election();
        let candidate = e.best_candidate().cloned().unwrap();

        e.tally(&candidate, &node(1));
        e.tally(&candidate, &node(2));
        e.tally(&candidate, &node(3));

        assert!(e.ready(25));
        assert_eq!(e.winner(), Some(&candidate));
    }
}
