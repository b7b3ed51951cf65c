#[cfg(test)]
mod tests;

use std::{
    cmp::Ordering,
    collections::{BTreeSet, HashMap, HashSet},
    fmt,
    time::Duration,
};

use log::{debug, error, info, warn};

use crate::consensus::{
    AppendEntriesRequest, AppendEntriesResponse, InMemoryLog, Log, LogEntry,
};

/// The role of a node in the consensus protocol, with the data only that role
/// needs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Follower,
    Candidate {
        /// Nodes that granted a vote in the current term, self included.
        votes_received: HashSet<u64>,
    },
    Leader {
        /// Index of the next entry to send to each peer.
        next_index: HashMap<u64, u64>,
        /// Highest index known to be replicated on each peer.
        match_index: HashMap<u64, Option<u64>>,
    },
}

impl Role {
    pub fn is_follower(&self) -> bool {
        matches!(self, Role::Follower)
    }

    pub fn is_candidate(&self) -> bool {
        matches!(self, Role::Candidate { .. })
    }

    pub fn is_leader(&self) -> bool {
        matches!(self, Role::Leader { .. })
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Follower => write!(f, "Follower"),
            Role::Candidate { .. } => write!(f, "Candidate"),
            Role::Leader { .. } => write!(f, "Leader"),
        }
    }
}

/// Everything a node knows about itself: identity, peers, term, vote, log
/// and commit progress.
#[derive(Debug)]
pub struct NodeState {
    /// The id of the node.
    id: u64,
    /// Ids of the other nodes in the cluster.
    peers: BTreeSet<u64>,

    // TODO: persist current_term, voted_for and the log before replying once a
    // durable Log implementation exists.
    /// The current term of the node.
    current_term: u64,
    /// The node that this node has voted for in the current term.
    voted_for: Option<u64>,
    /// The log of the node.
    log: Box<dyn Log>,

    /// Base election timeout, read by the timer.
    election_timeout: Duration,

    // Volatile state
    /// Highest log index known to be committed.
    commit_index: Option<u64>,
    /// Highest log index handed to the state machine.
    last_applied: Option<u64>,
    /// The role of the node.
    role: Role,
}

// Constructors
impl NodeState {
    /// A fresh follower at term 0 with an empty in-memory log.
    pub fn new(id: u64, peers: impl IntoIterator<Item = u64>, election_timeout: Duration) -> Self {
        Self::from_parts(id, peers, 0, None, election_timeout, Box::new(InMemoryLog::new()), None)
    }

    /// Rebuild a follower from previously known state.
    pub fn from_parts(
        id: u64,
        peers: impl IntoIterator<Item = u64>,
        current_term: u64,
        voted_for: Option<u64>,
        election_timeout: Duration,
        log: Box<dyn Log>,
        commit_index: Option<u64>,
    ) -> Self {
        let peers = peers.into_iter().filter(|peer_id| *peer_id != id).collect();
        Self {
            id,
            peers,
            current_term,
            voted_for,
            log,
            election_timeout,
            commit_index,
            last_applied: None,
            role: Role::Follower,
        }
    }
}

// Getters
impl NodeState {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peers(&self) -> &BTreeSet<u64> {
        &self.peers
    }

    pub fn current_term(&self) -> u64 {
        self.current_term
    }

    pub fn voted_for(&self) -> Option<u64> {
        self.voted_for
    }

    pub fn election_timeout(&self) -> Duration {
        self.election_timeout
    }

    pub fn log(&self) -> &dyn Log {
        self.log.as_ref()
    }

    pub fn commit_index(&self) -> Option<u64> {
        self.commit_index
    }

    pub fn last_applied(&self) -> Option<u64> {
        self.last_applied
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    /// The committed prefix of the log.
    pub fn committed_entries(&self) -> &[LogEntry] {
        let end = self.commit_index.map_or(0, |index| (index + 1).min(self.log.len()));
        &self.log.entries()[..end as usize]
    }

    /// Committed entries not yet handed to the state machine, in index order.
    pub fn unapplied_entries(&self) -> &[LogEntry] {
        let start = self.last_applied.map_or(0, |index| index + 1) as usize;
        let committed = self.committed_entries();
        &committed[start.min(committed.len())..]
    }

    /// Get the next index for a peer. Only known while leading.
    pub fn next_index_for(&self, peer_id: u64) -> Option<u64> {
        match &self.role {
            Role::Leader { next_index, .. } => next_index.get(&peer_id).copied(),
            _ => None,
        }
    }

    /// Get the match index for a peer. Only known while leading.
    pub fn match_index_for(&self, peer_id: u64) -> Option<u64> {
        match &self.role {
            Role::Leader { match_index, .. } => match_index.get(&peer_id).copied().flatten(),
            _ => None,
        }
    }
}

// Log and commit mutation
impl NodeState {
    /// Append an entry received from the leader or submitted locally.
    pub(crate) fn append_to_log(&mut self, entry: LogEntry) {
        self.log.apply(entry);
    }

    /// Drop every entry at or after `index` to resolve a conflict.
    ///
    /// # Panics
    ///
    /// Panics if `index` lies below the commit index, or at or below the last
    /// applied index: committed entries are never removed and an entry handed
    /// to the state machine is never replaced.
    pub(crate) fn truncate_log_from(&mut self, index: u64) {
        if let Some(commit_index) = self.commit_index {
            assert!(
                index >= commit_index,
                "Node {} attempted to truncate log at {} below commit index {}",
                self.id,
                index,
                commit_index
            );
        }
        if let Some(last_applied) = self.last_applied {
            assert!(
                index > last_applied,
                "Node {} attempted to truncate log at {} over entries already applied up to {}",
                self.id,
                index,
                last_applied
            );
        }

        warn!(
            "Node {} deleting conflicting log entries from index {} (last index {:?})",
            self.id,
            index,
            self.log.last_index()
        );
        self.log.delete_from(index);
    }

    /// Raise the commit index towards `leader_commit_index`, capped at the last
    /// local entry. Returns true if the commit index moved.
    pub fn advance_commit_index(&mut self, leader_commit_index: u64) -> bool {
        let Some(last_index) = self.log.last_index() else {
            debug!(
                "Node {} cannot advance commit_index to {}: log is empty",
                self.id, leader_commit_index
            );
            return false;
        };

        let new_commit_index = leader_commit_index.min(last_index);
        if Some(new_commit_index) <= self.commit_index {
            debug!(
                "Node {} commit_index stays at {:?} (leader_commit: {}, last_index: {})",
                self.id, self.commit_index, leader_commit_index, last_index
            );
            return false;
        }

        info!(
            "Node {} updated commit_index from {:?} to {} (leader_commit: {})",
            self.id, self.commit_index, new_commit_index, leader_commit_index
        );
        self.commit_index = Some(new_commit_index);
        true
    }

    /// Set the last applied index.
    pub fn set_last_applied(&mut self, index: u64) {
        // last_applied never passes commit_index
        let Some(applied_index) = self.commit_index.map(|commit| index.min(commit)) else {
            error!(
                "Node {} attempted to set last_applied to {} with nothing committed",
                self.id, index
            );
            return;
        };

        match Some(applied_index).cmp(&self.last_applied) {
            Ordering::Greater => {
                self.last_applied = Some(applied_index);
                debug!("Node {} updated last_applied to {}", self.id, applied_index);
            }
            Ordering::Less => {
                error!(
                    "Node {} attempted to set last_applied to {} (lower than current {:?})",
                    self.id, applied_index, self.last_applied
                );
            }
            Ordering::Equal => {}
        }
    }
}

// Term and role transitions
impl NodeState {
    /// Adopt `term` if it is newer than the current term, clearing the vote
    /// and falling back to follower whatever the current role. Returns true if
    /// the term was updated.
    pub fn observe_term(&mut self, term: u64) -> bool {
        if term <= self.current_term {
            return false;
        }

        info!("Node {} updated term from {} to {}", self.id, self.current_term, term);
        self.current_term = term;
        self.voted_for = None;
        if !self.role.is_follower() {
            info!("Node {} stepping down from {} at term {}", self.id, self.role, term);
            self.role = Role::Follower;
        }
        true
    }

    /// Fall back to follower without changing the term, used when a candidate
    /// hears from a leader of its own term.
    pub fn step_down(&mut self) {
        if !self.role.is_follower() {
            info!(
                "Node {} transitioning from {} to Follower at term {}",
                self.id, self.role, self.current_term
            );
            self.role = Role::Follower;
        }
    }

    /// Start a candidacy: bump the term and vote for self.
    pub fn transition_to_candidate(&mut self) {
        if self.role.is_leader() {
            warn!("Node {} attempted to transition to candidate state but is a Leader", self.id);
            return;
        }

        let new_term = self.current_term + 1;
        info!("Node {} transitioning to candidate state at term {}", self.id, new_term);

        self.observe_term(new_term);
        self.voted_for = Some(self.id);
        self.role = Role::Candidate { votes_received: HashSet::from([self.id]) };
    }

    /// Take over leadership after winning the current term's election.
    pub fn transition_to_leader(&mut self) {
        let Role::Candidate { votes_received } = &self.role else {
            warn!(
                "Node {} attempted to transition to leader state but is not a candidate",
                self.id
            );
            return;
        };

        info!(
            "Node {} transitioning to leader state at term {} with {} votes",
            self.id,
            self.current_term,
            votes_received.len()
        );

        let next = self.log.len();
        self.role = Role::Leader {
            next_index: self.peers.iter().map(|peer_id| (*peer_id, next)).collect(),
            match_index: self.peers.iter().map(|peer_id| (*peer_id, None)).collect(),
        };
        // a single-node cluster commits on its own
        self.leader_update_commit_index();
    }
}

// Leader replication
impl NodeState {
    /// Append a new command to the leader's log at the current term. Returns
    /// the index of the new entry, or `None` if not leading.
    pub fn leader_append(
        &mut self,
        command_type: impl Into<String>,
        command_data: impl Into<Vec<u8>>,
    ) -> Option<u64> {
        if !self.role.is_leader() {
            warn!("Node {} tried to append entry but is not a Leader", self.id);
            return None;
        }

        let index = self.log.len();
        let entry = LogEntry::new(index, self.current_term, command_type, command_data);
        info!("Leader Node {} appending new log entry at index {}: {:?}", self.id, index, entry);
        self.log.apply(entry);
        self.leader_update_commit_index();
        Some(index)
    }

    /// Build the AppendEntries request for `peer_id` from its next index.
    ///
    /// A next index of 0 yields `previous_log_index = None` and
    /// `previous_log_term = 0`, the same convention the follower side checks.
    pub fn append_entries_for(&self, peer_id: u64) -> Option<AppendEntriesRequest> {
        let next_index = self.next_index_for(peer_id)?;
        let previous_log_index = next_index.checked_sub(1);
        let previous_log_term =
            previous_log_index.and_then(|index| self.log.term_at_index(index)).unwrap_or(0);

        Some(AppendEntriesRequest::new(
            self.id,
            self.current_term,
            previous_log_index,
            previous_log_term,
            self.log.entries_from(next_index).to_vec(),
            self.commit_index,
        ))
    }

    /// Update a peer's replication progress from its AppendEntries reply.
    /// `previous_log_index` and `entries_len` describe the request the reply
    /// answers. Returns true if the commit index advanced.
    pub fn leader_process_append_response(
        &mut self,
        peer_id: u64,
        previous_log_index: Option<u64>,
        entries_len: usize,
        response: AppendEntriesResponse,
    ) -> bool {
        if self.observe_term(response.term) {
            return false;
        }

        if response.term < self.current_term {
            debug!(
                "Node {} ignoring stale AppendEntries response from {} for term {}",
                self.id, peer_id, response.term
            );
            return false;
        }

        let id = self.id;
        let Role::Leader { next_index, match_index } = &mut self.role else {
            warn!("Node {} received AppendEntries response but is not a Leader", id);
            return false;
        };

        if !response.success {
            let next = next_index.entry(peer_id).or_insert(0);
            if *next > 0 {
                *next -= 1;
                info!("Node {} (Leader) decremented next_index for {} to {}", id, peer_id, *next);
            } else {
                warn!(
                    "Node {} (Leader) next_index for {} is 0. Cannot decrement further.",
                    id, peer_id
                );
            }
            return false;
        }

        let replicated_len = previous_log_index.map_or(0, |index| index + 1) + entries_len as u64;
        let new_match_index = replicated_len.checked_sub(1);

        let current_match_index = match_index.entry(peer_id).or_insert(None);
        if new_match_index > *current_match_index {
            debug!(
                "Node {} (Leader) updated match_index for {} from {:?} to {:?}",
                id, peer_id, *current_match_index, new_match_index
            );
            *current_match_index = new_match_index;
        }
        next_index.insert(peer_id, replicated_len);

        self.leader_update_commit_index()
    }

    /// Commit the highest current-term entry stored on a majority of the
    /// cluster. Returns true if the commit index advanced.
    fn leader_update_commit_index(&mut self) -> bool {
        let Role::Leader { match_index, .. } = &self.role else {
            return false;
        };
        let Some(last_index) = self.log.last_index() else {
            return false;
        };

        let majority = (self.peers.len() + 1) / 2 + 1;
        let first_uncommitted = self.commit_index.map_or(0, |index| index + 1);

        // entries from earlier terms only commit indirectly
        let new_commit_index = (first_uncommitted..=last_index).rev().find(|index| {
            let replicas = 1 + match_index
                .values()
                .filter(|matched| matched.is_some_and(|matched| matched >= *index))
                .count();
            replicas >= majority && self.log.term_at_index(*index) == Some(self.current_term)
        });

        match new_commit_index {
            Some(index) => {
                info!(
                    "Node {} (Leader) updated commit_index from {:?} to {}",
                    self.id, self.commit_index, index
                );
                self.commit_index = Some(index);
                true
            }
            None => false,
        }
    }
}
