
use log::{debug, error, warn};

use crate::consensus::{AppendEntriesRequest, AppendEntriesResponse, NodeState};

/// How an AppendEntries request was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The request passed every check and its entries are in the log.
    Accepted,
    /// The request came from a leader of an older term.
    StaleTerm,
    /// The log has no entry matching the request's previous index and term.
    LogMismatch,
    /// The entries do not continue contiguously from the previous index.
    Malformed,
    /// Another node claims leadership of the term this node is leading.
    LeaderConflict,
}

impl AppendOutcome {
    pub fn is_accepted(self) -> bool {
        self == AppendOutcome::Accepted
    }
}

/// Request handling for a single node. The node is the only writer of its
/// [`NodeState`]; `&mut self` on every handler keeps each request atomic with
/// respect to that state.
#[derive(Debug)]
pub struct Node {
    state: NodeState,
}

impl Node {
    pub fn new(state: NodeState) -> Self {
        Self { state }
    }

    pub fn id(&self) -> u64 {
        self.state.id()
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    /// Handle an AppendEntries request from a leader and build the reply.
    pub fn handle(&mut self, request: &AppendEntriesRequest) -> AppendEntriesResponse {
        let outcome = self.append_entries(request);
        self.response_to(outcome)
    }

    /// The reply a leader gets for a request resolved as `outcome`.
    pub fn response_to(&self, outcome: AppendOutcome) -> AppendEntriesResponse {
        if outcome.is_accepted() {
            AppendEntriesResponse::accepted(self.state.current_term())
        } else {
            AppendEntriesResponse::rejected(self.state.current_term())
        }
    }

    /// Run the AppendEntries checks against the local state, mutating it when
    /// the request is accepted.
    pub fn append_entries(&mut self, request: &AppendEntriesRequest) -> AppendOutcome {
        let id = self.id();
        debug!(
            "Node {} received AppendEntries from Leader {} for Term {} (prev: {:?}/{}, {} \
             entries, leader_commit: {:?})",
            id,
            request.leader_id,
            request.term,
            request.previous_log_index,
            request.previous_log_term,
            request.entries.len(),
            request.leader_commit_index
        );

        // 1. Reject leaders from older terms
        if request.term < self.state.current_term() {
            warn!(
                "Node {} rejecting AppendEntries from Node {} (LeaderTerm {} < CurrentTerm {})",
                id,
                request.leader_id,
                request.term,
                self.state.current_term()
            );
            return AppendOutcome::StaleTerm;
        }

        // 2. A newer term always wins; at the same term a leader already exists
        if !self.state.observe_term(request.term) {
            if self.state.role().is_leader() {
                error!(
                    "Node {} is Leader of term {} but received AppendEntries from Node {} for \
                     the same term",
                    id, request.term, request.leader_id
                );
                return AppendOutcome::LeaderConflict;
            }
            if self.state.role().is_candidate() {
                self.state.step_down();
            }
        }

        // 3. The log must contain the entry the new ones follow
        if let Some(previous_log_index) = request.previous_log_index {
            let local_term = self.state.log().term_at_index(previous_log_index);
            if local_term != Some(request.previous_log_term) {
                warn!(
                    "Node {} log is not consistent with Leader {} log at index {} (local term \
                     {:?}, leader term {}). Rejecting AppendEntries.",
                    id, request.leader_id, previous_log_index, local_term, request.previous_log_term
                );
                return AppendOutcome::LogMismatch;
            }
        }

        if !Self::entries_are_contiguous(request) {
            warn!(
                "Node {} rejecting AppendEntries from Node {}: entries do not follow index {:?}",
                id, request.leader_id, request.previous_log_index
            );
            return AppendOutcome::Malformed;
        }

        // 4. Resolve conflicts and append what is missing
        self.reconcile_entries(request);

        // 5. Follow the leader's commit index as far as the local log allows
        if let Some(leader_commit_index) = request.leader_commit_index {
            if Some(leader_commit_index) > self.state.commit_index() {
                self.state.advance_commit_index(leader_commit_index);
            }
        }

        AppendOutcome::Accepted
    }

    /// Whether the request's entries are numbered consecutively from the
    /// index after `previous_log_index`.
    fn entries_are_contiguous(request: &AppendEntriesRequest) -> bool {
        let first = request.first_entry_index();
        request
            .entries
            .iter()
            .zip(first..)
            .all(|(entry, expected_index)| entry.index() == expected_index)
    }

    /// Skip entries already present with a matching term, truncate at the
    /// first conflict and append everything from there on.
    fn reconcile_entries(&mut self, request: &AppendEntriesRequest) {
        let id = self.id();

        for (position, entry) in request.entries.iter().enumerate() {
            match self.state.log().term_at_index(entry.index()) {
                Some(term) if term == entry.term() => continue,
                Some(term) => {
                    debug!(
                        "Node {} found conflict at index {} (local term {}, leader term {})",
                        id,
                        entry.index(),
                        term,
                        entry.term()
                    );
                    self.state.truncate_log_from(entry.index());
                }
                None => {}
            }

            let new_entries = &request.entries[position..];
            for new_entry in new_entries {
                self.state.append_to_log(new_entry.clone());
            }
            debug!(
                "Node {} appended {} entries, last index now {:?}",
                id,
                new_entries.len(),
                self.state.log().last_index()
            );
            return;
        }
    }
}
