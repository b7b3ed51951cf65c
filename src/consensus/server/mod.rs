
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::broadcast;

use crate::{
    consensus::{
        AppendEntriesRequest, AppendEntriesResponse, AppendOutcome, ConsensusError,
        ConsensusEvent, Node, NodeState, NodeTimer, TimerType,
    },
    messaging::{Message, NodeMessenger},
    state_machine::StateMachine,
};

/// Runs one [`Node`]: feeds it messages and timer events one at a time,
/// relays its replies and applies committed entries to the state machine.
#[derive(Debug)]
pub struct NodeServer<S: StateMachine> {
    /// The request-handling core of the node.
    node: Node,
    /// The state machine of the node.
    state_machine: S,
    /// The messenger for the node.
    messenger: NodeMessenger,
    /// The event sender for the node.
    event_tx: broadcast::Sender<ConsensusEvent>,
}

// NodeServer constructor
impl<S: StateMachine> NodeServer<S> {
    pub fn new(
        state: NodeState,
        state_machine: S,
        messenger: NodeMessenger,
        event_tx: broadcast::Sender<ConsensusEvent>,
    ) -> Self {
        Self { node: Node::new(state), state_machine, messenger, event_tx }
    }
}

// NodeServer getters (thin wrappers around node state)
impl<S: StateMachine> NodeServer<S> {
    /// Get the node's ID.
    pub fn id(&self) -> u64 {
        self.node.id()
    }

    /// Get the node's full state.
    pub fn state(&self) -> &NodeState {
        self.node.state()
    }

    /// Get the current term.
    pub fn current_term(&self) -> u64 {
        self.state().current_term()
    }

    /// Get the commit index.
    pub fn commit_index(&self) -> Option<u64> {
        self.state().commit_index()
    }

    /// Get the last applied index.
    pub fn last_applied(&self) -> Option<u64> {
        self.state().last_applied()
    }

    pub fn is_leader(&self) -> bool {
        self.state().role().is_leader()
    }

    pub fn state_machine(&self) -> &S {
        &self.state_machine
    }
}

// RPC methods
impl<S: StateMachine> NodeServer<S> {
    /// Send the response to `request` back to its leader.
    async fn send_append_response(
        &self,
        request: &AppendEntriesRequest,
        response: AppendEntriesResponse,
    ) -> Result<(), ConsensusError> {
        let msg = Message::AppendEntriesResponse {
            from_id: self.id(),
            response,
            previous_log_index: request.previous_log_index,
            entries_len: request.entries.len(),
        };
        debug!(
            "Node {} sending AppendEntriesResponse to leader {}: {:?}",
            self.id(),
            request.leader_id,
            msg
        );
        self.messenger
            .send_to(request.leader_id, Arc::new(msg))
            .await
            .map_err(ConsensusError::Transport)
    }

    /// Send AppendEntries to every follower. Fails if not leader or if any
    /// follower could not be reached.
    async fn send_append_entries_to_all_followers(&mut self) -> Result<(), ConsensusError> {
        if !self.is_leader() {
            warn!("Node {} tried to send AppendEntries to followers but is not Leader", self.id());
            return Err(ConsensusError::NotLeader(self.id()));
        }

        let peer_ids: Vec<u64> = self.state().peers().iter().copied().collect();
        let mut first_error = None;

        for peer_id in peer_ids {
            if let Err(e) = self.send_append_entries_to_follower(peer_id).await {
                error!("Node {} failed to send AppendEntries to {}: {}", self.id(), peer_id, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Send the entries a follower is missing (or a heartbeat if none).
    async fn send_append_entries_to_follower(&mut self, peer_id: u64) -> Result<(), ConsensusError> {
        let request =
            self.state().append_entries_for(peer_id).ok_or(ConsensusError::NodeNotFound(peer_id))?;

        if request.is_heartbeat() {
            debug!(
                "Node {} sending heartbeat to {} (prev: {:?})",
                self.id(),
                peer_id,
                request.previous_log_index
            );
        } else {
            debug!(
                "Node {} sending AppendEntries to {} (prev: {:?}, {} entries)",
                self.id(),
                peer_id,
                request.previous_log_index,
                request.entries.len()
            );
        }
        self.messenger
            .send_to(peer_id, Arc::new(Message::AppendEntries { request }))
            .await
            .map_err(ConsensusError::Transport)
    }
}

// Message handlers
impl<S: StateMachine> NodeServer<S> {
    /// Take leadership of the next term. Called by the election sub-protocol
    /// once it has won an election for this node.
    pub async fn assume_leadership(&mut self, timer: &mut NodeTimer) -> Result<(), ConsensusError> {
        let state = self.node.state_mut();
        state.transition_to_candidate();
        state.transition_to_leader();

        let term = self.current_term();
        info!("Node {} is Leader for Term {}", self.id(), term);
        let _ = self.event_tx.send(ConsensusEvent::LeaderElected { leader_id: self.id(), term });

        timer.reset_heartbeat_timer();
        self.send_append_entries_to_all_followers().await
    }

    /// Handle an AppendEntries request from a leader.
    async fn handle_append_entries(
        &mut self,
        request: &AppendEntriesRequest,
        timer: &mut NodeTimer,
    ) -> Result<(), ConsensusError> {
        let outcome = self.node.append_entries(request);
        debug!("Node {} resolved AppendEntries from {} as {:?}", self.id(), request.leader_id, outcome);

        // Any request from a current leader counts as a heartbeat
        if outcome != AppendOutcome::StaleTerm && !self.is_leader() {
            timer.reset_election_timer();
        }

        if outcome.is_accepted() {
            self.apply_committed_entries();
        }

        let response = self.node.response_to(outcome);
        self.send_append_response(request, response).await
    }

    /// Handle an AppendEntries response from a follower. `previous_log_index`
    /// and `entries_len` describe the request it answers.
    async fn handle_append_response(
        &mut self,
        from_id: u64,
        response: AppendEntriesResponse,
        previous_log_index: Option<u64>,
        entries_len: usize,
        timer: &mut NodeTimer,
    ) -> Result<(), ConsensusError> {
        debug!(
            "Node {} received AppendEntriesResponse from {} for term {} (Success: {})",
            self.id(),
            from_id,
            response.term,
            response.success
        );

        let was_leader = self.is_leader();
        let commit_advanced = self.node.state_mut().leader_process_append_response(
            from_id,
            previous_log_index,
            entries_len,
            response,
        );

        if was_leader && !self.is_leader() {
            info!(
                "Node {} saw newer term {} from {}, no longer Leader",
                self.id(),
                response.term,
                from_id
            );
            timer.reset_election_timer();
            return Ok(());
        }

        debug!(
            "Node {} match_index for {} is {:?}",
            self.id(),
            from_id,
            self.state().match_index_for(from_id)
        );

        if commit_advanced {
            self.apply_committed_entries();
        }

        Ok(())
    }

    /// Append a client command to the leader's log. Replication happens on
    /// the next heartbeat.
    fn handle_client_command(
        &mut self,
        command_type: &str,
        command_data: &[u8],
    ) -> Result<(), ConsensusError> {
        match self.node.state_mut().leader_append(command_type, command_data) {
            Some(index) => {
                info!(
                    "Node {} appended '{}' command at index {}. Replication will occur via \
                     heartbeat.",
                    self.id(),
                    command_type,
                    index
                );
                // a single-node cluster may have committed already
                self.apply_committed_entries();
                Ok(())
            }
            None => Err(ConsensusError::NotLeader(self.id())),
        }
    }

    /// Handle a timer event (election or heartbeat timeout).
    pub async fn handle_timer_event(
        &mut self,
        timer_type: TimerType,
        timer: &mut NodeTimer,
    ) -> Result<(), ConsensusError> {
        match timer_type {
            TimerType::Election =>
                if self.is_leader() {
                    debug!("Node {} received election timer event as Leader. Ignoring.", self.id());
                    timer.reset_heartbeat_timer();
                } else {
                    info!(
                        "Node {} election timeout at term {}, no leader heard from",
                        self.id(),
                        self.current_term()
                    );
                    let _ = self.event_tx.send(ConsensusEvent::ElectionTimeout {
                        node_id: self.id(),
                        term: self.current_term(),
                    });
                },
            TimerType::Heartbeat =>
                if self.is_leader() {
                    self.send_append_entries_to_all_followers().await?;
                } else {
                    warn!(
                        "Node {} received heartbeat timer event but is not a Leader. Ignoring.",
                        self.id()
                    );
                    timer.reset_election_timer();
                },
        }
        Ok(())
    }

    /// Process a single message. Used by the event loop.
    pub async fn process_message(
        &mut self,
        msg: Arc<Message>,
        timer: &mut NodeTimer,
    ) -> Result<(), ConsensusError> {
        match *msg {
            Message::AppendEntries { ref request } => {
                self.handle_append_entries(request, timer).await?;
            }
            Message::AppendEntriesResponse { from_id, response, previous_log_index, entries_len } => {
                self.handle_append_response(from_id, response, previous_log_index, entries_len, timer)
                    .await?;
            }
            Message::BecomeLeaderCmd => {
                info!("Node {} received BecomeLeaderCmd", self.id());
                if self.is_leader() {
                    warn!("Node {} received BecomeLeaderCmd but is already a Leader. Ignoring.", self.id());
                } else {
                    self.assume_leadership(timer).await?;
                }
            }
            Message::ClientCommand { ref command_type, ref command_data } => {
                if let Err(e) = self.handle_client_command(command_type, command_data) {
                    warn!("Node {} dropped client command: {}", self.id(), e);
                }
            }
        }

        Ok(())
    }
}

// State machine update
impl<S: StateMachine> NodeServer<S> {
    /// Apply newly committed log entries to the state machine, in index
    /// order, each exactly once.
    fn apply_committed_entries(&mut self) {
        let id = self.id();
        let state = self.node.state();
        let entries = state.unapplied_entries();
        let Some(last) = entries.last() else {
            return;
        };
        let last_index = last.index();

        info!(
            "Node {} applying entries from index {} up to {}",
            id,
            entries[0].index(),
            last_index
        );

        for entry in entries {
            debug!("Node {} applying log[{}] ('{}')", id, entry.index(), entry.command_type());
            self.state_machine.apply(entry.command_type(), entry.command_data());
            let _ = self.event_tx.send(ConsensusEvent::EntryCommitted {
                node_id: id,
                index: entry.index(),
                term: entry.term(),
            });
        }

        self.node.state_mut().set_last_applied(last_index);
    }
}
