use std::{collections::HashSet, time::Duration};

use crate::consensus::{
    AppendEntriesResponse, InMemoryLog, Log, LogEntry,
    core::{NodeState, Role},
};

const NODE_ID: u64 = 0;
const PEER_1: u64 = 1;
const PEER_2: u64 = 2;
const ELECTION_TIMEOUT: Duration = Duration::from_millis(150);

fn create_state() -> NodeState {
    NodeState::new(NODE_ID, [NODE_ID, PEER_1, PEER_2], ELECTION_TIMEOUT)
}

/// A follower whose log holds one entry per term in `terms`.
fn create_state_with_log(current_term: u64, terms: &[u64], commit_index: Option<u64>) -> NodeState {
    let mut log = InMemoryLog::new();
    for (index, term) in terms.iter().enumerate() {
        log.apply(LogEntry::new(index as u64, *term, "test", "test"));
    }
    NodeState::from_parts(
        NODE_ID,
        [PEER_1, PEER_2],
        current_term,
        None,
        ELECTION_TIMEOUT,
        Box::new(log),
        commit_index,
    )
}

/// A leader at term 1 with an empty log.
fn create_leader() -> NodeState {
    let mut state = create_state();
    state.transition_to_candidate();
    state.transition_to_leader();
    state
}

#[test]
fn test_core_new_state_defaults() {
    let state = create_state();

    assert_eq!(state.id(), NODE_ID);
    // self is never its own peer
    assert_eq!(state.peers().iter().copied().collect::<Vec<_>>(), vec![PEER_1, PEER_2]);
    assert_eq!(state.current_term(), 0);
    assert_eq!(state.voted_for(), None);
    assert_eq!(state.election_timeout(), ELECTION_TIMEOUT);
    assert!(state.log().is_empty());
    assert_eq!(state.commit_index(), None);
    assert_eq!(state.last_applied(), None);
    assert_eq!(state.role(), &Role::Follower);
}

#[test]
fn test_core_observe_term_updates_term_and_clears_vote() {
    let mut state = create_state();
    state.transition_to_candidate(); // term 1, votes for self

    let updated = state.observe_term(3);

    assert!(updated);
    assert_eq!(state.current_term(), 3);
    assert_eq!(state.voted_for(), None);
    assert!(state.role().is_follower());
}

#[test]
fn test_core_observe_term_demotes_leader() {
    let mut state = create_leader();

    assert!(state.observe_term(2));

    assert!(state.role().is_follower());
    assert_eq!(state.next_index_for(PEER_1), None);
}

#[test]
fn test_core_observe_term_ignores_same_or_older_term() {
    let mut state = create_state();
    state.transition_to_candidate(); // term 1

    assert!(!state.observe_term(1));
    assert!(!state.observe_term(0));

    assert_eq!(state.current_term(), 1);
    assert_eq!(state.voted_for(), Some(NODE_ID));
    assert!(state.role().is_candidate());
}

#[test]
fn test_core_step_down_keeps_term() {
    let mut state = create_state();
    state.transition_to_candidate();

    state.step_down();

    assert!(state.role().is_follower());
    assert_eq!(state.current_term(), 1);
    assert_eq!(state.voted_for(), Some(NODE_ID));
}

#[test]
fn test_core_transition_to_candidate_and_vote_for_self() {
    let mut state = create_state();

    state.transition_to_candidate();

    assert_eq!(state.current_term(), 1);
    assert_eq!(state.voted_for(), Some(NODE_ID));
    assert_eq!(state.role(), &Role::Candidate { votes_received: HashSet::from([NODE_ID]) });
}

#[test]
fn test_core_transition_to_candidate_does_not_transition_if_leader() {
    let mut state = create_leader();

    state.transition_to_candidate();

    assert!(state.role().is_leader());
    assert_eq!(state.current_term(), 1);
}

#[test]
fn test_core_transition_to_leader_initializes_peer_progress() {
    let mut state = create_state_with_log(1, &[1, 1], None);
    state.transition_to_candidate();
    state.transition_to_leader();

    assert!(state.role().is_leader());
    assert_eq!(state.next_index_for(PEER_1), Some(2));
    assert_eq!(state.next_index_for(PEER_2), Some(2));
    assert_eq!(state.match_index_for(PEER_1), None);
    assert_eq!(state.next_index_for(NODE_ID), None);
}

#[test]
fn test_core_transition_to_leader_does_not_transition_if_not_candidate() {
    let mut state = create_state();

    state.transition_to_leader();

    assert!(state.role().is_follower());
    assert_eq!(state.current_term(), 0);
}

#[test]
fn test_core_advance_commit_index_clamps_to_last_index() {
    let mut state = create_state_with_log(1, &[1, 1], None);

    assert!(state.advance_commit_index(10));

    assert_eq!(state.commit_index(), Some(1));
}

#[test]
fn test_core_advance_commit_index_never_decreases() {
    let mut state = create_state_with_log(1, &[1, 1, 1], Some(2));

    assert!(!state.advance_commit_index(0));

    assert_eq!(state.commit_index(), Some(2));
}

#[test]
fn test_core_advance_commit_index_with_empty_log() {
    let mut state = create_state();

    assert!(!state.advance_commit_index(3));

    assert_eq!(state.commit_index(), None);
}

#[test]
fn test_core_committed_and_unapplied_entries() {
    let mut state = create_state_with_log(1, &[1, 1, 1, 1], Some(2));

    assert_eq!(state.committed_entries().len(), 3);
    assert_eq!(state.unapplied_entries().len(), 3);

    state.set_last_applied(1);

    let pending: Vec<u64> = state.unapplied_entries().iter().map(LogEntry::index).collect();
    assert_eq!(pending, vec![2]);
}

#[test]
fn test_core_set_last_applied_capped_at_commit_index() {
    let mut state = create_state_with_log(1, &[1, 1, 1], Some(1));

    state.set_last_applied(2);

    assert_eq!(state.last_applied(), Some(1));
    assert!(state.unapplied_entries().is_empty());
}

#[test]
fn test_core_set_last_applied_does_not_decrease() {
    let mut state = create_state_with_log(1, &[1, 1, 1], Some(2));

    state.set_last_applied(2);
    state.set_last_applied(0);

    assert_eq!(state.last_applied(), Some(2));
}

#[test]
fn test_core_set_last_applied_without_commit_is_ignored() {
    let mut state = create_state_with_log(1, &[1], None);

    state.set_last_applied(0);

    assert_eq!(state.last_applied(), None);
}

#[test]
fn test_core_truncate_log_at_commit_index_is_allowed() {
    let mut state = create_state_with_log(1, &[1, 1, 1], Some(2));

    state.truncate_log_from(2);

    assert_eq!(state.log().last_index(), Some(1));
}

#[test]
#[should_panic(expected = "below commit index")]
fn test_core_truncate_log_below_commit_index_panics() {
    let mut state = create_state_with_log(1, &[1, 1, 1], Some(2));

    state.truncate_log_from(1);
}

#[test]
#[should_panic(expected = "already applied")]
fn test_core_truncate_log_over_applied_entries_panics() {
    let mut state = create_state_with_log(1, &[1, 1, 1], Some(2));
    state.set_last_applied(2);

    state.truncate_log_from(2);
}

#[test]
fn test_core_truncate_log_past_applied_entries_is_allowed() {
    let mut state = create_state_with_log(1, &[1, 1, 1, 1], Some(2));
    state.set_last_applied(2);

    state.truncate_log_from(3);

    assert_eq!(state.log().last_index(), Some(2));
}

#[test]
fn test_core_leader_append_entry() {
    let mut state = create_leader();

    let index = state.leader_append("set", "x=1");

    assert_eq!(index, Some(0));
    assert_eq!(state.log().term_at_index(0), Some(1));
    assert_eq!(state.log().get(0).map(LogEntry::command_type), Some("set"));
    // not yet replicated to a majority
    assert_eq!(state.commit_index(), None);
}

#[test]
fn test_core_leader_append_rejected_if_not_leader() {
    let mut state = create_state();

    assert_eq!(state.leader_append("set", "x=1"), None);
    assert!(state.log().is_empty());
}

#[test]
fn test_core_single_node_leader_commits_immediately() {
    let mut state = NodeState::new(NODE_ID, [], ELECTION_TIMEOUT);
    state.transition_to_candidate();
    state.transition_to_leader();

    state.leader_append("set", "x=1");

    assert_eq!(state.commit_index(), Some(0));
}

#[test]
fn test_core_append_entries_for_new_follower_starts_at_sentinel() {
    let mut state = create_leader();
    state.leader_append("set", "x=1");

    let request = state.append_entries_for(PEER_1).unwrap();

    assert_eq!(request.leader_id, NODE_ID);
    assert_eq!(request.term, 1);
    assert_eq!(request.previous_log_index, None);
    assert_eq!(request.previous_log_term, 0);
    assert_eq!(request.entries.len(), 1);
    assert_eq!(request.leader_commit_index, None);
}

#[test]
fn test_core_append_entries_for_unknown_peer_or_follower() {
    let leader = create_leader();
    assert_eq!(leader.append_entries_for(42), None);

    let follower = create_state();
    assert_eq!(follower.append_entries_for(PEER_1), None);
}

#[test]
fn test_core_leader_process_success_advances_commit_on_majority() {
    let mut state = create_leader();
    state.leader_append("set", "x=1");
    state.leader_append("set", "x=2");

    let committed =
        state.leader_process_append_response(PEER_1, None, 2, AppendEntriesResponse::accepted(1));

    assert!(committed);
    assert_eq!(state.match_index_for(PEER_1), Some(1));
    assert_eq!(state.next_index_for(PEER_1), Some(2));
    assert_eq!(state.commit_index(), Some(1));

    // peer 1 is caught up: the next request carries no entries
    let request = state.append_entries_for(PEER_1).unwrap();
    assert!(request.is_heartbeat());
    assert_eq!(request.previous_log_index, Some(1));
    assert_eq!(request.previous_log_term, 1);
}

#[test]
fn test_core_leader_process_higher_term_demotes() {
    let mut state = create_state_with_log(1, &[1, 1], None);
    state.transition_to_candidate(); // term 2
    state.transition_to_leader();

    let committed = state.leader_process_append_response(
        PEER_1,
        Some(1),
        0,
        AppendEntriesResponse::rejected(3),
    );

    assert!(!committed);
    assert!(state.role().is_follower());
    assert_eq!(state.current_term(), 3);
    assert_eq!(state.voted_for(), None);
}

#[test]
fn test_core_leader_process_rejection_backs_up_by_one() {
    let mut state = create_state_with_log(1, &[1, 1], None);
    state.transition_to_candidate(); // term 2
    state.transition_to_leader();

    state.leader_process_append_response(PEER_1, Some(1), 0, AppendEntriesResponse::rejected(2));
    assert_eq!(state.next_index_for(PEER_1), Some(1));

    state.leader_process_append_response(PEER_1, Some(0), 0, AppendEntriesResponse::rejected(2));
    state.leader_process_append_response(PEER_1, None, 0, AppendEntriesResponse::rejected(2));
    assert_eq!(state.next_index_for(PEER_1), Some(0));
}

#[test]
fn test_core_leader_does_not_commit_previous_term_entries_by_counting() {
    let mut state = create_state_with_log(1, &[1], None);
    state.transition_to_candidate(); // term 2
    state.transition_to_leader();

    state.leader_process_append_response(PEER_1, None, 1, AppendEntriesResponse::accepted(2));
    assert_eq!(state.commit_index(), None);

    // a current-term entry on a majority commits the older one with it
    state.leader_append("set", "x=1");
    state.leader_process_append_response(PEER_1, Some(0), 1, AppendEntriesResponse::accepted(2));
    assert_eq!(state.commit_index(), Some(1));
}

#[test]
fn test_core_leader_ignores_stale_response() {
    let mut state = create_state();
    state.transition_to_candidate();
    state.transition_to_candidate(); // term 2 (candidacy restarted)
    state.transition_to_leader();
    state.leader_append("set", "x=1");

    let committed =
        state.leader_process_append_response(PEER_1, None, 1, AppendEntriesResponse::accepted(1));

    assert!(!committed);
    assert_eq!(state.match_index_for(PEER_1), None);
}
