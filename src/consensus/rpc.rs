use crate::consensus::LogEntry;

/// AppendEntries RPC sent by a leader to replicate entries. With no entries it
/// doubles as a heartbeat.
///
/// `previous_log_index` is `None` when the leader replicates from the start of
/// the log, in which case `previous_log_term` is 0 and the consistency check
/// always passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendEntriesRequest {
    pub leader_id: u64,
    pub term: u64,
    pub previous_log_index: Option<u64>,
    pub previous_log_term: u64,
    pub entries: Vec<LogEntry>,
    pub leader_commit_index: Option<u64>,
}

impl AppendEntriesRequest {
    pub fn new(
        leader_id: u64,
        term: u64,
        previous_log_index: Option<u64>,
        previous_log_term: u64,
        entries: Vec<LogEntry>,
        leader_commit_index: Option<u64>,
    ) -> Self {
        Self { leader_id, term, previous_log_index, previous_log_term, entries, leader_commit_index }
    }

    /// Build a request without entries.
    pub fn heartbeat(
        leader_id: u64,
        term: u64,
        previous_log_index: Option<u64>,
        previous_log_term: u64,
        leader_commit_index: Option<u64>,
    ) -> Self {
        Self::new(leader_id, term, previous_log_index, previous_log_term, vec![], leader_commit_index)
    }

    pub fn is_heartbeat(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index the first entry must carry for the request to be well formed.
    pub fn first_entry_index(&self) -> u64 {
        self.previous_log_index.map_or(0, |index| index + 1)
    }
}

/// Reply to an [`AppendEntriesRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendEntriesResponse {
    /// The responder's current term after handling the request.
    pub term: u64,
    pub success: bool,
}

impl AppendEntriesResponse {
    pub fn accepted(term: u64) -> Self {
        Self { term, success: true }
    }

    pub fn rejected(term: u64) -> Self {
        Self { term, success: false }
    }
}
