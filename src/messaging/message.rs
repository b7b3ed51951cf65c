use crate::consensus::{AppendEntriesRequest, AppendEntriesResponse};

/// A message in the network or a command to a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    // Raft messages
    /// Request to append entries, sent by the leader
    AppendEntries { request: AppendEntriesRequest },
    /// Response to an append request. `previous_log_index` and `entries_len`
    /// echo the request being answered.
    AppendEntriesResponse {
        from_id: u64,
        response: AppendEntriesResponse,
        previous_log_index: Option<u64>,
        entries_len: usize,
    },

    // Commands
    /// Command from the election sub-protocol: this node won the election for
    /// the next term
    BecomeLeaderCmd,
    /// Command to append a new entry to the leader's log
    ClientCommand { command_type: String, command_data: Vec<u8> },
}
