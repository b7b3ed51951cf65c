#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusEvent {
    /// A node took over leadership for `term`.
    LeaderElected { leader_id: u64, term: u64 },
    /// A node's election timer fired while it was not leading. Consumed by
    /// the election sub-protocol.
    ElectionTimeout { node_id: u64, term: u64 },
    /// A node applied a committed entry to its state machine.
    EntryCommitted { node_id: u64, index: u64, term: u64 },
}
