use std::{collections::HashMap, fmt::Debug};

/// The replicated application. Receives committed entries in index order,
/// each exactly once.
pub trait StateMachine: Send + Sync + Debug {
    /// Apply a committed command to the state machine.
    fn apply(&mut self, command_type: &str, command_data: &[u8]);
    /// Number of commands applied so far.
    fn applied_count(&self) -> u64;
}

/// Keeps, per command type, how many commands were applied and the payload of
/// the most recent one.
#[derive(Debug, Clone, Default)]
pub struct StateMachineDefault {
    applied: u64,
    counts: HashMap<String, u64>,
    latest: HashMap<String, Vec<u8>>,
}

impl StateMachine for StateMachineDefault {
    fn apply(&mut self, command_type: &str, command_data: &[u8]) {
        self.applied += 1;
        *self.counts.entry(command_type.to_string()).or_insert(0) += 1;
        self.latest.insert(command_type.to_string(), command_data.to_vec());
    }

    fn applied_count(&self) -> u64 {
        self.applied
    }
}

impl StateMachineDefault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of applied commands of `command_type`.
    pub fn count_of(&self, command_type: &str) -> u64 {
        self.counts.get(command_type).copied().unwrap_or(0)
    }

    /// Payload of the most recent command of `command_type`.
    pub fn latest(&self, command_type: &str) -> Option<&[u8]> {
        self.latest.get(command_type).map(Vec::as_slice)
    }
}
