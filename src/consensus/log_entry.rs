/// A log entry in the Raft log.
///
/// Entries are immutable once built. A conflicting entry is replaced by
/// truncating the log and appending a new entry at the same index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// The position of the entry in the log (0-based).
    index: u64,
    /// The leader's term when the entry was created.
    term: u64,
    /// Discriminator used by the state machine to dispatch the payload.
    command_type: String,
    /// Opaque serialized command.
    command_data: Vec<u8>,
}

impl LogEntry {
    pub fn new(
        index: u64,
        term: u64,
        command_type: impl Into<String>,
        command_data: impl Into<Vec<u8>>,
    ) -> Self {
        Self { index, term, command_type: command_type.into(), command_data: command_data.into() }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn term(&self) -> u64 {
        self.term
    }

    pub fn command_type(&self) -> &str {
        &self.command_type
    }

    pub fn command_data(&self) -> &[u8] {
        &self.command_data
    }
}
