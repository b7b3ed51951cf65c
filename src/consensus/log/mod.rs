
use std::fmt::Debug;

use log::debug;

use crate::consensus::LogEntry;

/// An ordered, 0-based sequence of log entries.
///
/// Entries are only ever appended at the tail or removed as a contiguous
/// suffix. The backing medium is up to the implementation; the node only
/// relies on the operations below, none of which block.
pub trait Log: Debug + Send + Sync {
    /// Number of entries in the log.
    fn len(&self) -> u64;

    /// Get the entry at `index`, if any.
    fn get(&self, index: u64) -> Option<&LogEntry>;

    /// All entries at or after `index`. Empty if `index` is past the tail.
    fn entries_from(&self, index: u64) -> &[LogEntry];

    /// Append an entry to the tail of the log.
    ///
    /// # Panics
    ///
    /// Panics if `entry.index()` is not equal to [`Log::len`]. Callers must
    /// append strictly in order.
    fn apply(&mut self, entry: LogEntry);

    /// Remove every entry at or after `index`. No-op if `index` is past the
    /// tail.
    fn delete_from(&mut self, index: u64);

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> &[LogEntry] {
        self.entries_from(0)
    }

    /// Term of the entry at `index`, or `None` if there is no such entry.
    fn term_at_index(&self, index: u64) -> Option<u64> {
        self.get(index).map(LogEntry::term)
    }

    /// Index of the last entry, or `None` for an empty log.
    fn last_index(&self) -> Option<u64> {
        self.len().checked_sub(1)
    }

    /// Term of the last entry. Returns 0 for an empty log.
    fn last_term(&self) -> u64 {
        self.last_index().and_then(|index| self.term_at_index(index)).unwrap_or(0)
    }
}

/// A [`Log`] kept entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLog {
    entries: Vec<LogEntry>,
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Log for InMemoryLog {
    fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    fn get(&self, index: u64) -> Option<&LogEntry> {
        usize::try_from(index).ok().and_then(|i| self.entries.get(i))
    }

    fn entries_from(&self, index: u64) -> &[LogEntry] {
        let start = usize::try_from(index).unwrap_or(usize::MAX).min(self.entries.len());
        &self.entries[start..]
    }

    fn apply(&mut self, entry: LogEntry) {
        assert_eq!(
            entry.index(),
            self.len(),
            "log entries must be appended in order without gaps"
        );
        self.entries.push(entry);
    }

    fn delete_from(&mut self, index: u64) {
        if index >= self.len() {
            return;
        }

        let removed = self.len() - index;
        self.entries.truncate(index as usize);
        debug!("Log truncated at index {} ({} entries removed)", index, removed);
    }
}
