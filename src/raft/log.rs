use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: u64,
    pub index: u64,
    pub command: String,
    pub committed: bool,
    pub applied: bool,
    /// Simulated time at which the leader accepted the command.
    pub created_at: Duration,
}

impl LogEntry {
    pub fn new(term: u64, index: u64, command: impl Into<String>, created_at: Duration) -> Self {
        Self {
            term,
            index,
            command: command.into(),
            committed: false,
            applied: false,
            created_at,
        }
    }

    /// Marks the entry committed. Returns false if it was already applied.
    pub fn commit(&mut self) -> bool {
        if self.applied {
            return false;
        }
        self.committed = true;
        true
    }

    /// Marks a committed entry applied. Uncommitted entries are left alone.
    pub fn apply(&mut self) -> bool {
        if !self.committed || self.applied {
            return false;
        }
        self.applied = true;
        true
    }

    pub fn info(&self, now: Duration) -> LogEntryInfo {
        LogEntryInfo {
            term: self.term,
            index: self.index,
            command: self.command.clone(),
            committed: self.committed,
            applied: self.applied,
            age_ms: now.saturating_sub(self.created_at).as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntryInfo {
    pub term: u64,
    pub index: u64,
    pub command: String,
    pub committed: bool,
    pub applied: bool,
    pub age_ms: u64,
}

/// In-memory, zero-based log. Survives kill/revive of its node.
#[derive(Debug, Clone, Default)]
pub struct Log {
    entries: Vec<LogEntry>,
}

impl Log {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of the last entry, `None` for an empty log.
    pub fn last_index(&self) -> Option<u64> {
        self.entries.len().checked_sub(1).map(|i| i as u64)
    }

    /// Term of the last entry, 0 for an empty log.
    pub fn last_term(&self) -> u64 {
        self.entries.last().map(|e| e.term).unwrap_or(0)
    }

    pub fn next_index(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn get(&self, index: u64) -> Option<&LogEntry> {
        self.entries.get(index as usize)
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn append(&mut self, entry: LogEntry) -> u64 {
        self.entries.push(entry);
        self.entries.len() as u64 - 1
    }

    /// Commits every entry up to and including `index`, clamped to the log
    /// tail. Returns the new highest committed index.
    pub fn commit_through(&mut self, index: u64) -> Option<u64> {
        let last = self.last_index()?;
        let upto = index.min(last);
        for entry in &mut self.entries[..=upto as usize] {
            entry.commit();
        }
        Some(upto)
    }

    /// Applies committed entries in order, stopping at the first uncommitted
    /// one. Returns the index of the last applied entry.
    pub fn apply_committed(&mut self) -> Option<u64> {
        let mut last_applied = None;
        for entry in &mut self.entries {
            if !entry.committed {
                break;
            }
            entry.apply();
            last_applied = Some(entry.index);
        }
        last_applied
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(term: u64, index: u64) -> LogEntry {
        LogEntry::new(term, index, format!("cmd{index}"), Duration::ZERO)
    }

    #[test]
    fn empty_log_has_no_last_index() {
        let log = Log::new();
        assert!(log.is_empty());
        assert_eq!(log.last_index(), None);
        assert_eq!(log.last_term(), 0);
        assert_eq!(log.next_index(), 0);
    }

    #[test]
    fn append_returns_zero_based_indices() {
        let mut log = Log::new();
        assert_eq!(log.append(entry(1, 0)), 0);
        assert_eq!(log.append(entry(2, 1)), 1);
        assert_eq!(log.last_index(), Some(1));
        assert_eq!(log.last_term(), 2);
        assert_eq!(log.get(0).map(|e| e.term), Some(1));
        assert!(log.get(5).is_none());
    }

    #[test]
    fn commit_through_clamps_to_tail() {
        let mut log = Log::new();
        for i in 0..3 {
            log.append(entry(1, i));
        }
        assert_eq!(log.commit_through(10), Some(2));
        assert!(log.entries().iter().all(|e| e.committed));

        let mut empty = Log::new();
        assert_eq!(empty.commit_through(0), None);
    }

    #[test]
    fn apply_stops_at_first_uncommitted_entry() {
        let mut log = Log::new();
        for i in 0..4 {
            log.append(entry(1, i));
        }
        log.commit_through(1);
        assert_eq!(log.apply_committed(), Some(1));
        assert!(log.get(1).unwrap().applied);
        assert!(!log.get(2).unwrap().applied);
    }

    #[test]
    fn applied_entries_are_frozen() {
        let mut e = entry(1, 0);
        assert!(!e.apply(), "uncommitted entry must not apply");
        assert!(e.commit());
        assert!(e.apply());
        assert!(!e.commit());
        assert!(!e.apply());
    }

    #[test]
    fn info_reports_age() {
        let e = LogEntry::new(3, 7, "SET x", Duration::from_millis(100));
        let info = e.info(Duration::from_millis(350));
        assert_eq!(info.age_ms, 250);
        assert_eq!(info.command, "SET x");
        assert_eq!(info.index, 7);
    }
}
