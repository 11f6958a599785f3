//! Shared test doubles: a minimal in-memory log and a no-op event sink, just enough to exercise
//! `FollowerStateLogic` end to end without pulling in `raft-memstore`.

use async_trait::async_trait;
use raft_core::error::RaftResult;
use raft_core::log::RaftLog;
use raft_core::service::ServiceEvent;
use raft_core::types::LogEntry;
use raft_core::types::LogIndex;
use raft_core::types::LogPosition;
use std::sync::Mutex;

pub struct VecLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl VecLog {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn with_entries(entries: Vec<LogEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
        }
    }
}

#[async_trait]
impl RaftLog for VecLog {
    fn last_index(&self) -> LogIndex {
        self.entries.lock().unwrap().len() as LogIndex
    }

    fn last_position(&self) -> LogPosition {
        let entries = self.entries.lock().unwrap();
        match entries.last() {
            Some(entry) => LogPosition::new(entries.len() as LogIndex, entry.term()),
            None => LogPosition::ZERO,
        }
    }

    async fn get(&self, index: LogIndex) -> RaftResult<Option<LogEntry>> {
        if index == 0 {
            return Ok(None);
        }
        Ok(self.entries.lock().unwrap().get(index as usize - 1).cloned())
    }

    async fn truncate_and_append(&self, after_index: LogIndex, new_entries: Vec<LogEntry>) -> RaftResult<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.truncate(after_index as usize);
        entries.extend(new_entries);
        Ok(())
    }

    fn compactable(&self) -> bool {
        false
    }

    fn size(&self) -> u64 {
        self.entries.lock().unwrap().len() as u64
    }

    async fn compact(&self, _through_index: LogIndex, _snapshot: LogEntry) -> RaftResult<()> {
        Ok(())
    }
}

pub struct NullEventSink;

impl raft_core::service::EventSink for NullEventSink {
    fn publish(&self, _event: ServiceEvent) {}
}
