//! An in-memory [`RaftLog`] that supports compaction (§4.3 "Compaction"). Entries before the
//! compaction point are discarded and replaced by a single synthetic snapshot marker at that
//! index: checkpoint the state machine, then discard the log prefix it covers.

use std::sync::Mutex;

use async_trait::async_trait;
use raft_core::error::RaftError;
use raft_core::error::RaftResult;
use raft_core::log::RaftLog;
use raft_core::types::LogEntry;
use raft_core::types::LogIndex;
use raft_core::types::LogPosition;

struct MemLogState {
    /// `base_index` is the index of the last entry folded into `entries[0]` when a snapshot is
    /// present, i.e. `entries[i]` lives at log index `base_index + i + 1`.
    base_index: LogIndex,
    base_term: u64,
    entries: Vec<LogEntry>,
}

/// An in-memory log backing `raft-core`'s and `lock-service`'s integration tests.
pub struct MemLog {
    state: Mutex<MemLogState>,
}

impl MemLog {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemLogState {
                base_index: 0,
                base_term: 0,
                entries: Vec::new(),
            }),
        }
    }

    fn to_local(state: &MemLogState, index: LogIndex) -> Option<usize> {
        if index <= state.base_index {
            return None;
        }
        let local = (index - state.base_index - 1) as usize;
        if local < state.entries.len() {
            Some(local)
        } else {
            None
        }
    }
}

impl Default for MemLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RaftLog for MemLog {
    fn last_index(&self) -> LogIndex {
        let state = self.state.lock().unwrap();
        state.base_index + state.entries.len() as LogIndex
    }

    fn last_position(&self) -> LogPosition {
        let state = self.state.lock().unwrap();
        match state.entries.last() {
            Some(entry) => LogPosition::new(state.base_index + state.entries.len() as LogIndex, entry.term()),
            None => LogPosition::new(state.base_index, state.base_term),
        }
    }

    async fn get(&self, index: LogIndex) -> RaftResult<Option<LogEntry>> {
        let state = self.state.lock().unwrap();
        Ok(Self::to_local(&state, index).map(|i| state.entries[i].clone()))
    }

    async fn truncate_and_append(&self, after_index: LogIndex, new_entries: Vec<LogEntry>) -> RaftResult<()> {
        let mut state = self.state.lock().unwrap();
        let keep = (after_index.saturating_sub(state.base_index)) as usize;
        state.entries.truncate(keep.min(state.entries.len()));
        state.entries.extend(new_entries);
        Ok(())
    }

    fn compactable(&self) -> bool {
        true
    }

    fn size(&self) -> u64 {
        self.state.lock().unwrap().entries.len() as u64
    }

    async fn compact(&self, through_index: LogIndex, snapshot: LogEntry) -> RaftResult<()> {
        let mut state = self.state.lock().unwrap();
        if through_index <= state.base_index {
            return Ok(());
        }
        let local = Self::to_local(&state, through_index)
            .ok_or_else(|| RaftError::CompactionFailed(anyhow::anyhow!("compact index {through_index} out of range")))?;
        let remaining = state.entries.split_off(local + 1);
        state.entries = remaining;
        state.base_index = through_index;
        state.base_term = snapshot.term();
        Ok(())
    }
}
