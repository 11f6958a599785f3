//! The log is an external collaborator (§1): this crate only defines the boundary that
//! `FollowerStateLogic` drives. A concrete implementation lives in `raft-memstore`.

use async_trait::async_trait;

use crate::error::RaftResult;
use crate::types::LogEntry;
use crate::types::LogIndex;
use crate::types::LogPosition;

/// The log is conceptually owned by the replica and may only be mutated from the apply thread
/// (§5). All methods here are expected to be called from that single logical thread; the trait
/// does not itself enforce that — `ReplicaContext` does, by construction.
#[async_trait]
pub trait RaftLog: Send + Sync {
    /// Highest index currently stored. `0` for an empty log.
    fn last_index(&self) -> LogIndex;

    /// `(index, term)` of the last stored entry, or `(0, 0)` if the log is empty.
    fn last_position(&self) -> LogPosition;

    /// Fetch the entry at `index`, if present.
    async fn get(&self, index: LogIndex) -> RaftResult<Option<LogEntry>>;

    /// Truncate the log so nothing after `after_index` remains, then append `entries` in one
    /// call, starting at `after_index + 1`. If `after_index == last_index()`, this degrades to a
    /// pure append and no truncation occurs.
    async fn truncate_and_append(&self, after_index: LogIndex, entries: Vec<LogEntry>) -> RaftResult<()>;

    /// Whether this log implementation supports [`RaftLog::compact`]. Some log backends (e.g. a
    /// bounded in-memory ring used purely for tests) may not.
    fn compactable(&self) -> bool;

    /// An implementation-defined size signal compared against `Config::max_log_size` to decide
    /// whether to trigger compaction (§4.3).
    fn size(&self) -> u64;

    /// Atomically discard all entries up to and including `through_index`, replacing them with
    /// `snapshot` at that position. Compaction failures are fatal (§7).
    async fn compact(&self, through_index: LogIndex, snapshot: LogEntry) -> RaftResult<()>;
}
