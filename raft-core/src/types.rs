//! Core Raft data types shared by every component in this crate.

use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Opaque identity of a cluster member.
pub type NodeId = u64;

/// 1-based position within the replicated log. The empty log has `lastIndex = 0`.
pub type LogIndex = u64;

/// Raft logical epoch. Unbounded, monotonically nondecreasing once observed.
pub type Term = u64;

/// A `(index, term)` pair identifying a position in the replicated log.
///
/// This is the same pairing the ping handler calls `logIndex`/`logTerm` and the sync handler
/// calls `prevLogIndex`/`prevLogTerm`; both wire types keep their own field names (see
/// `PingRequest`/`SyncRequest`) even though they carry one of these underneath.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogPosition {
    pub index: LogIndex,
    pub term: Term,
}

impl LogPosition {
    pub const ZERO: LogPosition = LogPosition { index: 0, term: 0 };

    pub fn new(index: LogIndex, term: Term) -> Self {
        Self { index, term }
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.index, self.term)
    }
}

/// Cluster membership: the set of known node ids plus this replica's own identity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub members: BTreeSet<NodeId>,
    pub this_node: NodeId,
}

impl Configuration {
    pub fn new_initial(this_node: NodeId) -> Self {
        let mut members = BTreeSet::new();
        members.insert(this_node);
        Self { members, this_node }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.members.contains(&id)
    }
}

/// A tagged Raft log entry. Closed sum type — every apply site must handle all four variants
/// exhaustively rather than dispatching on a runtime type tag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LogEntry {
    /// A user operation targeting a registered replicated service.
    Command {
        term: Term,
        /// The leader's wall-clock stamp at the moment this command was appended. This, not
        /// host time, is what `ReplicatedClock::now()` reads once the command is applied
        /// (§4.4): every replica that applies this entry observes the same timestamp.
        timestamp_ms: i64,
        /// The client session that issued this command (glossary: "Session").
        session: crate::service::SessionId,
        service: String,
        command: String,
        args: Vec<u8>,
    },
    /// A membership change.
    Configuration { term: Term, cluster_config: Configuration },
    /// Compacted state produced by log compaction.
    Snapshot {
        term: Term,
        cluster_config: Configuration,
        data: Vec<u8>,
    },
    /// A no-op marker. Advances `lastApplied` without side effects.
    NoOp { term: Term },
}

impl LogEntry {
    pub fn term(&self) -> Term {
        match self {
            LogEntry::Command { term, .. } => *term,
            LogEntry::Configuration { term, .. } => *term,
            LogEntry::Snapshot { term, .. } => *term,
            LogEntry::NoOp { term } => *term,
        }
    }
}
