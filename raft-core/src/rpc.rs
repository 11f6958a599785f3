//! Wire types for the three follower-side RPCs (§6).
//!
//! The ping and sync handlers perform the same "does my log agree with yours at this position"
//! check, but the wire fields keep distinct names (`logIndex`/`logTerm` vs.
//! `prevLogIndex`/`prevLogTerm`) rather than collapsing them into one shared struct, so an
//! interoperable peer implementation sees the same field names on both RPCs.

use serde::Deserialize;
use serde::Serialize;

use crate::types::LogEntry;
use crate::types::LogIndex;
use crate::types::NodeId;
use crate::types::Term;

/// A lightweight liveness/leader-learn probe; does not carry entries.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PingRequest {
    pub id: NodeId,
    pub term: Term,
    pub leader: Option<NodeId>,
    pub log_index: LogIndex,
    pub log_term: Term,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponse {
    pub id: NodeId,
    pub term: Term,
    pub accepted: bool,
}

/// Replicates log entries (§4.3 "Append (Sync)") and carries the leader's commit index.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncRequest {
    pub id: NodeId,
    pub term: Term,
    pub leader: Option<NodeId>,
    pub prev_log_index: LogIndex,
    pub prev_log_term: Term,
    pub entries: Vec<LogEntry>,
    pub commit_index: LogIndex,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub id: NodeId,
    pub term: Term,
    pub accepted: bool,
    pub last_index: LogIndex,
}

/// Gathers votes (§4.3 "Vote (Poll)").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollRequest {
    pub id: NodeId,
    pub term: Term,
    pub candidate: NodeId,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollResponse {
    pub id: NodeId,
    pub term: Term,
    pub granted: bool,
}
