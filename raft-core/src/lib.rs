//! Per-replica Raft consensus state: the pieces every implementation of this system must
//! reproduce bit-for-bit to stay interoperable and safe (§1).
//!
//! Scope:
//! - [`meta`] — §4.1 `MetaStore`.
//! - [`context`] — §4.2 `ReplicaContext`.
//! - [`follower`] — §4.3 `FollowerStateLogic`.
//! - [`clock`] — §4.4 `ReplicatedClock` & `Scheduler`.
//! - [`service`] — the seam replicated services (e.g. a distributed lock) plug into.
//!
//! Deliberately out of scope: on-disk log segment formats, the wire transport, cluster
//! membership gossip, leader election timing, and the replication/leader loops that drive a
//! multi-node cluster. Those are external collaborators specified only at their interface
//! boundary ([`log::RaftLog`], [`meta::MetaStore`], [`rpc`]).

pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod follower;
pub mod log;
pub mod meta;
pub mod rpc;
pub mod service;
pub mod types;

pub use clock::ReplicatedClock;
pub use clock::Scheduler;
pub use context::ReplicaContext;
pub use error::RaftError;
pub use error::RaftResult;
pub use follower::FollowerStateLogic;
pub use log::RaftLog;
pub use meta::MetaStore;
pub use service::ReplicatedService;
pub use service::ServiceDeps;
pub use service::ServiceRegistry;
pub use types::Configuration;
pub use types::LogEntry;
pub use types::LogIndex;
pub use types::LogPosition;
pub use types::NodeId;
pub use types::Term;
