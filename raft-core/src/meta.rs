//! §4.1 MetaStore — durable single-replica record of `<currentTerm, lastVote>` plus the latest
//! cluster `Configuration`.
//!
//! The metadata region (term + vote) is always disk-backed: Raft safety forbids losing it across
//! a crash. The configuration region may run at [`StorageLevel::Memory`] for volatile
//! deployments. A concrete file-backed implementation lives in `raft-memstore`; this crate only
//! defines the trait boundary plus an in-memory implementation used by this crate's own tests.

use async_trait::async_trait;

use crate::error::RaftResult;
use crate::types::Configuration;
use crate::types::NodeId;
use crate::types::Term;

/// Durability level for the configuration region. The metadata region (term/vote) ignores this
/// setting and is always persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageLevel {
    /// Configuration is kept in memory only; lost on process restart.
    Memory,
    /// Configuration is written to the `.conf` file alongside the `.meta` file.
    Disk,
}

/// Persists `<currentTerm, lastVote>` and the latest `Configuration`.
///
/// Implementations MUST flush `store_term`/`store_vote` before returning, and callers MUST NOT
/// send an outgoing RPC response that depends on a stored value until the corresponding store
/// call has returned (§4.1 contract).
#[async_trait]
pub trait MetaStore: Send + Sync {
    /// Overwrite the term slot and flush. Any I/O failure is fatal (§7).
    async fn store_term(&self, term: Term) -> RaftResult<()>;

    /// Read the current term. Returns 0 if unwritten.
    async fn load_term(&self) -> RaftResult<Term>;

    /// Overwrite the vote slot and flush. `None` clears the vote.
    async fn store_vote(&self, node_id: Option<NodeId>) -> RaftResult<()>;

    /// Read the current vote, or `None` if absent.
    async fn load_vote(&self) -> RaftResult<Option<NodeId>>;

    /// Serialize and overwrite the configuration record, then flush.
    async fn store_configuration(&self, cfg: &Configuration) -> RaftResult<()>;

    /// Read the configuration record. Returns `None` if the presence byte is unset.
    async fn load_configuration(&self) -> RaftResult<Option<Configuration>>;
}

/// A `MetaStore` that never touches a filesystem. Used by `raft-core`'s own unit tests so that
/// `FollowerStateLogic` can be exercised without pulling in `raft-memstore`.
pub struct InMemoryMetaStore {
    inner: tokio::sync::Mutex<InMemoryMetaState>,
}

struct InMemoryMetaState {
    term: Term,
    vote: Option<NodeId>,
    config: Option<Configuration>,
}

impl InMemoryMetaStore {
    pub fn new() -> Self {
        Self {
            inner: tokio::sync::Mutex::new(InMemoryMetaState {
                term: 0,
                vote: None,
                config: None,
            }),
        }
    }
}

impl Default for InMemoryMetaStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetaStore for InMemoryMetaStore {
    async fn store_term(&self, term: Term) -> RaftResult<()> {
        let mut guard = self.inner.lock().await;
        guard.term = term;
        tracing::trace!(term, "meta store: term persisted");
        Ok(())
    }

    async fn load_term(&self) -> RaftResult<Term> {
        Ok(self.inner.lock().await.term)
    }

    async fn store_vote(&self, node_id: Option<NodeId>) -> RaftResult<()> {
        let mut guard = self.inner.lock().await;
        guard.vote = node_id;
        tracing::trace!(?node_id, "meta store: vote persisted");
        Ok(())
    }

    async fn load_vote(&self) -> RaftResult<Option<NodeId>> {
        Ok(self.inner.lock().await.vote)
    }

    async fn store_configuration(&self, cfg: &Configuration) -> RaftResult<()> {
        let mut guard = self.inner.lock().await;
        guard.config = Some(cfg.clone());
        Ok(())
    }

    async fn load_configuration(&self) -> RaftResult<Option<Configuration>> {
        Ok(self.inner.lock().await.config.clone())
    }
}
