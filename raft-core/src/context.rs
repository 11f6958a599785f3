//! §4.2 ReplicaContext — the in-memory state of one Raft replica.
//!
//! Everything outside this crate's scope (networking, replication streams,
//! election/candidate/leader loops) is absent. What remains is the coherent record
//! `FollowerStateLogic` reads and writes.

use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::ReplicatedClock;
use crate::clock::Scheduler;
use crate::config::Config;
use crate::error::RaftError;
use crate::error::RaftResult;
use crate::log::RaftLog;
use crate::meta::MetaStore;
use crate::service::EventSink;
use crate::service::ReplicatedService;
use crate::types::Configuration;
use crate::types::LogIndex;
use crate::types::NodeId;
use crate::types::Term;

/// One running instance of a registered service, addressed by the name it was registered under
/// (§6 "Per-service registration").
pub struct ServiceInstance {
    pub name: String,
    pub service: Box<dyn ReplicatedService>,
}

pub struct ReplicaContext {
    current_term: Term,
    current_leader: Option<NodeId>,
    voted_for: Option<NodeId>,
    commit_index: LogIndex,
    last_applied: LogIndex,

    cluster: Configuration,
    log: Arc<dyn RaftLog>,
    meta: Arc<dyn MetaStore>,
    services: HashMap<String, ServiceInstance>,
    config: Config,

    clock: ReplicatedClock,
    scheduler: Arc<Scheduler>,
    events: Arc<dyn EventSink>,
}

impl ReplicaContext {
    pub fn new(
        cluster: Configuration,
        log: Arc<dyn RaftLog>,
        meta: Arc<dyn MetaStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let clock = ReplicatedClock::new();
        let scheduler = Arc::new(Scheduler::new(clock.clone()));
        Self {
            current_term: 0,
            current_leader: None,
            voted_for: None,
            commit_index: 0,
            last_applied: 0,
            cluster,
            log,
            meta,
            services: HashMap::new(),
            config: Config::default(),
            clock,
            scheduler,
            events,
        }
    }

    /// Restore persisted `<term, vote>` and the latest configuration from `meta` on replica
    /// open. Does not touch the log or `last_applied`; the caller is expected to replay the log
    /// through its own mechanism.
    pub async fn load_from_meta(&mut self) -> RaftResult<()> {
        self.current_term = self.meta.load_term().await?;
        self.voted_for = self.meta.load_vote().await?;
        if let Some(cfg) = self.meta.load_configuration().await? {
            self.cluster = cfg;
        }
        Ok(())
    }

    /// Override the default [`Config`] (e.g. to set `max_log_size` for compaction tests).
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn current_term(&self) -> Term {
        self.current_term
    }

    pub fn current_leader(&self) -> Option<NodeId> {
        self.current_leader
    }

    pub fn voted_for(&self) -> Option<NodeId> {
        self.voted_for
    }

    pub fn commit_index(&self) -> LogIndex {
        self.commit_index
    }

    pub fn last_applied(&self) -> LogIndex {
        self.last_applied
    }

    pub fn cluster(&self) -> &Configuration {
        &self.cluster
    }

    pub fn log(&self) -> &Arc<dyn RaftLog> {
        &self.log
    }

    pub fn clock(&self) -> &ReplicatedClock {
        &self.clock
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    pub fn service_mut(&mut self, name: &str) -> Option<&mut Box<dyn ReplicatedService>> {
        self.services.get_mut(name).map(|instance| &mut instance.service)
    }

    pub fn register_service(&mut self, name: impl Into<String>, service: Box<dyn ReplicatedService>) {
        let name = name.into();
        self.services.insert(name.clone(), ServiceInstance { name, service });
    }

    pub fn services_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn ReplicatedService>> {
        self.services.values_mut().map(|instance| &mut instance.service)
    }

    /// Collect every registered service's [`ReplicatedService::backup`] into a single snapshot
    /// payload, keyed by service name. Returns `None` if no service has anything to persist,
    /// matching §4.3's "if non-null, wrap in a SnapshotEntry" compaction step.
    pub fn snapshot_services(&self) -> Option<Vec<u8>> {
        let mut combined: std::collections::BTreeMap<String, Vec<u8>> = std::collections::BTreeMap::new();
        for (name, instance) in self.services.iter() {
            if let Some(data) = instance.service.backup() {
                combined.insert(name.clone(), data);
            }
        }
        if combined.is_empty() {
            None
        } else {
            serde_json::to_vec(&combined).ok()
        }
    }

    /// Restore every registered service from a snapshot payload produced by
    /// [`ReplicaContext::snapshot_services`]. A malformed payload is a snapshot install failure
    /// (§7 "Fatal (abort replica)") and is propagated rather than swallowed.
    #[tracing::instrument(level = "trace", skip(self, data))]
    pub fn restore_services(&mut self, data: &[u8]) -> RaftResult<()> {
        let clock = self.clock.clone();
        let combined: std::collections::BTreeMap<String, Vec<u8>> = serde_json::from_slice(data).map_err(|err| {
            tracing::error!(error = %err, "snapshot payload is not a valid service map");
            RaftError::SnapshotInstallFailed(err.into())
        })?;
        for (name, instance) in self.services.iter_mut() {
            if let Some(payload) = combined.get(name) {
                instance.service.restore(payload, &clock);
            }
        }
        Ok(())
    }

    /// §4.2: setting the term persists through `MetaStore`; if the new term is strictly greater
    /// than the current one, the vote and leader are transparently cleared as part of the same
    /// call, not as a side effect the caller has to remember to perform.
    ///
    /// `currentTerm` is nondecreasing (§8): callers must never pass a term lower than the
    /// current one, and the debug assertion below makes a regression unrepresentable in test
    /// builds rather than merely unexercised.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn set_current_term(&mut self, term: Term) -> RaftResult<()> {
        debug_assert!(term >= self.current_term, "currentTerm must be nondecreasing");
        if term > self.current_term {
            self.current_term = term;
            self.voted_for = None;
            self.current_leader = None;
            self.meta.store_term(term).await?;
            self.meta.store_vote(None).await?;
        }
        Ok(())
    }

    /// §4.2: persists through `MetaStore`.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn set_voted_for(&mut self, node_id: Option<NodeId>) -> RaftResult<()> {
        self.voted_for = node_id;
        self.meta.store_vote(node_id).await
    }

    #[tracing::instrument(level = "trace", skip(self))]
    pub fn set_current_leader(&mut self, leader: Option<NodeId>) {
        self.current_leader = leader;
    }

    #[tracing::instrument(level = "trace", skip(self))]
    pub fn set_commit_index(&mut self, index: LogIndex) {
        debug_assert!(index <= self.log.last_index(), "commit index must not exceed log.lastIndex");
        self.commit_index = index;
    }

    #[tracing::instrument(level = "trace", skip(self))]
    pub fn set_last_applied(&mut self, index: LogIndex) {
        debug_assert_eq!(
            index,
            self.last_applied + 1,
            "lastApplied must advance by exactly one per apply"
        );
        self.last_applied = index;
    }

    #[tracing::instrument(level = "trace", skip(self, cfg))]
    pub async fn set_cluster(&mut self, cfg: Configuration) -> RaftResult<()> {
        self.cluster = cfg.clone();
        self.meta.store_configuration(&cfg).await
    }
}
