//! The seam `FollowerStateLogic` calls into for every `LogEntry::Command` it applies.
//!
//! §6 ("Per-service registration") generalizes a single built-in state machine into a
//! name-addressable registry so a replica can host more than one deterministic service
//! (`"LOCK"`, `"CONSISTENT_MAP"`, ...) side by side, each instantiated through a factory keyed
//! by name.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::clock::ReplicatedClock;
use crate::clock::Scheduler;
use crate::types::LogIndex;

/// A client identity with lifecycle events `open`, `expire`, `close` (glossary). The unit of
/// ownership for anything a replicated service grants exclusively to one client, such as a lock
/// holder.
pub type SessionId = u64;

/// Errors a service's `apply` may report. `FollowerStateLogic` logs this and still advances
/// `lastApplied` by exactly one — it never propagates the error further.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("unknown command {command:?} for service")]
    UnknownCommand { command: String },

    #[error("{0}")]
    Other(String),
}

/// Context handed to a service on every command application: the replicated clock, the log
/// index the command was assigned, and the session that issued it.
pub struct ApplyContext<'a> {
    pub index: LogIndex,
    pub session: SessionId,
    pub clock: &'a ReplicatedClock,
}

/// A side-channel event emitted by a service to a specific client session. Delivered strictly
/// after any in-flight response to the triggering command (§4.5, §6).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceEvent {
    pub session: SessionId,
    pub name: String,
    pub payload: Vec<u8>,
}

/// Sink services publish events into. `ReplicaContext` wires a concrete implementation of this
/// to whatever transport delivers events to clients; out of scope here beyond the interface.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: ServiceEvent);
}

/// A deterministic replicated service hosted atop the Raft log (§4.5 is one instance of this:
/// `LockService`).
///
/// Every method here runs on the single apply thread (§5); no internal locking is required
/// between a service's command handlers and its own timers, because both are driven from that
/// same thread.
#[async_trait]
pub trait ReplicatedService: Send {
    /// Apply one command. Never returns `Err` for a malformed *client* request — that case is
    /// the service's job to translate into a [`ServiceEvent`] (e.g. `LockService`'s `FAILED`);
    /// `Err` here models a genuine service bug and is swallowed by the caller per §9.
    async fn apply(&mut self, command: &str, args: &[u8], ctx: ApplyContext<'_>) -> Result<(), ServiceError>;

    /// Called when a session is observed to have expired.
    fn on_session_expire(&mut self, session: SessionId, ctx: ApplyContext<'_>);

    /// Called when a session is closed by its owner.
    fn on_session_close(&mut self, session: SessionId, ctx: ApplyContext<'_>);

    /// Serialize this service's state for a snapshot. `None` means there is nothing to persist.
    fn backup(&self) -> Option<Vec<u8>>;

    /// Restore this service's state from a previous [`ReplicatedService::backup`] payload.
    /// Implementations must cancel and rebuild any outstanding timers from the restored state
    /// rather than relying on the pre-restore timer set (§4.4, §4.5).
    fn restore(&mut self, data: &[u8], clock: &ReplicatedClock);
}

/// Constructor arguments every registered service gets: the replica's replicated clock, its
/// timer scheduler, and the sink it publishes client-visible events to.
pub struct ServiceDeps {
    pub clock: ReplicatedClock,
    pub scheduler: Arc<Scheduler>,
    pub events: Arc<dyn EventSink>,
}

type ServiceFactory = Box<dyn Fn(ServiceDeps) -> Box<dyn ReplicatedService> + Send + Sync>;

/// Maps a stable service name (§6, e.g. `"LOCK"`) to a factory producing a fresh instance.
#[derive(Default)]
pub struct ServiceRegistry {
    factories: HashMap<String, ServiceFactory>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a factory under `name`. Registering the same name twice replaces the prior
    /// factory.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(ServiceDeps) -> Box<dyn ReplicatedService> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    /// Instantiate a fresh service instance for `name`, if registered.
    pub fn create(&self, name: &str, deps: ServiceDeps) -> Option<Box<dyn ReplicatedService>> {
        self.factories.get(name).map(|factory| factory(deps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopService;

    #[async_trait]
    impl ReplicatedService for NoopService {
        async fn apply(&mut self, _command: &str, _args: &[u8], _ctx: ApplyContext<'_>) -> Result<(), ServiceError> {
            Ok(())
        }

        fn on_session_expire(&mut self, _session: SessionId, _ctx: ApplyContext<'_>) {}
        fn on_session_close(&mut self, _session: SessionId, _ctx: ApplyContext<'_>) {}
        fn backup(&self) -> Option<Vec<u8>> {
            None
        }
        fn restore(&mut self, _data: &[u8], _clock: &ReplicatedClock) {}
    }

    struct NullSink;
    impl EventSink for NullSink {
        fn publish(&self, _event: ServiceEvent) {}
    }

    #[test]
    fn registry_creates_a_fresh_instance_per_call() {
        let mut registry = ServiceRegistry::new();
        registry.register("NOOP", |_deps| Box::new(NoopService) as Box<dyn ReplicatedService>);

        let clock = ReplicatedClock::new();
        let scheduler = Arc::new(Scheduler::new(clock.clone()));
        let events: Arc<dyn EventSink> = Arc::new(NullSink);

        let deps = ServiceDeps {
            clock: clock.clone(),
            scheduler: scheduler.clone(),
            events: events.clone(),
        };
        assert!(registry.create("NOOP", deps).is_some());
        assert!(registry
            .create("MISSING", ServiceDeps { clock, scheduler, events })
            .is_none());
    }
}
