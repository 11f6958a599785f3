//! Lock grant/release state machine, session-scoped fairness, and replicated timers.
//!
//! Every timer scheduled here fires synchronously from `Scheduler::fire_due`, called by
//! `FollowerStateLogic::apply_one` on the apply path as the replicated clock advances — never
//! from a backgrounded wall-clock sleep. State still lives behind a `Mutex` rather than relying
//! purely on the apply thread's implicit exclusivity, matching the teacher's own
//! interior-mutability idiom for state shared between a command handler and its callbacks; it is
//! never contended, since both only ever run on the single apply thread.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use raft_core::clock::ReplicatedClock;
use raft_core::clock::Scheduler;
use raft_core::service::ApplyContext;
use raft_core::service::EventSink;
use raft_core::service::ReplicatedService;
use raft_core::service::ServiceError;
use raft_core::service::ServiceEvent;
use raft_core::service::SessionId;
use raft_core::types::LogIndex;
use serde::Deserialize;
use serde::Serialize;

/// §3 LockHolder: `expire == 0` means no expiration; `expire > 0` is an absolute replicated
/// timestamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub id: u32,
    pub index: LogIndex,
    pub session: SessionId,
    pub expire: i64,
}

#[derive(Default, Serialize, Deserialize)]
struct LockState {
    current_holder: Option<LockHolder>,
    wait_queue: VecDeque<LockHolder>,
}

#[derive(Serialize, Deserialize)]
struct LockArgs {
    id: u32,
    timeout_ms: i64,
}

#[derive(Serialize, Deserialize)]
struct UnlockArgs {
    id: u32,
}

#[derive(Serialize, Deserialize)]
struct LockEventPayload {
    id: u32,
    index: LogIndex,
}

/// A distributed lock hosted atop the Raft apply path. Registered under the service name
/// `"LOCK"` (§6 "Per-service registration").
pub struct LockService {
    state: Arc<Mutex<LockState>>,
    clock: ReplicatedClock,
    scheduler: Arc<Scheduler>,
    events: Arc<dyn EventSink>,
}

impl LockService {
    pub fn new(clock: ReplicatedClock, scheduler: Arc<Scheduler>, events: Arc<dyn EventSink>) -> Self {
        Self {
            state: Arc::new(Mutex::new(LockState::default())),
            clock,
            scheduler,
            events,
        }
    }

    fn publish(&self, session: SessionId, name: &str, id: u32, index: LogIndex) {
        let payload = serde_json::to_vec(&LockEventPayload { id, index }).unwrap_or_default();
        self.events.publish(ServiceEvent {
            session,
            name: name.to_string(),
            payload,
        });
    }

    #[tracing::instrument(level = "trace", skip(self, ctx))]
    fn lock(&self, ctx: &ApplyContext<'_>, id: u32, timeout_ms: i64) {
        let mut state = self.state.lock().unwrap();

        if state.current_holder.is_none() {
            state.current_holder = Some(LockHolder {
                id,
                index: ctx.index,
                session: ctx.session,
                expire: 0,
            });
            drop(state);
            self.publish(ctx.session, "LOCKED", id, ctx.index);
            return;
        }

        if timeout_ms == 0 {
            drop(state);
            self.publish(ctx.session, "FAILED", id, ctx.index);
            return;
        }

        if timeout_ms > 0 {
            let expire = ctx.clock.now() + timeout_ms;
            let holder = LockHolder {
                id,
                index: ctx.index,
                session: ctx.session,
                expire,
            };
            state.wait_queue.push_back(holder);
            drop(state);
            self.schedule_expiry(holder, expire);
            return;
        }

        // timeout_ms < 0: wait forever, no expiration.
        state.wait_queue.push_back(LockHolder {
            id,
            index: ctx.index,
            session: ctx.session,
            expire: 0,
        });
    }

    /// Schedule a timer under `holder.index`, due once the replicated clock reaches
    /// `due_at_ms`; on fire, remove the holder (if still queued) and publish `FAILED` to its
    /// session. A holder already granted or released before the timer fires was already dropped
    /// from the queue, so the lookup below is a no-op.
    fn schedule_expiry(&self, holder: LockHolder, due_at_ms: i64) {
        let state = self.state.clone();
        let events = self.events.clone();
        let index = holder.index;
        self.scheduler.schedule_at(index, due_at_ms, move || {
            let mut state = state.lock().unwrap();
            if let Some(pos) = state.wait_queue.iter().position(|h| h.index == index) {
                let holder = state.wait_queue.remove(pos).unwrap();
                drop(state);
                let payload = serde_json::to_vec(&LockEventPayload {
                    id: holder.id,
                    index: holder.index,
                })
                .unwrap_or_default();
                events.publish(ServiceEvent {
                    session: holder.session,
                    name: "FAILED".to_string(),
                    payload,
                });
            }
        });
    }

    #[tracing::instrument(level = "trace", skip(self, ctx))]
    fn unlock(&self, ctx: &ApplyContext<'_>, id: u32) {
        let mut state = self.state.lock().unwrap();

        match &state.current_holder {
            Some(holder) if holder.session == ctx.session && holder.id == id => {}
            _ => return,
        }

        self.grant_next(&mut state, ctx.index);
    }

    /// §4.5 "grant next from queue": the queue holds only holders from sessions that have not
    /// yet been released by `onExpire`/`onClose`, so the first entry is always the next live
    /// waiter — no separate liveness re-check is needed here.
    #[tracing::instrument(level = "trace", skip(self, state))]
    fn grant_next(&self, state: &mut LockState, trigger_index: LogIndex) {
        match state.wait_queue.pop_front() {
            Some(next) => {
                self.scheduler.cancel(next.index);
                let granted = LockHolder { expire: 0, ..next };
                let session = granted.session;
                let id = granted.id;
                state.current_holder = Some(granted);
                self.publish(session, "LOCKED", id, trigger_index);
            }
            None => {
                state.current_holder = None;
            }
        }
    }

    #[tracing::instrument(level = "trace", skip(self))]
    fn release_session(&self, session: SessionId, trigger_index: LogIndex) {
        let mut state = self.state.lock().unwrap();

        state.wait_queue.retain(|h| {
            if h.session == session {
                self.scheduler.cancel(h.index);
                false
            } else {
                true
            }
        });

        let holder_released = matches!(&state.current_holder, Some(h) if h.session == session);
        if holder_released {
            self.grant_next(&mut state, trigger_index);
        }
    }
}

#[async_trait]
impl ReplicatedService for LockService {
    #[tracing::instrument(level = "trace", skip(self, args, ctx))]
    async fn apply(&mut self, command: &str, args: &[u8], ctx: ApplyContext<'_>) -> Result<(), ServiceError> {
        match command {
            "lock" => {
                let parsed: LockArgs = serde_json::from_slice(args)
                    .map_err(|e| ServiceError::Other(format!("malformed lock args: {e}")))?;
                self.lock(&ctx, parsed.id, parsed.timeout_ms);
                Ok(())
            }
            "unlock" => {
                let parsed: UnlockArgs = serde_json::from_slice(args)
                    .map_err(|e| ServiceError::Other(format!("malformed unlock args: {e}")))?;
                self.unlock(&ctx, parsed.id);
                Ok(())
            }
            other => Err(ServiceError::UnknownCommand {
                command: other.to_string(),
            }),
        }
    }

    #[tracing::instrument(level = "trace", skip(self, ctx))]
    fn on_session_expire(&mut self, session: SessionId, ctx: ApplyContext<'_>) {
        self.release_session(session, ctx.index);
    }

    #[tracing::instrument(level = "trace", skip(self, ctx))]
    fn on_session_close(&mut self, session: SessionId, ctx: ApplyContext<'_>) {
        self.release_session(session, ctx.index);
    }

    fn backup(&self) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        if state.current_holder.is_none() && state.wait_queue.is_empty() {
            return None;
        }
        serde_json::to_vec(&*state).ok()
    }

    #[tracing::instrument(level = "trace", skip(self, data, _clock))]
    fn restore(&mut self, data: &[u8], _clock: &ReplicatedClock) {
        self.scheduler.cancel_all();

        let restored: LockState = match serde_json::from_slice(data) {
            Ok(s) => s,
            Err(err) => {
                tracing::error!(error = %err, "lock service snapshot payload is malformed");
                return;
            }
        };

        for holder in restored.wait_queue.iter() {
            if holder.expire > 0 {
                // `expire` is already an absolute replicated timestamp (§3); reschedule at that
                // same due time rather than recomputing a duration against the current clock, so
                // a timer that was already overdue at restore time fires on the very next apply.
                self.schedule_expiry(*holder, holder.expire);
            }
        }

        *self.state.lock().unwrap() = restored;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingSink {
        events: StdMutex<Vec<ServiceEvent>>,
    }

    impl EventSink for RecordingSink {
        fn publish(&self, event: ServiceEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn new_service() -> (LockService, Arc<RecordingSink>, ReplicatedClock, Arc<Scheduler>) {
        let clock = ReplicatedClock::new();
        let scheduler = Arc::new(Scheduler::new(clock.clone()));
        let sink = Arc::new(RecordingSink::default());
        let service = LockService::new(clock.clone(), scheduler.clone(), sink.clone());
        (service, sink, clock, scheduler)
    }

    fn lock_args(id: u32, timeout_ms: i64) -> Vec<u8> {
        serde_json::to_vec(&LockArgs { id, timeout_ms }).unwrap()
    }

    fn unlock_args(id: u32) -> Vec<u8> {
        serde_json::to_vec(&UnlockArgs { id }).unwrap()
    }

    #[tokio::test]
    async fn scenario_4_free_lock_grants_immediately() {
        let (mut service, sink, clock, _scheduler) = new_service();
        clock.advance_to(1000);

        let ctx = ApplyContext {
            index: 100,
            session: 7,
            clock: &clock,
        };
        service.apply("lock", &lock_args(1, 5000), ctx).await.unwrap();

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].session, 7);
        assert_eq!(events[0].name, "LOCKED");
        let payload: LockEventPayload = serde_json::from_slice(&events[0].payload).unwrap();
        assert_eq!(payload.id, 1);
        assert_eq!(payload.index, 100);
    }

    #[tokio::test]
    async fn scenario_5_timeout_fires_failed_and_empties_queue() {
        let (mut service, sink, clock, scheduler) = new_service();
        clock.advance_to(1000);
        service
            .apply(
                "lock",
                &lock_args(1, 5000),
                ApplyContext {
                    index: 100,
                    session: 7,
                    clock: &clock,
                },
            )
            .await
            .unwrap();

        clock.advance_to(1500);
        service
            .apply(
                "lock",
                &lock_args(2, 2000),
                ApplyContext {
                    index: 101,
                    session: 8,
                    clock: &clock,
                },
            )
            .await
            .unwrap();

        // The real production path for this fire is `FollowerStateLogic::apply_one`: it advances
        // the clock to a later command's timestamp and then calls `Scheduler::fire_due` with
        // that same reading. Drive the scheduler the same way here, at the timer's due time
        // (clock 1500 + timeout 2000 = 3500), rather than waiting on real wall-clock time.
        clock.advance_to(3500);
        scheduler.fire_due(clock.now());

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].session, 8);
        assert_eq!(events[1].name, "FAILED");
        let payload: LockEventPayload = serde_json::from_slice(&events[1].payload).unwrap();
        assert_eq!(payload.id, 2);
        assert_eq!(payload.index, 101);

        let state = service.state.lock().unwrap();
        assert!(state.wait_queue.is_empty());
    }

    #[tokio::test]
    async fn scenario_6_session_close_grants_next_waiter() {
        let (mut service, sink, clock, _scheduler) = new_service();
        clock.advance_to(1000);
        service
            .apply(
                "lock",
                &lock_args(1, 5000),
                ApplyContext {
                    index: 100,
                    session: 7,
                    clock: &clock,
                },
            )
            .await
            .unwrap();
        service
            .apply(
                "lock",
                &lock_args(2, -1),
                ApplyContext {
                    index: 101,
                    session: 8,
                    clock: &clock,
                },
            )
            .await
            .unwrap();

        service.on_session_close(
            7,
            ApplyContext {
                index: 102,
                session: 7,
                clock: &clock,
            },
        );

        let state = service.state.lock().unwrap();
        let holder = state.current_holder.expect("session 8 should now hold the lock");
        assert_eq!(holder.id, 2);
        assert_eq!(holder.session, 8);
        assert_eq!(holder.index, 101);
        assert_eq!(holder.expire, 0);
        drop(state);

        let events = sink.events.lock().unwrap();
        assert_eq!(events.last().unwrap().session, 8);
        assert_eq!(events.last().unwrap().name, "LOCKED");
    }

    #[tokio::test]
    async fn try_lock_on_held_lock_publishes_failed_not_locked() {
        let (mut service, sink, clock, _scheduler) = new_service();
        service
            .apply(
                "lock",
                &lock_args(1, 5000),
                ApplyContext {
                    index: 1,
                    session: 1,
                    clock: &clock,
                },
            )
            .await
            .unwrap();
        service
            .apply(
                "lock",
                &lock_args(2, 0),
                ApplyContext {
                    index: 2,
                    session: 2,
                    clock: &clock,
                },
            )
            .await
            .unwrap();

        let events = sink.events.lock().unwrap();
        assert_eq!(events[1].name, "FAILED");
        assert_eq!(events[1].session, 2);
    }

    #[tokio::test]
    async fn unlock_by_non_holder_session_is_ignored() {
        let (mut service, sink, clock, _scheduler) = new_service();
        service
            .apply(
                "lock",
                &lock_args(1, 5000),
                ApplyContext {
                    index: 1,
                    session: 1,
                    clock: &clock,
                },
            )
            .await
            .unwrap();
        service
            .apply(
                "unlock",
                &unlock_args(1),
                ApplyContext {
                    index: 2,
                    session: 99,
                    clock: &clock,
                },
            )
            .await
            .unwrap();

        let state = service.state.lock().unwrap();
        assert_eq!(state.current_holder.unwrap().session, 1);
        drop(state);
        assert_eq!(sink.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn backup_restore_round_trip_preserves_queue_and_reschedules_timer() {
        let (mut service, sink, clock, _scheduler) = new_service();
        clock.advance_to(1000);
        service
            .apply(
                "lock",
                &lock_args(1, 5000),
                ApplyContext {
                    index: 1,
                    session: 1,
                    clock: &clock,
                },
            )
            .await
            .unwrap();
        service
            .apply(
                "lock",
                &lock_args(2, 1000),
                ApplyContext {
                    index: 2,
                    session: 2,
                    clock: &clock,
                },
            )
            .await
            .unwrap();

        let data = service.backup().expect("non-empty state must back up");

        let (mut restored, restored_sink, restored_clock, restored_scheduler) = new_service();
        restored_clock.advance_to(1000);
        restored.restore(&data, &restored_clock);

        {
            let state = restored.state.lock().unwrap();
            assert_eq!(state.current_holder.unwrap().id, 1);
            assert_eq!(state.wait_queue.len(), 1);
            assert_eq!(state.wait_queue[0].id, 2);
        }

        // Holder 2's restored `expire` is an absolute replicated timestamp (clock 1000 + timeout
        // 1000 = 2000). Drive the scheduler the way `FollowerStateLogic::apply_one` would on the
        // next command whose timestamp reaches that point, instead of waiting on real time.
        restored_clock.advance_to(2000);
        restored_scheduler.fire_due(restored_clock.now());

        let events = restored_sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "FAILED");
        assert_eq!(events[0].session, 2);

        let _ = sink;
    }
}
