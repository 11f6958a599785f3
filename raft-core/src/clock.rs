//! §4.4 ReplicatedClock & Scheduler.
//!
//! The clock's `now()` is the wall-time stamp assigned to the *current command* by the leader
//! and replicated with it — never `std::time::Instant::now()` or `SystemTime::now()`. All
//! service code that consults time (lock timeouts, for instance) must read this value instead of
//! the host clock, so that every replica reaches the same decision when applying the same
//! command.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use crate::types::LogIndex;

/// A deterministic time source advanced only from the apply path. Cheap to clone; every clone
/// shares the same underlying counter.
#[derive(Clone)]
pub struct ReplicatedClock {
    now_ms: Arc<AtomicI64>,
}

impl ReplicatedClock {
    pub fn new() -> Self {
        Self {
            now_ms: Arc::new(AtomicI64::new(0)),
        }
    }

    /// The replicated-time stamp of the command currently being applied.
    pub fn now(&self) -> i64 {
        self.now_ms.load(Ordering::Acquire)
    }

    /// Advance the clock to the stamp carried by the command about to be applied.
    ///
    /// Only `FollowerStateLogic::apply_entry` is expected to call this in a running replica;
    /// it is `pub` rather than `pub(crate)` so that hosted services can drive the clock directly
    /// in their own unit tests. The clock must never move backwards within a single replica's
    /// apply stream, matching the leader's own monotonic stamping of commands.
    pub fn advance_to(&self, timestamp_ms: i64) {
        let prev = self.now_ms.load(Ordering::Acquire);
        if timestamp_ms > prev {
            self.now_ms.store(timestamp_ms, Ordering::Release);
        }
    }
}

impl Default for ReplicatedClock {
    fn default() -> Self {
        Self::new()
    }
}

/// A callback scheduled against the replicated clock, keyed by the log index of the command that
/// created it so it can be canceled by index (§5 "Cancellation & timeout semantics").
struct ScheduledTimer {
    due_at_ms: i64,
    callback: Box<dyn FnOnce() + 'static>,
}

/// Schedules callbacks at an absolute replicated timestamp, or a duration relative to `now()`.
///
/// Firing is driven entirely by [`Scheduler::fire_due`], called from
/// `FollowerStateLogic::apply_one` immediately after it advances the replicated clock for a
/// command entry. There is no backgrounded wall-clock timer: a scheduled callback only ever
/// fires synchronously, on the apply path, as part of the apply call whose command timestamp
/// first reaches or passes the callback's due time. This is what makes timer fires deterministic
/// across replicas (§1, §4.4) — every replica applies the same log in the same order and so
/// reaches the same due timers at the same point, rather than racing a real wall-clock sleep
/// against the next command's arrival. A replica that never applies a later-timestamped command
/// simply never observes the timeout as fired, which is correct: nothing about real time has
/// passed from the replicated state machine's point of view.
pub struct Scheduler {
    clock: ReplicatedClock,
    timers: Mutex<BTreeMap<LogIndex, ScheduledTimer>>,
}

impl Scheduler {
    pub fn new(clock: ReplicatedClock) -> Self {
        Self {
            clock,
            timers: Mutex::new(BTreeMap::new()),
        }
    }

    /// Schedule `callback` to fire once the replicated clock reaches `due_at_ms`, tracked under
    /// `index` so it can later be canceled via [`Scheduler::cancel`]. Registering a new timer
    /// under an `index` that already has one replaces it.
    ///
    /// No `Send` bound is required on `callback`: every timer fires on the same single-threaded
    /// apply context as the replicated command stream (§4.4), never on a separate task.
    pub fn schedule_at<F>(&self, index: LogIndex, due_at_ms: i64, callback: F)
    where
        F: FnOnce() + 'static,
    {
        let mut timers = self.timers.lock().unwrap();
        timers.insert(
            index,
            ScheduledTimer {
                due_at_ms,
                callback: Box::new(callback),
            },
        );
    }

    /// Cancel the timer scheduled under `index`, if any. A canceled timer never fires.
    pub fn cancel(&self, index: LogIndex) {
        self.timers.lock().unwrap().remove(&index);
    }

    /// Cancel every outstanding timer. Used on snapshot restore (§4.4, §4.5): implementations
    /// must not rely on the previous timer set surviving a restore.
    pub fn cancel_all(&self) {
        self.timers.lock().unwrap().clear();
    }

    /// Fire every timer whose `due_at_ms <= now_ms`, in ascending log-index order, removing each
    /// one before invoking its callback so a callback that reschedules under the same index
    /// doesn't immediately retrigger itself. Called once per command apply, right after
    /// `ReplicatedClock::advance_to` — never from a spawned task — so a fire can never interleave
    /// with command application on the same replica (§5).
    pub fn fire_due(&self, now_ms: i64) {
        loop {
            let next = {
                let timers = self.timers.lock().unwrap();
                timers
                    .iter()
                    .find(|(_, timer)| timer.due_at_ms <= now_ms)
                    .map(|(&index, _)| index)
            };
            let Some(index) = next else { break };
            let timer = self.timers.lock().unwrap().remove(&index);
            if let Some(timer) = timer {
                (timer.callback)();
            }
        }
    }

    pub fn clock(&self) -> &ReplicatedClock {
        &self.clock
    }
}
