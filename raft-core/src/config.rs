//! Runtime configuration consulted by `FollowerStateLogic`.
//!
//! Leader-election timing (§1 Non-goals) is deliberately absent: this crate never runs an
//! election loop, so there is no election-timeout knob here.

/// Tunables for the follower-side request handlers and log compaction.
#[derive(Clone, Debug)]
pub struct Config {
    /// Threshold (in the log implementation's own size units) above which
    /// [`crate::follower::FollowerStateLogic`] triggers compaction after an apply (§4.3
    /// "Compaction").
    pub max_log_size: u64,
}

impl Config {
    pub fn new(max_log_size: u64) -> Self {
        Self { max_log_size }
    }
}

impl Default for Config {
    fn default() -> Self {
        // A few thousand entries between snapshots is a reasonable default for a log
        // implementation that counts size in entries.
        Self { max_log_size: 5_000 }
    }
}
