//! §4.3 FollowerStateLogic — the pure request-handling logic shared by all non-leader roles.
//!
//! This is the heart of Raft safety: heartbeat/ping, append-entries/sync, and vote/poll, plus
//! the shared helpers (log truncation, commit advancement, snapshot install, compaction) they
//! drive. Candidate and Leader roles reuse these same handlers for inbound requests and run
//! their own election/replication loops on top, which is out of scope here (§1, §4.3 "State
//! machine").

use crate::context::ReplicaContext;
use crate::error::RaftError;
use crate::error::RaftResult;
use crate::rpc::PingRequest;
use crate::rpc::PingResponse;
use crate::rpc::PollRequest;
use crate::rpc::PollResponse;
use crate::rpc::SyncRequest;
use crate::rpc::SyncResponse;
use crate::service::ApplyContext;
use crate::types::LogEntry;
use crate::types::LogIndex;
use crate::types::LogPosition;

/// Wraps a [`ReplicaContext`] and exposes the three RPC handlers plus the apply/compaction
/// machinery they share. Stateless beyond what it borrows from the context: every call takes
/// `&mut ReplicaContext` and is meant to run on the replica's single apply thread (§5).
pub struct FollowerStateLogic;

/// Whether a handler's processing requires the owning role-state-machine to transition this
/// replica to Follower after the response has been produced (§4.3 "Transition marker"). Term
/// advance or learning of a new leader are the only triggers; the transition itself — driving
/// Candidate/Leader loops to stand down — is out of scope for this crate and is left to the
/// caller to act on.
pub type RequiresFollowerTransition = bool;

impl FollowerStateLogic {
    /// §4.3 Heartbeat / Ping.
    pub async fn handle_ping(
        ctx: &mut ReplicaContext,
        req: PingRequest,
    ) -> RaftResult<(PingResponse, RequiresFollowerTransition)> {
        let transition = Self::maybe_adopt_term_and_leader(ctx, req.term, req.leader).await?;

        if req.term < ctx.current_term() {
            return Ok((
                PingResponse {
                    id: req.id,
                    term: ctx.current_term(),
                    accepted: false,
                },
                transition,
            ));
        }

        let accepted = if req.log_index > 0 && req.log_term > 0 {
            Self::log_matches_at(ctx, req.log_index, req.log_term).await?
        } else {
            true
        };

        Ok((
            PingResponse {
                id: req.id,
                term: ctx.current_term(),
                accepted,
            },
            transition,
        ))
    }

    /// §4.3 Append (Sync).
    pub async fn handle_sync(
        ctx: &mut ReplicaContext,
        req: SyncRequest,
    ) -> RaftResult<(SyncResponse, RequiresFollowerTransition)> {
        let transition = Self::maybe_adopt_term_and_leader(ctx, req.term, req.leader).await?;

        if req.term < ctx.current_term() {
            return Ok((
                SyncResponse {
                    id: req.id,
                    term: ctx.current_term(),
                    accepted: false,
                    last_index: ctx.log().last_index(),
                },
                transition,
            ));
        }

        if req.prev_log_index > 0 && req.prev_log_term > 0 {
            let matches = Self::log_matches_at(ctx, req.prev_log_index, req.prev_log_term).await?;
            if !matches {
                return Ok((
                    SyncResponse {
                        id: req.id,
                        term: ctx.current_term(),
                        accepted: false,
                        last_index: ctx.log().last_index(),
                    },
                    transition,
                ));
            }
        }

        Self::append_with_conflict_resolution(ctx, req.prev_log_index, req.entries).await?;
        Self::advance_commit_and_apply(ctx, req.commit_index).await?;
        Self::maybe_compact(ctx).await?;

        Ok((
            SyncResponse {
                id: req.id,
                term: ctx.current_term(),
                accepted: true,
                last_index: ctx.log().last_index(),
            },
            transition,
        ))
    }

    /// §4.3 Vote (Poll). Clauses are evaluated in order; the first match wins.
    pub async fn handle_poll(ctx: &mut ReplicaContext, req: PollRequest) -> RaftResult<PollResponse> {
        if req.term > ctx.current_term() {
            ctx.set_current_term(req.term).await?;
            ctx.set_current_leader(None);
        }

        if req.term < ctx.current_term() {
            return Ok(PollResponse {
                id: req.id,
                term: ctx.current_term(),
                granted: false,
            });
        }

        if req.candidate == ctx.cluster().this_node {
            ctx.set_voted_for(Some(req.candidate)).await?;
            tracing::info!(term = req.term, candidate = req.candidate, "vote_cast");
            return Ok(PollResponse {
                id: req.id,
                term: ctx.current_term(),
                granted: true,
            });
        }

        if !ctx.cluster().contains(req.candidate) {
            return Ok(PollResponse {
                id: req.id,
                term: ctx.current_term(),
                granted: false,
            });
        }

        if let Some(voted_for) = ctx.voted_for() {
            if voted_for != req.candidate {
                return Ok(PollResponse {
                    id: req.id,
                    term: ctx.current_term(),
                    granted: false,
                });
            }
        }

        let local = ctx.log().last_position();
        let up_to_date = req.last_log_index >= local.index && req.last_log_term >= local.term;

        if up_to_date {
            ctx.set_voted_for(Some(req.candidate)).await?;
            tracing::info!(term = req.term, candidate = req.candidate, "vote_cast");
        } else {
            ctx.set_voted_for(None).await?;
        }

        Ok(PollResponse {
            id: req.id,
            term: ctx.current_term(),
            granted: up_to_date,
        })
    }

    /// Shared term-update step for ping and sync: adopt a higher term / learn a leader, and
    /// report whether the caller must drive this replica back to Follower afterwards.
    async fn maybe_adopt_term_and_leader(
        ctx: &mut ReplicaContext,
        req_term: u64,
        req_leader: Option<u64>,
    ) -> RaftResult<RequiresFollowerTransition> {
        let should_adopt = req_term > ctx.current_term() || (req_term == ctx.current_term() && ctx.current_leader().is_none());
        if should_adopt {
            ctx.set_current_term(req_term).await?;
            ctx.set_current_leader(req_leader);
            return Ok(true);
        }
        Ok(false)
    }

    /// The shared ping/sync "does my log agree at this position" check (§9 Open Question: same
    /// semantics, different wire names per caller).
    async fn log_matches_at(ctx: &ReplicaContext, index: LogIndex, term: u64) -> RaftResult<bool> {
        if index > ctx.log().last_index() {
            return Ok(false);
        }
        let entry = ctx.log().get(index).await?;
        Ok(matches!(entry, Some(e) if e.term() == term))
    }

    /// Conflict-resolution append (§4.3 step 4). Truncates at the first conflicting index and
    /// appends the remaining entries in one call; matching entries are not re-appended.
    async fn append_with_conflict_resolution(
        ctx: &mut ReplicaContext,
        prev_log_index: LogIndex,
        entries: Vec<LogEntry>,
    ) -> RaftResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut conflict_at: Option<LogIndex> = None;
        for (i, entry) in entries.iter().enumerate() {
            let index = prev_log_index + i as LogIndex + 1;
            match ctx.log().get(index).await? {
                None => break,
                Some(local) if local.term() != entry.term() => {
                    conflict_at = Some(index);
                    break;
                }
                Some(_) => continue,
            }
        }

        match conflict_at {
            Some(index) => {
                let skip = (index - prev_log_index - 1) as usize;
                ctx.log().truncate_and_append(index - 1, entries[skip..].to_vec()).await
            }
            None => {
                // Every incoming entry either matched an existing one or ran past the local
                // tail. Only append whatever is left past what's already stored.
                let already_present = (ctx.log().last_index().saturating_sub(prev_log_index)) as usize;
                let already_present = already_present.min(entries.len());
                if already_present == entries.len() {
                    return Ok(());
                }
                ctx.log()
                    .truncate_and_append(ctx.log().last_index(), entries[already_present..].to_vec())
                    .await
            }
        }
    }

    /// §4.3 step 5: `commitIndex <- min(max(req.commitIndex, commitIndex), log.lastIndex)`, then
    /// apply everything from `lastApplied + 1` through the new commit index, in order.
    async fn advance_commit_and_apply(ctx: &mut ReplicaContext, req_commit_index: LogIndex) -> RaftResult<()> {
        let last_index = ctx.log().last_index();
        let new_commit = req_commit_index.max(ctx.commit_index()).min(last_index);
        ctx.set_commit_index(new_commit);

        while ctx.last_applied() < ctx.commit_index() {
            let next = ctx.last_applied() + 1;
            Self::apply_one(ctx, next).await?;
        }
        Ok(())
    }

    /// Apply procedure: dispatch on entry variant. `lastApplied` advances by exactly one; a
    /// missing entry at the expected index is fatal (§4.3, §7).
    async fn apply_one(ctx: &mut ReplicaContext, index: LogIndex) -> RaftResult<()> {
        let entry = ctx
            .log()
            .get(index)
            .await?
            .ok_or(RaftError::MissingEntryAtApply(index))?;

        match entry {
            LogEntry::Command {
                timestamp_ms,
                session,
                service,
                command,
                args,
                ..
            } => {
                let clock = ctx.clock().clone();
                clock.advance_to(timestamp_ms);
                // Fire every timer whose due time the clock just reached or passed, synchronously
                // and in the same apply call that advanced the clock (§4.4, §5) — never via a
                // backgrounded wall-clock sleep, so every replica that applies this entry reaches
                // the same timer-fire decisions before the entry's own command runs.
                ctx.scheduler().fire_due(clock.now());
                if let Some(svc) = ctx.service_mut(&service) {
                    let apply_ctx = ApplyContext {
                        index,
                        session,
                        clock: ctx.clock(),
                    };
                    if let Err(err) = svc.apply(&command, &args, apply_ctx).await {
                        // §9 Open Question, decided: log and swallow. lastApplied still advances.
                        tracing::warn!(service, command, error = %err, "service command failed, continuing");
                    }
                } else {
                    tracing::warn!(service, "apply targeted an unregistered service");
                }
            }
            LogEntry::Configuration { cluster_config, .. } => {
                ctx.set_cluster(cluster_config).await?;
            }
            LogEntry::Snapshot {
                term,
                cluster_config,
                data,
            } => {
                ctx.set_cluster(cluster_config).await?;
                ctx.restore_services(&data)?;
                let adopted_term = term.max(ctx.current_term());
                ctx.set_current_term(adopted_term).await?;
            }
            LogEntry::NoOp { .. } => {}
        }

        ctx.set_last_applied(index);
        Ok(())
    }

    /// §4.3 Compaction: when the log is compactable and over threshold, snapshot every
    /// registered service's state, wrap it in a `SnapshotEntry` at the current term and cluster
    /// configuration, and compact the log at `lastApplied`. Compaction failures are fatal (§7).
    async fn maybe_compact(ctx: &mut ReplicaContext) -> RaftResult<()> {
        if !ctx.log().compactable() || ctx.log().size() <= ctx.config().max_log_size {
            return Ok(());
        }

        let Some(data) = ctx.snapshot_services() else {
            return Ok(());
        };

        let snapshot = LogEntry::Snapshot {
            term: ctx.current_term(),
            cluster_config: ctx.cluster().clone(),
            data,
        };
        ctx.log().compact(ctx.last_applied(), snapshot).await
    }
}

/// A position helper used by tests to assert "empty log" boundary conditions (§8).
pub fn empty_log_position() -> LogPosition {
    LogPosition::ZERO
}
