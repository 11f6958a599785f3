//! Error types for the consensus core.
//!
//! Protocol outcomes (term mismatch, log inconsistency) are encoded in response payloads and
//! never reach this type, while anything that must abort the replica — storage I/O, compaction,
//! a null entry at the expected apply index — is surfaced here and propagated with `?`.

use thiserror::Error;

use crate::types::LogIndex;

/// Fatal errors abort the owning replica (§7). There is no recoverable path back from these;
/// the apply thread that observes one must stop serving RPCs.
#[derive(Debug, Error)]
pub enum RaftError {
    #[error("meta store I/O error: {0}")]
    MetaStoreIo(#[source] anyhow::Error),

    #[error("log compaction failed: {0}")]
    CompactionFailed(#[source] anyhow::Error),

    #[error("snapshot install failed: {0}")]
    SnapshotInstallFailed(#[source] anyhow::Error),

    #[error("log storage error: {0}")]
    LogStorage(#[source] anyhow::Error),

    #[error("attempted to apply a null entry at index {0}, which is required to exist")]
    MissingEntryAtApply(LogIndex),
}

pub type RaftResult<T> = std::result::Result<T, RaftError>;
