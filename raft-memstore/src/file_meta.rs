//! §6 on-disk layout:
//!
//! - `<name>.meta`: `[u64 LE term @ offset 0][u32 LE voteLen][voteBytes]`, 12 bytes guaranteed
//!   (the 8-byte term plus the 4-byte length prefix; `voteBytes` is empty when there is no vote).
//!   Every write flushes before returning the metadata slot it touched.
//! - `<name>.conf`: `[u8 presence][u32 LE length][bytes]` when non-empty; just the presence byte
//!   when there is no configuration to persist.
//!
//! The metadata file is always disk-backed — Raft safety forbids losing `<term, vote>` — while
//! the configuration file honors [`raft_core::meta::StorageLevel::Memory`] by skipping disk I/O
//! entirely and keeping the configuration in a process-local cell instead.

use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;
use raft_core::error::RaftError;
use raft_core::error::RaftResult;
use raft_core::meta::MetaStore;
use raft_core::meta::StorageLevel;
use raft_core::types::Configuration;
use raft_core::types::NodeId;
use raft_core::types::Term;
use tokio::fs::File;
use tokio::fs::OpenOptions;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// A [`MetaStore`] backed by a `<name>.meta` file and, depending on `storage_level`, a
/// `<name>.conf` file.
pub struct FileMetaStore {
    meta_path: PathBuf,
    conf_path: PathBuf,
    storage_level: StorageLevel,
    memory_config: Mutex<Option<Configuration>>,
    io_lock: Mutex<()>,
}

impl FileMetaStore {
    /// Open (or create) the metadata files for `name` under `dir`. Does not read any existing
    /// state; callers should follow with `load_term`/`load_vote`/`load_configuration`.
    pub async fn open(dir: impl AsRef<Path>, name: &str, storage_level: StorageLevel) -> RaftResult<Self> {
        let dir = dir.as_ref();
        let meta_path = dir.join(format!("{name}.meta"));
        let conf_path = dir.join(format!("{name}.conf"));

        let store = Self {
            meta_path,
            conf_path,
            storage_level,
            memory_config: Mutex::new(None),
            io_lock: Mutex::new(()),
        };

        if !store.meta_path.exists() {
            store.write_meta(0, None).await.map_err(|err| store.log_fatal_meta_error(err))?;
        }
        if store.storage_level == StorageLevel::Disk && !store.conf_path.exists() {
            store.write_conf(None).await.map_err(|err| store.log_fatal_meta_error(err))?;
        }

        Ok(store)
    }

    /// Log a `MetaStore` I/O failure before returning it. Any I/O failure here is fatal (§7),
    /// and the replica that observes it must know why it is about to stop serving.
    fn log_fatal_meta_error(&self, err: RaftError) -> RaftError {
        tracing::error!(error = %err, meta_path = %self.meta_path.display(), "fatal meta store I/O error");
        err
    }

    async fn write_meta(&self, term: Term, vote: Option<NodeId>) -> RaftResult<()> {
        let mut buf = Vec::with_capacity(12);
        buf.extend_from_slice(&term.to_le_bytes());
        let vote_bytes = vote.map(|v| v.to_string().into_bytes()).unwrap_or_default();
        buf.extend_from_slice(&(vote_bytes.len() as u32).to_le_bytes());
        buf.extend_from_slice(&vote_bytes);

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.meta_path)
            .await
            .map_err(|e| RaftError::MetaStoreIo(e.into()))?;
        file.write_all(&buf).await.map_err(|e| RaftError::MetaStoreIo(e.into()))?;
        file.flush().await.map_err(|e| RaftError::MetaStoreIo(e.into()))?;
        file.sync_all().await.map_err(|e| RaftError::MetaStoreIo(e.into()))?;
        Ok(())
    }

    async fn read_meta(&self) -> RaftResult<(Term, Option<NodeId>)> {
        let mut file = match File::open(&self.meta_path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((0, None)),
            Err(e) => return Err(RaftError::MetaStoreIo(e.into())),
        };

        let mut header = [0u8; 12];
        if file.read_exact(&mut header).await.is_err() {
            return Ok((0, None));
        }
        let term = u64::from_le_bytes(header[0..8].try_into().unwrap());
        let vote_len = u32::from_le_bytes(header[8..12].try_into().unwrap()) as usize;

        if vote_len == 0 {
            return Ok((term, None));
        }

        let mut vote_buf = vec![0u8; vote_len];
        file.read_exact(&mut vote_buf).await.map_err(|e| RaftError::MetaStoreIo(e.into()))?;
        let vote_str = String::from_utf8(vote_buf).map_err(|e| RaftError::MetaStoreIo(e.into()))?;
        let vote = vote_str.parse::<NodeId>().map_err(|e| RaftError::MetaStoreIo(anyhow::anyhow!(e)))?;
        Ok((term, Some(vote)))
    }

    async fn write_conf(&self, cfg: Option<&Configuration>) -> RaftResult<()> {
        let mut buf = Vec::new();
        match cfg {
            None => buf.push(0u8),
            Some(cfg) => {
                let bytes = serde_json::to_vec(cfg).map_err(|e| RaftError::MetaStoreIo(e.into()))?;
                buf.push(1u8);
                buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                buf.extend_from_slice(&bytes);
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.conf_path)
            .await
            .map_err(|e| RaftError::MetaStoreIo(e.into()))?;
        file.write_all(&buf).await.map_err(|e| RaftError::MetaStoreIo(e.into()))?;
        file.flush().await.map_err(|e| RaftError::MetaStoreIo(e.into()))?;
        file.sync_all().await.map_err(|e| RaftError::MetaStoreIo(e.into()))?;
        Ok(())
    }

    async fn read_conf(&self) -> RaftResult<Option<Configuration>> {
        let mut file = match File::open(&self.conf_path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RaftError::MetaStoreIo(e.into())),
        };

        let mut presence = [0u8; 1];
        if file.read_exact(&mut presence).await.is_err() || presence[0] == 0 {
            return Ok(None);
        }

        let mut len_buf = [0u8; 4];
        file.read_exact(&mut len_buf).await.map_err(|e| RaftError::MetaStoreIo(e.into()))?;
        let len = u32::from_le_bytes(len_buf) as usize;

        let mut data = vec![0u8; len];
        file.read_exact(&mut data).await.map_err(|e| RaftError::MetaStoreIo(e.into()))?;

        let cfg = serde_json::from_slice(&data).map_err(|e| RaftError::MetaStoreIo(e.into()))?;
        Ok(Some(cfg))
    }
}

#[async_trait]
impl MetaStore for FileMetaStore {
    async fn store_term(&self, term: Term) -> RaftResult<()> {
        let _guard = self.io_lock.lock().await;
        let (_, vote) = self.read_meta().await.map_err(|err| self.log_fatal_meta_error(err))?;
        self.write_meta(term, vote).await.map_err(|err| self.log_fatal_meta_error(err))?;
        tracing::trace!(term, "file meta store: term persisted");
        Ok(())
    }

    async fn load_term(&self) -> RaftResult<Term> {
        let _guard = self.io_lock.lock().await;
        Ok(self.read_meta().await.map_err(|err| self.log_fatal_meta_error(err))?.0)
    }

    async fn store_vote(&self, node_id: Option<NodeId>) -> RaftResult<()> {
        let _guard = self.io_lock.lock().await;
        let (term, _) = self.read_meta().await.map_err(|err| self.log_fatal_meta_error(err))?;
        self.write_meta(term, node_id).await.map_err(|err| self.log_fatal_meta_error(err))?;
        tracing::trace!(?node_id, "file meta store: vote persisted");
        Ok(())
    }

    async fn load_vote(&self) -> RaftResult<Option<NodeId>> {
        let _guard = self.io_lock.lock().await;
        Ok(self.read_meta().await.map_err(|err| self.log_fatal_meta_error(err))?.1)
    }

    async fn store_configuration(&self, cfg: &Configuration) -> RaftResult<()> {
        match self.storage_level {
            StorageLevel::Memory => {
                *self.memory_config.lock().await = Some(cfg.clone());
                Ok(())
            }
            StorageLevel::Disk => {
                let _guard = self.io_lock.lock().await;
                self.write_conf(Some(cfg)).await.map_err(|err| self.log_fatal_meta_error(err))
            }
        }
    }

    async fn load_configuration(&self) -> RaftResult<Option<Configuration>> {
        match self.storage_level {
            StorageLevel::Memory => Ok(self.memory_config.lock().await.clone()),
            StorageLevel::Disk => {
                let _guard = self.io_lock.lock().await;
                self.read_conf().await.map_err(|err| self.log_fatal_meta_error(err))
            }
        }
    }
}
