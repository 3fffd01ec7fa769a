//! Raft log and stable storage.
//!
//! The log lives in memory as a BTreeMap and is journalled to
//! `<data>/raft/log.db` as JSON lines; the vote goes to
//! `<data>/raft/stable.db`. Control-plane log volumes are tiny, so
//! truncate and purge simply rewrite the journal.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::io::Write;
use std::ops::RangeBounds;
use std::path::PathBuf;
use std::sync::Arc;

use openraft::storage::{LogFlushed, RaftLogReader, RaftLogStorage};
use openraft::{Entry, LogId, LogState, OptionalSend, StorageError, StorageIOError, Vote};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::typ::{NodeId, TypeConfig};

const LOG_FILE: &str = "log.db";
const STABLE_FILE: &str = "stable.db";

/// Durable raft metadata kept outside the log itself.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StableFile {
    vote: Option<Vote<NodeId>>,
    last_purged_log_id: Option<LogId<NodeId>>,
}

struct LogInner {
    dir: PathBuf,
    vote: Option<Vote<NodeId>>,
    log: BTreeMap<u64, Entry<TypeConfig>>,
    last_purged_log_id: Option<LogId<NodeId>>,
}

impl LogInner {
    fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    fn stable_path(&self) -> PathBuf {
        self.dir.join(STABLE_FILE)
    }

    fn persist_stable(&self) -> Result<(), std::io::Error> {
        let stable = StableFile {
            vote: self.vote,
            last_purged_log_id: self.last_purged_log_id,
        };
        let data = serde_json::to_vec(&stable)?;
        let tmp = self.stable_path().with_extension("db.tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, self.stable_path())?;
        Ok(())
    }

    fn append_to_journal(&self, entries: &[Entry<TypeConfig>]) -> Result<(), std::io::Error> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())?;
        for entry in entries {
            let line = serde_json::to_vec(entry)?;
            file.write_all(&line)?;
            file.write_all(b"\n")?;
        }
        file.sync_all()
    }

    /// Rewrite the journal from the in-memory map, used after truncate and
    /// purge.
    fn rewrite_journal(&self) -> Result<(), std::io::Error> {
        let tmp = self.log_path().with_extension("db.tmp");
        {
            let mut file = std::fs::File::create(&tmp)?;
            for entry in self.log.values() {
                let line = serde_json::to_vec(entry)?;
                file.write_all(&line)?;
                file.write_all(b"\n")?;
            }
            file.sync_all()?;
        }
        std::fs::rename(&tmp, self.log_path())
    }
}

/// Disk-backed log storage.
#[derive(Clone)]
pub struct LogStore {
    inner: Arc<Mutex<LogInner>>,
}

impl LogStore {
    /// Open the stores under `dir`, replaying any journalled state.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, std::io::Error> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut inner = LogInner {
            dir,
            vote: None,
            log: BTreeMap::new(),
            last_purged_log_id: None,
        };

        if inner.stable_path().exists() {
            let data = std::fs::read(inner.stable_path())?;
            let stable: StableFile = serde_json::from_slice(&data)?;
            inner.vote = stable.vote;
            inner.last_purged_log_id = stable.last_purged_log_id;
        }

        if inner.log_path().exists() {
            let data = std::fs::read_to_string(inner.log_path())?;
            for line in data.lines().filter(|l| !l.is_empty()) {
                let entry: Entry<TypeConfig> = serde_json::from_str(line)?;
                inner.log.insert(entry.log_id.index, entry);
            }
            debug!(entries = inner.log.len(), "replayed raft log journal");
        }

        Ok(Self {
            inner: Arc::new(Mutex::new(inner)),
        })
    }
}

fn io_err<E: std::error::Error + 'static>(e: E) -> StorageError<NodeId> {
    StorageIOError::write(&e).into()
}

impl RaftLogReader<TypeConfig> for LogStore {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug + OptionalSend>(
        &mut self,
        range: RB,
    ) -> Result<Vec<Entry<TypeConfig>>, StorageError<NodeId>> {
        let inner = self.inner.lock().await;
        Ok(inner.log.range(range).map(|(_, v)| v.clone()).collect())
    }
}

impl RaftLogStorage<TypeConfig> for LogStore {
    type LogReader = Self;

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, StorageError<NodeId>> {
        let inner = self.inner.lock().await;
        let last = inner
            .log
            .iter()
            .next_back()
            .map(|(_, entry)| entry.log_id)
            .or(inner.last_purged_log_id);

        Ok(LogState {
            last_purged_log_id: inner.last_purged_log_id,
            last_log_id: last,
        })
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        self.clone()
    }

    async fn save_vote(&mut self, vote: &Vote<NodeId>) -> Result<(), StorageError<NodeId>> {
        debug!(?vote, "saving vote");
        let mut inner = self.inner.lock().await;
        inner.vote = Some(*vote);
        inner.persist_stable().map_err(io_err)
    }

    async fn read_vote(&mut self) -> Result<Option<Vote<NodeId>>, StorageError<NodeId>> {
        Ok(self.inner.lock().await.vote)
    }

    async fn append<I>(
        &mut self,
        entries: I,
        callback: LogFlushed<TypeConfig>,
    ) -> Result<(), StorageError<NodeId>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + OptionalSend,
    {
        let mut inner = self.inner.lock().await;
        let entries: Vec<_> = entries.into_iter().collect();
        for entry in &entries {
            trace!(log_id = ?entry.log_id, "appending log entry");
            inner.log.insert(entry.log_id.index, entry.clone());
        }

        match inner.append_to_journal(&entries) {
            Ok(()) => {
                callback.log_io_completed(Ok(()));
                Ok(())
            }
            Err(e) => {
                callback.log_io_completed(Err(std::io::Error::new(e.kind(), e.to_string())));
                Err(io_err(e))
            }
        }
    }

    async fn truncate(&mut self, log_id: LogId<NodeId>) -> Result<(), StorageError<NodeId>> {
        debug!(?log_id, "truncating log");
        let mut inner = self.inner.lock().await;
        let keys: Vec<_> = inner.log.range(log_id.index..).map(|(k, _)| *k).collect();
        for key in keys {
            inner.log.remove(&key);
        }
        inner.rewrite_journal().map_err(io_err)
    }

    async fn purge(&mut self, log_id: LogId<NodeId>) -> Result<(), StorageError<NodeId>> {
        debug!(?log_id, "purging log");
        let mut inner = self.inner.lock().await;
        inner.last_purged_log_id = Some(log_id);
        let keys: Vec<_> = inner.log.range(..=log_id.index).map(|(k, _)| *k).collect();
        for key in keys {
            inner.log.remove(&key);
        }
        inner.persist_stable().map_err(io_err)?;
        inner.rewrite_journal().map_err(io_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openraft::CommittedLeaderId;

    fn entry(index: u64) -> Entry<TypeConfig> {
        Entry {
            log_id: LogId::new(CommittedLeaderId::new(1, 1), index),
            payload: openraft::EntryPayload::Blank,
        }
    }

    #[tokio::test]
    async fn fresh_store_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = LogStore::open(dir.path()).unwrap();

        let state = store.get_log_state().await.unwrap();
        assert!(state.last_log_id.is_none());
        assert!(store.read_vote().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn vote_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let vote = Vote::new(7, 42);

        {
            let mut store = LogStore::open(dir.path()).unwrap();
            store.save_vote(&vote).await.unwrap();
        }

        let mut store = LogStore::open(dir.path()).unwrap();
        assert_eq!(store.read_vote().await.unwrap(), Some(vote));
    }

    #[tokio::test]
    async fn entries_replay_after_reopen() {
        let dir = tempfile::tempdir().unwrap();

        {
            let mut inner = LogStore::open(dir.path()).unwrap();
            let mut guard = inner.inner.lock().await;
            for i in 1..=3 {
                let e = entry(i);
                guard.log.insert(i, e.clone());
                guard.append_to_journal(&[e]).unwrap();
            }
        }

        let mut store = LogStore::open(dir.path()).unwrap();
        let entries = store.try_get_log_entries(1..=3).await.unwrap();
        assert_eq!(entries.len(), 3);
        let state = store.get_log_state().await.unwrap();
        assert_eq!(state.last_log_id.unwrap().index, 3);
    }

    #[tokio::test]
    async fn purge_drops_prefix_and_remembers_high_water_mark() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = LogStore::open(dir.path()).unwrap();
        {
            let mut guard = store.inner.lock().await;
            for i in 1..=5 {
                let e = entry(i);
                guard.log.insert(i, e.clone());
                guard.append_to_journal(&[e]).unwrap();
            }
        }

        let purge_to = LogId::new(CommittedLeaderId::new(1, 1), 3);
        store.purge(purge_to).await.unwrap();

        let entries = store.try_get_log_entries(..).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].log_id.index, 4);

        // The purge point survives a reopen so log state stays correct.
        let mut reopened = LogStore::open(dir.path()).unwrap();
        let state = reopened.get_log_state().await.unwrap();
        assert_eq!(state.last_purged_log_id, Some(purge_to));
        assert_eq!(state.last_log_id.unwrap().index, 5);
    }

    #[tokio::test]
    async fn truncate_drops_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = LogStore::open(dir.path()).unwrap();
        {
            let mut guard = store.inner.lock().await;
            for i in 1..=5 {
                let e = entry(i);
                guard.log.insert(i, e.clone());
                guard.append_to_journal(&[e]).unwrap();
            }
        }

        store
            .truncate(LogId::new(CommittedLeaderId::new(1, 1), 4))
            .await
            .unwrap();

        let entries = store.try_get_log_entries(..).await.unwrap();
        assert_eq!(entries.last().unwrap().log_id.index, 3);
    }
}
