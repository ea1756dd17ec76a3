use std::{
    future::Future,
    io::ErrorKind,
    ops::Deref,
    path::{Path, PathBuf},
};

use tracing::{debug, info, warn};

use crate::{
    fs::operations::{write_atomically, FileLock},
    tracker::error::{TrackerError, TrackerResult},
};

use super::entities::{CheckpointEntry, LogStore, SubjectRecord};

/// Maximum number of checkpoint entries kept per subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HistoryBound(usize);

impl HistoryBound {
    pub const MIN: usize = 3;
    pub const MAX: usize = 100;

    pub fn new(value: i64) -> TrackerResult<Self> {
        if (Self::MIN as i64..=Self::MAX as i64).contains(&value) {
            Ok(Self(value as usize))
        } else {
            Err(TrackerError::InvalidBound(value))
        }
    }

    /// Pulls `value` into range instead of rejecting it.
    pub fn clamped(value: i64) -> Self {
        Self(value.clamp(Self::MIN as i64, Self::MAX as i64) as usize)
    }

    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for HistoryBound {
    fn default() -> Self {
        Self(5)
    }
}

/// Drops the oldest entries until at most `bound` remain.
pub fn truncate_history(history: &mut Vec<CheckpointEntry>, bound: HistoryBound) {
    let excess = history.len().saturating_sub(bound.get());
    if excess > 0 {
        history.drain(..excess);
    }
}

/// Appends `entry` as the newest checkpoint, evicting from the front past `bound`.
pub fn append_checkpoint(
    mut record: SubjectRecord,
    entry: CheckpointEntry,
    bound: HistoryBound,
) -> SubjectRecord {
    record.history.push(entry);
    truncate_history(&mut record.history, bound);
    record
}

/// Resets totals and forgets every checkpoint.
pub fn clear(record: &mut SubjectRecord) {
    *record = SubjectRecord::default();
}

/// Durable home of the [LogStore]. The store is only ever moved as a whole: `load` reads the
/// current state, `save` replaces it. Whoever saves last wins.
pub trait HistoryStore {
    fn load(&self) -> impl Future<Output = TrackerResult<LogStore>>;

    fn save(&self, store: &LogStore) -> impl Future<Output = TrackerResult<()>>;
}

impl<T: Deref> HistoryStore for T
where
    T::Target: HistoryStore,
{
    fn load(&self) -> impl Future<Output = TrackerResult<LogStore>> {
        self.deref().load()
    }

    fn save(&self, store: &LogStore) -> impl Future<Output = TrackerResult<()>> {
        self.deref().save(store)
    }
}

/// [HistoryStore] backed by a pretty printed JSON file.
pub struct JsonHistoryStore {
    path: PathBuf,
}

impl JsonHistoryStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path an unreadable log is moved to by [Self::quarantine].
    pub fn quarantine_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|v| v.to_os_string())
            .unwrap_or_default();
        name.push(".corrupt");
        self.path.with_file_name(name)
    }

    /// Moves a corrupt log out of the way so the next save starts from an empty map. Returns
    /// `None` when the log is readable or missing and nothing was moved.
    pub async fn quarantine(&self) -> TrackerResult<Option<PathBuf>> {
        match self.load().await {
            Err(TrackerError::CorruptLog { .. }) => {}
            Ok(_) => return Ok(None),
            Err(e) => return Err(e),
        }
        let target = self.quarantine_path();
        tokio::fs::rename(&self.path, &target)
            .await
            .map_err(|source| TrackerError::Persist {
                path: target.clone(),
                source,
            })?;
        warn!("Moved corrupt log {:?} to {:?}", self.path, target);
        Ok(Some(target))
    }

    async fn read(&self) -> TrackerResult<Option<String>> {
        let read_error = |source| TrackerError::Read {
            path: self.path.clone(),
            source,
        };
        let lock = FileLock::shared(&self.path).await.map_err(read_error)?;
        let content = tokio::fs::read_to_string(&self.path).await;
        lock.release().await.map_err(read_error)?;
        match content {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(read_error(e)),
        }
    }
}

impl HistoryStore for JsonHistoryStore {
    async fn load(&self) -> TrackerResult<LogStore> {
        let Some(content) = self.read().await? else {
            debug!("No log at {:?}, starting empty", self.path);
            return Ok(LogStore::new());
        };
        if content.trim().is_empty() {
            return Ok(LogStore::new());
        }
        serde_json::from_str(&content).map_err(|source| TrackerError::CorruptLog {
            path: self.path.clone(),
            source,
        })
    }

    async fn save(&self, store: &LogStore) -> TrackerResult<()> {
        let persist_error = |source| TrackerError::Persist {
            path: self.path.clone(),
            source,
        };
        let mut buffer = serde_json::to_vec_pretty(store)
            .map_err(|e| persist_error(std::io::Error::new(ErrorKind::InvalidData, e)))?;
        buffer.push(b'\n');

        let lock = FileLock::exclusive(&self.path)
            .await
            .map_err(persist_error)?;
        let written = write_atomically(&self.path, &buffer).await;
        lock.release().await.map_err(persist_error)?;
        written.map_err(persist_error)?;

        info!("Saved {} subjects into {:?}", store.len(), self.path);
        Ok(())
    }
}
