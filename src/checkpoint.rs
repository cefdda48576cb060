//! Checkpoint store
//!
//! Holds the relay's only durable state: per-chain watermarks and the ids of
//! events already acted upon. The in-memory [`RelayState`] is authoritative;
//! the JSON snapshot on disk is the recovery point after a crash.
//!
//! Snapshots are written to a temporary file in the target directory and
//! renamed over the previous one, so a reader never sees a partial write.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::CheckpointError;
use crate::types::{ChainSide, Direction, EventId, RelayerStats};

const SNAPSHOT_VERSION: u32 = 1;

/// An event the relayer has successfully acted upon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedEventRecord {
    pub event_id: EventId,
    pub direction: Direction,
    pub processed_at: DateTime<Utc>,
}

/// Persisted form of [`RelayState`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub locks: Vec<ProcessedEventRecord>,
    #[serde(default)]
    pub unlocks: Vec<ProcessedEventRecord>,
    #[serde(default)]
    pub watermarks: BTreeMap<ChainSide, u64>,
    #[serde(default)]
    pub stats: RelayerStats,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            locks: Vec::new(),
            unlocks: Vec::new(),
            watermarks: BTreeMap::new(),
            stats: RelayerStats::default(),
            saved_at: None,
        }
    }
}

/// In-memory relay state: processed-id sets, watermarks and stats
#[derive(Debug, Default)]
pub struct RelayState {
    locks: HashMap<EventId, ProcessedEventRecord>,
    unlocks: HashMap<EventId, ProcessedEventRecord>,
    watermarks: BTreeMap<ChainSide, u64>,
    stats: RelayerStats,
}

impl RelayState {
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let index = |records: Vec<ProcessedEventRecord>| {
            records
                .into_iter()
                .map(|r| (r.event_id, r))
                .collect::<HashMap<_, _>>()
        };
        let mut stats = snapshot.stats;
        stats.started_at = Utc::now();
        Self {
            locks: index(snapshot.locks),
            unlocks: index(snapshot.unlocks),
            watermarks: snapshot.watermarks,
            stats,
        }
    }

    pub fn to_snapshot(&self) -> Snapshot {
        let sorted = |set: &HashMap<EventId, ProcessedEventRecord>| {
            let mut records: Vec<_> = set.values().cloned().collect();
            records.sort_by(|a, b| {
                a.processed_at
                    .cmp(&b.processed_at)
                    .then(a.event_id.cmp(&b.event_id))
            });
            records
        };
        Snapshot {
            version: SNAPSHOT_VERSION,
            locks: sorted(&self.locks),
            unlocks: sorted(&self.unlocks),
            watermarks: self.watermarks.clone(),
            stats: self.stats.clone(),
            saved_at: Some(Utc::now()),
        }
    }

    fn set_for(&self, direction: Direction) -> &HashMap<EventId, ProcessedEventRecord> {
        match direction {
            Direction::Lock => &self.locks,
            Direction::Unlock => &self.unlocks,
        }
    }

    fn set_for_mut(&mut self, direction: Direction) -> &mut HashMap<EventId, ProcessedEventRecord> {
        match direction {
            Direction::Lock => &mut self.locks,
            Direction::Unlock => &mut self.unlocks,
        }
    }

    pub fn is_processed(&self, direction: Direction, id: &EventId) -> bool {
        self.set_for(direction).contains_key(id)
    }

    /// Record an event as acted upon. Returns false if it was already recorded.
    pub fn record_processed(&mut self, direction: Direction, id: EventId) -> bool {
        let set = self.set_for_mut(direction);
        if set.contains_key(&id) {
            return false;
        }
        set.insert(
            id,
            ProcessedEventRecord {
                event_id: id,
                direction,
                processed_at: Utc::now(),
            },
        );
        true
    }

    pub fn processed_count(&self, direction: Direction) -> usize {
        self.set_for(direction).len()
    }

    pub fn watermark(&self, side: ChainSide) -> Option<u64> {
        self.watermarks.get(&side).copied()
    }

    /// Advance a watermark. Lower values are ignored; returns whether it moved.
    pub fn set_watermark(&mut self, side: ChainSide, block: u64) -> bool {
        match self.watermarks.get(&side) {
            Some(&current) if block <= current => false,
            _ => {
                self.watermarks.insert(side, block);
                self.stats.set_last_block(side, block);
                true
            }
        }
    }

    pub fn stats(&self) -> &RelayerStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut RelayerStats {
        &mut self.stats
    }

    /// Drop processed records older than `cutoff`. Returns how many were removed.
    pub fn prune_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.locks.len() + self.unlocks.len();
        self.locks.retain(|_, r| r.processed_at >= cutoff);
        self.unlocks.retain(|_, r| r.processed_at >= cutoff);
        before - (self.locks.len() + self.unlocks.len())
    }
}

/// Durable owner of [`RelayState`], shared by the pollers, the health monitor
/// and the status server.
pub struct CheckpointStore {
    path: PathBuf,
    retention: Option<Duration>,
    state: RwLock<RelayState>,
    /// Serializes writers so an older snapshot can never overwrite a newer one
    save_lock: Mutex<()>,
}

impl CheckpointStore {
    /// Open the store at `path`, resuming from any snapshot found there
    pub fn open(
        path: impl Into<PathBuf>,
        retention: Option<Duration>,
    ) -> Result<Self, CheckpointError> {
        let path = path.into();
        let snapshot = Self::load(&path)?;
        info!(
            path = %path.display(),
            locks = snapshot.locks.len(),
            unlocks = snapshot.unlocks.len(),
            watermarks = ?snapshot.watermarks,
            saved_at = ?snapshot.saved_at,
            "Checkpoint loaded"
        );
        Ok(Self {
            path,
            retention,
            state: RwLock::new(RelayState::from_snapshot(snapshot)),
            save_lock: Mutex::new(()),
        })
    }

    /// Read a snapshot; a missing file yields the empty default
    pub fn load(path: &Path) -> Result<Snapshot, CheckpointError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No checkpoint found, starting fresh");
                return Ok(Snapshot::default());
            }
            Err(source) => {
                return Err(CheckpointError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        serde_json::from_slice(&bytes).map_err(|source| CheckpointError::Corrupt {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn is_processed(&self, direction: Direction, id: &EventId) -> bool {
        self.state.read().await.is_processed(direction, id)
    }

    pub async fn record_processed(&self, direction: Direction, id: EventId) -> bool {
        self.state.write().await.record_processed(direction, id)
    }

    pub async fn watermark(&self, side: ChainSide) -> Option<u64> {
        self.state.read().await.watermark(side)
    }

    pub async fn set_watermark(&self, side: ChainSide, block: u64) -> bool {
        self.state.write().await.set_watermark(side, block)
    }

    pub async fn stats(&self) -> RelayerStats {
        self.state.read().await.stats().clone()
    }

    pub async fn record_relayed(&self, direction: Direction) {
        self.state.write().await.stats_mut().record_relayed(direction);
    }

    pub async fn record_benign_rejection(&self) {
        self.state.write().await.stats_mut().benign_rejections += 1;
    }

    pub async fn record_error(&self) {
        self.state.write().await.stats_mut().errors += 1;
    }

    pub async fn processed_count(&self, direction: Direction) -> usize {
        self.state.read().await.processed_count(direction)
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.state.read().await.to_snapshot()
    }

    /// Drop processed ids older than the retention horizon, if one is configured
    pub async fn prune(&self) -> usize {
        let Some(retention) = self.retention else {
            return 0;
        };
        let horizon = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(horizon)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let removed = self.state.write().await.prune_before(cutoff);
        if removed > 0 {
            info!(removed, %cutoff, "Pruned processed event ids past retention horizon");
        }
        removed
    }

    /// Write the current state atomically
    pub async fn save(&self) -> Result<(), CheckpointError> {
        let _guard = self.save_lock.lock().await;
        let snapshot = self.snapshot().await;
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| CheckpointError::Io {
                path: self.path.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e),
            })?
    }

    /// Save, logging instead of failing. The in-memory state stays
    /// authoritative until the next successful write.
    pub async fn flush(&self) -> bool {
        match self.save().await {
            Ok(()) => {
                debug!(path = %self.path.display(), "Checkpoint saved");
                true
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to save checkpoint");
                false
            }
        }
    }
}

/// Write `bytes` to a temp file next to `path`, fsync, then rename over `path`.
/// The temp file is removed on every error path.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CheckpointError> {
    let io_err = |source: std::io::Error| CheckpointError::Io {
        path: path.display().to_string(),
        source,
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(bytes).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn id(byte: u8) -> EventId {
        EventId([byte; 32])
    }

    #[test]
    fn test_load_missing_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = assert_ok!(CheckpointStore::load(&dir.path().join("none.json")));
        assert!(snapshot.locks.is_empty());
        assert!(snapshot.watermarks.is_empty());
        assert!(snapshot.saved_at.is_none());
    }

    #[test]
    fn test_load_corrupt_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(matches!(
            assert_err!(CheckpointStore::load(&path)),
            CheckpointError::Corrupt { .. }
        ));
    }

    #[test]
    fn test_record_processed_once() {
        let mut state = RelayState::default();
        assert!(state.record_processed(Direction::Lock, id(1)));
        assert!(!state.record_processed(Direction::Lock, id(1)));
        assert!(state.is_processed(Direction::Lock, &id(1)));
        // sets are per direction
        assert!(!state.is_processed(Direction::Unlock, &id(1)));
    }

    #[test]
    fn test_watermark_is_monotonic() {
        let mut state = RelayState::default();
        assert_eq!(state.watermark(ChainSide::A), None);
        assert!(state.set_watermark(ChainSide::A, 10));
        assert!(!state.set_watermark(ChainSide::A, 5));
        assert!(!state.set_watermark(ChainSide::A, 10));
        assert_eq!(state.watermark(ChainSide::A), Some(10));
        assert_eq!(state.stats().last_block_a, 10);
    }

    #[test]
    fn test_prune_before() {
        let mut state = RelayState::default();
        state.record_processed(Direction::Lock, id(1));
        state.record_processed(Direction::Unlock, id(2));
        assert_eq!(state.prune_before(Utc::now() - chrono::Duration::hours(1)), 0);
        assert_eq!(state.prune_before(Utc::now() + chrono::Duration::hours(1)), 2);
        assert_eq!(state.processed_count(Direction::Lock), 0);
    }

    #[tokio::test]
    async fn test_save_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = CheckpointStore::open(&path, None).unwrap();
        store.record_processed(Direction::Lock, id(1)).await;
        store.record_relayed(Direction::Lock).await;
        store.record_processed(Direction::Unlock, id(2)).await;
        store.record_relayed(Direction::Unlock).await;
        store.set_watermark(ChainSide::A, 120).await;
        store.set_watermark(ChainSide::B, 80).await;
        assert_ok!(store.save().await);

        let reopened = CheckpointStore::open(&path, None).unwrap();
        assert!(reopened.is_processed(Direction::Lock, &id(1)).await);
        assert!(reopened.is_processed(Direction::Unlock, &id(2)).await);
        assert!(!reopened.is_processed(Direction::Lock, &id(2)).await);
        assert_eq!(reopened.watermark(ChainSide::A).await, Some(120));
        assert_eq!(reopened.watermark(ChainSide::B).await, Some(80));
        let stats = reopened.stats().await;
        assert_eq!(stats.locks_relayed, 1);
        assert_eq!(stats.unlocks_relayed, 1);
    }

    #[tokio::test]
    async fn test_save_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = CheckpointStore::open(&path, None).unwrap();
        store.set_watermark(ChainSide::A, 1).await;
        assert_ok!(store.save().await);
        store.set_watermark(ChainSide::A, 2).await;
        assert_ok!(store.save().await);

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let snapshot = CheckpointStore::load(&path).unwrap();
        assert_eq!(snapshot.watermarks.get(&ChainSide::A), Some(&2));
        assert!(snapshot.saved_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_save_is_non_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("state.json");
        let store = CheckpointStore::open(&path, None).unwrap();
        store.record_processed(Direction::Lock, id(9)).await;

        assert!(!store.flush().await);
        // in-memory state is still authoritative
        assert!(store.is_processed(Direction::Lock, &id(9)).await);
    }

    #[tokio::test]
    async fn test_prune_without_retention_keeps_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path().join("s.json"), None).unwrap();
        store.record_processed(Direction::Lock, id(1)).await;
        assert_eq!(store.prune().await, 0);
        assert_eq!(store.processed_count(Direction::Lock).await, 1);
    }

    #[test]
    fn test_snapshot_json_shape() {
        let mut state = RelayState::default();
        state.record_processed(Direction::Lock, id(1));
        state.set_watermark(ChainSide::B, 7);
        let json = serde_json::to_value(state.to_snapshot()).unwrap();
        assert_eq!(json["watermarks"]["b"], 7);
        assert_eq!(json["locks"][0]["direction"], "lock");
        assert_eq!(json["locks"][0]["event_id"], id(1).to_string());
        assert!(json["unlocks"].as_array().unwrap().is_empty());
        assert!(json["stats"].is_object());
        assert!(json["saved_at"].is_string());
    }
}
