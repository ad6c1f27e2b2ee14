//! Snapshot persistence for session stats.
//!
//! The store is a namespaced key -> JSON blob map with change notification.
//! Writes are fire-and-forget: a failed write is logged and dropped, and the
//! next successful write re-syncs the snapshot. Loads and external changes
//! merge field by field over a base state so that partial or older snapshots
//! still restore everything they can.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::state::SessionStats;
use crate::{STATS_KEY, TEMP_KEY_PREFIX};

/// Errors from store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// IO error reading/writing the backing file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A key changed by someone other than this store handle.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreChange {
    pub key: String,
    /// `None` when the key was removed.
    pub new_value: Option<Value>,
}

/// Key-value blob store shared with other processes.
pub trait Store: Send + Sync + 'static {
    /// Fetch the given keys, or every key when `keys` is `None`.
    fn get(&self, keys: Option<&[&str]>) -> Result<Map<String, Value>, StoreError>;
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
    fn remove(&self, keys: &[String]) -> Result<(), StoreError>;
    /// Subscribe to changes made outside this handle.
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

const CHANGE_CHANNEL_CAPACITY: usize = 64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn select(entries: &Map<String, Value>, keys: Option<&[&str]>) -> Map<String, Value> {
    match keys {
        None => entries.clone(),
        Some(keys) => keys
            .iter()
            .filter_map(|k| entries.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect(),
    }
}

/// In-process store. `inject_external` simulates a write from another process.
pub struct MemoryStore {
    entries: Mutex<Map<String, Value>>,
    changes: broadcast::Sender<StoreChange>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            entries: Mutex::new(Map::new()),
            changes,
        }
    }

    pub fn inject_external(&self, key: &str, value: Value) {
        lock(&self.entries).insert(key.to_string(), value.clone());
        let _ = self.changes.send(StoreChange {
            key: key.to_string(),
            new_value: Some(value),
        });
    }
}

impl Store for MemoryStore {
    fn get(&self, keys: Option<&[&str]>) -> Result<Map<String, Value>, StoreError> {
        Ok(select(&lock(&self.entries), keys))
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        lock(&self.entries).insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, keys: &[String]) -> Result<(), StoreError> {
        let mut entries = lock(&self.entries);
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

/// Store backed by a single JSON object file.
///
/// Writes go through a temp file and rename. Edits made by other processes
/// are detected by comparing the file against the last contents this handle
/// saw; every read, write and `poll_external` publishes them.
pub struct JsonFileStore {
    path: PathBuf,
    known: Mutex<Map<String, Value>>,
    changes: broadcast::Sender<StoreChange>,
}

impl JsonFileStore {
    /// Open (without creating) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let known = read_map(&path)?;
        Ok(Self {
            path,
            known: Mutex::new(known),
            changes,
        })
    }

    fn write_map(&self, entries: &Map<String, Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Re-read the file and publish keys that differ from what this handle
    /// last saw. Returns the number of changed keys.
    pub fn poll_external(&self) -> Result<usize, StoreError> {
        let mut known = lock(&self.known);
        let on_disk = read_map(&self.path)?;
        let count = self.publish_external(&known, &on_disk, &[]);
        *known = on_disk;
        Ok(count)
    }

    /// Publish every key where `on_disk` differs from `known`, except `own`.
    fn publish_external(
        &self,
        known: &Map<String, Value>,
        on_disk: &Map<String, Value>,
        own: &[&str],
    ) -> usize {
        let mut changed = Vec::new();
        for (key, value) in on_disk {
            if !own.contains(&key.as_str()) && known.get(key) != Some(value) {
                changed.push(StoreChange {
                    key: key.clone(),
                    new_value: Some(value.clone()),
                });
            }
        }
        for key in known.keys() {
            if !own.contains(&key.as_str()) && !on_disk.contains_key(key) {
                changed.push(StoreChange {
                    key: key.clone(),
                    new_value: None,
                });
            }
        }

        let count = changed.len();
        for change in changed {
            let _ = self.changes.send(change);
        }
        count
    }
}

fn read_map(path: &Path) -> Result<Map<String, Value>, StoreError> {
    match fs::read(path) {
        Ok(bytes) if bytes.is_empty() => Ok(Map::new()),
        Ok(bytes) => match serde_json::from_slice::<Value>(&bytes)? {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        },
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Map::new()),
        Err(e) => Err(e.into()),
    }
}

impl Store for JsonFileStore {
    fn get(&self, keys: Option<&[&str]>) -> Result<Map<String, Value>, StoreError> {
        let mut known = lock(&self.known);
        let on_disk = read_map(&self.path)?;
        // A read can be the first to see another process's write.
        self.publish_external(&known, &on_disk, &[]);
        let selected = select(&on_disk, keys);
        *known = on_disk;
        Ok(selected)
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut known = lock(&self.known);
        let mut entries = read_map(&self.path)?;
        self.publish_external(&known, &entries, &[key]);
        entries.insert(key.to_string(), value);
        self.write_map(&entries)?;
        *known = entries;
        Ok(())
    }

    fn remove(&self, keys: &[String]) -> Result<(), StoreError> {
        let mut known = lock(&self.known);
        let mut entries = read_map(&self.path)?;
        let own: Vec<&str> = keys.iter().map(String::as_str).collect();
        self.publish_external(&known, &entries, &own);
        for key in keys {
            entries.remove(key);
        }
        self.write_map(&entries)?;
        *known = entries;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

/// Merge a persisted snapshot into `base`, field by field.
///
/// Each top-level field present in `persisted` replaces the matching field of
/// `base` (collections are replaced, not unioned). Fields that fail to
/// deserialize are dropped individually; unknown fields are ignored.
pub fn merge_snapshot(base: &SessionStats, persisted: &Value) -> SessionStats {
    let Some(incoming) = persisted.as_object() else {
        return base.clone();
    };
    let Ok(Value::Object(mut merged)) = serde_json::to_value(base) else {
        return base.clone();
    };

    let mut current = base.clone();
    for (key, value) in incoming {
        if !merged.contains_key(key) {
            continue;
        }
        let previous = merged.insert(key.clone(), value.clone());
        match serde_json::from_value::<SessionStats>(Value::Object(merged.clone())) {
            Ok(stats) => current = stats,
            Err(e) => {
                debug!("Dropping persisted field {key}: {e}");
                if let Some(previous) = previous {
                    merged.insert(key.clone(), previous);
                }
            }
        }
    }
    current
}

/// Bridges the in-memory stats and the shared store.
pub struct PersistenceBridge<S: Store> {
    store: Arc<S>,
}

impl<S: Store> Clone for PersistenceBridge<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: Store> PersistenceBridge<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Restore stats from the store, or defaults when nothing usable is stored.
    pub fn load(&self) -> SessionStats {
        let defaults = SessionStats::default();
        match self.store.get(Some(&[STATS_KEY][..])) {
            Ok(entries) => match entries.get(STATS_KEY) {
                Some(snapshot) => {
                    let stats = merge_snapshot(&defaults, snapshot);
                    info!("Restored stats snapshot ({} bets)", stats.total_bets);
                    stats
                }
                None => defaults,
            },
            Err(e) => {
                warn!("Failed to load stats snapshot: {e}");
                defaults
            }
        }
    }

    /// Write a snapshot of `stats` without blocking the caller.
    ///
    /// Inside a Tokio runtime the write runs on the blocking pool and the
    /// handle is returned; elsewhere it runs inline. Failures are logged only.
    pub fn save(&self, stats: &SessionStats) -> Option<JoinHandle<()>> {
        let snapshot = match serde_json::to_value(stats) {
            Ok(v) => v,
            Err(e) => {
                warn!("Failed to serialize stats snapshot: {e}");
                return None;
            }
        };
        let store = Arc::clone(&self.store);
        let write = move || {
            if let Err(e) = store.set(STATS_KEY, snapshot) {
                warn!("Failed to persist stats snapshot: {e}");
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => Some(handle.spawn_blocking(write)),
            Err(_) => {
                write();
                None
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.store.subscribe()
    }
}

/// Remove temp keys older than `max_age_ms`. Returns how many were removed.
///
/// Temp entries carry a millisecond `timestamp`; entries without one are
/// treated as infinitely old.
pub fn purge_stale_temp_keys<S: Store + ?Sized>(
    store: &S,
    now_ms: i64,
    max_age_ms: i64,
) -> Result<usize, StoreError> {
    let entries = store.get(None)?;
    let stale: Vec<String> = entries
        .iter()
        .filter(|(key, _)| key.starts_with(TEMP_KEY_PREFIX))
        .filter(|(_, value)| {
            let stamp = value.get("timestamp").and_then(Value::as_i64).unwrap_or(0);
            now_ms - stamp > max_age_ms
        })
        .map(|(key, _)| key.clone())
        .collect();
    if !stale.is_empty() {
        store.remove(&stale)?;
        debug!("Purged {} stale temp key(s)", stale.len());
    }
    Ok(stale.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CanonicalBet, HistoryPoint};
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn sample_stats() -> SessionStats {
        let mut stats = SessionStats::new();
        for (i, (amount, m)) in [(dec!(10), 2.0), (dec!(10), 0.0), (dec!(2.5), 1.2)]
            .into_iter()
            .enumerate()
        {
            let factor = rust_decimal::Decimal::try_from(m).unwrap();
            stats.apply(CanonicalBet {
                id: i.to_string(),
                amount,
                currency: "usd".into(),
                multiplier: m,
                win_amount: amount * factor,
                profit: amount * factor - amount,
                risk_level: "medium".into(),
                variant_info: 16,
                observed_at: "10:00:00".into(),
            })
            .unwrap();
        }
        stats
    }

    // ── merge_snapshot ─────────────────────────────────────────────

    #[test]
    fn merge_keeps_defaults_for_missing_fields() {
        let merged = merge_snapshot(
            &SessionStats::default(),
            &json!({"totalBets": 3, "wins": 2, "losses": 1}),
        );
        assert_eq!(merged.total_bets, 3);
        assert_eq!(merged.wins, 2);
        assert!(merged.recent_bets.is_empty());
        assert_eq!(merged.total_profit, dec!(0));
    }

    #[test]
    fn merge_replaces_collections() {
        let base = sample_stats();
        let merged = merge_snapshot(
            &base,
            &json!({"profitHistory": [{"x": 1, "y": 5, "time": "09:00:00"}]}),
        );
        assert_eq!(
            merged.profit_history,
            vec![HistoryPoint {
                index: 1,
                value: dec!(5),
                time_label: "09:00:00".into()
            }]
        );
        assert_eq!(merged.bet_history, base.bet_history);
    }

    #[test]
    fn merge_drops_only_bad_fields() {
        let merged = merge_snapshot(
            &SessionStats::default(),
            &json!({"totalBets": "lots", "wins": 4, "unknownField": true}),
        );
        assert_eq!(merged.total_bets, 0);
        assert_eq!(merged.wins, 4);
    }

    #[test]
    fn merge_accepts_legacy_recent_bets() {
        let merged = merge_snapshot(
            &SessionStats::default(),
            &json!({"recentBets": [{
                "amount": 1.5, "profit": -1.5, "multiplier": 0,
                "riskLevel": "high", "rows": 16, "finalSlot": 0, "timestamp": "8:01:02 PM"
            }]}),
        );
        assert_eq!(merged.recent_bets.len(), 1);
        assert_eq!(merged.recent_bets[0].amount, dec!(1.5));
        assert_eq!(merged.recent_bets[0].variant_info, 16);
        assert_eq!(merged.recent_bets[0].observed_at, "8:01:02 PM");
    }

    #[test]
    fn merge_ignores_non_objects() {
        let base = sample_stats();
        assert_eq!(merge_snapshot(&base, &json!([1, 2])), base);
    }

    // ── bridge ─────────────────────────────────────────────────────

    #[test]
    fn save_then_load_round_trips_without_runtime() {
        let bridge = PersistenceBridge::new(Arc::new(MemoryStore::new()));
        let stats = sample_stats();
        assert!(bridge.save(&stats).is_none());
        assert_eq!(bridge.load(), stats);
    }

    #[tokio::test]
    async fn save_runs_in_background_inside_runtime() {
        let bridge = PersistenceBridge::new(Arc::new(MemoryStore::new()));
        let stats = sample_stats();
        bridge.save(&stats).expect("spawned").await.unwrap();
        assert_eq!(bridge.load(), stats);
    }

    #[test]
    fn load_defaults_when_empty() {
        let bridge = PersistenceBridge::new(Arc::new(MemoryStore::new()));
        assert_eq!(bridge.load(), SessionStats::default());
    }

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("stats.json");
        let bridge = PersistenceBridge::new(Arc::new(JsonFileStore::open(&path).unwrap()));
        let stats = sample_stats();
        bridge.save(&stats);
        assert!(path.exists());

        let reopened = PersistenceBridge::new(Arc::new(JsonFileStore::open(&path).unwrap()));
        assert_eq!(reopened.load(), stats);
    }

    #[test]
    fn file_store_reports_only_external_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let store = JsonFileStore::open(&path).unwrap();
        let mut rx = store.subscribe();

        store.set(STATS_KEY, json!({"totalBets": 1})).unwrap();
        assert_eq!(store.poll_external().unwrap(), 0);

        // Another process rewrites the file.
        let other = JsonFileStore::open(&path).unwrap();
        other.set(STATS_KEY, json!({"totalBets": 7})).unwrap();

        assert_eq!(store.poll_external().unwrap(), 1);
        let change = rx.try_recv().unwrap();
        assert_eq!(change.key, STATS_KEY);
        assert_eq!(change.new_value, Some(json!({"totalBets": 7})));
    }

    #[test]
    fn reads_and_writes_surface_external_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let ours = JsonFileStore::open(&path).unwrap();
        let mut rx = ours.subscribe();
        let theirs = JsonFileStore::open(&path).unwrap();

        theirs.set(STATS_KEY, json!({"totalBets": 7})).unwrap();
        assert_eq!(purge_stale_temp_keys(&ours, 1_000_000, 300_000).unwrap(), 0);
        let change = rx.try_recv().unwrap();
        assert_eq!(change.key, STATS_KEY);
        assert_eq!(change.new_value, Some(json!({"totalBets": 7})));
        assert_eq!(ours.poll_external().unwrap(), 0);

        // Writing one key still reports the others.
        theirs.set("duelTemp_a", json!({"timestamp": 1})).unwrap();
        ours.set(STATS_KEY, json!({"totalBets": 8})).unwrap();
        assert_eq!(rx.try_recv().unwrap().key, "duelTemp_a");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn memory_store_publishes_injected_writes() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();
        store.set("local", json!(1)).unwrap();
        assert!(rx.try_recv().is_err());
        store.inject_external(STATS_KEY, json!({"wins": 1}));
        assert_eq!(rx.try_recv().unwrap().key, STATS_KEY);
    }

    // ── temp key gc ────────────────────────────────────────────────

    #[test]
    fn purges_only_stale_temp_keys() {
        let store = MemoryStore::new();
        let now = 1_000_000;
        store.set("duelTemp_old", json!({"timestamp": now - 400_000})).unwrap();
        store.set("duelTemp_fresh", json!({"timestamp": now - 1_000})).unwrap();
        store.set("duelTemp_nostamp", json!({})).unwrap();
        store.set(STATS_KEY, json!({"totalBets": 1})).unwrap();

        let removed = purge_stale_temp_keys(&store, now, 300_000).unwrap();
        assert_eq!(removed, 2);
        let left = store.get(None).unwrap();
        assert!(left.contains_key("duelTemp_fresh"));
        assert!(left.contains_key(STATS_KEY));
        assert!(!left.contains_key("duelTemp_old"));
    }
}
