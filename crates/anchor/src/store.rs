//! redb-backed persistent value store.
//!
//! [`PersistentStore`] keeps long-lived DHT values on disk so that an anchor
//! node can put them back on the network after a restart. Every database
//! access, migration included, runs under one store-wide lock. Background
//! work (restore and periodic cleanup) takes that lock per record and never
//! across an await point.

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Duration,
};

use parking_lot::{Mutex, RwLock};
use redb::{Database, ReadableTable};
use strand_dht::{DhtKey, TtlClass, ValueId, current_unix_timestamp};
use strum::Display;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, trace};

use crate::{
    AnchorConfig, RestoreReport, StoreError, StoreResult, StoredValueRecord,
    metrics::StoreMetrics,
    record::RecordBody,
    schema::{self, MigrationReport, VALUES_TABLE},
};

/// Lifecycle state of a [`PersistentStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum StoreState {
    /// Database file opened, schema not yet checked.
    Uninitialized,
    /// Schema is current; tables are being prepared.
    SchemaChecked,
    /// Serving reads and writes.
    Ready,
    /// Serving reads and writes while a restore pass runs.
    RestoreInProgress,
    /// Closed; every operation fails with [`StoreError::Closed`].
    Closed,
}

impl StoreState {
    /// Whether the lifecycle allows moving from `self` to `next`.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Uninitialized, Self::SchemaChecked)
                | (Self::SchemaChecked, Self::Ready)
                | (Self::Ready, Self::RestoreInProgress)
                | (Self::RestoreInProgress, Self::Ready)
                | (Self::Ready | Self::RestoreInProgress, Self::Closed)
        )
    }
}

/// Move `state` to `next` if the lifecycle allows it.
fn transition(state: &RwLock<StoreState>, next: StoreState) -> bool {
    let mut current = state.write();
    if !current.can_transition_to(next) {
        return false;
    }
    debug!(from = %*current, to = %next, "store state changed");
    *current = next;
    true
}

/// Point-in-time store statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    /// Records currently stored, expired ones included until cleanup.
    pub rows: u64,
    /// Size of the database file in bytes.
    pub disk_bytes: u64,
    /// Records written.
    pub puts: u64,
    /// Puts ignored because of their TTL class.
    pub filtered: u64,
    /// Lookups served.
    pub gets: u64,
    /// Values republished by restore.
    pub republishes: u64,
    /// Failed operations, restore failures included.
    pub errors: u64,
    /// Whether a restore pass is running.
    pub restore_in_progress: bool,
    /// Current lifecycle state.
    pub state: StoreState,
}

#[derive(Debug, Default)]
struct Counters {
    puts: AtomicU64,
    filtered: AtomicU64,
    gets: AtomicU64,
    republishes: AtomicU64,
    errors: AtomicU64,
}

/// Persistent value store.
pub struct PersistentStore {
    db: Database,
    path: PathBuf,
    /// Serializes every database access.
    lock: Mutex<()>,
    state: RwLock<StoreState>,
    persist_classes: Vec<TtlClass>,
    cleanup_interval: Duration,
    migration: Option<MigrationReport>,
    counters: Counters,
    pub(crate) metrics: StoreMetrics,
    pub(crate) shutdown: watch::Sender<bool>,
    pub(crate) restore_started: AtomicBool,
    pub(crate) restore_task: Mutex<Option<JoinHandle<RestoreReport>>>,
    pub(crate) background: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for PersistentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentStore")
            .field("path", &self.path)
            .field("state", &*self.state.read())
            .field("persist_classes", &self.persist_classes)
            .finish_non_exhaustive()
    }
}

impl PersistentStore {
    /// Open or create the store at the configured database path.
    pub fn from_config(config: &impl AnchorConfig) -> StoreResult<Self> {
        Self::open(config.db_path(), config)
    }

    /// Open or create the store at `path`, migrating a legacy schema.
    ///
    /// Fails if the file cannot be brought to the current schema; a failed
    /// migration leaves the file as it was.
    pub fn open(path: impl AsRef<Path>, config: &impl AnchorConfig) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(&path)?;
        let state = RwLock::new(StoreState::Uninitialized);
        trace!(path = %path.display(), "opened store database");

        let lock = Mutex::new(());
        let migration = {
            let _guard = lock.lock();
            schema::prepare(&db)?
        };
        transition(&state, StoreState::SchemaChecked);

        let metrics = StoreMetrics::default();
        if let Some(report) = &migration {
            metrics.migrated_rows_total.increment(report.migrated);
        }

        let (shutdown, _) = watch::channel(false);
        let store = Self {
            db,
            path,
            lock,
            state,
            persist_classes: config.persist_classes(),
            cleanup_interval: config.cleanup_interval(),
            migration,
            counters: Counters::default(),
            metrics,
            shutdown,
            restore_started: AtomicBool::new(false),
            restore_task: Mutex::new(None),
            background: Mutex::new(Vec::new()),
        };
        transition(&store.state, StoreState::Ready);

        info!(
            path = %store.path.display(),
            persist_classes = ?store.persist_classes,
            migrated = store.migration.is_some(),
            "persistent store ready"
        );
        Ok(store)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StoreState {
        *self.state.read()
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Interval used by [`start_cleanup`](Self::start_cleanup).
    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }

    /// Summary of the legacy migration performed by [`open`](Self::open), if any.
    pub fn migration_report(&self) -> Option<MigrationReport> {
        self.migration
    }

    /// Whether values of `class` are kept.
    pub fn is_persist_worthy(&self, class: TtlClass) -> bool {
        self.persist_classes.contains(&class)
    }

    /// Whether a restore pass is running.
    pub fn restore_in_progress(&self) -> bool {
        self.state() == StoreState::RestoreInProgress
    }

    /// Insert or replace a record by `(key, value_id)`.
    ///
    /// Records whose TTL class is not persist-worthy are dropped silently.
    pub fn put(&self, record: &StoredValueRecord) -> StoreResult<()> {
        self.ensure_open()?;
        if !self.is_persist_worthy(record.ttl_class) {
            trace!(key = %record.key, ttl_class = %record.ttl_class, "ignoring short-lived value");
            self.counters.filtered.fetch_add(1, Ordering::Relaxed);
            self.metrics.filtered_total.increment(1);
            return Ok(());
        }

        let result = self.write_record(record);
        if result.is_ok() {
            trace!(key = %record.key, value_id = record.value_id, "stored record");
            self.counters.puts.fetch_add(1, Ordering::Relaxed);
            self.metrics.puts_total.increment(1);
        }
        self.track(result)
    }

    /// Store a value as received from the DHT.
    pub fn put_packed(&self, key: &DhtKey, packed: &[u8]) -> StoreResult<()> {
        self.ensure_open()?;
        let record = self.track(StoredValueRecord::from_packed(*key, packed))?;
        self.put(&record)
    }

    /// All non-expired records stored under `key`.
    pub fn get(&self, key: &DhtKey) -> StoreResult<Vec<StoredValueRecord>> {
        self.ensure_open()?;
        self.counters.gets.fetch_add(1, Ordering::Relaxed);
        self.metrics.gets_total.increment(1);

        let now = current_unix_timestamp();
        let result = self.read_key(key).map(|records| {
            records
                .into_iter()
                .filter(|record| !record.is_expired(now))
                .collect()
        });
        self.track(result)
    }

    /// Delete every record whose expiry has passed. Returns how many were removed.
    pub fn cleanup(&self) -> StoreResult<usize> {
        self.ensure_open()?;
        let result = self.remove_expired(current_unix_timestamp());
        if let Ok(removed) = result {
            if removed > 0 {
                debug!(removed, "removed expired records");
            }
            self.metrics.cleanup_removed_total.increment(removed as u64);
        }
        self.track(result)
    }

    /// Current statistics.
    pub fn stats(&self) -> StoreResult<StoreStats> {
        self.ensure_open()?;
        let rows = self.track(self.count_rows())?;
        let disk_bytes = std::fs::metadata(&self.path)?.len();
        Ok(StoreStats {
            rows,
            disk_bytes,
            puts: self.counters.puts.load(Ordering::Relaxed),
            filtered: self.counters.filtered.load(Ordering::Relaxed),
            gets: self.counters.gets.load(Ordering::Relaxed),
            republishes: self.counters.republishes.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            restore_in_progress: self.restore_in_progress(),
            state: self.state(),
        })
    }

    /// Close the store.
    ///
    /// Signals background tasks to stop and waits for them. Later calls on
    /// this store fail with [`StoreError::Closed`]. Closing twice is a no-op.
    pub async fn close(&self) -> StoreResult<()> {
        if !transition(&self.state, StoreState::Closed) {
            return Ok(());
        }
        self.shutdown.send_replace(true);

        let restore = self.restore_task.lock().take();
        let background = std::mem::take(&mut *self.background.lock());
        if let Some(handle) = restore {
            if let Err(err) = handle.await {
                debug!(error = %err, "restore task did not finish cleanly");
            }
        }
        for handle in background {
            if let Err(err) = handle.await {
                debug!(error = %err, "background task did not finish cleanly");
            }
        }

        info!(path = %self.path.display(), "persistent store closed");
        Ok(())
    }

    pub(crate) fn ensure_open(&self) -> StoreResult<()> {
        match self.state() {
            StoreState::Closed => Err(StoreError::Closed),
            _ => Ok(()),
        }
    }

    /// Move between `Ready` and `RestoreInProgress`. Never leaves `Closed`.
    pub(crate) fn set_restoring(&self, restoring: bool) {
        let next = if restoring { StoreState::RestoreInProgress } else { StoreState::Ready };
        transition(&self.state, next);
        self.metrics
            .restore_in_progress
            .set(if self.restore_in_progress() { 1.0 } else { 0.0 });
    }

    pub(crate) fn record_republish(&self, ok: bool) {
        if ok {
            self.counters.republishes.fetch_add(1, Ordering::Relaxed);
            self.metrics.republished_total.increment(1);
        } else {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
            self.metrics.republish_failures_total.increment(1);
        }
    }

    /// Count failures on the way out.
    fn track<T>(&self, result: StoreResult<T>) -> StoreResult<T> {
        if result.is_err() {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
            self.metrics.errors_total.increment(1);
        }
        result
    }

    fn write_record(&self, record: &StoredValueRecord) -> StoreResult<()> {
        let row = record.body().encode()?;
        let _guard = self.lock.lock();
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(VALUES_TABLE)?;
            table.insert((record.key.as_bytes(), record.value_id), row.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn read_key(&self, key: &DhtKey) -> StoreResult<Vec<StoredValueRecord>> {
        let _guard = self.lock.lock();
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VALUES_TABLE)?;

        let hash = key.as_bytes();
        let mut records = Vec::new();
        for row in table.range((hash, 0u64)..=(hash, u64::MAX))? {
            let (k, v) = row?;
            let (_, value_id) = k.value();
            let body = RecordBody::decode(v.value())?;
            records.push(StoredValueRecord::from_row(*hash, value_id, body)?);
        }
        Ok(records)
    }

    /// Load one record. `None` if it was removed in the meantime.
    pub(crate) fn load(&self, key: &DhtKey, value_id: ValueId) -> StoreResult<Option<StoredValueRecord>> {
        self.ensure_open()?;
        let _guard = self.lock.lock();
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VALUES_TABLE)?;
        let Some(row) = table.get((key.as_bytes(), value_id))? else {
            return Ok(None);
        };
        let body = RecordBody::decode(row.value())?;
        StoredValueRecord::from_row(*key.as_bytes(), value_id, body).map(Some)
    }

    /// Identities of every stored record.
    pub(crate) fn snapshot_keys(&self) -> StoreResult<Vec<(DhtKey, ValueId)>> {
        self.ensure_open()?;
        let _guard = self.lock.lock();
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VALUES_TABLE)?;
        let mut keys = Vec::new();
        for row in table.iter()? {
            let (k, _) = row?;
            let (hash, value_id) = k.value();
            keys.push((DhtKey::new(*hash), value_id));
        }
        Ok(keys)
    }

    fn remove_expired(&self, now: u64) -> StoreResult<usize> {
        let _guard = self.lock.lock();
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(VALUES_TABLE)?;
            let mut expired = Vec::new();
            for row in table.iter()? {
                let (k, v) = row?;
                let body = RecordBody::decode(v.value())?;
                if body.expires_at != 0 && body.expires_at <= now {
                    let (hash, value_id) = k.value();
                    expired.push((*hash, value_id));
                }
            }
            for (hash, value_id) in &expired {
                table.remove((hash, *value_id))?;
            }
            expired.len()
        };
        txn.commit()?;
        Ok(removed)
    }

    fn count_rows(&self) -> StoreResult<u64> {
        let _guard = self.lock.lock();
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VALUES_TABLE)?;
        let mut count = 0u64;
        for row in table.iter()? {
            row?;
            count += 1;
        }
        Ok(count)
    }

    /// Interval between cleanup passes, clamped to something tokio accepts.
    pub(crate) fn cleanup_period(interval: Duration) -> Duration {
        interval.max(Duration::from_millis(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AnchorArgs;
    use assert_matches::assert_matches;
    use strand_dht::PackedValue;
    use tempfile::tempdir;

    const YEAR: u32 = 366 * 24 * 3600;

    fn packed(id: ValueId, ttl_secs: u32, created_at: u64, data: &[u8]) -> Vec<u8> {
        PackedValue {
            id,
            owner: vec![1; 8],
            signature: vec![2; 32],
            ttl_secs,
            created_at,
            data: data.to_vec(),
        }
        .pack()
        .unwrap()
    }

    fn record(key: &str, id: ValueId, ttl_secs: u32) -> StoredValueRecord {
        let now = current_unix_timestamp();
        StoredValueRecord::from_packed(DhtKey::from_name(key), &packed(id, ttl_secs, now, key.as_bytes()))
            .unwrap()
    }

    fn open(dir: &tempfile::TempDir) -> PersistentStore {
        PersistentStore::open(dir.path().join("anchor.redb"), &AnchorArgs::default()).unwrap()
    }

    #[test]
    fn test_ttl_filtering() {
        let dir = tempdir().unwrap();
        let store = open(&dir);

        store.put(&record("short", 1, 600)).unwrap();
        assert_eq!(store.stats().unwrap().rows, 0);
        assert_eq!(store.stats().unwrap().filtered, 1);

        store.put(&record("long", 1, YEAR)).unwrap();
        assert_eq!(store.stats().unwrap().rows, 1);

        store.put(&record("forever", 1, 0)).unwrap();
        assert_eq!(store.stats().unwrap().rows, 2);
    }

    #[test]
    fn test_put_replaces_same_slot() {
        let dir = tempdir().unwrap();
        let store = open(&dir);
        let key = DhtKey::from_name("k");
        let now = current_unix_timestamp();

        store.put_packed(&key, &packed(1, 0, now, b"first")).unwrap();
        store.put_packed(&key, &packed(1, 0, now + 1, b"second")).unwrap();
        store.put_packed(&key, &packed(2, 0, now, b"other")).unwrap();

        let records = store.get(&key).unwrap();
        assert_eq!(records.len(), 2);
        let first = PackedValue::unpack(&records[0].packed_value).unwrap();
        assert_eq!(first.data, b"second");
        assert_eq!(records[1].value_id, 2);
        assert!(store.get(&DhtKey::from_name("absent")).unwrap().is_empty());
    }

    #[test]
    fn test_get_hides_expired_and_cleanup_removes_them() {
        let dir = tempdir().unwrap();
        let store = PersistentStore::open(
            dir.path().join("anchor.redb"),
            &AnchorArgs {
                persist_classes: vec![TtlClass::Ephemeral, TtlClass::Permanent],
                ..Default::default()
            },
        )
        .unwrap();
        let key = DhtKey::from_name("k");

        // Expired long ago, still alive, never expires.
        store.put_packed(&key, &packed(1, 10, 1_000, b"old")).unwrap();
        store.put_packed(&key, &packed(2, 3_600, current_unix_timestamp(), b"fresh")).unwrap();
        store.put_packed(&key, &packed(3, 0, 1_000, b"permanent")).unwrap();

        let ids: Vec<_> = store.get(&key).unwrap().iter().map(|r| r.value_id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(store.stats().unwrap().rows, 3);

        assert_eq!(store.cleanup().unwrap(), 1);
        assert_eq!(store.cleanup().unwrap(), 0);
        assert_eq!(store.stats().unwrap().rows, 2);
    }

    #[test]
    fn test_undecodable_packed_value_counts_as_error() {
        let dir = tempdir().unwrap();
        let store = open(&dir);
        assert_matches!(
            store.put_packed(&DhtKey::from_name("k"), &[0xff, 0xff]),
            Err(StoreError::InvalidRecord(_))
        );
        assert_eq!(store.stats().unwrap().errors, 1);
    }

    #[test]
    fn test_reopen_keeps_records() {
        let dir = tempdir().unwrap();
        {
            let store = open(&dir);
            store.put(&record("k", 4, 0)).unwrap();
            assert!(store.stats().unwrap().disk_bytes > 0);
        }
        let store = open(&dir);
        assert_eq!(store.migration_report(), None);
        assert_eq!(store.get(&DhtKey::from_name("k")).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_closed_store_rejects_operations() {
        let dir = tempdir().unwrap();
        let store = open(&dir);
        assert_eq!(store.state(), StoreState::Ready);

        store.close().await.unwrap();
        assert_eq!(store.state(), StoreState::Closed);
        assert_matches!(store.put(&record("k", 1, 0)), Err(StoreError::Closed));
        assert_matches!(store.get(&DhtKey::from_name("k")), Err(StoreError::Closed));
        assert_matches!(store.cleanup(), Err(StoreError::Closed));
        assert_matches!(store.stats(), Err(StoreError::Closed));
        store.close().await.unwrap();
    }

    #[test]
    fn test_from_config_uses_configured_path_and_interval() {
        let dir = tempdir().unwrap();
        let args = AnchorArgs {
            db_path: dir.path().join("data").join("values.redb"),
            cleanup_interval_secs: 90,
            ..Default::default()
        };
        let store = PersistentStore::from_config(&args).unwrap();
        assert_eq!(store.path(), args.db_path.as_path());
        assert!(args.db_path.exists());
        assert_eq!(store.cleanup_interval(), Duration::from_secs(90));
    }

    #[test]
    fn test_state_transitions() {
        use StoreState::*;

        let allowed = [
            (Uninitialized, SchemaChecked),
            (SchemaChecked, Ready),
            (Ready, RestoreInProgress),
            (RestoreInProgress, Ready),
            (Ready, Closed),
            (RestoreInProgress, Closed),
        ];
        let all = [Uninitialized, SchemaChecked, Ready, RestoreInProgress, Closed];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }

        let state = RwLock::new(Uninitialized);
        assert!(!transition(&state, Ready));
        assert!(transition(&state, SchemaChecked));
        assert!(transition(&state, Ready));
        assert!(transition(&state, Closed));
        assert!(!transition(&state, Ready));
        assert_eq!(*state.read(), Closed);
    }

    #[test]
    fn test_open_migrates_legacy_file() {
        use crate::schema::tests::{legacy_body, write_legacy};

        let dir = tempdir().unwrap();
        let path = dir.path().join("anchor.redb");
        let key = DhtKey::from_name("k");
        {
            let db = Database::create(&path).unwrap();
            write_legacy(&db, &[(key, 100, legacy_body(1, 100)), (key, 200, legacy_body(1, 200))]);
        }

        let store = PersistentStore::open(&path, &AnchorArgs::default()).unwrap();
        let report = store.migration_report().unwrap();
        assert_eq!((report.migrated, report.duplicates), (1, 1));

        let records = store.get(&key).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].created_at, 200);
    }

    #[test]
    fn test_open_fails_on_garbage_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("anchor.redb");
        std::fs::write(&path, vec![0x5a; 4096]).unwrap();

        assert!(PersistentStore::open(&path, &AnchorArgs::default()).is_err());
    }
}
