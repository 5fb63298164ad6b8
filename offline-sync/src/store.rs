//! Durable queue storage using RocksDB
//!
//! # Column Families
//!
//! - `entries` - Queue entries (key: transaction_id)
//! - `indices` - User → entries (key: len(user_id) || user_id || transaction_id)
//! - `sync_log` - Sync run reports (key: run_id, UUID v7 so keys sort by time)
//! - `profile_cache` - Device-side behavioral profile snapshots (key: user_id)
//! - `online` - Online evaluation journal (key: transaction_id)
//!
//! Every write goes through a synced `WriteBatch`, so an entry is on disk
//! before `put` returns.

use crate::{
    config::QueueConfig,
    types::{OnlineRecord, QueueEntry, QueueState, QueueStats, SyncReport},
    Error, Result,
};
use fraud_engine::{BehavioralProfile, UserId};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions, DB,
};
use uuid::Uuid;

const CF_ENTRIES: &str = "entries";
const CF_INDICES: &str = "indices";
const CF_SYNC_LOG: &str = "sync_log";
const CF_PROFILE_CACHE: &str = "profile_cache";
const CF_ONLINE: &str = "online";

/// RocksDB-backed queue store
pub struct QueueStore {
    db: DB,
    sync_writes: bool,
}

impl QueueStore {
    /// Open or create the queue database
    pub fn open(config: &QueueConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ENTRIES, Options::default()),
            ColumnFamilyDescriptor::new(CF_INDICES, Options::default()),
            ColumnFamilyDescriptor::new(CF_SYNC_LOG, Options::default()),
            ColumnFamilyDescriptor::new(CF_PROFILE_CACHE, Options::default()),
            ColumnFamilyDescriptor::new(CF_ONLINE, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, &config.data_dir, cf_descriptors)?;

        tracing::info!(path = ?config.data_dir, "Opened offline queue storage");

        Ok(Self {
            db,
            sync_writes: config.sync_writes,
        })
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        self.db.write_opt(batch, &opts)?;
        Ok(())
    }

    fn index_prefix(user_id: &UserId) -> Vec<u8> {
        let raw = user_id.as_str().as_bytes();
        let mut key = Vec::with_capacity(4 + raw.len() + 16);
        key.extend_from_slice(&(raw.len() as u32).to_be_bytes());
        key.extend_from_slice(raw);
        key
    }

    fn decode_entry(value: &[u8]) -> Result<QueueEntry> {
        let entry: QueueEntry = bincode::deserialize(value)?;
        entry.verify_checksum()?;
        Ok(entry)
    }

    // Entries

    /// Insert or overwrite an entry with its index row
    pub fn put(&self, entry: &QueueEntry) -> Result<()> {
        let mut batch = WriteBatch::default();

        let cf_entries = self.cf_handle(CF_ENTRIES)?;
        batch.put_cf(cf_entries, entry.id().as_bytes(), bincode::serialize(entry)?);

        let cf_indices = self.cf_handle(CF_INDICES)?;
        let mut index_key = Self::index_prefix(&entry.transaction.user_id);
        index_key.extend_from_slice(entry.id().as_bytes());
        batch.put_cf(cf_indices, &index_key, b"");

        self.write(batch)?;

        tracing::debug!(
            transaction_id = %entry.id(),
            state = entry.state.as_str(),
            "Queue entry persisted"
        );
        Ok(())
    }

    /// Entry by transaction id
    pub fn get(&self, transaction_id: Uuid) -> Result<Option<QueueEntry>> {
        let cf = self.cf_handle(CF_ENTRIES)?;
        match self.db.get_cf(cf, transaction_id.as_bytes())? {
            Some(value) => Ok(Some(Self::decode_entry(&value)?)),
            None => Ok(None),
        }
    }

    /// Whether an entry exists
    pub fn contains(&self, transaction_id: Uuid) -> Result<bool> {
        let cf = self.cf_handle(CF_ENTRIES)?;
        Ok(self.db.get_pinned_cf(cf, transaction_id.as_bytes())?.is_some())
    }

    /// All entries for one user
    pub fn user_entries(&self, user_id: &UserId) -> Result<Vec<QueueEntry>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let prefix = Self::index_prefix(user_id);
        let iter = self
            .db
            .iterator_cf(cf_indices, IteratorMode::From(&prefix, Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let id_bytes: [u8; 16] = key[prefix.len()..]
                .try_into()
                .map_err(|_| Error::Storage("Malformed index key".to_string()))?;
            let id = Uuid::from_bytes(id_bytes);
            let entry = self
                .get(id)?
                .ok_or_else(|| Error::Storage(format!("Index points at missing entry {}", id)))?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// All readable entries in `state`, oldest transaction first
    pub fn entries_in_state(&self, state: QueueState) -> Result<Vec<QueueEntry>> {
        let mut entries: Vec<_> = self
            .scan()?
            .0
            .into_iter()
            .filter(|e| e.state == state)
            .collect();
        entries.sort_by_key(|e| (e.transaction.timestamp, e.id()));
        Ok(entries)
    }

    /// Every readable entry
    pub fn all_entries(&self) -> Result<Vec<QueueEntry>> {
        Ok(self.scan()?.0)
    }

    /// Counts per state, plus entries that could not be read
    pub fn stats(&self) -> Result<QueueStats> {
        let (entries, unreadable) = self.scan()?;
        let mut stats = QueueStats::default();
        for entry in entries {
            stats.add(entry.state);
        }
        stats.unreadable = unreadable;
        Ok(stats)
    }

    /// Decoded entries and the number skipped. A corrupt entry stays on disk
    /// for inspection; it never fails the scan.
    fn scan(&self) -> Result<(Vec<QueueEntry>, usize)> {
        let cf = self.cf_handle(CF_ENTRIES)?;
        let mut entries = Vec::new();
        let mut unreadable = 0;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            match Self::decode_entry(&value) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    unreadable += 1;
                    tracing::error!(
                        transaction_id = ?Uuid::from_slice(&key).ok(),
                        error = %e,
                        "Skipping unreadable queue entry"
                    );
                }
            }
        }
        Ok((entries, unreadable))
    }

    // Sync log

    /// Append a sync report, trimming the log to `retention` reports
    pub fn record_sync(&self, report: &SyncReport, retention: usize) -> Result<()> {
        let cf = self.cf_handle(CF_SYNC_LOG)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(cf, report.run_id.as_bytes(), bincode::serialize(report)?);

        // Keys are time-ordered; drop the oldest beyond retention
        let existing: Vec<Box<[u8]>> = self
            .db
            .iterator_cf(cf, IteratorMode::Start)
            .map(|item| item.map(|(k, _)| k))
            .collect::<std::result::Result<_, _>>()?;
        let excess = (existing.len() + 1).saturating_sub(retention.max(1));
        for key in existing.iter().take(excess) {
            batch.delete_cf(cf, key);
        }

        self.write(batch)
    }

    /// Most recent sync reports, newest first
    pub fn recent_syncs(&self, limit: usize) -> Result<Vec<SyncReport>> {
        let cf = self.cf_handle(CF_SYNC_LOG)?;
        let mut reports = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::End).take(limit) {
            let (_, value) = item?;
            reports.push(bincode::deserialize(&value)?);
        }
        Ok(reports)
    }

    // Profile cache

    /// Store a device-side profile snapshot
    pub fn put_cached_profile(&self, profile: &BehavioralProfile) -> Result<()> {
        let cf = self.cf_handle(CF_PROFILE_CACHE)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(cf, profile.user_id.as_str().as_bytes(), bincode::serialize(profile)?);
        self.write(batch)
    }

    /// Device-side profile snapshot for a user
    pub fn cached_profile(&self, user_id: &UserId) -> Result<Option<BehavioralProfile>> {
        let cf = self.cf_handle(CF_PROFILE_CACHE)?;
        match self.db.get_cf(cf, user_id.as_str().as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    // Online journal

    /// Insert or overwrite an online record
    pub fn put_online(&self, record: &OnlineRecord) -> Result<()> {
        let cf = self.cf_handle(CF_ONLINE)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(cf, record.id().as_bytes(), bincode::serialize(record)?);
        self.write(batch)
    }

    /// Online record by transaction id
    pub fn get_online(&self, transaction_id: Uuid) -> Result<Option<OnlineRecord>> {
        let cf = self.cf_handle(CF_ONLINE)?;
        match self.db.get_cf(cf, transaction_id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Online challenges still waiting for a resolution
    pub fn open_challenges(&self) -> Result<usize> {
        let cf = self.cf_handle(CF_ONLINE)?;
        let mut open = 0;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            match bincode::deserialize::<OnlineRecord>(&value) {
                Ok(record) if record.is_open() => open += 1,
                Ok(_) => {}
                Err(e) => tracing::error!(
                    transaction_id = ?Uuid::from_slice(&key).ok(),
                    error = %e,
                    "Skipping unreadable online record"
                ),
            }
        }
        Ok(open)
    }
}
