//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `entries` - Applied entries (key: transaction_id)
//! - `totals` - Per-user running totals (key: user_id)
//! - `indices` - Secondary index user → entries (key: len(user_id) || user_id || transaction_id)

use crate::{
    error::{Error, Result},
    types::{LedgerEntry, UserTotals},
    Config,
};
use fraud_engine::UserId;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions, DB,
};
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_ENTRIES: &str = "entries";
const CF_TOTALS: &str = "totals";
const CF_INDICES: &str = "indices";

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
    sync_writes: bool,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.db.path())
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        // Database options
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ENTRIES, Self::cf_options_entries()),
            ColumnFamilyDescriptor::new(CF_TOTALS, Self::cf_options_totals()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(
            path = ?path,
            sync_writes = config.sync_writes,
            "Opened ledger storage"
        );

        Ok(Self {
            db: Arc::new(db),
            sync_writes: config.sync_writes,
        })
    }

    // Column family options

    fn cf_options_entries() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_totals() -> Options {
        let mut opts = Options::default();
        // Read on every apply
        opts.set_compression_type(rocksdb::DBCompressionType::None);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn write_options(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        opts
    }

    // Entry operations

    /// Whether `transaction_id` has an entry
    pub fn contains(&self, transaction_id: Uuid) -> Result<bool> {
        let cf = self.cf_handle(CF_ENTRIES)?;
        Ok(self.db.get_pinned_cf(cf, transaction_id.as_bytes())?.is_some())
    }

    /// Get entry by transaction id
    pub fn get_entry(&self, transaction_id: Uuid) -> Result<Option<LedgerEntry>> {
        let cf = self.cf_handle(CF_ENTRIES)?;
        match self.db.get_cf(cf, transaction_id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// All entries for a user, in transaction id order
    pub fn user_entries(&self, user_id: &UserId) -> Result<Vec<LedgerEntry>> {
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
            let transaction_id = Uuid::from_bytes(id_bytes);

            let entry = self.get_entry(transaction_id)?.ok_or_else(|| {
                Error::Storage(format!("Index points at missing entry {}", transaction_id))
            })?;
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Running totals for a user (zero if the user has no entries)
    pub fn get_user_totals(&self, user_id: &UserId) -> Result<UserTotals> {
        let cf = self.cf_handle(CF_TOTALS)?;
        match self.db.get_cf(cf, user_id.as_str().as_bytes())? {
            Some(value) => Ok(bincode::deserialize(&value)?),
            None => Ok(UserTotals::empty(user_id.clone())),
        }
    }

    // Batch operations (atomic)

    /// Write entry, updated totals and index in one batch
    pub fn apply_entry_atomic(&self, entry: &LedgerEntry, totals: &UserTotals) -> Result<()> {
        let mut batch = WriteBatch::default();

        // 1. Entry
        let cf_entries = self.cf_handle(CF_ENTRIES)?;
        batch.put_cf(cf_entries, entry.transaction_id.as_bytes(), bincode::serialize(entry)?);

        // 2. Totals
        let cf_totals = self.cf_handle(CF_TOTALS)?;
        batch.put_cf(cf_totals, entry.user_id.as_str().as_bytes(), bincode::serialize(totals)?);

        // 3. Index: user || transaction_id -> empty
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let mut index_key = Self::index_prefix(&entry.user_id);
        index_key.extend_from_slice(entry.transaction_id.as_bytes());
        batch.put_cf(cf_indices, &index_key, b"");

        self.db.write_opt(batch, &self.write_options())?;

        tracing::debug!(
            transaction_id = %entry.transaction_id,
            user_id = %entry.user_id,
            "Entry written"
        );

        Ok(())
    }

    // Index key helpers

    // Length-prefixed so one user id can never be a prefix of another.
    fn index_prefix(user_id: &UserId) -> Vec<u8> {
        let raw = user_id.as_str().as_bytes();
        let mut key = Vec::with_capacity(4 + raw.len() + 16);
        key.extend_from_slice(&(raw.len() as u32).to_be_bytes());
        key.extend_from_slice(raw);
        key
    }

    // Statistics

    /// Approximate number of entries
    pub fn approximate_entry_count(&self) -> Result<u64> {
        let cf = self.cf_handle(CF_ENTRIES)?;
        let prop = self
            .db
            .property_int_value_cf(cf, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);
        Ok(prop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntrySource;
    use chrono::{TimeZone, Utc};
    use fraud_engine::{RiskScore, Transaction};
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn test_config() -> (Config, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::with_data_dir(temp_dir.path());
        (config, temp_dir)
    }

    fn test_entry(user: &str, amount: i64) -> LedgerEntry {
        let tx = Transaction::new(
            UserId::new(user),
            Decimal::from(amount),
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap(),
            "DEV-1",
            "school fees",
        );
        LedgerEntry::from_transaction(&tx, RiskScore::ZERO, EntrySource::Online)
    }

    fn apply(storage: &Storage, entry: &LedgerEntry) {
        let totals = storage.get_user_totals(&entry.user_id).unwrap().with_entry(entry);
        storage.apply_entry_atomic(entry, &totals).unwrap();
    }

    #[test]
    fn test_storage_open() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();
        assert!(storage.db.cf_handle(CF_ENTRIES).is_some());
        assert!(storage.db.cf_handle(CF_TOTALS).is_some());
        assert!(storage.db.cf_handle(CF_INDICES).is_some());
    }

    #[test]
    fn test_apply_and_get_entry() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        let entry = test_entry("U1", 500);
        assert!(!storage.contains(entry.transaction_id).unwrap());

        apply(&storage, &entry);

        assert!(storage.contains(entry.transaction_id).unwrap());
        assert_eq!(storage.get_entry(entry.transaction_id).unwrap(), Some(entry.clone()));

        let totals = storage.get_user_totals(&entry.user_id).unwrap();
        assert_eq!(totals.entry_count, 1);
        assert_eq!(totals.total_amount, Decimal::from(500));
    }

    #[test]
    fn test_user_entries_do_not_leak_across_prefixes() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        // "U1" is a byte prefix of "U10"
        for _ in 0..3 {
            apply(&storage, &test_entry("U1", 10));
        }
        apply(&storage, &test_entry("U10", 20));

        let u1 = storage.user_entries(&UserId::new("U1")).unwrap();
        assert_eq!(u1.len(), 3);
        assert!(u1.iter().all(|e| e.user_id.as_str() == "U1"));
        assert_eq!(storage.user_entries(&UserId::new("U10")).unwrap().len(), 1);
        assert!(storage.user_entries(&UserId::new("U2")).unwrap().is_empty());
    }

    #[test]
    fn test_survives_reopen() {
        let (config, _temp) = test_config();
        let entry = test_entry("U1", 75);
        {
            let storage = Storage::open(&config).unwrap();
            apply(&storage, &entry);
        }

        let storage = Storage::open(&config).unwrap();
        assert_eq!(storage.get_entry(entry.transaction_id).unwrap(), Some(entry));
    }
}
