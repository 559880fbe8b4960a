//! RocksDB-backed transaction log.
//!
//! All operations are synchronous blocking I/O. Callers in async contexts
//! should keep critical sections short or use `spawn_blocking` if needed.

use crate::log::{StorageError, TransactionLog};
use blockflow_types::BlockTransaction;
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, WriteOptions, DB};
use std::path::Path;

/// Column family holding finalized records, keyed by big-endian height.
const CF_TRANSACTIONS: &str = "transactions";

/// Well-known key in the default column family carrying the format version.
const KEY_FORMAT_VERSION: &[u8] = b"meta:format_version";

/// On-disk format written by this build. Bump on any codec or key change.
const FORMAT_VERSION: u32 = 1;

/// Tuning knobs for the RocksDB log.
#[derive(Debug, Clone)]
pub struct RocksDbConfig {
    /// Memtable size in bytes.
    pub write_buffer_size: usize,
    /// Background compaction/flush job limit.
    pub max_background_jobs: i32,
    /// Compress record values with LZ4.
    pub compression: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            write_buffer_size: 64 << 20,
            max_background_jobs: 4,
            compression: true,
        }
    }
}

/// RocksDB-backed [`TransactionLog`] for production use.
///
/// Records live in the `transactions` column family under 8-byte big-endian
/// height keys, so iteration order is height order. Values are SBOR-encoded
/// records; the format version is tracked under a well-known metadata key
/// and checked on open.
pub struct RocksDbLog {
    db: DB,
}

fn height_key(height: i64) -> [u8; 8] {
    (height as u64).to_be_bytes()
}

fn decode_height(key: &[u8]) -> Option<i64> {
    let bytes: [u8; 8] = key.try_into().ok()?;
    Some(u64::from_be_bytes(bytes) as i64)
}

fn db_err(e: rocksdb::Error) -> StorageError {
    StorageError::Database(e.to_string())
}

impl RocksDbLog {
    /// Open or create a log at the given path with default tuning.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::open_with_config(path, RocksDbConfig::default())
    }

    /// Open or create a log with explicit tuning.
    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        config: RocksDbConfig,
    ) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_background_jobs(config.max_background_jobs);
        if config.compression {
            opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        }

        let cf_descriptors = vec![ColumnFamilyDescriptor::new(
            CF_TRANSACTIONS,
            Options::default(),
        )];
        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors).map_err(db_err)?;

        let log = Self { db };
        log.check_format_version()?;
        Ok(log)
    }

    fn check_format_version(&self) -> Result<(), StorageError> {
        match self.db.get(KEY_FORMAT_VERSION).map_err(db_err)? {
            Some(raw) => {
                let bytes: [u8; 4] = raw
                    .as_slice()
                    .try_into()
                    .map_err(|_| StorageError::Codec("malformed format version".into()))?;
                let found = u32::from_be_bytes(bytes);
                if found != FORMAT_VERSION {
                    return Err(StorageError::UnsupportedVersion {
                        found,
                        expected: FORMAT_VERSION,
                    });
                }
            }
            None => {
                self.db
                    .put(KEY_FORMAT_VERSION, FORMAT_VERSION.to_be_bytes())
                    .map_err(db_err)?;
            }
        }
        Ok(())
    }

    fn cf(&self) -> Result<&rocksdb::ColumnFamily, StorageError> {
        self.db
            .cf_handle(CF_TRANSACTIONS)
            .ok_or_else(|| StorageError::Database("transactions column family missing".into()))
    }
}

impl TransactionLog for RocksDbLog {
    fn append(&self, record: &BlockTransaction) -> Result<(), StorageError> {
        let cf = self.cf()?;
        let value = sbor::basic_encode(record)
            .map_err(|e| StorageError::Codec(format!("record encoding failed: {e:?}")))?;

        // Synced write: the record must be durable before finalization
        // advances the watermark.
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true);
        self.db
            .put_cf_opt(cf, height_key(record.height), value, &write_opts)
            .map_err(db_err)?;

        tracing::trace!(height = record.height, "record appended to durable log");
        Ok(())
    }

    fn get(&self, height: i64) -> Result<Option<BlockTransaction>, StorageError> {
        let cf = self.cf()?;
        match self.db.get_cf(cf, height_key(height)).map_err(db_err)? {
            Some(value) => {
                let record = sbor::basic_decode::<BlockTransaction>(&value)
                    .map_err(|e| StorageError::Codec(format!("record decoding failed: {e:?}")))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn last_contiguous(&self) -> Result<i64, StorageError> {
        let cf = self.cf()?;
        let mut run_end = -1;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item.map_err(db_err)?;
            let height = decode_height(&key)
                .ok_or_else(|| StorageError::Codec("malformed height key".into()))?;
            if run_end >= 0 && height != run_end + 1 {
                break;
            }
            run_end = height;
        }
        Ok(run_end)
    }

    fn prune_below(&self, height: i64) -> Result<(), StorageError> {
        let cf = self.cf()?;
        let end = height_key(height);

        let mut batch = WriteBatch::default();
        let mut pruned = 0usize;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item.map_err(db_err)?;
            if key.as_ref() >= end.as_slice() {
                break;
            }
            batch.delete_cf(cf, key);
            pruned += 1;
        }
        if pruned > 0 {
            self.db.write(batch).map_err(db_err)?;
            tracing::debug!(below = height, pruned, "pruned durable log");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockflow_types::test_utils::{test_record, test_records};

    #[test]
    fn append_get_and_recover() {
        let dir = tempfile::tempdir().unwrap();
        let log = RocksDbLog::open(dir.path()).unwrap();
        assert_eq!(log.last_contiguous().unwrap(), -1);

        for record in test_records(0, 9, "OK") {
            log.append(&record).unwrap();
        }
        assert_eq!(log.get(4).unwrap(), Some(test_record(4, "OK")));
        assert!(log.get(10).unwrap().is_none());
        assert_eq!(log.last_contiguous().unwrap(), 9);

        // Reopen and recover the watermark from disk.
        drop(log);
        let log = RocksDbLog::open(dir.path()).unwrap();
        assert_eq!(log.last_contiguous().unwrap(), 9);
        assert_eq!(log.get(0).unwrap(), Some(test_record(0, "OK")));
    }

    #[test]
    fn interior_gap_terminates_scan() {
        let dir = tempfile::tempdir().unwrap();
        let log = RocksDbLog::open(dir.path()).unwrap();
        for record in test_records(0, 2, "OK") {
            log.append(&record).unwrap();
        }
        log.append(&test_record(7, "OK")).unwrap();
        assert_eq!(log.last_contiguous().unwrap(), 2);
    }

    #[test]
    fn prune_keeps_recent_history() {
        let dir = tempfile::tempdir().unwrap();
        let log = RocksDbLog::open(dir.path()).unwrap();
        for record in test_records(0, 9, "OK") {
            log.append(&record).unwrap();
        }

        log.prune_below(6).unwrap();
        assert!(log.get(5).unwrap().is_none());
        assert_eq!(log.get(6).unwrap(), Some(test_record(6, "OK")));
        assert_eq!(log.last_contiguous().unwrap(), 9);

        // Recovery still works on the pruned log.
        drop(log);
        let log = RocksDbLog::open(dir.path()).unwrap();
        assert_eq!(log.last_contiguous().unwrap(), 9);
    }
}
