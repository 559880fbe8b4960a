//! In-memory transaction log for tests and simulation.

use crate::log::{StorageError, TransactionLog};
use blockflow_types::BlockTransaction;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// In-memory [`TransactionLog`] backed by a `BTreeMap`.
///
/// Survives executor restarts within a process (share it with `Arc`), which
/// is what recovery tests need. Nothing is persisted across processes.
#[derive(Debug, Default)]
pub struct MemoryLog {
    records: RwLock<BTreeMap<i64, BlockTransaction>>,
}

impl MemoryLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the log holds no records.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<i64, BlockTransaction>> {
        // Writers never panic while holding the lock; poisoning cannot occur.
        match self.records.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<i64, BlockTransaction>> {
        match self.records.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl TransactionLog for MemoryLog {
    fn append(&self, record: &BlockTransaction) -> Result<(), StorageError> {
        self.write().insert(record.height, record.clone());
        Ok(())
    }

    fn get(&self, height: i64) -> Result<Option<BlockTransaction>, StorageError> {
        Ok(self.read().get(&height).cloned())
    }

    fn last_contiguous(&self) -> Result<i64, StorageError> {
        let records = self.read();
        let mut run_end = -1;
        for &height in records.keys() {
            if run_end >= 0 && height != run_end + 1 {
                break;
            }
            run_end = height;
        }
        Ok(run_end)
    }

    fn prune_below(&self, height: i64) -> Result<(), StorageError> {
        let mut records = self.write();
        *records = records.split_off(&height);
        Ok(())
    }
}
