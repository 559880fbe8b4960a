//! Durable log abstraction.

use blockflow_types::BlockTransaction;
use thiserror::Error;

/// Errors surfaced by the durable transaction log.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(String),
    /// Record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),
    /// The on-disk log was written with an incompatible format.
    #[error("unsupported log format version {found}, expected {expected}")]
    UnsupportedVersion {
        /// Version found on disk.
        found: u32,
        /// Version this build writes.
        expected: u32,
    },
}

/// Append-only store of finalized block transactions, keyed by height.
///
/// Invariants:
///
/// - Retained heights form a single contiguous run ending at the highest
///   appended height; `append` is only ever called with the next height.
/// - Each `append` is atomic and durable before it returns: a crash
///   mid-finalize leaves the record either absent or completely present.
/// - `prune_below` may drop history from the bottom of the run; callers
///   must keep at least their re-org lookback window.
pub trait TransactionLog: Send + Sync {
    /// Persist one record. Durable before returning.
    fn append(&self, record: &BlockTransaction) -> Result<(), StorageError>;

    /// Random read of the record at `height`.
    fn get(&self, height: i64) -> Result<Option<BlockTransaction>, StorageError>;

    /// Highest height of the contiguous run starting at the lowest retained
    /// height, or `-1` when the log is empty.
    ///
    /// An interior gap terminates the scan; records beyond a gap are
    /// ignored. On an unpruned log this is the classic
    /// "max contiguous height from 0" recovery scan.
    fn last_contiguous(&self) -> Result<i64, StorageError>;

    /// Drop all records with height strictly below `height`.
    fn prune_below(&self, height: i64) -> Result<(), StorageError>;
}
