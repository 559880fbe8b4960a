//! Durable transaction log for the blockflow execution pipeline.
//!
//! The pipeline persists finalized [`BlockTransaction`]s keyed by height and
//! recovers the last finalized height by scanning the log at startup. Two
//! implementations are provided behind the [`TransactionLog`] trait:
//!
//! - [`RocksDbLog`]: production store backed by RocksDB
//! - [`MemoryLog`]: in-memory store for tests and simulation
//!
//! [`BlockTransaction`]: blockflow_types::BlockTransaction

mod log;
mod memory;
mod rocks;

pub use log::{StorageError, TransactionLog};
pub use memory::MemoryLog;
pub use rocks::{RocksDbConfig, RocksDbLog};
