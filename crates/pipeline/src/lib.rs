//! Block execution pipeline.
//!
//! The pipeline imports or produces blocks by driving a single long-running
//! conversion request against an external block converter and serving the
//! resulting [`BlockTransaction`] stream to two consumers: a proposer
//! (`propose_transactions` / `finalize_transactions`) and a
//! validator/importer (`get_transactions` over explicit height ranges).
//!
//! # Architecture
//!
//! - [`BlockConverter`] is the external-producer seam: `rebase` opens a
//!   session streaming records over a channel.
//! - [`Executor`] owns the pending buffer, the request queue, and the live
//!   session behind one mutex; a drain worker task moves records from the
//!   session stream into the buffer and resolves waiting requests.
//! - Finalized records are persisted through
//!   [`blockflow_storage::TransactionLog`] and recovered on restart.
//! - When the local chain must adopt a different continuation,
//!   [`Executor::sync_transactions`] rebases the converter onto the new
//!   prefix without losing compatible work or deadlocking callers.
//!
//! [`BlockTransaction`]: blockflow_types::BlockTransaction

mod buffer;
mod config;
mod converter;
mod error;
mod executor;
pub mod metrics;
mod requests;

pub use config::PipelineConfig;
pub use converter::{BlockConverter, ConverterError, ConverterItem, ConverterStream, OPEN_STREAM};
pub use error::PipelineError;
pub use executor::{Canceler, Executor};
