//! External block converter contract.
//!
//! The converter turns raw chain data into [`BlockTransaction`] records and
//! streams them over a channel. The pipeline owns exactly one live stream at
//! a time and swaps it atomically during a rebase (see the executor).

use blockflow_types::BlockTransaction;
use thiserror::Error;
use tokio::sync::mpsc;

/// `to` value meaning "stream forward without bound".
///
/// `rebase` uses `to` in two ways: `OPEN_STREAM` (zero) requests an
/// unbounded forward stream, while a positive `to` is an inclusive upper
/// bound after which the converter closes the channel normally. The
/// executor only ever opens unbounded sessions.
pub const OPEN_STREAM: i64 = 0;

/// Failure reported by a converter session.
#[derive(Debug, Clone, Error)]
pub enum ConverterError {
    /// The converter reported an error on the stream or rejected a rebase.
    #[error("converter failed: {0}")]
    Failed(String),

    /// The stream closed before the requested range was complete.
    #[error("converter stream closed before completion")]
    Closed,
}

/// One item of a converter stream: a record, or the session's single
/// terminal error.
pub type ConverterItem = Result<BlockTransaction, ConverterError>;

/// Receiving half of a converter session.
///
/// The drain worker is the only reader. Backpressure flows through the
/// channel: when the pipeline's pending buffer is full the worker stops
/// receiving and the converter blocks on send until finalization frees
/// space.
pub type ConverterStream = mpsc::Receiver<ConverterItem>;

/// External producer of execution records.
///
/// # Contract
///
/// `rebase(from, to, prefix)` opens a new session:
///
/// - `prefix` is the already-accepted continuation starting at `from`; the
///   converter should skip re-deriving those records and begin emitting at
///   `from + prefix.len()` (`from` when the prefix is empty).
/// - Emitted heights strictly ascend by one. The pipeline fails the session
///   on any gap or repeat, including re-emission of the prefix.
/// - The stream may carry at most one `Err` item and must close after it.
/// - Closing without an error before the stream is complete is treated as
///   premature termination by the pipeline.
/// - Each call supersedes any previous session; the previous receiver is
///   dropped by the pipeline, after which sends into it fail.
pub trait BlockConverter: Send + Sync {
    /// Open a session streaming records from `from` after the given prefix.
    fn rebase(
        &self,
        from: i64,
        to: i64,
        prefix: Vec<BlockTransaction>,
    ) -> Result<ConverterStream, ConverterError>;
}
