//! Error types for the execution pipeline.

use crate::converter::ConverterError;
use blockflow_storage::StorageError;
use thiserror::Error;

/// Errors surfaced by the pipeline executor.
///
/// Asynchronous requests receive the failure through their callback; the
/// synchronous operations return it directly.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// The caller canceled the request.
    #[error("request canceled")]
    Canceled,

    /// The executor has been terminated.
    #[error("executor terminated")]
    Terminated,

    /// A prefix change (sync or a superseding request) invalidated the
    /// pending request. The caller may retry against the new prefix.
    #[error("pending request invalidated by a prefix change")]
    PrefixChanged,

    /// The converter violated its ordering contract.
    #[error("converter protocol violation: expected height {expected}, got {actual}")]
    ConverterProtocol {
        /// Height the drain worker expected next.
        expected: i64,
        /// Height the converter actually delivered.
        actual: i64,
    },

    /// The converter reported a failure or closed its stream prematurely.
    #[error(transparent)]
    Converter(#[from] ConverterError),

    /// Range preconditions violated, or the range fell outside the
    /// servable window.
    #[error("invalid range [{from}, {to}]")]
    InvalidRange {
        /// Requested start height.
        from: i64,
        /// Requested end height.
        to: i64,
    },

    /// Durable log read or write failure. Fatal to the operation; the
    /// in-memory state is left untouched.
    #[error("durable log failure: {0}")]
    LogIo(#[from] StorageError),

    /// `start` called on a running executor.
    #[error("executor already running")]
    AlreadyRunning,

    /// Operation requires a started executor.
    #[error("executor not running")]
    NotRunning,
}
