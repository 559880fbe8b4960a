//! Pipeline configuration.

/// Configuration for the pipeline executor.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum number of pending (drained but not finalized) records.
    /// When full, the drain worker stops reading and the converter blocks
    /// on send until finalization frees space.
    pub buffer_capacity: usize,

    /// Maximum number of records returned by a single proposal.
    pub propose_max: usize,

    /// How many recently finalized records stay servable to
    /// `get_transactions`. With `0`, ranges reaching into finalized
    /// history are rejected.
    pub lookback: i64,

    /// When set, finalization prunes durable-log records more than this
    /// many heights below the watermark. Clamped to keep at least the
    /// lookback window. `None` keeps full history.
    pub log_retention: Option<i64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 1024,
            propose_max: 256,
            lookback: 0,
            log_retention: None,
        }
    }
}
