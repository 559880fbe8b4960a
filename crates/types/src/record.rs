//! Imported block execution records.

/// Upper bound on packed ledger transactions per imported block.
pub const TRANSACTIONS_PER_BLOCK: i32 = 3_000;

/// Per-height execution summary of one imported block.
///
/// This is **not** a user transaction: it is the unit the block converter
/// emits for every chain height - the block identifier, the execution result
/// root, the validator-set hash, and how many ledger transactions the block
/// carried.
///
/// Records are immutable values. Equality is byte-wise over all five fields;
/// two records for the same height that were derived from diverging chains
/// compare unequal. The SBOR derive provides the deterministic encoding used
/// by the durable log.
#[derive(Debug, Clone, PartialEq, Eq, sbor::prelude::BasicSbor)]
pub struct BlockTransaction {
    /// Chain height this record summarizes (>= 0).
    pub height: i64,
    /// Identifier of the imported block (opaque).
    pub block_id: Vec<u8>,
    /// Execution result root after applying the block (opaque).
    pub result: Vec<u8>,
    /// Hash of the validator set that produced the block (opaque).
    pub validator_hash: Vec<u8>,
    /// Number of ledger transactions packed into the block.
    pub tx_count: i32,
}

impl BlockTransaction {
    /// Whether `next` is the direct successor of this record by height.
    pub fn precedes(&self, next: &BlockTransaction) -> bool {
        next.height == self.height + 1
    }
}

/// Deterministic record builders for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::{BlockTransaction, TRANSACTIONS_PER_BLOCK};

    /// Build the deterministic test record for `height`.
    ///
    /// The `suffix` distinguishes diverging chains: records built with
    /// different suffixes for the same height are byte-unequal.
    pub fn test_record(height: i64, suffix: &str) -> BlockTransaction {
        BlockTransaction {
            height,
            block_id: format!("BLOCKID[{height},{suffix}]").into_bytes(),
            result: format!("RESULT[{height},{suffix}]").into_bytes(),
            validator_hash: format!("VALIDATOR[{height},{suffix}]").into_bytes(),
            tx_count: TRANSACTIONS_PER_BLOCK / 6,
        }
    }

    /// Build the contiguous test records for heights `from..=to`.
    pub fn test_records(from: i64, to: i64, suffix: &str) -> Vec<BlockTransaction> {
        (from..=to).map(|height| test_record(height, suffix)).collect()
    }
}
