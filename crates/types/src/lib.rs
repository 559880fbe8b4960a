//! Core types for the blockflow execution pipeline.
//!
//! This crate provides the foundational record type shared by the storage
//! and pipeline layers:
//!
//! - [`BlockTransaction`]: one imported block's per-height execution summary
//! - Deterministic test-record builders behind the `test-utils` feature
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend
//! on any other workspace crates, making it the foundation layer.

mod record;

pub use record::{BlockTransaction, TRANSACTIONS_PER_BLOCK};

#[cfg(any(test, feature = "test-utils"))]
pub use record::test_utils;
