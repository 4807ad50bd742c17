//! Per-block execution context.
//!
//! The running counters one block's execution accumulates: transaction
//! index, block-wide log index, the OR of every transaction's bloom and the
//! current block hash. Owned by the keeper and reset exactly once at block
//! start — never static state — so query-time simulations can run against
//! their own contexts without touching the consensus one.

use alloy::primitives::{Bloom, B256};

/// Per-block scoped mutable state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockContext {
    /// Index the next transaction in this block receives.
    pub tx_count: u64,
    /// Block-wide running log index.
    pub log_size: u64,
    /// Accumulated bloom: the bitwise OR across all executed transactions.
    pub bloom: Bloom,
    /// Hash of the block being executed.
    pub block_hash: B256,
}

impl BlockContext {
    /// Reset for a new block.
    pub fn reset(&mut self, block_hash: B256) {
        self.tx_count = 0;
        self.log_size = 0;
        self.bloom = Bloom::default();
        self.block_hash = block_hash;
    }
}
