//! The journaled account-state layer.
//!
//! Three pieces compose the mutation-and-revert protocol:
//!
//! - [`StateObject`]: the in-memory working copy of one account.
//! - [`Journal`]: the ordered log of reversible change records.
//! - [`CommitStateDB`]: the facade orchestrating objects, journal, store
//!   and ledger for one execution context.

mod journal;
pub use journal::{Journal, JournalEntry};

mod object;
pub use object::{StateObject, StorageEntry};

mod statedb;
pub use statedb::CommitStateDB;

use alloy::primitives::{Address, B256};

/// Errors raised by the state layer.
///
/// These indicate a corrupted or misconfigured node, not a rejectable
/// transaction: reads of absent state yield zero values instead.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum StateError {
    /// An account's code hash points at a code blob the store does not
    /// hold.
    #[error("code with hash {code_hash} not found for address {address}")]
    MissingCode {
        /// The account whose code is missing.
        address: Address,
        /// The dangling code hash.
        code_hash: B256,
    },

    /// Stored logs failed to decode.
    #[error(transparent)]
    LogsDecode(#[from] crate::logs::LogsDecodeError),
}
