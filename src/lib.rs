//! `bevm` — a deterministic Ethereum-style account/state execution layer
//! for BFT-replicated state machines.
//!
//! Every validator in a replicated application must compute byte-identical
//! state transitions from identical inputs. This crate provides the
//! application-level execution layer that makes an Ethereum-style mutable
//! account model behave that way on top of a versioned key-value store:
//!
//! - [`StateObject`]: the in-memory working copy of one account, with
//!   origin/dirty storage caches.
//! - [`Journal`]: the ordered log of reversible change records behind the
//!   snapshot/revert protocol.
//! - [`CommitStateDB`]: the per-execution facade over state objects, store
//!   and ledger, constructed fresh per transaction.
//! - [`AnteHandler`]: the ordered, two-family transaction-admission
//!   pipeline.
//! - [`StateTransition`]: the per-transaction orchestrator driving the
//!   opaque [`Engine`] and folding logs and blooms into the
//!   [`BlockContext`].
//! - [`Keeper`]: the top-level facade owning store, ledger, parameters and
//!   block lifecycle.
//! - [`BloomIndexer`]: the background worker pool compressing finalized
//!   block blooms into a queryable historical index.
//!
//! The VM itself is NOT implemented here. Execution is delegated to the
//! [`Engine`] trait; the built-in [`TransferEngine`] covers value
//! transfers and code deployment, and a full interpreter plugs in behind
//! the same seam.
//!
//! ## Control flow
//!
//! ```none
//! begin_block ──> reset BlockContext, record prev hash↔height
//!      │
//!      ▼                 per transaction
//! AnteHandler ──(reject)──> tx never enters the block
//!      │ admit
//!      ▼
//! StateTransition ──> Engine ──> CommitStateDB (journal, snapshot/revert)
//!      │ commit
//!      ▼
//! BlockContext (tx counter, log index, accumulated bloom)
//!      │
//!      ▼
//! end_block ──> persist block bloom ──> BloomIndexer (section boundary)
//! ```
//!
//! ## Snapshot and revert
//!
//! Every mutation journals the previous value before applying; a snapshot
//! is the journal length, and reverting replays records LIFO:
//!
//! ```
//! use alloy::primitives::{Address, U256};
//! use bevm::{CommitStateDB, MemLedger, MemStore, Params};
//!
//! let mut store = MemStore::new();
//! let mut ledger = MemLedger::new();
//! ledger.fund(Address::repeat_byte(1), "stake", U256::from(1_000u64));
//!
//! let mut db = CommitStateDB::new(&mut store, &mut ledger, Params::default());
//! let snapshot = db.snapshot();
//! db.sub_balance(Address::repeat_byte(1), U256::from(250u64));
//! assert_eq!(db.balance(Address::repeat_byte(1)), U256::from(750u64));
//!
//! db.revert_to_snapshot(snapshot);
//! assert_eq!(db.balance(Address::repeat_byte(1)), U256::from(1_000u64));
//! ```
//!
//! ## Concurrency model
//!
//! Admission and execution run strictly single-threaded in block order; a
//! [`CommitStateDB`] borrows its store and ledger exclusively, so the
//! borrow checker enforces that scoping. The [`BloomIndexer`] is the one
//! concurrent subsystem: it only ever consumes finalized, immutable block
//! blooms, coordinates through channels, and terminates on an explicit
//! close signal.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod account;
pub use account::{Account, AccountLedger, MemLedger, PubKey, EMPTY_CODE_HASH};

pub mod ante;
pub use ante::{AnteChain, AnteContext, AnteDecorator, AnteError, AnteHandler, Mode};

mod block;
pub use block::BlockContext;

pub mod bloom;
pub use bloom::{BloomIndexer, FilterSession, IndexerConfig, IndexerError};

mod chain_id;
pub use chain_id::{parse_chain_id, ChainIdError};

mod dec;
pub use dec::{Dec, DECIMAL_PRECISION};

pub mod engine;
pub use engine::{Engine, EngineConfig, EngineError, EngineOutcome, Message, TransferEngine};

pub mod events;
pub use events::{Attribute, Event};

pub mod gas;
pub use gas::{intrinsic_gas, GasError, GasMeter};

mod genesis;
pub use genesis::{GenesisAccount, GenesisState};

mod invariants;
pub use invariants::InvariantBreach;

mod keeper;
pub use keeper::{Keeper, KeeperError, TxResponse};

pub mod keys;

pub mod logs;
pub use logs::{logs_bloom, TxLog};

pub mod params;
pub use params::{ChainConfig, ConfigDecodeError, Params, ParamsError};

pub mod state;
pub use state::{CommitStateDB, Journal, JournalEntry, StateError, StateObject, StorageEntry};

pub mod store;
pub use store::{BloomStore, KvStore, MemBloomStore, MemStore};

mod transition;
pub use transition::{ExecutionResult, ResultData, StateTransition, TransitionError};

pub mod tx;
pub use tx::{EvmTx, Fee, NativeMsg, NativeTx, SignatureError, Tx, TxData, TxSignature};

/// Utilities for testing the execution layer or testing with it.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
