//! Per-transaction execution orchestration.
//!
//! A [`StateTransition`] executes one admitted message against a fresh
//! [`CommitStateDB`]: it delegates to the opaque engine, gathers the logs
//! the execution emitted, derives the per-transaction bloom and — for final
//! executions — commits the state database. The caller folds the result
//! into the block execution context.

use crate::{
    engine::{Engine, EngineConfig, EngineError, Message},
    logs::{logs_bloom, TxLog},
    state::{CommitStateDB, StateError},
};
use alloy::primitives::{Address, Bloom, Bytes, B256, U256};

/// Infrastructure failures during a state transition. A VM-level revert is
/// not one of these; it is reported in [`ExecutionResult::vm_error`].
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// The engine itself failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// State persistence failed.
    #[error(transparent)]
    State(#[from] StateError),
}

/// The per-transaction response record exposed to outer layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultData {
    /// Address of the created contract, if any.
    pub contract_address: Option<Address>,
    /// Bloom filter over the transaction's logs.
    pub bloom: Bloom,
    /// The emitted logs.
    pub logs: Vec<TxLog>,
    /// Return data.
    pub ret: Bytes,
    /// The transaction's hash.
    pub tx_hash: B256,
}

/// The outcome of one executed transaction.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// The response record.
    pub response: ResultData,
    /// Gas consumed by the execution.
    pub gas_used: u64,
    /// A VM-level failure description; the transaction still committed.
    pub vm_error: Option<String>,
    /// The block-wide log index after this transaction.
    pub log_size: u64,
}

/// One transaction's execution against its own state database.
#[derive(Debug)]
pub struct StateTransition<'a> {
    /// The verified sender.
    pub sender: Address,
    /// The recipient; `None` denotes contract creation.
    pub recipient: Option<Address>,
    /// The sender's account nonce.
    pub nonce: u64,
    /// Price per unit of gas.
    pub gas_price: U256,
    /// Supplied gas limit.
    pub gas_limit: u64,
    /// Transferred value.
    pub value: U256,
    /// Call data or initialization code.
    pub payload: Bytes,
    /// The numeric chain id.
    pub chain_id: u64,
    /// The transaction's hash.
    pub tx_hash: B256,
    /// True for speculative executions, which commit nothing.
    pub simulate: bool,
    /// The transaction's state database.
    pub csdb: CommitStateDB<'a>,
}

impl StateTransition<'_> {
    /// Execute the transition through `engine`.
    ///
    /// For final executions the state database is committed with
    /// empty-object pruning enabled; speculative executions leave the store
    /// untouched.
    pub fn transition(
        mut self,
        engine: &dyn Engine,
        cfg: &EngineConfig,
    ) -> Result<ExecutionResult, TransitionError> {
        let msg = Message {
            sender: self.sender,
            recipient: self.recipient,
            nonce: self.nonce,
            gas_price: self.gas_price,
            gas_limit: self.gas_limit,
            value: self.value,
            payload: self.payload.clone(),
        };

        let outcome = engine.execute(&mut self.csdb, &msg, cfg)?;

        let logs = self.csdb.logs(self.tx_hash)?;
        let bloom = logs_bloom(&logs);
        let log_size = self.csdb.log_size();

        if !self.simulate {
            self.csdb.commit(true)?;
        }

        if let Some(vm_error) = &outcome.vm_error {
            tracing::debug!(tx_hash = %self.tx_hash, %vm_error, gas_used = outcome.gas_used, "vm execution failed");
        } else {
            tracing::info!(
                tx_hash = %self.tx_hash,
                sender = %self.sender,
                gas_used = outcome.gas_used,
                logs = logs.len(),
                "executed transaction",
            );
        }

        Ok(ExecutionResult {
            response: ResultData {
                contract_address: outcome.contract_address,
                bloom,
                logs,
                ret: outcome.ret,
                tx_hash: self.tx_hash,
            },
            gas_used: outcome.gas_used,
            vm_error: outcome.vm_error,
            log_size,
        })
    }
}
