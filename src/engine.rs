//! The opaque execution engine seam.
//!
//! The state-transition orchestrator treats the virtual machine as a
//! deterministic function behind [`Engine`]: it receives the message and an
//! exclusive handle on the transaction's [`CommitStateDB`], and reports an
//! [`EngineOutcome`]. A VM-level failure is part of a *successful* outcome
//! (`vm_error` set, gas consumed); an `Err` from [`Engine::execute`] means
//! the node itself is broken.
//!
//! [`TransferEngine`] is the crate's built-in engine: value transfers and
//! code deployment with journaled rollback and intrinsic-gas accounting. It
//! deliberately interprets no bytecode; a full interpreter plugs in behind
//! the same trait.

use crate::{
    gas::{intrinsic_gas, GasError, CREATE_DATA_GAS},
    params::ChainConfig,
    state::{CommitStateDB, StateError},
    tx::rlp_hash,
};
use alloy::primitives::{b256, Address, Bytes, B256, U256};

/// Topic of the canonical transfer log emitted for value-moving calls:
/// `keccak("Transfer(address,address,uint256)")`.
pub const TRANSFER_TOPIC: B256 =
    b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

/// The message an engine executes.
#[derive(Debug, Clone)]
pub struct Message {
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
}

/// Configuration handed to the engine per execution.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// The numeric chain id signatures commit to.
    pub chain_id: u64,
    /// Whether contract creation is enabled.
    pub enable_create: bool,
    /// Whether contract calls are enabled.
    pub enable_call: bool,
    /// The feature schedule.
    pub chain_config: ChainConfig,
    /// Extra EIPs activated by governance.
    pub extra_eips: Vec<u64>,
}

/// What an engine execution produced.
#[derive(Debug, Clone)]
pub struct EngineOutcome {
    /// Return data.
    pub ret: Bytes,
    /// Gas consumed by the execution.
    pub gas_used: u64,
    /// Address of the created contract, if any.
    pub contract_address: Option<Address>,
    /// A VM-level failure description. `Some` means the transaction is
    /// committed with a failed-status receipt; gas is still consumed.
    pub vm_error: Option<String>,
}

/// Infrastructure failures inside the engine. These abort the transaction
/// and indicate a misconfigured node.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Contract creation is disabled by governance.
    #[error("contract creation is disabled")]
    CreateDisabled,

    /// Contract calls are disabled by governance.
    #[error("contract calls are disabled")]
    CallDisabled,

    /// Gas computation failed.
    #[error(transparent)]
    Gas(#[from] GasError),

    /// State access failed.
    #[error(transparent)]
    State(#[from] StateError),
}

/// A deterministic execution engine.
pub trait Engine: std::fmt::Debug {
    /// Execute `msg` against `db`.
    fn execute(
        &self,
        db: &mut CommitStateDB<'_>,
        msg: &Message,
        cfg: &EngineConfig,
    ) -> Result<EngineOutcome, EngineError>;
}

/// The address a contract created by `(sender, nonce)` deploys at.
pub fn create_address(sender: Address, nonce: u64) -> Address {
    let hash = rlp_hash(&[&sender, &nonce]);
    Address::from_slice(&hash[12..])
}

/// The built-in transfer-and-deploy engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferEngine;

impl TransferEngine {
    fn failed(msg: &Message, reason: &str) -> EngineOutcome {
        EngineOutcome {
            ret: Bytes::new(),
            gas_used: msg.gas_limit,
            contract_address: None,
            vm_error: Some(reason.to_owned()),
        }
    }
}

impl Engine for TransferEngine {
    fn execute(
        &self,
        db: &mut CommitStateDB<'_>,
        msg: &Message,
        cfg: &EngineConfig,
    ) -> Result<EngineOutcome, EngineError> {
        let is_create = msg.recipient.is_none();
        if is_create && !cfg.enable_create {
            return Err(EngineError::CreateDisabled);
        }
        if !is_create && !cfg.enable_call {
            return Err(EngineError::CallDisabled);
        }

        let intrinsic = intrinsic_gas(
            &msg.payload,
            is_create,
            cfg.chain_config.homestead,
            cfg.chain_config.istanbul,
        )?;
        if intrinsic > msg.gas_limit {
            // the supplied limit is final here; exhaustion is a VM failure,
            // not an admission error
            return Ok(Self::failed(msg, "out of gas"));
        }

        let snapshot = db.snapshot();
        db.set_nonce(msg.sender, msg.nonce + 1);

        if db.balance(msg.sender) < msg.value {
            db.revert_to_snapshot(snapshot);
            return Ok(Self::failed(msg, "insufficient balance for transfer"));
        }

        if is_create {
            let contract = create_address(msg.sender, msg.nonce);
            db.create_account(contract);
            db.sub_balance(msg.sender, msg.value);
            db.add_balance(contract, msg.value);
            db.set_nonce(contract, 1);
            db.set_code(contract, msg.payload.to_vec());

            let deposit = CREATE_DATA_GAS.saturating_mul(msg.payload.len() as u64);
            let gas_used = intrinsic.saturating_add(deposit);
            if gas_used > msg.gas_limit {
                db.revert_to_snapshot(snapshot);
                return Ok(Self::failed(msg, "contract creation code storage out of gas"));
            }

            return Ok(EngineOutcome {
                ret: msg.payload.clone(),
                gas_used,
                contract_address: Some(contract),
                vm_error: None,
            });
        }

        let recipient = msg.recipient.expect("calls carry a recipient");
        db.sub_balance(msg.sender, msg.value);
        db.add_balance(recipient, msg.value);

        if !msg.value.is_zero() {
            let mut sender_topic = B256::ZERO;
            sender_topic[12..].copy_from_slice(msg.sender.as_slice());
            let mut recipient_topic = B256::ZERO;
            recipient_topic[12..].copy_from_slice(recipient.as_slice());
            db.add_log(
                recipient,
                vec![TRANSFER_TOPIC, sender_topic, recipient_topic],
                Bytes::copy_from_slice(&msg.value.to_be_bytes::<32>()),
            );
        }

        Ok(EngineOutcome {
            ret: Bytes::new(),
            gas_used: intrinsic,
            contract_address: None,
            vm_error: None,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{account::MemLedger, params::Params, store::MemStore};
    use alloy::primitives::keccak256;

    fn cfg() -> EngineConfig {
        EngineConfig {
            chain_id: 1,
            enable_create: true,
            enable_call: true,
            chain_config: ChainConfig::default(),
            extra_eips: Vec::new(),
        }
    }

    fn msg(recipient: Option<Address>, value: u64) -> Message {
        Message {
            sender: Address::repeat_byte(1),
            recipient,
            nonce: 0,
            gas_price: U256::from(1u64),
            gas_limit: 100_000,
            value: U256::from(value),
            payload: Bytes::new(),
        }
    }

    #[test]
    fn transfer_moves_value_and_bumps_nonce() {
        let mut store = MemStore::new();
        let mut ledger = MemLedger::new();
        ledger.fund(Address::repeat_byte(1), "stake", U256::from(1_000u64));
        let mut db = CommitStateDB::new(&mut store, &mut ledger, Params::default());

        let recipient = Address::repeat_byte(2);
        let outcome = TransferEngine.execute(&mut db, &msg(Some(recipient), 100), &cfg()).unwrap();

        assert!(outcome.vm_error.is_none());
        assert_eq!(outcome.gas_used, crate::gas::TX_GAS);
        assert_eq!(db.balance(Address::repeat_byte(1)), U256::from(900u64));
        assert_eq!(db.balance(recipient), U256::from(100u64));
        assert_eq!(db.nonce(Address::repeat_byte(1)), 1);
    }

    #[test]
    fn transfer_emits_canonical_log() {
        let mut store = MemStore::new();
        let mut ledger = MemLedger::new();
        ledger.fund(Address::repeat_byte(1), "stake", U256::from(1_000u64));
        let mut db = CommitStateDB::new(&mut store, &mut ledger, Params::default());
        let tx_hash = B256::repeat_byte(0xaa);
        db.prepare(tx_hash, B256::ZERO, 0);

        TransferEngine.execute(&mut db, &msg(Some(Address::repeat_byte(2)), 100), &cfg()).unwrap();

        let logs = db.logs(tx_hash).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].topics[0], TRANSFER_TOPIC);
    }

    #[test]
    fn insufficient_balance_is_a_vm_failure() {
        let mut store = MemStore::new();
        let mut ledger = MemLedger::new();
        ledger.fund(Address::repeat_byte(1), "stake", U256::from(10u64));
        let mut db = CommitStateDB::new(&mut store, &mut ledger, Params::default());

        let outcome = TransferEngine.execute(&mut db, &msg(Some(Address::repeat_byte(2)), 100), &cfg()).unwrap();

        assert!(outcome.vm_error.is_some());
        assert_eq!(outcome.gas_used, 100_000);
        // the failed execution left no state change behind
        assert_eq!(db.balance(Address::repeat_byte(1)), U256::from(10u64));
        assert_eq!(db.nonce(Address::repeat_byte(1)), 0);
    }

    #[test]
    fn create_deploys_payload_as_code() {
        let mut store = MemStore::new();
        let mut ledger = MemLedger::new();
        ledger.fund(Address::repeat_byte(1), "stake", U256::from(1_000u64));
        let mut db = CommitStateDB::new(&mut store, &mut ledger, Params::default());

        let code = Bytes::from_static(&[0x60, 0x00, 0x60, 0x00]);
        let message = Message { payload: code.clone(), ..msg(None, 5) };
        let outcome = TransferEngine.execute(&mut db, &message, &cfg()).unwrap();

        let contract = outcome.contract_address.unwrap();
        assert_eq!(contract, create_address(Address::repeat_byte(1), 0));
        assert_eq!(db.code(contract), code.to_vec());
        assert_eq!(db.code_hash(contract), keccak256(&code));
        assert_eq!(db.balance(contract), U256::from(5u64));
        assert_eq!(db.nonce(contract), 1);
    }

    #[test]
    fn create_disabled_is_infrastructure_error() {
        let mut store = MemStore::new();
        let mut ledger = MemLedger::new();
        let mut db = CommitStateDB::new(&mut store, &mut ledger, Params::default());

        let config = EngineConfig { enable_create: false, ..cfg() };
        let err = TransferEngine.execute(&mut db, &msg(None, 0), &config).unwrap_err();
        assert_eq!(err, EngineError::CreateDisabled);
    }

    #[test]
    fn intrinsic_exhaustion_consumes_supplied_gas() {
        let mut store = MemStore::new();
        let mut ledger = MemLedger::new();
        ledger.fund(Address::repeat_byte(1), "stake", U256::from(1_000u64));
        let mut db = CommitStateDB::new(&mut store, &mut ledger, Params::default());

        let message = Message { gas_limit: 100, ..msg(Some(Address::repeat_byte(2)), 0) };
        let outcome = TransferEngine.execute(&mut db, &message, &cfg()).unwrap();
        assert!(outcome.vm_error.is_some());
        assert_eq!(outcome.gas_used, 100);
    }
}
