//! Admission pipeline behavior: nonce policy, fee checks, family routing
//! and the native chain end to end.

use alloy::primitives::{Address, Bytes, U256};
use bevm::{
    ante::{eth_ante_chain, native_ante_chain},
    gas::GasMeter,
    test_utils::{addr_of, dev_key, funded_keeper, sign_evm_tx, sign_native_tx, TEST_CHAIN_ID},
    AccountLedger, AnteContext, AnteError, Fee, GasError, KeeperError, MemLedger, Mode, NativeMsg,
    NativeTx, Params, SignatureError, Tx, TxData, TxSignature,
};

fn transfer_data(nonce: u64, gas_limit: u64, value: u64) -> TxData {
    TxData {
        nonce,
        gas_price: U256::from(1u64),
        gas_limit,
        to: Some(Address::repeat_byte(9)),
        value: U256::from(value),
        payload: Bytes::new(),
        v: 0,
        r: U256::ZERO,
        s: U256::ZERO,
    }
}

fn native_transfer(signer: Address, sequence: u64) -> NativeTx {
    NativeTx {
        msgs: vec![NativeMsg {
            route: "bank".to_owned(),
            signer,
            value: Bytes::from_static(b"send"),
        }],
        memo: String::new(),
        fee: Fee { amount: U256::from(10u64), gas_limit: 200_000, granter: None },
        signatures: vec![TxSignature { pub_key: None, signature: vec![0; 64], sequence }],
        timeout_height: 0,
        extension_options: Vec::new(),
    }
}

// ----------------------------------------------------------------------
// Nonce / sequence policy
// ----------------------------------------------------------------------

#[test]
fn deliver_rejects_wrong_nonce_and_leaves_sequence_unchanged() {
    let key = dev_key(1);
    let sender = addr_of(&key);
    let mut keeper = funded_keeper(&[(sender, U256::from(100_000u64))]);

    let tx = Tx::Evm(sign_evm_tx(transfer_data(5, 21_000, 100), 1, &key));
    let err = keeper.deliver_tx(&tx).unwrap_err();
    assert!(matches!(
        err,
        KeeperError::Ante(AnteError::InvalidSequence { got: 5, expected: 0 }),
    ));

    assert_eq!(keeper.query_nonce(sender), 0);
    assert_eq!(keeper.query_balance(sender), U256::from(100_000u64));
}

#[test]
fn deliver_accepts_matching_nonce_and_increments_once() {
    let key = dev_key(1);
    let sender = addr_of(&key);
    let mut keeper = funded_keeper(&[(sender, U256::from(100_000u64))]);

    let tx = Tx::Evm(sign_evm_tx(transfer_data(0, 21_000, 100), 1, &key));
    let response = keeper.deliver_tx(&tx).unwrap();
    assert!(response.vm_error.is_none());
    assert_eq!(keeper.query_nonce(sender), 1);

    // the same transaction replayed is now stale
    let err = keeper.deliver_tx(&tx).unwrap_err();
    assert!(matches!(
        err,
        KeeperError::Ante(AnteError::InvalidSequence { got: 0, expected: 1 }),
    ));
}

#[test]
fn check_rejects_lookahead_nonces() {
    let key = dev_key(1);
    let sender = addr_of(&key);
    let mut keeper = funded_keeper(&[(sender, U256::from(100_000u64))]);

    let tx = Tx::Evm(sign_evm_tx(transfer_data(1, 21_000, 100), 1, &key));
    let err = keeper.check_tx(&tx).unwrap_err();
    assert!(matches!(
        err,
        KeeperError::Ante(AnteError::InvalidSequence { got: 1, expected: 0 }),
    ));
}

#[test]
fn sequence_increment_is_skipped_in_check_and_applied_in_recheck() {
    let key = dev_key(1);
    let sender = addr_of(&key);
    let mut keeper = funded_keeper(&[(sender, U256::from(100_000u64))]);

    let tx = Tx::Evm(sign_evm_tx(transfer_data(0, 21_000, 100), 1, &key));
    keeper.check_tx(&tx).unwrap();
    assert_eq!(keeper.query_nonce(sender), 0);

    keeper.recheck_tx(&tx).unwrap();
    assert_eq!(keeper.query_nonce(sender), 1);
}

// ----------------------------------------------------------------------
// Fee and gas admission
// ----------------------------------------------------------------------

#[test]
fn check_rejects_insufficient_balance_before_execution() {
    let key = dev_key(1);
    let sender = addr_of(&key);
    // §-scenario: balance 1000 cannot cover value 100 + 21000 gas
    let mut keeper = funded_keeper(&[(sender, U256::from(1_000u64))]);

    let tx = Tx::Evm(sign_evm_tx(transfer_data(0, 21_000, 100), 1, &key));
    let err = keeper.check_tx(&tx).unwrap_err();
    assert!(matches!(err, KeeperError::Ante(AnteError::InsufficientFunds { cost, .. }) if cost == U256::from(21_100u64)));

    assert_eq!(keeper.query_balance(sender), U256::from(1_000u64));
    assert_eq!(keeper.query_nonce(sender), 0);
}

#[test]
fn check_enforces_intrinsic_gas_floor() {
    let key = dev_key(1);
    let sender = addr_of(&key);
    let mut keeper = funded_keeper(&[(sender, U256::from(100_000u64))]);

    let tx = Tx::Evm(sign_evm_tx(transfer_data(0, 100, 0), 1, &key));
    let err = keeper.check_tx(&tx).unwrap_err();
    assert!(matches!(
        err,
        KeeperError::Ante(AnteError::Gas(GasError::IntrinsicGasTooLow { limit: 100, required: 21_000 })),
    ));
}

#[test]
fn deliver_skips_intrinsic_floor_but_execution_fails_on_exhaustion() {
    let key = dev_key(1);
    let sender = addr_of(&key);
    let mut keeper = funded_keeper(&[(sender, U256::from(100_000u64))]);

    let tx = Tx::Evm(sign_evm_tx(transfer_data(0, 100, 0), 1, &key));
    let response = keeper.deliver_tx(&tx).unwrap();
    assert!(response.vm_error.is_some());
    assert_eq!(response.gas_used, 100);
    // admission charged the fee and bumped the nonce regardless
    assert_eq!(keeper.query_nonce(sender), 1);
    assert_eq!(keeper.query_balance(sender), U256::from(99_900u64));
}

#[test]
fn mempool_minimum_fee_applies_only_to_checks() {
    let key = dev_key(1);
    let sender = addr_of(&key);
    let mut keeper = funded_keeper(&[(sender, U256::from(100_000u64))])
        .with_min_gas_price(U256::from(2u64));

    let tx = Tx::Evm(sign_evm_tx(transfer_data(0, 21_000, 100), 1, &key));
    let err = keeper.check_tx(&tx).unwrap_err();
    assert!(matches!(
        err,
        KeeperError::Ante(AnteError::InsufficientFee { got, required })
            if got == U256::from(21_000u64) && required == U256::from(42_000u64),
    ));

    // the same underpriced transaction is accepted at delivery
    keeper.deliver_tx(&tx).unwrap();
}

#[test]
fn gas_limit_ceiling_is_enforced() {
    let key = dev_key(1);
    let sender = addr_of(&key);
    let mut keeper = funded_keeper(&[(sender, U256::MAX)]);

    let tx = Tx::Evm(sign_evm_tx(transfer_data(0, 40_000_000, 0), 1, &key));
    let err = keeper.check_tx(&tx).unwrap_err();
    assert!(matches!(
        err,
        KeeperError::Ante(AnteError::GasLimitTooLarge { gas_limit: 40_000_000, max: 30_000_000 }),
    ));
}

// ----------------------------------------------------------------------
// Family routing
// ----------------------------------------------------------------------

#[test]
fn wrong_family_is_rejected_with_zero_state_mutation() {
    let params = Params::default();
    let signer = Address::repeat_byte(1);
    let mut ledger = MemLedger::new();
    ledger.fund(signer, &params.evm_denom, U256::from(1_000u64));

    // a native transaction pushed through the Ethereum-style chain
    let mut ctx = AnteContext {
        mode: Mode::Deliver,
        simulate: false,
        chain_id: TEST_CHAIN_ID,
        block_height: 1,
        min_gas_price: U256::ZERO,
        gas_meter: GasMeter::infinite(),
        ledger: &mut ledger,
        params: &params,
    };
    let native = Tx::Native(native_transfer(signer, 0));
    let err = eth_ante_chain().run(&mut ctx, &native).unwrap_err();
    assert!(matches!(err, AnteError::UnknownRequest { family: "native" }));

    // and an Ethereum transaction through the native chain
    let evm = Tx::Evm(sign_evm_tx(transfer_data(0, 21_000, 0), 1, &dev_key(1)));
    let err = native_ante_chain().run(&mut ctx, &evm).unwrap_err();
    assert!(matches!(err, AnteError::UnknownRequest { family: "ethereum" }));

    drop(ctx);
    assert_eq!(ledger.balance(signer, &params.evm_denom), U256::from(1_000u64));
    assert_eq!(ledger.account(signer).unwrap().sequence, 0);
}

// ----------------------------------------------------------------------
// Native chain end to end
// ----------------------------------------------------------------------

#[test]
fn native_transaction_is_admitted_and_sequenced() -> eyre::Result<()> {
    let key = dev_key(1);
    let signer = addr_of(&key);
    let mut keeper = funded_keeper(&[(signer, U256::from(100_000u64))]);

    let mut tx = native_transfer(signer, 0);
    sign_native_tx(&mut tx, TEST_CHAIN_ID, &[&key]);
    let response = keeper.deliver_tx(&Tx::Native(tx.clone()))?;
    assert!(response.result.is_none());

    // fee deducted, sequence incremented, pubkey attached
    assert_eq!(keeper.query_balance(signer), U256::from(99_990u64));
    assert_eq!(keeper.query_nonce(signer), 1);

    // replaying the same signed transaction fails the sequence check
    let err = keeper.deliver_tx(&Tx::Native(tx)).unwrap_err();
    assert!(matches!(
        err,
        KeeperError::Ante(AnteError::InvalidSequence { got: 0, expected: 1 }),
    ));
    Ok(())
}

#[test]
fn native_rejections_fire_in_stage_order() {
    let key = dev_key(1);
    let signer = addr_of(&key);
    let mut keeper = funded_keeper(&[(signer, U256::from(100_000u64))]);

    // extension options
    let mut tx = native_transfer(signer, 0);
    tx.extension_options.push(Bytes::from_static(b"opt"));
    sign_native_tx(&mut tx, TEST_CHAIN_ID, &[&key]);
    assert!(matches!(
        keeper.deliver_tx(&Tx::Native(tx)).unwrap_err(),
        KeeperError::Ante(AnteError::ExtensionOptions),
    ));

    // oversized memo
    let mut tx = native_transfer(signer, 0);
    tx.memo = "m".repeat(300);
    sign_native_tx(&mut tx, TEST_CHAIN_ID, &[&key]);
    assert!(matches!(
        keeper.deliver_tx(&Tx::Native(tx)).unwrap_err(),
        KeeperError::Ante(AnteError::MemoTooLarge { length: 300, max: 256 }),
    ));

    // fee granter
    let mut tx = native_transfer(signer, 0);
    tx.fee.granter = Some(Address::repeat_byte(8));
    sign_native_tx(&mut tx, TEST_CHAIN_ID, &[&key]);
    assert!(matches!(
        keeper.deliver_tx(&Tx::Native(tx)).unwrap_err(),
        KeeperError::Ante(AnteError::FeeGranter),
    ));

    // gas limit too small for the size + signature charges
    let mut tx = native_transfer(signer, 0);
    tx.fee.gas_limit = 1_000;
    sign_native_tx(&mut tx, TEST_CHAIN_ID, &[&key]);
    assert!(matches!(
        keeper.deliver_tx(&Tx::Native(tx)).unwrap_err(),
        KeeperError::Ante(AnteError::Gas(GasError::OutOfGas { .. })),
    ));

    // a corrupted signature
    let mut tx = native_transfer(signer, 0);
    sign_native_tx(&mut tx, TEST_CHAIN_ID, &[&key]);
    tx.signatures[0].signature[10] ^= 0xff;
    assert!(matches!(
        keeper.deliver_tx(&Tx::Native(tx)).unwrap_err(),
        KeeperError::Ante(AnteError::Signature(SignatureError::Mismatch { .. })),
    ));
}

#[test]
fn native_timeout_height_is_enforced() {
    let key = dev_key(1);
    let signer = addr_of(&key);
    let mut keeper = funded_keeper(&[(signer, U256::from(100_000u64))]);
    keeper.begin_block(5, alloy::primitives::B256::repeat_byte(5), alloy::primitives::B256::repeat_byte(4));

    let mut tx = native_transfer(signer, 0);
    tx.timeout_height = 2;
    sign_native_tx(&mut tx, TEST_CHAIN_ID, &[&key]);
    assert!(matches!(
        keeper.deliver_tx(&Tx::Native(tx)).unwrap_err(),
        KeeperError::Ante(AnteError::TimeoutHeight { timeout: 2, height: 5 }),
    ));
}
