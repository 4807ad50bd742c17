//! Full delivery flows: the gas/fee scenario, bloom accumulation, contract
//! creation, failed-status receipts, genesis round-trips and the invariant
//! scan.

use alloy::primitives::{Address, Bloom, Bytes, B256, U256};
use bevm::{
    engine::create_address,
    test_utils::{addr_of, dev_key, funded_keeper, sign_evm_tx, TEST_CHAIN_ID},
    Account, AccountLedger, ChainConfig, GenesisState, Keeper, MemLedger, MemStore, Params, Tx,
    TxData,
};

fn transfer_data(nonce: u64, gas_limit: u64, to: Option<Address>, value: u64) -> TxData {
    TxData {
        nonce,
        gas_price: U256::from(1u64),
        gas_limit,
        to,
        value: U256::from(value),
        payload: Bytes::new(),
        v: 0,
        r: U256::ZERO,
        s: U256::ZERO,
    }
}

#[test]
fn transfer_scenario_settles_balances_and_nonce() {
    let key = dev_key(1);
    let sender = addr_of(&key);
    let recipient = Address::repeat_byte(9);
    let mut keeper = funded_keeper(&[(sender, U256::from(30_000u64))]);

    let tx = Tx::Evm(sign_evm_tx(transfer_data(0, 21_000, Some(recipient), 100), 1, &key));
    let response = keeper.deliver_tx(&tx).unwrap();

    assert!(response.vm_error.is_none());
    assert_eq!(response.gas_used, 21_000);
    // 30000 − 100 transferred − 21000×1 fee
    assert_eq!(keeper.query_balance(sender), U256::from(8_900u64));
    assert_eq!(keeper.query_balance(recipient), U256::from(100u64));
    assert_eq!(keeper.query_nonce(sender), 1);

    let result = response.result.unwrap();
    assert_eq!(result.logs.len(), 1);
    assert_eq!(result.logs[0].block_number, 1);
    assert_eq!(result.logs[0].tx_index, 0);
    assert!(!result.bloom.is_zero());

    // the stored logs match what execution reported
    assert_eq!(keeper.query_logs(result.tx_hash).unwrap(), result.logs);
}

#[test]
fn block_bloom_is_the_or_of_transaction_blooms() {
    let key_a = dev_key(1);
    let key_b = dev_key(2);
    let mut keeper = funded_keeper(&[
        (addr_of(&key_a), U256::from(100_000u64)),
        (addr_of(&key_b), U256::from(100_000u64)),
    ]);

    let tx_a =
        Tx::Evm(sign_evm_tx(transfer_data(0, 21_000, Some(Address::repeat_byte(7)), 10), 1, &key_a));
    let tx_b =
        Tx::Evm(sign_evm_tx(transfer_data(0, 21_000, Some(Address::repeat_byte(8)), 20), 1, &key_b));

    let bloom_a = keeper.deliver_tx(&tx_a).unwrap().result.unwrap().bloom;
    let bloom_b = keeper.deliver_tx(&tx_b).unwrap().result.unwrap().bloom;
    keeper.end_block(1);

    let mut expected = Bloom::default();
    expected.accrue_bloom(&bloom_a);
    expected.accrue_bloom(&bloom_b);

    assert!(!expected.is_zero());
    assert_eq!(keeper.block_bloom(1).unwrap(), expected);
}

#[test]
fn transactions_receive_increasing_indices() {
    let key_a = dev_key(1);
    let key_b = dev_key(2);
    let mut keeper = funded_keeper(&[
        (addr_of(&key_a), U256::from(100_000u64)),
        (addr_of(&key_b), U256::from(100_000u64)),
    ]);

    let tx_a =
        Tx::Evm(sign_evm_tx(transfer_data(0, 21_000, Some(Address::repeat_byte(7)), 10), 1, &key_a));
    let tx_b =
        Tx::Evm(sign_evm_tx(transfer_data(0, 21_000, Some(Address::repeat_byte(8)), 20), 1, &key_b));

    let result_a = keeper.deliver_tx(&tx_a).unwrap().result.unwrap();
    let result_b = keeper.deliver_tx(&tx_b).unwrap().result.unwrap();

    assert_eq!(result_a.logs[0].tx_index, 0);
    assert_eq!(result_b.logs[0].tx_index, 1);
    // log indices increase across the whole block
    assert_eq!(result_a.logs[0].log_index, 0);
    assert_eq!(result_b.logs[0].log_index, 1);
}

#[test]
fn contract_creation_deploys_and_reports_address() {
    let key = dev_key(1);
    let sender = addr_of(&key);
    let mut keeper = funded_keeper(&[(sender, U256::from(1_000_000u64))]);

    let code = Bytes::from_static(&[0x60, 0x80, 0x60, 0x40]);
    let data = TxData {
        payload: code.clone(),
        ..transfer_data(0, 100_000, None, 0)
    };
    let tx = Tx::Evm(sign_evm_tx(data, 1, &key));
    let response = keeper.deliver_tx(&tx).unwrap();

    assert!(response.vm_error.is_none());
    let contract = response.result.unwrap().contract_address.unwrap();
    assert_eq!(contract, create_address(sender, 0));
    assert_eq!(keeper.query_code(contract), code.to_vec());
    assert_eq!(keeper.query_nonce(contract), 1);
}

#[test]
fn vm_failure_commits_with_failed_status() {
    let key = dev_key(1);
    let sender = addr_of(&key);
    // fee of 21000 leaves 9000, below the attempted 20000 transfer
    let mut keeper = funded_keeper(&[(sender, U256::from(30_000u64))]);

    let tx = Tx::Evm(sign_evm_tx(transfer_data(0, 21_000, Some(Address::repeat_byte(9)), 20_000), 1, &key));
    let response = keeper.deliver_tx(&tx).unwrap();

    assert!(response.vm_error.is_some());
    assert_eq!(response.gas_used, 21_000);
    // fee charged and nonce incremented despite the failure
    assert_eq!(keeper.query_balance(sender), U256::from(9_000u64));
    assert_eq!(keeper.query_nonce(sender), 1);
    assert_eq!(keeper.query_balance(Address::repeat_byte(9)), U256::ZERO);
}

#[test]
fn simulation_commits_nothing_and_skips_block_counters() {
    let key = dev_key(1);
    let sender = addr_of(&key);
    let mut keeper = funded_keeper(&[(sender, U256::from(100_000u64))]);

    let tx = Tx::Evm(sign_evm_tx(transfer_data(0, 21_000, Some(Address::repeat_byte(9)), 100), 1, &key));
    let response = keeper.simulate_tx(&tx).unwrap();
    assert!(response.vm_error.is_none());
    assert_eq!(response.gas_used, 21_000);

    assert_eq!(keeper.block_context().tx_count, 0);
    assert_eq!(keeper.block_context().bloom, Bloom::default());
    // the simulated fee deduction hit the ledger the host hands in; the
    // host is expected to run simulations against a throwaway branch
    assert_eq!(keeper.query_nonce(sender), 0);
    assert_eq!(keeper.query_balance(Address::repeat_byte(9)), U256::ZERO);
}

#[test]
fn block_hash_mappings_round_trip() {
    let mut keeper = funded_keeper(&[]);
    keeper.begin_block(2, B256::repeat_byte(2), B256::repeat_byte(1));

    assert_eq!(keeper.height_hash(1), Some(B256::repeat_byte(1)));
    assert_eq!(keeper.block_height_by_hash(B256::repeat_byte(1)), Some(1));
    assert_eq!(keeper.height_hash(9), None);
}

#[test]
fn genesis_round_trips_code_and_storage() {
    let key = dev_key(1);
    let sender = addr_of(&key);
    let mut keeper = funded_keeper(&[(sender, U256::from(1_000_000u64))]);

    let code = Bytes::from_static(&[0xca, 0xfe, 0xba, 0xbe]);
    let data = TxData { payload: code.clone(), ..transfer_data(0, 100_000, None, 0) };
    keeper.deliver_tx(&Tx::Evm(sign_evm_tx(data, 1, &key))).unwrap();
    let contract = create_address(sender, 0);

    let exported = keeper.export_genesis().unwrap();
    assert_eq!(exported.accounts.len(), 1);
    assert_eq!(exported.accounts[0].address, contract);
    assert_eq!(exported.accounts[0].code, code.to_vec());

    // replay into a fresh keeper whose ledger already carries the account
    // records, as the ledger module's own genesis would
    let mut ledger = MemLedger::new();
    ledger.set_account(Account {
        address: contract,
        sequence: 1,
        code_hash: alloy::primitives::keccak256(&code),
        pub_key: None,
    });
    let mut replayed = Keeper::new(
        Box::new(MemStore::new()),
        Box::new(ledger),
        Params::default(),
        TEST_CHAIN_ID,
    );
    replayed.init_genesis(exported).unwrap();

    assert_eq!(replayed.query_code(contract), code.to_vec());
    assert_eq!(replayed.chain_config().unwrap(), ChainConfig::default());
}

#[test]
fn genesis_rejects_unknown_accounts() {
    let mut keeper = funded_keeper(&[]);
    let genesis = GenesisState {
        accounts: vec![bevm::GenesisAccount {
            address: Address::repeat_byte(5),
            code: vec![1],
            storage: Vec::new(),
        }],
        ..Default::default()
    };
    assert!(matches!(
        keeper.init_genesis(genesis).unwrap_err(),
        bevm::KeeperError::AccountNotFound { .. },
    ));
}

#[test]
fn invariant_scan_is_clean_after_execution_and_flags_dangling_code() {
    let key = dev_key(1);
    let sender = addr_of(&key);
    let mut keeper = funded_keeper(&[(sender, U256::from(1_000_000u64))]);

    let data = TxData {
        payload: Bytes::from_static(&[0xaa, 0xbb]),
        ..transfer_data(0, 100_000, None, 0)
    };
    keeper.deliver_tx(&Tx::Evm(sign_evm_tx(data, 1, &key))).unwrap();
    assert!(keeper.check_invariants().is_empty());

    // an account pointing at a code blob the store never held
    let mut ledger = MemLedger::new();
    ledger.set_account(Account {
        address: Address::repeat_byte(7),
        sequence: 0,
        code_hash: B256::repeat_byte(0x42),
        pub_key: None,
    });
    let mut broken = Keeper::new(
        Box::new(MemStore::new()),
        Box::new(ledger),
        Params::default(),
        TEST_CHAIN_ID,
    );
    let breaches = broken.check_invariants();
    assert_eq!(breaches.len(), 1);
    assert_eq!(breaches[0].kind, "code");
    assert_eq!(breaches[0].address, Address::repeat_byte(7));
}

#[test]
fn params_serialize_round_trip() {
    let params = Params { extra_eips: vec![1344], ..Params::default() };
    let json = serde_json::to_string(&params).unwrap();
    assert_eq!(serde_json::from_str::<Params>(&json).unwrap(), params);
}
