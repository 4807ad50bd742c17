//! Utilities for testing the execution layer or testing with it.

use crate::{
    account::{MemLedger, PubKey},
    keeper::Keeper,
    params::{ChainConfig, Params},
    store::MemStore,
    tx::{EvmTx, NativeTx, TxData},
};
use alloy::primitives::{keccak256, Address, B256, U256};
use k256::ecdsa::SigningKey;

/// The chain identifier test keepers run with.
pub const TEST_CHAIN_ID: &str = "bevm-1";

/// A deterministic signing key derived from one byte. `n` must be
/// non-zero.
pub fn dev_key(n: u8) -> SigningKey {
    SigningKey::from_slice(&[n; 32]).expect("a constant non-zero scalar is a valid key")
}

/// The Ethereum-style address of a signing key.
pub fn addr_of(key: &SigningKey) -> Address {
    let point = key.verifying_key().to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// The compressed public key of a signing key.
pub fn pubkey_of(key: &SigningKey) -> PubKey {
    let point = key.verifying_key().to_encoded_point(true);
    PubKey(point.as_bytes().try_into().expect("compressed points are 33 bytes"))
}

/// Sign an Ethereum-style payload for `chain_id`. A zero chain id produces
/// an unprotected homestead signature.
pub fn sign_evm_tx(mut data: TxData, chain_id: u64, key: &SigningKey) -> EvmTx {
    let unsigned = EvmTx::new(data.clone());
    let hash = if chain_id == 0 { unsigned.sig_hash(None) } else { unsigned.sig_hash(Some(chain_id)) };

    let (signature, recovery) =
        key.sign_prehash_recoverable(hash.as_slice()).expect("signing a 32-byte hash succeeds");
    let bytes = signature.to_bytes();
    data.r = U256::from_be_slice(&bytes[..32]);
    data.s = U256::from_be_slice(&bytes[32..]);
    let recovery = recovery.to_byte() as u64;
    data.v = if chain_id == 0 { 27 + recovery } else { 35 + recovery + 2 * chain_id };

    EvmTx::new(data)
}

/// Sign a native transaction: one key per signature slot, in order. Each
/// signature commits to the sequence already recorded in its slot, and the
/// matching public key is attached.
pub fn sign_native_tx(tx: &mut NativeTx, chain_id: &str, keys: &[&SigningKey]) {
    let hashes: Vec<B256> =
        tx.signatures.iter().map(|sig| tx.sign_bytes(chain_id, sig.sequence)).collect();

    for ((slot, key), hash) in tx.signatures.iter_mut().zip(keys).zip(hashes) {
        let (signature, _) =
            key.sign_prehash_recoverable(hash.as_slice()).expect("signing a 32-byte hash succeeds");
        slot.signature = signature.to_bytes().to_vec();
        slot.pub_key = Some(pubkey_of(key));
    }
}

/// A keeper over in-memory store and ledger, with the default chain
/// configuration installed and block 1 begun, funding the given accounts.
pub fn funded_keeper(balances: &[(Address, U256)]) -> Keeper {
    let params = Params::default();
    let mut ledger = MemLedger::new();
    for (address, amount) in balances {
        ledger.fund(*address, &params.evm_denom, *amount);
    }

    let mut keeper =
        Keeper::new(Box::new(MemStore::new()), Box::new(ledger), params, TEST_CHAIN_ID);
    keeper.set_chain_config(&ChainConfig::default());
    keeper.begin_block(1, B256::repeat_byte(0x11), B256::repeat_byte(0x10));
    keeper
}
