//! Store key layout.
//!
//! Every piece of persisted state lives under a one-byte prefix. Contract
//! storage slot keys are hashed together with the owning address before use,
//! so two contracts can never collide on a slot.

use alloy::primitives::{keccak256, Address, B256};

/// Prefix for the block-hash → height mapping.
pub const KEY_PREFIX_BLOCK_HASH: [u8; 1] = [0x01];
/// Prefix for the per-height block bloom filters.
pub const KEY_PREFIX_BLOOM: [u8; 1] = [0x02];
/// Prefix for transaction logs, keyed by transaction hash.
pub const KEY_PREFIX_LOGS: [u8; 1] = [0x03];
/// Prefix for contract code, keyed by code hash.
pub const KEY_PREFIX_CODE: [u8; 1] = [0x04];
/// Prefix for contract storage, keyed by address then hashed slot.
pub const KEY_PREFIX_STORAGE: [u8; 1] = [0x05];
/// Key of the chain configuration record.
pub const KEY_PREFIX_CHAIN_CONFIG: [u8; 1] = [0x06];
/// Prefix for the height → block-hash mapping.
pub const KEY_PREFIX_HEIGHT_HASH: [u8; 1] = [0x07];

/// Prefix for compressed bloom-bits rows in the bloom store.
pub const BLOOM_BITS_PREFIX: [u8; 1] = *b"B";
/// Prefix for per-section head hashes in the bloom store.
pub const BLOOM_SECTION_HEAD_PREFIX: [u8; 1] = *b"H";
/// Key of the valid-sections watermark in the bloom store.
pub const BLOOM_VALID_SECTIONS_KEY: &[u8] = b"valid-sections";

/// Key for the height stored under a block hash.
pub fn block_hash_key(hash: B256) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 32);
    key.extend_from_slice(&KEY_PREFIX_BLOCK_HASH);
    key.extend_from_slice(hash.as_slice());
    key
}

/// Key for the block hash stored under a height.
///
/// Heights are big-endian so iteration visits them in order.
pub fn height_hash_key(height: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 8);
    key.extend_from_slice(&KEY_PREFIX_HEIGHT_HASH);
    key.extend_from_slice(&height.to_be_bytes());
    key
}

/// Key for the block bloom stored under a height.
pub fn bloom_key(height: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 8);
    key.extend_from_slice(&KEY_PREFIX_BLOOM);
    key.extend_from_slice(&height.to_be_bytes());
    key
}

/// Key for a code blob stored under its hash.
pub fn code_key(code_hash: B256) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 32);
    key.extend_from_slice(&KEY_PREFIX_CODE);
    key.extend_from_slice(code_hash.as_slice());
    key
}

/// Key for the logs of one transaction.
pub fn logs_key(tx_hash: B256) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 32);
    key.extend_from_slice(&KEY_PREFIX_LOGS);
    key.extend_from_slice(tx_hash.as_slice());
    key
}

/// Prefix under which all storage of one account lives.
pub fn address_storage_prefix(address: Address) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(1 + 20);
    prefix.extend_from_slice(&KEY_PREFIX_STORAGE);
    prefix.extend_from_slice(address.as_slice());
    prefix
}

/// Full store key of one storage slot, from its already-hashed composite
/// key.
pub fn storage_key(address: Address, hashed_slot: B256) -> Vec<u8> {
    let mut key = address_storage_prefix(address);
    key.extend_from_slice(hashed_slot.as_slice());
    key
}

/// Hash a storage slot key together with its owning address.
pub fn storage_slot_hash(address: Address, key: B256) -> B256 {
    let mut composite = [0u8; 20 + 32];
    composite[..20].copy_from_slice(address.as_slice());
    composite[20..].copy_from_slice(key.as_slice());
    keccak256(composite)
}

/// Bloom store key of one compressed bloom-bits row:
/// prefix ‖ bit (u16 big-endian) ‖ section (u64 big-endian) ‖ section head
/// hash.
pub fn bloom_bits_key(bit: u32, section: u64, head: B256) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 2 + 8 + 32);
    key.extend_from_slice(&BLOOM_BITS_PREFIX);
    key.extend_from_slice(&(bit as u16).to_be_bytes());
    key.extend_from_slice(&section.to_be_bytes());
    key.extend_from_slice(head.as_slice());
    key
}

/// Bloom store key of a section's head hash.
pub fn bloom_section_head_key(section: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 8);
    key.extend_from_slice(&BLOOM_SECTION_HEAD_PREFIX);
    key.extend_from_slice(&section.to_be_bytes());
    key
}
