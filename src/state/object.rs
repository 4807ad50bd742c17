//! In-memory working copies of account state.
//!
//! A [`StateObject`] caches one account's EVM-visible state for the lifetime
//! of the [`CommitStateDB`] that created it: balance, nonce, code and two
//! storage layers — the origin cache of values read from the store and the
//! dirty buffer of pending writes. Mutations journal the previous value
//! through an explicitly passed [`Journal`] before they apply.
//!
//! [`CommitStateDB`]: crate::state::CommitStateDB

use crate::{
    account::{Account, EMPTY_CODE_HASH},
    dec::Dec,
    keys,
    state::{Journal, JournalEntry, StateError},
    store::KvStore,
};
use alloy::primitives::{Address, B256, U256};
use std::collections::HashMap;

/// One storage slot: the hashed composite key and its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageEntry {
    /// The hashed composite key (`keccak(address ‖ slot)`).
    pub key: B256,
    /// The slot value.
    pub value: B256,
}

/// The in-memory working copy of one account.
///
/// Exclusively owned by the `CommitStateDB` that created it; it never
/// outlives that instance.
#[derive(Debug, Clone)]
pub struct StateObject {
    account: Account,
    balance: Dec,
    /// Contract code, loaded from the store at most once.
    code: Option<Vec<u8>>,
    /// Values read from the store this execution, deduplicated by key.
    origin_storage: Vec<StorageEntry>,
    origin_index: HashMap<B256, usize>,
    /// Pending writes, deduplicated by key.
    dirty_storage: Vec<StorageEntry>,
    dirty_index: HashMap<B256, usize>,
    pub(crate) dirty_code: bool,
    pub(crate) suicided: bool,
    pub(crate) deleted: bool,
    /// First store error seen; surfaced at commit.
    db_err: Option<StateError>,
}

impl StateObject {
    pub(crate) fn new(mut account: Account, balance: U256) -> Self {
        if account.code_hash == B256::ZERO {
            account.code_hash = EMPTY_CODE_HASH;
        }
        Self {
            account,
            balance: Dec::from_int(balance),
            code: None,
            origin_storage: Vec::new(),
            origin_index: HashMap::new(),
            dirty_storage: Vec::new(),
            dirty_index: HashMap::new(),
            dirty_code: false,
            suicided: false,
            deleted: false,
            db_err: None,
        }
    }

    /// The account's address.
    pub fn address(&self) -> Address {
        self.account.address
    }

    /// The EVM-visible balance as a ledger integer.
    pub fn balance(&self) -> U256 {
        self.balance.to_int_floor()
    }

    pub(crate) const fn balance_dec(&self) -> Dec {
        self.balance
    }

    /// The account's nonce.
    pub const fn nonce(&self) -> u64 {
        self.account.sequence
    }

    /// The account's code hash.
    pub const fn code_hash(&self) -> B256 {
        self.account.code_hash
    }

    /// True if the account is empty: zero nonce, zero balance, no code.
    pub fn is_empty(&self) -> bool {
        self.account.sequence == 0
            && self.balance.is_zero()
            && self.account.code_hash == EMPTY_CODE_HASH
    }

    // ------------------------------------------------------------------
    // Storage
    // ------------------------------------------------------------------

    /// Get a storage value: the dirty value if one is pending, else the
    /// committed value.
    pub fn get_state(&mut self, store: &dyn KvStore, key: B256) -> B256 {
        let hashed = keys::storage_slot_hash(self.address(), key);
        if let Some(&idx) = self.dirty_index.get(&hashed) {
            return self.dirty_storage[idx].value;
        }
        self.committed_by_hashed(store, hashed)
    }

    /// Get the committed storage value, reading through to the store and
    /// caching the result on first access.
    pub fn get_committed_state(&mut self, store: &dyn KvStore, key: B256) -> B256 {
        let hashed = keys::storage_slot_hash(self.address(), key);
        self.committed_by_hashed(store, hashed)
    }

    fn committed_by_hashed(&mut self, store: &dyn KvStore, hashed: B256) -> B256 {
        if let Some(&idx) = self.origin_index.get(&hashed) {
            return self.origin_storage[idx].value;
        }

        let value = store
            .get(&keys::storage_key(self.address(), hashed))
            .map(|raw| B256::from_slice(&raw))
            .unwrap_or_default();

        self.origin_storage.push(StorageEntry { key: hashed, value });
        self.origin_index.insert(hashed, self.origin_storage.len() - 1);
        value
    }

    /// Write a storage value. A no-op if the new value equals the current
    /// one; otherwise journals the previous value and buffers the write.
    pub fn set_state(&mut self, journal: &mut Journal, store: &dyn KvStore, key: B256, value: B256) {
        let prev = self.get_state(store, key);
        if prev == value {
            return;
        }

        let hashed = keys::storage_slot_hash(self.address(), key);
        journal.append(JournalEntry::Storage { address: self.address(), key: hashed, prev });
        self.set_state_raw(hashed, value);
    }

    pub(crate) fn set_state_raw(&mut self, hashed: B256, value: B256) {
        if let Some(&idx) = self.dirty_index.get(&hashed) {
            self.dirty_storage[idx].value = value;
            return;
        }
        self.dirty_storage.push(StorageEntry { key: hashed, value });
        self.dirty_index.insert(hashed, self.dirty_storage.len() - 1);
    }

    pub(crate) fn dirty_entries(&self) -> &[StorageEntry] {
        &self.dirty_storage
    }

    // ------------------------------------------------------------------
    // Balance / nonce / code
    // ------------------------------------------------------------------

    /// Add `amount` to the balance. A zero amount on an empty account still
    /// journals a touch so account-clearing observers see it.
    pub fn add_balance(&mut self, journal: &mut Journal, amount: U256) {
        let amount = Dec::from_int(amount);
        if amount.is_zero() {
            if self.is_empty() {
                self.touch(journal);
            }
            return;
        }
        self.set_balance_dec(journal, self.balance.saturating_add(amount));
    }

    /// Subtract `amount` from the balance.
    pub fn sub_balance(&mut self, journal: &mut Journal, amount: U256) {
        let amount = Dec::from_int(amount);
        if amount.is_zero() {
            return;
        }
        self.set_balance_dec(journal, self.balance.saturating_sub(amount));
    }

    /// Set the balance to an integer amount.
    pub fn set_balance(&mut self, journal: &mut Journal, amount: U256) {
        self.set_balance_dec(journal, Dec::from_int(amount));
    }

    fn set_balance_dec(&mut self, journal: &mut Journal, amount: Dec) {
        journal.append(JournalEntry::Balance { address: self.address(), prev: self.balance });
        self.balance = amount;
    }

    pub(crate) fn set_balance_raw(&mut self, amount: Dec) {
        self.balance = amount;
    }

    /// Set the account nonce.
    pub fn set_nonce(&mut self, journal: &mut Journal, nonce: u64) {
        journal.append(JournalEntry::Nonce { address: self.address(), prev: self.account.sequence });
        self.set_nonce_raw(nonce);
    }

    pub(crate) fn set_nonce_raw(&mut self, nonce: u64) {
        self.account.sequence = nonce;
    }

    /// Set the account code.
    pub fn set_code(&mut self, journal: &mut Journal, store: &dyn KvStore, code_hash: B256, code: Vec<u8>) {
        let prev_code = self.code(store);
        journal.append(JournalEntry::Code {
            address: self.address(),
            prev_hash: self.account.code_hash,
            prev_code: Some(prev_code),
        });
        self.set_code_raw(code_hash, Some(code));
    }

    pub(crate) fn set_code_raw(&mut self, code_hash: B256, code: Option<Vec<u8>>) {
        self.code = code;
        self.account.code_hash = code_hash;
        self.dirty_code = true;
    }

    /// The account's code, loading it from the store on first access. A
    /// missing blob for a non-empty code hash memoizes an error, not the
    /// code.
    pub fn code(&mut self, store: &dyn KvStore) -> Vec<u8> {
        if let Some(code) = &self.code {
            return code.clone();
        }
        if self.account.code_hash == EMPTY_CODE_HASH {
            return Vec::new();
        }

        match store.get(&keys::code_key(self.account.code_hash)) {
            Some(code) if !code.is_empty() => {
                self.code = Some(code.clone());
                code
            }
            _ => {
                self.set_error(StateError::MissingCode {
                    address: self.address(),
                    code_hash: self.account.code_hash,
                });
                Vec::new()
            }
        }
    }

    fn touch(&mut self, journal: &mut Journal) {
        journal.append(JournalEntry::Touch { address: self.address() });
    }

    // ------------------------------------------------------------------
    // Commit
    // ------------------------------------------------------------------

    /// Flush the dirty storage buffer to the store. Zero values delete the
    /// slot instead of storing zero bytes; unchanged values are skipped.
    pub(crate) fn commit_state(&mut self, store: &mut dyn KvStore) {
        let address = self.address();
        for entry in std::mem::take(&mut self.dirty_storage) {
            self.dirty_index.remove(&entry.key);
            let store_key = keys::storage_key(address, entry.key);

            if entry.value.is_zero() {
                store.delete(&store_key);
                if let Some(&idx) = self.origin_index.get(&entry.key) {
                    self.origin_storage[idx].value = B256::ZERO;
                }
                continue;
            }

            match self.origin_index.get(&entry.key) {
                Some(&idx) if self.origin_storage[idx].value == entry.value => continue,
                Some(&idx) => {
                    self.origin_storage[idx].value = entry.value;
                    store.set(store_key, entry.value.to_vec());
                }
                None => {
                    self.origin_storage.push(entry);
                    self.origin_index.insert(entry.key, self.origin_storage.len() - 1);
                    store.set(store_key, entry.value.to_vec());
                }
            }
        }
    }

    /// Persist the code blob under its hash, if the code changed.
    pub(crate) fn commit_code(&mut self, store: &mut dyn KvStore) {
        if !self.dirty_code {
            return;
        }
        if let Some(code) = &self.code {
            store.set(keys::code_key(self.account.code_hash), code.clone());
        }
        self.dirty_code = false;
    }

    /// The account record to write back to the ledger.
    pub(crate) fn ledger_account(&self) -> Account {
        self.account.clone()
    }

    /// Duplicate this object, sharing no mutable state with the original.
    pub fn deep_copy(&self) -> Self {
        self.clone()
    }

    pub(crate) fn set_error(&mut self, err: StateError) {
        if self.db_err.is_none() {
            self.db_err = Some(err);
        }
    }

    pub(crate) const fn error(&self) -> Option<&StateError> {
        self.db_err.as_ref()
    }
}
