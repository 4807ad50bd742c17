//! The per-execution state database.
//!
//! [`CommitStateDB`] is the facade over a collection of [`StateObject`]s for
//! one execution context — a transaction or a read-only query. It borrows
//! the store and the ledger exclusively for its lifetime, so the borrow
//! checker enforces the single-transaction, single-thread scoping the
//! consensus path requires. Instances are constructed fresh per transaction
//! and never reused.

use crate::{
    dec::Dec,
    keys,
    logs::{decode_logs, encode_logs, TxLog},
    params::Params,
    state::{Journal, JournalEntry, StateError, StateObject},
    store::KvStore,
    AccountLedger,
};
use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use std::collections::{BTreeMap, HashMap};

/// One cached state object and its address.
#[derive(Debug)]
struct StateEntry {
    address: Address,
    object: StateObject,
}

/// The Ethereum-style account/storage/balance API over the versioned store
/// and the ledger module, scoped to one execution context.
#[derive(Debug)]
pub struct CommitStateDB<'a> {
    store: &'a mut dyn KvStore,
    ledger: &'a mut dyn AccountLedger,
    params: Params,

    journal: Journal,
    state_objects: Vec<StateEntry>,
    address_index: HashMap<Address, usize>,

    /// Logs emitted this execution, keyed by transaction hash. Ordered so
    /// commit writes them deterministically.
    logs: BTreeMap<B256, Vec<TxLog>>,
    refund: u64,

    // Transaction context used to stamp emitted logs; seeded by `prepare`.
    tx_hash: B256,
    block_hash: B256,
    tx_index: u64,
    log_size: u64,
    block_height: u64,
}

impl<'a> CommitStateDB<'a> {
    /// Create a fresh instance over the given store and ledger.
    pub fn new(
        store: &'a mut dyn KvStore,
        ledger: &'a mut dyn AccountLedger,
        params: Params,
    ) -> Self {
        Self {
            store,
            ledger,
            params,
            journal: Journal::new(),
            state_objects: Vec::new(),
            address_index: HashMap::new(),
            logs: BTreeMap::new(),
            refund: 0,
            tx_hash: B256::ZERO,
            block_hash: B256::ZERO,
            tx_index: 0,
            log_size: 0,
            block_height: 0,
        }
    }

    /// Set the block height used to stamp emitted logs.
    pub fn with_block_height(mut self, height: u64) -> Self {
        self.block_height = height;
        self
    }

    /// Seed the transaction context. Must be called once per non-simulated
    /// transaction before execution.
    pub fn prepare(&mut self, tx_hash: B256, block_hash: B256, tx_index: u64) {
        self.tx_hash = tx_hash;
        self.block_hash = block_hash;
        self.tx_index = tx_index;
    }

    /// Seed the block-wide running log index.
    pub fn set_log_size(&mut self, log_size: u64) {
        self.log_size = log_size;
    }

    /// The block-wide running log index, including logs emitted this
    /// execution.
    pub fn log_size(&self) -> u64 {
        self.log_size + self.logs.values().map(|l| l.len() as u64).sum::<u64>()
    }

    // ------------------------------------------------------------------
    // Object management
    // ------------------------------------------------------------------

    /// Look up the cached object for `address`, materializing it from the
    /// ledger on first access. Returns `None` for absent or deleted
    /// accounts.
    fn read_object(&mut self, address: Address) -> Option<usize> {
        if let Some(&idx) = self.address_index.get(&address) {
            if self.state_objects[idx].object.deleted {
                return None;
            }
            return Some(idx);
        }

        let account = self.ledger.account(address)?;
        let balance = self.ledger.balance(address, &self.params.evm_denom);
        let idx = self.insert_object(StateObject::new(account, balance));
        Some(idx)
    }

    /// Get the cached object for `address`, creating a fresh one if no live
    /// object exists.
    fn ensure_object(&mut self, address: Address) -> usize {
        match self.read_object(address) {
            Some(idx) => idx,
            None => self.create_object(address).0,
        }
    }

    /// Create a fresh object for `address`, journaling the creation (or the
    /// replacement of a live object). Returns the index and the replaced
    /// object's balance, if one was live.
    fn create_object(&mut self, address: Address) -> (usize, Option<Dec>) {
        let prev_idx = self.address_index.get(&address).copied();
        let prev_live = prev_idx.map(|i| &self.state_objects[i].object).filter(|o| !o.deleted);

        match prev_live {
            Some(prev) => {
                let prev_balance = prev.balance_dec();
                self.journal.append(JournalEntry::ResetObject { prev: Box::new(prev.deep_copy()) });
                let account = self.ledger.new_account_with_address(address);
                let idx = prev_idx.expect("live object has an index");
                self.state_objects[idx].object = StateObject::new(account, U256::ZERO);
                (idx, Some(prev_balance))
            }
            None => {
                self.journal.append(JournalEntry::CreateObject { address });
                let account = self.ledger.new_account_with_address(address);
                let object = StateObject::new(account, U256::ZERO);
                let idx = match prev_idx {
                    Some(i) => {
                        self.state_objects[i].object = object;
                        i
                    }
                    None => self.insert_object(object),
                };
                (idx, None)
            }
        }
    }

    fn insert_object(&mut self, object: StateObject) -> usize {
        let address = object.address();
        self.state_objects.push(StateEntry { address, object });
        let idx = self.state_objects.len() - 1;
        self.address_index.insert(address, idx);
        idx
    }

    /// Explicitly create an account, carrying over the balance of any live
    /// predecessor.
    pub fn create_account(&mut self, address: Address) {
        let (idx, prev_balance) = self.create_object(address);
        if let Some(balance) = prev_balance {
            self.state_objects[idx].object.set_balance_raw(balance);
        }
    }

    // ------------------------------------------------------------------
    // Read accessors — absence yields zero values, never an error
    // ------------------------------------------------------------------

    /// The balance of `address`, zero if absent.
    pub fn balance(&mut self, address: Address) -> U256 {
        self.read_object(address).map_or(U256::ZERO, |idx| self.state_objects[idx].object.balance())
    }

    /// The nonce of `address`, zero if absent.
    pub fn nonce(&mut self, address: Address) -> u64 {
        self.read_object(address).map_or(0, |idx| self.state_objects[idx].object.nonce())
    }

    /// The code of `address`, empty if absent.
    pub fn code(&mut self, address: Address) -> Vec<u8> {
        match self.read_object(address) {
            Some(idx) => {
                let Self { state_objects, store, .. } = self;
                state_objects[idx].object.code(&**store)
            }
            None => Vec::new(),
        }
    }

    /// The code size of `address`.
    pub fn code_size(&mut self, address: Address) -> usize {
        self.code(address).len()
    }

    /// The code hash of `address`, the zero hash if absent.
    pub fn code_hash(&mut self, address: Address) -> B256 {
        self.read_object(address).map_or(B256::ZERO, |idx| self.state_objects[idx].object.code_hash())
    }

    /// The storage value of `(address, key)`, zero if absent.
    pub fn state(&mut self, address: Address, key: B256) -> B256 {
        match self.read_object(address) {
            Some(idx) => {
                let Self { state_objects, store, .. } = self;
                state_objects[idx].object.get_state(&**store, key)
            }
            None => B256::ZERO,
        }
    }

    /// The committed storage value of `(address, key)`, bypassing the dirty
    /// buffer.
    pub fn committed_state(&mut self, address: Address, key: B256) -> B256 {
        match self.read_object(address) {
            Some(idx) => {
                let Self { state_objects, store, .. } = self;
                state_objects[idx].object.get_committed_state(&**store, key)
            }
            None => B256::ZERO,
        }
    }

    /// True if an object exists for `address`, suicided ones included.
    pub fn exist(&mut self, address: Address) -> bool {
        self.read_object(address).is_some()
    }

    /// True if the account is empty (zero nonce, zero balance, no code) or
    /// absent.
    pub fn empty(&mut self, address: Address) -> bool {
        self.read_object(address).is_none_or(|idx| self.state_objects[idx].object.is_empty())
    }

    /// True if `address` was marked suicided this execution.
    pub fn has_suicided(&mut self, address: Address) -> bool {
        self.read_object(address).is_some_and(|idx| self.state_objects[idx].object.suicided)
    }

    /// The current refund counter.
    pub const fn refund(&self) -> u64 {
        self.refund
    }

    // ------------------------------------------------------------------
    // Mutators — always succeed at the API level; store errors surface on
    // subsequent reads or at commit
    // ------------------------------------------------------------------

    /// Set the balance of `address`.
    pub fn set_balance(&mut self, address: Address, amount: U256) {
        let idx = self.ensure_object(address);
        let Self { journal, state_objects, .. } = self;
        state_objects[idx].object.set_balance(journal, amount);
    }

    /// Add to the balance of `address`.
    pub fn add_balance(&mut self, address: Address, amount: U256) {
        let idx = self.ensure_object(address);
        let Self { journal, state_objects, .. } = self;
        state_objects[idx].object.add_balance(journal, amount);
    }

    /// Subtract from the balance of `address`.
    pub fn sub_balance(&mut self, address: Address, amount: U256) {
        let idx = self.ensure_object(address);
        let Self { journal, state_objects, .. } = self;
        state_objects[idx].object.sub_balance(journal, amount);
    }

    /// Set the nonce of `address`.
    pub fn set_nonce(&mut self, address: Address, nonce: u64) {
        let idx = self.ensure_object(address);
        let Self { journal, state_objects, .. } = self;
        state_objects[idx].object.set_nonce(journal, nonce);
    }

    /// Set the code of `address`; the code hash is derived.
    pub fn set_code(&mut self, address: Address, code: Vec<u8>) {
        let idx = self.ensure_object(address);
        let code_hash = keccak256(&code);
        let Self { journal, state_objects, store, .. } = self;
        state_objects[idx].object.set_code(journal, &**store, code_hash, code);
    }

    /// Write a storage value for `address`.
    pub fn set_state(&mut self, address: Address, key: B256, value: B256) {
        let idx = self.ensure_object(address);
        let Self { journal, state_objects, store, .. } = self;
        state_objects[idx].object.set_state(journal, &**store, key, value);
    }

    /// Mark `address` suicided and zero its balance. Returns false if no
    /// object exists.
    pub fn suicide(&mut self, address: Address) -> bool {
        let Some(idx) = self.read_object(address) else { return false };
        let object = &self.state_objects[idx].object;
        self.journal.append(JournalEntry::Suicide {
            address,
            prev: object.suicided,
            prev_balance: object.balance_dec(),
        });
        let object = &mut self.state_objects[idx].object;
        object.suicided = true;
        object.set_balance_raw(Dec::ZERO);
        true
    }

    /// Increase the refund counter.
    pub fn add_refund(&mut self, gas: u64) {
        self.journal.append(JournalEntry::Refund { prev: self.refund });
        self.refund += gas;
    }

    /// Decrease the refund counter, clamping at zero.
    pub fn sub_refund(&mut self, gas: u64) {
        self.journal.append(JournalEntry::Refund { prev: self.refund });
        self.refund = self.refund.saturating_sub(gas);
    }

    // ------------------------------------------------------------------
    // Logs
    // ------------------------------------------------------------------

    /// Append a log for the prepared transaction, stamped with the current
    /// transaction context and running log index.
    pub fn add_log(&mut self, address: Address, topics: Vec<B256>, data: Bytes) {
        self.journal.append(JournalEntry::Log { tx_hash: self.tx_hash });
        let pending = self.logs.entry(self.tx_hash).or_default();
        let log = TxLog {
            address,
            topics,
            data,
            block_number: self.block_height,
            tx_hash: self.tx_hash,
            tx_index: self.tx_index,
            block_hash: self.block_hash,
            log_index: self.log_size + pending.len() as u64,
            removed: false,
        };
        pending.push(log);
    }

    /// The logs emitted for `tx_hash`: pending ones if any, else whatever
    /// the store holds.
    pub fn logs(&self, tx_hash: B256) -> Result<Vec<TxLog>, StateError> {
        if let Some(logs) = self.logs.get(&tx_hash) {
            return Ok(logs.clone());
        }
        match self.store.get(&keys::logs_key(tx_hash)) {
            Some(raw) => Ok(decode_logs(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    /// Replace the pending logs for `tx_hash`.
    pub fn set_logs(&mut self, tx_hash: B256, logs: Vec<TxLog>) {
        self.logs.insert(tx_hash, logs);
    }

    /// Drop the pending logs for `tx_hash`.
    pub fn delete_logs(&mut self, tx_hash: B256) {
        self.logs.remove(&tx_hash);
    }

    // ------------------------------------------------------------------
    // Snapshot / revert
    // ------------------------------------------------------------------

    /// Take a snapshot of the current state. The identifier is the journal
    /// length.
    pub fn snapshot(&self) -> usize {
        self.journal.len()
    }

    /// Revert to a previously taken snapshot, undoing every journaled
    /// mutation since in LIFO order.
    pub fn revert_to_snapshot(&mut self, id: usize) {
        assert!(id <= self.journal.len(), "snapshot {id} cannot be reverted");
        while self.journal.len() > id {
            let entry = self.journal.pop().expect("journal is non-empty");
            entry.revert(self);
        }
    }

    // ------------------------------------------------------------------
    // Finalise / commit
    // ------------------------------------------------------------------

    /// Flush dirty storage and account records, without code or logs.
    ///
    /// `delete_empty` prunes objects that end the execution empty; it must
    /// be false during import/export replay so nodes that visited accounts
    /// in different orders cannot diverge.
    pub fn finalise(&mut self, delete_empty: bool) -> Result<(), StateError> {
        self.flush(delete_empty, false)
    }

    /// Flush everything: dirty storage, account records, changed code blobs
    /// and emitted logs; then clear the journal and refund counter.
    pub fn commit(&mut self, delete_empty: bool) -> Result<(), StateError> {
        self.flush(delete_empty, true)
    }

    fn flush(&mut self, delete_empty: bool, with_code_and_logs: bool) -> Result<(), StateError> {
        for address in self.journal.dirty_addresses() {
            let Some(&idx) = self.address_index.get(&address) else { continue };
            let Self { state_objects, store, ledger, params, .. } = self;
            let object = &mut state_objects[idx].object;

            if object.suicided || (delete_empty && object.is_empty()) {
                object.deleted = true;
                ledger.remove_account(address);
                tracing::debug!(%address, suicided = object.suicided, "pruned state object");
                continue;
            }

            if with_code_and_logs {
                object.commit_code(&mut **store);
            }
            object.commit_state(&mut **store);
            ledger.set_account(object.ledger_account());
            ledger.set_balance(address, &params.evm_denom, object.balance());
        }

        if with_code_and_logs {
            let logs = std::mem::take(&mut self.logs);
            for (tx_hash, logs) in logs {
                self.store.set(keys::logs_key(tx_hash), encode_logs(&logs));
            }
        }

        self.journal.clear();
        self.refund = 0;

        for entry in &self.state_objects {
            if let Some(err) = entry.object.error() {
                return Err(err.clone());
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Iteration
    // ------------------------------------------------------------------

    /// Visit every storage entry of `address`: committed entries with the
    /// dirty overlay applied, then dirty-only entries. The callback returns
    /// `true` to stop early.
    pub fn for_each_storage(&mut self, address: Address, f: &mut dyn FnMut(B256, B256) -> bool) {
        let dirty: HashMap<B256, B256> = match self.read_object(address) {
            Some(idx) => self.state_objects[idx]
                .object
                .dirty_entries()
                .iter()
                .map(|e| (e.key, e.value))
                .collect(),
            None => HashMap::new(),
        };

        let prefix = keys::address_storage_prefix(address);
        let mut visited = std::collections::HashSet::new();
        let mut stopped = false;
        self.store.iterate_prefix(&prefix, &mut |key, value| {
            let hashed = B256::from_slice(&key[prefix.len()..]);
            visited.insert(hashed);
            let value = dirty.get(&hashed).copied().unwrap_or_else(|| B256::from_slice(value));
            stopped = f(hashed, value);
            stopped
        });
        if stopped {
            return;
        }

        let dirty_only: Vec<usize> = match self.address_index.get(&address) {
            Some(&idx) => (0..self.state_objects[idx].object.dirty_entries().len()).collect(),
            None => Vec::new(),
        };
        for i in dirty_only {
            let entry = self.state_objects[self.address_index[&address]].object.dirty_entries()[i];
            if visited.contains(&entry.key) {
                continue;
            }
            if f(entry.key, entry.value) {
                break;
            }
        }
    }

    /// The first store error recorded by any state object.
    pub fn error(&self) -> Option<StateError> {
        self.state_objects.iter().find_map(|e| e.object.error().cloned())
    }
}

impl JournalEntry {
    /// Undo this entry against the state database that recorded it.
    pub(crate) fn revert(self, db: &mut CommitStateDB<'_>) {
        match self {
            Self::CreateObject { address } => {
                if let Some(idx) = db.address_index.remove(&address) {
                    db.state_objects.swap_remove(idx);
                    if idx < db.state_objects.len() {
                        let moved = db.state_objects[idx].address;
                        db.address_index.insert(moved, idx);
                    }
                }
            }
            Self::ResetObject { prev } => {
                let address = prev.address();
                if let Some(&idx) = db.address_index.get(&address) {
                    db.state_objects[idx].object = *prev;
                }
            }
            Self::Suicide { address, prev, prev_balance } => {
                if let Some(&idx) = db.address_index.get(&address) {
                    let object = &mut db.state_objects[idx].object;
                    object.suicided = prev;
                    object.set_balance_raw(prev_balance);
                }
            }
            Self::Balance { address, prev } => {
                if let Some(&idx) = db.address_index.get(&address) {
                    db.state_objects[idx].object.set_balance_raw(prev);
                }
            }
            Self::Nonce { address, prev } => {
                if let Some(&idx) = db.address_index.get(&address) {
                    db.state_objects[idx].object.set_nonce_raw(prev);
                }
            }
            Self::Storage { address, key, prev } => {
                if let Some(&idx) = db.address_index.get(&address) {
                    db.state_objects[idx].object.set_state_raw(key, prev);
                }
            }
            Self::Code { address, prev_hash, prev_code } => {
                if let Some(&idx) = db.address_index.get(&address) {
                    db.state_objects[idx].object.set_code_raw(prev_hash, prev_code);
                }
            }
            Self::Touch { .. } => {}
            Self::Refund { prev } => db.refund = prev,
            Self::Log { tx_hash } => {
                if let Some(logs) = db.logs.get_mut(&tx_hash) {
                    logs.pop();
                    if logs.is_empty() {
                        db.logs.remove(&tx_hash);
                    }
                }
            }
        }
    }
}
