//! Ground-truth accounts and the ledger seam.
//!
//! The chain's account/bank module owns the authoritative record of every
//! account: its sequence (nonce), its native-denomination balances and, for
//! EVM-touched accounts, a code hash. The execution layer mirrors this state
//! through [`AccountLedger`] and never bypasses it.

use alloy::primitives::{b256, keccak256, Address, B256, U256};

/// Keccak-256 hash of empty code, the code hash of every non-contract
/// account.
pub const EMPTY_CODE_HASH: B256 =
    b256!("c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470");

/// A compressed secp256k1 public key attached to an account after its first
/// signed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubKey(
    /// The 33-byte SEC1 compressed curve point.
    pub [u8; 33],
);

impl PubKey {
    /// Derive the Ethereum-style address for this key: the low 20 bytes of
    /// the keccak hash of the uncompressed curve point.
    pub fn address(&self) -> Result<Address, k256::ecdsa::Error> {
        let key = k256::ecdsa::VerifyingKey::from_sec1_bytes(&self.0)?;
        let point = key.to_encoded_point(false);
        let hash = keccak256(&point.as_bytes()[1..]);
        Ok(Address::from_slice(&hash[12..]))
    }
}

/// An account record as the ledger module stores it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// The account's address.
    pub address: Address,
    /// Monotonically increasing transaction counter.
    pub sequence: u64,
    /// Hash of the account's contract code; [`EMPTY_CODE_HASH`] for plain
    /// accounts.
    pub code_hash: B256,
    /// Public key attached on first use, if any.
    pub pub_key: Option<PubKey>,
}

impl Account {
    /// A fresh account with zero sequence and empty code.
    pub const fn new(address: Address) -> Self {
        Self { address, sequence: 0, code_hash: EMPTY_CODE_HASH, pub_key: None }
    }

    /// True if the account has never held code.
    pub fn has_empty_code_hash(&self) -> bool {
        self.code_hash == EMPTY_CODE_HASH
    }
}

/// The expected interface of the chain's account/bank module.
///
/// Balances are keyed by denomination; the execution layer only ever touches
/// the configured EVM denomination, but the seam mirrors the ledger's own
/// shape.
pub trait AccountLedger: std::fmt::Debug {
    /// Fetch an account record.
    fn account(&self, address: Address) -> Option<Account>;

    /// Store an account record, overwriting any previous one.
    fn set_account(&mut self, account: Account);

    /// Build a fresh account for `address`. The account is not persisted
    /// until [`AccountLedger::set_account`] is called.
    fn new_account_with_address(&mut self, address: Address) -> Account;

    /// Remove an account record and its balances.
    fn remove_account(&mut self, address: Address);

    /// Visit every account in address order. The callback returns `true` to
    /// stop early.
    fn for_each_account(&self, f: &mut dyn FnMut(&Account) -> bool);

    /// The balance of `address` in `denom`, zero if absent.
    fn balance(&self, address: Address, denom: &str) -> U256;

    /// Set the balance of `address` in `denom`.
    fn set_balance(&mut self, address: Address, denom: &str, amount: U256);
}

/// In-memory [`AccountLedger`] over [`BTreeMap`]s, with deterministic
/// iteration order.
///
/// [`BTreeMap`]: std::collections::BTreeMap
#[derive(Debug, Clone, Default)]
pub struct MemLedger {
    accounts: std::collections::BTreeMap<Address, Account>,
    balances: std::collections::BTreeMap<(Address, String), U256>,
}

impl MemLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit `amount` of `denom` to `address`, creating the account record
    /// if it does not exist.
    pub fn fund(&mut self, address: Address, denom: &str, amount: U256) {
        self.accounts.entry(address).or_insert_with(|| Account::new(address));
        let balance = self.balance(address, denom);
        self.set_balance(address, denom, balance.saturating_add(amount));
    }
}

impl AccountLedger for MemLedger {
    fn account(&self, address: Address) -> Option<Account> {
        self.accounts.get(&address).cloned()
    }

    fn set_account(&mut self, account: Account) {
        self.accounts.insert(account.address, account);
    }

    fn new_account_with_address(&mut self, address: Address) -> Account {
        Account::new(address)
    }

    fn remove_account(&mut self, address: Address) {
        self.accounts.remove(&address);
        self.balances.retain(|(addr, _), _| *addr != address);
    }

    fn for_each_account(&self, f: &mut dyn FnMut(&Account) -> bool) {
        for account in self.accounts.values() {
            if f(account) {
                break;
            }
        }
    }

    fn balance(&self, address: Address, denom: &str) -> U256 {
        self.balances.get(&(address, denom.to_owned())).copied().unwrap_or_default()
    }

    fn set_balance(&mut self, address: Address, denom: &str, amount: U256) {
        self.balances.insert((address, denom.to_owned()), amount);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_code_hash_matches_keccak_of_nothing() {
        assert_eq!(keccak256([]), EMPTY_CODE_HASH);
    }

    #[test]
    fn fund_creates_account_and_balance() {
        let mut ledger = MemLedger::new();
        let addr = Address::repeat_byte(1);
        ledger.fund(addr, "stake", U256::from(100u64));
        ledger.fund(addr, "stake", U256::from(20u64));

        assert_eq!(ledger.balance(addr, "stake"), U256::from(120u64));
        assert_eq!(ledger.account(addr).unwrap().sequence, 0);
    }

    #[test]
    fn new_account_is_not_persisted() {
        let mut ledger = MemLedger::new();
        let addr = Address::repeat_byte(2);
        let account = ledger.new_account_with_address(addr);
        assert!(ledger.account(addr).is_none());

        ledger.set_account(account);
        assert!(ledger.account(addr).is_some());
    }

    #[test]
    fn iteration_is_address_ordered() {
        let mut ledger = MemLedger::new();
        ledger.fund(Address::repeat_byte(3), "stake", U256::from(1u64));
        ledger.fund(Address::repeat_byte(1), "stake", U256::from(1u64));

        let mut seen = Vec::new();
        ledger.for_each_account(&mut |account| {
            seen.push(account.address);
            false
        });
        assert_eq!(seen, vec![Address::repeat_byte(1), Address::repeat_byte(3)]);
    }
}
