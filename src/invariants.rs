//! Periodic consistency scan between the ledger and the EVM-visible view.
//!
//! Balance and nonce agreement is not enforced atomically at every mutation
//! site; the single-writer execution path is relied on instead, and this
//! scan reports any drift. Breaches are reported, never auto-repaired.

use crate::{
    account::{AccountLedger as _, EMPTY_CODE_HASH},
    keeper::Keeper,
    keys,
    state::CommitStateDB,
    store::KvStore as _,
};
use alloy::primitives::{keccak256, Address};

/// One detected inconsistency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantBreach {
    /// Which invariant broke: `"balance"`, `"nonce"` or `"code"`.
    pub kind: &'static str,
    /// The affected account.
    pub address: Address,
    /// Human-readable description of the mismatch.
    pub detail: String,
}

impl Keeper {
    /// Scan every ledger account and report balance, nonce and code-hash
    /// inconsistencies between the ledger and the EVM-visible view.
    pub fn check_invariants(&mut self) -> Vec<InvariantBreach> {
        let mut addresses = Vec::new();
        self.ledger.for_each_account(&mut |account| {
            addresses.push(account.address);
            false
        });

        let mut breaches = Vec::new();
        for address in addresses {
            let ledger_balance = self.ledger.balance(address, &self.params.evm_denom);
            let (sequence, code_hash) = {
                let account = self.ledger.account(address).expect("address was just listed");
                (account.sequence, account.code_hash)
            };

            let mut csdb =
                CommitStateDB::new(&mut *self.store, &mut *self.ledger, self.params.clone());
            let evm_balance = csdb.balance(address);
            let evm_nonce = csdb.nonce(address);

            if evm_balance != ledger_balance {
                breaches.push(InvariantBreach {
                    kind: "balance",
                    address,
                    detail: format!(
                        "ledger balance {ledger_balance}, evm balance {evm_balance}"
                    ),
                });
            }
            if evm_nonce != sequence {
                breaches.push(InvariantBreach {
                    kind: "nonce",
                    address,
                    detail: format!("ledger sequence {sequence}, evm nonce {evm_nonce}"),
                });
            }
            if code_hash != EMPTY_CODE_HASH {
                let stored = self.store.get(&keys::code_key(code_hash)).unwrap_or_default();
                if keccak256(&stored) != code_hash {
                    breaches.push(InvariantBreach {
                        kind: "code",
                        address,
                        detail: format!("stored code does not hash to {code_hash}"),
                    });
                }
            }
        }

        if !breaches.is_empty() {
            tracing::warn!(count = breaches.len(), "invariant scan found inconsistencies");
        }
        breaches
    }
}
