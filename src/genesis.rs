//! Genesis import and export.
//!
//! Import replays exported account code and storage into the store; export
//! dumps them back out. Both paths run with empty-object pruning disabled —
//! replay must produce byte-identical state on every node regardless of the
//! order accounts were touched in.

use crate::{
    account::{AccountLedger as _, EMPTY_CODE_HASH},
    keeper::{Keeper, KeeperError},
    keys,
    params::{ChainConfig, Params},
    state::StorageEntry,
    store::KvStore as _,
};
use alloy::primitives::{keccak256, Address};

/// One account's EVM state in genesis. Balances and sequences live in the
/// ledger module's own genesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenesisAccount {
    /// The account's address.
    pub address: Address,
    /// Contract code, possibly empty.
    pub code: Vec<u8>,
    /// Storage entries, keyed by hashed composite key.
    pub storage: Vec<StorageEntry>,
}

/// The module's genesis state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenesisState {
    /// Execution parameters.
    pub params: Params,
    /// The feature schedule.
    pub chain_config: ChainConfig,
    /// EVM-touched accounts.
    pub accounts: Vec<GenesisAccount>,
}

impl Default for GenesisState {
    fn default() -> Self {
        Self {
            params: Params::default(),
            chain_config: ChainConfig::default(),
            accounts: Vec::new(),
        }
    }
}

impl Keeper {
    /// Initialize the module from genesis. Every genesis account must
    /// already have a ledger record.
    pub fn init_genesis(&mut self, genesis: GenesisState) -> Result<(), KeeperError> {
        genesis.params.validate()?;
        self.params = genesis.params;
        self.set_chain_config(&genesis.chain_config);

        // replay writes code and storage directly: no journal, no pruning,
        // so every node materializes byte-identical state regardless of
        // account visit order
        for account in &genesis.accounts {
            let Some(mut record) = self.ledger.account(account.address) else {
                return Err(KeeperError::AccountNotFound { address: account.address });
            };

            if !account.code.is_empty() {
                let code_hash = keccak256(&account.code);
                self.store.set(keys::code_key(code_hash), account.code.clone());
                if record.code_hash != code_hash {
                    record.code_hash = code_hash;
                    self.ledger.set_account(record);
                }
            }

            for entry in &account.storage {
                self.store
                    .set(keys::storage_key(account.address, entry.key), entry.value.to_vec());
            }
        }

        tracing::info!(accounts = genesis.accounts.len(), "initialized genesis state");
        Ok(())
    }

    /// Export the module's state: every ledger account that holds code,
    /// with its storage.
    pub fn export_genesis(&mut self) -> Result<GenesisState, KeeperError> {
        let mut contract_addresses = Vec::new();
        self.ledger.for_each_account(&mut |account| {
            if account.code_hash != EMPTY_CODE_HASH {
                contract_addresses.push(account.address);
            }
            false
        });

        let mut accounts = Vec::with_capacity(contract_addresses.len());
        for address in contract_addresses {
            let code = self.query_code(address);
            let storage = self.query_account_storage(address);
            accounts.push(GenesisAccount { address, code, storage });
        }

        Ok(GenesisState {
            params: self.params.clone(),
            chain_config: self.chain_config()?,
            accounts,
        })
    }
}
