//! The execution layer's top-level facade.
//!
//! The [`Keeper`] owns the store, the ledger seam, the parameters and the
//! per-block execution context, and drives the whole per-transaction path:
//! route through the admission pipeline, execute against a fresh
//! [`CommitStateDB`], fold the result into the block context. Block
//! lifecycle hooks reset the context and persist the accumulated bloom; the
//! optional bloom indexer is fed at section boundaries.
//!
//! Everything here runs strictly single-threaded in block order — the
//! consensus path. Only the indexer does background work, and it only ever
//! sees finalized, immutable data.

use crate::{
    account::AccountLedger,
    ante::{AnteContext, AnteError, AnteHandler, Mode},
    block::BlockContext,
    bloom::BloomIndexer,
    chain_id::{parse_chain_id, ChainIdError},
    engine::{Engine, EngineConfig, TransferEngine},
    events::{
        Event, ATTR_KEY_AMOUNT, ATTR_KEY_MODULE, ATTR_KEY_RECIPIENT, ATTR_KEY_SENDER,
        ATTR_VALUE_CATEGORY, EVENT_TYPE_ETHEREUM_TX, EVENT_TYPE_MESSAGE,
    },
    gas::GasMeter,
    keys,
    params::{ChainConfig, ConfigDecodeError, Params},
    state::{CommitStateDB, StateError, StorageEntry},
    store::KvStore,
    transition::{ExecutionResult, ResultData, StateTransition, TransitionError},
    tx::{EvmTx, Tx},
};
use alloy::primitives::{Address, Bloom, B256, U256};

/// Errors surfaced by the keeper's transaction and query paths.
#[derive(Debug, thiserror::Error)]
pub enum KeeperError {
    /// The transaction was rejected by the admission pipeline.
    #[error(transparent)]
    Ante(#[from] AnteError),

    /// Execution infrastructure failed.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// State access failed.
    #[error(transparent)]
    State(#[from] StateError),

    /// The chain identifier could not be parsed.
    #[error(transparent)]
    ChainId(#[from] ChainIdError),

    /// No chain configuration is stored. The node is misconfigured.
    #[error("chain configuration not found")]
    ChainConfigNotFound,

    /// The stored chain configuration is corrupt.
    #[error("invalid chain configuration: {0}")]
    InvalidChainConfig(#[from] ConfigDecodeError),

    /// The sender cache is empty; the ante pipeline did not run.
    #[error("sender address not cached; run the ante pipeline first")]
    MissingSender,

    /// A genesis account has no ledger record.
    #[error("account {address} not found")]
    AccountNotFound {
        /// The missing account.
        address: Address,
    },

    /// Genesis parameters failed validation.
    #[error(transparent)]
    InvalidParams(#[from] crate::params::ParamsError),
}

/// The response of one delivered transaction.
#[derive(Debug, Clone)]
pub struct TxResponse {
    /// The execution result record; `None` for native transactions, whose
    /// message execution belongs to other modules.
    pub result: Option<ResultData>,
    /// Gas consumed.
    pub gas_used: u64,
    /// A VM-level failure description; the transaction still committed.
    pub vm_error: Option<String>,
    /// Emitted domain events.
    pub events: Vec<Event>,
}

/// The execution layer.
#[derive(Debug)]
pub struct Keeper {
    pub(crate) store: Box<dyn KvStore>,
    pub(crate) ledger: Box<dyn AccountLedger>,
    pub(crate) params: Params,
    pub(crate) chain_id: String,
    pub(crate) min_gas_price: U256,
    pub(crate) ante: AnteHandler,
    pub(crate) engine: Box<dyn Engine>,
    pub(crate) block: BlockContext,
    pub(crate) block_height: u64,
    pub(crate) indexer: Option<BloomIndexer>,
}

impl Keeper {
    /// Build a keeper over the given store and ledger, with the built-in
    /// transfer engine and default admission pipeline.
    pub fn new(
        store: Box<dyn KvStore>,
        ledger: Box<dyn AccountLedger>,
        params: Params,
        chain_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            ledger,
            params,
            chain_id: chain_id.into(),
            min_gas_price: U256::ZERO,
            ante: AnteHandler::new(),
            engine: Box::new(TransferEngine),
            block: BlockContext::default(),
            block_height: 0,
            indexer: None,
        }
    }

    /// Replace the execution engine.
    pub fn with_engine(mut self, engine: Box<dyn Engine>) -> Self {
        self.engine = engine;
        self
    }

    /// Set the node's mempool minimum gas price.
    pub fn with_min_gas_price(mut self, min_gas_price: U256) -> Self {
        self.min_gas_price = min_gas_price;
        self
    }

    /// Attach a bloom indexer.
    pub fn with_indexer(mut self, indexer: BloomIndexer) -> Self {
        self.indexer = Some(indexer);
        self
    }

    /// The configured parameters.
    pub const fn params(&self) -> &Params {
        &self.params
    }

    /// The current block height.
    pub const fn block_height(&self) -> u64 {
        self.block_height
    }

    /// The current block execution context.
    pub const fn block_context(&self) -> &BlockContext {
        &self.block
    }

    /// The attached indexer, if any.
    pub const fn indexer(&self) -> Option<&BloomIndexer> {
        self.indexer.as_ref()
    }

    // ------------------------------------------------------------------
    // Chain configuration
    // ------------------------------------------------------------------

    /// Persist the chain configuration.
    pub fn set_chain_config(&mut self, config: &ChainConfig) {
        self.store.set(keys::KEY_PREFIX_CHAIN_CONFIG.to_vec(), config.encode());
    }

    /// Load the chain configuration. Absence means the node is
    /// misconfigured.
    pub fn chain_config(&self) -> Result<ChainConfig, KeeperError> {
        let raw = self
            .store
            .get(&keys::KEY_PREFIX_CHAIN_CONFIG)
            .ok_or(KeeperError::ChainConfigNotFound)?;
        Ok(ChainConfig::decode(&raw)?)
    }

    // ------------------------------------------------------------------
    // Block lifecycle
    // ------------------------------------------------------------------

    /// Start a new block: record the hash↔height mappings of the previous
    /// block and reset the block execution context.
    pub fn begin_block(&mut self, height: u64, current_hash: B256, last_hash: B256) {
        if height < 1 || last_hash.is_zero() {
            return;
        }

        let previous = height - 1;
        self.set_height_hash(previous, last_hash);
        self.set_block_hash_mapping(last_hash, previous);

        self.block.reset(current_hash);
        self.block_height = height;
        tracing::debug!(height, %current_hash, "began block");
    }

    /// End the block: persist the accumulated bloom and, when a section
    /// boundary was crossed, hand the finished section to the indexer.
    pub fn end_block(&mut self, height: u64) {
        let bloom = self.block.bloom;
        self.store.set(keys::bloom_key(height), bloom.to_vec());
        tracing::debug!(height, "ended block");

        let Some(indexer) = &self.indexer else { return };
        let size = indexer.section_size();
        let section = indexer.valid_sections();
        if height < (section + 1) * size || indexer.is_processing() {
            return;
        }

        // all blocks of `section` are final; gather its blooms and head
        let first = section * size + 1;
        let last = (section + 1) * size;
        let Some(head) = self.height_hash(last) else {
            tracing::warn!(section, last, "section head hash missing, skipping indexing");
            return;
        };
        let blooms: Vec<Bloom> =
            (first..=last).map(|h| self.block_bloom(h).unwrap_or_default()).collect();
        indexer.process_section(section, head, blooms);
    }

    // ------------------------------------------------------------------
    // Transaction paths
    // ------------------------------------------------------------------

    /// Speculative first-pass mempool admission.
    pub fn check_tx(&mut self, tx: &Tx) -> Result<(), KeeperError> {
        self.run_ante(tx, Mode::Check, false)
    }

    /// Mempool re-check admission after a committed block.
    pub fn recheck_tx(&mut self, tx: &Tx) -> Result<(), KeeperError> {
        self.run_ante(tx, Mode::ReCheck, false)
    }

    /// Final block execution of one transaction.
    pub fn deliver_tx(&mut self, tx: &Tx) -> Result<TxResponse, KeeperError> {
        self.run_ante(tx, Mode::Deliver, false)?;

        match tx {
            Tx::Evm(msg) => self.apply_evm_msg(msg, false),
            Tx::Native(msg) => {
                // message execution belongs to the owning modules; admission
                // is complete
                let events = vec![Event::new(EVENT_TYPE_MESSAGE)
                    .attr(ATTR_KEY_MODULE, ATTR_VALUE_CATEGORY)
                    .attr(ATTR_KEY_SENDER, msg.signers().first().copied().unwrap_or_default())];
                Ok(TxResponse { result: None, gas_used: 0, vm_error: None, events })
            }
        }
    }

    /// Query-time simulation: full admission and execution, no commit.
    pub fn simulate_tx(&mut self, tx: &Tx) -> Result<TxResponse, KeeperError> {
        self.run_ante(tx, Mode::Check, true)?;
        match tx {
            Tx::Evm(msg) => self.apply_evm_msg(msg, true),
            Tx::Native(_) => Ok(TxResponse { result: None, gas_used: 0, vm_error: None, events: Vec::new() }),
        }
    }

    fn run_ante(&mut self, tx: &Tx, mode: Mode, simulate: bool) -> Result<(), KeeperError> {
        let mut ctx = AnteContext {
            mode,
            simulate,
            chain_id: &self.chain_id,
            block_height: self.block_height,
            min_gas_price: self.min_gas_price,
            gas_meter: GasMeter::infinite(),
            ledger: &mut *self.ledger,
            params: &self.params,
        };
        self.ante.run(&mut ctx, tx)?;
        Ok(())
    }

    fn apply_evm_msg(&mut self, msg: &EvmTx, simulate: bool) -> Result<TxResponse, KeeperError> {
        let chain_id = parse_chain_id(&self.chain_id)?;
        let sender = msg.from().ok_or(KeeperError::MissingSender)?;
        let config = self.chain_config()?;
        let tx_hash = msg.hash();

        let engine_config = EngineConfig {
            chain_id,
            enable_create: self.params.enable_create,
            enable_call: self.params.enable_call,
            chain_config: config,
            extra_eips: self.params.extra_eips.clone(),
        };

        let mut csdb = CommitStateDB::new(&mut *self.store, &mut *self.ledger, self.params.clone())
            .with_block_height(self.block_height);
        if !simulate {
            // a simulated run must not touch the block counters: it only
            // happens on the queried node and would fork consensus state
            csdb.prepare(tx_hash, self.block.block_hash, self.block.tx_count);
            csdb.set_log_size(self.block.log_size);
            self.block.tx_count += 1;
        }

        let transition = StateTransition {
            sender,
            recipient: msg.data.to,
            nonce: msg.data.nonce,
            gas_price: msg.data.gas_price,
            gas_limit: msg.data.gas_limit,
            value: msg.data.value,
            payload: msg.data.payload.clone(),
            chain_id,
            tx_hash,
            simulate,
            csdb,
        };
        let result: ExecutionResult = transition.transition(&*self.engine, &engine_config)?;

        if !simulate {
            self.block.bloom.accrue_bloom(&result.response.bloom);
            self.block.log_size = result.log_size;
        }

        let mut events = vec![
            Event::new(EVENT_TYPE_ETHEREUM_TX).attr(ATTR_KEY_AMOUNT, msg.data.value),
            Event::new(EVENT_TYPE_MESSAGE)
                .attr(ATTR_KEY_MODULE, ATTR_VALUE_CATEGORY)
                .attr(ATTR_KEY_SENDER, sender),
        ];
        if let Some(recipient) = msg.data.to {
            events.push(Event::new(EVENT_TYPE_ETHEREUM_TX).attr(ATTR_KEY_RECIPIENT, recipient));
        }

        Ok(TxResponse {
            result: Some(result.response),
            gas_used: result.gas_used,
            vm_error: result.vm_error,
            events,
        })
    }

    // ------------------------------------------------------------------
    // Hash ↔ height mappings
    // ------------------------------------------------------------------

    /// Record the block hash of `height`.
    pub fn set_height_hash(&mut self, height: u64, hash: B256) {
        self.store.set(keys::height_hash_key(height), hash.to_vec());
    }

    /// The block hash of `height`, if recorded.
    pub fn height_hash(&self, height: u64) -> Option<B256> {
        self.store.get(&keys::height_hash_key(height)).map(|raw| B256::from_slice(&raw))
    }

    /// Record the height of a block hash.
    pub fn set_block_hash_mapping(&mut self, hash: B256, height: u64) {
        self.store.set(keys::block_hash_key(hash), height.to_be_bytes().to_vec());
    }

    /// The height of a block hash, if recorded.
    pub fn block_height_by_hash(&self, hash: B256) -> Option<u64> {
        self.store
            .get(&keys::block_hash_key(hash))
            .and_then(|raw| raw.try_into().ok().map(u64::from_be_bytes))
    }

    /// The persisted bloom of the block at `height`, if any.
    pub fn block_bloom(&self, height: u64) -> Option<Bloom> {
        self.store.get(&keys::bloom_key(height)).map(|raw| Bloom::from_slice(&raw))
    }

    // ------------------------------------------------------------------
    // Query accessors
    // ------------------------------------------------------------------

    /// The balance of `address`.
    pub fn query_balance(&mut self, address: Address) -> U256 {
        self.query_db().balance(address)
    }

    /// The nonce of `address`.
    pub fn query_nonce(&mut self, address: Address) -> u64 {
        self.query_db().nonce(address)
    }

    /// The code of `address`.
    pub fn query_code(&mut self, address: Address) -> Vec<u8> {
        self.query_db().code(address)
    }

    /// The storage value of `(address, key)`.
    pub fn query_storage(&mut self, address: Address, key: B256) -> B256 {
        self.query_db().state(address, key)
    }

    /// All storage entries of `address`.
    pub fn query_account_storage(&mut self, address: Address) -> Vec<StorageEntry> {
        let mut storage = Vec::new();
        self.query_db().for_each_storage(address, &mut |key, value| {
            storage.push(StorageEntry { key, value });
            false
        });
        storage
    }

    /// The stored logs of a transaction.
    pub fn query_logs(&mut self, tx_hash: B256) -> Result<Vec<crate::logs::TxLog>, KeeperError> {
        Ok(self.query_db().logs(tx_hash)?)
    }

    fn query_db(&mut self) -> CommitStateDB<'_> {
        CommitStateDB::new(&mut *self.store, &mut *self.ledger, self.params.clone())
            .with_block_height(self.block_height)
    }
}
