//! Chain-configurable parameters.
//!
//! [`Params`] holds the governance-adjustable knobs the admission pipeline
//! and execution engine read. [`ChainConfig`] is the genesis-fixed feature
//! schedule, persisted in the store so every node executes with the same
//! rule set.

use serde::{Deserialize, Serialize};

/// Default per-transaction gas ceiling.
pub const DEFAULT_MAX_GAS_LIMIT_PER_TX: u64 = 30_000_000;
/// Default maximum memo length in characters.
pub const DEFAULT_MAX_MEMO_CHARACTERS: u64 = 256;
/// Default maximum number of signatures per transaction.
pub const DEFAULT_TX_SIG_LIMIT: u64 = 7;
/// Default gas charged per byte of transaction size.
pub const DEFAULT_TX_SIZE_COST_PER_BYTE: u64 = 10;

/// Extra EIPs the engine knows how to activate.
const ACTIVATEABLE_EIPS: [u64; 4] = [1344, 1884, 2200, 2315];

/// Errors validating parameters.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ParamsError {
    /// The EVM denomination was blank.
    #[error("evm denomination cannot be blank")]
    BlankDenom,

    /// An extra EIP is not activateable.
    #[error("EIP {eip} is not activateable")]
    InvalidEip {
        /// The offending EIP number.
        eip: u64,
    },
}

/// Governance-adjustable execution parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    /// The native denomination mirrored as the EVM balance.
    pub evm_denom: String,
    /// Whether contract creation is enabled.
    pub enable_create: bool,
    /// Whether contract calls are enabled.
    pub enable_call: bool,
    /// Extra EIPs activated on top of the chain configuration.
    pub extra_eips: Vec<u64>,
    /// Hard per-transaction gas ceiling.
    pub max_gas_limit_per_tx: u64,
    /// Maximum memo length for native transactions.
    pub max_memo_characters: u64,
    /// Maximum number of signatures per native transaction.
    pub tx_sig_limit: u64,
    /// Gas charged per byte of native transaction size.
    pub tx_size_cost_per_byte: u64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            evm_denom: "stake".to_owned(),
            enable_create: true,
            enable_call: true,
            extra_eips: Vec::new(),
            max_gas_limit_per_tx: DEFAULT_MAX_GAS_LIMIT_PER_TX,
            max_memo_characters: DEFAULT_MAX_MEMO_CHARACTERS,
            tx_sig_limit: DEFAULT_TX_SIG_LIMIT,
            tx_size_cost_per_byte: DEFAULT_TX_SIZE_COST_PER_BYTE,
        }
    }
}

impl Params {
    /// Validate the parameter set.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.evm_denom.trim().is_empty() {
            return Err(ParamsError::BlankDenom);
        }
        for &eip in &self.extra_eips {
            if !ACTIVATEABLE_EIPS.contains(&eip) {
                return Err(ParamsError::InvalidEip { eip });
            }
        }
        Ok(())
    }
}

/// Errors decoding a stored chain configuration.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigDecodeError {
    /// The stored record was the wrong length.
    #[error("chain config record has length {len}, expected {expected}")]
    Length {
        /// Stored length.
        len: usize,
        /// Expected length.
        expected: usize,
    },

    /// The stored record carried an unknown version tag.
    #[error("unknown chain config version {version}")]
    Version {
        /// The stored version tag.
        version: u8,
    },
}

const CHAIN_CONFIG_VERSION: u8 = 1;
const CHAIN_CONFIG_LEN: usize = 3;

/// The genesis-fixed feature schedule.
///
/// Feature flags rather than activation heights: a replicated application
/// starts from genesis with its rule set already decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Homestead rules (raised contract-creation intrinsic gas).
    pub homestead: bool,
    /// Istanbul rules (reduced non-zero calldata gas).
    pub istanbul: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self { homestead: true, istanbul: false }
    }
}

impl ChainConfig {
    /// Encode for storage.
    pub fn encode(&self) -> Vec<u8> {
        vec![CHAIN_CONFIG_VERSION, self.homestead as u8, self.istanbul as u8]
    }

    /// Decode from storage.
    pub fn decode(bytes: &[u8]) -> Result<Self, ConfigDecodeError> {
        if bytes.len() != CHAIN_CONFIG_LEN {
            return Err(ConfigDecodeError::Length { len: bytes.len(), expected: CHAIN_CONFIG_LEN });
        }
        if bytes[0] != CHAIN_CONFIG_VERSION {
            return Err(ConfigDecodeError::Version { version: bytes[0] });
        }
        Ok(Self { homestead: bytes[1] != 0, istanbul: bytes[2] != 0 })
    }
}
