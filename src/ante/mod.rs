//! The transaction-admission pipeline.
//!
//! Every transaction passes an ordered chain of independent stages before
//! execution. Each stage implements [`AnteDecorator`]; the chain is an
//! explicit list iterated by a driver loop, so the fixed ordering — a
//! correctness-critical contract — is visible in one place and every stage
//! is testable in isolation. The first stage to fail stops the chain: no
//! later stage runs and no state it would have mutated is touched.
//!
//! Two chains exist, one per transaction family, selected once at entry by
//! the [`Tx`] union. A transaction reaching the wrong chain is rejected by
//! the first stage that inspects its type.

pub mod eth;
pub use eth::eth_ante_chain;

pub mod native;
pub use native::native_ante_chain;

use crate::{
    account::AccountLedger,
    chain_id::ChainIdError,
    gas::{GasError, GasMeter},
    params::Params,
    tx::{SignatureError, Tx, TxValidationError},
};
use alloy::primitives::{Address, U256};

/// The execution phase a transaction is being admitted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Speculative first-pass mempool check.
    Check,
    /// Mempool re-check after a block was committed.
    ReCheck,
    /// Final block execution.
    Deliver,
}

impl Mode {
    /// True for both mempool passes.
    pub const fn is_check(self) -> bool {
        matches!(self, Self::Check | Self::ReCheck)
    }

    /// True only for the re-check pass.
    pub const fn is_recheck(self) -> bool {
        matches!(self, Self::ReCheck)
    }

    /// True only for final block execution.
    pub const fn is_deliver(self) -> bool {
        matches!(self, Self::Deliver)
    }
}

/// Admission errors. All of them are fatal to the transaction and leave no
/// state mutated; none of them crash the node.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum AnteError {
    /// A transaction of the wrong family reached a type-specific stage.
    #[error("invalid transaction type {family:?} for this pipeline")]
    UnknownRequest {
        /// The family that was routed here.
        family: &'static str,
    },

    /// Structural validation failed.
    #[error(transparent)]
    Validation(#[from] TxValidationError),

    /// Unsupported extension options were present.
    #[error("unsupported extension options present")]
    ExtensionOptions,

    /// A fee granter was set; fee granting is unsupported.
    #[error("fee grants are not supported")]
    FeeGranter,

    /// The memo exceeds the configured maximum length.
    #[error("memo length {length} exceeds maximum {max}")]
    MemoTooLarge {
        /// Memo length in characters.
        length: u64,
        /// Configured maximum.
        max: u64,
    },

    /// The transaction timed out.
    #[error("tx timeout height {timeout} exceeded: current height {height}")]
    TimeoutHeight {
        /// The transaction's timeout height.
        timeout: u64,
        /// The current block height.
        height: u64,
    },

    /// The offered fee is below the node's mempool minimum.
    #[error("insufficient fee: got {got}, required {required}")]
    InsufficientFee {
        /// The offered fee.
        got: U256,
        /// The required minimum.
        required: U256,
    },

    /// The sender cannot cover the transaction's cost.
    #[error("insufficient funds: balance {balance} < cost {cost}")]
    InsufficientFunds {
        /// The sender's ledger balance.
        balance: U256,
        /// The transaction's upper-bound cost.
        cost: U256,
    },

    /// The submitted nonce does not equal the account sequence.
    #[error("invalid nonce: got {got}, expected {expected}")]
    InvalidSequence {
        /// The submitted nonce.
        got: u64,
        /// The account's current sequence.
        expected: u64,
    },

    /// Too many signatures.
    #[error("too many signatures: {got} > limit {limit}")]
    TooManySignatures {
        /// Number of signatures supplied.
        got: u64,
        /// Configured maximum.
        limit: u64,
    },

    /// A signer has no account record.
    #[error("unknown signer address {address}")]
    UnknownAddress {
        /// The unknown signer.
        address: Address,
    },

    /// No public key is available for a signer.
    #[error("no public key attached for signer {address}")]
    MissingPubKey {
        /// The keyless signer.
        address: Address,
    },

    /// The sender cache is empty; signature verification has not run.
    #[error("sender address not cached; signature verification must run first")]
    MissingSender,

    /// The gas limit exceeds the configured per-transaction ceiling.
    #[error("gas limit {gas_limit} exceeds per-transaction maximum {max}")]
    GasLimitTooLarge {
        /// The supplied gas limit.
        gas_limit: u64,
        /// The configured ceiling.
        max: u64,
    },

    /// Signature verification failed.
    #[error("signature verification failed: {0}")]
    Signature(#[from] SignatureError),

    /// Gas accounting failed.
    #[error(transparent)]
    Gas(#[from] GasError),

    /// The chain identifier could not be parsed.
    #[error(transparent)]
    ChainId(#[from] ChainIdError),
}

/// Mutable context threaded through an ante chain.
#[derive(Debug)]
pub struct AnteContext<'a> {
    /// The phase being admitted for.
    pub mode: Mode,
    /// True when the run is a query-time simulation.
    pub simulate: bool,
    /// The chain's string identifier.
    pub chain_id: &'a str,
    /// The current block height.
    pub block_height: u64,
    /// The node's mempool minimum gas price; zero disables the minimum-fee
    /// check.
    pub min_gas_price: U256,
    /// The gas meter stages charge against. Stages may replace it.
    pub gas_meter: GasMeter,
    /// The ledger module.
    pub ledger: &'a mut dyn AccountLedger,
    /// Chain parameters.
    pub params: &'a Params,
}

/// One admission stage. Stateless except for injected collaborators; reads
/// and mutates only through the [`AnteContext`].
pub trait AnteDecorator: std::fmt::Debug {
    /// The stage's name, for traces and errors.
    fn name(&self) -> &'static str;

    /// Run the stage. An error aborts the chain.
    fn ante(&self, ctx: &mut AnteContext<'_>, tx: &Tx) -> Result<(), AnteError>;
}

/// An ordered chain of admission stages.
#[derive(Debug)]
pub struct AnteChain {
    decorators: Vec<Box<dyn AnteDecorator>>,
}

impl AnteChain {
    /// Build a chain from stages in execution order.
    pub fn new(decorators: Vec<Box<dyn AnteDecorator>>) -> Self {
        Self { decorators }
    }

    /// Run the chain, fail-fast.
    pub fn run(&self, ctx: &mut AnteContext<'_>, tx: &Tx) -> Result<(), AnteError> {
        for decorator in &self.decorators {
            if let Err(err) = decorator.ante(ctx, tx) {
                tracing::debug!(stage = decorator.name(), %err, "ante stage rejected tx");
                return Err(err);
            }
        }
        Ok(())
    }
}

/// The two-family admission pipeline.
#[derive(Debug)]
pub struct AnteHandler {
    native: AnteChain,
    eth: AnteChain,
}

impl Default for AnteHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl AnteHandler {
    /// Build the pipeline with the default chains.
    pub fn new() -> Self {
        Self { native: native_ante_chain(), eth: eth_ante_chain() }
    }

    /// Route the transaction to its family's chain and run it.
    ///
    /// For the Ethereum-style chain, an out-of-gas raised by any stage is
    /// annotated with the transaction's supplied limit and the gas consumed
    /// so far before it reaches the caller.
    pub fn run(&self, ctx: &mut AnteContext<'_>, tx: &Tx) -> Result<(), AnteError> {
        match tx {
            Tx::Native(_) => self.native.run(ctx, tx),
            Tx::Evm(msg) => self.eth.run(ctx, tx).map_err(|err| match err {
                AnteError::Gas(GasError::OutOfGas { descriptor, .. }) => {
                    AnteError::Gas(GasError::OutOfGas {
                        descriptor,
                        limit: msg.data.gas_limit,
                        consumed: ctx.gas_meter.consumed(),
                    })
                }
                other => other,
            }),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Debug)]
    struct Fail;
    impl AnteDecorator for Fail {
        fn name(&self) -> &'static str {
            "fail"
        }
        fn ante(&self, _ctx: &mut AnteContext<'_>, _tx: &Tx) -> Result<(), AnteError> {
            Err(AnteError::ExtensionOptions)
        }
    }

    #[derive(Debug)]
    struct Count(std::cell::Cell<u32>);
    impl AnteDecorator for Count {
        fn name(&self) -> &'static str {
            "count"
        }
        fn ante(&self, _ctx: &mut AnteContext<'_>, _tx: &Tx) -> Result<(), AnteError> {
            self.0.set(self.0.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn chain_is_fail_fast() {
        let mut ledger = crate::account::MemLedger::new();
        let params = Params::default();
        let mut ctx = AnteContext {
            mode: Mode::Check,
            simulate: false,
            chain_id: "bevm-1",
            block_height: 1,
            min_gas_price: U256::ZERO,
            gas_meter: GasMeter::infinite(),
            ledger: &mut ledger,
            params: &params,
        };
        let tx = Tx::Native(crate::tx::NativeTx {
            msgs: Vec::new(),
            memo: String::new(),
            fee: crate::tx::Fee { amount: U256::ZERO, gas_limit: 0, granter: None },
            signatures: Vec::new(),
            timeout_height: 0,
            extension_options: Vec::new(),
        });

        let chain = AnteChain::new(vec![
            Box::new(Count(Default::default())),
            Box::new(Fail),
            Box::new(Count(Default::default())),
        ]);
        assert_eq!(chain.run(&mut ctx, &tx).unwrap_err(), AnteError::ExtensionOptions);
    }
}
