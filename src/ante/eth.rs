//! The Ethereum-style admission chain.
//!
//! Stage order is a consensus contract:
//! setup → gas-limit ceiling → mempool fee → timeout height → structural
//! validation → signature verification → account verification → nonce
//! verification → gas consumption and fee deduction → sequence increment.

use crate::{
    account::AccountLedger as _,
    ante::{AnteChain, AnteContext, AnteDecorator, AnteError},
    chain_id::parse_chain_id,
    gas::{intrinsic_gas, GasError, GasMeter},
    tx::{EvmTx, Tx},
};

/// Build the Ethereum-style chain in its fixed order.
pub fn eth_ante_chain() -> AnteChain {
    AnteChain::new(vec![
        Box::new(EthSetupContext),
        Box::new(EthGasLimit),
        Box::new(EthMempoolFee),
        Box::new(EthTimeoutHeight),
        Box::new(EthValidateBasic),
        Box::new(EthSigVerification),
        Box::new(EthAccountVerification),
        Box::new(EthNonceVerification),
        Box::new(EthGasConsume),
        Box::new(EthIncrementSenderSequence),
    ])
}

fn evm_tx(tx: &Tx) -> Result<&EvmTx, AnteError> {
    match tx {
        Tx::Evm(msg) => Ok(msg),
        other => Err(AnteError::UnknownRequest { family: other.family() }),
    }
}

/// Installs the infinite gas meter so admission checks are free of gas
/// accounting. Undone by [`EthGasConsume`], which installs the real meter.
///
/// Must be the first stage: the chain driver relies on it to annotate any
/// downstream out-of-gas with the supplied limit and consumed amount.
#[derive(Debug)]
pub struct EthSetupContext;

impl AnteDecorator for EthSetupContext {
    fn name(&self) -> &'static str {
        "eth-setup-context"
    }

    fn ante(&self, ctx: &mut AnteContext<'_>, _tx: &Tx) -> Result<(), AnteError> {
        ctx.gas_meter = GasMeter::infinite();
        Ok(())
    }
}

/// Rejects gas limits above the configured per-transaction ceiling.
#[derive(Debug)]
pub struct EthGasLimit;

impl AnteDecorator for EthGasLimit {
    fn name(&self) -> &'static str {
        "eth-gas-limit"
    }

    fn ante(&self, ctx: &mut AnteContext<'_>, tx: &Tx) -> Result<(), AnteError> {
        let msg = evm_tx(tx)?;
        let max = ctx.params.max_gas_limit_per_tx;
        if msg.data.gas_limit > max {
            return Err(AnteError::GasLimitTooLarge { gas_limit: msg.data.gas_limit, max });
        }
        Ok(())
    }
}

/// Enforces the node's mempool minimum fee. Runs only during mempool
/// checks; a zero configured minimum disables it.
#[derive(Debug)]
pub struct EthMempoolFee;

impl AnteDecorator for EthMempoolFee {
    fn name(&self) -> &'static str {
        "eth-mempool-fee"
    }

    fn ante(&self, ctx: &mut AnteContext<'_>, tx: &Tx) -> Result<(), AnteError> {
        let msg = evm_tx(tx)?;
        if !ctx.mode.is_check() || ctx.min_gas_price.is_zero() {
            return Ok(());
        }

        let fee = msg.fee();
        let required = ctx.min_gas_price.saturating_mul(alloy::primitives::U256::from(msg.data.gas_limit));
        if fee < required {
            return Err(AnteError::InsufficientFee { got: fee, required });
        }
        Ok(())
    }
}

/// Rejects transactions past their timeout height.
#[derive(Debug)]
pub struct EthTimeoutHeight;

impl AnteDecorator for EthTimeoutHeight {
    fn name(&self) -> &'static str {
        "eth-timeout-height"
    }

    fn ante(&self, ctx: &mut AnteContext<'_>, tx: &Tx) -> Result<(), AnteError> {
        let timeout = tx.timeout_height();
        if timeout > 0 && ctx.block_height > timeout {
            return Err(AnteError::TimeoutHeight { timeout, height: ctx.block_height });
        }
        Ok(())
    }
}

/// Structural validation of the transaction body.
#[derive(Debug)]
pub struct EthValidateBasic;

impl AnteDecorator for EthValidateBasic {
    fn name(&self) -> &'static str {
        "eth-validate-basic"
    }

    fn ante(&self, _ctx: &mut AnteContext<'_>, tx: &Tx) -> Result<(), AnteError> {
        evm_tx(tx)?.validate_basic()?;
        Ok(())
    }
}

/// Verifies the signature against the chain id parsed from the chain's
/// string identifier, caching the recovered sender for later stages.
#[derive(Debug)]
pub struct EthSigVerification;

impl AnteDecorator for EthSigVerification {
    fn name(&self) -> &'static str {
        "eth-sig-verification"
    }

    fn ante(&self, ctx: &mut AnteContext<'_>, tx: &Tx) -> Result<(), AnteError> {
        let msg = evm_tx(tx)?;
        let chain_id = parse_chain_id(ctx.chain_id)?;
        msg.verify_sig(chain_id)?;
        Ok(())
    }
}

/// Ensures the sender has an account record (creating one if absent) and a
/// ledger balance covering the transaction's upper-bound cost. Mempool
/// checks only.
#[derive(Debug)]
pub struct EthAccountVerification;

impl AnteDecorator for EthAccountVerification {
    fn name(&self) -> &'static str {
        "eth-account-verification"
    }

    fn ante(&self, ctx: &mut AnteContext<'_>, tx: &Tx) -> Result<(), AnteError> {
        let msg = evm_tx(tx)?;
        if !ctx.mode.is_check() {
            return Ok(());
        }
        let sender = msg.from().ok_or(AnteError::MissingSender)?;

        if ctx.ledger.account(sender).is_none() {
            let account = ctx.ledger.new_account_with_address(sender);
            ctx.ledger.set_account(account);
        }

        let balance = ctx.ledger.balance(sender, &ctx.params.evm_denom);
        let cost = msg.cost();
        if balance < cost {
            return Err(AnteError::InsufficientFunds { balance, cost });
        }
        Ok(())
    }
}

/// Requires the submitted nonce to equal the sender's current sequence, in
/// every mode. At most one transaction per sender can sit in a block.
#[derive(Debug)]
pub struct EthNonceVerification;

impl AnteDecorator for EthNonceVerification {
    fn name(&self) -> &'static str {
        "eth-nonce-verification"
    }

    fn ante(&self, ctx: &mut AnteContext<'_>, tx: &Tx) -> Result<(), AnteError> {
        let msg = evm_tx(tx)?;
        let sender = msg.from().ok_or(AnteError::MissingSender)?;
        let account =
            ctx.ledger.account(sender).ok_or(AnteError::UnknownAddress { address: sender })?;

        if msg.data.nonce != account.sequence {
            return Err(AnteError::InvalidSequence {
                got: msg.data.nonce,
                expected: account.sequence,
            });
        }
        Ok(())
    }
}

/// Checks the intrinsic-gas floor (mempool checks only), deducts the full
/// fee `gas_price × gas_limit` from the sender, and installs the real gas
/// meter for the rest of the pipeline.
#[derive(Debug)]
pub struct EthGasConsume;

impl AnteDecorator for EthGasConsume {
    fn name(&self) -> &'static str {
        "eth-gas-consume"
    }

    fn ante(&self, ctx: &mut AnteContext<'_>, tx: &Tx) -> Result<(), AnteError> {
        let msg = evm_tx(tx)?;
        let sender = msg.from().ok_or(AnteError::MissingSender)?;
        if ctx.ledger.account(sender).is_none() {
            return Err(AnteError::UnknownAddress { address: sender });
        }

        let gas_limit = msg.data.gas_limit;
        let intrinsic = intrinsic_gas(&msg.data.payload, msg.data.to.is_none(), true, false)?;
        if ctx.mode.is_check() && gas_limit < intrinsic {
            return Err(AnteError::Gas(GasError::IntrinsicGasTooLow {
                limit: gas_limit,
                required: intrinsic,
            }));
        }

        if gas_limit != 0 {
            let fee = msg.fee();
            let balance = ctx.ledger.balance(sender, &ctx.params.evm_denom);
            if balance < fee {
                return Err(AnteError::InsufficientFunds { balance, cost: fee });
            }
            ctx.ledger.set_balance(sender, &ctx.params.evm_denom, balance - fee);
        }

        ctx.gas_meter = if ctx.simulate || ctx.block_height == 0 {
            GasMeter::infinite()
        } else {
            GasMeter::finite(gas_limit)
        };
        Ok(())
    }
}

/// Increments the sender's sequence. Skipped during an ordinary mempool
/// check so speculative passes cannot pollute consensus state; always
/// applied during re-check and final execution.
#[derive(Debug)]
pub struct EthIncrementSenderSequence;

impl AnteDecorator for EthIncrementSenderSequence {
    fn name(&self) -> &'static str {
        "eth-increment-sender-sequence"
    }

    fn ante(&self, ctx: &mut AnteContext<'_>, tx: &Tx) -> Result<(), AnteError> {
        let msg = evm_tx(tx)?;
        if ctx.mode.is_check() && !ctx.mode.is_recheck() {
            return Ok(());
        }

        let sender = msg.from().ok_or(AnteError::MissingSender)?;
        let mut account =
            ctx.ledger.account(sender).ok_or(AnteError::UnknownAddress { address: sender })?;
        account.sequence += 1;
        ctx.ledger.set_account(account);
        Ok(())
    }
}
