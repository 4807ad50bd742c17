//! The native-ledger admission chain.
//!
//! Stage order is a consensus contract:
//! setup → account setup → reject extension options → mempool fee →
//! structural validation → timeout height → memo validation → tx-size gas →
//! reject fee granter → public-key attachment → signature count → fee
//! deduction → signature-verification gas → signature verification →
//! sequence increment.

use crate::{
    account::AccountLedger as _,
    ante::{AnteChain, AnteContext, AnteDecorator, AnteError},
    gas::{GasMeter, SECP256K1_VERIFY_COST},
    tx::{NativeTx, SignatureError, Tx},
};
use k256::ecdsa::signature::hazmat::PrehashVerifier;

/// Build the native-ledger chain in its fixed order.
pub fn native_ante_chain() -> AnteChain {
    AnteChain::new(vec![
        Box::new(SetupContext),
        Box::new(AccountSetup),
        Box::new(RejectExtensionOptions),
        Box::new(MempoolFee),
        Box::new(ValidateBasic),
        Box::new(TimeoutHeight),
        Box::new(ValidateMemo),
        Box::new(ConsumeGasForTxSize),
        Box::new(RejectFeeGranter),
        Box::new(SetPubKey),
        Box::new(ValidateSigCount),
        Box::new(DeductFee),
        Box::new(SigGasConsume),
        Box::new(SigVerification),
        Box::new(IncrementSequence),
    ])
}

fn native_tx(tx: &Tx) -> Result<&NativeTx, AnteError> {
    match tx {
        Tx::Native(msg) => Ok(msg),
        other => Err(AnteError::UnknownRequest { family: other.family() }),
    }
}

/// Installs the gas meter the rest of the chain charges against: the
/// transaction's own limit, or an infinite meter for simulations and
/// genesis.
#[derive(Debug)]
pub struct SetupContext;

impl AnteDecorator for SetupContext {
    fn name(&self) -> &'static str {
        "setup-context"
    }

    fn ante(&self, ctx: &mut AnteContext<'_>, tx: &Tx) -> Result<(), AnteError> {
        ctx.gas_meter = if ctx.simulate || ctx.block_height == 0 {
            GasMeter::infinite()
        } else {
            GasMeter::finite(tx.gas_limit())
        };
        Ok(())
    }
}

/// Creates ledger accounts for message signers that have none yet.
#[derive(Debug)]
pub struct AccountSetup;

impl AnteDecorator for AccountSetup {
    fn name(&self) -> &'static str {
        "account-setup"
    }

    fn ante(&self, ctx: &mut AnteContext<'_>, tx: &Tx) -> Result<(), AnteError> {
        let msg = native_tx(tx)?;
        if msg.msgs.is_empty() {
            return Err(AnteError::Validation(crate::tx::TxValidationError::NoMessages));
        }
        for signer in msg.signers() {
            if ctx.ledger.account(signer).is_none() {
                let account = ctx.ledger.new_account_with_address(signer);
                ctx.ledger.set_account(account);
            }
        }
        Ok(())
    }
}

/// Rejects transactions carrying extension options.
#[derive(Debug)]
pub struct RejectExtensionOptions;

impl AnteDecorator for RejectExtensionOptions {
    fn name(&self) -> &'static str {
        "reject-extension-options"
    }

    fn ante(&self, _ctx: &mut AnteContext<'_>, tx: &Tx) -> Result<(), AnteError> {
        if !native_tx(tx)?.extension_options.is_empty() {
            return Err(AnteError::ExtensionOptions);
        }
        Ok(())
    }
}

/// Enforces the node's mempool minimum fee during mempool checks.
#[derive(Debug)]
pub struct MempoolFee;

impl AnteDecorator for MempoolFee {
    fn name(&self) -> &'static str {
        "mempool-fee"
    }

    fn ante(&self, ctx: &mut AnteContext<'_>, tx: &Tx) -> Result<(), AnteError> {
        let msg = native_tx(tx)?;
        if !ctx.mode.is_check() || ctx.min_gas_price.is_zero() {
            return Ok(());
        }
        let required =
            ctx.min_gas_price.saturating_mul(alloy::primitives::U256::from(msg.fee.gas_limit));
        if msg.fee.amount < required {
            return Err(AnteError::InsufficientFee { got: msg.fee.amount, required });
        }
        Ok(())
    }
}

/// Structural validation of the transaction body.
#[derive(Debug)]
pub struct ValidateBasic;

impl AnteDecorator for ValidateBasic {
    fn name(&self) -> &'static str {
        "validate-basic"
    }

    fn ante(&self, _ctx: &mut AnteContext<'_>, tx: &Tx) -> Result<(), AnteError> {
        native_tx(tx)?.validate_basic()?;
        Ok(())
    }
}

/// Rejects transactions past their timeout height.
#[derive(Debug)]
pub struct TimeoutHeight;

impl AnteDecorator for TimeoutHeight {
    fn name(&self) -> &'static str {
        "timeout-height"
    }

    fn ante(&self, ctx: &mut AnteContext<'_>, tx: &Tx) -> Result<(), AnteError> {
        let timeout = tx.timeout_height();
        if timeout > 0 && ctx.block_height > timeout {
            return Err(AnteError::TimeoutHeight { timeout, height: ctx.block_height });
        }
        Ok(())
    }
}

/// Bounds the memo length.
#[derive(Debug)]
pub struct ValidateMemo;

impl AnteDecorator for ValidateMemo {
    fn name(&self) -> &'static str {
        "validate-memo"
    }

    fn ante(&self, ctx: &mut AnteContext<'_>, tx: &Tx) -> Result<(), AnteError> {
        let msg = native_tx(tx)?;
        let length = msg.memo.chars().count() as u64;
        let max = ctx.params.max_memo_characters;
        if length > max {
            return Err(AnteError::MemoTooLarge { length, max });
        }
        Ok(())
    }
}

/// Charges gas proportional to the transaction's wire size.
#[derive(Debug)]
pub struct ConsumeGasForTxSize;

impl AnteDecorator for ConsumeGasForTxSize {
    fn name(&self) -> &'static str {
        "consume-gas-for-tx-size"
    }

    fn ante(&self, ctx: &mut AnteContext<'_>, tx: &Tx) -> Result<(), AnteError> {
        let msg = native_tx(tx)?;
        let cost = ctx.params.tx_size_cost_per_byte.saturating_mul(msg.size_bytes());
        ctx.gas_meter.consume(cost, "txSize")?;
        Ok(())
    }
}

/// Rejects transactions naming a fee granter; fee grants are unsupported.
#[derive(Debug)]
pub struct RejectFeeGranter;

impl AnteDecorator for RejectFeeGranter {
    fn name(&self) -> &'static str {
        "reject-fee-granter"
    }

    fn ante(&self, _ctx: &mut AnteContext<'_>, tx: &Tx) -> Result<(), AnteError> {
        if native_tx(tx)?.fee.granter.is_some() {
            return Err(AnteError::FeeGranter);
        }
        Ok(())
    }
}

/// Attaches supplied public keys to signer accounts, after checking each
/// key hashes to its signer's address. Must run before the signature
/// verification stages.
#[derive(Debug)]
pub struct SetPubKey;

impl AnteDecorator for SetPubKey {
    fn name(&self) -> &'static str {
        "set-pub-key"
    }

    fn ante(&self, ctx: &mut AnteContext<'_>, tx: &Tx) -> Result<(), AnteError> {
        let msg = native_tx(tx)?;
        for (signer, sig) in msg.signers().into_iter().zip(&msg.signatures) {
            let Some(pub_key) = sig.pub_key else { continue };
            let derived = pub_key
                .address()
                .map_err(|_| SignatureError::PubKeyMismatch { expected: signer })?;
            if derived != signer {
                return Err(SignatureError::PubKeyMismatch { expected: signer }.into());
            }

            let mut account =
                ctx.ledger.account(signer).ok_or(AnteError::UnknownAddress { address: signer })?;
            if account.pub_key.is_none() {
                account.pub_key = Some(pub_key);
                ctx.ledger.set_account(account);
            }
        }
        Ok(())
    }
}

/// Bounds the number of signatures.
#[derive(Debug)]
pub struct ValidateSigCount;

impl AnteDecorator for ValidateSigCount {
    fn name(&self) -> &'static str {
        "validate-sig-count"
    }

    fn ante(&self, ctx: &mut AnteContext<'_>, tx: &Tx) -> Result<(), AnteError> {
        let msg = native_tx(tx)?;
        let got = msg.signatures.len() as u64;
        let limit = ctx.params.tx_sig_limit;
        if got > limit {
            return Err(AnteError::TooManySignatures { got, limit });
        }
        Ok(())
    }
}

/// Deducts the offered fee from the fee payer — the first signer.
#[derive(Debug)]
pub struct DeductFee;

impl AnteDecorator for DeductFee {
    fn name(&self) -> &'static str {
        "deduct-fee"
    }

    fn ante(&self, ctx: &mut AnteContext<'_>, tx: &Tx) -> Result<(), AnteError> {
        let msg = native_tx(tx)?;
        if msg.fee.amount.is_zero() {
            return Ok(());
        }
        let payer = *msg.signers().first().ok_or(AnteError::Validation(
            crate::tx::TxValidationError::NoMessages,
        ))?;
        if ctx.ledger.account(payer).is_none() {
            return Err(AnteError::UnknownAddress { address: payer });
        }

        let balance = ctx.ledger.balance(payer, &ctx.params.evm_denom);
        if balance < msg.fee.amount {
            return Err(AnteError::InsufficientFunds { balance, cost: msg.fee.amount });
        }
        ctx.ledger.set_balance(payer, &ctx.params.evm_denom, balance - msg.fee.amount);
        Ok(())
    }
}

/// Charges gas for each signature verification.
#[derive(Debug)]
pub struct SigGasConsume;

impl AnteDecorator for SigGasConsume {
    fn name(&self) -> &'static str {
        "sig-gas-consume"
    }

    fn ante(&self, ctx: &mut AnteContext<'_>, tx: &Tx) -> Result<(), AnteError> {
        let msg = native_tx(tx)?;
        for _ in &msg.signatures {
            ctx.gas_meter.consume(SECP256K1_VERIFY_COST, "ante verify: secp256k1")?;
        }
        Ok(())
    }
}

/// Verifies every signature against the signer's attached public key and
/// checks the signed sequence equals the account's.
#[derive(Debug)]
pub struct SigVerification;

impl AnteDecorator for SigVerification {
    fn name(&self) -> &'static str {
        "sig-verification"
    }

    fn ante(&self, ctx: &mut AnteContext<'_>, tx: &Tx) -> Result<(), AnteError> {
        let msg = native_tx(tx)?;
        for (signer, sig) in msg.signers().into_iter().zip(&msg.signatures) {
            let account =
                ctx.ledger.account(signer).ok_or(AnteError::UnknownAddress { address: signer })?;

            if sig.sequence != account.sequence {
                return Err(AnteError::InvalidSequence {
                    got: sig.sequence,
                    expected: account.sequence,
                });
            }

            let pub_key = account
                .pub_key
                .or(sig.pub_key)
                .ok_or(AnteError::MissingPubKey { address: signer })?;

            let verifying_key = k256::ecdsa::VerifyingKey::from_sec1_bytes(&pub_key.0)
                .map_err(|_| SignatureError::Mismatch { signer })?;
            let signature = k256::ecdsa::Signature::from_slice(&sig.signature)
                .map_err(|_| SignatureError::Mismatch { signer })?;
            let sign_bytes = msg.sign_bytes(ctx.chain_id, account.sequence);
            verifying_key
                .verify_prehash(sign_bytes.as_slice(), &signature)
                .map_err(|_| SignatureError::Mismatch { signer })?;
        }
        Ok(())
    }
}

/// Increments every signer's sequence.
#[derive(Debug)]
pub struct IncrementSequence;

impl AnteDecorator for IncrementSequence {
    fn name(&self) -> &'static str {
        "increment-sequence"
    }

    fn ante(&self, ctx: &mut AnteContext<'_>, tx: &Tx) -> Result<(), AnteError> {
        let msg = native_tx(tx)?;
        for signer in msg.signers() {
            let mut account =
                ctx.ledger.account(signer).ok_or(AnteError::UnknownAddress { address: signer })?;
            account.sequence += 1;
            ctx.ledger.set_account(account);
        }
        Ok(())
    }
}
