//! Ethereum-style transactions.

use crate::tx::{rlp_hash, SignatureError, TxValidationError};
use alloy::primitives::{Address, Bytes, Signature, B256, U256};
use once_cell::sync::OnceCell;

/// The signed payload of an Ethereum-style transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxData {
    /// The sender's account nonce.
    pub nonce: u64,
    /// Price per unit of gas.
    pub gas_price: U256,
    /// Supplied gas limit.
    pub gas_limit: u64,
    /// Recipient; `None` denotes contract creation.
    pub to: Option<Address>,
    /// Transferred value.
    pub value: U256,
    /// Call data or initialization code.
    pub payload: Bytes,
    /// Signature recovery value, EIP-155 encoded when replay-protected.
    pub v: u64,
    /// Signature r value.
    pub r: U256,
    /// Signature s value.
    pub s: U256,
}

/// An Ethereum-style transaction with its recovered-sender cache.
#[derive(Debug, Clone)]
pub struct EvmTx {
    /// The signed payload.
    pub data: TxData,
    /// Sender recovered from the signature, cached by
    /// [`EvmTx::verify_sig`].
    from: OnceCell<Address>,
}

impl EvmTx {
    /// Wrap a signed payload.
    pub const fn new(data: TxData) -> Self {
        Self { data, from: OnceCell::new() }
    }

    /// The fee paid to validators: `gas_price × gas_limit`.
    pub fn fee(&self) -> U256 {
        self.data.gas_price.saturating_mul(U256::from(self.data.gas_limit))
    }

    /// The transaction's upper-bound cost: fee plus transferred value.
    pub fn cost(&self) -> U256 {
        self.fee().saturating_add(self.data.value)
    }

    /// The cached sender, if [`EvmTx::verify_sig`] has run.
    pub fn from(&self) -> Option<Address> {
        self.from.get().copied()
    }

    /// Structural validation, independent of chain state.
    pub fn validate_basic(&self) -> Result<(), TxValidationError> {
        if self.data.gas_price.is_zero() {
            return Err(TxValidationError::ZeroGasPrice);
        }
        if self.data.to == Some(Address::ZERO) {
            return Err(TxValidationError::ZeroRecipient);
        }
        Ok(())
    }

    /// The hash signed by the sender. Replay-protected signatures commit to
    /// the chain id per EIP-155; unprotected ones use the homestead form.
    pub fn sig_hash(&self, chain_id: Option<u64>) -> B256 {
        let to = self.data.to.map(|a| Bytes::copy_from_slice(a.as_slice())).unwrap_or_default();
        match chain_id {
            Some(chain_id) => rlp_hash(&[
                &self.data.nonce,
                &self.data.gas_price,
                &self.data.gas_limit,
                &to,
                &self.data.value,
                &self.data.payload,
                &chain_id,
                &0u8,
                &0u8,
            ]),
            None => rlp_hash(&[
                &self.data.nonce,
                &self.data.gas_price,
                &self.data.gas_limit,
                &to,
                &self.data.value,
                &self.data.payload,
            ]),
        }
    }

    /// The transaction hash, over the full signed payload.
    pub fn hash(&self) -> B256 {
        let to = self.data.to.map(|a| Bytes::copy_from_slice(a.as_slice())).unwrap_or_default();
        rlp_hash(&[
            &self.data.nonce,
            &self.data.gas_price,
            &self.data.gas_limit,
            &to,
            &self.data.value,
            &self.data.payload,
            &self.data.v,
            &self.data.r,
            &self.data.s,
        ])
    }

    /// True if the signature commits to a chain id.
    pub const fn is_protected(&self) -> bool {
        !(self.data.v == 27 || self.data.v == 28)
    }

    /// Verify the signature for the given chain id, recovering and caching
    /// the sender address.
    pub fn verify_sig(&self, chain_id: u64) -> Result<Address, SignatureError> {
        if self.data.r.is_zero() || self.data.s.is_zero() {
            return Err(SignatureError::InvalidValues);
        }

        let (hash, parity) = if self.is_protected() {
            if chain_id == 0 {
                return Err(SignatureError::ZeroChainId);
            }
            let recovery = self
                .data
                .v
                .checked_sub(2 * chain_id + 35)
                .ok_or(SignatureError::InvalidValues)?;
            if recovery > 1 {
                return Err(SignatureError::InvalidValues);
            }
            (self.sig_hash(Some(chain_id)), recovery == 1)
        } else {
            (self.sig_hash(None), self.data.v == 28)
        };

        let signature = Signature::new(self.data.r, self.data.s, parity);
        let sender = signature
            .recover_address_from_prehash(&hash)
            .map_err(|e| SignatureError::Recovery(e.to_string()))?;

        // cache for the rest of the pipeline; an already-populated cache is
        // left untouched
        let _ = self.from.set(sender);
        Ok(sender)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn tx_data() -> TxData {
        TxData {
            nonce: 1,
            gas_price: U256::from(2u64),
            gas_limit: 21_000,
            to: Some(Address::repeat_byte(9)),
            value: U256::from(100u64),
            payload: Bytes::new(),
            v: 0,
            r: U256::ZERO,
            s: U256::ZERO,
        }
    }

    #[test]
    fn fee_and_cost() {
        let tx = EvmTx::new(tx_data());
        assert_eq!(tx.fee(), U256::from(42_000u64));
        assert_eq!(tx.cost(), U256::from(42_100u64));
    }

    #[test]
    fn validate_basic_rejects_zero_gas_price() {
        let tx = EvmTx::new(TxData { gas_price: U256::ZERO, ..tx_data() });
        assert_eq!(tx.validate_basic().unwrap_err(), TxValidationError::ZeroGasPrice);
    }

    #[test]
    fn validate_basic_rejects_zero_recipient() {
        let tx = EvmTx::new(TxData { to: Some(Address::ZERO), ..tx_data() });
        assert_eq!(tx.validate_basic().unwrap_err(), TxValidationError::ZeroRecipient);
    }

    #[test]
    fn sig_hash_commits_to_chain_id() {
        let tx = EvmTx::new(tx_data());
        assert_ne!(tx.sig_hash(Some(1)), tx.sig_hash(Some(2)));
        assert_ne!(tx.sig_hash(Some(1)), tx.sig_hash(None));
    }

    #[test]
    fn unsigned_verification_fails() {
        let tx = EvmTx::new(tx_data());
        assert_eq!(tx.verify_sig(1).unwrap_err(), SignatureError::InvalidValues);
        assert!(tx.from().is_none());
    }
}
