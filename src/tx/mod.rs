//! Transaction families.
//!
//! The admission pipeline routes on a closed union of transaction kinds:
//! [`EvmTx`], an Ethereum-style signed message, and [`NativeTx`], a
//! native-ledger transaction with fee, memo and per-signer signatures. The
//! selection happens once at pipeline entry; anything else is rejected up
//! front.

mod evm;
pub use evm::{EvmTx, TxData};

mod native;
pub use native::{Fee, NativeMsg, NativeTx, TxSignature};

use alloy::{
    primitives::{keccak256, Address, B256},
    rlp::Encodable,
};

/// Structural validation errors, independent of any chain state.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum TxValidationError {
    /// The gas price was zero.
    #[error("gas price cannot be zero")]
    ZeroGasPrice,

    /// The recipient was the zero address.
    #[error("recipient cannot be the zero address")]
    ZeroRecipient,

    /// The transaction carried no messages.
    #[error("no messages included in transaction")]
    NoMessages,

    /// A message route was empty.
    #[error("message route cannot be empty")]
    EmptyRoute,

    /// The transaction carried no signatures.
    #[error("no signatures included in transaction")]
    NoSignatures,

    /// Signature and signer counts disagree.
    #[error("signature count {sigs} does not match signer count {signers}")]
    SignatureCount {
        /// Number of signatures supplied.
        sigs: usize,
        /// Number of distinct signers required.
        signers: usize,
    },
}

/// Signature verification errors.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// A replay-protected signature was checked against chain id zero.
    #[error("chain id cannot be zero for replay-protected transactions")]
    ZeroChainId,

    /// The v/r/s values were out of range.
    #[error("signature values out of range")]
    InvalidValues,

    /// Sender recovery failed.
    #[error("failed to recover sender: {0}")]
    Recovery(String),

    /// A signature did not verify against the signer's key.
    #[error("signature does not verify for signer {signer}")]
    Mismatch {
        /// The expected signer.
        signer: Address,
    },

    /// An attached public key does not hash to the signer's address.
    #[error("public key does not match signer address {expected}")]
    PubKeyMismatch {
        /// The address the key was attached for.
        expected: Address,
    },
}

/// A transaction of either family.
#[derive(Debug, Clone)]
pub enum Tx {
    /// An Ethereum-style transaction.
    Evm(EvmTx),
    /// A native-ledger transaction.
    Native(NativeTx),
}

impl Tx {
    /// The gas limit the transaction supplies.
    pub const fn gas_limit(&self) -> u64 {
        match self {
            Self::Evm(tx) => tx.data.gas_limit,
            Self::Native(tx) => tx.fee.gas_limit,
        }
    }

    /// The transaction's timeout height; zero means none.
    pub const fn timeout_height(&self) -> u64 {
        match self {
            Self::Evm(_) => 0,
            Self::Native(tx) => tx.timeout_height,
        }
    }

    /// A short name of the transaction family, for errors and traces.
    pub const fn family(&self) -> &'static str {
        match self {
            Self::Evm(_) => "ethereum",
            Self::Native(_) => "native",
        }
    }
}

/// Keccak hash of the RLP list encoding of `fields`.
pub(crate) fn rlp_hash(fields: &[&dyn Encodable]) -> B256 {
    let payload_length: usize = fields.iter().map(|f| f.length()).sum();
    let mut out = Vec::with_capacity(payload_length + 9);
    alloy::rlp::Header { list: true, payload_length }.encode(&mut out);
    for field in fields {
        field.encode(&mut out);
    }
    keccak256(&out)
}

#[cfg(test)]
mod test {
    use super::*;
    use alloy::primitives::{Bytes, U256};

    #[test]
    fn rlp_hash_matches_known_vector() {
        // keccak of rlp([]) == keccak(0xc0)
        assert_eq!(rlp_hash(&[]), keccak256([0xc0u8]));
    }

    #[test]
    fn family_names() {
        let evm = Tx::Evm(EvmTx::new(TxData {
            nonce: 0,
            gas_price: U256::from(1u64),
            gas_limit: 21_000,
            to: None,
            value: U256::ZERO,
            payload: Bytes::new(),
            v: 0,
            r: U256::ZERO,
            s: U256::ZERO,
        }));
        assert_eq!(evm.family(), "ethereum");
        assert_eq!(evm.gas_limit(), 21_000);
        assert_eq!(evm.timeout_height(), 0);
    }
}
