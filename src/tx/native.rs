//! Native-ledger transactions.

use crate::{
    account::PubKey,
    tx::{rlp_hash, TxValidationError},
};
use alloy::primitives::{keccak256, Address, Bytes, B256, U256};

/// One module message inside a native transaction. Execution of the message
/// body belongs to the owning module; this layer only admits it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeMsg {
    /// Routing key of the handling module.
    pub route: String,
    /// The address required to sign for this message.
    pub signer: Address,
    /// Opaque message body.
    pub value: Bytes,
}

impl NativeMsg {
    /// A deterministic digest of the message, committed to by signatures.
    pub fn digest(&self) -> B256 {
        let mut buf = Vec::with_capacity(self.route.len() + 20 + self.value.len());
        buf.extend_from_slice(self.route.as_bytes());
        buf.extend_from_slice(self.signer.as_slice());
        buf.extend_from_slice(&self.value);
        keccak256(&buf)
    }
}

/// The fee a native transaction offers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fee {
    /// Fee amount in the EVM denomination.
    pub amount: U256,
    /// Supplied gas limit.
    pub gas_limit: u64,
    /// Optional third-party fee payer. Unsupported; rejected by the
    /// pipeline.
    pub granter: Option<Address>,
}

/// One signer's signature over the transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxSignature {
    /// The signer's public key, attached on the account after first use.
    pub pub_key: Option<PubKey>,
    /// 64-byte secp256k1 signature over the sign bytes.
    pub signature: Vec<u8>,
    /// The account sequence the signature was produced for.
    pub sequence: u64,
}

/// A native-ledger transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeTx {
    /// The carried messages, in execution order.
    pub msgs: Vec<NativeMsg>,
    /// Free-form memo.
    pub memo: String,
    /// The offered fee.
    pub fee: Fee,
    /// One signature per distinct signer, in signer order.
    pub signatures: Vec<TxSignature>,
    /// Height after which the transaction is invalid; zero means none.
    pub timeout_height: u64,
    /// Unsupported extension options. Rejected by the pipeline when
    /// non-empty.
    pub extension_options: Vec<Bytes>,
}

impl NativeTx {
    /// The distinct message signers, in first-appearance order.
    pub fn signers(&self) -> Vec<Address> {
        let mut seen = std::collections::HashSet::new();
        let mut signers = Vec::new();
        for msg in &self.msgs {
            if seen.insert(msg.signer) {
                signers.push(msg.signer);
            }
        }
        signers
    }

    /// Structural validation, independent of chain state.
    pub fn validate_basic(&self) -> Result<(), TxValidationError> {
        if self.msgs.is_empty() {
            return Err(TxValidationError::NoMessages);
        }
        if self.msgs.iter().any(|m| m.route.is_empty()) {
            return Err(TxValidationError::EmptyRoute);
        }
        if self.signatures.is_empty() {
            return Err(TxValidationError::NoSignatures);
        }
        let signers = self.signers().len();
        if self.signatures.len() != signers {
            return Err(TxValidationError::SignatureCount {
                sigs: self.signatures.len(),
                signers,
            });
        }
        Ok(())
    }

    /// The hash one signer commits to: chain id, the signer's sequence, the
    /// fee, the memo and every message digest.
    pub fn sign_bytes(&self, chain_id: &str, sequence: u64) -> B256 {
        let chain_id = Bytes::copy_from_slice(chain_id.as_bytes());
        let memo = Bytes::copy_from_slice(self.memo.as_bytes());
        let digests: Vec<B256> = self.msgs.iter().map(NativeMsg::digest).collect();

        let mut fields: Vec<&dyn alloy::rlp::Encodable> = vec![
            &chain_id,
            &sequence,
            &self.fee.amount,
            &self.fee.gas_limit,
            &self.timeout_height,
            &memo,
        ];
        for digest in &digests {
            fields.push(digest);
        }
        rlp_hash(&fields)
    }

    /// The transaction's deterministic wire size, charged for by the
    /// admission pipeline.
    pub fn size_bytes(&self) -> u64 {
        let msgs: u64 =
            self.msgs.iter().map(|m| (m.route.len() + 20 + m.value.len()) as u64).sum();
        let sigs = self.signatures.len() as u64 * (33 + 64 + 8);
        let extensions: u64 = self.extension_options.iter().map(|e| e.len() as u64).sum();
        // fee amount + gas limit + timeout height
        msgs + self.memo.len() as u64 + sigs + extensions + 32 + 8 + 8
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn msg(signer: Address) -> NativeMsg {
        NativeMsg { route: "bank".to_owned(), signer, value: Bytes::from_static(b"send") }
    }

    fn tx() -> NativeTx {
        NativeTx {
            msgs: vec![msg(Address::repeat_byte(1))],
            memo: String::new(),
            fee: Fee { amount: U256::from(10u64), gas_limit: 200_000, granter: None },
            signatures: vec![TxSignature { pub_key: None, signature: vec![0; 64], sequence: 0 }],
            timeout_height: 0,
            extension_options: Vec::new(),
        }
    }

    #[test]
    fn signers_dedupe_in_order() {
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let tx = NativeTx { msgs: vec![msg(a), msg(b), msg(a)], ..tx() };
        assert_eq!(tx.signers(), vec![a, b]);
    }

    #[test]
    fn validate_basic_checks_structure() {
        assert!(tx().validate_basic().is_ok());

        let empty = NativeTx { msgs: Vec::new(), ..tx() };
        assert_eq!(empty.validate_basic().unwrap_err(), TxValidationError::NoMessages);

        let unsigned = NativeTx { signatures: Vec::new(), ..tx() };
        assert_eq!(unsigned.validate_basic().unwrap_err(), TxValidationError::NoSignatures);

        let extra_sig = NativeTx {
            signatures: vec![
                TxSignature { pub_key: None, signature: vec![0; 64], sequence: 0 },
                TxSignature { pub_key: None, signature: vec![0; 64], sequence: 0 },
            ],
            ..tx()
        };
        assert!(matches!(
            extra_sig.validate_basic().unwrap_err(),
            TxValidationError::SignatureCount { sigs: 2, signers: 1 },
        ));
    }

    #[test]
    fn sign_bytes_commit_to_sequence_and_chain() {
        let tx = tx();
        assert_ne!(tx.sign_bytes("bevm-1", 0), tx.sign_bytes("bevm-1", 1));
        assert_ne!(tx.sign_bytes("bevm-1", 0), tx.sign_bytes("bevm-2", 0));
    }
}
