//! Transaction logs and their bloom filters.
//!
//! Logs emitted during execution are stamped with their position in the
//! block (transaction hash and index, running log index) and persisted under
//! the transaction hash with a hand-rolled byte codec, so replay and query
//! paths read back exactly what execution wrote.

use alloy::primitives::{Address, Bloom, BloomInput, Bytes, B256};

/// A single log record emitted by contract execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxLog {
    /// Address of the contract that emitted the log.
    pub address: Address,
    /// Indexed topics.
    pub topics: Vec<B256>,
    /// Unindexed payload.
    pub data: Bytes,
    /// Height of the block the log was emitted in.
    pub block_number: u64,
    /// Hash of the emitting transaction.
    pub tx_hash: B256,
    /// Index of the emitting transaction within its block.
    pub tx_index: u64,
    /// Hash of the block the log was emitted in.
    pub block_hash: B256,
    /// Block-wide running index of this log.
    pub log_index: u64,
    /// True if the log was removed by a reorganization. Always false under
    /// finality, kept for wire compatibility.
    pub removed: bool,
}

/// Error decoding stored logs.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum LogsDecodeError {
    /// The buffer ended before the type was fully decoded.
    #[error("buffer overrun while decoding {ty_name}: expected {expected} more bytes, {remaining} remain")]
    Overrun {
        /// The name of the field being decoded.
        ty_name: &'static str,
        /// The number of bytes required.
        expected: usize,
        /// The number of bytes remaining.
        remaining: usize,
    },

    /// The buffer held more bytes than the encoded logs.
    #[error("trailing bytes after decoding logs")]
    TrailingBytes,
}

macro_rules! take {
    ($buf:ident, $ty_name:literal, $len:expr) => {{
        let len = $len;
        let whole: &[u8] = *$buf;
        if whole.len() < len {
            return Err(LogsDecodeError::Overrun {
                ty_name: $ty_name,
                expected: len,
                remaining: whole.len(),
            });
        }
        let (head, tail) = whole.split_at(len);
        *$buf = tail;
        head
    }};
}

impl TxLog {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.address.as_slice());
        out.extend_from_slice(&(self.topics.len() as u32).to_be_bytes());
        for topic in &self.topics {
            out.extend_from_slice(topic.as_slice());
        }
        out.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.data);
        out.extend_from_slice(&self.block_number.to_be_bytes());
        out.extend_from_slice(self.tx_hash.as_slice());
        out.extend_from_slice(&self.tx_index.to_be_bytes());
        out.extend_from_slice(self.block_hash.as_slice());
        out.extend_from_slice(&self.log_index.to_be_bytes());
        out.push(self.removed as u8);
    }

    fn decode_from(buf: &mut &[u8]) -> Result<Self, LogsDecodeError> {
        let address = Address::from_slice(take!(buf, "address", 20));
        let topic_count = u32::from_be_bytes(take!(buf, "topic count", 4).try_into().expect("4 bytes")) as usize;
        let mut topics = Vec::with_capacity(topic_count);
        for _ in 0..topic_count {
            topics.push(B256::from_slice(take!(buf, "topic", 32)));
        }
        let data_len = u32::from_be_bytes(take!(buf, "data length", 4).try_into().expect("4 bytes")) as usize;
        let data = Bytes::copy_from_slice(take!(buf, "data", data_len));
        let block_number = u64::from_be_bytes(take!(buf, "block number", 8).try_into().expect("8 bytes"));
        let tx_hash = B256::from_slice(take!(buf, "tx hash", 32));
        let tx_index = u64::from_be_bytes(take!(buf, "tx index", 8).try_into().expect("8 bytes"));
        let block_hash = B256::from_slice(take!(buf, "block hash", 32));
        let log_index = u64::from_be_bytes(take!(buf, "log index", 8).try_into().expect("8 bytes"));
        let removed = take!(buf, "removed flag", 1)[0] != 0;

        Ok(Self {
            address,
            topics,
            data,
            block_number,
            tx_hash,
            tx_index,
            block_hash,
            log_index,
            removed,
        })
    }
}

/// Encode a transaction's logs for storage.
pub fn encode_logs(logs: &[TxLog]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(logs.len() as u32).to_be_bytes());
    for log in logs {
        log.encode_into(&mut out);
    }
    out
}

/// Decode a transaction's logs from storage.
pub fn decode_logs(mut buf: &[u8]) -> Result<Vec<TxLog>, LogsDecodeError> {
    let buf = &mut buf;
    let count = u32::from_be_bytes(take!(buf, "log count", 4).try_into().expect("4 bytes")) as usize;
    let mut logs = Vec::with_capacity(count);
    for _ in 0..count {
        logs.push(TxLog::decode_from(buf)?);
    }
    if !buf.is_empty() {
        return Err(LogsDecodeError::TrailingBytes);
    }
    Ok(logs)
}

/// Compute the bloom filter covering a set of logs: the emitting address and
/// every topic are accrued.
pub fn logs_bloom(logs: &[TxLog]) -> Bloom {
    let mut bloom = Bloom::default();
    for log in logs {
        bloom.accrue(BloomInput::Raw(log.address.as_slice()));
        for topic in &log.topics {
            bloom.accrue(BloomInput::Raw(topic.as_slice()));
        }
    }
    bloom
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_log() -> TxLog {
        TxLog {
            address: Address::repeat_byte(0xaa),
            topics: vec![B256::repeat_byte(1), B256::repeat_byte(2)],
            data: Bytes::from_static(b"payload"),
            block_number: 7,
            tx_hash: B256::repeat_byte(3),
            tx_index: 2,
            block_hash: B256::repeat_byte(4),
            log_index: 5,
            removed: false,
        }
    }

    #[test]
    fn codec_round_trip() {
        let logs = vec![sample_log(), TxLog { log_index: 6, ..sample_log() }];
        let decoded = decode_logs(&encode_logs(&logs)).unwrap();
        assert_eq!(decoded, logs);
    }

    #[test]
    fn decode_rejects_truncated_input() {
        let encoded = encode_logs(&[sample_log()]);
        let err = decode_logs(&encoded[..encoded.len() - 1]).unwrap_err();
        assert!(matches!(err, LogsDecodeError::Overrun { .. }));
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let mut encoded = encode_logs(&[sample_log()]);
        encoded.push(0);
        assert_eq!(decode_logs(&encoded).unwrap_err(), LogsDecodeError::TrailingBytes);
    }

    #[test]
    fn bloom_covers_address_and_topics() {
        let log = sample_log();
        let bloom = logs_bloom(std::slice::from_ref(&log));
        assert!(bloom.contains_input(BloomInput::Raw(log.address.as_slice())));
        for topic in &log.topics {
            assert!(bloom.contains_input(BloomInput::Raw(topic.as_slice())));
        }
        assert!(!bloom.contains_input(BloomInput::Raw(Address::repeat_byte(0xbb).as_slice())));
    }
}
