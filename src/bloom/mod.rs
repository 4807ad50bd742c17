//! Bloom-bits generation and compression.
//!
//! Per-block bloom filters are rotated into per-bit rows: for a section of
//! N consecutive blocks, bit `i` of every block's bloom lands in row `i` as
//! an N-bit vector. One query for bit `i` over a section then reads a
//! single compressed row instead of N blooms.

mod indexer;
pub use indexer::{
    BitsRequest, BloomIndexer, FilterSession, IndexerConfig, IndexerError, BLOOM_BITS_BLOCKS,
    BLOOM_FILTER_THREADS, BLOOM_RETRIEVAL_BATCH, BLOOM_RETRIEVAL_WAIT, BLOOM_SERVICE_THREADS,
};

use alloy::primitives::{keccak256, Bloom};

/// Number of bits in a bloom filter.
pub const BLOOM_BIT_LENGTH: usize = 2048;
/// Number of bytes in a bloom filter.
pub const BLOOM_BYTE_LENGTH: usize = 256;

/// Errors from bloom-bits generation and compression.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum BloomError {
    /// The section size is not a multiple of 8.
    #[error("section size {sections} is not a multiple of 8")]
    SectionSize {
        /// The offending size.
        sections: u64,
    },

    /// A bloom was added out of order.
    #[error("bloom added out of order: got index {got}, expected {expected}")]
    UnexpectedIndex {
        /// The supplied index.
        got: u64,
        /// The next expected index.
        expected: u64,
    },

    /// A bit vector was requested before the section was fully generated.
    #[error("bloom section not yet fully generated")]
    SectionIncomplete,

    /// The bit index is out of bounds.
    #[error("bloom bit index {bit} out of bounds")]
    BitOutOfBounds {
        /// The offending bit index.
        bit: u32,
    },

    /// Compressed data decodes to more than the target length.
    #[error("compressed data exceeds target length")]
    ExceedsTarget,

    /// Compressed data ended before the target length was reached.
    #[error("compressed data is missing bytes")]
    MissingData,

    /// Compressed data held more bytes than its encoding uses.
    #[error("compressed data has excess bytes")]
    ExcessData,
}

/// Rotates per-block blooms into per-bit section rows.
#[derive(Debug, Clone)]
pub struct Generator {
    bitsets: Vec<Vec<u8>>,
    sections: u64,
    next: u64,
}

impl Generator {
    /// A generator for a section of `sections` blocks. The size must be a
    /// multiple of 8 so rows pack into whole bytes.
    pub fn new(sections: u64) -> Result<Self, BloomError> {
        if sections % 8 != 0 {
            return Err(BloomError::SectionSize { sections });
        }
        let row = vec![0u8; (sections / 8) as usize];
        Ok(Self { bitsets: vec![row; BLOOM_BIT_LENGTH], sections, next: 0 })
    }

    /// Add the bloom of the block at `index` within the section. Blooms
    /// must arrive in order.
    pub fn add_bloom(&mut self, index: u64, bloom: &Bloom) -> Result<(), BloomError> {
        if index != self.next {
            return Err(BloomError::UnexpectedIndex { got: index, expected: self.next });
        }

        let byte_index = (self.next / 8) as usize;
        let bit_mask = 1u8 << (7 - self.next % 8);
        let bloom = bloom.as_slice();

        for byt in 0..BLOOM_BYTE_LENGTH {
            let bloom_byte = bloom[BLOOM_BYTE_LENGTH - 1 - byt];
            if bloom_byte == 0 {
                continue;
            }
            let base = 8 * byt;
            for bit in 0..8 {
                if bloom_byte & (1 << bit) != 0 {
                    self.bitsets[base + bit][byte_index] |= bit_mask;
                }
            }
        }

        self.next += 1;
        Ok(())
    }

    /// The finished row for `bit`. Fails until every block of the section
    /// was added.
    pub fn bitset(&self, bit: u32) -> Result<&[u8], BloomError> {
        if self.next != self.sections {
            return Err(BloomError::SectionIncomplete);
        }
        self.bitsets
            .get(bit as usize)
            .map(Vec::as_slice)
            .ok_or(BloomError::BitOutOfBounds { bit })
    }
}

/// The three bloom bit indices a byte string maps to.
pub fn bloom_bit_indexes(data: &[u8]) -> [u32; 3] {
    let hash = keccak256(data);
    let mut indexes = [0u32; 3];
    for (slot, i) in [0usize, 2, 4].into_iter().enumerate() {
        indexes[slot] = (((hash[i] as u32) << 8) | hash[i + 1] as u32) & (BLOOM_BIT_LENGTH as u32 - 1);
    }
    indexes
}

/// Compress a byte vector with the sparse-bitset representation. Returns
/// the input unchanged when compression would not shrink it.
pub fn compress_bytes(data: &[u8]) -> Vec<u8> {
    let out = bitset_encode(data);
    if out.len() < data.len() {
        out
    } else {
        data.to_vec()
    }
}

/// Decompress data produced by [`compress_bytes`] to a known target size.
/// Input matching the target size means no compression was applied.
pub fn decompress_bytes(data: &[u8], target: usize) -> Result<Vec<u8>, BloomError> {
    if data.len() > target {
        return Err(BloomError::ExceedsTarget);
    }
    if data.len() == target {
        return Ok(data.to_vec());
    }
    bitset_decode(data, target)
}

fn bitset_encode(data: &[u8]) -> Vec<u8> {
    if data.is_empty() {
        return Vec::new();
    }
    if data.len() == 1 {
        return if data[0] == 0 { Vec::new() } else { data.to_vec() };
    }

    let mut non_zero_bitset = vec![0u8; data.len().div_ceil(8)];
    let mut non_zero_bytes = Vec::with_capacity(data.len());
    for (i, &byte) in data.iter().enumerate() {
        if byte != 0 {
            non_zero_bytes.push(byte);
            non_zero_bitset[i / 8] |= 1 << (7 - i % 8);
        }
    }
    if non_zero_bytes.is_empty() {
        return Vec::new();
    }

    let mut out = bitset_encode(&non_zero_bitset);
    out.extend_from_slice(&non_zero_bytes);
    out
}

fn bitset_decode(data: &[u8], target: usize) -> Result<Vec<u8>, BloomError> {
    let (decoded, consumed) = bitset_decode_partial(data, target)?;
    if consumed != data.len() {
        return Err(BloomError::ExcessData);
    }
    Ok(decoded)
}

fn bitset_decode_partial(data: &[u8], target: usize) -> Result<(Vec<u8>, usize), BloomError> {
    if target == 0 {
        return Ok((Vec::new(), 0));
    }
    let mut decoded = vec![0u8; target];
    if data.is_empty() {
        return Ok((decoded, 0));
    }
    if target == 1 {
        decoded[0] = data[0];
        return Ok((decoded, 1));
    }

    let (non_zero_bitset, mut ptr) = bitset_decode_partial(data, target.div_ceil(8))?;
    for i in 0..8 * non_zero_bitset.len() {
        if non_zero_bitset[i / 8] & (1 << (7 - i % 8)) != 0 {
            if ptr >= data.len() {
                return Err(BloomError::MissingData);
            }
            if i >= decoded.len() {
                return Err(BloomError::ExceedsTarget);
            }
            decoded[i] = data[ptr];
            ptr += 1;
        }
    }
    Ok((decoded, ptr))
}

#[cfg(test)]
mod test {
    use super::*;
    use alloy::primitives::BloomInput;

    #[test]
    fn compress_round_trips() {
        let cases: Vec<Vec<u8>> = vec![
            vec![],
            vec![0; 8],
            vec![0xff; 8],
            {
                let mut sparse = vec![0u8; 64];
                sparse[3] = 0x11;
                sparse[60] = 0x22;
                sparse
            },
            (0..=255u8).collect(),
        ];
        for data in cases {
            let compressed = compress_bytes(&data);
            assert!(compressed.len() <= data.len());
            assert_eq!(decompress_bytes(&compressed, data.len()).unwrap(), data);
        }
    }

    #[test]
    fn all_zero_compresses_to_nothing() {
        assert!(compress_bytes(&[0; 512]).is_empty());
        assert_eq!(decompress_bytes(&[], 512).unwrap(), vec![0u8; 512]);
    }

    #[test]
    fn decompress_rejects_oversized_input() {
        assert_eq!(decompress_bytes(&[1, 2, 3], 2).unwrap_err(), BloomError::ExceedsTarget);
    }

    #[test]
    fn generator_requires_multiple_of_eight() {
        assert!(matches!(Generator::new(7), Err(BloomError::SectionSize { sections: 7 })));
        Generator::new(8).unwrap();
    }

    #[test]
    fn generator_rotates_bits() {
        let mut gen = Generator::new(8).unwrap();

        let mut bloom = Bloom::default();
        bloom.accrue(BloomInput::Raw(b"hello"));
        let set_bits: Vec<u32> =
            bloom_bit_indexes(b"hello").into_iter().collect();

        for i in 0..8 {
            // the marked bloom occupies slots 1 and 6
            let b = if i == 1 || i == 6 { bloom } else { Bloom::default() };
            gen.add_bloom(i, &b).unwrap();
        }

        for bit in set_bits {
            let row = gen.bitset(bit).unwrap();
            assert_eq!(row, &[0b0100_0010]);
        }
        // an unrelated bit stays clear
        let clear_bit = (0..BLOOM_BIT_LENGTH as u32)
            .find(|b| !bloom_bit_indexes(b"hello").contains(b))
            .unwrap();
        assert_eq!(gen.bitset(clear_bit).unwrap(), &[0u8]);
    }

    #[test]
    fn generator_enforces_order_and_completion() {
        let mut gen = Generator::new(8).unwrap();
        assert!(matches!(gen.add_bloom(3, &Bloom::default()), Err(BloomError::UnexpectedIndex { got: 3, expected: 0 })));
        gen.add_bloom(0, &Bloom::default()).unwrap();
        assert_eq!(gen.bitset(0).unwrap_err(), BloomError::SectionIncomplete);
    }
}
