//! Chain identifier parsing.
//!
//! The consensus layer names chains with a human-readable string such as
//! `bevm-7`; Ethereum-style signatures commit to the numeric epoch after the
//! final dash.

/// Errors parsing a chain identifier.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ChainIdError {
    /// The identifier was empty.
    #[error("chain identifier is empty")]
    Empty,

    /// The identifier does not end in a base-10 epoch number.
    #[error("chain identifier {id:?} does not end in a numeric epoch")]
    Malformed {
        /// The offending identifier.
        id: String,
    },
}

/// Parse the numeric epoch out of a chain identifier.
///
/// Accepts either a bare number (`"7"`) or a `name-number` form
/// (`"bevm-7"`); the epoch is whatever follows the final dash.
pub fn parse_chain_id(id: &str) -> Result<u64, ChainIdError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(ChainIdError::Empty);
    }

    let epoch = id.rsplit_once('-').map_or(id, |(_, epoch)| epoch);
    epoch.parse().map_err(|_| ChainIdError::Malformed { id: id.to_owned() })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_suffix_epoch() {
        assert_eq!(parse_chain_id("bevm-7").unwrap(), 7);
        assert_eq!(parse_chain_id("test-chain-9000").unwrap(), 9000);
        assert_eq!(parse_chain_id("42").unwrap(), 42);
    }

    #[test]
    fn rejects_bad_identifiers() {
        assert_eq!(parse_chain_id("").unwrap_err(), ChainIdError::Empty);
        assert_eq!(parse_chain_id("  ").unwrap_err(), ChainIdError::Empty);
        assert!(matches!(parse_chain_id("bevm-").unwrap_err(), ChainIdError::Malformed { .. }));
        assert!(matches!(parse_chain_id("bevm").unwrap_err(), ChainIdError::Malformed { .. }));
    }
}
