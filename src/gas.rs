//! Gas metering and intrinsic gas.
//!
//! Out-of-gas is a typed error propagated through `Result`, never a
//! non-local jump; the outermost admission stage attaches the supplied limit
//! and the amount consumed before the error reaches the caller.

/// Base gas cost of a plain transaction.
pub const TX_GAS: u64 = 21_000;
/// Base gas cost of a contract-creating transaction.
pub const TX_GAS_CONTRACT_CREATION: u64 = 53_000;
/// Gas cost per zero byte of transaction payload.
pub const TX_DATA_ZERO_GAS: u64 = 4;
/// Gas cost per non-zero byte of transaction payload.
pub const TX_DATA_NON_ZERO_GAS: u64 = 68;
/// Gas cost per non-zero payload byte once EIP-2028 is active.
pub const TX_DATA_NON_ZERO_GAS_EIP2028: u64 = 16;
/// Gas cost per byte of deployed contract code.
pub const CREATE_DATA_GAS: u64 = 200;
/// Gas charged for verifying one secp256k1 signature.
pub const SECP256K1_VERIFY_COST: u64 = 21_000;

/// Gas accounting errors.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum GasError {
    /// A charge exceeded the meter's limit.
    #[error("out of gas in {descriptor}: gas limit {limit}, consumed {consumed}")]
    OutOfGas {
        /// What was being charged for.
        descriptor: &'static str,
        /// The meter's limit.
        limit: u64,
        /// Gas consumed before the failing charge.
        consumed: u64,
    },

    /// A gas computation overflowed 64 bits.
    #[error("gas computation overflows a 64-bit integer")]
    Overflow,

    /// The supplied gas limit does not cover the transaction's intrinsic
    /// cost.
    #[error("intrinsic gas too low: {limit} < {required}")]
    IntrinsicGasTooLow {
        /// The supplied gas limit.
        limit: u64,
        /// The intrinsic gas required.
        required: u64,
    },
}

/// A gas meter: either finite with a hard limit, or infinite for setup and
/// query paths where costs are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasMeter {
    /// Counts consumption without ever running out.
    Infinite {
        /// Gas consumed so far.
        consumed: u64,
    },
    /// Enforces a hard limit.
    Finite {
        /// The limit.
        limit: u64,
        /// Gas consumed so far.
        consumed: u64,
    },
}

impl GasMeter {
    /// An infinite meter.
    pub const fn infinite() -> Self {
        Self::Infinite { consumed: 0 }
    }

    /// A finite meter with the given limit.
    pub const fn finite(limit: u64) -> Self {
        Self::Finite { limit, consumed: 0 }
    }

    /// Gas consumed so far.
    pub const fn consumed(&self) -> u64 {
        match self {
            Self::Infinite { consumed } | Self::Finite { consumed, .. } => *consumed,
        }
    }

    /// The limit, if the meter is finite.
    pub const fn limit(&self) -> Option<u64> {
        match self {
            Self::Infinite { .. } => None,
            Self::Finite { limit, .. } => Some(*limit),
        }
    }

    /// Charge `amount` gas. `descriptor` names the charge in the error.
    pub fn consume(&mut self, amount: u64, descriptor: &'static str) -> Result<(), GasError> {
        match self {
            Self::Infinite { consumed } => {
                *consumed = consumed.saturating_add(amount);
                Ok(())
            }
            Self::Finite { limit, consumed } => {
                let total = consumed.checked_add(amount).ok_or(GasError::Overflow)?;
                if total > *limit {
                    return Err(GasError::OutOfGas {
                        descriptor,
                        limit: *limit,
                        consumed: *consumed,
                    });
                }
                *consumed = total;
                Ok(())
            }
        }
    }
}

/// Compute the intrinsic gas of a transaction: the fixed base cost plus the
/// data-dependent cost, before any execution happens.
pub fn intrinsic_gas(
    payload: &[u8],
    is_create: bool,
    homestead: bool,
    istanbul: bool,
) -> Result<u64, GasError> {
    let mut gas = if is_create && homestead { TX_GAS_CONTRACT_CREATION } else { TX_GAS };

    if !payload.is_empty() {
        let non_zero = payload.iter().filter(|b| **b != 0).count() as u64;
        let non_zero_gas = if istanbul { TX_DATA_NON_ZERO_GAS_EIP2028 } else { TX_DATA_NON_ZERO_GAS };
        if (u64::MAX - gas) / non_zero_gas < non_zero {
            return Err(GasError::Overflow);
        }
        gas += non_zero * non_zero_gas;

        let zero = payload.len() as u64 - non_zero;
        if (u64::MAX - gas) / TX_DATA_ZERO_GAS < zero {
            return Err(GasError::Overflow);
        }
        gas += zero * TX_DATA_ZERO_GAS;
    }

    Ok(gas)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn plain_transfer_costs_base_gas() {
        assert_eq!(intrinsic_gas(&[], false, true, false).unwrap(), TX_GAS);
    }

    #[test]
    fn creation_costs_more_under_homestead() {
        assert_eq!(intrinsic_gas(&[], true, true, false).unwrap(), TX_GAS_CONTRACT_CREATION);
        assert_eq!(intrinsic_gas(&[], true, false, false).unwrap(), TX_GAS);
    }

    #[test]
    fn data_costs_split_by_zero_bytes() {
        let payload = [0, 1, 0, 2];
        assert_eq!(
            intrinsic_gas(&payload, false, true, false).unwrap(),
            TX_GAS + 2 * TX_DATA_NON_ZERO_GAS + 2 * TX_DATA_ZERO_GAS,
        );
        assert_eq!(
            intrinsic_gas(&payload, false, true, true).unwrap(),
            TX_GAS + 2 * TX_DATA_NON_ZERO_GAS_EIP2028 + 2 * TX_DATA_ZERO_GAS,
        );
    }

    #[test]
    fn finite_meter_enforces_limit() {
        let mut meter = GasMeter::finite(100);
        meter.consume(60, "a").unwrap();
        let err = meter.consume(50, "b").unwrap_err();
        assert_eq!(err, GasError::OutOfGas { descriptor: "b", limit: 100, consumed: 60 });
        // the failing charge is not applied
        assert_eq!(meter.consumed(), 60);
    }

    #[test]
    fn infinite_meter_only_counts() {
        let mut meter = GasMeter::infinite();
        meter.consume(u64::MAX, "a").unwrap();
        meter.consume(1, "b").unwrap();
        assert_eq!(meter.consumed(), u64::MAX);
        assert_eq!(meter.limit(), None);
    }
}
