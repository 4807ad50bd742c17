//! Fixed-point decimal balances.
//!
//! The ledger tracks balances as plain integers in the chain's native
//! denomination. The EVM-visible balance is a fixed-point decimal with 18
//! fractional digits, so every balance read scales the ledger integer up and
//! every commit truncates back down. Routing all conversions through [`Dec`]
//! keeps the two views from drifting apart through rounding.

use alloy::primitives::U256;

/// Number of fractional decimal digits carried by [`Dec`].
pub const DECIMAL_PRECISION: u32 = 18;

/// 10^18, the scaling unit between ledger integers and [`Dec`] values.
///
/// Fits in a `u64`, so this is constructible in const position.
const UNIT: u64 = 1_000_000_000_000_000_000;

#[inline]
fn unit() -> U256 {
    U256::from(UNIT)
}

/// A non-negative fixed-point decimal with [`DECIMAL_PRECISION`] fractional
/// digits, stored as a scaled [`U256`] numerator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Dec(U256);

impl Dec {
    /// The zero value.
    pub const ZERO: Self = Self(U256::ZERO);

    /// Scale an integer amount up into a decimal.
    ///
    /// Ledger amounts are bounded well below `U256::MAX / 10^18`; a scaled
    /// overflow means the ledger itself is corrupt.
    pub fn from_int(amount: U256) -> Self {
        Self(amount.checked_mul(unit()).expect("ledger amount overflows the fixed-point range"))
    }

    /// Construct from a raw scaled numerator.
    pub const fn from_raw(raw: U256) -> Self {
        Self(raw)
    }

    /// The raw scaled numerator.
    pub const fn raw(self) -> U256 {
        self.0
    }

    /// Truncate back down to an integer amount, dropping fractional digits.
    pub fn to_int_floor(self) -> U256 {
        self.0 / unit()
    }

    /// True if the value is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Saturating addition.
    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Saturating subtraction, clamping at zero.
    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }
}

impl core::fmt::Display for Dec {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let int = self.0 / unit();
        let frac = self.0 % unit();
        if frac.is_zero() {
            write!(f, "{int}")
        } else {
            let frac = frac.to_string();
            write!(f, "{int}.{frac:0>18}")
        }
    }
}
