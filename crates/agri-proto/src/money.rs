//! Fixed-point money arithmetic.
//!
//! Amounts are integer minor units (KES cents). Percentages are basis points
//! where 10 000 is 100%. Intermediates use `u128` so no valid input overflows.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ProtoError;

/// Basis points in 100%.
pub const BPS_DENOMINATOR: u32 = 10_000;

/// An amount of money in minor units.
pub type Amount = u64;

/// A validated percentage in basis points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct BasisPoints(u32);

impl BasisPoints {
    /// Create a validated value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value exceeds 10 000.
    pub const fn new(bps: u32) -> Result<Self, ProtoError> {
        if bps > BPS_DENOMINATOR {
            return Err(ProtoError::InvalidBasisPoints(bps));
        }
        Ok(Self(bps))
    }

    /// Create a value, clamping anything above 100% down to 100%.
    #[must_use]
    pub const fn saturating(bps: u32) -> Self {
        if bps > BPS_DENOMINATOR {
            Self(BPS_DENOMINATOR)
        } else {
            Self(bps)
        }
    }

    /// The raw value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// `floor(amount × self / 10 000)`.
    #[must_use]
    pub const fn apply_floor(self, amount: Amount) -> Amount {
        let product = amount as u128 * self.0 as u128;
        // Result never exceeds `amount` because self <= 100%.
        (product / BPS_DENOMINATOR as u128) as Amount
    }

    /// `ceil(amount × self / 10 000)`.
    #[must_use]
    pub const fn apply_ceil(self, amount: Amount) -> Amount {
        let product = amount as u128 * self.0 as u128;
        let denom = BPS_DENOMINATOR as u128;
        product.div_ceil(denom) as Amount
    }
}

impl TryFrom<u32> for BasisPoints {
    type Error = ProtoError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BasisPoints> for u32 {
    fn from(value: BasisPoints) -> Self {
        value.0
    }
}

impl fmt::Display for BasisPoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
    }
}

/// Split of a gross amount into platform fee and operator net.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    /// Amount before fees.
    pub gross: Amount,
    /// Platform's share, rounded down.
    pub fee: Amount,
    /// Operator's share; `gross - fee`.
    pub net: Amount,
}

impl FeeSplit {
    /// Split `gross` at the given fee rate.
    ///
    /// The fee is rounded down so operators are never short-changed by
    /// rounding.
    ///
    /// # Examples
    /// ```
    /// use agri_proto::money::{BasisPoints, FeeSplit};
    ///
    /// let split = FeeSplit::compute(10_005, BasisPoints::new(1_000).unwrap());
    /// assert_eq!(split.fee, 1_000);
    /// assert_eq!(split.net, 9_005);
    /// ```
    #[must_use]
    pub const fn compute(gross: Amount, fee_rate: BasisPoints) -> Self {
        let fee = fee_rate.apply_floor(gross);
        Self {
            gross,
            fee,
            net: gross - fee,
        }
    }
}
