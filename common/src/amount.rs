//! A money amount newtype which maintains some useful internal invariants.
//!
//! Note that we don't impl `From<Decimal>` or [`FromStr`] because we want
//! calling code to be explicit about validation: parse the string to a
//! [`Decimal`] first, then call [`Amount::try_from_decimal`].
//!
//! ```
//! # use common::amount::Amount;
//! # use rust_decimal::Decimal;
//! # use std::str::FromStr;
//! let dec = Decimal::from_str("50.00").expect("Not a number");
//! let amount = Amount::try_from_decimal(dec).expect("Invalid amount");
//! ```
//!
//! [`FromStr`]: std::str::FromStr
//! [`Decimal`]: rust_decimal::Decimal

use std::{
    fmt::{self, Display},
    iter::Sum,
    ops::{Add, Div, Mul, Sub},
};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Deserializer, Serialize};

/// Errors that can occur when attempting to construct an [`Amount`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Amount is negative")]
    Negative,
    #[error("Amount is too large")]
    TooLarge,
}

/// A money amount, internally represented as a [`Decimal`], which provides
/// the following properties:
///
/// - The contained value is non-negative.
/// - The contained value is no greater than [`Amount::MAX`].
///
/// An [`Amount`] is unit-less; the currency it denominates lives next to it
/// (on the entry, the account, the conversion job). Ledger invariants are
/// enforced per currency, so amounts of different currencies must never be
/// summed directly - keeping [`Amount`] unit-less makes that mistake visible
/// at the callsite rather than hiding it behind a conversion.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize)]
pub struct Amount(Decimal);

impl Amount {
    /// The maximum [`Amount`] that this type can represent: one trillion
    /// units. Far beyond any balance this system will hold, but small enough
    /// that sums of many amounts stay comfortably within [`Decimal`] range.
    pub const MAX: Self = Self(dec!(1_000_000_000_000));

    /// An [`Amount`] of zero.
    pub const ZERO: Self = Self(dec!(0));

    // --- Constructors --- //

    /// Construct an [`Amount`] from a whole-unit [`u64`] value.
    ///
    /// Panics if the value exceeds [`Amount::MAX`]; use
    /// [`Amount::try_from_decimal`] for untrusted inputs.
    #[inline]
    pub fn from_u64(units: u64) -> Self {
        Self::try_from_decimal(Decimal::from(units))
            .expect("u64 units exceeded Amount::MAX")
    }

    /// Construct an [`Amount`] from a [`Decimal`] value.
    #[inline]
    pub fn try_from_decimal(value: Decimal) -> Result<Self, Error> {
        Self::try_from_inner(value)
    }

    // --- Getters --- //

    /// Returns the contained [`Decimal`].
    #[inline]
    pub fn to_decimal(self) -> Decimal {
        self.0
    }

    /// Whether this amount is exactly zero.
    #[inline]
    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    // --- Checked arithmetic --- //

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        let inner = self.0.checked_add(rhs.0)?;
        Self::try_from_inner(inner).ok()
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        let inner = self.0.checked_sub(rhs.0)?;
        Self::try_from_inner(inner).ok()
    }

    // Amount * scalar => Amount
    pub fn checked_mul(self, rhs: Decimal) -> Option<Self> {
        let inner = self.0.checked_mul(rhs)?;
        Self::try_from_inner(inner).ok()
    }

    /// Subtraction clamped at zero.
    pub fn saturating_sub(self, rhs: Self) -> Self {
        self.checked_sub(rhs).unwrap_or(Self::ZERO)
    }

    /// Rounds towards zero at `dp` decimal places. Used by the allocation
    /// split so that the spending leg never rounds up into dust owed by the
    /// stash leg.
    #[inline]
    pub fn round_down_dp(self, dp: u32) -> Self {
        Self(self.0.trunc_with_scale(dp))
    }

    /// Checks all internal invariants, returning [`Self`] if all were OK.
    #[inline]
    fn try_from_inner(inner: Decimal) -> Result<Self, Error> {
        if inner.is_sign_negative() {
            Err(Error::Negative)
        } else if inner > Self::MAX.0 {
            Err(Error::TooLarge)
        } else {
            Ok(Self(inner))
        }
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner: Decimal = Deserialize::deserialize(deserializer)?;

        Self::try_from_inner(inner).map_err(|e| match e {
            Error::Negative => serde::de::Error::custom("Amount was negative"),
            Error::TooLarge => serde::de::Error::custom("Amount was too large"),
        })
    }
}

impl Display for Amount {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Delegate to Decimal's Display impl which respects `std::fmt` syntax.
        Decimal::fmt(&self.0, f)
    }
}

// --- Basic std::ops impls --- //
// These panic on invariant violation; use the checked variants when the
// inputs are not already known to be in range.

impl Add for Amount {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self::try_from_inner(self.0 + rhs.0).expect("Overflowed")
    }
}

impl Sub for Amount {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self::try_from_inner(self.0 - rhs.0).expect("Underflowed")
    }
}

// Amount * scalar => Amount
impl Mul<Decimal> for Amount {
    type Output = Self;
    fn mul(self, rhs: Decimal) -> Self::Output {
        Self::try_from_inner(self.0 * rhs).expect("Overflowed")
    }
}

// Amount / scalar => Amount
impl Div<Decimal> for Amount {
    type Output = Self;
    fn div(self, rhs: Decimal) -> Self::Output {
        Self::try_from_inner(self.0 / rhs).expect("Overflowed")
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

// --- Tests and test infra --- //

#[cfg(any(test, feature = "test-utils"))]
mod arbitrary_impl {
    use proptest::{
        arbitrary::Arbitrary,
        strategy::{BoxedStrategy, Strategy},
    };

    use super::*;

    impl Arbitrary for Amount {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;
        fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
            // Two decimal places over a wide whole-unit range covers every
            // amount the ledger actually sees.
            (0u64..1_000_000_000_000, 0u64..100)
                .prop_map(|(units, cents)| {
                    Amount::from_u64(units)
                        + Amount(Decimal::new(cents as i64, 2))
                })
                .boxed()
        }
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use proptest::{prop_assert, prop_assert_eq, proptest};

    use super::*;

    #[test]
    fn check_associated_constants() {
        assert_eq!(Amount::ZERO.to_decimal(), dec!(0));
        assert_eq!(Amount::MAX.to_decimal(), dec!(1_000_000_000_000));
        assert!(Amount::ZERO < Amount::MAX);
    }

    #[test]
    fn rejects_negative_and_oversized() {
        assert!(matches!(
            Amount::try_from_decimal(dec!(-0.01)),
            Err(Error::Negative)
        ));
        assert!(matches!(
            Amount::try_from_decimal(dec!(1_000_000_000_001)),
            Err(Error::TooLarge)
        ));
    }

    #[test]
    fn round_down_truncates() {
        let amount = Amount::try_from_decimal(dec!(33.339)).unwrap();
        assert_eq!(amount.round_down_dp(2).to_decimal(), dec!(33.33));

        // round_down never rounds up
        let amount = Amount::try_from_decimal(dec!(0.999)).unwrap();
        assert_eq!(amount.round_down_dp(2).to_decimal(), dec!(0.99));
    }

    #[test]
    fn checked_sub_underflow_is_none() {
        let a = Amount::from_u64(1);
        let b = Amount::from_u64(2);
        assert!(a.checked_sub(b).is_none());
        assert_eq!(a.saturating_sub(b), Amount::ZERO);
    }

    #[test]
    fn serde_string_roundtrip() {
        proptest!(|(amount: Amount)| {
            let json = serde_json::to_string(&amount).unwrap();
            let amount2 = serde_json::from_str::<Amount>(&json).unwrap();
            prop_assert_eq!(amount, amount2);
        });
    }

    #[test]
    fn serde_rejects_negative() {
        assert!(serde_json::from_str::<Amount>("\"-1\"").is_err());
    }

    #[test]
    fn display_matches_decimal() {
        proptest!(|(amount: Amount)| {
            let displayed = amount.to_string();
            let parsed = Decimal::from_str(&displayed).unwrap();
            prop_assert_eq!(parsed, amount.to_decimal());
            prop_assert!(!displayed.starts_with('-'));
        });
    }
}
