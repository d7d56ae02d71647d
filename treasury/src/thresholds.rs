use std::fmt;

use common::{amount::Amount, time::TimestampMs};
#[cfg(any(test, feature = "test-utils"))]
use proptest_derive::Arbitrary;
use ledger::AccountType;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a buffer balance sits relative to its configured thresholds.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(any(test, feature = "test-utils"), derive(Arbitrary))]
#[cfg_attr(test, derive(strum::VariantArray))]
pub enum BufferHealth {
    /// Below the critical floor; replenish immediately.
    CriticalLow,
    /// Below target; replenish within the batch window.
    BelowTarget,
    /// Between target and max.
    Healthy,
    /// Above max; excess liquidity is flagged, not auto-drained.
    OverCapitalized,
}

impl BufferHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CriticalLow => "critical_low",
            Self::BelowTarget => "below_target",
            Self::Healthy => "healthy",
            Self::OverCapitalized => "over_capitalized",
        }
    }

    pub fn needs_replenishment(&self) -> bool {
        matches!(self, Self::CriticalLow | Self::BelowTarget)
    }
}

impl fmt::Display for BufferHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-buffer-account replenishment thresholds.
///
/// Invariant: `min <= target <= max`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BufferThreshold {
    pub id: Uuid,
    /// Which system account this threshold governs; unique.
    pub account_type: AccountType,
    pub min: Amount,
    pub target: Amount,
    pub max: Amount,
    /// Caps the size of a single replenishment conversion. Zero means
    /// uncapped.
    pub batch_size: Amount,
    pub created_at: TimestampMs,
    pub updated_at: TimestampMs,
}

impl BufferThreshold {
    pub fn new(
        account_type: AccountType,
        min: Amount,
        target: Amount,
        max: Amount,
        batch_size: Amount,
        now: TimestampMs,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(min <= target, "min must be <= target");
        anyhow::ensure!(target <= max, "target must be <= max");
        Ok(Self {
            id: Uuid::new_v4(),
            account_type,
            min,
            target,
            max,
            batch_size,
            created_at: now,
            updated_at: now,
        })
    }

    /// Classifies a balance. `emergency_ratio` scales the critical floor;
    /// with a ratio of 1 the floor is exactly `min`.
    pub fn health(
        &self,
        balance: Amount,
        emergency_ratio: Decimal,
    ) -> BufferHealth {
        let critical_floor = self.min * emergency_ratio;
        if balance < critical_floor {
            BufferHealth::CriticalLow
        } else if balance < self.target {
            BufferHealth::BelowTarget
        } else if balance <= self.max {
            BufferHealth::Healthy
        } else {
            BufferHealth::OverCapitalized
        }
    }

    /// The amount needed to bring `balance` back to target, capped by
    /// `batch_size` when set.
    pub fn shortfall(&self, balance: Amount) -> Amount {
        let deficit = self.target.saturating_sub(balance);
        if self.batch_size.is_zero() {
            deficit
        } else {
            deficit.min(self.batch_size)
        }
    }
}

#[cfg(test)]
mod test {
    use rust_decimal_macros::dec;

    use super::*;

    fn threshold() -> BufferThreshold {
        BufferThreshold::new(
            AccountType::SystemBufferUsdc,
            Amount::from_u64(5_000),
            Amount::from_u64(10_000),
            Amount::from_u64(20_000),
            Amount::ZERO,
            TimestampMs::now(),
        )
        .unwrap()
    }

    #[test]
    fn health_bands() {
        let threshold = threshold();
        let health = |balance: u64| {
            threshold.health(Amount::from_u64(balance), dec!(1))
        };
        assert_eq!(health(4_999), BufferHealth::CriticalLow);
        assert_eq!(health(5_000), BufferHealth::BelowTarget);
        assert_eq!(health(9_999), BufferHealth::BelowTarget);
        assert_eq!(health(10_000), BufferHealth::Healthy);
        assert_eq!(health(20_000), BufferHealth::Healthy);
        assert_eq!(health(20_001), BufferHealth::OverCapitalized);
    }

    #[test]
    fn emergency_ratio_scales_floor() {
        let threshold = threshold();
        // Floor becomes 2500.
        assert_eq!(
            threshold.health(Amount::from_u64(3_000), dec!(0.5)),
            BufferHealth::BelowTarget
        );
        assert_eq!(
            threshold.health(Amount::from_u64(2_000), dec!(0.5)),
            BufferHealth::CriticalLow
        );
    }

    #[test]
    fn shortfall_caps_at_batch_size() {
        let mut threshold = threshold();
        assert_eq!(
            threshold.shortfall(Amount::from_u64(4_000)),
            Amount::from_u64(6_000)
        );

        threshold.batch_size = Amount::from_u64(2_500);
        assert_eq!(
            threshold.shortfall(Amount::from_u64(4_000)),
            Amount::from_u64(2_500)
        );

        assert_eq!(
            threshold.shortfall(Amount::from_u64(15_000)),
            Amount::ZERO
        );
    }

    #[test]
    fn invalid_ordering_rejected() {
        assert!(BufferThreshold::new(
            AccountType::SystemBufferUsdc,
            Amount::from_u64(10),
            Amount::from_u64(5),
            Amount::from_u64(20),
            Amount::ZERO,
            TimestampMs::now(),
        )
        .is_err());
    }
}
