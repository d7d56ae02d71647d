use common::{ids::UserId, time::TimestampMs};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// A user's smart-allocation policy.
///
/// Invariant: both ratios are non-negative and sum to exactly 1. The split
/// applies only while `active`; pausing keeps the ratios around for a later
/// resume.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AllocationMode {
    pub user_id: UserId,
    pub active: bool,
    pub ratio_spending: Decimal,
    pub ratio_stash: Decimal,
    pub paused_at: Option<TimestampMs>,
    pub resumed_at: Option<TimestampMs>,
    pub created_at: TimestampMs,
    pub updated_at: TimestampMs,
}

/// Errors constructing or updating an [`AllocationMode`].
#[derive(Debug, thiserror::Error)]
pub enum ModeError {
    #[error("Ratios must be non-negative")]
    NegativeRatio,
    #[error("Ratios must sum to 1, got {sum}")]
    RatiosDontSumToOne { sum: Decimal },
}

impl AllocationMode {
    /// A new active mode with validated ratios.
    pub fn new(
        user_id: UserId,
        ratio_spending: Decimal,
        ratio_stash: Decimal,
        now: TimestampMs,
    ) -> Result<Self, ModeError> {
        Self::validate_ratios(ratio_spending, ratio_stash)?;
        Ok(Self {
            user_id,
            active: true,
            ratio_spending,
            ratio_stash,
            paused_at: None,
            resumed_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn validate_ratios(
        ratio_spending: Decimal,
        ratio_stash: Decimal,
    ) -> Result<(), ModeError> {
        if ratio_spending.is_sign_negative() || ratio_stash.is_sign_negative()
        {
            return Err(ModeError::NegativeRatio);
        }
        let sum = ratio_spending + ratio_stash;
        if sum != dec!(1) {
            return Err(ModeError::RatiosDontSumToOne { sum });
        }
        Ok(())
    }

    pub fn pause(&mut self, now: TimestampMs) {
        self.active = false;
        self.paused_at = Some(now);
        self.updated_at = now;
    }

    pub fn resume(&mut self, now: TimestampMs) {
        self.active = true;
        self.resumed_at = Some(now);
        self.updated_at = now;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn valid_ratios_accepted() {
        assert!(AllocationMode::validate_ratios(dec!(0.30), dec!(0.70)).is_ok());
        assert!(AllocationMode::validate_ratios(dec!(0), dec!(1)).is_ok());
        assert!(AllocationMode::validate_ratios(dec!(1), dec!(0)).is_ok());
    }

    #[test]
    fn invalid_ratios_rejected() {
        assert!(matches!(
            AllocationMode::validate_ratios(dec!(-0.1), dec!(1.1)),
            Err(ModeError::NegativeRatio)
        ));
        assert!(matches!(
            AllocationMode::validate_ratios(dec!(0.3), dec!(0.6)),
            Err(ModeError::RatiosDontSumToOne { .. })
        ));
    }

    #[test]
    fn pause_resume_flips_active() {
        let now = TimestampMs::now();
        let mut mode =
            AllocationMode::new(UserId::generate(), dec!(0.5), dec!(0.5), now)
                .unwrap();
        assert!(mode.active);
        mode.pause(now);
        assert!(!mode.active);
        assert!(mode.paused_at.is_some());
        mode.resume(now);
        assert!(mode.active);
        assert!(mode.resumed_at.is_some());
    }
}
