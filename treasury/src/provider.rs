use std::fmt;

use chrono::NaiveDate;
use common::{amount::Amount, ids::ProviderId, time::TimestampMs};
#[cfg(any(test, feature = "test-utils"))]
use proptest_derive::Arbitrary;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::job::ConversionDirection;

/// The adapter implementation a provider row is served by. The treasury
/// engine holds a build-once map `ProviderType -> adapter`; registering a
/// new provider means adding a variant here and an adapter for it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(any(test, feature = "test-utils"), derive(Arbitrary))]
#[cfg_attr(test, derive(strum::VariantArray))]
pub enum ProviderType {
    Due,
    ZeroHash,
    /// Test-only adapter; never selected in production configs.
    Mock,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Due => "due",
            Self::ZeroHash => "zero_hash",
            Self::Mock => "mock",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator-controlled provider availability.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(any(test, feature = "test-utils"), derive(Arbitrary))]
#[cfg_attr(test, derive(strum::VariantArray))]
pub enum ProviderStatus {
    Active,
    Inactive,
}

/// A registered conversion provider with its routing attributes and running
/// health counters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversionProvider {
    pub id: ProviderId,
    /// Unique display name ("due-production").
    pub name: String,
    pub provider_type: ProviderType,
    /// Lower is preferred.
    pub priority: u32,
    pub status: ProviderStatus,
    pub supports_usdc_to_usd: bool,
    pub supports_usd_to_usdc: bool,
    pub min_conversion_amount: Amount,
    pub max_conversion_amount: Amount,
    pub daily_volume_limit: Amount,
    pub daily_volume_used: Amount,
    /// The UTC day `daily_volume_used` belongs to; a new day resets the
    /// counter without needing a midnight cron.
    pub volume_day: NaiveDate,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_success_at: Option<TimestampMs>,
    pub last_failure_at: Option<TimestampMs>,
    pub created_at: TimestampMs,
    pub updated_at: TimestampMs,
}

impl ConversionProvider {
    pub fn supports_direction(&self, direction: ConversionDirection) -> bool {
        match direction {
            ConversionDirection::UsdcToUsd => self.supports_usdc_to_usd,
            ConversionDirection::UsdToUsdc => self.supports_usd_to_usdc,
        }
    }

    /// Healthy iff active and the failure ratio is within the threshold.
    /// A provider with no history yet is healthy.
    pub fn is_healthy(&self, failure_threshold: Decimal) -> bool {
        if self.status != ProviderStatus::Active {
            return false;
        }
        let total = self.success_count + self.failure_count;
        if total == 0 {
            return true;
        }
        let ratio = Decimal::from(self.failure_count) / Decimal::from(total);
        ratio <= failure_threshold
    }

    /// Volume already used today; a stale `volume_day` counts as zero.
    pub fn volume_used_on(&self, today: NaiveDate) -> Amount {
        if self.volume_day == today {
            self.daily_volume_used
        } else {
            Amount::ZERO
        }
    }

    /// Capacity remaining today.
    pub fn residual_capacity(&self, today: NaiveDate) -> Amount {
        self.daily_volume_limit
            .saturating_sub(self.volume_used_on(today))
    }

    /// Whether `amount` is within this provider's per-conversion bounds.
    pub fn amount_in_bounds(&self, amount: Amount) -> bool {
        amount >= self.min_conversion_amount
            && amount <= self.max_conversion_amount
    }
}

#[cfg(test)]
mod test {
    use common::test_utils::roundtrip;
    use rust_decimal_macros::dec;

    use super::*;

    pub(crate) fn test_provider(
        name: &str,
        priority: u32,
    ) -> ConversionProvider {
        let now = TimestampMs::now();
        ConversionProvider {
            id: ProviderId::generate(),
            name: name.to_owned(),
            provider_type: ProviderType::Mock,
            priority,
            status: ProviderStatus::Active,
            supports_usdc_to_usd: true,
            supports_usd_to_usdc: true,
            min_conversion_amount: Amount::from_u64(1),
            max_conversion_amount: Amount::from_u64(1_000_000),
            daily_volume_limit: Amount::from_u64(1_000_000),
            daily_volume_used: Amount::ZERO,
            volume_day: now.utc_date(),
            success_count: 0,
            failure_count: 0,
            last_success_at: None,
            last_failure_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn provider_type_json_backwards_compat() {
        let expected_ser = r#"["due","zero_hash","mock"]"#;
        roundtrip::json_unit_enum_backwards_compat::<ProviderType>(
            expected_ser,
        );
    }

    #[test]
    fn health_tracks_failure_ratio() {
        let mut provider = test_provider("p", 1);
        assert!(provider.is_healthy(dec!(0.5)));

        provider.success_count = 1;
        provider.failure_count = 3;
        assert!(!provider.is_healthy(dec!(0.5)));

        provider.success_count = 9;
        provider.failure_count = 1;
        assert!(provider.is_healthy(dec!(0.5)));

        provider.status = ProviderStatus::Inactive;
        assert!(!provider.is_healthy(dec!(0.5)));
    }

    #[test]
    fn stale_volume_day_resets_capacity() {
        let mut provider = test_provider("p", 1);
        let today = provider.volume_day;
        provider.daily_volume_used = Amount::from_u64(999_999);
        assert_eq!(provider.residual_capacity(today), Amount::from_u64(1));

        let tomorrow = today.succ_opt().unwrap();
        assert_eq!(
            provider.residual_capacity(tomorrow),
            Amount::from_u64(1_000_000)
        );
    }
}
