use chrono::NaiveDate;
use common::amount::Amount;
use rust_decimal::Decimal;
use tracing::debug;

use crate::{job::ConversionDirection, provider::ConversionProvider};

/// No provider survived the eligibility filter.
#[derive(Debug, thiserror::Error)]
#[error(
    "No available provider for {direction} of {amount} \
     (considered {considered})"
)]
pub struct SelectorError {
    pub direction: ConversionDirection,
    pub amount: Amount,
    pub considered: usize,
}

/// Picks the provider for a conversion.
///
/// Eligibility: healthy (active + failure ratio within threshold), supports
/// the direction, the amount is within per-conversion bounds, and residual
/// daily capacity covers the amount. Among the eligible, the smallest
/// `priority` wins; ties break by input order, so the result is stable
/// across identical calls.
pub fn select_provider<'p>(
    providers: &'p [ConversionProvider],
    amount: Amount,
    direction: ConversionDirection,
    failure_threshold: Decimal,
    today: NaiveDate,
) -> Result<&'p ConversionProvider, SelectorError> {
    let mut best: Option<&ConversionProvider> = None;

    for provider in providers {
        if !provider.is_healthy(failure_threshold) {
            debug!("Skipping {}: unhealthy", provider.name);
            continue;
        }
        if !provider.supports_direction(direction) {
            continue;
        }
        if !provider.amount_in_bounds(amount) {
            debug!("Skipping {}: amount out of bounds", provider.name);
            continue;
        }
        if provider.residual_capacity(today) < amount {
            debug!("Skipping {}: daily capacity exhausted", provider.name);
            continue;
        }

        // Strictly-less keeps the first of a priority tie.
        match best {
            Some(current) if provider.priority >= current.priority => (),
            _ => best = Some(provider),
        }
    }

    best.ok_or(SelectorError {
        direction,
        amount,
        considered: providers.len(),
    })
}

#[cfg(test)]
mod test {
    use common::{amount::Amount, ids::ProviderId, time::TimestampMs};
    use rust_decimal_macros::dec;

    use crate::provider::{ProviderStatus, ProviderType};

    use super::*;

    fn provider(name: &str, priority: u32) -> ConversionProvider {
        let now = TimestampMs::now();
        ConversionProvider {
            id: ProviderId::generate(),
            name: name.to_owned(),
            provider_type: ProviderType::Mock,
            priority,
            status: ProviderStatus::Active,
            supports_usdc_to_usd: true,
            supports_usd_to_usdc: true,
            min_conversion_amount: Amount::from_u64(10),
            max_conversion_amount: Amount::from_u64(100_000),
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

    fn today() -> NaiveDate {
        TimestampMs::now().utc_date()
    }

    #[test]
    fn smallest_priority_wins() {
        let providers =
            vec![provider("b", 2), provider("a", 1), provider("c", 3)];
        let selected = select_provider(
            &providers,
            Amount::from_u64(100),
            ConversionDirection::UsdToUsdc,
            dec!(0.5),
            today(),
        )
        .unwrap();
        assert_eq!(selected.name, "a");
    }

    #[test]
    fn ties_break_by_input_order() {
        let providers = vec![provider("first", 1), provider("second", 1)];
        let selected = select_provider(
            &providers,
            Amount::from_u64(100),
            ConversionDirection::UsdcToUsd,
            dec!(0.5),
            today(),
        )
        .unwrap();
        assert_eq!(selected.name, "first");
    }

    #[test]
    fn unhealthy_and_unsupported_filtered() {
        let mut sick = provider("sick", 1);
        sick.failure_count = 10;
        sick.success_count = 1;

        let mut one_way = provider("one-way", 2);
        one_way.supports_usd_to_usdc = false;

        let healthy = provider("healthy", 3);

        let providers = vec![sick, one_way, healthy];
        let selected = select_provider(
            &providers,
            Amount::from_u64(100),
            ConversionDirection::UsdToUsdc,
            dec!(0.5),
            today(),
        )
        .unwrap();
        assert_eq!(selected.name, "healthy");
    }

    #[test]
    fn capacity_filter() {
        let mut exhausted = provider("exhausted", 1);
        exhausted.daily_volume_used = Amount::from_u64(999_950);
        let fresh = provider("fresh", 2);

        let providers = vec![exhausted, fresh];
        let selected = select_provider(
            &providers,
            Amount::from_u64(100),
            ConversionDirection::UsdcToUsd,
            dec!(0.5),
            today(),
        )
        .unwrap();
        assert_eq!(selected.name, "fresh");
    }

    #[test]
    fn no_available_provider() {
        let providers = vec![provider("small", 1)];
        let err = select_provider(
            &providers,
            // Over every provider's max_conversion_amount.
            Amount::from_u64(500_000),
            ConversionDirection::UsdcToUsd,
            dec!(0.5),
            today(),
        )
        .unwrap_err();
        assert_eq!(err.considered, 1);
    }
}
