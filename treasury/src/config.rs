use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Treasury engine + scheduler options.
#[derive(Clone, Debug)]
pub struct TreasuryConfig {
    /// How often the settlement loop runs.
    pub scheduler_interval: Duration,
    /// Non-emergency replenishment jobs are scheduled this far in the
    /// future so several small shortfalls can coalesce into one conversion.
    /// Emergencies skip the window.
    pub batch_window: Duration,
    /// Default retry budget stamped onto new conversion jobs.
    pub max_retries: u32,
    /// Multiplier applied to the re-execution delay after each retry.
    pub retry_backoff_multiplier: Decimal,
    /// How often the monitor loop polls provider-side job status.
    pub health_check_interval: Duration,
    /// A submitted job older than this is considered stale and re-checked.
    pub conversion_timeout: Duration,
    /// When false, only `critical_low` buffers are replenished; routine
    /// below-target top-ups are left to an operator.
    pub enable_auto_rebalance: bool,
    /// Scales the `min` threshold when classifying `critical_low`; 1 means
    /// "critical below min" exactly.
    pub emergency_threshold_ratio: Decimal,
    /// A provider whose failure ratio exceeds this is unhealthy.
    pub provider_failure_threshold: Decimal,
    /// Deadline for one settlement cycle.
    pub settlement_cycle_timeout: Duration,
    /// Deadline for one monitor pass.
    pub monitor_cycle_timeout: Duration,
    /// How long `stop()` waits for the loops to drain.
    pub stop_timeout: Duration,
}

impl Default for TreasuryConfig {
    fn default() -> Self {
        Self {
            scheduler_interval: Duration::from_secs(60),
            batch_window: Duration::ZERO,
            max_retries: 3,
            retry_backoff_multiplier: dec!(2),
            health_check_interval: Duration::from_secs(30),
            conversion_timeout: Duration::from_secs(10 * 60),
            enable_auto_rebalance: true,
            emergency_threshold_ratio: dec!(1),
            provider_failure_threshold: dec!(0.5),
            settlement_cycle_timeout: Duration::from_secs(5 * 60),
            monitor_cycle_timeout: Duration::from_secs(2 * 60),
            stop_timeout: Duration::from_secs(30),
        }
    }
}
