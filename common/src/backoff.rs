//! Retry pacing.
//!
//! Two flavors of the same doubling curve:
//!
//! - [`wait_for_attempt`] is deterministic; used for boot-time dependency
//!   waits (e.g. the store coming up) where predictability beats spread.
//! - [`jittered_backoff`] adds a ±50% random spread; used for funding-queue
//!   retries, where a burst of failures must not produce a synchronized
//!   herd of simultaneous re-attempts.
//!
//! Both take the curve's floor and ceiling from the caller's config rather
//! than baking in module-wide constants; the queue and the boot path want
//! very different scales.

use std::time::Duration;

use rand::Rng;

/// The wait before retry `attempt` (1-indexed): the floor, doubled per
/// prior attempt, clamped to the ceiling.
///
/// `wait_for_attempt(1, f, c) == f`, then `2f`, `4f`, ... up to `c`.
pub fn wait_for_attempt(
    attempt: u32,
    floor: Duration,
    ceiling: Duration,
) -> Duration {
    // Past 32 doublings any realistic floor has hit any realistic ceiling;
    // capping keeps the shift in range.
    let doublings = attempt.saturating_sub(1).min(32);
    let wait_ms = whole_millis(floor)
        .saturating_mul(1u64 << doublings)
        .min(whole_millis(ceiling));
    Duration::from_millis(wait_ms)
}

/// [`wait_for_attempt`], spread uniformly over 50%..150% of the computed
/// wait (never below one millisecond).
pub fn jittered_backoff(
    attempt: u32,
    floor: Duration,
    ceiling: Duration,
) -> Duration {
    let base_ms = whole_millis(wait_for_attempt(attempt, floor, ceiling));
    let low = base_ms / 2;
    let high = base_ms.saturating_add(base_ms / 2).max(1);
    Duration::from_millis(rand::thread_rng().gen_range(low..=high))
}

fn whole_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod test {
    use super::*;

    const FLOOR: Duration = Duration::from_secs(1);
    const CEILING: Duration = Duration::from_secs(60);

    #[test]
    fn first_attempt_waits_the_floor() {
        assert_eq!(wait_for_attempt(1, FLOOR, CEILING), FLOOR);
    }

    #[test]
    fn curve_doubles_then_clamps() {
        assert_eq!(
            wait_for_attempt(2, FLOOR, CEILING),
            Duration::from_secs(2)
        );
        assert_eq!(
            wait_for_attempt(4, FLOOR, CEILING),
            Duration::from_secs(8)
        );
        // 2^6 = 64s would exceed the ceiling.
        assert_eq!(wait_for_attempt(7, FLOOR, CEILING), CEILING);
        assert_eq!(wait_for_attempt(100, FLOOR, CEILING), CEILING);
    }

    #[test]
    fn absurd_attempt_counts_dont_overflow() {
        let wait = wait_for_attempt(u32::MAX, FLOOR, Duration::MAX);
        assert!(wait >= FLOOR);
    }

    #[test]
    fn jitter_stays_in_the_half_band() {
        for attempt in 1..20 {
            let base = wait_for_attempt(attempt, FLOOR, CEILING);
            let jittered = jittered_backoff(attempt, FLOOR, CEILING);
            assert!(jittered >= base / 2);
            assert!(jittered <= base + base / 2);
        }
    }

    #[test]
    fn jitter_bands_eventually_separate() {
        // Attempt 3's band (2s..6s) sits entirely above attempt 1's
        // (0.5s..1.5s), so later attempts always wait longer.
        let early = jittered_backoff(1, FLOOR, CEILING);
        let late = jittered_backoff(3, FLOOR, CEILING);
        assert!(late > early);
    }
}
