use chrono::{Datelike, Duration, NaiveDate};
use common::{amount::Amount, ids::UserId, time::TimestampMs};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The Monday of the week containing `at`, in UTC.
pub fn week_start(at: TimestampMs) -> NaiveDate {
    let date = at.utc_date();
    let days_from_monday = date.weekday().num_days_from_monday();
    date - Duration::days(i64::from(days_from_monday))
}

/// Per-user weekly allocation aggregate, upsert-keyed on
/// `(user_id, week_start)`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct WeeklyAllocationSummary {
    pub id: Uuid,
    pub user_id: UserId,
    pub week_start: NaiveDate,
    pub total_allocated: Amount,
    pub total_spending: Amount,
    pub total_stash: Amount,
    pub deposit_count: u32,
    pub created_at: TimestampMs,
    pub updated_at: TimestampMs,
}

impl WeeklyAllocationSummary {
    /// A fresh zero summary for the week.
    pub fn new(
        user_id: UserId,
        week_start: NaiveDate,
        now: TimestampMs,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            week_start,
            total_allocated: Amount::ZERO,
            total_spending: Amount::ZERO,
            total_stash: Amount::ZERO,
            deposit_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Folds one split into the aggregate.
    pub fn absorb(
        &mut self,
        total: Amount,
        spending: Amount,
        stash: Amount,
        now: TimestampMs,
    ) {
        self.total_allocated = self.total_allocated + total;
        self.total_spending = self.total_spending + spending;
        self.total_stash = self.total_stash + stash;
        self.deposit_count += 1;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn week_start_is_monday() {
        // 2026-07-29 is a Wednesday; its week starts Monday 2026-07-27.
        let wednesday = NaiveDate::from_ymd_opt(2026, 7, 29).unwrap();
        let millis = wednesday
            .and_hms_opt(15, 30, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis();
        let at = TimestampMs::try_from_i64(millis).unwrap();
        assert_eq!(
            week_start(at),
            NaiveDate::from_ymd_opt(2026, 7, 27).unwrap()
        );
    }

    #[test]
    fn monday_is_its_own_week_start() {
        let monday = NaiveDate::from_ymd_opt(2026, 7, 27).unwrap();
        let millis =
            monday.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp_millis();
        let at = TimestampMs::try_from_i64(millis).unwrap();
        assert_eq!(week_start(at), monday);
    }
}
