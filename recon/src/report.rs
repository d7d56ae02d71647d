use std::fmt;

use common::{
    currency::Currency,
    ids::{ReportId, UserId},
    time::TimestampMs,
};
#[cfg(any(test, feature = "test-utils"))]
use proptest_derive::Arbitrary;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The checks a reconciliation run performs, in execution order.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(any(test, feature = "test-utils"), derive(Arbitrary))]
#[cfg_attr(test, derive(strum::VariantArray))]
pub enum CheckType {
    /// Per-currency Σdebits = Σcredits over completed entries.
    LedgerBalance,
    /// Every entry points at an existing transaction.
    OrphanedEntries,
    /// Every transaction carries at least two entries.
    EntryCount,
    /// Ledger deposit inflows match settled on-chain deposit rows.
    DepositTotals,
    /// Ledger withdrawal outflows match completed withdrawal rows.
    WithdrawalTotals,
    /// Every completed conversion job links its ledger transaction.
    ConversionCompletion,
    /// Ledger buffer vs custodian holdings.
    BufferDiscrepancy,
    /// Deposits stuck in `pending` past the threshold.
    StuckDeposits,
}

impl CheckType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LedgerBalance => "ledger_balance",
            Self::OrphanedEntries => "orphaned_entries",
            Self::EntryCount => "entry_count",
            Self::DepositTotals => "deposit_totals",
            Self::WithdrawalTotals => "withdrawal_totals",
            Self::ConversionCompletion => "conversion_completion",
            Self::BufferDiscrepancy => "buffer_discrepancy",
            Self::StuckDeposits => "stuck_deposits",
        }
    }
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How urgently an exception needs eyes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(any(test, feature = "test-utils"), derive(Arbitrary))]
#[cfg_attr(test, derive(strum::VariantArray))]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Report lifecycle. `completed` means every check finished, regardless of
/// how many passed.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(any(test, feature = "test-utils"), derive(Arbitrary))]
#[cfg_attr(test, derive(strum::VariantArray))]
pub enum ReportStatus {
    Running,
    Completed,
    /// One or more checks could not run to completion.
    Failed,
}

/// The outcome of one check within a run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckRecord {
    pub id: Uuid,
    pub report_id: ReportId,
    pub check_type: CheckType,
    pub passed: bool,
    pub description: String,
    pub expected: Option<Decimal>,
    pub actual: Option<Decimal>,
    pub difference: Option<Decimal>,
    pub currency: Option<Currency>,
    pub created_at: TimestampMs,
}

impl CheckRecord {
    pub fn passed(
        report_id: ReportId,
        check_type: CheckType,
        description: impl Into<String>,
        now: TimestampMs,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            report_id,
            check_type,
            passed: true,
            description: description.into(),
            expected: None,
            actual: None,
            difference: None,
            currency: None,
            created_at: now,
        }
    }

    pub fn failed(
        report_id: ReportId,
        check_type: CheckType,
        description: impl Into<String>,
        expected: Decimal,
        actual: Decimal,
        currency: Option<Currency>,
        now: TimestampMs,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            report_id,
            check_type,
            passed: false,
            description: description.into(),
            expected: Some(expected),
            actual: Some(actual),
            difference: Some(actual - expected),
            currency,
            created_at: now,
        }
    }
}

/// An exception for an operator, with room to record its resolution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconException {
    pub id: Uuid,
    pub report_id: ReportId,
    pub severity: Severity,
    pub check_type: CheckType,
    pub description: String,
    pub expected: Option<Decimal>,
    pub actual: Option<Decimal>,
    pub difference: Option<Decimal>,
    pub currency: Option<Currency>,
    pub affected_user: Option<UserId>,
    /// Free-form entity pointer ("deposit 0xAAA", "job <uuid>").
    pub affected_entity: Option<String>,
    pub auto_corrected: bool,
    pub correction_action: Option<String>,
    pub resolved_at: Option<TimestampMs>,
    pub resolved_by: Option<String>,
    pub resolution_notes: Option<String>,
    pub created_at: TimestampMs,
}

/// One reconciliation run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconReport {
    pub id: ReportId,
    pub status: ReportStatus,
    pub started_at: TimestampMs,
    pub completed_at: Option<TimestampMs>,
    pub total_checks: u32,
    pub passed: u32,
    pub failed: u32,
    pub exceptions_count: u32,
}

impl ReconReport {
    pub fn begin(now: TimestampMs) -> Self {
        Self {
            id: ReportId::generate(),
            status: ReportStatus::Running,
            started_at: now,
            completed_at: None,
            total_checks: 0,
            passed: 0,
            failed: 0,
            exceptions_count: 0,
        }
    }
}

#[cfg(test)]
mod test {
    use common::test_utils::roundtrip;

    use super::*;

    #[test]
    fn check_type_json_backwards_compat() {
        let expected_ser = r#"["ledger_balance","orphaned_entries","entry_count","deposit_totals","withdrawal_totals","conversion_completion","buffer_discrepancy","stuck_deposits"]"#;
        roundtrip::json_unit_enum_backwards_compat::<CheckType>(expected_ser);
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Critical);
    }

    #[test]
    fn failed_check_computes_difference() {
        use rust_decimal_macros::dec;
        let record = CheckRecord::failed(
            ReportId::generate(),
            CheckType::DepositTotals,
            "mismatch",
            dec!(100),
            dec!(90),
            Some(Currency::Usdc),
            TimestampMs::now(),
        );
        assert_eq!(record.difference, Some(dec!(-10)));
    }
}
