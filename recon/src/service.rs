use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use common::{ids::ReportId, time::TimestampMs};
use ledger::{AccountType, EntryType, TxnType};
use rust_decimal::Decimal;
use tracing::{error, info, instrument, warn};

use crate::{
    report::{
        CheckRecord, CheckType, ReconException, ReconReport, ReportStatus,
        Severity,
    },
    store::ReconStore,
};

/// Supplies the ledger-vs-custodian buffer comparison (check 7). The chain
/// engine is the production implementation.
#[async_trait]
pub trait BufferProbe: Send + Sync + 'static {
    async fn observe(&self) -> anyhow::Result<chain::BufferStatus>;
}

#[async_trait]
impl<L, S, A, C> BufferProbe for chain::ChainEngine<L, S, A, C>
where
    L: ledger::LedgerStore,
    S: chain::ChainStore,
    A: allocation::AllocationStore,
    C: chain::CustodianApi,
{
    async fn observe(&self) -> anyhow::Result<chain::BufferStatus> {
        Ok(self.check_system_buffer_level().await?)
    }
}

/// Reconciliation options.
#[derive(Clone, Debug)]
pub struct ReconConfig {
    /// Deposits `pending` longer than this are reported as exceptions.
    pub stuck_deposit_threshold: Duration,
    /// Absolute tolerance for aggregate balance comparisons.
    pub balance_epsilon: Decimal,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            stuck_deposit_threshold: Duration::from_secs(60 * 60),
            balance_epsilon: Decimal::ZERO,
        }
    }
}

/// Runs the reconciliation checks and persists the report.
pub struct ReconService<R, P> {
    store: Arc<R>,
    buffer_probe: P,
    config: ReconConfig,
}

impl<R: ReconStore, P: BufferProbe> ReconService<R, P> {
    pub fn new(store: Arc<R>, buffer_probe: P, config: ReconConfig) -> Self {
        Self {
            store,
            buffer_probe,
            config,
        }
    }

    /// One full reconciliation run. Check failures don't abort the run;
    /// only a check that cannot execute (store trouble) marks the report
    /// `failed`.
    #[instrument(skip_all, name = "(recon-run)")]
    pub async fn run(&self) -> anyhow::Result<ReconReport> {
        let now = TimestampMs::now();
        let mut report = ReconReport::begin(now);
        self.store.save_report(&report).await?;

        let mut every_check_ran = true;
        for check_type in [
            CheckType::LedgerBalance,
            CheckType::OrphanedEntries,
            CheckType::EntryCount,
            CheckType::DepositTotals,
            CheckType::WithdrawalTotals,
            CheckType::ConversionCompletion,
            CheckType::BufferDiscrepancy,
            CheckType::StuckDeposits,
        ] {
            match self.run_check(report.id, check_type).await {
                Ok((record, exceptions)) => {
                    report.total_checks += 1;
                    if record.passed {
                        report.passed += 1;
                    } else {
                        report.failed += 1;
                    }
                    self.store.save_check(&record).await?;
                    for exception in &exceptions {
                        self.store.save_exception(exception).await?;
                    }
                    report.exceptions_count += exceptions.len() as u32;
                }
                Err(e) => {
                    every_check_ran = false;
                    error!("Check {check_type} could not run: {e:#}");
                }
            }
        }

        report.status = if every_check_ran {
            ReportStatus::Completed
        } else {
            ReportStatus::Failed
        };
        report.completed_at = Some(TimestampMs::now());
        self.store.save_report(&report).await?;

        info!(
            "Reconciliation {}: {}/{} checks passed, {} exceptions",
            report.status_str(),
            report.passed,
            report.total_checks,
            report.exceptions_count,
        );
        Ok(report)
    }

    async fn run_check(
        &self,
        report_id: ReportId,
        check_type: CheckType,
    ) -> anyhow::Result<(CheckRecord, Vec<ReconException>)> {
        match check_type {
            CheckType::LedgerBalance => self.check_ledger_balance(report_id).await,
            CheckType::OrphanedEntries =>
                self.check_orphaned_entries(report_id).await,
            CheckType::EntryCount => self.check_entry_count(report_id).await,
            CheckType::DepositTotals =>
                self.check_deposit_totals(report_id).await,
            CheckType::WithdrawalTotals =>
                self.check_withdrawal_totals(report_id).await,
            CheckType::ConversionCompletion =>
                self.check_conversion_completion(report_id).await,
            CheckType::BufferDiscrepancy =>
                self.check_buffer_discrepancy(report_id).await,
            CheckType::StuckDeposits =>
                self.check_stuck_deposits(report_id).await,
        }
    }

    /// Check 1: per-currency Σdebits = Σcredits across completed entries.
    async fn check_ledger_balance(
        &self,
        report_id: ReportId,
    ) -> anyhow::Result<(CheckRecord, Vec<ReconException>)> {
        let now = TimestampMs::now();
        let sums = self.store.entry_sums_by_currency().await?;

        let mut exceptions = Vec::new();
        let mut first_mismatch = None;
        for sum in &sums {
            let difference = sum.total_debits - sum.total_credits;
            if difference.abs() > self.config.balance_epsilon {
                warn!(
                    "Ledger unbalanced in {}: debits {} vs credits {}",
                    sum.currency, sum.total_debits, sum.total_credits
                );
                first_mismatch.get_or_insert((sum.currency, difference));
                exceptions.push(self.exception(
                    report_id,
                    Severity::Critical,
                    CheckType::LedgerBalance,
                    format!(
                        "Ledger debits and credits diverge by {difference} \
                         in {}",
                        sum.currency
                    ),
                    Some(sum.total_credits),
                    Some(sum.total_debits),
                    Some(sum.currency),
                    now,
                ));
            }
        }

        let record = match first_mismatch {
            None => CheckRecord::passed(
                report_id,
                CheckType::LedgerBalance,
                "All currencies balance",
                now,
            ),
            Some((currency, difference)) => CheckRecord::failed(
                report_id,
                CheckType::LedgerBalance,
                format!("Debits and credits diverge in {currency}"),
                Decimal::ZERO,
                difference,
                Some(currency),
                now,
            ),
        };
        Ok((record, exceptions))
    }

    /// Check 2: no entry may point at a missing transaction.
    async fn check_orphaned_entries(
        &self,
        report_id: ReportId,
    ) -> anyhow::Result<(CheckRecord, Vec<ReconException>)> {
        let now = TimestampMs::now();
        let orphans = self.store.count_orphaned_entries().await?;
        if orphans == 0 {
            return Ok((
                CheckRecord::passed(
                    report_id,
                    CheckType::OrphanedEntries,
                    "No orphaned entries",
                    now,
                ),
                Vec::new(),
            ));
        }
        let exception = self.exception(
            report_id,
            Severity::Critical,
            CheckType::OrphanedEntries,
            format!("{orphans} entries reference missing transactions"),
            Some(Decimal::ZERO),
            Some(Decimal::from(orphans)),
            None,
            now,
        );
        Ok((
            CheckRecord::failed(
                report_id,
                CheckType::OrphanedEntries,
                "Orphaned entries found",
                Decimal::ZERO,
                Decimal::from(orphans),
                None,
                now,
            ),
            vec![exception],
        ))
    }

    /// Check 3: every transaction has at least two entries.
    async fn check_entry_count(
        &self,
        report_id: ReportId,
    ) -> anyhow::Result<(CheckRecord, Vec<ReconException>)> {
        let now = TimestampMs::now();
        let underpopulated =
            self.store.count_underpopulated_transactions().await?;
        if underpopulated == 0 {
            return Ok((
                CheckRecord::passed(
                    report_id,
                    CheckType::EntryCount,
                    "All transactions carry two or more entries",
                    now,
                ),
                Vec::new(),
            ));
        }
        let exception = self.exception(
            report_id,
            Severity::Critical,
            CheckType::EntryCount,
            format!("{underpopulated} transactions have fewer than 2 entries"),
            Some(Decimal::ZERO),
            Some(Decimal::from(underpopulated)),
            None,
            now,
        );
        Ok((
            CheckRecord::failed(
                report_id,
                CheckType::EntryCount,
                "Underpopulated transactions found",
                Decimal::ZERO,
                Decimal::from(underpopulated),
                None,
                now,
            ),
            vec![exception],
        ))
    }

    /// Check 4: deposit credits into the USDC buffer match settled on-chain
    /// deposits.
    async fn check_deposit_totals(
        &self,
        report_id: ReportId,
    ) -> anyhow::Result<(CheckRecord, Vec<ReconException>)> {
        let now = TimestampMs::now();
        let ledger_total = self
            .store
            .sum_system_account_entries(
                AccountType::SystemBufferUsdc,
                TxnType::Deposit,
                EntryType::Credit,
            )
            .await?;
        let chain_total = self.store.sum_settled_deposits().await?;
        self.totals_check(
            report_id,
            CheckType::DepositTotals,
            "ledger deposit inflows",
            chain_total.to_decimal(),
            ledger_total.to_decimal(),
            now,
        )
    }

    /// Check 5: withdrawal debits on the USDC buffer match completed
    /// withdrawal rows.
    async fn check_withdrawal_totals(
        &self,
        report_id: ReportId,
    ) -> anyhow::Result<(CheckRecord, Vec<ReconException>)> {
        let now = TimestampMs::now();
        let ledger_total = self
            .store
            .sum_system_account_entries(
                AccountType::SystemBufferUsdc,
                TxnType::Withdrawal,
                EntryType::Debit,
            )
            .await?;
        let chain_total = self.store.sum_completed_withdrawals().await?;
        self.totals_check(
            report_id,
            CheckType::WithdrawalTotals,
            "ledger withdrawal outflows",
            chain_total.to_decimal(),
            ledger_total.to_decimal(),
            now,
        )
    }

    fn totals_check(
        &self,
        report_id: ReportId,
        check_type: CheckType,
        what: &str,
        expected: Decimal,
        actual: Decimal,
        now: TimestampMs,
    ) -> anyhow::Result<(CheckRecord, Vec<ReconException>)> {
        let difference = actual - expected;
        if difference.abs() <= self.config.balance_epsilon {
            return Ok((
                CheckRecord::passed(
                    report_id,
                    check_type,
                    format!("{what} match: {actual}"),
                    now,
                ),
                Vec::new(),
            ));
        }
        let exception = self.exception(
            report_id,
            Severity::Critical,
            check_type,
            format!(
                "{what} diverge from chain records by {difference} \
                 (ledger {actual}, chain {expected})"
            ),
            Some(expected),
            Some(actual),
            Some(common::currency::Currency::Usdc),
            now,
        );
        Ok((
            CheckRecord::failed(
                report_id,
                check_type,
                format!("{what} diverge from chain records"),
                expected,
                actual,
                Some(common::currency::Currency::Usdc),
                now,
            ),
            vec![exception],
        ))
    }

    /// Check 6: no completed conversion job without its ledger transaction.
    async fn check_conversion_completion(
        &self,
        report_id: ReportId,
    ) -> anyhow::Result<(CheckRecord, Vec<ReconException>)> {
        let now = TimestampMs::now();
        let missing = self.store.completed_jobs_missing_ledger_txn().await?;
        if missing.is_empty() {
            return Ok((
                CheckRecord::passed(
                    report_id,
                    CheckType::ConversionCompletion,
                    "All completed jobs link their ledger transaction",
                    now,
                ),
                Vec::new(),
            ));
        }
        let exceptions = missing
            .iter()
            .map(|job_id| {
                let mut exception = self.exception(
                    report_id,
                    Severity::Critical,
                    CheckType::ConversionCompletion,
                    format!(
                        "Conversion job {job_id} is completed but has no \
                         ledger transaction"
                    ),
                    None,
                    None,
                    None,
                    now,
                );
                exception.affected_entity =
                    Some(format!("conversion_job {job_id}"));
                exception
            })
            .collect::<Vec<_>>();
        Ok((
            CheckRecord::failed(
                report_id,
                CheckType::ConversionCompletion,
                "Completed jobs missing ledger transactions",
                Decimal::ZERO,
                Decimal::from(missing.len() as u64),
                None,
                now,
            ),
            exceptions,
        ))
    }

    /// Check 7: ledger buffer vs custodian holdings.
    async fn check_buffer_discrepancy(
        &self,
        report_id: ReportId,
    ) -> anyhow::Result<(CheckRecord, Vec<ReconException>)> {
        let now = TimestampMs::now();
        let status = self.buffer_probe.observe().await?;

        if status.is_healthy {
            return Ok((
                CheckRecord::passed(
                    report_id,
                    CheckType::BufferDiscrepancy,
                    format!(
                        "Ledger {} vs custodian {}",
                        status.ledger_balance, status.actual_balance
                    ),
                    now,
                ),
                Vec::new(),
            ));
        }

        let severity = if status.actual_balance < status.threshold {
            Severity::Critical
        } else {
            Severity::Warning
        };
        let exception = self.exception(
            report_id,
            severity,
            CheckType::BufferDiscrepancy,
            format!(
                "Buffer unhealthy: ledger {}, custodian {} \
                 (discrepancy {})",
                status.ledger_balance,
                status.actual_balance,
                status.discrepancy
            ),
            Some(status.ledger_balance.to_decimal()),
            Some(status.actual_balance.to_decimal()),
            Some(common::currency::Currency::Usdc),
            now,
        );
        Ok((
            CheckRecord::failed(
                report_id,
                CheckType::BufferDiscrepancy,
                "Buffer discrepancy or shortfall",
                status.ledger_balance.to_decimal(),
                status.actual_balance.to_decimal(),
                Some(common::currency::Currency::Usdc),
                now,
            ),
            vec![exception],
        ))
    }

    /// Check 8: deposits stuck in `pending`. These are warnings, not
    /// balance errors: the ledger may well be correct already.
    async fn check_stuck_deposits(
        &self,
        report_id: ReportId,
    ) -> anyhow::Result<(CheckRecord, Vec<ReconException>)> {
        let now = TimestampMs::now();
        let older_than =
            now.saturating_sub(self.config.stuck_deposit_threshold);
        let stuck = self.store.list_stuck_pending_deposits(older_than).await?;

        if stuck.is_empty() {
            return Ok((
                CheckRecord::passed(
                    report_id,
                    CheckType::StuckDeposits,
                    "No deposits stuck in pending",
                    now,
                ),
                Vec::new(),
            ));
        }
        let exceptions = stuck
            .iter()
            .map(|deposit| {
                let mut exception = self.exception(
                    report_id,
                    Severity::Warning,
                    CheckType::StuckDeposits,
                    format!(
                        "Deposit {} pending since {}",
                        deposit.tx_hash,
                        deposit.created_at.as_i64()
                    ),
                    None,
                    Some(deposit.amount.to_decimal()),
                    Some(common::currency::Currency::Usdc),
                    now,
                );
                exception.affected_user = Some(deposit.user_id);
                exception.affected_entity =
                    Some(format!("deposit {}", deposit.tx_hash));
                exception
            })
            .collect::<Vec<_>>();
        Ok((
            CheckRecord::failed(
                report_id,
                CheckType::StuckDeposits,
                format!("{} deposits stuck in pending", stuck.len()),
                Decimal::ZERO,
                Decimal::from(stuck.len() as u64),
                None,
                now,
            ),
            exceptions,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn exception(
        &self,
        report_id: ReportId,
        severity: Severity,
        check_type: CheckType,
        description: String,
        expected: Option<Decimal>,
        actual: Option<Decimal>,
        currency: Option<common::currency::Currency>,
        now: TimestampMs,
    ) -> ReconException {
        ReconException {
            id: uuid::Uuid::new_v4(),
            report_id,
            severity,
            check_type,
            description,
            expected,
            actual,
            difference: match (expected, actual) {
                (Some(expected), Some(actual)) => Some(actual - expected),
                _ => None,
            },
            currency,
            affected_user: None,
            affected_entity: None,
            auto_corrected: false,
            correction_action: None,
            resolved_at: None,
            resolved_by: None,
            resolution_notes: None,
            created_at: now,
        }
    }
}

impl ReconReport {
    fn status_str(&self) -> &'static str {
        match self.status {
            ReportStatus::Running => "running",
            ReportStatus::Completed => "completed",
            ReportStatus::Failed => "failed",
        }
    }
}
