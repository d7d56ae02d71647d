use async_trait::async_trait;
use chain::Deposit;
use common::{
    amount::Amount, ids::ConversionJobId, store::StoreError,
    time::TimestampMs,
};
use ledger::{AccountType, EntryType, TxnType};
use recon::{
    CheckRecord, EntrySums, ReconException, ReconReport, ReconStore,
};
use rust_decimal::Decimal;
use sqlx::{postgres::PgRow, Row};
use uuid::Uuid;

use crate::{
    amount, map_sqlx_err, opt_timestamp, parse_enum, parse_from_str,
    timestamp, PgStore,
};

fn exception_from_row(row: &PgRow) -> Result<ReconException, StoreError> {
    let severity_raw: String =
        row.try_get("severity").map_err(map_sqlx_err)?;
    let check_type_raw: String =
        row.try_get("check_type").map_err(map_sqlx_err)?;
    let currency_raw: Option<String> =
        row.try_get("currency").map_err(map_sqlx_err)?;
    Ok(ReconException {
        id: row.try_get("id").map_err(map_sqlx_err)?,
        report_id: common::ids::ReportId::from_uuid(
            row.try_get("report_id").map_err(map_sqlx_err)?,
        ),
        severity: parse_enum(&severity_raw)?,
        check_type: parse_enum(&check_type_raw)?,
        description: row.try_get("description").map_err(map_sqlx_err)?,
        expected: row.try_get("expected").map_err(map_sqlx_err)?,
        actual: row.try_get("actual").map_err(map_sqlx_err)?,
        difference: row.try_get("difference").map_err(map_sqlx_err)?,
        currency: currency_raw
            .as_deref()
            .map(parse_from_str)
            .transpose()?,
        affected_user: row
            .try_get::<Option<Uuid>, _>("affected_user")
            .map_err(map_sqlx_err)?
            .map(common::ids::UserId::from_uuid),
        affected_entity: row
            .try_get("affected_entity")
            .map_err(map_sqlx_err)?,
        auto_corrected: row.try_get("auto_corrected").map_err(map_sqlx_err)?,
        correction_action: row
            .try_get("correction_action")
            .map_err(map_sqlx_err)?,
        resolved_at: opt_timestamp(
            row.try_get("resolved_at").map_err(map_sqlx_err)?,
        )?,
        resolved_by: row.try_get("resolved_by").map_err(map_sqlx_err)?,
        resolution_notes: row
            .try_get("resolution_notes")
            .map_err(map_sqlx_err)?,
        created_at: timestamp(
            row.try_get("created_at").map_err(map_sqlx_err)?,
        )?,
    })
}

#[async_trait]
impl ReconStore for PgStore {
    async fn entry_sums_by_currency(
        &self,
    ) -> Result<Vec<EntrySums>, StoreError> {
        // Transactions that touch more than one currency (conversion legs)
        // are excluded from the identity.
        sqlx::query(
            "WITH counted AS ( \
                 SELECT t.id FROM ledger_transactions t \
                 JOIN ledger_entries e ON e.transaction_id = t.id \
                 WHERE t.status IN ('completed', 'reversed') \
                 GROUP BY t.id \
                 HAVING COUNT(DISTINCT e.currency) = 1) \
             SELECT e.currency, \
                 COALESCE(SUM(e.amount) \
                     FILTER (WHERE e.entry_type = 'debit'), 0) AS debits, \
                 COALESCE(SUM(e.amount) \
                     FILTER (WHERE e.entry_type = 'credit'), 0) AS credits \
             FROM ledger_entries e \
             JOIN counted c ON c.id = e.transaction_id \
             GROUP BY e.currency",
        )
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_err)?
        .iter()
        .map(|row| {
            let currency_raw: String =
                row.try_get("currency").map_err(map_sqlx_err)?;
            Ok(EntrySums {
                currency: parse_from_str(&currency_raw)?,
                total_debits: row
                    .try_get::<Decimal, _>("debits")
                    .map_err(map_sqlx_err)?,
                total_credits: row
                    .try_get::<Decimal, _>("credits")
                    .map_err(map_sqlx_err)?,
            })
        })
        .collect()
    }

    async fn count_orphaned_entries(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query(
            "SELECT COUNT(*) AS n FROM ledger_entries e \
             LEFT JOIN ledger_transactions t ON t.id = e.transaction_id \
             WHERE t.id IS NULL",
        )
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_err)?
        .try_get("n")
        .map_err(map_sqlx_err)?;
        Ok(count as u64)
    }

    async fn count_underpopulated_transactions(
        &self,
    ) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query(
            "SELECT COUNT(*) AS n FROM ( \
                 SELECT t.id FROM ledger_transactions t \
                 LEFT JOIN ledger_entries e ON e.transaction_id = t.id \
                 GROUP BY t.id \
                 HAVING COUNT(e.id) < 2) sub",
        )
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_err)?
        .try_get("n")
        .map_err(map_sqlx_err)?;
        Ok(count as u64)
    }

    async fn sum_system_account_entries(
        &self,
        account_type: AccountType,
        txn_type: TxnType,
        entry_type: EntryType,
    ) -> Result<Amount, StoreError> {
        let total: Decimal = sqlx::query(
            "SELECT COALESCE(SUM(e.amount), 0) AS total \
             FROM ledger_entries e \
             JOIN ledger_transactions t ON t.id = e.transaction_id \
             JOIN ledger_accounts a ON a.id = e.account_id \
             WHERE a.user_id IS NULL AND a.account_type = $1 \
               AND t.txn_type = $2 AND e.entry_type = $3 \
               AND t.status IN ('completed', 'reversed')",
        )
        .bind(account_type.as_str())
        .bind(txn_type.as_str())
        .bind(entry_type.as_str())
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_err)?
        .try_get("total")
        .map_err(map_sqlx_err)?;
        amount(total)
    }

    async fn sum_settled_deposits(&self) -> Result<Amount, StoreError> {
        let total: Decimal = sqlx::query(
            "SELECT COALESCE(SUM(amount), 0) AS total FROM deposits \
             WHERE status IN ('confirmed', 'reconciled')",
        )
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_err)?
        .try_get("total")
        .map_err(map_sqlx_err)?;
        amount(total)
    }

    async fn sum_completed_withdrawals(&self) -> Result<Amount, StoreError> {
        let total: Decimal = sqlx::query(
            "SELECT COALESCE(SUM(amount), 0) AS total FROM withdrawals \
             WHERE status = 'completed'",
        )
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_err)?
        .try_get("total")
        .map_err(map_sqlx_err)?;
        amount(total)
    }

    async fn completed_jobs_missing_ledger_txn(
        &self,
    ) -> Result<Vec<ConversionJobId>, StoreError> {
        sqlx::query(
            "SELECT id FROM conversion_jobs \
             WHERE status = 'completed' AND ledger_transaction_id IS NULL",
        )
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_err)?
        .iter()
        .map(|row| {
            Ok(ConversionJobId::from_uuid(
                row.try_get("id").map_err(map_sqlx_err)?,
            ))
        })
        .collect()
    }

    async fn list_stuck_pending_deposits(
        &self,
        older_than: TimestampMs,
    ) -> Result<Vec<Deposit>, StoreError> {
        use chain::ChainStore;
        self.list_stale_pending_deposits(older_than).await
    }

    async fn save_report(
        &self,
        report: &ReconReport,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO reconciliation_reports \
             (id, status, started_at, completed_at, total_checks, passed, \
              failed, exceptions_count) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (id) DO UPDATE SET \
                 status = EXCLUDED.status, \
                 completed_at = EXCLUDED.completed_at, \
                 total_checks = EXCLUDED.total_checks, \
                 passed = EXCLUDED.passed, \
                 failed = EXCLUDED.failed, \
                 exceptions_count = EXCLUDED.exceptions_count",
        )
        .bind(report.id.as_uuid())
        .bind(match report.status {
            recon::ReportStatus::Running => "running",
            recon::ReportStatus::Completed => "completed",
            recon::ReportStatus::Failed => "failed",
        })
        .bind(report.started_at.as_i64())
        .bind(report.completed_at.map(|at| at.as_i64()))
        .bind(report.total_checks as i32)
        .bind(report.passed as i32)
        .bind(report.failed as i32)
        .bind(report.exceptions_count as i32)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn save_check(
        &self,
        check: &CheckRecord,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO reconciliation_checks \
             (id, report_id, check_type, passed, description, expected, \
              actual, difference, currency, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(check.id)
        .bind(check.report_id.as_uuid())
        .bind(check.check_type.as_str())
        .bind(check.passed)
        .bind(&check.description)
        .bind(check.expected)
        .bind(check.actual)
        .bind(check.difference)
        .bind(check.currency.map(|currency| currency.as_str()))
        .bind(check.created_at.as_i64())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn save_exception(
        &self,
        exception: &ReconException,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO reconciliation_exceptions \
             (id, report_id, severity, check_type, description, expected, \
              actual, difference, currency, affected_user, affected_entity, \
              auto_corrected, correction_action, resolved_at, resolved_by, \
              resolution_notes, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, \
                     $13, $14, $15, $16, $17)",
        )
        .bind(exception.id)
        .bind(exception.report_id.as_uuid())
        .bind(match exception.severity {
            recon::Severity::Info => "info",
            recon::Severity::Warning => "warning",
            recon::Severity::Critical => "critical",
        })
        .bind(exception.check_type.as_str())
        .bind(&exception.description)
        .bind(exception.expected)
        .bind(exception.actual)
        .bind(exception.difference)
        .bind(exception.currency.map(|currency| currency.as_str()))
        .bind(exception.affected_user.map(|id| *id.as_uuid()))
        .bind(exception.affected_entity.as_deref())
        .bind(exception.auto_corrected)
        .bind(exception.correction_action.as_deref())
        .bind(exception.resolved_at.map(|at| at.as_i64()))
        .bind(exception.resolved_by.as_deref())
        .bind(exception.resolution_notes.as_deref())
        .bind(exception.created_at.as_i64())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn list_unresolved_exceptions(
        &self,
        limit: usize,
    ) -> Result<Vec<ReconException>, StoreError> {
        sqlx::query(
            "SELECT * FROM reconciliation_exceptions \
             WHERE resolved_at IS NULL \
             ORDER BY CASE severity \
                 WHEN 'critical' THEN 0 \
                 WHEN 'warning' THEN 1 \
                 ELSE 2 END, \
                 created_at \
             LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_err)?
        .iter()
        .map(exception_from_row)
        .collect()
    }

    async fn resolve_exception(
        &self,
        exception_id: Uuid,
        resolved_by: String,
        notes: String,
        now: TimestampMs,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            "UPDATE reconciliation_exceptions \
             SET resolved_at = $2, resolved_by = $3, resolution_notes = $4 \
             WHERE id = $1",
        )
        .bind(exception_id)
        .bind(now.as_i64())
        .bind(&resolved_by)
        .bind(&notes)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_err)?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::not_found(format!(
                "exception {exception_id}"
            )));
        }
        Ok(())
    }
}
