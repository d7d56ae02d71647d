use std::collections::HashSet;

use async_trait::async_trait;
use chain::{Deposit, DepositStatus, WithdrawalStatus};
use common::{
    amount::Amount, currency::Currency, ids::ConversionJobId,
    store::StoreError, time::TimestampMs,
};
use ledger::{AccountType, EntryType, TxnStatus, TxnType};
use recon::{
    CheckRecord, EntrySums, ReconException, ReconReport, ReconStore,
};
use rust_decimal::Decimal;
use treasury::JobStatus;
use uuid::Uuid;

use crate::MemStore;

impl MemStore {
    /// Entries of committed transactions count; `reversed` transactions
    /// were committed too (their reversal compensates them).
    fn is_counted_status(status: TxnStatus) -> bool {
        matches!(status, TxnStatus::Completed | TxnStatus::Reversed)
    }
}

#[async_trait]
impl ReconStore for MemStore {
    async fn entry_sums_by_currency(
        &self,
    ) -> Result<Vec<EntrySums>, StoreError> {
        let state = self.lock();
        let mut sums: Vec<EntrySums> = Vec::new();

        for txn in state.transactions.values() {
            if !Self::is_counted_status(txn.status) {
                continue;
            }
            // Cross-currency transactions (conversion legs) balance only
            // within their own side; exclude them from the identity.
            let currencies: HashSet<Currency> =
                txn.entries.iter().map(|entry| entry.currency).collect();
            if currencies.len() > 1 {
                continue;
            }
            for entry in &txn.entries {
                let sum = match sums
                    .iter_mut()
                    .find(|sum| sum.currency == entry.currency)
                {
                    Some(sum) => sum,
                    None => {
                        sums.push(EntrySums {
                            currency: entry.currency,
                            total_debits: Decimal::ZERO,
                            total_credits: Decimal::ZERO,
                        });
                        sums.last_mut().unwrap()
                    }
                };
                match entry.entry_type {
                    EntryType::Debit =>
                        sum.total_debits += entry.amount.to_decimal(),
                    EntryType::Credit =>
                        sum.total_credits += entry.amount.to_decimal(),
                }
            }
        }
        Ok(sums)
    }

    async fn count_orphaned_entries(&self) -> Result<u64, StoreError> {
        // Entries live inside their transaction row here, so orphaning is
        // structurally impossible; the SQL store answers with a real scan.
        Ok(0)
    }

    async fn count_underpopulated_transactions(
        &self,
    ) -> Result<u64, StoreError> {
        Ok(self
            .lock()
            .transactions
            .values()
            .filter(|txn| txn.entries.len() < 2)
            .count() as u64)
    }

    async fn sum_system_account_entries(
        &self,
        account_type: AccountType,
        txn_type: TxnType,
        entry_type: EntryType,
    ) -> Result<Amount, StoreError> {
        let state = self.lock();
        let Some(account_id) =
            state.system_account_index.get(&account_type).copied()
        else {
            return Ok(Amount::ZERO);
        };

        let mut total = Decimal::ZERO;
        for txn in state.transactions.values() {
            if txn.txn_type != txn_type
                || !Self::is_counted_status(txn.status)
            {
                continue;
            }
            for entry in &txn.entries {
                if entry.account_id == account_id
                    && entry.entry_type == entry_type
                {
                    total += entry.amount.to_decimal();
                }
            }
        }
        Amount::try_from_decimal(total)
            .map_err(|e| StoreError::unavailable(e.to_string()))
    }

    async fn sum_settled_deposits(&self) -> Result<Amount, StoreError> {
        let total = self
            .lock()
            .deposits
            .values()
            .filter(|deposit| deposit.status.is_settled())
            .map(|deposit| deposit.amount.to_decimal())
            .sum::<Decimal>();
        Amount::try_from_decimal(total)
            .map_err(|e| StoreError::unavailable(e.to_string()))
    }

    async fn sum_completed_withdrawals(&self) -> Result<Amount, StoreError> {
        let total = self
            .lock()
            .withdrawals
            .values()
            .filter(|withdrawal| {
                withdrawal.status == WithdrawalStatus::Completed
            })
            .map(|withdrawal| withdrawal.amount.to_decimal())
            .sum::<Decimal>();
        Amount::try_from_decimal(total)
            .map_err(|e| StoreError::unavailable(e.to_string()))
    }

    async fn completed_jobs_missing_ledger_txn(
        &self,
    ) -> Result<Vec<ConversionJobId>, StoreError> {
        Ok(self
            .lock()
            .jobs
            .values()
            .filter(|job| {
                job.status == JobStatus::Completed
                    && job.ledger_transaction_id.is_none()
            })
            .map(|job| job.id)
            .collect())
    }

    async fn list_stuck_pending_deposits(
        &self,
        older_than: TimestampMs,
    ) -> Result<Vec<Deposit>, StoreError> {
        Ok(self
            .lock()
            .deposits
            .values()
            .filter(|deposit| {
                deposit.status == DepositStatus::Pending
                    && deposit.created_at < older_than
            })
            .cloned()
            .collect())
    }

    async fn save_report(
        &self,
        report: &ReconReport,
    ) -> Result<(), StoreError> {
        self.lock().reports.insert(report.id, report.clone());
        Ok(())
    }

    async fn save_check(
        &self,
        check: &CheckRecord,
    ) -> Result<(), StoreError> {
        self.lock().checks.push(check.clone());
        Ok(())
    }

    async fn save_exception(
        &self,
        exception: &ReconException,
    ) -> Result<(), StoreError> {
        self.lock().exceptions.insert(exception.id, exception.clone());
        Ok(())
    }

    async fn list_unresolved_exceptions(
        &self,
        limit: usize,
    ) -> Result<Vec<ReconException>, StoreError> {
        let mut exceptions: Vec<ReconException> = self
            .lock()
            .exceptions
            .values()
            .filter(|exception| exception.resolved_at.is_none())
            .cloned()
            .collect();
        exceptions.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(a.created_at.cmp(&b.created_at))
        });
        exceptions.truncate(limit);
        Ok(exceptions)
    }

    async fn resolve_exception(
        &self,
        exception_id: Uuid,
        resolved_by: String,
        notes: String,
        now: TimestampMs,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        let exception =
            state.exceptions.get_mut(&exception_id).ok_or_else(|| {
                StoreError::not_found(format!("exception {exception_id}"))
            })?;
        exception.resolved_at = Some(now);
        exception.resolved_by = Some(resolved_by);
        exception.resolution_notes = Some(notes);
        Ok(())
    }
}
