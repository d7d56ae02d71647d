use async_trait::async_trait;
use chain::Deposit;
use common::{
    amount::Amount, currency::Currency, ids::ConversionJobId,
    store::StoreError, time::TimestampMs,
};
use ledger::{AccountType, EntryType, TxnType};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::report::{CheckRecord, ReconException, ReconReport};

/// Per-currency debit/credit totals over completed entries.
#[derive(Clone, Debug)]
pub struct EntrySums {
    pub currency: Currency,
    pub total_debits: Decimal,
    pub total_credits: Decimal,
}

/// The reconciliation seam: read-only aggregate queries over the other
/// subsystems' state, plus persistence for reports, checks and exceptions.
#[async_trait]
pub trait ReconStore: Send + Sync + 'static {
    // --- Aggregate queries --- //

    /// Debit/credit totals per currency over completed entries, excluding
    /// transactions that touch more than one currency (conversion legs
    /// balance per currency only within their own side).
    async fn entry_sums_by_currency(
        &self,
    ) -> Result<Vec<EntrySums>, StoreError>;

    /// Entries whose transaction row does not exist.
    async fn count_orphaned_entries(&self) -> Result<u64, StoreError>;

    /// Transactions carrying fewer than two entries.
    async fn count_underpopulated_transactions(
        &self,
    ) -> Result<u64, StoreError>;

    /// Sum of entries of the given type, posted by transactions of the
    /// given type, against the given system account.
    async fn sum_system_account_entries(
        &self,
        account_type: AccountType,
        txn_type: TxnType,
        entry_type: EntryType,
    ) -> Result<Amount, StoreError>;

    /// Sum of on-chain deposit rows in `confirmed` or `reconciled` state.
    async fn sum_settled_deposits(&self) -> Result<Amount, StoreError>;

    /// Sum of withdrawal rows in `completed` state.
    async fn sum_completed_withdrawals(&self) -> Result<Amount, StoreError>;

    /// Conversion jobs marked `completed` without a linked ledger
    /// transaction.
    async fn completed_jobs_missing_ledger_txn(
        &self,
    ) -> Result<Vec<ConversionJobId>, StoreError>;

    /// Deposits still `pending` since before `older_than`.
    async fn list_stuck_pending_deposits(
        &self,
        older_than: TimestampMs,
    ) -> Result<Vec<Deposit>, StoreError>;

    // --- Report persistence --- //

    async fn save_report(
        &self,
        report: &ReconReport,
    ) -> Result<(), StoreError>;

    async fn save_check(
        &self,
        check: &CheckRecord,
    ) -> Result<(), StoreError>;

    async fn save_exception(
        &self,
        exception: &ReconException,
    ) -> Result<(), StoreError>;

    async fn list_unresolved_exceptions(
        &self,
        limit: usize,
    ) -> Result<Vec<ReconException>, StoreError>;

    /// Marks an exception resolved with the operator's notes.
    async fn resolve_exception(
        &self,
        exception_id: Uuid,
        resolved_by: String,
        notes: String,
        now: TimestampMs,
    ) -> Result<(), StoreError>;
}
