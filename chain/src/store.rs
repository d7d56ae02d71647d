use async_trait::async_trait;
use common::{
    ids::{UserId, WithdrawalId},
    store::StoreError,
    time::TimestampMs,
};

use crate::{
    deposit::{Deposit, DepositStatus},
    queue::{FundingEvent, NewFundingEvent},
    types::{ChainName, TxHash},
    wallet::ManagedWallet,
    withdrawal::{Withdrawal, WithdrawalStatus},
};

/// Persistence seam for deposits, withdrawals and managed wallets.
#[async_trait]
pub trait ChainStore: Send + Sync + 'static {
    /// Inserts a deposit. `tx_hash` is unique; inserting a duplicate
    /// returns [`StoreError::Conflict`].
    async fn insert_deposit(
        &self,
        deposit: Deposit,
    ) -> Result<(), StoreError>;

    async fn find_deposit_by_tx_hash(
        &self,
        tx_hash: &TxHash,
    ) -> Result<Option<Deposit>, StoreError>;

    async fn update_deposit_status(
        &self,
        tx_hash: &TxHash,
        status: DepositStatus,
    ) -> Result<(), StoreError>;

    /// Deposits stuck in `pending` since before `older_than`; reconciliation
    /// candidates.
    async fn list_stale_pending_deposits(
        &self,
        older_than: TimestampMs,
    ) -> Result<Vec<Deposit>, StoreError>;

    async fn insert_withdrawal(
        &self,
        withdrawal: Withdrawal,
    ) -> Result<(), StoreError>;

    async fn get_withdrawal(
        &self,
        id: WithdrawalId,
    ) -> Result<Option<Withdrawal>, StoreError>;

    async fn update_withdrawal_status(
        &self,
        id: WithdrawalId,
        status: WithdrawalStatus,
        error: Option<String>,
    ) -> Result<(), StoreError>;

    /// Best-effort persist of the custodian's transfer id.
    async fn set_withdrawal_provider_transfer_id(
        &self,
        id: WithdrawalId,
        provider_transfer_id: String,
    ) -> Result<(), StoreError>;

    async fn insert_wallet(
        &self,
        wallet: ManagedWallet,
    ) -> Result<(), StoreError>;

    async fn find_wallet_by_custodian_id(
        &self,
        custodian_wallet_id: &str,
    ) -> Result<Option<ManagedWallet>, StoreError>;

    async fn find_wallet_by_address(
        &self,
        chain: &ChainName,
        address: &str,
    ) -> Result<Option<ManagedWallet>, StoreError>;

    async fn find_wallet_for_user(
        &self,
        user_id: UserId,
        chain: &ChainName,
    ) -> Result<Option<ManagedWallet>, StoreError>;

    /// Every managed wallet; used by the buffer observer.
    async fn list_wallets(&self) -> Result<Vec<ManagedWallet>, StoreError>;
}

/// Persistence seam for the funding-event inbox.
#[async_trait]
pub trait FundingQueueStore: Send + Sync + 'static {
    /// Conflict-free enqueue keyed on `(tx_hash, chain)`: a duplicate event
    /// is silently absorbed and `None` is returned.
    async fn enqueue(
        &self,
        new: NewFundingEvent,
        max_attempts: u32,
    ) -> Result<Option<FundingEvent>, StoreError>;

    /// Claims up to `batch` jobs that are `pending`, or `failed` with
    /// `next_retry_at <= now`, oldest first, marking them `processing`.
    ///
    /// Implementations must guarantee that concurrent claimers receive
    /// disjoint job sets (skip-locked semantics).
    //
    // TODO(queue): reap `processing` rows orphaned by a worker that died
    // mid-claim; they currently need an operator to re-queue them.
    async fn claim_batch(
        &self,
        batch: usize,
        now: TimestampMs,
    ) -> Result<Vec<FundingEvent>, StoreError>;

    /// Marks a claimed job `completed`.
    async fn complete(
        &self,
        event: &FundingEvent,
        log_line: String,
        now: TimestampMs,
    ) -> Result<(), StoreError>;

    /// Records a failed attempt on a claimed job: bumps `attempt_count`,
    /// stores the error, and either schedules a retry (`failed` +
    /// `next_retry_at`) or dead-letters the job.
    async fn fail(
        &self,
        event: &FundingEvent,
        error: String,
        error_type: crate::error::ErrorClass,
        next_retry_at: Option<TimestampMs>,
        log_line: String,
        now: TimestampMs,
    ) -> Result<(), StoreError>;

    async fn get(
        &self,
        tx_hash: &TxHash,
        chain: &ChainName,
    ) -> Result<Option<FundingEvent>, StoreError>;

    async fn count_pending(&self) -> Result<u64, StoreError>;

    /// Jobs currently parked in the DLQ, oldest first.
    async fn list_dlq(
        &self,
        limit: usize,
    ) -> Result<Vec<FundingEvent>, StoreError>;
}
