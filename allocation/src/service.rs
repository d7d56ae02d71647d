use std::sync::Arc;

use common::{
    amount::Amount,
    currency::Currency,
    ids::{
        AllocationEventId, DepositId, IdempotencyKey, UserId,
    },
    store::StoreError,
    time::TimestampMs,
};
use ledger::{
    AccountType, CreateTransactionRequest, LedgerError, LedgerService,
    LedgerStore, LedgerTransaction, NewEntry, Reference, ReferenceKind,
    TxnType,
};
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use crate::{
    event::{AllocationEvent, AllocationEventType},
    mode::{AllocationMode, ModeError},
    split::split_deposit,
    store::AllocationStore,
    summary::{week_start, WeeklyAllocationSummary},
};

/// Errors returned by the allocation service.
#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    /// The user has no active allocation mode; the caller should fall back
    /// to the legacy (unsplit) deposit posting.
    #[error("Allocation mode is not active for user {0}")]
    ModeNotActive(UserId),

    #[error(transparent)]
    InvalidMode(#[from] ModeError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The outcome of a successful allocated deposit.
#[derive(Clone, Debug)]
pub struct AllocatedDeposit {
    pub transaction: LedgerTransaction,
    pub event: AllocationEvent,
    pub spending_amount: Amount,
    pub stash_amount: Amount,
}

/// Splits incoming deposits by the user's policy and posts the three-entry
/// ledger transaction.
pub struct AllocationService<L, A> {
    ledger: LedgerService<L>,
    store: Arc<A>,
}

impl<L, A> Clone for AllocationService<L, A> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
            store: self.store.clone(),
        }
    }
}

impl<L: LedgerStore, A: AllocationStore> AllocationService<L, A> {
    pub fn new(ledger: LedgerService<L>, store: Arc<A>) -> Self {
        Self { ledger, store }
    }

    /// Whether the user's allocation mode is currently active.
    pub async fn is_active(
        &self,
        user_id: UserId,
    ) -> Result<bool, AllocationError> {
        Ok(self
            .store
            .get_mode(user_id)
            .await?
            .map(|mode| mode.active)
            .unwrap_or(false))
    }

    /// Activates (or re-activates) allocation for the user with the given
    /// ratios.
    pub async fn set_mode(
        &self,
        user_id: UserId,
        ratio_spending: Decimal,
        ratio_stash: Decimal,
    ) -> Result<AllocationMode, AllocationError> {
        let now = TimestampMs::now();
        let mode = match self.store.get_mode(user_id).await? {
            Some(mut existing) => {
                AllocationMode::validate_ratios(ratio_spending, ratio_stash)?;
                existing.ratio_spending = ratio_spending;
                existing.ratio_stash = ratio_stash;
                if !existing.active {
                    existing.resume(now);
                }
                existing.updated_at = now;
                existing
            }
            None => AllocationMode::new(
                user_id,
                ratio_spending,
                ratio_stash,
                now,
            )?,
        };
        self.store.upsert_mode(mode.clone()).await?;
        Ok(mode)
    }

    pub async fn pause_mode(
        &self,
        user_id: UserId,
    ) -> Result<(), AllocationError> {
        let mut mode = self
            .store
            .get_mode(user_id)
            .await?
            .ok_or(AllocationError::ModeNotActive(user_id))?;
        mode.pause(TimestampMs::now());
        self.store.upsert_mode(mode).await?;
        Ok(())
    }

    /// Splits a confirmed deposit per the user's active mode and posts one
    /// ledger transaction with three entries:
    ///
    /// - debit user `spending_balance` for the spending leg,
    /// - debit user `stash_balance` for the stash leg,
    /// - credit `system_buffer_usdc` for the whole amount.
    ///
    /// The idempotency key is derived from the deposit id, so redelivery of
    /// the same deposit replays rather than double-posting.
    #[instrument(skip_all, name = "(allocate-deposit)")]
    pub async fn allocate_deposit(
        &self,
        user_id: UserId,
        deposit_id: DepositId,
        total: Amount,
    ) -> Result<AllocatedDeposit, AllocationError> {
        let mode = self
            .store
            .get_mode(user_id)
            .await?
            .filter(|mode| mode.active)
            .ok_or(AllocationError::ModeNotActive(user_id))?;

        let (spending_amount, stash_amount) =
            split_deposit(total, mode.ratio_spending);
        info!(
            %total, %spending_amount, %stash_amount,
            "Splitting deposit {deposit_id}"
        );

        let spending_account = self
            .ledger
            .get_or_create_user_account(user_id, AccountType::SpendingBalance)
            .await?;
        let stash_account = self
            .ledger
            .get_or_create_user_account(user_id, AccountType::StashBalance)
            .await?;
        let buffer = self
            .ledger
            .get_system_account(AccountType::SystemBufferUsdc)
            .await?;

        let mut entries = Vec::with_capacity(3);
        if !spending_amount.is_zero() {
            entries.push(
                NewEntry::debit(
                    spending_account.id,
                    spending_amount,
                    Currency::Usdc,
                )
                .describe("allocation: spending leg"),
            );
        }
        if !stash_amount.is_zero() {
            entries.push(
                NewEntry::debit(stash_account.id, stash_amount, Currency::Usdc)
                    .describe("allocation: stash leg"),
            );
        }
        entries.push(
            NewEntry::credit(buffer.id, total, Currency::Usdc)
                .describe("allocation: draw from USDC buffer"),
        );

        let transaction = self
            .ledger
            .create_transaction(CreateTransactionRequest {
                user_id: Some(user_id),
                txn_type: TxnType::Deposit,
                reference: Some(Reference::new(
                    ReferenceKind::Deposit,
                    deposit_id,
                )),
                idempotency_key: IdempotencyKey::new(format!(
                    "deposit-{deposit_id}"
                )),
                description: Some("Smart-allocated deposit".to_owned()),
                metadata: serde_json::json!({
                    "ratio_spending": mode.ratio_spending,
                    "ratio_stash": mode.ratio_stash,
                }),
                entries,
            })
            .await?;

        let now = TimestampMs::now();
        let event = AllocationEvent {
            id: AllocationEventId::generate(),
            user_id,
            total,
            stash_amount,
            spending_amount,
            event_type: AllocationEventType::Deposit,
            source_txn_id: transaction.id,
            metadata: serde_json::Value::Null,
            created_at: now,
        };
        self.store.record_event(event.clone()).await?;

        // The weekly rollup is advisory; a failed upsert shouldn't fail the
        // deposit, which has already posted.
        if let Err(e) = self
            .update_weekly_summary(
                user_id,
                total,
                spending_amount,
                stash_amount,
                now,
            )
            .await
        {
            warn!("Failed to update weekly allocation summary: {e:#}");
        }

        Ok(AllocatedDeposit {
            transaction,
            event,
            spending_amount,
            stash_amount,
        })
    }

    async fn update_weekly_summary(
        &self,
        user_id: UserId,
        total: Amount,
        spending: Amount,
        stash: Amount,
        now: TimestampMs,
    ) -> anyhow::Result<()> {
        let week = week_start(now);
        let mut summary = self
            .store
            .get_weekly_summary(user_id, week)
            .await?
            .unwrap_or_else(|| {
                WeeklyAllocationSummary::new(user_id, week, now)
            });
        summary.absorb(total, spending, stash, now);
        self.store.upsert_weekly_summary(summary).await?;
        Ok(())
    }
}
