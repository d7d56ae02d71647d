use std::sync::Arc;

use allocation::{AllocationError, AllocationService, AllocationStore};
use common::{
    amount::Amount,
    ids::{IdempotencyKey, WithdrawalId},
    push::PushNotifier,
    store::StoreError,
    time::TimestampMs,
};
use ledger::{
    entries, AccountType, CreateTransactionRequest, LedgerService,
    LedgerStore, Reference, ReferenceKind, TxnType,
};
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use crate::{
    config::ChainConfig,
    custodian::{CustodianApi, CustodianError, TransferFundsRequest},
    deposit::{Deposit, DepositRequest, DepositStatus},
    error::ChainError,
    store::ChainStore,
    withdrawal::{Withdrawal, WithdrawalStatus},
};

/// The result of comparing the ledger's stablecoin buffer against what the
/// custodian actually holds.
#[derive(Clone, Debug)]
pub struct BufferStatus {
    /// The `system_buffer_usdc` balance per the ledger.
    pub ledger_balance: Amount,
    /// Total USDC across all custodian wallets.
    pub actual_balance: Amount,
    /// The configured alert threshold for the custodian-side balance.
    pub threshold: Amount,
    /// `actual - ledger`; signed.
    pub discrepancy: Decimal,
    pub is_healthy: bool,
}

/// The on-chain engine: deposit confirmation, withdrawal execution, and
/// buffer observation.
pub struct ChainEngine<L, S, A, C> {
    ledger: LedgerService<L>,
    allocation: AllocationService<L, A>,
    store: Arc<S>,
    custodian: Arc<C>,
    notifier: Arc<dyn PushNotifier>,
    config: ChainConfig,
}

impl<L, S, A, C> Clone for ChainEngine<L, S, A, C> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
            allocation: self.allocation.clone(),
            store: self.store.clone(),
            custodian: self.custodian.clone(),
            notifier: self.notifier.clone(),
            config: self.config.clone(),
        }
    }
}

impl<L, S, A, C> ChainEngine<L, S, A, C>
where
    L: LedgerStore,
    S: ChainStore,
    A: AllocationStore,
    C: CustodianApi,
{
    pub fn new(
        ledger: LedgerService<L>,
        allocation: AllocationService<L, A>,
        store: Arc<S>,
        custodian: Arc<C>,
        notifier: Arc<dyn PushNotifier>,
        config: ChainConfig,
    ) -> Self {
        Self {
            ledger,
            allocation,
            store,
            custodian,
            notifier,
            config,
        }
    }

    // --- Deposits --- //

    /// Processes one observed deposit.
    ///
    /// Idempotent on `tx_hash`: a known hash returns the existing deposit
    /// without further effect. The ledger posting is keyed on the deposit
    /// id, so even a crash between insert and post cannot double-credit.
    #[instrument(skip_all, name = "(process-deposit)")]
    pub async fn process_deposit(
        &self,
        req: DepositRequest,
    ) -> Result<Deposit, ChainError> {
        // Idempotency: one deposit per on-chain transfer.
        if let Some(existing) =
            self.store.find_deposit_by_tx_hash(&req.tx_hash).await?
        {
            info!("Deposit {} already processed", req.tx_hash);
            return Ok(existing);
        }

        // Validation. These reject permanently; garbage webhooks go to the
        // DLQ rather than retrying forever.
        if !req.token.is_usdc() {
            return Err(ChainError::UnsupportedToken(req.token));
        }
        if req.amount < self.config.min_deposit_amount {
            return Err(ChainError::DepositBelowMinimum {
                amount: req.amount,
                minimum: self.config.min_deposit_amount,
            });
        }
        let wallet = self
            .store
            .find_wallet_by_custodian_id(&req.custodian_wallet_id)
            .await?
            .filter(|wallet| wallet.user_id == req.user_id)
            .ok_or_else(|| ChainError::WalletMismatch {
                custodian_wallet_id: req.custodian_wallet_id.clone(),
                user_id: req.user_id,
            })?;

        let now = TimestampMs::now();
        let mut deposit = Deposit {
            id: common::ids::DepositId::generate(),
            user_id: req.user_id,
            chain: req.chain.clone(),
            tx_hash: req.tx_hash.clone(),
            token: req.token.clone(),
            amount: req.amount,
            status: DepositStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        match self.store.insert_deposit(deposit.clone()).await {
            Ok(()) => (),
            // Lost an insert race; the other processor owns this deposit.
            Err(StoreError::Conflict(_)) => {
                let existing = self
                    .store
                    .find_deposit_by_tx_hash(&req.tx_hash)
                    .await?
                    .ok_or_else(|| {
                        StoreError::not_found(format!(
                            "deposit {}",
                            req.tx_hash
                        ))
                    })?;
                return Ok(existing);
            }
            Err(e) => return Err(e.into()),
        }

        // Post to the ledger: split per policy if the user's allocation
        // mode is active, otherwise the legacy deposit pair.
        match self
            .allocation
            .allocate_deposit(wallet.user_id, deposit.id, req.amount)
            .await
        {
            Ok(allocated) => {
                info!(
                    "Deposit {} allocated: spending {} / stash {}",
                    deposit.id,
                    allocated.spending_amount,
                    allocated.stash_amount
                );
            }
            Err(AllocationError::ModeNotActive(_)) => {
                self.post_legacy_deposit(&deposit).await?;
            }
            Err(AllocationError::Ledger(e)) => return Err(e.into()),
            Err(AllocationError::Store(e)) => return Err(e.into()),
            Err(e @ AllocationError::InvalidMode(_)) => {
                // A corrupt mode row shouldn't strand user funds; fall back
                // to the unsplit posting and let reconciliation flag it.
                warn!("Allocation failed, posting legacy pair: {e:#}");
                self.post_legacy_deposit(&deposit).await?;
            }
        }

        // Confirm. The ledger is already correct; failing to flip the
        // advisory status is logged and left to reconciliation.
        deposit.status = DepositStatus::Confirmed;
        deposit.updated_at = TimestampMs::now();
        if let Err(e) = self
            .store
            .update_deposit_status(&deposit.tx_hash, DepositStatus::Confirmed)
            .await
        {
            warn!(
                "Deposit {} ledger-posted but status update failed: {e:#}",
                deposit.id
            );
        }

        self.notifier
            .send_push_notification(
                deposit.user_id,
                "Deposit received",
                &format!("{} USDC has landed in your account", deposit.amount),
            )
            .await;

        Ok(deposit)
    }

    async fn post_legacy_deposit(
        &self,
        deposit: &Deposit,
    ) -> Result<(), ChainError> {
        let user_usdc = self
            .ledger
            .get_or_create_user_account(
                deposit.user_id,
                AccountType::UsdcBalance,
            )
            .await?;
        let buffer = self
            .ledger
            .get_system_account(AccountType::SystemBufferUsdc)
            .await?;

        self.ledger
            .create_transaction(CreateTransactionRequest {
                user_id: Some(deposit.user_id),
                txn_type: TxnType::Deposit,
                reference: Some(Reference::new(
                    ReferenceKind::Deposit,
                    deposit.id,
                )),
                idempotency_key: IdempotencyKey::new(format!(
                    "deposit-{}",
                    deposit.id
                )),
                description: Some(format!(
                    "On-chain deposit {}",
                    deposit.tx_hash
                )),
                metadata: serde_json::json!({
                    "chain": deposit.chain,
                    "tx_hash": deposit.tx_hash,
                }),
                entries: entries::deposit(
                    user_usdc.id,
                    buffer.id,
                    deposit.amount,
                ),
            })
            .await?;
        Ok(())
    }

    // --- Withdrawals --- //

    /// Executes a pending withdrawal end to end: ledger debit, custodian
    /// transfer, status updates.
    ///
    /// Re-submitting a completed withdrawal is a no-op. If the custodian
    /// call fails after the ledger debit, the withdrawal is marked `failed`
    /// and the debit is deliberately left in place: we cannot distinguish
    /// "the custodian never received the request" from "the custodian
    /// processed it but the response was lost", so a blind automatic
    /// reversal is unsafe. Reconciliation surfaces these for an operator,
    /// who can trigger `ReverseTransaction` once the truth is known.
    #[instrument(skip_all, name = "(execute-withdrawal)")]
    pub async fn execute_withdrawal(
        &self,
        id: WithdrawalId,
    ) -> Result<Withdrawal, ChainError> {
        let mut withdrawal = self
            .store
            .get_withdrawal(id)
            .await?
            .ok_or(ChainError::WithdrawalNotFound(id))?;

        match withdrawal.status {
            WithdrawalStatus::Pending => (),
            WithdrawalStatus::Completed => {
                info!("Withdrawal {id} already completed; no-op");
                return Ok(withdrawal);
            }
            status => {
                return Err(ChainError::WithdrawalNotPending {
                    id,
                    status: status.as_str().to_owned(),
                })
            }
        }

        // Verify funds before touching the ledger so the common failure
        // mode produces a clean error and no entries at all.
        let user_usdc = self
            .ledger
            .get_or_create_user_account(
                withdrawal.user_id,
                AccountType::UsdcBalance,
            )
            .await?;
        if user_usdc.balance < withdrawal.amount {
            let message = format!(
                "insufficient balance: {} < {}",
                user_usdc.balance, withdrawal.amount
            );
            self.mark_withdrawal_failed(&mut withdrawal, message)
            .await;
            return Err(ChainError::InsufficientBalance {
                id,
                balance: user_usdc.balance,
                requested: withdrawal.amount,
            });
        }

        // Ledger debit. Keyed on the withdrawal id: a crashed execution
        // that retries will replay, not double-debit.
        let buffer = self
            .ledger
            .get_system_account(AccountType::SystemBufferUsdc)
            .await?;
        self.ledger
            .create_transaction(CreateTransactionRequest {
                user_id: Some(withdrawal.user_id),
                txn_type: TxnType::Withdrawal,
                reference: Some(Reference::new(ReferenceKind::Withdrawal, id)),
                idempotency_key: IdempotencyKey::new(format!(
                    "withdrawal-{id}"
                )),
                description: Some(format!(
                    "Withdrawal to {} on {}",
                    withdrawal.destination_address,
                    withdrawal.destination_chain
                )),
                metadata: serde_json::Value::Null,
                entries: entries::withdrawal(
                    buffer.id,
                    user_usdc.id,
                    withdrawal.amount,
                ),
            })
            .await?;

        // Resolve the custodian wallet that will send the funds.
        let wallet = match self
            .store
            .find_wallet_for_user(
                withdrawal.user_id,
                &withdrawal.destination_chain,
            )
            .await?
        {
            Some(wallet) => wallet,
            None => {
                let err = ChainError::WalletNotFound {
                    user_id: withdrawal.user_id,
                    chain: withdrawal.destination_chain.to_string(),
                };
                self.mark_withdrawal_failed(&mut withdrawal, err.to_string())
                    .await;
                return Err(err);
            }
        };

        // Custodian transfer, bounded by the configured deadline.
        let transfer = TransferFundsRequest {
            wallet_id: wallet.custodian_wallet_id.clone(),
            destination_address: withdrawal.destination_address.clone(),
            amounts: vec![withdrawal.amount],
            token_id: crate::types::TokenSymbol::usdc(),
            idempotency_key: id,
        };
        let transfer_result = tokio::time::timeout(
            self.config.withdrawal_timeout,
            self.custodian.transfer_funds(transfer),
        )
        .await
        .unwrap_or_else(|_elapsed| {
            Err(CustodianError::Unavailable(format!(
                "transfer timed out after {:?}",
                self.config.withdrawal_timeout
            )))
        });

        let provider_transfer_id = match transfer_result {
            Ok(transfer_id) => transfer_id,
            Err(e) => {
                self.mark_withdrawal_failed(&mut withdrawal, e.to_string())
                    .await;
                return Err(e.into());
            }
        };

        // Persist the custodian's transfer id. Best effort: the transfer is
        // already in flight and must not be unwound over a bookkeeping
        // failure.
        withdrawal.provider_transfer_id = Some(provider_transfer_id.clone());
        if let Err(e) = self
            .store
            .set_withdrawal_provider_transfer_id(id, provider_transfer_id)
            .await
        {
            warn!("Failed to persist provider transfer id for {id}: {e:#}");
        }

        withdrawal.status = WithdrawalStatus::Completed;
        withdrawal.updated_at = TimestampMs::now();
        self.store
            .update_withdrawal_status(id, WithdrawalStatus::Completed, None)
            .await?;
        info!("Withdrawal {id} completed");

        self.notifier
            .send_push_notification(
                withdrawal.user_id,
                "Withdrawal sent",
                &format!(
                    "{} USDC is on its way to {}",
                    withdrawal.amount, withdrawal.destination_address
                ),
            )
            .await;

        Ok(withdrawal)
    }

    async fn mark_withdrawal_failed(
        &self,
        withdrawal: &mut Withdrawal,
        error: String,
    ) {
        withdrawal.status = WithdrawalStatus::Failed;
        withdrawal.error = Some(error.clone());
        withdrawal.updated_at = TimestampMs::now();
        if let Err(e) = self
            .store
            .update_withdrawal_status(
                withdrawal.id,
                WithdrawalStatus::Failed,
                Some(error),
            )
            .await
        {
            warn!(
                "Failed to mark withdrawal {} as failed: {e:#}",
                withdrawal.id
            );
        }
    }

    // --- Buffer observation --- //

    /// Compares the ledger's `system_buffer_usdc` balance against the sum of
    /// USDC held across all custodian wallets.
    #[instrument(skip_all, name = "(check-buffer)")]
    pub async fn check_system_buffer_level(
        &self,
    ) -> Result<BufferStatus, ChainError> {
        let ledger_balance = self
            .ledger
            .get_system_account(AccountType::SystemBufferUsdc)
            .await?
            .balance;

        let mut actual_balance = Amount::ZERO;
        for wallet in self.store.list_wallets().await? {
            let balances = self
                .custodian
                .get_wallet_balances(&wallet.custodian_wallet_id)
                .await?;
            for balance in balances {
                if balance.token.is_usdc() {
                    actual_balance = actual_balance + balance.amount;
                }
            }
        }

        let discrepancy =
            actual_balance.to_decimal() - ledger_balance.to_decimal();
        let threshold = self.config.buffer_alert_threshold;
        let is_healthy = actual_balance >= threshold
            && discrepancy.abs()
                <= self.config.buffer_discrepancy_epsilon.to_decimal();

        if actual_balance < threshold {
            warn!(
                "Buffer below alert threshold: custodian holds \
                 {actual_balance}, threshold {threshold}"
            );
        }
        if discrepancy.abs()
            > self.config.buffer_discrepancy_epsilon.to_decimal()
        {
            warn!(
                "Buffer discrepancy: ledger {ledger_balance}, custodian \
                 {actual_balance} (diff {discrepancy})"
            );
        }

        Ok(BufferStatus {
            ledger_balance,
            actual_balance,
            threshold,
            discrepancy,
            is_healthy,
        })
    }
}
