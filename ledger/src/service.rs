use std::{collections::BTreeMap, sync::Arc};

use common::{
    amount::Amount,
    currency::Currency,
    ids::{AccountId, IdempotencyKey, TxnId, UserId},
    time::TimestampMs,
};
use rust_decimal::Decimal;
use tracing::{debug, info, instrument};

use crate::{
    account::{Account, AccountType},
    entries,
    entry::NewEntry,
    error::LedgerError,
    store::{LedgerStore, NewLedgerTransaction},
    transaction::{
        LedgerTransaction, Reference, ReferenceKind, TxnStatus, TxnType,
    },
};

/// A request to post a new ledger transaction.
#[derive(Clone, Debug)]
pub struct CreateTransactionRequest {
    pub user_id: Option<UserId>,
    pub txn_type: TxnType,
    pub reference: Option<Reference>,
    /// Required and non-empty; resubmitting a known key returns the existing
    /// transaction unchanged.
    pub idempotency_key: IdempotencyKey,
    pub description: Option<String>,
    pub metadata: serde_json::Value,
    pub entries: Vec<NewEntry>,
}

/// Annotates that a [`CreateTransactionRequest`] passed validation and may
/// be handed to the store for atomic commit. Constructed only by
/// [`validate`].
#[must_use]
struct ValidatedTransaction(NewLedgerTransaction);

/// Checks a request against the ledger's local invariants. No storage reads:
/// balance safety is enforced later, under the store's row locks.
fn validate(
    req: CreateTransactionRequest,
) -> Result<ValidatedTransaction, LedgerError> {
    if req.idempotency_key.is_empty() {
        return Err(LedgerError::validation("Missing idempotency key"));
    }
    if req.entries.len() < 2 {
        return Err(LedgerError::validation(
            "A transaction requires at least two entries",
        ));
    }
    for entry in &req.entries {
        if entry.amount.is_zero() {
            return Err(LedgerError::validation(
                "Entry amounts must be strictly positive",
            ));
        }
    }

    // Sum signed effects per currency. A currency is balanced when its
    // debits equal its credits.
    let mut net_by_currency = BTreeMap::<Currency, Decimal>::new();
    for entry in &req.entries {
        *net_by_currency.entry(entry.currency).or_default() +=
            entry.signed_effect();
    }

    if net_by_currency.len() == 1 {
        let (currency, net) = net_by_currency.iter().next().unwrap();
        if !net.is_zero() {
            return Err(LedgerError::validation(format!(
                "Unbalanced entries: {currency} debits and credits differ \
                 by {net}"
            )));
        }
    } else {
        // Cross-currency transactions are the conversion shape (and its
        // reversal): exactly one debit leg and one credit leg, each in its
        // own currency. The balance invariant holds per currency.
        let is_conversion_shape =
            matches!(req.txn_type, TxnType::Conversion | TxnType::Reversal)
                && req.entries.len() == 2
                && req.entries[0].entry_type != req.entries[1].entry_type;
        if !is_conversion_shape {
            return Err(LedgerError::validation(
                "Only conversion transactions may touch multiple currencies",
            ));
        }
    }

    Ok(ValidatedTransaction(NewLedgerTransaction {
        id: TxnId::generate(),
        user_id: req.user_id,
        txn_type: req.txn_type,
        reference: req.reference,
        idempotency_key: req.idempotency_key,
        description: req.description,
        metadata: req.metadata,
        entries: req.entries,
        created_at: TimestampMs::now(),
    }))
}

/// The main entrypoint for posting to and reading from the ledger.
///
/// Cloneable; all clones share the same store. The service performs all
/// *semantic* validation up front and delegates atomicity, balance safety
/// and idempotency to [`LedgerStore::commit_transaction`], so a transaction
/// either commits whole or leaves no trace.
pub struct LedgerService<S> {
    store: Arc<S>,
}

impl<S> Clone for LedgerService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: LedgerStore> LedgerService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    // --- Posting --- //

    /// Validate and atomically commit a transaction.
    ///
    /// Replaying an idempotency key returns the existing transaction and
    /// performs no writes.
    #[instrument(skip_all, name = "(ledger-create-txn)")]
    pub async fn create_transaction(
        &self,
        req: CreateTransactionRequest,
    ) -> Result<LedgerTransaction, LedgerError> {
        let validated = validate(req)?;
        let committed = self.store.commit_transaction(validated.0).await?;
        if committed.is_replay() {
            debug!("Idempotent replay; returning existing transaction");
        }
        Ok(committed.into_transaction())
    }

    // --- Accounts --- //

    /// Lazily creates the user's account of the given type with a zero
    /// balance. Racing creators both receive the same row.
    pub async fn get_or_create_user_account(
        &self,
        user_id: UserId,
        account_type: AccountType,
    ) -> Result<Account, LedgerError> {
        if account_type.is_system() {
            return Err(LedgerError::validation(format!(
                "Account type {account_type} is system-owned"
            )));
        }
        if let Some(account) =
            self.store.find_user_account(user_id, account_type).await?
        {
            return Ok(account);
        }
        let account =
            Account::new(Some(user_id), account_type, TimestampMs::now());
        Ok(self.store.upsert_account(account).await?)
    }

    /// Looks up a system account. These are seeded at bootstrap via
    /// [`ensure_system_accounts`]; a missing one is an operational fault.
    ///
    /// [`ensure_system_accounts`]: LedgerService::ensure_system_accounts
    pub async fn get_system_account(
        &self,
        account_type: AccountType,
    ) -> Result<Account, LedgerError> {
        self.store
            .find_system_account(account_type)
            .await?
            .ok_or(LedgerError::SystemAccountMissing(account_type))
    }

    /// Creates any missing system accounts. Called once at startup.
    pub async fn ensure_system_accounts(&self) -> Result<(), LedgerError> {
        for account_type in AccountType::SYSTEM_TYPES {
            if self.store.find_system_account(account_type).await?.is_none()
            {
                let account =
                    Account::new(None, account_type, TimestampMs::now());
                self.store.upsert_account(account).await?;
                info!("Seeded system account: {account_type}");
            }
        }
        Ok(())
    }

    // --- Reads --- //

    pub async fn get_account_balance(
        &self,
        account_id: AccountId,
    ) -> Result<Amount, LedgerError> {
        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(account_id))?;
        Ok(account.balance)
    }

    pub async fn get_user_balances(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Account>, LedgerError> {
        Ok(self.store.list_user_accounts(user_id).await?)
    }

    pub async fn get_system_buffers(
        &self,
    ) -> Result<Vec<Account>, LedgerError> {
        Ok(self.store.list_system_accounts().await?)
    }

    pub async fn get_transaction(
        &self,
        id: TxnId,
    ) -> Result<Option<LedgerTransaction>, LedgerError> {
        Ok(self.store.get_transaction(id).await?)
    }

    pub async fn get_transaction_history(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerTransaction>, LedgerError> {
        Ok(self
            .store
            .list_user_transactions(user_id, limit, offset)
            .await?)
    }

    // --- Semantic operations --- //

    /// Moves `amount` from the user's `usdc_balance` into
    /// `pending_investment`.
    ///
    /// The up-front balance read only improves the error message; the
    /// authoritative non-negativity check happens under the store's row
    /// locks.
    pub async fn reserve_for_investment(
        &self,
        user_id: UserId,
        amount: Amount,
        idempotency_key: IdempotencyKey,
    ) -> Result<LedgerTransaction, LedgerError> {
        let user_usdc = self
            .get_or_create_user_account(user_id, AccountType::UsdcBalance)
            .await?;
        let pending = self
            .get_or_create_user_account(
                user_id,
                AccountType::PendingInvestment,
            )
            .await?;

        if user_usdc.balance < amount {
            return Err(LedgerError::InsufficientBalance {
                account_id: user_usdc.id,
                balance: user_usdc.balance,
                required: amount,
            });
        }

        self.create_transaction(CreateTransactionRequest {
            user_id: Some(user_id),
            txn_type: TxnType::InternalTransfer,
            reference: None,
            idempotency_key,
            description: Some("Reserve for investment".to_owned()),
            metadata: serde_json::Value::Null,
            entries: entries::reserve_for_investment(
                pending.id,
                user_usdc.id,
                amount,
            ),
        })
        .await
    }

    /// Inverse of [`reserve_for_investment`].
    ///
    /// [`reserve_for_investment`]: LedgerService::reserve_for_investment
    pub async fn release_reservation(
        &self,
        user_id: UserId,
        amount: Amount,
        idempotency_key: IdempotencyKey,
    ) -> Result<LedgerTransaction, LedgerError> {
        let user_usdc = self
            .get_or_create_user_account(user_id, AccountType::UsdcBalance)
            .await?;
        let pending = self
            .get_or_create_user_account(
                user_id,
                AccountType::PendingInvestment,
            )
            .await?;

        self.create_transaction(CreateTransactionRequest {
            user_id: Some(user_id),
            txn_type: TxnType::InternalTransfer,
            reference: None,
            idempotency_key,
            description: Some("Release investment reservation".to_owned()),
            metadata: serde_json::Value::Null,
            entries: entries::release_reservation(
                user_usdc.id,
                pending.id,
                amount,
            ),
        })
        .await
    }

    /// Creates a compensating `reversal` transaction whose entries flip the
    /// debit/credit of each original entry, and marks the original
    /// `reversed`. Both changes commit atomically; a transaction can only
    /// be reversed once.
    #[instrument(skip_all, name = "(ledger-reverse-txn)")]
    pub async fn reverse_transaction(
        &self,
        original_id: TxnId,
        reason: &str,
    ) -> Result<LedgerTransaction, LedgerError> {
        let original = self
            .store
            .get_transaction(original_id)
            .await?
            .ok_or(LedgerError::TransactionNotFound(original_id))?;

        // Early rejection for a friendlier error; the store re-checks this
        // under its own transaction.
        if original.status != TxnStatus::Completed {
            return Err(LedgerError::NotReversible {
                id: original_id,
                status: original.status,
            });
        }

        let flipped = original
            .entries
            .iter()
            .map(|entry| NewEntry {
                account_id: entry.account_id,
                entry_type: entry.entry_type.flipped(),
                amount: entry.amount,
                currency: entry.currency,
                description: entry.description.clone(),
            })
            .collect::<Vec<_>>();

        let reversal = validate(CreateTransactionRequest {
            user_id: original.user_id,
            txn_type: TxnType::Reversal,
            reference: Some(Reference::new(
                ReferenceKind::LedgerTransaction,
                original_id,
            )),
            // Deterministic key: a second reversal attempt replays rather
            // than double-posting.
            idempotency_key: IdempotencyKey::new(format!(
                "reversal-{original_id}"
            )),
            description: Some(format!("Reversal: {reason}")),
            metadata: serde_json::json!({ "reason": reason }),
            entries: flipped,
        })?;

        let committed =
            self.store.commit_reversal(original_id, reversal.0).await?;
        if committed.is_replay() {
            debug!("Reversal replayed for transaction {original_id}");
        }
        Ok(committed.into_transaction())
    }
}

#[cfg(test)]
mod test {
    use rust_decimal_macros::dec;

    use crate::entries;

    use super::*;

    fn amt(d: Decimal) -> Amount {
        Amount::try_from_decimal(d).unwrap()
    }

    fn base_request(entries: Vec<NewEntry>) -> CreateTransactionRequest {
        CreateTransactionRequest {
            user_id: Some(UserId::generate()),
            txn_type: TxnType::Deposit,
            reference: None,
            idempotency_key: IdempotencyKey::new("test-key-1"),
            description: None,
            metadata: serde_json::Value::Null,
            entries,
        }
    }

    #[test]
    fn validate_accepts_balanced_pair() {
        let entries = entries::deposit(
            AccountId::generate(),
            AccountId::generate(),
            amt(dec!(50)),
        );
        assert!(validate(base_request(entries)).is_ok());
    }

    #[test]
    fn validate_rejects_empty_key() {
        let entries = entries::deposit(
            AccountId::generate(),
            AccountId::generate(),
            amt(dec!(50)),
        );
        let mut req = base_request(entries);
        req.idempotency_key = IdempotencyKey::new("");
        assert!(matches!(
            validate(req).err().unwrap(),
            LedgerError::Validation(_)
        ));
    }

    #[test]
    fn validate_rejects_single_entry() {
        let req = base_request(vec![NewEntry::debit(
            AccountId::generate(),
            amt(dec!(50)),
            Currency::Usdc,
        )]);
        assert!(matches!(
            validate(req).err().unwrap(),
            LedgerError::Validation(_)
        ));
    }

    #[test]
    fn validate_rejects_unbalanced_same_currency() {
        let req = base_request(vec![
            NewEntry::debit(
                AccountId::generate(),
                amt(dec!(50)),
                Currency::Usdc,
            ),
            NewEntry::credit(
                AccountId::generate(),
                amt(dec!(40)),
                Currency::Usdc,
            ),
        ]);
        assert!(matches!(
            validate(req).err().unwrap(),
            LedgerError::Validation(_)
        ));
    }

    #[test]
    fn validate_rejects_zero_amount() {
        let req = base_request(vec![
            NewEntry::debit(
                AccountId::generate(),
                Amount::ZERO,
                Currency::Usdc,
            ),
            NewEntry::credit(
                AccountId::generate(),
                Amount::ZERO,
                Currency::Usdc,
            ),
        ]);
        assert!(matches!(
            validate(req).err().unwrap(),
            LedgerError::Validation(_)
        ));
    }

    #[test]
    fn validate_allows_conversion_across_currencies() {
        let mut req = base_request(entries::conversion_usdc_to_usd(
            AccountId::generate(),
            AccountId::generate(),
            amt(dec!(5990)),
            amt(dec!(6000)),
        ));
        req.txn_type = TxnType::Conversion;
        assert!(validate(req).is_ok());
    }

    #[test]
    fn validate_rejects_cross_currency_deposit() {
        let req = base_request(vec![
            NewEntry::debit(
                AccountId::generate(),
                amt(dec!(50)),
                Currency::Usdc,
            ),
            NewEntry::credit(
                AccountId::generate(),
                amt(dec!(50)),
                Currency::Usd,
            ),
        ]);
        assert!(matches!(
            validate(req).err().unwrap(),
            LedgerError::Validation(_)
        ));
    }

    #[test]
    fn validate_allows_multi_leg_single_currency() {
        // The smart-allocation shape: two debits against one credit.
        let req = base_request(vec![
            NewEntry::debit(
                AccountId::generate(),
                amt(dec!(30)),
                Currency::Usdc,
            ),
            NewEntry::debit(
                AccountId::generate(),
                amt(dec!(70)),
                Currency::Usdc,
            ),
            NewEntry::credit(
                AccountId::generate(),
                amt(dec!(100)),
                Currency::Usdc,
            ),
        ]);
        assert!(validate(req).is_ok());
    }
}
