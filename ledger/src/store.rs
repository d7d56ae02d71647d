//! The ledger's persistence seam.
//!
//! [`LedgerStore`] is the only place balances are mutated. Implementations
//! must provide the guarantees documented on each method; the in-memory
//! store provides them with a single state lock, the Postgres store with
//! `SELECT ... FOR UPDATE` row locks inside one database transaction.

use async_trait::async_trait;
use common::{
    amount::Amount,
    ids::{AccountId, IdempotencyKey, TxnId, UserId},
    time::TimestampMs,
};

use crate::{
    account::{Account, AccountType},
    entry::NewEntry,
    error::LedgerError,
    transaction::{LedgerTransaction, Reference, TxnStatus, TxnType},
};

/// Errors surfaced by [`LedgerStore`] implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Applying the entries would have driven this account negative. The
    /// whole transaction was rolled back.
    #[error(
        "Insufficient balance in account {account_id}: \
         balance {balance}, required {required}"
    )]
    InsufficientBalance {
        account_id: AccountId,
        balance: Amount,
        required: Amount,
    },

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(TxnId),

    #[error("Transaction {id} is {status}, not reversible")]
    NotReversible { id: TxnId, status: TxnStatus },

    /// Connection failures, serialization failures, and other transient
    /// storage errors. Retryable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InsufficientBalance {
                account_id,
                balance,
                required,
            } => LedgerError::InsufficientBalance {
                account_id,
                balance,
                required,
            },
            StoreError::AccountNotFound(id) => LedgerError::AccountNotFound(id),
            StoreError::TransactionNotFound(id) =>
                LedgerError::TransactionNotFound(id),
            StoreError::NotReversible { id, status } =>
                LedgerError::NotReversible { id, status },
            StoreError::Unavailable(msg) => LedgerError::Unavailable(msg),
        }
    }
}

/// A validated transaction ready for atomic commit.
///
/// Built only by the [`LedgerService`] after validation; the store trusts
/// that the entries are balanced and well-formed and is responsible only for
/// atomicity, balance safety (non-negativity under row locks) and
/// idempotency-key uniqueness.
///
/// [`LedgerService`]: crate::service::LedgerService
#[derive(Clone, Debug)]
pub struct NewLedgerTransaction {
    pub id: TxnId,
    pub user_id: Option<UserId>,
    pub txn_type: TxnType,
    pub reference: Option<Reference>,
    pub idempotency_key: IdempotencyKey,
    pub description: Option<String>,
    pub metadata: serde_json::Value,
    pub entries: Vec<NewEntry>,
    pub created_at: TimestampMs,
}

/// The outcome of a commit: either a fresh transaction was created, or the
/// idempotency key was already known and the existing transaction is
/// returned unchanged.
#[derive(Clone, Debug)]
pub enum Committed {
    Created(LedgerTransaction),
    Replayed(LedgerTransaction),
}

impl Committed {
    pub fn into_transaction(self) -> LedgerTransaction {
        match self {
            Self::Created(txn) | Self::Replayed(txn) => txn,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, Self::Replayed(_))
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    /// Atomically commit a validated transaction.
    ///
    /// Guarantees required of implementations:
    ///
    /// - **Idempotent replay.** If a transaction with the same idempotency
    ///   key exists, return it as [`Committed::Replayed`] with no writes.
    /// - **Atomicity.** The transaction row, all entry rows, and all balance
    ///   updates commit together or not at all; the stored status is
    ///   `completed` (the `pending` window is internal to the commit).
    /// - **Balance safety.** Account balances are updated under row locks
    ///   acquired in ascending `account_id` order (deadlock avoidance); any
    ///   update that would go negative aborts the whole commit with
    ///   [`StoreError::InsufficientBalance`].
    async fn commit_transaction(
        &self,
        new: NewLedgerTransaction,
    ) -> Result<Committed, StoreError>;

    /// Atomically commit a reversal: commits `reversal` exactly like
    /// [`commit_transaction`] *and* flips the original transaction's status
    /// to `reversed`, in one storage transaction.
    ///
    /// Fails with [`StoreError::NotReversible`] unless the original is
    /// currently `completed`.
    ///
    /// [`commit_transaction`]: LedgerStore::commit_transaction
    async fn commit_reversal(
        &self,
        original_id: TxnId,
        reversal: NewLedgerTransaction,
    ) -> Result<Committed, StoreError>;

    /// Insert a zero-balance account unless one already exists for the same
    /// `(user_id, account_type)` (or `(NULL, account_type)` for system
    /// accounts), in which case the existing row is returned.
    async fn upsert_account(
        &self,
        account: Account,
    ) -> Result<Account, StoreError>;

    async fn get_account(
        &self,
        id: AccountId,
    ) -> Result<Option<Account>, StoreError>;

    async fn find_user_account(
        &self,
        user_id: UserId,
        account_type: AccountType,
    ) -> Result<Option<Account>, StoreError>;

    async fn find_system_account(
        &self,
        account_type: AccountType,
    ) -> Result<Option<Account>, StoreError>;

    /// All accounts belonging to `user_id`.
    async fn list_user_accounts(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Account>, StoreError>;

    /// All system accounts (buffers + broker operational).
    async fn list_system_accounts(&self) -> Result<Vec<Account>, StoreError>;

    async fn get_transaction(
        &self,
        id: TxnId,
    ) -> Result<Option<LedgerTransaction>, StoreError>;

    async fn find_transaction_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<LedgerTransaction>, StoreError>;

    /// Transactions touching any of the user's accounts, newest first.
    async fn list_user_transactions(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerTransaction>, StoreError>;
}
