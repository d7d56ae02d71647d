use common::{amount::Amount, ids::AccountId, ids::TxnId};

use crate::transaction::TxnStatus;

/// Errors returned by ledger operations.
///
/// The taxonomy matters to callers:
///
/// - `Validation` and `InsufficientBalance` are the caller's fault and must
///   never be retried.
/// - `Unavailable` is the store's fault and may be retried.
/// - Idempotent replay is *not* an error: resubmitting a known idempotency
///   key returns the existing transaction.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Malformed request: zero/negative amounts, missing idempotency key,
    /// unbalanced entries, fewer than two entries.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// An entry would have driven an account balance below zero.
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

    /// System accounts are seeded at bootstrap; a missing one means the
    /// deployment is broken, not the request.
    #[error("System account not seeded: {0}")]
    SystemAccountMissing(crate::account::AccountType),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(TxnId),

    /// Only `completed` transactions may be reversed, and only once.
    #[error("Transaction {id} is {status}, not reversible")]
    NotReversible { id: TxnId, status: TxnStatus },

    /// Underlying store error; the caller may retry.
    #[error("Ledger store unavailable: {0}")]
    Unavailable(String),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
