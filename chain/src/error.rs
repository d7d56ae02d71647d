use common::{
    amount::Amount,
    ids::{UserId, WithdrawalId},
    store::StoreError,
};
use ledger::LedgerError;

use crate::custodian::CustodianError;

/// How the funding-event worker should treat a failure.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// The request itself is bad; retrying can never succeed. Straight to
    /// the DLQ.
    Permanent,
    /// Infrastructure hiccup; retry with backoff.
    Transient,
}

/// Errors from the on-chain engine.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("Deposit {amount} is below the minimum {minimum}")]
    DepositBelowMinimum { amount: Amount, minimum: Amount },

    #[error("Unsupported deposit token: {0}")]
    UnsupportedToken(crate::types::TokenSymbol),

    /// The custodian wallet named in the event is not owned by the claimed
    /// user. Either the webhook is garbage or something is very wrong.
    #[error(
        "Wallet mismatch: custodian wallet '{custodian_wallet_id}' does not \
         belong to user {user_id}"
    )]
    WalletMismatch {
        custodian_wallet_id: String,
        user_id: UserId,
    },

    #[error("No managed wallet for user {user_id} on chain '{chain}'")]
    WalletNotFound { user_id: UserId, chain: String },

    /// A funding event landed on an address we don't manage.
    #[error("No managed wallet with address '{address}' on chain '{chain}'")]
    NoWalletForAddress { chain: String, address: String },

    #[error("Withdrawal not found: {0}")]
    WithdrawalNotFound(WithdrawalId),

    #[error("Withdrawal {id} is not pending (status: {status})")]
    WithdrawalNotPending { id: WithdrawalId, status: String },

    #[error(
        "Insufficient balance for withdrawal {id}: balance {balance}, \
         requested {requested}"
    )]
    InsufficientBalance {
        id: WithdrawalId,
        balance: Amount,
        requested: Amount,
    },

    #[error(transparent)]
    Custodian(#[from] CustodianError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ChainError {
    /// Classify for retry policy. Unknown / infrastructure errors default
    /// to transient; only errors that can never succeed on retry are
    /// permanent.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::DepositBelowMinimum { .. }
            | Self::UnsupportedToken(_)
            | Self::WalletMismatch { .. }
            | Self::WalletNotFound { .. }
            | Self::NoWalletForAddress { .. }
            | Self::WithdrawalNotFound(_)
            | Self::WithdrawalNotPending { .. }
            | Self::InsufficientBalance { .. } => ErrorClass::Permanent,

            Self::Custodian(e) if !e.is_retryable() => ErrorClass::Permanent,
            Self::Custodian(_) => ErrorClass::Transient,

            Self::Ledger(LedgerError::Validation(_))
            | Self::Ledger(LedgerError::InsufficientBalance { .. }) =>
                ErrorClass::Permanent,
            Self::Ledger(_) => ErrorClass::Transient,

            Self::Store(StoreError::NotFound(_)) => ErrorClass::Permanent,
            Self::Store(_) => ErrorClass::Transient,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn validation_failures_are_permanent() {
        let err = ChainError::DepositBelowMinimum {
            amount: Amount::from_u64(1),
            minimum: Amount::from_u64(10),
        };
        assert_eq!(err.class(), ErrorClass::Permanent);

        let err = ChainError::WalletMismatch {
            custodian_wallet_id: "cw_1".to_owned(),
            user_id: UserId::generate(),
        };
        assert_eq!(err.class(), ErrorClass::Permanent);
    }

    #[test]
    fn infrastructure_failures_are_transient() {
        let err = ChainError::Store(StoreError::unavailable("connection reset"));
        assert_eq!(err.class(), ErrorClass::Transient);

        let err = ChainError::Custodian(CustodianError::Unavailable(
            "timeout".to_owned(),
        ));
        assert_eq!(err.class(), ErrorClass::Transient);

        let err = ChainError::Ledger(LedgerError::Unavailable(
            "deadlock".to_owned(),
        ));
        assert_eq!(err.class(), ErrorClass::Transient);
    }
}
