use common::{
    amount::Amount,
    ids::{DepositId, UserId},
    time::TimestampMs,
};
#[cfg(any(test, feature = "test-utils"))]
use proptest_derive::Arbitrary;
use serde::{Deserialize, Serialize};

use crate::types::{ChainName, TokenSymbol, TxHash};

/// The lifecycle of an on-chain deposit row.
///
/// The ledger posting is the canonical effect of a deposit; this status is
/// advisory. A deposit stuck in `pending` after its ledger transaction
/// posted is picked up by reconciliation rather than blocking funds.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(any(test, feature = "test-utils"), derive(Arbitrary))]
#[cfg_attr(test, derive(strum::VariantArray))]
pub enum DepositStatus {
    /// Row inserted; ledger posting in flight.
    Pending,
    /// Ledger posted and the row acknowledged.
    Confirmed,
    /// Processing failed before the ledger posting.
    Failed,
    /// Acknowledged by a reconciliation pass.
    Reconciled,
}

impl DepositStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
            Self::Reconciled => "reconciled",
        }
    }

    /// Whether this deposit counts toward settled on-chain inflows.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Reconciled)
    }
}

/// An observed on-chain stablecoin deposit.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Deposit {
    pub id: DepositId,
    pub user_id: UserId,
    pub chain: ChainName,
    /// Unique: the same on-chain transfer is never recorded twice.
    pub tx_hash: TxHash,
    pub token: TokenSymbol,
    pub amount: Amount,
    pub status: DepositStatus,
    pub created_at: TimestampMs,
    pub updated_at: TimestampMs,
}

/// A request to process a deposit, as handed to the engine by the
/// funding-event worker.
#[derive(Clone, Debug)]
pub struct DepositRequest {
    pub user_id: UserId,
    /// The custodian's id for the receiving wallet; must belong to
    /// `user_id`.
    pub custodian_wallet_id: String,
    pub chain: ChainName,
    pub tx_hash: TxHash,
    pub token: TokenSymbol,
    pub amount: Amount,
    pub from_address: String,
}

#[cfg(test)]
mod test {
    use common::test_utils::roundtrip;

    use super::*;

    #[test]
    fn deposit_status_json_backwards_compat() {
        let expected_ser = r#"["pending","confirmed","failed","reconciled"]"#;
        roundtrip::json_unit_enum_backwards_compat::<DepositStatus>(
            expected_ser,
        );
    }

    #[test]
    fn settled_statuses() {
        assert!(DepositStatus::Confirmed.is_settled());
        assert!(DepositStatus::Reconciled.is_settled());
        assert!(!DepositStatus::Pending.is_settled());
        assert!(!DepositStatus::Failed.is_settled());
    }
}
