use std::fmt;

use common::{
    ids::{IdempotencyKey, TxnId, UserId},
    time::TimestampMs,
};
#[cfg(any(test, feature = "test-utils"))]
use proptest_derive::Arbitrary;
use serde::{Deserialize, Serialize};

use crate::entry::Entry;

/// The business meaning of a ledger transaction.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(any(test, feature = "test-utils"), derive(Arbitrary))]
#[cfg_attr(test, derive(strum::VariantArray))]
pub enum TxnType {
    Deposit,
    Withdrawal,
    Conversion,
    InternalTransfer,
    CardPayment,
    BrokerFunding,
    Reversal,
}

impl TxnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
            Self::Conversion => "conversion",
            Self::InternalTransfer => "internal_transfer",
            Self::CardPayment => "card_payment",
            Self::BrokerFunding => "broker_funding",
            Self::Reversal => "reversal",
        }
    }
}

impl fmt::Display for TxnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The lifecycle state of a ledger transaction.
///
/// Transactions are only ever observable as `completed`, `failed` or
/// `reversed`: the `pending` → `completed` flip happens inside the same
/// storage transaction that posts the entries and updates the balances.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(any(test, feature = "test-utils"), derive(Arbitrary))]
#[cfg_attr(test, derive(strum::VariantArray))]
pub enum TxnStatus {
    Pending,
    Completed,
    Failed,
    Reversed,
}

impl TxnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Reversed => "reversed",
        }
    }
}

impl fmt::Display for TxnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of external object a transaction references.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(any(test, feature = "test-utils"), derive(Arbitrary))]
#[cfg_attr(test, derive(strum::VariantArray))]
pub enum ReferenceKind {
    Deposit,
    Withdrawal,
    ConversionJob,
    AllocationEvent,
    CardPayment,
    LedgerTransaction,
}

/// A typed pointer from a ledger transaction to the external object that
/// caused it. This is a forward pointer plus a lookup relation - the object
/// (e.g. a conversion job) owns the strong link back to the transaction.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub kind: ReferenceKind,
    pub id: String,
}

impl Reference {
    pub fn new(kind: ReferenceKind, id: impl ToString) -> Self {
        Self {
            kind,
            id: id.to_string(),
        }
    }
}

/// A committed ledger transaction together with its entries.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: TxnId,
    pub user_id: Option<UserId>,
    pub txn_type: TxnType,
    pub reference: Option<Reference>,
    pub status: TxnStatus,
    pub idempotency_key: IdempotencyKey,
    pub description: Option<String>,
    pub metadata: serde_json::Value,
    pub entries: Vec<Entry>,
    pub created_at: TimestampMs,
    pub completed_at: Option<TimestampMs>,
}

#[cfg(test)]
mod test {
    use common::test_utils::roundtrip;

    use super::*;

    #[test]
    fn txn_type_json_backwards_compat() {
        let expected_ser = r#"["deposit","withdrawal","conversion","internal_transfer","card_payment","broker_funding","reversal"]"#;
        roundtrip::json_unit_enum_backwards_compat::<TxnType>(expected_ser);
    }

    #[test]
    fn txn_status_json_backwards_compat() {
        let expected_ser = r#"["pending","completed","failed","reversed"]"#;
        roundtrip::json_unit_enum_backwards_compat::<TxnStatus>(expected_ser);
    }

    #[test]
    fn reference_kind_json_backwards_compat() {
        let expected_ser = r#"["deposit","withdrawal","conversion_job","allocation_event","card_payment","ledger_transaction"]"#;
        roundtrip::json_unit_enum_backwards_compat::<ReferenceKind>(
            expected_ser,
        );
    }
}
