use common::{
    amount::Amount,
    ids::{AllocationEventId, TxnId, UserId},
    time::TimestampMs,
};
#[cfg(any(test, feature = "test-utils"))]
use proptest_derive::Arbitrary;
use serde::{Deserialize, Serialize};

/// What caused an allocation split.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(any(test, feature = "test-utils"), derive(Arbitrary))]
#[cfg_attr(test, derive(strum::VariantArray))]
pub enum AllocationEventType {
    /// An incoming on-chain deposit was split.
    Deposit,
    /// An operator-initiated correction.
    Adjustment,
}

impl AllocationEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Adjustment => "adjustment",
        }
    }
}

/// An immutable record of one allocation split.
///
/// Invariant: `total = stash_amount + spending_amount`, exactly.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AllocationEvent {
    pub id: AllocationEventId,
    pub user_id: UserId,
    pub total: Amount,
    pub stash_amount: Amount,
    pub spending_amount: Amount,
    pub event_type: AllocationEventType,
    /// The ledger transaction that posted this split.
    pub source_txn_id: TxnId,
    pub metadata: serde_json::Value,
    pub created_at: TimestampMs,
}

#[cfg(test)]
mod test {
    use common::test_utils::roundtrip;

    use super::*;

    #[test]
    fn event_type_json_backwards_compat() {
        let expected_ser = r#"["deposit","adjustment"]"#;
        roundtrip::json_unit_enum_backwards_compat::<AllocationEventType>(
            expected_ser,
        );
    }
}
