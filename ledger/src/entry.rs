use common::{
    amount::Amount,
    currency::Currency,
    ids::{AccountId, EntryId, TxnId},
};
#[cfg(any(test, feature = "test-utils"))]
use proptest_derive::Arbitrary;
use serde::{Deserialize, Serialize};

/// Whether an entry increases (debit) or decreases (credit) the balance of
/// the asset account it posts to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(any(test, feature = "test-utils"), derive(Arbitrary))]
#[cfg_attr(test, derive(strum::VariantArray))]
pub enum EntryType {
    Debit,
    Credit,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
        }
    }

    /// The opposite side; used when building reversals.
    pub fn flipped(&self) -> Self {
        match self {
            Self::Debit => Self::Credit,
            Self::Credit => Self::Debit,
        }
    }
}

/// A leaf posting within a committed ledger transaction.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub transaction_id: TxnId,
    pub account_id: AccountId,
    pub entry_type: EntryType,
    /// Always strictly positive; the sign lives in `entry_type`.
    pub amount: Amount,
    pub currency: Currency,
    pub description: Option<String>,
}

/// An entry proposed as part of a not-yet-committed transaction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NewEntry {
    pub account_id: AccountId,
    pub entry_type: EntryType,
    pub amount: Amount,
    pub currency: Currency,
    pub description: Option<String>,
}

impl NewEntry {
    pub fn debit(
        account_id: AccountId,
        amount: Amount,
        currency: Currency,
    ) -> Self {
        Self {
            account_id,
            entry_type: EntryType::Debit,
            amount,
            currency,
            description: None,
        }
    }

    pub fn credit(
        account_id: AccountId,
        amount: Amount,
        currency: Currency,
    ) -> Self {
        Self {
            account_id,
            entry_type: EntryType::Credit,
            amount,
            currency,
            description: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The signed effect of this entry on its account's balance.
    /// Debits increase asset accounts; credits decrease them.
    pub fn signed_effect(&self) -> rust_decimal::Decimal {
        match self.entry_type {
            EntryType::Debit => self.amount.to_decimal(),
            EntryType::Credit => -self.amount.to_decimal(),
        }
    }
}

#[cfg(test)]
mod test {
    use common::test_utils::roundtrip;

    use super::*;

    #[test]
    fn entry_type_json_backwards_compat() {
        let expected_ser = r#"["debit","credit"]"#;
        roundtrip::json_unit_enum_backwards_compat::<EntryType>(expected_ser);
    }

    #[test]
    fn flipped_is_involutive() {
        assert_eq!(EntryType::Debit.flipped(), EntryType::Credit);
        assert_eq!(EntryType::Credit.flipped(), EntryType::Debit);
        assert_eq!(EntryType::Debit.flipped().flipped(), EntryType::Debit);
    }
}
