//! Newtype ids for every persisted entity.
//!
//! Each id wraps a [`Uuid`] so that ids of different entities cannot be
//! confused at compile time. All ids serialize as the canonical hyphenated
//! string form.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash,
            Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random id.
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::from_str(s).map(Self)
            }
        }

        #[cfg(any(test, feature = "test-utils"))]
        impl proptest::arbitrary::Arbitrary for $name {
            type Parameters = ();
            type Strategy = proptest::strategy::BoxedStrategy<Self>;
            fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
                use proptest::strategy::Strategy;
                proptest::arbitrary::any::<u128>()
                    .prop_map(|n| Self(Uuid::from_u128(n)))
                    .boxed()
            }
        }
    };
}

uuid_id!(
    /// A customer of the service. Absent on system-owned accounts.
    UserId
);
uuid_id!(
    /// A ledger account row.
    AccountId
);
uuid_id!(
    /// A ledger transaction (a balanced group of entries).
    TxnId
);
uuid_id!(
    /// A single debit or credit posting within a ledger transaction.
    EntryId
);
uuid_id!(
    /// An on-chain stablecoin deposit.
    DepositId
);
uuid_id!(
    /// A stablecoin withdrawal back to a user address.
    WithdrawalId
);
uuid_id!(
    /// A custodian-managed wallet assigned to a user on some chain.
    WalletId
);
uuid_id!(
    /// A conversion job orchestrated by the treasury engine.
    ConversionJobId
);
uuid_id!(
    /// A registered conversion provider.
    ProviderId
);
uuid_id!(
    /// A durable funding-event job in the webhook inbox.
    FundingEventId
);
uuid_id!(
    /// An immutable smart-allocation split record.
    AllocationEventId
);
uuid_id!(
    /// A reconciliation run.
    ReportId
);

/// The caller-supplied key that makes a ledger transaction (or conversion
/// job) idempotent. Uniqueness is enforced at the storage layer; the ledger
/// rejects empty keys before any write.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl proptest::arbitrary::Arbitrary for IdempotencyKey {
    type Parameters = ();
    type Strategy = proptest::strategy::BoxedStrategy<Self>;
    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        use proptest::strategy::Strategy;
        "[a-z0-9-]{8,40}".prop_map(Self::new).boxed()
    }
}

#[cfg(test)]
mod test {
    use crate::test_utils::roundtrip;

    use super::*;

    #[test]
    fn id_serde_roundtrips() {
        roundtrip::json_string_roundtrip_proptest::<UserId>();
        roundtrip::json_string_roundtrip_proptest::<AccountId>();
        roundtrip::json_string_roundtrip_proptest::<TxnId>();
        roundtrip::json_string_roundtrip_proptest::<ConversionJobId>();
        roundtrip::json_string_roundtrip_proptest::<IdempotencyKey>();
    }

    #[test]
    fn display_fromstr_roundtrip() {
        let id = AccountId::generate();
        assert_eq!(id.to_string().parse::<AccountId>().unwrap(), id);
    }
}
