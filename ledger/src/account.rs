use std::{fmt, str::FromStr};

use anyhow::anyhow;
use common::{
    amount::Amount,
    currency::Currency,
    ids::{AccountId, UserId},
    time::TimestampMs,
};
#[cfg(any(test, feature = "test-utils"))]
use proptest_derive::Arbitrary;
use serde::{Deserialize, Serialize};

/// The fixed set of account types the ledger knows about.
///
/// User accounts exist per `(user_id, account_type)`; system accounts exist
/// once per type with no owning user. Both are asset accounts: a debit
/// increases the balance and a credit decreases it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(any(test, feature = "test-utils"), derive(Arbitrary))]
#[cfg_attr(test, derive(strum::VariantArray))]
pub enum AccountType {
    /// A user's spendable on-chain stablecoin balance.
    UsdcBalance,
    /// A user's fiat exposure at the brokerage.
    FiatExposure,
    /// Funds a user has reserved for a not-yet-executed investment.
    PendingInvestment,
    /// The "spending" leg of a user's smart-allocation split.
    SpendingBalance,
    /// The "stash" leg of a user's smart-allocation split.
    StashBalance,
    /// System liquidity buffer in the stablecoin realm.
    SystemBufferUsdc,
    /// System liquidity buffer in the fiat realm.
    SystemBufferFiat,
    /// The brokerage's operational fiat account.
    BrokerOperational,
}

impl AccountType {
    /// Whether this type denotes a system-owned account (no `user_id`).
    pub fn is_system(&self) -> bool {
        matches!(
            self,
            Self::SystemBufferUsdc
                | Self::SystemBufferFiat
                | Self::BrokerOperational
        )
    }

    /// The currency an account of this type holds.
    pub fn currency(&self) -> Currency {
        match self {
            Self::UsdcBalance
            | Self::PendingInvestment
            | Self::StashBalance
            | Self::SystemBufferUsdc => Currency::Usdc,
            Self::FiatExposure
            | Self::SpendingBalance
            | Self::SystemBufferFiat
            | Self::BrokerOperational => Currency::Usd,
        }
    }

    /// All system account types, in seeding order.
    pub const SYSTEM_TYPES: [Self; 3] = [
        Self::SystemBufferUsdc,
        Self::SystemBufferFiat,
        Self::BrokerOperational,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UsdcBalance => "usdc_balance",
            Self::FiatExposure => "fiat_exposure",
            Self::PendingInvestment => "pending_investment",
            Self::SpendingBalance => "spending_balance",
            Self::StashBalance => "stash_balance",
            Self::SystemBufferUsdc => "system_buffer_usdc",
            Self::SystemBufferFiat => "system_buffer_fiat",
            Self::BrokerOperational => "broker_operational",
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountType {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "usdc_balance" => Ok(Self::UsdcBalance),
            "fiat_exposure" => Ok(Self::FiatExposure),
            "pending_investment" => Ok(Self::PendingInvestment),
            "spending_balance" => Ok(Self::SpendingBalance),
            "stash_balance" => Ok(Self::StashBalance),
            "system_buffer_usdc" => Ok(Self::SystemBufferUsdc),
            "system_buffer_fiat" => Ok(Self::SystemBufferFiat),
            "broker_operational" => Ok(Self::BrokerOperational),
            _ => Err(anyhow!("Unknown account type: '{s}'")),
        }
    }
}

/// A ledger account row.
///
/// The `balance` is maintained by the store as entries are committed; it is
/// always non-negative and always equals the net effect of all committed
/// entries on this account.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// `None` for system accounts.
    pub user_id: Option<UserId>,
    pub account_type: AccountType,
    pub currency: Currency,
    pub balance: Amount,
    pub created_at: TimestampMs,
    pub updated_at: TimestampMs,
}

impl Account {
    /// A fresh zero-balance account. System accounts get `user_id: None`.
    pub fn new(
        user_id: Option<UserId>,
        account_type: AccountType,
        now: TimestampMs,
    ) -> Self {
        debug_assert_eq!(user_id.is_none(), account_type.is_system());
        Self {
            id: AccountId::generate(),
            user_id,
            account_type,
            currency: account_type.currency(),
            balance: Amount::ZERO,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod test {
    use common::test_utils::roundtrip;

    use super::*;

    #[test]
    fn account_type_json_backwards_compat() {
        let expected_ser = r#"["usdc_balance","fiat_exposure","pending_investment","spending_balance","stash_balance","system_buffer_usdc","system_buffer_fiat","broker_operational"]"#;
        roundtrip::json_unit_enum_backwards_compat::<AccountType>(expected_ser);
    }

    #[test]
    fn account_type_str_roundtrip() {
        use strum::VariantArray;
        for account_type in AccountType::VARIANTS {
            let parsed =
                account_type.as_str().parse::<AccountType>().unwrap();
            assert_eq!(parsed, *account_type);
        }
    }

    #[test]
    fn system_types_are_system() {
        for account_type in AccountType::SYSTEM_TYPES {
            assert!(account_type.is_system());
        }
        assert!(!AccountType::UsdcBalance.is_system());
        assert!(!AccountType::SpendingBalance.is_system());
    }

    #[test]
    fn currencies_match_realms() {
        assert_eq!(
            AccountType::SystemBufferUsdc.currency(),
            common::currency::Currency::Usdc
        );
        assert_eq!(
            AccountType::BrokerOperational.currency(),
            common::currency::Currency::Usd
        );
    }
}
