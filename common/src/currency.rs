use std::{fmt, str::FromStr};

use anyhow::anyhow;
#[cfg(any(test, feature = "test-utils"))]
use proptest_derive::Arbitrary;
use serde::{Deserialize, Serialize};

/// The two currencies the ledger moves between realms.
///
/// Conversion between them is treated as 1:1 unless a provider reports
/// otherwise; ledger invariants (balanced entries, non-negative balances) are
/// always enforced *per currency*.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[cfg_attr(any(test, feature = "test-utils"), derive(Arbitrary))]
#[cfg_attr(test, derive(strum::VariantArray))]
pub enum Currency {
    /// The on-chain stablecoin realm.
    Usdc,
    /// The fiat realm: conversion providers and the brokerage account.
    Usd,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Usdc => "USDC",
            Self::Usd => "USD",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USDC" => Ok(Self::Usdc),
            "USD" => Ok(Self::Usd),
            _ => Err(anyhow!("Unknown currency: '{s}'")),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::test_utils::roundtrip;

    use super::*;

    #[test]
    fn currency_json_backwards_compat() {
        let expected_ser = r#"["USDC","USD"]"#;
        roundtrip::json_unit_enum_backwards_compat::<Currency>(expected_ser);
    }

    #[test]
    fn currency_from_str_roundtrip() {
        for currency in [Currency::Usdc, Currency::Usd] {
            assert_eq!(currency.as_str().parse::<Currency>().unwrap(), currency);
        }
    }
}
