use std::fmt;

use serde::{Deserialize, Serialize};

/// The name of a chain the custodian supports ("ethereum", "base", ...).
///
/// Kept as a normalized string rather than an enum: new chains are enabled
/// by custodian configuration, not code changes.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainName(String);

impl ChainName {
    /// Normalizes to lowercase so `(tx_hash, chain)` dedup can't be dodged
    /// by case games in a webhook payload.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An on-chain transaction hash, as reported by the chain observer.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(String);

impl TxHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A token symbol as the custodian reports it ("USDC").
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSymbol(String);

impl TokenSymbol {
    pub const USDC: &'static str = "USDC";

    pub fn new(symbol: impl AsRef<str>) -> Self {
        Self(symbol.as_ref().trim().to_ascii_uppercase())
    }

    pub fn usdc() -> Self {
        Self(Self::USDC.to_owned())
    }

    pub fn is_usdc(&self) -> bool {
        self.0 == Self::USDC
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TokenSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn chain_name_normalizes() {
        assert_eq!(ChainName::new(" Base "), ChainName::new("base"));
        assert_eq!(ChainName::new("ETHEREUM").as_str(), "ethereum");
    }

    #[test]
    fn token_symbol_normalizes() {
        assert!(TokenSymbol::new("usdc").is_usdc());
        assert_eq!(TokenSymbol::usdc().as_str(), "USDC");
    }
}
