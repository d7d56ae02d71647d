use common::{
    amount::Amount,
    ids::{UserId, WithdrawalId},
    time::TimestampMs,
};
#[cfg(any(test, feature = "test-utils"))]
use proptest_derive::Arbitrary;
use serde::{Deserialize, Serialize};

use crate::types::{ChainName, TxHash};

/// The withdrawal lifecycle.
///
/// ```text
/// pending -> broker_debited -> provider_processing -> on_chain_transfer
///                                                         |
///                                              completed <+> failed
/// ```
///
/// Only `pending` withdrawals are eligible for execution; the intermediate
/// states are written by the upstream divest flow (out of scope here), and
/// `completed` / `failed` are terminal.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(any(test, feature = "test-utils"), derive(Arbitrary))]
#[cfg_attr(test, derive(strum::VariantArray))]
pub enum WithdrawalStatus {
    /// Created and eligible for execution.
    Pending,
    /// Brokerage-side fiat has been debited.
    BrokerDebited,
    /// A conversion provider is moving the funds back to USDC.
    ProviderProcessing,
    /// The custodian transfer has been requested.
    OnChainTransfer,
    /// The custodian accepted the transfer; ledger entries are posted.
    Completed,
    /// Execution failed; any posted ledger entries are left for
    /// reconciliation and operator-triggered reversal.
    Failed,
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::BrokerDebited => "broker_debited",
            Self::ProviderProcessing => "provider_processing",
            Self::OnChainTransfer => "on_chain_transfer",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A stablecoin withdrawal back to a user-controlled address.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub id: WithdrawalId,
    pub user_id: UserId,
    pub amount: Amount,
    pub destination_chain: ChainName,
    pub destination_address: String,
    pub status: WithdrawalStatus,
    /// The custodian's transfer id, assigned once the transfer request is
    /// accepted. Distinct from `tx_hash`: the custodian id is not an
    /// on-chain hash.
    pub provider_transfer_id: Option<String>,
    /// The on-chain hash, set only if/when observed on chain.
    pub tx_hash: Option<TxHash>,
    pub error: Option<String>,
    pub created_at: TimestampMs,
    pub updated_at: TimestampMs,
}

impl Withdrawal {
    pub fn new(
        user_id: UserId,
        amount: Amount,
        destination_chain: ChainName,
        destination_address: String,
        now: TimestampMs,
    ) -> Self {
        Self {
            id: WithdrawalId::generate(),
            user_id,
            amount,
            destination_chain,
            destination_address,
            status: WithdrawalStatus::Pending,
            provider_transfer_id: None,
            tx_hash: None,
            error: None,
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
    fn withdrawal_status_json_backwards_compat() {
        let expected_ser = r#"["pending","broker_debited","provider_processing","on_chain_transfer","completed","failed"]"#;
        roundtrip::json_unit_enum_backwards_compat::<WithdrawalStatus>(
            expected_ser,
        );
    }

    #[test]
    fn terminal_statuses() {
        assert!(WithdrawalStatus::Completed.is_terminal());
        assert!(WithdrawalStatus::Failed.is_terminal());
        assert!(!WithdrawalStatus::Pending.is_terminal());
        assert!(!WithdrawalStatus::OnChainTransfer.is_terminal());
    }
}
