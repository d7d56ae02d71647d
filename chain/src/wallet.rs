use common::{
    ids::{UserId, WalletId},
    time::TimestampMs,
};
use serde::{Deserialize, Serialize};

use crate::types::ChainName;

/// A custodian-held wallet assigned to a user on a given chain.
///
/// The custodian owns the keys; we only hold its wallet id and the deposit
/// address we hand out to the user.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ManagedWallet {
    pub id: WalletId,
    pub user_id: UserId,
    pub chain: ChainName,
    /// The custodian's identifier for this wallet.
    pub custodian_wallet_id: String,
    /// The on-chain deposit address.
    pub address: String,
    pub created_at: TimestampMs,
}
