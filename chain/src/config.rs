use std::{collections::HashMap, time::Duration};

use common::amount::Amount;
use rust_decimal::Decimal;

use crate::types::ChainName;

/// On-chain engine options.
#[derive(Clone, Debug)]
pub struct ChainConfig {
    /// How often the deposit observer polls (upstream of the queue).
    pub deposit_poll_interval: Duration,
    /// Confirmations required before an observer emits a funding event,
    /// per chain. Chains absent here use the custodian's default.
    pub confirmation_blocks_per_chain: HashMap<ChainName, u32>,
    /// Deposits below this amount are rejected as permanent failures.
    pub min_deposit_amount: Amount,
    /// Extra native-token headroom the custodian keeps for withdrawal gas.
    pub withdrawal_gas_buffer: Decimal,
    /// Attempts before a withdrawal execution gives up.
    pub withdrawal_retry_attempts: u32,
    /// Deadline for one withdrawal execution end to end.
    pub withdrawal_timeout: Duration,
    /// How often the buffer observer compares ledger vs custodian balances.
    pub buffer_check_interval: Duration,
    /// Alert when the custodian-side buffer drops below this.
    pub buffer_alert_threshold: Amount,
    /// Alert when |ledger - custodian| exceeds this.
    pub buffer_discrepancy_epsilon: Amount,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            deposit_poll_interval: Duration::from_secs(30),
            confirmation_blocks_per_chain: HashMap::new(),
            min_deposit_amount: Amount::from_u64(1),
            withdrawal_gas_buffer: Decimal::new(5, 2), // 0.05
            withdrawal_retry_attempts: 3,
            withdrawal_timeout: Duration::from_secs(10 * 60),
            buffer_check_interval: Duration::from_secs(5 * 60),
            buffer_alert_threshold: Amount::from_u64(1_000),
            buffer_discrepancy_epsilon: Amount::from_u64(1),
        }
    }
}
