//! An in-memory implementation of every store seam.
//!
//! Backs the test suites and the dev-mode node. One [`Mutex`] guards the
//! whole state, which makes the cross-entity atomicity guarantees (balance
//! application, reversal marking, claim batches) trivially correct - the
//! same guarantees the Postgres store provides with row locks and database
//! transactions.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use allocation::{AllocationEvent, AllocationMode, WeeklyAllocationSummary};
use chain::{Deposit, FundingEvent, ManagedWallet, Withdrawal};
use chain::{ChainName, TxHash};
use chrono::NaiveDate;
use common::{
    amount::Amount,
    ids::{
        AccountId, AllocationEventId, ConversionJobId, DepositId,
        FundingEventId, ProviderId, ReportId, TxnId, UserId, WalletId,
        WithdrawalId,
    },
    time::TimestampMs,
};
use ledger::{Account, AccountType, LedgerTransaction};
use recon::{CheckRecord, ReconException, ReconReport};
use treasury::{BufferThreshold, ConversionJob, ConversionProvider};
use uuid::Uuid;

mod allocation_store;
mod chain_store;
mod ledger_store;
mod queue_store;
mod recon_store;
mod treasury_store;

/// The shared in-memory state.
///
/// The secondary maps are the uniqueness indexes the schema would enforce:
/// one account per `(user, type)`, one transaction per idempotency key, one
/// funding event per `(tx_hash, chain)`, and so on.
#[derive(Default)]
pub(crate) struct State {
    // Ledger
    pub accounts: HashMap<AccountId, Account>,
    pub user_account_index: HashMap<(UserId, AccountType), AccountId>,
    pub system_account_index: HashMap<AccountType, AccountId>,
    pub transactions: HashMap<TxnId, LedgerTransaction>,
    pub txn_by_idempotency_key: HashMap<String, TxnId>,
    /// Insertion order, newest last; drives history pagination.
    pub txn_order: Vec<TxnId>,

    // Chain
    pub deposits: HashMap<DepositId, Deposit>,
    pub deposit_by_tx_hash: HashMap<TxHash, DepositId>,
    pub withdrawals: HashMap<WithdrawalId, Withdrawal>,
    pub wallets: HashMap<WalletId, ManagedWallet>,

    // Funding queue
    pub funding_events: HashMap<FundingEventId, FundingEvent>,
    pub funding_event_index: HashMap<(TxHash, ChainName), FundingEventId>,

    // Treasury
    pub providers: HashMap<ProviderId, ConversionProvider>,
    pub provider_by_name: HashMap<String, ProviderId>,
    pub thresholds: HashMap<AccountType, BufferThreshold>,
    pub jobs: HashMap<ConversionJobId, ConversionJob>,
    pub job_by_idempotency_key: HashMap<String, ConversionJobId>,

    // Allocation
    pub modes: HashMap<UserId, AllocationMode>,
    pub allocation_events: HashMap<AllocationEventId, AllocationEvent>,
    pub weekly_summaries: HashMap<(UserId, NaiveDate), WeeklyAllocationSummary>,

    // Reconciliation
    pub reports: HashMap<ReportId, ReconReport>,
    pub checks: Vec<CheckRecord>,
    pub exceptions: HashMap<Uuid, ReconException>,
}

/// The in-memory store. Cheap to clone via [`std::sync::Arc`]; every store
/// trait in the workspace is implemented on it.
#[derive(Default)]
pub struct MemStore {
    state: Mutex<State>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Directly sets an account balance, bypassing the double-entry
    /// machinery. Dev/test seeding only: production buffer funding arrives
    /// through real ledger transactions.
    pub fn seed_account_balance(&self, account_id: AccountId, balance: Amount) {
        let mut state = self.lock();
        let account = state
            .accounts
            .get_mut(&account_id)
            .expect("seed_account_balance: unknown account");
        account.balance = balance;
        account.updated_at = TimestampMs::now();
    }

    /// The number of committed ledger transactions; test convenience.
    pub fn transaction_count(&self) -> usize {
        self.lock().transactions.len()
    }
}
