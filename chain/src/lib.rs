//! The on-chain engine and its durable inbox.
//!
//! This crate owns everything that touches the chain boundary:
//!
//! - ingesting deposit events (idempotently, via the funding-event queue),
//! - executing withdrawals through the managed-wallet custodian,
//! - observing the stablecoin buffer against custodian truth.
//!
//! The engine never signs anything; on-chain movement is always delegated to
//! the custodian, and the ledger remains the canonical record of balances.

/// Chain engine configuration.
pub mod config;
/// The managed-wallet custodian API seam.
pub mod custodian;
/// Deposit entity and request.
pub mod deposit;
/// The on-chain engine.
pub mod engine;
/// Chain error taxonomy and retry classification.
pub mod error;
/// The durable funding-event inbox.
pub mod queue;
/// The chain persistence seam.
pub mod store;
/// Chain-boundary primitives (chain names, tx hashes, token symbols).
pub mod types;
/// Managed wallets.
pub mod wallet;
/// Withdrawal entity and status machine.
pub mod withdrawal;
/// Funding-event worker pool.
pub mod worker;

pub use config::ChainConfig;
pub use custodian::{
    CustodianApi, CustodianError, HttpCustodianClient, TokenBalance,
    TransferFundsRequest,
};
pub use deposit::{Deposit, DepositRequest, DepositStatus};
pub use engine::{BufferStatus, ChainEngine};
pub use error::{ChainError, ErrorClass};
pub use queue::{
    FundingEvent, FundingEventStatus, MetricsRecorder, NewFundingEvent,
    QueueMetrics,
};
pub use store::{ChainStore, FundingQueueStore};
pub use types::{ChainName, TokenSymbol, TxHash};
pub use wallet::ManagedWallet;
pub use withdrawal::{Withdrawal, WithdrawalStatus};
pub use worker::{spawn_funding_workers, WorkerConfig};
