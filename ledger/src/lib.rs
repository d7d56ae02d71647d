//! The double-entry ledger: canonical source of truth for all balances.
//!
//! Every balance change in the system is a balanced, atomic, idempotent
//! ledger transaction. The [`LedgerService`] validates proposed transactions
//! before any write; the [`LedgerStore`] commits them atomically under
//! per-account row locks. The split mirrors a check / persist / commit
//! discipline: nothing touches storage until the transaction has been proven
//! internally consistent, and nothing is observable until the storage layer
//! has committed the whole unit.
//!
//! [`LedgerService`]: crate::service::LedgerService
//! [`LedgerStore`]: crate::store::LedgerStore

/// Ledger accounts and account types.
pub mod account;
/// Canonical entry pairs for every money movement.
pub mod entries;
/// Debit/credit entries.
pub mod entry;
/// Ledger error taxonomy.
pub mod error;
/// `LedgerService`.
pub mod service;
/// The `LedgerStore` persistence seam.
pub mod store;
/// Ledger transactions.
pub mod transaction;

pub use account::{Account, AccountType};
pub use entry::{Entry, EntryType, NewEntry};
pub use error::LedgerError;
pub use service::{CreateTransactionRequest, LedgerService};
pub use store::{Committed, LedgerStore, NewLedgerTransaction, StoreError};
pub use transaction::{
    LedgerTransaction, Reference, ReferenceKind, TxnStatus, TxnType,
};
