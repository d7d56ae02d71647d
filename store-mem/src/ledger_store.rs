use async_trait::async_trait;
use common::{
    amount::Amount,
    ids::{AccountId, EntryId, IdempotencyKey, TxnId, UserId},
    time::TimestampMs,
};
use ledger::{
    store::{Committed, LedgerStore, NewLedgerTransaction, StoreError},
    Account, AccountType, Entry, LedgerTransaction, TxnStatus,
};
use rust_decimal::Decimal;

use crate::{MemStore, State};

impl State {
    /// Applies a validated transaction to the books, or returns the error
    /// that prevents it. All-or-nothing: balances are only touched after
    /// every check has passed (the moral equivalent of taking all the row
    /// locks first).
    fn apply_transaction(
        &mut self,
        new: NewLedgerTransaction,
    ) -> Result<LedgerTransaction, StoreError> {
        // Net effect per account, in ascending account-id order to match
        // the locking discipline the SQL store uses.
        let mut net_by_account: Vec<(AccountId, Decimal)> = Vec::new();
        for entry in &new.entries {
            match net_by_account
                .iter_mut()
                .find(|(id, _)| *id == entry.account_id)
            {
                Some((_, net)) => *net += entry.signed_effect(),
                None => net_by_account
                    .push((entry.account_id, entry.signed_effect())),
            }
        }
        net_by_account.sort_by_key(|(id, _)| *id);

        // Check every account before mutating any.
        for (account_id, net) in &net_by_account {
            let account = self
                .accounts
                .get(account_id)
                .ok_or(StoreError::AccountNotFound(*account_id))?;
            let new_balance = account.balance.to_decimal() + net;
            if new_balance.is_sign_negative() {
                return Err(StoreError::InsufficientBalance {
                    account_id: *account_id,
                    balance: account.balance,
                    required: Amount::try_from_decimal(net.abs())
                        .unwrap_or(Amount::MAX),
                });
            }
        }

        let now = TimestampMs::now();
        for (account_id, net) in &net_by_account {
            let account = self
                .accounts
                .get_mut(account_id)
                .expect("checked above");
            let new_balance = account.balance.to_decimal() + net;
            account.balance = Amount::try_from_decimal(new_balance)
                .expect("checked non-negative above");
            account.updated_at = now;
        }

        let entries = new
            .entries
            .into_iter()
            .map(|entry| Entry {
                id: EntryId::generate(),
                transaction_id: new.id,
                account_id: entry.account_id,
                entry_type: entry.entry_type,
                amount: entry.amount,
                currency: entry.currency,
                description: entry.description,
            })
            .collect();

        let transaction = LedgerTransaction {
            id: new.id,
            user_id: new.user_id,
            txn_type: new.txn_type,
            reference: new.reference,
            status: TxnStatus::Completed,
            idempotency_key: new.idempotency_key.clone(),
            description: new.description,
            metadata: new.metadata,
            entries,
            created_at: new.created_at,
            completed_at: Some(now),
        };

        self.txn_by_idempotency_key
            .insert(new.idempotency_key.as_str().to_owned(), new.id);
        self.transactions.insert(new.id, transaction.clone());
        self.txn_order.push(new.id);
        Ok(transaction)
    }

    fn existing_by_key(
        &self,
        key: &IdempotencyKey,
    ) -> Option<LedgerTransaction> {
        self.txn_by_idempotency_key
            .get(key.as_str())
            .and_then(|id| self.transactions.get(id))
            .cloned()
    }
}

#[async_trait]
impl LedgerStore for MemStore {
    async fn commit_transaction(
        &self,
        new: NewLedgerTransaction,
    ) -> Result<Committed, StoreError> {
        let mut state = self.lock();
        if let Some(existing) = state.existing_by_key(&new.idempotency_key) {
            return Ok(Committed::Replayed(existing));
        }
        state.apply_transaction(new).map(Committed::Created)
    }

    async fn commit_reversal(
        &self,
        original_id: TxnId,
        reversal: NewLedgerTransaction,
    ) -> Result<Committed, StoreError> {
        let mut state = self.lock();
        if let Some(existing) = state.existing_by_key(&reversal.idempotency_key)
        {
            return Ok(Committed::Replayed(existing));
        }

        let original = state
            .transactions
            .get(&original_id)
            .ok_or(StoreError::TransactionNotFound(original_id))?;
        if original.status != TxnStatus::Completed {
            return Err(StoreError::NotReversible {
                id: original_id,
                status: original.status,
            });
        }

        let committed = state.apply_transaction(reversal)?;
        state
            .transactions
            .get_mut(&original_id)
            .expect("checked above")
            .status = TxnStatus::Reversed;
        Ok(Committed::Created(committed))
    }

    async fn upsert_account(
        &self,
        account: Account,
    ) -> Result<Account, StoreError> {
        let mut state = self.lock();
        let existing_id = match account.user_id {
            Some(user_id) => state
                .user_account_index
                .get(&(user_id, account.account_type))
                .copied(),
            None =>
                state.system_account_index.get(&account.account_type).copied(),
        };
        if let Some(id) = existing_id {
            return Ok(state.accounts[&id].clone());
        }

        match account.user_id {
            Some(user_id) => {
                state
                    .user_account_index
                    .insert((user_id, account.account_type), account.id);
            }
            None => {
                state
                    .system_account_index
                    .insert(account.account_type, account.id);
            }
        }
        state.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn get_account(
        &self,
        id: AccountId,
    ) -> Result<Option<Account>, StoreError> {
        Ok(self.lock().accounts.get(&id).cloned())
    }

    async fn find_user_account(
        &self,
        user_id: UserId,
        account_type: AccountType,
    ) -> Result<Option<Account>, StoreError> {
        let state = self.lock();
        Ok(state
            .user_account_index
            .get(&(user_id, account_type))
            .map(|id| state.accounts[id].clone()))
    }

    async fn find_system_account(
        &self,
        account_type: AccountType,
    ) -> Result<Option<Account>, StoreError> {
        let state = self.lock();
        Ok(state
            .system_account_index
            .get(&account_type)
            .map(|id| state.accounts[id].clone()))
    }

    async fn list_user_accounts(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Account>, StoreError> {
        Ok(self
            .lock()
            .accounts
            .values()
            .filter(|account| account.user_id == Some(user_id))
            .cloned()
            .collect())
    }

    async fn list_system_accounts(&self) -> Result<Vec<Account>, StoreError> {
        Ok(self
            .lock()
            .accounts
            .values()
            .filter(|account| account.user_id.is_none())
            .cloned()
            .collect())
    }

    async fn get_transaction(
        &self,
        id: TxnId,
    ) -> Result<Option<LedgerTransaction>, StoreError> {
        Ok(self.lock().transactions.get(&id).cloned())
    }

    async fn find_transaction_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<LedgerTransaction>, StoreError> {
        Ok(self.lock().existing_by_key(key))
    }

    async fn list_user_transactions(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerTransaction>, StoreError> {
        let state = self.lock();
        let user_accounts: Vec<AccountId> = state
            .accounts
            .values()
            .filter(|account| account.user_id == Some(user_id))
            .map(|account| account.id)
            .collect();

        Ok(state
            .txn_order
            .iter()
            .rev()
            .filter_map(|id| state.transactions.get(id))
            .filter(|txn| {
                txn.user_id == Some(user_id)
                    || txn.entries.iter().any(|entry| {
                        user_accounts.contains(&entry.account_id)
                    })
            })
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}
