use async_trait::async_trait;
use chain::{
    ChainName, ChainStore, Deposit, DepositStatus, ManagedWallet, TxHash,
    Withdrawal, WithdrawalStatus,
};
use common::{
    ids::{UserId, WithdrawalId},
    store::StoreError,
    time::TimestampMs,
};

use crate::MemStore;

#[async_trait]
impl ChainStore for MemStore {
    async fn insert_deposit(
        &self,
        deposit: Deposit,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        if state.deposit_by_tx_hash.contains_key(&deposit.tx_hash) {
            return Err(StoreError::conflict(format!(
                "deposit tx_hash {}",
                deposit.tx_hash
            )));
        }
        state
            .deposit_by_tx_hash
            .insert(deposit.tx_hash.clone(), deposit.id);
        state.deposits.insert(deposit.id, deposit);
        Ok(())
    }

    async fn find_deposit_by_tx_hash(
        &self,
        tx_hash: &TxHash,
    ) -> Result<Option<Deposit>, StoreError> {
        let state = self.lock();
        Ok(state
            .deposit_by_tx_hash
            .get(tx_hash)
            .map(|id| state.deposits[id].clone()))
    }

    async fn update_deposit_status(
        &self,
        tx_hash: &TxHash,
        status: DepositStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        let id = *state.deposit_by_tx_hash.get(tx_hash).ok_or_else(|| {
            StoreError::not_found(format!("deposit {tx_hash}"))
        })?;
        let deposit = state.deposits.get_mut(&id).expect("indexed");
        deposit.status = status;
        deposit.updated_at = TimestampMs::now();
        Ok(())
    }

    async fn list_stale_pending_deposits(
        &self,
        older_than: TimestampMs,
    ) -> Result<Vec<Deposit>, StoreError> {
        Ok(self
            .lock()
            .deposits
            .values()
            .filter(|deposit| {
                deposit.status == DepositStatus::Pending
                    && deposit.created_at < older_than
            })
            .cloned()
            .collect())
    }

    async fn insert_withdrawal(
        &self,
        withdrawal: Withdrawal,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        if state.withdrawals.contains_key(&withdrawal.id) {
            return Err(StoreError::conflict(format!(
                "withdrawal {}",
                withdrawal.id
            )));
        }
        state.withdrawals.insert(withdrawal.id, withdrawal);
        Ok(())
    }

    async fn get_withdrawal(
        &self,
        id: WithdrawalId,
    ) -> Result<Option<Withdrawal>, StoreError> {
        Ok(self.lock().withdrawals.get(&id).cloned())
    }

    async fn update_withdrawal_status(
        &self,
        id: WithdrawalId,
        status: WithdrawalStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        let withdrawal = state.withdrawals.get_mut(&id).ok_or_else(|| {
            StoreError::not_found(format!("withdrawal {id}"))
        })?;
        withdrawal.status = status;
        if error.is_some() {
            withdrawal.error = error;
        }
        withdrawal.updated_at = TimestampMs::now();
        Ok(())
    }

    async fn set_withdrawal_provider_transfer_id(
        &self,
        id: WithdrawalId,
        provider_transfer_id: String,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        let withdrawal = state.withdrawals.get_mut(&id).ok_or_else(|| {
            StoreError::not_found(format!("withdrawal {id}"))
        })?;
        withdrawal.provider_transfer_id = Some(provider_transfer_id);
        withdrawal.updated_at = TimestampMs::now();
        Ok(())
    }

    async fn insert_wallet(
        &self,
        wallet: ManagedWallet,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        if state.wallets.contains_key(&wallet.id) {
            return Err(StoreError::conflict(format!("wallet {}", wallet.id)));
        }
        state.wallets.insert(wallet.id, wallet);
        Ok(())
    }

    async fn find_wallet_by_custodian_id(
        &self,
        custodian_wallet_id: &str,
    ) -> Result<Option<ManagedWallet>, StoreError> {
        Ok(self
            .lock()
            .wallets
            .values()
            .find(|wallet| wallet.custodian_wallet_id == custodian_wallet_id)
            .cloned())
    }

    async fn find_wallet_by_address(
        &self,
        chain: &ChainName,
        address: &str,
    ) -> Result<Option<ManagedWallet>, StoreError> {
        Ok(self
            .lock()
            .wallets
            .values()
            .find(|wallet| {
                wallet.chain == *chain && wallet.address == address
            })
            .cloned())
    }

    async fn find_wallet_for_user(
        &self,
        user_id: UserId,
        chain: &ChainName,
    ) -> Result<Option<ManagedWallet>, StoreError> {
        Ok(self
            .lock()
            .wallets
            .values()
            .find(|wallet| {
                wallet.user_id == user_id && wallet.chain == *chain
            })
            .cloned())
    }

    async fn list_wallets(&self) -> Result<Vec<ManagedWallet>, StoreError> {
        Ok(self.lock().wallets.values().cloned().collect())
    }
}
