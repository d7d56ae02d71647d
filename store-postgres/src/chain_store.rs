use async_trait::async_trait;
use chain::{
    ChainName, ChainStore, Deposit, DepositStatus, ManagedWallet, TokenSymbol,
    TxHash, Withdrawal, WithdrawalStatus,
};
use common::{
    ids::{DepositId, UserId, WalletId, WithdrawalId},
    store::StoreError,
    time::TimestampMs,
};
use rust_decimal::Decimal;
use sqlx::{postgres::PgRow, Row};

use crate::{amount, map_sqlx_err, parse_enum, timestamp, PgStore};

fn deposit_from_row(row: &PgRow) -> Result<Deposit, StoreError> {
    let status_raw: String =
        row.try_get("status").map_err(map_sqlx_err)?;
    Ok(Deposit {
        id: DepositId::from_uuid(row.try_get("id").map_err(map_sqlx_err)?),
        user_id: UserId::from_uuid(
            row.try_get("user_id").map_err(map_sqlx_err)?,
        ),
        chain: ChainName::new(
            row.try_get::<String, _>("chain").map_err(map_sqlx_err)?,
        ),
        tx_hash: TxHash::new(
            row.try_get::<String, _>("tx_hash").map_err(map_sqlx_err)?,
        ),
        token: TokenSymbol::new(
            row.try_get::<String, _>("token").map_err(map_sqlx_err)?,
        ),
        amount: amount(
            row.try_get::<Decimal, _>("amount").map_err(map_sqlx_err)?,
        )?,
        status: parse_enum(&status_raw)?,
        created_at: timestamp(
            row.try_get("created_at").map_err(map_sqlx_err)?,
        )?,
        updated_at: timestamp(
            row.try_get("updated_at").map_err(map_sqlx_err)?,
        )?,
    })
}

fn withdrawal_from_row(row: &PgRow) -> Result<Withdrawal, StoreError> {
    let status_raw: String =
        row.try_get("status").map_err(map_sqlx_err)?;
    Ok(Withdrawal {
        id: WithdrawalId::from_uuid(
            row.try_get("id").map_err(map_sqlx_err)?,
        ),
        user_id: UserId::from_uuid(
            row.try_get("user_id").map_err(map_sqlx_err)?,
        ),
        amount: amount(
            row.try_get::<Decimal, _>("amount").map_err(map_sqlx_err)?,
        )?,
        destination_chain: ChainName::new(
            row.try_get::<String, _>("destination_chain")
                .map_err(map_sqlx_err)?,
        ),
        destination_address: row
            .try_get("destination_address")
            .map_err(map_sqlx_err)?,
        status: parse_enum(&status_raw)?,
        provider_transfer_id: row
            .try_get("provider_transfer_id")
            .map_err(map_sqlx_err)?,
        tx_hash: row
            .try_get::<Option<String>, _>("tx_hash")
            .map_err(map_sqlx_err)?
            .map(TxHash::new),
        error: row.try_get("error").map_err(map_sqlx_err)?,
        created_at: timestamp(
            row.try_get("created_at").map_err(map_sqlx_err)?,
        )?,
        updated_at: timestamp(
            row.try_get("updated_at").map_err(map_sqlx_err)?,
        )?,
    })
}

fn wallet_from_row(row: &PgRow) -> Result<ManagedWallet, StoreError> {
    Ok(ManagedWallet {
        id: WalletId::from_uuid(row.try_get("id").map_err(map_sqlx_err)?),
        user_id: UserId::from_uuid(
            row.try_get("user_id").map_err(map_sqlx_err)?,
        ),
        chain: ChainName::new(
            row.try_get::<String, _>("chain").map_err(map_sqlx_err)?,
        ),
        custodian_wallet_id: row
            .try_get("custodian_wallet_id")
            .map_err(map_sqlx_err)?,
        address: row.try_get("address").map_err(map_sqlx_err)?,
        created_at: timestamp(
            row.try_get("created_at").map_err(map_sqlx_err)?,
        )?,
    })
}

#[async_trait]
impl ChainStore for PgStore {
    async fn insert_deposit(
        &self,
        deposit: Deposit,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO deposits \
             (id, user_id, chain, tx_hash, token, amount, status, \
              created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(deposit.id.as_uuid())
        .bind(deposit.user_id.as_uuid())
        .bind(deposit.chain.as_str())
        .bind(deposit.tx_hash.as_str())
        .bind(deposit.token.as_str())
        .bind(deposit.amount.to_decimal())
        .bind(deposit.status.as_str())
        .bind(deposit.created_at.as_i64())
        .bind(deposit.updated_at.as_i64())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn find_deposit_by_tx_hash(
        &self,
        tx_hash: &TxHash,
    ) -> Result<Option<Deposit>, StoreError> {
        sqlx::query("SELECT * FROM deposits WHERE tx_hash = $1")
            .bind(tx_hash.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_err)?
            .as_ref()
            .map(deposit_from_row)
            .transpose()
    }

    async fn update_deposit_status(
        &self,
        tx_hash: &TxHash,
        status: DepositStatus,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            "UPDATE deposits SET status = $2, updated_at = $3 \
             WHERE tx_hash = $1",
        )
        .bind(tx_hash.as_str())
        .bind(status.as_str())
        .bind(TimestampMs::now().as_i64())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_err)?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("deposit {tx_hash}")));
        }
        Ok(())
    }

    async fn list_stale_pending_deposits(
        &self,
        older_than: TimestampMs,
    ) -> Result<Vec<Deposit>, StoreError> {
        sqlx::query(
            "SELECT * FROM deposits \
             WHERE status = 'pending' AND created_at < $1",
        )
        .bind(older_than.as_i64())
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_err)?
        .iter()
        .map(deposit_from_row)
        .collect()
    }

    async fn insert_withdrawal(
        &self,
        withdrawal: Withdrawal,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO withdrawals \
             (id, user_id, amount, destination_chain, destination_address, \
              status, provider_transfer_id, tx_hash, error, created_at, \
              updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(withdrawal.id.as_uuid())
        .bind(withdrawal.user_id.as_uuid())
        .bind(withdrawal.amount.to_decimal())
        .bind(withdrawal.destination_chain.as_str())
        .bind(&withdrawal.destination_address)
        .bind(withdrawal.status.as_str())
        .bind(withdrawal.provider_transfer_id.as_deref())
        .bind(withdrawal.tx_hash.as_ref().map(|hash| hash.as_str()))
        .bind(withdrawal.error.as_deref())
        .bind(withdrawal.created_at.as_i64())
        .bind(withdrawal.updated_at.as_i64())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn get_withdrawal(
        &self,
        id: WithdrawalId,
    ) -> Result<Option<Withdrawal>, StoreError> {
        sqlx::query("SELECT * FROM withdrawals WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_err)?
            .as_ref()
            .map(withdrawal_from_row)
            .transpose()
    }

    async fn update_withdrawal_status(
        &self,
        id: WithdrawalId,
        status: WithdrawalStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            "UPDATE withdrawals \
             SET status = $2, error = COALESCE($3, error), updated_at = $4 \
             WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(status.as_str())
        .bind(error.as_deref())
        .bind(TimestampMs::now().as_i64())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_err)?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("withdrawal {id}")));
        }
        Ok(())
    }

    async fn set_withdrawal_provider_transfer_id(
        &self,
        id: WithdrawalId,
        provider_transfer_id: String,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            "UPDATE withdrawals \
             SET provider_transfer_id = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(&provider_transfer_id)
        .bind(TimestampMs::now().as_i64())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_err)?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("withdrawal {id}")));
        }
        Ok(())
    }

    async fn insert_wallet(
        &self,
        wallet: ManagedWallet,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO managed_wallets \
             (id, user_id, chain, custodian_wallet_id, address, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(wallet.id.as_uuid())
        .bind(wallet.user_id.as_uuid())
        .bind(wallet.chain.as_str())
        .bind(&wallet.custodian_wallet_id)
        .bind(&wallet.address)
        .bind(wallet.created_at.as_i64())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn find_wallet_by_custodian_id(
        &self,
        custodian_wallet_id: &str,
    ) -> Result<Option<ManagedWallet>, StoreError> {
        sqlx::query(
            "SELECT * FROM managed_wallets WHERE custodian_wallet_id = $1",
        )
        .bind(custodian_wallet_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_err)?
        .as_ref()
        .map(wallet_from_row)
        .transpose()
    }

    async fn find_wallet_by_address(
        &self,
        chain: &ChainName,
        address: &str,
    ) -> Result<Option<ManagedWallet>, StoreError> {
        sqlx::query(
            "SELECT * FROM managed_wallets WHERE chain = $1 AND address = $2",
        )
        .bind(chain.as_str())
        .bind(address)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_err)?
        .as_ref()
        .map(wallet_from_row)
        .transpose()
    }

    async fn find_wallet_for_user(
        &self,
        user_id: UserId,
        chain: &ChainName,
    ) -> Result<Option<ManagedWallet>, StoreError> {
        sqlx::query(
            "SELECT * FROM managed_wallets WHERE user_id = $1 AND chain = $2",
        )
        .bind(user_id.as_uuid())
        .bind(chain.as_str())
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_err)?
        .as_ref()
        .map(wallet_from_row)
        .transpose()
    }

    async fn list_wallets(&self) -> Result<Vec<ManagedWallet>, StoreError> {
        sqlx::query("SELECT * FROM managed_wallets")
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_err)?
            .iter()
            .map(wallet_from_row)
            .collect()
    }
}
