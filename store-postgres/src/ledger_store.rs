use async_trait::async_trait;
use common::{
    amount::Amount,
    ids::{AccountId, EntryId, IdempotencyKey, TxnId, UserId},
    time::TimestampMs,
};
use ledger::{
    store::{Committed, LedgerStore, NewLedgerTransaction, StoreError},
    Account, AccountType, Entry, LedgerTransaction, Reference, TxnStatus,
};
use rust_decimal::Decimal;
use sqlx::{postgres::PgRow, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::{parse_enum, parse_from_str, PgStore};

/// Ledger-flavored sqlx error mapping; unique violations bubble up as
/// `Unavailable` here because idempotency replay is handled explicitly.
fn map_err(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Database(db_err)
            if db_err.code().as_deref() == Some("23505")
    )
}

/// Sentinel message for an idempotency-key insert race, recognized by the
/// commit path and turned into a replay.
const UNIQUE_VIOLATION: &str = "unique violation: idempotency key";

fn map_insert_err(e: sqlx::Error) -> StoreError {
    if is_unique_violation(&e) {
        StoreError::Unavailable(UNIQUE_VIOLATION.to_owned())
    } else {
        map_err(e)
    }
}

fn account_from_row(row: &PgRow) -> Result<Account, StoreError> {
    let account_type_raw: String =
        row.try_get("account_type").map_err(map_err)?;
    let currency_raw: String = row.try_get("currency").map_err(map_err)?;
    let balance: Decimal = row.try_get("balance").map_err(map_err)?;
    Ok(Account {
        id: AccountId::from_uuid(row.try_get("id").map_err(map_err)?),
        user_id: row
            .try_get::<Option<Uuid>, _>("user_id")
            .map_err(map_err)?
            .map(UserId::from_uuid),
        account_type: parse_from_str::<AccountType>(&account_type_raw)
            .map_err(store_err)?,
        currency: parse_from_str(&currency_raw).map_err(store_err)?,
        balance: Amount::try_from_decimal(balance)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?,
        created_at: ts(row.try_get("created_at").map_err(map_err)?)?,
        updated_at: ts(row.try_get("updated_at").map_err(map_err)?)?,
    })
}

fn entry_from_row(row: &PgRow) -> Result<Entry, StoreError> {
    let entry_type_raw: String =
        row.try_get("entry_type").map_err(map_err)?;
    let currency_raw: String = row.try_get("currency").map_err(map_err)?;
    let amount: Decimal = row.try_get("amount").map_err(map_err)?;
    Ok(Entry {
        id: EntryId::from_uuid(row.try_get("id").map_err(map_err)?),
        transaction_id: TxnId::from_uuid(
            row.try_get("transaction_id").map_err(map_err)?,
        ),
        account_id: AccountId::from_uuid(
            row.try_get("account_id").map_err(map_err)?,
        ),
        entry_type: parse_enum(&entry_type_raw).map_err(store_err)?,
        amount: Amount::try_from_decimal(amount)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?,
        currency: parse_from_str(&currency_raw).map_err(store_err)?,
        description: row.try_get("description").map_err(map_err)?,
    })
}

fn txn_from_row(
    row: &PgRow,
    entries: Vec<Entry>,
) -> Result<LedgerTransaction, StoreError> {
    let txn_type_raw: String = row.try_get("txn_type").map_err(map_err)?;
    let status_raw: String = row.try_get("status").map_err(map_err)?;
    let reference_kind: Option<String> =
        row.try_get("reference_kind").map_err(map_err)?;
    let reference_id: Option<String> =
        row.try_get("reference_id").map_err(map_err)?;
    let reference = match (reference_kind, reference_id) {
        (Some(kind), Some(id)) => Some(Reference {
            kind: parse_enum(&kind).map_err(store_err)?,
            id,
        }),
        _ => None,
    };

    Ok(LedgerTransaction {
        id: TxnId::from_uuid(row.try_get("id").map_err(map_err)?),
        user_id: row
            .try_get::<Option<Uuid>, _>("user_id")
            .map_err(map_err)?
            .map(UserId::from_uuid),
        txn_type: parse_enum(&txn_type_raw).map_err(store_err)?,
        reference,
        status: parse_enum(&status_raw).map_err(store_err)?,
        idempotency_key: IdempotencyKey::new(
            row.try_get::<String, _>("idempotency_key").map_err(map_err)?,
        ),
        description: row.try_get("description").map_err(map_err)?,
        metadata: row.try_get("metadata").map_err(map_err)?,
        entries,
        created_at: ts(row.try_get("created_at").map_err(map_err)?)?,
        completed_at: row
            .try_get::<Option<i64>, _>("completed_at")
            .map_err(map_err)?
            .map(ts)
            .transpose()?,
    })
}

fn ts(raw: i64) -> Result<TimestampMs, StoreError> {
    TimestampMs::try_from_i64(raw)
        .map_err(|e| StoreError::Unavailable(e.to_string()))
}

fn store_err(e: common::store::StoreError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

async fn fetch_txn_with_entries(
    tx: &mut Transaction<'_, Postgres>,
    id: TxnId,
) -> Result<Option<LedgerTransaction>, StoreError> {
    let Some(row) =
        sqlx::query("SELECT * FROM ledger_transactions WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(map_err)?
    else {
        return Ok(None);
    };

    let entry_rows = sqlx::query(
        "SELECT * FROM ledger_entries WHERE transaction_id = $1",
    )
    .bind(id.as_uuid())
    .fetch_all(&mut **tx)
    .await
    .map_err(map_err)?;
    let entries = entry_rows
        .iter()
        .map(entry_from_row)
        .collect::<Result<Vec<_>, _>>()?;
    Some(txn_from_row(&row, entries)).transpose()
}

async fn fetch_txn_by_key(
    tx: &mut Transaction<'_, Postgres>,
    key: &IdempotencyKey,
) -> Result<Option<LedgerTransaction>, StoreError> {
    let id = sqlx::query(
        "SELECT id FROM ledger_transactions WHERE idempotency_key = $1",
    )
    .bind(key.as_str())
    .fetch_optional(&mut **tx)
    .await
    .map_err(map_err)?
    .map(|row| row.try_get::<Uuid, _>("id"))
    .transpose()
    .map_err(map_err)?;

    match id {
        Some(id) => fetch_txn_with_entries(tx, TxnId::from_uuid(id)).await,
        None => Ok(None),
    }
}

/// The atomic commit body shared by plain commits and reversals.
///
/// Locks the touched account rows in ascending id order, verifies that no
/// balance goes negative, writes the transaction + entries, applies the
/// balance updates, and flips the status to `completed`, all inside the
/// caller's database transaction.
async fn apply_transaction(
    tx: &mut Transaction<'_, Postgres>,
    new: &NewLedgerTransaction,
) -> Result<LedgerTransaction, StoreError> {
    // Net signed effect per account, ascending id for the lock order.
    let mut nets: Vec<(AccountId, Decimal)> = Vec::new();
    for entry in &new.entries {
        match nets.iter_mut().find(|(id, _)| *id == entry.account_id) {
            Some((_, net)) => *net += entry.signed_effect(),
            None => nets.push((entry.account_id, entry.signed_effect())),
        }
    }
    nets.sort_by_key(|(id, _)| *id);
    let account_uuids: Vec<Uuid> =
        nets.iter().map(|(id, _)| *id.as_uuid()).collect();

    let locked = sqlx::query(
        "SELECT id, balance FROM ledger_accounts \
         WHERE id = ANY($1) ORDER BY id FOR UPDATE",
    )
    .bind(&account_uuids)
    .fetch_all(&mut **tx)
    .await
    .map_err(map_err)?;

    if locked.len() != nets.len() {
        let found: Vec<Uuid> = locked
            .iter()
            .map(|row| row.try_get::<Uuid, _>("id"))
            .collect::<Result<_, _>>()
            .map_err(map_err)?;
        let missing = nets
            .iter()
            .map(|(id, _)| *id)
            .find(|id| !found.contains(id.as_uuid()))
            .expect("some account was not found");
        return Err(StoreError::AccountNotFound(missing));
    }

    // Balance safety under the locks.
    let now = TimestampMs::now();
    for row in &locked {
        let id = AccountId::from_uuid(row.try_get("id").map_err(map_err)?);
        let balance: Decimal = row.try_get("balance").map_err(map_err)?;
        let net = nets
            .iter()
            .find(|(net_id, _)| *net_id == id)
            .map(|(_, net)| *net)
            .expect("locked exactly the net accounts");
        let new_balance = balance + net;
        if new_balance.is_sign_negative() {
            return Err(StoreError::InsufficientBalance {
                account_id: id,
                balance: Amount::try_from_decimal(balance)
                    .unwrap_or(Amount::ZERO),
                required: Amount::try_from_decimal(net.abs())
                    .unwrap_or(Amount::MAX),
            });
        }
        sqlx::query(
            "UPDATE ledger_accounts SET balance = $2, updated_at = $3 \
             WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(new_balance)
        .bind(now.as_i64())
        .execute(&mut **tx)
        .await
        .map_err(map_err)?;
    }

    // The transaction row is born pending and completed before commit, so
    // no reader ever observes the pending window.
    sqlx::query(
        "INSERT INTO ledger_transactions \
         (id, user_id, txn_type, reference_kind, reference_id, status, \
          idempotency_key, description, metadata, created_at) \
         VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7, $8, $9)",
    )
    .bind(new.id.as_uuid())
    .bind(new.user_id.map(|id| *id.as_uuid()))
    .bind(new.txn_type.as_str())
    .bind(new.reference.as_ref().map(|r| {
        serde_json::to_value(r.kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_default()
    }))
    .bind(new.reference.as_ref().map(|r| r.id.clone()))
    .bind(new.idempotency_key.as_str())
    .bind(new.description.as_deref())
    .bind(&new.metadata)
    .bind(new.created_at.as_i64())
    .execute(&mut **tx)
    .await
    .map_err(map_insert_err)?;

    for entry in &new.entries {
        sqlx::query(
            "INSERT INTO ledger_entries \
             (id, transaction_id, account_id, entry_type, amount, currency, \
              description) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(Uuid::new_v4())
        .bind(new.id.as_uuid())
        .bind(entry.account_id.as_uuid())
        .bind(entry.entry_type.as_str())
        .bind(entry.amount.to_decimal())
        .bind(entry.currency.as_str())
        .bind(entry.description.as_deref())
        .execute(&mut **tx)
        .await
        .map_err(map_err)?;
    }

    sqlx::query(
        "UPDATE ledger_transactions \
         SET status = 'completed', completed_at = $2 WHERE id = $1",
    )
    .bind(new.id.as_uuid())
    .bind(now.as_i64())
    .execute(&mut **tx)
    .await
    .map_err(map_err)?;

    fetch_txn_with_entries(tx, new.id)
        .await?
        .ok_or_else(|| {
            StoreError::Unavailable(
                "freshly committed transaction vanished".to_owned(),
            )
        })
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn commit_transaction(
        &self,
        new: NewLedgerTransaction,
    ) -> Result<Committed, StoreError> {
        let mut tx = self.pool().begin().await.map_err(map_err)?;

        if let Some(existing) =
            fetch_txn_by_key(&mut tx, &new.idempotency_key).await?
        {
            return Ok(Committed::Replayed(existing));
        }

        match apply_transaction(&mut tx, &new).await {
            Ok(committed) => {
                tx.commit().await.map_err(map_err)?;
                Ok(Committed::Created(committed))
            }
            Err(StoreError::Unavailable(msg)) if msg == UNIQUE_VIOLATION => {
                // Lost the idempotency-key race; the winner's row is the
                // answer.
                drop(tx);
                let mut fresh = self.pool().begin().await.map_err(map_err)?;
                let existing =
                    fetch_txn_by_key(&mut fresh, &new.idempotency_key)
                        .await?
                        .ok_or_else(|| {
                            StoreError::Unavailable(
                                "idempotency conflict without a row"
                                    .to_owned(),
                            )
                        })?;
                Ok(Committed::Replayed(existing))
            }
            Err(e) => Err(e),
        }
    }

    async fn commit_reversal(
        &self,
        original_id: TxnId,
        reversal: NewLedgerTransaction,
    ) -> Result<Committed, StoreError> {
        let mut tx = self.pool().begin().await.map_err(map_err)?;

        if let Some(existing) =
            fetch_txn_by_key(&mut tx, &reversal.idempotency_key).await?
        {
            return Ok(Committed::Replayed(existing));
        }

        // Lock the original row so concurrent reversals serialize.
        let original_status: Option<String> = sqlx::query(
            "SELECT status FROM ledger_transactions WHERE id = $1 \
             FOR UPDATE",
        )
        .bind(original_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_err)?
        .map(|row| row.try_get("status"))
        .transpose()
        .map_err(map_err)?;

        let status_raw = original_status
            .ok_or(StoreError::TransactionNotFound(original_id))?;
        let status: TxnStatus = parse_enum(&status_raw).map_err(store_err)?;
        if status != TxnStatus::Completed {
            return Err(StoreError::NotReversible {
                id: original_id,
                status,
            });
        }

        let committed = apply_transaction(&mut tx, &reversal).await?;
        sqlx::query(
            "UPDATE ledger_transactions SET status = 'reversed' \
             WHERE id = $1",
        )
        .bind(original_id.as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;

        tx.commit().await.map_err(map_err)?;
        Ok(Committed::Created(committed))
    }

    async fn upsert_account(
        &self,
        account: Account,
    ) -> Result<Account, StoreError> {
        let inserted = sqlx::query(
            "INSERT INTO ledger_accounts \
             (id, user_id, account_type, currency, balance, created_at, \
              updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT DO NOTHING",
        )
        .bind(account.id.as_uuid())
        .bind(account.user_id.map(|id| *id.as_uuid()))
        .bind(account.account_type.as_str())
        .bind(account.currency.as_str())
        .bind(account.balance.to_decimal())
        .bind(account.created_at.as_i64())
        .bind(account.updated_at.as_i64())
        .execute(self.pool())
        .await
        .map_err(map_err)?;

        if inserted.rows_affected() == 1 {
            return Ok(account);
        }
        // Someone else created it; return theirs.
        let existing = match account.user_id {
            Some(user_id) =>
                self.find_user_account(user_id, account.account_type).await?,
            None => self.find_system_account(account.account_type).await?,
        };
        existing.ok_or_else(|| {
            StoreError::Unavailable(
                "account upsert conflicted but no row found".to_owned(),
            )
        })
    }

    async fn get_account(
        &self,
        id: AccountId,
    ) -> Result<Option<Account>, StoreError> {
        sqlx::query("SELECT * FROM ledger_accounts WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(self.pool())
            .await
            .map_err(map_err)?
            .as_ref()
            .map(account_from_row)
            .transpose()
    }

    async fn find_user_account(
        &self,
        user_id: UserId,
        account_type: AccountType,
    ) -> Result<Option<Account>, StoreError> {
        sqlx::query(
            "SELECT * FROM ledger_accounts \
             WHERE user_id = $1 AND account_type = $2",
        )
        .bind(user_id.as_uuid())
        .bind(account_type.as_str())
        .fetch_optional(self.pool())
        .await
        .map_err(map_err)?
        .as_ref()
        .map(account_from_row)
        .transpose()
    }

    async fn find_system_account(
        &self,
        account_type: AccountType,
    ) -> Result<Option<Account>, StoreError> {
        sqlx::query(
            "SELECT * FROM ledger_accounts \
             WHERE user_id IS NULL AND account_type = $1",
        )
        .bind(account_type.as_str())
        .fetch_optional(self.pool())
        .await
        .map_err(map_err)?
        .as_ref()
        .map(account_from_row)
        .transpose()
    }

    async fn list_user_accounts(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Account>, StoreError> {
        sqlx::query("SELECT * FROM ledger_accounts WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_all(self.pool())
            .await
            .map_err(map_err)?
            .iter()
            .map(account_from_row)
            .collect()
    }

    async fn list_system_accounts(&self) -> Result<Vec<Account>, StoreError> {
        sqlx::query("SELECT * FROM ledger_accounts WHERE user_id IS NULL")
            .fetch_all(self.pool())
            .await
            .map_err(map_err)?
            .iter()
            .map(account_from_row)
            .collect()
    }

    async fn get_transaction(
        &self,
        id: TxnId,
    ) -> Result<Option<LedgerTransaction>, StoreError> {
        let mut tx = self.pool().begin().await.map_err(map_err)?;
        fetch_txn_with_entries(&mut tx, id).await
    }

    async fn find_transaction_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<LedgerTransaction>, StoreError> {
        let mut tx = self.pool().begin().await.map_err(map_err)?;
        fetch_txn_by_key(&mut tx, key).await
    }

    async fn list_user_transactions(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerTransaction>, StoreError> {
        let ids: Vec<Uuid> = sqlx::query(
            "SELECT DISTINCT t.id, t.created_at FROM ledger_transactions t \
             JOIN ledger_entries e ON e.transaction_id = t.id \
             JOIN ledger_accounts a ON a.id = e.account_id \
             WHERE t.user_id = $1 OR a.user_id = $1 \
             ORDER BY t.created_at DESC, t.id \
             LIMIT $2 OFFSET $3",
        )
        .bind(user_id.as_uuid())
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(self.pool())
        .await
        .map_err(map_err)?
        .iter()
        .map(|row| row.try_get::<Uuid, _>("id"))
        .collect::<Result<_, _>>()
        .map_err(map_err)?;

        let mut tx = self.pool().begin().await.map_err(map_err)?;
        let mut transactions = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(txn) =
                fetch_txn_with_entries(&mut tx, TxnId::from_uuid(id)).await?
            {
                transactions.push(txn);
            }
        }
        Ok(transactions)
    }
}
