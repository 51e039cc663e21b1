//! PostgreSQL ledger.
#![allow(clippy::needless_raw_string_hashes)]

use super::{
    BalanceLedger,
    errors::{LedgerError, LedgerResult},
    models::{
        AccountId, Balance, BalanceDelta, EntryDirection, EntryType, LedgerBatch, LedgerEntry,
        NewEntry, PostingChange, apply_posting,
    },
};
use crate::db::timeouts::{Budget, bounded, bounded_work};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Ledger backed by the `ledger_*` tables
#[derive(Clone)]
pub struct PgLedger {
    pool: Arc<PgPool>,
}

impl PgLedger {
    /// Create a new ledger over an existing pool
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Open a player account, returning false if it already existed
    pub async fn open_account(&self, account: AccountId, opening: Balance) -> LedgerResult<bool> {
        let result = bounded(
            Budget::Query,
            sqlx::query(
                "INSERT INTO ledger_accounts (account_key, credit, winnings)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (account_key) DO NOTHING",
            )
            .bind(account.storage_key())
            .bind(opening.credit)
            .bind(opening.winnings)
            .execute(self.pool.as_ref()),
        )
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Lock one account row for the rest of the transaction
    async fn lock_account(
        tx: &mut Transaction<'_, Postgres>,
        account: AccountId,
    ) -> LedgerResult<Balance> {
        if account.is_house() {
            sqlx::query(
                "INSERT INTO ledger_accounts (account_key, credit, winnings)
                 VALUES ($1, 0, 0)
                 ON CONFLICT (account_key) DO NOTHING",
            )
            .bind(account.storage_key())
            .execute(&mut **tx)
            .await?;
        }

        let row = sqlx::query(
            "SELECT credit, winnings FROM ledger_accounts WHERE account_key = $1 FOR UPDATE",
        )
        .bind(account.storage_key())
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(LedgerError::AccountNotFound(account))?;

        Ok(Balance::new(row.get("credit"), row.get("winnings")))
    }

    async fn store_balance(
        tx: &mut Transaction<'_, Postgres>,
        account: AccountId,
        balance: Balance,
    ) -> LedgerResult<()> {
        sqlx::query(
            "UPDATE ledger_accounts
             SET credit = $1, winnings = $2, updated_at = NOW()
             WHERE account_key = $3",
        )
        .bind(balance.credit)
        .bind(balance.winnings)
        .bind(account.storage_key())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_entry(
        tx: &mut Transaction<'_, Postgres>,
        entry: &NewEntry,
    ) -> LedgerResult<PgRow> {
        let row = sqlx::query(
            r#"
            INSERT INTO ledger_entries (account_key, match_id, entry_type, direction,
                credit_delta, winnings_delta, credit_after, winnings_after,
                idempotency_key, description)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id, account_key, match_id, entry_type, direction, credit_delta,
                winnings_delta, credit_after, winnings_after, idempotency_key,
                description, created_at
            "#,
        )
        .bind(entry.account.storage_key())
        .bind(entry.match_id)
        .bind(entry.entry_type.to_string())
        .bind(entry.delta.direction().to_string())
        .bind(entry.delta.credit)
        .bind(entry.delta.winnings)
        .bind(entry.balance_after.credit)
        .bind(entry.balance_after.winnings)
        .bind(&entry.idempotency_key)
        .bind(&entry.description)
        .fetch_one(&mut **tx)
        .await?;
        Ok(row)
    }

    async fn commit_in_tx(&self, batch: &LedgerBatch) -> LedgerResult<Vec<LedgerEntry>> {
        let mut tx = self.pool.begin().await?;

        // Claiming the key first makes a concurrent duplicate block on it
        let claimed = sqlx::query(
            "INSERT INTO ledger_batches (idempotency_key, match_id)
             VALUES ($1, $2)
             ON CONFLICT (idempotency_key) DO NOTHING
             RETURNING idempotency_key",
        )
        .bind(&batch.idempotency_key)
        .bind(batch.match_id)
        .fetch_optional(&mut *tx)
        .await?;

        if claimed.is_none() {
            return Err(LedgerError::DuplicateTransaction(
                batch.idempotency_key.clone(),
            ));
        }

        // Lock rows in a stable order so concurrent batches cannot deadlock
        let accounts: BTreeSet<AccountId> = batch.postings.iter().map(|p| p.account).collect();
        let mut balances = BTreeMap::new();
        for account in accounts {
            balances.insert(account, Self::lock_account(&mut tx, account).await?);
        }

        let mut staged = Vec::with_capacity(batch.postings.len());
        for posting in &batch.postings {
            let current = balances
                .get(&posting.account)
                .copied()
                .ok_or(LedgerError::AccountNotFound(posting.account))?;
            let (delta, next) = apply_posting(posting.account, current, posting.change)?;
            balances.insert(posting.account, next);
            staged.push(NewEntry {
                account: posting.account,
                match_id: batch.match_id,
                entry_type: posting.entry_type,
                delta,
                balance_after: next,
                idempotency_key: batch.idempotency_key.clone(),
                description: posting.description.clone(),
            });
        }

        for (account, balance) in &balances {
            Self::store_balance(&mut tx, *account, *balance).await?;
        }

        let mut entries = Vec::with_capacity(staged.len());
        for entry in &staged {
            let row = Self::insert_entry(&mut tx, entry).await?;
            entries.push(entry_from_row(&row)?);
        }

        tx.commit().await?;
        Ok(entries)
    }
}

fn entry_from_row(row: &PgRow) -> LedgerResult<LedgerEntry> {
    let account_key: String = row.get("account_key");
    let account = AccountId::from_storage_key(&account_key).ok_or_else(|| {
        LedgerError::TransactionFailed(format!("unknown account key {account_key}"))
    })?;

    Ok(LedgerEntry {
        id: row.get("id"),
        account,
        match_id: row.get("match_id"),
        entry_type: EntryType::parse(&row.get::<String, _>("entry_type"))
            .unwrap_or(EntryType::AdminAdjust),
        direction: EntryDirection::parse(&row.get::<String, _>("direction"))
            .unwrap_or(EntryDirection::Credit),
        delta: BalanceDelta::new(row.get("credit_delta"), row.get("winnings_delta")),
        balance_after: Balance::new(row.get("credit_after"), row.get("winnings_after")),
        idempotency_key: row.get("idempotency_key"),
        description: row.get("description"),
        created_at: row.get::<chrono::NaiveDateTime, _>("created_at").and_utc(),
    })
}

const ENTRY_COLUMNS: &str = "id, account_key, match_id, entry_type, direction, credit_delta, \
     winnings_delta, credit_after, winnings_after, idempotency_key, description, created_at";

#[async_trait]
impl BalanceLedger for PgLedger {
    async fn read_balance(&self, account: AccountId) -> LedgerResult<Balance> {
        let row = bounded(
            Budget::Query,
            sqlx::query("SELECT credit, winnings FROM ledger_accounts WHERE account_key = $1")
                .bind(account.storage_key())
                .fetch_optional(self.pool.as_ref()),
        )
        .await?;

        match row {
            Some(row) => Ok(Balance::new(row.get("credit"), row.get("winnings"))),
            None if account.is_house() => Ok(Balance::default()),
            None => Err(LedgerError::AccountNotFound(account)),
        }
    }

    async fn adjust_balance(
        &self,
        account: AccountId,
        credit_delta: i64,
        winnings_delta: i64,
    ) -> LedgerResult<Balance> {
        let work = async {
            let mut tx = self.pool.begin().await?;
            let current = Self::lock_account(&mut tx, account).await?;
            let change = PostingChange::Delta(BalanceDelta::new(credit_delta, winnings_delta));
            let (_, next) = apply_posting(account, current, change)?;
            Self::store_balance(&mut tx, account, next).await?;
            tx.commit().await?;
            Ok::<Balance, LedgerError>(next)
        };

        bounded_work(Budget::Transaction, work).await
    }

    async fn append_transaction(&self, entry: NewEntry) -> LedgerResult<i64> {
        let work = async {
            let mut tx = self.pool.begin().await?;
            let row = Self::insert_entry(&mut tx, &entry).await?;
            tx.commit().await?;
            Ok::<i64, LedgerError>(row.get("id"))
        };

        bounded_work(Budget::Transaction, work).await
    }

    async fn commit(&self, batch: &LedgerBatch) -> LedgerResult<Vec<LedgerEntry>> {
        if batch.postings.is_empty() {
            return Err(LedgerError::EmptyBatch(batch.idempotency_key.clone()));
        }

        let result = bounded_work(Budget::Transaction, self.commit_in_tx(batch)).await;

        match &result {
            Err(LedgerError::DuplicateTransaction(_)) | Ok(_) => {}
            Err(e) => log::warn!("Ledger batch {} rolled back: {}", batch.idempotency_key, e),
        }
        result
    }

    async fn batch_entries(&self, idempotency_key: &str) -> LedgerResult<Vec<LedgerEntry>> {
        let query = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE idempotency_key = $1 ORDER BY id"
        );
        let rows = bounded(
            Budget::Query,
            sqlx::query(&query)
                .bind(idempotency_key)
                .fetch_all(self.pool.as_ref()),
        )
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn entries(&self, account: AccountId, limit: i64) -> LedgerResult<Vec<LedgerEntry>> {
        let query = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE account_key = $1 \
             ORDER BY id DESC LIMIT $2"
        );
        let rows = bounded(
            Budget::Query,
            sqlx::query(&query)
                .bind(account.storage_key())
                .bind(limit)
                .fetch_all(self.pool.as_ref()),
        )
        .await?;

        rows.iter().map(entry_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, DatabaseConfig};
    use crate::ledger::models::Posting;

    async fn ledger() -> PgLedger {
        let config = DatabaseConfig::from_env().unwrap_or_default();
        let db = Database::new(&config)
            .await
            .expect("Failed to connect to database");
        db.migrate().await.expect("Migration failed");
        PgLedger::new(Arc::new(db.pool().clone()))
    }

    /// Player ids unique to one test run
    fn fresh_players() -> (AccountId, AccountId) {
        let base = (uuid::Uuid::new_v4().as_u128() % 1_000_000_000) as i64 * 2 + 10;
        (AccountId::Player(base), AccountId::Player(base + 1))
    }

    fn stake_batch(key: &str, players: (AccountId, AccountId), fee: i64) -> LedgerBatch {
        LedgerBatch::new(key)
            .posting(Posting::debit_credit_first(players.0, fee, EntryType::Escrow))
            .posting(Posting::debit_credit_first(players.1, fee, EntryType::Escrow))
            .posting(Posting::delta(
                AccountId::House,
                BalanceDelta::new(2 * fee, 0),
                EntryType::Escrow,
            ))
    }

    #[tokio::test]
    #[ignore = "requires a running PostgreSQL instance (DATABASE_URL)"]
    async fn test_commit_and_duplicate_batch() {
        let ledger = ledger().await;
        let players = fresh_players();
        assert!(ledger.open_account(players.0, Balance::new(6, 10)).await.unwrap());
        assert!(ledger.open_account(players.1, Balance::new(20, 0)).await.unwrap());
        assert!(!ledger.open_account(players.1, Balance::new(1, 1)).await.unwrap());

        let key = format!("arm:{}", uuid::Uuid::new_v4());
        let entries = ledger.commit(&stake_batch(&key, players, 10)).await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].delta, BalanceDelta::new(-6, -4));

        let err = ledger
            .commit(&stake_batch(&key, players, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateTransaction(_)));

        assert_eq!(ledger.read_balance(players.0).await.unwrap(), Balance::new(0, 6));
        assert_eq!(ledger.read_balance(players.1).await.unwrap(), Balance::new(10, 0));
        assert_eq!(ledger.batch_entries(&key).await.unwrap().len(), 3);
    }

    #[tokio::test]
    #[ignore = "requires a running PostgreSQL instance (DATABASE_URL)"]
    async fn test_short_batch_rolls_back() {
        let ledger = ledger().await;
        let players = fresh_players();
        ledger.open_account(players.0, Balance::new(50, 0)).await.unwrap();
        ledger.open_account(players.1, Balance::new(3, 0)).await.unwrap();

        let key = format!("arm:{}", uuid::Uuid::new_v4());
        let err = ledger
            .commit(&stake_batch(&key, players, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

        assert_eq!(ledger.read_balance(players.0).await.unwrap(), Balance::new(50, 0));
        assert!(ledger.batch_entries(&key).await.unwrap().is_empty());
    }
}
