//! In-memory ledger.

use super::{
    BalanceLedger,
    errors::{LedgerError, LedgerResult},
    models::{
        Account, AccountId, Balance, BalanceDelta, LedgerBatch, LedgerEntry, NewEntry,
        PostingChange, apply_posting,
    },
};
use crate::types::PlayerId;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    accounts: HashMap<AccountId, Account>,
    entries: Vec<LedgerEntry>,
    batches: HashSet<String>,
    next_entry_id: i64,
    /// Commits left to fail before the ledger behaves again
    injected_failures: u32,
}

impl Inner {
    fn balance_of(&self, account: AccountId) -> LedgerResult<Balance> {
        match self.accounts.get(&account) {
            Some(acc) => Ok(acc.balance),
            None if account.is_house() => Ok(Balance::default()),
            None => Err(LedgerError::AccountNotFound(account)),
        }
    }

    fn store_balance(&mut self, account: AccountId, balance: Balance) {
        let now = Utc::now();
        self.accounts
            .entry(account)
            .and_modify(|acc| {
                acc.balance = balance;
                acc.updated_at = now;
            })
            .or_insert(Account {
                id: account,
                balance,
                created_at: now,
                updated_at: now,
            });
    }

    fn push_entry(&mut self, entry: NewEntry) -> LedgerEntry {
        self.next_entry_id += 1;
        let entry = LedgerEntry {
            id: self.next_entry_id,
            account: entry.account,
            match_id: entry.match_id,
            entry_type: entry.entry_type,
            direction: entry.delta.direction(),
            delta: entry.delta,
            balance_after: entry.balance_after,
            idempotency_key: entry.idempotency_key,
            description: entry.description,
            created_at: Utc::now(),
        };
        self.entries.push(entry.clone());
        entry
    }
}

/// Mutex-guarded ledger with the same atomicity as the Postgres one
#[derive(Default)]
pub struct MemoryLedger {
    inner: Mutex<Inner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: open a player account with a starting balance
    pub fn with_account(self, player_id: PlayerId, balance: Balance) -> Self {
        self.open_account(player_id, balance);
        self
    }

    /// Open (or reset) a player account
    pub fn open_account(&self, player_id: PlayerId, balance: Balance) {
        self.lock().store_balance(AccountId::Player(player_id), balance);
    }

    /// Make the next `count` commits fail with `TransactionFailed`
    pub fn fail_next_commits(&self, count: u32) {
        self.lock().injected_failures = count;
    }

    /// Sum of every account, house included
    pub fn total_supply(&self) -> i64 {
        self.lock()
            .accounts
            .values()
            .map(|acc| acc.balance.total())
            .sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl BalanceLedger for MemoryLedger {
    async fn read_balance(&self, account: AccountId) -> LedgerResult<Balance> {
        self.lock().balance_of(account)
    }

    async fn adjust_balance(
        &self,
        account: AccountId,
        credit_delta: i64,
        winnings_delta: i64,
    ) -> LedgerResult<Balance> {
        let mut inner = self.lock();
        let current = inner.balance_of(account)?;
        let change = PostingChange::Delta(BalanceDelta::new(credit_delta, winnings_delta));
        let (_, next) = apply_posting(account, current, change)?;
        inner.store_balance(account, next);
        Ok(next)
    }

    async fn append_transaction(&self, entry: NewEntry) -> LedgerResult<i64> {
        let mut inner = self.lock();
        inner.balance_of(entry.account)?;
        Ok(inner.push_entry(entry).id)
    }

    async fn commit(&self, batch: &LedgerBatch) -> LedgerResult<Vec<LedgerEntry>> {
        if batch.postings.is_empty() {
            return Err(LedgerError::EmptyBatch(batch.idempotency_key.clone()));
        }

        let mut inner = self.lock();

        if inner.injected_failures > 0 {
            inner.injected_failures -= 1;
            return Err(LedgerError::TransactionFailed(format!(
                "injected failure for {}",
                batch.idempotency_key
            )));
        }

        if inner.batches.contains(&batch.idempotency_key) {
            return Err(LedgerError::DuplicateTransaction(
                batch.idempotency_key.clone(),
            ));
        }

        // Stage every posting against a scratch copy before touching anything
        let mut scratch: HashMap<AccountId, Balance> = HashMap::new();
        let mut staged = Vec::with_capacity(batch.postings.len());

        for posting in &batch.postings {
            let current = match scratch.get(&posting.account) {
                Some(balance) => *balance,
                None => inner.balance_of(posting.account)?,
            };
            let (delta, next) = apply_posting(posting.account, current, posting.change)?;
            scratch.insert(posting.account, next);
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

        for (account, balance) in scratch {
            inner.store_balance(account, balance);
        }
        inner.batches.insert(batch.idempotency_key.clone());

        Ok(staged
            .into_iter()
            .map(|entry| inner.push_entry(entry))
            .collect())
    }

    async fn batch_entries(&self, idempotency_key: &str) -> LedgerResult<Vec<LedgerEntry>> {
        Ok(self
            .lock()
            .entries
            .iter()
            .filter(|e| e.idempotency_key == idempotency_key)
            .cloned()
            .collect())
    }

    async fn entries(&self, account: AccountId, limit: i64) -> LedgerResult<Vec<LedgerEntry>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .lock()
            .entries
            .iter()
            .rev()
            .filter(|e| e.account == account)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::models::{EntryDirection, EntryType, Posting};

    fn stake_batch(key: &str, fee: i64) -> LedgerBatch {
        LedgerBatch::new(key)
            .posting(Posting::debit_credit_first(AccountId::Player(1), fee, EntryType::Escrow))
            .posting(Posting::delta(
                AccountId::House,
                BalanceDelta::new(fee, 0),
                EntryType::Escrow,
            ))
            .posting(Posting::debit_credit_first(AccountId::Player(2), fee, EntryType::Escrow))
            .posting(Posting::delta(
                AccountId::House,
                BalanceDelta::new(fee, 0),
                EntryType::Escrow,
            ))
    }

    #[tokio::test]
    async fn test_commit_applies_all_postings() {
        let ledger = MemoryLedger::new()
            .with_account(1, Balance::new(20, 0))
            .with_account(2, Balance::new(5, 10));

        let entries = ledger.commit(&stake_batch("arm:1", 10)).await.unwrap();
        assert_eq!(entries.len(), 4);

        assert_eq!(
            ledger.read_balance(AccountId::Player(1)).await.unwrap(),
            Balance::new(10, 0)
        );
        assert_eq!(
            ledger.read_balance(AccountId::Player(2)).await.unwrap(),
            Balance::new(0, 5)
        );
        assert_eq!(
            ledger.read_balance(AccountId::House).await.unwrap(),
            Balance::new(20, 0)
        );

        // Closing balances recorded per entry, house entries accumulate
        assert_eq!(entries[1].balance_after, Balance::new(10, 0));
        assert_eq!(entries[3].balance_after, Balance::new(20, 0));
        assert_eq!(entries[0].direction, EntryDirection::Debit);
    }

    #[tokio::test]
    async fn test_commit_is_all_or_nothing() {
        let ledger = MemoryLedger::new()
            .with_account(1, Balance::new(20, 0))
            .with_account(2, Balance::new(3, 0));

        let err = ledger.commit(&stake_batch("arm:2", 10)).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

        // Player 1 was staged first but must be untouched
        assert_eq!(
            ledger.read_balance(AccountId::Player(1)).await.unwrap(),
            Balance::new(20, 0)
        );
        assert_eq!(
            ledger.read_balance(AccountId::House).await.unwrap(),
            Balance::default()
        );
        assert!(ledger.batch_entries("arm:2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_key_rejected() {
        let ledger = MemoryLedger::new()
            .with_account(1, Balance::new(100, 0))
            .with_account(2, Balance::new(100, 0));

        ledger.commit(&stake_batch("arm:3", 10)).await.unwrap();
        let err = ledger.commit(&stake_batch("arm:3", 10)).await.unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateTransaction(_)));

        assert_eq!(
            ledger.read_balance(AccountId::Player(1)).await.unwrap(),
            Balance::new(90, 0)
        );
        assert_eq!(ledger.batch_entries("arm:3").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_injected_failure_changes_nothing() {
        let ledger = MemoryLedger::new()
            .with_account(1, Balance::new(100, 0))
            .with_account(2, Balance::new(100, 0));
        ledger.fail_next_commits(1);

        let err = ledger.commit(&stake_batch("arm:4", 10)).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(ledger.total_supply(), 200);

        // Same key succeeds once the ledger recovers
        ledger.commit(&stake_batch("arm:4", 10)).await.unwrap();
        assert_eq!(ledger.total_supply(), 200);
    }

    #[tokio::test]
    async fn test_adjust_balance_guards_player_pools() {
        let ledger = MemoryLedger::new().with_account(1, Balance::new(5, 5));

        let err = ledger
            .adjust_balance(AccountId::Player(1), -6, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

        let balance = ledger
            .adjust_balance(AccountId::Player(1), -5, 3)
            .await
            .unwrap();
        assert_eq!(balance, Balance::new(0, 8));

        // House may go negative
        let house = ledger.adjust_balance(AccountId::House, -7, 0).await.unwrap();
        assert_eq!(house.credit, -7);
    }

    #[tokio::test]
    async fn test_unknown_player_is_not_found() {
        let ledger = MemoryLedger::new();
        let err = ledger.read_balance(AccountId::Player(9)).await.unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(AccountId::Player(9))));
    }

    #[tokio::test]
    async fn test_entries_newest_first() {
        let ledger = MemoryLedger::new()
            .with_account(1, Balance::new(100, 0))
            .with_account(2, Balance::new(100, 0));
        ledger.commit(&stake_batch("arm:a", 10)).await.unwrap();
        ledger.commit(&stake_batch("arm:b", 20)).await.unwrap();

        let entries = ledger.entries(AccountId::Player(1), 10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].idempotency_key, "arm:b");
        assert_eq!(entries[0].balance_after, Balance::new(70, 0));
    }
}
