//! Ledger data models.

use super::errors::{LedgerError, LedgerResult};
use crate::types::{MatchId, PlayerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ledger account. The house is an ordinary account reached through the
/// same atomic operations as any player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountId {
    Player(PlayerId),
    House,
}

impl AccountId {
    pub fn is_house(&self) -> bool {
        matches!(self, AccountId::House)
    }

    /// Key used by persistent backends
    pub fn storage_key(&self) -> String {
        match self {
            AccountId::Player(id) => format!("player:{id}"),
            AccountId::House => "house".to_string(),
        }
    }

    pub fn from_storage_key(key: &str) -> Option<Self> {
        if key == "house" {
            return Some(AccountId::House);
        }
        key.strip_prefix("player:")
            .and_then(|id| id.parse().ok())
            .map(AccountId::Player)
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountId::Player(id) => write!(f, "player {id}"),
            AccountId::House => write!(f, "house"),
        }
    }
}

/// Two-pool balance: `credit` is non-withdrawable, `winnings` is withdrawable
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub credit: i64,
    pub winnings: i64,
}

impl Balance {
    pub const fn new(credit: i64, winnings: i64) -> Self {
        Self { credit, winnings }
    }

    pub fn total(&self) -> i64 {
        self.credit.saturating_add(self.winnings)
    }

    /// Apply a delta, `None` on overflow
    pub fn checked_apply(&self, delta: BalanceDelta) -> Option<Balance> {
        Some(Balance {
            credit: self.credit.checked_add(delta.credit)?,
            winnings: self.winnings.checked_add(delta.winnings)?,
        })
    }

    pub fn is_negative(&self) -> bool {
        self.credit < 0 || self.winnings < 0
    }
}

/// Signed change to both pools of one account
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDelta {
    pub credit: i64,
    pub winnings: i64,
}

impl BalanceDelta {
    pub const fn new(credit: i64, winnings: i64) -> Self {
        Self { credit, winnings }
    }

    pub fn total(&self) -> i64 {
        self.credit.saturating_add(self.winnings)
    }

    pub fn negate(&self) -> BalanceDelta {
        BalanceDelta {
            credit: -self.credit,
            winnings: -self.winnings,
        }
    }

    pub fn direction(&self) -> EntryDirection {
        if self.total() < 0 {
            EntryDirection::Debit
        } else {
            EntryDirection::Credit
        }
    }
}

/// Account model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub balance: Balance,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Entry direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryDirection {
    Debit,
    Credit,
}

impl std::fmt::Display for EntryDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryDirection::Debit => write!(f, "debit"),
            EntryDirection::Credit => write!(f, "credit"),
        }
    }
}

impl EntryDirection {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "debit" => Some(EntryDirection::Debit),
            "credit" => Some(EntryDirection::Credit),
            _ => None,
        }
    }
}

/// Entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    /// Funding from outside the engine (top-up, bonus)
    Deposit,
    /// Stake taken when a match arms
    Escrow,
    /// Prize paid to a winner
    Payout,
    /// Stake returned on a draw or a voided match
    Refund,
    AdminAdjust,
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryType::Deposit => write!(f, "deposit"),
            EntryType::Escrow => write!(f, "escrow"),
            EntryType::Payout => write!(f, "payout"),
            EntryType::Refund => write!(f, "refund"),
            EntryType::AdminAdjust => write!(f, "admin_adjust"),
        }
    }
}

impl EntryType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "deposit" => Some(EntryType::Deposit),
            "escrow" => Some(EntryType::Escrow),
            "payout" => Some(EntryType::Payout),
            "refund" => Some(EntryType::Refund),
            "admin_adjust" => Some(EntryType::AdminAdjust),
            _ => None,
        }
    }
}

/// Immutable ledger entry: one per balance mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub account: AccountId,
    pub match_id: Option<MatchId>,
    pub entry_type: EntryType,
    pub direction: EntryDirection,
    pub delta: BalanceDelta,
    pub balance_after: Balance,
    pub idempotency_key: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Entry appended through `BalanceLedger::append_transaction`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEntry {
    pub account: AccountId,
    pub match_id: Option<MatchId>,
    pub entry_type: EntryType,
    pub delta: BalanceDelta,
    pub balance_after: Balance,
    pub idempotency_key: String,
    pub description: Option<String>,
}

/// How a posting changes its account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostingChange {
    Delta(BalanceDelta),
    /// Debit `amount`, taking the credit pool first and only the remainder
    /// from winnings. Resolved against the balance inside the commit.
    DebitCreditFirst(i64),
}

/// One leg of a ledger batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub account: AccountId,
    pub change: PostingChange,
    pub entry_type: EntryType,
    pub description: Option<String>,
}

impl Posting {
    pub fn delta(account: AccountId, delta: BalanceDelta, entry_type: EntryType) -> Self {
        Self {
            account,
            change: PostingChange::Delta(delta),
            entry_type,
            description: None,
        }
    }

    pub fn debit_credit_first(account: AccountId, amount: i64, entry_type: EntryType) -> Self {
        Self {
            account,
            change: PostingChange::DebitCreditFirst(amount),
            entry_type,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A set of postings applied all-or-nothing under one idempotency key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerBatch {
    pub idempotency_key: String,
    pub match_id: Option<MatchId>,
    pub postings: Vec<Posting>,
}

impl LedgerBatch {
    pub fn new(idempotency_key: impl Into<String>) -> Self {
        Self {
            idempotency_key: idempotency_key.into(),
            match_id: None,
            postings: Vec::new(),
        }
    }

    pub fn for_match(mut self, match_id: MatchId) -> Self {
        self.match_id = Some(match_id);
        self
    }

    pub fn posting(mut self, posting: Posting) -> Self {
        self.postings.push(posting);
        self
    }
}

/// Resolve a posting change against the account's current balance.
///
/// # Errors
///
/// * `LedgerError::InvalidAmount` - Non-positive credit-first debit
/// * `LedgerError::InsufficientFunds` - Credit-first debit exceeds the total balance
pub fn resolve_change(
    account: AccountId,
    current: Balance,
    change: PostingChange,
) -> LedgerResult<BalanceDelta> {
    match change {
        PostingChange::Delta(delta) => Ok(delta),
        PostingChange::DebitCreditFirst(amount) => {
            if amount <= 0 {
                return Err(LedgerError::InvalidAmount(amount));
            }
            let from_credit = current.credit.clamp(0, amount);
            let from_winnings = amount - from_credit;
            if from_winnings > current.winnings.max(0) && !account.is_house() {
                return Err(LedgerError::InsufficientFunds {
                    account,
                    available: current.total(),
                    required: amount,
                });
            }
            Ok(BalanceDelta::new(-from_credit, -from_winnings))
        }
    }
}

/// Resolve a posting and compute the closing balance it leaves behind.
///
/// Player pools may never end negative; the house may.
pub fn apply_posting(
    account: AccountId,
    current: Balance,
    change: PostingChange,
) -> LedgerResult<(BalanceDelta, Balance)> {
    let delta = resolve_change(account, current, change)?;
    let next = current
        .checked_apply(delta)
        .ok_or(LedgerError::BalanceOverflow)?;

    if next.is_negative() && !account.is_house() {
        return Err(LedgerError::InsufficientFunds {
            account,
            available: current.total(),
            required: delta.negate().total(),
        });
    }

    Ok((delta, next))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credit_first_uses_credit_pool_only_when_enough() {
        let delta = resolve_change(
            AccountId::Player(1),
            Balance::new(20, 5),
            PostingChange::DebitCreditFirst(10),
        )
        .unwrap();
        assert_eq!(delta, BalanceDelta::new(-10, 0));
    }

    #[test]
    fn test_credit_first_takes_remainder_from_winnings() {
        let delta = resolve_change(
            AccountId::Player(1),
            Balance::new(4, 30),
            PostingChange::DebitCreditFirst(10),
        )
        .unwrap();
        assert_eq!(delta, BalanceDelta::new(-4, -6));
    }

    #[test]
    fn test_credit_first_rejects_short_total() {
        let err = resolve_change(
            AccountId::Player(1),
            Balance::new(4, 5),
            PostingChange::DebitCreditFirst(10),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientFunds {
                available: 9,
                required: 10,
                ..
            }
        ));
    }

    #[test]
    fn test_credit_first_rejects_non_positive() {
        let err = resolve_change(
            AccountId::Player(1),
            Balance::new(4, 5),
            PostingChange::DebitCreditFirst(0),
        )
        .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(0)));
    }

    #[test]
    fn test_apply_posting_lets_house_go_negative() {
        let (_, next) = apply_posting(
            AccountId::House,
            Balance::new(10, 0),
            PostingChange::Delta(BalanceDelta::new(-18, 0)),
        )
        .unwrap();
        assert_eq!(next, Balance::new(-8, 0));

        let err = apply_posting(
            AccountId::Player(3),
            Balance::new(10, 0),
            PostingChange::Delta(BalanceDelta::new(0, -1)),
        )
        .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
    }

    #[test]
    fn test_storage_key_round_trip() {
        for account in [AccountId::House, AccountId::Player(42), AccountId::Player(-3)] {
            assert_eq!(AccountId::from_storage_key(&account.storage_key()), Some(account));
        }
        assert_eq!(AccountId::from_storage_key("nobody"), None);
    }

    #[test]
    fn test_delta_direction() {
        assert_eq!(BalanceDelta::new(-10, 0).direction(), EntryDirection::Debit);
        assert_eq!(BalanceDelta::new(0, 18).direction(), EntryDirection::Credit);
    }
}
