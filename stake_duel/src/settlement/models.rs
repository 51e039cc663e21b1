//! Settlement record and guard lock.

use crate::ledger::{AccountId, BalanceDelta, LedgerEntry};
use crate::types::{MatchId, PlayerId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a settled match pays out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchOutcome {
    /// Winner takes the tier payout into winnings
    Win { winner: PlayerId },
    /// Both fees refunded to the credit pool
    Draw,
    /// Escrow restored exactly as it was taken
    Void,
}

impl std::fmt::Display for MatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchOutcome::Win { winner } => write!(f, "win for player {winner}"),
            MatchOutcome::Draw => write!(f, "draw"),
            MatchOutcome::Void => write!(f, "void"),
        }
    }
}

/// Operation a guard lock protects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardOp {
    Arm,
    Settle,
}

/// Short-lived claim on a settlement record.
///
/// A lock older than the configured TTL belongs to an attempt that died and
/// may be taken over; the ledger batch key still prevents a second mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardLock {
    pub holder: Uuid,
    pub op: GuardOp,
    pub acquired_at: DateTime<Utc>,
}

impl GuardLock {
    pub fn new(op: GuardOp, now: DateTime<Utc>) -> Self {
        Self {
            holder: Uuid::new_v4(),
            op,
            acquired_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.acquired_at >= ttl
    }
}

/// Money trail of one match, stored next to the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub match_id: MatchId,
    /// Seat order
    pub players: [PlayerId; 2],
    pub entry_fee: i64,
    pub payout: i64,
    /// Escrow committed
    pub armed: bool,
    /// Split taken from each player at arm time, seat order
    pub debited: [BalanceDelta; 2],
    /// Payout to the winner, if any
    pub credited: Option<(PlayerId, i64)>,
    /// Returned to each player on a draw or void, seat order
    pub refunded: Option<[BalanceDelta; 2]>,
    pub outcome: Option<MatchOutcome>,
    /// Flips to true exactly once
    pub processed: bool,
    pub lock: Option<GuardLock>,
    pub updated_at: DateTime<Utc>,
}

impl SettlementRecord {
    pub fn new(
        match_id: MatchId,
        players: [PlayerId; 2],
        entry_fee: i64,
        payout: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            match_id,
            players,
            entry_fee,
            payout,
            armed: false,
            debited: [BalanceDelta::default(); 2],
            credited: None,
            refunded: None,
            outcome: None,
            processed: false,
            lock: None,
            updated_at: now,
        }
    }

    pub fn is_locked(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.lock.as_ref().is_some_and(|l| !l.is_expired(now, ttl))
    }

    pub fn holds_lock(&self, holder: Uuid) -> bool {
        self.lock.as_ref().is_some_and(|l| l.holder == holder)
    }

    /// Net balance change of one player across arm and settlement
    pub fn player_delta(&self, player_id: PlayerId) -> i64 {
        let Some(seat) = self.players.iter().position(|&p| p == player_id) else {
            return 0;
        };
        let mut total = 0;
        if self.armed {
            total += self.debited[seat].total();
        }
        if let Some((winner, amount)) = self.credited
            && winner == player_id
        {
            total += amount;
        }
        if let Some(refunded) = self.refunded {
            total += refunded[seat].total();
        }
        total
    }

    /// Net house change implied by the record
    pub fn house_delta(&self) -> i64 {
        -self.players.iter().map(|&p| self.player_delta(p)).sum::<i64>()
    }
}

/// Player deltas from a committed batch, in seat order
pub(crate) fn player_deltas(players: [PlayerId; 2], entries: &[LedgerEntry]) -> [BalanceDelta; 2] {
    let mut deltas = [BalanceDelta::default(); 2];
    for entry in entries {
        if let AccountId::Player(id) = entry.account
            && let Some(seat) = players.iter().position(|&p| p == id)
        {
            deltas[seat] = BalanceDelta::new(
                deltas[seat].credit + entry.delta.credit,
                deltas[seat].winnings + entry.delta.winnings,
            );
        }
    }
    deltas
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_expiry() {
        let now = Utc::now();
        let lock = GuardLock::new(GuardOp::Settle, now - Duration::seconds(31));
        assert!(lock.is_expired(now, Duration::seconds(30)));
        assert!(!lock.is_expired(now, Duration::seconds(60)));
    }

    #[test]
    fn test_record_deltas_balance_out() {
        let mut record = SettlementRecord::new(Uuid::new_v4(), [1, 2], 10, 18, Utc::now());
        record.armed = true;
        record.debited = [BalanceDelta::new(-10, 0), BalanceDelta::new(-4, -6)];
        record.credited = Some((1, 18));

        assert_eq!(record.player_delta(1), 8);
        assert_eq!(record.player_delta(2), -10);
        assert_eq!(record.house_delta(), 2);
        assert_eq!(record.player_delta(3), 0);
    }
}
