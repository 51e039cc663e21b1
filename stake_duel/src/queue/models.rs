//! Queue documents and the handles matchmaking hands back.

use crate::config::Tier;
use crate::session::Role;
use crate::store::ConnectionId;
use crate::types::{MatchId, PlayerId, PlayerProfile};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reservation a challenger writes onto a waiting entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub match_id: MatchId,
    pub claimed_by: PlayerId,
    pub claimed_by_name: String,
}

/// A waiting player. Mutated at most once, when a claim lands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub player_id: PlayerId,
    pub display_name: String,
    pub enqueued_at: DateTime<Utc>,
    pub claim: Option<Claim>,
}

impl QueueEntry {
    pub fn new(player: &PlayerProfile, now: DateTime<Utc>) -> Self {
        Self {
            player_id: player.id,
            display_name: player.display_name.clone(),
            enqueued_at: now,
            claim: None,
        }
    }

    pub fn is_claimed(&self) -> bool {
        self.claim.is_some()
    }

    pub fn profile(&self) -> PlayerProfile {
        PlayerProfile::new(self.player_id, self.display_name.clone())
    }

    /// Copy of this entry reserved by `challenger`
    pub fn claimed(&self, match_id: MatchId, challenger: &PlayerProfile) -> Self {
        Self {
            claim: Some(Claim {
                match_id,
                claimed_by: challenger.id,
                claimed_by_name: challenger.display_name.clone(),
            }),
            ..self.clone()
        }
    }
}

/// A pairing, from one player's point of view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchHandle {
    pub match_id: MatchId,
    pub tier: Tier,
    pub role: Role,
    pub opponent: PlayerProfile,
}

/// A seeker's live queue entry
#[derive(Debug, Clone)]
pub struct SearchTicket {
    pub player: PlayerProfile,
    pub tier: Tier,
    pub key: String,
    pub connection: ConnectionId,
    pub enqueued_at: DateTime<Utc>,
    /// When the search budget runs out
    pub deadline: tokio::time::Instant,
}

/// Result of `join`
#[derive(Debug, Clone)]
pub enum JoinOutcome {
    /// Claimed a waiting opponent; we are the joiner
    Matched(MatchHandle),
    /// No claimable opponent; our own entry is waiting
    Waiting(SearchTicket),
}

/// Result of cancelling a search
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// A claim landed before the cancel; the match goes ahead
    AlreadyClaimed(MatchHandle),
    /// Nothing was queued
    NotQueued,
}
