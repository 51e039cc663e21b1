//! Key layout of the shared documents.

use crate::types::{MatchId, PlayerId};

pub const QUEUE_ROOT: &str = "queue";
pub const MATCH_ROOT: &str = "matches";
pub const PRESENCE_ROOT: &str = "presence";
pub const SETTLEMENT_ROOT: &str = "settlements";

/// Prefix under which all waiting entries of one tier live
pub fn queue_prefix(tier_key: &str) -> String {
    format!("{QUEUE_ROOT}/{tier_key}/")
}

pub fn queue_entry(tier_key: &str, player_id: PlayerId) -> String {
    format!("{QUEUE_ROOT}/{tier_key}/{player_id}")
}

pub fn session(match_id: MatchId) -> String {
    format!("{MATCH_ROOT}/{match_id}")
}

pub fn presence(match_id: MatchId, player_id: PlayerId) -> String {
    format!("{PRESENCE_ROOT}/{match_id}/{player_id}")
}

pub fn settlement(match_id: MatchId) -> String {
    format!("{SETTLEMENT_ROOT}/{match_id}")
}
