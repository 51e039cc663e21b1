//! Identifiers shared across the queue, coordinator and settlement layers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Player ID type
pub type PlayerId = i64;

/// Match ID type
pub type MatchId = Uuid;

/// Seat index inside a match. Seat 0 is the host (the player who waited),
/// seat 1 is the joiner (the player who claimed).
pub type Seat = usize;

/// Host seat index
pub const HOST_SEAT: Seat = 0;

/// Joiner seat index
pub const JOINER_SEAT: Seat = 1;

/// Returns the other seat of a two-player match.
#[must_use]
pub const fn opponent_seat(seat: Seat) -> Seat {
    1 - seat
}

/// A player as the queue and the match documents know them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub id: PlayerId,
    pub display_name: String,
}

impl PlayerProfile {
    pub fn new(id: PlayerId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }
}
