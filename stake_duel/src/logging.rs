//! Structured log events for the money path and the match lifecycle.
//!
//! Ordinary diagnostics go through the `log` facade. The two helpers here
//! emit `tracing` events with fields so balance movements and phase changes
//! can be filtered and audited on their own.

use crate::session::Phase;
use crate::types::{MatchId, PlayerId};

/// Log a balance movement caused by a match
///
/// # Arguments
///
/// * `match_id` - Match the movement belongs to
/// * `event` - `escrow`, `payout` or `refund`
/// * `player_id` - Player account touched, `None` for the house
/// * `amount` - Signed change to the account's total balance
///
/// # Example
///
/// ```
/// use stake_duel::logging::log_money_event;
/// use uuid::Uuid;
///
/// log_money_event(Uuid::new_v4(), "escrow", Some(42), -10);
/// ```
pub fn log_money_event(match_id: MatchId, event: &str, player_id: Option<PlayerId>, amount: i64) {
    tracing::info!(
        match_id = %match_id,
        event = event,
        player_id = player_id,
        amount = amount,
        "MONEY: {} {}",
        event,
        amount
    );
}

/// Log a committed phase change
pub fn log_phase_transition(match_id: MatchId, from: Phase, to: Phase) {
    if to == Phase::Aborted {
        tracing::warn!(
            match_id = %match_id,
            from = %from,
            to = %to,
            "Match aborted"
        );
    } else {
        tracing::debug!(
            match_id = %match_id,
            from = %from,
            to = %to,
            "Phase transition"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_log_money_event() {
        // Just ensure it doesn't panic
        log_money_event(Uuid::new_v4(), "payout", Some(1), 18);
        log_money_event(Uuid::new_v4(), "escrow", None, 20);
    }

    #[test]
    fn test_log_phase_transition() {
        log_phase_transition(Uuid::new_v4(), Phase::Active, Phase::Settling);
        log_phase_transition(Uuid::new_v4(), Phase::Arming, Phase::Aborted);
    }
}
