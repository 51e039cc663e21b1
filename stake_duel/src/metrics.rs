//! Engine counters on the `metrics` facade.
//!
//! Nothing is recorded unless the embedding binary installs a recorder
//! (the simulator installs the Prometheus exporter with `--metrics`).
//!
//! # Metrics
//!
//! - **Queue**: matches created, claim conflicts, search timeouts
//! - **Play**: illegal moves, turn timeouts
//! - **Money**: escrow armed, settlements applied, races absorbed, ledger failures

use crate::engine::GameKind;

// ============================================================================
// Queue Metrics
// ============================================================================

/// A claim committed and a session was written
pub fn match_created(game: GameKind) {
    ::metrics::counter!("duel_matches_created_total", "game" => game.to_string()).increment(1);
}

/// A challenger lost a claim race
pub fn claim_conflict() {
    ::metrics::counter!("duel_claim_conflicts_total").increment(1);
}

/// A seeker gave up after the search budget
pub fn search_timeout() {
    ::metrics::counter!("duel_search_timeouts_total").increment(1);
}

// ============================================================================
// Play Metrics
// ============================================================================

/// A move was rejected before reaching the store
pub fn illegal_move() {
    ::metrics::counter!("duel_illegal_moves_total").increment(1);
}

/// A turn clock penalty was written
pub fn turn_timeout() {
    ::metrics::counter!("duel_turn_timeouts_total").increment(1);
}

// ============================================================================
// Money Metrics
// ============================================================================

/// Both stakes moved into escrow
pub fn escrow_armed() {
    ::metrics::counter!("duel_escrow_armed_total").increment(1);
}

/// A settlement batch committed
pub fn settlement_applied(outcome: &'static str) {
    ::metrics::counter!("duel_settlements_total", "outcome" => outcome).increment(1);
}

/// A duplicate arm/settle attempt found the guard taken
pub fn settlement_race(op: &'static str) {
    ::metrics::counter!("duel_settlement_races_total", "op" => op).increment(1);
}

/// A ledger batch failed; nothing was applied
pub fn ledger_failure(op: &'static str) {
    ::metrics::counter!("duel_ledger_failures_total", "op" => op).increment(1);
}
