//! Matchmaking queue: one waiting list per stake tier.
//!
//! Entries live under `queue/{tier_key}/{player_id}`. Scans are a bounded,
//! unordered batch, so pairing is best-effort rather than strict FIFO.

pub mod errors;
pub mod matchmaker;
pub mod models;

pub use errors::{QueueError, QueueResult};
pub use matchmaker::Matchmaker;
pub use models::{CancelOutcome, Claim, JoinOutcome, MatchHandle, QueueEntry, SearchTicket};
