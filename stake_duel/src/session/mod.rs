//! Match sessions: the shared document and the coordinator that moves it
//! through `matched → arming → active → settling → closed`.

pub mod coordinator;
pub mod errors;
pub mod models;

pub use coordinator::MatchCoordinator;
pub use errors::{SessionError, SessionResult};
pub use models::{
    MatchSession, MoveRecord, Participant, Phase, Presence, Role, TerminalReason, abort_match,
    advance_phase, apply_departure, apply_move, apply_timeout, validate_move,
};
