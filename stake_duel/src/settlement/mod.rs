//! Settlement: converts match results into ledger batches exactly once.
//!
//! Every batch pairs each player posting with an equal and opposite house
//! posting, so player flow plus house flow is zero for every settled match.

pub mod engine;
pub mod errors;
pub mod models;

pub use engine::{ArmOutcome, SettleOutcome, SettlementEngine};
pub use errors::{SettlementError, SettlementResult};
pub use models::{GuardLock, GuardOp, MatchOutcome, SettlementRecord};
