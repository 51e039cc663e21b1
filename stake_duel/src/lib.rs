//! # Stake Duel
//!
//! A real-money 1-vs-1 matchmaking and wager settlement engine.
//!
//! Two players queue for a stake tier, get paired, play a short turn-based
//! game and have the wager settled against their balances. There is no game
//! server: both peers run the same client logic against a shared,
//! strongly-consistent state store, and every write that must not race goes
//! through the store's compare-and-set.
//!
//! ## Architecture
//!
//! - **Queue**: per-tier waiting list; a seeker claims a waiting entry or waits
//! - **Coordinator**: `matched → arming → active → settling → closed`, with
//!   `aborted` as the exit before a result exists
//! - **Move engine**: pure rules for the grid game (3×3) and the card game
//!   (5×5 cards, shared call list)
//! - **Settlement**: escrow at arm time, payout or refund at close, exactly once
//!
//! ## Core Modules
//!
//! - [`store`]: Shared state store trait and in-memory implementation
//! - [`ledger`]: Two-pool balance ledger with atomic batches
//! - [`queue`]: Matchmaking
//! - [`session`]: Match session document and coordinator
//! - [`engine`]: Game rules
//! - [`settlement`]: Escrow and payouts
//! - [`client`]: Player actor driving one player's side
//!
//! ## Example
//!
//! ```
//! use stake_duel::engine::{GameBoard, GameKind, MovePayload, Rules};
//!
//! let board = GameBoard::new(GameKind::Grid, &mut rand::rng());
//! let applied = board.apply(0, &MovePayload::Mark { cell: 4 }).unwrap();
//! assert!(applied.terminal.is_none());
//! ```

/// Player client actor and its messages.
pub mod client;

/// Engine configuration and stake tiers.
pub mod config;

/// Postgres connectivity for the ledger.
pub mod db;

/// Game rules.
pub mod engine;

/// Crate-level error.
pub mod error;

/// Two-pool balance ledger.
pub mod ledger;

/// Structured money and lifecycle events.
pub mod logging;

/// Engine counters.
pub mod metrics;

/// Matchmaking queue.
pub mod queue;

/// Match sessions and the coordinator.
pub mod session;

/// Escrow and settlement.
pub mod settlement;

/// Shared state store.
pub mod store;

/// Shared identifiers.
pub mod types;

pub use client::{ClientResponse, ClientStatus, ClientView, PlayerActor, PlayerHandle};
pub use config::{EngineConfig, Tier, TierCatalog};
pub use engine::{GameBoard, GameKind, MovePayload};
pub use error::{DuelError, DuelResult};
pub use queue::Matchmaker;
pub use session::{MatchCoordinator, MatchSession, Phase};
pub use settlement::SettlementEngine;
pub use types::{MatchId, PlayerId, PlayerProfile};
