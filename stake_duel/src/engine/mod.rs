//! Pure move engines for the two game kinds.
//!
//! Each board answers the same questions through the `Rules` trait: is a
//! move legal for a seat, what board results from it, and is the game over.
//! Engines do no I/O and never look at turn order or match phase; the session
//! layer checks those before handing a move over.

pub mod card;
pub mod grid;

pub use card::{CARD_CELLS, CardBoard, Call, WINNING_LINES};
pub use grid::{GRID_CELLS, GridBoard, Mark};

use crate::types::Seat;
use enum_dispatch::enum_dispatch;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Game kinds offered in the lobby
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameKind {
    /// Three-in-a-row on a 3×3 grid
    Grid,
    /// Number-calling race on two 5×5 cards
    Card,
}

impl std::fmt::Display for GameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GameKind::Grid => write!(f, "grid"),
            GameKind::Card => write!(f, "card"),
        }
    }
}

impl std::str::FromStr for GameKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "grid" => Ok(GameKind::Grid),
            "card" => Ok(GameKind::Card),
            other => Err(format!("unknown game kind '{other}'")),
        }
    }
}

/// What a player submits on their turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MovePayload {
    /// Claim a grid cell (0..9, row-major)
    Mark { cell: usize },
    /// Call a number (1..=25)
    Call { number: u8 },
}

/// Why a move was refused. Raised before anything is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum IllegalMove {
    #[error("match is not in play")]
    NotActive,
    #[error("not your turn")]
    NotYourTurn,
    #[error("not a player in this match")]
    NotAParticipant,
    #[error("game is already decided")]
    GameOver,
    #[error("{0} moves are not played in this game")]
    WrongGame(GameKind),
    #[error("cell {0} is off the board")]
    CellOutOfRange(usize),
    #[error("cell {0} is already taken")]
    CellOccupied(usize),
    #[error("number {0} is not on the cards")]
    NumberOutOfRange(u8),
    #[error("number {0} was already called")]
    AlreadyCalled(u8),
}

/// Terminal result of a board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Winner(Seat),
    Draw,
}

/// Result of applying a legal move
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub board: GameBoard,
    pub terminal: Option<Outcome>,
}

/// Game rules shared by every board
#[enum_dispatch]
pub trait Rules {
    fn kind(&self) -> GameKind;

    /// Check a move for `seat` against the board alone
    fn validate(&self, seat: Seat, payload: &MovePayload) -> Result<(), IllegalMove>;

    /// Apply a move, returning the new board and its terminal state.
    /// The receiver is never modified.
    fn apply(&self, seat: Seat, payload: &MovePayload) -> Result<Applied, IllegalMove>;

    /// Every move `seat` could legally make right now
    fn legal_moves(&self, seat: Seat) -> Vec<MovePayload>;

    /// Number of moves applied so far
    fn moves_played(&self) -> usize;
}

/// Board state for either game kind
#[enum_dispatch(Rules)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "game", rename_all = "snake_case")]
pub enum GameBoard {
    Grid(GridBoard),
    Card(CardBoard),
}

impl GameBoard {
    /// Fresh board for a new match; card games deal both cards from `rng`
    pub fn new<R: Rng + ?Sized>(kind: GameKind, rng: &mut R) -> Self {
        match kind {
            GameKind::Grid => GameBoard::Grid(GridBoard::new()),
            GameKind::Card => GameBoard::Card(CardBoard::deal(rng)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_reaches_each_board() {
        let mut rng = rand::rng();
        let grid = GameBoard::new(GameKind::Grid, &mut rng);
        let card = GameBoard::new(GameKind::Card, &mut rng);

        assert_eq!(grid.kind(), GameKind::Grid);
        assert_eq!(card.kind(), GameKind::Card);
        assert_eq!(grid.legal_moves(0).len(), 9);
        assert_eq!(card.legal_moves(0).len(), 25);
    }

    #[test]
    fn test_wrong_payload_for_game() {
        let grid = GameBoard::Grid(GridBoard::new());
        assert_eq!(
            grid.validate(0, &MovePayload::Call { number: 3 }),
            Err(IllegalMove::WrongGame(GameKind::Card))
        );
    }

    #[test]
    fn test_game_kind_parse() {
        assert_eq!("Grid".parse::<GameKind>(), Ok(GameKind::Grid));
        assert_eq!("card".parse::<GameKind>(), Ok(GameKind::Card));
        assert!("chess".parse::<GameKind>().is_err());
    }

    #[test]
    fn test_board_serialises_with_game_tag() {
        let board = GameBoard::Grid(GridBoard::new());
        let value = serde_json::to_value(&board).unwrap();
        assert_eq!(value["game"], "grid");
        let back: GameBoard = serde_json::from_value(value).unwrap();
        assert_eq!(back, board);
    }
}
