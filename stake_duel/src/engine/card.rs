//! Number-calling race on 5×5 cards.
//!
//! Each player holds a card with a private permutation of 1..=25. Players take
//! turns calling numbers; a called number marks that number on both cards.
//! Completing five of the twelve lines wins.
//!
//! When one call completes the fifth line on both cards, the caller wins.

use super::{Applied, GameBoard, GameKind, IllegalMove, MovePayload, Outcome, Rules};
use crate::types::{Seat, opponent_seat};
use rand::{Rng, seq::SliceRandom};
use serde::{Deserialize, Serialize};

pub const CARD_SIDE: usize = 5;
pub const CARD_CELLS: usize = CARD_SIDE * CARD_SIDE;
/// Completed lines needed to win
pub const WINNING_LINES: usize = 5;

const MAX_NUMBER: u8 = CARD_CELLS as u8;

/// One entry of the shared call list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Call {
    pub number: u8,
    pub caller: Seat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardBoard {
    /// Row-major card per seat
    cards: [[u8; CARD_CELLS]; 2],
    calls: Vec<Call>,
}

/// 5 rows, 5 columns, 2 diagonals
fn lines() -> impl Iterator<Item = [usize; CARD_SIDE]> {
    let rows = (0..CARD_SIDE).map(|r| -> [usize; CARD_SIDE] {
        std::array::from_fn(|c| r * CARD_SIDE + c)
    });
    let cols = (0..CARD_SIDE).map(|c| -> [usize; CARD_SIDE] {
        std::array::from_fn(|r| r * CARD_SIDE + c)
    });
    let diagonals: [[usize; CARD_SIDE]; 2] = [
        std::array::from_fn(|i| i * CARD_SIDE + i),
        std::array::from_fn(|i| i * CARD_SIDE + (CARD_SIDE - 1 - i)),
    ];
    rows.chain(cols).chain(diagonals)
}

impl CardBoard {
    /// Deal an independent random card to each seat
    pub fn deal<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut deal_one = || {
            let mut numbers: [u8; CARD_CELLS] = std::array::from_fn(|i| i as u8 + 1);
            numbers.shuffle(&mut *rng);
            numbers
        };
        let host = deal_one();
        let joiner = deal_one();
        Self::with_cards([host, joiner])
    }

    /// Board with fixed cards, for replay and tests
    pub fn with_cards(cards: [[u8; CARD_CELLS]; 2]) -> Self {
        Self {
            cards,
            calls: Vec::new(),
        }
    }

    pub fn card(&self, seat: Seat) -> &[u8; CARD_CELLS] {
        &self.cards[seat]
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn is_called(&self, number: u8) -> bool {
        self.calls.iter().any(|c| c.number == number)
    }

    /// Marked cells of a seat's card
    pub fn marked(&self, seat: Seat) -> [bool; CARD_CELLS] {
        let card = &self.cards[seat];
        std::array::from_fn(|i| self.is_called(card[i]))
    }

    /// Completed lines on a seat's card
    pub fn completed_lines(&self, seat: Seat) -> usize {
        let marked = self.marked(seat);
        lines()
            .filter(|line| line.iter().all(|&i| marked[i]))
            .count()
    }

    /// Result after `caller` made the latest call
    fn outcome_after_call(&self, caller: Seat) -> Option<Outcome> {
        if self.completed_lines(caller) >= WINNING_LINES {
            return Some(Outcome::Winner(caller));
        }
        let other = opponent_seat(caller);
        if self.completed_lines(other) >= WINNING_LINES {
            return Some(Outcome::Winner(other));
        }
        None
    }

    /// Terminal state of the board as it stands
    pub fn outcome(&self) -> Option<Outcome> {
        let last = self.calls.last()?;
        self.outcome_after_call(last.caller)
    }

    fn number_for(&self, payload: &MovePayload) -> Result<u8, IllegalMove> {
        let number = match payload {
            MovePayload::Call { number } => *number,
            MovePayload::Mark { .. } => return Err(IllegalMove::WrongGame(GameKind::Grid)),
        };

        if self.outcome().is_some() {
            return Err(IllegalMove::GameOver);
        }
        if !(1..=MAX_NUMBER).contains(&number) {
            return Err(IllegalMove::NumberOutOfRange(number));
        }
        if self.is_called(number) {
            return Err(IllegalMove::AlreadyCalled(number));
        }
        Ok(number)
    }
}

impl Rules for CardBoard {
    fn kind(&self) -> GameKind {
        GameKind::Card
    }

    fn validate(&self, _seat: Seat, payload: &MovePayload) -> Result<(), IllegalMove> {
        self.number_for(payload).map(|_| ())
    }

    fn apply(&self, seat: Seat, payload: &MovePayload) -> Result<Applied, IllegalMove> {
        let number = self.number_for(payload)?;
        let mut next = self.clone();
        next.calls.push(Call {
            number,
            caller: seat,
        });

        let terminal = next.outcome_after_call(seat);
        Ok(Applied {
            board: GameBoard::Card(next),
            terminal,
        })
    }

    fn legal_moves(&self, _seat: Seat) -> Vec<MovePayload> {
        if self.outcome().is_some() {
            return Vec::new();
        }
        (1..=MAX_NUMBER)
            .filter(|&n| !self.is_called(n))
            .map(|number| MovePayload::Call { number })
            .collect()
    }

    fn moves_played(&self) -> usize {
        self.calls.len()
    }
}
