//! 3×3 three-in-a-row.

use super::{Applied, GameBoard, GameKind, IllegalMove, MovePayload, Outcome, Rules};
use crate::types::Seat;
use serde::{Deserialize, Serialize};

pub const GRID_CELLS: usize = 9;

/// Rows, columns and diagonals
const LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

/// Grid symbol. The host plays X and moves first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mark {
    X,
    O,
}

impl Mark {
    pub fn for_seat(seat: Seat) -> Self {
        if seat == crate::types::HOST_SEAT {
            Mark::X
        } else {
            Mark::O
        }
    }

    pub fn seat(&self) -> Seat {
        match self {
            Mark::X => crate::types::HOST_SEAT,
            Mark::O => crate::types::JOINER_SEAT,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridBoard {
    cells: [Option<Mark>; GRID_CELLS],
}

impl GridBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Board from a row-major layout, for replay and tests
    pub fn from_cells(cells: [Option<Mark>; GRID_CELLS]) -> Self {
        Self { cells }
    }

    pub fn cells(&self) -> &[Option<Mark>; GRID_CELLS] {
        &self.cells
    }

    pub fn is_full(&self) -> bool {
        self.cells.iter().all(Option::is_some)
    }

    /// Symbol owning a complete line, if any
    pub fn line_owner(&self) -> Option<Mark> {
        LINES.iter().find_map(|line| {
            let first = self.cells[line[0]]?;
            line.iter()
                .all(|&i| self.cells[i] == Some(first))
                .then_some(first)
        })
    }

    /// Terminal state of the board as it stands
    pub fn outcome(&self) -> Option<Outcome> {
        match self.line_owner() {
            Some(mark) => Some(Outcome::Winner(mark.seat())),
            None if self.is_full() => Some(Outcome::Draw),
            None => None,
        }
    }

    fn cell_for(&self, payload: &MovePayload) -> Result<usize, IllegalMove> {
        let cell = match payload {
            MovePayload::Mark { cell } => *cell,
            MovePayload::Call { .. } => return Err(IllegalMove::WrongGame(GameKind::Card)),
        };

        if self.outcome().is_some() {
            return Err(IllegalMove::GameOver);
        }
        if cell >= GRID_CELLS {
            return Err(IllegalMove::CellOutOfRange(cell));
        }
        if self.cells[cell].is_some() {
            return Err(IllegalMove::CellOccupied(cell));
        }
        Ok(cell)
    }
}

impl Rules for GridBoard {
    fn kind(&self) -> GameKind {
        GameKind::Grid
    }

    fn validate(&self, _seat: Seat, payload: &MovePayload) -> Result<(), IllegalMove> {
        self.cell_for(payload).map(|_| ())
    }

    fn apply(&self, seat: Seat, payload: &MovePayload) -> Result<Applied, IllegalMove> {
        let cell = self.cell_for(payload)?;
        let mut next = self.clone();
        next.cells[cell] = Some(Mark::for_seat(seat));

        let terminal = next.outcome();
        Ok(Applied {
            board: GameBoard::Grid(next),
            terminal,
        })
    }

    fn legal_moves(&self, _seat: Seat) -> Vec<MovePayload> {
        if self.outcome().is_some() {
            return Vec::new();
        }
        (0..GRID_CELLS)
            .filter(|&cell| self.cells[cell].is_none())
            .map(|cell| MovePayload::Mark { cell })
            .collect()
    }

    fn moves_played(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }
}
