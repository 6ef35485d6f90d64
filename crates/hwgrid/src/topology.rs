//! Fixed geometry of a wafer module.
//!
//! All conversions here are pure index arithmetic; whether a given element
//! physically exists is answered by the [`Catalog`](crate::catalog::Catalog).

use crate::ids::{AggregatorId, BoardId, ChipId, ReticleId, TriggerId};

pub const BOARDS_PER_MODULE: u32 = 48;
pub const CHIPS_PER_MODULE: u32 = 384;
pub const CHIPS_PER_BOARD: u32 = 8;
pub const MAX_READOUTS_PER_MODULE: usize = 12;
pub const TRIGGERS_PER_MODULE: u32 = 12;
pub const AGGREGATORS_PER_MODULE: u32 = 2;

/// Board that carries the module-wide clock master.
pub const MASTER_BOARD: u32 = 12;
pub const MAX_MODULES_PER_REQUEST: usize = 25;

/// Chips form a row-major grid of 24 columns and 16 rows.
pub const GRID_WIDTH: u32 = 24;
pub const GRID_HEIGHT: u32 = CHIPS_PER_MODULE / GRID_WIDTH;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Direction {
    East,
    South,
    West,
    North,
}

pub const DIRECTIONS: [Direction; 4] = [
    Direction::East,
    Direction::South,
    Direction::West,
    Direction::North,
];

#[inline]
pub fn chip_to_board(chip: ChipId) -> BoardId {
    BoardId::new(chip.get() / CHIPS_PER_BOARD)
}

#[inline]
pub fn reticle_to_board(reticle: ReticleId) -> BoardId {
    BoardId::new(reticle.get())
}

#[inline]
pub fn chip_to_reticle(chip: ChipId) -> ReticleId {
    ReticleId::new(chip.get() / CHIPS_PER_BOARD)
}

#[inline]
pub fn board_to_trigger(board: BoardId) -> TriggerId {
    TriggerId::new(board.get() / 4)
}

#[inline]
pub fn trigger_to_aggregator(trigger: TriggerId) -> AggregatorId {
    AggregatorId::new(trigger.get() / 6)
}

/// All chips owned by a board, ascending.
pub fn board_chips(board: BoardId) -> impl Iterator<Item = ChipId> {
    let first = board.get() * CHIPS_PER_BOARD;
    (first..first + CHIPS_PER_BOARD).map(ChipId::new)
}

/// Cardinal neighbor of a chip in the grid, `None` past an edge.
pub fn chip_neighbor(chip: ChipId, direction: Direction) -> Option<ChipId> {
    let id = chip.get();
    debug_assert!(id < CHIPS_PER_MODULE);
    let (col, row) = (id % GRID_WIDTH, id / GRID_WIDTH);
    let (col, row) = match direction {
        Direction::East => {
            if col + 1 == GRID_WIDTH {
                return None;
            }
            (col + 1, row)
        }
        Direction::South => {
            if row + 1 == GRID_HEIGHT {
                return None;
            }
            (col, row + 1)
        }
        Direction::West => {
            if col == 0 {
                return None;
            }
            (col - 1, row)
        }
        Direction::North => {
            if row == 0 {
                return None;
            }
            (col, row - 1)
        }
    };
    Some(ChipId::new(row * GRID_WIDTH + col))
}
