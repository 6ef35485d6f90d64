//! Access to the hardware catalog (which modules, boards, chips and readout
//! devices physically exist and are usable).
//!
//! The catalog is opened fresh for every submission and dropped afterwards,
//! so operators can edit it without restarting anything.

use std::path::Path;

use serde::Deserialize;

use crate::Map;
use crate::error::AllocError;
use crate::ids::{AggregatorId, BoardId, ChipId, ModuleId};
use crate::topology::{
    AGGREGATORS_PER_MODULE, BOARDS_PER_MODULE, CHIPS_PER_MODULE, chip_to_board,
};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ReadoutSlot {
    Zero,
    One,
}

pub trait Catalog {
    fn has_module(&self, module: ModuleId) -> bool;
    fn has_board(&self, module: ModuleId, board: BoardId) -> bool;
    fn has_chip(&self, module: ModuleId, chip: ChipId) -> bool;
    fn has_aggregator(&self, module: ModuleId, aggregator: AggregatorId) -> bool;
    /// Serial of the readout device in the given slot, if one is attached.
    fn readout_serial(&self, module: ModuleId, board: BoardId, slot: ReadoutSlot)
    -> Option<&str>;
    /// Usable chips belonging to the given board, ascending.
    fn chips_of_board(&self, module: ModuleId, board: BoardId) -> Vec<ChipId>;
}

#[derive(Debug, Default)]
struct BoardEntry {
    readout0: Option<String>,
    readout1: Option<String>,
    chips: Vec<ChipId>,
}

#[derive(Debug, Default)]
struct ModuleEntry {
    boards: Map<BoardId, BoardEntry>,
    aggregators: Vec<AggregatorId>,
}

/// Catalog backed by a TOML file.
#[derive(Debug, Default)]
pub struct TomlCatalog {
    modules: Map<ModuleId, ModuleEntry>,
}

#[derive(Deserialize)]
struct BoardDef {
    id: u32,
    readout0: Option<String>,
    readout1: Option<String>,
    /// Defaults to all chips of the board when omitted.
    chips: Option<Vec<u32>>,
}

#[derive(Deserialize)]
struct ModuleDef {
    id: u32,
    #[serde(default)]
    aggregators: Vec<u32>,
    #[serde(default, rename = "board")]
    boards: Vec<BoardDef>,
}

#[derive(Deserialize)]
struct CatalogDef {
    #[serde(default, rename = "module")]
    modules: Vec<ModuleDef>,
}

impl TomlCatalog {
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            AllocError::Database(format!("Cannot read catalog {}: {e}", path.display()))
        })?;
        Self::from_str(&data)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(data: &str) -> crate::Result<Self> {
        let def: CatalogDef = toml::from_str(data)?;
        let mut modules: Map<ModuleId, ModuleEntry> = Map::default();
        for module_def in def.modules {
            let module = ModuleId::new(module_def.id);
            if modules.contains_key(&module) {
                return Err(AllocError::Database(format!(
                    "Module {module} defined twice in catalog"
                )));
            }
            let mut entry = ModuleEntry::default();
            for aggregator in module_def.aggregators {
                if aggregator >= AGGREGATORS_PER_MODULE {
                    return Err(AllocError::Database(format!(
                        "Module {module} has invalid aggregator id {aggregator}"
                    )));
                }
                entry.aggregators.push(AggregatorId::new(aggregator));
            }
            for board_def in module_def.boards {
                if board_def.id >= BOARDS_PER_MODULE {
                    return Err(AllocError::Database(format!(
                        "Module {module} has invalid board id {}",
                        board_def.id
                    )));
                }
                let board = BoardId::new(board_def.id);
                let mut chips = match board_def.chips {
                    Some(chips) => {
                        let chips: Vec<ChipId> =
                            chips.into_iter().map(ChipId::new).collect();
                        for &chip in &chips {
                            if chip.get() >= CHIPS_PER_MODULE || chip_to_board(chip) != board
                            {
                                return Err(AllocError::Database(format!(
                                    "Chip {chip} does not belong to board {board} of module {module}"
                                )));
                            }
                        }
                        chips
                    }
                    None => crate::topology::board_chips(board).collect(),
                };
                chips.sort_unstable();
                entry.boards.insert(
                    board,
                    BoardEntry {
                        readout0: board_def.readout0,
                        readout1: board_def.readout1,
                        chips,
                    },
                );
            }
            modules.insert(module, entry);
        }
        Ok(TomlCatalog { modules })
    }

    fn board(&self, module: ModuleId, board: BoardId) -> Option<&BoardEntry> {
        self.modules.get(&module)?.boards.get(&board)
    }
}

impl Catalog for TomlCatalog {
    fn has_module(&self, module: ModuleId) -> bool {
        self.modules.contains_key(&module)
    }

    fn has_board(&self, module: ModuleId, board: BoardId) -> bool {
        self.board(module, board).is_some()
    }

    fn has_chip(&self, module: ModuleId, chip: ChipId) -> bool {
        self.board(module, chip_to_board(chip))
            .is_some_and(|entry| entry.chips.contains(&chip))
    }

    fn has_aggregator(&self, module: ModuleId, aggregator: AggregatorId) -> bool {
        self.modules
            .get(&module)
            .is_some_and(|entry| entry.aggregators.contains(&aggregator))
    }

    fn readout_serial(
        &self,
        module: ModuleId,
        board: BoardId,
        slot: ReadoutSlot,
    ) -> Option<&str> {
        let entry = self.board(module, board)?;
        match slot {
            ReadoutSlot::Zero => entry.readout0.as_deref(),
            ReadoutSlot::One => entry.readout1.as_deref(),
        }
    }

    fn chips_of_board(&self, module: ModuleId, board: BoardId) -> Vec<ChipId> {
        self.board(module, board)
            .map(|entry| entry.chips.clone())
            .unwrap_or_default()
    }
}
