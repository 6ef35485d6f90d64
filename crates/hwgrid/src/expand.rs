//! Expansion of user resource selectors into complete per-module allocations.

use crate::allocation::ModuleAllocation;
use crate::catalog::{Catalog, ReadoutSlot};
use crate::error::AllocError;
use crate::ids::{BoardId, ChipId, ModuleId, ReticleId};
use crate::topology::{
    BOARDS_PER_MODULE, DIRECTIONS, MASTER_BOARD, MAX_MODULES_PER_REQUEST, board_to_trigger,
    chip_neighbor, chip_to_board, reticle_to_board, trigger_to_aggregator,
};

/// Which readout slots of a board to activate.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AoutMode {
    Aout0,
    Aout1,
    Both,
}

impl AoutMode {
    fn slots(&self) -> &'static [ReadoutSlot] {
        match self {
            AoutMode::Aout0 => &[ReadoutSlot::Zero],
            AoutMode::Aout1 => &[ReadoutSlot::One],
            AoutMode::Both => &[ReadoutSlot::Zero, ReadoutSlot::One],
        }
    }
}

/// An explicit resource selector, local to the single requested module.
///
/// `None` readout mode means the selection leaves analog readout
/// unallocated.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Selector {
    Board(BoardId, Option<AoutMode>),
    Chip(ChipId, Option<AoutMode>),
    Reticle(ReticleId, Option<AoutMode>),
    ReticleOfChip(ChipId, Option<AoutMode>),
}

impl Selector {
    fn board(&self) -> BoardId {
        match *self {
            Selector::Board(board, _) => board,
            Selector::Chip(chip, _) => chip_to_board(chip),
            Selector::Reticle(reticle, _) => reticle_to_board(reticle),
            Selector::ReticleOfChip(chip, _) => chip_to_board(chip),
        }
    }

    fn mode(&self) -> Option<AoutMode> {
        match *self {
            Selector::Board(_, mode)
            | Selector::Chip(_, mode)
            | Selector::Reticle(_, mode)
            | Selector::ReticleOfChip(_, mode) => mode,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum NeighborInit {
    #[default]
    Default,
    /// Skip the neighbor pass entirely.
    Skip,
    /// Initialize all neighbors, even ones already in a known state.
    Force,
}

#[derive(Debug, Copy, Clone, Default)]
pub struct AllocFlags {
    pub skip_master_alloc: bool,
    pub without_trigger: bool,
    pub neighbor_init: NeighborInit,
}

#[derive(Debug, Clone)]
pub struct ExpansionRequest {
    pub modules: Vec<ModuleId>,
    pub selectors: Vec<Selector>,
    pub flags: AllocFlags,
}

/// Expand a request into one allocation per requested module.
///
/// With no explicit selectors every requested module is activated whole;
/// explicit selectors apply to exactly one module. All request-level
/// validation happens before any per-module work.
pub fn expand(catalog: &dyn Catalog, request: &ExpansionRequest) -> crate::Result<Vec<ModuleAllocation>> {
    validate(catalog, request)?;

    let mut allocations = Vec::with_capacity(request.modules.len());
    for &module in &request.modules {
        let mut alloc = ModuleAllocation::new(module);
        if request.selectors.is_empty() {
            expand_whole_module(catalog, &mut alloc, &request.flags)?;
        } else {
            for selector in &request.selectors {
                apply_selector(catalog, &mut alloc, selector, &request.flags)?;
            }
        }
        include_master(&mut alloc, catalog, &request.flags);
        if request.flags.neighbor_init != NeighborInit::Skip {
            mark_neighbors(catalog, &mut alloc);
        }
        alloc.correct_neighbors();
        log::debug!(
            "Expanded module {}: {} boards, {} chips, {} readouts, {} neighbor chips",
            module,
            alloc.boards.len(),
            alloc.chips.len(),
            alloc.readouts.len(),
            alloc.neighbor_chips.len()
        );
        allocations.push(alloc);
    }
    Ok(allocations)
}

fn validate(catalog: &dyn Catalog, request: &ExpansionRequest) -> crate::Result<()> {
    if request.modules.is_empty() {
        return Err(AllocError::Validation(
            "No module was requested".to_string(),
        ));
    }
    if request.modules.len() > MAX_MODULES_PER_REQUEST {
        return Err(AllocError::Validation(format!(
            "At most {MAX_MODULES_PER_REQUEST} modules can be requested at once"
        )));
    }
    for (index, module) in request.modules.iter().enumerate() {
        if request.modules[..index].contains(module) {
            return Err(AllocError::Validation(format!(
                "Module {module} was requested twice"
            )));
        }
    }
    if !request.selectors.is_empty() && request.modules.len() != 1 {
        return Err(AllocError::Validation(
            "Explicit selectors require exactly one module".to_string(),
        ));
    }
    for &module in &request.modules {
        if !catalog.has_module(module) {
            return Err(AllocError::NotFound(format!(
                "Module {module} is not in the catalog"
            )));
        }
    }
    Ok(())
}

fn expand_whole_module(
    catalog: &dyn Catalog,
    alloc: &mut ModuleAllocation,
    flags: &AllocFlags,
) -> crate::Result<()> {
    for id in 0..BOARDS_PER_MODULE {
        let board = BoardId::new(id);
        if !catalog.has_board(alloc.module, board) {
            continue;
        }
        activate_board(catalog, alloc, board, flags);
        // The whole-module path is the only place where the readout mode is
        // inferred instead of user-given.
        let slot0 = catalog
            .readout_serial(alloc.module, board, ReadoutSlot::Zero)
            .is_some();
        let slot1 = catalog
            .readout_serial(alloc.module, board, ReadoutSlot::One)
            .is_some();
        let mode = match (slot0, slot1) {
            (true, true) => Some(AoutMode::Both),
            (true, false) => Some(AoutMode::Aout0),
            (false, true) => Some(AoutMode::Aout1),
            (false, false) => None,
        };
        if let Some(mode) = mode {
            activate_readouts(catalog, alloc, board, mode)?;
        }
    }
    Ok(())
}

fn apply_selector(
    catalog: &dyn Catalog,
    alloc: &mut ModuleAllocation,
    selector: &Selector,
    flags: &AllocFlags,
) -> crate::Result<()> {
    let board = selector.board();
    if !catalog.has_board(alloc.module, board) {
        return Err(AllocError::NotFound(format!(
            "Board {board} of module {} is not in the catalog",
            alloc.module
        )));
    }
    activate_board(catalog, alloc, board, flags);
    if let Some(mode) = selector.mode() {
        activate_readouts(catalog, alloc, board, mode)?;
    }
    Ok(())
}

/// Activate a board together with all its constituent chips.
fn activate_board(
    catalog: &dyn Catalog,
    alloc: &mut ModuleAllocation,
    board: BoardId,
    flags: &AllocFlags,
) {
    alloc.boards.insert(board);
    alloc.chips.extend(catalog.chips_of_board(alloc.module, board));
    propagate_aggregator(catalog, alloc, board, flags);
}

fn propagate_aggregator(
    catalog: &dyn Catalog,
    alloc: &mut ModuleAllocation,
    board: BoardId,
    flags: &AllocFlags,
) {
    if flags.without_trigger {
        return;
    }
    let aggregator = trigger_to_aggregator(board_to_trigger(board));
    if catalog.has_aggregator(alloc.module, aggregator) {
        alloc.aggregators.insert(aggregator);
    }
}

fn activate_readouts(
    catalog: &dyn Catalog,
    alloc: &mut ModuleAllocation,
    board: BoardId,
    mode: AoutMode,
) -> crate::Result<()> {
    for &slot in mode.slots() {
        let serial = catalog
            .readout_serial(alloc.module, board, slot)
            .ok_or_else(|| {
                AllocError::NotFound(format!(
                    "Board {board} of module {} has no readout in slot {}",
                    alloc.module,
                    match slot {
                        ReadoutSlot::Zero => 0,
                        ReadoutSlot::One => 1,
                    }
                ))
            })?
            .to_string();
        // Trigger marking precedes the de-dup below and is unconditional.
        alloc.triggers.insert(board_to_trigger(board));
        alloc.add_readout(&serial)?;
    }
    Ok(())
}

/// Master board auto-inclusion. Applies even when the catalog has no entry
/// for the master board; it carries no chips or readouts of its own.
fn include_master(alloc: &mut ModuleAllocation, catalog: &dyn Catalog, flags: &AllocFlags) {
    if flags.skip_master_alloc || alloc.boards.len() <= 1 {
        return;
    }
    let master = BoardId::new(MASTER_BOARD);
    if alloc.boards.insert(master) {
        propagate_aggregator(catalog, alloc, master, flags);
    }
}

fn mark_neighbors(catalog: &dyn Catalog, alloc: &mut ModuleAllocation) {
    for &chip in &alloc.chips {
        for direction in DIRECTIONS {
            let Some(neighbor) = chip_neighbor(chip, direction) else {
                continue;
            };
            let board = chip_to_board(neighbor);
            if !catalog.has_chip(alloc.module, neighbor)
                || !catalog.has_board(alloc.module, board)
            {
                continue;
            }
            if !alloc.chips.contains(&neighbor) {
                alloc.neighbor_chips.insert(neighbor);
            }
            if !alloc.boards.contains(&board) {
                alloc.neighbor_boards.insert(board);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TomlCatalog;
    use crate::ids::{AggregatorId, TriggerId};
    use crate::topology::MAX_READOUTS_PER_MODULE;

    fn module(id: u32) -> ModuleId {
        ModuleId::new(id)
    }

    fn catalog_two_boards() -> TomlCatalog {
        // board 0 has only slot 0 populated, board 5 has both
        TomlCatalog::from_str(
            r#"
[[module]]
id = 20
aggregators = [0]

[[module.board]]
id = 0
readout0 = "B200001"

[[module.board]]
id = 5
readout0 = "B200002"
readout1 = "B200003"
"#,
        )
        .unwrap()
    }

    fn request(modules: Vec<u32>, selectors: Vec<Selector>) -> ExpansionRequest {
        ExpansionRequest {
            modules: modules.into_iter().map(ModuleId::new).collect(),
            selectors,
            flags: AllocFlags::default(),
        }
    }

    #[test]
    fn whole_module_infers_readout_modes_and_master() {
        let catalog = catalog_two_boards();
        let allocs = expand(&catalog, &request(vec![20], vec![])).unwrap();
        assert_eq!(allocs.len(), 1);
        let alloc = &allocs[0];
        let boards: Vec<u32> = alloc.boards.iter().map(|b| b.get()).collect();
        assert_eq!(boards, vec![0, 5, MASTER_BOARD]);
        assert_eq!(
            alloc.readouts.as_slice(),
            ["B200001", "B200002", "B200003"]
        );
        assert!(alloc.aggregators.contains(&AggregatorId::new(0)));
    }

    #[test]
    fn master_inclusion_can_be_suppressed() {
        let catalog = catalog_two_boards();
        let mut req = request(vec![20], vec![]);
        req.flags.skip_master_alloc = true;
        let allocs = expand(&catalog, &req).unwrap();
        assert!(!allocs[0].boards.contains(&BoardId::new(MASTER_BOARD)));
    }

    #[test]
    fn single_board_does_not_pull_in_master() {
        let catalog = TomlCatalog::from_str(
            r#"
[[module]]
id = 20
[[module.board]]
id = 5
readout0 = "B200002"
"#,
        )
        .unwrap();
        let allocs = expand(&catalog, &request(vec![20], vec![])).unwrap();
        assert_eq!(allocs[0].boards.len(), 1);
    }

    #[test]
    fn chip_selector_activates_owning_board_and_siblings() {
        let catalog = catalog_two_boards();
        let allocs = expand(
            &catalog,
            &request(
                vec![20],
                vec![Selector::Chip(ChipId::new(40), Some(AoutMode::Aout0))],
            ),
        )
        .unwrap();
        let alloc = &allocs[0];
        assert!(alloc.boards.contains(&BoardId::new(5)));
        for chip in 40..48 {
            assert!(alloc.chips.contains(&ChipId::new(chip)));
        }
        assert_eq!(alloc.readouts.as_slice(), ["B200002"]);
        assert!(alloc.triggers.contains(&TriggerId::new(1)));
    }

    #[test]
    fn selector_forms_are_idempotent() {
        let catalog = catalog_two_boards();
        let once = expand(
            &catalog,
            &request(
                vec![20],
                vec![Selector::Chip(ChipId::new(40), Some(AoutMode::Both))],
            ),
        )
        .unwrap();
        let twice = expand(
            &catalog,
            &request(
                vec![20],
                vec![
                    Selector::Chip(ChipId::new(40), Some(AoutMode::Both)),
                    Selector::ReticleOfChip(ChipId::new(41), Some(AoutMode::Both)),
                    Selector::Board(BoardId::new(5), None),
                ],
            ),
        )
        .unwrap();
        assert_eq!(once[0].boards, twice[0].boards);
        assert_eq!(once[0].chips, twice[0].chips);
        assert_eq!(once[0].readouts, twice[0].readouts);
        assert_eq!(once[0].triggers, twice[0].triggers);
    }

    #[test]
    fn missing_board_is_reported() {
        let catalog = catalog_two_boards();
        let result = expand(
            &catalog,
            &request(vec![20], vec![Selector::Board(BoardId::new(7), None)]),
        );
        assert!(matches!(result, Err(AllocError::NotFound(_))));
    }

    #[test]
    fn missing_readout_slot_is_reported() {
        let catalog = catalog_two_boards();
        let result = expand(
            &catalog,
            &request(
                vec![20],
                vec![Selector::Board(BoardId::new(0), Some(AoutMode::Aout1))],
            ),
        );
        assert!(matches!(result, Err(AllocError::NotFound(_))));
    }

    #[test]
    fn explicit_selectors_require_exactly_one_module() {
        let catalog = catalog_two_boards();
        let result = expand(
            &catalog,
            &request(
                vec![20, 21],
                vec![Selector::Chip(ChipId::new(40), None)],
            ),
        );
        assert!(matches!(result, Err(AllocError::Validation(_))));
    }

    #[test]
    fn duplicate_modules_are_rejected() {
        let catalog = catalog_two_boards();
        let result = expand(&catalog, &request(vec![20, 20], vec![]));
        assert!(matches!(result, Err(AllocError::Validation(_))));
    }

    #[test]
    fn unknown_module_is_reported() {
        let catalog = catalog_two_boards();
        let result = expand(&catalog, &request(vec![3], vec![]));
        assert!(matches!(result, Err(AllocError::NotFound(_))));
    }

    #[test]
    fn neighbors_exclude_active_chips() {
        // chips 40..48 active; west neighbor of chip 40 is chip 39 on board 4
        let catalog = TomlCatalog::from_str(
            r#"
[[module]]
id = 20
[[module.board]]
id = 4
[[module.board]]
id = 5
"#,
        )
        .unwrap();
        let allocs = expand(
            &catalog,
            &request(vec![20], vec![Selector::Board(BoardId::new(5), None)]),
        )
        .unwrap();
        let alloc = &allocs[0];
        assert!(alloc.neighbor_chips.contains(&ChipId::new(39)));
        assert!(alloc.neighbor_boards.contains(&BoardId::new(4)));
        assert!(alloc.neighbor_chips.is_disjoint(&alloc.chips));
        assert!(alloc.neighbor_boards.is_disjoint(&alloc.boards));
    }

    #[test]
    fn neighbor_becoming_active_is_corrected_away() {
        let catalog = TomlCatalog::from_str(
            r#"
[[module]]
id = 20
[[module.board]]
id = 4
[[module.board]]
id = 5
"#,
        )
        .unwrap();
        let allocs = expand(
            &catalog,
            &request(
                vec![20],
                vec![
                    Selector::Board(BoardId::new(5), None),
                    Selector::Board(BoardId::new(4), None),
                ],
            ),
        )
        .unwrap();
        let alloc = &allocs[0];
        assert!(alloc.neighbor_chips.is_empty());
        assert!(alloc.neighbor_boards.is_empty());
    }

    #[test]
    fn neighbor_pass_can_be_skipped() {
        let catalog = TomlCatalog::from_str(
            r#"
[[module]]
id = 20
[[module.board]]
id = 4
[[module.board]]
id = 5
"#,
        )
        .unwrap();
        let mut req = request(vec![20], vec![Selector::Board(BoardId::new(5), None)]);
        req.flags.neighbor_init = NeighborInit::Skip;
        let allocs = expand(&catalog, &req).unwrap();
        assert!(allocs[0].neighbor_chips.is_empty());
    }

    #[test]
    fn readout_capacity_is_enforced() {
        // 13 boards with one readout each exceeds the per-module cap
        let mut catalog = String::from("[[module]]\nid = 20\n");
        for board in 0..=MAX_READOUTS_PER_MODULE {
            catalog.push_str(&format!(
                "[[module.board]]\nid = {board}\nreadout0 = \"B2000{board:02}\"\n"
            ));
        }
        let catalog = TomlCatalog::from_str(&catalog).unwrap();
        let result = expand(&catalog, &request(vec![20], vec![]));
        assert!(matches!(result, Err(AllocError::CapacityExceeded(_))));
    }

    #[test]
    fn without_trigger_suppresses_aggregators() {
        let catalog = catalog_two_boards();
        let mut req = request(vec![20], vec![]);
        req.flags.without_trigger = true;
        let allocs = expand(&catalog, &req).unwrap();
        assert!(allocs[0].aggregators.is_empty());
        // trigger marking on readout activation stays unconditional
        assert!(!allocs[0].triggers.is_empty());
    }
}
