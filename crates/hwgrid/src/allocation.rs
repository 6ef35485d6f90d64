use std::collections::BTreeSet;

use smallvec::SmallVec;

use crate::error::AllocError;
use crate::ids::{AggregatorId, BoardId, ChipId, ModuleId, TriggerId};
use crate::topology::MAX_READOUTS_PER_MODULE;

/// Everything activated on a single module by one request.
///
/// Sets are ordered so that serialization is deterministic; readout serials
/// keep their activation order and are bounded by the number of physical
/// readout devices a module can drive at once.
#[derive(Debug, Clone)]
pub struct ModuleAllocation {
    pub module: ModuleId,
    pub boards: BTreeSet<BoardId>,
    pub chips: BTreeSet<ChipId>,
    pub readouts: SmallVec<[String; MAX_READOUTS_PER_MODULE]>,
    pub triggers: BTreeSet<TriggerId>,
    pub aggregators: BTreeSet<AggregatorId>,
    pub neighbor_boards: BTreeSet<BoardId>,
    pub neighbor_chips: BTreeSet<ChipId>,
}

impl ModuleAllocation {
    pub fn new(module: ModuleId) -> Self {
        ModuleAllocation {
            module,
            boards: Default::default(),
            chips: Default::default(),
            readouts: Default::default(),
            triggers: Default::default(),
            aggregators: Default::default(),
            neighbor_boards: Default::default(),
            neighbor_chips: Default::default(),
        }
    }

    /// Record a readout serial; repeated activation is a no-op.
    pub fn add_readout(&mut self, serial: &str) -> crate::Result<()> {
        if self.readouts.iter().any(|s| s == serial) {
            return Ok(());
        }
        if self.readouts.len() == MAX_READOUTS_PER_MODULE {
            return Err(AllocError::CapacityExceeded(format!(
                "Module {} cannot drive more than {MAX_READOUTS_PER_MODULE} readouts",
                self.module
            )));
        }
        self.readouts.push(serial.to_string());
        Ok(())
    }

    /// Drop neighbor entries that ended up active through another selector.
    pub fn correct_neighbors(&mut self) {
        self.neighbor_chips = &self.neighbor_chips - &self.chips;
        self.neighbor_boards = &self.neighbor_boards - &self.boards;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readout_activation_is_idempotent_and_capped() {
        let mut alloc = ModuleAllocation::new(ModuleId::new(0));
        for i in 0..MAX_READOUTS_PER_MODULE {
            alloc.add_readout(&format!("B20{i:04}")).unwrap();
        }
        // already recorded serials never count against the cap
        alloc.add_readout("B200003").unwrap();
        assert_eq!(alloc.readouts.len(), MAX_READOUTS_PER_MODULE);

        assert!(matches!(
            alloc.add_readout("B209999"),
            Err(AllocError::CapacityExceeded(_))
        ));
    }

    #[test]
    fn neighbor_correction_removes_active_elements() {
        let mut alloc = ModuleAllocation::new(ModuleId::new(0));
        alloc.chips.insert(ChipId::new(40));
        alloc.boards.insert(BoardId::new(5));
        alloc.neighbor_chips.insert(ChipId::new(40));
        alloc.neighbor_chips.insert(ChipId::new(41));
        alloc.neighbor_boards.insert(BoardId::new(5));
        alloc.correct_neighbors();
        assert!(!alloc.neighbor_chips.contains(&ChipId::new(40)));
        assert!(alloc.neighbor_chips.contains(&ChipId::new(41)));
        assert!(alloc.neighbor_boards.is_empty());
    }
}
