//! Rendering of allocations into the scheduler's license-string grammar and
//! the environment payloads consumed by the job prolog.

use itertools::Itertools;

use crate::allocation::ModuleAllocation;

/// Serialized form of a set of module allocations.
///
/// Neighbor licenses are kept out of the primary string; merging happens in
/// [`LicensePayload::merged_licenses`] so that transient neighbor
/// reservations can still be released after the prolog.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct LicensePayload {
    pub licenses: String,
    pub neighbor_licenses: String,
    pub chips: String,
    pub neighbor_chips: String,
    pub readouts: String,
}

impl LicensePayload {
    /// Primary licenses plus any neighbor license not already present.
    pub fn merged_licenses(&self) -> String {
        let mut merged = self.licenses.clone();
        let present: Vec<&str> = self.licenses.split(',').collect();
        for token in self.neighbor_licenses.split(',').filter(|t| !t.is_empty()) {
            if present.contains(&token) {
                continue;
            }
            if !merged.is_empty() {
                merged.push(',');
            }
            merged.push_str(token);
        }
        merged
    }
}

/// Render allocations deterministically (ascending ids, comma-joined, no
/// trailing separator). `without_trigger` drops trigger and aggregator
/// tokens from the primary license string.
pub fn render(allocations: &[ModuleAllocation], without_trigger: bool) -> LicensePayload {
    let mut licenses: Vec<String> = Vec::new();
    let mut neighbor_licenses: Vec<String> = Vec::new();
    let mut chips: Vec<String> = Vec::new();
    let mut neighbor_chips: Vec<String> = Vec::new();
    let mut readouts: Vec<String> = Vec::new();

    for alloc in allocations {
        let module = alloc.module;
        licenses.extend(alloc.boards.iter().map(|b| format!("W{module}B{b}")));
        licenses.extend(alloc.readouts.iter().cloned());
        if !without_trigger {
            licenses.extend(alloc.triggers.iter().map(|t| format!("W{module}T{t}")));
            licenses.extend(alloc.aggregators.iter().map(|a| format!("W{module}A{a}")));
        }
        neighbor_licenses.extend(
            alloc
                .neighbor_boards
                .iter()
                .map(|b| format!("W{module}B{b}")),
        );
        chips.extend(alloc.chips.iter().map(|c| format!("W{module}C{c}")));
        neighbor_chips.extend(
            alloc
                .neighbor_chips
                .iter()
                .map(|c| format!("W{module}C{c}")),
        );
        readouts.extend(alloc.readouts.iter().cloned());
    }

    LicensePayload {
        licenses: licenses.iter().join(","),
        neighbor_licenses: neighbor_licenses.iter().join(","),
        chips: chips.iter().join(","),
        neighbor_chips: neighbor_chips.iter().join(","),
        readouts: readouts.iter().join(","),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{AggregatorId, BoardId, ChipId, ModuleId, TriggerId};
    use std::collections::BTreeSet;

    fn sample_allocation() -> ModuleAllocation {
        let mut alloc = ModuleAllocation::new(ModuleId::new(20));
        alloc.boards = [5, 0, 12].map(BoardId::new).into_iter().collect();
        alloc.chips = [41, 40].map(ChipId::new).into_iter().collect();
        alloc.add_readout("B200002").unwrap();
        alloc.triggers.insert(TriggerId::new(1));
        alloc.aggregators.insert(AggregatorId::new(0));
        alloc.neighbor_boards.insert(BoardId::new(4));
        alloc.neighbor_chips.insert(ChipId::new(39));
        alloc
    }

    #[test]
    fn rendering_is_ordered_and_separated() {
        let payload = render(&[sample_allocation()], false);
        assert_eq!(payload.licenses, "W20B0,W20B5,W20B12,B200002,W20T1,W20A0");
        assert_eq!(payload.neighbor_licenses, "W20B4");
        assert_eq!(payload.chips, "W20C40,W20C41");
        assert_eq!(payload.neighbor_chips, "W20C39");
        assert_eq!(payload.readouts, "B200002");
    }

    #[test]
    fn without_trigger_drops_trigger_and_aggregator_tokens() {
        let payload = render(&[sample_allocation()], true);
        assert_eq!(payload.licenses, "W20B0,W20B5,W20B12,B200002");
    }

    #[test]
    fn merged_licenses_appends_only_missing_tokens() {
        let mut payload = render(&[sample_allocation()], false);
        assert_eq!(
            payload.merged_licenses(),
            "W20B0,W20B5,W20B12,B200002,W20T1,W20A0,W20B4"
        );
        // neighbor token already reserved through the primary string
        payload.neighbor_licenses = "W20B5".to_string();
        assert_eq!(payload.merged_licenses(), payload.licenses);
    }

    #[test]
    fn license_tokens_round_trip() {
        let alloc = sample_allocation();
        let payload = render(&[alloc.clone()], false);
        let tokens: BTreeSet<&str> = payload.licenses.split(',').collect();
        let mut expected: BTreeSet<String> = BTreeSet::new();
        expected.extend(alloc.boards.iter().map(|b| format!("W20B{b}")));
        expected.extend(alloc.readouts.iter().cloned());
        expected.extend(alloc.triggers.iter().map(|t| format!("W20T{t}")));
        expected.extend(alloc.aggregators.iter().map(|a| format!("W20A{a}")));
        let expected: BTreeSet<&str> = expected.iter().map(|s| s.as_str()).collect();
        assert_eq!(tokens, expected);
        assert_eq!(
            payload.licenses.split(',').count(),
            tokens.len(),
            "no duplicate tokens"
        );
    }

    #[test]
    fn empty_allocation_renders_empty_strings() {
        let alloc = ModuleAllocation::new(ModuleId::new(20));
        let payload = render(&[alloc], false);
        assert_eq!(payload, LicensePayload::default());
        assert_eq!(payload.merged_licenses(), "");
    }
}
