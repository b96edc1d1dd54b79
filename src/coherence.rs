//! MESI coherence directory (spec section 3/4.5). No direct counterpart in
//! the teacher crate; grounded on its ownership discipline of referring to
//! peers by index rather than by reference (spec section 9, "Back-
//! invalidation and cycles" / "Per-core L1 ownership": the directory holds
//! core indices, never `&mut CacheLevel`, so the engine is the only thing
//! that ever mutates a per-core L1).

use crate::cache::CoherenceState;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
struct DirectoryEntry {
    /// (core_id, state) pairs for cores currently holding a copy.
    holders: Vec<(usize, CoherenceState)>,
}

/// Result of a directory-mediated snoop. `downgraded_cores`/
/// `invalidated_cores` name the *other* per-core L1s the engine must now
/// mutate (downgrade to Shared, or invalidate outright) to keep the
/// directory and the per-core caches consistent.
#[derive(Debug, Clone)]
pub struct SnoopResult {
    pub found: bool,
    pub was_modified: bool,
    pub data_source_core: Option<usize>,
    pub downgraded_cores: Vec<usize>,
    pub invalidated_cores: Vec<usize>,
    /// State the requestor's own line should take once installed.
    pub new_state: CoherenceState,
}

#[derive(Default, Clone, Debug)]
pub struct CoherenceStats {
    pub invalidations: u64,
}

pub struct CoherenceDirectory {
    entries: HashMap<u64, DirectoryEntry>,
    stats: CoherenceStats,
}

impl CoherenceDirectory {
    pub fn new() -> Self {
        CoherenceDirectory {
            entries: HashMap::new(),
            stats: CoherenceStats::default(),
        }
    }

    pub fn stats(&self) -> &CoherenceStats {
        &self.stats
    }

    pub fn request_read(&mut self, requestor: usize, line_addr: u64) -> SnoopResult {
        let entry = self.entries.entry(line_addr).or_default();
        let found = !entry.holders.is_empty();

        let mut was_modified = false;
        let mut data_source_core = None;
        let mut downgraded_cores = Vec::new();

        for (core, state) in entry.holders.iter_mut() {
            if *core == requestor {
                continue;
            }
            match state {
                CoherenceState::Modified => {
                    was_modified = true;
                    data_source_core = Some(*core);
                    *state = CoherenceState::Shared;
                    downgraded_cores.push(*core);
                }
                CoherenceState::Exclusive => {
                    *state = CoherenceState::Shared;
                    downgraded_cores.push(*core);
                }
                CoherenceState::Shared | CoherenceState::Invalid => {}
            }
        }

        let others_present = entry.holders.iter().any(|&(c, _)| c != requestor);
        let new_state = if others_present {
            CoherenceState::Shared
        } else {
            CoherenceState::Exclusive
        };
        upsert_holder(entry, requestor, new_state);

        SnoopResult {
            found,
            was_modified,
            data_source_core,
            downgraded_cores,
            invalidated_cores: Vec::new(),
            new_state,
        }
    }

    /// Non-mutating check of whether any core other than `requestor`
    /// currently holds a copy of `line_addr`. Used by the prefetcher's
    /// speculative installs, which consult the directory for the state a
    /// candidate line should take without performing a real snoop.
    pub fn has_other_holder(&self, requestor: usize, line_addr: u64) -> bool {
        self.entries
            .get(&line_addr)
            .is_some_and(|e| e.holders.iter().any(|&(c, _)| c != requestor))
    }

    pub fn request_exclusive(&mut self, requestor: usize, line_addr: u64) -> SnoopResult {
        let entry = self.entries.entry(line_addr).or_default();
        let found = !entry.holders.is_empty();

        let was_modified = entry
            .holders
            .iter()
            .any(|&(c, s)| c != requestor && s == CoherenceState::Modified);
        let data_source_core = entry
            .holders
            .iter()
            .find(|&&(c, s)| c != requestor && s == CoherenceState::Modified)
            .map(|&(c, _)| c);

        let invalidated_cores: Vec<usize> = entry
            .holders
            .iter()
            .filter(|&&(c, _)| c != requestor)
            .map(|&(c, _)| c)
            .collect();
        self.stats.invalidations += invalidated_cores.len() as u64;

        entry.holders.retain(|&(c, _)| c == requestor);
        upsert_holder(entry, requestor, CoherenceState::Modified);

        SnoopResult {
            found,
            was_modified,
            data_source_core,
            downgraded_cores: Vec::new(),
            invalidated_cores,
            new_state: CoherenceState::Modified,
        }
    }

    /// Removes `core`'s own holder record for `line_addr` (used when that
    /// core's L1 evicts the line by replacement, independent of any peer).
    /// Other cores' holder records are untouched; the entry itself is only
    /// dropped once no core holds a copy anymore.
    pub fn forget_holder(&mut self, core: usize, line_addr: u64) {
        if let Some(entry) = self.entries.get_mut(&line_addr) {
            entry.holders.retain(|&(c, _)| c != core);
            if entry.holders.is_empty() {
                self.entries.remove(&line_addr);
            }
        }
    }
}

impl Default for CoherenceDirectory {
    fn default() -> Self {
        Self::new()
    }
}

fn upsert_holder(entry: &mut DirectoryEntry, core: usize, state: CoherenceState) {
    if let Some(pos) = entry.holders.iter().position(|&(c, _)| c == core) {
        entry.holders[pos] = (core, state);
    } else {
        entry.holders.push((core, state));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_reader_gets_exclusive() {
        let mut d = CoherenceDirectory::new();
        let r = d.request_read(0, 0x1000);
        assert!(!r.found);
        assert!(!r.was_modified);
        assert!(r.downgraded_cores.is_empty());
    }

    #[test]
    fn second_reader_downgrades_both_to_shared() {
        let mut d = CoherenceDirectory::new();
        d.request_read(0, 0x1000); // core 0 now Exclusive
        let r = d.request_read(1, 0x1000);
        assert_eq!(r.downgraded_cores, vec![0]);
        assert!(!r.was_modified);
    }

    #[test]
    fn reading_a_modified_line_flushes_and_downgrades() {
        let mut d = CoherenceDirectory::new();
        d.request_exclusive(0, 0x1000); // core 0 Modified
        let r = d.request_read(1, 0x1000);
        assert!(r.was_modified);
        assert_eq!(r.data_source_core, Some(0));
        assert_eq!(r.downgraded_cores, vec![0]);
    }

    #[test]
    fn exclusive_request_invalidates_all_other_copies() {
        let mut d = CoherenceDirectory::new();
        d.request_read(0, 0x1000);
        d.request_read(1, 0x1000);
        let r = d.request_exclusive(2, 0x1000);
        assert_eq!(r.invalidated_cores.len(), 2);
        assert_eq!(d.stats().invalidations, 2);
    }

    #[test]
    fn forgetting_one_holder_leaves_the_others_intact() {
        let mut d = CoherenceDirectory::new();
        d.request_read(0, 0x1000); // core 0 Exclusive
        d.request_read(1, 0x1000); // both Shared
        d.forget_holder(0, 0x1000); // core 0's L1 evicts its copy
        assert!(d.has_other_holder(2, 0x1000), "core 1 should still be on record");
        let r = d.request_exclusive(2, 0x1000);
        assert_eq!(r.invalidated_cores, vec![1]);
    }

    #[test]
    fn forgetting_the_last_holder_drops_the_entry() {
        let mut d = CoherenceDirectory::new();
        d.request_read(0, 0x1000);
        d.forget_holder(0, 0x1000);
        assert!(!d.has_other_holder(1, 0x1000));
        let r = d.request_read(1, 0x1000);
        assert!(!r.found, "no holders should remain after the only one forgot its copy");
    }

    #[test]
    fn alternating_writes_between_two_cores_invalidate_every_time() {
        let mut d = CoherenceDirectory::new();
        for i in 0..1000 {
            let (writer, other) = if i % 2 == 0 { (0, 1) } else { (1, 0) };
            let r = d.request_exclusive(writer, 0x2000);
            if i > 0 {
                assert_eq!(r.invalidated_cores, vec![other]);
            }
        }
        assert!(d.stats().invalidations >= 998);
    }
}
