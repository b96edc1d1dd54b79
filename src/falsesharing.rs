//! False-sharing detector (spec section 3/4.6). No direct teacher
//! counterpart; built in the crate's idiom of a small bounded ledger per
//! line address, mirroring `cache::level`'s eviction-history bookkeeping.

use std::collections::HashMap;

/// One (thread, offset, kind) access folded into a line's ledger, with a
/// repeat count so the bounded cap tracks distinct access shapes rather
/// than raw event count.
#[derive(Debug, Clone, Copy)]
pub struct LedgerAccess {
    pub thread_id: u32,
    pub offset: u32,
    pub is_write: bool,
    pub file: crate::trace::FileId,
    pub line_no: u32,
    pub count: u64,
}

/// Bound on distinct (thread, offset, kind, site) entries kept per line;
/// oldest-inserted entries are dropped once the cap is hit.
const LEDGER_CAP: usize = 64;

struct LineLedger {
    entries: Vec<LedgerAccess>,
    flagged: bool,
}

impl LineLedger {
    fn new() -> Self {
        LineLedger {
            entries: Vec::new(),
            flagged: false,
        }
    }

    fn record(
        &mut self,
        thread_id: u32,
        offset: u32,
        is_write: bool,
        file: crate::trace::FileId,
        line_no: u32,
    ) {
        if let Some(e) = self.entries.iter_mut().find(|e| {
            e.thread_id == thread_id && e.offset == offset && e.is_write == is_write
        }) {
            e.count += 1;
            return;
        }
        if self.entries.len() == LEDGER_CAP {
            self.entries.remove(0);
        }
        self.entries.push(LedgerAccess {
            thread_id,
            offset,
            is_write,
            file,
            line_no,
            count: 1,
        });
    }

    /// satisfies the false-sharing predicate: >=2 distinct threads, >=2
    /// distinct byte offsets, >=1 writer among recorded entries.
    fn satisfies_predicate(&self) -> bool {
        let mut threads: Vec<u32> = self.entries.iter().map(|e| e.thread_id).collect();
        threads.sort_unstable();
        threads.dedup();
        let mut offsets: Vec<u32> = self.entries.iter().map(|e| e.offset).collect();
        offsets.sort_unstable();
        offsets.dedup();
        let has_writer = self.entries.iter().any(|e| e.is_write);
        threads.len() >= 2 && offsets.len() >= 2 && has_writer
    }
}

pub struct FalseSharingDetector {
    ledgers: HashMap<u64, LineLedger>,
    flagged_lines: Vec<u64>,
}

#[derive(Debug, Clone)]
pub struct FalseSharingLine {
    pub line_addr: u64,
    pub accesses: Vec<LedgerAccess>,
}

impl FalseSharingDetector {
    pub fn new() -> Self {
        FalseSharingDetector {
            ledgers: HashMap::new(),
            flagged_lines: Vec::new(),
        }
    }

    /// Records a demand access against `line_addr`. `offset` is the
    /// byte offset of the access within the line. Returns true the moment
    /// this line first satisfies the false-sharing predicate (used by the
    /// engine to bump `false_sharing_count` exactly once per line).
    pub fn record_access(
        &mut self,
        line_addr: u64,
        thread_id: u32,
        offset: u32,
        is_write: bool,
        file: crate::trace::FileId,
        line_no: u32,
    ) -> bool {
        let ledger = self
            .ledgers
            .entry(line_addr)
            .or_insert_with(LineLedger::new);
        ledger.record(thread_id, offset, is_write, file, line_no);
        if !ledger.flagged && ledger.satisfies_predicate() {
            ledger.flagged = true;
            self.flagged_lines.push(line_addr);
            return true;
        }
        false
    }

    pub fn false_sharing_count(&self) -> u64 {
        self.flagged_lines.len() as u64
    }

    /// All lines that ever satisfied the predicate, with their (capped)
    /// ledgers, in the order they were first flagged.
    pub fn false_sharing_lines(&self) -> Vec<FalseSharingLine> {
        self.flagged_lines
            .iter()
            .map(|&addr| FalseSharingLine {
                line_addr: addr,
                accesses: self.ledgers[&addr].entries.clone(),
            })
            .collect()
    }
}

impl Default for FalseSharingDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::FileId;

    #[test]
    fn single_thread_access_never_flags() {
        let mut d = FalseSharingDetector::new();
        for _ in 0..20 {
            d.record_access(0x4000, 0, 0, true, FileId(0), 1);
        }
        assert_eq!(d.false_sharing_count(), 0);
    }

    #[test]
    fn two_threads_two_offsets_with_a_writer_flags_once() {
        let mut d = FalseSharingDetector::new();
        let mut flagged_count = 0;
        for i in 0..10u32 {
            let thread = i % 2;
            let offset = thread * 4;
            if d.record_access(0x2000, thread, offset, true, FileId(0), 10) {
                flagged_count += 1;
            }
        }
        assert_eq!(flagged_count, 1);
        assert_eq!(d.false_sharing_count(), 1);
        let lines = d.false_sharing_lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].line_addr, 0x2000);
        let threads: std::collections::HashSet<u32> =
            lines[0].accesses.iter().map(|a| a.thread_id).collect();
        assert_eq!(threads.len(), 2);
    }

    #[test]
    fn reads_only_never_flag_without_a_writer() {
        let mut d = FalseSharingDetector::new();
        for i in 0..10u32 {
            d.record_access(0x5000, i % 3, (i % 3) * 4, false, FileId(0), 1);
        }
        assert_eq!(d.false_sharing_count(), 0);
    }

    #[test]
    fn single_offset_from_two_threads_does_not_flag() {
        let mut d = FalseSharingDetector::new();
        d.record_access(0x6000, 0, 0, true, FileId(0), 1);
        d.record_access(0x6000, 1, 0, true, FileId(0), 1);
        assert_eq!(d.false_sharing_count(), 0);
    }

    #[test]
    fn ledger_is_bounded() {
        let mut d = FalseSharingDetector::new();
        for i in 0..1000u32 {
            d.record_access(0x7000, i, i * 4, true, FileId(0), 1);
        }
        let ledger = &d.ledgers[&0x7000];
        assert!(ledger.entries.len() <= LEDGER_CAP);
    }
}
