//! Per-core hardware prefetcher (spec section 4.3). No direct counterpart
//! in the teacher crate (it has no prefetcher); built in its idiom: one
//! small struct per policy, stats counters alongside, unit tests at the
//! bottom.

use smallvec::SmallVec;
use std::collections::HashMap;

pub type Candidates = SmallVec<[u64; 8]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchPolicyKind {
    None,
    NextLine,
    Stream,
    Stride,
    Adaptive,
    Intel,
}

#[derive(Debug, Clone, Copy)]
struct StreamEntry {
    last_line: u64,
    direction: i64, // +1, -1, or 0 (unconfirmed)
    confidence: u32,
}

#[derive(Debug, Clone, Copy)]
struct StrideEntry {
    last_addr: u64,
    stride: i64,
    confidence: u32,
}

const STREAM_TABLE_SIZE: usize = 8;

#[derive(Default, Clone, Debug)]
pub struct PrefetchStats {
    pub issued: u64,
    pub useful: u64,
}

impl PrefetchStats {
    pub fn accuracy(&self) -> f64 {
        if self.issued == 0 {
            0.0
        } else {
            self.useful as f64 / self.issued as f64
        }
    }
}

pub struct Prefetcher {
    kind: PrefetchPolicyKind,
    degree: usize,
    line_size: u64,
    stream_table: Vec<StreamEntry>,
    stream_lru: Vec<usize>, // MRU-first indices into stream_table
    stride_table: HashMap<u64, StrideEntry>,
    recently_prefetched: std::collections::HashSet<u64>,
    stats: PrefetchStats,
}

impl Prefetcher {
    pub fn new(kind: PrefetchPolicyKind, degree: usize, line_size: usize) -> Self {
        Prefetcher {
            kind,
            degree: degree.max(1),
            line_size: line_size as u64,
            stream_table: Vec::new(),
            stream_lru: Vec::new(),
            stride_table: HashMap::new(),
            recently_prefetched: std::collections::HashSet::new(),
            stats: PrefetchStats::default(),
        }
    }

    pub fn policy(&self) -> PrefetchPolicyKind {
        self.kind
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn stats(&self) -> &PrefetchStats {
        &self.stats
    }

    /// Called on every L1 miss. Returns up to `degree` candidate line
    /// addresses; the caller decides which are actually installed.
    pub fn on_miss(&mut self, line_addr: u64, pc: Option<u64>) -> Candidates {
        match self.kind {
            PrefetchPolicyKind::None => Candidates::new(),
            PrefetchPolicyKind::NextLine => self.next_line(line_addr),
            PrefetchPolicyKind::Stream => self.stream(line_addr),
            PrefetchPolicyKind::Stride => self.stride(line_addr, pc),
            PrefetchPolicyKind::Adaptive => {
                let mut out = self.stream(line_addr);
                for c in self.stride(line_addr, pc) {
                    if !out.contains(&c) {
                        out.push(c);
                    }
                }
                out
            }
            PrefetchPolicyKind::Intel => {
                let mut out = self.next_line(line_addr);
                for c in self.stride(line_addr, pc) {
                    if !out.contains(&c) {
                        out.push(c);
                    }
                }
                out
            }
        }
    }

    /// Marks `addr` as actually issued (installed by the caller), so future
    /// demand hits on it can be attributed as useful.
    pub fn record_issued(&mut self, addr: u64) {
        self.stats.issued += 1;
        self.recently_prefetched.insert(addr);
    }

    /// Called on every demand access (hit or miss) so usefulness can be
    /// attributed once, the first time a prefetched line is actually used.
    pub fn record_demand_access(&mut self, addr: u64, was_hit: bool) {
        if was_hit && self.recently_prefetched.remove(&addr) {
            self.stats.useful += 1;
        }
    }

    fn next_line(&self, line_addr: u64) -> Candidates {
        let mut out = Candidates::new();
        for i in 1..=self.degree {
            out.push(line_addr + i as u64 * self.line_size);
        }
        out
    }

    /// A stream entry keeps matching forward (or backward) misses even when
    /// the gap between them is more than one line: once demand hits start
    /// landing on already-prefetched lines, successive misses arrive
    /// `degree+1` lines apart rather than one, so exact `+line_size`
    /// adjacency would lose the stream on its very first confirmed hit.
    fn stream(&mut self, line_addr: u64) -> Candidates {
        let mut out = Candidates::new();
        if let Some(pos) = self
            .stream_table
            .iter()
            .position(|e| (e.direction == 0 || e.direction == 1) && line_addr > e.last_line)
        {
            let e = &mut self.stream_table[pos];
            e.direction = 1;
            e.last_line = line_addr;
            e.confidence = (e.confidence + 1).min(8);
            let window = Self::window_for(self.degree, e.confidence);
            for i in 1..=window {
                out.push(line_addr + i as u64 * self.line_size);
            }
            self.touch_stream(pos);
            return out;
        }
        if let Some(pos) = self
            .stream_table
            .iter()
            .position(|e| (e.direction == 0 || e.direction == -1) && line_addr < e.last_line)
        {
            let e = &mut self.stream_table[pos];
            e.direction = -1;
            e.last_line = line_addr;
            e.confidence = (e.confidence + 1).min(8);
            let window = Self::window_for(self.degree, e.confidence);
            for i in 1..=window {
                out.push(line_addr.wrapping_sub(i as u64 * self.line_size));
            }
            self.touch_stream(pos);
            return out;
        }
        self.allocate_stream(line_addr);
        out
    }

    /// The prefetch distance grows with confidence so a confirmed stream
    /// stays ahead of the demand stream instead of re-missing every
    /// `degree+1`th access: each confirmation doubles the window (capped at
    /// 6 doublings), so the miss/hit ratio converges toward zero instead of
    /// settling at the fixed `degree / (degree + 1)`.
    fn window_for(degree: usize, confidence: u32) -> usize {
        degree.saturating_mul(1usize << confidence.min(6))
    }

    fn allocate_stream(&mut self, line_addr: u64) {
        let entry = StreamEntry {
            last_line: line_addr,
            direction: 0,
            confidence: 0,
        };
        if self.stream_table.len() < STREAM_TABLE_SIZE {
            self.stream_table.push(entry);
            self.stream_lru.insert(0, self.stream_table.len() - 1);
        } else {
            let victim = *self.stream_lru.last().unwrap();
            self.stream_table[victim] = entry;
            self.stream_lru.retain(|&i| i != victim);
            self.stream_lru.insert(0, victim);
        }
    }

    fn touch_stream(&mut self, idx: usize) {
        self.stream_lru.retain(|&i| i != idx);
        self.stream_lru.insert(0, idx);
    }

    fn stride(&mut self, line_addr: u64, pc: Option<u64>) -> Candidates {
        let mut out = Candidates::new();
        let Some(pc) = pc else {
            return out;
        };
        let entry = self.stride_table.entry(pc).or_insert(StrideEntry {
            last_addr: line_addr,
            stride: 0,
            confidence: 0,
        });
        let delta = line_addr as i64 - entry.last_addr as i64;
        if entry.confidence > 0 && delta == entry.stride {
            entry.confidence += 1;
            entry.last_addr = line_addr;
            let stride = entry.stride;
            for i in 1..=self.degree as i64 {
                out.push((line_addr as i64 + i * stride) as u64);
            }
        } else {
            entry.stride = delta;
            entry.confidence = 1;
            entry.last_addr = line_addr;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_line_emits_degree_successors() {
        let mut p = Prefetcher::new(PrefetchPolicyKind::NextLine, 2, 64);
        let c = p.on_miss(0x1000, None);
        assert_eq!(&c[..], &[0x1040, 0x1080]);
    }

    #[test]
    fn none_emits_nothing() {
        let mut p = Prefetcher::new(PrefetchPolicyKind::None, 4, 64);
        assert!(p.on_miss(0x1000, None).is_empty());
    }

    #[test]
    fn stream_detects_ascending_unit_stride() {
        let mut p = Prefetcher::new(PrefetchPolicyKind::Stream, 2, 64);
        assert!(p.on_miss(0x1000, None).is_empty(), "first touch just seeds the stream");
        let c = p.on_miss(0x1040, None);
        assert_eq!(&c[..], &[0x1080, 0x10c0, 0x1100, 0x1140]);
    }

    #[test]
    fn stride_learns_pc_indexed_constant_stride() {
        let mut p = Prefetcher::new(PrefetchPolicyKind::Stride, 1, 64);
        let pc = 0xdead;
        assert!(p.on_miss(0x1000, Some(pc)).is_empty());
        assert!(p.on_miss(0x1100, Some(pc)).is_empty(), "confirms stride on 2nd sample");
        let c = p.on_miss(0x1200, Some(pc));
        assert_eq!(&c[..], &[0x1300]);
    }

    #[test]
    fn accuracy_tracks_issued_and_useful() {
        let mut p = Prefetcher::new(PrefetchPolicyKind::NextLine, 1, 64);
        p.record_issued(0x1040);
        p.record_demand_access(0x1040, true);
        assert_eq!(p.stats().issued, 1);
        assert_eq!(p.stats().useful, 1);
        assert!((p.stats().accuracy() - 1.0).abs() < 1e-9);
    }
}
