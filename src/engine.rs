//! Multi-core cache system (spec section 4.7) — the top-level engine.
//! Grounded on the teacher's `simulate` module in spirit (one struct
//! exclusively owning every piece of simulated hardware, a single
//! step-one-event-at-a-time loop) generalized from a single DRAM timing
//! model to the full TLB/L1/L2/L3/coherence/prefetch/attribution pipeline.

use crate::attribution::{AttributionAggregator, SourceLine};
use crate::cache::{
    AccessResult, CacheLevel, CoherenceState, Eviction, InclusionPolicy, LevelConfig,
    Stats as LevelStats,
};
use crate::coherence::{CoherenceDirectory, SnoopResult};
use crate::error::Result;
use crate::falsesharing::FalseSharingDetector;
use crate::prefetch::{PrefetchPolicyKind, Prefetcher};
use crate::report::*;
use crate::suggest::{suggest, SuggestInputs};
use crate::tlb::{Tlb, TlbConfig, TlbResult, TlbStats};
use crate::trace::{AccessKind, Event, FileTable, TraceDecoder};
use std::collections::{HashMap, HashSet};
use std::io::BufRead;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitLevel {
    L1,
    L2,
    L3,
    Memory,
}

/// Instruction-fetch granularity (open question in spec section 9):
/// whether a multi-line basic block is probed as a single access at its
/// start address, or split into one sub-access per line it spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockFetchMode {
    Coarse,
    Fine,
}

impl Default for BlockFetchMode {
    fn default() -> Self {
        BlockFetchMode::Coarse
    }
}

/// Construction parameters for one engine instance (spec section 4.7,
/// first paragraph).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub config_name: String,
    pub num_cores: usize,
    pub l1_template: LevelConfig,
    pub separate_l1i: bool,
    pub l2: LevelConfig,
    pub l3: Option<LevelConfig>,
    pub prefetch_policy: PrefetchPolicyKind,
    pub prefetch_degree: usize,
    pub dtlb: Option<TlbConfig>,
    pub itlb: Option<TlbConfig>,
    pub latency: LatencyConfig,
    pub block_fetch_mode: BlockFetchMode,
}

/// Snapshot delivered through the streaming-progress sink (spec section 5).
pub struct Progress {
    pub events: u64,
    pub l1d: LevelStats,
    pub l2: LevelStats,
    pub l3: Option<LevelStats>,
    pub invalidations: u64,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub event_limit: u64,
    /// Keep 1 access out of every `sample_rate`; 1 disables sampling.
    pub sample_rate: u64,
    /// Emit a progress snapshot every this many processed events; 0 disables it.
    pub progress_every: u64,
    pub verbose: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            event_limit: 5_000_000,
            sample_rate: 1,
            progress_every: 50,
            verbose: false,
        }
    }
}

pub struct Engine {
    config_name: String,
    num_cores: usize,
    l1d: Vec<CacheLevel>,
    l1i: Option<Vec<CacheLevel>>,
    l2: CacheLevel,
    l3: Option<CacheLevel>,
    directory: CoherenceDirectory,
    prefetchers: Vec<Prefetcher>,
    dtlb: Option<Vec<Tlb>>,
    itlb: Option<Vec<Tlb>>,
    falsesharing: FalseSharingDetector,
    attribution: AttributionAggregator,
    thread_to_core: HashMap<u32, usize>,
    next_core: usize,
    latency: LatencyConfig,
    prefetch_policy: PrefetchPolicyKind,
    prefetch_degree: usize,
    block_fetch_mode: BlockFetchMode,
    stride_sites: HashSet<(u32, u32)>,

    events_processed: u64,
    sampled: bool,
    truncated: bool,
    cancelled: bool,
    tlb_misses_total: u64,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        if config.num_cores == 0 {
            return Err(crate::error::SimError::InvalidConfig {
                field: "num_cores".into(),
                reason: "must be >= 1".into(),
            });
        }
        let mut l1d = Vec::with_capacity(config.num_cores);
        for c in 0..config.num_cores {
            let mut cfg = config.l1_template.clone();
            cfg.name = format!("l1d[{c}]");
            cfg.seed ^= (c as u64).wrapping_mul(0xD1B5_4A32_D192_ED03);
            l1d.push(CacheLevel::new(cfg)?);
        }
        let l1i = if config.separate_l1i {
            let mut v = Vec::with_capacity(config.num_cores);
            for c in 0..config.num_cores {
                let mut cfg = config.l1_template.clone();
                cfg.name = format!("l1i[{c}]");
                cfg.seed = cfg.seed ^ (c as u64).wrapping_mul(0xA24B_AED4_963E_E407) ^ 1;
                v.push(CacheLevel::new(cfg)?);
            }
            Some(v)
        } else {
            None
        };

        let l2 = CacheLevel::new(config.l2.clone())?;
        let l3 = config.l3.clone().map(CacheLevel::new).transpose()?;

        let prefetchers = (0..config.num_cores)
            .map(|_| {
                Prefetcher::new(
                    config.prefetch_policy,
                    config.prefetch_degree,
                    config.l1_template.line_size,
                )
            })
            .collect();

        let dtlb = config
            .dtlb
            .map(|tc| (0..config.num_cores).map(|_| Tlb::new(tc)).collect::<Result<Vec<_>>>())
            .transpose()?;
        let itlb = config
            .itlb
            .map(|tc| (0..config.num_cores).map(|_| Tlb::new(tc)).collect::<Result<Vec<_>>>())
            .transpose()?;

        Ok(Engine {
            config_name: config.config_name,
            num_cores: config.num_cores,
            l1d,
            l1i,
            l2,
            l3,
            directory: CoherenceDirectory::new(),
            prefetchers,
            dtlb,
            itlb,
            falsesharing: FalseSharingDetector::new(),
            attribution: AttributionAggregator::new(),
            thread_to_core: HashMap::new(),
            next_core: 0,
            latency: config.latency,
            prefetch_policy: config.prefetch_policy,
            prefetch_degree: config.prefetch_degree,
            block_fetch_mode: config.block_fetch_mode,
            stride_sites: HashSet::new(),
            events_processed: 0,
            sampled: false,
            truncated: false,
            cancelled: false,
            tlb_misses_total: 0,
        })
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn was_truncated(&self) -> bool {
        self.truncated
    }

    /// Drives `decoder` to completion (or cancellation/event-limit), then
    /// finalizes and returns the report. `cancel` is polled at each event
    /// boundary; `progress` receives a snapshot every `progress_every`
    /// processed events.
    pub fn run<R: BufRead>(
        &mut self,
        decoder: &mut TraceDecoder<R>,
        files: &mut FileTable,
        opts: &RunOptions,
        mut cancel: impl FnMut() -> bool,
        mut progress: impl FnMut(&Progress),
    ) -> Result<Report> {
        let mut since_progress: u64 = 0;
        let mut raw_index: u64 = 0;
        loop {
            if cancel() {
                self.cancelled = true;
                break;
            }
            if self.events_processed >= opts.event_limit {
                self.truncated = true;
                break;
            }
            let event = match decoder.next_record(files) {
                None => break,
                Some(Err(e)) => return Err(e),
                Some(Ok(ev)) => ev,
            };
            raw_index += 1;
            if opts.sample_rate > 1 {
                self.sampled = true;
                if raw_index % opts.sample_rate != 0 {
                    continue;
                }
            }
            if opts.verbose {
                log::debug!(
                    "event {}: {:?} addr=0x{:x} size={}",
                    self.events_processed,
                    event.kind,
                    event.addr,
                    event.size
                );
            }
            self.process_event(&event);
            self.events_processed += 1;
            since_progress += 1;
            if opts.progress_every > 0 && since_progress >= opts.progress_every {
                since_progress = 0;
                let snapshot = self.snapshot_progress();
                progress(&snapshot);
            }
        }
        Ok(self.finalize(files))
    }

    fn core_for_thread(&mut self, thread: u32) -> usize {
        if let Some(&c) = self.thread_to_core.get(&thread) {
            return c;
        }
        let c = self.next_core % self.num_cores;
        self.next_core += 1;
        self.thread_to_core.insert(thread, c);
        c
    }

    fn process_event(&mut self, ev: &Event) {
        let core = self.core_for_thread(ev.thread);
        let line_size = self.l1d[core].line_size() as u64;
        let segments = touched_lines(ev.addr, ev.size, line_size);
        let site = SourceLine {
            file: ev.file,
            line: ev.line_no,
        };
        match ev.kind {
            AccessKind::Load => {
                for (la, offset) in &segments {
                    self.dispatch_demand(core, ev.thread, *la, *offset, false, site);
                }
            }
            AccessKind::Store => {
                for (la, offset) in &segments {
                    self.dispatch_demand(core, ev.thread, *la, *offset, true, site);
                }
            }
            AccessKind::InstructionFetch => match self.block_fetch_mode {
                BlockFetchMode::Fine => {
                    for (la, _offset) in &segments {
                        self.dispatch_ifetch(core, ev.thread, *la, site);
                    }
                }
                BlockFetchMode::Coarse => {
                    self.dispatch_ifetch(core, ev.thread, segments[0].0, site);
                }
            },
        }
    }

    fn dispatch_demand(
        &mut self,
        core: usize,
        thread: u32,
        la: u64,
        offset: u32,
        is_write: bool,
        site: SourceLine,
    ) -> HitLevel {
        self.falsesharing
            .record_access(la, thread, offset, is_write, site.file, site.line);

        let sub_addr = la + offset as u64;
        if let Some(dtlb) = self.dtlb.as_mut() {
            if dtlb[core].access(sub_addr) == TlbResult::Miss {
                self.tlb_misses_total += 1;
            }
        }

        let provisional_state = if is_write {
            CoherenceState::Modified
        } else {
            CoherenceState::Exclusive
        };
        let l1_outcome = self.l1d[core].access_with_state(la, is_write, provisional_state);
        let was_hit = l1_outcome.result == AccessResult::Hit;
        self.prefetchers[core].record_demand_access(la, was_hit);
        self.attribution.record(site, thread, was_hit);

        if was_hit {
            if is_write {
                let snoop = self.directory.request_exclusive(core, la);
                self.apply_snoop(&snoop, la);
                self.l1d[core].set_coherence_state(la, CoherenceState::Modified);
            }
            return HitLevel::L1;
        }

        self.forward_dirty_eviction(core, l1_outcome.evicted);

        let candidates = self.prefetchers[core].on_miss(la, Some(pc_surrogate(site)));
        if matches!(
            self.prefetch_policy,
            PrefetchPolicyKind::Stride | PrefetchPolicyKind::Adaptive | PrefetchPolicyKind::Intel
        ) && !candidates.is_empty()
        {
            self.stride_sites.insert((site.file.0, site.line));
        }
        for cand in candidates {
            if !self.l1d[core].is_present(cand) {
                let state = if self.directory.has_other_holder(core, cand) {
                    CoherenceState::Shared
                } else {
                    CoherenceState::Exclusive
                };
                let outcome = self.l1d[core].access_with_state(cand, false, state);
                self.forward_dirty_eviction(core, outcome.evicted);
                // A prefetched line must reach L1 the same way a demand line
                // does: through L2/L3. Skipping this would let an Inclusive
                // L2 miss a line that's valid in L1 (spec section 8
                // property 6).
                self.probe_outer(cand, false, state);
                self.prefetchers[core].record_issued(cand);
            }
        }

        let snoop = if is_write {
            self.directory.request_exclusive(core, la)
        } else {
            self.directory.request_read(core, la)
        };
        self.apply_snoop(&snoop, la);
        let new_state = if is_write {
            CoherenceState::Modified
        } else {
            snoop.new_state
        };

        let level = self.probe_outer(la, is_write, new_state);
        self.l1d[core].set_coherence_state(la, new_state);
        level
    }

    fn dispatch_ifetch(&mut self, core: usize, thread: u32, la: u64, site: SourceLine) -> HitLevel {
        if let Some(itlb) = self.itlb.as_mut() {
            itlb[core].access(la);
        }
        let outcome = if let Some(l1i) = self.l1i.as_mut() {
            l1i[core].access(la, false)
        } else {
            self.l1d[core].access(la, false)
        };
        let was_hit = outcome.result == AccessResult::Hit;
        self.prefetchers[core].record_demand_access(la, was_hit);
        let level = if was_hit {
            HitLevel::L1
        } else {
            self.forward_dirty_eviction(core, outcome.evicted);
            self.probe_outer(la, false, CoherenceState::Exclusive)
        };
        self.attribution.record(site, thread, was_hit);
        level
    }

    fn probe_outer(&mut self, la: u64, is_write: bool, state: CoherenceState) -> HitLevel {
        let l2_outcome = self.l2.access_with_state(la, is_write, state);
        if l2_outcome.result == AccessResult::Hit {
            return HitLevel::L2;
        }
        if let Some(ev) = l2_outcome.evicted {
            self.propagate_l2_eviction(ev);
        }
        if self.l3.is_none() {
            return HitLevel::Memory;
        }
        let l3_outcome = self.l3.as_mut().unwrap().access_with_state(la, is_write, state);
        if let Some(ev) = l3_outcome.evicted {
            self.propagate_l3_eviction(ev);
        }
        if l3_outcome.result == AccessResult::Hit {
            HitLevel::L3
        } else {
            HitLevel::Memory
        }
    }

    fn forward_dirty_eviction(&mut self, core: usize, evicted: Option<Eviction>) {
        if let Some(ev) = evicted {
            self.directory.forget_holder(core, ev.line_addr);
            if let Some(l2_evicted) = forward_eviction(&mut self.l2, ev) {
                self.propagate_l2_eviction(l2_evicted);
            }
        }
    }

    /// Handles an L2 eviction's two possible effects on neighboring levels
    /// (spec section 4.2 "Inclusion" / section 8 property 6): if L2 is
    /// Inclusive of L1, no L1 may still hold the evicted line, so every
    /// per-core copy is back-invalidated and any dirty data it held is
    /// carried forward as part of this eviction. The (possibly now dirty)
    /// eviction is then forwarded to L3 under L3's own inclusion policy
    /// relative to L2 (migrated whole if Exclusive, writeback-only
    /// otherwise).
    fn propagate_l2_eviction(&mut self, mut ev: Eviction) {
        if self.l2.inclusion() == InclusionPolicy::Inclusive && self.invalidate_all_l1(ev.line_addr) {
            ev.was_dirty = true;
        }
        if self.l3.is_none() {
            return;
        }
        let l3_evicted = forward_eviction(self.l3.as_mut().unwrap(), ev);
        if let Some(l3_evicted) = l3_evicted {
            self.propagate_l3_eviction(l3_evicted);
        }
    }

    /// If L3 is configured Inclusive of L2, no L2 copy may survive an L3
    /// eviction of the same line; there is no level beyond L3 to forward a
    /// resulting writeback to; it simply retires (already counted by
    /// `CacheLevel::invalidate`'s own writeback stat).
    fn propagate_l3_eviction(&mut self, ev: Eviction) {
        if self.l3.as_ref().map(|l3| l3.inclusion()) == Some(InclusionPolicy::Inclusive) {
            self.l2.invalidate(ev.line_addr);
        }
    }

    /// Back-invalidates every per-core L1 (data, and instruction if
    /// separate) copy of `line_addr`. Returns whether any invalidated copy
    /// was dirty. Data-cache holders are also dropped from the directory,
    /// since after this call no core's L1 holds the line anymore.
    fn invalidate_all_l1(&mut self, line_addr: u64) -> bool {
        let mut dirty = false;
        for core in 0..self.num_cores {
            if let Some(ev) = self.l1d[core].invalidate(line_addr) {
                dirty |= ev.was_dirty;
                self.directory.forget_holder(core, line_addr);
            }
            if let Some(l1i) = self.l1i.as_mut() {
                if let Some(ev) = l1i[core].invalidate(line_addr) {
                    dirty |= ev.was_dirty;
                }
            }
        }
        dirty
    }

    fn apply_snoop(&mut self, snoop: &SnoopResult, la: u64) {
        for &c in &snoop.downgraded_cores {
            self.l1d[c].downgrade_to_shared(la);
        }
        for &c in &snoop.invalidated_cores {
            if let Some(ev) = self.l1d[c].invalidate(la) {
                if ev.was_dirty {
                    let outcome = self.l2.access_with_state(ev.line_addr, true, CoherenceState::Modified);
                    if let Some(l2_evicted) = outcome.evicted {
                        self.propagate_l2_eviction(l2_evicted);
                    }
                }
            }
        }
    }

    fn snapshot_progress(&self) -> Progress {
        Progress {
            events: self.events_processed,
            l1d: merge_stats(&self.l1d),
            l2: self.l2.stats().clone(),
            l3: self.l3.as_ref().map(|l| l.stats().clone()),
            invalidations: self.directory.stats().invalidations,
        }
    }

    fn finalize(&mut self, files: &FileTable) -> Report {
        let l1d_stats = merge_stats(&self.l1d);
        let l1i_stats = self.l1i.as_ref().map(|v| merge_stats(v));
        let l2_stats = self.l2.stats().clone();
        let l3_stats = self.l3.as_ref().map(|l| l.stats().clone());

        let dtlb_stats = self
            .dtlb
            .as_ref()
            .map(|v| merge_tlb_stats(v))
            .unwrap_or_default();
        let itlb_stats = self.itlb.as_ref().map(|v| merge_tlb_stats(v));

        let total_hits_l1 = l1d_stats.hits + l1i_stats.as_ref().map(|s| s.hits).unwrap_or(0);
        let total_hits_l2 = l2_stats.hits;
        let total_hits_l3 = l3_stats.as_ref().map(|s| s.hits).unwrap_or(0);
        let total_memory_misses = l3_stats
            .as_ref()
            .map(|s| s.misses)
            .unwrap_or(l2_stats.misses);

        let breakdown = TimingBreakdown {
            l1_hit_cycles: total_hits_l1 * self.latency.l1_hit,
            l2_hit_cycles: total_hits_l2 * self.latency.l2_hit,
            l3_hit_cycles: total_hits_l3 * self.latency.l3_hit,
            memory_cycles: total_memory_misses * self.latency.memory,
            tlb_miss_cycles: self.tlb_misses_total * self.latency.tlb_miss_penalty,
        };
        let total_cycles = breakdown.l1_hit_cycles
            + breakdown.l2_hit_cycles
            + breakdown.l3_hit_cycles
            + breakdown.memory_cycles
            + breakdown.tlb_miss_cycles;
        let total_accesses = l1d_stats.hits
            + l1d_stats.misses
            + l1i_stats.as_ref().map(|s| s.hits + s.misses).unwrap_or(0);
        let avg_latency = if total_accesses == 0 {
            0.0
        } else {
            total_cycles as f64 / total_accesses as f64
        };

        let hot_lines_raw = self.attribution.hottest_lines(20);
        let hot_lines: Vec<HotLine> = hot_lines_raw
            .iter()
            .map(|r| HotLine {
                file: files.resolve(r.file).to_string(),
                line: r.line,
                hits: r.hits,
                misses: r.misses,
                miss_rate: if r.hits + r.misses == 0 {
                    0.0
                } else {
                    r.misses as f64 / (r.hits + r.misses) as f64
                },
                threads: r.distinct_threads,
            })
            .collect();

        let fs_lines = self.falsesharing.false_sharing_lines();
        let false_sharing: Vec<FalseSharingEntry> = fs_lines
            .iter()
            .map(|l| FalseSharingEntry {
                cache_line_addr: format!("0x{:x}", l.line_addr),
                access_count: l.accesses.iter().map(|a| a.count).sum(),
                accesses: l
                    .accesses
                    .iter()
                    .map(|a| FalseSharingAccess {
                        thread_id: a.thread_id,
                        offset: a.offset,
                        is_write: a.is_write,
                        file: files.resolve(a.file).to_string(),
                        line: a.line_no,
                        count: a.count,
                    })
                    .collect(),
            })
            .collect();

        let mut issued = 0u64;
        let mut useful = 0u64;
        for p in &self.prefetchers {
            issued += p.stats().issued;
            useful += p.stats().useful;
        }
        let prefetch = PrefetchReport {
            policy: <&str>::from(self.prefetch_policy).to_string(),
            degree: self.prefetch_degree,
            issued,
            useful,
            accuracy: if issued == 0 { 0.0 } else { useful as f64 / issued as f64 },
        };

        let stride_vec: Vec<(u32, u32)> = self.stride_sites.iter().cloned().collect();
        let suggest_inputs = SuggestInputs {
            l1: &l1d_stats,
            l2: &l2_stats,
            l3: l3_stats.as_ref(),
            false_sharing_lines: &fs_lines,
            hot_lines: &hot_lines_raw,
            files,
            prefetch_policy: self.prefetch_policy,
            line_size: self.l1d[0].line_size() as u64,
            stride_detected_lines: &stride_vec,
        };
        let suggestions: Vec<SuggestionEntry> =
            suggest(&suggest_inputs).iter().map(SuggestionEntry::from).collect();

        let cache_state = CacheState {
            l1d: self
                .l1d
                .iter()
                .enumerate()
                .map(|(i, l)| CoreCacheState {
                    core: i,
                    sets: l.num_sets(),
                    ways: l.associativity(),
                    lines: l
                        .state_snapshot()
                        .iter()
                        .map(|&(s, w, v, t, st)| CacheLineState {
                            s,
                            w,
                            v,
                            t: format!("0x{:x}", t),
                            st: st.as_str().to_string(),
                        })
                        .collect(),
                })
                .collect(),
        };

        Report {
            config: self.config_name.clone(),
            events: self.events_processed,
            sampled: self.sampled,
            multicore: self.num_cores > 1,
            cores: self.num_cores,
            levels: Levels {
                l1d: (&l1d_stats).into(),
                l1i: l1i_stats.as_ref().map(|s| s.into()),
                l2: (&l2_stats).into(),
                l3: l3_stats.as_ref().map(|s| s.into()),
            },
            coherence: CoherenceReport {
                invalidations: self.directory.stats().invalidations,
                false_sharing_events: self.falsesharing.false_sharing_count(),
            },
            tlb: TlbSection {
                dtlb: (&dtlb_stats).into(),
                itlb: itlb_stats.as_ref().map(|s| s.into()),
            },
            timing: Timing {
                total_cycles,
                avg_latency,
                breakdown,
                latency_config: self.latency,
            },
            hot_lines,
            false_sharing,
            prefetch,
            suggestions,
            cache_state,
        }
    }
}

fn merge_stats(levels: &[CacheLevel]) -> LevelStats {
    let mut out = LevelStats::default();
    for l in levels {
        let s = l.stats();
        out.hits += s.hits;
        out.misses += s.misses;
        out.writebacks += s.writebacks;
        out.compulsory += s.compulsory;
        out.capacity += s.capacity;
        out.conflict += s.conflict;
    }
    out
}

fn merge_tlb_stats(tlbs: &[Tlb]) -> TlbStats {
    let mut out = TlbStats::default();
    for t in tlbs {
        out.hits += t.stats().hits;
        out.misses += t.stats().misses;
    }
    out
}

/// Trace records carry a source line, not a real program counter. The
/// stride prefetcher keys its per-site table on `pc` (spec section 4.3), so
/// every instruction at the same `(file, line)` must hash to the same
/// synthetic value here for stride detection to see repeat visits to a
/// call site at all.
fn pc_surrogate(site: SourceLine) -> u64 {
    ((site.file.0 as u64) << 32) | site.line as u64
}

/// Forwards an inner level's eviction to the next level out under that
/// outer level's inclusion policy (spec section 4.2 "Inclusion"):
/// Exclusive levels hold nothing their inner level also holds, so the
/// whole victim (dirty or not) migrates out; Inclusive and
/// non-inclusive-non-exclusive levels only care about a dirty victim's
/// data, forwarded as a plain writeback. Returns the outer level's own
/// eviction, if installing the forwarded line displaced something.
fn forward_eviction(outer: &mut CacheLevel, ev: Eviction) -> Option<Eviction> {
    if outer.inclusion() == InclusionPolicy::Exclusive {
        let state = if ev.was_dirty {
            CoherenceState::Modified
        } else {
            CoherenceState::Exclusive
        };
        outer.access_with_state(ev.line_addr, ev.was_dirty, state).evicted
    } else if ev.was_dirty {
        outer
            .access_with_state(ev.line_addr, true, CoherenceState::Modified)
            .evicted
    } else {
        None
    }
}

fn line_addr(addr: u64, line_size: u64) -> u64 {
    addr & !(line_size - 1)
}

/// Splits a size-`size` access at `addr` into the line addresses it spans
/// (spec section 4.7 step 4 / section 8 property 8), each tagged with its
/// byte offset within that line.
fn touched_lines(addr: u64, size: u32, line_size: u64) -> Vec<(u64, u32)> {
    let first_line = line_addr(addr, line_size);
    let last_byte = addr + (size.max(1) as u64) - 1;
    let last_line = line_addr(last_byte, line_size);
    let mut out = Vec::new();
    let mut l = first_line;
    loop {
        let offset = if l == first_line { (addr - l) as u32 } else { 0 };
        out.push((l, offset));
        if l == last_line {
            break;
        }
        l += line_size;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ReplacementKind, WritePolicy};

    #[test]
    fn single_line_access_yields_one_segment() {
        let segs = touched_lines(0x1000, 4, 64);
        assert_eq!(segs, vec![(0x1000, 0)]);
    }

    #[test]
    fn boundary_crossing_access_splits_in_two() {
        let segs = touched_lines(0x103C, 8, 64);
        assert_eq!(segs, vec![(0x1000, 0x3C), (0x1040, 0)]);
    }

    fn tiny_level(name: &str, inclusion: InclusionPolicy, seed: u64) -> LevelConfig {
        tiny_level_sized(name, inclusion, seed, 64, 1)
    }

    fn tiny_level_sized(
        name: &str,
        inclusion: InclusionPolicy,
        seed: u64,
        size_bytes: usize,
        associativity: usize,
    ) -> LevelConfig {
        LevelConfig {
            name: name.into(),
            size_bytes,
            line_size: 64,
            associativity,
            replacement: ReplacementKind::Lru,
            write_policy: WritePolicy::default(),
            inclusion,
            track_3c: false,
            seed,
        }
    }

    /// L1 is 2-way so it can hold both lines these tests touch without
    /// evicting one on its own; only the 1-way L2's eviction (and whatever
    /// it propagates under its inclusion policy) should ever remove a line
    /// from L1 here.
    fn tiny_engine(l2_inclusion: InclusionPolicy) -> Engine {
        let cfg = EngineConfig {
            config_name: "test".into(),
            num_cores: 1,
            l1_template: tiny_level_sized("l1d", InclusionPolicy::NonInclusiveNonExclusive, 1, 128, 2),
            separate_l1i: false,
            l2: tiny_level("l2", l2_inclusion, 2),
            l3: None,
            prefetch_policy: PrefetchPolicyKind::None,
            prefetch_degree: 1,
            dtlb: None,
            itlb: None,
            latency: LatencyConfig::default(),
            block_fetch_mode: BlockFetchMode::default(),
        };
        Engine::new(cfg).unwrap()
    }

    fn site(line: u32) -> SourceLine {
        SourceLine {
            file: crate::trace::FileId(0),
            line,
        }
    }

    #[test]
    fn inclusive_l2_back_invalidates_l1_on_eviction() {
        let mut engine = tiny_engine(InclusionPolicy::Inclusive);
        engine.dispatch_demand(0, 0, 0x0000, 0, false, site(1));
        assert!(engine.l1d[0].is_present(0x0000));
        // L1 has room for both lines; L2 is 1-way, so this second, distinct
        // line evicts the first out of L2, which an Inclusive L2 must
        // back-invalidate out of L1 too.
        engine.dispatch_demand(0, 0, 0x1000, 0, false, site(2));
        assert!(
            !engine.l1d[0].is_present(0x0000),
            "inclusive L2 eviction should back-invalidate L1's copy"
        );
    }

    #[test]
    fn non_inclusive_l2_eviction_leaves_l1_alone() {
        let mut engine = tiny_engine(InclusionPolicy::NonInclusiveNonExclusive);
        engine.dispatch_demand(0, 0, 0x0000, 0, false, site(1));
        engine.dispatch_demand(0, 0, 0x1000, 0, false, site(2));
        assert!(
            engine.l1d[0].is_present(0x0000),
            "NINE L2 eviction must not reach back into L1"
        );
    }

    #[test]
    fn forward_eviction_exclusive_migrates_clean_victim() {
        let mut l2 = CacheLevel::new(tiny_level("l2", InclusionPolicy::Exclusive, 9)).unwrap();
        assert!(!l2.is_present(0x4000));
        let ev = Eviction {
            line_addr: 0x4000,
            was_dirty: false,
        };
        assert!(forward_eviction(&mut l2, ev).is_none());
        assert!(
            l2.is_present(0x4000),
            "an exclusive outer level must migrate a clean victim, not just a dirty one"
        );
    }

    #[test]
    fn forward_eviction_non_exclusive_drops_clean_victim() {
        let mut l2 = CacheLevel::new(tiny_level("l2", InclusionPolicy::NonInclusiveNonExclusive, 9)).unwrap();
        let ev = Eviction {
            line_addr: 0x4000,
            was_dirty: false,
        };
        forward_eviction(&mut l2, ev);
        assert!(
            !l2.is_present(0x4000),
            "a non-exclusive level only cares about a dirty victim's data"
        );
    }

    #[test]
    fn l1_eviction_forgets_only_the_evicting_cores_holder() {
        let mut engine = tiny_engine(InclusionPolicy::NonInclusiveNonExclusive);
        engine.directory.request_read(0, 0x2000);
        engine.directory.request_read(1, 0x2000);
        engine.forward_dirty_eviction(
            0,
            Some(Eviction {
                line_addr: 0x2000,
                was_dirty: false,
            }),
        );
        assert!(
            engine.directory.has_other_holder(2, 0x2000),
            "core 1's holder record must survive core 0's eviction"
        );
    }
}
