//! End-to-end scenarios, one per documented trace shape. Each builds a trace
//! in memory, drives it through `Engine::run` (or, where a single level is
//! all that matters, `CacheLevel` directly), and checks the numbers the
//! shape is supposed to produce.

use std::io::Cursor;

use cachesim::cache::{
    CacheLevel, InclusionPolicy, LevelConfig, MissKind, ReplacementKind, WritePolicy,
};
use cachesim::engine::{BlockFetchMode, Engine, EngineConfig, RunOptions};
use cachesim::prefetch::PrefetchPolicyKind;
use cachesim::tlb::TlbConfig;
use cachesim::trace::{FileTable, TraceDecoder};

fn l1_config(size_bytes: usize, associativity: usize, line_size: usize, seed: u64) -> LevelConfig {
    LevelConfig {
        name: "l1d".into(),
        size_bytes,
        line_size,
        associativity,
        replacement: ReplacementKind::Lru,
        write_policy: WritePolicy::default(),
        inclusion: InclusionPolicy::NonInclusiveNonExclusive,
        track_3c: true,
        seed,
    }
}

fn run_trace(cfg: EngineConfig, trace: &str) -> cachesim::Report {
    let mut engine = Engine::new(cfg).expect("valid engine config");
    let mut decoder = TraceDecoder::new(Cursor::new(trace.as_bytes()));
    let mut files = FileTable::new();
    engine
        .run(&mut decoder, &mut files, &RunOptions::default(), || false, |_| {})
        .expect("trace decodes cleanly")
}

fn base_engine_config(l1: LevelConfig, l2_size: usize, num_cores: usize) -> EngineConfig {
    EngineConfig {
        config_name: "test".into(),
        num_cores,
        l1_template: l1.clone(),
        separate_l1i: false,
        l2: LevelConfig {
            name: "l2".into(),
            size_bytes: l2_size,
            line_size: l1.line_size,
            associativity: 8,
            replacement: ReplacementKind::Lru,
            write_policy: WritePolicy::default(),
            inclusion: InclusionPolicy::NonInclusiveNonExclusive,
            track_3c: true,
            seed: l1.seed ^ 0x5151_5151,
        },
        l3: None,
        prefetch_policy: PrefetchPolicyKind::None,
        prefetch_degree: 1,
        dtlb: Some(TlbConfig::default()),
        itlb: Some(TlbConfig::default()),
        latency: Default::default(),
        block_fetch_mode: BlockFetchMode::default(),
    }
}

/// S1: 1024 sequential 4-byte loads, one core, educational-sized L1.
#[test]
fn s1_sequential_one_core() {
    let l1 = l1_config(4 * 1024, 4, 64, 1);
    let cfg = base_engine_config(l1, 16 * 1024, 1);

    let mut trace = String::new();
    for i in 0..1024u64 {
        trace.push_str(&format!("L 0x{:x} 4 loop.c:10 T0\n", 0x1000 + i * 4));
    }
    let report = run_trace(cfg, &trace);

    assert_eq!(report.levels.l1d.compulsory, 64);
    assert_eq!(report.levels.l1d.hits, 960);
    assert_eq!(report.levels.l1d.misses, 64);
    assert!((report.levels.l1d.hit_rate - 0.9375).abs() < 1e-9);
}

/// S2: column-major traversal of a 64x64 row-major int matrix. L1 too small
/// to hold the working set, L2 sized to hold it exactly.
#[test]
fn s2_column_major_matrix() {
    let l1 = l1_config(4 * 1024, 4, 64, 2);
    let cfg = base_engine_config(l1, 16 * 1024, 1);

    let base = 0x10000u64;
    let mut trace = String::new();
    for j in 0..64u64 {
        for i in 0..64u64 {
            let addr = base + (i * 64 + j) * 4;
            trace.push_str(&format!("L 0x{addr:x} 4 matmul.c:42 T0\n"));
        }
    }
    let report = run_trace(cfg, &trace);

    assert!(
        report.levels.l1d.hit_rate < 0.2,
        "column-major traversal should thrash a too-small L1, got {}",
        report.levels.l1d.hit_rate
    );
    assert!(
        report.levels.l2.hit_rate > 0.85,
        "L2 sized to the whole matrix should absorb almost all reuse, got {}",
        report.levels.l2.hit_rate
    );
}

/// S3: two cores alternately storing into the same 64-byte line at
/// different offsets. Classic false sharing.
#[test]
fn s3_false_sharing_two_cores() {
    let l1 = l1_config(4 * 1024, 4, 64, 3);
    let cfg = base_engine_config(l1, 16 * 1024, 2);

    let mut trace = String::new();
    for _ in 0..1000 {
        trace.push_str("S 0x2000 4 shared.c:7 T0\n");
        trace.push_str("S 0x2004 4 shared.c:8 T1\n");
    }
    let report = run_trace(cfg, &trace);

    assert!(
        report.coherence.invalidations >= 1998,
        "got {}",
        report.coherence.invalidations
    );
    assert!(report.coherence.false_sharing_events >= 1);
    assert_eq!(report.false_sharing.len(), 1);

    let entry = &report.false_sharing[0];
    let threads: std::collections::HashSet<u32> =
        entry.accesses.iter().map(|a| a.thread_id).collect();
    let offsets: std::collections::HashSet<u32> = entry.accesses.iter().map(|a| a.offset).collect();
    assert_eq!(threads, [0u32, 1u32].into_iter().collect());
    assert_eq!(offsets, [0u32, 4u32].into_iter().collect());

    let high_severity = report.suggestions.iter().any(|s| s.severity == "high");
    assert!(high_severity, "expected a high-severity suggestion");
}

/// S4: sequential scan over a working set larger than L1; the stream
/// prefetcher should turn almost every demand miss into a hit.
#[test]
fn s4_stream_prefetcher_win() {
    let l1 = l1_config(32 * 1024, 8, 64, 4);
    let mut cfg = base_engine_config(l1, 256 * 1024, 1);
    cfg.prefetch_policy = PrefetchPolicyKind::Stream;
    cfg.prefetch_degree = 2;

    let mut trace = String::new();
    for i in 0..1024u64 {
        trace.push_str(&format!("L 0x{:x} 4 scan.c:3 T0\n", i * 64));
    }
    let report = run_trace(cfg, &trace);

    assert!(report.levels.l1d.hit_rate > 0.9, "got {}", report.levels.l1d.hit_rate);
    assert!(report.prefetch.accuracy > 0.9, "got {}", report.prefetch.accuracy);
}

/// S5: one 8-byte load straddling a 64-byte line boundary splits into two
/// sub-accesses, each counted separately.
#[test]
fn s5_line_boundary_split() {
    let l1 = l1_config(4 * 1024, 4, 64, 5);
    let cfg = base_engine_config(l1, 16 * 1024, 1);

    let report = run_trace(cfg, "L 0x103c 8 unaligned.c:1 T0\n");

    assert_eq!(report.levels.l1d.hits + report.levels.l1d.misses, 2);
    assert_eq!(report.levels.l1d.compulsory, 2);
}

/// S6: three addresses that all map to set 0 of a 2-way L1; repeated
/// round-robin accesses are conflict misses, not capacity misses, because a
/// fully-associative cache of the same total size would still hold all
/// three.
#[test]
fn s6_capacity_vs_conflict() {
    let mut l1 = CacheLevel::new(l1_config(4 * 1024, 2, 64, 6)).unwrap();
    assert_eq!(l1.num_sets(), 32);

    let addrs = [0x0000u64, 0x0800, 0x1000];
    for (i, &a) in addrs.iter().enumerate() {
        let outcome = l1.access(a, false);
        assert_eq!(outcome.result, cachesim::cache::AccessResult::Miss, "addr {i}");
        assert_eq!(outcome.miss_kind, MissKind::Compulsory, "addr {i}");
    }

    for round in 0..5 {
        for (i, &a) in addrs.iter().enumerate() {
            let outcome = l1.access(a, false);
            assert_eq!(
                outcome.result,
                cachesim::cache::AccessResult::Miss,
                "round {round} addr {i} should still miss (2-way, 3 live addresses)"
            );
            assert_eq!(
                outcome.miss_kind,
                MissKind::Conflict,
                "round {round} addr {i} should classify as conflict, not capacity"
            );
        }
    }
    assert_eq!(l1.stats().compulsory, 3);
    assert_eq!(l1.stats().conflict, 15);
}
