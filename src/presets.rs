//! Hardware presets (spec section 6.4). Fixed constants embedded in the
//! engine, built the way the teacher builds its static hardware tables: a
//! `once_cell::sync::Lazy` map keyed by name.

use crate::cache::{InclusionPolicy, ReplacementKind, WritePolicy};
use crate::engine::EngineConfig;
use crate::error::{Result, SimError};
use crate::prefetch::PrefetchPolicyKind;
use crate::report::LatencyConfig;
use once_cell::sync::Lazy;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub struct Preset {
    pub name: &'static str,
    pub line_size: usize,
    pub l1_size: usize,
    pub l1_assoc: usize,
    pub l2_size: usize,
    pub l2_assoc: usize,
    pub l3_size: Option<usize>,
    pub l3_assoc: usize,
    pub replacement: ReplacementKind,
    pub l2_inclusion: InclusionPolicy,
    pub l3_inclusion: InclusionPolicy,
    pub prefetch_policy: PrefetchPolicyKind,
    pub prefetch_degree: usize,
    pub latency: LatencyConfig,
}

const KB: usize = 1024;
const MB: usize = 1024 * 1024;

fn latency(l1: u64, l2: u64, l3: u64, mem: u64, tlb: u64) -> LatencyConfig {
    LatencyConfig {
        l1_hit: l1,
        l2_hit: l2,
        l3_hit: l3,
        memory: mem,
        tlb_miss_penalty: tlb,
    }
}

pub static PRESETS: Lazy<HashMap<&'static str, Preset>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert(
        "educational",
        Preset {
            name: "educational",
            line_size: 64,
            l1_size: 4 * KB,
            l1_assoc: 4,
            l2_size: 16 * KB,
            l2_assoc: 8,
            l3_size: None,
            l3_assoc: 1,
            replacement: ReplacementKind::Lru,
            l2_inclusion: InclusionPolicy::NonInclusiveNonExclusive,
            l3_inclusion: InclusionPolicy::NonInclusiveNonExclusive,
            prefetch_policy: PrefetchPolicyKind::None,
            prefetch_degree: 1,
            latency: latency(4, 12, 36, 200, 30),
        },
    );
    m.insert(
        "intel-12th-gen",
        Preset {
            name: "intel-12th-gen",
            line_size: 64,
            l1_size: 48 * KB,
            l1_assoc: 12,
            l2_size: 1280 * KB,
            l2_assoc: 10,
            l3_size: Some(30 * MB),
            l3_assoc: 12,
            replacement: ReplacementKind::Srrip,
            l2_inclusion: InclusionPolicy::NonInclusiveNonExclusive,
            l3_inclusion: InclusionPolicy::Inclusive,
            prefetch_policy: PrefetchPolicyKind::Adaptive,
            prefetch_degree: 4,
            latency: latency(4, 14, 42, 230, 20),
        },
    );
    m.insert(
        "intel-14th-gen",
        Preset {
            name: "intel-14th-gen",
            line_size: 64,
            l1_size: 48 * KB,
            l1_assoc: 12,
            l2_size: 2 * MB,
            l2_assoc: 16,
            l3_size: Some(36 * MB),
            l3_assoc: 12,
            replacement: ReplacementKind::Srrip,
            l2_inclusion: InclusionPolicy::NonInclusiveNonExclusive,
            l3_inclusion: InclusionPolicy::Inclusive,
            prefetch_policy: PrefetchPolicyKind::Adaptive,
            prefetch_degree: 4,
            latency: latency(4, 13, 40, 220, 20),
        },
    );
    m.insert(
        "intel-xeon",
        Preset {
            name: "intel-xeon",
            line_size: 64,
            l1_size: 48 * KB,
            l1_assoc: 12,
            l2_size: 2 * MB,
            l2_assoc: 16,
            l3_size: Some(60 * MB),
            l3_assoc: 16,
            replacement: ReplacementKind::Srrip,
            l2_inclusion: InclusionPolicy::NonInclusiveNonExclusive,
            l3_inclusion: InclusionPolicy::Inclusive,
            prefetch_policy: PrefetchPolicyKind::Intel,
            prefetch_degree: 4,
            latency: latency(4, 14, 46, 260, 24),
        },
    );
    m.insert(
        "amd-zen3",
        Preset {
            name: "amd-zen3",
            line_size: 64,
            l1_size: 32 * KB,
            l1_assoc: 8,
            l2_size: 512 * KB,
            l2_assoc: 8,
            l3_size: Some(32 * MB),
            l3_assoc: 16,
            replacement: ReplacementKind::Lru,
            l2_inclusion: InclusionPolicy::Exclusive,
            l3_inclusion: InclusionPolicy::NonInclusiveNonExclusive,
            prefetch_policy: PrefetchPolicyKind::Stream,
            prefetch_degree: 3,
            latency: latency(4, 12, 38, 210, 22),
        },
    );
    m.insert(
        "amd-zen4",
        Preset {
            name: "amd-zen4",
            line_size: 64,
            l1_size: 32 * KB,
            l1_assoc: 8,
            l2_size: 1 * MB,
            l2_assoc: 8,
            l3_size: Some(32 * MB),
            l3_assoc: 16,
            replacement: ReplacementKind::Lru,
            l2_inclusion: InclusionPolicy::Exclusive,
            l3_inclusion: InclusionPolicy::NonInclusiveNonExclusive,
            prefetch_policy: PrefetchPolicyKind::Stream,
            prefetch_degree: 3,
            latency: latency(4, 11, 35, 200, 20),
        },
    );
    m.insert(
        "amd-epyc",
        Preset {
            name: "amd-epyc",
            line_size: 64,
            l1_size: 32 * KB,
            l1_assoc: 8,
            l2_size: 1 * MB,
            l2_assoc: 8,
            l3_size: Some(256 * MB),
            l3_assoc: 16,
            replacement: ReplacementKind::Lru,
            l2_inclusion: InclusionPolicy::Exclusive,
            l3_inclusion: InclusionPolicy::NonInclusiveNonExclusive,
            prefetch_policy: PrefetchPolicyKind::Stream,
            prefetch_degree: 3,
            latency: latency(4, 12, 44, 280, 26),
        },
    );
    m.insert(
        "apple-m1",
        Preset {
            name: "apple-m1",
            line_size: 128,
            l1_size: 128 * KB,
            l1_assoc: 8,
            l2_size: 12 * MB,
            l2_assoc: 12,
            l3_size: None,
            l3_assoc: 1,
            replacement: ReplacementKind::Plru,
            l2_inclusion: InclusionPolicy::NonInclusiveNonExclusive,
            l3_inclusion: InclusionPolicy::NonInclusiveNonExclusive,
            prefetch_policy: PrefetchPolicyKind::Stream,
            prefetch_degree: 4,
            latency: latency(3, 10, 32, 190, 18),
        },
    );
    m.insert(
        "apple-m2",
        Preset {
            name: "apple-m2",
            line_size: 128,
            l1_size: 128 * KB,
            l1_assoc: 8,
            l2_size: 16 * MB,
            l2_assoc: 12,
            l3_size: None,
            l3_assoc: 1,
            replacement: ReplacementKind::Plru,
            l2_inclusion: InclusionPolicy::NonInclusiveNonExclusive,
            l3_inclusion: InclusionPolicy::NonInclusiveNonExclusive,
            prefetch_policy: PrefetchPolicyKind::Stream,
            prefetch_degree: 4,
            latency: latency(3, 10, 32, 185, 18),
        },
    );
    m.insert(
        "apple-m3",
        Preset {
            name: "apple-m3",
            line_size: 128,
            l1_size: 192 * KB,
            l1_assoc: 12,
            l2_size: 16 * MB,
            l2_assoc: 16,
            l3_size: None,
            l3_assoc: 1,
            replacement: ReplacementKind::Plru,
            l2_inclusion: InclusionPolicy::NonInclusiveNonExclusive,
            l3_inclusion: InclusionPolicy::NonInclusiveNonExclusive,
            prefetch_policy: PrefetchPolicyKind::Adaptive,
            prefetch_degree: 4,
            latency: latency(3, 9, 30, 180, 16),
        },
    );
    m.insert(
        "arm-graviton3",
        Preset {
            name: "arm-graviton3",
            line_size: 64,
            l1_size: 64 * KB,
            l1_assoc: 4,
            l2_size: 1 * MB,
            l2_assoc: 8,
            l3_size: Some(32 * MB),
            l3_assoc: 16,
            replacement: ReplacementKind::Srrip,
            l2_inclusion: InclusionPolicy::NonInclusiveNonExclusive,
            l3_inclusion: InclusionPolicy::NonInclusiveNonExclusive,
            prefetch_policy: PrefetchPolicyKind::Stride,
            prefetch_degree: 2,
            latency: latency(3, 11, 38, 230, 22),
        },
    );
    m.insert(
        "arm-rpi4",
        Preset {
            name: "arm-rpi4",
            line_size: 64,
            l1_size: 32 * KB,
            l1_assoc: 2,
            l2_size: 1 * MB,
            l2_assoc: 16,
            l3_size: None,
            l3_assoc: 1,
            replacement: ReplacementKind::Lru,
            l2_inclusion: InclusionPolicy::NonInclusiveNonExclusive,
            l3_inclusion: InclusionPolicy::NonInclusiveNonExclusive,
            prefetch_policy: PrefetchPolicyKind::None,
            prefetch_degree: 1,
            latency: latency(4, 16, 40, 260, 34),
        },
    );
    m.insert(
        "arm-embedded",
        Preset {
            name: "arm-embedded",
            line_size: 32,
            l1_size: 8 * KB,
            l1_assoc: 2,
            l2_size: 64 * KB,
            l2_assoc: 4,
            l3_size: None,
            l3_assoc: 1,
            replacement: ReplacementKind::Random,
            l2_inclusion: InclusionPolicy::NonInclusiveNonExclusive,
            l3_inclusion: InclusionPolicy::NonInclusiveNonExclusive,
            prefetch_policy: PrefetchPolicyKind::None,
            prefetch_degree: 1,
            latency: latency(2, 8, 24, 120, 15),
        },
    );
    m
});

pub fn lookup(name: &str) -> Result<Preset> {
    PRESETS.get(name).copied().ok_or_else(|| SimError::InvalidConfig {
        field: "config".into(),
        reason: format!("unknown preset {name:?}"),
    })
}

pub fn names() -> Vec<&'static str> {
    let mut v: Vec<&'static str> = PRESETS.keys().copied().collect();
    v.sort_unstable();
    v
}

/// Builds the engine's construction parameters from a preset, layering in
/// the run-level knobs (core count, fast-mode 3C disable) that a preset
/// doesn't itself decide.
pub fn engine_config_for(preset: &Preset, num_cores: usize, fast: bool, seed: u64) -> EngineConfig {
    use crate::cache::LevelConfig;

    let l1_template = LevelConfig {
        name: "l1d".into(),
        size_bytes: preset.l1_size,
        line_size: preset.line_size,
        associativity: preset.l1_assoc,
        replacement: preset.replacement,
        write_policy: WritePolicy::default(),
        inclusion: InclusionPolicy::NonInclusiveNonExclusive,
        track_3c: !fast,
        seed,
    };
    let l2 = LevelConfig {
        name: "l2".into(),
        size_bytes: preset.l2_size,
        line_size: preset.line_size,
        associativity: preset.l2_assoc,
        replacement: preset.replacement,
        write_policy: WritePolicy::default(),
        inclusion: preset.l2_inclusion,
        track_3c: !fast,
        seed: seed ^ 0x5151_5151,
    };
    let l3 = preset.l3_size.map(|size| LevelConfig {
        name: "l3".into(),
        size_bytes: size,
        line_size: preset.line_size,
        associativity: preset.l3_assoc,
        replacement: preset.replacement,
        write_policy: WritePolicy::default(),
        inclusion: preset.l3_inclusion,
        track_3c: !fast,
        seed: seed ^ 0x3232_3232,
    });

    EngineConfig {
        config_name: preset.name.to_string(),
        num_cores,
        l1_template,
        separate_l1i: false,
        l2,
        l3,
        prefetch_policy: preset.prefetch_policy,
        prefetch_degree: preset.prefetch_degree,
        dtlb: Some(crate::tlb::TlbConfig::default()),
        itlb: Some(crate::tlb::TlbConfig::default()),
        latency: preset.latency,
        block_fetch_mode: crate::engine::BlockFetchMode::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn educational_preset_is_registered() {
        let p = lookup("educational").unwrap();
        assert_eq!(p.l1_size, 4 * KB);
        assert_eq!(p.l1_assoc, 4);
    }

    #[test]
    fn unknown_preset_is_rejected() {
        assert!(lookup("nonexistent").is_err());
    }

    #[test]
    fn at_least_eleven_presets_are_defined() {
        assert!(names().len() >= 11);
    }
}
