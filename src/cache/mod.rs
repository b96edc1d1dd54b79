pub mod level;
pub mod replacement;

pub use level::{
    AccessOutcome, AccessResult, CacheLevel, CoherenceState, Eviction, InclusionPolicy,
    LevelConfig, MissKind, Stats, WriteAllocate, WritePolicy, WriteThrough,
};
pub use replacement::ReplacementKind;
