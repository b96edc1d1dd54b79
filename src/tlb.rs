//! Translation lookaside buffer (spec section 4.4). A small set-associative
//! cache keyed on page number, grounded on this crate's existing
//! `simulate::memory::Tlb`, with its DRAM-timing and VIPT concerns dropped
//! (this simulator's TLB is a pure hit/miss counter, per spec section 1's
//! non-goal "TLB page-table walks beyond a single-level hit/miss counter").

use crate::error::{Result, SimError};
use lru::LruCache;
use std::num::NonZeroUsize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlbResult {
    Hit,
    Miss,
}

#[derive(Default, Clone, Debug)]
pub struct TlbStats {
    pub hits: u64,
    pub misses: u64,
}

impl TlbStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TlbConfig {
    pub page_bits: u32,
    pub num_sets: usize,
    pub ways: usize,
}

impl Default for TlbConfig {
    fn default() -> Self {
        TlbConfig {
            page_bits: 12,
            num_sets: 16,
            ways: 4,
        }
    }
}

pub struct Tlb {
    page_bits: u32,
    sets: Vec<LruCache<u64, ()>>,
    stats: TlbStats,
}

impl Tlb {
    pub fn new(config: TlbConfig) -> Result<Self> {
        if config.num_sets == 0 || !config.num_sets.is_power_of_two() {
            return Err(SimError::InvalidConfig {
                field: "tlb.num_sets".into(),
                reason: "must be a power of two".into(),
            });
        }
        if config.ways == 0 {
            return Err(SimError::InvalidConfig {
                field: "tlb.ways".into(),
                reason: "must be >= 1".into(),
            });
        }
        let sets = (0..config.num_sets)
            .map(|_| LruCache::new(NonZeroUsize::new(config.ways).unwrap()))
            .collect();
        Ok(Tlb {
            page_bits: config.page_bits,
            sets,
            stats: TlbStats::default(),
        })
    }

    fn page_number(&self, addr: u64) -> u64 {
        addr >> self.page_bits
    }

    fn set_index(&self, page: u64) -> usize {
        (page as usize) & (self.sets.len() - 1)
    }

    pub fn access(&mut self, addr: u64) -> TlbResult {
        let page = self.page_number(addr);
        let idx = self.set_index(page);
        if self.sets[idx].get(&page).is_some() {
            self.stats.hits += 1;
            TlbResult::Hit
        } else {
            self.sets[idx].put(page, ());
            self.stats.misses += 1;
            TlbResult::Miss
        }
    }

    pub fn stats(&self) -> &TlbStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_touch_misses_then_hits() {
        let mut tlb = Tlb::new(TlbConfig::default()).unwrap();
        assert_eq!(tlb.access(0x1000), TlbResult::Miss);
        assert_eq!(tlb.access(0x1000), TlbResult::Hit);
        assert_eq!(tlb.access(0x1004), TlbResult::Hit, "same page as 0x1000");
    }

    #[test]
    fn rejects_non_power_of_two_sets() {
        let cfg = TlbConfig {
            num_sets: 3,
            ..TlbConfig::default()
        };
        assert!(Tlb::new(cfg).is_err());
    }
}
