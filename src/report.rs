//! Report serializer (spec section 4.10/6.2). A plain `serde`-derived tree;
//! no computation happens here beyond reading accumulators, matching the
//! teacher's own preference for serde_json over hand-rolled JSON writers
//! (see its `analysis`/`m5` report output).

use crate::cache::Stats as LevelStats;
use crate::prefetch::PrefetchPolicyKind;
use crate::suggest::Suggestion;
use crate::tlb::TlbStats;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelReport {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub writebacks: u64,
    pub compulsory: u64,
    pub capacity: u64,
    pub conflict: u64,
}

impl From<&LevelStats> for LevelReport {
    fn from(s: &LevelStats) -> Self {
        LevelReport {
            hits: s.hits,
            misses: s.misses,
            hit_rate: s.hit_rate(),
            writebacks: s.writebacks,
            compulsory: s.compulsory,
            capacity: s.capacity,
            conflict: s.conflict,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Levels {
    pub l1d: LevelReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub l1i: Option<LevelReport>,
    pub l2: LevelReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub l3: Option<LevelReport>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoherenceReport {
    pub invalidations: u64,
    pub false_sharing_events: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TlbReport {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

impl From<&TlbStats> for TlbReport {
    fn from(s: &TlbStats) -> Self {
        TlbReport {
            hits: s.hits,
            misses: s.misses,
            hit_rate: s.hit_rate(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TlbSection {
    pub dtlb: TlbReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub itlb: Option<TlbReport>,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TimingBreakdown {
    pub l1_hit_cycles: u64,
    pub l2_hit_cycles: u64,
    pub l3_hit_cycles: u64,
    pub memory_cycles: u64,
    pub tlb_miss_cycles: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyConfig {
    pub l1_hit: u64,
    pub l2_hit: u64,
    pub l3_hit: u64,
    pub memory: u64,
    pub tlb_miss_penalty: u64,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        LatencyConfig {
            l1_hit: 4,
            l2_hit: 12,
            l3_hit: 36,
            memory: 200,
            tlb_miss_penalty: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Timing {
    pub total_cycles: u64,
    pub avg_latency: f64,
    pub breakdown: TimingBreakdown,
    pub latency_config: LatencyConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct HotLine {
    pub file: String,
    pub line: u32,
    pub hits: u64,
    pub misses: u64,
    #[serde(rename = "missRate")]
    pub miss_rate: f64,
    pub threads: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FalseSharingAccess {
    pub thread_id: u32,
    pub offset: u32,
    pub is_write: bool,
    pub file: String,
    pub line: u32,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FalseSharingEntry {
    #[serde(rename = "cacheLineAddr")]
    pub cache_line_addr: String,
    #[serde(rename = "accessCount")]
    pub access_count: u64,
    pub accesses: Vec<FalseSharingAccess>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefetchReport {
    pub policy: String,
    pub degree: usize,
    pub issued: u64,
    pub useful: u64,
    pub accuracy: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuggestionEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: String,
    pub location: String,
    pub message: String,
    pub fix: String,
}

impl From<&Suggestion> for SuggestionEntry {
    fn from(s: &Suggestion) -> Self {
        SuggestionEntry {
            kind: s.kind.to_string(),
            severity: s.severity.as_str().to_string(),
            location: s.location.clone(),
            message: s.message.clone(),
            fix: s.fix.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheLineState {
    pub s: usize,
    pub w: usize,
    pub v: bool,
    pub t: String,
    pub st: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoreCacheState {
    pub core: usize,
    pub sets: usize,
    pub ways: usize,
    pub lines: Vec<CacheLineState>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheState {
    pub l1d: Vec<CoreCacheState>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub config: String,
    pub events: u64,
    pub sampled: bool,
    pub multicore: bool,
    pub cores: usize,
    pub levels: Levels,
    pub coherence: CoherenceReport,
    pub tlb: TlbSection,
    pub timing: Timing,
    #[serde(rename = "hotLines")]
    pub hot_lines: Vec<HotLine>,
    #[serde(rename = "falseSharing")]
    pub false_sharing: Vec<FalseSharingEntry>,
    pub prefetch: PrefetchReport,
    pub suggestions: Vec<SuggestionEntry>,
    #[serde(rename = "cacheState")]
    pub cache_state: CacheState,
}

impl Report {
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    pub fn to_string_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// A compact human-readable table, the CLI's default rendering.
    pub fn to_table(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("config: {}\n", self.config));
        out.push_str(&format!("events: {}  sampled: {}\n", self.events, self.sampled));
        out.push_str(&format!(
            "l1d:  hits={:<8} misses={:<8} hitRate={:.2}%\n",
            self.levels.l1d.hits,
            self.levels.l1d.misses,
            self.levels.l1d.hit_rate * 100.0
        ));
        if let Some(l1i) = &self.levels.l1i {
            out.push_str(&format!(
                "l1i:  hits={:<8} misses={:<8} hitRate={:.2}%\n",
                l1i.hits,
                l1i.misses,
                l1i.hit_rate * 100.0
            ));
        }
        out.push_str(&format!(
            "l2:   hits={:<8} misses={:<8} hitRate={:.2}%\n",
            self.levels.l2.hits,
            self.levels.l2.misses,
            self.levels.l2.hit_rate * 100.0
        ));
        if let Some(l3) = &self.levels.l3 {
            out.push_str(&format!(
                "l3:   hits={:<8} misses={:<8} hitRate={:.2}%\n",
                l3.hits,
                l3.misses,
                l3.hit_rate * 100.0
            ));
        }
        out.push_str(&format!(
            "coherence: invalidations={} falseSharingEvents={}\n",
            self.coherence.invalidations, self.coherence.false_sharing_events
        ));
        out.push_str(&format!(
            "timing: totalCycles={} avgLatency={:.2}\n",
            self.timing.total_cycles, self.timing.avg_latency
        ));
        if !self.suggestions.is_empty() {
            out.push_str("suggestions:\n");
            for s in &self.suggestions {
                out.push_str(&format!(
                    "  [{}] {} at {}: {}\n",
                    s.severity, s.kind, s.location, s.message
                ));
            }
        }
        out
    }
}

impl From<PrefetchPolicyKind> for &'static str {
    fn from(k: PrefetchPolicyKind) -> Self {
        match k {
            PrefetchPolicyKind::None => "none",
            PrefetchPolicyKind::NextLine => "next",
            PrefetchPolicyKind::Stream => "stream",
            PrefetchPolicyKind::Stride => "stride",
            PrefetchPolicyKind::Adaptive => "adaptive",
            PrefetchPolicyKind::Intel => "intel",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_report_hit_rate_matches_stats() {
        let mut stats = LevelStats::default();
        stats.hits = 3;
        stats.misses = 1;
        let report: LevelReport = (&stats).into();
        assert!((report.hit_rate - 0.75).abs() < 1e-12);
    }

    #[test]
    fn suggestion_entry_preserves_fields() {
        let s = Suggestion {
            kind: "poor_locality",
            severity: crate::suggest::Severity::High,
            location: "a.c:10".into(),
            message: "msg".into(),
            fix: "fix".into(),
        };
        let entry: SuggestionEntry = (&s).into();
        assert_eq!(entry.kind, "poor_locality");
        assert_eq!(entry.severity, "high");
    }
}
