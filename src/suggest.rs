//! Optimization suggester (spec section 4.9). A post-pass over already
//! finalized accumulators; no teacher counterpart, grounded on the crate's
//! existing pattern of small enums plus a `Vec` of emitted findings.

use crate::attribution::SiteReport;
use crate::cache::Stats;
use crate::falsesharing::FalseSharingLine;
use crate::prefetch::PrefetchPolicyKind;
use crate::trace::FileTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Suggestion {
    pub kind: &'static str,
    pub severity: Severity,
    pub location: String,
    pub message: String,
    pub fix: String,
}

/// Inputs the suggester reads; all already-finalized accumulators, per the
/// "no additional computation beyond what accumulators hold" rule.
pub struct SuggestInputs<'a> {
    pub l1: &'a Stats,
    pub l2: &'a Stats,
    pub l3: Option<&'a Stats>,
    pub false_sharing_lines: &'a [FalseSharingLine],
    pub hot_lines: &'a [SiteReport],
    pub files: &'a FileTable,
    pub prefetch_policy: PrefetchPolicyKind,
    pub line_size: u64,
    /// Per hot line, whether the stride prefetcher ever fired a candidate
    /// whose originating access landed on that (file, line) site.
    pub stride_detected_lines: &'a [(u32, u32)],
}

/// Each rule fires at most once per trace.
pub fn suggest(inputs: &SuggestInputs) -> Vec<Suggestion> {
    let mut out = Vec::new();

    if let Some(first) = inputs.false_sharing_lines.first() {
        if let Some(writer) = first.accesses.iter().find(|a| a.is_write) {
            out.push(Suggestion {
                kind: "false_sharing",
                severity: Severity::High,
                location: format!(
                    "{}:{}",
                    inputs.files.resolve(writer.file),
                    writer.line_no
                ),
                message: "cache line is shared by writers on multiple threads".into(),
                fix: format!("pad to >= {} bytes", inputs.line_size),
            });
        }
    }

    let l1_miss_rate = 1.0 - inputs.l1.hit_rate();
    let l2_miss_rate = 1.0 - inputs.l2.hit_rate();
    if l1_miss_rate > 0.20 && l2_miss_rate > 0.50 {
        out.push(Suggestion {
            kind: "poor_locality",
            severity: Severity::High,
            location: "global".into(),
            message: format!(
                "L1 miss rate {:.1}% and L2 miss rate {:.1}% indicate poor spatial/temporal locality",
                l1_miss_rate * 100.0,
                l2_miss_rate * 100.0
            ),
            fix: "restructure loops for cache-friendly access order".into(),
        });
    }

    if let Some(&(file, line)) = inputs.stride_detected_lines.iter().find(|&&(file, line)| {
        inputs
            .hot_lines
            .iter()
            .any(|h| h.file.0 == file && h.line == line)
    }) {
        out.push(Suggestion {
            kind: "consider_tiling",
            severity: Severity::Medium,
            location: format!("{}:{}", inputs.files.resolve(crate::trace::FileId(file)), line),
            message: "strided access pattern detected on a hot line".into(),
            fix: "tile the loop to reuse cached data before eviction".into(),
        });
    }

    if let Some(l3) = inputs.l3 {
        let l3_miss_rate = 1.0 - l3.hit_rate();
        if l3_miss_rate > 0.30 {
            if let Some(hot) = inputs.hot_lines.first() {
                out.push(Suggestion {
                    kind: "working_set_exceeds_cache",
                    severity: Severity::Medium,
                    location: format!("{}:{}", inputs.files.resolve(hot.file), hot.line),
                    message: format!(
                        "L3 miss rate {:.1}% on the hottest line suggests the working set exceeds cache capacity",
                        l3_miss_rate * 100.0
                    ),
                    fix: "reduce working-set size or block the computation".into(),
                });
            }
        }
    }

    out
}
