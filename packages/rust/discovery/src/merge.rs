//! Candidate merging: normalize, group, keep the best source, fill gaps.
//!
//! Priority order is fixed: registry > website > general-knowledge. Within a
//! normalized-name group the highest-priority source's fields win, and gaps
//! (website, description, domains, jurisdiction, ownership) are filled from
//! lower-priority sources rather than discarded.

use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

use orgscope_shared::matching::normalize_unit_name;
use orgscope_shared::{DiscoverySource, UnitType};

// ---------------------------------------------------------------------------
// Candidate types
// ---------------------------------------------------------------------------

/// A unit candidate as produced by one discovery signal.
#[derive(Debug, Clone)]
pub struct UnitCandidate {
    pub name: String,
    pub source: DiscoverySource,
    pub website: Option<String>,
    pub description: Option<String>,
    pub domains: Vec<String>,
    pub unit_type: UnitType,
    pub jurisdiction: Option<String>,
    pub ownership_pct: Option<f64>,
    pub registry_id: Option<String>,
    pub is_public: bool,
}

impl UnitCandidate {
    pub fn new(name: impl Into<String>, source: DiscoverySource) -> Self {
        Self {
            name: name.into(),
            source,
            website: None,
            description: None,
            domains: Vec::new(),
            unit_type: UnitType::Subsidiary,
            jurisdiction: None,
            ownership_pct: None,
            registry_id: None,
            is_public: false,
        }
    }
}

/// The deduplicated result of merging every signal's candidates.
#[derive(Debug, Clone)]
pub struct MergedUnit {
    pub name: String,
    pub normalized_name: String,
    pub website: Option<String>,
    pub description: Option<String>,
    pub domains: Vec<String>,
    pub unit_type: UnitType,
    pub jurisdiction: Option<String>,
    pub ownership_pct: Option<f64>,
    pub registry_id: Option<String>,
    pub is_public: bool,
    /// Contributing signals, highest priority first.
    pub sources: Vec<DiscoverySource>,
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
    if slot.is_none() {
        *slot = value;
    }
}

/// Merge candidates from all signals into a deduplicated unit list, apply
/// the shell-company filter, and cap at `max_units`.
pub fn merge_candidates(candidates: Vec<UnitCandidate>, max_units: usize) -> Vec<MergedUnit> {
    // Group by normalized name, preserving first-seen order.
    let mut order: Vec<String> = Vec::new();
    let mut groups: std::collections::HashMap<String, Vec<UnitCandidate>> =
        std::collections::HashMap::new();

    for candidate in candidates {
        let key = normalize_unit_name(&candidate.name);
        if key.is_empty() {
            continue;
        }
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(candidate);
    }

    let mut merged: Vec<MergedUnit> = Vec::new();

    for key in order {
        let mut group = groups.remove(&key).unwrap_or_default();
        // Highest-priority source first; stable within one source.
        group.sort_by(|a, b| b.source.cmp(&a.source));

        let mut sources: Vec<DiscoverySource> = group.iter().map(|c| c.source).collect();
        sources.dedup();

        let mut iter = group.into_iter();
        let best = match iter.next() {
            Some(best) => best,
            None => continue,
        };

        let mut unit = MergedUnit {
            name: best.name,
            normalized_name: key,
            website: best.website,
            description: best.description,
            domains: best.domains,
            unit_type: best.unit_type,
            jurisdiction: best.jurisdiction,
            ownership_pct: best.ownership_pct,
            registry_id: best.registry_id,
            is_public: best.is_public,
            sources,
        };

        // Fill gaps from lower-priority candidates; never overwrite.
        for lower in iter {
            fill(&mut unit.website, lower.website);
            fill(&mut unit.description, lower.description);
            fill(&mut unit.jurisdiction, lower.jurisdiction);
            fill(&mut unit.ownership_pct, lower.ownership_pct);
            fill(&mut unit.registry_id, lower.registry_id);
            if unit.domains.is_empty() {
                unit.domains = lower.domains;
            }
            unit.is_public |= lower.is_public;
        }

        merged.push(unit);
    }

    let before_filter = merged.len();
    merged.retain(|unit| !is_shell_entity(unit));
    if merged.len() < before_filter {
        debug!(
            dropped = before_filter - merged.len(),
            "shell-company filter removed candidates"
        );
    }

    if merged.len() > max_units {
        debug!(
            kept = max_units,
            dropped = merged.len() - max_units,
            "unit cap applied"
        );
        merged.truncate(max_units);
    }

    merged
}

// ---------------------------------------------------------------------------
// Shell-company filter
// ---------------------------------------------------------------------------

fn shell_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(holdings?|trust|funding|finance|financing|insurance|reinsurance|assurance)\b")
            .expect("valid shell pattern")
    })
}

/// Whether a merged unit looks like a legal shell rather than an operating
/// business. A website or description is taken as evidence of real
/// operations and overrides the name pattern.
fn is_shell_entity(unit: &MergedUnit) -> bool {
    if !shell_pattern().is_match(&unit.name) {
        return false;
    }
    let has_operations = unit.website.is_some()
        || unit
            .description
            .as_deref()
            .is_some_and(|d| !d.trim().is_empty());
    !has_operations
}
