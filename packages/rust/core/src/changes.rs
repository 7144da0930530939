//! Leadership change detection: diff an old roster snapshot against a
//! freshly resolved roster.
//!
//! Matching is fuzzy (normalized-name similarity, greedy best-score-first,
//! one-to-one). Matched pairs with equal normalized titles are no change;
//! differing titles classify as promotion/demotion/lateral against the
//! fixed seniority ladder. New-only entries are hires; old-only entries are
//! departures — absence-based inference, so their confidence is a tunable
//! that defaults low.

use tracing::{debug, instrument};
use uuid::Uuid;

use orgscope_shared::matching::{
    name_similarity, normalize_person_name, normalize_title, score_significance, seniority_rank,
    title_level,
};
use orgscope_shared::{
    ChangeType, Confidence, LeadershipChange, Position, TitleLevel, UnitId,
};

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// One roster line, the minimal shape both snapshots share.
#[derive(Debug, Clone)]
pub struct RosterEntry {
    pub name: String,
    pub title: String,
    pub is_board: bool,
}

impl RosterEntry {
    pub fn new(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            is_board: false,
        }
    }
}

impl From<&Position> for RosterEntry {
    fn from(position: &Position) -> Self {
        Self {
            name: position.full_name.clone(),
            title: position.title.clone(),
            is_board: position.is_board_member,
        }
    }
}

/// Detector tuning.
#[derive(Debug, Clone)]
pub struct DetectOptions {
    /// Minimum name similarity for two entries to be the same person.
    pub similarity_threshold: f64,
    /// Confidence assigned to absence-based departure inference.
    pub departure_confidence: Confidence,
    /// Changes below this significance are not reported.
    pub min_significance: u8,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            departure_confidence: Confidence::Low,
            min_significance: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Diff `old` against `new` and emit typed change events.
#[instrument(skip_all, fields(unit = %unit_id, old = old.len(), new = new.len()))]
pub fn detect_changes(
    unit_id: &UnitId,
    old: &[RosterEntry],
    new: &[RosterEntry],
    options: &DetectOptions,
) -> Vec<LeadershipChange> {
    // All candidate pairs above the threshold, best score first. Ties break
    // on index order so detection is deterministic.
    let mut candidates: Vec<(usize, usize, f64)> = Vec::new();
    for (i, old_entry) in old.iter().enumerate() {
        for (j, new_entry) in new.iter().enumerate() {
            let score = name_similarity(&old_entry.name, &new_entry.name);
            if score >= options.similarity_threshold {
                candidates.push((i, j, score));
            }
        }
    }
    candidates.sort_by(|a, b| {
        b.2.partial_cmp(&a.2)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
            .then_with(|| a.1.cmp(&b.1))
    });

    // Greedy one-to-one assignment.
    let mut old_matched = vec![false; old.len()];
    let mut new_matched = vec![false; new.len()];
    let mut pairs: Vec<(usize, usize)> = Vec::new();
    for (i, j, _score) in candidates {
        if !old_matched[i] && !new_matched[j] {
            old_matched[i] = true;
            new_matched[j] = true;
            pairs.push((i, j));
        }
    }

    let mut changes: Vec<LeadershipChange> = Vec::new();

    // Matched pairs: title movement.
    for (i, j) in pairs {
        let old_entry = &old[i];
        let new_entry = &new[j];

        if normalize_title(&old_entry.title) == normalize_title(&new_entry.title) {
            continue;
        }

        let old_rank = seniority_rank(&old_entry.title);
        let new_rank = seniority_rank(&new_entry.title);
        let change_type = match new_rank.cmp(&old_rank) {
            std::cmp::Ordering::Greater => ChangeType::Promotion,
            std::cmp::Ordering::Less => ChangeType::Demotion,
            std::cmp::Ordering::Equal => ChangeType::Lateral,
        };

        changes.push(build_change(
            unit_id,
            &new_entry.name,
            change_type,
            Some(old_entry.title.clone()),
            Some(new_entry.title.clone()),
            old_entry.is_board || new_entry.is_board,
            Confidence::Medium,
        ));
    }

    // New-only entries: hires.
    for (j, new_entry) in new.iter().enumerate() {
        if !new_matched[j] {
            changes.push(build_change(
                unit_id,
                &new_entry.name,
                ChangeType::Hire,
                None,
                Some(new_entry.title.clone()),
                new_entry.is_board,
                Confidence::Medium,
            ));
        }
    }

    // Old-only entries: departures. Absence-based, hence the tunable
    // (default low) confidence.
    for (i, old_entry) in old.iter().enumerate() {
        if !old_matched[i] {
            changes.push(build_change(
                unit_id,
                &old_entry.name,
                ChangeType::Departure,
                Some(old_entry.title.clone()),
                None,
                old_entry.is_board,
                options.departure_confidence,
            ));
        }
    }

    changes.retain(|c| c.significance >= options.min_significance);

    debug!(changes = changes.len(), "change detection complete");
    changes
}

fn build_change(
    unit_id: &UnitId,
    person_name: &str,
    change_type: ChangeType,
    old_title: Option<String>,
    new_title: Option<String>,
    is_board: bool,
    confidence: Confidence,
) -> LeadershipChange {
    let is_c_suite = [old_title.as_deref(), new_title.as_deref()]
        .into_iter()
        .flatten()
        .any(|t| matches!(title_level(t), TitleLevel::CSuite));

    let significance = score_significance(
        change_type,
        old_title.as_deref(),
        new_title.as_deref(),
        is_c_suite,
        is_board,
        confidence,
    );

    LeadershipChange {
        id: Uuid::now_v7().to_string(),
        unit_id: unit_id.clone(),
        person_name: person_name.to_string(),
        normalized_name: normalize_person_name(person_name),
        change_type,
        old_title,
        new_title,
        announced_date: None,
        effective_date: None,
        is_c_suite,
        is_board,
        significance,
        confidence,
        source_type: Some("roster_diff".into()),
        source_url: None,
        detail: None,
    }
}
