//! Entity resolution: reconcile raw person/change records into canonical
//! rows.
//!
//! Two dedup problems share one algorithm (match, merge, keep the highest
//! confidence):
//! - person identity — external-profile URL when present, otherwise
//!   normalized name scoped to one unit;
//! - change identity — exact (normalized name, change type, date) key,
//!   no fuzzy matching, because changes are transient events.
//!
//! The person merge is commutative and idempotent: records are folded in a
//! deterministic order, each optional field keeps its first non-empty
//! value, boolean flags OR together, and confidence promotes to the
//! highest seen.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, instrument};
use uuid::Uuid;

use orgscope_shared::matching::{
    management_level, normalize_person_name, normalize_title, title_level,
};
use orgscope_shared::{
    ExtractedPerson, LeadershipChange, Position, Result, TitleLevel, UnitId,
};
use orgscope_storage::Storage;

// ---------------------------------------------------------------------------
// In-memory person dedup
// ---------------------------------------------------------------------------

/// Trim a profile URL to its canonical form (trailing slash, case).
fn normalize_profile_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_lowercase()
}

/// Records with more evidence come first so the fold is order-independent:
/// the sorted sequence is the same no matter how the input was ordered.
fn evidence_order(a: &ExtractedPerson, b: &ExtractedPerson) -> std::cmp::Ordering {
    b.confidence
        .cmp(&a.confidence)
        .then_with(|| field_count(b).cmp(&field_count(a)))
        .then_with(|| a.full_name.cmp(&b.full_name))
        .then_with(|| a.title.cmp(&b.title))
        .then_with(|| a.source_url.cmp(&b.source_url))
}

fn field_count(p: &ExtractedPerson) -> usize {
    [
        p.department.is_some(),
        p.bio.is_some(),
        p.linkedin_url.is_some(),
        p.email.is_some(),
        p.photo_url.is_some(),
        p.reports_to_name.is_some(),
    ]
    .iter()
    .filter(|present| **present)
    .count()
}

fn fill(slot: &mut Option<String>, value: &Option<String>) {
    if slot.as_deref().is_none_or(str::is_empty) {
        if let Some(value) = value {
            if !value.is_empty() {
                *slot = Some(value.clone());
            }
        }
    }
}

/// Merge `incoming` into `base`: fill gaps, never overwrite with less.
fn merge_extracted(base: &mut ExtractedPerson, incoming: &ExtractedPerson) {
    if base.title.is_empty() && !incoming.title.is_empty() {
        base.title = incoming.title.clone();
        base.title_level = incoming.title_level;
    }
    fill(&mut base.department, &incoming.department);
    fill(&mut base.bio, &incoming.bio);
    fill(&mut base.linkedin_url, &incoming.linkedin_url);
    fill(&mut base.email, &incoming.email);
    fill(&mut base.photo_url, &incoming.photo_url);
    fill(&mut base.reports_to_name, &incoming.reports_to_name);
    fill(&mut base.source_url, &incoming.source_url);
    base.is_board_member |= incoming.is_board_member;
    base.is_executive |= incoming.is_executive;
    base.confidence = base.confidence.max(incoming.confidence);

    // Provenance accumulates, sorted for determinism.
    let mut notes: Vec<&str> = base
        .provenance
        .iter()
        .chain(incoming.provenance.iter())
        .flat_map(|p| p.split('+'))
        .collect();
    notes.sort_unstable();
    notes.dedup();
    if !notes.is_empty() {
        base.provenance = Some(notes.join("+"));
    }
}

/// Deduplicate one unit's extracted people.
///
/// Matching is by normalized profile URL when present, otherwise by
/// normalized full name. The output order is deterministic regardless of
/// input order, which makes the whole merge commutative.
pub fn dedup_people(people: Vec<ExtractedPerson>) -> Vec<ExtractedPerson> {
    // Profile URL → group key for records that carry one; a profile group
    // also claims its names so URL-less records join by name.
    let mut profile_keys: HashMap<String, String> = HashMap::new();
    for person in &people {
        if let Some(url) = &person.linkedin_url {
            let profile = normalize_profile_url(url);
            let name = normalize_person_name(&person.full_name);
            if !name.is_empty() {
                profile_keys.entry(name).or_insert(profile);
            }
        }
    }

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<ExtractedPerson>> = HashMap::new();

    for person in people {
        let name = normalize_person_name(&person.full_name);
        if name.is_empty() {
            continue;
        }
        let key = match &person.linkedin_url {
            Some(url) => format!("profile:{}", normalize_profile_url(url)),
            None => match profile_keys.get(&name) {
                Some(profile) => format!("profile:{profile}"),
                None => format!("name:{name}"),
            },
        };
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(person);
    }

    // Deterministic output order: sort group keys, then fold each group in
    // evidence order.
    order.sort_unstable();

    let mut merged = Vec::with_capacity(order.len());
    for key in order {
        let mut group = groups.remove(&key).unwrap_or_default();
        group.sort_by(evidence_order);

        let mut iter = group.into_iter();
        let Some(mut base) = iter.next() else { continue };
        for incoming in iter {
            merge_extracted(&mut base, &incoming);
        }
        merged.push(base);
    }

    merged
}

// ---------------------------------------------------------------------------
// Change dedup
// ---------------------------------------------------------------------------

/// Deduplicate change records by exact (normalized name, type, date) key,
/// keeping the most significant record for each key.
pub fn dedup_changes(changes: Vec<LeadershipChange>) -> Vec<LeadershipChange> {
    let mut sorted = changes;
    sorted.sort_by(|a, b| {
        b.significance
            .cmp(&a.significance)
            .then_with(|| b.confidence.cmp(&a.confidence))
            .then_with(|| a.normalized_name.cmp(&b.normalized_name))
    });

    let mut seen: std::collections::HashSet<(String, &'static str, Option<chrono::NaiveDate>)> =
        std::collections::HashSet::new();
    let mut out = Vec::new();
    for change in sorted {
        let key = (
            change.normalized_name.clone(),
            change.change_type.as_str(),
            change.key_date(),
        );
        if seen.insert(key) {
            out.push(change);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Counters from one unit's resolution pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveStats {
    /// Distinct people after dedup.
    pub found: usize,
    /// New canonical rows created.
    pub created: usize,
    /// Existing canonical rows merged/updated.
    pub updated: usize,
}

/// Build a fresh [`Position`] from a deduplicated extraction.
fn position_from_extracted(unit_id: &UnitId, person: &ExtractedPerson) -> Position {
    let now = Utc::now();
    let level = if person.title_level == TitleLevel::Unknown {
        title_level(&person.title)
    } else {
        person.title_level
    };
    Position {
        id: Uuid::now_v7().to_string(),
        unit_id: unit_id.clone(),
        full_name: person.full_name.clone(),
        normalized_name: normalize_person_name(&person.full_name),
        title: person.title.clone(),
        title_level: level,
        management_level: management_level(&person.title),
        reports_to_id: None,
        department: person.department.clone(),
        bio: person.bio.clone(),
        linkedin_url: person.linkedin_url.clone(),
        email: person.email.clone(),
        photo_url: person.photo_url.clone(),
        is_board_member: person.is_board_member,
        is_executive: person.is_executive,
        confidence: person.confidence,
        data_sources: person.provenance.iter().cloned().collect(),
        is_current: true,
        first_seen: now,
        last_seen: now,
    }
}

/// Merge an extraction into an existing canonical row: fill gaps, OR the
/// flags, promote confidence, union the data sources.
fn merge_into_position(mut existing: Position, person: &ExtractedPerson) -> Position {
    fill(&mut existing.department, &person.department);
    fill(&mut existing.bio, &person.bio);
    fill(&mut existing.linkedin_url, &person.linkedin_url);
    fill(&mut existing.email, &person.email);
    fill(&mut existing.photo_url, &person.photo_url);
    existing.is_board_member |= person.is_board_member;
    existing.is_executive |= person.is_executive;
    existing.confidence = existing.confidence.max(person.confidence);

    if let Some(provenance) = &person.provenance {
        for source in provenance.split('+') {
            if !existing.data_sources.iter().any(|s| s == source) {
                existing.data_sources.push(source.to_string());
            }
        }
        existing.data_sources.sort_unstable();
    }

    existing.last_seen = Utc::now();
    existing
}

/// Whether an extraction reports a materially different title than the
/// stored row (after title normalization).
fn title_changed(existing: &Position, person: &ExtractedPerson) -> bool {
    !person.title.is_empty() && normalize_title(&person.title) != normalize_title(&existing.title)
}

/// Resolve one unit's extracted people into canonical positions.
///
/// New names create rows; known names are merged in place; a known name
/// with a materially different title supersedes the old row (never
/// deletes it) and starts a new one carrying the merged fields forward.
#[instrument(skip_all, fields(unit = %unit_id, raw = people.len()))]
pub async fn resolve_people(
    storage: &Storage,
    unit_id: &UnitId,
    people: Vec<ExtractedPerson>,
) -> Result<ResolveStats> {
    let deduped = dedup_people(people);

    let mut stats = ResolveStats {
        found: deduped.len(),
        ..Default::default()
    };

    for person in &deduped {
        let normalized = normalize_person_name(&person.full_name);
        if normalized.is_empty() {
            continue;
        }

        match storage.get_current_position(unit_id, &normalized).await? {
            None => {
                storage
                    .insert_position(&position_from_extracted(unit_id, person))
                    .await?;
                stats.created += 1;
            }
            Some(existing) => {
                if title_changed(&existing, person) {
                    // Supersede: keep the history row, start a fresh one
                    // with the new title and merged fields.
                    storage.supersede_position(&existing.id).await?;
                    let mut replacement =
                        merge_into_position(existing.clone(), person);
                    replacement.id = Uuid::now_v7().to_string();
                    replacement.title = person.title.clone();
                    replacement.title_level = if person.title_level == TitleLevel::Unknown {
                        title_level(&person.title)
                    } else {
                        person.title_level
                    };
                    replacement.management_level = management_level(&person.title);
                    replacement.first_seen = existing.first_seen;
                    replacement.is_current = true;
                    storage.insert_position(&replacement).await?;
                } else {
                    storage
                        .update_position(&merge_into_position(existing, person))
                        .await?;
                }
                stats.updated += 1;
            }
        }
    }

    debug!(
        found = stats.found,
        created = stats.created,
        updated = stats.updated,
        "resolution complete"
    );
    Ok(stats)
}
