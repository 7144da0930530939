//! Org-chart inference: four ordered passes over a unit's current roster.
//!
//! 1. Title → management level (deterministic keyword table).
//! 2. Division grouping (one batched classification call; falls back to a
//!    single "Corporate" bucket — the build never fails on a bad answer).
//! 3. Reporting-chain inference (level 2 reports to level 1
//!    deterministically; within a division a classification call maps the
//!    rest, falling back to "reports to the division head").
//! 4. Persist: hierarchy fields on positions, a single-rooted nested tree,
//!    and the (unit, day) snapshot upsert.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use orgscope_shared::matching::{management_level, normalize_person_name};
use orgscope_shared::{
    Classifier, ClassifyTask, OrgChartSnapshot, OrgNode, OrgScopeError, Position, Result, UnitId,
};
use orgscope_storage::Storage;

use crate::classify::classify_cached;

/// The bucket every person lands in when division grouping is unavailable.
const DEFAULT_DIVISION: &str = "Corporate";

// ---------------------------------------------------------------------------
// Working state
// ---------------------------------------------------------------------------

/// One roster member being arranged into the chart.
#[derive(Debug, Clone)]
struct Member {
    position: Position,
    normalized: String,
    level: u8,
    division: String,
    reports_to: Option<String>,
}

/// Deterministic ordering: most senior first, name as tie-break.
fn seniority_order(a: &Member, b: &Member) -> std::cmp::Ordering {
    a.level
        .cmp(&b.level)
        .then_with(|| a.normalized.cmp(&b.normalized))
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Build (and persist) the org chart for one unit's current roster.
#[instrument(skip_all, fields(unit = %unit_id))]
pub async fn build_org_chart(
    storage: &Storage,
    classifier: &dyn Classifier,
    model: &str,
    unit_id: &UnitId,
) -> Result<OrgChartSnapshot> {
    let roster = storage.current_positions(unit_id).await?;
    if roster.is_empty() {
        return Err(OrgScopeError::validation(format!(
            "unit {unit_id} has no current roster"
        )));
    }

    let unit = storage
        .get_unit(unit_id)
        .await?
        .ok_or_else(|| OrgScopeError::not_found(format!("unit {unit_id}")))?;

    // --- Pass 1: title → level (deterministic) ---
    let mut members: Vec<Member> = roster
        .into_iter()
        .map(|position| {
            let level = management_level(&position.title);
            Member {
                normalized: position.normalized_name.clone(),
                level,
                division: DEFAULT_DIVISION.to_string(),
                reports_to: None,
                position,
            }
        })
        .collect();
    members.sort_by(seniority_order);

    // --- Pass 2: division grouping (classification, Corporate fallback) ---
    let divisions = group_divisions(storage, classifier, model, &members).await;
    for member in &mut members {
        if let Some(division) = divisions.get(&member.normalized) {
            member.division = division.clone();
        }
    }

    // --- Pass 3: reporting-chain inference ---
    infer_reporting(storage, classifier, model, &mut members).await;

    // --- Pass 4: persist hierarchy, build tree, upsert snapshot ---
    for member in &members {
        storage
            .set_position_hierarchy(
                &member.position.id,
                member.level,
                member.reports_to.as_deref(),
                Some(&member.division),
            )
            .await?;
    }

    let tree = build_tree(&members, &unit.name);
    let max_depth = tree.depth();

    let mut departments: Vec<String> = members
        .iter()
        .map(|m| m.division.clone())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    departments.sort_unstable();

    let snapshot = OrgChartSnapshot {
        unit_id: unit_id.clone(),
        snapshot_date: Utc::now().date_naive(),
        tree,
        max_depth,
        departments,
    };
    storage.upsert_snapshot(&snapshot).await?;

    info!(
        members = members.len(),
        departments = snapshot.departments.len(),
        max_depth = snapshot.max_depth,
        "org chart built"
    );
    Ok(snapshot)
}

// ---------------------------------------------------------------------------
// Pass 2: division grouping
// ---------------------------------------------------------------------------

/// Ask the classifier to group the full roster into divisions. Any failure
/// or malformed answer leaves everyone in the default bucket.
async fn group_divisions(
    storage: &Storage,
    classifier: &dyn Classifier,
    model: &str,
    members: &[Member],
) -> HashMap<String, String> {
    let roster_json = serde_json::to_string(
        &members
            .iter()
            .map(|m| {
                serde_json::json!({
                    "name": m.position.full_name,
                    "title": m.position.title,
                })
            })
            .collect::<Vec<_>>(),
    )
    .unwrap_or_default();

    let task = ClassifyTask::new(
        "division_grouping",
        "Group these people into business divisions by their titles. \
         Respond with a JSON object mapping each person's name to a division name.",
    )
    .with_context(roster_json);

    let answer = match classify_cached(storage, classifier, model, &task).await {
        Ok(Some(answer)) => answer,
        Ok(None) => {
            debug!("division grouping unavailable, defaulting to one bucket");
            return HashMap::new();
        }
        Err(e) => {
            warn!(error = %e, "division grouping failed, defaulting to one bucket");
            return HashMap::new();
        }
    };

    // Accept either a bare map or {"divisions": {...}}.
    let map = answer
        .get("divisions")
        .and_then(|v| v.as_object())
        .or_else(|| answer.as_object());

    let Some(map) = map else {
        warn!("division answer had unexpected shape, defaulting to one bucket");
        return HashMap::new();
    };

    map.iter()
        .filter_map(|(name, division)| {
            let division = division.as_str()?.trim();
            if division.is_empty() {
                return None;
            }
            Some((normalize_person_name(name), division.to_string()))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Pass 3: reporting inference
// ---------------------------------------------------------------------------

async fn infer_reporting(
    storage: &Storage,
    classifier: &dyn Classifier,
    model: &str,
    members: &mut [Member],
) {
    // The unit head: most senior member overall (members are already in
    // seniority order).
    let Some(head) = members.first().cloned() else {
        return;
    };

    // Division heads: most senior member of each division.
    let mut division_heads: HashMap<String, Member> = HashMap::new();
    for member in members.iter() {
        division_heads
            .entry(member.division.clone())
            .or_insert_with(|| member.clone());
    }

    // Collect classifier answers per division before mutating.
    let mut division_maps: HashMap<String, HashMap<String, String>> = HashMap::new();
    for (division, division_head) in &division_heads {
        let below: Vec<&Member> = members
            .iter()
            .filter(|m| {
                m.division == *division
                    && m.position.id != division_head.position.id
                    && m.position.id != head.position.id
                    && m.level > 2
            })
            .collect();
        if below.is_empty() {
            continue;
        }
        division_maps.insert(
            division.clone(),
            infer_division_reports(storage, classifier, model, division, division_head, &below)
                .await,
        );
    }

    // Resolve names → position ids for the whole roster.
    let ids_by_name: HashMap<String, String> = members
        .iter()
        .map(|m| (m.normalized.clone(), m.position.id.clone()))
        .collect();

    for member in members.iter_mut() {
        if member.position.id == head.position.id {
            member.reports_to = None;
            continue;
        }

        // Co-equal level-1 people are additional roots, not reports.
        if member.level <= 1 {
            member.reports_to = None;
            continue;
        }

        // Level 2 reports to the level-1 head, no inference needed.
        if member.level == 2 {
            member.reports_to = Some(head.position.id.clone());
            continue;
        }

        let division_head = division_heads
            .get(&member.division)
            .unwrap_or(&head);

        // A division head answers to the unit head.
        if member.position.id == division_head.position.id {
            member.reports_to = Some(head.position.id.clone());
            continue;
        }

        // Everyone else: the classifier's mapping, or the division head.
        let inferred = division_maps
            .get(&member.division)
            .and_then(|map| map.get(&member.normalized))
            .and_then(|manager| ids_by_name.get(manager))
            // Self-reports are malformed answers.
            .filter(|id| **id != member.position.id);

        member.reports_to = Some(
            inferred
                .cloned()
                .unwrap_or_else(|| division_head.position.id.clone()),
        );
    }
}

/// One classification call for a division's reporting chain. Returns
/// normalized-name → normalized-manager-name; empty on any failure.
async fn infer_division_reports(
    storage: &Storage,
    classifier: &dyn Classifier,
    model: &str,
    division: &str,
    division_head: &Member,
    below: &[&Member],
) -> HashMap<String, String> {
    let roster_json = serde_json::to_string(
        &below
            .iter()
            .map(|m| {
                serde_json::json!({
                    "name": m.position.full_name,
                    "title": m.position.title,
                })
            })
            .collect::<Vec<_>>(),
    )
    .unwrap_or_default();

    let task = ClassifyTask::new(
        "reporting_chain",
        format!(
            "These people work in the {division} division under {} ({}). \
             Respond with a JSON object mapping each person's name to the name \
             of their most likely direct manager.",
            division_head.position.full_name, division_head.position.title,
        ),
    )
    .with_context(roster_json);

    let answer = match classify_cached(storage, classifier, model, &task).await {
        Ok(Some(answer)) => answer,
        Ok(None) => return HashMap::new(),
        Err(e) => {
            warn!(division, error = %e, "reporting inference failed, using division head");
            return HashMap::new();
        }
    };

    let Some(map) = answer.as_object() else {
        return HashMap::new();
    };

    map.iter()
        .filter_map(|(name, manager)| {
            let manager = manager.as_str()?;
            Some((
                normalize_person_name(name),
                normalize_person_name(manager),
            ))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Pass 4: tree building
// ---------------------------------------------------------------------------

/// Assemble the nested tree. Multiple roots are wrapped in a synthesized
/// virtual root so the tree is always single-rooted.
fn build_tree(members: &[Member], unit_name: &str) -> OrgNode {
    let mut children_of: HashMap<String, Vec<&Member>> = HashMap::new();
    let mut roots: Vec<&Member> = Vec::new();

    let known_ids: HashSet<&str> = members.iter().map(|m| m.position.id.as_str()).collect();

    for member in members {
        match member
            .reports_to
            .as_deref()
            .filter(|id| known_ids.contains(id))
        {
            Some(manager_id) => children_of
                .entry(manager_id.to_string())
                .or_default()
                .push(member),
            None => roots.push(member),
        }
    }

    let mut visited: HashSet<String> = HashSet::new();
    let mut root_nodes: Vec<OrgNode> = roots
        .iter()
        .map(|member| to_node(member, &children_of, &mut visited))
        .collect();

    if root_nodes.len() == 1 {
        root_nodes.remove(0)
    } else {
        OrgNode {
            position_id: String::new(),
            full_name: unit_name.to_string(),
            title: String::new(),
            management_level: 0,
            department: None,
            reports: root_nodes,
        }
    }
}

fn to_node(
    member: &Member,
    children_of: &HashMap<String, Vec<&Member>>,
    visited: &mut HashSet<String>,
) -> OrgNode {
    // Cycle guard: a malformed reporting edge never loops the tree.
    visited.insert(member.position.id.clone());

    let reports = children_of
        .get(&member.position.id)
        .map(|children| {
            let mut nodes = Vec::new();
            for child in children {
                if !visited.contains(&child.position.id) {
                    nodes.push(to_node(child, children_of, visited));
                }
            }
            nodes
        })
        .unwrap_or_default();

    OrgNode {
        position_id: member.position.id.clone(),
        full_name: member.position.full_name.clone(),
        title: member.position.title.clone(),
        management_level: member.level,
        department: Some(member.division.clone()),
        reports,
    }
}

// ---------------------------------------------------------------------------
// Functional variant
// ---------------------------------------------------------------------------

/// A cross-unit functional leadership chart (not persisted).
#[derive(Debug, Clone)]
pub struct FunctionalChart {
    pub function: String,
    pub tree: OrgNode,
    pub members: usize,
}

/// Title/department keywords per supported function; an unknown function
/// falls back to matching the raw function word itself.
fn function_keywords(function: &str) -> Vec<String> {
    let canned: &[(&str, &[&str])] = &[
        (
            "technology",
            &["cto", "cio", "technology", "engineering", "information", "digital", "data", "software"],
        ),
        (
            "finance",
            &["cfo", "finance", "financial", "accounting", "treasury", "controller"],
        ),
        ("marketing", &["cmo", "marketing", "brand", "communications"]),
        ("people", &["chro", "people", "human", "talent"]),
        ("legal", &["legal", "counsel", "compliance"]),
        ("operations", &["coo", "operations", "operating", "supply"]),
    ];

    let lowered = function.to_lowercase();
    for (name, keywords) in canned {
        if *name == lowered {
            return keywords.iter().map(|k| k.to_string()).collect();
        }
    }
    vec![lowered]
}

fn matches_function(position: &Position, keywords: &[String]) -> bool {
    let haystack = format!(
        "{} {}",
        position.title.to_lowercase(),
        position.department.as_deref().unwrap_or("").to_lowercase()
    );
    keywords
        .iter()
        .any(|k| haystack.split(|c: char| !c.is_alphanumeric()).any(|t| t == *k))
}

/// Build a functional leadership chart across the parent and its children.
///
/// Reuses the deterministic level assignment plus a function keyword
/// filter, and infers the cross-unit edge: each subsidiary's top
/// functional officer reports to the parent's top functional officer when
/// no explicit edge already exists.
#[instrument(skip_all, fields(parent = %parent_id, function))]
pub async fn build_functional_chart(
    storage: &Storage,
    parent_id: &UnitId,
    function: &str,
) -> Result<FunctionalChart> {
    let parent = storage
        .get_unit(parent_id)
        .await?
        .ok_or_else(|| OrgScopeError::not_found(format!("unit {parent_id}")))?;
    let keywords = function_keywords(function);

    // Gather matching members from the parent and every child unit.
    let mut units = vec![parent.clone()];
    units.extend(storage.list_children(parent_id).await?);

    let mut members: Vec<Member> = Vec::new();
    let mut unit_of: HashMap<String, UnitId> = HashMap::new();

    for unit in &units {
        for position in storage.current_positions(&unit.id).await? {
            if !matches_function(&position, &keywords) {
                continue;
            }
            unit_of.insert(position.id.clone(), unit.id.clone());
            members.push(Member {
                normalized: position.normalized_name.clone(),
                level: management_level(&position.title),
                division: unit.name.clone(),
                reports_to: position.reports_to_id.clone(),
                position,
            });
        }
    }

    if members.is_empty() {
        return Err(OrgScopeError::validation(format!(
            "no {function} leadership found under {}",
            parent.name
        )));
    }

    members.sort_by(seniority_order);

    // The parent's top functional officer anchors the chart.
    let parent_top_id = members
        .iter()
        .find(|m| unit_of.get(&m.position.id) == Some(parent_id))
        .map(|m| m.position.id.clone());

    let member_ids: HashSet<String> =
        members.iter().map(|m| m.position.id.clone()).collect();

    // Each unit's top functional officer is its first member in seniority
    // order.
    let mut unit_top: HashMap<UnitId, String> = HashMap::new();
    for member in members.iter() {
        if let Some(unit) = unit_of.get(&member.position.id) {
            unit_top
                .entry(unit.clone())
                .or_insert_with(|| member.position.id.clone());
        }
    }

    // Cross-unit edge: a subsidiary's top functional officer reports to
    // the parent's top functional officer unless an in-chart edge exists.
    // Members below their unit's top officer fall back to that officer.
    for member in members.iter_mut() {
        let member_unit = match unit_of.get(&member.position.id) {
            Some(unit) => unit.clone(),
            None => continue,
        };

        let has_explicit_edge = member
            .reports_to
            .as_deref()
            .is_some_and(|id| member_ids.contains(id));
        if has_explicit_edge {
            continue;
        }

        let top_id = unit_top.get(&member_unit).cloned();
        if top_id.as_deref() == Some(member.position.id.as_str()) {
            member.reports_to = if member_unit == *parent_id {
                None
            } else {
                parent_top_id.clone()
            };
        } else {
            member.reports_to = top_id;
        }
    }

    let tree = build_tree(&members, &format!("{} — {function}", parent.name));

    Ok(FunctionalChart {
        function: function.to_string(),
        members: members.len(),
        tree,
    })
}
