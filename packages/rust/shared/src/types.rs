//! Core domain types for the OrgScope leadership pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// UnitId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for business-unit identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub Uuid);

impl UnitId {
    /// Generate a new time-sortable unit identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for UnitId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for UnitId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Closed enums
// ---------------------------------------------------------------------------

/// Confidence tag on any extracted fact. Ordered so merges promote to the
/// highest value seen.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    #[default]
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "high" => Self::High,
            "medium" => Self::Medium,
            _ => Self::Low,
        }
    }
}

/// Kind of business unit relative to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnitType {
    Division,
    #[default]
    Subsidiary,
    Affiliate,
}

impl UnitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Division => "division",
            Self::Subsidiary => "subsidiary",
            Self::Affiliate => "affiliate",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "division" => Self::Division,
            "affiliate" => Self::Affiliate,
            _ => Self::Subsidiary,
        }
    }
}

/// Where a discovered unit came from. Ordered by merge priority:
/// registry beats website beats general knowledge.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
    GeneralKnowledge,
    Website,
    Registry,
}

impl DiscoverySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GeneralKnowledge => "general_knowledge",
            Self::Website => "website",
            Self::Registry => "registry",
        }
    }
}

/// Coarse hierarchy rank derived from a free-text title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TitleLevel {
    CSuite,
    President,
    Evp,
    Svp,
    Vp,
    Director,
    Manager,
    Board,
    Individual,
    #[default]
    Unknown,
}

impl TitleLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CSuite => "c_suite",
            Self::President => "president",
            Self::Evp => "evp",
            Self::Svp => "svp",
            Self::Vp => "vp",
            Self::Director => "director",
            Self::Manager => "manager",
            Self::Board => "board",
            Self::Individual => "individual",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "c_suite" => Self::CSuite,
            "president" => Self::President,
            "evp" => Self::Evp,
            "svp" => Self::Svp,
            "vp" => Self::Vp,
            "director" => Self::Director,
            "manager" => Self::Manager,
            "board" => Self::Board,
            "individual" => Self::Individual,
            _ => Self::Unknown,
        }
    }
}

/// Typed leadership-change event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Hire,
    Departure,
    Promotion,
    Demotion,
    Lateral,
    Retirement,
    BoardAppointment,
    BoardDeparture,
    Interim,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hire => "hire",
            Self::Departure => "departure",
            Self::Promotion => "promotion",
            Self::Demotion => "demotion",
            Self::Lateral => "lateral",
            Self::Retirement => "retirement",
            Self::BoardAppointment => "board_appointment",
            Self::BoardDeparture => "board_departure",
            Self::Interim => "interim",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hire" => Some(Self::Hire),
            "departure" => Some(Self::Departure),
            "promotion" => Some(Self::Promotion),
            "demotion" => Some(Self::Demotion),
            "lateral" => Some(Self::Lateral),
            "retirement" => Some(Self::Retirement),
            "board_appointment" => Some(Self::BoardAppointment),
            "board_departure" => Some(Self::BoardDeparture),
            "interim" => Some(Self::Interim),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// BusinessUnit
// ---------------------------------------------------------------------------

/// A parent company, subsidiary, division, or affiliate tracked as a
/// distinct collection target.
///
/// Unique per (parent, normalized name); created by structure discovery,
/// never deleted, upserted by later discovery runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessUnit {
    pub id: UnitId,
    /// Parent unit, `None` for a root (tracked parent company).
    pub parent_id: Option<UnitId>,
    pub name: String,
    /// Normalized form of `name` used as the natural dedup key.
    pub normalized_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domains: Vec<String>,
    pub unit_type: UnitType,
    pub is_public: bool,
    /// Registry identifier (e.g. an SEC CIK) when the unit files publicly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ownership_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Which discovery signals produced this unit, highest priority first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub discovery_sources: Vec<DiscoverySource>,
}

// ---------------------------------------------------------------------------
// ExtractedPerson
// ---------------------------------------------------------------------------

/// A raw person record emitted by an evidence source. Ephemeral — exists
/// only between an evidence-source call and entity resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedPerson {
    pub full_name: String,
    pub title: String,
    pub title_level: TitleLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reports_to_name: Option<String>,
    #[serde(default)]
    pub is_board_member: bool,
    #[serde(default)]
    pub is_executive: bool,
    pub confidence: Confidence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<String>,
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// The single merged, persisted identity for a real individual within one
/// business unit.
///
/// At most one row per (unit, normalized name) carries `is_current = true`;
/// superseded rows are flagged, not deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// UUID v7 string.
    pub id: String,
    pub unit_id: UnitId,
    pub full_name: String,
    pub normalized_name: String,
    pub title: String,
    pub title_level: TitleLevel,
    /// Numeric seniority rank, 1 = CEO … 9 = unknown.
    pub management_level: u8,
    /// Self-referential reporting edge, `None` for roots/unresolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reports_to_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub is_board_member: bool,
    #[serde(default)]
    pub is_executive: bool,
    pub confidence: Confidence,
    /// Evidence sources that contributed to this record.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_sources: Vec<String>,
    pub is_current: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// LeadershipChange
// ---------------------------------------------------------------------------

/// A detected or reported leadership-change event. Append-only;
/// deduplicated by (normalized name, change type, date) before insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadershipChange {
    /// UUID v7 string.
    pub id: String,
    pub unit_id: UnitId,
    pub person_name: String,
    pub normalized_name: String,
    pub change_type: ChangeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub announced_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_date: Option<NaiveDate>,
    #[serde(default)]
    pub is_c_suite: bool,
    #[serde(default)]
    pub is_board: bool,
    /// Heuristic importance, 1–10, used for alert filtering.
    pub significance: u8,
    pub confidence: Confidence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl LeadershipChange {
    /// The date used for dedup keying: announced, else effective.
    pub fn key_date(&self) -> Option<NaiveDate> {
        self.announced_date.or(self.effective_date)
    }
}

// ---------------------------------------------------------------------------
// Org chart
// ---------------------------------------------------------------------------

/// One node in a persisted org-chart tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgNode {
    /// Position id, or empty for a synthesized virtual root.
    pub position_id: String,
    pub full_name: String,
    pub title: String,
    pub management_level: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reports: Vec<OrgNode>,
}

impl OrgNode {
    /// Depth of the tree rooted at this node (a leaf has depth 1).
    pub fn depth(&self) -> u32 {
        1 + self.reports.iter().map(OrgNode::depth).max().unwrap_or(0)
    }
}

/// A persisted, dated hierarchical rendering of a unit's leadership
/// structure. One row per (unit, date); same-day rebuilds replace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgChartSnapshot {
    pub unit_id: UnitId,
    pub snapshot_date: NaiveDate,
    pub tree: OrgNode,
    pub max_depth: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub departments: Vec<String>,
}

// ---------------------------------------------------------------------------
// Evidence-source output and run result
// ---------------------------------------------------------------------------

/// The common intermediate representation every evidence source produces.
///
/// Sources never fail for ordinary data-not-found conditions; soft
/// problems are reported in `errors`.
#[derive(Debug, Clone, Default)]
pub struct Collected {
    pub people: Vec<ExtractedPerson>,
    pub changes: Vec<LeadershipChange>,
    pub errors: Vec<String>,
}

impl Collected {
    /// Fold another source's output into this one.
    pub fn extend(&mut self, other: Collected) {
        self.people.extend(other.people);
        self.changes.extend(other.changes);
        self.errors.extend(other.errors);
    }
}

/// Aggregated outcome of one collection run. Callers always receive this,
/// never a bare error: partial success is the normal case.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionResult {
    /// True if any unit's collection succeeded, not only if all did.
    pub success: bool,
    pub units_discovered: usize,
    pub people_found: usize,
    pub people_created: usize,
    pub people_updated: usize,
    pub changes_detected: usize,
    /// Wall-clock per pipeline phase, milliseconds.
    pub phase_durations_ms: BTreeMap<String, u64>,
    /// Unit-scoped failures, tagged `"<unit>: <error>"`.
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}
