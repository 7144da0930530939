//! SQL migration definitions for the OrgScope database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed as a batch.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: units, positions, leadership_changes, org_snapshots, collection_runs, classify_cache",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Business units (parent-linked; parent_id = '' for roots).
-- Unique per (parent, normalized name): re-discovery upserts, never duplicates.
CREATE TABLE IF NOT EXISTS units (
    id              TEXT PRIMARY KEY,
    parent_id       TEXT NOT NULL DEFAULT '',
    name            TEXT NOT NULL,
    normalized_name TEXT NOT NULL,
    website         TEXT,
    domains_json    TEXT NOT NULL DEFAULT '[]',
    unit_type       TEXT NOT NULL DEFAULT 'subsidiary',
    is_public       INTEGER NOT NULL DEFAULT 0,
    registry_id     TEXT,
    jurisdiction    TEXT,
    ownership_pct   REAL,
    description     TEXT,
    sources_json    TEXT NOT NULL DEFAULT '[]',
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    UNIQUE(parent_id, normalized_name)
);

CREATE INDEX IF NOT EXISTS idx_units_parent ON units(parent_id);

-- Canonical positions. Superseded rows keep is_current = 0; at most one
-- current row per (unit, normalized name).
CREATE TABLE IF NOT EXISTS positions (
    id                TEXT PRIMARY KEY,
    unit_id           TEXT NOT NULL REFERENCES units(id) ON DELETE CASCADE,
    full_name         TEXT NOT NULL,
    normalized_name   TEXT NOT NULL,
    title             TEXT NOT NULL,
    title_level       TEXT NOT NULL DEFAULT 'unknown',
    management_level  INTEGER NOT NULL DEFAULT 9,
    reports_to_id     TEXT,
    department        TEXT,
    bio               TEXT,
    linkedin_url      TEXT,
    email             TEXT,
    photo_url         TEXT,
    is_board_member   INTEGER NOT NULL DEFAULT 0,
    is_executive      INTEGER NOT NULL DEFAULT 0,
    confidence        TEXT NOT NULL DEFAULT 'low',
    data_sources_json TEXT NOT NULL DEFAULT '[]',
    is_current        INTEGER NOT NULL DEFAULT 1,
    first_seen        TEXT NOT NULL,
    last_seen         TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_positions_unit ON positions(unit_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_positions_current
    ON positions(unit_id, normalized_name) WHERE is_current = 1;

-- Leadership changes: append-only, deduplicated by
-- (unit, normalized name, change type, date).
CREATE TABLE IF NOT EXISTS leadership_changes (
    id              TEXT PRIMARY KEY,
    unit_id         TEXT NOT NULL REFERENCES units(id) ON DELETE CASCADE,
    person_name     TEXT NOT NULL,
    normalized_name TEXT NOT NULL,
    change_type     TEXT NOT NULL,
    old_title       TEXT,
    new_title       TEXT,
    announced_date  TEXT,
    effective_date  TEXT,
    change_date     TEXT NOT NULL,
    is_c_suite      INTEGER NOT NULL DEFAULT 0,
    is_board        INTEGER NOT NULL DEFAULT 0,
    significance    INTEGER NOT NULL DEFAULT 5,
    confidence      TEXT NOT NULL DEFAULT 'low',
    source_type     TEXT,
    source_url      TEXT,
    detail          TEXT,
    created_at      TEXT NOT NULL,
    UNIQUE(unit_id, normalized_name, change_type, change_date)
);

CREATE INDEX IF NOT EXISTS idx_changes_unit ON leadership_changes(unit_id);

-- Point-in-time org chart snapshots. One row per (unit, date);
-- same-day rebuilds replace.
CREATE TABLE IF NOT EXISTS org_snapshots (
    id               TEXT PRIMARY KEY,
    unit_id          TEXT NOT NULL REFERENCES units(id) ON DELETE CASCADE,
    snapshot_date    TEXT NOT NULL,
    tree_json        TEXT NOT NULL,
    max_depth        INTEGER NOT NULL,
    departments_json TEXT NOT NULL DEFAULT '[]',
    created_at       TEXT NOT NULL,
    UNIQUE(unit_id, snapshot_date)
);

-- Collection run audit trail
CREATE TABLE IF NOT EXISTS collection_runs (
    id          TEXT PRIMARY KEY,
    unit_id     TEXT NOT NULL,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    stats_json  TEXT
);

CREATE INDEX IF NOT EXISTS idx_runs_unit ON collection_runs(unit_id);

-- Classification result cache
CREATE TABLE IF NOT EXISTS classify_cache (
    id          TEXT PRIMARY KEY,
    task_type   TEXT NOT NULL,
    prompt_hash TEXT NOT NULL,
    model_id    TEXT NOT NULL,
    result_json TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    UNIQUE(task_type, prompt_hash, model_id)
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
