//! libSQL storage layer for OrgScope.
//!
//! The [`Storage`] struct wraps a libSQL database holding business units,
//! canonical positions, the append-only leadership-change log, org-chart
//! snapshots, collection-run audit rows, and the classification cache.
//!
//! All writes are upserts by natural key, scoped to one unit at a time, so
//! re-running any pipeline stage concurrently with itself is safe.

mod migrations;

use std::path::Path;

use chrono::{NaiveDate, Utc};
use libsql::{Connection, Database, params};
use uuid::Uuid;

use orgscope_shared::{
    BusinessUnit, ChangeType, Confidence, LeadershipChange, OrgChartSnapshot, OrgNode,
    OrgScopeError, Position, Result, TitleLevel, UnitId, UnitType,
};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl Storage {
    /// Open or create a database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| OrgScopeError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| OrgScopeError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| OrgScopeError::Storage(e.to_string()))?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    OrgScopeError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Unit operations
    // -----------------------------------------------------------------------

    /// Upsert a business unit by its natural key (parent, normalized name).
    ///
    /// An existing row keeps its id and any non-empty fields the incoming
    /// record does not improve on — gaps are filled, data is never replaced
    /// with less. Returns the id of the stored row.
    pub async fn upsert_unit(&self, unit: &BusinessUnit) -> Result<UnitId> {
        let now = Utc::now().to_rfc3339();
        let parent = unit.parent_id.as_ref().map(UnitId::to_string).unwrap_or_default();
        let domains_json = serde_json::to_string(&unit.domains).unwrap_or_else(|_| "[]".into());
        let sources_json =
            serde_json::to_string(&unit.discovery_sources).unwrap_or_else(|_| "[]".into());

        self.conn
            .execute(
                "INSERT INTO units (id, parent_id, name, normalized_name, website, domains_json,
                                    unit_type, is_public, registry_id, jurisdiction, ownership_pct,
                                    description, sources_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
                 ON CONFLICT(parent_id, normalized_name) DO UPDATE SET
                   name          = excluded.name,
                   website       = CASE WHEN units.website IS NULL OR units.website = ''
                                        THEN excluded.website ELSE units.website END,
                   domains_json  = CASE WHEN units.domains_json = '[]'
                                        THEN excluded.domains_json ELSE units.domains_json END,
                   unit_type     = excluded.unit_type,
                   is_public     = MAX(units.is_public, excluded.is_public),
                   registry_id   = COALESCE(units.registry_id, excluded.registry_id),
                   jurisdiction  = COALESCE(units.jurisdiction, excluded.jurisdiction),
                   ownership_pct = COALESCE(units.ownership_pct, excluded.ownership_pct),
                   description   = CASE WHEN units.description IS NULL OR units.description = ''
                                        THEN excluded.description ELSE units.description END,
                   sources_json  = excluded.sources_json,
                   updated_at    = excluded.updated_at",
                params![
                    unit.id.to_string(),
                    parent.as_str(),
                    unit.name.as_str(),
                    unit.normalized_name.as_str(),
                    unit.website.as_deref(),
                    domains_json.as_str(),
                    unit.unit_type.as_str(),
                    unit.is_public as i64,
                    unit.registry_id.as_deref(),
                    unit.jurisdiction.as_deref(),
                    unit.ownership_pct,
                    unit.description.as_deref(),
                    sources_json.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(|e| OrgScopeError::Storage(e.to_string()))?;

        // The conflict path keeps the existing id; read it back.
        let stored = self
            .get_unit_by_key(unit.parent_id.as_ref(), &unit.normalized_name)
            .await?
            .ok_or_else(|| OrgScopeError::Storage("unit vanished after upsert".into()))?;
        Ok(stored.id)
    }

    /// Get a unit by id.
    pub async fn get_unit(&self, id: &UnitId) -> Result<Option<BusinessUnit>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {UNIT_COLUMNS} FROM units WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| OrgScopeError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_unit(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(OrgScopeError::Storage(e.to_string())),
        }
    }

    /// Get a unit by its natural key (parent, normalized name).
    pub async fn get_unit_by_key(
        &self,
        parent_id: Option<&UnitId>,
        normalized_name: &str,
    ) -> Result<Option<BusinessUnit>> {
        let parent = parent_id.map(UnitId::to_string).unwrap_or_default();
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {UNIT_COLUMNS} FROM units
                     WHERE parent_id = ?1 AND normalized_name = ?2"
                ),
                params![parent.as_str(), normalized_name],
            )
            .await
            .map_err(|e| OrgScopeError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_unit(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(OrgScopeError::Storage(e.to_string())),
        }
    }

    /// List direct children of a unit.
    pub async fn list_children(&self, parent_id: &UnitId) -> Result<Vec<BusinessUnit>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {UNIT_COLUMNS} FROM units WHERE parent_id = ?1 ORDER BY name"
                ),
                params![parent_id.to_string()],
            )
            .await
            .map_err(|e| OrgScopeError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_unit(&row)?);
        }
        Ok(results)
    }

    /// List every unit, roots first.
    pub async fn list_units(&self) -> Result<Vec<BusinessUnit>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {UNIT_COLUMNS} FROM units ORDER BY parent_id, name"),
                params![],
            )
            .await
            .map_err(|e| OrgScopeError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_unit(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Position operations
    // -----------------------------------------------------------------------

    /// Insert a new position row.
    pub async fn insert_position(&self, position: &Position) -> Result<()> {
        let data_sources_json =
            serde_json::to_string(&position.data_sources).unwrap_or_else(|_| "[]".into());
        self.conn
            .execute(
                "INSERT INTO positions (id, unit_id, full_name, normalized_name, title,
                                        title_level, management_level, reports_to_id, department,
                                        bio, linkedin_url, email, photo_url, is_board_member,
                                        is_executive, confidence, data_sources_json, is_current,
                                        first_seen, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
                params![
                    position.id.as_str(),
                    position.unit_id.to_string(),
                    position.full_name.as_str(),
                    position.normalized_name.as_str(),
                    position.title.as_str(),
                    position.title_level.as_str(),
                    position.management_level as i64,
                    position.reports_to_id.as_deref(),
                    position.department.as_deref(),
                    position.bio.as_deref(),
                    position.linkedin_url.as_deref(),
                    position.email.as_deref(),
                    position.photo_url.as_deref(),
                    position.is_board_member as i64,
                    position.is_executive as i64,
                    position.confidence.as_str(),
                    data_sources_json.as_str(),
                    position.is_current as i64,
                    position.first_seen.to_rfc3339(),
                    position.last_seen.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| OrgScopeError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Update an existing position row in place (same id).
    pub async fn update_position(&self, position: &Position) -> Result<()> {
        let data_sources_json =
            serde_json::to_string(&position.data_sources).unwrap_or_else(|_| "[]".into());
        self.conn
            .execute(
                "UPDATE positions SET
                   unit_id = ?2, full_name = ?3, normalized_name = ?4, title = ?5,
                   title_level = ?6, management_level = ?7, reports_to_id = ?8, department = ?9,
                   bio = ?10, linkedin_url = ?11, email = ?12, photo_url = ?13,
                   is_board_member = ?14, is_executive = ?15, confidence = ?16,
                   data_sources_json = ?17, is_current = ?18, first_seen = ?19, last_seen = ?20
                 WHERE id = ?1",
                params![
                    position.id.as_str(),
                    position.unit_id.to_string(),
                    position.full_name.as_str(),
                    position.normalized_name.as_str(),
                    position.title.as_str(),
                    position.title_level.as_str(),
                    position.management_level as i64,
                    position.reports_to_id.as_deref(),
                    position.department.as_deref(),
                    position.bio.as_deref(),
                    position.linkedin_url.as_deref(),
                    position.email.as_deref(),
                    position.photo_url.as_deref(),
                    position.is_board_member as i64,
                    position.is_executive as i64,
                    position.confidence.as_str(),
                    data_sources_json.as_str(),
                    position.is_current as i64,
                    position.first_seen.to_rfc3339(),
                    position.last_seen.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| OrgScopeError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Flag a position as no longer current (superseded, never deleted).
    pub async fn supersede_position(&self, position_id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE positions SET is_current = 0, last_seen = ?2 WHERE id = ?1",
                params![position_id, now.as_str()],
            )
            .await
            .map_err(|e| OrgScopeError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Write hierarchy fields produced by the org-chart builder.
    pub async fn set_position_hierarchy(
        &self,
        position_id: &str,
        management_level: u8,
        reports_to_id: Option<&str>,
        department: Option<&str>,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE positions SET management_level = ?2, reports_to_id = ?3,
                        department = COALESCE(?4, department)
                 WHERE id = ?1",
                params![
                    position_id,
                    management_level as i64,
                    reports_to_id,
                    department
                ],
            )
            .await
            .map_err(|e| OrgScopeError::Storage(e.to_string()))?;
        Ok(())
    }

    /// The current canonical roster for a unit.
    pub async fn current_positions(&self, unit_id: &UnitId) -> Result<Vec<Position>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {POSITION_COLUMNS} FROM positions
                     WHERE unit_id = ?1 AND is_current = 1
                     ORDER BY management_level, full_name"
                ),
                params![unit_id.to_string()],
            )
            .await
            .map_err(|e| OrgScopeError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_position(&row)?);
        }
        Ok(results)
    }

    /// Look up the current position for (unit, normalized name).
    pub async fn get_current_position(
        &self,
        unit_id: &UnitId,
        normalized_name: &str,
    ) -> Result<Option<Position>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {POSITION_COLUMNS} FROM positions
                     WHERE unit_id = ?1 AND normalized_name = ?2 AND is_current = 1"
                ),
                params![unit_id.to_string(), normalized_name],
            )
            .await
            .map_err(|e| OrgScopeError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_position(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(OrgScopeError::Storage(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Leadership change operations
    // -----------------------------------------------------------------------

    /// Append a leadership change. Returns `false` when an identical change
    /// (same unit, person, type, and date) is already recorded.
    pub async fn insert_change(&self, change: &LeadershipChange) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let change_date = change
            .key_date()
            .map(|d| d.to_string())
            .unwrap_or_else(|| Utc::now().date_naive().to_string());

        let affected = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO leadership_changes
                   (id, unit_id, person_name, normalized_name, change_type, old_title, new_title,
                    announced_date, effective_date, change_date, is_c_suite, is_board,
                    significance, confidence, source_type, source_url, detail, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
                params![
                    change.id.as_str(),
                    change.unit_id.to_string(),
                    change.person_name.as_str(),
                    change.normalized_name.as_str(),
                    change.change_type.as_str(),
                    change.old_title.as_deref(),
                    change.new_title.as_deref(),
                    change.announced_date.map(|d| d.to_string()),
                    change.effective_date.map(|d| d.to_string()),
                    change_date.as_str(),
                    change.is_c_suite as i64,
                    change.is_board as i64,
                    change.significance as i64,
                    change.confidence.as_str(),
                    change.source_type.as_deref(),
                    change.source_url.as_deref(),
                    change.detail.as_deref(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(|e| OrgScopeError::Storage(e.to_string()))?;
        Ok(affected > 0)
    }

    /// List recorded changes for a unit at or above a significance floor.
    pub async fn list_changes(
        &self,
        unit_id: &UnitId,
        min_significance: u8,
    ) -> Result<Vec<LeadershipChange>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {CHANGE_COLUMNS} FROM leadership_changes
                     WHERE unit_id = ?1 AND significance >= ?2
                     ORDER BY change_date DESC, created_at DESC"
                ),
                params![unit_id.to_string(), min_significance as i64],
            )
            .await
            .map_err(|e| OrgScopeError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_change(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Org snapshot operations
    // -----------------------------------------------------------------------

    /// Upsert the snapshot for (unit, date). Same-day rebuilds replace.
    pub async fn upsert_snapshot(&self, snapshot: &OrgChartSnapshot) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let tree_json = serde_json::to_string(&snapshot.tree)
            .map_err(|e| OrgScopeError::Storage(format!("snapshot tree encode: {e}")))?;
        let departments_json =
            serde_json::to_string(&snapshot.departments).unwrap_or_else(|_| "[]".into());

        self.conn
            .execute(
                "INSERT INTO org_snapshots (id, unit_id, snapshot_date, tree_json, max_depth,
                                            departments_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(unit_id, snapshot_date) DO UPDATE SET
                   tree_json        = excluded.tree_json,
                   max_depth        = excluded.max_depth,
                   departments_json = excluded.departments_json,
                   created_at       = excluded.created_at",
                params![
                    Uuid::now_v7().to_string(),
                    snapshot.unit_id.to_string(),
                    snapshot.snapshot_date.to_string(),
                    tree_json.as_str(),
                    snapshot.max_depth as i64,
                    departments_json.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(|e| OrgScopeError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Fetch the snapshot for (unit, date), if any.
    pub async fn get_snapshot(
        &self,
        unit_id: &UnitId,
        date: NaiveDate,
    ) -> Result<Option<OrgChartSnapshot>> {
        let mut rows = self
            .conn
            .query(
                "SELECT unit_id, snapshot_date, tree_json, max_depth, departments_json
                 FROM org_snapshots WHERE unit_id = ?1 AND snapshot_date = ?2",
                params![unit_id.to_string(), date.to_string()],
            )
            .await
            .map_err(|e| OrgScopeError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_snapshot(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(OrgScopeError::Storage(e.to_string())),
        }
    }

    /// Count snapshot rows for a unit (audit/testing aid).
    pub async fn count_snapshots(&self, unit_id: &UnitId) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM org_snapshots WHERE unit_id = ?1",
                params![unit_id.to_string()],
            )
            .await
            .map_err(|e| OrgScopeError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) as u64),
            _ => Ok(0),
        }
    }

    // -----------------------------------------------------------------------
    // Collection run operations
    // -----------------------------------------------------------------------

    /// Insert a new collection run. Returns the generated run ID.
    pub async fn insert_run(&self, unit_id: &UnitId) -> Result<String> {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO collection_runs (id, unit_id, started_at) VALUES (?1, ?2, ?3)",
                params![id.as_str(), unit_id.to_string(), now.as_str()],
            )
            .await
            .map_err(|e| OrgScopeError::Storage(e.to_string()))?;
        Ok(id)
    }

    /// Update a collection run with completion data.
    pub async fn update_run(&self, run_id: &str, stats_json: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE collection_runs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, run_id],
            )
            .await
            .map_err(|e| OrgScopeError::Storage(e.to_string()))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Classification cache operations
    // -----------------------------------------------------------------------

    /// Get a cached classification result.
    pub async fn get_classify_cache(
        &self,
        task_type: &str,
        prompt_hash: &str,
        model_id: &str,
    ) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT result_json FROM classify_cache
                 WHERE task_type = ?1 AND prompt_hash = ?2 AND model_id = ?3",
                params![task_type, prompt_hash, model_id],
            )
            .await
            .map_err(|e| OrgScopeError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let result: String = row
                    .get(0)
                    .map_err(|e| OrgScopeError::Storage(e.to_string()))?;
                Ok(Some(result))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(OrgScopeError::Storage(e.to_string())),
        }
    }

    /// Store a classification result in the cache (upserts).
    pub async fn set_classify_cache(
        &self,
        task_type: &str,
        prompt_hash: &str,
        model_id: &str,
        result_json: &str,
    ) -> Result<()> {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO classify_cache (id, task_type, prompt_hash, model_id, result_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(task_type, prompt_hash, model_id) DO UPDATE SET
                   result_json = excluded.result_json,
                   created_at  = excluded.created_at",
                params![id.as_str(), task_type, prompt_hash, model_id, result_json, now.as_str()],
            )
            .await
            .map_err(|e| OrgScopeError::Storage(e.to_string()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row converters
// ---------------------------------------------------------------------------

const UNIT_COLUMNS: &str = "id, parent_id, name, normalized_name, website, domains_json, \
                            unit_type, is_public, registry_id, jurisdiction, ownership_pct, \
                            description, sources_json";

const POSITION_COLUMNS: &str = "id, unit_id, full_name, normalized_name, title, title_level, \
                                management_level, reports_to_id, department, bio, linkedin_url, \
                                email, photo_url, is_board_member, is_executive, confidence, \
                                data_sources_json, is_current, first_seen, last_seen";

const CHANGE_COLUMNS: &str = "id, unit_id, person_name, normalized_name, change_type, old_title, \
                              new_title, announced_date, effective_date, is_c_suite, is_board, \
                              significance, confidence, source_type, source_url, detail";

fn col_err(e: impl std::fmt::Display) -> OrgScopeError {
    OrgScopeError::Storage(e.to_string())
}

fn parse_unit_id(s: &str) -> Result<UnitId> {
    s.parse::<UnitId>()
        .map_err(|e| OrgScopeError::Storage(format!("invalid unit id '{s}': {e}")))
}

fn parse_timestamp(s: &str) -> Result<chrono::DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| OrgScopeError::Storage(format!("invalid timestamp '{s}': {e}")))
}

/// Convert a database row to a [`BusinessUnit`].
fn row_to_unit(row: &libsql::Row) -> Result<BusinessUnit> {
    let parent_raw: String = row.get(1).map_err(col_err)?;
    let domains_json: String = row.get(5).map_err(col_err)?;
    let sources_json: String = row.get(12).map_err(col_err)?;

    Ok(BusinessUnit {
        id: parse_unit_id(&row.get::<String>(0).map_err(col_err)?)?,
        parent_id: if parent_raw.is_empty() {
            None
        } else {
            Some(parse_unit_id(&parent_raw)?)
        },
        name: row.get(2).map_err(col_err)?,
        normalized_name: row.get(3).map_err(col_err)?,
        website: row.get::<String>(4).ok().filter(|s| !s.is_empty()),
        domains: serde_json::from_str(&domains_json).unwrap_or_default(),
        unit_type: UnitType::parse(&row.get::<String>(6).map_err(col_err)?),
        is_public: row.get::<i64>(7).map_err(col_err)? != 0,
        registry_id: row.get::<String>(8).ok().filter(|s| !s.is_empty()),
        jurisdiction: row.get::<String>(9).ok().filter(|s| !s.is_empty()),
        ownership_pct: row.get::<f64>(10).ok(),
        description: row.get::<String>(11).ok().filter(|s| !s.is_empty()),
        discovery_sources: serde_json::from_str(&sources_json).unwrap_or_default(),
    })
}

/// Convert a database row to a [`Position`].
fn row_to_position(row: &libsql::Row) -> Result<Position> {
    let data_sources_json: String = row.get(16).map_err(col_err)?;

    Ok(Position {
        id: row.get(0).map_err(col_err)?,
        unit_id: parse_unit_id(&row.get::<String>(1).map_err(col_err)?)?,
        full_name: row.get(2).map_err(col_err)?,
        normalized_name: row.get(3).map_err(col_err)?,
        title: row.get(4).map_err(col_err)?,
        title_level: TitleLevel::parse(&row.get::<String>(5).map_err(col_err)?),
        management_level: row.get::<i64>(6).map_err(col_err)? as u8,
        reports_to_id: row.get::<String>(7).ok().filter(|s| !s.is_empty()),
        department: row.get::<String>(8).ok().filter(|s| !s.is_empty()),
        bio: row.get::<String>(9).ok().filter(|s| !s.is_empty()),
        linkedin_url: row.get::<String>(10).ok().filter(|s| !s.is_empty()),
        email: row.get::<String>(11).ok().filter(|s| !s.is_empty()),
        photo_url: row.get::<String>(12).ok().filter(|s| !s.is_empty()),
        is_board_member: row.get::<i64>(13).map_err(col_err)? != 0,
        is_executive: row.get::<i64>(14).map_err(col_err)? != 0,
        confidence: Confidence::parse(&row.get::<String>(15).map_err(col_err)?),
        data_sources: serde_json::from_str(&data_sources_json).unwrap_or_default(),
        is_current: row.get::<i64>(17).map_err(col_err)? != 0,
        first_seen: parse_timestamp(&row.get::<String>(18).map_err(col_err)?)?,
        last_seen: parse_timestamp(&row.get::<String>(19).map_err(col_err)?)?,
    })
}

/// Convert a database row to a [`LeadershipChange`].
fn row_to_change(row: &libsql::Row) -> Result<LeadershipChange> {
    let type_raw: String = row.get(4).map_err(col_err)?;

    Ok(LeadershipChange {
        id: row.get(0).map_err(col_err)?,
        unit_id: parse_unit_id(&row.get::<String>(1).map_err(col_err)?)?,
        person_name: row.get(2).map_err(col_err)?,
        normalized_name: row.get(3).map_err(col_err)?,
        change_type: ChangeType::parse(&type_raw)
            .ok_or_else(|| OrgScopeError::Storage(format!("unknown change type '{type_raw}'")))?,
        old_title: row.get::<String>(5).ok().filter(|s| !s.is_empty()),
        new_title: row.get::<String>(6).ok().filter(|s| !s.is_empty()),
        announced_date: row
            .get::<String>(7)
            .ok()
            .and_then(|s| s.parse::<NaiveDate>().ok()),
        effective_date: row
            .get::<String>(8)
            .ok()
            .and_then(|s| s.parse::<NaiveDate>().ok()),
        is_c_suite: row.get::<i64>(9).map_err(col_err)? != 0,
        is_board: row.get::<i64>(10).map_err(col_err)? != 0,
        significance: row.get::<i64>(11).map_err(col_err)? as u8,
        confidence: Confidence::parse(&row.get::<String>(12).map_err(col_err)?),
        source_type: row.get::<String>(13).ok().filter(|s| !s.is_empty()),
        source_url: row.get::<String>(14).ok().filter(|s| !s.is_empty()),
        detail: row.get::<String>(15).ok().filter(|s| !s.is_empty()),
    })
}

/// Convert a database row to an [`OrgChartSnapshot`].
fn row_to_snapshot(row: &libsql::Row) -> Result<OrgChartSnapshot> {
    let tree_json: String = row.get(2).map_err(col_err)?;
    let departments_json: String = row.get(4).map_err(col_err)?;
    let tree: OrgNode = serde_json::from_str(&tree_json)
        .map_err(|e| OrgScopeError::Storage(format!("snapshot tree decode: {e}")))?;

    Ok(OrgChartSnapshot {
        unit_id: parse_unit_id(&row.get::<String>(0).map_err(col_err)?)?,
        snapshot_date: row
            .get::<String>(1)
            .map_err(col_err)?
            .parse::<NaiveDate>()
            .map_err(|e| OrgScopeError::Storage(format!("invalid snapshot date: {e}")))?,
        tree,
        max_depth: row.get::<i64>(3).map_err(col_err)? as u32,
        departments: serde_json::from_str(&departments_json).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use orgscope_shared::DiscoverySource;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("orgscope_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn test_unit(parent: Option<&UnitId>, name: &str, normalized: &str) -> BusinessUnit {
        BusinessUnit {
            id: UnitId::new(),
            parent_id: parent.cloned(),
            name: name.into(),
            normalized_name: normalized.into(),
            website: None,
            domains: vec![],
            unit_type: UnitType::Subsidiary,
            is_public: false,
            registry_id: None,
            jurisdiction: None,
            ownership_pct: None,
            description: None,
            discovery_sources: vec![DiscoverySource::Registry],
        }
    }

    fn test_position(unit_id: &UnitId, name: &str, normalized: &str, title: &str) -> Position {
        let now = Utc::now();
        Position {
            id: Uuid::now_v7().to_string(),
            unit_id: unit_id.clone(),
            full_name: name.into(),
            normalized_name: normalized.into(),
            title: title.into(),
            title_level: TitleLevel::Unknown,
            management_level: 9,
            reports_to_id: None,
            department: None,
            bio: None,
            linkedin_url: None,
            email: None,
            photo_url: None,
            is_board_member: false,
            is_executive: false,
            confidence: Confidence::Medium,
            data_sources: vec!["web".into()],
            is_current: true,
            first_seen: now,
            last_seen: now,
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        let version = storage.get_schema_version().await;
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn unit_upsert_dedupes_by_natural_key() {
        let storage = test_storage().await;

        let mut first = test_unit(None, "Acme Robotics, Inc.", "acme robotics");
        first.website = Some("https://acme.example".into());
        let first_id = storage.upsert_unit(&first).await.expect("first upsert");

        // Same natural key, different id and extra fields: must not duplicate,
        // must fill gaps.
        let mut second = test_unit(None, "Acme Robotics", "acme robotics");
        second.description = Some("Industrial robots".into());
        second.website = Some("https://other.example".into());
        let second_id = storage.upsert_unit(&second).await.expect("second upsert");

        assert_eq!(first_id, second_id, "upsert must keep the original row");

        let stored = storage
            .get_unit_by_key(None, "acme robotics")
            .await
            .unwrap()
            .unwrap();
        // Existing website wins; missing description filled in.
        assert_eq!(stored.website.as_deref(), Some("https://acme.example"));
        assert_eq!(stored.description.as_deref(), Some("Industrial robots"));

        let all = storage.list_units().await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn children_are_scoped_to_parent() {
        let storage = test_storage().await;
        let parent = test_unit(None, "Parent Corp", "parent");
        let parent_id = storage.upsert_unit(&parent).await.unwrap();

        let child = test_unit(Some(&parent_id), "Child LLC", "child");
        storage.upsert_unit(&child).await.unwrap();

        // Same normalized name under a different parent is a distinct unit.
        let other_root = test_unit(None, "Child LLC", "child");
        storage.upsert_unit(&other_root).await.unwrap();

        let children = storage.list_children(&parent_id).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(storage.list_units().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn position_current_flag_lifecycle() {
        let storage = test_storage().await;
        let unit = test_unit(None, "Acme", "acme");
        let unit_id = storage.upsert_unit(&unit).await.unwrap();

        let pos = test_position(&unit_id, "Alice Lee", "alice lee", "VP Sales");
        storage.insert_position(&pos).await.expect("insert");

        let roster = storage.current_positions(&unit_id).await.unwrap();
        assert_eq!(roster.len(), 1);

        // Supersede and insert the replacement.
        storage.supersede_position(&pos.id).await.expect("supersede");
        let promoted = test_position(&unit_id, "Alice Lee", "alice lee", "SVP Sales");
        storage.insert_position(&promoted).await.expect("reinsert");

        let roster = storage.current_positions(&unit_id).await.unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].title, "SVP Sales");

        let found = storage
            .get_current_position(&unit_id, "alice lee")
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn change_insert_is_append_only_and_deduped() {
        let storage = test_storage().await;
        let unit = test_unit(None, "Acme", "acme");
        let unit_id = storage.upsert_unit(&unit).await.unwrap();

        let change = LeadershipChange {
            id: Uuid::now_v7().to_string(),
            unit_id: unit_id.clone(),
            person_name: "Alice Lee".into(),
            normalized_name: "alice lee".into(),
            change_type: ChangeType::Promotion,
            old_title: Some("VP Sales".into()),
            new_title: Some("SVP Sales".into()),
            announced_date: NaiveDate::from_ymd_opt(2025, 6, 1),
            effective_date: None,
            is_c_suite: false,
            is_board: false,
            significance: 5,
            confidence: Confidence::Medium,
            source_type: Some("web".into()),
            source_url: None,
            detail: None,
        };

        assert!(storage.insert_change(&change).await.expect("first insert"));

        // Same key with a fresh id: ignored.
        let dup = LeadershipChange {
            id: Uuid::now_v7().to_string(),
            ..change.clone()
        };
        assert!(!storage.insert_change(&dup).await.expect("dup insert"));

        let changes = storage.list_changes(&unit_id, 1).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::Promotion);
    }

    #[tokio::test]
    async fn snapshot_same_day_upsert_is_idempotent() {
        let storage = test_storage().await;
        let unit = test_unit(None, "Acme", "acme");
        let unit_id = storage.upsert_unit(&unit).await.unwrap();

        let today = Utc::now().date_naive();
        let snapshot = OrgChartSnapshot {
            unit_id: unit_id.clone(),
            snapshot_date: today,
            tree: OrgNode {
                position_id: "p1".into(),
                full_name: "Chief".into(),
                title: "CEO".into(),
                management_level: 1,
                department: None,
                reports: vec![],
            },
            max_depth: 1,
            departments: vec!["Corporate".into()],
        };

        storage.upsert_snapshot(&snapshot).await.expect("first");
        storage.upsert_snapshot(&snapshot).await.expect("second");

        assert_eq!(storage.count_snapshots(&unit_id).await.unwrap(), 1);

        let stored = storage.get_snapshot(&unit_id, today).await.unwrap().unwrap();
        assert_eq!(stored.tree.full_name, "Chief");
        assert_eq!(stored.max_depth, 1);
        assert_eq!(stored.departments, vec!["Corporate".to_string()]);
    }

    #[tokio::test]
    async fn run_lifecycle() {
        let storage = test_storage().await;
        let unit = test_unit(None, "Acme", "acme");
        let unit_id = storage.upsert_unit(&unit).await.unwrap();

        let run_id = storage.insert_run(&unit_id).await.expect("insert run");
        assert!(!run_id.is_empty());

        storage
            .update_run(&run_id, r#"{"people_found": 12}"#)
            .await
            .expect("update run");
    }

    #[tokio::test]
    async fn classify_cache_roundtrip() {
        let storage = test_storage().await;

        let cached = storage
            .get_classify_cache("division_grouping", "hash1", "test-model")
            .await
            .expect("miss");
        assert!(cached.is_none());

        storage
            .set_classify_cache("division_grouping", "hash1", "test-model", r#"{"a":"Corporate"}"#)
            .await
            .expect("set");

        let cached = storage
            .get_classify_cache("division_grouping", "hash1", "test-model")
            .await
            .expect("hit");
        assert!(cached.unwrap().contains("Corporate"));
    }
}
