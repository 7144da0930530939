//! The collection run: discovery → per-unit fan-out → resolution → change
//! detection → org chart.
//!
//! Unit-level work is embarrassingly parallel and bounded by a semaphore;
//! within one unit the enabled evidence sources run concurrently and write
//! to disjoint staging lists. Each unit's failure is isolated: it is caught
//! at this boundary, recorded against the unit, and never aborts siblings.
//! Callers always receive a [`CollectionResult`] — partial success is the
//! normal case, and only a missing parent unit yields `success = false`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use orgscope_crawler::SharedCrawl;
use orgscope_discovery::{RegistryClient, discover_structure};
use orgscope_shared::{
    BusinessUnit, Classifier, Collected, CollectionConfig, CollectionResult, Result, UnitId,
};
use orgscope_sources::EvidenceSource;
use orgscope_storage::Storage;

use crate::changes::{DetectOptions, RosterEntry, detect_changes};
use crate::orgchart::build_org_chart;
use crate::resolve::{dedup_changes, dedup_people, resolve_people};

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when a unit's collection starts.
    fn unit_started(&self, name: &str, current: usize, total: usize);
    /// Called when a unit's collection finishes.
    fn unit_finished(&self, name: &str, people: usize, changes: usize);
    /// Called when the run completes.
    fn done(&self, result: &CollectionResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn unit_started(&self, _name: &str, _current: usize, _total: usize) {}
    fn unit_finished(&self, _name: &str, _people: usize, _changes: usize) {}
    fn done(&self, _result: &CollectionResult) {}
}

// ---------------------------------------------------------------------------
// Run entry point
// ---------------------------------------------------------------------------

/// Everything a collection run needs, owned for the duration of the run.
pub struct RunContext {
    pub storage: Arc<Storage>,
    /// Run-scoped crawl state (rate limiter, cache, budgets). The sources
    /// hold the same handle, so every fetch in the run shares one
    /// per-domain spacing discipline.
    pub crawl: Arc<SharedCrawl>,
    pub sources: Vec<Arc<dyn EvidenceSource>>,
    pub classifier: Arc<dyn Classifier>,
    pub registry_client: Arc<dyn RegistryClient>,
    pub config: CollectionConfig,
    /// Model id for classification cache keying.
    pub model: String,
}

/// Outcome of one unit's collection, rolled up into the run result.
struct UnitOutcome {
    unit_name: String,
    people_found: usize,
    people_created: usize,
    people_updated: usize,
    changes_detected: usize,
    errors: Vec<String>,
    warnings: Vec<String>,
}

/// Run a full collection for `parent_id`. Safe to re-run: every write is
/// an upsert by natural key.
#[instrument(skip_all, fields(parent = %parent_id))]
pub async fn run_collection(
    ctx: &RunContext,
    parent_id: &UnitId,
    progress: &dyn ProgressReporter,
) -> Result<CollectionResult> {
    let run_start = Instant::now();
    let mut result = CollectionResult::default();

    // The only fatal precondition: the parent must exist.
    let Some(parent) = ctx.storage.get_unit(parent_id).await? else {
        result.errors.push(format!("unit {parent_id} not found"));
        result.success = false;
        progress.done(&result);
        return Ok(result);
    };

    let run_id = ctx.storage.insert_run(parent_id).await?;

    // --- Phase 1: structure discovery ---
    progress.phase("Discovering structure");
    let phase_start = Instant::now();

    let discovery_crawler = ctx
        .crawl
        .scoped_for_hosts(parent.website.as_deref(), &parent.domains)?;

    match discover_structure(
        &parent,
        &discovery_crawler,
        ctx.registry_client.as_ref(),
        ctx.classifier.as_ref(),
        &ctx.config,
    )
    .await
    {
        Ok(outcome) => {
            result.warnings.extend(outcome.warnings);
            for unit in &outcome.units {
                ctx.storage.upsert_unit(unit).await?;
            }
        }
        Err(e) => {
            // Discovery failing wholesale still leaves the parent itself
            // collectable.
            result.warnings.push(format!("discovery: {e}"));
        }
    }

    let mut units = vec![parent.clone()];
    units.extend(ctx.storage.list_children(parent_id).await?);
    result.units_discovered = units.len().saturating_sub(1);
    record_phase(&mut result.phase_durations_ms, "discovery", phase_start);

    // --- Phase 2: per-unit fan-out ---
    progress.phase("Collecting leadership evidence");
    let phase_start = Instant::now();

    let semaphore = Arc::new(Semaphore::new(ctx.config.max_concurrent_units.max(1)));
    let total_units = units.len();

    let mut handles = Vec::new();
    for (index, unit) in units.into_iter().enumerate() {
        progress.unit_started(&unit.name, index + 1, total_units);

        let storage = ctx.storage.clone();
        let sources = ctx.sources.clone();
        let config = ctx.config.clone();
        let semaphore = semaphore.clone();

        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            let unit_name = unit.name.clone();
            collect_unit(&storage, &sources, &config, unit)
                .await
                .map_err(|e| format!("{unit_name}: {e}"))
        }));
    }

    let mut any_unit_succeeded = false;
    for handle in handles {
        match handle.await {
            Ok(Ok(outcome)) => {
                any_unit_succeeded = true;
                progress.unit_finished(
                    &outcome.unit_name,
                    outcome.people_found,
                    outcome.changes_detected,
                );
                result.people_found += outcome.people_found;
                result.people_created += outcome.people_created;
                result.people_updated += outcome.people_updated;
                result.changes_detected += outcome.changes_detected;
                result
                    .errors
                    .extend(outcome.errors.into_iter().map(|e| {
                        format!("{}: {e}", outcome.unit_name)
                    }));
                result.warnings.extend(
                    outcome
                        .warnings
                        .into_iter()
                        .map(|w| format!("{}: {w}", outcome.unit_name)),
                );
            }
            // A unit failing is recorded, not fatal: siblings already ran.
            Ok(Err(unit_error)) => result.errors.push(unit_error),
            Err(join_error) => result.errors.push(format!("unit task: {join_error}")),
        }
    }
    record_phase(&mut result.phase_durations_ms, "collection", phase_start);

    // --- Phase 3: org chart for the parent ---
    progress.phase("Building org chart");
    let phase_start = Instant::now();

    let parent_roster = ctx.storage.current_positions(parent_id).await?;
    if parent_roster.is_empty() {
        result
            .warnings
            .push(format!("{}: no roster, org chart skipped", parent.name));
    } else if let Err(e) = build_org_chart(
        ctx.storage.as_ref(),
        ctx.classifier.as_ref(),
        &ctx.model,
        parent_id,
    )
    .await
    {
        result.errors.push(format!("org chart: {e}"));
    }
    record_phase(&mut result.phase_durations_ms, "orgchart", phase_start);

    // --- Aggregate ---
    result.success = any_unit_succeeded;
    record_phase(&mut result.phase_durations_ms, "total", run_start);

    let stats = serde_json::to_string(&result).unwrap_or_else(|_| "{}".into());
    if let Err(e) = ctx.storage.update_run(&run_id, &stats).await {
        warn!(error = %e, "failed to finalize run row");
    }

    info!(
        success = result.success,
        units = result.units_discovered,
        people_found = result.people_found,
        people_created = result.people_created,
        people_updated = result.people_updated,
        changes = result.changes_detected,
        errors = result.errors.len(),
        "collection run complete"
    );

    progress.done(&result);
    Ok(result)
}

fn record_phase(durations: &mut BTreeMap<String, u64>, phase: &str, start: Instant) {
    durations.insert(phase.to_string(), start.elapsed().as_millis() as u64);
}

fn source_enabled(name: &str, config: &CollectionConfig) -> bool {
    match name {
        "web" => config.enable_web,
        "filing" => config.enable_filing,
        "news" => config.enable_news,
        _ => true,
    }
}

/// Collect, resolve, and diff one unit. Every error that escapes this
/// function is unit-scoped and caught by the orchestrator.
async fn collect_unit(
    storage: &Arc<Storage>,
    sources: &[Arc<dyn EvidenceSource>],
    config: &CollectionConfig,
    unit: BusinessUnit,
) -> Result<UnitOutcome> {
    let mut outcome = UnitOutcome {
        unit_name: unit.name.clone(),
        people_found: 0,
        people_created: 0,
        people_updated: 0,
        changes_detected: 0,
        errors: Vec::new(),
        warnings: Vec::new(),
    };

    // Sources run concurrently; each writes its own Collected, merged
    // after the joins (order between sources does not matter — downstream
    // merges are commutative).
    let unit = Arc::new(unit);
    let mut source_handles = Vec::new();
    for source in sources {
        if !source_enabled(source.name(), config) {
            continue;
        }
        if !source.available(&unit) {
            outcome
                .warnings
                .push(format!("source {} skipped (prerequisite missing)", source.name()));
            continue;
        }
        let source = source.clone();
        let unit = unit.clone();
        source_handles.push(tokio::spawn(async move { source.collect(&unit).await }));
    }

    let mut collected = Collected::default();
    for handle in source_handles {
        match handle.await {
            Ok(part) => collected.extend(part),
            Err(e) => outcome.errors.push(format!("source task: {e}")),
        }
    }
    outcome.errors.append(&mut collected.errors);

    // Snapshot the old roster before resolution mutates it.
    let old_roster: Vec<RosterEntry> = storage
        .current_positions(&unit.id)
        .await?
        .iter()
        .map(RosterEntry::from)
        .collect();

    let deduped = dedup_people(collected.people);
    let new_roster: Vec<RosterEntry> = deduped
        .iter()
        .map(|p| RosterEntry {
            name: p.full_name.clone(),
            title: p.title.clone(),
            is_board: p.is_board_member,
        })
        .collect();

    // Detect changes against the previous snapshot. A first observation is
    // a baseline, not a wave of hires.
    let mut changes = collected.changes;
    if !old_roster.is_empty() && !new_roster.is_empty() {
        let options = DetectOptions {
            similarity_threshold: config.similarity_threshold,
            departure_confidence: config.departure_confidence,
            min_significance: config.min_significance,
        };
        changes.extend(detect_changes(&unit.id, &old_roster, &new_roster, &options));
    }

    // Resolve people into canonical positions.
    let stats = resolve_people(storage, &unit.id, deduped).await?;
    outcome.people_found = stats.found;
    outcome.people_created = stats.created;
    outcome.people_updated = stats.updated;

    // Append changes, deduplicated in memory and again at the insert
    // boundary (the table key makes re-runs no-ops).
    for change in dedup_changes(changes) {
        if change.significance < config.min_significance {
            continue;
        }
        if storage.insert_change(&change).await? {
            outcome.changes_detected += 1;
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use orgscope_discovery::FiledSubsidiary;
    use orgscope_shared::{
        AppConfig, ChangeType, Confidence, ExtractedPerson, NullClassifier, TitleLevel, UnitType,
    };
    use orgscope_shared::matching::title_level;
    use uuid::Uuid;

    // -----------------------------------------------------------------------
    // Test doubles
    // -----------------------------------------------------------------------

    struct CannedRegistry(Vec<FiledSubsidiary>);

    #[async_trait]
    impl RegistryClient for CannedRegistry {
        async fn get_filing_subsidiaries(
            &self,
            _registry_id: &str,
        ) -> Result<Vec<FiledSubsidiary>> {
            Ok(self.0.clone())
        }
    }

    /// A source returning a fixed roster for every unit.
    struct CannedSource {
        people: Vec<(String, String)>,
    }

    #[async_trait]
    impl EvidenceSource for CannedSource {
        fn name(&self) -> &'static str {
            "web"
        }
        fn available(&self, _unit: &BusinessUnit) -> bool {
            true
        }
        async fn collect(&self, _unit: &BusinessUnit) -> Collected {
            Collected {
                people: self
                    .people
                    .iter()
                    .map(|(name, title)| ExtractedPerson {
                        full_name: name.clone(),
                        title: title.clone(),
                        title_level: title_level(title),
                        department: None,
                        bio: None,
                        linkedin_url: None,
                        email: None,
                        photo_url: None,
                        reports_to_name: None,
                        is_board_member: false,
                        is_executive: true,
                        confidence: Confidence::High,
                        source_url: None,
                        provenance: Some("web".into()),
                    })
                    .collect(),
                changes: vec![],
                errors: vec![],
            }
        }
    }

    /// A source that panics on units whose name contains "Broken".
    struct ExplosiveSource;

    #[async_trait]
    impl EvidenceSource for ExplosiveSource {
        fn name(&self) -> &'static str {
            "news"
        }
        fn available(&self, _unit: &BusinessUnit) -> bool {
            true
        }
        async fn collect(&self, unit: &BusinessUnit) -> Collected {
            if unit.name.contains("Broken") {
                panic!("source exploded for {}", unit.name);
            }
            Collected::default()
        }
    }

    async fn test_storage() -> Arc<Storage> {
        let tmp = std::env::temp_dir().join(format!("orgscope_run_{}.db", Uuid::now_v7()));
        Arc::new(Storage::open(&tmp).await.expect("open test db"))
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
            registry_id: Some("0000012345".into()),
            jurisdiction: None,
            ownership_pct: None,
            description: None,
            discovery_sources: vec![],
        }
    }

    fn test_context(
        storage: Arc<Storage>,
        sources: Vec<Arc<dyn EvidenceSource>>,
        registry: Vec<FiledSubsidiary>,
    ) -> RunContext {
        let mut config = CollectionConfig::from(&AppConfig::default());
        config.rate_limit_ms = 0;
        let crawl = Arc::new(
            SharedCrawl::new(orgscope_crawler::CrawlerConfig {
                allowed_domains: vec![],
                max_pages: config.max_pages,
                max_depth: config.max_depth,
                concurrency: 4,
                rate_limit_ms: 0,
                cache_ttl_secs: config.cache_ttl_secs,
            })
            .allow_localhost(),
        );
        RunContext {
            storage,
            crawl,
            sources,
            classifier: Arc::new(NullClassifier),
            registry_client: Arc::new(CannedRegistry(registry)),
            config,
            model: "test-model".into(),
        }
    }

    // -----------------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn missing_parent_returns_unsuccessful_result() {
        let storage = test_storage().await;
        let ctx = test_context(storage, vec![], vec![]);

        let result = run_collection(&ctx, &UnitId::new(), &SilentProgress)
            .await
            .expect("result object, not an error");
        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("not found"));
    }

    #[tokio::test]
    async fn full_run_discovers_collects_and_charts() {
        let storage = test_storage().await;
        let parent_id = storage
            .upsert_unit(&test_unit(None, "Acme Corp", "acme"))
            .await
            .unwrap();

        let source = Arc::new(CannedSource {
            people: vec![
                ("Alice Lee".into(), "Chief Executive Officer".into()),
                ("Robert Chen".into(), "Chief Financial Officer".into()),
            ],
        });
        let ctx = test_context(
            storage.clone(),
            vec![source],
            vec![FiledSubsidiary {
                name: "Acme Robotics, Inc.".into(),
                jurisdiction: Some("Delaware".into()),
                ownership_pct: Some(100.0),
            }],
        );

        let result = run_collection(&ctx, &parent_id, &SilentProgress)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.units_discovered, 1);
        // Parent and child both collected the canned roster.
        assert_eq!(result.people_created, 4);
        assert_eq!(result.people_found, 4);
        assert!(result.errors.is_empty(), "errors: {:?}", result.errors);

        // Phase durations are recorded for every phase.
        for phase in ["discovery", "collection", "orgchart", "total"] {
            assert!(result.phase_durations_ms.contains_key(phase), "missing {phase}");
        }

        // The parent got a snapshot.
        assert_eq!(storage.count_snapshots(&parent_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let storage = test_storage().await;
        let parent_id = storage
            .upsert_unit(&test_unit(None, "Acme Corp", "acme"))
            .await
            .unwrap();

        let source = Arc::new(CannedSource {
            people: vec![("Alice Lee".into(), "Chief Executive Officer".into())],
        });
        let ctx = test_context(storage.clone(), vec![source], vec![]);

        let first = run_collection(&ctx, &parent_id, &SilentProgress).await.unwrap();
        assert_eq!(first.people_created, 1);

        let second = run_collection(&ctx, &parent_id, &SilentProgress).await.unwrap();
        assert_eq!(second.people_created, 0);
        assert_eq!(second.people_updated, 1);
        // Unchanged roster: no changes, one snapshot row for today.
        assert_eq!(second.changes_detected, 0);
        assert_eq!(storage.count_snapshots(&parent_id).await.unwrap(), 1);
        assert_eq!(storage.current_positions(&parent_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn roster_changes_between_runs_are_detected() {
        let storage = test_storage().await;
        let parent_id = storage
            .upsert_unit(&test_unit(None, "Acme Corp", "acme"))
            .await
            .unwrap();

        let first_source = Arc::new(CannedSource {
            people: vec![
                ("Alice Lee".into(), "VP Sales".into()),
                ("Bob Stone".into(), "Chief Financial Officer".into()),
            ],
        });
        let ctx = test_context(storage.clone(), vec![first_source], vec![]);
        run_collection(&ctx, &parent_id, &SilentProgress).await.unwrap();

        let second_source = Arc::new(CannedSource {
            people: vec![
                ("Alice Lee".into(), "SVP Sales".into()),
                ("Carol White".into(), "Chief Financial Officer".into()),
            ],
        });
        let ctx = test_context(storage.clone(), vec![second_source], vec![]);
        let result = run_collection(&ctx, &parent_id, &SilentProgress).await.unwrap();

        // Promotion (Alice), hire (Carol), departure (Bob).
        assert_eq!(result.changes_detected, 3);

        let changes = storage.list_changes(&parent_id, 1).await.unwrap();
        let types: Vec<ChangeType> = changes.iter().map(|c| c.change_type).collect();
        assert!(types.contains(&ChangeType::Promotion));
        assert!(types.contains(&ChangeType::Hire));
        assert!(types.contains(&ChangeType::Departure));

        // Alice's promotion superseded her VP row.
        let alice = storage
            .get_current_position(&parent_id, "alice lee")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alice.title, "SVP Sales");
    }

    #[tokio::test]
    async fn one_unit_failure_does_not_abort_siblings() {
        let storage = test_storage().await;
        let parent_id = storage
            .upsert_unit(&test_unit(None, "Acme Corp", "acme"))
            .await
            .unwrap();
        storage
            .upsert_unit(&test_unit(Some(&parent_id), "Broken Unit", "broken unit"))
            .await
            .unwrap();

        let canned = Arc::new(CannedSource {
            people: vec![("Alice Lee".into(), "Chief Executive Officer".into())],
        });
        let ctx = test_context(
            storage.clone(),
            vec![canned, Arc::new(ExplosiveSource)],
            vec![],
        );

        let result = run_collection(&ctx, &parent_id, &SilentProgress).await.unwrap();

        // The healthy units still collected, so the run succeeds with the
        // failure recorded against the broken unit's source task.
        assert!(result.success);
        assert!(result.people_created >= 1);
        assert!(
            result.errors.iter().any(|e| e.contains("source task")),
            "errors: {:?}",
            result.errors
        );
    }

    #[tokio::test]
    async fn unavailable_sources_are_skipped_with_warning() {
        let storage = test_storage().await;
        let mut parent = test_unit(None, "Acme Corp", "acme");
        parent.registry_id = None; // filing prerequisite missing
        let parent_id = storage.upsert_unit(&parent).await.unwrap();

        struct NeedsRegistry;
        #[async_trait]
        impl EvidenceSource for NeedsRegistry {
            fn name(&self) -> &'static str {
                "filing"
            }
            fn available(&self, unit: &BusinessUnit) -> bool {
                unit.registry_id.is_some()
            }
            async fn collect(&self, _unit: &BusinessUnit) -> Collected {
                Collected::default()
            }
        }

        let ctx = test_context(storage, vec![Arc::new(NeedsRegistry)], vec![]);
        let result = run_collection(&ctx, &parent_id, &SilentProgress).await.unwrap();

        assert!(result.success);
        assert!(
            result
                .warnings
                .iter()
                .any(|w| w.contains("filing") && w.contains("prerequisite")),
            "warnings: {:?}",
            result.warnings
        );
    }

    #[tokio::test]
    async fn disabled_sources_are_not_invoked() {
        let storage = test_storage().await;
        let parent_id = storage
            .upsert_unit(&test_unit(None, "Acme Corp", "acme"))
            .await
            .unwrap();

        let source = Arc::new(CannedSource {
            people: vec![("Alice Lee".into(), "CEO".into())],
        });
        let mut ctx = test_context(storage, vec![source], vec![]);
        ctx.config.enable_web = false;

        let result = run_collection(&ctx, &parent_id, &SilentProgress).await.unwrap();
        assert_eq!(result.people_found, 0);
    }

    #[tokio::test]
    async fn extracted_title_levels_survive_to_storage() {
        let storage = test_storage().await;
        let parent_id = storage
            .upsert_unit(&test_unit(None, "Acme Corp", "acme"))
            .await
            .unwrap();

        let source = Arc::new(CannedSource {
            people: vec![("Alice Lee".into(), "Chief Executive Officer".into())],
        });
        let ctx = test_context(storage.clone(), vec![source], vec![]);
        run_collection(&ctx, &parent_id, &SilentProgress).await.unwrap();

        let alice = storage
            .get_current_position(&parent_id, "alice lee")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alice.title_level, TitleLevel::CSuite);
        assert_eq!(alice.management_level, 1);
    }
}
