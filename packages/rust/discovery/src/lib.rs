//! Corporate structure discovery.
//!
//! Finds the business units belonging to a parent by combining up to three
//! signals — an authoritative registry listing, a heuristic scrape of the
//! parent's own site, and a general-knowledge classification query — then
//! merges them into a deduplicated, shell-filtered unit list.
//!
//! Discovery is read-only: persistence of the resulting units is the
//! orchestrator's job.

mod merge;
mod registry;
mod signals;

use tracing::{info, instrument, warn};
use url::Url;

use orgscope_crawler::Crawler;
use orgscope_shared::matching::normalize_unit_name;
use orgscope_shared::{BusinessUnit, Classifier, CollectionConfig, Result, UnitId};

pub use merge::{MergedUnit, UnitCandidate, merge_candidates};
pub use registry::{FiledSubsidiary, HttpRegistryClient, RegistryClient};
pub use signals::{general_knowledge_signal, registry_signal, website_signal};

/// Outcome of one discovery pass.
#[derive(Debug)]
pub struct DiscoveryOutcome {
    /// Deduplicated child units, ready to upsert under the parent.
    pub units: Vec<BusinessUnit>,
    /// Signal-level problems that did not stop discovery.
    pub warnings: Vec<String>,
}

/// Discover the business units belonging to `parent`.
///
/// Signals whose prerequisite is absent (no registry id, no website) are
/// skipped; a failing signal is downgraded to a warning so the remaining
/// signals still contribute.
#[instrument(skip_all, fields(parent = %parent.name))]
pub async fn discover_structure(
    parent: &BusinessUnit,
    crawler: &Crawler,
    registry_client: &dyn RegistryClient,
    classifier: &dyn Classifier,
    config: &CollectionConfig,
) -> Result<DiscoveryOutcome> {
    let mut candidates: Vec<UnitCandidate> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    if let Some(registry_id) = &parent.registry_id {
        match registry_signal(registry_client, registry_id).await {
            Ok(found) => candidates.extend(found),
            Err(e) => warnings.push(format!("registry signal: {e}")),
        }
    }

    if let Some(website) = &parent.website {
        match Url::parse(website) {
            Ok(base) => match website_signal(crawler, &base).await {
                Ok(found) => candidates.extend(found),
                Err(e) => warnings.push(format!("website signal: {e}")),
            },
            Err(e) => warnings.push(format!("website signal: invalid URL '{website}': {e}")),
        }
    }

    candidates.extend(general_knowledge_signal(
        classifier,
        &parent.name,
        config.max_units,
    ));

    // A unit is never its own child.
    let parent_key = normalize_unit_name(&parent.name);
    candidates.retain(|c| normalize_unit_name(&c.name) != parent_key);

    let merged = merge_candidates(candidates, config.max_units);

    let units = merged
        .into_iter()
        .map(|m| BusinessUnit {
            id: UnitId::new(),
            parent_id: Some(parent.id.clone()),
            name: m.name,
            normalized_name: m.normalized_name,
            website: m.website,
            domains: m.domains,
            unit_type: m.unit_type,
            is_public: m.is_public,
            registry_id: m.registry_id,
            jurisdiction: m.jurisdiction,
            ownership_pct: m.ownership_pct,
            description: m.description,
            discovery_sources: m.sources,
        })
        .collect::<Vec<_>>();

    for warning in &warnings {
        warn!(warning, "discovery signal degraded");
    }
    info!(units = units.len(), warnings = warnings.len(), "discovery complete");

    Ok(DiscoveryOutcome { units, warnings })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use orgscope_crawler::CrawlerConfig;
    use orgscope_shared::{
        ClassifyTask, DiscoverySource, NullClassifier, OrgScopeError, UnitType,
    };

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

    struct FailingRegistry;

    #[async_trait]
    impl RegistryClient for FailingRegistry {
        async fn get_filing_subsidiaries(
            &self,
            _registry_id: &str,
        ) -> Result<Vec<FiledSubsidiary>> {
            Err(OrgScopeError::Network("registry unreachable".into()))
        }
    }

    struct CannedClassifier(serde_json::Value);

    impl Classifier for CannedClassifier {
        fn classify(&self, _task: &ClassifyTask) -> Result<Option<serde_json::Value>> {
            Ok(Some(self.0.clone()))
        }
    }

    fn parent() -> BusinessUnit {
        BusinessUnit {
            id: UnitId::new(),
            parent_id: None,
            name: "Acme Corp".into(),
            normalized_name: "acme".into(),
            website: None,
            domains: vec![],
            unit_type: UnitType::Subsidiary,
            is_public: true,
            registry_id: Some("0000012345".into()),
            jurisdiction: None,
            ownership_pct: None,
            description: None,
            discovery_sources: vec![],
        }
    }

    fn offline_crawler() -> Crawler {
        Crawler::new(CrawlerConfig {
            allowed_domains: vec![],
            rate_limit_ms: 0,
            ..CrawlerConfig::default()
        })
        .unwrap()
    }

    fn test_config() -> CollectionConfig {
        CollectionConfig::from(&orgscope_shared::AppConfig::default())
    }

    #[tokio::test]
    async fn registry_and_knowledge_signals_combine() {
        let registry = CannedRegistry(vec![
            FiledSubsidiary {
                name: "Acme Robotics, Inc.".into(),
                jurisdiction: Some("Delaware".into()),
                ownership_pct: Some(100.0),
            },
            FiledSubsidiary {
                name: "Acme Funding Trust".into(),
                jurisdiction: Some("Delaware".into()),
                ownership_pct: None,
            },
        ]);
        let classifier = CannedClassifier(serde_json::json!([
            {"name": "Acme Robotics", "website": "https://acme-robotics.example"},
            {"name": "Acme Media", "description": "Streaming"},
        ]));

        let outcome = discover_structure(
            &parent(),
            &offline_crawler(),
            &registry,
            &classifier,
            &test_config(),
        )
        .await
        .unwrap();

        let names: Vec<&str> = outcome.units.iter().map(|u| u.name.as_str()).collect();
        // Registry row and general-knowledge row merge into one; the funding
        // trust is filtered; the media arm survives.
        assert_eq!(names, vec!["Acme Robotics, Inc.", "Acme Media"]);

        let robotics = &outcome.units[0];
        assert_eq!(robotics.jurisdiction.as_deref(), Some("Delaware"));
        assert_eq!(
            robotics.website.as_deref(),
            Some("https://acme-robotics.example")
        );
        assert_eq!(robotics.discovery_sources[0], DiscoverySource::Registry);
        assert!(robotics.parent_id.is_some());
    }

    #[tokio::test]
    async fn failing_registry_degrades_to_warning() {
        let classifier = CannedClassifier(serde_json::json!([{"name": "Acme Media"}]));

        let outcome = discover_structure(
            &parent(),
            &offline_crawler(),
            &FailingRegistry,
            &classifier,
            &test_config(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.units.len(), 1);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("registry signal"));
    }

    #[tokio::test]
    async fn parent_is_never_its_own_child() {
        let registry = CannedRegistry(vec![FiledSubsidiary {
            name: "Acme Corp".into(),
            jurisdiction: None,
            ownership_pct: None,
        }]);

        let outcome = discover_structure(
            &parent(),
            &offline_crawler(),
            &registry,
            &NullClassifier,
            &test_config(),
        )
        .await
        .unwrap();

        assert!(outcome.units.is_empty());
    }
}
