//! Filing evidence source: officer and director rosters from the registry.
//!
//! Units carrying a registry id have an authoritative roster in their public
//! filings; this source fetches it from the configured registry endpoint at
//! `GET {base_url}/officers/{registry_id}`.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use orgscope_crawler::fetch_with_retry;
use orgscope_shared::{BusinessUnit, Collected, Confidence, OrgScopeError, Result};

use crate::EvidenceSource;
use crate::extract::make_person;

/// One officer/director row from a filing.
#[derive(Debug, Clone, Deserialize)]
pub struct FiledOfficer {
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub is_director: bool,
}

/// Fetches officer rosters for units with a registry id.
pub struct FilingSource {
    base_url: String,
    client: Client,
}

impl FilingSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("OrgScope/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| OrgScopeError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn officers_url(&self, registry_id: &str) -> Result<Url> {
        Url::parse(&format!("{}/officers/{registry_id}", self.base_url))
            .map_err(|e| OrgScopeError::validation(format!("bad registry URL: {e}")))
    }
}

#[async_trait]
impl EvidenceSource for FilingSource {
    fn name(&self) -> &'static str {
        "filing"
    }

    fn available(&self, unit: &BusinessUnit) -> bool {
        unit.registry_id.is_some()
    }

    #[instrument(skip_all, fields(unit = %unit.name))]
    async fn collect(&self, unit: &BusinessUnit) -> Collected {
        let mut collected = Collected::default();

        let Some(registry_id) = &unit.registry_id else {
            return collected;
        };

        let url = match self.officers_url(registry_id) {
            Ok(url) => url,
            Err(e) => {
                collected.errors.push(e.to_string());
                return collected;
            }
        };

        let body = match fetch_with_retry(&self.client, &url).await {
            Ok(Some(body)) => body,
            Ok(None) => {
                debug!(registry_id, "no officer filing for registry id");
                return collected;
            }
            Err(e) => {
                collected.errors.push(format!("filing fetch: {e}"));
                return collected;
            }
        };

        let officers: Vec<FiledOfficer> = match serde_json::from_str(&body) {
            Ok(officers) => officers,
            Err(e) => {
                collected.errors.push(format!("filing parse: {e}"));
                return collected;
            }
        };

        for officer in officers {
            // Filings are authoritative: high confidence.
            if let Some(mut person) = make_person(
                &officer.name,
                &officer.title,
                Confidence::High,
                Some(url.as_str()),
                "filing",
            ) {
                person.is_board_member |= officer.is_director;
                collected.people.push(person);
            }
        }

        debug!(people = collected.people.len(), "filing source complete");
        collected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orgscope_shared::{TitleLevel, UnitId, UnitType};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn unit_with_registry(registry_id: &str) -> BusinessUnit {
        BusinessUnit {
            id: UnitId::new(),
            parent_id: None,
            name: "Acme Corp".into(),
            normalized_name: "acme".into(),
            website: None,
            domains: vec![],
            unit_type: UnitType::Subsidiary,
            is_public: true,
            registry_id: Some(registry_id.into()),
            jurisdiction: None,
            ownership_pct: None,
            description: None,
            discovery_sources: vec![],
        }
    }

    #[tokio::test]
    async fn collects_officer_roster() {
        let server = MockServer::start().await;
        let body = serde_json::json!([
            {"name": "Alice Lee", "title": "Chief Executive Officer"},
            {"name": "Bob Stone", "title": "Director", "is_director": true},
            {"name": "Leadership Team", "title": "n/a"},
        ]);
        Mock::given(method("GET"))
            .and(path("/officers/0000012345"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .mount(&server)
            .await;

        let source = FilingSource::new(server.uri()).unwrap();
        let unit = unit_with_registry("0000012345");
        assert!(source.available(&unit));

        let collected = source.collect(&unit).await;
        // The pseudo-row fails name validation and is silently dropped.
        assert_eq!(collected.people.len(), 2);
        assert!(collected.errors.is_empty());

        let ceo = &collected.people[0];
        assert_eq!(ceo.confidence, Confidence::High);
        assert_eq!(ceo.title_level, TitleLevel::CSuite);
        assert_eq!(ceo.provenance.as_deref(), Some("filing"));

        let director = &collected.people[1];
        assert!(director.is_board_member);
    }

    #[tokio::test]
    async fn missing_filing_is_empty_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/officers/none"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let source = FilingSource::new(server.uri()).unwrap();
        let collected = source.collect(&unit_with_registry("none")).await;
        assert!(collected.people.is_empty());
        assert!(collected.errors.is_empty());
    }

    #[tokio::test]
    async fn malformed_filing_is_soft_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/officers/bad"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let source = FilingSource::new(server.uri()).unwrap();
        let collected = source.collect(&unit_with_registry("bad")).await;
        assert!(collected.people.is_empty());
        assert_eq!(collected.errors.len(), 1);
        assert!(collected.errors[0].contains("filing parse"));
    }

    #[test]
    fn unavailable_without_registry_id() {
        let source = FilingSource::new("https://filings.example").unwrap();
        let mut unit = unit_with_registry("x");
        unit.registry_id = None;
        assert!(!source.available(&unit));
    }
}
