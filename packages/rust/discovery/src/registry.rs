//! Registry lookup contract and HTTP implementation.
//!
//! A registry is the authoritative discovery signal: the subsidiary exhibit
//! a public filer attaches to its filings, keyed by the filer's registry id
//! (e.g. an SEC CIK).

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use orgscope_shared::{OrgScopeError, Result};

/// One subsidiary row from a filing exhibit.
#[derive(Debug, Clone, Deserialize)]
pub struct FiledSubsidiary {
    pub name: String,
    #[serde(default)]
    pub jurisdiction: Option<String>,
    #[serde(default)]
    pub ownership_pct: Option<f64>,
}

/// Lookup contract consumed by structure discovery.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Fetch the filed subsidiary list for a registry id. An unknown id is
    /// an empty list, not an error.
    async fn get_filing_subsidiaries(&self, registry_id: &str) -> Result<Vec<FiledSubsidiary>>;
}

/// HTTP implementation against a configured registry endpoint serving
/// `GET {base_url}/subsidiaries/{registry_id}` as a JSON array.
pub struct HttpRegistryClient {
    base_url: String,
    client: Client,
}

impl HttpRegistryClient {
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
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    #[instrument(skip(self))]
    async fn get_filing_subsidiaries(&self, registry_id: &str) -> Result<Vec<FiledSubsidiary>> {
        let url = format!("{}/subsidiaries/{registry_id}", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| OrgScopeError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            debug!(registry_id, "no filings for registry id");
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(OrgScopeError::Network(format!("{url}: HTTP {status}")));
        }

        let subsidiaries: Vec<FiledSubsidiary> = response
            .json()
            .await
            .map_err(|e| OrgScopeError::parse(format!("registry response: {e}")))?;

        debug!(registry_id, count = subsidiaries.len(), "registry lookup complete");
        Ok(subsidiaries)
    }
}
