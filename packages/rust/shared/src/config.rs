//! Application configuration for OrgScope.
//!
//! User config lives at `~/.orgscope/orgscope.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{OrgScopeError, Result};
use crate::types::Confidence;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "orgscope.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".orgscope";

// ---------------------------------------------------------------------------
// Config structs (matching orgscope.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults and budgets.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Classification bridge settings.
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Collection policies (rate limiting, caching, source toggles).
    #[serde(default)]
    pub collection: CollectionPoliciesConfig,

    /// Filings registry endpoint.
    #[serde(default)]
    pub registry: RegistryConfig,
}

/// `[defaults]` section — budgets and thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Database path (relative paths resolve against the working directory).
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Maximum business units kept per discovery run.
    #[serde(default = "default_max_units")]
    pub max_units: usize,

    /// Maximum units collected concurrently.
    #[serde(default = "default_max_concurrent_units")]
    pub max_concurrent_units: usize,

    /// Page budget per crawl.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Link depth budget per crawl.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Search/listing-page budget for the news source.
    #[serde(default = "default_max_searches")]
    pub max_searches: usize,

    /// Minimum significance for a change to be reported.
    #[serde(default = "default_min_significance")]
    pub min_significance: u8,

    /// Fuzzy name-match threshold for roster diffing.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            max_units: default_max_units(),
            max_concurrent_units: default_max_concurrent_units(),
            max_pages: default_max_pages(),
            max_depth: default_max_depth(),
            max_searches: default_max_searches(),
            min_significance: default_min_significance(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

fn default_db_path() -> String {
    "var/orgscope.db".into()
}
fn default_max_units() -> usize {
    25
}
fn default_max_concurrent_units() -> usize {
    4
}
fn default_max_pages() -> usize {
    30
}
fn default_max_depth() -> u32 {
    3
}
fn default_max_searches() -> usize {
    5
}
fn default_min_significance() -> u8 {
    1
}
fn default_similarity_threshold() -> f64 {
    0.85
}

/// `[classifier]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model identifier passed to the bridge.
    #[serde(default = "default_model")]
    pub model: String,

    /// Bridge command (e.g. "bun").
    #[serde(default = "default_bridge_cmd")]
    pub bridge_cmd: String,

    /// Bridge script path.
    #[serde(default = "default_bridge_script")]
    pub bridge_script: String,

    /// Whether classification calls are made at all. When false every
    /// call site takes its documented fallback.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            model: default_model(),
            bridge_cmd: default_bridge_cmd(),
            bridge_script: default_bridge_script(),
            enabled: true,
        }
    }
}

fn default_api_key_env() -> String {
    "ORGSCOPE_API_KEY".into()
}
fn default_model() -> String {
    "moonshotai/kimi-k2.5".into()
}
fn default_bridge_cmd() -> String {
    "bun".into()
}
fn default_bridge_script() -> String {
    "packages/ts/classifier-provider/src/bridge.ts".into()
}

/// `[collection]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionPoliciesConfig {
    /// Minimum ms between requests to the same domain.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_ms: u64,

    /// Response cache TTL in seconds.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Source toggles.
    #[serde(default = "default_true")]
    pub enable_web: bool,
    #[serde(default = "default_true")]
    pub enable_filing: bool,
    #[serde(default = "default_true")]
    pub enable_news: bool,

    /// Confidence assigned to absence-based departure inference.
    #[serde(default = "default_departure_confidence")]
    pub departure_confidence: String,
}

impl Default for CollectionPoliciesConfig {
    fn default() -> Self {
        Self {
            rate_limit_ms: default_rate_limit(),
            cache_ttl_secs: default_cache_ttl(),
            enable_web: true,
            enable_filing: true,
            enable_news: true,
            departure_confidence: default_departure_confidence(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_rate_limit() -> u64 {
    500
}
fn default_cache_ttl() -> u64 {
    900
}
fn default_departure_confidence() -> String {
    "low".into()
}

/// `[registry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Base URL of the filings registry endpoint.
    #[serde(default = "default_registry_base_url")]
    pub base_url: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: default_registry_base_url(),
        }
    }
}

fn default_registry_base_url() -> String {
    "https://filings.orgscope.dev".into()
}

// ---------------------------------------------------------------------------
// Collection config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime collection configuration — merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct CollectionConfig {
    pub max_units: usize,
    pub max_concurrent_units: usize,
    pub max_pages: usize,
    pub max_depth: u32,
    pub max_searches: usize,
    pub min_significance: u8,
    pub similarity_threshold: f64,
    pub rate_limit_ms: u64,
    pub cache_ttl_secs: u64,
    pub enable_web: bool,
    pub enable_filing: bool,
    pub enable_news: bool,
    pub departure_confidence: Confidence,
    pub registry_base_url: String,
}

impl From<&AppConfig> for CollectionConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_units: config.defaults.max_units,
            max_concurrent_units: config.defaults.max_concurrent_units,
            max_pages: config.defaults.max_pages,
            max_depth: config.defaults.max_depth,
            max_searches: config.defaults.max_searches,
            min_significance: config.defaults.min_significance,
            similarity_threshold: config.defaults.similarity_threshold,
            rate_limit_ms: config.collection.rate_limit_ms,
            cache_ttl_secs: config.collection.cache_ttl_secs,
            enable_web: config.collection.enable_web,
            enable_filing: config.collection.enable_filing,
            enable_news: config.collection.enable_news,
            departure_confidence: Confidence::parse(&config.collection.departure_confidence),
            registry_base_url: config.registry.base_url.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.orgscope/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| OrgScopeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.orgscope/orgscope.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| OrgScopeError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| OrgScopeError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| OrgScopeError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| OrgScopeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| OrgScopeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("max_units"));
        assert!(toml_str.contains("ORGSCOPE_API_KEY"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.defaults.max_units, 25);
        assert_eq!(parsed.defaults.similarity_threshold, 0.85);
        assert_eq!(parsed.classifier.api_key_env, "ORGSCOPE_API_KEY");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[defaults]
max_units = 10

[collection]
enable_news = false
departure_confidence = "medium"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.defaults.max_units, 10);
        assert_eq!(config.defaults.max_pages, 30);
        assert!(!config.collection.enable_news);
        assert!(config.collection.enable_web);
    }

    #[test]
    fn collection_config_from_app_config() {
        let toml_str = r#"
[collection]
departure_confidence = "medium"
"#;
        let app: AppConfig = toml::from_str(toml_str).expect("parse");
        let runtime = CollectionConfig::from(&app);
        assert_eq!(runtime.max_concurrent_units, 4);
        assert_eq!(runtime.rate_limit_ms, 500);
        assert_eq!(runtime.departure_confidence, Confidence::Medium);
    }
}
