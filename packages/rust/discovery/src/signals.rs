//! The three structure-discovery signals.
//!
//! Each signal produces a list of [`UnitCandidate`]s tagged with its source.
//! Signals are independent: one failing never blocks the others, and the
//! merge step reconciles their overlap.

use regex::Regex;
use scraper::{Html, Selector};
use std::sync::OnceLock;
use tracing::{debug, instrument, warn};
use url::Url;

use orgscope_crawler::Crawler;
use orgscope_shared::{Classifier, ClassifyTask, DiscoverySource, Result, UnitType};

use crate::merge::UnitCandidate;
use crate::registry::RegistryClient;

// ---------------------------------------------------------------------------
// Registry signal
// ---------------------------------------------------------------------------

/// Authoritative signal: the subsidiary exhibit filed under a registry id.
#[instrument(skip(client))]
pub async fn registry_signal(
    client: &dyn RegistryClient,
    registry_id: &str,
) -> Result<Vec<UnitCandidate>> {
    let filed = client.get_filing_subsidiaries(registry_id).await?;

    let candidates = filed
        .into_iter()
        .filter(|f| !f.name.trim().is_empty())
        .map(|f| {
            let mut candidate = UnitCandidate::new(f.name.trim(), DiscoverySource::Registry);
            candidate.jurisdiction = f.jurisdiction;
            candidate.ownership_pct = f.ownership_pct;
            candidate
        })
        .collect::<Vec<_>>();

    debug!(count = candidates.len(), "registry signal complete");
    Ok(candidates)
}

// ---------------------------------------------------------------------------
// Website signal
// ---------------------------------------------------------------------------

/// Paths likely to describe corporate structure, tried relative to the root.
const STRUCTURE_PATHS: &[&str] = &[
    "/",
    "/about",
    "/about-us",
    "/our-companies",
    "/companies",
    "/our-brands",
    "/brands",
    "/portfolio",
    "/businesses",
    "/subsidiaries",
];

fn structure_heading_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(our\s+)?(brands|companies|businesses|subsidiaries|divisions|portfolio)\b")
            .expect("valid heading pattern")
    })
}

/// Heuristic signal: crawl the parent's own site for brand/company listings.
#[instrument(skip(crawler), fields(website = %website))]
pub async fn website_signal(crawler: &Crawler, website: &Url) -> Result<Vec<UnitCandidate>> {
    let seeds: Vec<Url> = STRUCTURE_PATHS
        .iter()
        .filter_map(|path| website.join(path).ok())
        .collect();

    let (report, pages) = crawler.crawl(&seeds).await;
    for (url, error) in &report.errors {
        warn!(url, error, "website signal page failed");
    }

    let mut candidates = Vec::new();
    for page in &pages {
        let doc = Html::parse_document(&page.body);
        if !page_mentions_structure(&doc, page.url.path()) {
            continue;
        }
        candidates.extend(extract_unit_names(&doc));
    }

    // The same brand often appears on several pages.
    candidates.sort();
    candidates.dedup();

    let candidates = candidates
        .into_iter()
        .map(|name| {
            let mut candidate = UnitCandidate::new(name, DiscoverySource::Website);
            candidate.unit_type = UnitType::Division;
            candidate
        })
        .collect::<Vec<_>>();

    debug!(count = candidates.len(), "website signal complete");
    Ok(candidates)
}

/// Whether the page plausibly describes corporate structure: either the URL
/// path or a heading matches the structure keywords.
fn page_mentions_structure(doc: &Html, path: &str) -> bool {
    if structure_heading_pattern().is_match(path) {
        return true;
    }
    let heading_sel = Selector::parse("h1, h2, h3").unwrap();
    doc.select(&heading_sel).any(|el| {
        let text = el.text().collect::<String>();
        structure_heading_pattern().is_match(&text)
    })
}

/// Pull plausible unit names out of listing markup: list items and card
/// headings with short, capitalized text.
fn extract_unit_names(doc: &Html) -> Vec<String> {
    let item_sel = Selector::parse("li a, li, h3, h4").unwrap();
    let mut names = Vec::new();

    for el in doc.select(&item_sel) {
        let text = el.text().collect::<String>();
        let text = text.trim();
        if looks_like_unit_name(text) {
            names.push(text.to_string());
        }
    }

    names
}

/// Navigation words that frequently appear in list markup but never name a
/// business unit.
const NAV_WORDS: &[&str] = &[
    "home", "about", "contact", "careers", "news", "privacy", "terms", "login", "search",
    "investors", "sitemap", "cookie", "legal", "blog", "support", "faq",
];

fn looks_like_unit_name(text: &str) -> bool {
    let word_count = text.split_whitespace().count();
    if !(1..=6).contains(&word_count) || text.len() > 80 {
        return false;
    }
    let lowered = text.to_lowercase();
    if NAV_WORDS.iter().any(|w| lowered == *w || lowered.starts_with(&format!("{w} "))) {
        return false;
    }
    // Must start with an uppercase letter and contain no sentence punctuation.
    text.chars().next().is_some_and(|c| c.is_uppercase())
        && !text.contains('.')
        && !text.contains('?')
}

// ---------------------------------------------------------------------------
// General-knowledge signal
// ---------------------------------------------------------------------------

/// Classification-backed signal: ask the model for known subsidiaries.
/// A null or malformed answer is an empty list, never an error.
#[instrument(skip(classifier))]
pub fn general_knowledge_signal(
    classifier: &dyn Classifier,
    parent_name: &str,
    max_units: usize,
) -> Vec<UnitCandidate> {
    let task = ClassifyTask::new(
        "subsidiary_list",
        format!(
            "List up to {max_units} current subsidiaries and divisions of {parent_name}. \
             Respond with a JSON array of objects with fields: name, website, description."
        ),
    );

    let value = match classifier.classify(&task) {
        Ok(Some(value)) => value,
        Ok(None) => {
            debug!("general-knowledge signal declined");
            return Vec::new();
        }
        Err(e) => {
            warn!(error = %e, "general-knowledge signal failed");
            return Vec::new();
        }
    };

    parse_subsidiary_json(&value, max_units)
}

/// Parse a classifier answer defensively: accept either a bare array or an
/// object with a `subsidiaries` array; skip entries without a usable name.
fn parse_subsidiary_json(value: &serde_json::Value, max_units: usize) -> Vec<UnitCandidate> {
    let items = value
        .as_array()
        .or_else(|| value.get("subsidiaries").and_then(|v| v.as_array()));

    let Some(items) = items else {
        warn!("general-knowledge answer had unexpected shape");
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let name = item.get("name").and_then(|v| v.as_str())?.trim();
            if name.is_empty() {
                return None;
            }
            let mut candidate = UnitCandidate::new(name, DiscoverySource::GeneralKnowledge);
            candidate.website = item
                .get("website")
                .and_then(|v| v.as_str())
                .map(String::from);
            candidate.description = item
                .get("description")
                .and_then(|v| v.as_str())
                .map(String::from);
            Some(candidate)
        })
        .take(max_units)
        .collect()
}
