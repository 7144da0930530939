//! Web evidence source: scrape a unit's own leadership/about pages.

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::OnceLock;
use tracing::{debug, instrument};
use url::Url;

use orgscope_crawler::SharedCrawl;
use orgscope_shared::matching::normalize_person_name;
use orgscope_shared::{BusinessUnit, Collected, Confidence};

use crate::EvidenceSource;
use crate::extract::make_person;

/// Paths likely to list leadership, tried relative to the unit's site root.
const LEADERSHIP_PATHS: &[&str] = &[
    "/leadership",
    "/about/leadership",
    "/about-us/leadership",
    "/team",
    "/our-team",
    "/about/team",
    "/management",
    "/company/leadership",
    "/about",
    "/about-us",
];

fn leadership_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(leadership|management|team|officers|executives|board of directors)\b")
            .expect("valid leadership pattern")
    })
}

/// Scrapes leadership pages on the unit's own website.
pub struct WebLeadershipSource {
    crawl: Arc<SharedCrawl>,
}

impl WebLeadershipSource {
    pub fn new(crawl: Arc<SharedCrawl>) -> Self {
        Self { crawl }
    }
}

#[async_trait]
impl EvidenceSource for WebLeadershipSource {
    fn name(&self) -> &'static str {
        "web"
    }

    fn available(&self, unit: &BusinessUnit) -> bool {
        unit.website.is_some()
    }

    #[instrument(skip_all, fields(unit = %unit.name))]
    async fn collect(&self, unit: &BusinessUnit) -> Collected {
        let mut collected = Collected::default();

        let Some(website) = &unit.website else {
            return collected;
        };
        let base = match Url::parse(website) {
            Ok(base) => base,
            Err(e) => {
                collected.errors.push(format!("invalid website '{website}': {e}"));
                return collected;
            }
        };

        let crawler = match self
            .crawl
            .scoped_for_hosts(unit.website.as_deref(), &unit.domains)
        {
            Ok(crawler) => crawler,
            Err(e) => {
                collected.errors.push(format!("crawler setup: {e}"));
                return collected;
            }
        };

        let seeds: Vec<Url> = LEADERSHIP_PATHS
            .iter()
            .filter_map(|path| base.join(path).ok())
            .collect();

        let (report, pages) = crawler.crawl(&seeds).await;
        collected
            .errors
            .extend(report.errors.into_iter().map(|(url, e)| format!("{url}: {e}")));

        let mut seen: HashSet<String> = HashSet::new();

        for page in &pages {
            let doc = Html::parse_document(&page.body);
            let is_leadership_page = leadership_pattern().is_match(page.url.path())
                || heading_mentions_leadership(&doc);
            if !is_leadership_page {
                continue;
            }

            // Dedicated leadership pages earn higher confidence than
            // generic about pages that happen to mention the team.
            let confidence = if leadership_pattern().is_match(page.url.path()) {
                Confidence::High
            } else {
                Confidence::Medium
            };

            for (name, title) in extract_people(&doc) {
                let key = normalize_person_name(&name);
                if key.is_empty() || !seen.insert(key) {
                    continue;
                }
                if let Some(person) =
                    make_person(&name, &title, confidence, Some(page.url.as_str()), "web")
                {
                    collected.people.push(person);
                }
            }
        }

        debug!(
            people = collected.people.len(),
            errors = collected.errors.len(),
            "web source complete"
        );
        collected
    }
}

fn heading_mentions_leadership(doc: &Html) -> bool {
    let heading_sel = Selector::parse("h1, h2").unwrap();
    doc.select(&heading_sel).any(|el| {
        let text = el.text().collect::<String>();
        leadership_pattern().is_match(&text)
    })
}

/// Extract (name, title) pairs from leadership-page markup.
///
/// Two complementary passes: heading elements followed by a title element
/// (the common profile-card layout), and single text nodes of the form
/// "Name — Title" / "Name, Title".
fn extract_people(doc: &Html) -> Vec<(String, String)> {
    let mut people = Vec::new();

    // Pass 1: card headings with the title in the next element.
    let heading_sel = Selector::parse("h2, h3, h4, strong").unwrap();
    for el in doc.select(&heading_sel) {
        let name = el.text().collect::<String>().trim().to_string();
        if name.is_empty() {
            continue;
        }
        if let Some(title) = following_text(&el) {
            people.push((name, title));
        }
    }

    // Pass 2: "Name — Title" / "Name - Title" / "Name, Title" list items.
    let item_sel = Selector::parse("li, p").unwrap();
    for el in doc.select(&item_sel) {
        let text = el.text().collect::<String>();
        let text = text.trim();
        for separator in [" — ", " – ", " - ", ", "] {
            if let Some((name, title)) = text.split_once(separator) {
                people.push((name.trim().to_string(), title.trim().to_string()));
                break;
            }
        }
    }

    people
}

/// Text of the first non-empty element following `el` (a card heading's
/// title line).
fn following_text(el: &ElementRef) -> Option<String> {
    for sibling in el.next_siblings() {
        if let Some(sibling_el) = ElementRef::wrap(sibling) {
            let text = sibling_el.text().collect::<String>().trim().to_string();
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use orgscope_crawler::CrawlerConfig;
    use orgscope_shared::{TitleLevel, UnitId, UnitType};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn unit_with_website(website: &str) -> BusinessUnit {
        BusinessUnit {
            id: UnitId::new(),
            parent_id: None,
            name: "Acme Corp".into(),
            normalized_name: "acme".into(),
            website: Some(website.into()),
            domains: vec![],
            unit_type: UnitType::Subsidiary,
            is_public: false,
            registry_id: None,
            jurisdiction: None,
            ownership_pct: None,
            description: None,
            discovery_sources: vec![],
        }
    }

    fn test_crawl() -> Arc<SharedCrawl> {
        Arc::new(
            SharedCrawl::new(CrawlerConfig {
                allowed_domains: vec![],
                max_pages: 15,
                max_depth: 0,
                concurrency: 2,
                rate_limit_ms: 0,
                cache_ttl_secs: 60,
            })
            .allow_localhost(),
        )
    }

    #[test]
    fn extracts_card_layout() {
        let html = r#"<html><body>
            <h1>Leadership</h1>
            <div class="card"><h3>Alice Lee</h3><p>Chief Executive Officer</p></div>
            <div class="card"><h3>Robert Chen</h3><p>Chief Financial Officer</p></div>
        </body></html>"#;
        let doc = Html::parse_document(html);
        let people = extract_people(&doc);
        assert!(people.contains(&("Alice Lee".into(), "Chief Executive Officer".into())));
        assert!(people.contains(&("Robert Chen".into(), "Chief Financial Officer".into())));
    }

    #[test]
    fn extracts_list_layout() {
        let html = r#"<html><body>
            <h2>Management Team</h2>
            <ul>
                <li>Alice Lee — Chief Executive Officer</li>
                <li>Robert Chen, Chief Financial Officer</li>
            </ul>
        </body></html>"#;
        let doc = Html::parse_document(html);
        let people = extract_people(&doc);
        assert!(people.contains(&("Alice Lee".into(), "Chief Executive Officer".into())));
        assert!(people.contains(&("Robert Chen".into(), "Chief Financial Officer".into())));
    }

    #[tokio::test]
    async fn collects_people_from_leadership_page() {
        let server = MockServer::start().await;

        let leadership = r#"<html><body>
            <h1>Our Leadership</h1>
            <div><h3>Alice Lee</h3><p>Chief Executive Officer</p></div>
            <div><h3>Robert Chen</h3><p>Chief Financial Officer</p></div>
            <div><h3>Contact Us</h3><p>Get in touch</p></div>
        </body></html>"#;

        Mock::given(method("GET"))
            .and(path("/leadership"))
            .respond_with(ResponseTemplate::new(200).set_body_string(leadership))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let source = WebLeadershipSource::new(test_crawl());
        let unit = unit_with_website(&server.uri());
        assert!(source.available(&unit));

        let collected = source.collect(&unit).await;
        assert_eq!(collected.people.len(), 2);

        let ceo = collected
            .people
            .iter()
            .find(|p| p.full_name == "Alice Lee")
            .expect("ceo extracted");
        assert_eq!(ceo.title_level, TitleLevel::CSuite);
        assert_eq!(ceo.confidence, Confidence::High);
        assert!(ceo.is_executive);
        assert_eq!(ceo.provenance.as_deref(), Some("web"));
    }

    #[tokio::test]
    async fn unavailable_without_website() {
        let server = MockServer::start().await;
        let source = WebLeadershipSource::new(test_crawl());
        let mut unit = unit_with_website(&server.uri());
        unit.website = None;
        assert!(!source.available(&unit));

        // collect on an unavailable unit is an empty result, not a failure.
        let collected = source.collect(&unit).await;
        assert!(collected.people.is_empty());
        assert!(collected.errors.is_empty());
    }
}
