//! News evidence source: leadership changes parsed from press-release
//! headlines on the unit's newsroom pages.

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::OnceLock;
use tracing::{debug, instrument};
use url::Url;
use uuid::Uuid;

use orgscope_crawler::SharedCrawl;
use orgscope_shared::matching::{
    normalize_person_name, score_significance, title_level,
};
use orgscope_shared::{
    BusinessUnit, ChangeType, Collected, Confidence, LeadershipChange, TitleLevel,
};

use crate::EvidenceSource;
use crate::extract::validate_person_name;

/// Newsroom paths tried relative to the unit's site root.
const NEWS_PATHS: &[&str] = &[
    "/news",
    "/newsroom",
    "/press",
    "/press-releases",
    "/media",
];

struct HeadlinePatterns {
    appointment: Regex,
    promotion: Regex,
    interim: Regex,
    board: Regex,
    retirement: Regex,
    departure: Regex,
}

fn patterns() -> &'static HeadlinePatterns {
    static PATTERNS: OnceLock<HeadlinePatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| HeadlinePatterns {
        appointment: Regex::new(
            r"(?i)\b(?:appoints|names|hires|welcomes)\s+(?P<person>[A-Z][\w.'-]+(?:\s+[A-Z][\w.'-]+){1,3})\s+as\s+(?P<title>[^,;]+)",
        )
        .expect("valid appointment pattern"),
        promotion: Regex::new(
            r"(?i)\bpromotes\s+(?P<person>[A-Z][\w.'-]+(?:\s+[A-Z][\w.'-]+){1,3})\s+to\s+(?P<title>[^,;]+)",
        )
        .expect("valid promotion pattern"),
        interim: Regex::new(
            r"(?i)\b(?P<person>[A-Z][\w.'-]+(?:\s+[A-Z][\w.'-]+){1,3})\s+(?:named|appointed)\s+(?:as\s+)?interim\s+(?P<title>[^,;]+)",
        )
        .expect("valid interim pattern"),
        board: Regex::new(
            r"(?i)\b(?P<person>[A-Z][\w.'-]+(?:\s+[A-Z][\w.'-]+){1,3})\s+joins\s+(?:the\s+)?board",
        )
        .expect("valid board pattern"),
        retirement: Regex::new(
            r"(?i)\b(?P<person>[A-Z][\w.'-]+(?:\s+[A-Z][\w.'-]+){1,3})\s+(?:to\s+retire|retires|announces\s+retirement)(?:\s+as\s+(?P<title>[^,;]+))?",
        )
        .expect("valid retirement pattern"),
        departure: Regex::new(
            r"(?i)\b(?P<person>[A-Z][\w.'-]+(?:\s+[A-Z][\w.'-]+){1,3})\s+(?:steps\s+down|resigns|departs)(?:\s+as\s+(?P<title>[^,;]+))?",
        )
        .expect("valid departure pattern"),
    })
}

/// Parses leadership-change headlines from the unit's newsroom.
pub struct NewsSource {
    crawl: Arc<SharedCrawl>,
    /// Listing-page budget per unit.
    max_searches: usize,
}

impl NewsSource {
    pub fn new(crawl: Arc<SharedCrawl>, max_searches: usize) -> Self {
        Self {
            crawl,
            max_searches,
        }
    }
}

#[async_trait]
impl EvidenceSource for NewsSource {
    fn name(&self) -> &'static str {
        "news"
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

        let seeds: Vec<Url> = NEWS_PATHS
            .iter()
            .take(self.max_searches)
            .filter_map(|path| base.join(path).ok())
            .collect();

        let (report, pages) = crawler.crawl(&seeds).await;
        collected
            .errors
            .extend(report.errors.into_iter().map(|(url, e)| format!("{url}: {e}")));

        let mut seen: HashSet<(String, ChangeType)> = HashSet::new();

        for page in &pages {
            let doc = Html::parse_document(&page.body);
            for headline in extract_headlines(&doc) {
                let Some(change) = parse_headline(&headline, unit, page.url.as_str()) else {
                    continue;
                };
                if seen.insert((change.normalized_name.clone(), change.change_type)) {
                    collected.changes.push(change);
                }
            }
        }

        debug!(
            changes = collected.changes.len(),
            errors = collected.errors.len(),
            "news source complete"
        );
        collected
    }
}

/// Headline candidates: article links, list links, and headings.
fn extract_headlines(doc: &Html) -> Vec<String> {
    let sel = Selector::parse("h1, h2, h3, article a, li a").unwrap();
    let mut headlines: Vec<String> = doc
        .select(&sel)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty() && t.len() < 200)
        .collect();
    headlines.dedup();
    headlines
}

/// Parse one headline into a change record, or `None` when no pattern
/// matches or the person name fails validation.
pub(crate) fn parse_headline(
    headline: &str,
    unit: &BusinessUnit,
    source_url: &str,
) -> Option<LeadershipChange> {
    let p = patterns();

    let (change_type, person, new_title, old_title): (ChangeType, String, Option<String>, Option<String>) =
        if let Some(caps) = p.interim.captures(headline) {
            (
                ChangeType::Interim,
                caps["person"].to_string(),
                Some(caps["title"].trim().to_string()),
                None,
            )
        } else if let Some(caps) = p.board.captures(headline) {
            (
                ChangeType::BoardAppointment,
                caps["person"].to_string(),
                Some("Board Member".to_string()),
                None,
            )
        } else if let Some(caps) = p.promotion.captures(headline) {
            (
                ChangeType::Promotion,
                caps["person"].to_string(),
                Some(caps["title"].trim().to_string()),
                None,
            )
        } else if let Some(caps) = p.retirement.captures(headline) {
            (
                ChangeType::Retirement,
                caps["person"].to_string(),
                None,
                caps.name("title").map(|m| m.as_str().trim().to_string()),
            )
        } else if let Some(caps) = p.departure.captures(headline) {
            (
                ChangeType::Departure,
                caps["person"].to_string(),
                None,
                caps.name("title").map(|m| m.as_str().trim().to_string()),
            )
        } else if let Some(caps) = p.appointment.captures(headline) {
            (
                ChangeType::Hire,
                caps["person"].to_string(),
                Some(caps["title"].trim().to_string()),
                None,
            )
        } else {
            return None;
        };

    if !validate_person_name(&person) {
        return None;
    }

    let title_of_record = new_title.as_deref().or(old_title.as_deref());
    let is_c_suite = title_of_record
        .is_some_and(|t| matches!(title_level(t), TitleLevel::CSuite));
    let is_board = change_type == ChangeType::BoardAppointment
        || change_type == ChangeType::BoardDeparture
        || title_of_record.is_some_and(|t| matches!(title_level(t), TitleLevel::Board));

    let confidence = Confidence::Medium;
    let significance = score_significance(
        change_type,
        old_title.as_deref(),
        new_title.as_deref(),
        is_c_suite,
        is_board,
        confidence,
    );

    Some(LeadershipChange {
        id: Uuid::now_v7().to_string(),
        unit_id: unit.id.clone(),
        normalized_name: normalize_person_name(&person),
        person_name: person,
        change_type,
        old_title,
        new_title,
        announced_date: None,
        effective_date: None,
        is_c_suite,
        is_board,
        significance,
        confidence,
        source_type: Some("news".into()),
        source_url: Some(source_url.to_string()),
        detail: Some(headline.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use orgscope_crawler::CrawlerConfig;
    use orgscope_shared::{UnitId, UnitType};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_unit() -> BusinessUnit {
        BusinessUnit {
            id: UnitId::new(),
            parent_id: None,
            name: "Acme Corp".into(),
            normalized_name: "acme".into(),
            website: Some("https://acme.example".into()),
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

    #[test]
    fn parses_appointment_headline() {
        let unit = test_unit();
        let change = parse_headline(
            "Acme Corp Appoints Alice Lee as Chief Executive Officer",
            &unit,
            "https://acme.example/news/1",
        )
        .expect("appointment parsed");
        assert_eq!(change.change_type, ChangeType::Hire);
        assert_eq!(change.person_name, "Alice Lee");
        assert_eq!(change.new_title.as_deref(), Some("Chief Executive Officer"));
        assert!(change.is_c_suite);
        // 5 + 3 (c-suite) + 2 (ceo keyword) = 10
        assert_eq!(change.significance, 10);
    }

    #[test]
    fn parses_promotion_headline() {
        let unit = test_unit();
        let change = parse_headline(
            "Acme Promotes Robert Chen to Senior Vice President",
            &unit,
            "https://acme.example/news/2",
        )
        .expect("promotion parsed");
        assert_eq!(change.change_type, ChangeType::Promotion);
        assert_eq!(change.person_name, "Robert Chen");
    }

    #[test]
    fn parses_retirement_headline() {
        let unit = test_unit();
        let change = parse_headline(
            "Jane Morgan to Retire as Chief Financial Officer",
            &unit,
            "https://acme.example/news/3",
        )
        .expect("retirement parsed");
        assert_eq!(change.change_type, ChangeType::Retirement);
        assert_eq!(change.old_title.as_deref(), Some("Chief Financial Officer"));
        assert!(change.is_c_suite);
    }

    #[test]
    fn parses_board_headline() {
        let unit = test_unit();
        let change = parse_headline(
            "Maria Santos Joins the Board of Acme Corp",
            &unit,
            "https://acme.example/news/4",
        )
        .expect("board parsed");
        assert_eq!(change.change_type, ChangeType::BoardAppointment);
        assert!(change.is_board);
    }

    #[test]
    fn parses_interim_headline() {
        let unit = test_unit();
        let change = parse_headline(
            "David Park Named Interim Chief Executive Officer",
            &unit,
            "https://acme.example/news/5",
        )
        .expect("interim parsed");
        assert_eq!(change.change_type, ChangeType::Interim);
        assert_eq!(change.person_name, "David Park");
    }

    #[test]
    fn ignores_unrelated_headlines() {
        let unit = test_unit();
        assert!(parse_headline(
            "Acme Corp Reports Record Q3 Revenue",
            &unit,
            "https://acme.example/news/6",
        )
        .is_none());
        assert!(parse_headline("", &unit, "https://acme.example").is_none());
    }

    #[tokio::test]
    async fn collects_changes_from_newsroom() {
        let server = MockServer::start().await;

        let newsroom = r#"<html><body>
            <h1>Newsroom</h1>
            <ul>
                <li><a href="/news/1">Acme Corp Appoints Alice Lee as Chief Executive Officer</a></li>
                <li><a href="/news/2">Tom Wilson Steps Down as Chief Operating Officer</a></li>
                <li><a href="/news/3">Acme Corp Reports Record Q3 Revenue</a></li>
            </ul>
        </body></html>"#;

        Mock::given(method("GET"))
            .and(path("/news"))
            .respond_with(ResponseTemplate::new(200).set_body_string(newsroom))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let crawl = Arc::new(
            SharedCrawl::new(CrawlerConfig {
                allowed_domains: vec![],
                max_pages: 10,
                max_depth: 0,
                concurrency: 2,
                rate_limit_ms: 0,
                cache_ttl_secs: 60,
            })
            .allow_localhost(),
        );

        let source = NewsSource::new(crawl, 5);
        let mut unit = test_unit();
        unit.website = Some(server.uri());

        let collected = source.collect(&unit).await;
        assert_eq!(collected.changes.len(), 2);

        let types: Vec<ChangeType> =
            collected.changes.iter().map(|c| c.change_type).collect();
        assert!(types.contains(&ChangeType::Hire));
        assert!(types.contains(&ChangeType::Departure));
    }
}
