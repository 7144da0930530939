//! Budgeted, domain-confined BFS crawler.
//!
//! The crawler walks outward from seed URLs using an explicit work queue,
//! never recursion. The page budget is checked before each fetch is
//! dispatched, so at most `max_pages` requests are issued regardless of how
//! many links are discovered, and no request ever leaves the allowed-domain
//! set.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use scraper::{Html, Selector};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, instrument, warn};
use url::Url;

use orgscope_shared::{OrgScopeError, Result};

use crate::fetch::fetch_with_retry;
use crate::limiter::{RateLimiter, ResponseCache};

/// User-Agent string for crawl requests.
const USER_AGENT: &str = concat!("OrgScope/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Config and results
// ---------------------------------------------------------------------------

/// Crawler configuration for one collection run.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Hosts (and their subdomains) requests may be sent to.
    pub allowed_domains: Vec<String>,
    /// Page budget: at most this many fetches per crawl.
    pub max_pages: usize,
    /// Link-depth budget from the seeds.
    pub max_depth: u32,
    /// Maximum concurrent fetches.
    pub concurrency: usize,
    /// Minimum ms between requests to one domain.
    pub rate_limit_ms: u64,
    /// Response cache TTL in seconds.
    pub cache_ttl_secs: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            allowed_domains: Vec::new(),
            max_pages: 30,
            max_depth: 3,
            concurrency: 4,
            rate_limit_ms: 500,
            cache_ttl_secs: 900,
        }
    }
}

/// A fetched page with its outbound links.
#[derive(Debug, Clone)]
pub struct CrawledPage {
    pub url: Url,
    pub depth: u32,
    pub body: String,
    pub links: Vec<String>,
}

/// Summary of a completed crawl.
#[derive(Debug, Clone, Default)]
pub struct CrawlReport {
    pub pages_fetched: usize,
    pub pages_skipped: usize,
    /// (url, error message) pairs for pages that failed.
    pub errors: Vec<(String, String)>,
}

// ---------------------------------------------------------------------------
// Crawler
// ---------------------------------------------------------------------------

/// Bounded BFS crawler sharing one rate limiter and response cache across
/// everything a collection run fetches.
pub struct Crawler {
    config: CrawlerConfig,
    client: Client,
    limiter: Arc<RateLimiter>,
    cache: Arc<ResponseCache>,
    /// Allow localhost/private IPs (for integration tests with mock servers).
    allow_localhost: bool,
}

impl Crawler {
    /// Create a new crawler with its own rate limiter and cache.
    pub fn new(config: CrawlerConfig) -> Result<Self> {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(config.rate_limit_ms)));
        let cache = Arc::new(ResponseCache::new(Duration::from_secs(config.cache_ttl_secs)));
        Self::with_shared(config, limiter, cache)
    }

    /// Create a crawler sharing a run-scoped rate limiter and cache, so
    /// every crawl in one collection run honors the same per-domain
    /// spacing and reuses fetched bodies.
    pub fn with_shared(
        config: CrawlerConfig,
        limiter: Arc<RateLimiter>,
        cache: Arc<ResponseCache>,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| OrgScopeError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            client,
            limiter,
            cache,
            allow_localhost: false,
        })
    }

    /// Allow crawling localhost/private IPs (for integration tests).
    pub fn allow_localhost(mut self) -> Self {
        self.allow_localhost = true;
        self
    }

    /// Whether a URL's host is inside the allowed-domain set.
    pub fn in_scope(&self, url: &Url) -> bool {
        if url.scheme() != "http" && url.scheme() != "https" {
            return false;
        }
        let Some(host) = url.host_str() else {
            return false;
        };
        self.config.allowed_domains.iter().any(|domain| {
            let domain = domain.trim_start_matches("www.");
            let host = host.trim_start_matches("www.");
            host == domain || host.ends_with(&format!(".{domain}"))
        })
    }

    /// Fetch one URL through the rate limiter, cache, and retry policy.
    /// Out-of-scope URLs return `Ok(None)` without a request.
    pub async fn fetch_one(&self, url: &Url) -> Result<Option<String>> {
        if !self.in_scope(url) {
            debug!(%url, "out of scope, not fetching");
            return Ok(None);
        }
        if !self.allow_localhost && is_ssrf_target(url) {
            warn!(%url, "SSRF protection: blocked");
            return Ok(None);
        }

        let key = normalize_url(url);
        if let Some(body) = self.cache.get(&key).await {
            debug!(%url, "cache hit");
            return Ok(Some(body));
        }

        let domain = url.host_str().unwrap_or("").to_string();
        self.limiter.acquire(&domain).await;

        let body = fetch_with_retry(&self.client, url).await?;
        if let Some(body) = &body {
            self.cache.put(&key, body.clone()).await;
        }
        Ok(body)
    }

    /// BFS crawl from `seeds`, bounded by the page and depth budgets.
    #[instrument(skip_all, fields(seeds = seeds.len(), max_pages = self.config.max_pages))]
    pub async fn crawl(&self, seeds: &[Url]) -> (CrawlReport, Vec<CrawledPage>) {
        let visited = Arc::new(Mutex::new(HashSet::<String>::new()));
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));

        let mut queue: Vec<(Url, u32)> = seeds.iter().cloned().map(|u| (u, 0)).collect();
        let mut pages: Vec<CrawledPage> = Vec::new();
        let mut report = CrawlReport::default();
        let mut budget = self.config.max_pages;

        info!(
            depth = self.config.max_depth,
            concurrency = self.config.concurrency,
            "starting crawl"
        );

        while !queue.is_empty() && budget > 0 {
            // Take a batch bounded by both concurrency and remaining budget.
            let take = queue.len().min(self.config.concurrency.max(1)).min(budget);
            let batch: Vec<(Url, u32)> = queue.drain(..take).collect();

            let mut handles = Vec::new();

            for (url, depth) in batch {
                let normalized = normalize_url(&url);

                {
                    let mut vis = visited.lock().await;
                    if vis.contains(&normalized) {
                        report.pages_skipped += 1;
                        continue;
                    }
                    vis.insert(normalized);
                }

                if !self.in_scope(&url) {
                    debug!(%url, "out of scope, skipping");
                    report.pages_skipped += 1;
                    continue;
                }

                if !self.allow_localhost && is_ssrf_target(&url) {
                    warn!(%url, "SSRF protection: blocked");
                    report.pages_skipped += 1;
                    continue;
                }

                // Budget is spent when the fetch is dispatched, not when it
                // succeeds, so a hostile site cannot extend the crawl.
                budget -= 1;

                let client = self.client.clone();
                let limiter = self.limiter.clone();
                let cache = self.cache.clone();
                let sem = semaphore.clone();

                handles.push(tokio::spawn(async move {
                    let _permit = sem.acquire().await.expect("semaphore closed");

                    let key = normalize_url(&url);
                    if let Some(body) = cache.get(&key).await {
                        return (url, depth, Ok(Some(body)));
                    }

                    let domain = url.host_str().unwrap_or("").to_string();
                    limiter.acquire(&domain).await;

                    let outcome = fetch_with_retry(&client, &url).await;
                    if let Ok(Some(body)) = &outcome {
                        cache.put(&key, body.clone()).await;
                    }
                    (url, depth, outcome)
                }));

                if budget == 0 {
                    break;
                }
            }

            for handle in handles {
                match handle.await {
                    Ok((url, depth, Ok(Some(body)))) => {
                        let doc = Html::parse_document(&body);
                        let links = extract_links(&doc, &url);

                        if depth < self.config.max_depth {
                            for link in &links {
                                if let Ok(link_url) = Url::parse(link) {
                                    if self.in_scope(&link_url) {
                                        queue.push((link_url, depth + 1));
                                    }
                                }
                            }
                        }

                        report.pages_fetched += 1;
                        pages.push(CrawledPage {
                            url,
                            depth,
                            body,
                            links,
                        });
                    }
                    Ok((url, _, Ok(None))) => {
                        debug!(%url, "page absent");
                        report.pages_skipped += 1;
                    }
                    Ok((url, _, Err(e))) => {
                        report.errors.push((url.to_string(), e.to_string()));
                        report.pages_skipped += 1;
                    }
                    Err(e) => {
                        report.errors.push(("task".into(), e.to_string()));
                        report.pages_skipped += 1;
                    }
                }
            }
        }

        info!(
            pages_fetched = report.pages_fetched,
            pages_skipped = report.pages_skipped,
            errors = report.errors.len(),
            "crawl completed"
        );

        (report, pages)
    }
}

// ---------------------------------------------------------------------------
// SharedCrawl
// ---------------------------------------------------------------------------

/// Run-scoped crawl state: one rate limiter and one response cache shared
/// by every crawler a collection run creates, plus the budget template.
///
/// Units are crawled through per-unit scoped crawlers so a unit's fetches
/// can never leave its own domains, while the per-domain spacing and the
/// cache still span the whole run.
pub struct SharedCrawl {
    template: CrawlerConfig,
    limiter: Arc<RateLimiter>,
    cache: Arc<ResponseCache>,
    allow_localhost: bool,
}

impl SharedCrawl {
    pub fn new(template: CrawlerConfig) -> Self {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(
            template.rate_limit_ms,
        )));
        let cache = Arc::new(ResponseCache::new(Duration::from_secs(
            template.cache_ttl_secs,
        )));
        Self {
            template,
            limiter,
            cache,
            allow_localhost: false,
        }
    }

    /// Allow crawling localhost/private IPs (for integration tests).
    pub fn allow_localhost(mut self) -> Self {
        self.allow_localhost = true;
        self
    }

    /// A crawler confined to the given hosts, sharing this run's limiter
    /// and cache.
    pub fn scoped(&self, allowed_domains: Vec<String>) -> Result<Crawler> {
        let crawler = Crawler::with_shared(
            CrawlerConfig {
                allowed_domains,
                ..self.template.clone()
            },
            self.limiter.clone(),
            self.cache.clone(),
        )?;
        Ok(if self.allow_localhost {
            crawler.allow_localhost()
        } else {
            crawler
        })
    }

    /// A crawler confined to one unit's website host and listed domains.
    pub fn scoped_for_hosts(&self, website: Option<&str>, domains: &[String]) -> Result<Crawler> {
        let mut allowed: Vec<String> = Vec::new();
        if let Some(website) = website {
            if let Ok(url) = Url::parse(website) {
                if let Some(host) = url.host_str() {
                    allowed.push(host.to_string());
                }
            }
        }
        allowed.extend(domains.iter().cloned());
        allowed.sort_unstable();
        allowed.dedup();
        self.scoped(allowed)
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    if let Some(host) = url.host_str() {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return is_private_ip(&ip);
        }
        if host == "localhost"
            || host == "127.0.0.1"
            || host == "[::1]"
            || host.ends_with(".local")
            || host.ends_with(".internal")
        {
            return true;
        }
    }

    false
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
                // 192.0.0.0/24
                || (v4.octets()[0] == 192 && v4.octets()[1] == 0 && v4.octets()[2] == 0)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

// ---------------------------------------------------------------------------
// Link extraction and URL normalization
// ---------------------------------------------------------------------------

/// Extract all links from a document, resolved against the base URL.
pub fn extract_links(doc: &Html, base_url: &Url) -> Vec<String> {
    let link_sel = Selector::parse("a[href]").unwrap();
    let mut links = Vec::new();

    for el in doc.select(&link_sel) {
        if let Some(href) = el.value().attr("href") {
            // Skip anchors, javascript:, mailto:
            if href.starts_with('#')
                || href.starts_with("javascript:")
                || href.starts_with("mailto:")
            {
                continue;
            }

            if let Ok(resolved) = base_url.join(href) {
                let mut resolved = resolved;
                resolved.set_fragment(None);
                links.push(resolved.to_string());
            }
        }
    }

    links
}

/// Normalize a URL for deduplication and cache keying (strip fragment,
/// trailing slash, lowercase handled by the Url parser).
pub fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    let mut s = normalized.to_string();
    // Remove trailing slash for consistency (except root path)
    if s.ends_with('/') && s.matches('/').count() > 3 {
        s.pop();
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(server: &MockServer, max_pages: usize, max_depth: u32) -> CrawlerConfig {
        let host = Url::parse(&server.uri()).unwrap().host_str().unwrap().to_string();
        CrawlerConfig {
            allowed_domains: vec![host],
            max_pages,
            max_depth,
            concurrency: 2,
            rate_limit_ms: 0,
            cache_ttl_secs: 60,
        }
    }

    #[test]
    fn test_normalize_url() {
        let url = Url::parse("https://acme.example/leadership/team#cfo").unwrap();
        let normalized = normalize_url(&url);
        assert!(!normalized.contains('#'));
        assert!(normalized.starts_with("https://acme.example/leadership/team"));
    }

    #[test]
    fn test_ssrf_protection() {
        assert!(is_ssrf_target(&Url::parse("file:///etc/passwd").unwrap()));
        assert!(is_ssrf_target(&Url::parse("http://192.168.1.1/admin").unwrap()));
        assert!(is_ssrf_target(&Url::parse("http://10.0.0.1/").unwrap()));
        assert!(is_ssrf_target(&Url::parse("http://localhost:3000/api").unwrap()));
        assert!(!is_ssrf_target(&Url::parse("https://acme.example/page").unwrap()));
    }

    #[test]
    fn test_domain_scope() {
        let crawler = Crawler::new(CrawlerConfig {
            allowed_domains: vec!["acme.example".into()],
            ..CrawlerConfig::default()
        })
        .unwrap();

        assert!(crawler.in_scope(&Url::parse("https://acme.example/about").unwrap()));
        assert!(crawler.in_scope(&Url::parse("https://www.acme.example/about").unwrap()));
        assert!(crawler.in_scope(&Url::parse("https://ir.acme.example/filings").unwrap()));
        assert!(!crawler.in_scope(&Url::parse("https://evil.example/about").unwrap()));
        assert!(!crawler.in_scope(&Url::parse("https://notacme.example/about").unwrap()));
        assert!(!crawler.in_scope(&Url::parse("ftp://acme.example/about").unwrap()));
    }

    #[test]
    fn test_extract_links() {
        let html = r##"<html><body><a href="/team">Team</a><a href="https://external.example">External</a><a href="#section">Anchor</a><a href="relative/path">Relative</a></body></html>"##;

        let doc = Html::parse_document(html);
        let base = Url::parse("https://acme.example/about").unwrap();
        let links = extract_links(&doc, &base);

        assert!(links.contains(&"https://acme.example/team".to_string()));
        assert!(links.contains(&"https://external.example/".to_string()));
        assert!(!links.iter().any(|l| l.contains('#')));
    }

    #[tokio::test]
    async fn crawl_respects_page_budget() {
        let server = MockServer::start().await;

        // Every page links to three more; an unbounded crawl would never stop.
        for i in 0..50 {
            let body = format!(
                r#"<html><body>
                    <a href="/p{}">next</a><a href="/p{}">next</a><a href="/p{}">next</a>
                </body></html>"#,
                i * 3 + 1,
                i * 3 + 2,
                i * 3 + 3,
            );
            Mock::given(method("GET"))
                .and(path(format!("/p{i}")))
                .respond_with(ResponseTemplate::new(200).set_body_string(body))
                .mount(&server)
                .await;
        }

        let crawler = Crawler::new(test_config(&server, 5, 10))
            .unwrap()
            .allow_localhost();
        let seed = Url::parse(&format!("{}/p0", server.uri())).unwrap();
        let (report, pages) = crawler.crawl(&[seed]).await;

        assert!(report.pages_fetched <= 5, "fetched {}", report.pages_fetched);
        assert_eq!(pages.len(), report.pages_fetched);
        assert!(server.received_requests().await.unwrap().len() <= 5);
    }

    #[tokio::test]
    async fn crawl_respects_depth_budget() {
        let server = MockServer::start().await;

        let page = |next: &str| {
            format!(r#"<html><body><a href="/{next}">next</a></body></html>"#)
        };
        for (name, next) in [("a", "b"), ("b", "c"), ("c", "d"), ("d", "e")] {
            Mock::given(method("GET"))
                .and(path(format!("/{name}")))
                .respond_with(ResponseTemplate::new(200).set_body_string(page(next)))
                .mount(&server)
                .await;
        }

        let crawler = Crawler::new(test_config(&server, 100, 1))
            .unwrap()
            .allow_localhost();
        let seed = Url::parse(&format!("{}/a", server.uri())).unwrap();
        let (report, _pages) = crawler.crawl(&[seed]).await;

        // Depth 1 = seed plus one level of links.
        assert_eq!(report.pages_fetched, 2);
    }

    #[tokio::test]
    async fn crawl_never_leaves_allowed_domains() {
        let server = MockServer::start().await;

        let body = r#"<html><body>
            <a href="https://outside.example/steal">out</a>
            <a href="/inside">in</a>
        </body></html>"#;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/inside"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let crawler = Crawler::new(test_config(&server, 10, 3))
            .unwrap()
            .allow_localhost();
        let seed = Url::parse(&server.uri()).unwrap();
        let (report, pages) = crawler.crawl(&[seed]).await;

        assert_eq!(report.pages_fetched, 2);
        for page in &pages {
            assert!(page.url.as_str().starts_with(&server.uri()));
        }
    }

    #[tokio::test]
    async fn scoped_crawlers_share_one_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/shared"))
            .respond_with(ResponseTemplate::new(200).set_body_string("once"))
            .expect(1)
            .mount(&server)
            .await;

        let host = Url::parse(&server.uri()).unwrap().host_str().unwrap().to_string();
        let shared = SharedCrawl::new(CrawlerConfig {
            allowed_domains: vec![],
            max_pages: 10,
            max_depth: 0,
            concurrency: 2,
            rate_limit_ms: 0,
            cache_ttl_secs: 60,
        })
        .allow_localhost();

        let first = shared.scoped(vec![host.clone()]).unwrap();
        let second = shared.scoped(vec![host]).unwrap();

        let url = Url::parse(&format!("{}/shared", server.uri())).unwrap();
        assert_eq!(first.fetch_one(&url).await.unwrap().as_deref(), Some("once"));
        // The second crawler hits the run-scoped cache, not the server.
        assert_eq!(second.fetch_one(&url).await.unwrap().as_deref(), Some("once"));
    }

    #[tokio::test]
    async fn fetch_one_uses_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string("cached"))
            .expect(1) // second fetch must come from the cache
            .mount(&server)
            .await;

        let crawler = Crawler::new(test_config(&server, 10, 3))
            .unwrap()
            .allow_localhost();
        let url = Url::parse(&format!("{}/page", server.uri())).unwrap();

        let first = crawler.fetch_one(&url).await.unwrap();
        let second = crawler.fetch_one(&url).await.unwrap();
        assert_eq!(first.as_deref(), Some("cached"));
        assert_eq!(second.as_deref(), Some("cached"));
    }
}
