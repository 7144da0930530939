//! Single-page fetch with classified error handling.
//!
//! Transient failures (timeouts, 5xx, 429) are retried with bounded
//! exponential backoff, honoring a server-provided `Retry-After` hint.
//! Permanent-for-this-resource statuses (404, 403) return `Ok(None)`
//! immediately — absence of a page is data, not an error.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::{debug, warn};
use url::Url;

use orgscope_shared::{OrgScopeError, Result};

/// Maximum retry attempts for transient failures.
const MAX_RETRIES: u32 = 3;

/// Initial backoff delay.
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Backoff multiplier per attempt.
const RETRY_MULTIPLIER: f64 = 2.0;

/// Backoff ceiling.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Whether a status is worth retrying.
fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Whether a status means the resource will never be served to us.
fn is_permanent_absence(status: StatusCode) -> bool {
    status == StatusCode::NOT_FOUND || status == StatusCode::FORBIDDEN
}

/// Parse a `Retry-After` header value (delta-seconds form only).
fn retry_after_hint(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Fetch `url`, returning `Ok(None)` for 404/403 and retrying transient
/// failures with exponential backoff.
pub async fn fetch_with_retry(client: &Client, url: &Url) -> Result<Option<String>> {
    let mut delay = INITIAL_RETRY_DELAY;

    for attempt in 0..=MAX_RETRIES {
        let outcome = client.get(url.as_str()).send().await;

        match outcome {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let body = response.text().await.map_err(|e| {
                        OrgScopeError::Network(format!("{url}: body read failed: {e}"))
                    })?;
                    return Ok(Some(body));
                }

                if is_permanent_absence(status) {
                    debug!(%url, %status, "resource absent, not retrying");
                    return Ok(None);
                }

                if is_transient(status) && attempt < MAX_RETRIES {
                    let wait = retry_after_hint(&response).unwrap_or(delay);
                    warn!(%url, %status, retry = attempt + 1, wait_ms = wait.as_millis() as u64, "transient failure, backing off");
                    tokio::time::sleep(wait.min(MAX_RETRY_DELAY)).await;
                    delay = Duration::from_secs_f64(
                        (delay.as_secs_f64() * RETRY_MULTIPLIER)
                            .min(MAX_RETRY_DELAY.as_secs_f64()),
                    );
                    continue;
                }

                return Err(OrgScopeError::Network(format!("{url}: HTTP {status}")));
            }
            Err(e) if attempt < MAX_RETRIES => {
                warn!(%url, error = %e, retry = attempt + 1, "request failed, backing off");
                tokio::time::sleep(delay).await;
                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * RETRY_MULTIPLIER).min(MAX_RETRY_DELAY.as_secs_f64()),
                );
            }
            Err(e) => return Err(OrgScopeError::Network(format!("{url}: {e}"))),
        }
    }

    Err(OrgScopeError::Network(format!("{url}: retries exhausted")))
}
