//! Wayback Machine access with rate limiting.
//!
//! The archive is the backbone of retrodict mode: search results and page
//! fetches are validated against it so nothing from after the cutoff leaks
//! into the session. Usage follows the Internet Archive's guidelines:
//! bounded concurrency (semaphore of 5), retry with exponential backoff on
//! 429/5xx respecting `Retry-After`, and a 24-hour availability cache
//! (availability rarely changes). Under persistent failure an availability
//! check resolves as "no snapshot" rather than erroring — in retrodict mode
//! a source we cannot validate is a source we do not cite.
//!
//! Timestamp comparison uses the 8-digit date prefix as an integer
//! ([`normalize_timestamp`]): the availability API returns timestamps of
//! variable precision (YYYYMMDD through YYYYMMDDHHMMSS), and comparing raw
//! strings of different lengths is wrong. Snapshots dated strictly after
//! the cutoff are rejected even when the API returns them as "closest".

use crate::cache::{TtlCache, cache_key};
use crate::limits::RateLimits;
use crate::retry::{RetryConfig, retry_if_transient};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

const AVAILABILITY_URL: &str = "https://archive.org/wayback/available";
const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(15);
const CONTENT_TIMEOUT: Duration = Duration::from_secs(20);
const AVAILABILITY_TTL: Duration = Duration::from_secs(86400);

/// A snapshot entry from the availability API.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Snapshot {
    pub url: String,
    pub timestamp: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub available: bool,
}

/// Normalize a Wayback timestamp to a YYYYMMDD integer for comparison.
///
/// ```rust
/// # use forecast_agent::wayback::normalize_timestamp;
/// assert_eq!(normalize_timestamp("20260115"), 20260115);
/// assert_eq!(normalize_timestamp("20260115120000"), 20260115);
/// ```
pub fn normalize_timestamp(timestamp: &str) -> u64 {
    timestamp
        .chars()
        .take(8)
        .collect::<String>()
        .parse()
        .unwrap_or(0)
}

/// Rewrite a URL to its archived form.
///
/// The `id_` modifier returns raw content without the archive's toolbar
/// injection. The original URL is appended directly after the timestamp,
/// no encoding needed.
///
/// ```rust
/// # use forecast_agent::wayback::rewrite_to_wayback;
/// assert_eq!(
///     rewrite_to_wayback("https://example.com/page?q=1", "20260115"),
///     "https://web.archive.org/web/20260115id_/https://example.com/page?q=1"
/// );
/// ```
pub fn rewrite_to_wayback(url: &str, timestamp: &str) -> String {
    format!("https://web.archive.org/web/{timestamp}id_/{url}")
}

/// Rate-limited, cached Wayback client shared across a session.
#[derive(Clone)]
pub struct WaybackClient {
    limits: RateLimits,
    cache: Arc<TtlCache>,
}

impl WaybackClient {
    pub fn new(limits: RateLimits, cache: Arc<TtlCache>) -> Self {
        Self { limits, cache }
    }

    /// Check whether `url` has a snapshot at or before `timestamp`
    /// (YYYYMMDD). Returns `None` for no snapshot, a post-cutoff "closest"
    /// snapshot, or persistent API failure.
    pub async fn availability(&self, url: &str, timestamp: &str) -> Option<Snapshot> {
        let key = cache_key(
            "wayback_available",
            &json!({"url": url, "timestamp": timestamp}),
        );
        if let Some(cached) = self.cache.get(&key).await {
            // Null is a cached negative result
            return serde_json::from_value(cached).ok();
        }

        let result = {
            let _permit = self.limits.wayback().await;
            retry_if_transient(
                RetryConfig::default()
                    .with_max_attempts(3)
                    .with_initial_delay(Duration::from_secs(1)),
                || self.query_availability(url, timestamp),
            )
            .await
        };

        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(e) => {
                // Persistent failure resolves as "no snapshot"
                log::warn!("Wayback availability failed for {url}: {e}");
                return None;
            }
        };

        let validated = snapshot.filter(|s| {
            if normalize_timestamp(&s.timestamp) > normalize_timestamp(timestamp) {
                log::debug!(
                    "Wayback snapshot {} is after cutoff {} for {}",
                    s.timestamp,
                    timestamp,
                    url
                );
                false
            } else {
                true
            }
        });

        let cache_value = match &validated {
            Some(s) => serde_json::to_value(s).unwrap_or(Value::Null),
            None => Value::Null,
        };
        self.cache
            .set_with_ttl(key, cache_value, AVAILABILITY_TTL)
            .await;

        validated
    }

    async fn query_availability(&self, url: &str, timestamp: &str) -> Result<Option<Snapshot>> {
        let client = reqwest::Client::builder()
            .timeout(AVAILABILITY_TIMEOUT)
            .build()?;

        let response = client
            .get(AVAILABILITY_URL)
            .query(&[("url", url), ("timestamp", timestamp)])
            .send()
            .await?;

        if response.status().as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(Error::RateLimited { retry_after });
        }
        if !response.status().is_success() {
            return Err(Error::api(format!(
                "Wayback availability returned {}",
                response.status()
            )));
        }

        let data: Value = response.json().await?;
        let closest = data
            .get("archived_snapshots")
            .and_then(|s| s.get("closest"))
            .cloned();

        match closest {
            Some(value) => {
                let snapshot: Snapshot = serde_json::from_value(value)?;
                Ok(snapshot.available.then_some(snapshot))
            }
            None => Ok(None),
        }
    }

    /// Fetch the archived page for `url` as of the cutoff and extract
    /// readable text. Returns `None` when no pre-cutoff snapshot exists or
    /// the fetch/extraction fails.
    pub async fn fetch_archived_text(&self, url: &str, cutoff_ts: &str) -> Option<String> {
        let snapshot = self.availability(url, cutoff_ts).await?;
        let wayback_url = rewrite_to_wayback(url, &snapshot.timestamp);

        let _permit = self.limits.wayback().await;
        let client = reqwest::Client::builder()
            .timeout(CONTENT_TIMEOUT)
            .build()
            .ok()?;

        let response = match client.get(&wayback_url).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                log::debug!("Wayback fetch for {url} returned {}", r.status());
                return None;
            }
            Err(e) => {
                log::warn!("Wayback fetch failed for {url}: {e}");
                return None;
            }
        };

        let html = response.text().await.ok()?;
        let extracted = extract_readable_text(&html);
        if extracted.is_empty() {
            log::debug!("Text extraction returned nothing for {url}");
            return None;
        }
        Some(extracted)
    }
}

/// Strip an HTML document down to readable text.
///
/// Drops `script`/`style`/`noscript` blocks and HTML comments, removes all
/// tags, decodes the common entities, and collapses whitespace. Crude next
/// to a real article extractor, but archived snapshots only need to yield a
/// title-sized snippet and search-quality text.
pub fn extract_readable_text(html: &str) -> String {
    let mut text = String::with_capacity(html.len() / 4);
    // ASCII-only lowercasing preserves byte offsets, unlike to_lowercase()
    let lower: String = html
        .chars()
        .map(|c| if c.is_ascii() { c.to_ascii_lowercase() } else { c })
        .collect();
    let mut skip_until: Option<usize> = None;
    let mut in_tag = false;

    for (i, c) in html.char_indices() {
        if let Some(end) = skip_until {
            if i < end {
                continue;
            }
            skip_until = None;
        }

        if c == '<' {
            let rest = &lower[i..];
            for (open, close) in [
                ("<script", "</script>"),
                ("<style", "</style>"),
                ("<noscript", "</noscript>"),
                ("<!--", "-->"),
            ] {
                if rest.starts_with(open) {
                    if let Some(pos) = rest.find(close) {
                        skip_until = Some(i + pos + close.len());
                    } else {
                        skip_until = Some(html.len());
                    }
                    break;
                }
            }
            if skip_until.is_none() {
                in_tag = true;
            }
            continue;
        }
        if c == '>' && in_tag {
            in_tag = false;
            // Tag boundaries separate words
            text.push(' ');
            continue;
        }
        if !in_tag {
            text.push(c);
        }
    }

    let decoded = text
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");

    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_timestamp() {
        assert_eq!(normalize_timestamp("20260115"), 20260115);
        assert_eq!(normalize_timestamp("20260115120000"), 20260115);
        assert_eq!(normalize_timestamp("2026011"), 2026011);
        assert_eq!(normalize_timestamp("garbage"), 0);
    }

    #[test]
    fn test_normalize_avoids_mixed_precision_comparison() {
        // Raw string comparison would get this wrong:
        // "20260114235959" > "20260115" lexicographically.
        assert!("20260114235959" > "20260115");
        assert!(normalize_timestamp("20260114235959") < normalize_timestamp("20260115"));
    }

    #[test]
    fn test_rewrite_to_wayback() {
        assert_eq!(
            rewrite_to_wayback("https://example.com/a?b=c", "20260115"),
            "https://web.archive.org/web/20260115id_/https://example.com/a?b=c"
        );
    }

    #[test]
    fn test_extract_readable_text() {
        let html = r#"
            <html><head><title>T</title>
            <script>var x = "<p>not text</p>";</script>
            <style>.a { color: red; }</style>
            </head>
            <body><!-- comment -->
            <h1>Tesla earnings</h1>
            <p>Q4 results were &amp; strong.</p>
            </body></html>
        "#;
        let text = extract_readable_text(html);
        assert!(text.contains("Tesla earnings"));
        assert!(text.contains("Q4 results were & strong."));
        assert!(!text.contains("var x"));
        assert!(!text.contains("color: red"));
        assert!(!text.contains("comment"));
    }

    #[test]
    fn test_extract_empty_document() {
        assert_eq!(extract_readable_text("<html></html>"), "");
    }

    #[test]
    fn test_snapshot_deserialization() {
        let snapshot: Snapshot = serde_json::from_value(json!({
            "url": "https://web.archive.org/web/20260110/https://example.com",
            "timestamp": "20260110083015",
            "status": "200",
            "available": true
        }))
        .unwrap();
        assert!(snapshot.available);
        assert_eq!(normalize_timestamp(&snapshot.timestamp), 20260110);
    }
}
