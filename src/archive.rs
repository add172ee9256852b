//! Archive-backed web search for retrodict mode.
//!
//! The only general web search available under a cutoff. The flow is:
//! search the provider for URLs only (capped at the cutoff, no live
//! crawling), validate every URL against the Wayback Machine, and build
//! titles and snippets from the *archived* pages. Results never cite the
//! current web — a URL without a pre-cutoff snapshot simply does not exist
//! for this session.

use crate::research::{SearchHit, SearchProvider};
use crate::session::Session;
use crate::tools::{Tool, limit_arg, str_arg, tool};
use crate::wayback::{extract_readable_text, rewrite_to_wayback};
use crate::Error;
use futures::future::join_all;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

/// Fetch title and snippet from an archived page.
async fn fetch_archived_metadata(url: &str, timestamp: &str) -> Option<Value> {
    let wayback_url = rewrite_to_wayback(url, timestamp);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .ok()?;

    let response = match client.get(&wayback_url).send().await {
        Ok(r) if r.status().is_success() => r,
        Ok(r) => {
            log::debug!("Archive fetch failed for {url}: {}", r.status());
            return None;
        }
        Err(e) => {
            log::debug!("Archive fetch failed for {url}: {e}");
            return None;
        }
    };

    let html = response.text().await.ok()?;
    let title = extract_html_title(&html).unwrap_or_else(|| url.to_string());
    let text = extract_readable_text(&html);
    let snippet = (!text.is_empty()).then(|| text.chars().take(200).collect::<String>());

    Some(json!({
        "title": title,
        "url": url,
        "snippet": snippet,
        "archived_at": timestamp,
    }))
}

fn extract_html_title(html: &str) -> Option<String> {
    // ASCII-only lowercasing preserves byte offsets
    let lower: String = html
        .chars()
        .map(|c| if c.is_ascii() { c.to_ascii_lowercase() } else { c })
        .collect();
    let start = lower.find("<title")?;
    let open_end = html[start..].find('>')? + start + 1;
    let close = lower[open_end..].find("</title>")? + open_end;
    let title = html[open_end..close].trim();
    (!title.is_empty()).then(|| title.to_string())
}

/// Validate URLs against the archive and collect metadata from the
/// archived snapshots.
async fn validate_and_fetch(session: &Session, urls: Vec<String>, cutoff_ts: &str) -> Vec<Value> {
    let checks = urls.iter().map(|url| {
        let session = session.clone();
        let url = url.clone();
        let cutoff_ts = cutoff_ts.to_string();
        async move {
            if url.is_empty() {
                return None;
            }
            let snapshot = session.services.wayback.availability(&url, &cutoff_ts).await?;
            fetch_archived_metadata(&url, &snapshot.timestamp).await
        }
    });

    join_all(checks).await.into_iter().flatten().collect()
}

/// Build the retrodict-only `web_search` tool.
pub fn archive_search_tool(session: &Session, provider: Arc<dyn SearchProvider>) -> Tool {
    let session = session.clone();
    tool(
        "web_search",
        "Search the web for information. Returns titles, URLs, and snippets.",
    )
    .schema(json!({
        "query": {"type": "string"},
        "num_results": {"type": "integer", "optional": true}
    }))
    .build(move |args| {
        let session = session.clone();
        let provider = provider.clone();
        async move {
            let query = str_arg(&args, "query")?.to_string();
            let num_results = limit_arg(&args, "num_results", 10, 20);

            let cutoff = session
                .cutoff
                .ok_or_else(|| Error::tool("Archive search requires a retrodict session"))?;

            log::info!("[ArchiveSearch] Searching for: {query}");
            let hits: Vec<SearchHit> = {
                let _permit = session.services.limits.search().await;
                // Ask for extra URLs: archive validation drops some.
                provider
                    .search(&query, num_results * 2, Some(&cutoff.date_str()), "never")
                    .await?
            };

            let urls: Vec<String> = hits.into_iter().filter_map(|h| h.url).collect();
            log::info!("[ArchiveSearch] Got {} URLs from search", urls.len());
            if urls.is_empty() {
                return Ok(json!({"query": query, "results": []}));
            }

            let total = urls.len();
            let mut results = validate_and_fetch(&session, urls, &cutoff.wayback_ts()).await;
            log::info!(
                "[ArchiveSearch] {}/{} URLs passed archive validation",
                results.len(),
                total
            );
            results.truncate(num_results);

            Ok(json!({"query": query, "results": results}))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_html_title() {
        assert_eq!(
            extract_html_title("<html><head><title>Tesla Q4</title></head></html>"),
            Some("Tesla Q4".to_string())
        );
        assert_eq!(
            extract_html_title("<TITLE lang=\"en\"> Spaced </TITLE>"),
            Some("Spaced".to_string())
        );
        assert_eq!(extract_html_title("<html><body>no title</body></html>"), None);
        assert_eq!(extract_html_title("<title></title>"), None);
    }
}
