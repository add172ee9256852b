//! Research tools: platform metadata, community predictions, Wikipedia,
//! and web/news search.
//!
//! All tools here return raw data; the model does the reasoning. Network
//! access runs under the named semaphores, idempotent reads go through the
//! TTL cache, and transient failures are retried with backoff.
//!
//! In retrodict mode the tools restrict themselves: community predictions
//! are hidden, CP history is filtered to pre-cutoff entries, prediction
//! history masks resolutions, Wikipedia resolves article titles to the last
//! revision at or before the cutoff, and web search injects the cutoff as a
//! `published_before` filter, drops undated or post-cutoff results, and
//! replaces snippets with archive-validated text.

use crate::metaculus::{ApiFilter, Question, is_not_found};
use crate::session::Session;
use crate::tools::{Tool, limit_arg, opt_str_arg, str_arg, tool, u64_arg, u64_arg_or};
use crate::wayback::extract_readable_text;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

const WIKIPEDIA_API_URL: &str = "https://en.wikipedia.org/w/api.php";
const WIKIPEDIA_USER_AGENT: &str =
    "forecast-agent/0.4 (tournament forecasting research; contact via repository)";

// ============================================================================
// SEARCH PROVIDER SEAM
// ============================================================================

/// A single web search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: Option<String>,
    pub url: Option<String>,
    pub snippet: Option<String>,
    #[serde(default)]
    pub highlights: Vec<String>,
    /// ISO date or datetime string when the provider knows it.
    pub published_date: Option<String>,
    pub score: Option<f64>,
}

/// Web search abstraction. The production implementation talks to an
/// Exa-style API; the archive search tool reuses the same seam, and tests
/// substitute a canned provider.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(
        &self,
        query: &str,
        num_results: usize,
        published_before: Option<&str>,
        livecrawl: &str,
    ) -> Result<Vec<SearchHit>>;
}

/// Exa search API adapter.
pub struct ExaProvider {
    api_key: String,
    timeout: Duration,
}

impl ExaProvider {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            api_key: api_key.into(),
            timeout,
        }
    }
}

#[async_trait]
impl SearchProvider for ExaProvider {
    async fn search(
        &self,
        query: &str,
        num_results: usize,
        published_before: Option<&str>,
        livecrawl: &str,
    ) -> Result<Vec<SearchHit>> {
        let mut payload = json!({
            "query": query,
            "type": "auto",
            "useAutoprompt": true,
            "numResults": num_results,
            "livecrawl": livecrawl,
            "contents": {
                "text": {"includeHtmlTags": false},
                "highlights": {
                    "query": query,
                    "numSentences": 4,
                    "highlightsPerUrl": 3,
                },
            },
        });
        if let Some(date) = published_before {
            payload["publishedBefore"] = json!(format!("{date}T23:59:59.999Z"));
        }

        let client = reqwest::Client::builder().timeout(self.timeout).build()?;
        let response = client
            .post("https://api.exa.ai/search")
            .header("accept", "application/json")
            .header("x-api-key", &self.api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::api(format!(
                "Search API returned {}",
                response.status()
            )));
        }

        let data: Value = response.json().await?;
        let results = data
            .get("results")
            .and_then(|r| r.as_array())
            .cloned()
            .unwrap_or_default();

        Ok(results
            .iter()
            .map(|r| {
                let published_date = r
                    .get("publishedDate")
                    .and_then(|v| v.as_str())
                    .map(|s| s.trim_end_matches('Z').to_string());
                let text = r.get("text").and_then(|v| v.as_str()).unwrap_or("");
                SearchHit {
                    title: r.get("title").and_then(|v| v.as_str()).map(String::from),
                    url: r.get("url").and_then(|v| v.as_str()).map(String::from),
                    snippet: (!text.is_empty()).then(|| truncate(text, 500)),
                    highlights: r
                        .get("highlights")
                        .and_then(|v| v.as_array())
                        .map(|h| {
                            h.iter()
                                .filter_map(|x| x.as_str().map(String::from))
                                .take(3)
                                .collect()
                        })
                        .unwrap_or_default(),
                    published_date,
                    score: r.get("score").and_then(|v| v.as_f64()),
                }
            })
            .collect())
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Drop results published after the cutoff, or with no parseable
/// publication date at all.
///
/// The provider's server-side `publishedBefore` filter is unreliable for
/// static files (PDFs, investor-relations pages), so this client-side pass
/// always runs when a cutoff is in force, regardless of what the server
/// promised.
pub fn filter_by_published_date(hits: Vec<SearchHit>, cutoff_date: &str) -> Vec<SearchHit> {
    let total = hits.len();
    let validated: Vec<SearchHit> = hits
        .into_iter()
        .filter(|hit| match &hit.published_date {
            Some(date) if date.get(..10).is_some_and(|prefix| prefix <= cutoff_date) => true,
            Some(date) => {
                log::warn!(
                    "Date filter: dropping {} (published {} > cutoff {})",
                    hit.url.as_deref().unwrap_or("?"),
                    date,
                    cutoff_date
                );
                false
            }
            None => {
                log::warn!(
                    "Date filter: dropping {} (no published date)",
                    hit.url.as_deref().unwrap_or("?")
                );
                false
            }
        })
        .collect();

    if validated.len() < total {
        log::info!(
            "Retrodict date filter: {}/{} results passed (cutoff {})",
            validated.len(),
            total,
            cutoff_date
        );
    }
    validated
}

/// Replace snippets with archive-validated content: each hit is fetched
/// from the Wayback Machine as of the cutoff and its snippet replaced with
/// extracted text; hits without a pre-cutoff snapshot are dropped.
pub async fn wayback_validate_hits(
    session: &Session,
    hits: Vec<SearchHit>,
    wayback_ts: &str,
) -> Vec<SearchHit> {
    let total = hits.len();
    let fetches = hits.iter().map(|hit| {
        let url = hit.url.clone().unwrap_or_default();
        let wayback = session.services.wayback.clone();
        let ts = wayback_ts.to_string();
        async move {
            if url.is_empty() {
                return None;
            }
            wayback.fetch_archived_text(&url, &ts).await
        }
    });
    let contents = join_all(fetches).await;

    let mut validated = Vec::new();
    for (mut hit, content) in hits.into_iter().zip(contents) {
        match content {
            Some(text) => {
                hit.snippet = Some(truncate(&text, 500));
                validated.push(hit);
            }
            None => log::warn!(
                "Wayback validate: dropping {} (no pre-cutoff snapshot)",
                hit.url.as_deref().unwrap_or("?")
            ),
        }
    }

    log::info!(
        "[Retrodict] Wayback validated {}/{} search results",
        validated.len(),
        total
    );
    validated
}

// ============================================================================
// PLATFORM HELPERS
// ============================================================================

/// Serialize a question for tool output. `hide_cp` drops the community
/// prediction (retrodict mode).
fn question_to_value(question: &Question, hide_cp: bool) -> Value {
    json!({
        "post_id": question.post_id,
        "question_id": question.question_id,
        "title": question.title,
        "type": question.question_type.as_str(),
        "url": question.url(),
        "background_info": question.description,
        "resolution_criteria": question.resolution_criteria,
        "fine_print": question.fine_print,
        "num_forecasters": question.num_forecasters,
        "community_prediction": if hide_cp { Value::Null } else { json!(question.community_prediction) },
        "options": question.options,
        "bounds": question.bounds,
    })
}

/// Coerce the `post_id_list` argument: a JSON array, a bare integer, or a
/// string ("123", "123, 456", "[123, 456]").
fn coerce_id_list(value: &Value) -> Result<Vec<u64>> {
    let parse_one = |s: &str| -> Result<u64> {
        s.trim()
            .parse()
            .map_err(|_| Error::invalid_input(format!("Not a question id: '{s}'")))
    };

    let ids = match value {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Number(n) => n
                    .as_u64()
                    .ok_or_else(|| Error::invalid_input(format!("Not a question id: {n}"))),
                Value::String(s) => parse_one(s),
                other => Err(Error::invalid_input(format!("Not a question id: {other}"))),
            })
            .collect::<Result<Vec<u64>>>()?,
        Value::Number(n) => vec![
            n.as_u64()
                .ok_or_else(|| Error::invalid_input(format!("Not a question id: {n}")))?,
        ],
        Value::String(s) => {
            let trimmed = s.trim().trim_start_matches('[').trim_end_matches(']');
            trimmed
                .split(',')
                .filter(|part| !part.trim().is_empty())
                .map(parse_one)
                .collect::<Result<Vec<u64>>>()?
        }
        _ => {
            return Err(Error::invalid_input(
                "post_id_list must be a list of integer post IDs",
            ));
        }
    };

    if ids.is_empty() {
        return Err(Error::invalid_input("post_id_list is empty"));
    }
    if ids.len() > 20 {
        return Err(Error::invalid_input("Maximum 20 questions per request"));
    }
    Ok(ids)
}

/// Parse a CP-history entry timestamp: Unix seconds, Unix milliseconds via
/// float, or an ISO datetime string (older API responses).
fn parse_history_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .and_then(|secs| DateTime::from_timestamp(secs as i64, 0)),
        Value::String(s) => DateTime::parse_from_rfc3339(&s.replace('Z', "+00:00"))
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

/// Process a raw aggregate-history response into the tool payload,
/// filtering entries after the cutoff and attaching a note when everything
/// was filtered out.
fn process_cp_history(
    data: &Value,
    question_id: u64,
    days: u64,
    cutoff: Option<NaiveDate>,
) -> Value {
    let cutoff_dt = cutoff.and_then(|d| d.and_hms_opt(0, 0, 0)).map(|dt| dt.and_utc());
    let history = data
        .get("history")
        .and_then(|h| h.as_array())
        .cloned()
        .unwrap_or_default();

    let mut results = Vec::new();
    let mut filtered_count = 0usize;
    let mut warned_missing_timestamp = false;

    for entry in &history {
        // Prefer start_time; older API responses use end_time.
        let raw_ts = entry
            .get("start_time")
            .filter(|v| !v.is_null())
            .or_else(|| entry.get("end_time").filter(|v| !v.is_null()));

        let Some(raw_ts) = raw_ts else {
            if !warned_missing_timestamp {
                log::warn!(
                    "CP history entry for question {question_id} has neither start_time \
                     nor end_time"
                );
                warned_missing_timestamp = true;
            }
            continue;
        };

        let cp = entry
            .get("centers")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|v| v.as_f64());
        let Some(cp) = cp else { continue };

        if let (Some(cutoff_dt), Some(ts)) = (cutoff_dt, parse_history_timestamp(raw_ts)) {
            if ts > cutoff_dt {
                filtered_count += 1;
                continue;
            }
        }

        results.push(json!({
            "timestamp": raw_ts,
            "community_prediction": (cp * 10000.0).round() / 10000.0,
        }));
    }

    if filtered_count > 0 {
        log::info!(
            "[Retrodict] CP history: filtered {filtered_count} points after {:?}",
            cutoff
        );
    }

    let mut response = json!({
        "question_id": question_id,
        "days_requested": days,
        "data_points": results.len(),
        "history": results,
    });

    if filtered_count > 0 && response["data_points"] == 0 {
        response["note"] = json!(
            format!(
                "All {filtered_count} CP data points were after the retrodict cutoff date. \
                 This is expected when the question was published near the cutoff. \
                 No pre-cutoff CP data is available."
            )
        );
    }

    response
}

// ============================================================================
// WIKIPEDIA HELPERS
// ============================================================================

/// Extract the intro section from article text: content up to the first
/// blank line after at least 500 characters have accumulated.
pub fn extract_intro(text: &str) -> String {
    let mut intro_lines: Vec<&str> = Vec::new();
    for line in text.split('\n') {
        if !line.trim().is_empty() && intro_lines.is_empty() {
            intro_lines.push(line);
        } else if !intro_lines.is_empty() {
            if !line.trim().is_empty() {
                intro_lines.push(line);
            } else {
                let current: usize = intro_lines.iter().map(|l| l.len()).sum();
                if current > 500 {
                    break;
                }
                intro_lines.push(line);
            }
        }
    }
    intro_lines.join("\n").trim().to_string()
}

async fn wikipedia_get(session: &Session, params: &[(&str, String)]) -> Result<Value> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(
            session.services.settings.http_timeout_seconds,
        ))
        .user_agent(WIKIPEDIA_USER_AGENT)
        .build()?;
    let response = client.get(WIKIPEDIA_API_URL).query(params).send().await?;
    if !response.status().is_success() {
        return Err(Error::api(format!(
            "Wikipedia API returned {}",
            response.status()
        )));
    }
    Ok(response.json().await?)
}

/// Fetch a Wikipedia article as it existed at `cutoff_date`: resolve the
/// last revision at or before the cutoff via the revision API, fetch that
/// revision's HTML via the REST API, and extract readable text. Cached for
/// an hour (the same article is often hit first via search, then in full).
async fn fetch_wikipedia_historical(
    session: &Session,
    title: &str,
    cutoff_date: &str,
) -> Result<Value> {
    let key = crate::cache::cache_key(
        "wikipedia_historical",
        &json!({"title": title, "cutoff": cutoff_date}),
    );
    let session_clone = session.clone();
    let title = title.to_string();
    let cutoff = cutoff_date.to_string();
    session
        .services
        .cache
        .get_or_insert_with(&key, Duration::from_secs(3600), move || async move {
            fetch_wikipedia_historical_uncached(&session_clone, &title, &cutoff).await
        })
        .await
}

async fn fetch_wikipedia_historical_uncached(
    session: &Session,
    title: &str,
    cutoff_date: &str,
) -> Result<Value> {
    // MediaWiki timestamp: YYYYMMDDHHMMSS, end of the cutoff day
    let cutoff_ts = format!("{}235959", cutoff_date.replace('-', ""));

    let rev_data = wikipedia_get(
        session,
        &[
            ("action", "query".into()),
            ("titles", title.to_string()),
            ("prop", "revisions".into()),
            ("rvprop", "ids|timestamp".into()),
            ("rvlimit", "1".into()),
            ("rvstart", cutoff_ts),
            ("rvdir", "older".into()),
            ("redirects", "1".into()),
            ("format", "json".into()),
            ("utf8", "1".into()),
        ],
    )
    .await?;

    let pages = rev_data
        .get("query")
        .and_then(|q| q.get("pages"))
        .and_then(|p| p.as_object())
        .ok_or_else(|| Error::api(format!("Article not found: {title}")))?;
    let (page_id, page) = pages
        .iter()
        .next()
        .ok_or_else(|| Error::api(format!("Article not found: {title}")))?;
    if page_id == "-1" {
        return Err(Error::api(format!("Article not found: {title}")));
    }

    let revision = page
        .get("revisions")
        .and_then(|r| r.as_array())
        .and_then(|r| r.first())
        .ok_or_else(|| {
            Error::api(format!("No revision found before {cutoff_date} for: {title}"))
        })?;
    let rev_id = revision
        .get("revid")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| Error::api("Revision has no id"))?;
    let rev_timestamp = revision
        .get("timestamp")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let resolved_title = page
        .get("title")
        .and_then(|v| v.as_str())
        .unwrap_or(title)
        .to_string();

    // Revision HTML via the REST API; underscores for spaces, the rest
    // percent-encoded.
    let encoded_title = encode_title(&resolved_title);
    let rest_url =
        format!("https://en.wikipedia.org/api/rest_v1/page/html/{encoded_title}/{rev_id}");

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(
            session.services.settings.http_timeout_seconds,
        ))
        .user_agent(WIKIPEDIA_USER_AGENT)
        .build()?;
    let response = client.get(&rest_url).send().await?;
    if !response.status().is_success() {
        return Err(Error::api(format!(
            "Revision fetch returned {}",
            response.status()
        )));
    }
    let html = response.text().await?;

    let extracted = extract_readable_text(&html);
    if extracted.is_empty() {
        return Err(Error::api(format!(
            "Could not extract text from revision {rev_id} for: {title}"
        )));
    }

    Ok(json!({
        "title": resolved_title,
        "url": format!("https://en.wikipedia.org/wiki/{encoded_title}"),
        "extract": extracted,
        "revision_id": rev_id,
        "revision_timestamp": rev_timestamp,
        "cutoff_date": cutoff_date,
    }))
}

fn encode_title(title: &str) -> String {
    title
        .replace(' ', "_")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || "_-.~()".contains(c) {
                c.to_string()
            } else {
                c.to_string()
                    .bytes()
                    .map(|b| format!("%{b:02X}"))
                    .collect()
            }
        })
        .collect()
}

// ============================================================================
// TOOL CONSTRUCTION
// ============================================================================

/// Build the "forecasting" namespace tools for a session.
///
/// `search_provider` is injected so the archive search and the tests can
/// share the seam; pass [`ExaProvider`] in production.
pub fn forecasting_tools(
    session: &Session,
    search_provider: Option<Arc<dyn SearchProvider>>,
) -> Vec<Tool> {
    let mut tools = vec![
        get_metaculus_questions_tool(session),
        list_tournament_questions_tool(session),
        search_metaculus_tool(session),
        get_coherence_links_tool(session),
        get_cp_history_tool(session),
        get_prediction_history_tool(session),
        wikipedia_tool(session),
    ];

    if let Some(provider) = search_provider {
        tools.push(search_exa_tool(session, provider));
    } else {
        log::info!("search_exa tool disabled: no search API key configured");
    }

    if session.services.settings.asknews_client_id.is_some()
        && session.services.settings.asknews_client_secret.is_some()
    {
        tools.push(search_news_tool(session));
    } else {
        log::info!("search_news tool disabled: news credentials not configured");
    }

    tools
}

fn get_metaculus_questions_tool(session: &Session) -> Tool {
    let session = session.clone();
    tool(
        "get_metaculus_questions",
        "Fetch details for one or more Metaculus questions by their POST ID. \
         Pass post_id_list as a list of integer post IDs (e.g., [12345] or [12345, 67890]). \
         IMPORTANT: These are QUESTION post IDs, not tournament IDs. \
         To find question IDs, use list_tournament_questions first. \
         Returns question details including title, description, resolution criteria, \
         fine print, and community prediction (if available). Maximum 20 questions per request.",
    )
    .param("post_id_list", "array")
    .build(move |args| {
        let session = session.clone();
        async move {
            let ids = coerce_id_list(
                args.get("post_id_list")
                    .ok_or_else(|| Error::invalid_input("Missing 'post_id_list' parameter"))?,
            )?;
            let hide_cp = session.is_retrodict();

            let fetches = ids.iter().map(|&post_id| {
                let session = session.clone();
                async move {
                    match fetch_question_cached(&session, post_id).await {
                        Ok(question) => question_to_value(&question, hide_cp),
                        Err(e) if is_not_found(&e) => {
                            // The caller may have passed a question_id where a
                            // post_id was expected; try to recover.
                            match session
                                .services
                                .metaculus
                                .resolve_question_to_post_id(post_id)
                                .await
                            {
                                Some(resolved) => {
                                    match fetch_question_cached(&session, resolved).await {
                                        Ok(question) => question_to_value(&question, hide_cp),
                                        Err(e) => json!({
                                            "post_id": post_id,
                                            "error": format!(
                                                "Resolved question {post_id} -> post {resolved}, \
                                                 but fetch failed: {e}"
                                            ),
                                        }),
                                    }
                                }
                                None => json!({
                                    "post_id": post_id,
                                    "error": format!(
                                        "ID {post_id} not found. You may have passed a \
                                         question_id instead of a post_id. Use \
                                         list_tournament_questions to find correct post IDs."
                                    ),
                                }),
                            }
                        }
                        Err(e) => json!({"post_id": post_id, "error": e.to_string()}),
                    }
                }
            });
            let results: Vec<Value> = join_all(fetches).await;

            if results.len() == 1 {
                let result = results.into_iter().next().expect("one result");
                if let Some(error) = result.get("error") {
                    return Err(Error::tool(format!(
                        "Failed to fetch question {}: {}",
                        result["post_id"], error
                    )));
                }
                return Ok(result);
            }
            Ok(json!({"questions": results}))
        }
    })
}

async fn fetch_question_cached(session: &Session, post_id: u64) -> Result<Question> {
    let key = crate::cache::cache_key("metaculus_question", &json!({"post_id": post_id}));
    let session_clone = session.clone();
    let value = session
        .services
        .cache
        .get_or_insert_with(&key, Duration::from_secs(300), move || async move {
            let _permit = session_clone.services.limits.metaculus().await;
            let question = session_clone.services.metaculus.get_question(post_id).await?;
            Ok(serde_json::to_value(&question)?)
        })
        .await?;
    Ok(serde_json::from_value(value)?)
}

fn list_tournament_questions_tool(session: &Session) -> Tool {
    let session = session.clone();
    let default_limit = session.services.settings.tournament_default_limit;
    tool(
        "list_tournament_questions",
        format!(
            "List open questions from a specific Metaculus tournament by TOURNAMENT id or \
             slug (not question id). Returns question post IDs that can be used with \
             get_metaculus_questions. Optional num_questions (default: {default_limit})."
        ),
    )
    .schema(json!({
        "tournament_id": {"type": "string"},
        "num_questions": {"type": "integer", "optional": true}
    }))
    .build(move |args| {
        let session = session.clone();
        async move {
            let tournament = args
                .get("tournament_id")
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .filter(|s| !s.is_empty())
                .ok_or_else(|| Error::invalid_input("Missing 'tournament_id' parameter"))?;
            let num = limit_arg(&args, "num_questions", default_limit, 200);

            let _permit = session.services.limits.metaculus().await;
            let questions = session
                .services
                .metaculus
                .get_open_tournament_questions(&tournament, Some(num))
                .await?;

            Ok(json!(
                questions
                    .iter()
                    .map(|q| json!({
                        "post_id": q.post_id,
                        "question_id": q.question_id,
                        "title": q.title,
                        "type": q.question_type.as_str(),
                        "url": q.url(),
                    }))
                    .collect::<Vec<_>>()
            ))
        }
    })
}

fn search_metaculus_tool(session: &Session) -> Tool {
    let session = session.clone();
    let default_limit = session.services.settings.metaculus_default_limit;
    tool(
        "search_metaculus",
        format!(
            "Search Metaculus questions by text query. Returns matching questions with \
             IDs, titles, and types. Optional num_results (default: {default_limit})."
        ),
    )
    .schema(json!({
        "query": {"type": "string"},
        "num_results": {"type": "integer", "optional": true}
    }))
    .build(move |args| {
        let session = session.clone();
        async move {
            let query = str_arg(&args, "query")?.to_string();
            let num = limit_arg(&args, "num_results", default_limit, 100);
            let hide_cp = session.is_retrodict();

            let _permit = session.services.limits.metaculus().await;
            let questions = session
                .services
                .metaculus
                .get_questions_matching_filter(&ApiFilter::search(query.as_str()), Some(num))
                .await?;

            Ok(json!(
                questions
                    .iter()
                    .map(|q| {
                        let mut entry = json!({
                            "post_id": q.post_id,
                            "question_id": q.question_id,
                            "title": q.title,
                            "type": q.question_type.as_str(),
                            "url": q.url(),
                        });
                        if !hide_cp {
                            entry["community_prediction"] = json!(q.community_prediction);
                        }
                        entry
                    })
                    .collect::<Vec<_>>()
            ))
        }
    })
}

fn get_coherence_links_tool(session: &Session) -> Tool {
    let session = session.clone();
    tool(
        "get_coherence_links",
        "Get Metaculus questions that are logically related to this one. USE THIS to \
         check if your forecast is consistent with related questions — e.g., if you \
         forecast 80% on 'Will X happen by 2027?', your forecast on 'Will X happen by \
         2026?' should be at most 80%. Requires question_id (not post_id) — get this \
         from get_metaculus_questions.",
    )
    .param("question_id", "integer")
    .build(move |args| {
        let session = session.clone();
        async move {
            let question_id = u64_arg(&args, "question_id")?;
            let _permit = session.services.limits.metaculus().await;
            let links = session
                .services
                .metaculus
                .get_coherence_links(question_id)
                .await?;
            Ok(json!(links))
        }
    })
}

fn get_cp_history_tool(session: &Session) -> Tool {
    let session = session.clone();
    tool(
        "get_cp_history",
        "Fetch historical community prediction (CP) data for a question. ESSENTIAL for \
         meta-prediction questions ('Will CP be above X%?') — shows the CP trajectory \
         over time. Pass any Metaculus ID (question_id or post_id) — auto-detected. \
         Optional days (default 30, max 365).",
    )
    .schema(json!({
        "question_id": {"type": "integer"},
        "days": {"type": "integer", "optional": true},
        "before": {"type": "string", "optional": true}
    }))
    .build(move |args| {
        let session = session.clone();
        async move {
            let question_id = u64_arg(&args, "question_id")?;
            let days = u64_arg_or(&args, "days", 30).min(365);

            // Session cutoff wins; the hook-injected `before` is the backup
            // path when the tool runs without a session cutoff.
            let cutoff = session.cutoff.map(|c| c.date()).or_else(|| {
                opt_str_arg(&args, "before")
                    .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
            });

            let fetch = |qid: u64| {
                let session = session.clone();
                async move {
                    let _permit = session.services.limits.metaculus().await;
                    session.services.metaculus.get_cp_history(qid, days as u32).await
                }
            };

            match fetch(question_id).await {
                Ok(data) => Ok(process_cp_history(&data, question_id, days, cutoff)),
                Err(e) if is_not_found(&e) => {
                    // The ID might be a post_id; resolve and retry.
                    log::info!("Question {question_id} not found, trying as post_id");
                    let resolved = session
                        .services
                        .metaculus
                        .resolve_post_to_question_id(question_id)
                        .await
                        .ok_or_else(|| {
                            Error::tool(format!(
                                "ID {question_id} not found as question_id or post_id"
                            ))
                        })?;
                    let data = fetch(resolved).await?;
                    Ok(process_cp_history(&data, resolved, days, cutoff))
                }
                Err(e) => Err(e),
            }
        }
    })
}

fn get_prediction_history_tool(session: &Session) -> Tool {
    let session = session.clone();
    tool(
        "get_prediction_history",
        "Get past forecasts made for a Metaculus question. Returns your previous \
         forecasts with timestamps, probabilities/medians, and summaries. Useful for \
         tracking how your forecasts evolved and learning from resolved questions.",
    )
    .param("post_id", "integer")
    .build(move |args| {
        let session = session.clone();
        async move {
            let post_id = u64_arg(&args, "post_id")?;
            let cutoff = session.cutoff;

            let mut forecasts = session.services.store.load_past(post_id)?;

            if let Some(cutoff) = cutoff {
                // Record timestamps are YYYYMMDD_HHMMSS; compare on the
                // 8-digit date prefix.
                let cutoff_compact = cutoff.wayback_ts();
                forecasts.retain(|f| {
                    f.timestamp
                        .get(..8)
                        .map(|date| date < cutoff_compact.as_str())
                        .unwrap_or(false)
                });
            }

            if forecasts.is_empty() {
                return Ok(json!({"post_id": post_id, "forecasts": [], "count": 0}));
            }

            let title = forecasts[0].question_title.clone();
            let mask_resolution = cutoff.is_some();
            let results: Vec<Value> = forecasts
                .iter()
                .map(|f| {
                    let mut entry = json!({
                        "timestamp": f.timestamp,
                        "question_type": f.question_type.as_str(),
                        "summary": f.summary,
                    });
                    if !mask_resolution {
                        entry["resolution"] = json!(f.resolution);
                    }
                    match f.question_type.as_str() {
                        "binary" => {
                            entry["probability"] = json!(f.probability);
                            entry["logit"] = json!(f.logit);
                        }
                        "multiple_choice" => {
                            entry["probabilities"] = json!(f.probabilities);
                        }
                        _ => {
                            entry["median"] = json!(f.median);
                            entry["confidence_interval"] = json!(f.confidence_interval);
                            entry["percentiles"] = json!(f.percentiles);
                        }
                    }
                    entry
                })
                .collect();

            Ok(json!({
                "post_id": post_id,
                "question_title": title,
                "count": results.len(),
                "forecasts": results,
            }))
        }
    })
}

fn wikipedia_tool(session: &Session) -> Tool {
    let session = session.clone();
    let default_limit = session.services.settings.search_default_limit;
    tool(
        "wikipedia",
        format!(
            "Search Wikipedia or fetch article content. Modes: 'search' (default) finds \
             articles matching query; 'summary' fetches the article intro by exact \
             title; 'full' fetches the entire article by exact title. For search mode, \
             optional num_results (default: {default_limit})."
        ),
    )
    .schema(json!({
        "query": {"type": "string"},
        "mode": {"type": "string", "optional": true},
        "num_results": {"type": "integer", "optional": true}
    }))
    .build(move |args| {
        let session = session.clone();
        async move {
            let query = str_arg(&args, "query")?.to_string();
            let mode = opt_str_arg(&args, "mode").unwrap_or("search").to_string();
            let num = limit_arg(&args, "num_results", default_limit, 50);
            let cutoff_date = session.cutoff.map(|c| c.date_str());

            match mode.as_str() {
                "search" => {
                    let _permit = session.services.limits.search().await;
                    let data = wikipedia_get(
                        &session,
                        &[
                            ("action", "query".into()),
                            ("list", "search".into()),
                            ("srsearch", query.clone()),
                            ("srlimit", num.to_string()),
                            ("format", "json".into()),
                            ("utf8", "1".into()),
                        ],
                    )
                    .await?;

                    let mut results: Vec<Value> = data
                        .get("query")
                        .and_then(|q| q.get("search"))
                        .and_then(|s| s.as_array())
                        .map(|items| {
                            items
                                .iter()
                                .map(|item| {
                                    let title =
                                        item.get("title").and_then(|v| v.as_str()).unwrap_or("");
                                    let snippet = item
                                        .get("snippet")
                                        .and_then(|v| v.as_str())
                                        .unwrap_or("")
                                        .replace("<span class=\"searchmatch\">", "")
                                        .replace("</span>", "");
                                    json!({
                                        "title": title,
                                        "snippet": snippet,
                                        "url": format!(
                                            "https://en.wikipedia.org/wiki/{}",
                                            title.replace(' ', "_")
                                        ),
                                        "word_count": item.get("wordcount"),
                                    })
                                })
                                .collect()
                        })
                        .unwrap_or_default();

                    // Retrodict: swap snippets for historical content;
                    // articles that did not exist at the cutoff are dropped.
                    if let Some(cutoff) = &cutoff_date {
                        let mut historical_results = Vec::new();
                        for result in &results {
                            let title =
                                result.get("title").and_then(|v| v.as_str()).unwrap_or("");
                            match fetch_wikipedia_historical(&session, title, cutoff).await {
                                Ok(historical) => {
                                    let extract = historical
                                        .get("extract")
                                        .and_then(|v| v.as_str())
                                        .unwrap_or("");
                                    let mut snippet = truncate(&extract_intro(extract), 500);
                                    if snippet.len() == 500 {
                                        if let Some(pos) = snippet.rfind(' ') {
                                            snippet.truncate(pos);
                                            snippet.push_str("...");
                                        }
                                    }
                                    historical_results.push(json!({
                                        "title": historical["title"],
                                        "snippet": snippet,
                                        "url": historical["url"],
                                        "revision_timestamp": historical["revision_timestamp"],
                                    }));
                                }
                                Err(e) => {
                                    log::debug!("Skipping {title}: {e}");
                                }
                            }
                        }
                        results = historical_results;
                    }

                    Ok(json!({"query": query, "mode": mode, "results": results}))
                }
                "summary" | "full" => {
                    let _permit = session.services.limits.search().await;

                    if let Some(cutoff) = &cutoff_date {
                        let historical =
                            fetch_wikipedia_historical(&session, &query, cutoff).await?;
                        let extract = historical
                            .get("extract")
                            .and_then(|v| v.as_str())
                            .unwrap_or("")
                            .to_string();
                        let extract = if mode == "summary" {
                            extract_intro(&extract)
                        } else {
                            extract
                        };
                        return Ok(json!({
                            "title": historical["title"],
                            "url": historical["url"],
                            "extract": extract,
                            "mode": mode,
                            "revision_id": historical["revision_id"],
                            "revision_timestamp": historical["revision_timestamp"],
                            "cutoff_date": cutoff,
                        }));
                    }

                    // exintro is a presence flag in the MediaWiki API: only
                    // send it for summary mode.
                    let mut params: Vec<(&str, String)> = vec![
                        ("action", "query".into()),
                        ("titles", query.clone()),
                        ("prop", "extracts|info".into()),
                        ("explaintext", "1".into()),
                        ("inprop", "url".into()),
                        ("redirects", "1".into()),
                        ("format", "json".into()),
                        ("utf8", "1".into()),
                    ];
                    if mode == "summary" {
                        params.push(("exintro", "1".into()));
                    }
                    let data = wikipedia_get(&session, &params).await?;

                    let pages = data
                        .get("query")
                        .and_then(|q| q.get("pages"))
                        .and_then(|p| p.as_object())
                        .ok_or_else(|| Error::tool(format!("Article not found: {query}")))?;
                    let (page_id, page) = pages
                        .iter()
                        .next()
                        .ok_or_else(|| Error::tool(format!("Article not found: {query}")))?;
                    if page_id == "-1" {
                        return Err(Error::tool(format!("Article not found: {query}")));
                    }

                    Ok(json!({
                        "title": page.get("title").and_then(|v| v.as_str()).unwrap_or(&query),
                        "url": page.get("fullurl").and_then(|v| v.as_str()).map(String::from)
                            .unwrap_or_else(|| format!(
                                "https://en.wikipedia.org/wiki/{}",
                                query.replace(' ', "_")
                            )),
                        "extract": page.get("extract").and_then(|v| v.as_str()).unwrap_or(""),
                        "mode": mode,
                    }))
                }
                other => Err(Error::invalid_input(format!(
                    "Unknown mode: {other}. Use 'search', 'summary', or 'full'."
                ))),
            }
        }
    })
}

fn search_exa_tool(session: &Session, provider: Arc<dyn SearchProvider>) -> Tool {
    let session = session.clone();
    let default_limit = session.services.settings.search_default_limit;
    tool(
        "search_exa",
        format!(
            "Search the web using AI-powered search. Returns raw results with titles, \
             URLs, and snippets. Results are cached for 5 minutes. Optional num_results \
             (default: {default_limit})."
        ),
    )
    .schema(json!({
        "query": {"type": "string"},
        "num_results": {"type": "integer", "optional": true},
        "published_before": {"type": "string", "optional": true},
        "livecrawl": {"type": "string", "optional": true}
    }))
    .build(move |args| {
        let session = session.clone();
        let provider = provider.clone();
        async move {
            let query = str_arg(&args, "query")?.to_string();
            let num = limit_arg(&args, "num_results", default_limit, 25);

            // The cutoff overrides any caller-supplied filter and disables
            // live crawling.
            let cutoff = session.cutoff;
            let published_before = cutoff
                .map(|c| c.date_str())
                .or_else(|| opt_str_arg(&args, "published_before").map(String::from));
            let livecrawl = if cutoff.is_some() {
                "never".to_string()
            } else {
                opt_str_arg(&args, "livecrawl").unwrap_or("always").to_string()
            };

            log::info!(
                "search_exa actual params: published_before={:?}, livecrawl={}",
                published_before,
                livecrawl
            );

            // Cache key is sensitive to the published_before filter: a
            // capped search must never satisfy a live one.
            let key = crate::cache::cache_key(
                "search_exa",
                &json!({
                    "query": query,
                    "num_results": num,
                    "published_before": published_before,
                    "livecrawl": livecrawl,
                }),
            );
            if let Some(cached) = session.services.cache.get(&key).await {
                return Ok(cached);
            }

            let hits = {
                let _permit = session.services.limits.search().await;
                crate::retry::retry_if_transient(crate::retry::RetryConfig::default(), || {
                    provider.search(&query, num, published_before.as_deref(), &livecrawl)
                })
                .await?
            };

            let hits = match &published_before {
                Some(cutoff_date) => {
                    let filtered = filter_by_published_date(hits, cutoff_date);
                    let wayback_ts = cutoff_date.replace('-', "");
                    wayback_validate_hits(&session, filtered, &wayback_ts).await
                }
                None => hits,
            };

            let payload = json!(hits);
            session.services.cache.set(key, payload.clone()).await;
            Ok(payload)
        }
    })
}

fn search_news_tool(session: &Session) -> Tool {
    let session = session.clone();
    let default_limit = session.services.settings.news_default_limit;
    tool(
        "search_news",
        format!(
            "Search for recent news. Returns raw news results with headlines, sources, \
             dates, and summaries. Optional num_results (default: {default_limit})."
        ),
    )
    .schema(json!({
        "query": {"type": "string"},
        "num_results": {"type": "integer", "optional": true}
    }))
    .build(move |args| {
        let session = session.clone();
        async move {
            let query = str_arg(&args, "query")?.to_string();
            let num = limit_arg(&args, "num_results", default_limit, 25);

            let client_id = session
                .services
                .settings
                .asknews_client_id
                .clone()
                .ok_or_else(|| Error::config("News credentials not configured"))?;
            let client_secret = session
                .services
                .settings
                .asknews_client_secret
                .clone()
                .ok_or_else(|| Error::config("News credentials not configured"))?;

            let _permit = session.services.limits.search().await;
            let articles = crate::retry::retry_if_transient(
                crate::retry::RetryConfig::default(),
                || async {
                    let client = reqwest::Client::builder()
                        .timeout(Duration::from_secs(
                            session.services.settings.http_timeout_seconds,
                        ))
                        .build()?;
                    let response = client
                        .get("https://api.asknews.app/v1/news/search")
                        .basic_auth(&client_id, Some(&client_secret))
                        .query(&[
                            ("query", query.as_str()),
                            ("n_articles", &num.to_string()),
                            ("return_type", "dicts"),
                            ("strategy", "news knowledge"),
                        ])
                        .send()
                        .await?;
                    if !response.status().is_success() {
                        return Err(Error::api(format!(
                            "News API returned {}",
                            response.status()
                        )));
                    }
                    Ok(response.json::<Value>().await?)
                },
            )
            .await?;

            let mut results: Vec<Value> = articles
                .get("as_dicts")
                .or_else(|| articles.get("articles"))
                .and_then(|a| a.as_array())
                .map(|items| {
                    items
                        .iter()
                        .map(|a| {
                            json!({
                                "title": a.get("eng_title").or_else(|| a.get("title")),
                                "summary": a.get("summary"),
                                "published": a.get("pub_date"),
                                "source": a.get("source_id"),
                                "url": a.get("article_url"),
                                "language": a.get("language"),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            results.truncate(num);

            Ok(json!({"query": query, "results": results}))
        }
    })
}
