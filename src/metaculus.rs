//! Metaculus platform client.
//!
//! # post_id vs question_id
//!
//! The platform has two ID systems:
//!
//! - **post_id**: the URL-bearing container id
//!   (`metaculus.com/questions/{post_id}`). Used for fetching posts,
//!   building URLs, and local forecast storage.
//! - **question_id**: the internal question id. Used for coherence links
//!   (`/api/coherence/question/{question_id}/links/`), CP history
//!   (`/api/questions/{question_id}/aggregate-history/`), and forecast
//!   submission.
//!
//! For single-question posts the two coincide; for group posts (one post
//! containing several sub-questions) they diverge. Method names say which
//! one they take.
//!
//! Listing endpoints re-filter on `status` client-side: the server-side
//! filter is not reliably consistent.

use crate::retry::{RetryConfig, retry_if_transient};
use crate::types::{NumericBounds, QuestionContext, QuestionType};
use crate::{Error, Result, Settings};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub const METACULUS_API_BASE: &str = "https://www.metaculus.com/api";

/// A question parsed from a post envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub post_id: u64,
    pub question_id: u64,
    pub question_type: QuestionType,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub resolution_criteria: String,
    #[serde(default)]
    pub fine_print: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub bounds: Option<NumericBounds>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub scheduled_close_time: Option<String>,
    #[serde(default)]
    pub scheduled_resolve_time: Option<String>,
    #[serde(default)]
    pub actual_resolution_time: Option<String>,
    #[serde(default)]
    pub resolution_string: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub num_forecasters: Option<u64>,
    #[serde(default)]
    pub community_prediction: Option<f64>,
    /// Unix seconds of our own latest forecast, if any.
    #[serde(default)]
    pub my_last_forecast_time: Option<f64>,
}

impl Question {
    pub fn url(&self) -> String {
        format!("https://www.metaculus.com/questions/{}", self.post_id)
    }

    /// Parse a post envelope into questions. Group posts unpack into one
    /// question per sub-question sharing the envelope; notebook posts and
    /// conditionals yield nothing.
    pub fn from_post_json(post: &Value) -> Result<Vec<Question>> {
        if let Some(group) = post.get("group_of_questions") {
            let subquestions = group
                .get("questions")
                .and_then(|q| q.as_array())
                .cloned()
                .unwrap_or_default();
            let mut questions = Vec::with_capacity(subquestions.len());
            for sub in &subquestions {
                questions.push(Self::from_question_json(post, sub)?);
            }
            return Ok(questions);
        }

        if post.get("conditional").is_some() {
            log::debug!(
                "Skipping post {}: conditional questions are not supported",
                post.get("id").and_then(|v| v.as_u64()).unwrap_or(0)
            );
            return Ok(Vec::new());
        }

        match post.get("question") {
            Some(question) if !question.is_null() => {
                Ok(vec![Self::from_question_json(post, question)?])
            }
            // Posts without question data are notebooks
            _ => Ok(Vec::new()),
        }
    }

    fn from_question_json(post: &Value, question: &Value) -> Result<Question> {
        let post_id = post
            .get("id")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| Error::api("Post envelope has no id"))?;
        let question_id = question
            .get("id")
            .and_then(|v| v.as_u64())
            .unwrap_or(post_id);

        let question_type = question
            .get("type")
            .and_then(|v| v.as_str())
            .map(QuestionType::parse)
            .unwrap_or(QuestionType::Binary);

        let str_of = |value: &Value, key: &str| -> String {
            value
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        let opt_str_of = |value: &Value, key: &str| -> Option<String> {
            value
                .get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        };

        let bounds = if question_type.is_continuous() {
            let scaling = question.get("scaling").cloned().unwrap_or(Value::Null);
            let range_min = scaling.get("range_min").and_then(|v| v.as_f64());
            let range_max = scaling.get("range_max").and_then(|v| v.as_f64());
            match (range_min, range_max) {
                (Some(range_min), Some(range_max)) => Some(NumericBounds {
                    range_min,
                    range_max,
                    open_lower_bound: question
                        .get("open_lower_bound")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false),
                    open_upper_bound: question
                        .get("open_upper_bound")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false),
                    zero_point: scaling.get("zero_point").and_then(|v| v.as_f64()),
                    cdf_size: match question_type {
                        QuestionType::Discrete => scaling
                            .get("inbound_outcome_count")
                            .and_then(|v| v.as_u64())
                            .map(|c| c as usize + 1),
                        _ => None,
                    },
                }),
                _ => None,
            }
        } else {
            None
        };

        let options = question
            .get("options")
            .and_then(|v| v.as_array())
            .map(|opts| {
                opts.iter()
                    .filter_map(|o| o.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        // The post-level description wins; group sub-questions carry their
        // own when the envelope has none.
        let description = {
            let post_level = str_of(post, "description");
            if post_level.is_empty() {
                str_of(question, "description")
            } else {
                post_level
            }
        };

        let my_last_forecast_time = question
            .get("my_forecasts")
            .and_then(|m| m.get("latest"))
            .and_then(|l| l.get("start_time"))
            .and_then(|v| v.as_f64());

        Ok(Question {
            post_id,
            question_id,
            question_type,
            title: {
                let t = str_of(question, "title");
                if t.is_empty() { str_of(post, "title") } else { t }
            },
            description,
            resolution_criteria: str_of(question, "resolution_criteria"),
            fine_print: str_of(question, "fine_print"),
            options,
            bounds,
            published_at: opt_str_of(post, "published_at"),
            scheduled_close_time: opt_str_of(question, "scheduled_close_time"),
            scheduled_resolve_time: opt_str_of(question, "scheduled_resolve_time"),
            actual_resolution_time: opt_str_of(question, "actual_resolve_time"),
            resolution_string: opt_str_of(question, "resolution"),
            status: opt_str_of(post, "status"),
            num_forecasters: post.get("nr_forecasters").and_then(|v| v.as_u64()),
            community_prediction: question
                .get("aggregations")
                .and_then(|a| a.get("recency_weighted"))
                .and_then(|r| r.get("latest"))
                .and_then(|l| l.get("centers"))
                .and_then(|c| c.as_array())
                .and_then(|c| c.first())
                .and_then(|v| v.as_f64()),
            my_last_forecast_time,
        })
    }

    /// Build the context handed to the model.
    pub fn to_context(&self) -> QuestionContext {
        QuestionContext {
            title: self.title.clone(),
            question_type: self.question_type,
            description: self.description.clone(),
            resolution_criteria: self.resolution_criteria.clone(),
            fine_print: self.fine_print.clone(),
            scheduled_close_time: self.scheduled_close_time.clone(),
            options: self.options.clone(),
            numeric_bounds: self.bounds.clone(),
        }
    }
}

/// A coherence edge between two questions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoherenceLink {
    pub question1_id: u64,
    pub question2_id: u64,
    pub direction: i64,
    pub strength: f64,
    #[serde(rename = "type", default)]
    pub link_type: String,
}

/// Filter parameters for the posts listing endpoint.
#[derive(Debug, Clone, Default)]
pub struct ApiFilter {
    pub statuses: Vec<String>,
    pub tournaments: Vec<String>,
    pub forecast_types: Vec<String>,
    pub order_by: Option<String>,
    pub forecaster_count_gte: Option<u64>,
    pub scheduled_resolve_time_gt: Option<String>,
    pub scheduled_resolve_time_lt: Option<String>,
    pub has_community_prediction: Option<bool>,
    pub search: Option<String>,
}

impl ApiFilter {
    /// Open questions of a tournament.
    pub fn open_in_tournament(tournament: impl Into<String>) -> Self {
        Self {
            statuses: vec!["open".to_string()],
            tournaments: vec![tournament.into()],
            ..Default::default()
        }
    }

    /// Full-text search.
    pub fn search(query: impl Into<String>) -> Self {
        Self {
            search: Some(query.into()),
            ..Default::default()
        }
    }

    fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![(
            "order_by".to_string(),
            self.order_by
                .clone()
                .unwrap_or_else(|| "-published_time".to_string()),
        )];
        if !self.statuses.is_empty() {
            params.push(("status".to_string(), self.statuses.join(",")));
        }
        if !self.tournaments.is_empty() {
            params.push(("tournaments".to_string(), self.tournaments.join(",")));
        }
        if !self.forecast_types.is_empty() {
            params.push(("forecast_type".to_string(), self.forecast_types.join(",")));
        }
        if let Some(n) = self.forecaster_count_gte {
            params.push(("forecaster_count__gte".to_string(), n.to_string()));
        }
        if let Some(t) = &self.scheduled_resolve_time_gt {
            params.push(("scheduled_resolve_time__gt".to_string(), t.clone()));
        }
        if let Some(t) = &self.scheduled_resolve_time_lt {
            params.push(("scheduled_resolve_time__lt".to_string(), t.clone()));
        }
        if let Some(b) = self.has_community_prediction {
            params.push(("has_community_prediction".to_string(), b.to_string()));
        }
        if let Some(q) = &self.search {
            params.push(("search".to_string(), q.clone()));
        }
        params
    }
}

/// HTTP client for the platform API. Clients are created per call; the
/// concurrency discipline lives in the named semaphores, not here.
#[derive(Debug, Clone)]
pub struct MetaculusClient {
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

impl MetaculusClient {
    pub fn new(settings: &Settings) -> Self {
        Self {
            base_url: METACULUS_API_BASE.to_string(),
            token: settings.metaculus_token.clone(),
            timeout: Duration::from_secs(settings.http_timeout_seconds),
        }
    }

    /// Client pointed at a different base URL (tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn http(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder().timeout(self.timeout).build()?)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header("Authorization", format!("Token {token}")),
            None => request,
        }
    }

    async fn get_json(&self, url: &str, params: &[(String, String)]) -> Result<Value> {
        retry_if_transient(RetryConfig::default(), || async {
            let request = self.authorize(self.http()?.get(url)).query(params);
            let response = request.send().await?;
            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                return Err(Error::api(format!("HTTP {status}: {body}")));
            }
            Ok(response.json().await?)
        })
        .await
    }

    /// Fetch a post envelope and parse its questions.
    pub async fn get_post(&self, post_id: u64) -> Result<Vec<Question>> {
        let url = format!("{}/posts/{}/", self.base_url, post_id);
        let post = self.get_json(&url, &[]).await?;
        Question::from_post_json(&post)
    }

    /// Fetch the single question of a post, failing on notebooks and taking
    /// the first sub-question of groups.
    pub async fn get_question(&self, post_id: u64) -> Result<Question> {
        let mut questions = self.get_post(post_id).await?;
        if questions.is_empty() {
            return Err(Error::api(format!(
                "Post {post_id} has no forecastable question"
            )));
        }
        Ok(questions.remove(0))
    }

    /// Fetch questions matching a filter, paginating until `num_questions`
    /// are collected or the listing ends. Status is re-filtered client-side.
    pub async fn get_questions_matching_filter(
        &self,
        filter: &ApiFilter,
        num_questions: Option<usize>,
    ) -> Result<Vec<Question>> {
        let mut questions = Vec::new();
        let mut offset = 0usize;
        let limit = 100usize;

        loop {
            let mut params = filter.to_params();
            params.push(("offset".to_string(), offset.to_string()));
            params.push(("limit".to_string(), limit.to_string()));

            let url = format!("{}/posts/", self.base_url);
            let data = self.get_json(&url, &params).await?;

            let results = data
                .get("results")
                .and_then(|r| r.as_array())
                .cloned()
                .unwrap_or_default();
            if results.is_empty() {
                break;
            }

            for post in &results {
                // The server-side status filter is not reliably consistent
                if !filter.statuses.is_empty() {
                    let status = post.get("status").and_then(|v| v.as_str()).unwrap_or("");
                    if !filter.statuses.iter().any(|s| s == status) {
                        continue;
                    }
                }
                questions.extend(Question::from_post_json(post)?);

                if let Some(cap) = num_questions {
                    if questions.len() >= cap {
                        questions.truncate(cap);
                        return Ok(questions);
                    }
                }
            }

            if data.get("next").map(|v| v.is_null()).unwrap_or(true) {
                break;
            }
            offset += limit;
        }

        Ok(questions)
    }

    /// Open questions of a tournament (by numeric id or slug).
    pub async fn get_open_tournament_questions(
        &self,
        tournament: &str,
        num_questions: Option<usize>,
    ) -> Result<Vec<Question>> {
        self.get_questions_matching_filter(&ApiFilter::open_in_tournament(tournament), num_questions)
            .await
    }

    /// Coherence links for a question (takes question_id, not post_id).
    pub async fn get_coherence_links(&self, question_id: u64) -> Result<Vec<CoherenceLink>> {
        let url = format!(
            "{}/coherence/question/{}/links/",
            self.base_url, question_id
        );
        let data = self.get_json(&url, &[]).await?;
        let links = data
            .get("data")
            .and_then(|d| d.as_array())
            .cloned()
            .unwrap_or_default();
        links
            .into_iter()
            .map(|link| serde_json::from_value(link).map_err(Error::from))
            .collect()
    }

    /// Raw community-prediction aggregate history (takes question_id).
    pub async fn get_cp_history(&self, question_id: u64, days: u32) -> Result<Value> {
        let url = format!(
            "{}/questions/{}/aggregate-history/",
            self.base_url, question_id
        );
        self.get_json(&url, &[("days".to_string(), days.to_string())])
            .await
    }

    /// Resolve a question_id to its post_id (callers sometimes mix them up).
    pub async fn resolve_question_to_post_id(&self, question_id: u64) -> Option<u64> {
        let url = format!("{}/questions/{}/", self.base_url, question_id);
        let data = self.get_json(&url, &[]).await.ok()?;
        let post_id = data
            .get("post_id")
            .and_then(|v| v.as_u64())
            .or_else(|| data.get("post").and_then(|p| p.get("id")).and_then(|v| v.as_u64()));
        if let Some(pid) = post_id {
            log::info!("Resolved question {question_id} -> post {pid}");
        }
        post_id
    }

    /// Resolve a post_id to its internal question_id.
    pub async fn resolve_post_to_question_id(&self, post_id: u64) -> Option<u64> {
        let url = format!("{}/posts/{}/", self.base_url, post_id);
        let data = self.get_json(&url, &[]).await.ok()?;
        let qid = data
            .get("question")
            .and_then(|q| q.get("id"))
            .and_then(|v| v.as_u64());
        if let Some(qid) = qid {
            log::info!("Resolved post {post_id} -> question {qid}");
        }
        qid
    }
}

/// Whether an error is the platform's not-found response.
pub fn is_not_found(error: &Error) -> bool {
    match error {
        Error::Api(msg) => msg.starts_with("HTTP 404"),
        Error::Http(e) => e.status().map(|s| s.as_u16() == 404).unwrap_or(false),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn binary_post() -> Value {
        json!({
            "id": 41906,
            "title": "Will it happen?",
            "description": "Background.",
            "status": "open",
            "published_at": "2026-01-01T00:00:00Z",
            "nr_forecasters": 120,
            "question": {
                "id": 41906,
                "type": "binary",
                "title": "Will it happen?",
                "resolution_criteria": "Resolves yes if...",
                "fine_print": "Details.",
                "scheduled_close_time": "2026-06-01T00:00:00Z",
                "scheduled_resolve_time": "2026-07-01T00:00:00Z"
            }
        })
    }

    #[test]
    fn test_parse_single_binary_post() {
        let questions = Question::from_post_json(&binary_post()).unwrap();
        assert_eq!(questions.len(), 1);
        let q = &questions[0];
        assert_eq!(q.post_id, 41906);
        assert_eq!(q.question_id, 41906);
        assert_eq!(q.question_type, QuestionType::Binary);
        assert_eq!(q.title, "Will it happen?");
        assert_eq!(q.num_forecasters, Some(120));
        assert_eq!(q.url(), "https://www.metaculus.com/questions/41906");
    }

    #[test]
    fn test_parse_numeric_post_with_scaling() {
        let post = json!({
            "id": 500,
            "title": "How many?",
            "question": {
                "id": 501,
                "type": "numeric",
                "title": "How many?",
                "open_upper_bound": true,
                "scaling": {"range_min": 0.0, "range_max": 500.0, "zero_point": null}
            }
        });
        let questions = Question::from_post_json(&post).unwrap();
        let q = &questions[0];
        assert_eq!(q.question_id, 501);
        let bounds = q.bounds.as_ref().unwrap();
        assert_eq!(bounds.range_max, 500.0);
        assert!(bounds.open_upper_bound);
        assert!(!bounds.open_lower_bound);
        assert_eq!(bounds.effective_cdf_size(), 201);
    }

    #[test]
    fn test_parse_discrete_cdf_size() {
        let post = json!({
            "id": 600,
            "question": {
                "id": 601,
                "type": "discrete",
                "title": "Which count?",
                "scaling": {"range_min": 0.0, "range_max": 10.0, "inbound_outcome_count": 10}
            }
        });
        let questions = Question::from_post_json(&post).unwrap();
        let bounds = questions[0].bounds.as_ref().unwrap();
        assert_eq!(bounds.cdf_size, Some(11));
    }

    #[test]
    fn test_parse_group_post_unpacks() {
        let post = json!({
            "id": 700,
            "title": "Group",
            "description": "Shared background",
            "group_of_questions": {
                "questions": [
                    {"id": 701, "type": "binary", "title": "Sub A"},
                    {"id": 702, "type": "binary", "title": "Sub B"}
                ]
            }
        });
        let questions = Question::from_post_json(&post).unwrap();
        assert_eq!(questions.len(), 2);
        // post_id and question_id diverge for group posts
        assert_eq!(questions[0].post_id, 700);
        assert_eq!(questions[0].question_id, 701);
        assert_eq!(questions[1].question_id, 702);
        assert_eq!(questions[0].description, "Shared background");
    }

    #[test]
    fn test_parse_notebook_yields_nothing() {
        let post = json!({"id": 800, "title": "Notebook post"});
        assert!(Question::from_post_json(&post).unwrap().is_empty());
    }

    #[test]
    fn test_parse_multiple_choice_options() {
        let post = json!({
            "id": 900,
            "question": {
                "id": 900,
                "type": "multiple_choice",
                "title": "Which?",
                "options": ["A", "B", "C"]
            }
        });
        let questions = Question::from_post_json(&post).unwrap();
        assert_eq!(questions[0].options, vec!["A", "B", "C"]);
        let context = questions[0].to_context();
        assert_eq!(context.options.len(), 3);
    }

    #[test]
    fn test_filter_params() {
        let filter = ApiFilter {
            statuses: vec!["open".into()],
            tournaments: vec!["32916".into(), "minibench".into()],
            forecaster_count_gte: Some(10),
            ..Default::default()
        };
        let params = filter.to_params();
        assert!(params.contains(&("status".to_string(), "open".to_string())));
        assert!(params.contains(&("tournaments".to_string(), "32916,minibench".to_string())));
        assert!(params.contains(&("forecaster_count__gte".to_string(), "10".to_string())));
        // Default ordering is always present
        assert!(params.iter().any(|(k, _)| k == "order_by"));
    }

    #[test]
    fn test_is_not_found() {
        assert!(is_not_found(&Error::api("HTTP 404: not found")));
        assert!(!is_not_found(&Error::api("HTTP 500: boom")));
        assert!(!is_not_found(&Error::timeout()));
    }
}
