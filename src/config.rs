//! Application configuration loaded from the environment.
//!
//! External API credentials use their standard names (`METACULUS_TOKEN`,
//! `EXA_API_KEY`, `ASKNEWS_CLIENT_ID`, `ASKNEWS_SECRET`, `FRED_API_KEY`) so
//! they compose with other tooling that reads the same variables.
//! Application-specific knobs live under the `FORECAST_` prefix
//! (e.g. `FORECAST_MODEL`, `FORECAST_MAX_BUDGET_USD`).
//!
//! # Examples
//!
//! ```rust,no_run
//! use forecast_agent::Settings;
//!
//! let settings = Settings::from_env();
//! if settings.exa_api_key.is_none() {
//!     eprintln!("web search disabled");
//! }
//! ```

use std::env;
use std::path::PathBuf;

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env_string(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_parse_opt<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|v| v.parse().ok())
}

/// Application settings.
///
/// Constructed once at startup via [`Settings::from_env`] and shared by
/// reference (the orchestrator clones it into the session context).
#[derive(Debug, Clone)]
pub struct Settings {
    // --- Credentials ---
    /// Metaculus API token. Required for platform access and submission.
    pub metaculus_token: Option<String>,
    /// Exa search API key. Web search tools are disabled without it.
    pub exa_api_key: Option<String>,
    /// AskNews client id. News search requires both id and secret.
    pub asknews_client_id: Option<String>,
    /// AskNews client secret.
    pub asknews_client_secret: Option<String>,
    /// FRED API key. Economic data tools are disabled without it.
    pub fred_api_key: Option<String>,

    // --- Model ---
    /// Model identifier passed to the model API.
    pub model: String,
    /// Base URL of the OpenAI-compatible model endpoint.
    pub model_base_url: String,
    /// API key for the model endpoint.
    pub model_api_key: String,

    // --- Paths ---
    /// Base path for the notes tree (forecasts, sessions, research, structured).
    pub notes_path: PathBuf,
    /// Base path for per-session log files.
    pub logs_path: PathBuf,

    // --- Rate limits ---
    /// Max concurrent Metaculus API requests.
    pub metaculus_max_concurrent: usize,
    /// Max concurrent web/news/wiki search requests.
    pub search_max_concurrent: usize,
    /// Max concurrent Wayback availability requests.
    pub wayback_max_concurrent: usize,

    // --- Tool defaults ---
    /// Default number of web search results.
    pub search_default_limit: usize,
    /// Default number of news results.
    pub news_default_limit: usize,
    /// Default number of Metaculus search results.
    pub metaculus_default_limit: usize,
    /// Default number of tournament questions to list.
    pub tournament_default_limit: usize,
    /// Default number of market results.
    pub market_default_limit: usize,

    // --- Agent budgets ---
    /// Max model turns per forecast (None = unlimited).
    pub max_turns: Option<u32>,
    /// Max spend per forecast in USD (None = unlimited).
    pub max_budget_usd: Option<f64>,
    /// Max model turns for each sub-forecast.
    pub subforecast_max_turns: u32,
    /// Max spend for each sub-forecast in USD.
    pub subforecast_max_budget_usd: f64,

    // --- Timeouts ---
    /// Outer timeout for HTTP requests to research APIs, seconds.
    pub http_timeout_seconds: u64,
    /// Timeout for sandbox code execution, seconds.
    pub sandbox_timeout_seconds: u64,

    // --- Sandbox ---
    /// Docker image for the code-execution sandbox.
    pub sandbox_image: String,
    /// Memory limit for the sandbox container (Docker syntax, e.g. "1g").
    pub sandbox_memory_limit: String,
    /// Docker volume name for the persistent sandbox workspace.
    pub sandbox_volume_name: String,
}

impl Settings {
    /// Load settings from the environment, applying defaults.
    ///
    /// Missing optional API keys are logged once at startup so a misconfigured
    /// deployment is visible before the first tool call fails.
    pub fn from_env() -> Self {
        let settings = Self {
            metaculus_token: env_string("METACULUS_TOKEN"),
            exa_api_key: env_string("EXA_API_KEY"),
            asknews_client_id: env_string("ASKNEWS_CLIENT_ID"),
            asknews_client_secret: env_string("ASKNEWS_SECRET"),
            fred_api_key: env_string("FRED_API_KEY"),

            model: env_string("FORECAST_MODEL")
                .unwrap_or_else(|| "reasoner-large".to_string()),
            model_base_url: env_string("FORECAST_MODEL_BASE_URL")
                .unwrap_or_else(|| "http://localhost:1234/v1".to_string()),
            model_api_key: env_string("FORECAST_MODEL_API_KEY")
                .unwrap_or_else(|| "not-needed".to_string()),

            notes_path: PathBuf::from(
                env_string("FORECAST_NOTES_PATH").unwrap_or_else(|| "./notes".to_string()),
            ),
            logs_path: PathBuf::from(
                env_string("FORECAST_LOGS_PATH").unwrap_or_else(|| "./logs".to_string()),
            ),

            metaculus_max_concurrent: env_parse("FORECAST_METACULUS_MAX_CONCURRENT", 5),
            search_max_concurrent: env_parse("FORECAST_SEARCH_MAX_CONCURRENT", 3),
            wayback_max_concurrent: env_parse("FORECAST_WAYBACK_MAX_CONCURRENT", 5),

            search_default_limit: env_parse("FORECAST_SEARCH_DEFAULT_LIMIT", 10),
            news_default_limit: env_parse("FORECAST_NEWS_DEFAULT_LIMIT", 10),
            metaculus_default_limit: env_parse("FORECAST_METACULUS_DEFAULT_LIMIT", 20),
            tournament_default_limit: env_parse("FORECAST_TOURNAMENT_DEFAULT_LIMIT", 50),
            market_default_limit: env_parse("FORECAST_MARKET_DEFAULT_LIMIT", 5),

            max_turns: env_parse_opt("FORECAST_MAX_TURNS"),
            max_budget_usd: env_parse_opt("FORECAST_MAX_BUDGET_USD"),
            subforecast_max_turns: env_parse("FORECAST_SUBFORECAST_MAX_TURNS", 50),
            subforecast_max_budget_usd: env_parse("FORECAST_SUBFORECAST_MAX_BUDGET_USD", 5.0),

            http_timeout_seconds: env_parse("FORECAST_HTTP_TIMEOUT_SECONDS", 30),
            sandbox_timeout_seconds: env_parse("FORECAST_SANDBOX_TIMEOUT_SECONDS", 30),

            sandbox_image: env_string("FORECAST_SANDBOX_IMAGE")
                .unwrap_or_else(|| "python:3.12-slim".to_string()),
            sandbox_memory_limit: env_string("FORECAST_SANDBOX_MEMORY_LIMIT")
                .unwrap_or_else(|| "1g".to_string()),
            sandbox_volume_name: env_string("FORECAST_SANDBOX_VOLUME_NAME")
                .unwrap_or_else(|| "forecast-sandbox-workspace".to_string()),
        };

        settings.warn_missing_optional_keys();
        settings
    }

    fn warn_missing_optional_keys(&self) {
        let mut missing = Vec::new();
        if self.exa_api_key.is_none() {
            missing.push("EXA_API_KEY");
        }
        if self.asknews_client_id.is_none() || self.asknews_client_secret.is_none() {
            missing.push("ASKNEWS_CLIENT_ID/ASKNEWS_SECRET");
        }
        if self.fred_api_key.is_none() {
            missing.push("FRED_API_KEY");
        }
        if !missing.is_empty() {
            log::warn!(
                "Missing API keys (some tools will be unavailable): {}",
                missing.join(", ")
            );
        }
    }

    /// Token for the platform API, or a config error naming the variable.
    pub fn require_metaculus_token(&self) -> crate::Result<&str> {
        self.metaculus_token
            .as_deref()
            .ok_or_else(|| crate::Error::config("METACULUS_TOKEN is not set"))
    }
}

impl Default for Settings {
    /// Defaults without touching the environment. Used by tests.
    fn default() -> Self {
        Self {
            metaculus_token: None,
            exa_api_key: None,
            asknews_client_id: None,
            asknews_client_secret: None,
            fred_api_key: None,
            model: "reasoner-large".to_string(),
            model_base_url: "http://localhost:1234/v1".to_string(),
            model_api_key: "not-needed".to_string(),
            notes_path: PathBuf::from("./notes"),
            logs_path: PathBuf::from("./logs"),
            metaculus_max_concurrent: 5,
            search_max_concurrent: 3,
            wayback_max_concurrent: 5,
            search_default_limit: 10,
            news_default_limit: 10,
            metaculus_default_limit: 20,
            tournament_default_limit: 50,
            market_default_limit: 5,
            max_turns: None,
            max_budget_usd: None,
            subforecast_max_turns: 50,
            subforecast_max_budget_usd: 5.0,
            http_timeout_seconds: 30,
            sandbox_timeout_seconds: 30,
            sandbox_image: "python:3.12-slim".to_string(),
            sandbox_memory_limit: "1g".to_string(),
            sandbox_volume_name: "forecast-sandbox-workspace".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.metaculus_max_concurrent, 5);
        assert_eq!(settings.search_max_concurrent, 3);
        assert_eq!(settings.wayback_max_concurrent, 5);
        assert_eq!(settings.subforecast_max_turns, 50);
        assert!(settings.max_turns.is_none());
    }

    #[test]
    fn test_require_metaculus_token() {
        let mut settings = Settings::default();
        assert!(settings.require_metaculus_token().is_err());

        settings.metaculus_token = Some("tok".to_string());
        assert_eq!(settings.require_metaculus_token().unwrap(), "tok");
    }
}
