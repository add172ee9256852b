//! Tool availability policy.
//!
//! A pure computation from configured credentials, the retrodict flag, and
//! the spawn permission to the set of allowed tool identifiers. Tool
//! availability is gated at two layers: the registry only registers tools
//! whose backing services exist, and the policy decides which registered
//! tools this session may call. The model only ever sees the intersection.
//!
//! Retrodict mode swaps the information diet: live market prices, live
//! news, and the general search tool's live crawling go away, and the
//! archive-backed `web_search` comes in.

use crate::{RetrodictCutoff, Settings};

/// Platform data tools (require the Metaculus token).
pub const METACULUS_TOOLS: &[&str] = &[
    "forecasting__get_metaculus_questions",
    "forecasting__list_tournament_questions",
    "forecasting__search_metaculus",
    "forecasting__get_coherence_links",
    "forecasting__get_cp_history",
    "forecasting__get_prediction_history",
];

/// Wikipedia (no API key required).
pub const WIKIPEDIA_TOOLS: &[&str] = &["forecasting__wikipedia"];

/// Web search (requires the search API key).
pub const SEARCH_TOOLS: &[&str] = &["forecasting__search_exa"];

/// News search (requires news credentials; live-only).
pub const NEWS_TOOLS: &[&str] = &["forecasting__search_news"];

/// Economic data (requires the FRED API key).
pub const FRED_TOOLS: &[&str] = &["financial__fred_series", "financial__fred_search"];

/// Company data (no API key required).
pub const COMPANY_TOOLS: &[&str] = &["financial__company_financials"];

/// Live market prices (excluded in retrodict mode).
pub const LIVE_MARKET_TOOLS: &[&str] = &[
    "markets__polymarket_price",
    "markets__manifold_price",
    "markets__stock_price",
];

/// Historical market data (date-capped in retrodict mode).
pub const HISTORICAL_MARKET_TOOLS: &[&str] = &[
    "markets__polymarket_history",
    "markets__manifold_history",
    "markets__stock_history",
];

/// Search trends (timeframe-rewritten in retrodict mode).
pub const TRENDS_TOOLS: &[&str] = &[
    "trends__google_trends",
    "trends__google_trends_compare",
    "trends__google_trends_related",
];

/// Sandbox execution.
pub const SANDBOX_TOOLS: &[&str] = &["sandbox__execute_code", "sandbox__install_package"];

/// Notes.
pub const NOTES_TOOLS: &[&str] = &["notes__notes"];

/// Sub-question composition (removed when spawning is not allowed).
pub const COMPOSITION_TOOLS: &[&str] = &["composition__spawn_subquestions"];

/// Archive-backed search (only in retrodict mode).
pub const RETRODICT_SEARCH_TOOLS: &[&str] = &["search__web_search"];

/// Centralized policy for tool availability.
///
/// The policy is a value object: the same inputs always produce the same
/// allowed list. The retrodict flag is captured at construction from the
/// session, never read from ambient state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPolicy {
    has_metaculus_token: bool,
    has_search_key: bool,
    has_news_credentials: bool,
    has_fred_key: bool,
    is_retrodict: bool,
}

impl ToolPolicy {
    pub fn new(settings: &Settings, cutoff: Option<RetrodictCutoff>) -> Self {
        Self {
            has_metaculus_token: settings.metaculus_token.is_some(),
            has_search_key: settings.exa_api_key.is_some(),
            has_news_credentials: settings.asknews_client_id.is_some()
                && settings.asknews_client_secret.is_some(),
            has_fred_key: settings.fred_api_key.is_some(),
            is_retrodict: cutoff.is_some(),
        }
    }

    pub fn is_retrodict(&self) -> bool {
        self.is_retrodict
    }

    /// Compute the allowed tool identifiers.
    ///
    /// `allow_spawn` is false for sub-forecasts: removing the composition
    /// tool here is what prevents unbounded recursion.
    pub fn allowed_tools(&self, allow_spawn: bool) -> Vec<String> {
        let mut tools: Vec<&str> = Vec::new();

        if self.has_metaculus_token {
            tools.extend_from_slice(METACULUS_TOOLS);
        }
        tools.extend_from_slice(WIKIPEDIA_TOOLS);
        if self.has_search_key {
            tools.extend_from_slice(SEARCH_TOOLS);
        }
        if self.has_news_credentials && !self.is_retrodict {
            tools.extend_from_slice(NEWS_TOOLS);
        }
        if self.has_fred_key {
            tools.extend_from_slice(FRED_TOOLS);
        }
        tools.extend_from_slice(COMPANY_TOOLS);
        if !self.is_retrodict {
            tools.extend_from_slice(LIVE_MARKET_TOOLS);
        }
        tools.extend_from_slice(HISTORICAL_MARKET_TOOLS);
        tools.extend_from_slice(TRENDS_TOOLS);
        tools.extend_from_slice(SANDBOX_TOOLS);
        tools.extend_from_slice(NOTES_TOOLS);
        if allow_spawn {
            tools.extend_from_slice(COMPOSITION_TOOLS);
        }
        if self.is_retrodict {
            tools.extend_from_slice(RETRODICT_SEARCH_TOOLS);
        }

        let mut allowed: Vec<String> = tools.iter().map(|t| t.to_string()).collect();
        allowed.sort();
        allowed
    }

    /// Whether a specific tool is available under this policy.
    pub fn is_tool_available(&self, tool_name: &str, allow_spawn: bool) -> bool {
        self.allowed_tools(allow_spawn)
            .iter()
            .any(|t| t == tool_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn full_settings() -> Settings {
        Settings {
            metaculus_token: Some("t".into()),
            exa_api_key: Some("e".into()),
            asknews_client_id: Some("i".into()),
            asknews_client_secret: Some("s".into()),
            fred_api_key: Some("f".into()),
            ..Settings::default()
        }
    }

    fn cutoff() -> RetrodictCutoff {
        RetrodictCutoff::new(NaiveDate::from_ymd_opt(2026, 1, 15).unwrap())
    }

    #[test]
    fn test_policy_is_pure() {
        let policy = ToolPolicy::new(&full_settings(), None);
        assert_eq!(policy.allowed_tools(true), policy.allowed_tools(true));
        assert_eq!(policy.allowed_tools(false), policy.allowed_tools(false));
    }

    #[test]
    fn test_live_mode_full_credentials() {
        let policy = ToolPolicy::new(&full_settings(), None);
        let allowed = policy.allowed_tools(true);

        for tool in METACULUS_TOOLS
            .iter()
            .chain(SEARCH_TOOLS)
            .chain(NEWS_TOOLS)
            .chain(LIVE_MARKET_TOOLS)
            .chain(HISTORICAL_MARKET_TOOLS)
            .chain(TRENDS_TOOLS)
            .chain(FRED_TOOLS)
            .chain(COMPOSITION_TOOLS)
        {
            assert!(allowed.iter().any(|t| t == tool), "{tool} should be allowed");
        }
        // Archive search only exists in retrodict mode
        assert!(!allowed.iter().any(|t| t == "search__web_search"));
        // Sorted output
        let mut sorted = allowed.clone();
        sorted.sort();
        assert_eq!(allowed, sorted);
    }

    #[test]
    fn test_missing_credentials_exclude_tools() {
        let policy = ToolPolicy::new(&Settings::default(), None);
        let allowed = policy.allowed_tools(true);

        for tool in METACULUS_TOOLS
            .iter()
            .chain(SEARCH_TOOLS)
            .chain(NEWS_TOOLS)
            .chain(FRED_TOOLS)
        {
            assert!(!allowed.iter().any(|t| t == tool), "{tool} should be excluded");
        }
        // Keyless tools remain
        assert!(allowed.iter().any(|t| t == "forecasting__wikipedia"));
        assert!(allowed.iter().any(|t| t == "financial__company_financials"));
        assert!(allowed.iter().any(|t| t == "notes__notes"));
    }

    #[test]
    fn test_retrodict_exclusions_and_additions() {
        let policy = ToolPolicy::new(&full_settings(), Some(cutoff()));
        let allowed = policy.allowed_tools(true);

        // Live tools go away
        for tool in LIVE_MARKET_TOOLS.iter().chain(NEWS_TOOLS) {
            assert!(!allowed.iter().any(|t| t == tool), "{tool} should be excluded");
        }
        // History tools stay (their dates get capped by the hook)
        for tool in HISTORICAL_MARKET_TOOLS {
            assert!(allowed.iter().any(|t| t == tool), "{tool} should stay");
        }
        // search_exa stays (parameters rewritten, not excluded)
        assert!(allowed.iter().any(|t| t == "forecasting__search_exa"));
        // The archive search is added
        assert!(allowed.iter().any(|t| t == "search__web_search"));
    }

    #[test]
    fn test_anti_recursion() {
        let policy = ToolPolicy::new(&full_settings(), None);
        let sub = policy.allowed_tools(false);
        assert!(!sub.iter().any(|t| t == "composition__spawn_subquestions"));
        assert!(!policy.is_tool_available("composition__spawn_subquestions", false));
        assert!(policy.is_tool_available("composition__spawn_subquestions", true));
    }
}
