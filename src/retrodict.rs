//! Retrodict (time-travel) mode.
//!
//! Retrodict mode restricts every information source to data available
//! before a cutoff date, so a forecast can be produced "blind" on an
//! already-resolved question for calibration. Nothing about the restriction
//! is visible to the model; it simply experiences a world where "today" is
//! the cutoff.
//!
//! Two mechanisms cooperate:
//!
//! - The cutoff is carried as an explicit immutable value on the session
//!   context. Tools that need it (web search, Wikipedia, CP history,
//!   prediction history, FRED) read it at construction time and restrict
//!   their own inputs.
//! - A pre-tool-use hook rewrites the arguments of date-cappable tools
//!   (market history end dates, FRED `observation_end`, trends timeframes,
//!   CP history `before`) and denies live-only tools outright as defense in
//!   depth below the policy gate.

use crate::hooks::{HookDecision, Hooks, PreToolUseEvent};
use chrono::NaiveDate;
use serde_json::json;

/// The cutoff date and its derived string forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrodictCutoff {
    date: NaiveDate,
}

impl RetrodictCutoff {
    pub fn new(date: NaiveDate) -> Self {
        Self { date }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// YYYY-MM-DD, for search filters and API date parameters.
    pub fn date_str(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    /// YYYYMMDD, for Wayback Machine timestamps.
    pub fn wayback_ts(&self) -> String {
        self.date.format("%Y%m%d").to_string()
    }

    /// Unix timestamp (seconds) at midnight UTC of the cutoff date.
    pub fn unix_ts(&self) -> i64 {
        self.date
            .and_hms_opt(0, 0, 0)
            .expect("midnight is a valid time")
            .and_utc()
            .timestamp()
    }

    /// Unix timestamp in milliseconds (Manifold's history API).
    pub fn unix_ts_ms(&self) -> i64 {
        self.unix_ts() * 1000
    }
}

/// Tools whose date arguments the hook caps at the cutoff.
const DATE_CAPPABLE_TOOLS: &[&str] = &[
    "markets__stock_history",
    "markets__polymarket_history",
    "markets__manifold_history",
    "financial__fred_series",
    "trends__google_trends",
    "trends__google_trends_compare",
    "trends__google_trends_related",
];

/// Live-only tools the hook denies. The policy already excludes these from
/// the allowed set; the hook is the second layer.
const LIVE_ONLY_TOOLS: &[&str] = &[
    "markets__stock_price",
    "markets__polymarket_price",
    "markets__manifold_price",
    "forecasting__search_news",
];

/// Build the hook set enforcing the cutoff on tool arguments.
pub fn retrodict_hooks(cutoff: RetrodictCutoff) -> Hooks {
    Hooks::new().with_pre_tool_use(move |event: PreToolUseEvent| {
        let decision = apply_cutoff(&cutoff, &event);
        async move { decision }
    })
}

fn apply_cutoff(cutoff: &RetrodictCutoff, event: &PreToolUseEvent) -> Option<HookDecision> {
    let name = event.tool_name.as_str();

    if LIVE_ONLY_TOOLS.contains(&name) {
        return Some(HookDecision::deny(format!(
            "{name} is unavailable: live data cannot be time-restricted"
        )));
    }

    if !DATE_CAPPABLE_TOOLS.contains(&name) && name != "forecasting__get_cp_history" {
        return None;
    }

    let date_str = cutoff.date_str();
    let mut args = event.arguments.clone();

    match name {
        "markets__stock_history" | "markets__polymarket_history" | "markets__manifold_history" => {
            args["end_date"] = json!(date_str);
            log::info!("[Retrodict] {name} capped to {date_str}");
            Some(HookDecision::modify(args, "history end capped at cutoff"))
        }
        "financial__fred_series" => {
            args["observation_end"] = json!(date_str);
            log::info!("[Retrodict] fred_series capped to {date_str}");
            Some(HookDecision::modify(args, "observation_end capped at cutoff"))
        }
        "trends__google_trends"
        | "trends__google_trends_compare"
        | "trends__google_trends_related" => {
            // Trends accepts relative timeframes ("today 3-m"); rewrite to
            // an absolute range ending at the cutoff, one year back.
            let start = cutoff
                .date()
                .checked_sub_months(chrono::Months::new(12))
                .unwrap_or(cutoff.date());
            let timeframe = format!("{} {}", start.format("%Y-%m-%d"), date_str);
            args["timeframe"] = json!(timeframe);
            log::info!("[Retrodict] trends timeframe rewritten to {timeframe}");
            Some(HookDecision::modify(args, "timeframe rewritten to cutoff"))
        }
        "forecasting__get_cp_history" => {
            args["before"] = json!(date_str);
            log::info!("[Retrodict] get_cp_history capped to {date_str}");
            Some(HookDecision::modify(args, "before parameter injected"))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cutoff() -> RetrodictCutoff {
        RetrodictCutoff::new(NaiveDate::from_ymd_opt(2026, 1, 15).unwrap())
    }

    #[test]
    fn test_cutoff_string_forms() {
        let c = cutoff();
        assert_eq!(c.date_str(), "2026-01-15");
        assert_eq!(c.wayback_ts(), "20260115");
        assert_eq!(c.unix_ts_ms(), c.unix_ts() * 1000);
    }

    #[tokio::test]
    async fn test_live_tools_denied() {
        let hooks = retrodict_hooks(cutoff());
        for name in LIVE_ONLY_TOOLS {
            let decision = hooks
                .run_pre_tool_use(PreToolUseEvent {
                    tool_name: name.to_string(),
                    arguments: json!({"query": "x"}),
                })
                .await
                .expect("live tool should get a decision");
            assert!(!decision.continue_execution, "{name} should be denied");
        }
    }

    #[tokio::test]
    async fn test_fred_observation_end_capped() {
        let hooks = retrodict_hooks(cutoff());
        let decision = hooks
            .run_pre_tool_use(PreToolUseEvent {
                tool_name: "financial__fred_series".into(),
                arguments: json!({"series_id": "DGS10", "observation_end": "2026-06-01"}),
            })
            .await
            .unwrap();
        assert!(decision.continue_execution);
        let args = decision.modified_arguments.unwrap();
        assert_eq!(args["observation_end"], "2026-01-15");
        // Other arguments untouched
        assert_eq!(args["series_id"], "DGS10");
    }

    #[tokio::test]
    async fn test_trends_timeframe_rewritten() {
        let hooks = retrodict_hooks(cutoff());
        let decision = hooks
            .run_pre_tool_use(PreToolUseEvent {
                tool_name: "trends__google_trends".into(),
                arguments: json!({"keyword": "tesla", "timeframe": "today 3-m"}),
            })
            .await
            .unwrap();
        let args = decision.modified_arguments.unwrap();
        assert_eq!(args["timeframe"], "2025-01-15 2026-01-15");
    }

    #[tokio::test]
    async fn test_cp_history_before_injected() {
        let hooks = retrodict_hooks(cutoff());
        let decision = hooks
            .run_pre_tool_use(PreToolUseEvent {
                tool_name: "forecasting__get_cp_history".into(),
                arguments: json!({"question_id": 123, "days": 30}),
            })
            .await
            .unwrap();
        let args = decision.modified_arguments.unwrap();
        assert_eq!(args["before"], "2026-01-15");
    }

    #[tokio::test]
    async fn test_unrelated_tools_untouched() {
        let hooks = retrodict_hooks(cutoff());
        let decision = hooks
            .run_pre_tool_use(PreToolUseEvent {
                tool_name: "notes__notes".into(),
                arguments: json!({"mode": "list"}),
            })
            .await;
        assert!(decision.is_none());
    }
}
