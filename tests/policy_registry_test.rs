//! Policy purity, anti-recursion, and the tool-result envelope invariant.

use forecast_agent::hooks::Hooks;
use forecast_agent::metrics::MetricsCollector;
use forecast_agent::retrodict::RetrodictCutoff;
use forecast_agent::{Error, Settings, ToolCall, ToolPolicy, ToolRegistry, tool};
use serde_json::json;

fn full_settings() -> Settings {
    Settings {
        metaculus_token: Some("token".into()),
        exa_api_key: Some("key".into()),
        asknews_client_id: Some("id".into()),
        asknews_client_secret: Some("secret".into()),
        fred_api_key: Some("fred".into()),
        ..Settings::default()
    }
}

#[test]
fn policy_is_a_pure_function_of_its_inputs() {
    let policy = ToolPolicy::new(&full_settings(), None);

    // Calling twice with the same inputs yields the same list
    assert_eq!(policy.allowed_tools(true), policy.allowed_tools(true));
    assert_eq!(policy.allowed_tools(false), policy.allowed_tools(false));

    // A policy built from identical inputs agrees
    let twin = ToolPolicy::new(&full_settings(), None);
    assert_eq!(policy.allowed_tools(true), twin.allowed_tools(true));
}

#[test]
fn composer_tool_absent_when_spawn_disallowed() {
    let policy = ToolPolicy::new(&full_settings(), None);

    let parent = policy.allowed_tools(true);
    let child = policy.allowed_tools(false);

    assert!(parent.iter().any(|t| t == "composition__spawn_subquestions"));
    assert!(!child.iter().any(|t| t == "composition__spawn_subquestions"));
    // Spawn permission changes nothing else
    let parent_minus: Vec<_> = parent
        .iter()
        .filter(|t| t.as_str() != "composition__spawn_subquestions")
        .cloned()
        .collect();
    assert_eq!(parent_minus, child);
}

#[test]
fn retrodict_policy_swaps_live_for_archive() {
    let cutoff = RetrodictCutoff::new(chrono::NaiveDate::from_ymd_opt(2026, 1, 15).unwrap());
    let live = ToolPolicy::new(&full_settings(), None).allowed_tools(true);
    let retro = ToolPolicy::new(&full_settings(), Some(cutoff)).allowed_tools(true);

    for tool_name in [
        "markets__polymarket_price",
        "markets__manifold_price",
        "markets__stock_price",
        "forecasting__search_news",
    ] {
        assert!(live.iter().any(|t| t == tool_name));
        assert!(
            !retro.iter().any(|t| t == tool_name),
            "{tool_name} must be excluded under a cutoff"
        );
    }

    assert!(!live.iter().any(|t| t == "search__web_search"));
    assert!(retro.iter().any(|t| t == "search__web_search"));

    // search_exa is rewritten, not excluded
    assert!(retro.iter().any(|t| t == "forecasting__search_exa"));
    // history tools stay available
    assert!(retro.iter().any(|t| t == "markets__stock_history"));
}

#[tokio::test]
async fn every_dispatch_returns_an_envelope() {
    let mut registry = ToolRegistry::new();
    registry.register(
        "testing",
        tool("ok", "Succeeds").build(|args| async move { Ok(args) }),
    );
    registry.register(
        "testing",
        tool("fails", "Always fails").build(|_| async move {
            Err::<serde_json::Value, _>(Error::tool("deliberate failure"))
        }),
    );

    let hooks = Hooks::new();
    let metrics = MetricsCollector::new();

    for (name, expect_error) in [
        ("testing__ok", false),
        ("testing__fails", true),
        ("testing__missing", true),
    ] {
        let result = registry
            .dispatch(
                &ToolCall {
                    tool_name: name.to_string(),
                    arguments: json!({"x": 1}),
                },
                &hooks,
                &metrics,
            )
            .await;

        // The envelope invariant: content list + boolean flag, always.
        assert!(!result.content.is_empty(), "{name}: content must be present");
        assert_eq!(result.is_error, expect_error, "{name}");
    }

    // Metrics saw every call, errors included
    let summary = metrics.summary();
    assert_eq!(summary.total_calls, 3);
    assert_eq!(summary.total_errors, 2);
}

#[test]
fn model_only_sees_allowed_tools() {
    let mut registry = ToolRegistry::new();
    registry.register(
        "forecasting",
        tool("wikipedia", "Wikipedia").build(|a| async move { Ok(a) }),
    );
    registry.register(
        "markets",
        tool("stock_price", "Live price").build(|a| async move { Ok(a) }),
    );

    let allowed = vec!["forecasting__wikipedia".to_string()];
    let definitions = registry.model_tool_definitions(&allowed);
    assert_eq!(definitions.len(), 1);
    assert_eq!(definitions[0]["function"]["name"], "forecasting__wikipedia");

    let docs = registry.docs_markdown(&allowed);
    assert!(docs.contains("wikipedia"));
    assert!(!docs.contains("stock_price"));
}
