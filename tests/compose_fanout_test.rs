//! Sub-question fan-out: three sub-questions, concurrent execution, typed
//! per-item responses, no aggregation.

use forecast_agent::compose::{RunForecastFn, spawn_subquestions_tool};
use forecast_agent::{Error, Forecast, ForecastOutput, ForecastRequest, QuestionType};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn runner(call_counter: Arc<AtomicUsize>) -> RunForecastFn {
    Arc::new(move |request: ForecastRequest| {
        let call_counter = call_counter.clone();
        Box::pin(async move {
            call_counter.fetch_add(1, Ordering::SeqCst);
            let context = request.question_context.expect("sub-forecast context");

            // The anti-recursion invariant: sub-forecasts never spawn.
            assert!(!request.allow_spawn);

            let mut output =
                ForecastOutput::new(0, 0, context.title.clone(), context.question_type);
            match context.question_type {
                QuestionType::Numeric | QuestionType::Discrete => {
                    let forecast = Forecast::parse(
                        QuestionType::Numeric,
                        &json!({
                            "summary": "numeric sub-forecast",
                            "percentile_10": 10.0,
                            "percentile_20": 20.0,
                            "percentile_40": 40.0,
                            "percentile_60": 60.0,
                            "percentile_80": 80.0,
                            "percentile_90": 90.0
                        }),
                    )?;
                    output.apply_forecast(&forecast);
                }
                _ => {
                    let forecast = Forecast::parse(
                        QuestionType::Binary,
                        &json!({
                            "summary": "binary sub-forecast",
                            "logit": 0.5,
                            "probability": 0.6
                        }),
                    )?;
                    output.apply_forecast(&forecast);
                }
            }
            Ok(output)
        })
    })
}

#[tokio::test]
async fn three_subquestions_two_binary_one_numeric() {
    let calls = Arc::new(AtomicUsize::new(0));
    let tool = spawn_subquestions_tool(runner(calls.clone()), None, 50, 5.0);

    let result = tool
        .execute(json!({
            "subquestions": [
                {"question": "Will condition A hold?", "type": "binary"},
                {"question": "Will condition B hold?", "type": "binary", "weight": 2.0},
                {"question": "How many events?", "type": "numeric",
                 "numeric_bounds": {"range_min": 0.0, "range_max": 100.0}}
            ]
        }))
        .await
        .unwrap();

    assert_eq!(result["successful_count"], 3);
    assert_eq!(result["failed_count"], 0);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let subforecasts = result["subforecasts"].as_array().unwrap();
    assert_eq!(subforecasts.len(), 3);

    // Every entry carries its question, type, summary, and the
    // type-appropriate numeric fields.
    for entry in subforecasts {
        assert!(entry["question"].is_string());
        assert!(entry["type"].is_string());
        assert!(entry["summary"].is_string());
        assert!(entry["error"].is_null());
    }
    assert_eq!(subforecasts[0]["probability"], 0.6);
    assert_eq!(subforecasts[1]["weight"], 2.0);
    assert_eq!(subforecasts[2]["median"], 50.0);
    assert_eq!(
        subforecasts[2]["confidence_interval"],
        json!([10.0, 90.0])
    );

    // No aggregate field: synthesis belongs to the calling agent.
    assert!(result.get("aggregate").is_none());
    assert!(result.get("combined_probability").is_none());
}

#[tokio::test]
async fn retrodict_cutoff_propagates_to_subforecasts() {
    let cutoff = chrono::NaiveDate::from_ymd_opt(2026, 1, 15).unwrap();

    let observed: Arc<std::sync::Mutex<Vec<Option<chrono::NaiveDate>>>> =
        Arc::new(std::sync::Mutex::new(Vec::new()));
    let observed_clone = observed.clone();

    let runner: RunForecastFn = Arc::new(move |request: ForecastRequest| {
        let observed = observed_clone.clone();
        Box::pin(async move {
            observed.lock().unwrap().push(request.retrodict_cutoff);
            Err::<ForecastOutput, _>(Error::other("stop here"))
        })
    });

    let tool = spawn_subquestions_tool(runner, Some(cutoff), 50, 5.0);
    let _ = tool
        .execute(json!({"subquestions": [{"question": "Q?"}]}))
        .await;

    assert_eq!(*observed.lock().unwrap(), vec![Some(cutoff)]);
}

#[tokio::test]
async fn sub_budget_caps_are_applied() {
    let seen: Arc<std::sync::Mutex<Vec<(Option<u32>, Option<f64>)>>> =
        Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen_clone = seen.clone();

    let runner: RunForecastFn = Arc::new(move |request: ForecastRequest| {
        let seen = seen_clone.clone();
        Box::pin(async move {
            seen.lock()
                .unwrap()
                .push((request.max_turns, request.max_budget_usd));
            Err::<ForecastOutput, _>(Error::other("stop here"))
        })
    });

    let tool = spawn_subquestions_tool(runner, None, 25, 2.5);
    let _ = tool
        .execute(json!({"subquestions": [{"question": "Q?"}]}))
        .await;

    assert_eq!(*seen.lock().unwrap(), vec![(Some(25), Some(2.5))]);
}
