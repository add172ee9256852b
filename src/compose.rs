//! Sub-question composition.
//!
//! `spawn_subquestions` lets the model decompose a question into
//! independent sub-questions and obtain their forecasts concurrently. Each
//! sub-question gets its own full forecasting session with
//! `allow_spawn = false` — removing this tool from the sub-session's tool
//! set is what bounds the recursion depth at two. Every sub-forecast comes
//! back individually with success/failure counts; no aggregation happens
//! here, the calling agent synthesizes.

use crate::tools::{Tool, tool};
use crate::types::{
    ForecastOutput, ForecastRequest, NumericBounds, QuestionContext, QuestionType,
};
use crate::{Error, Result};
use futures::future::{BoxFuture, join_all};
use serde_json::{Value, json};
use std::sync::Arc;

/// Recursive entry point into the orchestrator, injected to avoid a module
/// cycle. The orchestrator passes a closure over its own `run_forecast`.
pub type RunForecastFn =
    Arc<dyn Fn(ForecastRequest) -> BoxFuture<'static, Result<ForecastOutput>> + Send + Sync>;

/// One parsed sub-question spec.
#[derive(Debug, Clone)]
struct SubQuestion {
    question: String,
    context: String,
    weight: f64,
    question_type: QuestionType,
    options: Vec<String>,
    numeric_bounds: Option<NumericBounds>,
}

fn parse_subquestion(value: &Value) -> Result<SubQuestion> {
    let question = value
        .get("question")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::invalid_input("Each subquestion needs a 'question' field"))?
        .to_string();

    let question_type = value
        .get("type")
        .and_then(|v| v.as_str())
        .map(QuestionType::parse)
        .unwrap_or(QuestionType::Binary);

    let numeric_bounds = match value.get("numeric_bounds") {
        Some(bounds) if !bounds.is_null() => Some(serde_json::from_value(bounds.clone())?),
        _ => None,
    };

    Ok(SubQuestion {
        question,
        context: value
            .get("context")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        weight: value.get("weight").and_then(|v| v.as_f64()).unwrap_or(1.0),
        question_type,
        options: value
            .get("options")
            .and_then(|v| v.as_array())
            .map(|opts| {
                opts.iter()
                    .filter_map(|o| o.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default(),
        numeric_bounds,
    })
}

fn build_context(sub: &SubQuestion) -> QuestionContext {
    let mut context = QuestionContext::for_subquestion(sub.question.clone(), sub.question_type);
    context.description = sub.context.clone();
    match sub.question_type {
        QuestionType::MultipleChoice => context.options = sub.options.clone(),
        QuestionType::Numeric | QuestionType::Discrete => {
            context.numeric_bounds = sub.numeric_bounds.clone();
        }
        _ => {}
    }
    context
}

fn subforecast_response(sub: &SubQuestion, result: Result<ForecastOutput>) -> Value {
    match result {
        Ok(output) => {
            let mut response = json!({
                "question": sub.question,
                "type": sub.question_type.as_str(),
                "summary": output.summary,
                "weight": sub.weight,
                "error": Value::Null,
            });
            match sub.question_type {
                QuestionType::Binary | QuestionType::Date => {
                    response["probability"] = json!(output.probability);
                }
                QuestionType::Numeric | QuestionType::Discrete => {
                    response["median"] = json!(output.median);
                    response["confidence_interval"] = json!(output.confidence_interval);
                    response["percentiles"] = json!(output.percentiles);
                }
                QuestionType::MultipleChoice => {
                    response["probabilities"] = json!(output.probabilities);
                }
            }
            response
        }
        Err(e) => {
            log::error!("Sub-forecast failed: {}: {e}", sub.question);
            json!({
                "question": sub.question,
                "type": sub.question_type.as_str(),
                "summary": Value::Null,
                "weight": sub.weight,
                "error": e.to_string(),
            })
        }
    }
}

/// Build the `spawn_subquestions` tool.
///
/// `cutoff` is the parent session's retrodict cutoff: sub-forecasts inherit
/// the same time restriction. `max_turns` and `max_budget_usd` are the
/// per-sub-forecast caps from settings (smaller than the parent's).
pub fn spawn_subquestions_tool(
    run_forecast: RunForecastFn,
    cutoff: Option<chrono::NaiveDate>,
    max_turns: u32,
    max_budget_usd: f64,
) -> Tool {
    tool(
        "spawn_subquestions",
        "Decompose a forecasting question into sub-questions and forecast each in \
         parallel. Each sub-question gets its own forecasting agent with full research \
         capabilities. Pass subquestions as a list of {question, context?, weight?, \
         type?, options?, numeric_bounds?}. Returns all individual sub-forecasts for \
         you to synthesize. No automatic aggregation — you decide how to combine \
         results.",
    )
    .param("subquestions", "array")
    .build(move |args| {
        let run_forecast = run_forecast.clone();
        async move {
            let specs = args
                .get("subquestions")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            if specs.is_empty() {
                return Err(Error::invalid_input("No subquestions provided"));
            }

            let subquestions = specs
                .iter()
                .map(parse_subquestion)
                .collect::<Result<Vec<_>>>()?;

            let runs = subquestions.iter().map(|sub| {
                let run_forecast = run_forecast.clone();
                let request = ForecastRequest {
                    question_context: Some(build_context(sub)),
                    allow_spawn: false, // bounds recursion depth at two
                    retrodict_cutoff: cutoff,
                    max_turns: Some(max_turns),
                    max_budget_usd: Some(max_budget_usd),
                    ..Default::default()
                };
                async move { (run_forecast)(request).await }
            });
            let results = join_all(runs).await;

            let responses: Vec<Value> = subquestions
                .iter()
                .zip(results)
                .map(|(sub, result)| subforecast_response(sub, result))
                .collect();

            let failed = responses
                .iter()
                .filter(|r| !r["error"].is_null())
                .count();
            let successful = responses.len() - failed;

            if successful == 0 {
                let errors: Vec<&str> = responses
                    .iter()
                    .filter_map(|r| r["error"].as_str())
                    .collect();
                return Err(Error::tool(format!(
                    "All sub-forecasts failed: {errors:?}"
                )));
            }

            Ok(json!({
                "subforecasts": responses,
                "successful_count": successful,
                "failed_count": failed,
            }))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BinaryForecast, Forecast};

    fn fake_runner(fail_titles: Vec<String>) -> RunForecastFn {
        Arc::new(move |request: ForecastRequest| {
            let fail_titles = fail_titles.clone();
            Box::pin(async move {
                let context = request.question_context.expect("sub-request has context");
                assert!(!request.allow_spawn, "sub-forecasts must not spawn");
                if fail_titles.contains(&context.title) {
                    return Err(Error::other("simulated failure"));
                }
                let mut output = ForecastOutput::new(
                    0,
                    0,
                    context.title.clone(),
                    context.question_type,
                );
                match context.question_type {
                    QuestionType::Numeric | QuestionType::Discrete => {
                        output.median = Some(100.0);
                        output.confidence_interval = Some((50.0, 200.0));
                        output.summary = "numeric answer".into();
                    }
                    _ => {
                        output.apply_forecast(&Forecast::Binary(BinaryForecast {
                            summary: "binary answer".into(),
                            factors: vec![],
                            logit: 1.0,
                            probability: 0.7,
                        }));
                    }
                }
                Ok(output)
            })
        })
    }

    #[tokio::test]
    async fn test_spawn_three_subquestions() {
        let tool = spawn_subquestions_tool(fake_runner(vec![]), None, 50, 5.0);
        let result = tool
            .execute(json!({
                "subquestions": [
                    {"question": "Is A true?", "type": "binary"},
                    {"question": "Is B true?", "type": "binary", "weight": 0.5},
                    {"question": "How many C?", "type": "numeric",
                     "numeric_bounds": {"range_min": 0.0, "range_max": 500.0}}
                ]
            }))
            .await
            .unwrap();

        assert_eq!(result["successful_count"], 3);
        assert_eq!(result["failed_count"], 0);
        let subforecasts = result["subforecasts"].as_array().unwrap();
        assert_eq!(subforecasts.len(), 3);

        // Binary entries carry a probability; numeric entries a median
        assert_eq!(subforecasts[0]["probability"], 0.7);
        assert_eq!(subforecasts[0]["type"], "binary");
        assert_eq!(subforecasts[0]["summary"], "binary answer");
        assert_eq!(subforecasts[1]["weight"], 0.5);
        assert_eq!(subforecasts[2]["median"], 100.0);
        assert_eq!(subforecasts[2]["type"], "numeric");
    }

    #[tokio::test]
    async fn test_partial_failure_is_reported_not_fatal() {
        let tool =
            spawn_subquestions_tool(fake_runner(vec!["Is B true?".into()]), None, 50, 5.0);
        let result = tool
            .execute(json!({
                "subquestions": [
                    {"question": "Is A true?"},
                    {"question": "Is B true?"}
                ]
            }))
            .await
            .unwrap();

        assert_eq!(result["successful_count"], 1);
        assert_eq!(result["failed_count"], 1);
        let failed = &result["subforecasts"][1];
        assert!(failed["error"].as_str().unwrap().contains("simulated failure"));
    }

    #[tokio::test]
    async fn test_all_failed_is_tool_error() {
        let tool = spawn_subquestions_tool(
            fake_runner(vec!["Is A true?".into()]),
            None,
            50,
            5.0,
        );
        let result = tool
            .execute(json!({"subquestions": [{"question": "Is A true?"}]}))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_empty_subquestions_rejected() {
        let tool = spawn_subquestions_tool(fake_runner(vec![]), None, 50, 5.0);
        assert!(tool.execute(json!({"subquestions": []})).await.is_err());
        assert!(tool.execute(json!({})).await.is_err());
    }

    #[test]
    fn test_parse_subquestion_defaults() {
        let sub = parse_subquestion(&json!({"question": "Q?"})).unwrap();
        assert_eq!(sub.weight, 1.0);
        assert_eq!(sub.question_type, QuestionType::Binary);
        assert!(sub.options.is_empty());

        assert!(parse_subquestion(&json!({"context": "no question"})).is_err());
    }
}
