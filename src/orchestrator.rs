//! Orchestrator: drives one question through the full forecast pipeline.
//!
//! The sequence for a run: generate a session id, fetch the question (or
//! accept a pre-built context for sub-forecasts), apply the retrodict
//! cutoff to the session, assemble the tool registry gated by the policy,
//! build the system prompt with the tool documentation, run the model loop
//! to completion, validate the structured output, and synthesize the CDF
//! for continuous questions.
//!
//! Failure semantics: tool errors never fail the run (the model sees them
//! as error envelopes and can recover); a missing or invalid structured
//! output substitutes a neutral default and marks the run as defaulted; a
//! CDF that fails validation fails the run (an invalid distribution must
//! not be submitted); model-level errors (including credit exhaustion with
//! its parsed reset time) unwind to the caller.

use crate::archive::archive_search_tool;
use crate::client::{ModelOptions, ModelSession};
use crate::compose::{RunForecastFn, spawn_subquestions_tool};
use crate::hooks::Hooks;
use crate::metaculus::Question;
use crate::notes::{NotesPaths, notes_tool};
use crate::policy::ToolPolicy;
use crate::research::{ExaProvider, SearchProvider, forecasting_tools};
use crate::retrodict::{RetrodictCutoff, retrodict_hooks};
use crate::sandbox::{Sandbox, sandbox_tools};
use crate::session::{Services, Session};
use crate::tools::{ToolCall, ToolRegistry};
use crate::types::{
    Forecast, ForecastOutput, ForecastRequest, QuestionContext, QuestionType, ResponseFormat,
};
use crate::{Error, Result, numeric, prompts};
use chrono::Local;
use futures::future::BoxFuture;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// JSON schema for the model's structured output, by question type.
fn output_schema(question_type: QuestionType) -> Value {
    let factor_schema = json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": {
                "description": {"type": "string"},
                "logit": {"type": "number"},
                "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0}
            },
            "required": ["description", "logit"]
        }
    });

    match question_type {
        QuestionType::MultipleChoice => json!({
            "type": "object",
            "properties": {
                "summary": {"type": "string"},
                "factors": factor_schema,
                "probabilities": {
                    "type": "object",
                    "additionalProperties": {"type": "number"},
                    "description": "Option label to probability; values sum to 1.0."
                }
            },
            "required": ["summary", "probabilities"]
        }),
        QuestionType::Numeric | QuestionType::Discrete => json!({
            "type": "object",
            "properties": {
                "summary": {"type": "string"},
                "factors": factor_schema,
                "percentile_10": {"type": "number"},
                "percentile_20": {"type": "number"},
                "percentile_40": {"type": "number"},
                "percentile_60": {"type": "number"},
                "percentile_80": {"type": "number"},
                "percentile_90": {"type": "number"},
                "components": {
                    "type": "array",
                    "description": "Scenario mixture; takes precedence over percentiles.",
                    "items": {
                        "type": "object",
                        "properties": {
                            "scenario": {"type": "string"},
                            "mode": {"type": "number"},
                            "lower_bound": {"type": "number"},
                            "upper_bound": {"type": "number"},
                            "weight": {"type": "number", "minimum": 0.0, "maximum": 1.0}
                        },
                        "required": ["mode", "lower_bound", "upper_bound", "weight"]
                    }
                }
            },
            "required": ["summary"]
        }),
        QuestionType::Binary | QuestionType::Date => json!({
            "type": "object",
            "properties": {
                "summary": {"type": "string"},
                "factors": factor_schema,
                "logit": {"type": "number"},
                "probability": {"type": "number", "minimum": 0.0, "maximum": 1.0}
            },
            "required": ["summary", "logit", "probability"]
        }),
    }
}

/// Tools whose calls count as consulted sources.
fn extract_sources(tool_calls: &[ToolCall]) -> Vec<String> {
    tool_calls
        .iter()
        .filter(|call| {
            matches!(
                call.tool_name.as_str(),
                "forecasting__search_exa"
                    | "forecasting__search_news"
                    | "forecasting__wikipedia"
                    | "search__web_search"
            )
        })
        .filter_map(|call| {
            call.arguments
                .get("url")
                .or_else(|| call.arguments.get("query"))
                .and_then(|v| v.as_str())
                .map(String::from)
        })
        .collect()
}

/// The recursive entry point handed to the composition tool.
fn recursive_runner(services: Arc<Services>) -> RunForecastFn {
    Arc::new(move |request: ForecastRequest| {
        let services = services.clone();
        Box::pin(async move { run_forecast(services, request).await }) as BoxFuture<'static, _>
    })
}

/// Run the forecasting agent on a question.
///
/// Boxed so the composition tool can call back into it recursively.
pub fn run_forecast(
    services: Arc<Services>,
    request: ForecastRequest,
) -> BoxFuture<'static, Result<ForecastOutput>> {
    Box::pin(async move { run_forecast_inner(services, request).await })
}

async fn run_forecast_inner(
    services: Arc<Services>,
    request: ForecastRequest,
) -> Result<ForecastOutput> {
    let started = Instant::now();
    let cutoff = request.retrodict_cutoff.map(RetrodictCutoff::new);
    let session = Session::new(services.clone(), cutoff);

    // Resolve the question: pre-built context for sub-forecasts, platform
    // fetch for top-level runs.
    let (context, question): (QuestionContext, Option<Question>) =
        match (&request.question_context, request.post_id) {
            (Some(context), _) => {
                log::info!(
                    "Starting sub-forecast session {} for: {}",
                    session.session_id,
                    context.title
                );
                (context.clone(), None)
            }
            (None, Some(post_id)) => {
                log::info!(
                    "Starting forecast session {} for post {}",
                    session.session_id,
                    post_id
                );
                let question = services.metaculus.get_question(post_id).await?;
                (question.to_context(), Some(question))
            }
            (None, None) => {
                return Err(Error::invalid_input(
                    "Either post_id or question_context must be provided",
                ));
            }
        };

    let question_type = context.question_type;
    let question_id = question.as_ref().map(|q| q.question_id).unwrap_or(0);
    let post_id = question
        .as_ref()
        .map(|q| q.post_id)
        .or(request.post_id)
        .unwrap_or(0);
    let question_title = context.title.clone();

    // Tool assembly, gated by the policy. The sandbox is per-forecast and
    // removed when this function returns.
    let policy = ToolPolicy::new(&services.settings, cutoff);
    let search_provider: Option<Arc<dyn SearchProvider>> =
        services.settings.exa_api_key.as_ref().map(|key| {
            Arc::new(ExaProvider::new(
                key.clone(),
                Duration::from_secs(services.settings.http_timeout_seconds),
            )) as Arc<dyn SearchProvider>
        });

    let sandbox = Arc::new(
        Sandbox::start(&services.settings, &session.session_id, session.is_retrodict()).await?,
    );

    let mut registry = ToolRegistry::new();
    registry.register_all(
        "forecasting",
        forecasting_tools(&session, search_provider.clone()),
    );
    registry.register_all("markets", crate::markets::market_tools(&session));
    registry.register_all("financial", crate::markets::financial_tools(&session));
    registry.register_all("trends", crate::markets::trends_tools(&session));
    registry.register(
        "notes",
        notes_tool(NotesPaths::for_session(&session.notes_base(), post_id)),
    );
    // The registry's tool closures hold the sandbox alive; the container is
    // removed when the registry is dropped at the end of this run.
    registry.register_all("sandbox", sandbox_tools(sandbox));
    if request.allow_spawn {
        registry.register(
            "composition",
            spawn_subquestions_tool(
                recursive_runner(services.clone()),
                request.retrodict_cutoff,
                services.settings.subforecast_max_turns,
                services.settings.subforecast_max_budget_usd,
            ),
        );
    }
    if session.is_retrodict() {
        if let Some(provider) = search_provider {
            registry.register("search", archive_search_tool(&session, provider));
        }
    }

    let hooks = match cutoff {
        Some(cutoff) => retrodict_hooks(cutoff),
        None => Hooks::new(),
    };

    // The model only sees tools the policy allows.
    let allowed = policy.allowed_tools(request.allow_spawn);
    let tool_definitions = registry.model_tool_definitions(&allowed);
    let tool_docs = registry.docs_markdown(&allowed);

    // In retrodict mode the cutoff is presented as today.
    let today = cutoff
        .map(|c| c.date())
        .unwrap_or_else(|| Local::now().date_naive());
    let system_prompt = prompts::build_system_prompt(today, &tool_docs);
    let user_prompt = prompts::build_user_prompt(&context);

    let model_options = ModelOptions::builder()
        .model(services.settings.model.clone())
        .base_url(services.settings.model_base_url.clone())
        .api_key(services.settings.model_api_key.clone())
        .system_prompt(system_prompt)
        .max_turns(
            request
                .max_turns
                .or(services.settings.max_turns)
                .unwrap_or(100),
        )
        .timeout(600)
        .response_format(ResponseFormat::json_schema(
            "forecast",
            output_schema(question_type),
        ))
        .build()?;

    let mut model_session = ModelSession::new(model_options, tool_definitions);
    let outcome = model_session
        .run(
            &user_prompt,
            &registry,
            &hooks,
            &services.metrics,
            request.stream_thinking,
        )
        .await?;

    // Package the output.
    let mut output = ForecastOutput::new(question_id, post_id, question_title, question_type);
    output.reasoning = outcome.reasoning;
    output.sources_consulted = extract_sources(&outcome.tool_calls);
    output.duration_seconds = Some(started.elapsed().as_secs_f64());
    output.token_usage = Some(outcome.usage);
    output.tool_metrics = serde_json::to_value(services.metrics.snapshot()).ok();
    output.retrodict_date = request.retrodict_cutoff;
    if let Some(bounds) = &context.numeric_bounds {
        output.cdf_size = Some(bounds.effective_cdf_size());
    }

    let forecast = match &outcome.structured_output {
        Some(value) => match Forecast::parse(question_type, value) {
            Ok(forecast) => forecast,
            Err(e) => {
                log::warn!("Structured output failed validation, using default: {e}");
                output.defaulted = true;
                Forecast::neutral_default(question_type)
            }
        },
        None => {
            log::warn!("No structured output; using default forecast");
            output.defaulted = true;
            Forecast::neutral_default(question_type)
        }
    };
    output.apply_forecast(&forecast);

    // CDF synthesis for continuous questions. A validation failure here is
    // a hard error: no CDF is submitted with invalid structure.
    if let Forecast::Numeric(numeric_forecast) = &forecast {
        if !output.defaulted {
            match &context.numeric_bounds {
                Some(bounds) => {
                    let cdf = numeric::cdf_for_forecast(numeric_forecast, bounds)?;
                    log::info!("Generated {}-point CDF", cdf.len());
                    output.cdf = Some(cdf);
                }
                None => log::warn!(
                    "Numeric question without bounds; skipping CDF generation"
                ),
            }
        }
    }

    log::info!(
        "Session {} finished in {:.1}s over {} turns",
        session.session_id,
        started.elapsed().as_secs_f64(),
        outcome.turns
    );

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_schema_shapes() {
        let binary = output_schema(QuestionType::Binary);
        assert!(binary["properties"]["probability"].is_object());
        assert!(
            binary["required"]
                .as_array()
                .unwrap()
                .contains(&json!("probability"))
        );

        let numeric = output_schema(QuestionType::Numeric);
        assert!(numeric["properties"]["percentile_10"].is_object());
        assert!(numeric["properties"]["components"].is_object());

        let mc = output_schema(QuestionType::MultipleChoice);
        assert!(mc["properties"]["probabilities"].is_object());

        // Date questions fall back to the binary schema
        assert_eq!(output_schema(QuestionType::Date), binary);
    }

    #[test]
    fn test_extract_sources() {
        let calls = vec![
            ToolCall {
                tool_name: "forecasting__search_exa".into(),
                arguments: json!({"query": "tesla earnings"}),
            },
            ToolCall {
                tool_name: "forecasting__get_cp_history".into(),
                arguments: json!({"question_id": 42}),
            },
            ToolCall {
                tool_name: "search__web_search".into(),
                arguments: json!({"query": "fed rate decision"}),
            },
            ToolCall {
                tool_name: "forecasting__wikipedia".into(),
                arguments: json!({"query": "Federal Reserve"}),
            },
        ];
        let sources = extract_sources(&calls);
        assert_eq!(
            sources,
            vec!["tesla earnings", "fed rate decision", "Federal Reserve"]
        );
    }
}
