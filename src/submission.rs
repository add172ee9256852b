//! Forecast submission and reasoning comments.
//!
//! The wire payload is type-dispatched and exclusive: binary sets
//! `probability_yes` and nothing else, multiple choice sets
//! `probability_yes_per_category`, numeric/discrete set `continuous_cdf`
//! with exactly the expected length. The request envelope is an array of
//! one object keyed by `question` (the question_id), while comments attach
//! to the post (`on_post: post_id`) — mixing the two IDs up is the classic
//! mistake here.

use crate::metaculus::METACULUS_API_BASE;
use crate::numeric::DEFAULT_CDF_SIZE;
use crate::types::{ForecastOutput, QuestionType};
use crate::{Error, Result, Settings};
use serde_json::{Value, json};
use std::time::Duration;

/// The wire format requires `probability_yes` strictly inside (0, 1);
/// a schema-conforming forecast may still say exactly 0 or 1.
const PROBABILITY_EPSILON: f64 = 0.001;

/// Convert a forecast output to the platform payload.
///
/// Exactly one of the three fields is non-null, per question type. Date
/// questions have no wire representation and are refused.
pub fn create_forecast_payload(output: &ForecastOutput) -> Result<Value> {
    match output.question_type {
        QuestionType::Binary => {
            let probability = output
                .probability
                .ok_or_else(|| Error::validation("Binary forecast missing probability"))?;
            // Clamp to the open interval: parse accepts [0, 1] but the
            // platform rejects the endpoints.
            let clamped = probability.clamp(PROBABILITY_EPSILON, 1.0 - PROBABILITY_EPSILON);
            if clamped != probability {
                log::warn!(
                    "Clamped probability_yes from {probability} to {clamped} for \
                     question {}",
                    output.question_id
                );
            }
            Ok(json!({
                "probability_yes": clamped,
                "probability_yes_per_category": Value::Null,
                "continuous_cdf": Value::Null,
            }))
        }
        QuestionType::Date => Err(Error::validation("Unsupported question type: date")),
        QuestionType::MultipleChoice => {
            let probabilities = output
                .probabilities
                .as_ref()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| {
                    Error::validation("Multiple choice forecast missing probabilities")
                })?;
            Ok(json!({
                "probability_yes": Value::Null,
                "probability_yes_per_category": probabilities,
                "continuous_cdf": Value::Null,
            }))
        }
        QuestionType::Numeric | QuestionType::Discrete => {
            let cdf = output.cdf.as_ref().filter(|c| !c.is_empty()).ok_or_else(|| {
                Error::validation(format!(
                    "{} forecast missing CDF. Ensure numeric bounds are available and \
                     percentiles/components are valid.",
                    output.question_type
                ))
            })?;
            let expected = match output.question_type {
                QuestionType::Discrete => output.cdf_size.unwrap_or(DEFAULT_CDF_SIZE),
                _ => DEFAULT_CDF_SIZE,
            };
            if cdf.len() != expected {
                return Err(Error::validation(format!(
                    "CDF must have exactly {expected} points, got {}",
                    cdf.len()
                )));
            }
            Ok(json!({
                "probability_yes": Value::Null,
                "probability_yes_per_category": Value::Null,
                "continuous_cdf": cdf,
            }))
        }
    }
}

/// Submit a forecast to the platform.
///
/// The forecast record on disk is written by the caller before submission,
/// so a failed submission never loses the forecast.
pub async fn submit_forecast(settings: &Settings, output: &ForecastOutput) -> Result<()> {
    let token = settings.require_metaculus_token()?;
    let payload = create_forecast_payload(output)?;

    let mut envelope = json!({"question": output.question_id});
    if let (Some(envelope_obj), Some(payload_obj)) =
        (envelope.as_object_mut(), payload.as_object())
    {
        for (key, value) in payload_obj {
            envelope_obj.insert(key.clone(), value.clone());
        }
    }
    let request_body = json!([envelope]);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;
    let response = client
        .post(format!("{METACULUS_API_BASE}/questions/forecast/"))
        .header("Authorization", format!("Token {token}"))
        .json(&request_body)
        .send()
        .await?;

    match response.status().as_u16() {
        200..=299 => {
            log::info!("Submitted forecast for question {}", output.question_id);
            Ok(())
        }
        400 => {
            let detail = response.text().await.unwrap_or_default();
            if detail.to_lowercase().contains("already closed") {
                Err(Error::submission(
                    400,
                    format!("Question {} is already closed", output.question_id),
                ))
            } else {
                Err(Error::submission(400, format!("Bad request: {detail}")))
            }
        }
        401 => Err(Error::submission(401, "Invalid Metaculus token")),
        403 => Err(Error::submission(
            403,
            format!(
                "Not authorized to forecast on question {}",
                output.question_id
            ),
        )),
        status => {
            let detail = response.text().await.unwrap_or_default();
            Err(Error::submission(
                status,
                format!("Submission failed: {detail}"),
            ))
        }
    }
}

/// Post a comment on a post (not a question: comments hang off `post_id`).
pub async fn post_comment(
    settings: &Settings,
    post_id: u64,
    comment_text: &str,
    include_forecast: bool,
    is_private: bool,
) -> Result<()> {
    let token = settings.require_metaculus_token()?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;
    let response = client
        .post(format!("{METACULUS_API_BASE}/comments/create/"))
        .header("Authorization", format!("Token {token}"))
        .json(&json!({
            "text": comment_text,
            "parent": Value::Null,
            "included_forecast": include_forecast,
            "is_private": is_private,
            "on_post": post_id,
        }))
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let detail = response.text().await.unwrap_or_default();
        return Err(Error::submission(
            status,
            format!("Comment failed: {detail}"),
        ));
    }

    log::info!("Posted comment on post {post_id}");
    Ok(())
}

/// Render the reasoning comment: summary, point estimate, factors with
/// sign and magnitude, and a source count.
pub fn format_reasoning_comment(output: &ForecastOutput) -> String {
    let mut lines = vec![format!("## Forecast Summary\n\n{}", output.summary)];

    if let Some(probability) = output.probability {
        lines.push(format!("\n**Probability:** {:.1}%", probability * 100.0));
    }

    if let Some(probabilities) = &output.probabilities {
        lines.push("\n**Probabilities:**".to_string());
        for (option, probability) in probabilities {
            lines.push(format!("- {option}: {:.1}%", probability * 100.0));
        }
    }

    if let Some(median) = output.median {
        lines.push(format!("\n**Median estimate:** {median}"));
        if let Some((low, high)) = output.confidence_interval {
            lines.push(format!("**90% CI:** [{low}, {high}]"));
        }
    }

    if !output.factors.is_empty() {
        lines.push("\n## Key Factors\n".to_string());
        for factor in &output.factors {
            let sign = if factor.logit >= 0.0 { "+" } else { "" };
            lines.push(format!(
                "- [{sign}{:.1}] {}",
                factor.logit, factor.description
            ));
        }
    }

    if !output.sources_consulted.is_empty() {
        lines.push(format!(
            "\n---\n*Sources consulted: {}*",
            output.sources_consulted.len()
        ));
    }

    lines.join("\n")
}
