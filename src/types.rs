//! Core type definitions for the forecasting agent.
//!
//! Three groups live here:
//!
//! - **Question context**: [`QuestionType`], [`NumericBounds`], and the
//!   [`QuestionContext`] handed to the model (either built from a platform
//!   post or synthesized for a sub-question).
//! - **Forecasts**: the [`Forecast`] tagged union the model emits as
//!   structured output, with per-type payloads and validation, and the
//!   packaged [`ForecastOutput`] a run returns.
//! - **Model wire format**: the OpenAI-compatible request/streaming-chunk
//!   types used by the model session ([`crate::client`]).
//!
//! The forecast union is tagged by question type; the submission formatter
//! and the CDF builder dispatch on the tag. A numeric forecast carries
//! either six sparse percentiles or a scenario mixture, never both.

use crate::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// ============================================================================
// QUESTION CONTEXT
// ============================================================================

/// The kind of question being forecast. Drives the output schema, the CDF
/// builder, and the submission payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Binary,
    Numeric,
    Discrete,
    MultipleChoice,
    Date,
}

impl QuestionType {
    /// Parse from the platform's string form, defaulting to binary for
    /// anything unrecognized (matching the platform's own fallback).
    pub fn parse(s: &str) -> Self {
        match s {
            "numeric" => QuestionType::Numeric,
            "discrete" => QuestionType::Discrete,
            "multiple_choice" => QuestionType::MultipleChoice,
            "date" => QuestionType::Date,
            _ => QuestionType::Binary,
        }
    }

    /// String form as used by the platform.
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::Binary => "binary",
            QuestionType::Numeric => "numeric",
            QuestionType::Discrete => "discrete",
            QuestionType::MultipleChoice => "multiple_choice",
            QuestionType::Date => "date",
        }
    }

    /// Whether this type submits a continuous CDF.
    pub fn is_continuous(&self) -> bool {
        matches!(self, QuestionType::Numeric | QuestionType::Discrete)
    }
}

impl std::fmt::Display for QuestionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Range metadata for numeric and discrete questions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericBounds {
    pub range_min: f64,
    pub range_max: f64,
    #[serde(default)]
    pub open_lower_bound: bool,
    #[serde(default)]
    pub open_upper_bound: bool,
    /// Present on log-scaled questions; the point the log scale anchors at.
    #[serde(default)]
    pub zero_point: Option<f64>,
    /// CDF length: 201 for numeric, `inbound_outcome_count + 1` for discrete.
    #[serde(default)]
    pub cdf_size: Option<usize>,
}

impl NumericBounds {
    /// Effective CDF size (201 unless the question declares otherwise).
    pub fn effective_cdf_size(&self) -> usize {
        self.cdf_size.unwrap_or(crate::numeric::DEFAULT_CDF_SIZE)
    }
}

/// The question material the model sees. Built from a platform post for
/// top-level forecasts, or synthesized from a sub-question spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionContext {
    pub title: String,
    pub question_type: QuestionType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub resolution_criteria: String,
    #[serde(default)]
    pub fine_print: String,
    #[serde(default)]
    pub scheduled_close_time: Option<String>,
    /// Ordered option labels for multiple-choice questions.
    #[serde(default)]
    pub options: Vec<String>,
    /// Range metadata for numeric/discrete questions.
    #[serde(default)]
    pub numeric_bounds: Option<NumericBounds>,
}

impl QuestionContext {
    /// Minimal context for a sub-question.
    pub fn for_subquestion(title: impl Into<String>, question_type: QuestionType) -> Self {
        Self {
            title: title.into(),
            question_type,
            description: String::new(),
            resolution_criteria: String::new(),
            fine_print: String::new(),
            scheduled_close_time: None,
            options: Vec::new(),
            numeric_bounds: None,
        }
    }
}

// ============================================================================
// FORECASTS
// ============================================================================

/// A piece of evidence that influences the forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Factor {
    /// What this evidence is and why it matters.
    pub description: String,
    /// Strength and direction. Positive = toward Yes, negative = toward No.
    pub logit: f64,
    /// Confidence in this evidence, 0 to 1.
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

impl Factor {
    /// The logit value adjusted for confidence.
    pub fn effective_logit(&self) -> f64 {
        self.logit * self.confidence
    }
}

/// The six sparse percentile values of a numeric forecast, at the
/// 10/20/40/60/80/90 marks. Values must be strictly increasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    pub percentile_10: f64,
    pub percentile_20: f64,
    pub percentile_40: f64,
    pub percentile_60: f64,
    pub percentile_80: f64,
    pub percentile_90: f64,
}

impl Percentiles {
    /// The (mark, value) pairs in ascending mark order.
    pub fn as_pairs(&self) -> [(u32, f64); 6] {
        [
            (10, self.percentile_10),
            (20, self.percentile_20),
            (40, self.percentile_40),
            (60, self.percentile_60),
            (80, self.percentile_80),
            (90, self.percentile_90),
        ]
    }

    /// Validate that values are strictly increasing.
    pub fn validate(&self) -> Result<()> {
        let pairs = self.as_pairs();
        for window in pairs.windows(2) {
            if window[0].1 >= window[1].1 {
                return Err(Error::validation(format!(
                    "Percentile values must be strictly increasing: p{} = {} >= p{} = {}",
                    window[0].0, window[0].1, window[1].0, window[1].1
                )));
            }
        }
        Ok(())
    }
}

/// One scenario in a mixture-mode numeric forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioComponent {
    /// Scenario name: "Base case", "Upside", "Downside", etc.
    #[serde(default)]
    pub scenario: String,
    /// Most likely value if this scenario occurs.
    pub mode: f64,
    /// 10th percentile: 90% chance the outcome is above this.
    pub lower_bound: f64,
    /// 90th percentile: 10% chance the outcome is above this.
    pub upper_bound: f64,
    /// Probability this scenario occurs; weights sum to 1.
    pub weight: f64,
}

/// Binary forecast payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryForecast {
    pub summary: String,
    #[serde(default)]
    pub factors: Vec<Factor>,
    /// Synthesized log-odds estimate.
    pub logit: f64,
    /// Final probability, 0 to 1. Does not need to equal sigmoid(logit).
    pub probability: f64,
}

impl BinaryForecast {
    /// Probability implied by the logit via sigmoid, for auditing.
    pub fn probability_from_logit(&self) -> f64 {
        1.0 / (1.0 + (-self.logit).exp())
    }
}

/// Numeric/discrete forecast payload. Exactly one representation is present:
/// the six sparse percentiles or a non-empty scenario mixture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumericForecast {
    pub summary: String,
    #[serde(default)]
    pub factors: Vec<Factor>,
    // Percentile mode (all six or none)
    #[serde(default)]
    pub percentile_10: Option<f64>,
    #[serde(default)]
    pub percentile_20: Option<f64>,
    #[serde(default)]
    pub percentile_40: Option<f64>,
    #[serde(default)]
    pub percentile_60: Option<f64>,
    #[serde(default)]
    pub percentile_80: Option<f64>,
    #[serde(default)]
    pub percentile_90: Option<f64>,
    // Mixture mode
    #[serde(default)]
    pub components: Option<Vec<ScenarioComponent>>,
}

impl NumericForecast {
    /// Whether this forecast uses the scenario-mixture representation.
    pub fn uses_mixture(&self) -> bool {
        self.components.as_ref().is_some_and(|c| !c.is_empty())
    }

    fn percentile_fields(&self) -> [Option<f64>; 6] {
        [
            self.percentile_10,
            self.percentile_20,
            self.percentile_40,
            self.percentile_60,
            self.percentile_80,
            self.percentile_90,
        ]
    }

    /// The percentile spec, when all six marks are declared.
    pub fn percentiles(&self) -> Option<Percentiles> {
        match self.percentile_fields() {
            [Some(p10), Some(p20), Some(p40), Some(p60), Some(p80), Some(p90)] => {
                Some(Percentiles {
                    percentile_10: p10,
                    percentile_20: p20,
                    percentile_40: p40,
                    percentile_60: p60,
                    percentile_80: p80,
                    percentile_90: p90,
                })
            }
            _ => None,
        }
    }

    /// Validate the exactly-one-representation invariant and the payload.
    pub fn validate(&self) -> Result<()> {
        let has_components = self.uses_mixture();
        let has_any_percentile = self.percentile_fields().iter().any(Option::is_some);
        let percentiles = self.percentiles();

        if !has_components && percentiles.is_none() {
            return Err(Error::validation(
                "Numeric forecast requires either all 6 percentiles (10/20/40/60/80/90) \
                 or a non-empty scenario mixture",
            ));
        }
        if has_components && has_any_percentile {
            return Err(Error::validation(
                "Numeric forecast must use percentiles or components, not both",
            ));
        }

        if let Some(p) = &percentiles {
            p.validate()?;
        }
        if let Some(components) = &self.components {
            let total: f64 = components.iter().map(|c| c.weight).sum();
            if (total - 1.0).abs() > 1e-6 {
                return Err(Error::validation(format!(
                    "Scenario weights must sum to 1.0, got {total}"
                )));
            }
            for c in components {
                if !(c.lower_bound < c.mode && c.mode < c.upper_bound) {
                    return Err(Error::validation(format!(
                        "Scenario '{}' must satisfy lower_bound < mode < upper_bound",
                        c.scenario
                    )));
                }
            }
        }
        Ok(())
    }

    /// Estimated median: midpoint of p40/p60, or the weighted average of
    /// component modes in mixture mode.
    pub fn median(&self) -> Option<f64> {
        if self.uses_mixture() {
            let components = self.components.as_ref()?;
            return Some(components.iter().map(|c| c.mode * c.weight).sum());
        }
        match (self.percentile_40, self.percentile_60) {
            (Some(p40), Some(p60)) => Some((p40 + p60) / 2.0),
            _ => None,
        }
    }

    /// 90% confidence interval (p10..p90), or the envelope of the mixture.
    pub fn confidence_interval(&self) -> Option<(f64, f64)> {
        if self.uses_mixture() {
            let components = self.components.as_ref()?;
            let lo = components
                .iter()
                .map(|c| c.lower_bound)
                .fold(f64::INFINITY, f64::min);
            let hi = components
                .iter()
                .map(|c| c.upper_bound)
                .fold(f64::NEG_INFINITY, f64::max);
            return Some((lo, hi));
        }
        match (self.percentile_10, self.percentile_90) {
            (Some(p10), Some(p90)) => Some((p10, p90)),
            _ => None,
        }
    }
}

/// Multiple-choice forecast payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultipleChoiceForecast {
    pub summary: String,
    #[serde(default)]
    pub factors: Vec<Factor>,
    /// Option label → probability. Values sum to 1.
    pub probabilities: BTreeMap<String, f64>,
}

impl MultipleChoiceForecast {
    /// Validate probabilities are in [0,1] and sum to 1.
    pub fn validate(&self) -> Result<()> {
        if self.probabilities.is_empty() {
            return Err(Error::validation(
                "Multiple choice forecast has no probabilities",
            ));
        }
        for (option, p) in &self.probabilities {
            if !(0.0..=1.0).contains(p) {
                return Err(Error::validation(format!(
                    "Probability for '{option}' out of range: {p}"
                )));
            }
        }
        let total: f64 = self.probabilities.values().sum();
        if (total - 1.0).abs() > 1e-4 {
            return Err(Error::validation(format!(
                "Option probabilities must sum to 1.0, got {total}"
            )));
        }
        Ok(())
    }
}

/// The structured forecast the model emits, tagged by question type.
#[derive(Debug, Clone)]
pub enum Forecast {
    Binary(BinaryForecast),
    Numeric(NumericForecast),
    MultipleChoice(MultipleChoiceForecast),
}

impl Forecast {
    /// Parse a structured-output value against the schema for the given
    /// question type, then run semantic validation.
    pub fn parse(question_type: QuestionType, value: &Value) -> Result<Self> {
        match question_type {
            QuestionType::MultipleChoice => {
                let forecast: MultipleChoiceForecast = serde_json::from_value(value.clone())?;
                forecast.validate()?;
                Ok(Forecast::MultipleChoice(forecast))
            }
            QuestionType::Numeric | QuestionType::Discrete => {
                let forecast: NumericForecast = serde_json::from_value(value.clone())?;
                forecast.validate()?;
                Ok(Forecast::Numeric(forecast))
            }
            // Binary is the default schema; date questions fall back to it.
            QuestionType::Binary | QuestionType::Date => {
                let forecast: BinaryForecast = serde_json::from_value(value.clone())?;
                if !(0.0..=1.0).contains(&forecast.probability) {
                    return Err(Error::validation(format!(
                        "Probability out of range: {}",
                        forecast.probability
                    )));
                }
                Ok(Forecast::Binary(forecast))
            }
        }
    }

    /// Neutral default used when the model produced no valid structured
    /// output: 0.5 for binary, all-zero numeric, empty multiple choice.
    pub fn neutral_default(question_type: QuestionType) -> Self {
        match question_type {
            QuestionType::MultipleChoice => Forecast::MultipleChoice(MultipleChoiceForecast {
                summary: "No forecast produced".to_string(),
                factors: Vec::new(),
                probabilities: BTreeMap::new(),
            }),
            QuestionType::Numeric | QuestionType::Discrete => Forecast::Numeric(NumericForecast {
                summary: "No forecast produced".to_string(),
                factors: Vec::new(),
                percentile_10: None,
                percentile_20: None,
                percentile_40: None,
                percentile_60: None,
                percentile_80: None,
                percentile_90: None,
                components: None,
            }),
            QuestionType::Binary | QuestionType::Date => Forecast::Binary(BinaryForecast {
                summary: "No forecast produced".to_string(),
                factors: Vec::new(),
                logit: 0.0,
                probability: 0.5,
            }),
        }
    }

    pub fn summary(&self) -> &str {
        match self {
            Forecast::Binary(f) => &f.summary,
            Forecast::Numeric(f) => &f.summary,
            Forecast::MultipleChoice(f) => &f.summary,
        }
    }

    pub fn factors(&self) -> &[Factor] {
        match self {
            Forecast::Binary(f) => &f.factors,
            Forecast::Numeric(f) => &f.factors,
            Forecast::MultipleChoice(f) => &f.factors,
        }
    }
}

// ============================================================================
// FORECAST OUTPUT
// ============================================================================

/// Token usage reported by the model API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
}

/// Full output from a forecasting run, including metadata.
///
/// The type-specific forecast fields are flattened so the record serializes
/// the way the on-disk history expects: binary fills `probability`/`logit`,
/// numeric fills `median`/`confidence_interval`/`percentiles`/`cdf`,
/// multiple choice fills `probabilities`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastOutput {
    /// Question ID (used by the submission API).
    pub question_id: u64,
    /// Post ID (used for URLs and comments).
    pub post_id: u64,
    pub question_title: String,
    pub question_type: QuestionType,

    pub summary: String,
    #[serde(default)]
    pub factors: Vec<Factor>,

    // Binary
    #[serde(default)]
    pub logit: Option<f64>,
    #[serde(default)]
    pub probability: Option<f64>,
    #[serde(default)]
    pub probability_from_logit: Option<f64>,

    // Multiple choice
    #[serde(default)]
    pub probabilities: Option<BTreeMap<String, f64>>,

    // Numeric / discrete
    #[serde(default)]
    pub median: Option<f64>,
    #[serde(default)]
    pub confidence_interval: Option<(f64, f64)>,
    #[serde(default)]
    pub percentiles: Option<Percentiles>,
    #[serde(default)]
    pub cdf: Option<Vec<f64>>,
    #[serde(default)]
    pub cdf_size: Option<usize>,

    // Metadata
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub sources_consulted: Vec<String>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub cost_usd: Option<f64>,
    #[serde(default)]
    pub token_usage: Option<TokenUsage>,
    /// Per-tool call counts, durations and error rates.
    #[serde(default)]
    pub tool_metrics: Option<Value>,
    /// Set when the structured output was substituted with a neutral default.
    #[serde(default)]
    pub defaulted: bool,
    /// Cutoff date when produced in retrodict mode.
    #[serde(default)]
    pub retrodict_date: Option<NaiveDate>,
}

impl ForecastOutput {
    /// Skeleton output before the forecast fields are filled in.
    pub fn new(
        question_id: u64,
        post_id: u64,
        question_title: impl Into<String>,
        question_type: QuestionType,
    ) -> Self {
        Self {
            question_id,
            post_id,
            question_title: question_title.into(),
            question_type,
            summary: String::new(),
            factors: Vec::new(),
            logit: None,
            probability: None,
            probability_from_logit: None,
            probabilities: None,
            median: None,
            confidence_interval: None,
            percentiles: None,
            cdf: None,
            cdf_size: None,
            reasoning: String::new(),
            sources_consulted: Vec::new(),
            duration_seconds: None,
            cost_usd: None,
            token_usage: None,
            tool_metrics: None,
            defaulted: false,
            retrodict_date: None,
        }
    }

    /// Copy the type-specific fields out of a forecast.
    pub fn apply_forecast(&mut self, forecast: &Forecast) {
        self.summary = forecast.summary().to_string();
        self.factors = forecast.factors().to_vec();
        match forecast {
            Forecast::Binary(f) => {
                self.logit = Some(f.logit);
                self.probability = Some(f.probability);
                self.probability_from_logit = Some(f.probability_from_logit());
            }
            Forecast::Numeric(f) => {
                self.median = f.median();
                self.confidence_interval = f.confidence_interval();
                self.percentiles = f.percentiles();
            }
            Forecast::MultipleChoice(f) => {
                self.probabilities = Some(f.probabilities.clone());
            }
        }
    }
}

// ============================================================================
// FORECAST REQUEST
// ============================================================================

/// Request driving one orchestrator run.
#[derive(Debug, Clone, Default)]
pub struct ForecastRequest {
    /// Post ID to fetch from the platform (top-level forecasts).
    pub post_id: Option<u64>,
    /// Pre-built context (sub-forecasts). Takes precedence over `post_id`.
    pub question_context: Option<QuestionContext>,
    /// Whether sub-question decomposition is permitted. False for
    /// recursive calls.
    pub allow_spawn: bool,
    /// Time-travel cutoff: restrict every information source to data as of
    /// this date.
    pub retrodict_cutoff: Option<NaiveDate>,
    /// Print thinking/tool activity as it arrives (diagnostic).
    pub stream_thinking: bool,
    /// Turn cap override for this run.
    pub max_turns: Option<u32>,
    /// Budget cap override for this run, USD.
    pub max_budget_usd: Option<f64>,
}

impl ForecastRequest {
    /// Top-level request for a platform post.
    pub fn for_post(post_id: u64) -> Self {
        Self {
            post_id: Some(post_id),
            allow_spawn: true,
            ..Default::default()
        }
    }

    /// Recursive request for a sub-question. Spawning is disabled.
    pub fn for_subquestion(context: QuestionContext) -> Self {
        Self {
            question_context: Some(context),
            allow_spawn: false,
            ..Default::default()
        }
    }

    pub fn with_retrodict(mut self, cutoff: NaiveDate) -> Self {
        self.retrodict_cutoff = Some(cutoff);
        self
    }
}

// ============================================================================
// MODEL WIRE FORMAT (OpenAI-compatible)
// ============================================================================

/// A chat message in the model API request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_with_tool_calls(content: String, tool_calls: Vec<ChatToolCall>) -> Self {
        Self {
            role: "assistant".into(),
            content,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }

    /// A tool-result message tied back to its call id.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".into(),
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// A completed tool call echoed back in conversation history.
#[derive(Debug, Clone, Serialize)]
pub struct ChatToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: ChatFunctionCall,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatFunctionCall {
    pub name: String,
    /// JSON-encoded argument object.
    pub arguments: String,
}

/// Structured-output constraint for the final answer.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub format_type: String,
    pub json_schema: Value,
}

impl ResponseFormat {
    pub fn json_schema(name: &str, schema: Value) -> Self {
        Self {
            format_type: "json_schema".to_string(),
            json_schema: serde_json::json!({ "name": name, "schema": schema }),
        }
    }
}

/// Chat-completions request payload.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

/// One streaming chunk of a chat completion.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    #[serde(default)]
    pub delta: ChatDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Incremental delta within a streaming chunk.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// Incremental fragment of a tool call. Tool calls arrive interleaved
/// across chunks, identified by `index`.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallDelta {
    pub index: u32,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionDelta>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// Token usage attached to the final chunk.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_question_type_parse_roundtrip() {
        for s in ["binary", "numeric", "discrete", "multiple_choice", "date"] {
            assert_eq!(QuestionType::parse(s).as_str(), s);
        }
        // Unknown types default to binary
        assert_eq!(QuestionType::parse("conditional"), QuestionType::Binary);
    }

    #[test]
    fn test_factor_effective_logit() {
        let factor = Factor {
            description: "base rate".into(),
            logit: 2.0,
            confidence: 0.5,
        };
        assert_eq!(factor.effective_logit(), 1.0);
    }

    #[test]
    fn test_binary_forecast_parse() {
        let value = json!({
            "summary": "Likely yes",
            "factors": [{"description": "trend", "logit": 1.0}],
            "logit": 1.0,
            "probability": 0.73
        });
        let forecast = Forecast::parse(QuestionType::Binary, &value).unwrap();
        match forecast {
            Forecast::Binary(f) => {
                assert_eq!(f.probability, 0.73);
                assert_eq!(f.factors[0].confidence, 1.0); // default
                assert!((f.probability_from_logit() - 0.7310585786).abs() < 1e-6);
            }
            _ => panic!("expected binary"),
        }
    }

    #[test]
    fn test_binary_forecast_rejects_out_of_range() {
        let value = json!({"summary": "", "logit": 0.0, "probability": 1.5});
        assert!(Forecast::parse(QuestionType::Binary, &value).is_err());
    }

    #[test]
    fn test_numeric_forecast_percentile_mode() {
        let value = json!({
            "summary": "s",
            "percentile_10": 100.0,
            "percentile_20": 120.0,
            "percentile_40": 150.0,
            "percentile_60": 180.0,
            "percentile_80": 220.0,
            "percentile_90": 280.0
        });
        let forecast = Forecast::parse(QuestionType::Numeric, &value).unwrap();
        match forecast {
            Forecast::Numeric(f) => {
                assert!(!f.uses_mixture());
                assert_eq!(f.median(), Some(165.0));
                assert_eq!(f.confidence_interval(), Some((100.0, 280.0)));
            }
            _ => panic!("expected numeric"),
        }
    }

    #[test]
    fn test_numeric_forecast_requires_exactly_one_representation() {
        // Neither representation
        let value = json!({"summary": "s"});
        assert!(Forecast::parse(QuestionType::Numeric, &value).is_err());

        // Non-increasing percentiles
        let value = json!({
            "summary": "s",
            "percentile_10": 100.0,
            "percentile_20": 90.0,
            "percentile_40": 150.0,
            "percentile_60": 180.0,
            "percentile_80": 220.0,
            "percentile_90": 280.0
        });
        assert!(Forecast::parse(QuestionType::Numeric, &value).is_err());
    }

    #[test]
    fn test_numeric_forecast_mixture_mode() {
        let value = json!({
            "summary": "s",
            "components": [
                {"scenario": "Base", "mode": 150.0, "lower_bound": 100.0,
                 "upper_bound": 200.0, "weight": 0.7},
                {"scenario": "Upside", "mode": 300.0, "lower_bound": 250.0,
                 "upper_bound": 400.0, "weight": 0.3}
            ]
        });
        let forecast = Forecast::parse(QuestionType::Numeric, &value).unwrap();
        match forecast {
            Forecast::Numeric(f) => {
                assert!(f.uses_mixture());
                assert_eq!(f.median(), Some(150.0 * 0.7 + 300.0 * 0.3));
                assert_eq!(f.confidence_interval(), Some((100.0, 400.0)));
            }
            _ => panic!("expected numeric"),
        }
    }

    #[test]
    fn test_numeric_mixture_weights_must_sum_to_one() {
        let value = json!({
            "summary": "s",
            "components": [
                {"scenario": "Base", "mode": 150.0, "lower_bound": 100.0,
                 "upper_bound": 200.0, "weight": 0.5}
            ]
        });
        assert!(Forecast::parse(QuestionType::Numeric, &value).is_err());
    }

    #[test]
    fn test_multiple_choice_parse_and_validate() {
        let value = json!({
            "summary": "s",
            "probabilities": {"A": 0.5, "B": 0.3, "C": 0.2}
        });
        let forecast = Forecast::parse(QuestionType::MultipleChoice, &value).unwrap();
        match forecast {
            Forecast::MultipleChoice(f) => {
                assert_eq!(f.probabilities.len(), 3);
            }
            _ => panic!("expected multiple choice"),
        }

        let bad = json!({
            "summary": "s",
            "probabilities": {"A": 0.5, "B": 0.3}
        });
        assert!(Forecast::parse(QuestionType::MultipleChoice, &bad).is_err());
    }

    #[test]
    fn test_neutral_defaults() {
        match Forecast::neutral_default(QuestionType::Binary) {
            Forecast::Binary(f) => {
                assert_eq!(f.probability, 0.5);
                assert_eq!(f.logit, 0.0);
            }
            _ => panic!(),
        }
        match Forecast::neutral_default(QuestionType::MultipleChoice) {
            Forecast::MultipleChoice(f) => assert!(f.probabilities.is_empty()),
            _ => panic!(),
        }
    }

    #[test]
    fn test_forecast_output_apply_binary() {
        let mut output = ForecastOutput::new(1, 1, "t", QuestionType::Binary);
        let forecast = Forecast::Binary(BinaryForecast {
            summary: "sum".into(),
            factors: vec![],
            logit: 1.0,
            probability: 0.73,
        });
        output.apply_forecast(&forecast);
        assert_eq!(output.probability, Some(0.73));
        assert_eq!(output.summary, "sum");
        assert!(output.probabilities.is_none());
    }

    #[test]
    fn test_forecast_output_serde_roundtrip() {
        let mut output = ForecastOutput::new(42, 43, "title", QuestionType::Numeric);
        output.percentiles = Some(Percentiles {
            percentile_10: 1.0,
            percentile_20: 2.0,
            percentile_40: 3.0,
            percentile_60: 4.0,
            percentile_80: 5.0,
            percentile_90: 6.0,
        });
        output.cdf = Some(vec![0.0, 0.5, 1.0]);

        let text = serde_json::to_string(&output).unwrap();
        let back: ForecastOutput = serde_json::from_str(&text).unwrap();
        assert_eq!(back.question_id, 42);
        assert_eq!(back.post_id, 43);
        assert_eq!(back.percentiles, output.percentiles);
        assert_eq!(back.cdf, output.cdf);
    }

    #[test]
    fn test_chat_message_serialization_skips_none() {
        let msg = ChatMessage::user("hello");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "user");
        assert!(value.get("tool_calls").is_none());
        assert!(value.get("tool_call_id").is_none());
    }

    #[test]
    fn test_chat_chunk_deserializes_minimal() {
        let chunk: ChatChunk = serde_json::from_str(
            r#"{"choices":[{"delta":{"content":"hi"},"finish_reason":null}]}"#,
        )
        .unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("hi"));
        assert!(chunk.choices[0].finish_reason.is_none());
    }
}
