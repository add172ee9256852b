//! System prompt assembly.
//!
//! The system prompt carries today's date (or the retrodict cutoff
//! presented as today), the forecasting instructions, and the
//! auto-generated documentation for the tools this session can actually
//! call. Type-specific guidance is appended to the user prompt along with
//! the question context.

use crate::types::{NumericBounds, QuestionContext, QuestionType};
use chrono::NaiveDate;

const FORECASTING_INSTRUCTIONS: &str = "\
## Approach

1. Parse the resolution criteria carefully: what exactly must happen, what
   is the resolution source, what is the deadline? Watch for definitional
   ambiguity and timing edge cases; resolution happens in the question
   author's mind, not yours.
2. Classify the question: predictive (base rate plus updates), definitional
   (criteria parsing, not prediction), meta-prediction (model the
   forecasters), or measurement (current value plus drift).
3. Research before reasoning. Prefer programmatic data sources over page
   parsing; start with the most specific tool and broaden if needed.
4. Calibrate: status quo is sticky, deadlines slip, announced plans fail.
   Most dramatic events do not happen. Extraordinary claims need
   extraordinary evidence.
5. Check coherence with related questions where links exist.

## Output Format

Provide your forecast as structured output with:
- **factors**: key evidence with logit values and confidence (0-1)
- your synthesized estimate in the type-specific fields

### Logit Scale
0 = 50%, +-1 = 73%/27%, +-2 = 88%/12%, +-3 = 95%/5%, +-4 = 98%/2%.

### Factor Strength
+-0.5 mild (one expert opinion), +-1.0 moderate (multiple credible sources),
+-2.0 strong (official announcement), +-3.0 very strong (overwhelming
consensus). Factors are scaffolding; your final estimate is your own
decision and does not need to equal the factor sum.

## Decomposition

When a question decomposes naturally, use spawn_subquestions to forecast
the parts in parallel. You receive every sub-forecast back; synthesize them
yourself, there is no automatic aggregation.";

/// Binary question guidance (appended to the user prompt).
const BINARY_GUIDANCE: &str = "\
## Binary Question Guidance

Before forecasting, consider:
(a) Time left until resolution
(b) Status quo outcome if nothing changes
(c) A scenario that results in NO
(d) A scenario that results in YES

Output your probability as a decimal between 0.01 and 0.99.";

const MULTIPLE_CHOICE_GUIDANCE: &str = "\
## Multiple Choice Question Guidance

Before forecasting, consider:
(a) Time left until resolution
(b) Status quo outcome
(c) An unexpected scenario

Leave moderate probability on most options for unexpected outcomes.
Probabilities must sum to 1.0.";

const NUMERIC_GUIDANCE: &str = "\
## Numeric Question Guidance

Before forecasting, consider:
(a) Time left until resolution
(b) Outcome if nothing changes
(c) Outcome if current trend continues
(d) Expert/market expectations
(e) A scenario resulting in a LOW outcome
(f) A scenario resulting in a HIGH outcome

Many real-world quantities have fat tails; when extreme values are
possible, make the distribution asymmetric on the tail side.

### Output

Either provide estimates at 6 percentile levels (10th, 20th, 40th, 60th,
80th, 90th) with strictly increasing values, or a set of weighted scenario
components (mode, 10th and 90th percentile bounds, weights summing to 1).
Set WIDE intervals - forecasters systematically underestimate uncertainty.";

/// Render the bounds clause of the numeric guidance. Open bounds read as
/// the question creator's expectation; closed bounds are hard caps.
fn format_bounds_info(bounds: &NumericBounds) -> String {
    let mut lines = Vec::new();

    if bounds.open_lower_bound {
        lines.push(format!(
            "The question creator thinks the outcome is likely not lower than {}.",
            bounds.range_min
        ));
    } else {
        lines.push(format!(
            "The outcome cannot be lower than {}.",
            bounds.range_min
        ));
    }

    if bounds.open_upper_bound {
        lines.push(format!(
            "The question creator thinks the outcome is likely not higher than {}.",
            bounds.range_max
        ));
    } else {
        lines.push(format!(
            "The outcome cannot be higher than {}.",
            bounds.range_max
        ));
    }

    if let Some(zero_point) = bounds.zero_point {
        lines.push(format!(
            "Note: This question uses a logarithmic scale (zero point: {zero_point})."
        ));
    }

    lines.join("\n")
}

/// Type-specific guidance appended to the user prompt.
pub fn type_specific_guidance(context: &QuestionContext) -> String {
    match context.question_type {
        QuestionType::Numeric | QuestionType::Discrete => {
            let bounds_info = context
                .numeric_bounds
                .as_ref()
                .map(format_bounds_info)
                .unwrap_or_else(|| "No bounds specified".to_string());
            format!("{NUMERIC_GUIDANCE}\n\n{bounds_info}")
        }
        QuestionType::MultipleChoice => {
            format!(
                "{MULTIPLE_CHOICE_GUIDANCE}\n\nOptions: {:?}",
                context.options
            )
        }
        QuestionType::Binary | QuestionType::Date => BINARY_GUIDANCE.to_string(),
    }
}

/// Build the system prompt for a session.
///
/// `today` is the real date, or the retrodict cutoff presented as today —
/// the restriction itself is never mentioned to the model. `tool_docs` is
/// the registry's markdown for the allowed tool set.
pub fn build_system_prompt(today: NaiveDate, tool_docs: &str) -> String {
    format!(
        "You are an expert forecaster participating in a forecasting tournament.\n\n\
         Today's date is {date}.\n\n{FORECASTING_INSTRUCTIONS}\n\n{tool_docs}",
        date = today.format("%Y-%m-%d"),
    )
}

/// Build the user prompt: the question context plus type guidance.
pub fn build_user_prompt(context: &QuestionContext) -> String {
    let context_json =
        serde_json::to_string_pretty(context).unwrap_or_else(|_| "{}".to_string());
    format!(
        "Analyze this forecasting question and provide your forecast:\n\n\
         {context_json}\n\n{guidance}",
        guidance = type_specific_guidance(context)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric_context(open_upper: bool, zero_point: Option<f64>) -> QuestionContext {
        QuestionContext {
            title: "How many?".into(),
            question_type: QuestionType::Numeric,
            description: String::new(),
            resolution_criteria: String::new(),
            fine_print: String::new(),
            scheduled_close_time: None,
            options: vec![],
            numeric_bounds: Some(NumericBounds {
                range_min: 0.0,
                range_max: 500.0,
                open_lower_bound: false,
                open_upper_bound: open_upper,
                zero_point,
                cdf_size: None,
            }),
        }
    }

    #[test]
    fn test_system_prompt_carries_date_and_docs() {
        let today = NaiveDate::from_ymd_opt(2026, 1, 15).unwrap();
        let prompt = build_system_prompt(today, "## Available Tools\n- **x**: y");
        assert!(prompt.contains("Today's date is 2026-01-15."));
        assert!(prompt.contains("## Available Tools"));
        assert!(prompt.contains("expert forecaster"));
    }

    #[test]
    fn test_bounds_info_open_vs_closed() {
        let open = numeric_context(true, None);
        let guidance = type_specific_guidance(&open);
        assert!(guidance.contains("likely not higher than 500"));
        assert!(guidance.contains("cannot be lower than 0"));

        let log_scaled = numeric_context(false, Some(-1.0));
        let guidance = type_specific_guidance(&log_scaled);
        assert!(guidance.contains("logarithmic scale"));
        assert!(guidance.contains("cannot be higher than 500"));
    }

    #[test]
    fn test_multiple_choice_guidance_lists_options() {
        let context = QuestionContext {
            title: "Which?".into(),
            question_type: QuestionType::MultipleChoice,
            description: String::new(),
            resolution_criteria: String::new(),
            fine_print: String::new(),
            scheduled_close_time: None,
            options: vec!["A".into(), "B".into()],
            numeric_bounds: None,
        };
        let guidance = type_specific_guidance(&context);
        assert!(guidance.contains("sum to 1.0"));
        assert!(guidance.contains("\"A\""));
    }

    #[test]
    fn test_user_prompt_embeds_context() {
        let context = numeric_context(true, None);
        let prompt = build_user_prompt(&context);
        assert!(prompt.contains("How many?"));
        assert!(prompt.contains("Numeric Question Guidance"));
    }
}
