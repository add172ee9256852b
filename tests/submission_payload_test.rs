//! Wire-payload invariants: exactly one field set per question type, exact
//! CDF lengths, and the forecast-to-payload round trip.

use forecast_agent::{
    Factor, Forecast, ForecastOutput, QuestionType, create_forecast_payload,
    format_reasoning_comment,
};
use serde_json::json;
use std::collections::BTreeMap;

fn count_set_fields(payload: &serde_json::Value) -> usize {
    ["probability_yes", "probability_yes_per_category", "continuous_cdf"]
        .iter()
        .filter(|key| !payload[**key].is_null())
        .count()
}

#[test]
fn binary_forecast_wire_payload() {
    // Binary question, agent emits {logit: 1.0, probability: 0.73}.
    let forecast = Forecast::parse(
        QuestionType::Binary,
        &json!({"summary": "s", "logit": 1.0, "probability": 0.73}),
    )
    .unwrap();

    let mut output = ForecastOutput::new(41906, 41906, "Will it?", QuestionType::Binary);
    output.apply_forecast(&forecast);

    let payload = create_forecast_payload(&output).unwrap();
    assert_eq!(
        payload,
        json!({
            "probability_yes": 0.73,
            "probability_yes_per_category": null,
            "continuous_cdf": null,
        })
    );
    assert_eq!(count_set_fields(&payload), 1);
}

#[test]
fn multiple_choice_wire_payload() {
    // Options ["A","B","C"], forecast {A: 0.5, B: 0.3, C: 0.2}.
    let forecast = Forecast::parse(
        QuestionType::MultipleChoice,
        &json!({"summary": "s", "probabilities": {"A": 0.5, "B": 0.3, "C": 0.2}}),
    )
    .unwrap();

    let mut output = ForecastOutput::new(1, 1, "Which?", QuestionType::MultipleChoice);
    output.apply_forecast(&forecast);

    let payload = create_forecast_payload(&output).unwrap();
    assert_eq!(
        payload["probability_yes_per_category"],
        json!({"A": 0.5, "B": 0.3, "C": 0.2})
    );
    assert_eq!(count_set_fields(&payload), 1);
}

#[test]
fn continuous_payload_lengths_are_exact() {
    let mut numeric = ForecastOutput::new(2, 2, "How many?", QuestionType::Numeric);
    numeric.cdf = Some(vec![0.0; 201]);
    let payload = create_forecast_payload(&numeric).unwrap();
    assert_eq!(payload["continuous_cdf"].as_array().unwrap().len(), 201);
    assert_eq!(count_set_fields(&payload), 1);

    numeric.cdf = Some(vec![0.0; 42]);
    assert!(create_forecast_payload(&numeric).is_err());

    let mut discrete = ForecastOutput::new(3, 3, "Count?", QuestionType::Discrete);
    discrete.cdf_size = Some(11);
    discrete.cdf = Some(vec![0.0; 11]);
    assert!(create_forecast_payload(&discrete).is_ok());
    discrete.cdf = Some(vec![0.0; 12]);
    assert!(create_forecast_payload(&discrete).is_err());
}

#[test]
fn payload_round_trip_preserves_forecast() {
    // Forecast object -> wire payload -> parse -> equivalent forecast.
    let mut probabilities = BTreeMap::new();
    probabilities.insert("A".to_string(), 0.5);
    probabilities.insert("B".to_string(), 0.3);
    probabilities.insert("C".to_string(), 0.2);

    let mut output = ForecastOutput::new(9, 9, "Which?", QuestionType::MultipleChoice);
    output.probabilities = Some(probabilities.clone());

    let payload = create_forecast_payload(&output).unwrap();
    let parsed: BTreeMap<String, f64> =
        serde_json::from_value(payload["probability_yes_per_category"].clone()).unwrap();
    assert_eq!(parsed, probabilities);

    let mut binary = ForecastOutput::new(10, 10, "Will it?", QuestionType::Binary);
    binary.probability = Some(0.73);
    let payload = create_forecast_payload(&binary).unwrap();
    assert_eq!(payload["probability_yes"].as_f64().unwrap(), 0.73);
}

#[test]
fn reasoning_comment_shows_factors_with_sign() {
    let mut output = ForecastOutput::new(1, 1, "T", QuestionType::Binary);
    output.summary = "Base rates dominate".into();
    output.probability = Some(0.62);
    output.factors = vec![
        Factor {
            description: "Strong historical base rate".into(),
            logit: 2.0,
            confidence: 1.0,
        },
        Factor {
            description: "Recent contrary news".into(),
            logit: -1.0,
            confidence: 0.5,
        },
    ];
    output.sources_consulted = vec!["query one".into(), "query two".into()];

    let comment = format_reasoning_comment(&output);
    assert!(comment.contains("**Probability:** 62.0%"));
    assert!(comment.contains("[+2.0] Strong historical base rate"));
    assert!(comment.contains("[-1.0] Recent contrary news"));
    assert!(comment.contains("*Sources consulted: 2*"));
}
