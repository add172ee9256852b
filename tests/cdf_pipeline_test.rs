//! End-to-end tests for the percentile-to-CDF pipeline.

use forecast_agent::numeric::{max_pmf_value, mixture_to_cdf, percentiles_to_cdf};
use forecast_agent::{NumericBounds, Percentiles, ScenarioComponent};

fn open_upper_bounds() -> NumericBounds {
    NumericBounds {
        range_min: 0.0,
        range_max: 500.0,
        open_lower_bound: false,
        open_upper_bound: true,
        zero_point: None,
        cdf_size: None,
    }
}

fn spread_percentiles() -> Percentiles {
    Percentiles {
        percentile_10: 100.0,
        percentile_20: 120.0,
        percentile_40: 150.0,
        percentile_60: 180.0,
        percentile_80: 220.0,
        percentile_90: 280.0,
    }
}

fn assert_platform_valid(cdf: &[f64], size: usize) {
    assert_eq!(cdf.len(), size, "CDF must have exactly {size} entries");
    assert!(cdf.iter().all(|&v| (0.0..=1.0).contains(&v)));
    for pair in cdf.windows(2) {
        assert!(pair[1] >= pair[0], "CDF must be non-decreasing");
    }
    let cap = max_pmf_value(size, false);
    for pair in cdf.windows(2) {
        assert!(
            pair[1] - pair[0] <= cap + 1e-9,
            "adjacent difference {} exceeds cap {cap}",
            pair[1] - pair[0]
        );
    }
    assert!(cdf[0] >= 0.0);
    assert!(cdf[size - 1] <= 1.0);
}

#[test]
fn numeric_question_open_upper_bound() {
    // Numeric question, bounds [0, 500] open-upper, spread percentiles.
    let cdf = percentiles_to_cdf(&spread_percentiles(), &open_upper_bounds()).unwrap();

    assert_platform_valid(&cdf, 201);
    // Closed lower bound: essentially no mass below the range
    assert!(cdf[0] < 0.01);
    // Open upper bound: mass remains above the range
    assert!(cdf[200] < 1.0 && cdf[200] > 0.9);
    // The declared 40th percentile (value 150, grid index 60) survives
    // standardization within a small drift.
    assert!((cdf[60] - 0.40).abs() < 0.02);
}

#[test]
fn repeated_percentile_values_are_epsilon_adjusted() {
    // p10 and p20 both declare 100; the value axis gets epsilon offsets and
    // the resulting CDF is still valid.
    let percentiles = Percentiles {
        percentile_10: 100.0,
        percentile_20: 100.0,
        percentile_40: 150.0,
        percentile_60: 180.0,
        percentile_80: 220.0,
        percentile_90: 280.0,
    };
    let cdf = percentiles_to_cdf(&percentiles, &open_upper_bounds()).unwrap();
    assert_platform_valid(&cdf, 201);
}

#[test]
fn closed_bounds_pin_first_and_last() {
    let bounds = NumericBounds {
        range_min: 0.0,
        range_max: 500.0,
        open_lower_bound: false,
        open_upper_bound: false,
        zero_point: None,
        cdf_size: None,
    };
    let cdf = percentiles_to_cdf(&spread_percentiles(), &bounds).unwrap();
    assert_platform_valid(&cdf, 201);
    assert!(cdf[0].abs() < 1e-9, "closed lower bound pins 0");
    assert!((cdf[200] - 1.0).abs() < 1e-9, "closed upper bound pins 1");
}

#[test]
fn discrete_question_uses_inbound_outcome_count() {
    let bounds = NumericBounds {
        range_min: 0.0,
        range_max: 10.0,
        open_lower_bound: false,
        open_upper_bound: false,
        zero_point: None,
        cdf_size: Some(11),
    };
    let percentiles = Percentiles {
        percentile_10: 1.0,
        percentile_20: 2.0,
        percentile_40: 4.0,
        percentile_60: 6.0,
        percentile_80: 8.0,
        percentile_90: 9.0,
    };
    let cdf = percentiles_to_cdf(&percentiles, &bounds).unwrap();
    assert_platform_valid(&cdf, 11);
}

#[test]
fn percentile_roundtrip_law() {
    // Percentiles -> CDF -> re-read at the declared marks stays within a
    // small epsilon of the originals.
    let percentiles = spread_percentiles();
    let bounds = open_upper_bounds();
    let cdf = percentiles_to_cdf(&percentiles, &bounds).unwrap();

    let step = (bounds.range_max - bounds.range_min) / 200.0;
    for (mark, value) in percentiles.as_pairs() {
        let index = ((value - bounds.range_min) / step).round() as usize;
        assert!(
            (cdf[index] - mark as f64 / 100.0).abs() < 0.02,
            "p{mark} at value {value}: expected ~{}, got {}",
            mark as f64 / 100.0,
            cdf[index]
        );
    }
}

#[test]
fn invalid_inputs_fail_rather_than_submit() {
    let bounds = open_upper_bounds();

    // Decreasing values
    let decreasing = Percentiles {
        percentile_10: 200.0,
        percentile_20: 150.0,
        percentile_40: 150.0,
        percentile_60: 180.0,
        percentile_80: 220.0,
        percentile_90: 280.0,
    };
    assert!(percentiles_to_cdf(&decreasing, &bounds).is_err());

    // Entirely outside the 25% buffer around the range
    let far_away = Percentiles {
        percentile_10: 5000.0,
        percentile_20: 5100.0,
        percentile_40: 5200.0,
        percentile_60: 5300.0,
        percentile_80: 5400.0,
        percentile_90: 5500.0,
    };
    assert!(percentiles_to_cdf(&far_away, &bounds).is_err());
}

#[test]
fn mixture_of_scenarios_produces_valid_cdf() {
    let components = vec![
        ScenarioComponent {
            scenario: "Base case".into(),
            mode: 150.0,
            lower_bound: 100.0,
            upper_bound: 200.0,
            weight: 0.6,
        },
        ScenarioComponent {
            scenario: "Upside".into(),
            mode: 320.0,
            lower_bound: 250.0,
            upper_bound: 420.0,
            weight: 0.4,
        },
    ];
    let cdf = mixture_to_cdf(&components, &open_upper_bounds()).unwrap();
    assert_platform_valid(&cdf, 201);

    // The combined curve should sit between the two scenario centers:
    // clearly above zero mass by 200 and not yet saturated at 250.
    let at_200 = cdf[(200.0 / 2.5) as usize];
    assert!(at_200 > 0.3 && at_200 < 0.9);
}

#[test]
fn log_scaled_question() {
    let bounds = NumericBounds {
        range_min: 1.0,
        range_max: 1000.0,
        open_lower_bound: false,
        open_upper_bound: true,
        zero_point: Some(0.0),
        cdf_size: None,
    };
    let percentiles = Percentiles {
        percentile_10: 2.0,
        percentile_20: 5.0,
        percentile_40: 20.0,
        percentile_60: 80.0,
        percentile_80: 300.0,
        percentile_90: 600.0,
    };
    let cdf = percentiles_to_cdf(&percentiles, &bounds).unwrap();
    assert_platform_valid(&cdf, 201);
}
