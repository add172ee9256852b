//! Numeric distribution builder.
//!
//! Converts sparse percentile estimates (the 10/20/40/60/80/90 marks) or a
//! scenario mixture into the dense CDF the platform requires: 201 points
//! for numeric questions, `inbound_outcome_count + 1` for discrete.
//!
//! The pipeline is: validate the declared percentiles, pin or interpolate
//! boundary percentiles depending on open/closed bounds, map the value axis
//! to a [0,1] location axis (linear, or logarithmic when the question
//! declares a `zero_point`), sample by linear interpolation at the grid
//! points, then standardize so the result satisfies the platform's CDF
//! validity rules (no mass outside closed bounds, a minimum spill outside
//! open bounds, a minimum increase at every step, and a cap on every PMF
//! bucket, rescaled by binary search so the total still sums to 1).
//!
//! Validation failures are hard errors: an invalid distribution fails the
//! forecast run rather than submitting a malformed CDF.

use crate::types::{NumericBounds, NumericForecast, Percentiles, ScenarioComponent};
use crate::{Error, Result};

/// CDF length for numeric questions.
pub const DEFAULT_CDF_SIZE: usize = 201;

/// Maximum PMF bucket for the default 201-point CDF.
pub const MAX_NUMERIC_PMF_VALUE: f64 = 0.2;

const DEFAULT_INBOUND_OUTCOME_COUNT: f64 = (DEFAULT_CDF_SIZE - 1) as f64;

/// Maximum allowed PMF value for a given CDF size.
///
/// The cap is 0.2 at the default 200 inbound outcomes and scales inversely
/// with the outcome count. With `include_wiggle_room`, 95% of the cap is
/// used as a safety margin.
pub fn max_pmf_value(cdf_size: usize, include_wiggle_room: bool) -> f64 {
    let inbound_outcome_count = (cdf_size - 1) as f64;
    let cap = MAX_NUMERIC_PMF_VALUE * (DEFAULT_INBOUND_OUTCOME_COUNT / inbound_outcome_count);
    if include_wiggle_room { cap * 0.95 } else { cap }
}

/// One point of a distribution: "`percentile` of outcomes are below `value`".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CdfPoint {
    /// Cumulative probability, 0 to 1.
    pub percentile: f64,
    /// Real-world value at this percentile.
    pub value: f64,
}

impl CdfPoint {
    fn new(percentile: f64, value: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&percentile) || percentile.is_nan() {
            return Err(Error::validation(format!(
                "Percentile must be between 0 and 1, got {percentile}"
            )));
        }
        Ok(Self { percentile, value })
    }
}

/// Converts declared percentile estimates into a platform-valid CDF.
pub struct NumericDistribution {
    declared: Vec<CdfPoint>,
    open_upper_bound: bool,
    open_lower_bound: bool,
    upper_bound: f64,
    lower_bound: f64,
    zero_point: Option<f64>,
    cdf_size: usize,
    standardize: bool,
}

impl NumericDistribution {
    /// Build and validate a distribution from declared points.
    ///
    /// `strict` enables the spacing, range, and concentration checks that
    /// apply to model-declared percentiles (the raw per-component specs of
    /// mixture mode skip them and rely on the final standardization pass).
    pub fn new(
        declared: Vec<CdfPoint>,
        bounds: &NumericBounds,
        standardize: bool,
        strict: bool,
    ) -> Result<Self> {
        let mut dist = Self {
            declared,
            open_upper_bound: bounds.open_upper_bound,
            open_lower_bound: bounds.open_lower_bound,
            upper_bound: bounds.range_max,
            lower_bound: bounds.range_min,
            zero_point: bounds.zero_point,
            cdf_size: bounds.effective_cdf_size(),
            standardize,
        };

        dist.check_percentiles_increasing()?;
        dist.check_log_scaled_fields()?;

        if strict {
            dist.check_percentile_spacing()?;
            if dist.standardize {
                dist.check_too_far_from_bounds()?;
            }
            dist.declared = dist.adjust_repeating_values()?;
        }

        Ok(dist)
    }

    /// Build from the six-mark percentile spec.
    pub fn from_percentiles(percentiles: &Percentiles, bounds: &NumericBounds) -> Result<Self> {
        let declared = percentiles
            .as_pairs()
            .iter()
            .map(|&(mark, value)| CdfPoint::new(mark as f64 / 100.0, value))
            .collect::<Result<Vec<_>>>()?;
        Self::new(declared, bounds, true, true)
    }

    fn check_percentiles_increasing(&self) -> Result<()> {
        if self.declared.len() < 2 {
            return Err(Error::validation(
                "Distribution must have at least 2 percentiles",
            ));
        }
        for pair in self.declared.windows(2) {
            if pair[0].percentile >= pair[1].percentile {
                return Err(Error::validation(
                    "Percentiles must be in strictly increasing order",
                ));
            }
            if pair[0].value > pair[1].value {
                return Err(Error::validation(
                    "Values must be in strictly increasing order",
                ));
            }
        }
        Ok(())
    }

    fn check_percentile_spacing(&self) -> Result<()> {
        for (i, pair) in self.declared.windows(2).enumerate() {
            let spacing = (pair[1].percentile - pair[0].percentile).abs();
            if spacing < 5e-5 {
                return Err(Error::validation(format!(
                    "Percentiles at indices {i} and {} are too close; the CDF must \
                     increase by at least 5e-05 at every step (got {} and {} at values \
                     {} and {})",
                    i + 1,
                    pair[0].percentile,
                    pair[1].percentile,
                    pair[0].value,
                    pair[1].value
                )));
            }
        }
        Ok(())
    }

    fn check_log_scaled_fields(&self) -> Result<()> {
        let Some(zero_point) = self.zero_point else {
            return Ok(());
        };
        if self.lower_bound <= zero_point {
            return Err(Error::validation(format!(
                "Lower bound {} must be greater than zero point {} for log-scaled questions",
                self.lower_bound, zero_point
            )));
        }
        for point in &self.declared {
            if point.value < zero_point {
                return Err(Error::validation(format!(
                    "Percentile value {} is below zero point {}; values below the zero \
                     point are not supported",
                    point.value, zero_point
                )));
            }
        }
        Ok(())
    }

    /// At least some declared values must land within a 25% buffer of the
    /// question range, and none may stray beyond twice the range.
    fn check_too_far_from_bounds(&self) -> Result<()> {
        let range_size = self.upper_bound - self.lower_bound;
        let wiggle_room = range_size * 0.25;

        let upper_with_wiggle = self.upper_bound + wiggle_room;
        let lower_with_wiggle = self.lower_bound - wiggle_room;
        let within = self
            .declared
            .iter()
            .filter(|p| lower_with_wiggle <= p.value && p.value <= upper_with_wiggle)
            .count();
        if within == 0 {
            return Err(Error::validation(format!(
                "No percentiles within 25% of question range [{}, {}]",
                self.lower_bound, self.upper_bound
            )));
        }

        let max_buffer = range_size * 2.0;
        let far_outside = self
            .declared
            .iter()
            .filter(|p| {
                p.value < self.lower_bound - max_buffer || p.value > self.upper_bound + max_buffer
            })
            .count();
        if far_outside > 0 {
            return Err(Error::validation(format!(
                "Some percentiles far exceed question bounds [{}, {}]",
                self.lower_bound, self.upper_bound
            )));
        }
        Ok(())
    }

    /// Repeated values get an epsilon offset so the value axis becomes
    /// strictly increasing. The offset direction depends on which side of
    /// the range the value sits: below-range repeats nudge below
    /// `range_min`, above-range repeats nudge above `range_max`, interior
    /// repeats nudge just below the value (larger offsets at lower
    /// percentiles keep the ordering).
    fn adjust_repeating_values(&self) -> Result<Vec<CdfPoint>> {
        let mut counts: std::collections::HashMap<u64, usize> = std::collections::HashMap::new();
        for p in &self.declared {
            *counts.entry(p.value.to_bits()).or_insert(0) += 1;
        }

        let epsilon = 1e-10;
        let mut adjusted = Vec::with_capacity(self.declared.len());

        for point in &self.declared {
            if counts[&point.value.to_bits()] == 1 {
                adjusted.push(*point);
                continue;
            }

            let value = point.value;
            let in_bounds = self.lower_bound < value && value < self.upper_bound;
            let above_bound = value >= self.upper_bound;
            let below_bound = value <= self.lower_bound;

            if in_bounds {
                let greater_epsilon = 1e-6;
                let modification = (1.0 - point.percentile) * greater_epsilon;
                adjusted.push(CdfPoint {
                    percentile: point.percentile,
                    value: value - modification,
                });
            } else if above_bound {
                let modification = epsilon * point.percentile;
                adjusted.push(CdfPoint {
                    percentile: point.percentile,
                    value: self.upper_bound + modification,
                });
            } else if below_bound {
                let modification = epsilon * (1.0 - point.percentile);
                adjusted.push(CdfPoint {
                    percentile: point.percentile,
                    value: self.lower_bound - modification,
                });
            } else {
                return Err(Error::validation(format!(
                    "Unexpected repeated value {value} relative to bounds [{}, {}]",
                    self.lower_bound, self.upper_bound
                )));
            }
        }

        Ok(adjusted)
    }

    /// Add explicit boundary percentiles based on open/closed bounds.
    ///
    /// Closed bounds pin 0% at `range_min` / 100% at `range_max`. Open
    /// bounds interpolate a half-way percentile at the boundary, provided
    /// the declared percentiles do not already extend there. A small buffer
    /// (1 unit if the range exceeds 100, else 1% of the range) keeps
    /// declared values off the exact boundary to avoid degenerate spikes.
    fn with_boundary_percentiles(&self) -> Vec<CdfPoint> {
        let range_max = self.upper_bound;
        let range_min = self.lower_bound;
        let range_size = (range_max - range_min).abs();
        let buffer = if range_size > 100.0 { 1.0 } else { 0.01 * range_size };

        // Work on (percentile-in-percent, value) pairs like a sorted map.
        let mut entries: Vec<(f64, f64)> = self
            .declared
            .iter()
            .map(|p| (p.percentile * 100.0, p.value))
            .collect();

        let percentile_max = entries
            .iter()
            .map(|(p, _)| *p)
            .fold(f64::NEG_INFINITY, f64::max);
        let percentile_min = entries.iter().map(|(p, _)| *p).fold(f64::INFINITY, f64::min);

        // Keep declared values a buffer away from closed bounds.
        for entry in entries.iter_mut() {
            if !self.open_lower_bound && entry.1 <= range_min + buffer {
                entry.1 = range_min + buffer;
            }
            if !self.open_upper_bound && entry.1 >= range_max - buffer {
                entry.1 = range_max - buffer;
            }
        }

        let value_at = |entries: &[(f64, f64)], pct: f64| -> f64 {
            entries
                .iter()
                .find(|(p, _)| (*p - pct).abs() < 1e-9)
                .map(|(_, v)| *v)
                .unwrap_or(f64::NAN)
        };

        // Upper bound
        if self.open_upper_bound {
            if range_max > value_at(&entries, percentile_max) {
                let halfway = 100.0 - 0.5 * (100.0 - percentile_max);
                upsert(&mut entries, halfway, range_max);
            }
        } else {
            upsert(&mut entries, 100.0, range_max);
        }

        // Lower bound
        if self.open_lower_bound {
            if range_min < value_at(&entries, percentile_min) {
                let halfway = 0.5 * percentile_min;
                upsert(&mut entries, halfway, range_min);
            }
        } else {
            upsert(&mut entries, 0.0, range_min);
        }

        entries.sort_by(|a, b| a.0.partial_cmp(&b.0).expect("percentiles are not NaN"));
        entries
            .into_iter()
            .map(|(pct, value)| CdfPoint {
                percentile: pct / 100.0,
                value,
            })
            .collect()
    }

    /// Map a real-world value to its CDF x-axis location in [0, 1].
    fn nominal_to_location(&self, nominal_value: f64) -> f64 {
        let range_max = self.upper_bound;
        let range_min = self.lower_bound;

        match self.zero_point {
            Some(zero_point) => {
                let deriv_ratio = (range_max - zero_point) / (range_min - zero_point);
                let mut v = nominal_value;
                if v == zero_point {
                    v += 1e-10; // avoid log(0)
                }
                (((v - range_min) * (deriv_ratio - 1.0) + (range_max - range_min)).ln()
                    - (range_max - range_min).ln())
                    / deriv_ratio.ln()
            }
            None => (nominal_value - range_min) / (range_max - range_min),
        }
    }

    /// Inverse of [`Self::nominal_to_location`].
    fn location_to_nominal(&self, cdf_location: f64) -> Result<f64> {
        let range_max = self.upper_bound;
        let range_min = self.lower_bound;

        let scaled = match self.zero_point {
            None => range_min + (range_max - range_min) * cdf_location,
            Some(zero_point) => {
                let deriv_ratio = (range_max - zero_point) / (range_min - zero_point);
                range_min
                    + (range_max - range_min) * (deriv_ratio.powf(cdf_location) - 1.0)
                        / (deriv_ratio - 1.0)
            }
        };

        if scaled.is_nan() {
            return Err(Error::validation(format!(
                "Scaled location is NaN for CDF location {cdf_location}"
            )));
        }
        Ok(scaled)
    }

    /// CDF height at a location via linear interpolation between the
    /// bounded percentile points.
    fn cdf_at(&self, location_to_height: &[(f64, f64)], cdf_location: f64) -> Result<f64> {
        let epsilon = 1e-10;
        let mut previous = location_to_height[0];
        for &current in &location_to_height[1..] {
            if previous.0 - epsilon <= cdf_location && cdf_location <= current.0 + epsilon {
                let result = previous.1
                    + (current.1 - previous.1) * (cdf_location - previous.0)
                        / (current.0 - previous.0);
                if result.is_nan() {
                    return Err(Error::validation(format!(
                        "NaN interpolation result at CDF location {cdf_location}"
                    )));
                }
                return Ok(result);
            }
            previous = current;
        }
        Err(Error::validation(format!(
            "CDF location {cdf_location} not found in range"
        )))
    }

    /// Generate the full CDF: heights at `cdf_size` evenly spaced locations,
    /// standardized when requested, validated before returning.
    pub fn cdf_points(&self) -> Result<Vec<CdfPoint>> {
        let bounded = self.with_boundary_percentiles();
        let location_to_height: Vec<(f64, f64)> = bounded
            .iter()
            .map(|p| (self.nominal_to_location(p.value), p.percentile))
            .collect();

        let mut heights = Vec::with_capacity(self.cdf_size);
        let mut xaxis = Vec::with_capacity(self.cdf_size);
        for i in 0..self.cdf_size {
            let location = i as f64 / (self.cdf_size - 1) as f64;
            heights.push(self.cdf_at(&location_to_height, location)?);
            xaxis.push(self.location_to_nominal(location)?);
        }

        if self.standardize {
            heights = self.standardize_cdf(&heights);
        }

        let points: Vec<CdfPoint> = xaxis
            .into_iter()
            .zip(heights)
            .map(|(value, percentile)| CdfPoint { percentile, value })
            .collect();

        self.validate_generated(&points)?;
        Ok(points)
    }

    /// Generate the CDF as the list of heights the platform consumes.
    pub fn cdf(&self) -> Result<Vec<f64>> {
        Ok(self.cdf_points()?.iter().map(|p| p.percentile).collect())
    }

    /// Raw (unstandardized) heights, used by mixture mode before the
    /// combined standardization pass.
    fn raw_cdf(&self) -> Result<Vec<f64>> {
        let bounded = self.with_boundary_percentiles();
        let location_to_height: Vec<(f64, f64)> = bounded
            .iter()
            .map(|p| (self.nominal_to_location(p.value), p.percentile))
            .collect();

        let mut heights = Vec::with_capacity(self.cdf_size);
        for i in 0..self.cdf_size {
            let location = i as f64 / (self.cdf_size - 1) as f64;
            heights.push(self.cdf_at(&location_to_height, location)?);
        }
        Ok(heights)
    }

    /// Apply the platform's standardization rules to interpolated heights.
    fn standardize_cdf(&self, cdf: &[f64]) -> Vec<f64> {
        let n = cdf.len();
        let lower_open = self.open_lower_bound;
        let upper_open = self.open_upper_bound;

        let scale_lower_to = if lower_open { 0.0 } else { cdf[0] };
        let scale_upper_to = if upper_open { 1.0 } else { cdf[n - 1] };
        let rescaled_inbound_mass = scale_upper_to - scale_lower_to;

        // Minimum-slope offsets guarantee every step grows by at least
        // 0.01/200 and open sides keep their spill.
        let apply_minimum = |f: f64, location: f64| -> f64 {
            let rescaled = (f - scale_lower_to) / rescaled_inbound_mass;
            if lower_open && upper_open {
                0.988 * rescaled + 0.01 * location + 0.001
            } else if lower_open {
                0.989 * rescaled + 0.01 * location + 0.001
            } else if upper_open {
                0.989 * rescaled + 0.01 * location
            } else {
                0.99 * rescaled + 0.01 * location
            }
        };

        let mut adjusted: Vec<f64> = cdf
            .iter()
            .enumerate()
            .map(|(i, &f)| apply_minimum(f, i as f64 / (n - 1) as f64))
            .collect();

        // PMF with virtual 0/1 endpoints: pmf[0] is the mass below the
        // range, pmf[n] the mass above it.
        let mut pmf = Vec::with_capacity(n + 1);
        pmf.push(adjusted[0]);
        for i in 1..n {
            pmf.push(adjusted[i] - adjusted[i - 1]);
        }
        pmf.push(1.0 - adjusted[n - 1]);

        let cap = max_pmf_value(n, true);

        let capped_sum = |scale: f64| -> f64 {
            let mut total = pmf[0];
            for &p in &pmf[1..pmf.len() - 1] {
                total += cap.min(scale * p);
            }
            total + pmf[pmf.len() - 1]
        };

        // Binary-search a scale factor in PMF space that makes the capped
        // total sum back to 1.
        let mut lo = 1.0f64;
        let mut hi = 1.0f64;
        let mut scale = 1.0f64;
        while capped_sum(hi) < 1.0 {
            hi *= 1.2;
        }
        for _ in 0..100 {
            scale = 0.5 * (lo + hi);
            let s = capped_sum(scale);
            if s < 1.0 {
                lo = scale;
            } else {
                hi = scale;
            }
            if s == 1.0 || (hi - lo) < 2e-5 {
                break;
            }
        }

        let inner_len = pmf.len() - 2;
        let mut capped: Vec<f64> = Vec::with_capacity(pmf.len());
        capped.push(pmf[0]);
        for &p in &pmf[1..=inner_len] {
            capped.push(cap.min(scale * p));
        }
        capped.push(pmf[pmf.len() - 1]);

        // Renormalize the interior so the endpoint values are preserved.
        let inner_sum: f64 = capped[1..=inner_len].iter().sum();
        if inner_sum > 0.0 {
            let target = adjusted[n - 1] - adjusted[0];
            let factor = target / inner_sum;
            for p in capped[1..=inner_len].iter_mut() {
                *p *= factor;
            }
        }

        // Back to CDF space, dropping the virtual above-range bucket.
        let mut running = 0.0;
        for (i, slot) in adjusted.iter_mut().enumerate() {
            running += capped[i];
            *slot = running;
        }

        // Round to eliminate floating-point noise.
        adjusted.iter().map(|&v| round10(v)).collect()
    }

    /// Validate a generated CDF against the platform rules.
    fn validate_generated(&self, points: &[CdfPoint]) -> Result<()> {
        if points.len() != self.cdf_size {
            return Err(Error::validation(format!(
                "CDF size mismatch: expected {}, got {}",
                self.cdf_size,
                points.len()
            )));
        }

        for pair in points.windows(2) {
            if pair[0].percentile >= pair[1].percentile {
                return Err(Error::validation(
                    "Generated CDF is not strictly increasing",
                ));
            }
        }

        if self.standardize {
            let cap = max_pmf_value(points.len(), false);
            for pair in points.windows(2) {
                let pmf_value = pair[1].percentile - pair[0].percentile;
                if pmf_value > cap {
                    return Err(Error::validation(format!(
                        "Distribution too concentrated: PMF between values {} and {} is \
                         {pmf_value:.4}, exceeds max {cap:.4}",
                        pair[0].value, pair[1].value
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Insert or overwrite a (percentile-in-percent, value) entry.
fn upsert(entries: &mut Vec<(f64, f64)>, pct: f64, value: f64) {
    if let Some(entry) = entries.iter_mut().find(|(p, _)| (*p - pct).abs() < 1e-9) {
        entry.1 = value;
    } else {
        entries.push((pct, value));
    }
}

fn round10(v: f64) -> f64 {
    (v * 1e10).round() / 1e10
}

/// Convert a six-mark percentile spec to the platform CDF format.
pub fn percentiles_to_cdf(percentiles: &Percentiles, bounds: &NumericBounds) -> Result<Vec<f64>> {
    NumericDistribution::from_percentiles(percentiles, bounds)?.cdf()
}

/// Convert a scenario mixture to the platform CDF format.
///
/// Each component becomes its own percentile spec (mode at the 50th mark,
/// lower bound at the 10th, upper bound at the 90th), the per-component
/// raw CDFs are weight-summed point-wise, and the combined curve goes
/// through the same standardization pass as percentile mode.
pub fn mixture_to_cdf(
    components: &[ScenarioComponent],
    bounds: &NumericBounds,
) -> Result<Vec<f64>> {
    if components.is_empty() {
        return Err(Error::validation("Mixture must have at least one component"));
    }
    let total_weight: f64 = components.iter().map(|c| c.weight).sum();
    if (total_weight - 1.0).abs() > 1e-6 {
        return Err(Error::validation(format!(
            "Mixture weights must sum to 1.0, got {total_weight}"
        )));
    }

    let cdf_size = bounds.effective_cdf_size();
    let mut combined = vec![0.0f64; cdf_size];

    for component in components {
        let declared = vec![
            CdfPoint::new(0.1, component.lower_bound)?,
            CdfPoint::new(0.5, component.mode)?,
            CdfPoint::new(0.9, component.upper_bound)?,
        ];
        let dist = NumericDistribution::new(declared, bounds, false, false)?;
        let raw = dist.raw_cdf()?;
        for (slot, height) in combined.iter_mut().zip(raw) {
            *slot += component.weight * height;
        }
    }

    // Standardize the combined curve with a distribution carrying the same
    // bounds; the declared points are only needed for interpolation, which
    // the combined curve replaces.
    let carrier = NumericDistribution::new(
        vec![CdfPoint::new(0.1, bounds.range_min)?, CdfPoint::new(0.9, bounds.range_max)?],
        bounds,
        true,
        false,
    )?;
    let standardized = carrier.standardize_cdf(&combined);

    let points: Vec<CdfPoint> = standardized
        .iter()
        .enumerate()
        .map(|(i, &percentile)| CdfPoint {
            percentile,
            value: i as f64,
        })
        .collect();
    carrier.validate_generated(&points)?;

    Ok(standardized)
}

/// Build the CDF for a numeric forecast, dispatching on its representation.
pub fn cdf_for_forecast(forecast: &NumericForecast, bounds: &NumericBounds) -> Result<Vec<f64>> {
    if forecast.uses_mixture() {
        let components = forecast
            .components
            .as_ref()
            .expect("uses_mixture implies components");
        mixture_to_cdf(components, bounds)
    } else {
        let percentiles = forecast
            .percentiles()
            .ok_or_else(|| Error::validation("Numeric forecast has no distribution"))?;
        percentiles_to_cdf(&percentiles, bounds)
    }
}
