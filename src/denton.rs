//! Denton benchmarking.
//!
//! Model-based formulation: the proportional (multiplicative) variant
//! smooths the bi-ratio `b_t = x_t / w_t` as an integrated process observed
//! through the aggregation constraints, which reproduces the classical
//! Denton movement-preservation solution; the additive variant benchmarks
//! the deviations `x_t - w_t` the same way. Extensions: per-position shock
//! variances (a relaxed movement penalty at chosen steps) and fixed bi-ratio
//! values at chosen positions.

use crate::error::{DisaggError, Result};
use crate::kalman::{self, Observations};
use crate::ssf::regression::TvRegressionSsf;
use crate::types::{AggregationType, KalmanStrategy};

#[derive(Debug, Clone)]
pub struct DentonSpec {
    /// Proportional (true) or additive (false) benchmarking.
    pub multiplicative: bool,
    /// Order of the movement penalty, 1 or 2.
    pub differencing: usize,
    pub aggregation: AggregationType,
    pub offset: usize,
    /// Innovation-variance overrides `(position, variance)`: larger values
    /// let the bi-ratio move more freely into that position.
    pub shock_variances: Vec<(usize, f64)>,
    /// Fixed bi-ratio (or additive-deviation) values `(position, value)`.
    pub fixed_biratios: Vec<(usize, f64)>,
}

impl Default for DentonSpec {
    fn default() -> Self {
        Self {
            multiplicative: true,
            differencing: 1,
            aggregation: AggregationType::Sum,
            offset: 0,
            shock_variances: Vec::new(),
            fixed_biratios: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BenchmarkResult {
    /// Benchmarked high-frequency series.
    pub series: Vec<f64>,
    pub stderr: Vec<f64>,
    /// Smoothed bi-ratios (multiplicative) or benchmark-to-indicator ratios
    /// (additive; NaN where the indicator vanishes).
    pub biratios: Vec<f64>,
}

/// Benchmark an indicator series to low-frequency targets.
///
/// Without an indicator the targets are simply distributed (multiplicative)
/// or interpolated (additive) under the movement penalty alone.
pub fn denton(
    indicator: Option<&[f64]>,
    y: &[f64],
    ratio: usize,
    spec: &DentonSpec,
) -> Result<BenchmarkResult> {
    if ratio < 2 {
        return Err(DisaggError::InvalidRatio(format!(
            "low-to-high conversion factor must be >= 2, got {}",
            ratio
        )));
    }
    if !(1..=2).contains(&spec.differencing) {
        return Err(DisaggError::IncompatibleSpecification(format!(
            "movement penalty order must be 1 or 2, got {}",
            spec.differencing
        )));
    }
    spec.aggregation.validate(ratio)?;
    if y.is_empty() {
        return Err(DisaggError::DataError("no benchmark values".into()));
    }

    let pos = spec.aggregation.observation_position(ratio);
    let n = match indicator {
        Some(w) => w.len(),
        None => spec.offset + ratio * y.len(),
    };
    let last_needed = spec.offset + (y.len() - 1) * ratio + pos + 1;
    if n < last_needed {
        return Err(DisaggError::DimensionMismatch(format!(
            "indicator span {} is too short for {} benchmark periods (needs {})",
            n,
            y.len(),
            last_needed
        )));
    }
    if let Some(w) = indicator {
        if w.iter().any(|v| !v.is_finite()) {
            return Err(DisaggError::DataError("indicator contains non-finite values".into()));
        }
        if spec.multiplicative && w.iter().any(|v| *v == 0.0) {
            return Err(DisaggError::DataError(
                "proportional benchmarking needs a nonzero indicator".into(),
            ));
        }
    }

    // the coefficient loading: the indicator itself (proportional) or a unit
    // weight on the additive deviation
    let w: Vec<f64> = if spec.multiplicative {
        indicator.map_or_else(|| vec![1.0; n], |w| w.to_vec())
    } else {
        vec![1.0; n]
    };

    let mut shock = vec![1.0; n];
    for &(p, v) in &spec.shock_variances {
        if p >= n || v < 0.0 {
            return Err(DisaggError::IncompatibleSpecification(format!(
                "shock variance override at position {} (value {}) is out of range",
                p, v
            )));
        }
        shock[p] = v;
    }

    let mut fixed_positions = Vec::with_capacity(spec.fixed_biratios.len());
    let mut coeff_grid = vec![None; n];
    for &(p, v) in &spec.fixed_biratios {
        if p >= n || !v.is_finite() {
            return Err(DisaggError::IncompatibleSpecification(format!(
                "fixed value at position {} is out of range",
                p
            )));
        }
        fixed_positions.push(p);
        coeff_grid[p] = Some(v);
    }

    // targets on channel 0: raw benchmarks (proportional) or benchmarks net
    // of the aggregated indicator (additive)
    let mut target_grid = vec![None; n];
    for (j, v) in y.iter().enumerate() {
        if !v.is_finite() {
            continue;
        }
        let t_obs = spec.offset + j * ratio + pos;
        let value = if spec.multiplicative {
            *v
        } else {
            *v - aggregate_period(indicator, spec.aggregation, spec.offset + j * ratio, ratio, pos)
        };
        target_grid[t_obs] = Some(value);
    }

    let ssf = TvRegressionSsf::new(
        spec.differencing,
        w.clone(),
        shock,
        fixed_positions,
        ratio,
        spec.offset,
        spec.aggregation,
    );
    let obs = Observations::with_channels(vec![target_grid, coeff_grid]);
    let sm = kalman::smooth(&ssf, &obs, KalmanStrategy::AugmentedNoCollapsing)?;
    let sigma2 = sm.likelihood.sigma2();

    let mut series = Vec::with_capacity(n);
    let mut stderr = Vec::with_capacity(n);
    let mut biratios = Vec::with_capacity(n);
    for t in 0..n {
        let load = ssf.flow_loading(t);
        let flow = load.dot(&sm.states[t]);
        let var = (sigma2 * load.dot(&(&sm.covs[t] * &load))).max(0.0);
        let value = if spec.multiplicative {
            flow
        } else {
            flow + indicator.map_or(0.0, |w| w[t])
        };
        series.push(value);
        stderr.push(var.sqrt());
        let ratio_t = if spec.multiplicative {
            sm.states[t][1]
        } else {
            match indicator {
                Some(w) if w[t] != 0.0 => value / w[t],
                _ => f64::NAN,
            }
        };
        biratios.push(ratio_t);
    }

    Ok(BenchmarkResult { series, stderr, biratios })
}

fn aggregate_period(
    indicator: Option<&[f64]>,
    aggregation: AggregationType,
    start: usize,
    ratio: usize,
    pos: usize,
) -> f64 {
    let Some(w) = indicator else { return 0.0 };
    match aggregation {
        AggregationType::Sum => w[start..start + ratio].iter().sum(),
        AggregationType::Average => {
            w[start..start + ratio].iter().sum::<f64>() / ratio as f64
        }
        _ => w[start + pos],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sums(series: &[f64], ratio: usize) -> Vec<f64> {
        series
            .chunks(ratio)
            .map(|c| c.iter().sum::<f64>())
            .collect()
    }

    #[test]
    fn consistent_indicator_is_returned_unchanged() {
        // indicator already sums to the benchmarks: nothing to correct
        let w: Vec<f64> = vec![1.0, 2.0, 3.0, 2.0, 2.0, 4.0, 3.0, 3.0];
        let y: Vec<f64> = vec![8.0, 12.0];
        for multiplicative in [true, false] {
            let spec = DentonSpec { multiplicative, ..Default::default() };
            let r = denton(Some(&w), &y, 4, &spec).unwrap();
            for t in 0..8 {
                assert!(
                    (r.series[t] - w[t]).abs() < 1e-7 * (1.0 + w[t].abs()),
                    "mult={} t={}: {} vs {}",
                    multiplicative,
                    t,
                    r.series[t],
                    w[t]
                );
            }
        }
    }

    #[test]
    fn benchmarks_are_always_met() {
        let w: Vec<f64> = vec![
            10.0, 11.0, 12.0, 12.5, 13.0, 12.0, 11.5, 12.5, 13.5, 14.0, 13.0, 14.5,
        ];
        let y = vec![50.0, 56.0, 53.0];
        for multiplicative in [true, false] {
            for differencing in [1, 2] {
                let spec = DentonSpec { multiplicative, differencing, ..Default::default() };
                let r = denton(Some(&w), &y, 4, &spec).unwrap();
                let totals = sums(&r.series, 4);
                for (total, target) in totals.iter().zip(&y) {
                    assert!(
                        (total - target).abs() < 1e-6 * target,
                        "mult={} diff={}: {} vs {}",
                        multiplicative,
                        differencing,
                        total,
                        target
                    );
                }
            }
        }
    }

    #[test]
    fn flat_distribution_without_indicator() {
        let y = vec![8.0, 12.0];
        let r = denton(None, &y, 4, &DentonSpec::default()).unwrap();
        // first-difference penalty spreads the step smoothly and keeps sums
        let totals = sums(&r.series, 4);
        assert!((totals[0] - 8.0).abs() < 1e-7);
        assert!((totals[1] - 12.0).abs() < 1e-7);
        // monotone transition between the two levels
        for t in 1..8 {
            assert!(r.series[t] >= r.series[t - 1] - 1e-9);
        }
    }

    #[test]
    fn fixed_biratio_is_honored() {
        let w: Vec<f64> = vec![10.0, 11.0, 12.0, 12.5, 13.0, 12.0, 11.5, 12.5];
        let y = vec![50.0, 56.0];
        let spec = DentonSpec {
            fixed_biratios: vec![(5, 1.3)],
            ..Default::default()
        };
        let r = denton(Some(&w), &y, 4, &spec).unwrap();
        assert!((r.biratios[5] - 1.3).abs() < 1e-6, "{}", r.biratios[5]);
        assert!((r.series[5] - 1.3 * w[5]).abs() < 1e-5);
        // aggregation still holds
        let totals = sums(&r.series, 4);
        assert!((totals[1] - 56.0).abs() < 1e-6 * 56.0);
    }

    #[test]
    fn shock_variance_concentrates_the_break() {
        // level shift between periods; a loose shock at the boundary should
        // absorb most of it
        let y = vec![4.0, 8.0];
        let spec = DentonSpec {
            shock_variances: vec![(4, 1e6)],
            ..Default::default()
        };
        let r = denton(None, &y, 4, &spec).unwrap();
        let jump = (r.biratios[4] - r.biratios[3]).abs();
        for t in 1..8 {
            if t != 4 {
                let step = (r.biratios[t] - r.biratios[t - 1]).abs();
                assert!(step < 0.1 * jump, "t={}: {} vs jump {}", t, step, jump);
            }
        }
    }

    #[test]
    fn rejects_zero_indicator_in_proportional_mode() {
        let w = vec![1.0, 0.0, 1.0, 1.0];
        let err = denton(Some(&w), &[4.0], 4, &DentonSpec::default()).unwrap_err();
        assert!(matches!(err, DisaggError::DataError(_)));
    }

    #[test]
    fn rejects_unsupported_penalty_order() {
        let err = denton(None, &[4.0, 5.0], 4, &DentonSpec { differencing: 3, ..Default::default() })
            .unwrap_err();
        assert!(matches!(err, DisaggError::IncompatibleSpecification(_)));
    }
}
