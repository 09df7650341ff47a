//! Model scaffold: data preparation between the public entry points and the
//! state-space machinery.
//!
//! Builds the regressor matrix (generated constant/trend columns plus user
//! indicators), rescales everything for conditioning, places the
//! low-frequency values on the high-frequency grid, and hands candidate
//! state-space models to the estimator.

use nalgebra::DMatrix;

use crate::error::{DisaggError, Result};
use crate::estimator::{self, RhoEstimate};
use crate::kalman::{self, Observations, Smoothed};
use crate::likelihood::DiffuseLikelihood;
use crate::ssf::cumulator::DisaggregationSsf;
use crate::ssf::{residual_component, StateSpace};
use crate::types::TemporalDisaggregationSpec;

#[derive(Debug)]
pub(crate) struct DisaggregationModel {
    spec: TemporalDisaggregationSpec,
    ratio: usize,
    /// High-frequency span (indicator rows, or derived from y when there is
    /// no indicator).
    n: usize,
    /// Scaled regressors including generated columns, n x k.
    x: Option<DMatrix<f64>>,
    yfactor: f64,
    xfactors: Vec<f64>,
    obs: Observations,
    /// Number of finite low-frequency values.
    ny: usize,
}

/// Usable high-frequency span of an indicator matrix.
///
/// Rows from the first non-finite value onward are dropped, which may only
/// shorten the extrapolation tail; a non-finite value inside the estimation
/// window (the rows the low-frequency observations aggregate over) is a data
/// error.
pub(crate) fn usable_span(x: &DMatrix<f64>, last_needed: usize) -> Result<usize> {
    match (0..x.nrows()).find(|&t| x.row(t).iter().any(|v| !v.is_finite())) {
        Some(t) if t < last_needed => Err(DisaggError::DataError(format!(
            "indicator has a non-finite value at row {} inside the estimation \
             window (rows 0..{})",
            t, last_needed
        ))),
        Some(t) => Ok(t),
        None => Ok(x.nrows()),
    }
}

pub(crate) fn mean_abs(values: impl Iterator<Item = f64>) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for v in values {
        sum += v.abs();
        count += 1;
    }
    if count == 0 {
        return 1.0;
    }
    let m = sum / count as f64;
    if m > 0.0 {
        m
    } else {
        1.0
    }
}

impl DisaggregationModel {
    pub(crate) fn new(
        y: &[f64],
        indicators: Option<&DMatrix<f64>>,
        ratio: usize,
        spec: &TemporalDisaggregationSpec,
    ) -> Result<Self> {
        spec.validate(ratio)?;
        if y.is_empty() {
            return Err(DisaggError::DataError("no low-frequency observations".into()));
        }

        let pos = spec.aggregation.observation_position(ratio);
        let n = match indicators {
            Some(x) => x.nrows(),
            None => spec.offset + ratio * y.len(),
        };
        let last_needed = spec.offset + (y.len() - 1) * ratio + pos + 1;
        if n < last_needed {
            return Err(DisaggError::DimensionMismatch(format!(
                "indicator span {} is too short for {} low-frequency periods (needs {})",
                n,
                y.len(),
                last_needed
            )));
        }
        let n = match indicators {
            Some(x) => usable_span(x, last_needed)?,
            None => n,
        };

        let k_gen = spec.k_generated();
        let k_ind = indicators.map_or(0, |x| x.ncols());
        let k = k_gen + k_ind;
        let mut x = (k > 0).then(|| {
            DMatrix::from_fn(n, k, |t, j| {
                if spec.constant && j == 0 {
                    1.0
                } else if spec.trend && j == k_gen - 1 {
                    t as f64
                } else {
                    indicators.expect("k_ind > 0")[(t, j - k_gen)]
                }
            })
        });

        let yfactor = if spec.rescale {
            mean_abs(y.iter().copied().filter(|v| v.is_finite()))
        } else {
            1.0
        };
        let mut xfactors = vec![1.0; k];
        if let Some(ref mut x) = x {
            if spec.rescale {
                for j in 0..k {
                    let f = mean_abs(x.column(j).iter().copied());
                    xfactors[j] = f;
                    for t in 0..n {
                        x[(t, j)] /= f;
                    }
                }
            }
        }

        let mut grid = vec![None; n];
        let mut ny = 0usize;
        for (j, v) in y.iter().enumerate() {
            if v.is_finite() {
                grid[spec.offset + j * ratio + pos] = Some(v / yfactor);
                ny += 1;
            }
        }
        if ny == 0 {
            return Err(DisaggError::DataError("no finite low-frequency observations".into()));
        }

        let model = Self {
            spec: spec.clone(),
            ratio,
            n,
            x,
            yfactor,
            xfactors,
            obs: Observations::single(grid),
            ny,
        };

        let d = model.ssf(model.start_parameter()).diffuse_dim();
        let required =
            d + 1 + usize::from(spec.model.has_parameter() && spec.estimation.estimate);
        if model.ny < required {
            return Err(DisaggError::InsufficientData { required, got: model.ny });
        }
        Ok(model)
    }

    pub(crate) fn span(&self) -> usize {
        self.n
    }

    pub(crate) fn n_coeffs(&self) -> usize {
        self.x.as_ref().map_or(0, |x| x.ncols())
    }

    pub(crate) fn yfactor(&self) -> f64 {
        self.yfactor
    }

    pub(crate) fn xfactors(&self) -> &[f64] {
        &self.xfactors
    }

    fn start_parameter(&self) -> f64 {
        estimator::reflect(
            self.spec.estimation.parameter,
            self.spec.estimation.lower_bound,
            self.spec.estimation.eps,
        )
    }

    pub(crate) fn ssf(&self, rho: f64) -> DisaggregationSsf {
        let base = residual_component(self.spec.model, rho, self.spec.zero_initialization);
        DisaggregationSsf::new(
            base,
            self.x.clone(),
            self.n,
            self.ratio,
            self.spec.offset,
            self.spec.aggregation,
        )
    }

    /// Profile likelihood at a candidate parameter, in scaled units.
    pub(crate) fn likelihood(&self, rho: f64) -> Result<DiffuseLikelihood> {
        let ssf = self.ssf(rho);
        let lik = kalman::loglikelihood(&ssf, &self.obs, self.spec.strategy)?;
        Ok(self.with_regressor_convention(lik))
    }

    /// Estimate the AR parameter; models without one skip the search.
    pub(crate) fn estimate(&self) -> Result<Option<RhoEstimate>> {
        if !self.spec.model.has_parameter() {
            return Ok(None);
        }
        let est = estimator::estimate(|rho| self.likelihood(rho), &self.spec.estimation)?;
        Ok(Some(est))
    }

    /// Smooth at the final parameter, in scaled units.
    pub(crate) fn smooth(&self, rho: f64) -> Result<Smoothed> {
        let ssf = self.ssf(rho);
        let mut sm = kalman::smooth(&ssf, &self.obs, self.spec.strategy)?;
        sm.likelihood = self.with_regressor_convention(sm.likelihood);
        Ok(sm)
    }

    /// Apply the diffuse-regressor convention: when the regression
    /// coefficients are not counted as diffuse, they do not reduce the
    /// effective sample size.
    fn with_regressor_convention(&self, lik: DiffuseLikelihood) -> DiffuseLikelihood {
        if self.spec.diffuse_regressors {
            return lik;
        }
        let d = lik.d.saturating_sub(self.n_coeffs());
        DiffuseLikelihood::new(lik.ssq, lik.ldet, lik.lddet, lik.nobs, d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AggregationType, ResidualModel};

    fn spec() -> TemporalDisaggregationSpec {
        TemporalDisaggregationSpec {
            model: ResidualModel::Ar1,
            constant: true,
            trend: false,
            ..Default::default()
        }
    }

    #[test]
    fn generated_columns_come_first() {
        let y = vec![10.0, 12.0, 11.0, 13.0, 12.5];
        let ind = DMatrix::from_fn(20, 1, |t, _| (t + 1) as f64);
        let spec = TemporalDisaggregationSpec {
            trend: true,
            rescale: false,
            ..spec()
        };
        let m = DisaggregationModel::new(&y, Some(&ind), 4, &spec).unwrap();
        assert_eq!(m.n_coeffs(), 3);
        let x = m.x.as_ref().unwrap();
        assert!((x[(5, 0)] - 1.0).abs() < 1e-15); // constant
        assert!((x[(5, 1)] - 5.0).abs() < 1e-15); // trend
        assert!((x[(5, 2)] - 6.0).abs() < 1e-15); // indicator
    }

    #[test]
    fn rescaling_normalizes_mean_abs() {
        let y = vec![100.0, 120.0, 110.0, 130.0];
        let ind = DMatrix::from_fn(16, 1, |t, _| 10.0 * (t + 1) as f64);
        let m = DisaggregationModel::new(&y, Some(&ind), 4, &spec()).unwrap();
        assert!((m.yfactor() - 115.0).abs() < 1e-12);
        // indicator column scaled to unit mean abs
        let x = m.x.as_ref().unwrap();
        let mean: f64 = x.column(1).iter().map(|v| v.abs()).sum::<f64>() / 16.0;
        assert!((mean - 1.0).abs() < 1e-12);
        assert!((m.xfactors()[0] - 1.0).abs() < 1e-12); // constant untouched
    }

    #[test]
    fn short_indicator_is_rejected() {
        let y = vec![10.0, 12.0, 11.0];
        let ind = DMatrix::from_fn(11, 1, |t, _| t as f64);
        let err = DisaggregationModel::new(&y, Some(&ind), 4, &spec()).unwrap_err();
        assert!(matches!(err, DisaggError::DimensionMismatch(_)));
    }

    #[test]
    fn extrapolation_span_follows_indicator() {
        let y = vec![10.0, 12.0, 11.0, 13.0, 12.5];
        let ind = DMatrix::from_fn(24, 1, |t, _| (t + 1) as f64);
        let m = DisaggregationModel::new(&y, Some(&ind), 4, &spec()).unwrap();
        assert_eq!(m.span(), 24);
    }

    #[test]
    fn non_finite_indicator_tail_truncates_extrapolation() {
        let y = vec![10.0, 12.0, 11.0, 13.0, 12.5];
        let mut ind = DMatrix::from_fn(26, 1, |t, _| (t + 1) as f64);
        // last needed row is 19; row 23 only shortens the forecast span
        ind[(23, 0)] = f64::NAN;
        let m = DisaggregationModel::new(&y, Some(&ind), 4, &spec()).unwrap();
        assert_eq!(m.span(), 23);
    }

    #[test]
    fn non_finite_indicator_inside_the_window_is_rejected() {
        let y = vec![10.0, 12.0, 11.0];
        let mut ind = DMatrix::from_fn(12, 1, |t, _| (t + 1) as f64);
        ind[(5, 0)] = f64::NAN;
        let err = DisaggregationModel::new(&y, Some(&ind), 4, &spec()).unwrap_err();
        assert!(matches!(err, DisaggError::DataError(_)));
    }

    #[test]
    fn nan_values_are_dropped_from_the_grid() {
        let y = vec![10.0, f64::NAN, 11.0, 12.5, 11.8];
        let m = DisaggregationModel::new(&y, None, 4, &spec()).unwrap();
        assert_eq!(m.ny, 4);
        assert!(m.obs.get(7, 0).is_none());
        assert!(m.obs.get(3, 0).is_some());
    }

    #[test]
    fn too_few_observations_rejected_up_front() {
        let y = vec![10.0, 12.0];
        // constant + AR parameter: 2 observations cannot support both
        let err = DisaggregationModel::new(&y, None, 4, &spec()).unwrap_err();
        assert!(matches!(err, DisaggError::InsufficientData { .. }));
    }
}
