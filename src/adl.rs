//! Autoregressive distributed lag disaggregation.
//!
//! Unlike the residual-model family, the regression here enters the dynamics
//! of the disaggregated flow itself (`x_{t+1} = phi x_t + b0'X_{t+1} +
//! b1'X_t + e`), so the indicator shapes the short-run adjustment and not
//! only the level.

use nalgebra::DMatrix;

use crate::disagg::{assemble, DisaggregationResult};
use crate::error::{DisaggError, Result};
use crate::estimator::{self, RhoEstimate};
use crate::kalman::{self, Observations};
use crate::likelihood::DiffuseLikelihood;
use crate::model::{mean_abs, usable_span};
use crate::ssf::adl::{AdlSsf, LagConstraint};
use crate::ssf::StateSpace;
use crate::types::{AggregationType, EstimationOptions, KalmanStrategy};

#[derive(Debug, Clone)]
pub struct AdlSpec {
    pub lag: LagConstraint,
    pub aggregation: AggregationType,
    pub offset: usize,
    pub constant: bool,
    pub trend: bool,
    pub estimation: EstimationOptions,
    pub rescale: bool,
    pub strategy: KalmanStrategy,
}

impl Default for AdlSpec {
    fn default() -> Self {
        Self {
            lag: LagConstraint::Same,
            aggregation: AggregationType::Sum,
            offset: 0,
            constant: true,
            trend: false,
            // tighter boundary margin than the residual-model path: the ADL
            // dynamics degrade faster near the unit circle
            estimation: EstimationOptions { eps: 1e-8, ..Default::default() },
            rescale: true,
            strategy: KalmanStrategy::Augmented,
        }
    }
}

struct AdlModel {
    spec: AdlSpec,
    ratio: usize,
    n: usize,
    /// Scaled regressors including generated columns.
    x: DMatrix<f64>,
    yfactor: f64,
    xfactors: Vec<f64>,
    obs: Observations,
    ny: usize,
}

impl AdlModel {
    fn new(
        y: &[f64],
        indicators: Option<&DMatrix<f64>>,
        ratio: usize,
        spec: &AdlSpec,
    ) -> Result<Self> {
        if ratio < 2 {
            return Err(DisaggError::InvalidRatio(format!(
                "low-to-high conversion factor must be >= 2, got {}",
                ratio
            )));
        }
        spec.aggregation.validate(ratio)?;
        if y.is_empty() {
            return Err(DisaggError::DataError("no low-frequency observations".into()));
        }
        let k_gen = usize::from(spec.constant) + usize::from(spec.trend);
        let k_ind = indicators.map_or(0, |x| x.ncols());
        let k = k_gen + k_ind;
        if k == 0 {
            return Err(DisaggError::IncompatibleSpecification(
                "the distributed-lag model needs at least one regressor".into(),
            ));
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

        let mut x = DMatrix::from_fn(n, k, |t, j| {
            if spec.constant && j == 0 {
                1.0
            } else if spec.trend && j == k_gen - 1 {
                t as f64
            } else {
                indicators.expect("k_ind > 0")[(t, j - k_gen)]
            }
        });

        let yfactor = if spec.rescale {
            mean_abs(y.iter().copied().filter(|v| v.is_finite()))
        } else {
            1.0
        };
        let mut xfactors = vec![1.0; k];
        if spec.rescale {
            for j in 0..k {
                let f = mean_abs(x.column(j).iter().copied());
                xfactors[j] = f;
                for t in 0..n {
                    x[(t, j)] /= f;
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
        let d = model.ssf(0.5).diffuse_dim();
        let required = d + 1 + usize::from(spec.estimation.estimate);
        if model.ny < required {
            return Err(DisaggError::InsufficientData { required, got: model.ny });
        }
        Ok(model)
    }

    fn ssf(&self, phi: f64) -> AdlSsf {
        AdlSsf::new(
            phi,
            self.x.clone(),
            self.spec.lag,
            self.ratio,
            self.spec.offset,
            self.spec.aggregation,
        )
    }

    fn likelihood(&self, phi: f64) -> Result<DiffuseLikelihood> {
        kalman::loglikelihood(&self.ssf(phi), &self.obs, self.spec.strategy)
    }

    fn fixed_parameter(&self) -> f64 {
        let p = self.spec.estimation.parameter;
        // an exact unit root is a legitimate fixed choice (random-walk
        // dynamics); reflection would clamp it away
        if p == 1.0 {
            1.0
        } else {
            estimator::reflect(p, self.spec.estimation.lower_bound, self.spec.estimation.eps)
        }
    }
}

/// Disaggregate with autoregressive distributed lag dynamics.
pub fn adl_disaggregate(
    y: &[f64],
    indicators: Option<&DMatrix<f64>>,
    ratio: usize,
    spec: &AdlSpec,
) -> Result<DisaggregationResult> {
    let model = AdlModel::new(y, indicators, ratio, spec)?;

    let est = if spec.estimation.estimate {
        estimator::estimate(|phi| model.likelihood(phi), &spec.estimation)?
    } else {
        let phi = model.fixed_parameter();
        let lik = model.likelihood(phi)?;
        RhoEstimate {
            value: phi,
            stderr: None,
            converged: true,
            iterations: 0,
            objective: lik.adjusted_ssq(),
            curvature: None,
            estimated: false,
        }
    };

    let ssf = model.ssf(est.value);
    let sm = kalman::smooth(&ssf, &model.obs, spec.strategy)?;

    let nc = ssf.n_coeffs();
    let factors: Vec<f64> = match spec.lag {
        LagConstraint::Same => model.xfactors.clone(),
        LagConstraint::Free => {
            // b0 block then b1 block, same per-column factors
            let mut f = model.xfactors.clone();
            f.extend_from_slice(&model.xfactors);
            f
        }
    };
    Ok(assemble(
        |t| ssf.flow_loading(t),
        model.n,
        2..2 + nc,
        &sm,
        model.yfactor,
        &factors,
        Some(est),
    ))
}
