//! Temporal disaggregation and interpolation entry points.

use nalgebra::{DMatrix, DVector};

use crate::diagnostics::{self, ResidualDiagnostics};
use crate::error::Result;
use crate::estimator::RhoEstimate;
use crate::kalman::Smoothed;
use crate::likelihood::DiffuseLikelihood;
use crate::model::DisaggregationModel;
use crate::ssf::StateSpace;
use crate::types::{AggregationType, TemporalDisaggregationSpec};

/// Maximum Ljung-Box lag order of the residual battery.
const DIAG_LAGS: usize = 8;

/// Output of a disaggregation, interpolation or ADL call.
#[derive(Debug, Clone)]
pub struct DisaggregationResult {
    /// Disaggregated high-frequency series, in data units.
    pub series: Vec<f64>,
    /// Pointwise standard errors of `series`.
    pub stderr: Vec<f64>,
    /// Regression coefficients, in data units (generated columns first).
    pub coefficients: Vec<f64>,
    pub coefficients_cov: DMatrix<f64>,
    /// Profile likelihood in data units.
    pub likelihood: DiffuseLikelihood,
    /// AR parameter search outcome; `None` for models without a parameter.
    pub rho: Option<RhoEstimate>,
    pub diagnostics: Option<ResidualDiagnostics>,
}

/// Disaggregate a low-frequency series to the high-frequency grid.
///
/// `ratio` high-frequency periods form one low-frequency period;
/// `indicators` (optional, n x k) set the high-frequency span and drive the
/// regression part of the model.
pub fn disaggregate(
    y: &[f64],
    indicators: Option<&DMatrix<f64>>,
    ratio: usize,
    spec: &TemporalDisaggregationSpec,
) -> Result<DisaggregationResult> {
    let model = DisaggregationModel::new(y, indicators, ratio, spec)?;
    let rho_est = model.estimate()?;
    let rho = rho_est.map_or(0.0, |e| e.value);
    let sm = model.smooth(rho)?;

    let ssf = model.ssf(rho);
    let dim = ssf.dim();
    let k = model.n_coeffs();
    Ok(assemble(
        |t| ssf.flow_loading(t),
        model.span(),
        dim - k..dim,
        &sm,
        model.yfactor(),
        model.xfactors(),
        rho_est,
    ))
}

/// Interpolate a sampled (stock) series: same machinery with a sampled
/// aggregation rule, defaulting to the last within-period position.
pub fn interpolate(
    y: &[f64],
    indicators: Option<&DMatrix<f64>>,
    ratio: usize,
    spec: &TemporalDisaggregationSpec,
) -> Result<DisaggregationResult> {
    let mut spec = spec.clone();
    if spec.aggregation.cumulates() {
        spec.aggregation = AggregationType::Last;
    }
    disaggregate(y, indicators, ratio, &spec)
}

/// Turn a smoothed pass into a result in data units.
pub(crate) fn assemble(
    flow: impl Fn(usize) -> DVector<f64>,
    n: usize,
    coeff_slots: std::ops::Range<usize>,
    sm: &Smoothed,
    yfactor: f64,
    xfactors: &[f64],
    rho: Option<RhoEstimate>,
) -> DisaggregationResult {
    let sigma2 = sm.likelihood.sigma2();

    let mut series = Vec::with_capacity(n);
    let mut stderr = Vec::with_capacity(n);
    for t in 0..n {
        let w = flow(t);
        series.push(w.dot(&sm.states[t]) * yfactor);
        let var = (sigma2 * w.dot(&(&sm.covs[t] * &w))).max(0.0);
        stderr.push(var.sqrt() * yfactor);
    }

    let k = coeff_slots.len();
    debug_assert_eq!(k, xfactors.len());
    let mut coefficients = Vec::with_capacity(k);
    let mut coefficients_cov = DMatrix::zeros(k, k);
    for (i, si) in coeff_slots.clone().enumerate() {
        coefficients.push(sm.states[0][si] * yfactor / xfactors[i]);
        for (j, sj) in coeff_slots.clone().enumerate() {
            coefficients_cov[(i, j)] = sigma2 * sm.covs[0][(si, sj)] * yfactor * yfactor
                / (xfactors[i] * xfactors[j]);
        }
    }

    let sigma = sigma2.sqrt();
    let standardized: Vec<f64> = sm.innovations.iter().map(|e| e / sigma).collect();
    let diagnostics = diagnostics::compute(&standardized, DIAG_LAGS);

    DisaggregationResult {
        series,
        stderr,
        coefficients,
        coefficients_cov,
        likelihood: sm.likelihood.unscaled(yfactor),
        rho,
        diagnostics,
    }
}
