//! One-parameter maximum-likelihood search.
//!
//! The AR parameter is the only free parameter once the scale is
//! concentrated, so the search is a bounded scalar minimization of the
//! determinant-adjusted sum of squares (a monotone transform of the negative
//! profile likelihood) with Brent's method.

use argmin::core::{CostFunction, Executor, State, TerminationReason};
use argmin::solver::brent::BrentOpt;

use crate::error::{DisaggError, Result};
use crate::likelihood::DiffuseLikelihood;
use crate::types::EstimationOptions;

/// Result of the parameter search (or of the fixed-parameter evaluation).
#[derive(Debug, Clone, Copy)]
pub struct RhoEstimate {
    pub value: f64,
    /// Asymptotic standard error from the objective curvature; `None` when
    /// the parameter was fixed or the curvature is not positive.
    pub stderr: Option<f64>,
    pub converged: bool,
    pub iterations: u64,
    /// Determinant-adjusted ssq at `value`.
    pub objective: f64,
    /// Objective derivatives at `value`; `None` when the parameter was
    /// fixed rather than searched.
    pub curvature: Option<ObjectivePoint>,
    /// Whether the value came out of a search.
    pub estimated: bool,
}

/// Objective value with finite-difference gradient and Hessian at one point.
#[derive(Debug, Clone, Copy)]
pub struct ObjectivePoint {
    /// Determinant-adjusted ssq.
    pub value: f64,
    pub gradient: f64,
    pub hessian: f64,
}

/// Map an out-of-range start value into the open search interval.
///
/// Values beyond the unit circle are reflected through it (1.2 becomes
/// 1/1.2), then clamped `eps` away from the bounds.
pub(crate) fn reflect(mut rho: f64, lower_bound: f64, eps: f64) -> f64 {
    while rho.abs() > 1.0 {
        rho = 1.0 / rho;
    }
    rho.clamp(lower_bound + eps, 1.0 - eps)
}

struct ScalarObjective<'a, F> {
    eval: &'a F,
}

impl<F> CostFunction for ScalarObjective<'_, F>
where
    F: Fn(f64) -> Result<DiffuseLikelihood>,
{
    type Param = f64;
    type Output = f64;

    fn cost(&self, rho: &f64) -> std::result::Result<f64, argmin::core::Error> {
        match (self.eval)(*rho) {
            Ok(lik) => {
                let v = lik.adjusted_ssq();
                if v.is_finite() {
                    Ok(v)
                } else {
                    Ok(f64::MAX / 2.0) // penalty for a degenerate evaluation
                }
            }
            Err(_) => Ok(f64::MAX / 2.0),
        }
    }
}

/// Estimate (or evaluate) the AR parameter.
///
/// `eval` maps a candidate parameter to the profile likelihood of the full
/// model at that parameter.
pub(crate) fn estimate<F>(eval: F, options: &EstimationOptions) -> Result<RhoEstimate>
where
    F: Fn(f64) -> Result<DiffuseLikelihood>,
{
    let lo = options.lower_bound + options.eps;
    let hi = 1.0 - options.eps;

    if !options.estimate {
        let rho = reflect(options.parameter, options.lower_bound, options.eps);
        let lik = eval(rho)?;
        return Ok(RhoEstimate {
            value: rho,
            stderr: None,
            converged: true,
            iterations: 0,
            objective: lik.adjusted_ssq(),
            curvature: None,
            estimated: false,
        });
    }

    let objective = ScalarObjective { eval: &eval };
    let solver = BrentOpt::new(lo, hi).set_tolerance(f64::EPSILON.sqrt(), options.precision);
    let result = Executor::new(objective, solver)
        .configure(|state: argmin::core::IterState<f64, (), (), (), (), f64>| {
            state.max_iters(options.max_iter)
        })
        .run()
        .map_err(|e| DisaggError::Singular(format!("parameter search failed: {}", e)))?;

    let state = result.state();
    let best = *state
        .get_best_param()
        .ok_or_else(|| DisaggError::Singular("parameter search returned no point".into()))?;
    let term_reason = state.get_termination_reason();
    let converged = term_reason == Some(&TerminationReason::SolverConverged)
        || term_reason == Some(&TerminationReason::TargetCostReached);
    let iterations = state.get_iter();

    let lik = eval(best)?;
    let point = curvature(&eval, best, lo, hi)?;
    // map the ssq-scale curvature to the likelihood scale; at the optimum the
    // gradient term drops out
    let n_eff = lik.dof() as f64;
    let hess_ll = -0.5 * (n_eff - 1.0) * point.hessian / point.value;
    let stderr = (hess_ll < 0.0).then(|| (-1.0 / hess_ll).sqrt());

    Ok(RhoEstimate {
        value: best,
        stderr,
        converged,
        iterations,
        objective: point.value,
        curvature: Some(point),
        estimated: true,
    })
}

/// Central-difference gradient and curvature of the adjusted ssq.
fn curvature<F>(eval: &F, rho: f64, lo: f64, hi: f64) -> Result<ObjectivePoint>
where
    F: Fn(f64) -> Result<DiffuseLikelihood>,
{
    let h = f64::EPSILON.powf(1.0 / 3.0) * (1.0 + rho.abs());
    // shrink the step so the stencil stays symmetric inside the interval
    let h = h.min((hi - rho).max(0.0)).min((rho - lo).max(0.0)).max(1e-9);
    let f0 = eval(rho)?.adjusted_ssq();
    let fp = eval(rho + h)?.adjusted_ssq();
    let fm = eval(rho - h)?.adjusted_ssq();
    Ok(ObjectivePoint {
        value: f0,
        gradient: (fp - fm) / (2.0 * h),
        hessian: (fp - 2.0 * f0 + fm) / (h * h),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quadratic(rho: f64) -> Result<DiffuseLikelihood> {
        // adjusted ssq = ssq here (no determinant terms)
        Ok(DiffuseLikelihood::new(1.0 + (rho - 0.4).powi(2), 0.0, 0.0, 22, 1))
    }

    #[test]
    fn reflection() {
        let eps = 1e-6;
        assert!((reflect(1.2, -1.0, eps) - 1.0 / 1.2).abs() < 1e-12);
        assert!((reflect(-3.0, -1.0, eps) + 1.0 / 3.0).abs() < 1e-12);
        assert!((reflect(1.0, -1.0, eps) - (1.0 - eps)).abs() < 1e-12);
        assert!((reflect(-1.0, -1.0, eps) - (-1.0 + eps)).abs() < 1e-12);
        // truncated interval
        assert!((reflect(-0.5, 0.0, eps) - eps).abs() < 1e-12);
    }

    #[test]
    fn finds_quadratic_minimum() {
        let opts = EstimationOptions::default();
        let est = estimate(quadratic, &opts).unwrap();
        assert!(est.estimated);
        assert!((est.value - 0.4).abs() < 1e-5, "{}", est.value);
        assert!((est.objective - 1.0).abs() < 1e-8);
        let se = est.stderr.unwrap();
        // hessian of the objective is 2, n_eff = 21
        let expect = (1.0f64 / (0.5 * 20.0 * 2.0)).sqrt();
        assert!((se - expect).abs() < 1e-3, "{} vs {}", se, expect);
        // full objective point at the optimum
        let point = est.curvature.unwrap();
        assert!((point.value - 1.0).abs() < 1e-8);
        assert!(point.gradient.abs() < 1e-3, "{}", point.gradient);
        assert!((point.hessian - 2.0).abs() < 1e-2, "{}", point.hessian);
    }

    #[test]
    fn fixed_parameter_is_reflected_not_searched() {
        let opts = EstimationOptions {
            estimate: false,
            parameter: 1.2,
            ..Default::default()
        };
        let est = estimate(quadratic, &opts).unwrap();
        assert!(!est.estimated);
        assert_eq!(est.iterations, 0);
        assert!((est.value - 1.0 / 1.2).abs() < 1e-12);
        assert!(est.stderr.is_none());
        assert!(est.curvature.is_none());
    }

    #[test]
    fn respects_truncated_interval() {
        // minimum of the quadratic lies below the truncation bound
        let shifted = |rho: f64| -> Result<DiffuseLikelihood> {
            Ok(DiffuseLikelihood::new(1.0 + (rho + 0.4).powi(2), 0.0, 0.0, 22, 1))
        };
        let opts = EstimationOptions {
            lower_bound: 0.0,
            ..Default::default()
        };
        let est = estimate(shifted, &opts).unwrap();
        assert!(est.value >= 0.0);
        assert!(est.value < 1e-3, "{}", est.value);
    }

    #[test]
    fn curvature_is_unbiased_at_the_interval_bound() {
        // slope of (rho + 0.4)^2 at rho = 0 is 0.8; with the stencil pinned
        // at the bound the central difference halves it
        let shifted = |rho: f64| -> Result<DiffuseLikelihood> {
            Ok(DiffuseLikelihood::new(1.0 + (rho + 0.4).powi(2), 0.0, 0.0, 22, 1))
        };
        let p = curvature(&shifted, 0.0, 0.0, 1.0).unwrap();
        assert!((p.gradient - 0.8).abs() < 1e-4, "{}", p.gradient);
    }
}
