//! Diffuse Kalman filtering and smoothing.
//!
//! One pass over a [`StateSpace`] with noise-free scalar measurements,
//! processed sequentially per channel. Three families of strategies cover
//! the diffuse initial conditions:
//!
//! * augmented: carry the diffuse directions explicitly as extra state
//!   columns and remove them by GLS at the end (or collapse them into the
//!   covariance mid-pass for the likelihood fast path);
//! * large-kappa: approximate the diffuse prior with a large finite
//!   variance and burn the first `d` innovations;
//! * square-root: the large-kappa recursion on Cholesky factors.
//!
//! All strategies agree on the likelihood and the smoothed output up to the
//! kappa approximation error.

pub mod augmented;
pub mod diffuse;
pub mod smoother;
pub mod sqrt;

use nalgebra::{DMatrix, DVector};

use crate::error::{DisaggError, Result};
use crate::likelihood::DiffuseLikelihood;
use crate::ssf::StateSpace;
use crate::types::KalmanStrategy;

/// Innovation variances below this are treated as exact (variance-free)
/// observations.
pub(crate) const F_FLOOR: f64 = 1e-10;
/// Prior variance standing in for infinity in the large-kappa strategies.
pub(crate) const KAPPA: f64 = 1e8;

/// Observed values per (time, channel); `None` marks a missing value at a
/// position where the model carries a measurement equation.
#[derive(Debug)]
pub struct Observations {
    data: Vec<Vec<Option<f64>>>,
}

impl Observations {
    pub fn single(values: Vec<Option<f64>>) -> Self {
        Self { data: vec![values] }
    }

    pub fn with_channels(data: Vec<Vec<Option<f64>>>) -> Self {
        Self { data }
    }

    pub fn get(&self, t: usize, channel: usize) -> Option<f64> {
        self.data.get(channel).and_then(|c| c.get(t).copied().flatten())
    }

    /// Number of present values across all channels.
    pub fn n_present(&self) -> usize {
        self.data
            .iter()
            .map(|c| c.iter().filter(|v| v.is_some()).count())
            .sum()
    }
}

/// Predicted moments at the start of step t, before any update at t.
pub(crate) struct StepState {
    pub a: DVector<f64>,
    pub p: DMatrix<f64>,
    /// Diffuse columns A (dim x d); empty for the large-kappa strategies.
    pub aug: DMatrix<f64>,
}

/// One processed scalar observation.
pub(crate) struct ObsUpdate {
    pub t: usize,
    pub e: f64,
    pub f: f64,
    /// C = P z at the moment of the update.
    pub gain: DVector<f64>,
    pub z: DVector<f64>,
    /// E = -A' z; empty for the large-kappa strategies.
    pub eaug: DVector<f64>,
    /// Innovation excluded from the likelihood sums (large-kappa burn-in).
    pub burned: bool,
}

/// Everything a forward pass leaves behind for smoothing and inference.
pub(crate) struct FilterPass {
    pub steps: Vec<StepState>,
    pub updates: Vec<ObsUpdate>,
    /// Sum of e^2 / f over non-burned updates, diffuse part not yet removed.
    pub ssq: f64,
    /// Sum of ln f over non-burned updates.
    pub ldet: f64,
    /// Diffuse information matrix S = sum E E' / f.
    pub s_mat: DMatrix<f64>,
    /// Diffuse cross term s = sum E e / f.
    pub s_vec: DVector<f64>,
    pub nobs: usize,
    pub d: usize,
}

impl FilterPass {
    pub fn check_dof(&self) -> Result<()> {
        if self.nobs <= self.d {
            return Err(DisaggError::InsufficientData {
                required: self.d + 1,
                got: self.nobs,
            });
        }
        Ok(())
    }
}

/// Smoothed state sequence with the diffuse directions resolved.
///
/// Means are in data units; covariances are unit scale and must be
/// multiplied by the concentrated sigma^2.
pub struct Smoothed {
    pub states: Vec<DVector<f64>>,
    pub covs: Vec<DMatrix<f64>>,
    pub likelihood: DiffuseLikelihood,
    /// Standardized one-step innovations (unit scale, chronological), the
    /// floored and burned updates excluded.
    pub innovations: Vec<f64>,
}

/// Profile log-likelihood under the given strategy.
pub fn loglikelihood(
    ssf: &dyn StateSpace,
    obs: &Observations,
    strategy: KalmanStrategy,
) -> Result<DiffuseLikelihood> {
    match strategy {
        KalmanStrategy::Augmented => augmented::likelihood_collapsing(ssf, obs),
        KalmanStrategy::AugmentedNoCollapsing => {
            let pass = augmented::filter(ssf, obs)?;
            augmented::likelihood(&pass, augmented::DeltaSolve::Cholesky)
        }
        KalmanStrategy::AugmentedRobust => {
            let pass = augmented::filter(ssf, obs)?;
            augmented::likelihood(&pass, augmented::DeltaSolve::Robust)
        }
        KalmanStrategy::Diffuse => {
            let pass = diffuse::filter(ssf, obs)?;
            pass.check_dof()?;
            Ok(DiffuseLikelihood::new(pass.ssq, pass.ldet, 0.0, pass.nobs, pass.d))
        }
        KalmanStrategy::SqrtDiffuse => {
            let pass = sqrt::filter(ssf, obs)?;
            pass.check_dof()?;
            Ok(DiffuseLikelihood::new(pass.ssq, pass.ldet, 0.0, pass.nobs, pass.d))
        }
    }
}

/// Filter and smooth under the given strategy.
pub fn smooth(
    ssf: &dyn StateSpace,
    obs: &Observations,
    strategy: KalmanStrategy,
) -> Result<Smoothed> {
    match strategy {
        KalmanStrategy::Augmented | KalmanStrategy::AugmentedNoCollapsing => {
            let pass = augmented::filter(ssf, obs)?;
            smoother::augmented(ssf, &pass, augmented::DeltaSolve::Cholesky)
        }
        KalmanStrategy::AugmentedRobust => {
            let pass = augmented::filter(ssf, obs)?;
            smoother::augmented(ssf, &pass, augmented::DeltaSolve::Robust)
        }
        KalmanStrategy::Diffuse => {
            let pass = diffuse::filter(ssf, obs)?;
            smoother::plain(ssf, pass)
        }
        KalmanStrategy::SqrtDiffuse => {
            let pass = sqrt::filter(ssf, obs)?;
            smoother::plain(ssf, pass)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssf::components::Component;
    use crate::ssf::cumulator::DisaggregationSsf;
    use crate::types::AggregationType;

    fn local_level(n: usize, y: Vec<Option<f64>>) -> (DisaggregationSsf, Observations) {
        let ssf = DisaggregationSsf::new(
            Component::random_walk(false),
            None,
            n,
            2,
            0,
            AggregationType::Last,
        );
        (ssf, Observations::single(y))
    }

    #[test]
    fn strategies_agree_on_local_level_likelihood() {
        let n = 12;
        let mut y = vec![None; n];
        let vals = [1.0, 1.4, 0.9, 1.8, 2.1, 1.7];
        for (j, v) in vals.iter().enumerate() {
            y[2 * j + 1] = Some(*v);
        }
        let (ssf, obs) = local_level(n, y);
        let base = loglikelihood(&ssf, &obs, KalmanStrategy::AugmentedNoCollapsing).unwrap();
        for strategy in KalmanStrategy::ALL {
            let lik = loglikelihood(&ssf, &obs, strategy).unwrap();
            assert!(
                (lik.ll - base.ll).abs() < 1e-3,
                "{:?}: {} vs {}",
                strategy,
                lik.ll,
                base.ll
            );
        }
    }

    #[test]
    fn strategies_agree_on_smoothed_states() {
        let n = 12;
        let mut y = vec![None; n];
        let vals = [1.0, 1.4, 0.9, 1.8, 2.1, 1.7];
        for (j, v) in vals.iter().enumerate() {
            y[2 * j + 1] = Some(*v);
        }
        let (ssf, obs) = local_level(n, y);
        let base = smooth(&ssf, &obs, KalmanStrategy::AugmentedNoCollapsing).unwrap();
        for strategy in KalmanStrategy::ALL {
            let sm = smooth(&ssf, &obs, strategy).unwrap();
            for t in 0..n {
                for i in 0..base.states[t].len() {
                    assert!(
                        (sm.states[t][i] - base.states[t][i]).abs() < 1e-3,
                        "{:?} t={} i={}",
                        strategy,
                        t,
                        i
                    );
                }
            }
        }
    }

    #[test]
    fn too_few_observations_is_an_error() {
        let n = 2;
        let y = vec![None, Some(1.0)];
        let (ssf, obs) = local_level(n, y);
        // one observation against one diffuse direction
        assert!(loglikelihood(&ssf, &obs, KalmanStrategy::Diffuse).is_err());
        assert!(loglikelihood(&ssf, &obs, KalmanStrategy::Augmented).is_err());
    }
}
