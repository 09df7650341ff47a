//! Fixed-interval smoothing.
//!
//! Backward pass in sequential scalar form: each processed observation
//! contributes through L = I - K z', and time steps apply the transposed
//! transition. The plain variant serves the large-kappa filters, where the
//! diffuse prior already sits inside P. The augmented variant additionally
//! carries R, the sensitivity of the weighted innovation sums to delta, so
//! that the smoothed covariance picks up the delta estimation uncertainty:
//!
//!     a_hat_t = a_t + A_t delta_hat + P_t r_t
//!     V_t     = P_t - P_t N_t P_t + (A_t + P_t R_t) Omega (A_t + P_t R_t)'

use nalgebra::{DMatrix, DVector};

use crate::error::Result;
use crate::kalman::augmented::{self, DeltaSolve};
use crate::kalman::{FilterPass, Smoothed};
use crate::likelihood::DiffuseLikelihood;
use crate::linalg;
use crate::ssf::StateSpace;

/// Smoother for the large-kappa passes.
pub(crate) fn plain(ssf: &dyn StateSpace, pass: FilterPass) -> Result<Smoothed> {
    pass.check_dof()?;
    let n = ssf.span();
    let dim = ssf.dim();

    let mut r = DVector::<f64>::zeros(dim);
    let mut nmat = DMatrix::<f64>::zeros(dim, dim);
    let mut states = vec![DVector::zeros(0); n];
    let mut covs = vec![DMatrix::zeros(0, 0); n];
    let mut idx = pass.updates.len();

    for t in (0..n).rev() {
        while idx > 0 && pass.updates[idx - 1].t == t {
            idx -= 1;
            let u = &pass.updates[idx];
            let k = &u.gain / u.f;
            // r <- z e/f + L'r, N <- z z'/f + L'N L
            let l = DMatrix::identity(dim, dim) - &k * u.z.transpose();
            r = &u.z * (u.e / u.f) + l.transpose() * &r;
            nmat = &u.z * u.z.transpose() / u.f + l.transpose() * &nmat * &l;
        }

        let step = &pass.steps[t];
        states[t] = &step.a + &step.p * &r;
        let mut v = &step.p - &step.p * &nmat * &step.p;
        linalg::symmetrize(&mut v);
        covs[t] = v;

        if t > 0 {
            let tr = ssf.transition(t - 1);
            r = tr.transpose() * &r;
            nmat = tr.transpose() * &nmat * &tr;
        }
    }

    let likelihood = DiffuseLikelihood::new(pass.ssq, pass.ldet, 0.0, pass.nobs, pass.d);
    let innovations = pass
        .updates
        .iter()
        .filter(|u| !u.burned)
        .map(|u| u.e / u.f.sqrt())
        .collect();
    Ok(Smoothed { states, covs, likelihood, innovations })
}

/// Smoother for the augmented pass; resolves delta first and smooths
/// conditional on delta_hat.
pub(crate) fn augmented(
    ssf: &dyn StateSpace,
    pass: &FilterPass,
    solve: DeltaSolve,
) -> Result<Smoothed> {
    pass.check_dof()?;
    let res = augmented::resolve(pass, solve)?;
    let n = ssf.span();
    let dim = ssf.dim();
    let d = pass.d;

    let mut r = DVector::<f64>::zeros(dim);
    let mut nmat = DMatrix::<f64>::zeros(dim, dim);
    let mut rmat = DMatrix::<f64>::zeros(dim, d);
    let mut states = vec![DVector::zeros(0); n];
    let mut covs = vec![DMatrix::zeros(0, 0); n];
    let mut idx = pass.updates.len();

    for t in (0..n).rev() {
        while idx > 0 && pass.updates[idx - 1].t == t {
            idx -= 1;
            let u = &pass.updates[idx];
            let etil = u.e + u.eaug.dot(&res.delta);
            let k = &u.gain / u.f;
            let l = DMatrix::identity(dim, dim) - &k * u.z.transpose();
            r = &u.z * ((etil - u.gain.dot(&r)) / u.f) + &r;
            nmat = &u.z * u.z.transpose() / u.f + l.transpose() * &nmat * &l;
            rmat = &u.z * u.eaug.transpose() / u.f + l.transpose() * &rmat;
        }

        let step = &pass.steps[t];
        states[t] = &step.a + &step.aug * &res.delta + &step.p * &r;
        let atil = &step.aug + &step.p * &rmat;
        let mut v = &step.p - &step.p * &nmat * &step.p + &atil * &res.omega * atil.transpose();
        linalg::symmetrize(&mut v);
        covs[t] = v;

        if t > 0 {
            let tr = ssf.transition(t - 1);
            r = tr.transpose() * &r;
            nmat = tr.transpose() * &nmat * &tr;
            rmat = tr.transpose() * &rmat;
        }
    }

    let likelihood = DiffuseLikelihood::new(res.ssq, pass.ldet, res.lddet, pass.nobs, res.rank);
    let innovations = pass
        .updates
        .iter()
        .filter(|u| u.f > crate::kalman::F_FLOOR)
        .map(|u| (u.e + u.eaug.dot(&res.delta)) / u.f.sqrt())
        .collect();
    Ok(Smoothed { states, covs, likelihood, innovations })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kalman::{self, Observations};
    use crate::ssf::components::Component;
    use crate::ssf::cumulator::DisaggregationSsf;
    use crate::ssf::StateSpace;
    use crate::types::{AggregationType, KalmanStrategy};

    #[test]
    fn noise_free_observation_is_reproduced() {
        // white noise observed every step: the smoothed cumulator equals y
        let n = 5;
        let ssf = DisaggregationSsf::new(
            Component::noise(),
            None,
            n,
            1,
            0,
            AggregationType::Last,
        );
        let y = [1.0, -0.5, 0.3, 2.0, -1.0];
        let obs = Observations::single(y.iter().map(|v| Some(*v)).collect());
        let sm = kalman::smooth(&ssf, &obs, KalmanStrategy::AugmentedNoCollapsing).unwrap();
        for t in 0..n {
            assert!((sm.states[t][0] - y[t]).abs() < 1e-10);
            assert!(sm.covs[t][(0, 0)].abs() < 1e-10);
        }
    }

    #[test]
    fn aggregation_is_exact_after_smoothing() {
        let n = 12;
        let ratio = 3;
        let ssf = DisaggregationSsf::new(
            Component::random_walk(false),
            None,
            n,
            ratio,
            0,
            AggregationType::Sum,
        );
        let y_low = [6.0, 9.3, 8.1, 12.0];
        let mut y = vec![None; n];
        for (j, v) in y_low.iter().enumerate() {
            y[ratio * j + ratio - 1] = Some(*v);
        }
        let obs = Observations::single(y);
        for strategy in [KalmanStrategy::AugmentedNoCollapsing, KalmanStrategy::Diffuse] {
            let sm = kalman::smooth(&ssf, &obs, strategy).unwrap();
            for (j, target) in y_low.iter().enumerate() {
                let total: f64 = (0..ratio)
                    .map(|i| {
                        let t = ratio * j + i;
                        ssf.flow_loading(t).dot(&sm.states[t])
                    })
                    .sum();
                let tol = match strategy {
                    KalmanStrategy::Diffuse => 1e-5,
                    _ => 1e-8,
                };
                assert!((total - target).abs() < tol, "{:?} j={} {}", strategy, j, total);
            }
        }
    }

    #[test]
    fn smoothed_variance_vanishes_at_observations() {
        let n = 8;
        let ssf = DisaggregationSsf::new(
            Component::random_walk(false),
            None,
            n,
            4,
            0,
            AggregationType::Last,
        );
        let mut y = vec![None; n];
        y[3] = Some(2.0);
        y[7] = Some(3.0);
        let obs = Observations::single(y);
        let sm = kalman::smooth(&ssf, &obs, KalmanStrategy::AugmentedNoCollapsing).unwrap();
        assert!(sm.covs[3][(0, 0)].abs() < 1e-8);
        assert!(sm.covs[7][(0, 0)].abs() < 1e-8);
        // in between, uncertainty is strictly positive
        assert!(sm.covs[5][(0, 0)] > 1e-6);
    }

    #[test]
    fn filtered_random_walk_holds_last_observation() {
        let n = 8;
        let ssf = DisaggregationSsf::new(
            Component::random_walk(false),
            None,
            n,
            2,
            0,
            AggregationType::Last,
        );
        let mut y = vec![None; n];
        for (j, v) in [1.0, 1.5, 1.2, 1.9].iter().enumerate() {
            y[2 * j + 1] = Some(*v);
        }
        let obs = Observations::single(y);
        let pass = crate::kalman::augmented::filter(&ssf, &obs).unwrap();
        let res = augmented::resolve(&pass, DeltaSolve::Cholesky).unwrap();
        let filt: Vec<_> = pass.steps.iter().map(|s| &s.a + &s.aug * &res.delta).collect();
        // the one-step prediction of a random walk is the last observed value
        assert!((ssf.flow_loading(2).dot(&filt[2]) - 1.0).abs() < 1e-9);
        assert!((ssf.flow_loading(3).dot(&filt[3]) - 1.0).abs() < 1e-9);
        assert!((ssf.flow_loading(4).dot(&filt[4]) - 1.5).abs() < 1e-9);
    }
}
