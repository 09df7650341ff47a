//! Square-root form of the large-kappa filter.
//!
//! The covariance is carried as a lower factor S with P = S S'. The Potter
//! measurement update for a noise-free scalar observation is
//! S <- S - (S v) v' / f with v = S'z and f = v'v; the time update
//! refactors T P T' + V. Numerically this keeps P positive semi-definite
//! where the plain recursion can drift, at the cost of one factorization
//! per step.

use nalgebra::DMatrix;

use crate::error::Result;
use crate::kalman::{FilterPass, ObsUpdate, Observations, StepState, F_FLOOR, KAPPA};
use crate::linalg;
use crate::ssf::StateSpace;

pub(crate) fn filter(ssf: &dyn StateSpace, obs: &Observations) -> Result<FilterPass> {
    let n = ssf.span();
    let dim = ssf.dim();
    let d = ssf.diffuse_dim();

    let mut a = ssf.initial_state();
    let b = ssf.diffuse_basis();
    let mut p0 = ssf.initial_cov() + KAPPA * &b * b.transpose();
    linalg::symmetrize(&mut p0);
    let mut s = linalg::psd_cholesky(&p0, 1e-13);

    let mut steps = Vec::with_capacity(n);
    let mut updates = Vec::new();
    let mut ssq = 0.0;
    let mut ldet = 0.0;
    let mut nobs = 0usize;

    for t in 0..n {
        let p = &s * s.transpose();
        steps.push(StepState {
            a: a.clone(),
            p,
            aug: DMatrix::zeros(dim, 0),
        });

        for ch in 0..ssf.channels() {
            let Some(z) = ssf.loading(t, ch) else { continue };
            let Some(y) = obs.get(t, ch) else { continue };

            let v = s.transpose() * &z;
            let f = v.dot(&v);
            if f <= F_FLOOR {
                continue;
            }
            let c = &s * &v; // = P z
            let e = y - z.dot(&a);

            a += &c * (e / f);
            s -= &c * v.transpose() / f;

            let burned = nobs < d;
            if !burned {
                ssq += e * e / f;
                ldet += f.ln();
            }
            nobs += 1;
            updates.push(ObsUpdate {
                t,
                e,
                f,
                gain: c,
                z,
                eaug: nalgebra::DVector::zeros(0),
                burned,
            });
        }

        if t + 1 < n {
            let tr = ssf.transition(t);
            a = &tr * a;
            let m = &tr * &s;
            let mut p = &m * m.transpose() + ssf.innovation_cov(t);
            linalg::symmetrize(&mut p);
            s = linalg::psd_cholesky(&p, 1e-13);
        }
    }

    Ok(FilterPass {
        steps,
        updates,
        ssq,
        ldet,
        s_mat: DMatrix::zeros(0, 0),
        s_vec: nalgebra::DVector::zeros(0),
        nobs,
        d,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kalman::diffuse;
    use crate::ssf::components::Component;
    use crate::ssf::cumulator::DisaggregationSsf;
    use crate::types::AggregationType;

    #[test]
    fn matches_plain_kappa_filter() {
        let n = 12;
        let ssf = DisaggregationSsf::new(
            Component::litterman(0.4, false),
            None,
            n,
            3,
            0,
            AggregationType::Sum,
        );
        let mut y = vec![None; n];
        for (j, v) in [3.0, 4.5, 4.1, 5.2].iter().enumerate() {
            y[3 * j + 2] = Some(*v);
        }
        let obs = Observations::single(y);
        let plain = diffuse::filter(&ssf, &obs).unwrap();
        let sq = filter(&ssf, &obs).unwrap();
        assert_eq!(plain.nobs, sq.nobs);
        assert!((plain.ssq - sq.ssq).abs() < 1e-6 * (1.0 + plain.ssq.abs()));
        assert!((plain.ldet - sq.ldet).abs() < 1e-6 * (1.0 + plain.ldet.abs()));
        for (u, v) in plain.updates.iter().zip(&sq.updates) {
            assert_eq!(u.burned, v.burned);
            assert!((u.e - v.e).abs() < 1e-6 * (1.0 + u.e.abs()));
        }
    }

    #[test]
    fn factor_reproduces_covariance_after_update() {
        let n = 6;
        let ssf = DisaggregationSsf::new(
            Component::ar1(0.6, false),
            None,
            n,
            2,
            0,
            AggregationType::Sum,
        );
        let y = vec![None, Some(2.0), None, Some(2.4), None, Some(2.2)];
        let obs = Observations::single(y);
        let plain = diffuse::filter(&ssf, &obs).unwrap();
        let sq = filter(&ssf, &obs).unwrap();
        for t in 0..n {
            let dp = &plain.steps[t].p - &sq.steps[t].p;
            assert!(dp.amax() < 1e-8, "t={} diff={}", t, dp.amax());
        }
    }
}
