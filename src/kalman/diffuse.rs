//! Large-kappa diffuse filter.
//!
//! The diffuse prior is approximated by a finite variance KAPPA along the
//! diffuse directions: P_0 = P_finite + kappa B B'. The first `d` processed
//! innovations are dominated by the artificial prior and are burned, i.e.
//! excluded from the likelihood sums; the state update still uses them, so
//! by the time the burn-in ends the diffuse directions are resolved up to
//! O(1/kappa).

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
    let mut p = ssf.initial_cov() + KAPPA * &b * b.transpose();
    linalg::symmetrize(&mut p);

    let mut steps = Vec::with_capacity(n);
    let mut updates = Vec::new();
    let mut ssq = 0.0;
    let mut ldet = 0.0;
    let mut nobs = 0usize;

    for t in 0..n {
        steps.push(StepState {
            a: a.clone(),
            p: p.clone(),
            aug: DMatrix::zeros(dim, 0),
        });

        for ch in 0..ssf.channels() {
            let Some(z) = ssf.loading(t, ch) else { continue };
            let Some(y) = obs.get(t, ch) else { continue };

            let e = y - z.dot(&a);
            let c = &p * &z;
            let f = z.dot(&c);
            if f <= F_FLOOR {
                continue;
            }

            let k = &c / f;
            a += &k * e;
            p -= &c * c.transpose() / f;
            linalg::symmetrize(&mut p);

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
            p = &tr * &p * tr.transpose() + ssf.innovation_cov(t);
            linalg::symmetrize(&mut p);
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
