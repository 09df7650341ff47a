//! Augmented diffuse filter.
//!
//! The diffuse directions delta enter the state as a_0 = a + B delta. The
//! filter carries the conditional mean a, the sensitivity columns A (so the
//! mean given delta is a + A delta) and the finite covariance P. Each scalar
//! observation contributes a raw innovation e and a diffuse row E = -A'z;
//! stacking them gives the GLS problem
//!
//!     min_delta sum (e + E' delta)^2 / f
//!
//! solved once at the end: delta_hat = -S^{-1} s with S = sum E E'/f and
//! s = sum E e/f. The minimized sum is ssq - s'S^{-1}s and the diffuse
//! likelihood correction is ln det S.
//!
//! Observations with f below the floor but a nonzero diffuse row are exact
//! constraints on delta; they enter S and s with the floor weight and are
//! excluded from the ln f sum.

use nalgebra::{DMatrix, DVector};

use crate::error::{DisaggError, Result};
use crate::kalman::{FilterPass, ObsUpdate, Observations, StepState, F_FLOOR};
use crate::likelihood::DiffuseLikelihood;
use crate::linalg;
use crate::ssf::StateSpace;

/// How the diffuse information matrix S is inverted.
#[derive(Debug, Clone, Copy)]
pub(crate) enum DeltaSolve {
    /// Cholesky; fails on a singular S.
    Cholesky,
    /// SVD pseudo-inverse; collinear diffuse directions are dropped.
    Robust,
}

/// The resolved diffuse directions of a completed pass.
pub(crate) struct DeltaResolution {
    pub delta: DVector<f64>,
    /// S^{-1}, the unit-scale covariance of delta_hat.
    pub omega: DMatrix<f64>,
    pub lddet: f64,
    /// Identified diffuse directions (equals d unless the solve is robust
    /// and S is rank deficient).
    pub rank: usize,
    /// ssq with the diffuse part removed.
    pub ssq: f64,
}

/// Forward pass without collapsing; keeps everything needed for smoothing.
pub(crate) fn filter(ssf: &dyn StateSpace, obs: &Observations) -> Result<FilterPass> {
    let n = ssf.span();
    let dim = ssf.dim();
    let d = ssf.diffuse_dim();

    let mut a = ssf.initial_state();
    let mut aug = ssf.diffuse_basis();
    let mut p = ssf.initial_cov();

    let mut steps = Vec::with_capacity(n);
    let mut updates = Vec::new();
    let mut ssq = 0.0;
    let mut ldet = 0.0;
    let mut s_mat = DMatrix::zeros(d, d);
    let mut s_vec = DVector::zeros(d);
    let mut nobs = 0usize;

    for t in 0..n {
        steps.push(StepState { a: a.clone(), p: p.clone(), aug: aug.clone() });

        for ch in 0..ssf.channels() {
            let Some(z) = ssf.loading(t, ch) else { continue };
            let Some(y) = obs.get(t, ch) else { continue };

            let e = y - z.dot(&a);
            let eaug = -(aug.transpose() * &z);
            let c = &p * &z;
            let f = z.dot(&c);

            if f > F_FLOOR {
                let k = &c / f;
                a += &k * e;
                aug += &k * eaug.transpose();
                p -= &c * c.transpose() / f;
                linalg::symmetrize(&mut p);
                ssq += e * e / f;
                ldet += f.ln();
                s_mat += &eaug * eaug.transpose() / f;
                s_vec += &eaug * (e / f);
                nobs += 1;
                updates.push(ObsUpdate { t, e, f, gain: c, z, eaug, burned: false });
            } else if eaug.amax() > 1e-12 {
                // exact observation of a diffuse combination
                ssq += e * e / F_FLOOR;
                s_mat += &eaug * eaug.transpose() / F_FLOOR;
                s_vec += &eaug * (e / F_FLOOR);
                nobs += 1;
                updates.push(ObsUpdate {
                    t,
                    e,
                    f: F_FLOOR,
                    gain: DVector::zeros(dim),
                    z,
                    eaug,
                    burned: false,
                });
            }
            // f ~ 0 and no diffuse content: the value is already determined,
            // nothing to update
        }

        if t + 1 < n {
            let tr = ssf.transition(t);
            a = &tr * a;
            aug = &tr * aug;
            p = &tr * &p * tr.transpose() + ssf.innovation_cov(t);
            linalg::symmetrize(&mut p);
        }
    }

    Ok(FilterPass { steps, updates, ssq, ldet, s_mat, s_vec, nobs, d })
}

/// Solve the end-of-pass GLS problem for delta.
pub(crate) fn resolve(pass: &FilterPass, solve: DeltaSolve) -> Result<DeltaResolution> {
    let d = pass.d;
    if d == 0 {
        return Ok(DeltaResolution {
            delta: DVector::zeros(0),
            omega: DMatrix::zeros(0, 0),
            lddet: 0.0,
            rank: 0,
            ssq: pass.ssq,
        });
    }

    let (omega, lddet, rank) = match solve {
        DeltaSolve::Cholesky => {
            let omega = linalg::inverse_spd(&pass.s_mat).ok_or_else(|| {
                DisaggError::Singular("diffuse information matrix is not positive definite".into())
            })?;
            let lddet = linalg::log_det_spd(&pass.s_mat).ok_or_else(|| {
                DisaggError::Singular("diffuse information matrix is not positive definite".into())
            })?;
            (omega, lddet, d)
        }
        DeltaSolve::Robust => {
            let svd = pass.s_mat.clone().svd(true, true);
            let smax = svd.singular_values.iter().cloned().fold(0.0f64, f64::max);
            let cutoff = 1e-12 * smax.max(1.0);
            let rank = svd.singular_values.iter().filter(|&&s| s > cutoff).count();
            let lddet = svd
                .singular_values
                .iter()
                .filter(|&&s| s > cutoff)
                .map(|s| s.ln())
                .sum::<f64>();
            let omega = svd
                .pseudo_inverse(cutoff)
                .map_err(|e| DisaggError::Singular(e.to_string()))?;
            (omega, lddet, rank)
        }
    };

    let delta = -(&omega * &pass.s_vec);
    let ssq = pass.ssq + pass.s_vec.dot(&delta);
    Ok(DeltaResolution { delta, omega, lddet, rank, ssq })
}

pub(crate) fn likelihood(pass: &FilterPass, solve: DeltaSolve) -> Result<DiffuseLikelihood> {
    pass.check_dof()?;
    let res = resolve(pass, solve)?;
    Ok(DiffuseLikelihood::new(res.ssq, pass.ldet, res.lddet, pass.nobs, res.rank))
}

/// Likelihood fast path: once S turns positive definite the diffuse columns
/// are folded into the moments (a += A delta_0, P += A S^{-1} A') and the
/// pass continues as an ordinary filter. Produces the same likelihood as the
/// no-collapse pass but stores nothing.
pub(crate) fn likelihood_collapsing(
    ssf: &dyn StateSpace,
    obs: &Observations,
) -> Result<DiffuseLikelihood> {
    let n = ssf.span();
    let d = ssf.diffuse_dim();

    let mut a = ssf.initial_state();
    let mut aug = ssf.diffuse_basis();
    let mut p = ssf.initial_cov();

    let mut ssq = 0.0;
    let mut ldet = 0.0;
    let mut lddet = 0.0;
    let mut s_mat = DMatrix::zeros(d, d);
    let mut s_vec = DVector::zeros(d);
    let mut nobs = 0usize;
    let mut collapsed = d == 0;

    for t in 0..n {
        for ch in 0..ssf.channels() {
            let Some(z) = ssf.loading(t, ch) else { continue };
            let Some(y) = obs.get(t, ch) else { continue };

            let e = y - z.dot(&a);
            let c = &p * &z;
            let f = z.dot(&c);

            if collapsed {
                if f > F_FLOOR {
                    let k = &c / f;
                    a += &k * e;
                    p -= &c * c.transpose() / f;
                    linalg::symmetrize(&mut p);
                    ssq += e * e / f;
                    ldet += f.ln();
                    nobs += 1;
                }
                continue;
            }

            let eaug = -(aug.transpose() * &z);
            if f > F_FLOOR {
                let k = &c / f;
                a += &k * e;
                aug += &k * eaug.transpose();
                p -= &c * c.transpose() / f;
                linalg::symmetrize(&mut p);
                ssq += e * e / f;
                ldet += f.ln();
                s_mat += &eaug * eaug.transpose() / f;
                s_vec += &eaug * (e / f);
                nobs += 1;
            } else if eaug.amax() > 1e-12 {
                ssq += e * e / F_FLOOR;
                s_mat += &eaug * eaug.transpose() / F_FLOOR;
                s_vec += &eaug * (e / F_FLOOR);
                nobs += 1;
            } else {
                continue;
            }

            if nobs >= d {
                if let Some(omega) = linalg::inverse_spd(&s_mat) {
                    let delta0 = -(&omega * &s_vec);
                    ssq += s_vec.dot(&delta0);
                    lddet = linalg::log_det_spd(&s_mat).unwrap_or(0.0);
                    a += &aug * &delta0;
                    p += &aug * &omega * aug.transpose();
                    linalg::symmetrize(&mut p);
                    collapsed = true;
                }
            }
        }

        if t + 1 < n {
            let tr = ssf.transition(t);
            a = &tr * a;
            p = &tr * &p * tr.transpose() + ssf.innovation_cov(t);
            linalg::symmetrize(&mut p);
            if !collapsed {
                aug = &tr * aug;
            }
        }
    }

    if !collapsed {
        return Err(DisaggError::Singular(
            "diffuse directions could not be resolved from the observations".into(),
        ));
    }
    if nobs <= d {
        return Err(DisaggError::InsufficientData { required: d + 1, got: nobs });
    }
    Ok(DiffuseLikelihood::new(ssq, ldet, lddet, nobs, d))
}
