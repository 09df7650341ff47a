//! Diffuse profile likelihood.
//!
//! The observation scale sigma^2 is concentrated out: with n_eff = nobs - d
//! effective observations, sigma^2 = ssq / n_eff and
//!
//! ll = -0.5 * (n_eff ln 2pi + n_eff + n_eff ln sigma^2 + ldet + lddet)
//!
//! where ldet sums the log innovation variances and lddet is the log
//! determinant of the diffuse information matrix.

use std::f64::consts::PI;

/// Profile log-likelihood of a diffuse state-space model.
#[derive(Debug, Clone, Copy)]
pub struct DiffuseLikelihood {
    pub ll: f64,
    /// Weighted sum of squared innovations, diffuse part removed.
    pub ssq: f64,
    /// Sum of log innovation variances.
    pub ldet: f64,
    /// Log determinant of the diffuse information matrix.
    pub lddet: f64,
    /// Number of processed scalar observations.
    pub nobs: usize,
    /// Number of diffuse directions.
    pub d: usize,
}

impl DiffuseLikelihood {
    pub fn new(ssq: f64, ldet: f64, lddet: f64, nobs: usize, d: usize) -> Self {
        let n_eff = (nobs - d) as f64;
        // a perfect fit has ssq = 0; the floor keeps the log finite
        let sigma2 = (ssq / n_eff).max(1e-300);
        let ll = -0.5 * (n_eff * ((2.0 * PI).ln() + 1.0 + sigma2.ln()) + ldet + lddet);
        Self { ll, ssq, ldet, lddet, nobs, d }
    }

    /// Effective degrees of freedom.
    pub fn dof(&self) -> usize {
        self.nobs - self.d
    }

    /// Concentrated observation variance.
    pub fn sigma2(&self) -> f64 {
        self.ssq / self.dof() as f64
    }

    /// ssq inflated by the determinantal terms; minimizing this over the
    /// model parameter maximizes the profile likelihood.
    pub fn adjusted_ssq(&self) -> f64 {
        let n_eff = self.dof() as f64;
        self.ssq * ((self.ldet + self.lddet) / n_eff).exp()
    }

    /// Likelihood of the unscaled series when the filtered one was divided
    /// by `factor`.
    pub fn unscaled(&self, factor: f64) -> Self {
        Self::new(self.ssq * factor * factor, self.ldet, self.lddet, self.nobs, self.d)
    }

    /// Akaike information criterion; `k` counts the estimated parameters
    /// beyond the concentrated scale.
    pub fn aic(&self, k: usize) -> f64 {
        2.0 * (k + 1) as f64 - 2.0 * self.ll
    }

    pub fn bic(&self, k: usize) -> f64 {
        (self.dof() as f64).ln() * (k + 1) as f64 - 2.0 * self.ll
    }
}
