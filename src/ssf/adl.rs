//! Autoregressive distributed lag state space.
//!
//! The disaggregated flow itself follows
//! `x_{t+1} = phi x_t + b0' X_{t+1} + b1' X_t + e`, so the regressors enter
//! the transition with a one-row shift. The SAME lag constraint imposes
//! `b1 = -phi b0` (the W row collapses to `X_{t+1} - phi X_t` on b0); FREE
//! keeps both coefficient blocks.

use nalgebra::{DMatrix, DVector};

use crate::ssf::StateSpace;
use crate::types::AggregationType;

/// Constraint linking the lagged regression coefficients to the current ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LagConstraint {
    /// b1 = -phi * b0.
    Same,
    /// b0 and b1 free.
    Free,
}

pub struct AdlSsf {
    phi: f64,
    x: DMatrix<f64>,
    lag: LagConstraint,
    n: usize,
    ratio: usize,
    offset: usize,
    aggregation: AggregationType,
}

impl AdlSsf {
    pub fn new(
        phi: f64,
        x: DMatrix<f64>,
        lag: LagConstraint,
        ratio: usize,
        offset: usize,
        aggregation: AggregationType,
    ) -> Self {
        let n = x.nrows();
        Self { phi, x, lag, n, ratio, offset, aggregation }
    }

    fn k(&self) -> usize {
        self.x.ncols()
    }

    pub fn n_coeffs(&self) -> usize {
        match self.lag {
            LagConstraint::Same => self.k(),
            LagConstraint::Free => 2 * self.k(),
        }
    }

    fn unit_root(&self) -> bool {
        (self.phi - 1.0).abs() < 1e-12
    }

    fn carries(&self, t: usize) -> bool {
        if !self.aggregation.cumulates() {
            return false;
        }
        let next = t + 1;
        !(next >= self.offset && (next - self.offset) % self.ratio == 0)
    }

    fn is_observation_index(&self, t: usize) -> bool {
        if t < self.offset {
            return false;
        }
        (t - self.offset) % self.ratio == self.aggregation.observation_position(self.ratio)
    }

    /// W row feeding x_{t+1}: current and one-period-lagged regressor values.
    fn w_row(&self, next: usize) -> DVector<f64> {
        let k = self.k();
        let cur = self.x.row(next);
        let prev = self.x.row(next.saturating_sub(1));
        match self.lag {
            LagConstraint::Same => {
                DVector::from_fn(k, |j, _| cur[j] - self.phi * prev[j])
            }
            LagConstraint::Free => DVector::from_fn(2 * k, |j, _| {
                if j < k {
                    cur[j]
                } else {
                    prev[j - k]
                }
            }),
        }
    }

    /// Diffuse constraint row of the x state on the coefficient directions.
    fn x_diffuse_row(&self) -> DVector<f64> {
        let k = self.k();
        if self.unit_root() {
            // Fernandez-style: x carries its own diffuse direction
            return DVector::zeros(self.n_coeffs());
        }
        // Chow-Lin-style: stationary mean through q = 1/(1-phi)
        let q = 1.0 / (1.0 - self.phi);
        let x0 = self.x.row(0);
        match self.lag {
            LagConstraint::Same => DVector::from_fn(k, |j, _| x0[j]),
            LagConstraint::Free => DVector::from_fn(2 * k, |j, _| q * x0[j % k]),
        }
    }

    /// Loading of the disaggregated flow (the x state itself).
    pub fn flow_loading(&self, _t: usize) -> DVector<f64> {
        let mut v = DVector::zeros(self.dim());
        v[1] = 1.0;
        v
    }
}

impl StateSpace for AdlSsf {
    fn dim(&self) -> usize {
        2 + self.n_coeffs()
    }

    fn diffuse_dim(&self) -> usize {
        self.n_coeffs() + usize::from(self.unit_root())
    }

    fn span(&self) -> usize {
        self.n
    }

    fn initial_state(&self) -> DVector<f64> {
        DVector::zeros(self.dim())
    }

    fn initial_cov(&self) -> DMatrix<f64> {
        let mut p = DMatrix::zeros(self.dim(), self.dim());
        if !self.unit_root() {
            let v = 1.0 / (1.0 - self.phi * self.phi);
            p[(0, 0)] = v;
            p[(0, 1)] = v;
            p[(1, 0)] = v;
            p[(1, 1)] = v;
        }
        p
    }

    fn diffuse_basis(&self) -> DMatrix<f64> {
        let nc = self.n_coeffs();
        let mut b = DMatrix::zeros(self.dim(), self.diffuse_dim());
        let row = self.x_diffuse_row();
        for j in 0..nc {
            b[(0, j)] = row[j];
            b[(1, j)] = row[j];
            b[(2 + j, j)] = 1.0;
        }
        if self.unit_root() {
            b[(0, nc)] = 1.0;
            b[(1, nc)] = 1.0;
        }
        b
    }

    fn transition(&self, t: usize) -> DMatrix<f64> {
        let nc = self.n_coeffs();
        let mut tr = DMatrix::zeros(self.dim(), self.dim());
        let next = (t + 1).min(self.n - 1);
        let w = self.w_row(next);
        tr[(0, 0)] = if self.carries(t) { 1.0 } else { 0.0 };
        tr[(0, 1)] = self.phi;
        tr[(1, 1)] = self.phi;
        for j in 0..nc {
            tr[(0, 2 + j)] = w[j];
            tr[(1, 2 + j)] = w[j];
            tr[(2 + j, 2 + j)] = 1.0;
        }
        tr
    }

    fn innovation_cov(&self, _t: usize) -> DMatrix<f64> {
        let mut v = DMatrix::zeros(self.dim(), self.dim());
        v[(0, 0)] = 1.0;
        v[(0, 1)] = 1.0;
        v[(1, 0)] = 1.0;
        v[(1, 1)] = 1.0;
        v
    }

    fn loading(&self, t: usize, _channel: usize) -> Option<DVector<f64>> {
        if !self.is_observation_index(t) {
            return None;
        }
        let mut z = DVector::zeros(self.dim());
        z[0] = match self.aggregation {
            AggregationType::Average => 1.0 / self.ratio as f64,
            _ => 1.0,
        };
        Some(z)
    }
}
