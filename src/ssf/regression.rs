//! Time-varying-coefficient regression state space.
//!
//! One regression coefficient following an integrated process of order 1 or
//! 2, loaded by an indicator `w_t`, wrapped in the cumulator. This is the
//! model-based Denton state space: the coefficient is the bi-ratio, its
//! innovation variance is the (optionally position-specific) movement
//! penalty, and the flow is `w_t * b_t`.
//!
//! A second measurement channel observes the coefficient itself at selected
//! positions (fixed bi-ratio constraints).

use nalgebra::{DMatrix, DVector};

use crate::ssf::components::Component;
use crate::ssf::StateSpace;
use crate::types::AggregationType;

pub struct TvRegressionSsf {
    coeff: Component,
    /// Indicator loading w_t, length n.
    w: Vec<f64>,
    /// Innovation variance multiplier per target step, length n.
    shock_var: Vec<f64>,
    /// Positions with a fixed-coefficient observation on channel 1.
    fixed_positions: Vec<usize>,
    n: usize,
    ratio: usize,
    offset: usize,
    aggregation: AggregationType,
}

impl TvRegressionSsf {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        order: usize,
        w: Vec<f64>,
        shock_var: Vec<f64>,
        fixed_positions: Vec<usize>,
        ratio: usize,
        offset: usize,
        aggregation: AggregationType,
    ) -> Self {
        let n = w.len();
        debug_assert_eq!(shock_var.len(), n);
        Self {
            coeff: Component::integrated(order),
            w,
            shock_var,
            fixed_positions,
            n,
            ratio,
            offset,
            aggregation,
        }
    }

    fn m(&self) -> usize {
        self.coeff.dim
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

    fn observation_scale(&self) -> f64 {
        match self.aggregation {
            AggregationType::Average => 1.0 / self.ratio as f64,
            _ => 1.0,
        }
    }

    /// Loading of the benchmarked flow `w_t * b_t`.
    pub fn flow_loading(&self, t: usize) -> DVector<f64> {
        let mut v = DVector::zeros(self.dim());
        v[1] = self.w[t];
        v
    }

    /// Loading of the coefficient (bi-ratio) itself.
    pub fn coefficient_loading(&self) -> DVector<f64> {
        let mut v = DVector::zeros(self.dim());
        v[1] = 1.0;
        v
    }
}

impl StateSpace for TvRegressionSsf {
    fn dim(&self) -> usize {
        1 + self.m()
    }

    fn diffuse_dim(&self) -> usize {
        self.coeff.diffuse_dim()
    }

    fn span(&self) -> usize {
        self.n
    }

    fn channels(&self) -> usize {
        if self.fixed_positions.is_empty() {
            1
        } else {
            2
        }
    }

    fn initial_state(&self) -> DVector<f64> {
        DVector::zeros(self.dim())
    }

    fn initial_cov(&self) -> DMatrix<f64> {
        DMatrix::zeros(self.dim(), self.dim())
    }

    fn diffuse_basis(&self) -> DMatrix<f64> {
        let m = self.m();
        let d = self.coeff.diffuse_dim();
        let mut b = DMatrix::zeros(self.dim(), d);
        for c in 0..d {
            let col = self.coeff.diffuse.column(c).into_owned();
            b[(0, c)] = self.w[0] * self.coeff.loading.dot(&col);
            for i in 0..m {
                b[(1 + i, c)] = self.coeff.diffuse[(i, c)];
            }
        }
        b
    }

    fn transition(&self, t: usize) -> DMatrix<f64> {
        let m = self.m();
        let mut tr = DMatrix::zeros(self.dim(), self.dim());
        tr[(0, 0)] = if self.carries(t) { 1.0 } else { 0.0 };
        let next = (t + 1).min(self.n - 1);
        let zt = self.coeff.loading.transpose() * &self.coeff.transition;
        for i in 0..m {
            tr[(0, 1 + i)] = self.w[next] * zt[(0, i)];
            for j in 0..m {
                tr[(1 + i, 1 + j)] = self.coeff.transition[(i, j)];
            }
        }
        tr
    }

    fn innovation_cov(&self, t: usize) -> DMatrix<f64> {
        let m = self.m();
        let next = (t + 1).min(self.n - 1);
        let q = self.shock_var[next];
        let wn = self.w[next];
        let mut v = DMatrix::zeros(self.dim(), self.dim());
        let vb = &self.coeff.innovation;
        let z = &self.coeff.loading;
        let vz = vb * z;
        v[(0, 0)] = q * wn * wn * z.dot(&vz);
        for i in 0..m {
            v[(0, 1 + i)] = q * wn * vz[i];
            v[(1 + i, 0)] = q * wn * vz[i];
            for j in 0..m {
                v[(1 + i, 1 + j)] = q * vb[(i, j)];
            }
        }
        v
    }

    fn loading(&self, t: usize, channel: usize) -> Option<DVector<f64>> {
        match channel {
            0 => {
                if !self.is_observation_index(t) {
                    return None;
                }
                let mut z = DVector::zeros(self.dim());
                z[0] = self.observation_scale();
                Some(z)
            }
            1 => self
                .fixed_positions
                .contains(&t)
                .then(|| self.coefficient_loading()),
            _ => None,
        }
    }
}
