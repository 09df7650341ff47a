//! Cumulator wrapper with fixed-coefficient regression augmentation.
//!
//! The composed state is `[c | s_base (m) | beta (k)]`: slot 0 carries the
//! flow `x_t = z_b' s_t + X_t beta` cumulated since the start of the current
//! aggregation period. The regressor row enters through the transition of the
//! cumulator slot; the measurement reads slot 0 only, at the aggregation
//! type's observation position.

use nalgebra::{DMatrix, DVector};

use crate::ssf::components::Component;
use crate::ssf::StateSpace;
use crate::types::AggregationType;

pub struct DisaggregationSsf {
    base: Component,
    /// High-frequency regressors (n x k), already rescaled.
    x: Option<DMatrix<f64>>,
    n: usize,
    ratio: usize,
    offset: usize,
    aggregation: AggregationType,
}

impl DisaggregationSsf {
    pub fn new(
        base: Component,
        x: Option<DMatrix<f64>>,
        n: usize,
        ratio: usize,
        offset: usize,
        aggregation: AggregationType,
    ) -> Self {
        if let Some(ref x) = x {
            debug_assert_eq!(x.nrows(), n);
        }
        Self { base, x, n, ratio, offset, aggregation }
    }

    pub fn n_coeffs(&self) -> usize {
        self.x.as_ref().map_or(0, |x| x.ncols())
    }

    fn base_dim(&self) -> usize {
        self.base.dim
    }

    /// Whether slot 0 keeps accumulating across step t -> t+1.
    fn carries(&self, t: usize) -> bool {
        if !self.aggregation.cumulates() {
            return false;
        }
        let next = t + 1;
        // reset when t+1 opens a new aggregation period
        !(next >= self.offset && (next - self.offset) % self.ratio == 0)
    }

    /// Observation position of low-frequency period `j`, if it lies inside
    /// the span.
    pub fn observation_index(&self, j: usize) -> Option<usize> {
        let pos = self.offset + j * self.ratio + self.aggregation.observation_position(self.ratio);
        (pos < self.n).then_some(pos)
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

    fn x_row(&self, t: usize) -> Option<nalgebra::RowDVector<f64>> {
        self.x.as_ref().map(|x| x.row(t).into_owned())
    }

    /// Loading of the latent high-frequency flow `x_t` on the composed state.
    pub fn flow_loading(&self, t: usize) -> DVector<f64> {
        let m = self.base_dim();
        let k = self.n_coeffs();
        let mut w = DVector::zeros(1 + m + k);
        for i in 0..m {
            w[1 + i] = self.base.loading[i];
        }
        if let Some(row) = self.x_row(t) {
            for j in 0..k {
                w[1 + m + j] = row[j];
            }
        }
        w
    }
}

impl StateSpace for DisaggregationSsf {
    fn dim(&self) -> usize {
        1 + self.base_dim() + self.n_coeffs()
    }

    fn diffuse_dim(&self) -> usize {
        self.base.diffuse_dim() + self.n_coeffs()
    }

    fn span(&self) -> usize {
        self.n
    }

    fn initial_state(&self) -> DVector<f64> {
        let m = self.base_dim();
        let mut a = DVector::zeros(self.dim());
        a[0] = self.base.loading.dot(&self.base.initial_mean);
        for i in 0..m {
            a[1 + i] = self.base.initial_mean[i];
        }
        a
    }

    fn initial_cov(&self) -> DMatrix<f64> {
        // J P0 J' with J = [z_b'; I; 0]
        let m = self.base_dim();
        let mut p = DMatrix::zeros(self.dim(), self.dim());
        let p0 = &self.base.initial_cov;
        let z = &self.base.loading;
        let pz = p0 * z;
        p[(0, 0)] = z.dot(&pz);
        for i in 0..m {
            p[(0, 1 + i)] = pz[i];
            p[(1 + i, 0)] = pz[i];
            for j in 0..m {
                p[(1 + i, 1 + j)] = p0[(i, j)];
            }
        }
        p
    }

    fn diffuse_basis(&self) -> DMatrix<f64> {
        let m = self.base_dim();
        let k = self.n_coeffs();
        let db = self.base.diffuse_dim();
        let mut b = DMatrix::zeros(self.dim(), db + k);
        // base diffuse directions, mapped through the cumulator row
        for c in 0..db {
            let col = self.base.diffuse.column(c);
            b[(0, c)] = self.base.loading.dot(&col.into_owned());
            for i in 0..m {
                b[(1 + i, c)] = self.base.diffuse[(i, c)];
            }
        }
        // regression coefficients: c_0 = ... + X_0 beta
        if let Some(row) = self.x_row(0) {
            for j in 0..k {
                b[(0, db + j)] = row[j];
                b[(1 + m + j, db + j)] = 1.0;
            }
        }
        b
    }

    fn transition(&self, t: usize) -> DMatrix<f64> {
        let m = self.base_dim();
        let k = self.n_coeffs();
        let mut tr = DMatrix::zeros(self.dim(), self.dim());
        tr[(0, 0)] = if self.carries(t) { 1.0 } else { 0.0 };
        // row 0: z_b' T_b on the base block, X_{t+1} on the coefficients
        let zt = self.base.loading.transpose() * &self.base.transition;
        for i in 0..m {
            tr[(0, 1 + i)] = zt[(0, i)];
            for j in 0..m {
                tr[(1 + i, 1 + j)] = self.base.transition[(i, j)];
            }
        }
        if k > 0 {
            let next = (t + 1).min(self.n - 1);
            if let Some(row) = self.x_row(next) {
                for j in 0..k {
                    tr[(0, 1 + m + j)] = row[j];
                }
            }
        }
        for j in 0..k {
            tr[(1 + m + j, 1 + m + j)] = 1.0;
        }
        tr
    }

    fn innovation_cov(&self, _t: usize) -> DMatrix<f64> {
        let m = self.base_dim();
        let mut v = DMatrix::zeros(self.dim(), self.dim());
        let vb = &self.base.innovation;
        let z = &self.base.loading;
        let vz = vb * z;
        v[(0, 0)] = z.dot(&vz);
        for i in 0..m {
            v[(0, 1 + i)] = vz[i];
            v[(1 + i, 0)] = vz[i];
            for j in 0..m {
                v[(1 + i, 1 + j)] = vb[(i, j)];
            }
        }
        v
    }

    fn loading(&self, t: usize, _channel: usize) -> Option<DVector<f64>> {
        if !self.is_observation_index(t) {
            return None;
        }
        let mut z = DVector::zeros(self.dim());
        z[0] = self.observation_scale();
        Some(z)
    }
}
