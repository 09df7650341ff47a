//! Primitive state components: white noise, AR(1), random walk / integrated
//! dynamics, ARIMA(1,1,0).
//!
//! Every component is time invariant and scaled to a unit innovation
//! variance; the observation scale is concentrated out of the likelihood.

use nalgebra::{DMatrix, DVector};

/// A primitive state component: initialization + dynamics + flow loading.
///
/// State equation: s_{t+1} = T s_t + eta_t, Cov(eta) = V = R R'.
/// The flow read by the wrappers is z' s_t.
#[derive(Debug, Clone)]
pub struct Component {
    pub dim: usize,
    /// T
    pub transition: DMatrix<f64>,
    /// V = R R', unit scale
    pub innovation: DMatrix<f64>,
    /// z
    pub loading: DVector<f64>,
    pub initial_mean: DVector<f64>,
    /// Finite part of the initial covariance.
    pub initial_cov: DMatrix<f64>,
    /// Diffuse constraint matrix B (dim x diffuse_dim).
    pub diffuse: DMatrix<f64>,
}

impl Component {
    pub fn diffuse_dim(&self) -> usize {
        self.diffuse.ncols()
    }

    pub fn is_stationary(&self) -> bool {
        self.diffuse.ncols() == 0
    }

    /// White noise: zero transition, unit variance.
    pub fn noise() -> Self {
        Self {
            dim: 1,
            transition: DMatrix::zeros(1, 1),
            innovation: DMatrix::from_element(1, 1, 1.0),
            loading: DVector::from_element(1, 1.0),
            initial_mean: DVector::zeros(1),
            initial_cov: DMatrix::from_element(1, 1, 1.0),
            diffuse: DMatrix::zeros(1, 0),
        }
    }

    /// AR(1): T = rho, stationary variance 1/(1-rho^2) unless
    /// zero-initialized.
    pub fn ar1(rho: f64, zero_init: bool) -> Self {
        let p0 = if zero_init { 0.0 } else { 1.0 / (1.0 - rho * rho) };
        Self {
            dim: 1,
            transition: DMatrix::from_element(1, 1, rho),
            innovation: DMatrix::from_element(1, 1, 1.0),
            loading: DVector::from_element(1, 1.0),
            initial_mean: DVector::zeros(1),
            initial_cov: DMatrix::from_element(1, 1, p0),
            diffuse: DMatrix::zeros(1, 0),
        }
    }

    /// Random walk: T = 1, diffuse level (or exact zero start).
    pub fn random_walk(zero_init: bool) -> Self {
        Self::integrated_init(1, zero_init)
    }

    /// d-times integrated noise: Delta^d u = e.
    ///
    /// State carries [u, Delta u, ..., Delta^{d-1} u]; the transition is the
    /// upper-triangular all-ones matrix and the innovation enters every slot.
    pub fn integrated(order: usize) -> Self {
        Self::integrated_init(order, false)
    }

    fn integrated_init(order: usize, zero_init: bool) -> Self {
        assert!(order >= 1);
        let mut t = DMatrix::zeros(order, order);
        for i in 0..order {
            for j in i..order {
                t[(i, j)] = 1.0;
            }
        }
        let diffuse = if zero_init {
            DMatrix::zeros(order, 0)
        } else {
            DMatrix::identity(order, order)
        };
        Self {
            dim: order,
            transition: t,
            innovation: DMatrix::from_element(order, order, 1.0),
            loading: unit_loading(order),
            initial_mean: DVector::zeros(order),
            initial_cov: DMatrix::zeros(order, order),
            diffuse,
        }
    }

    /// ARIMA(1,1,0): level plus AR(1) difference (Litterman residual).
    ///
    /// State [l, u]: l_{t+1} = l_t + u_{t+1}, u_{t+1} = rho u_t + e, so
    /// T = [[1, rho], [0, rho]] and the innovation loads both slots.
    pub fn litterman(rho: f64, zero_init: bool) -> Self {
        let t = DMatrix::from_row_slice(2, 2, &[1.0, rho, 0.0, rho]);
        let innovation = DMatrix::from_element(2, 2, 1.0);
        let (p0u, diffuse) = if zero_init {
            (0.0, DMatrix::zeros(2, 0))
        } else {
            let mut b = DMatrix::zeros(2, 1);
            b[(0, 0)] = 1.0; // diffuse level
            (1.0 / (1.0 - rho * rho), b)
        };
        let mut p0 = DMatrix::zeros(2, 2);
        p0[(1, 1)] = p0u;
        Self {
            dim: 2,
            transition: t,
            innovation,
            loading: unit_loading(2),
            initial_mean: DVector::zeros(2),
            initial_cov: p0,
            diffuse,
        }
    }
}

fn unit_loading(dim: usize) -> DVector<f64> {
    let mut z = DVector::zeros(dim);
    z[0] = 1.0;
    z
}
