//! State-space model construction: primitive components and the composable
//! wrappers (cumulator, regression augmentation, ADL).

pub mod adl;
pub mod components;
pub mod cumulator;
pub mod regression;

use nalgebra::{DMatrix, DVector};

use crate::types::ResidualModel;
use components::Component;

/// Contract between a composed state-space model and the Kalman engine.
///
/// State equation: a_{t+1} = T(t) a_t + eta_t, Cov(eta_t) = V(t).
/// Observations:   y(t, ch) = Z(t, ch)' a_t, no measurement noise.
/// Initial state:  a_0 = initial_state + B delta, delta diffuse.
pub trait StateSpace {
    /// State dimension.
    fn dim(&self) -> usize;
    /// Number of diffuse directions (columns of B).
    fn diffuse_dim(&self) -> usize;
    /// Number of high-frequency steps.
    fn span(&self) -> usize;
    /// Number of measurement channels.
    fn channels(&self) -> usize {
        1
    }
    fn initial_state(&self) -> DVector<f64>;
    /// Finite part of the initial covariance.
    fn initial_cov(&self) -> DMatrix<f64>;
    /// Diffuse constraint matrix B (dim x diffuse_dim).
    fn diffuse_basis(&self) -> DMatrix<f64>;
    fn transition(&self, t: usize) -> DMatrix<f64>;
    fn innovation_cov(&self, t: usize) -> DMatrix<f64>;
    /// Measurement loading at (t, channel); `None` marks positions without a
    /// measurement equation (e.g. mid-period cumulator states).
    fn loading(&self, t: usize, channel: usize) -> Option<DVector<f64>>;
    fn is_time_invariant(&self) -> bool {
        false
    }
}

/// Build the residual component of a disaggregation model.
pub fn residual_component(model: ResidualModel, rho: f64, zero_init: bool) -> Component {
    match model {
        ResidualModel::WhiteNoise => Component::noise(),
        ResidualModel::Ar1 => Component::ar1(rho, zero_init),
        ResidualModel::RandomWalk => Component::random_walk(zero_init),
        ResidualModel::RandomWalkAr1 => Component::litterman(rho, zero_init),
        ResidualModel::I2 => Component::integrated(2),
        ResidualModel::I3 => Component::integrated(3),
    }
}
