//! Temporal disaggregation and benchmarking of time series.
//!
//! Splits low-frequency series into higher-frequency ones (Chow-Lin,
//! Fernandez, Litterman and relatives, plus autoregressive distributed-lag
//! dynamics) and benchmarks high-frequency indicators to low-frequency
//! targets (model-based Denton, growth-rate preservation). Everything is
//! built on one state-space core: a diffuse Kalman filter-smoother with
//! several interchangeable diffuse-handling strategies and a concentrated
//! profile likelihood for the single autoregressive parameter.

pub mod adl;
pub mod batch;
pub mod denton;
pub mod diagnostics;
pub mod disagg;
pub mod error;
pub mod estimator;
pub mod grp;
pub mod kalman;
pub mod likelihood;
pub mod ssf;
pub mod types;

mod linalg;
mod model;

pub use adl::{adl_disaggregate, AdlSpec};
pub use denton::{denton, BenchmarkResult, DentonSpec};
pub use diagnostics::ResidualDiagnostics;
pub use disagg::{disaggregate, interpolate, DisaggregationResult};
pub use error::{DisaggError, Result};
pub use estimator::{ObjectivePoint, RhoEstimate};
pub use grp::{grp, GrowthObjective, GrpResult, GrpSpec};
pub use likelihood::DiffuseLikelihood;
pub use ssf::adl::LagConstraint;
pub use types::{
    AggregationType, EstimationOptions, KalmanStrategy, ResidualModel,
    TemporalDisaggregationSpec,
};
