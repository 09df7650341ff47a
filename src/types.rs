use crate::error::{DisaggError, Result};

/// Rule mapping the high-frequency values of one period to the observed
/// low-frequency value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationType {
    /// Low-frequency value is the sum over the period (flows).
    Sum,
    /// Low-frequency value is the period mean.
    Average,
    /// Low-frequency value is the last value of the period (stocks).
    Last,
    /// Low-frequency value is the first value of the period.
    First,
    /// Low-frequency value is the value at a fixed within-period position.
    UserDefined(usize),
}

impl AggregationType {
    /// Whether the observation is a cumulated flow (Sum/Average) rather than
    /// a sampled point.
    pub fn cumulates(&self) -> bool {
        matches!(self, AggregationType::Sum | AggregationType::Average)
    }

    /// Within-period index (0-based) at which the low-frequency value is
    /// observed.
    pub fn observation_position(&self, ratio: usize) -> usize {
        match self {
            AggregationType::Sum | AggregationType::Average | AggregationType::Last => ratio - 1,
            AggregationType::First => 0,
            AggregationType::UserDefined(k) => *k,
        }
    }

    pub fn validate(&self, ratio: usize) -> Result<()> {
        if let AggregationType::UserDefined(k) = self {
            if *k >= ratio {
                return Err(DisaggError::IncompatibleSpecification(format!(
                    "user-defined observation position {} must be < ratio {}",
                    k, ratio
                )));
            }
        }
        Ok(())
    }
}

/// Residual (noise) model of the regression state-space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResidualModel {
    /// White-noise residual: generalized least squares collapses to OLS.
    WhiteNoise,
    /// AR(1) residual (Chow-Lin).
    Ar1,
    /// Random-walk residual (Fernandez).
    RandomWalk,
    /// ARIMA(1,1,0) residual (Litterman).
    RandomWalkAr1,
    /// Twice-integrated residual.
    I2,
    /// Thrice-integrated residual.
    I3,
}

impl ResidualModel {
    /// Whether the model carries a free autoregressive parameter.
    pub fn has_parameter(&self) -> bool {
        matches!(self, ResidualModel::Ar1 | ResidualModel::RandomWalkAr1)
    }

    /// Differencing order of the residual dynamics.
    pub fn differencing_order(&self) -> usize {
        match self {
            ResidualModel::WhiteNoise | ResidualModel::Ar1 => 0,
            ResidualModel::RandomWalk | ResidualModel::RandomWalkAr1 => 1,
            ResidualModel::I2 => 2,
            ResidualModel::I3 => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ResidualModel::WhiteNoise => "white-noise",
            ResidualModel::Ar1 => "ar1",
            ResidualModel::RandomWalk => "random-walk",
            ResidualModel::RandomWalkAr1 => "random-walk+ar1",
            ResidualModel::I2 => "i2",
            ResidualModel::I3 => "i3",
        }
    }
}

/// Filtering/smoothing strategy of the Kalman engine.
///
/// All strategies produce the same coefficients, series and standard errors up
/// to numerical tolerance. Log-likelihood VALUES are only comparable within a
/// strategy: the kappa-based strategies replace the exact diffuse correction
/// by an initial burn, which shifts the likelihood by a data-independent
/// constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KalmanStrategy {
    /// Augmented filter, diffuse directions collapsed into the state as soon
    /// as their information matrix is well conditioned.
    Augmented,
    /// Augmented filter carrying the diffuse basis over the whole sample.
    AugmentedNoCollapsing,
    /// No-collapsing augmented filter with an SVD-based diffuse solve.
    AugmentedRobust,
    /// Approximate diffuse initialization (large kappa), ordinary filter.
    Diffuse,
    /// Approximate diffuse initialization propagated in square-root form.
    SqrtDiffuse,
}

impl KalmanStrategy {
    pub const ALL: [KalmanStrategy; 5] = [
        KalmanStrategy::Augmented,
        KalmanStrategy::AugmentedNoCollapsing,
        KalmanStrategy::AugmentedRobust,
        KalmanStrategy::Diffuse,
        KalmanStrategy::SqrtDiffuse,
    ];
}

/// Options of the one-parameter maximum-likelihood search.
#[derive(Debug, Clone)]
pub struct EstimationOptions {
    /// Estimate the AR parameter; when false `parameter` is used as-is
    /// (after boundary reflection).
    pub estimate: bool,
    /// Fixed parameter value when `estimate` is false, start value otherwise.
    pub parameter: f64,
    /// Lower truncation bound of the parameter interval (-1 = unrestricted).
    pub lower_bound: f64,
    /// Distance kept from the interval boundaries.
    pub eps: f64,
    /// Relative precision of the objective minimization.
    pub precision: f64,
    /// Iteration cap of the scalar search.
    pub max_iter: u64,
}

impl Default for EstimationOptions {
    fn default() -> Self {
        Self {
            estimate: true,
            parameter: 0.5,
            lower_bound: -1.0,
            eps: 1e-6,
            precision: 1e-9,
            max_iter: 100,
        }
    }
}

/// Specification of a temporal disaggregation / interpolation call.
#[derive(Debug, Clone)]
pub struct TemporalDisaggregationSpec {
    pub model: ResidualModel,
    pub aggregation: AggregationType,
    /// Phase of the first full low-frequency period on the high-frequency
    /// grid.
    pub offset: usize,
    /// Prepend a constant regressor.
    pub constant: bool,
    /// Prepend a linear trend regressor.
    pub trend: bool,
    pub estimation: EstimationOptions,
    /// Divide y and the regressors by their mean absolute value before
    /// estimating (pure conditioning device, results are rescaled back).
    pub rescale: bool,
    /// Start the residual dynamics from an exact zero state instead of a
    /// diffuse/stationary one.
    pub zero_initialization: bool,
    /// Count the regression coefficients in the diffuse likelihood
    /// correction.
    pub diffuse_regressors: bool,
    pub strategy: KalmanStrategy,
}

impl Default for TemporalDisaggregationSpec {
    fn default() -> Self {
        Self {
            model: ResidualModel::Ar1,
            aggregation: AggregationType::Sum,
            offset: 0,
            constant: true,
            trend: false,
            estimation: EstimationOptions::default(),
            rescale: true,
            zero_initialization: false,
            diffuse_regressors: true,
            strategy: KalmanStrategy::Augmented,
        }
    }
}

impl TemporalDisaggregationSpec {
    /// Cross-field validation, run once before any numeric work.
    pub fn validate(&self, ratio: usize) -> Result<()> {
        if ratio < 2 {
            return Err(DisaggError::InvalidRatio(format!(
                "low-to-high conversion factor must be >= 2, got {}",
                ratio
            )));
        }
        self.aggregation.validate(ratio)?;
        if self.constant
            && self.model.differencing_order() > 0
            && !self.zero_initialization
        {
            return Err(DisaggError::IncompatibleSpecification(format!(
                "a constant term together with the {} residual model requires \
                 zero initialization: the constant is not identified under a \
                 diffuse level",
                self.model.name()
            )));
        }
        if self.estimation.lower_bound >= 1.0 {
            return Err(DisaggError::IncompatibleSpecification(format!(
                "parameter lower bound must be < 1, got {}",
                self.estimation.lower_bound
            )));
        }
        Ok(())
    }

    /// Number of generated (constant/trend) regressors.
    pub fn k_generated(&self) -> usize {
        usize::from(self.constant) + usize::from(self.trend)
    }
}
