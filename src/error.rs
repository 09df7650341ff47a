use thiserror::Error;

#[derive(Error, Debug)]
pub enum DisaggError {
    #[error("invalid frequency ratio: {0}")]
    InvalidRatio(String),

    #[error("incompatible specification: {0}")]
    IncompatibleSpecification(String),

    #[error("residual model {model} is not supported by {entry}")]
    UnsupportedModel { model: &'static str, entry: &'static str },

    #[error("insufficient data: {required} observations required, got {got}")]
    InsufficientData { required: usize, got: usize },

    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("singular system: {0}")]
    Singular(String),

    #[error("data error: {0}")]
    DataError(String),
}

pub type Result<T> = std::result::Result<T, DisaggError>;
