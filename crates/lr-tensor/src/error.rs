use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum TensorError {
    #[error("engine error: {0}")]
    Engine(#[from] lr_engine::EngineError),
    #[error("scalar type Undefined has no native counterpart")]
    InvalidScalarType,
    #[error("device type Undefined has no native counterpart")]
    InvalidDeviceType,
    #[error("tensor is undefined")]
    Undefined,
    #[error("tensor does not require a gradient")]
    NoGradient,
    #[error("gradient shape {got:?} does not match tensor shape {expected:?}")]
    GradientShapeMismatch { expected: Vec<i64>, got: Vec<i64> },
    #[error("expected {expected} values for sizes {sizes:?}, got {got}")]
    ValueCountMismatch {
        expected: usize,
        got: usize,
        sizes: Vec<i64>,
    },
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, TensorError>;
