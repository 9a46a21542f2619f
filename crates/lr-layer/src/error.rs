use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LayerError {
    #[error("tensor error: {0}")]
    Tensor(#[from] lr_tensor::TensorError),
    #[error("engine error: {0}")]
    Engine(#[from] lr_engine::EngineError),
    #[error("layer `{0}` has not been initialized")]
    NotInitialized(&'static str),
    #[error("input had no data")]
    UndefinedInput,
    #[error("input has a zero-length dimension: {0:?}")]
    ZeroDimension(Vec<i64>),
    #[error("no valid input size has been defined for this layer")]
    NoValidInputSizes,
    #[error("expected {expected} but got {got}D input")]
    InvalidRank { expected: String, got: usize },
    #[error("expected {expected} channels but got {got}")]
    ChannelMismatch { expected: i64, got: i64 },
    #[error("layer `{0}` produced no module")]
    MissingModule(&'static str),
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),
    #[error("child layer {0} is already locked")]
    LayerBusy(usize),
    #[error("panic: {0}")]
    Panic(String),
}

pub type Result<T> = std::result::Result<T, LayerError>;
