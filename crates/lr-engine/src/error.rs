use thiserror::Error;

use crate::kind::{Device, Kind};

/// Errors raised by the engine. Callers above the engine treat these the way
/// a host would treat exceptions thrown from a native library.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("tensor is undefined")]
    UndefinedTensor,
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },
    #[error("cannot broadcast shapes {a:?} and {b:?}")]
    BroadcastError { a: Vec<usize>, b: Vec<usize> },
    #[error("negative dimension {0} in requested sizes")]
    NegativeDimension(i64),
    #[error("expected all tensors to be on the same device, but found {a} and {b}")]
    DeviceMismatch { a: Device, b: Device },
    #[error("{op} is not supported for dtype {kind}")]
    UnsupportedKind { op: &'static str, kind: Kind },
    #[error("only floating point tensors can require gradients, got {0}")]
    RequiresGradNonFloating(Kind),
    #[error("you can only change requires_grad flags of leaf variables")]
    NonLeafRequiresGrad,
    #[error("a leaf tensor that requires grad is being used in an in-place operation")]
    LeafInPlace,
    #[error("element 0 of tensors does not require grad and does not have a grad_fn")]
    NoGradFn,
    #[error("grad can be implicitly created only for scalar outputs")]
    ImplicitGradNonScalar,
    #[error("trying to backward through the graph a second time (or directly access saved tensors after they have already been freed)\nspecify retain_graph=true on the first backward call if you need to backward twice")]
    GraphReleased,
    #[error("expected {expected} input (got {got}D input)")]
    InvalidInputRank { expected: String, got: usize },
    #[error("running_mean should contain {expected} elements not {got}")]
    FeatureMismatch { expected: usize, got: usize },
    #[error("expected more than 1 value per channel when training, got input size {0:?}")]
    SingleValuePerChannel(Vec<usize>),
    #[error("all elements of input should be between 0 and 1")]
    OutOfUnitRange,
    #[error("invalid archive magic: expected 'LRAR', got {0:?}")]
    InvalidMagic([u8; 4]),
    #[error("unsupported archive version: {0}")]
    UnsupportedVersion(u32),
    #[error("unknown dtype id {0} in archive")]
    UnknownKindId(u32),
    #[error("entry '{0}' not found in archive")]
    MissingEntry(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
