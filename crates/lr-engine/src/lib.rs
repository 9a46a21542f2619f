//! `lr-engine` - Reference tensor engine for layer-runtime.
//!
//! This crate provides:
//! - A reference-counted `Tensor` handle with kind promotion and broadcasting
//! - A `ComputeBackend` trait and the reference `CpuBackend`
//! - Reverse-mode autograd with `NoGradGuard`
//! - A binary archive format for named tensors
//! - `nn` modules (batch normalization, identity)

pub mod archive;
pub mod autograd;
pub mod backend;
pub mod cpu;
pub mod error;
mod format;
mod grad_fns;
pub mod kind;
mod loss;
pub mod nn;
pub mod random;
pub mod shape;
pub mod storage;
pub mod tensor;

// Re-export primary types at the crate root for convenience.
pub use archive::{InputArchive, OutputArchive};
pub use autograd::{is_grad_enabled, no_grad, NoGradGuard};
pub use backend::ComputeBackend;
pub use cpu::CpuBackend;
pub use error::{EngineError, Result};
pub use kind::{Device, Kind};
pub use random::manual_seed;
pub use shape::Shape;
pub use storage::CpuStorage;
pub use tensor::{Options, Tensor};
