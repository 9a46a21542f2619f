//! `lr-tensor` - Host-facing tensors for layer-runtime.
//!
//! This crate provides:
//! - The `Tensor` wrapper with broadcasting, byte payloads and gradient calls
//! - `ScalarType` / `DeviceType` and their mapping onto engine kinds
//! - A header-less byte codec for typed arrays
//! - Process-wide runtime configuration (content directory, defaults)
//! - Loss entry points

pub mod codec;
pub mod config;
pub mod element;
pub mod error;
pub mod loss;
pub mod scalar;
pub mod tensor;

pub use config::RuntimeConfig;
pub use element::Element;
pub use error::{Result, TensorError};
pub use loss::{binary_cross_entropy, mean_square_error};
pub use scalar::{DeviceType, ScalarType};
pub use tensor::{NativeTensor, RetainGraphMode, Tensor};
