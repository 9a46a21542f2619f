//! `lr-layer` - Layer lifecycle and composition for layer-runtime.
//!
//! This crate provides:
//! - The `Layer` trait and `LayerCore` state machine (initialize, forward,
//!   failure containment, parameters, save/load)
//! - Batch normalization layers in 1D, 2D and 3D variants
//! - `Network`, a layer that chains registered layers in order

pub mod error;
pub mod layer;
pub mod network;
pub mod norm;
pub mod util;

pub use error::{LayerError, Result};
pub use layer::{Layer, LayerCore};
pub use network::{shared, Network, SharedLayer};
pub use norm::BatchNormLayer;
pub use util::format_with_conjunction;
