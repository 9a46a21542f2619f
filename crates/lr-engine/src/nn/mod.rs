//! Stateful modules built on [`Tensor`].
//!
//! Parameters and buffers are shared tensor handles, so every provided
//! method of [`Module`] works in place through `&self`.

mod batch_norm;
mod passthrough;

pub use batch_norm::{BatchNorm, BatchNormDim, BatchNormOptions};
pub use passthrough::Passthrough;

use std::fmt::Debug;

use crate::archive::{InputArchive, OutputArchive};
use crate::autograd::NoGradGuard;
use crate::error::{EngineError, Result};
use crate::kind::Device;
use crate::tensor::Tensor;

/// A unit of computation with named parameters and buffers.
pub trait Module: Send + Sync + Debug {
    /// Short type name, e.g. `BatchNorm2d`.
    fn name(&self) -> &str;

    fn forward(&self, input: &Tensor) -> Result<Tensor>;

    /// Trainable tensors, keyed by name.
    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        Vec::new()
    }

    /// Non-trainable state such as running statistics.
    fn named_buffers(&self) -> Vec<(String, Tensor)> {
        Vec::new()
    }

    fn set_training(&self, _training: bool) {}

    fn is_training(&self) -> bool {
        false
    }

    /// Moves every parameter and buffer to `device`.
    fn to_device(&self, device: Device) -> Result<()> {
        let _guard = NoGradGuard::new();
        for (_, tensor) in self.named_parameters().into_iter().chain(self.named_buffers()) {
            if tensor.defined() {
                tensor.set_data(&tensor.to_device(device)?)?;
            }
        }
        Ok(())
    }

    /// Clears parameter gradients, dropping them when `set_to_none` is set.
    fn zero_grad(&self, set_to_none: bool) -> Result<()> {
        for (_, param) in self.named_parameters() {
            if param.defined() {
                param.zero_grad(set_to_none)?;
            }
        }
        Ok(())
    }

    /// Writes every defined parameter and buffer under its own name.
    fn save(&self, archive: &mut OutputArchive) -> Result<()> {
        for (name, tensor) in self.named_parameters().into_iter().chain(self.named_buffers()) {
            if tensor.defined() {
                archive.write(&name, &tensor)?;
            }
        }
        Ok(())
    }

    /// Restores parameters and buffers from `archive`, keeping each tensor's
    /// current kind and device.
    ///
    /// Every entry is read and checked before any tensor is replaced, so a
    /// failed load leaves the module unchanged.
    fn load(&self, archive: &InputArchive) -> Result<()> {
        let _guard = NoGradGuard::new();
        let mut staged = Vec::new();
        for (name, tensor) in self.named_parameters().into_iter().chain(self.named_buffers()) {
            if !tensor.defined() {
                continue;
            }
            let stored = archive.read(&name)?;
            if stored.shape() != tensor.shape() {
                return Err(EngineError::ShapeMismatch {
                    expected: tensor.shape().dims().to_vec(),
                    got: stored.shape().dims().to_vec(),
                });
            }
            let kind = tensor.kind().ok_or(EngineError::UndefinedTensor)?;
            let device = tensor.device().unwrap_or_default();
            staged.push((tensor, stored.to_kind(kind)?.to_device(device)?.detach()));
        }
        for (tensor, value) in &staged {
            tensor.set_data(value)?;
        }
        Ok(())
    }
}
