//! The layer state machine shared by every layer kind.
//!
//! A layer starts uninitialized. [`Layer::initialize_data`] runs the
//! kind-specific setup and, if that produced a module, moves the module to
//! the configured default device. [`Layer::forward`] validates the input
//! before handing it to the kind-specific computation. Errors and panics
//! raised by kind-specific code are logged (first line only) and returned
//! as [`LayerError`]s; they never unwind through these methods.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use lr_engine::nn::Module;
use lr_engine::{InputArchive, OutputArchive};
use lr_tensor::{config, DeviceType, Tensor};

use crate::error::{LayerError, Result};
use crate::util::format_with_conjunction;

/// State and validation shared by all layer kinds.
#[derive(Debug, Clone, Default)]
pub struct LayerCore {
    initialized: bool,
    /// Number of trailing spatial dimensions after the channel dimension.
    dimension_count: usize,
    valid_input_sizes: BTreeSet<usize>,
    /// Fixed channel position, overriding the one derived from the rank.
    channel_index: Option<usize>,
    /// Shared with clones made by [`Layer::clone_data`].
    module: Option<Arc<dyn Module>>,
}

impl LayerCore {
    pub fn new(dimension_count: usize, valid_input_sizes: impl IntoIterator<Item = usize>) -> Self {
        LayerCore {
            initialized: false,
            dimension_count,
            valid_input_sizes: valid_input_sizes.into_iter().collect(),
            channel_index: None,
            module: None,
        }
    }

    /// Pins the channel dimension to `index` for every accepted rank.
    pub fn with_channel_index(mut self, index: usize) -> Self {
        self.channel_index = Some(index);
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn dimension_count(&self) -> usize {
        self.dimension_count
    }

    pub fn valid_input_sizes(&self) -> &BTreeSet<usize> {
        &self.valid_input_sizes
    }

    pub fn module(&self) -> Option<&Arc<dyn Module>> {
        self.module.as_ref()
    }

    /// Replaces the module. Only kind-specific initialization should call
    /// this.
    pub fn set_module(&mut self, module: Option<Arc<dyn Module>>) {
        self.module = module;
    }

    /// Checks that `rank` is one of the accepted input ranks.
    pub fn check_input_rank(&self, rank: usize) -> Result<()> {
        if self.valid_input_sizes.is_empty() {
            return Err(LayerError::NoValidInputSizes);
        }
        if !self.valid_input_sizes.contains(&rank) {
            let valid: Vec<usize> = self.valid_input_sizes.iter().copied().collect();
            return Err(LayerError::InvalidRank {
                expected: format_with_conjunction(&valid, ", ", "", "D", " or ", false),
                got: rank,
            });
        }
        Ok(())
    }

    /// Checks the rank and the channel dimension. The channel sits right
    /// before the trailing `dimension_count` spatial dimensions unless a
    /// fixed index was set with [`with_channel_index`](Self::with_channel_index).
    pub fn check_input_sizes(&self, sizes: &[i64], expected_channels: i64) -> Result<()> {
        let rank = sizes.len();
        self.check_input_rank(rank)?;
        let channel_index = match self.channel_index {
            Some(index) => Some(index).filter(|&i| i < rank),
            None => rank.checked_sub(self.dimension_count + 1),
        };
        let channel_index = channel_index.ok_or_else(|| {
            let minimum = self.channel_index.unwrap_or(self.dimension_count) + 1;
            LayerError::InvalidRank {
                expected: format!("at least {}D", minimum),
                got: rank,
            }
        })?;
        let got = sizes[channel_index];
        if got != expected_channels {
            return Err(LayerError::ChannelMismatch {
                expected: expected_channels,
                got,
            });
        }
        Ok(())
    }

    /// [`check_input_rank`](Self::check_input_rank) with the failure logged.
    pub fn are_input_sizes_valid(&self, rank: usize) -> bool {
        self.check_input_rank(rank)
            .inspect_err(|e| tracing::error!(error = %e, "invalid input rank"))
            .is_ok()
    }

    /// [`check_input_sizes`](Self::check_input_sizes) with the failure logged.
    pub fn are_input_sizes_valid_with_channels(&self, sizes: &[i64], expected_channels: i64) -> bool {
        self.check_input_sizes(sizes, expected_channels)
            .inspect_err(|e| tracing::error!(error = %e, ?sizes, "invalid input sizes"))
            .is_ok()
    }
}

/// First line of an error message.
fn first_line(e: &LayerError) -> String {
    e.to_string().lines().next().unwrap_or_default().to_string()
}

/// Runs `f`, turning a panic into [`LayerError::Panic`].
fn contain<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(LayerError::Panic(message))
    })
}

/// A stateful unit of computation mapping one tensor to one tensor.
///
/// Implementors provide the kind-specific hooks; the provided methods carry
/// the lifecycle and validation rules and should not be overridden.
pub trait Layer: Send + Debug {
    fn core(&self) -> &LayerCore;

    fn core_mut(&mut self) -> &mut LayerCore;

    /// Name used in diagnostics, e.g. `BatchNorm2D`.
    fn kind_name(&self) -> &'static str;

    /// Builds the module. Must set it through [`LayerCore::set_module`].
    fn on_initialize_data(&mut self, retry: bool) -> Result<()>;

    fn on_forward(&mut self, input: &Tensor) -> Result<Tensor>;

    /// A new layer with the same configuration and state that shares this
    /// layer's module. Changes to the module through either layer are seen
    /// by both.
    fn clone_data(&self) -> Box<dyn Layer>;

    fn is_initialized(&self) -> bool {
        self.core().is_initialized()
    }

    /// Initializes the layer. Already initialized layers are left alone
    /// unless `retry` is set.
    fn initialize_data(&mut self, retry: bool) -> Result<()> {
        if self.core().is_initialized() && !retry {
            return Ok(());
        }
        let kind = self.kind_name();
        self.core_mut().initialized = false;

        if let Err(e) = contain(|| self.on_initialize_data(retry)) {
            tracing::error!(kind, error = %first_line(&e), "failed to initialize layer");
            return Err(e);
        }
        let Some(module) = self.core().module().cloned() else {
            tracing::error!(kind, "layer module is missing after initialization");
            return Err(LayerError::MissingModule(kind));
        };
        let device = config::get().default_device.to_native()?;
        if let Err(e) = module.to_device(device) {
            tracing::error!(kind, error = %e, ?device, "failed to move layer module to device");
            return Err(e.into());
        }

        self.core_mut().initialized = true;
        tracing::debug!(kind, module = module.name(), ?device, "layer initialized");
        Ok(())
    }

    /// Runs the layer on `input`.
    ///
    /// The input must be defined, have at least one dimension and no
    /// zero-length dimension, and the layer must be initialized.
    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let kind = self.kind_name();
        let sizes = input.sizes();
        if !input.is_defined() || sizes.is_empty() {
            tracing::error!(kind, "input had no data");
            return Err(LayerError::UndefinedInput);
        }
        if sizes.contains(&0) {
            tracing::error!(kind, ?sizes, "input contains a zero-length dimension");
            return Err(LayerError::ZeroDimension(sizes));
        }
        if !self.is_initialized() {
            tracing::error!(kind, "layer has not been initialized");
            return Err(LayerError::NotInitialized(kind));
        }
        contain(|| self.on_forward(input)).inspect_err(|e| {
            tracing::error!(kind, error = %first_line(e), "failed to forward");
        })
    }

    fn are_input_sizes_valid(&self, rank: usize) -> bool {
        self.core().are_input_sizes_valid(rank)
    }

    fn are_input_sizes_valid_with_channels(&self, sizes: &[i64], expected_channels: i64) -> bool {
        self.core()
            .are_input_sizes_valid_with_channels(sizes, expected_channels)
    }

    /// Zeroes, or drops when `set_to_none`, every parameter gradient.
    /// Returns false when there is no module.
    fn set_gradient_to_zero(&self, set_to_none: bool) -> bool {
        let Some(module) = self.core().module() else {
            return false;
        };
        module
            .zero_grad(set_to_none)
            .inspect_err(|e| tracing::warn!(kind = self.kind_name(), error = %e, "zero_grad failed"))
            .is_ok()
    }

    /// Defined parameters of the module by name. The wrappers share the
    /// parameter data, so their gradients follow training.
    fn parameters(&self) -> BTreeMap<String, Tensor> {
        let Some(module) = self.core().module() else {
            return BTreeMap::new();
        };
        module
            .named_parameters()
            .into_iter()
            .filter(|(_, t)| t.defined())
            .map(|(name, t)| (name, Tensor::from_native(t)))
            .collect()
    }

    /// Moves the module's parameters and buffers to `device`.
    fn set_device_type(&self, device: DeviceType) -> Result<()> {
        let device = device.to_native()?;
        if let Some(module) = self.core().module() {
            module.to_device(device)?;
        }
        Ok(())
    }

    fn set_training(&self, training: bool) {
        if let Some(module) = self.core().module() {
            module.set_training(training);
        }
    }

    /// Writes the module to `relative_path` under the content directory.
    fn save_to_file(&self, relative_path: &Path) -> Result<()> {
        let kind = self.kind_name();
        if !self.is_initialized() {
            tracing::warn!(kind, "cannot save an uninitialized layer");
            return Err(LayerError::NotInitialized(kind));
        }
        let module = self.core().module().ok_or(LayerError::MissingModule(kind))?;
        let path = config::get().content_path(relative_path);
        let mut archive = OutputArchive::new();
        module.save(&mut archive)?;
        archive.save_to(&path)?;
        tracing::debug!(kind, path = %path.display(), "saved layer");
        Ok(())
    }

    /// Restores the module from `relative_path` under the content directory.
    fn load_from_file(&self, relative_path: &Path) -> Result<()> {
        let kind = self.kind_name();
        if !self.is_initialized() {
            tracing::warn!(kind, "cannot load into an uninitialized layer");
            return Err(LayerError::NotInitialized(kind));
        }
        let module = self.core().module().ok_or(LayerError::MissingModule(kind))?;
        let path = config::get().content_path(relative_path);
        if !path.is_file() {
            tracing::warn!(kind, path = %path.display(), "layer file does not exist");
            return Err(LayerError::FileNotFound(path));
        }
        let archive = InputArchive::load_from(&path)?;
        module.load(&archive)?;
        tracing::debug!(kind, path = %path.display(), "loaded layer");
        Ok(())
    }
}
