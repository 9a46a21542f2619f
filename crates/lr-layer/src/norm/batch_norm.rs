use std::sync::Arc;

use lr_engine::nn::{BatchNorm, BatchNormDim, BatchNormOptions, Module};
use lr_engine::Kind;
use lr_tensor::Tensor;

use crate::error::{LayerError, Result};
use crate::layer::{Layer, LayerCore};

/// Element kind the normalization itself runs in. The output is converted
/// back to the input's scalar type.
const COMPUTE_KIND: Kind = Kind::BFloat16;

/// Batch normalization over the channel dimension (index 1).
///
/// The three variants differ only in the accepted input rank: 2D or 3D for
/// [`one_d`](Self::one_d), 4D for [`two_d`](Self::two_d) and 5D for
/// [`three_d`](Self::three_d).
#[derive(Debug, Clone)]
pub struct BatchNormLayer {
    core: LayerCore,
    dim: BatchNormDim,
    options: BatchNormOptions,
}

impl BatchNormLayer {
    pub fn new(dim: BatchNormDim, options: BatchNormOptions) -> Self {
        let spatial = match dim {
            BatchNormDim::One => 1,
            BatchNormDim::Two => 2,
            BatchNormDim::Three => 3,
        };
        BatchNormLayer {
            core: LayerCore::new(spatial, dim.valid_ranks().iter().copied()).with_channel_index(1),
            dim,
            options,
        }
    }

    pub fn one_d(options: BatchNormOptions) -> Self {
        BatchNormLayer::new(BatchNormDim::One, options)
    }

    pub fn two_d(options: BatchNormOptions) -> Self {
        BatchNormLayer::new(BatchNormDim::Two, options)
    }

    pub fn three_d(options: BatchNormOptions) -> Self {
        BatchNormLayer::new(BatchNormDim::Three, options)
    }

    pub fn dim(&self) -> BatchNormDim {
        self.dim
    }

    pub fn options(&self) -> &BatchNormOptions {
        &self.options
    }
}

impl Layer for BatchNormLayer {
    fn core(&self) -> &LayerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut LayerCore {
        &mut self.core
    }

    fn kind_name(&self) -> &'static str {
        match self.dim {
            BatchNormDim::One => "BatchNorm1D",
            BatchNormDim::Two => "BatchNorm2D",
            BatchNormDim::Three => "BatchNorm3D",
        }
    }

    fn on_initialize_data(&mut self, _retry: bool) -> Result<()> {
        let module = BatchNorm::new(self.dim, self.options.clone())?;
        self.core.set_module(Some(Arc::new(module)));
        Ok(())
    }

    fn on_forward(&mut self, input: &Tensor) -> Result<Tensor> {
        // The channel always follows the batch dimension, including for
        // 2D input to the 1D variant.
        self.core
            .check_input_sizes(&input.sizes(), self.options.num_features)?;

        let module = self
            .core
            .module()
            .ok_or(LayerError::MissingModule(self.kind_name()))?;
        let data = input.data().ok_or(LayerError::UndefinedInput)?;
        let normalized = module.forward(&data.to_kind(COMPUTE_KIND)?)?;

        let mut output = Tensor::with_scalar_type(input.scalar_type());
        output.set_data(&normalized)?;
        Ok(output)
    }

    fn clone_data(&self) -> Box<dyn Layer> {
        Box::new(self.clone())
    }
}
