use std::sync::atomic::{AtomicBool, Ordering};

use crate::autograd::BackwardOp;
use crate::error::{EngineError, Result};
use crate::kind::Kind;
use crate::nn::Module;
use crate::shape::Shape;
use crate::storage::CpuStorage;
use crate::tensor::{backend, Options, Tensor, TensorData};

/// Input layout accepted by a [`BatchNorm`] module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchNormDim {
    /// `[N, C]` or `[N, C, L]`.
    One,
    /// `[N, C, H, W]`.
    Two,
    /// `[N, C, D, H, W]`.
    Three,
}

impl BatchNormDim {
    /// Input ranks accepted by this variant.
    pub fn valid_ranks(&self) -> &'static [usize] {
        match self {
            BatchNormDim::One => &[2, 3],
            BatchNormDim::Two => &[4],
            BatchNormDim::Three => &[5],
        }
    }

    fn expected(&self) -> &'static str {
        match self {
            BatchNormDim::One => "2D or 3D",
            BatchNormDim::Two => "4D",
            BatchNormDim::Three => "5D",
        }
    }

    fn module_name(&self) -> &'static str {
        match self {
            BatchNormDim::One => "BatchNorm1d",
            BatchNormDim::Two => "BatchNorm2d",
            BatchNormDim::Three => "BatchNorm3d",
        }
    }
}

/// Options for [`BatchNorm`].
#[derive(Debug, Clone, PartialEq)]
pub struct BatchNormOptions {
    pub num_features: i64,
    pub eps: f64,
    /// Weight of the newest batch in the running statistics. `None` keeps a
    /// cumulative average instead.
    pub momentum: Option<f64>,
    /// Whether the module has a learnable per-channel scale and shift.
    pub affine: bool,
    pub track_running_stats: bool,
}

impl BatchNormOptions {
    pub fn new(num_features: i64) -> Self {
        BatchNormOptions {
            num_features,
            eps: 1e-5,
            momentum: Some(0.1),
            affine: true,
            track_running_stats: true,
        }
    }

    pub fn eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    pub fn momentum(mut self, momentum: Option<f64>) -> Self {
        self.momentum = momentum;
        self
    }

    pub fn affine(mut self, affine: bool) -> Self {
        self.affine = affine;
        self
    }

    pub fn track_running_stats(mut self, track: bool) -> Self {
        self.track_running_stats = track;
        self
    }
}

/// Batch normalization over the channel dimension (index 1).
///
/// In training mode the batch statistics normalize the input and update the
/// running estimates (unbiased variance). In evaluation mode the running
/// estimates are used when they are tracked.
#[derive(Debug)]
pub struct BatchNorm {
    dim: BatchNormDim,
    options: BatchNormOptions,
    weight: Tensor,
    bias: Tensor,
    running_mean: Tensor,
    running_var: Tensor,
    num_batches_tracked: Tensor,
    training: AtomicBool,
}

impl BatchNorm {
    pub fn new(dim: BatchNormDim, options: BatchNormOptions) -> Result<Self> {
        let c = options.num_features;
        if c < 0 {
            return Err(EngineError::NegativeDimension(c));
        }
        let float = Options::default();
        let (weight, bias) = if options.affine {
            (
                Tensor::ones(&[c], float)?.set_requires_grad(true)?,
                Tensor::zeros(&[c], float)?.set_requires_grad(true)?,
            )
        } else {
            (Tensor::undefined(), Tensor::undefined())
        };
        let (running_mean, running_var, num_batches_tracked) = if options.track_running_stats {
            (
                Tensor::zeros(&[c], float)?,
                Tensor::ones(&[c], float)?,
                Tensor::zeros(&[], Options::new(Kind::Int64, float.device))?,
            )
        } else {
            (Tensor::undefined(), Tensor::undefined(), Tensor::undefined())
        };
        tracing::debug!(module = dim.module_name(), num_features = c, "created batch norm");
        Ok(BatchNorm {
            dim,
            options,
            weight,
            bias,
            running_mean,
            running_var,
            num_batches_tracked,
            training: AtomicBool::new(true),
        })
    }

    pub fn dim(&self) -> BatchNormDim {
        self.dim
    }

    pub fn options(&self) -> &BatchNormOptions {
        &self.options
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    pub fn running_mean(&self) -> &Tensor {
        &self.running_mean
    }

    pub fn running_var(&self) -> &Tensor {
        &self.running_var
    }

    /// Resets the running estimates to mean 0 and variance 1.
    pub fn reset_running_stats(&self) -> Result<()> {
        if !self.options.track_running_stats {
            return Ok(());
        }
        let c = self.options.num_features as usize;
        self.running_mean.assign_f64(&vec![0.0; c])?;
        self.running_var.assign_f64(&vec![1.0; c])?;
        self.num_batches_tracked.assign_f64(&[0.0])
    }

    fn check_input(&self, shape: &Shape) -> Result<()> {
        if !self.dim.valid_ranks().contains(&shape.ndim()) {
            return Err(EngineError::InvalidInputRank {
                expected: self.dim.expected().to_string(),
                got: shape.ndim(),
            });
        }
        let channels = shape.dim(1);
        if channels as i64 != self.options.num_features {
            return Err(EngineError::FeatureMismatch {
                expected: self.options.num_features as usize,
                got: channels,
            });
        }
        Ok(())
    }

    /// Factor used to blend the current batch into the running estimates.
    fn average_factor(&self) -> Result<f64> {
        let tracked = self.num_batches_tracked.to_f64_vec()?[0] + 1.0;
        self.num_batches_tracked.assign_f64(&[tracked])?;
        Ok(self.options.momentum.unwrap_or(1.0 / tracked))
    }
}

impl Module for BatchNorm {
    fn name(&self) -> &str {
        self.dim.module_name()
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let x = input.snapshot()?;
        self.check_input(&x.shape)?;
        for param in [&self.weight, &self.bias, &self.running_mean] {
            if let Some(device) = param.device() {
                if device != x.device {
                    return Err(EngineError::DeviceMismatch { a: x.device, b: device });
                }
            }
        }

        let training = self.is_training();
        let batch_stats = training || !self.options.track_running_stats;
        let per_channel = x.shape.numel() / x.shape.dim(1).max(1);
        if training && per_channel <= 1 {
            return Err(EngineError::SingleValuePerChannel(x.shape.dims().to_vec()));
        }

        let values = x.values();
        let eps = self.options.eps;
        let (mean, invstd) = if batch_stats {
            let stats = backend().channel_stats(&values, &x.shape)?;
            if training && self.options.track_running_stats {
                let factor = self.average_factor()?;
                let n = per_channel as f64;
                let blend = |running: &Tensor, batch: &[f64], correction: f64| -> Result<()> {
                    let current = running.to_f64_vec()?;
                    let next: Vec<f64> = current
                        .iter()
                        .zip(batch)
                        .map(|(r, b)| (1.0 - factor) * r + factor * b * correction)
                        .collect();
                    running.assign_f64(&next)
                };
                blend(&self.running_mean, &stats.mean, 1.0)?;
                blend(&self.running_var, &stats.var, n / (n - 1.0))?;
            }
            let invstd = stats.var.iter().map(|v| 1.0 / (v + eps).sqrt()).collect::<Vec<f64>>();
            (stats.mean, invstd)
        } else {
            let invstd = self
                .running_var
                .to_f64_vec()?
                .iter()
                .map(|v| 1.0 / (v + eps).sqrt())
                .collect::<Vec<f64>>();
            (self.running_mean.to_f64_vec()?, invstd)
        };

        let weight = self.weight.defined().then(|| self.weight.to_f64_vec()).transpose()?;
        let bias = self.bias.defined().then(|| self.bias.to_f64_vec()).transpose()?;
        let out = backend().batch_norm_apply(
            &values,
            &x.shape,
            &mean,
            &invstd,
            weight.as_deref(),
            bias.as_deref(),
        )?;
        let kind = x.kind();
        let data = TensorData::new(CpuStorage::from_f64(kind, &out), x.shape.clone(), x.device);
        let grad_op = BatchNormBackward {
            input: values,
            shape: x.shape,
            mean,
            invstd,
            weight,
            batch_stats,
        };
        Ok(Tensor::from_op(
            data,
            grad_op,
            vec![input.clone(), self.weight.clone(), self.bias.clone()],
        ))
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        if !self.options.affine {
            return Vec::new();
        }
        vec![
            ("weight".to_string(), self.weight.clone()),
            ("bias".to_string(), self.bias.clone()),
        ]
    }

    fn named_buffers(&self) -> Vec<(String, Tensor)> {
        if !self.options.track_running_stats {
            return Vec::new();
        }
        vec![
            ("running_mean".to_string(), self.running_mean.clone()),
            ("running_var".to_string(), self.running_var.clone()),
            ("num_batches_tracked".to_string(), self.num_batches_tracked.clone()),
        ]
    }

    fn set_training(&self, training: bool) {
        self.training.store(training, Ordering::Release);
    }

    fn is_training(&self) -> bool {
        self.training.load(Ordering::Acquire)
    }
}

/// Backward of batch normalization. Not itself differentiable.
#[derive(Debug)]
struct BatchNormBackward {
    input: Vec<f64>,
    shape: Shape,
    mean: Vec<f64>,
    invstd: Vec<f64>,
    weight: Option<Vec<f64>>,
    batch_stats: bool,
}

impl BackwardOp for BatchNormBackward {
    fn name(&self) -> &'static str {
        "BatchNormBackward"
    }

    fn apply(&self, grad: &Tensor, inputs: &[Tensor]) -> Result<Vec<Option<Tensor>>> {
        let g = grad.snapshot()?;
        let grads = backend().batch_norm_backward(
            &g.values(),
            &self.input,
            &self.shape,
            &self.mean,
            &self.invstd,
            self.weight.as_deref(),
            self.batch_stats,
        )?;
        let wrap = |values: &[f64], like: &Tensor, shape: Shape| -> Result<Option<Tensor>> {
            if !like.requires_grad() {
                return Ok(None);
            }
            let kind = like.kind().unwrap_or(g.kind());
            let storage = CpuStorage::from_f64(kind, values);
            Ok(Some(Tensor::from_storage(storage, shape, g.device)?))
        };
        let channels = Shape::new(vec![self.mean.len()]);
        Ok(vec![
            wrap(&grads.input, &inputs[0], self.shape.clone())?,
            wrap(&grads.weight, &inputs[1], channels.clone())?,
            wrap(&grads.bias, &inputs[2], channels)?,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn input(values: &[f64], sizes: &[i64]) -> Tensor {
        Tensor::from_slice(values, sizes, Options::default()).unwrap()
    }

    #[test]
    fn test_rank_checks() {
        let bn1 = BatchNorm::new(BatchNormDim::One, BatchNormOptions::new(2)).unwrap();
        let err = bn1.forward(&Tensor::ones(&[1, 2, 2, 2], Options::default()).unwrap());
        assert!(matches!(err, Err(EngineError::InvalidInputRank { got: 4, .. })));

        let bn2 = BatchNorm::new(BatchNormDim::Two, BatchNormOptions::new(2)).unwrap();
        assert!(bn2.forward(&Tensor::ones(&[2, 2], Options::default()).unwrap()).is_err());
        assert!(bn2.forward(&Tensor::rand(&[2, 2, 3, 3], Options::default()).unwrap()).is_ok());
    }

    #[test]
    fn test_feature_mismatch() {
        let bn = BatchNorm::new(BatchNormDim::One, BatchNormOptions::new(3)).unwrap();
        let err = bn.forward(&Tensor::ones(&[4, 2], Options::default()).unwrap());
        assert!(matches!(
            err,
            Err(EngineError::FeatureMismatch { expected: 3, got: 2 })
        ));
    }

    #[test]
    fn test_single_value_per_channel() {
        let bn = BatchNorm::new(BatchNormDim::One, BatchNormOptions::new(2)).unwrap();
        let err = bn.forward(&input(&[1.0, 2.0], &[1, 2]));
        assert!(matches!(err, Err(EngineError::SingleValuePerChannel(_))));
        bn.set_training(false);
        assert!(bn.forward(&input(&[1.0, 2.0], &[1, 2])).is_ok());
    }

    #[test]
    fn test_training_normalizes_and_updates_running_stats() {
        let bn = BatchNorm::new(BatchNormDim::One, BatchNormOptions::new(1)).unwrap();
        let y = bn.forward(&input(&[1.0, 3.0], &[2, 1])).unwrap();
        let out = y.to_f64_vec().unwrap();
        assert_relative_eq!(out[0], -1.0, epsilon = 1e-4);
        assert_relative_eq!(out[1], 1.0, epsilon = 1e-4);

        // mean 2, unbiased variance 2
        assert_relative_eq!(bn.running_mean().to_f64_vec().unwrap()[0], 0.2, epsilon = 1e-6);
        assert_relative_eq!(bn.running_var().to_f64_vec().unwrap()[0], 1.1, epsilon = 1e-6);
    }

    #[test]
    fn test_cumulative_average() {
        let options = BatchNormOptions::new(1).momentum(None);
        let bn = BatchNorm::new(BatchNormDim::One, options).unwrap();
        bn.forward(&input(&[1.0, 3.0], &[2, 1])).unwrap();
        bn.forward(&input(&[5.0, 7.0], &[2, 1])).unwrap();
        assert_relative_eq!(bn.running_mean().to_f64_vec().unwrap()[0], 4.0, epsilon = 1e-6);
        bn.reset_running_stats().unwrap();
        assert_eq!(bn.running_mean().to_f64_vec().unwrap(), vec![0.0]);
    }

    #[test]
    fn test_eval_uses_running_stats() {
        let bn = BatchNorm::new(BatchNormDim::One, BatchNormOptions::new(1).eps(0.0)).unwrap();
        bn.set_training(false);
        let y = bn.forward(&input(&[1.0, 3.0], &[2, 1])).unwrap();
        assert_eq!(y.to_f64_vec().unwrap(), vec![1.0, 3.0]);
    }

    #[test]
    fn test_output_keeps_input_kind() {
        let bn = BatchNorm::new(BatchNormDim::Two, BatchNormOptions::new(2)).unwrap();
        let x = Tensor::rand(&[2, 2, 2, 2], Options::new(Kind::BFloat16, Default::default()))
            .unwrap();
        let y = bn.forward(&x).unwrap();
        assert_eq!(y.kind(), Some(Kind::BFloat16));
        assert_eq!(y.sizes(), x.sizes());
    }

    #[test]
    fn test_backward_reaches_parameters() {
        let bn = BatchNorm::new(BatchNormDim::One, BatchNormOptions::new(2)).unwrap();
        let x = input(&[1.0, 2.0, 3.0, 5.0, 0.0, 1.0], &[3, 2])
            .set_requires_grad(true)
            .unwrap();
        let y = bn.forward(&x).unwrap();
        assert_eq!(y.grad_fn_name(), Some("BatchNormBackward"));
        y.sum().unwrap().backward(None, None, false, &[]).unwrap();

        // d(sum)/d(bias) counts the elements per channel.
        assert_eq!(bn.bias().grad().to_f64_vec().unwrap(), vec![3.0, 3.0]);
        for g in x.grad().to_f64_vec().unwrap() {
            assert_relative_eq!(g, 0.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_parameters_and_buffers() {
        let bn = BatchNorm::new(BatchNormDim::Three, BatchNormOptions::new(4)).unwrap();
        let names: Vec<String> = bn.named_parameters().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["weight", "bias"]);
        assert_eq!(bn.named_buffers().len(), 3);

        let plain = BatchNorm::new(
            BatchNormDim::Three,
            BatchNormOptions::new(4).affine(false).track_running_stats(false),
        )
        .unwrap();
        assert!(plain.named_parameters().is_empty());
        assert!(plain.named_buffers().is_empty());
    }
}
