use std::fmt::Debug;

use crate::error::Result;
use crate::shape::Shape;

/// Element-wise binary operations understood by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
}

impl BinaryOp {
    pub fn apply(&self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
        }
    }
}

/// Per-channel statistics for batch normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelStats {
    /// Mean of every channel.
    pub mean: Vec<f64>,
    /// Biased (population) variance of every channel.
    pub var: Vec<f64>,
}

/// Gradients produced by the batch normalization backward kernel.
#[derive(Debug, Clone)]
pub struct BatchNormGrads {
    pub input: Vec<f64>,
    pub weight: Vec<f64>,
    pub bias: Vec<f64>,
}

/// Trait for pluggable compute backends.
///
/// Kernels work on row-major f64 slices: tensors widen their storage before
/// dispatch and narrow the result back to the output kind. Data is passed in
/// as slices and returned as owned vectors.
pub trait ComputeBackend: Send + Sync + Debug {
    /// Returns the name of this backend (e.g., "cpu").
    fn name(&self) -> &str;

    /// Element-wise binary op with numpy-style broadcasting.
    ///
    /// Returns the result values and the broadcast shape.
    fn binary(
        &self,
        op: BinaryOp,
        a: &[f64],
        a_shape: &Shape,
        b: &[f64],
        b_shape: &Shape,
    ) -> Result<(Vec<f64>, Shape)>;

    /// Scalar multiplication: result[i] = a[i] * s.
    fn scale(&self, a: &[f64], s: f64) -> Result<Vec<f64>>;

    /// Expand `a` (of `shape`) to `target` by repeating stretched dimensions.
    fn broadcast_to(&self, a: &[f64], shape: &Shape, target: &Shape) -> Result<Vec<f64>>;

    /// Reduce `a` (of `shape`) by summation so that it has shape `target`.
    /// `target` must expand to `shape`.
    fn sum_to(&self, a: &[f64], shape: &Shape, target: &Shape) -> Result<Vec<f64>>;

    /// Identity matrix of size n x n.
    fn eye(&self, n: usize) -> Vec<f64>;

    /// Per-channel mean and biased variance of an input laid out as
    /// [N, C, *spatial].
    fn channel_stats(&self, x: &[f64], shape: &Shape) -> Result<ChannelStats>;

    /// Apply `(x - mean) * invstd * weight + bias` per channel.
    ///
    /// A missing weight acts as ones and a missing bias as zeros.
    fn batch_norm_apply(
        &self,
        x: &[f64],
        shape: &Shape,
        mean: &[f64],
        invstd: &[f64],
        weight: Option<&[f64]>,
        bias: Option<&[f64]>,
    ) -> Result<Vec<f64>>;

    /// Backward of [`ComputeBackend::batch_norm_apply`].
    ///
    /// With `batch_stats` set, `mean`/`invstd` are treated as functions of
    /// the input (training mode); otherwise they are constants.
    #[allow(clippy::too_many_arguments)]
    fn batch_norm_backward(
        &self,
        grad: &[f64],
        x: &[f64],
        shape: &Shape,
        mean: &[f64],
        invstd: &[f64],
        weight: Option<&[f64]>,
        batch_stats: bool,
    ) -> Result<BatchNormGrads>;

    /// Mean binary cross entropy of predictions `x` against labels `y`.
    fn binary_cross_entropy(&self, x: &[f64], y: &[f64]) -> Result<f64>;

    /// Gradient of [`ComputeBackend::binary_cross_entropy`] with respect to `x`,
    /// scaled by the incoming scalar gradient `g`.
    fn binary_cross_entropy_backward(&self, g: f64, x: &[f64], y: &[f64]) -> Result<Vec<f64>>;
}
