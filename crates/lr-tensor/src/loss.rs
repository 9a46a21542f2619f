//! Loss entry points over wrapped tensors.
//!
//! Both functions return an undefined wrapper declared as `result_type`
//! when the operands cannot be broadcast together or the engine rejects
//! them; failures are logged, never returned.

use lr_engine::Shape;

use crate::error::Result;
use crate::scalar::ScalarType;
use crate::tensor::{NativeTensor, Tensor};

/// Expands both operands to their joint broadcast shape.
fn broadcast_pair(output: &NativeTensor, label: &NativeTensor) -> Result<(NativeTensor, NativeTensor)> {
    let joint = Shape::broadcast_shape(&output.shape(), &label.shape())?.sizes();
    Ok((output.broadcast_to(&joint)?, label.broadcast_to(&joint)?))
}

fn compute(
    name: &'static str,
    output: &Tensor,
    label: &Tensor,
    result_type: ScalarType,
    loss: impl FnOnce(&NativeTensor, &NativeTensor) -> lr_engine::Result<NativeTensor>,
) -> Tensor {
    let mut result = Tensor::with_scalar_type(result_type);
    if !output.is_broadcastable_with(label) {
        tracing::warn!(
            loss = name,
            output = ?output.sizes(),
            label = ?label.sizes(),
            "loss operands are not broadcastable"
        );
        return result;
    }
    let (Some(out), Some(lbl)) = (output.data(), label.data()) else {
        return result;
    };
    let computed = broadcast_pair(out, lbl)
        .and_then(|(out, lbl)| loss(&out, &lbl).map_err(Into::into))
        .and_then(|value| result.set_data(&value));
    if let Err(e) = computed {
        tracing::warn!(loss = name, error = %e, "loss computation failed");
    }
    result
}

/// Mean binary cross entropy of predictions `output` against `label`.
pub fn binary_cross_entropy(output: &Tensor, label: &Tensor, result_type: ScalarType) -> Tensor {
    compute("binary_cross_entropy", output, label, result_type, |x, y| {
        x.binary_cross_entropy(y)
    })
}

/// Mean squared error between `output` and `label`.
pub fn mean_square_error(output: &Tensor, label: &Tensor, result_type: ScalarType) -> Tensor {
    compute("mean_square_error", output, label, result_type, |x, y| x.mse_loss(y))
}
