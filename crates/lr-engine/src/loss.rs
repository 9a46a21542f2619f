use crate::autograd::BackwardOp;
use crate::error::{EngineError, Result};
use crate::shape::Shape;
use crate::storage::CpuStorage;
use crate::tensor::{backend, Tensor, TensorData};

#[derive(Debug)]
struct BinaryCrossEntropyBackward {
    target: Vec<f64>,
}

impl BackwardOp for BinaryCrossEntropyBackward {
    fn name(&self) -> &'static str {
        "BinaryCrossEntropyBackward"
    }

    fn apply(&self, grad: &Tensor, inputs: &[Tensor]) -> Result<Vec<Option<Tensor>>> {
        let x = inputs[0].snapshot()?;
        let g = grad.to_f64_vec()?.first().copied().unwrap_or(0.0);
        let values = backend().binary_cross_entropy_backward(g, &x.values(), &self.target)?;
        let storage = CpuStorage::from_f64(x.kind(), &values);
        Ok(vec![Some(Tensor::from_storage(storage, x.shape, x.device)?)])
    }
}

impl Tensor {
    /// Mean binary cross entropy between predictions in `[0, 1]` and
    /// `target` of the same shape. Differentiable with respect to `self`.
    pub fn binary_cross_entropy(&self, target: &Tensor) -> Result<Tensor> {
        let x = self.snapshot()?;
        let y = target.snapshot()?;
        if x.shape != y.shape {
            return Err(EngineError::ShapeMismatch {
                expected: x.shape.dims().to_vec(),
                got: y.shape.dims().to_vec(),
            });
        }
        if x.device != y.device {
            return Err(EngineError::DeviceMismatch {
                a: x.device,
                b: y.device,
            });
        }
        if !x.kind().is_floating_point() {
            return Err(EngineError::UnsupportedKind {
                op: "binary_cross_entropy",
                kind: x.kind(),
            });
        }
        let target = y.values();
        let loss = backend().binary_cross_entropy(&x.values(), &target)?;
        let data = TensorData::new(
            CpuStorage::from_f64(x.kind(), &[loss]),
            Shape::default(),
            x.device,
        );
        Ok(Tensor::from_op(
            data,
            BinaryCrossEntropyBackward { target },
            vec![self.clone()],
        ))
    }

    /// Mean squared error with broadcasting between `self` and `target`.
    pub fn mse_loss(&self, target: &Tensor) -> Result<Tensor> {
        let diff = self.sub(target)?;
        diff.mul(&diff)?.mean()
    }
}

#[cfg(test)]
mod tests {
    use crate::error::EngineError;
    use crate::tensor::{Options, Tensor};
    use approx::assert_relative_eq;

    fn float(values: &[f64], sizes: &[i64]) -> Tensor {
        Tensor::from_slice(values, sizes, Options::default()).unwrap()
    }

    #[test]
    fn test_bce_forward_backward() {
        let x = float(&[0.5, 0.5], &[2]).set_requires_grad(true).unwrap();
        let y = float(&[1.0, 0.0], &[2]);
        let loss = x.binary_cross_entropy(&y).unwrap();
        assert!(loss.sizes().is_empty());
        assert_relative_eq!(
            loss.to_f64_vec().unwrap()[0],
            std::f64::consts::LN_2,
            epsilon = 1e-6
        );
        loss.backward(None, None, false, &[]).unwrap();
        let g = x.grad().to_f64_vec().unwrap();
        assert_relative_eq!(g[0], -1.0, epsilon = 1e-6);
        assert_relative_eq!(g[1], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_bce_shape_mismatch() {
        let x = float(&[0.5, 0.5], &[2]);
        let y = float(&[1.0], &[1]);
        assert!(matches!(
            x.binary_cross_entropy(&y),
            Err(EngineError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_mse() {
        let x = float(&[1.0, 2.0, 3.0], &[3]).set_requires_grad(true).unwrap();
        let y = float(&[1.0, 1.0, 1.0], &[3]);
        let loss = x.mse_loss(&y).unwrap();
        assert_relative_eq!(loss.to_f64_vec().unwrap()[0], 5.0 / 3.0, epsilon = 1e-6);
        loss.backward(None, None, false, &[]).unwrap();
        let g = x.grad().to_f64_vec().unwrap();
        assert_relative_eq!(g[1], 2.0 / 3.0, epsilon = 1e-6);
        assert_relative_eq!(g[2], 4.0 / 3.0, epsilon = 1e-6);
    }
}
