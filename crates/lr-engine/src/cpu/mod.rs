pub mod loss;
pub mod norm;

use crate::backend::{BatchNormGrads, BinaryOp, ChannelStats, ComputeBackend};
use crate::error::{EngineError, Result};
use crate::shape::Shape;

/// Pure-Rust CPU compute backend.
///
/// Implements all operations with straightforward loops optimized for
/// correctness rather than peak performance. Every device placement is
/// executed by this backend.
#[derive(Debug, Clone)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        CpuBackend
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn check_len(what: &str, data: &[f64], shape: &Shape) -> Result<()> {
    if data.len() != shape.numel() {
        return Err(EngineError::Other(format!(
            "{}: data.len()={} but shape {} holds {} elements",
            what,
            data.len(),
            shape,
            shape.numel()
        )));
    }
    Ok(())
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn binary(
        &self,
        op: BinaryOp,
        a: &[f64],
        a_shape: &Shape,
        b: &[f64],
        b_shape: &Shape,
    ) -> Result<(Vec<f64>, Shape)> {
        check_len("binary lhs", a, a_shape)?;
        check_len("binary rhs", b, b_shape)?;

        // Fast path: identical shapes need no index mapping.
        if a_shape == b_shape {
            let out = a.iter().zip(b).map(|(&x, &y)| op.apply(x, y)).collect();
            return Ok((out, a_shape.clone()));
        }

        let out_shape = Shape::broadcast_shape(a_shape, b_shape)?;
        let a_map = a_shape.broadcast_index_map(&out_shape)?;
        let b_map = b_shape.broadcast_index_map(&out_shape)?;
        let out = a_map
            .iter()
            .zip(&b_map)
            .map(|(&i, &j)| op.apply(a[i], b[j]))
            .collect();
        Ok((out, out_shape))
    }

    fn scale(&self, a: &[f64], s: f64) -> Result<Vec<f64>> {
        Ok(a.iter().map(|x| x * s).collect())
    }

    fn broadcast_to(&self, a: &[f64], shape: &Shape, target: &Shape) -> Result<Vec<f64>> {
        check_len("broadcast_to", a, shape)?;
        let map = shape.broadcast_index_map(target)?;
        Ok(map.into_iter().map(|i| a[i]).collect())
    }

    fn sum_to(&self, a: &[f64], shape: &Shape, target: &Shape) -> Result<Vec<f64>> {
        check_len("sum_to", a, shape)?;
        let map = target.broadcast_index_map(shape)?;
        let mut out = vec![0.0; target.numel()];
        for (value, i) in a.iter().zip(map) {
            out[i] += value;
        }
        Ok(out)
    }

    fn eye(&self, n: usize) -> Vec<f64> {
        let mut out = vec![0.0; n * n];
        for i in 0..n {
            out[i * n + i] = 1.0;
        }
        out
    }

    fn channel_stats(&self, x: &[f64], shape: &Shape) -> Result<ChannelStats> {
        check_len("channel_stats", x, shape)?;
        norm::channel_stats(x, shape)
    }

    fn batch_norm_apply(
        &self,
        x: &[f64],
        shape: &Shape,
        mean: &[f64],
        invstd: &[f64],
        weight: Option<&[f64]>,
        bias: Option<&[f64]>,
    ) -> Result<Vec<f64>> {
        check_len("batch_norm", x, shape)?;
        norm::apply(x, shape, mean, invstd, weight, bias)
    }

    fn batch_norm_backward(
        &self,
        grad: &[f64],
        x: &[f64],
        shape: &Shape,
        mean: &[f64],
        invstd: &[f64],
        weight: Option<&[f64]>,
        batch_stats: bool,
    ) -> Result<BatchNormGrads> {
        check_len("batch_norm_backward grad", grad, shape)?;
        check_len("batch_norm_backward input", x, shape)?;
        norm::backward(grad, x, shape, mean, invstd, weight, batch_stats)
    }

    fn binary_cross_entropy(&self, x: &[f64], y: &[f64]) -> Result<f64> {
        loss::binary_cross_entropy(x, y)
    }

    fn binary_cross_entropy_backward(&self, g: f64, x: &[f64], y: &[f64]) -> Result<Vec<f64>> {
        loss::binary_cross_entropy_backward(g, x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> CpuBackend {
        CpuBackend::new()
    }

    #[test]
    fn test_add_same_shape() {
        let b = backend();
        let s = Shape::new(vec![2]);
        let (r, shape) = b.binary(BinaryOp::Add, &[1.0, 2.0], &s, &[3.0, 4.0], &s).unwrap();
        assert_eq!(r, vec![4.0, 6.0]);
        assert_eq!(shape, s);
    }

    #[test]
    fn test_mul_broadcast() {
        let b = backend();
        let (r, shape) = b
            .binary(
                BinaryOp::Mul,
                &[1.0, 2.0],
                &Shape::new(vec![2, 1]),
                &[10.0, 20.0, 30.0],
                &Shape::new(vec![3]),
            )
            .unwrap();
        assert_eq!(shape.dims(), &[2, 3]);
        assert_eq!(r, vec![10.0, 20.0, 30.0, 20.0, 40.0, 60.0]);
    }

    #[test]
    fn test_sub_incompatible() {
        let b = backend();
        assert!(b
            .binary(
                BinaryOp::Sub,
                &[1.0, 2.0],
                &Shape::new(vec![2]),
                &[1.0, 2.0, 3.0],
                &Shape::new(vec![3]),
            )
            .is_err());
    }

    #[test]
    fn test_length_mismatch() {
        let b = backend();
        let s = Shape::new(vec![2]);
        assert!(b.binary(BinaryOp::Add, &[1.0], &s, &[1.0, 2.0], &s).is_err());
    }

    #[test]
    fn test_scale() {
        let b = backend();
        let r = b.scale(&[1.0, 2.0, 3.0], 2.0).unwrap();
        assert_eq!(r, vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_broadcast_then_sum_to() {
        let b = backend();
        let small = Shape::new(vec![1, 3]);
        let big = Shape::new(vec![2, 3]);
        let expanded = b.broadcast_to(&[1.0, 2.0, 3.0], &small, &big).unwrap();
        assert_eq!(expanded, vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0]);
        let reduced = b.sum_to(&expanded, &big, &small).unwrap();
        assert_eq!(reduced, vec![2.0, 4.0, 6.0]);
        let total = b.sum_to(&expanded, &big, &Shape::new(vec![])).unwrap();
        assert_eq!(total, vec![12.0]);
    }

    #[test]
    fn test_eye() {
        assert_eq!(backend().eye(2), vec![1.0, 0.0, 0.0, 1.0]);
    }
}
