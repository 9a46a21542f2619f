use crate::backend::{BatchNormGrads, ChannelStats};
use crate::error::{EngineError, Result};
use crate::shape::Shape;

/// Splits an [N, C, *spatial] shape into (batch, channels, inner) counts.
fn layout(shape: &Shape) -> Result<(usize, usize, usize)> {
    if shape.ndim() < 2 {
        return Err(EngineError::InvalidInputRank {
            expected: "at least 2D".to_string(),
            got: shape.ndim(),
        });
    }
    let dims = shape.dims();
    Ok((dims[0], dims[1], dims[2..].iter().product()))
}

fn check_channels(what: &str, values: &[f64], channels: usize) -> Result<()> {
    if values.len() != channels {
        return Err(EngineError::Other(format!(
            "{} has {} elements but the input has {} channels",
            what,
            values.len(),
            channels
        )));
    }
    Ok(())
}

/// Calls `f(channel, flat_index)` for every element, channel-major within
/// each batch entry.
fn for_each(shape: (usize, usize, usize), mut f: impl FnMut(usize, usize)) {
    let (n, c, inner) = shape;
    for b in 0..n {
        for ch in 0..c {
            let base = (b * c + ch) * inner;
            for i in base..base + inner {
                f(ch, i);
            }
        }
    }
}

pub fn channel_stats(x: &[f64], shape: &Shape) -> Result<ChannelStats> {
    let dims = layout(shape)?;
    let (n, c, inner) = dims;
    let count = (n * inner) as f64;
    if count == 0.0 {
        return Ok(ChannelStats {
            mean: vec![f64::NAN; c],
            var: vec![f64::NAN; c],
        });
    }

    let mut mean = vec![0.0; c];
    for_each(dims, |ch, i| mean[ch] += x[i]);
    mean.iter_mut().for_each(|m| *m /= count);

    let mut var = vec![0.0; c];
    for_each(dims, |ch, i| {
        let d = x[i] - mean[ch];
        var[ch] += d * d;
    });
    var.iter_mut().for_each(|v| *v /= count);

    Ok(ChannelStats { mean, var })
}

pub fn apply(
    x: &[f64],
    shape: &Shape,
    mean: &[f64],
    invstd: &[f64],
    weight: Option<&[f64]>,
    bias: Option<&[f64]>,
) -> Result<Vec<f64>> {
    let dims = layout(shape)?;
    let c = dims.1;
    check_channels("mean", mean, c)?;
    check_channels("invstd", invstd, c)?;
    if let Some(w) = weight {
        check_channels("weight", w, c)?;
    }
    if let Some(b) = bias {
        check_channels("bias", b, c)?;
    }

    let mut out = vec![0.0; x.len()];
    for_each(dims, |ch, i| {
        let w = weight.map_or(1.0, |w| w[ch]);
        let b = bias.map_or(0.0, |b| b[ch]);
        out[i] = (x[i] - mean[ch]) * invstd[ch] * w + b;
    });
    Ok(out)
}

pub fn backward(
    grad: &[f64],
    x: &[f64],
    shape: &Shape,
    mean: &[f64],
    invstd: &[f64],
    weight: Option<&[f64]>,
    batch_stats: bool,
) -> Result<BatchNormGrads> {
    let dims = layout(shape)?;
    let (n, c, inner) = dims;
    check_channels("mean", mean, c)?;
    check_channels("invstd", invstd, c)?;

    // Reductions over everything but the channel dimension.
    let mut grad_sum = vec![0.0; c];
    let mut dot = vec![0.0; c];
    for_each(dims, |ch, i| {
        grad_sum[ch] += grad[i];
        dot[ch] += grad[i] * (x[i] - mean[ch]);
    });

    let count = (n * inner) as f64;
    let mut input = vec![0.0; x.len()];
    for_each(dims, |ch, i| {
        let w = weight.map_or(1.0, |w| w[ch]);
        let scale = w * invstd[ch];
        input[i] = if batch_stats {
            let x_hat = (x[i] - mean[ch]) * invstd[ch];
            let proj = dot[ch] * invstd[ch] / count;
            scale * (grad[i] - grad_sum[ch] / count - x_hat * proj)
        } else {
            scale * grad[i]
        };
    });

    let weight_grad = dot.iter().zip(invstd).map(|(d, s)| d * s).collect();
    Ok(BatchNormGrads {
        input,
        weight: weight_grad,
        bias: grad_sum,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_channel_stats_2d() {
        // Two samples, two channels.
        let x = [1.0, 10.0, 3.0, 30.0];
        let stats = channel_stats(&x, &Shape::new(vec![2, 2])).unwrap();
        assert_eq!(stats.mean, vec![2.0, 20.0]);
        assert_eq!(stats.var, vec![1.0, 100.0]);
    }

    #[test]
    fn test_channel_stats_spatial() {
        // [1, 2, 2]: channel 0 = [1, 3], channel 1 = [5, 5]
        let x = [1.0, 3.0, 5.0, 5.0];
        let stats = channel_stats(&x, &Shape::new(vec![1, 2, 2])).unwrap();
        assert_eq!(stats.mean, vec![2.0, 5.0]);
        assert_eq!(stats.var, vec![1.0, 0.0]);
    }

    #[test]
    fn test_rank_one_rejected() {
        assert!(channel_stats(&[1.0, 2.0], &Shape::new(vec![2])).is_err());
    }

    #[test]
    fn test_apply_normalizes() {
        let x = [1.0, 3.0];
        let shape = Shape::new(vec![2, 1]);
        let out = apply(&x, &shape, &[2.0], &[1.0], None, None).unwrap();
        assert_eq!(out, vec![-1.0, 1.0]);

        let out = apply(&x, &shape, &[2.0], &[1.0], Some(&[2.0]), Some(&[0.5])).unwrap();
        assert_eq!(out, vec![-1.5, 2.5]);
    }

    #[test]
    fn test_backward_batch_stats_sum_to_zero() {
        let x = [1.0, 2.0, 4.0];
        let shape = Shape::new(vec![3, 1]);
        let stats = channel_stats(&x, &shape).unwrap();
        let invstd = [1.0 / (stats.var[0] + 1e-5).sqrt()];
        let grads = backward(&[1.0, 0.0, -2.0], &x, &shape, &stats.mean, &invstd, None, true)
            .unwrap();
        // The gradient through batch statistics is orthogonal to constants.
        let total: f64 = grads.input.iter().sum();
        assert_relative_eq!(total, 0.0, epsilon = 1e-9);
        assert_eq!(grads.bias, vec![-1.0]);
    }

    #[test]
    fn test_backward_eval_is_scaling() {
        let shape = Shape::new(vec![2, 1]);
        let grads = backward(
            &[1.0, 1.0],
            &[0.0, 1.0],
            &shape,
            &[0.0],
            &[0.5],
            Some(&[4.0]),
            false,
        )
        .unwrap();
        assert_eq!(grads.input, vec![2.0, 2.0]);
        assert_eq!(grads.weight, vec![0.5]);
        assert_eq!(grads.bias, vec![2.0]);
    }
}
