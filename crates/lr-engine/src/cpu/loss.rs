use crate::error::{EngineError, Result};

const LOG_CLAMP: f64 = -100.0;
const GRAD_EPS: f64 = 1e-12;

fn check_inputs(x: &[f64], y: &[f64]) -> Result<()> {
    if x.len() != y.len() {
        return Err(EngineError::ShapeMismatch {
            expected: vec![x.len()],
            got: vec![y.len()],
        });
    }
    if x.iter().any(|v| !(0.0..=1.0).contains(v)) {
        return Err(EngineError::OutOfUnitRange);
    }
    Ok(())
}

/// Mean binary cross entropy. Logs are clamped at -100 so that exact zeros
/// and ones yield a finite loss.
pub fn binary_cross_entropy(x: &[f64], y: &[f64]) -> Result<f64> {
    check_inputs(x, y)?;
    if x.is_empty() {
        return Ok(f64::NAN);
    }
    let total: f64 = x
        .iter()
        .zip(y)
        .map(|(&p, &t)| {
            let log_p = p.ln().max(LOG_CLAMP);
            let log_1mp = (1.0 - p).ln().max(LOG_CLAMP);
            -(t * log_p + (1.0 - t) * log_1mp)
        })
        .sum();
    Ok(total / x.len() as f64)
}

pub fn binary_cross_entropy_backward(g: f64, x: &[f64], y: &[f64]) -> Result<Vec<f64>> {
    check_inputs(x, y)?;
    let n = x.len() as f64;
    Ok(x.iter()
        .zip(y)
        .map(|(&p, &t)| g * (p - t) / ((1.0 - p) * p).max(GRAD_EPS) / n)
        .collect())
}
