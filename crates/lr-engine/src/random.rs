use std::cell::RefCell;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::Result;
use crate::shape::Shape;
use crate::storage::CpuStorage;
use crate::tensor::{Options, Tensor, TensorData};

thread_local! {
    static RNG: RefCell<StdRng> = RefCell::new(StdRng::from_entropy());
}

/// Reseeds the generator used by [`Tensor::rand`] and [`Tensor::randn`] on
/// this thread.
pub fn manual_seed(seed: u64) {
    RNG.with(|rng| *rng.borrow_mut() = StdRng::seed_from_u64(seed));
}

fn sample(n: usize, mut f: impl FnMut(&mut StdRng) -> f64) -> Vec<f64> {
    RNG.with(|rng| {
        let mut rng = rng.borrow_mut();
        (0..n).map(|_| f(&mut rng)).collect()
    })
}

fn filled(sizes: &[i64], opts: Options, values: impl FnOnce(usize) -> Vec<f64>) -> Result<Tensor> {
    let shape = Shape::from_sizes(sizes)?;
    let storage = CpuStorage::from_f64(opts.kind, &values(shape.numel()));
    Ok(Tensor::from_data(TensorData::new(storage, shape, opts.device)))
}

impl Tensor {
    /// Uniform samples from [0, 1).
    pub fn rand(sizes: &[i64], opts: Options) -> Result<Tensor> {
        filled(sizes, opts, |n| sample(n, |rng| rng.gen::<f64>()))
    }

    /// Standard normal samples (Box-Muller).
    pub fn randn(sizes: &[i64], opts: Options) -> Result<Tensor> {
        filled(sizes, opts, |n| {
            sample(n, |rng| {
                // u1 in (0, 1] keeps the logarithm finite.
                let u1 = 1.0 - rng.gen::<f64>();
                let u2 = rng.gen::<f64>();
                (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rand_range() {
        let t = Tensor::rand(&[64], Options::default()).unwrap();
        assert!(t
            .to_f64_vec()
            .unwrap()
            .iter()
            .all(|v| (0.0..1.0).contains(v)));
    }

    #[test]
    fn test_manual_seed_reproducible() {
        manual_seed(7);
        let a = Tensor::randn(&[8], Options::default()).unwrap();
        manual_seed(7);
        let b = Tensor::randn(&[8], Options::default()).unwrap();
        assert_eq!(a.to_f64_vec().unwrap(), b.to_f64_vec().unwrap());
    }

    #[test]
    fn test_randn_moments() {
        manual_seed(42);
        let values = Tensor::randn(&[20_000], Options::default())
            .unwrap()
            .to_f64_vec()
            .unwrap();
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        assert!(mean.abs() < 0.05);
        assert!((var - 1.0).abs() < 0.05);
    }
}
