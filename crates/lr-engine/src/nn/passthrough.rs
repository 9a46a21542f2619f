use crate::error::Result;
use crate::nn::Module;
use crate::tensor::Tensor;

/// Identity module without parameters.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl Passthrough {
    pub fn new() -> Self {
        Passthrough
    }
}

impl Module for Passthrough {
    fn name(&self) -> &str {
        "Passthrough"
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        Ok(input.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Options;

    #[test]
    fn test_identity() {
        let m = Passthrough::new();
        let x = Tensor::ones(&[2, 2], Options::default()).unwrap();
        let y = m.forward(&x).unwrap();
        assert_eq!(y.to_f64_vec().unwrap(), x.to_f64_vec().unwrap());
        assert!(m.named_parameters().is_empty());
    }
}
