use lr_engine::nn::{BatchNorm, BatchNormDim, BatchNormOptions, Module};
use lr_engine::{Device, InputArchive, Kind, Options, OutputArchive, Tensor};

fn trained_batch_norm() -> BatchNorm {
    let bn = BatchNorm::new(BatchNormDim::One, BatchNormOptions::new(2)).unwrap();
    let x = Tensor::from_slice(&[1.0, 10.0, 3.0, 30.0], &[2, 2], Options::default()).unwrap();
    bn.forward(&x).unwrap();
    bn
}

#[test]
fn module_save_load_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bn.lrar");

    let source = trained_batch_norm();
    let mut out = OutputArchive::new();
    source.save(&mut out).unwrap();
    assert_eq!(out.len(), 5);
    out.save_to(&path).unwrap();

    let target = BatchNorm::new(BatchNormDim::One, BatchNormOptions::new(2)).unwrap();
    let input = InputArchive::load_from(&path).unwrap();
    target.load(&input).unwrap();

    assert_eq!(
        target.running_mean().to_f64_vec().unwrap(),
        source.running_mean().to_f64_vec().unwrap()
    );
    assert_eq!(
        target.running_var().to_f64_vec().unwrap(),
        source.running_var().to_f64_vec().unwrap()
    );
    // Loading keeps parameters trainable.
    assert!(target.weight().requires_grad());
}

#[test]
fn module_load_rejects_wrong_shape() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bn3.lrar");
    let mut out = OutputArchive::new();
    BatchNorm::new(BatchNormDim::One, BatchNormOptions::new(3))
        .unwrap()
        .save(&mut out)
        .unwrap();
    out.save_to(&path).unwrap();

    let target = BatchNorm::new(BatchNormDim::One, BatchNormOptions::new(2)).unwrap();
    let input = InputArchive::load_from(&path).unwrap();
    assert!(target.load(&input).is_err());
}

#[test]
fn module_to_device_moves_everything() {
    let bn = trained_batch_norm();
    bn.to_device(Device::Cuda(0)).unwrap();
    for (_, t) in bn.named_parameters().into_iter().chain(bn.named_buffers()) {
        assert_eq!(t.device(), Some(Device::Cuda(0)));
    }
    assert!(bn.weight().requires_grad());

    let cpu_input = Tensor::ones(&[2, 2], Options::default()).unwrap();
    assert!(bn.forward(&cpu_input).is_err());
    let gpu_input = Tensor::ones(&[2, 2], Options::new(Kind::Float32, Device::Cuda(0))).unwrap();
    assert!(bn.forward(&gpu_input).is_ok());
}

#[test]
fn module_zero_grad() {
    let bn = BatchNorm::new(BatchNormDim::One, BatchNormOptions::new(2)).unwrap();
    let x = Tensor::rand(&[4, 2], Options::default()).unwrap();
    bn.forward(&x).unwrap().sum().unwrap().backward(None, None, false, &[]).unwrap();
    assert!(bn.weight().grad().defined());

    bn.zero_grad(false).unwrap();
    assert_eq!(bn.bias().grad().to_f64_vec().unwrap(), vec![0.0, 0.0]);
    bn.zero_grad(true).unwrap();
    assert!(!bn.bias().grad().defined());
}

#[test]
fn module_load_failure_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("weight_only.lrar");
    let mut out = OutputArchive::new();
    let weight = Tensor::full(&[2], 7.0, Options::default()).unwrap();
    out.write("weight", &weight).unwrap();
    out.save_to(&path).unwrap();

    let target = BatchNorm::new(BatchNormDim::One, BatchNormOptions::new(2)).unwrap();
    let input = InputArchive::load_from(&path).unwrap();
    assert!(target.load(&input).is_err());
    assert_eq!(target.weight().to_f64_vec().unwrap(), vec![1.0, 1.0]);
    assert_eq!(target.bias().to_f64_vec().unwrap(), vec![0.0, 0.0]);
}
