use std::path::Path;
use std::sync::OnceLock;

use lr_tensor::config::{self, RuntimeConfig};
use lr_tensor::{codec, DeviceType, ScalarType, Tensor, TensorError};
use tempfile::TempDir;

/// Installs a configuration rooted in a temporary directory shared by all
/// tests in this binary.
fn content_dir() -> &'static Path {
    static DIR: OnceLock<TempDir> = OnceLock::new();
    DIR.get_or_init(|| {
        let dir = tempfile::tempdir().unwrap();
        config::init(RuntimeConfig {
            content_dir: dir.path().to_path_buf(),
            ..RuntimeConfig::default()
        })
        .unwrap();
        dir
    })
    .path()
}

#[test]
fn save_and_load_roundtrip() {
    let dir = content_dir();
    let mut src = Tensor::with_scalar_type(ScalarType::Double);
    src.set_values(&[1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2])
        .unwrap();
    src.save_to_file("roundtrip.lrar").unwrap();
    assert!(dir.join("roundtrip.lrar").is_file());

    let mut dst = Tensor::new();
    dst.load_from_file("roundtrip.lrar").unwrap();
    assert_eq!(dst.sizes(), vec![3, 2]);
    assert_eq!(dst.scalar_type(), ScalarType::Double);
    assert_eq!(dst.serialized_values(), src.serialized_values());
}

#[test]
fn load_converts_to_declared_type() {
    content_dir();
    let src = Tensor::ones(ScalarType::Float, &[4]).unwrap();
    src.save_to_file("ones.lrar").unwrap();

    let mut dst = Tensor::with_scalar_type(ScalarType::Long);
    dst.load_from_file("ones.lrar").unwrap();
    assert_eq!(dst.values::<i64>().unwrap(), vec![1, 1, 1, 1]);
}

#[test]
fn save_undefined_writes_nothing() {
    let dir = content_dir();
    assert!(matches!(
        Tensor::new().save_to_file("undefined.lrar"),
        Err(TensorError::Undefined)
    ));
    assert!(!dir.join("undefined.lrar").exists());
}

#[test]
fn load_missing_file_keeps_state() {
    content_dir();
    let mut t = Tensor::zeros(ScalarType::Float, &[2, 2]).unwrap();
    let before = t.serialized_values();
    assert!(matches!(
        t.load_from_file("does/not/exist.lrar"),
        Err(TensorError::FileNotFound(_))
    ));
    assert_eq!(t.serialized_values(), before);
}

#[test]
fn factories_use_configured_defaults() {
    content_dir();
    let t = Tensor::zeros(ScalarType::Undefined, &[2, 3]).unwrap();
    assert_eq!(t.scalar_type(), ScalarType::Float);
    assert_eq!(t.device_type(), DeviceType::Cpu);
    assert!(config::init(RuntimeConfig::default()).is_err());
}

#[test]
fn broadcast_example_shapes() {
    content_dir();
    let mut a = Tensor::zeros(ScalarType::Float, &[8, 1, 6, 1]).unwrap();
    let b = Tensor::zeros(ScalarType::Float, &[7, 1, 5]).unwrap();
    assert!(a.is_broadcastable_to_tensor(&b));
    assert!(a.broadcast_to_tensor(&b));
    assert_eq!(a.sizes(), vec![8, 7, 6, 5]);
}

#[test]
fn zero_dimension_rejected_even_against_itself() {
    content_dir();
    let a = Tensor::zeros(ScalarType::Float, &[3, 0, 2]).unwrap();
    assert!(!a.is_broadcastable_to_array(&[3, 0, 2]));
    assert!(!a.is_broadcastable_to_tensor(&a));
}

#[test]
fn payload_roundtrip_through_codec() {
    content_dir();
    let src = Tensor::randn(ScalarType::Float, &[2, 3, 4], DeviceType::Cpu).unwrap();
    let (bytes, sizes) = src.serialized_values();

    let floats: Vec<f32> = codec::deserialize_array(&bytes);
    assert_eq!(floats, src.values::<f32>().unwrap());

    let mut dst = Tensor::with_scalar_type(ScalarType::Float);
    dst.set_serialized_values(&codec::serialize_array(&floats), &sizes)
        .unwrap();
    assert_eq!(dst.serialized_values(), (bytes, sizes));
}

#[test]
fn undefined_payload_is_sentinel() {
    content_dir();
    let (bytes, sizes) = Tensor::new().serialized_values();
    assert!(bytes.is_empty());
    assert_eq!(sizes, vec![0]);
}
