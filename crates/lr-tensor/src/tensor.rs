//! The host-facing tensor wrapper.
//!
//! A [`Tensor`] exclusively owns at most one engine handle plus an optional
//! declared scalar type. Every value assigned through [`Tensor::set_data`] is
//! converted into that declared type (or, when none is declared, into the
//! type of the value it replaces), so a wrapper keeps a stable element type
//! across assignments.

use std::fmt;
use std::path::Path;

use lr_engine::{Options, Shape};

use crate::codec;
use crate::config;
use crate::element::Element;
use crate::error::{Result, TensorError};
use crate::scalar::{DeviceType, ScalarType};

/// The engine tensor type wrapped by [`Tensor`].
pub type NativeTensor = lr_engine::Tensor;

/// Whether `Tensor::backward` keeps the graph alive for another pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetainGraphMode {
    Never,
    Always,
    /// Retain only when the backward pass itself builds a graph.
    #[default]
    IfCreated,
}

impl RetainGraphMode {
    fn as_flag(self) -> Option<bool> {
        match self {
            RetainGraphMode::Never => Some(false),
            RetainGraphMode::Always => Some(true),
            RetainGraphMode::IfCreated => None,
        }
    }
}

#[derive(Default)]
pub struct Tensor {
    data: Option<NativeTensor>,
    /// `Undefined` means "follow the data".
    scalar_type: ScalarType,
}

impl Tensor {
    /// An undefined tensor with no declared scalar type.
    pub fn new() -> Self {
        Tensor::default()
    }

    /// An undefined tensor whose future values are converted to `scalar_type`.
    pub fn with_scalar_type(scalar_type: ScalarType) -> Self {
        Tensor {
            data: None,
            scalar_type,
        }
    }

    /// Wraps an engine tensor, keeping its kind.
    pub fn from_native(value: NativeTensor) -> Self {
        Tensor {
            data: value.defined().then_some(value),
            scalar_type: ScalarType::Undefined,
        }
    }

    pub fn data(&self) -> Option<&NativeTensor> {
        self.data.as_ref()
    }

    pub fn is_defined(&self) -> bool {
        self.data.as_ref().is_some_and(NativeTensor::defined)
    }

    /// Shape of the tensor, empty when undefined.
    pub fn sizes(&self) -> Vec<i64> {
        self.data.as_ref().map(NativeTensor::sizes).unwrap_or_default()
    }

    /// The declared scalar type, or the type of the held data.
    pub fn scalar_type(&self) -> ScalarType {
        if self.scalar_type != ScalarType::Undefined {
            return self.scalar_type;
        }
        self.data
            .as_ref()
            .and_then(NativeTensor::kind)
            .map(ScalarType::from_native)
            .unwrap_or(ScalarType::Undefined)
    }

    pub fn declared_scalar_type(&self) -> ScalarType {
        self.scalar_type
    }

    pub fn device_type(&self) -> DeviceType {
        self.data
            .as_ref()
            .and_then(NativeTensor::device)
            .map(DeviceType::from_native)
            .unwrap_or(DeviceType::Undefined)
    }

    pub fn element_count(&self) -> i64 {
        match &self.data {
            Some(t) if t.defined() => t.numel() as i64,
            _ => 0,
        }
    }

    pub fn element_size(&self) -> i64 {
        match &self.data {
            Some(t) if t.defined() => t.element_size() as i64,
            _ => 0,
        }
    }

    /// Kind that assigned values are converted to, if any.
    fn target_kind(&self) -> Result<Option<lr_engine::Kind>> {
        if self.scalar_type != ScalarType::Undefined {
            return self.scalar_type.to_native().map(Some);
        }
        Ok(self.data.as_ref().and_then(NativeTensor::kind))
    }

    /// Replaces the held handle with `value`, converted to this wrapper's
    /// element type. An undefined `value` leaves the wrapper undefined.
    pub fn set_data(&mut self, value: &NativeTensor) -> Result<()> {
        if !value.defined() {
            self.data = None;
            return Ok(());
        }
        let converted = match self.target_kind()? {
            Some(kind) => value.to_kind(kind)?,
            None => value.clone(),
        };
        self.data = Some(converted);
        Ok(())
    }

    /// A wrapper with the same declared type holding `value`.
    fn with_data(&self, value: &NativeTensor) -> Result<Tensor> {
        let mut out = Tensor::with_scalar_type(self.scalar_type);
        out.set_data(value)?;
        Ok(out)
    }

    // ---- broadcasting ----

    /// Whether this tensor can be broadcast against `target`.
    ///
    /// Shapes are aligned at their trailing dimensions and every aligned pair
    /// must be equal or contain a 1. Rank-0 shapes and shapes containing a
    /// zero dimension are never compatible.
    pub fn is_broadcastable_to_array(&self, target: &[i64]) -> bool {
        if !self.is_defined() {
            return false;
        }
        let sizes = self.sizes();
        if sizes.is_empty() || target.is_empty() || sizes.contains(&0) || target.contains(&0) {
            return false;
        }
        sizes
            .iter()
            .rev()
            .zip(target.iter().rev())
            .all(|(&a, &b)| a == b || a == 1 || b == 1)
    }

    pub fn is_broadcastable_to_tensor(&self, other: &Tensor) -> bool {
        other.is_defined() && self.is_broadcastable_to_array(&other.sizes())
    }

    /// Symmetric form used by binary operations.
    pub fn is_broadcastable_with(&self, other: &Tensor) -> bool {
        self.is_broadcastable_to_tensor(other)
    }

    /// Expands this tensor in place to the broadcast of its shape with
    /// `target`. Returns false and leaves the tensor untouched when the
    /// shapes are incompatible.
    pub fn broadcast_to_array(&mut self, target: &[i64]) -> bool {
        if !self.is_broadcastable_to_array(target) {
            return false;
        }
        let Some(data) = &self.data else {
            return false;
        };
        let expanded = Shape::from_sizes(target)
            .and_then(|target| Shape::broadcast_shape(&data.shape(), &target))
            .and_then(|joint| data.broadcast_to(&joint.sizes()));
        match expanded {
            Ok(t) => {
                self.data = Some(t);
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, ?target, "broadcast failed");
                false
            }
        }
    }

    pub fn broadcast_to_tensor(&mut self, other: &Tensor) -> bool {
        other.is_defined() && self.broadcast_to_array(&other.sizes())
    }

    // ---- gradients ----

    /// A new wrapper holding the accumulated gradient, or `None` when this
    /// tensor is undefined. The returned wrapper is undefined when no
    /// gradient has been accumulated.
    pub fn gradient(&self) -> Option<Tensor> {
        let data = self.data.as_ref().filter(|t| t.defined())?;
        match self.with_data(&data.grad()) {
            Ok(grad) => Some(grad),
            Err(e) => {
                tracing::warn!(error = %e, "could not convert gradient");
                Some(Tensor::with_scalar_type(self.scalar_type))
            }
        }
    }

    pub fn does_require_gradient(&self) -> bool {
        self.data.as_ref().is_some_and(NativeTensor::requires_grad)
    }

    /// Toggles gradient tracking. Failures (non-floating data, non-leaf
    /// tensors) are logged and leave the flag unchanged.
    pub fn set_require_gradient(&mut self, value: bool) -> &mut Self {
        if let Some(data) = &self.data {
            match data.set_requires_grad(value) {
                Ok(t) => self.data = Some(t),
                Err(e) => tracing::warn!(error = %e, value, "could not set requires_grad"),
            }
        }
        self
    }

    /// Back-propagates from this tensor.
    ///
    /// Without `gradient` an all-ones gradient is used. Only `inputs` that
    /// are defined and require gradients take part; they are converted to
    /// Float before the pass.
    pub fn backward(
        &self,
        gradient: Option<&Tensor>,
        inputs: &[Tensor],
        mode: RetainGraphMode,
        create_graph: bool,
    ) -> Result<()> {
        let data = self.data.as_ref().filter(|t| t.defined()).ok_or(TensorError::Undefined)?;
        if !data.requires_grad() {
            return Err(TensorError::NoGradient);
        }
        let grad = match gradient.and_then(|g| g.data.as_ref()).filter(|g| g.defined()) {
            Some(g) => g.clone(),
            None => data.ones_like()?.set_requires_grad(true)?,
        };
        if !data.is_same_size(&grad) {
            return Err(TensorError::GradientShapeMismatch {
                expected: data.sizes(),
                got: grad.sizes(),
            });
        }

        let mut selected = Vec::with_capacity(inputs.len());
        for input in inputs {
            let Some(t) = input.data.as_ref().filter(|t| t.defined() && t.requires_grad()) else {
                continue;
            };
            selected.push(t.to_kind(lr_engine::Kind::Float32)?.set_requires_grad(true)?);
        }

        data.backward(Some(&grad), mode.as_flag(), create_graph, &selected)?;
        Ok(())
    }

    // ---- values ----

    /// Raw element bytes in native order together with the shape.
    ///
    /// A tensor without elements (including an undefined one) yields empty
    /// bytes and the sentinel shape `[0]`.
    pub fn serialized_values(&self) -> (Vec<u8>, Vec<i64>) {
        let sentinel = || (Vec::new(), vec![0]);
        let Some(data) = self.data.as_ref().filter(|t| t.defined()) else {
            return sentinel();
        };
        if data.numel() * data.element_size() == 0 {
            return sentinel();
        }
        match data.to_bytes() {
            Ok(bytes) => (bytes, data.sizes()),
            Err(e) => {
                tracing::warn!(error = %e, "could not read tensor bytes");
                sentinel()
            }
        }
    }

    /// Allocates a tensor of `sizes` and copies as many leading bytes of
    /// `values` into it as fit.
    ///
    /// Bytes past the end of the allocation are dropped. If `values` is
    /// shorter than the allocation, the remaining elements are unspecified;
    /// do not rely on them being zero.
    pub fn set_serialized_values(&mut self, values: &[u8], sizes: &[i64]) -> Result<()> {
        let opts = self.allocation_options(None)?;
        let fresh = NativeTensor::empty(sizes, opts).inspect_err(|e| {
            tracing::error!(error = %e, ?sizes, "invalid tensor sizes");
        })?;
        fresh.copy_from_bytes(values)?;
        self.data = Some(fresh);
        Ok(())
    }

    /// Element type and device for a freshly allocated value.
    fn allocation_options(&self, scalar_type: Option<ScalarType>) -> Result<Options> {
        let config = config::get();
        let kind = match scalar_type {
            Some(st) => st.to_native()?,
            None => match self.target_kind()? {
                Some(kind) => kind,
                None => config.default_scalar_type.to_native()?,
            },
        };
        let device = match self.data.as_ref().and_then(NativeTensor::device) {
            Some(device) => device,
            None => config.default_device.to_native()?,
        };
        Ok(Options::new(kind, device))
    }

    /// Every element converted to `T`, row-major.
    pub fn values<T: Element>(&self) -> Result<Vec<T>> {
        let data = self.data.as_ref().filter(|t| t.defined()).ok_or(TensorError::Undefined)?;
        let bytes = data.to_kind(T::SCALAR_TYPE.to_native()?)?.to_bytes()?;
        Ok(codec::deserialize_array(&bytes))
    }

    /// Replaces the contents with `values` laid out as `sizes`.
    ///
    /// # Errors
    /// The number of values must equal the product of `sizes`.
    pub fn set_values<T: Element>(&mut self, values: &[T], sizes: &[i64]) -> Result<()> {
        let opts = self.allocation_options(Some(T::SCALAR_TYPE))?;
        let fresh = NativeTensor::empty(sizes, opts)?;
        if fresh.numel() != values.len() {
            return Err(TensorError::ValueCountMismatch {
                expected: fresh.numel(),
                got: values.len(),
                sizes: sizes.to_vec(),
            });
        }
        fresh.copy_from_bytes(&codec::serialize_array(values))?;
        self.set_data(&fresh)
    }

    // ---- arithmetic ----

    /// Element-wise sum. The result is declared as `result_type`, or as this
    /// tensor's declared type; it is left undefined when the operands are
    /// not broadcast-compatible.
    pub fn add(&self, other: &Tensor, result_type: Option<ScalarType>) -> Tensor {
        let mut result = Tensor::with_scalar_type(result_type.unwrap_or(self.scalar_type));
        if !self.is_broadcastable_to_tensor(other) {
            return result;
        }
        let (Some(a), Some(b)) = (&self.data, &other.data) else {
            return result;
        };
        if let Err(e) = a.add(b).map_err(TensorError::from).and_then(|sum| result.set_data(&sum)) {
            tracing::warn!(error = %e, "tensor addition failed");
        }
        result
    }

    // ---- placement ----

    /// Moves the held data to `device`. Undefined tensors are left alone.
    pub fn set_device_type(&mut self, device: DeviceType) -> Result<()> {
        let device = device.to_native()?;
        if let Some(data) = &self.data {
            self.data = Some(data.to_device(device)?);
        }
        Ok(())
    }

    // ---- files ----

    /// Writes the tensor to `relative_path` under the content directory.
    ///
    /// # Errors
    /// Undefined tensors are not written.
    pub fn save_to_file(&self, relative_path: impl AsRef<Path>) -> Result<()> {
        let data = self.data.as_ref().filter(|t| t.defined()).ok_or(TensorError::Undefined)?;
        let path = config::get().content_path(relative_path);
        data.save(&path)?;
        tracing::debug!(path = %path.display(), "saved tensor");
        Ok(())
    }

    /// Replaces the held data with the tensor stored at `relative_path`
    /// under the content directory. Nothing changes if loading fails.
    pub fn load_from_file(&mut self, relative_path: impl AsRef<Path>) -> Result<()> {
        let path = config::get().content_path(relative_path);
        if !path.is_file() {
            tracing::warn!(path = %path.display(), "tensor file not found");
            return Err(TensorError::FileNotFound(path));
        }
        let loaded = NativeTensor::load(&path)?;
        self.set_data(&loaded)?;
        tracing::debug!(path = %path.display(), "loaded tensor");
        Ok(())
    }

    // ---- factories ----

    /// Builds a tensor with `make`, using the configured default device and
    /// `scalar_type` (or the configured default when `Undefined`).
    fn create(
        scalar_type: ScalarType,
        device: Option<DeviceType>,
        make: impl FnOnce(Options) -> lr_engine::Result<NativeTensor>,
    ) -> Result<Tensor> {
        let config = config::get();
        let kind = if scalar_type == ScalarType::Undefined {
            config.default_scalar_type.to_native()?
        } else {
            scalar_type.to_native()?
        };
        let device = device.unwrap_or(config.default_device).to_native()?;
        let data = make(Options::new(kind, device))?;
        Ok(Tensor {
            data: Some(data),
            scalar_type,
        })
    }

    /// Allocates without meaningful contents.
    pub fn empty(scalar_type: ScalarType, sizes: &[i64]) -> Result<Tensor> {
        Tensor::create(scalar_type, None, |opts| NativeTensor::empty(sizes, opts))
    }

    pub fn zeros(scalar_type: ScalarType, sizes: &[i64]) -> Result<Tensor> {
        Tensor::create(scalar_type, None, |opts| NativeTensor::zeros(sizes, opts))
    }

    pub fn ones(scalar_type: ScalarType, sizes: &[i64]) -> Result<Tensor> {
        Tensor::create(scalar_type, None, |opts| NativeTensor::ones(sizes, opts))
    }

    /// `size` x `size` identity matrix.
    pub fn eye(scalar_type: ScalarType, size: i64) -> Result<Tensor> {
        Tensor::create(scalar_type, None, |opts| NativeTensor::eye(size, opts))
    }

    /// Uniform samples from `[0, 1)`.
    pub fn rand(scalar_type: ScalarType, sizes: &[i64]) -> Result<Tensor> {
        Tensor::create(scalar_type, None, |opts| NativeTensor::rand(sizes, opts))
    }

    /// Standard normal samples placed on `device`.
    pub fn randn(scalar_type: ScalarType, sizes: &[i64], device: DeviceType) -> Result<Tensor> {
        Tensor::create(scalar_type, Some(device), |opts| NativeTensor::randn(sizes, opts))
    }
}

/// Clones share element memory until either side writes to it, but never
/// share gradient state or graph position. A tensor that required
/// gradients yields a clone that is a leaf requiring gradients.
impl Clone for Tensor {
    fn clone(&self) -> Self {
        let data = self.data.as_ref().map(|t| {
            let copy = t.detach();
            if t.requires_grad() {
                copy.set_requires_grad(true).unwrap_or(copy)
            } else {
                copy
            }
        });
        Tensor {
            data,
            scalar_type: self.scalar_type,
        }
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            Some(t) if t.defined() => write!(f, "{}", t),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("data", &self.data)
            .field("scalar_type", &self.scalar_type)
            .finish()
    }
}

impl From<NativeTensor> for Tensor {
    fn from(value: NativeTensor) -> Self {
        Tensor::from_native(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use lr_engine::Kind;

    fn float(values: &[f64], sizes: &[i64]) -> Tensor {
        Tensor::from_native(NativeTensor::from_slice(values, sizes, Options::default()).unwrap())
    }

    #[test]
    fn test_undefined_queries() {
        let t = Tensor::new();
        assert!(!t.is_defined());
        assert!(t.sizes().is_empty());
        assert_eq!(t.scalar_type(), ScalarType::Undefined);
        assert_eq!(t.element_count(), 0);
        assert_eq!(t.element_size(), 0);
        assert!(t.gradient().is_none());
        assert!(!t.does_require_gradient());
        assert_eq!(t.to_string(), "");
    }

    #[test]
    fn test_declared_type_wins() {
        let mut t = Tensor::with_scalar_type(ScalarType::Double);
        assert_eq!(t.scalar_type(), ScalarType::Double);
        t.set_data(&NativeTensor::ones(&[2], Options::default()).unwrap())
            .unwrap();
        assert_eq!(t.data().unwrap().kind(), Some(Kind::Float64));
        assert_eq!(t.element_size(), 8);
    }

    #[test]
    fn test_set_data_keeps_existing_kind() {
        let mut t = Tensor::from_native(
            NativeTensor::zeros(&[2], Options::new(Kind::Int32, lr_engine::Device::Cpu)).unwrap(),
        );
        t.set_data(&NativeTensor::full(&[3], 2.7, Options::default()).unwrap())
            .unwrap();
        assert_eq!(t.scalar_type(), ScalarType::Int);
        assert_eq!(t.values::<i32>().unwrap(), vec![2, 2, 2]);
    }

    #[test]
    fn test_broadcastable_trailing_alignment() {
        let t = float(&[0.0; 48], &[8, 1, 6, 1]);
        assert!(t.is_broadcastable_to_array(&[7, 1, 5]));
        assert!(!t.is_broadcastable_to_array(&[7, 2, 5]));
        assert!(!t.is_broadcastable_to_array(&[]));
        assert!(!t.is_broadcastable_to_array(&[0]));
    }

    #[test]
    fn test_broadcast_to_joint_shape() {
        let mut t = float(&[0.0; 48], &[8, 1, 6, 1]);
        assert!(t.broadcast_to_array(&[7, 1, 5]));
        assert_eq!(t.sizes(), vec![8, 7, 6, 5]);

        let mut u = float(&[1.0, 2.0], &[2]);
        assert!(!u.broadcast_to_array(&[3]));
        assert_eq!(u.sizes(), vec![2]);
    }

    #[test]
    fn test_zero_dimension_never_broadcastable() {
        let t = Tensor::zeros(ScalarType::Float, &[2, 0]).unwrap();
        assert!(!t.is_broadcastable_to_tensor(&t));
        assert!(!t.is_broadcastable_with(&t));
    }

    #[test]
    fn test_serialized_roundtrip() {
        let src = float(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let (bytes, sizes) = src.serialized_values();
        assert_eq!(bytes.len(), 24);
        assert_eq!(sizes, vec![2, 3]);

        let mut dst = Tensor::with_scalar_type(ScalarType::Float);
        dst.set_serialized_values(&bytes, &sizes).unwrap();
        assert_eq!(dst.serialized_values(), (bytes, sizes));
    }

    #[test]
    fn test_serialized_sentinel() {
        assert_eq!(Tensor::new().serialized_values(), (vec![], vec![0]));
        let empty = Tensor::zeros(ScalarType::Float, &[3, 0]).unwrap();
        assert_eq!(empty.serialized_values(), (vec![], vec![0]));
    }

    #[test]
    fn test_set_serialized_values_truncates() {
        let mut t = Tensor::with_scalar_type(ScalarType::Float);
        let bytes = codec::serialize_array(&[1.0f32, 2.0, 3.0]);
        t.set_serialized_values(&bytes, &[2]).unwrap();
        assert_eq!(t.values::<f32>().unwrap(), vec![1.0, 2.0]);

        assert!(t.set_serialized_values(&bytes, &[-1]).is_err());
        assert_eq!(t.sizes(), vec![2]);
    }

    #[test]
    fn test_set_values_checks_count() {
        let mut t = Tensor::new();
        t.set_values(&[1i64, 2, 3, 4], &[2, 2]).unwrap();
        assert_eq!(t.scalar_type(), ScalarType::Long);
        assert_eq!(t.sizes(), vec![2, 2]);
        assert!(matches!(
            t.set_values(&[1i64, 2], &[3]),
            Err(TensorError::ValueCountMismatch { expected: 3, got: 2, .. })
        ));
    }

    #[test]
    fn test_values_convert() {
        let t = float(&[1.5, -2.5], &[2]);
        assert_eq!(t.values::<f64>().unwrap(), vec![1.5, -2.5]);
        assert!(Tensor::new().values::<f32>().is_err());
    }

    #[test]
    fn test_add_broadcasts() {
        let a = float(&[1.0, 2.0, 3.0], &[3]);
        let b = float(&[10.0, 20.0], &[2, 1]);
        let sum = a.add(&b, None);
        assert_eq!(sum.sizes(), vec![2, 3]);
        assert_eq!(
            sum.values::<f64>().unwrap(),
            vec![11.0, 12.0, 13.0, 21.0, 22.0, 23.0]
        );
    }

    #[test]
    fn test_add_incompatible_is_undefined() {
        let a = float(&[1.0, 2.0, 3.0], &[3]);
        let b = float(&[1.0, 2.0], &[2]);
        let sum = a.add(&b, Some(ScalarType::Double));
        assert!(!sum.is_defined());
        assert_eq!(sum.scalar_type(), ScalarType::Double);
    }

    #[test]
    fn test_backward_default_gradient() {
        let mut x = float(&[1.0, 2.0], &[2]);
        x.set_require_gradient(true);
        assert!(x.does_require_gradient());
        let y = x.add(&x, None);
        y.backward(None, &[], RetainGraphMode::IfCreated, false)
            .unwrap();
        let grad = x.gradient().unwrap();
        assert_eq!(grad.values::<f64>().unwrap(), vec![2.0, 2.0]);
    }

    #[test]
    fn test_backward_preconditions() {
        let x = float(&[1.0, 2.0], &[2]);
        assert!(matches!(
            x.backward(None, &[], RetainGraphMode::Never, false),
            Err(TensorError::NoGradient)
        ));
        assert!(matches!(
            Tensor::new().backward(None, &[], RetainGraphMode::Never, false),
            Err(TensorError::Undefined)
        ));

        let mut y = float(&[1.0, 2.0], &[2]);
        y.set_require_gradient(true);
        let wrong = float(&[1.0, 2.0, 3.0], &[3]);
        assert!(matches!(
            y.backward(Some(&wrong), &[], RetainGraphMode::Never, false),
            Err(TensorError::GradientShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_backward_retain_modes() {
        let mut x = float(&[3.0], &[1]);
        x.set_require_gradient(true);
        let y = x.add(&x, None);
        y.backward(None, &[], RetainGraphMode::Always, false).unwrap();
        y.backward(None, &[], RetainGraphMode::Never, false).unwrap();
        assert!(y.backward(None, &[], RetainGraphMode::Never, false).is_err());
        assert_relative_eq!(x.gradient().unwrap().values::<f64>().unwrap()[0], 4.0);
    }

    #[test]
    fn test_backward_restricted_inputs() {
        let mut a = float(&[1.0], &[1]);
        let mut b = float(&[2.0], &[1]);
        a.set_require_gradient(true);
        b.set_require_gradient(true);
        let y = a.add(&b, None);
        y.backward(None, std::slice::from_ref(&a), RetainGraphMode::Never, false)
            .unwrap();
        assert!(a.gradient().unwrap().is_defined());
        assert!(!b.gradient().unwrap().is_defined());
    }

    #[test]
    fn test_set_require_gradient_rejects_integers() {
        let mut t = Tensor::ones(ScalarType::Int, &[2]).unwrap();
        assert!(!t.set_require_gradient(true).does_require_gradient());
    }

    #[test]
    fn test_clone_is_independent() {
        let mut a = float(&[1.0, 2.0], &[2]);
        a.set_require_gradient(true);
        let mut b = a.clone();
        assert!(b.does_require_gradient());
        b.set_values(&[5.0f32, 6.0], &[2]).unwrap();
        assert_eq!(a.values::<f32>().unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_factories() {
        let e = Tensor::eye(ScalarType::Undefined, 3).unwrap();
        assert_eq!(e.sizes(), vec![3, 3]);
        assert_eq!(e.scalar_type(), ScalarType::Float);

        let r = Tensor::randn(ScalarType::Double, &[4], DeviceType::Cuda).unwrap();
        assert_eq!(r.device_type(), DeviceType::Cuda);
        assert_eq!(r.scalar_type(), ScalarType::Double);

        let u = Tensor::rand(ScalarType::Float, &[16]).unwrap();
        assert!(u.values::<f32>().unwrap().iter().all(|v| (0.0..=1.0).contains(v)));

        assert!(Tensor::zeros(ScalarType::Float, &[-2]).is_err());
    }

    #[test]
    fn test_set_device_type() {
        let mut t = Tensor::ones(ScalarType::Float, &[2]).unwrap();
        t.set_device_type(DeviceType::Cuda).unwrap();
        assert_eq!(t.device_type(), DeviceType::Cuda);
        assert!(t.set_device_type(DeviceType::Undefined).is_err());
    }

    #[test]
    fn test_display() {
        let t = float(&[1.0, 2.0], &[2]);
        assert!(t.to_string().contains("CPUFloatType{2}"));
    }
}
