use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::autograd::{self, BackwardOp, GradNode};
use crate::backend::{BinaryOp, ComputeBackend};
use crate::cpu::CpuBackend;
use crate::error::{EngineError, Result};
use crate::grad_fns::{
    BinaryBackward, BroadcastBackward, MeanBackward, MulScalarBackward, SumBackward,
    SumToBackward, ToDeviceBackward, ToKindBackward,
};
use crate::kind::{Device, Kind};
use crate::shape::Shape;
use crate::storage::CpuStorage;

static CPU: CpuBackend = CpuBackend;

/// Backend executing every kernel. All devices are backed by host memory.
pub(crate) fn backend() -> &'static dyn ComputeBackend {
    &CPU
}

/// Element kind and placement used by tensor factories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    pub kind: Kind,
    pub device: Device,
}

impl Options {
    pub fn new(kind: Kind, device: Device) -> Self {
        Options { kind, device }
    }
}

impl Default for Options {
    fn default() -> Self {
        Options {
            kind: Kind::Float32,
            device: Device::Cpu,
        }
    }
}

impl From<(Kind, Device)> for Options {
    fn from((kind, device): (Kind, Device)) -> Self {
        Options { kind, device }
    }
}

/// Element buffer, shape and placement of a tensor.
///
/// The storage is shared copy-on-write: detached tensors alias it until one
/// of them is written.
#[derive(Debug, Clone)]
pub(crate) struct TensorData {
    pub storage: Arc<CpuStorage>,
    pub shape: Shape,
    pub device: Device,
}

impl TensorData {
    pub fn new(storage: CpuStorage, shape: Shape, device: Device) -> Self {
        TensorData {
            storage: Arc::new(storage),
            shape,
            device,
        }
    }

    pub fn kind(&self) -> Kind {
        self.storage.kind()
    }

    pub fn values(&self) -> Vec<f64> {
        self.storage.to_f64_vec()
    }
}

#[derive(Debug)]
struct Node {
    data: RwLock<TensorData>,
    requires_grad: AtomicBool,
    grad: Mutex<Option<Tensor>>,
    grad_fn: Option<Arc<GradNode>>,
}

/// Reference-counted tensor handle.
///
/// Cloning a `Tensor` is shallow: both handles share data, gradient and
/// graph position. Use [`Tensor::detach`] for a handle outside the graph and
/// [`Tensor::deep_clone`] for an independent copy. A handle may also be
/// undefined, in which case queries return empty values and operations fail
/// with [`EngineError::UndefinedTensor`].
#[derive(Clone, Default)]
pub struct Tensor {
    node: Option<Arc<Node>>,
}

impl Tensor {
    /// An undefined tensor.
    pub fn undefined() -> Self {
        Tensor { node: None }
    }

    pub(crate) fn from_data(data: TensorData) -> Self {
        Tensor {
            node: Some(Arc::new(Node {
                data: RwLock::new(data),
                requires_grad: AtomicBool::new(false),
                grad: Mutex::new(None),
                grad_fn: None,
            })),
        }
    }

    /// Wraps the result of an operation, recording `op` when gradients are
    /// being tracked for any of `inputs`.
    pub(crate) fn from_op(data: TensorData, op: impl BackwardOp + 'static, inputs: Vec<Tensor>) -> Self {
        let track = autograd::is_grad_enabled()
            && data.kind().is_floating_point()
            && inputs.iter().any(Tensor::requires_grad);
        if !track {
            return Tensor::from_data(data);
        }
        Tensor {
            node: Some(Arc::new(Node {
                data: RwLock::new(data),
                requires_grad: AtomicBool::new(true),
                grad: Mutex::new(None),
                grad_fn: Some(Arc::new(GradNode::new(Box::new(op), inputs))),
            })),
        }
    }

    /// Wraps existing storage.
    ///
    /// # Errors
    /// Returns an error if the storage length does not match the shape.
    pub fn from_storage(storage: CpuStorage, shape: Shape, device: Device) -> Result<Self> {
        if storage.len() != shape.numel() {
            return Err(EngineError::ShapeMismatch {
                expected: shape.dims().to_vec(),
                got: vec![storage.len()],
            });
        }
        Ok(Tensor::from_data(TensorData::new(storage, shape, device)))
    }

    /// Creates a tensor of `sizes` from row-major values converted to `opts.kind`.
    pub fn from_slice(values: &[f64], sizes: &[i64], opts: Options) -> Result<Self> {
        let shape = Shape::from_sizes(sizes)?;
        Tensor::from_storage(CpuStorage::from_f64(opts.kind, values), shape, opts.device)
    }

    fn node(&self) -> Result<&Arc<Node>> {
        self.node.as_ref().ok_or(EngineError::UndefinedTensor)
    }

    pub(crate) fn snapshot(&self) -> Result<TensorData> {
        Ok(self.node()?.data.read().clone())
    }

    /// Stable identity of the shared node, `None` when undefined.
    pub(crate) fn id(&self) -> Option<usize> {
        self.node.as_ref().map(|n| Arc::as_ptr(n) as usize)
    }

    pub(crate) fn grad_node(&self) -> Option<&Arc<GradNode>> {
        self.node.as_ref().and_then(|n| n.grad_fn.as_ref())
    }

    // ---- queries ----

    pub fn defined(&self) -> bool {
        self.node.is_some()
    }

    /// Dimension sizes; empty when undefined.
    pub fn sizes(&self) -> Vec<i64> {
        self.shape().sizes()
    }

    pub fn shape(&self) -> Shape {
        self.node
            .as_ref()
            .map(|n| n.data.read().shape.clone())
            .unwrap_or_default()
    }

    pub fn dim(&self) -> usize {
        self.shape().ndim()
    }

    /// Number of elements; zero when undefined.
    pub fn numel(&self) -> usize {
        self.node
            .as_ref()
            .map_or(0, |n| n.data.read().shape.numel())
    }

    pub fn kind(&self) -> Option<Kind> {
        self.node.as_ref().map(|n| n.data.read().kind())
    }

    pub fn device(&self) -> Option<Device> {
        self.node.as_ref().map(|n| n.data.read().device)
    }

    /// Size in bytes of one element; zero when undefined.
    pub fn element_size(&self) -> usize {
        self.kind().map_or(0, |k| k.element_size())
    }

    pub fn requires_grad(&self) -> bool {
        self.node
            .as_ref()
            .is_some_and(|n| n.requires_grad.load(Ordering::Acquire))
    }

    /// True for tensors not produced by a recorded operation.
    pub fn is_leaf(&self) -> bool {
        self.grad_node().is_none()
    }

    /// Name of the operation that produced this tensor, if recorded.
    pub fn grad_fn_name(&self) -> Option<&'static str> {
        self.grad_node().map(|n| n.name())
    }

    pub fn is_same_size(&self, other: &Tensor) -> bool {
        self.defined() && other.defined() && self.shape() == other.shape()
    }

    /// Accumulated gradient, undefined when none has been computed.
    pub fn grad(&self) -> Tensor {
        self.node
            .as_ref()
            .and_then(|n| n.grad.lock().clone())
            .unwrap_or_default()
    }

    // ---- factories ----

    /// Allocates a tensor without meaningful contents.
    ///
    /// The reference backend zero-fills, but callers must not rely on the
    /// contents of an `empty` tensor.
    pub fn empty(sizes: &[i64], opts: Options) -> Result<Self> {
        Tensor::zeros(sizes, opts)
    }

    pub fn zeros(sizes: &[i64], opts: Options) -> Result<Self> {
        let shape = Shape::from_sizes(sizes)?;
        let storage = CpuStorage::zeros(opts.kind, shape.numel());
        Ok(Tensor::from_data(TensorData::new(storage, shape, opts.device)))
    }

    pub fn ones(sizes: &[i64], opts: Options) -> Result<Self> {
        Tensor::full(sizes, 1.0, opts)
    }

    pub fn full(sizes: &[i64], value: f64, opts: Options) -> Result<Self> {
        let shape = Shape::from_sizes(sizes)?;
        let values = vec![value; shape.numel()];
        let storage = CpuStorage::from_f64(opts.kind, &values);
        Ok(Tensor::from_data(TensorData::new(storage, shape, opts.device)))
    }

    /// Identity matrix of size `n` x `n`.
    pub fn eye(n: i64, opts: Options) -> Result<Self> {
        let size = usize::try_from(n).map_err(|_| EngineError::NegativeDimension(n))?;
        let storage = CpuStorage::from_f64(opts.kind, &backend().eye(size));
        Ok(Tensor::from_data(TensorData::new(
            storage,
            Shape::new(vec![size, size]),
            opts.device,
        )))
    }

    fn like_options(&self) -> Result<(Vec<i64>, Options)> {
        let data = self.snapshot()?;
        Ok((data.shape.sizes(), Options::new(data.kind(), data.device)))
    }

    pub fn zeros_like(&self) -> Result<Self> {
        let (sizes, opts) = self.like_options()?;
        Tensor::zeros(&sizes, opts)
    }

    pub fn ones_like(&self) -> Result<Self> {
        let (sizes, opts) = self.like_options()?;
        Tensor::ones(&sizes, opts)
    }

    // ---- raw data ----

    /// Every element widened to f64, row-major.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        Ok(self.snapshot()?.values())
    }

    /// Copy of the element memory in native byte order.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.snapshot()?.storage.as_bytes().to_vec())
    }

    /// Overwrites the leading element memory with `bytes` in native byte
    /// order. Copies `min(bytes.len(), nbytes)` bytes and returns that count.
    pub fn copy_from_bytes(&self, bytes: &[u8]) -> Result<usize> {
        self.check_in_place()?;
        let mut data = self.node()?.data.write();
        let dst = Arc::make_mut(&mut data.storage).as_bytes_mut();
        let n = bytes.len().min(dst.len());
        dst[..n].copy_from_slice(&bytes[..n]);
        Ok(n)
    }

    /// Overwrites every element with `values`, keeping kind and shape.
    pub(crate) fn assign_f64(&self, values: &[f64]) -> Result<()> {
        let mut data = self.node()?.data.write();
        if values.len() != data.shape.numel() {
            return Err(EngineError::ShapeMismatch {
                expected: data.shape.dims().to_vec(),
                got: vec![values.len()],
            });
        }
        let kind = data.kind();
        data.storage = Arc::new(CpuStorage::from_f64(kind, values));
        Ok(())
    }

    fn check_in_place(&self) -> Result<()> {
        if autograd::is_grad_enabled() && self.requires_grad() && self.is_leaf() {
            return Err(EngineError::LeafInPlace);
        }
        Ok(())
    }

    // ---- arithmetic ----

    fn binary(&self, other: &Tensor, op: BinaryOp) -> Result<Tensor> {
        let a = self.snapshot()?;
        let b = other.snapshot()?;
        if a.device != b.device {
            return Err(EngineError::DeviceMismatch {
                a: a.device,
                b: b.device,
            });
        }
        let kind = Kind::promote(a.kind(), b.kind());
        let (values, shape) = backend().binary(op, &a.values(), &a.shape, &b.values(), &b.shape)?;
        let out = TensorData::new(CpuStorage::from_f64(kind, &values), shape, a.device);
        let grad_op = BinaryBackward {
            op,
            lhs: a.shape,
            rhs: b.shape,
        };
        Ok(Tensor::from_op(out, grad_op, vec![self.clone(), other.clone()]))
    }

    /// Element-wise sum with broadcasting.
    pub fn add(&self, other: &Tensor) -> Result<Tensor> {
        self.binary(other, BinaryOp::Add)
    }

    /// Element-wise difference with broadcasting.
    pub fn sub(&self, other: &Tensor) -> Result<Tensor> {
        self.binary(other, BinaryOp::Sub)
    }

    /// Element-wise product with broadcasting.
    pub fn mul(&self, other: &Tensor) -> Result<Tensor> {
        self.binary(other, BinaryOp::Mul)
    }

    /// Multiplies every element by `s`. Non-floating inputs produce Float32.
    pub fn mul_scalar(&self, s: f64) -> Result<Tensor> {
        let a = self.snapshot()?;
        let kind = if a.kind().is_floating_point() {
            a.kind()
        } else {
            Kind::Float32
        };
        let values = backend().scale(&a.values(), s)?;
        let out = TensorData::new(CpuStorage::from_f64(kind, &values), a.shape, a.device);
        Ok(Tensor::from_op(out, MulScalarBackward { scale: s }, vec![self.clone()]))
    }

    /// Sum of all elements as a zero-dimensional tensor. Integral and bool
    /// inputs sum into Int64.
    pub fn sum(&self) -> Result<Tensor> {
        let a = self.snapshot()?;
        let kind = if a.kind().is_floating_point() {
            a.kind()
        } else {
            Kind::Int64
        };
        let total = backend().sum_to(&a.values(), &a.shape, &Shape::default())?;
        let out = TensorData::new(CpuStorage::from_f64(kind, &total), Shape::default(), a.device);
        Ok(Tensor::from_op(out, SumBackward { input: a.shape }, vec![self.clone()]))
    }

    /// Mean of all elements as a zero-dimensional tensor.
    pub fn mean(&self) -> Result<Tensor> {
        let a = self.snapshot()?;
        if !a.kind().is_floating_point() {
            return Err(EngineError::UnsupportedKind {
                op: "mean",
                kind: a.kind(),
            });
        }
        let n = a.shape.numel();
        let total = backend().sum_to(&a.values(), &a.shape, &Shape::default())?;
        let mean = [total[0] / n as f64];
        let out = TensorData::new(CpuStorage::from_f64(a.kind(), &mean), Shape::default(), a.device);
        Ok(Tensor::from_op(out, MeanBackward { input: a.shape }, vec![self.clone()]))
    }

    /// Expands to `sizes` by repeating size-1 and missing leading dimensions.
    pub fn broadcast_to(&self, sizes: &[i64]) -> Result<Tensor> {
        let a = self.snapshot()?;
        let target = Shape::from_sizes(sizes)?;
        let values = backend().broadcast_to(&a.values(), &a.shape, &target)?;
        let out = TensorData::new(CpuStorage::from_f64(a.kind(), &values), target, a.device);
        Ok(Tensor::from_op(out, BroadcastBackward { input: a.shape }, vec![self.clone()]))
    }

    /// Sums broadcast dimensions away so the result has `sizes`.
    pub fn sum_to(&self, sizes: &[i64]) -> Result<Tensor> {
        let a = self.snapshot()?;
        let target = Shape::from_sizes(sizes)?;
        if target == a.shape {
            return Ok(self.clone());
        }
        let values = backend().sum_to(&a.values(), &a.shape, &target)?;
        let out = TensorData::new(CpuStorage::from_f64(a.kind(), &values), target, a.device);
        Ok(Tensor::from_op(out, SumToBackward { input: a.shape }, vec![self.clone()]))
    }

    // ---- conversion ----

    /// Converts to `kind`. Returns this same handle when the kind already matches.
    pub fn to_kind(&self, kind: Kind) -> Result<Tensor> {
        let a = self.snapshot()?;
        let from = a.kind();
        if from == kind {
            return Ok(self.clone());
        }
        let out = TensorData::new(a.storage.cast(kind), a.shape, a.device);
        Ok(Tensor::from_op(out, ToKindBackward { from }, vec![self.clone()]))
    }

    /// Moves to `device`. Returns this same handle when already placed there.
    pub fn to_device(&self, device: Device) -> Result<Tensor> {
        let a = self.snapshot()?;
        let from = a.device;
        if from == device {
            return Ok(self.clone());
        }
        let out = TensorData {
            device,
            ..a
        };
        Ok(Tensor::from_op(out, ToDeviceBackward { from }, vec![self.clone()]))
    }

    /// New handle sharing the data but outside the graph.
    pub fn detach(&self) -> Tensor {
        match self.snapshot() {
            Ok(data) => Tensor::from_data(data),
            Err(_) => Tensor::undefined(),
        }
    }

    /// Detached copy that no longer shares storage with this tensor.
    pub fn deep_clone(&self) -> Result<Tensor> {
        let mut data = self.snapshot()?;
        data.storage = Arc::new(data.storage.as_ref().clone());
        Ok(Tensor::from_data(data))
    }

    // ---- gradient state ----

    /// Sets gradient tracking and returns this handle for chaining.
    ///
    /// # Errors
    /// Only floating point tensors may require gradients, and tracking can
    /// only be turned off on leaves.
    pub fn set_requires_grad(&self, requires_grad: bool) -> Result<Tensor> {
        let node = self.node()?;
        if requires_grad {
            let kind = node.data.read().kind();
            if !kind.is_floating_point() {
                return Err(EngineError::RequiresGradNonFloating(kind));
            }
        } else if node.grad_fn.is_some() {
            return Err(EngineError::NonLeafRequiresGrad);
        }
        node.requires_grad.store(requires_grad, Ordering::Release);
        Ok(self.clone())
    }

    /// Clears the accumulated gradient, either dropping it or filling it with
    /// zeros.
    pub fn zero_grad(&self, set_to_none: bool) -> Result<()> {
        let node = self.node()?;
        let mut grad = node.grad.lock();
        if set_to_none {
            *grad = None;
        } else if let Some(g) = grad.as_ref() {
            *grad = Some(autograd::no_grad(|| g.zeros_like())?);
        }
        Ok(())
    }

    pub(crate) fn accumulate_grad(&self, grad: &Tensor) -> Result<()> {
        let node = self.node()?;
        let mut slot = node.grad.lock();
        let next = match slot.as_ref() {
            Some(prev) => prev.add(grad)?,
            None => grad.clone(),
        };
        *slot = Some(next);
        Ok(())
    }

    // ---- in-place ----

    /// Copies `src` into this tensor, broadcasting and converting as needed.
    pub fn copy_(&self, src: &Tensor) -> Result<()> {
        self.check_in_place()?;
        let s = src.snapshot()?;
        let node = self.node()?;
        let mut dst = node.data.write();
        let values = backend().broadcast_to(&s.values(), &s.shape, &dst.shape)?;
        let kind = dst.kind();
        dst.storage = Arc::new(CpuStorage::from_f64(kind, &values));
        Ok(())
    }

    /// Replaces the data of this handle with the data of `src`, keeping
    /// gradient tracking and graph position.
    pub fn set_data(&self, src: &Tensor) -> Result<()> {
        let data = src.snapshot()?;
        let node = self.node()?;
        if node.requires_grad.load(Ordering::Acquire) && !data.kind().is_floating_point() {
            return Err(EngineError::RequiresGradNonFloating(data.kind()));
        }
        *node.data.write() = data;
        Ok(())
    }

    // ---- autograd ----

    /// Computes gradients of this tensor with respect to graph leaves.
    ///
    /// `gradient` defaults to ones for single-element tensors. `retain_graph`
    /// defaults to `create_graph`. With `inputs` non-empty, gradients are
    /// accumulated only into those tensors.
    pub fn backward(
        &self,
        gradient: Option<&Tensor>,
        retain_graph: Option<bool>,
        create_graph: bool,
        inputs: &[Tensor],
    ) -> Result<()> {
        let kind = self.node()?.data.read().kind();
        if !self.requires_grad() {
            return Err(EngineError::NoGradFn);
        }
        let grad = match gradient.filter(|g| g.defined()) {
            Some(g) => {
                if g.shape() != self.shape() {
                    return Err(EngineError::ShapeMismatch {
                        expected: self.shape().dims().to_vec(),
                        got: g.shape().dims().to_vec(),
                    });
                }
                g.to_kind(kind)?
            }
            None => {
                if self.numel() != 1 {
                    return Err(EngineError::ImplicitGradNonScalar);
                }
                self.ones_like()?
            }
        };
        for input in inputs {
            if !input.requires_grad() {
                return Err(EngineError::Other(
                    "one of the differentiated tensors does not require grad".to_string(),
                ));
            }
        }
        autograd::run_backward(
            self,
            grad,
            retain_graph.unwrap_or(create_graph),
            create_graph,
            inputs,
        )
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node {
            None => write!(f, "Tensor(undefined)"),
            Some(node) => {
                let data = node.data.read();
                f.debug_struct("Tensor")
                    .field("shape", &data.shape)
                    .field("kind", &data.kind())
                    .field("device", &data.device)
                    .field("requires_grad", &node.requires_grad.load(Ordering::Acquire))
                    .finish()
            }
        }
    }
}
