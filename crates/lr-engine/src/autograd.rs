//! Reverse-mode automatic differentiation.
//!
//! Operations executed while grad mode is enabled record a [`GradNode`] on
//! their output when any input requires a gradient. [`run_backward`] walks
//! those nodes in reverse topological order, keyed by the identity of the
//! shared tensor node so that shallow clones resolve to the same vertex.

use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{EngineError, Result};
use crate::tensor::Tensor;

thread_local! {
    static GRAD_ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Returns whether operations on this thread currently record gradients.
pub fn is_grad_enabled() -> bool {
    GRAD_ENABLED.with(Cell::get)
}

/// Enables or disables gradient recording, returning the previous state.
pub fn set_grad_enabled(enabled: bool) -> bool {
    GRAD_ENABLED.with(|g| g.replace(enabled))
}

/// RAII guard that disables gradient recording within its scope.
///
/// The previous state is restored on drop, so guards nest.
pub struct NoGradGuard {
    prev_state: bool,
}

impl NoGradGuard {
    pub fn new() -> Self {
        NoGradGuard {
            prev_state: set_grad_enabled(false),
        }
    }
}

impl Default for NoGradGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NoGradGuard {
    fn drop(&mut self) {
        set_grad_enabled(self.prev_state);
    }
}

/// Runs `f` with gradient recording disabled.
pub fn no_grad<T>(f: impl FnOnce() -> T) -> T {
    let _guard = NoGradGuard::new();
    f()
}

/// Derivative rule of one recorded operation.
///
/// `apply` receives the gradient of the operation's output and the inputs it
/// was recorded with, and returns one optional gradient per input. Rules
/// written with tensor operations are themselves differentiable when the
/// backward pass runs with `create_graph`.
pub(crate) trait BackwardOp: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    fn apply(&self, grad: &Tensor, inputs: &[Tensor]) -> Result<Vec<Option<Tensor>>>;
}

/// A vertex of the backward graph, owned by the tensor it produced.
#[derive(Debug)]
pub(crate) struct GradNode {
    op: Box<dyn BackwardOp>,
    inputs: Vec<Tensor>,
    released: AtomicBool,
}

impl GradNode {
    pub(crate) fn new(op: Box<dyn BackwardOp>, inputs: Vec<Tensor>) -> Self {
        GradNode {
            op,
            inputs,
            released: AtomicBool::new(false),
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.op.name()
    }
}

fn build_topo_order(tensor: &Tensor, order: &mut Vec<Tensor>, visited: &mut HashSet<usize>) {
    let Some(id) = tensor.id() else { return };
    if !tensor.requires_grad() || !visited.insert(id) {
        return;
    }
    if let Some(node) = tensor.grad_node() {
        for input in &node.inputs {
            build_topo_order(input, order, visited);
        }
    }
    order.push(tensor.clone());
}

/// Propagates `grad` from `root` through the recorded graph.
///
/// Gradients are accumulated into leaves, or only into `inputs` when that
/// list is non-empty. Nodes are released after use unless `retain_graph` is
/// set; running backward through a released node fails. Without
/// `create_graph` the propagation itself is not recorded.
pub(crate) fn run_backward(
    root: &Tensor,
    grad: Tensor,
    retain_graph: bool,
    create_graph: bool,
    inputs: &[Tensor],
) -> Result<()> {
    let _guard = (!create_graph).then(NoGradGuard::new);

    let mut order = Vec::new();
    let mut visited = HashSet::new();
    build_topo_order(root, &mut order, &mut visited);

    let targets: HashSet<usize> = inputs.iter().filter_map(Tensor::id).collect();
    let mut grads: HashMap<usize, Tensor> = HashMap::new();
    if let Some(id) = root.id() {
        grads.insert(id, grad);
    }

    for tensor in order.iter().rev() {
        let Some(id) = tensor.id() else { continue };
        let Some(grad) = grads.remove(&id) else {
            continue;
        };

        let accumulate = if targets.is_empty() {
            tensor.is_leaf()
        } else {
            targets.contains(&id)
        };
        if accumulate {
            let stored = if create_graph { grad.clone() } else { grad.detach() };
            tensor.accumulate_grad(&stored)?;
        }

        let Some(node) = tensor.grad_node() else {
            continue;
        };
        if node.released.load(Ordering::Acquire) {
            return Err(EngineError::GraphReleased);
        }
        let input_grads = node.op.apply(&grad, &node.inputs)?;
        if !retain_graph {
            node.released.store(true, Ordering::Release);
        }

        for (input, input_grad) in node.inputs.iter().zip(input_grads) {
            let Some(mut input_grad) = input_grad else {
                continue;
            };
            let Some(input_id) = input.id() else { continue };
            if !input.requires_grad() {
                continue;
            }
            if let Some(kind) = input.kind() {
                if input_grad.kind() != Some(kind) {
                    input_grad = input_grad.to_kind(kind)?;
                }
            }
            let merged = match grads.remove(&input_id) {
                Some(existing) => existing.add(&input_grad)?,
                None => input_grad,
            };
            grads.insert(input_id, merged);
        }
    }
    tracing::trace!(nodes = order.len(), retain_graph, create_graph, "backward pass finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Options;

    #[test]
    fn test_no_grad_guard_nests() {
        assert!(is_grad_enabled());
        {
            let _outer = NoGradGuard::new();
            assert!(!is_grad_enabled());
            {
                let _inner = NoGradGuard::new();
                assert!(!is_grad_enabled());
            }
            assert!(!is_grad_enabled());
        }
        assert!(is_grad_enabled());
    }

    #[test]
    fn test_no_grad_skips_recording() {
        let x = Tensor::ones(&[2], Options::default())
            .unwrap()
            .set_requires_grad(true)
            .unwrap();
        let y = no_grad(|| x.mul_scalar(2.0)).unwrap();
        assert!(!y.requires_grad());
        assert!(y.is_leaf());
    }

    #[test]
    fn test_shared_subexpression_accumulates() {
        let x = Tensor::from_slice(&[3.0], &[1], Options::default())
            .unwrap()
            .set_requires_grad(true)
            .unwrap();
        // y = x * x + x => dy/dx = 2x + 1
        let y = x.mul(&x).unwrap().add(&x).unwrap().sum().unwrap();
        y.backward(None, None, false, &[]).unwrap();
        assert_eq!(x.grad().to_f64_vec().unwrap(), vec![7.0]);
    }
}
