//! Derivative rules for the element-wise and reduction operations.
//!
//! Rules are written with tensor operations so that they record their own
//! graph when the backward pass runs with `create_graph`.

use crate::autograd::BackwardOp;
use crate::backend::BinaryOp;
use crate::error::Result;
use crate::kind::{Device, Kind};
use crate::shape::Shape;
use crate::tensor::Tensor;

#[derive(Debug)]
pub(crate) struct BinaryBackward {
    pub op: BinaryOp,
    pub lhs: Shape,
    pub rhs: Shape,
}

impl BackwardOp for BinaryBackward {
    fn name(&self) -> &'static str {
        match self.op {
            BinaryOp::Add => "AddBackward",
            BinaryOp::Sub => "SubBackward",
            BinaryOp::Mul => "MulBackward",
        }
    }

    fn apply(&self, grad: &Tensor, inputs: &[Tensor]) -> Result<Vec<Option<Tensor>>> {
        let (a, b) = (&inputs[0], &inputs[1]);
        let (ga, gb) = match self.op {
            BinaryOp::Add => (grad.clone(), grad.clone()),
            BinaryOp::Sub => (grad.clone(), grad.mul_scalar(-1.0)?),
            BinaryOp::Mul => (grad.mul(b)?, grad.mul(a)?),
        };
        let ga = a
            .requires_grad()
            .then(|| ga.sum_to(&self.lhs.sizes()))
            .transpose()?;
        let gb = b
            .requires_grad()
            .then(|| gb.sum_to(&self.rhs.sizes()))
            .transpose()?;
        Ok(vec![ga, gb])
    }
}

#[derive(Debug)]
pub(crate) struct MulScalarBackward {
    pub scale: f64,
}

impl BackwardOp for MulScalarBackward {
    fn name(&self) -> &'static str {
        "MulScalarBackward"
    }

    fn apply(&self, grad: &Tensor, _inputs: &[Tensor]) -> Result<Vec<Option<Tensor>>> {
        Ok(vec![Some(grad.mul_scalar(self.scale)?)])
    }
}

#[derive(Debug)]
pub(crate) struct SumBackward {
    pub input: Shape,
}

impl BackwardOp for SumBackward {
    fn name(&self) -> &'static str {
        "SumBackward"
    }

    fn apply(&self, grad: &Tensor, _inputs: &[Tensor]) -> Result<Vec<Option<Tensor>>> {
        Ok(vec![Some(grad.broadcast_to(&self.input.sizes())?)])
    }
}

#[derive(Debug)]
pub(crate) struct MeanBackward {
    pub input: Shape,
}

impl BackwardOp for MeanBackward {
    fn name(&self) -> &'static str {
        "MeanBackward"
    }

    fn apply(&self, grad: &Tensor, _inputs: &[Tensor]) -> Result<Vec<Option<Tensor>>> {
        let n = self.input.numel().max(1) as f64;
        let expanded = grad.broadcast_to(&self.input.sizes())?;
        Ok(vec![Some(expanded.mul_scalar(1.0 / n)?)])
    }
}

#[derive(Debug)]
pub(crate) struct BroadcastBackward {
    pub input: Shape,
}

impl BackwardOp for BroadcastBackward {
    fn name(&self) -> &'static str {
        "ExpandBackward"
    }

    fn apply(&self, grad: &Tensor, _inputs: &[Tensor]) -> Result<Vec<Option<Tensor>>> {
        Ok(vec![Some(grad.sum_to(&self.input.sizes())?)])
    }
}

#[derive(Debug)]
pub(crate) struct SumToBackward {
    pub input: Shape,
}

impl BackwardOp for SumToBackward {
    fn name(&self) -> &'static str {
        "SumToBackward"
    }

    fn apply(&self, grad: &Tensor, _inputs: &[Tensor]) -> Result<Vec<Option<Tensor>>> {
        Ok(vec![Some(grad.broadcast_to(&self.input.sizes())?)])
    }
}

#[derive(Debug)]
pub(crate) struct ToKindBackward {
    pub from: Kind,
}

impl BackwardOp for ToKindBackward {
    fn name(&self) -> &'static str {
        "ToCopyBackward"
    }

    fn apply(&self, grad: &Tensor, _inputs: &[Tensor]) -> Result<Vec<Option<Tensor>>> {
        Ok(vec![Some(grad.to_kind(self.from)?)])
    }
}

#[derive(Debug)]
pub(crate) struct ToDeviceBackward {
    pub from: Device,
}

impl BackwardOp for ToDeviceBackward {
    fn name(&self) -> &'static str {
        "ToDeviceBackward"
    }

    fn apply(&self, grad: &Tensor, _inputs: &[Tensor]) -> Result<Vec<Option<Tensor>>> {
        Ok(vec![Some(grad.to_device(self.from)?)])
    }
}
