//! Reverse-mode differentiation over a built forward graph.
//!
//! Rules only add nodes to the context; nothing is evaluated until the
//! returned graph is passed to [`compute`](crate::compute). Gradient slots are
//! accumulated by rebinding each operand's `grad` to `grad + contribution`.

use crate::api::error::{TensorError, TensorResult};
use crate::api::types::{Op, TensorId};
use crate::core::context::Context;
use crate::core::graph::Graph;
use crate::core::table::op_info;

/// What a gradient rule sees of one node.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BackwardArgs {
    pub op: Op,
    pub node: TensorId,
    pub src0: Option<TensorId>,
    pub src1: Option<TensorId>,
    pub grad: TensorId,
    pub inplace: bool,
}

impl BackwardArgs {
    fn src0(&self) -> TensorResult<TensorId> {
        self.src0
            .ok_or_else(|| TensorError::InvalidOperation(format!("{} node has no src0", self.op.name())))
    }

    fn src1(&self) -> TensorResult<TensorId> {
        self.src1
            .ok_or_else(|| TensorError::InvalidOperation(format!("{} node has no src1", self.op.name())))
    }
}

pub(crate) type BackwardFn = fn(&mut Context, &BackwardArgs) -> TensorResult<()>;

/// Extend `gf` with the gradient computation of every parameter.
///
/// With `keep`, each forward node first gets a fresh gradient slot so the
/// slots recorded in `gf` are left untouched and accumulation can run in
/// place. The caller seeds the root's gradient (usually with 1) before
/// computing the returned graph.
pub fn build_backward(ctx: &mut Context, gf: &mut Graph, keep: bool) -> TensorResult<Graph> {
    let mut result = gf.clone();

    if keep {
        for i in 0..gf.nodes.len() {
            let node = gf.nodes[i];
            if ctx.tensor(node)?.grad.is_some() {
                let grad = ctx.new_grad(node)?;
                ctx.tensor_mut(node)?.grad = Some(grad);
                gf.grads[i] = Some(grad);
            }
        }
    }

    for &node in gf.nodes.iter().rev() {
        let t = ctx.tensor(node)?;
        let Some(grad) = t.grad else { continue };
        let args = BackwardArgs {
            op: t.op,
            node,
            src0: t.src0,
            src1: t.src1,
            grad,
            inplace: keep,
        };
        match op_info(args.op).backward {
            Some(rule) => rule(ctx, &args)?,
            None => return Err(TensorError::UnimplementedGradient { op: args.op.name() }),
        }
    }

    for &node in gf.nodes.iter().rev() {
        let t = ctx.tensor(node)?;
        if let (true, Some(grad)) = (t.is_param, t.grad) {
            result.build_forward_expand(ctx, grad)?;
        }
    }

    log::debug!(
        "build_backward: {} forward nodes -> {} nodes (keep={})",
        gf.n_nodes(),
        result.n_nodes(),
        keep
    );
    Ok(result)
}

/// `target.grad += delta(ctx)`, skipped when `target` has no gradient slot.
fn accumulate(
    ctx: &mut Context,
    target: TensorId,
    inplace: bool,
    delta: impl FnOnce(&mut Context) -> TensorResult<TensorId>,
) -> TensorResult<()> {
    let Some(grad) = ctx.tensor(target)?.grad else { return Ok(()) };
    let delta = delta(ctx)?;
    let sum = if inplace {
        ctx.fold_grad_inplace(Op::Add, grad, delta)?
    } else {
        ctx.add(grad, delta)?
    };
    ctx.tensor_mut(target)?.grad = Some(sum);
    Ok(())
}

/// `target.grad -= delta(ctx)`, skipped when `target` has no gradient slot.
fn deplete(
    ctx: &mut Context,
    target: TensorId,
    inplace: bool,
    delta: impl FnOnce(&mut Context) -> TensorResult<TensorId>,
) -> TensorResult<()> {
    let Some(grad) = ctx.tensor(target)?.grad else { return Ok(()) };
    let delta = delta(ctx)?;
    let diff = if inplace {
        ctx.fold_grad_inplace(Op::Sub, grad, delta)?
    } else {
        ctx.sub(grad, delta)?
    };
    ctx.tensor_mut(target)?.grad = Some(diff);
    Ok(())
}

pub(crate) fn none(_: &mut Context, _: &BackwardArgs) -> TensorResult<()> {
    Ok(())
}

/// Pass the gradient straight through to the operand.
pub(crate) fn identity(ctx: &mut Context, b: &BackwardArgs) -> TensorResult<()> {
    accumulate(ctx, b.src0()?, b.inplace, |_| Ok(b.grad))
}

pub(crate) fn add(ctx: &mut Context, b: &BackwardArgs) -> TensorResult<()> {
    accumulate(ctx, b.src0()?, b.inplace, |_| Ok(b.grad))?;
    accumulate(ctx, b.src1()?, b.inplace, |_| Ok(b.grad))
}

pub(crate) fn sub(ctx: &mut Context, b: &BackwardArgs) -> TensorResult<()> {
    accumulate(ctx, b.src0()?, b.inplace, |_| Ok(b.grad))?;
    deplete(ctx, b.src1()?, b.inplace, |_| Ok(b.grad))
}

pub(crate) fn mul(ctx: &mut Context, b: &BackwardArgs) -> TensorResult<()> {
    let (x0, x1) = (b.src0()?, b.src1()?);
    accumulate(ctx, x0, b.inplace, |ctx| ctx.mul(x1, b.grad))?;
    accumulate(ctx, x1, b.inplace, |ctx| ctx.mul(x0, b.grad))
}

pub(crate) fn div(ctx: &mut Context, b: &BackwardArgs) -> TensorResult<()> {
    let (x0, x1) = (b.src0()?, b.src1()?);
    accumulate(ctx, x0, b.inplace, |ctx| ctx.div(b.grad, x1))?;
    deplete(ctx, x1, b.inplace, |ctx| {
        let ratio = ctx.div(b.node, x1)?;
        ctx.mul(b.grad, ratio)
    })
}

/// d(x²) = 2·x·g
pub(crate) fn sqr(ctx: &mut Context, b: &BackwardArgs) -> TensorResult<()> {
    let x = b.src0()?;
    accumulate(ctx, x, b.inplace, |ctx| {
        let xg = ctx.mul(x, b.grad)?;
        let two = ctx.new_f32(2.0)?;
        ctx.scale(xg, two)
    })
}

/// d(√x) = g·0.5 / √x, reusing the forward result.
pub(crate) fn sqrt(ctx: &mut Context, b: &BackwardArgs) -> TensorResult<()> {
    accumulate(ctx, b.src0()?, b.inplace, |ctx| {
        let half = ctx.new_f32(0.5)?;
        let g = ctx.scale(b.grad, half)?;
        ctx.div(g, b.node)
    })
}

pub(crate) fn sum(ctx: &mut Context, b: &BackwardArgs) -> TensorResult<()> {
    let x = b.src0()?;
    accumulate(ctx, x, b.inplace, |ctx| ctx.repeat(b.grad, x))
}

pub(crate) fn repeat(ctx: &mut Context, b: &BackwardArgs) -> TensorResult<()> {
    let x = b.src0()?;
    accumulate(ctx, x, b.inplace, |ctx| ctx.repeat_back(b.grad, x))
}

pub(crate) fn abs(ctx: &mut Context, b: &BackwardArgs) -> TensorResult<()> {
    let x = b.src0()?;
    accumulate(ctx, x, b.inplace, |ctx| {
        let sign = ctx.sgn(x)?;
        ctx.mul(sign, b.grad)
    })
}

pub(crate) fn neg(ctx: &mut Context, b: &BackwardArgs) -> TensorResult<()> {
    deplete(ctx, b.src0()?, b.inplace, |_| Ok(b.grad))
}

pub(crate) fn relu(ctx: &mut Context, b: &BackwardArgs) -> TensorResult<()> {
    let x = b.src0()?;
    accumulate(ctx, x, b.inplace, |ctx| {
        let mask = ctx.step(x)?;
        ctx.mul(mask, b.grad)
    })
}

/// Only the right operand: `b.grad += aᵀ · g`. The left operand would need
/// an outer product, so a tracked left operand is refused.
pub(crate) fn mul_mat(ctx: &mut Context, b: &BackwardArgs) -> TensorResult<()> {
    let (x0, x1) = (b.src0()?, b.src1()?);
    if ctx.tensor(x0)?.grad.is_some() {
        return Err(TensorError::UnimplementedGradient { op: b.op.name() });
    }
    accumulate(ctx, x1, b.inplace, |ctx| {
        let at = ctx.transpose(x0)?;
        ctx.mul_mat(at, b.grad)
    })
}
