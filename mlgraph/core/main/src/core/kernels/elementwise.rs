//! Element-wise kernels: copies, arithmetic, activations and scaling.

use super::{NodeArgs, Row, Task};
use crate::api::error::TensorResult;

const GELU_COEF_A: f32 = 0.044715;
const SQRT_2_OVER_PI: f32 = 0.797_884_6;

pub(crate) fn gelu_f32(x: f32) -> f32 {
    0.5 * x * (1.0 + (SQRT_2_OVER_PI * x * (1.0 + GELU_COEF_A * x * x)).tanh())
}

pub(crate) fn silu_f32(x: f32) -> f32 {
    x / (1.0 + (-x).exp())
}

fn unary(args: &NodeArgs, rows: &mut [Row<'_>], f: impl Fn(f32) -> f32) -> TensorResult<()> {
    let a = args.src0()?;
    for row in rows.iter_mut() {
        for (y, &x) in row.data.iter_mut().zip(a.row(row.index)) {
            *y = f(x);
        }
    }
    Ok(())
}

fn binary(args: &NodeArgs, rows: &mut [Row<'_>], f: impl Fn(f32, f32) -> f32) -> TensorResult<()> {
    let (a, b) = (args.src0()?, args.src1()?);
    for row in rows.iter_mut() {
        let (xa, xb) = (a.row(row.index), b.row(row.index));
        for ((y, &x0), &x1) in row.data.iter_mut().zip(xa).zip(xb) {
            *y = f(x0, x1);
        }
    }
    Ok(())
}

/// Row `r` of the output taken from the operand in flat logical order, so
/// the two shapes only need to agree in element count.
fn copy_flat(args: &NodeArgs, rows: &mut [Row<'_>]) -> TensorResult<()> {
    let a = args.src0()?;
    for row in rows.iter_mut() {
        let n = row.data.len();
        row.data.copy_from_slice(&a.data[row.index * n..(row.index + 1) * n]);
    }
    Ok(())
}

pub(crate) fn dup(args: &NodeArgs, _: &mut Task<'_>, rows: &mut [Row<'_>]) -> TensorResult<()> {
    copy_flat(args, rows)
}

pub(crate) fn cpy(args: &NodeArgs, _: &mut Task<'_>, rows: &mut [Row<'_>]) -> TensorResult<()> {
    copy_flat(args, rows)
}

pub(crate) fn add(args: &NodeArgs, _: &mut Task<'_>, rows: &mut [Row<'_>]) -> TensorResult<()> {
    binary(args, rows, |x, y| x + y)
}

pub(crate) fn sub(args: &NodeArgs, _: &mut Task<'_>, rows: &mut [Row<'_>]) -> TensorResult<()> {
    binary(args, rows, |x, y| x - y)
}

pub(crate) fn mul(args: &NodeArgs, _: &mut Task<'_>, rows: &mut [Row<'_>]) -> TensorResult<()> {
    binary(args, rows, |x, y| x * y)
}

pub(crate) fn div(args: &NodeArgs, _: &mut Task<'_>, rows: &mut [Row<'_>]) -> TensorResult<()> {
    binary(args, rows, |x, y| x / y)
}

pub(crate) fn sqr(args: &NodeArgs, _: &mut Task<'_>, rows: &mut [Row<'_>]) -> TensorResult<()> {
    unary(args, rows, |x| x * x)
}

pub(crate) fn sqrt(args: &NodeArgs, _: &mut Task<'_>, rows: &mut [Row<'_>]) -> TensorResult<()> {
    unary(args, rows, f32::sqrt)
}

pub(crate) fn abs(args: &NodeArgs, _: &mut Task<'_>, rows: &mut [Row<'_>]) -> TensorResult<()> {
    unary(args, rows, f32::abs)
}

pub(crate) fn sgn(args: &NodeArgs, _: &mut Task<'_>, rows: &mut [Row<'_>]) -> TensorResult<()> {
    unary(args, rows, |x| {
        if x > 0.0 {
            1.0
        } else if x < 0.0 {
            -1.0
        } else {
            0.0
        }
    })
}

pub(crate) fn neg(args: &NodeArgs, _: &mut Task<'_>, rows: &mut [Row<'_>]) -> TensorResult<()> {
    unary(args, rows, |x| -x)
}

pub(crate) fn step(args: &NodeArgs, _: &mut Task<'_>, rows: &mut [Row<'_>]) -> TensorResult<()> {
    unary(args, rows, |x| if x > 0.0 { 1.0 } else { 0.0 })
}

pub(crate) fn relu(args: &NodeArgs, _: &mut Task<'_>, rows: &mut [Row<'_>]) -> TensorResult<()> {
    unary(args, rows, |x| x.max(0.0))
}

pub(crate) fn gelu(args: &NodeArgs, _: &mut Task<'_>, rows: &mut [Row<'_>]) -> TensorResult<()> {
    unary(args, rows, gelu_f32)
}

pub(crate) fn silu(args: &NodeArgs, _: &mut Task<'_>, rows: &mut [Row<'_>]) -> TensorResult<()> {
    unary(args, rows, silu_f32)
}

pub(crate) fn scale(args: &NodeArgs, _: &mut Task<'_>, rows: &mut [Row<'_>]) -> TensorResult<()> {
    let s = args.src1()?.scalar()?;
    unary(args, rows, |x| x * s)
}
