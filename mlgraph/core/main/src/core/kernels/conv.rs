//! 1-D convolution with "same" padding, stride 1 or 2.
//!
//! INIT lays the kernel out as `[C_out][K][C_in]` and the signal as a
//! zero-padded `[N + K - 1][C_in]` in the shared work area, so every output
//! element is a run of contiguous dot products.

use super::{dot, NodeArgs, Row, Task, Work, WorkSize};
use crate::api::error::TensorResult;
use crate::api::types::Op;

fn stride(op: Op) -> usize {
    if op == Op::Conv1d2s {
        2
    } else {
        1
    }
}

fn dims(args: &NodeArgs) -> TensorResult<(usize, usize, usize, usize)> {
    let (a, b) = (args.src0()?, args.src1()?);
    Ok((a.ne[0], a.ne[1], a.ne[2], b.ne[0]))
}

pub(crate) fn work(args: &NodeArgs, _nth: usize) -> WorkSize {
    match dims(args) {
        Ok((k, c_in, c_out, n)) => WorkSize {
            shared: k * c_in * c_out + (n + k - 1) * c_in,
            per_thread: 0,
        },
        Err(_) => WorkSize::default(),
    }
}

pub(crate) fn init(args: &NodeArgs, work: &mut Work<'_>, _: &mut [Row<'_>]) -> TensorResult<()> {
    let (kernel, signal) = (args.src0()?, args.src1()?);
    let (k, c_in, c_out, n) = dims(args)?;
    let nh = k / 2;
    let (weights, padded) = work.shared.split_at_mut(k * c_in * c_out);

    for co in 0..c_out {
        for ci in 0..c_in {
            let src = kernel.row(kernel.row_index(ci, co, 0));
            for (ki, &w) in src.iter().enumerate() {
                weights[(co * k + ki) * c_in + ci] = w;
            }
        }
    }

    padded.iter_mut().for_each(|v| *v = 0.0);
    for ci in 0..c_in {
        for (i, &x) in signal.row(ci).iter().enumerate().take(n) {
            padded[(i + nh) * c_in + ci] = x;
        }
    }
    Ok(())
}

pub(crate) fn compute(args: &NodeArgs, task: &mut Task<'_>, rows: &mut [Row<'_>]) -> TensorResult<()> {
    let (k, c_in, c_out, _) = dims(args)?;
    let s = stride(args.op);
    let (weights, padded) = task.shared.split_at(k * c_in * c_out);
    let span = k * c_in;
    for row in rows.iter_mut() {
        let co = row.index;
        let w = &weights[co * span..(co + 1) * span];
        for (o, y) in row.data.iter_mut().enumerate() {
            let start = o * s * c_in;
            *y = dot(w, &padded[start..start + span]);
        }
    }
    Ok(())
}
