//! Fused attention and feed-forward kernels.

use super::elementwise::gelu_f32;
use super::{dot, softmax_in_place, NodeArgs, Row, Task, WorkSize};
use crate::api::error::TensorResult;

/// One score per key for each worker.
pub(crate) fn attn_work(args: &NodeArgs, _nth: usize) -> WorkSize {
    WorkSize {
        shared: 0,
        per_thread: args.src1().map(|k| k.ne[1]).unwrap_or(0),
    }
}

pub(crate) fn flash_attn(args: &NodeArgs, task: &mut Task<'_>, rows: &mut [Row<'_>]) -> TensorResult<()> {
    let (q, k, v) = (args.src0()?, args.src1()?, args.opt(0)?);
    let masked = args.opt(1)?.scalar()? != 0.0;
    let (d, n_q, n_kv) = (q.ne[0], q.ne[1], k.ne[1]);
    let scale = 1.0 / (d as f32).sqrt();
    let past = n_kv as isize - n_q as isize;
    let scores = &mut task.private[..n_kv];

    for row in rows.iter_mut() {
        let (iq, i2, i3) = args.dst_coords(row.index);
        let qx = q.row(row.index);
        for (j, s) in scores.iter_mut().enumerate() {
            *s = if masked && j as isize > past + iq as isize {
                f32::NEG_INFINITY
            } else {
                dot(qx, k.row(k.row_index(j, i2, i3))) * scale
            };
        }
        softmax_in_place(scores);
        for (i, y) in row.data.iter_mut().enumerate() {
            *y = dot(v.row(v.row_index(i, i2, i3)), scores);
        }
    }
    Ok(())
}

/// One hidden activation per row for each worker.
pub(crate) fn ff_work(args: &NodeArgs, _nth: usize) -> WorkSize {
    WorkSize {
        shared: 0,
        per_thread: args.src1().map(|b0| b0.ne[1]).unwrap_or(0),
    }
}

pub(crate) fn flash_ff(args: &NodeArgs, task: &mut Task<'_>, rows: &mut [Row<'_>]) -> TensorResult<()> {
    let (a, b0, b1, c0, c1) = (args.src0()?, args.src1()?, args.opt(0)?, args.opt(1)?, args.opt(2)?);
    let hidden = &mut task.private[..b0.ne[1]];

    for row in rows.iter_mut() {
        let x = a.row(row.index);
        for (h, s) in hidden.iter_mut().enumerate() {
            *s = gelu_f32(dot(x, b0.row(h)) + b1.data[h]);
        }
        for (i, y) in row.data.iter_mut().enumerate() {
            *y = dot(c0.row(i), hidden) + c1.data[i];
        }
    }
    Ok(())
}
