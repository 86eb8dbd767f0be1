//! Matrix multiplication.
//!
//! `a: [K, M, B2, B3]`, `b: [K, N, B2, B3]`, `dst: [M, N, B2, B3]` with
//! `dst[m, n] = dot(a[:, m], b[:, n])`.
//!
//! When `a` is contiguous every output row is an independent set of dot
//! products and rows are split across workers. When `a` is a strided view
//! (a transposed weight, say) the shared axis is split instead: each worker
//! accumulates partial products over its slice of `K` into a private buffer
//! and FINALIZE sums the partials.

use super::{dot, NodeArgs, Row, Task, Work, WorkSize};
use crate::api::error::TensorResult;

fn split_k(args: &NodeArgs) -> TensorResult<bool> {
    Ok(!args.src0()?.contiguous)
}

fn dst_len(args: &NodeArgs) -> usize {
    args.dst.iter().product()
}

pub(crate) fn work(args: &NodeArgs, _nth: usize) -> WorkSize {
    match split_k(args) {
        Ok(true) => WorkSize {
            shared: 0,
            per_thread: dst_len(args),
        },
        _ => WorkSize::default(),
    }
}

pub(crate) fn init(args: &NodeArgs, work: &mut Work<'_>, _: &mut [Row<'_>]) -> TensorResult<()> {
    if split_k(args)? {
        work.private.iter_mut().for_each(|v| *v = 0.0);
    }
    Ok(())
}

pub(crate) fn compute(args: &NodeArgs, task: &mut Task<'_>, rows: &mut [Row<'_>]) -> TensorResult<()> {
    let (a, b) = (args.src0()?, args.src1()?);
    let [m_len, n_len, b2, b3] = args.dst;

    if !split_k(args)? {
        for row in rows.iter_mut() {
            let (n, i2, i3) = args.dst_coords(row.index);
            let bx = b.row(b.row_index(n, i2, i3));
            for (m, y) in row.data.iter_mut().enumerate() {
                *y = dot(a.row(a.row_index(m, i2, i3)), bx);
            }
        }
        return Ok(());
    }

    let k_len = a.row_len();
    let partial = &mut *task.private;
    for k in (task.ith..k_len).step_by(task.nth) {
        for i3 in 0..b3 {
            for i2 in 0..b2 {
                for n in 0..n_len {
                    let bk = b.row(b.row_index(n, i2, i3))[k];
                    let out = m_len * (n + n_len * (i2 + b2 * i3));
                    for m in 0..m_len {
                        partial[out + m] += a.row(a.row_index(m, i2, i3))[k] * bk;
                    }
                }
            }
        }
    }
    Ok(())
}

pub(crate) fn finalize(args: &NodeArgs, work: &mut Work<'_>, rows: &mut [Row<'_>]) -> TensorResult<()> {
    if !split_k(args)? {
        return Ok(());
    }
    let per_thread = work.per_thread;
    for row in rows.iter_mut() {
        let base = row.index * row.data.len();
        for (m, y) in row.data.iter_mut().enumerate() {
            *y = (0..work.nth)
                .map(|t| work.private[t * per_thread + base + m])
                .sum();
        }
    }
    Ok(())
}
