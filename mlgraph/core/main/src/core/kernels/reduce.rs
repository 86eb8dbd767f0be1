//! Reductions and tiling: sum, mean, repeat, repeat_back.

use super::{NodeArgs, Row, Task};
use crate::api::error::TensorResult;

pub(crate) fn sum(args: &NodeArgs, _: &mut Task<'_>, rows: &mut [Row<'_>]) -> TensorResult<()> {
    let a = args.src0()?;
    let total: f32 = a.data.iter().sum();
    for row in rows.iter_mut() {
        row.data[0] = total;
    }
    Ok(())
}

pub(crate) fn mean(args: &NodeArgs, _: &mut Task<'_>, rows: &mut [Row<'_>]) -> TensorResult<()> {
    let a = args.src0()?;
    let n = a.row_len() as f32;
    for row in rows.iter_mut() {
        row.data[0] = a.row(row.index).iter().sum::<f32>() / n;
    }
    Ok(())
}

pub(crate) fn repeat(args: &NodeArgs, _: &mut Task<'_>, rows: &mut [Row<'_>]) -> TensorResult<()> {
    let a = args.src0()?;
    let [a0, a1, a2, a3] = a.ne;
    for row in rows.iter_mut() {
        let (i1, i2, i3) = args.dst_coords(row.index);
        let src = a.row(a.row_index(i1 % a1, i2 % a2, i3 % a3));
        for (i0, y) in row.data.iter_mut().enumerate() {
            *y = src[i0 % a0];
        }
    }
    Ok(())
}

/// Each output element accumulates every tile position that maps onto it.
pub(crate) fn repeat_back(args: &NodeArgs, _: &mut Task<'_>, rows: &mut [Row<'_>]) -> TensorResult<()> {
    let a = args.src0()?;
    let [b0, b1, b2, b3] = args.dst;
    let (k0, k1, k2, k3) = (a.ne[0] / b0, a.ne[1] / b1, a.ne[2] / b2, a.ne[3] / b3);
    for row in rows.iter_mut() {
        let (j1, j2, j3) = args.dst_coords(row.index);
        row.data.iter_mut().for_each(|y| *y = 0.0);
        for t3 in 0..k3 {
            for t2 in 0..k2 {
                for t1 in 0..k1 {
                    let src = a.row(a.row_index(j1 + t1 * b1, j2 + t2 * b2, j3 + t3 * b3));
                    for t0 in 0..k0 {
                        for (j0, y) in row.data.iter_mut().enumerate() {
                            *y += src[j0 + t0 * b0];
                        }
                    }
                }
            }
        }
    }
    Ok(())
}
