//! Row gathering and rotary position embedding.

use super::{NodeArgs, Row, Task};
use crate::api::error::{TensorError, TensorResult};

pub(crate) fn get_rows(args: &NodeArgs, _: &mut Task<'_>, rows: &mut [Row<'_>]) -> TensorResult<()> {
    let (a, idx) = (args.src0()?, args.src1()?);
    let n_rows = a.ne[1];
    for row in rows.iter_mut() {
        let v = idx.data[row.index];
        if v < 0.0 || v as usize >= n_rows {
            return Err(TensorError::IndexOutOfBounds {
                index: v.max(0.0) as usize,
                len: n_rows,
            });
        }
        row.data.copy_from_slice(a.row(v as usize));
    }
    Ok(())
}

const ROPE_BASE: f64 = 10000.0;

/// Rotate consecutive pairs of the first `n_dims` elements of each row.
///
/// Pair `i0` of position `p` turns by `p * 10000^(-i0 / n_dims)`.
pub(crate) fn rope(args: &NodeArgs, _: &mut Task<'_>, rows: &mut [Row<'_>]) -> TensorResult<()> {
    let (a, params) = (args.src0()?, args.src1()?);
    let (n_past, n_dims, mode) = match params.data.as_slice() {
        [p, d, m] => (*p as usize, *d as usize, *m as usize),
        other => {
            return Err(TensorError::InvalidOperation(format!(
                "rope expects 3 parameters, got {}",
                other.len()
            )))
        }
    };
    for row in rows.iter_mut() {
        let (_, i2, _) = args.dst_coords(row.index);
        let src = a.row(row.index);
        row.data.copy_from_slice(src);
        let p = match mode {
            0 => n_past + i2,
            _ if i2 < n_past => continue,
            _ => i2,
        };
        for i0 in (0..n_dims).step_by(2) {
            let theta = p as f64 * ROPE_BASE.powf(-(i0 as f64) / n_dims as f64);
            let (sin, cos) = (theta.sin() as f32, theta.cos() as f32);
            let (x0, x1) = (src[i0], src[i0 + 1]);
            row.data[i0] = x0 * cos - x1 * sin;
            row.data[i0 + 1] = x0 * sin + x1 * cos;
        }
    }
    Ok(())
}
