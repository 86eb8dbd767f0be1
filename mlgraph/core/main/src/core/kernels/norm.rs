//! Row-wise normalization, masking and softmax.

use super::{softmax_in_place, NodeArgs, Row, Task};
use crate::api::error::TensorResult;

pub(crate) const NORM_EPS: f32 = 1e-5;

pub(crate) fn norm(args: &NodeArgs, _: &mut Task<'_>, rows: &mut [Row<'_>]) -> TensorResult<()> {
    let a = args.src0()?;
    for row in rows.iter_mut() {
        let x = a.row(row.index);
        let n = x.len() as f32;
        let mean = x.iter().sum::<f32>() / n;
        let var = x.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
        let inv = 1.0 / (var + NORM_EPS).sqrt();
        for (y, v) in row.data.iter_mut().zip(x) {
            *y = (v - mean) * inv;
        }
    }
    Ok(())
}

pub(crate) fn rms_norm(args: &NodeArgs, _: &mut Task<'_>, rows: &mut [Row<'_>]) -> TensorResult<()> {
    let a = args.src0()?;
    for row in rows.iter_mut() {
        let x = a.row(row.index);
        let mean_sq = x.iter().map(|v| v * v).sum::<f32>() / x.len() as f32;
        let inv = 1.0 / (mean_sq + NORM_EPS).sqrt();
        for (y, v) in row.data.iter_mut().zip(x) {
            *y = v * inv;
        }
    }
    Ok(())
}

pub(crate) fn diag_mask_inf(args: &NodeArgs, _: &mut Task<'_>, rows: &mut [Row<'_>]) -> TensorResult<()> {
    let a = args.src0()?;
    let n_past = args.src1()?.scalar()? as usize;
    for row in rows.iter_mut() {
        let (j, _, _) = args.dst_coords(row.index);
        for (i, (y, &x)) in row.data.iter_mut().zip(a.row(row.index)).enumerate() {
            *y = if i > n_past + j { f32::NEG_INFINITY } else { x };
        }
    }
    Ok(())
}

pub(crate) fn soft_max(args: &NodeArgs, _: &mut Task<'_>, rows: &mut [Row<'_>]) -> TensorResult<()> {
    let a = args.src0()?;
    for row in rows.iter_mut() {
        row.data.copy_from_slice(a.row(row.index));
        softmax_in_place(row.data);
    }
    Ok(())
}
