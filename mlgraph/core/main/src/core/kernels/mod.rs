//! Compute kernels and the per-node data they run on.
//!
//! Before a node runs, its operands are gathered into dense row-major f32
//! copies ([`Operand`]) so kernels never deal with strides, aliasing or
//! block formats. Kernels write into [`Row`]s of a dense output staging
//! buffer; the executor scatters that into the destination afterwards.

pub(crate) mod attention;
pub(crate) mod conv;
pub(crate) mod elementwise;
pub(crate) mod matmul;
pub(crate) mod norm;
pub(crate) mod reduce;
pub(crate) mod rows;

use crate::api::error::{TensorError, TensorResult};
use crate::api::types::{DType, Op, TensorId, MAX_DIMS, MAX_OPT};
use crate::core::context::Context;

pub(crate) const N_SRC: usize = 2 + MAX_OPT;

/// Dense copy of one operand.
pub(crate) struct Operand {
    pub ne: [usize; MAX_DIMS],
    pub dtype: DType,
    /// Whether the operand's own layout (before gathering) was contiguous.
    pub contiguous: bool,
    pub data: Vec<f32>,
}

impl Operand {
    pub fn row_len(&self) -> usize {
        self.ne[0]
    }

    pub fn row(&self, r: usize) -> &[f32] {
        let n = self.ne[0];
        &self.data[r * n..(r + 1) * n]
    }

    /// Flat row index of `(i1, i2, i3)`.
    pub fn row_index(&self, i1: usize, i2: usize, i3: usize) -> usize {
        i1 + self.ne[1] * (i2 + self.ne[2] * i3)
    }

    pub fn scalar(&self) -> TensorResult<f32> {
        self.data.first().copied().ok_or(TensorError::IndexOutOfBounds { index: 0, len: 0 })
    }
}

/// Everything a kernel may read for one node.
pub(crate) struct NodeArgs {
    pub op: Op,
    pub dst: [usize; MAX_DIMS],
    pub srcs: [Option<Operand>; N_SRC],
}

impl NodeArgs {
    fn build(ctx: &Context, id: TensorId, with_data: bool) -> TensorResult<Self> {
        let t = ctx.tensor(id)?;
        let ids: [Option<TensorId>; N_SRC] = [
            t.src0, t.src1, t.opt[0], t.opt[1], t.opt[2], t.opt[3],
        ];
        let mut srcs: [Option<Operand>; N_SRC] = Default::default();
        for (slot, src) in srcs.iter_mut().zip(ids) {
            if let Some(src) = src {
                let s = ctx.tensor(src)?;
                *slot = Some(Operand {
                    ne: s.ne,
                    dtype: s.dtype,
                    contiguous: s.is_contiguous(),
                    data: if with_data { ctx.data_f32(src)? } else { Vec::new() },
                });
            }
        }
        Ok(Self { op: t.op, dst: t.ne, srcs })
    }

    /// Shapes and types only; used for scheduling decisions.
    pub fn describe(ctx: &Context, id: TensorId) -> TensorResult<Self> {
        Self::build(ctx, id, false)
    }

    /// Shapes plus gathered operand data.
    pub fn gather(ctx: &Context, id: TensorId) -> TensorResult<Self> {
        Self::build(ctx, id, true)
    }

    fn src(&self, i: usize, slot: &str) -> TensorResult<&Operand> {
        self.srcs[i].as_ref().ok_or_else(|| {
            TensorError::InvalidOperation(format!("{} is missing operand {}", self.op.name(), slot))
        })
    }

    pub fn src0(&self) -> TensorResult<&Operand> {
        self.src(0, "src0")
    }

    pub fn src1(&self) -> TensorResult<&Operand> {
        self.src(1, "src1")
    }

    pub fn opt(&self, i: usize) -> TensorResult<&Operand> {
        self.src(2 + i, "opt")
    }

    /// Operands that are present, in slot order.
    pub fn present(&self) -> impl Iterator<Item = &Operand> {
        self.srcs.iter().flatten()
    }

    /// `(i1, i2, i3)` of output row `r`.
    pub fn dst_coords(&self, r: usize) -> (usize, usize, usize) {
        let [_, ne1, ne2, _] = self.dst;
        (r % ne1, (r / ne1) % ne2, r / (ne1 * ne2))
    }
}

/// Scratch space needed by one node, in f32 elements.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WorkSize {
    /// Written during INIT, read by every worker during COMPUTE.
    pub shared: usize,
    /// Private to each worker.
    pub per_thread: usize,
}

impl WorkSize {
    pub fn total(&self, nth: usize) -> usize {
        self.shared + self.per_thread * nth
    }
}

/// Scratch as seen by thread 0 during INIT and FINALIZE.
pub(crate) struct Work<'a> {
    pub shared: &'a mut [f32],
    /// All workers' private areas, `per_thread` elements each.
    pub private: &'a mut [f32],
    pub per_thread: usize,
    pub nth: usize,
}

/// One worker's view during COMPUTE.
pub(crate) struct Task<'a> {
    pub ith: usize,
    pub nth: usize,
    pub shared: &'a [f32],
    pub private: &'a mut [f32],
}

/// An output row owned by the current worker.
pub(crate) struct Row<'a> {
    pub index: usize,
    pub data: &'a mut [f32],
}

pub(crate) type PhaseFn = fn(&NodeArgs, &mut Work<'_>, &mut [Row<'_>]) -> TensorResult<()>;
pub(crate) type ComputeFn = fn(&NodeArgs, &mut Task<'_>, &mut [Row<'_>]) -> TensorResult<()>;
pub(crate) type WorkFn = fn(&NodeArgs, usize) -> WorkSize;

/// The three phases of an op's forward computation.
#[derive(Clone, Copy)]
pub(crate) struct Kernel {
    pub init: Option<PhaseFn>,
    pub compute: ComputeFn,
    pub finalize: Option<PhaseFn>,
    pub work: WorkFn,
}

impl Kernel {
    /// A kernel that only needs COMPUTE and no scratch.
    pub const fn rows(compute: ComputeFn) -> Self {
        Self {
            init: None,
            compute,
            finalize: None,
            work: no_work,
        }
    }
}

fn no_work(_: &NodeArgs, _: usize) -> WorkSize {
    WorkSize::default()
}

pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Numerically stable in-place softmax; an all `-inf` row becomes zeros.
pub(crate) fn softmax_in_place(values: &mut [f32]) {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max == f32::NEG_INFINITY {
        values.iter_mut().for_each(|v| *v = 0.0);
        return;
    }
    let mut sum = 0.0f32;
    for v in values.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    let inv = 1.0 / sum;
    values.iter_mut().for_each(|v| *v *= inv);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_in_place() {
        let mut v = vec![1.0, 2.0, 3.0];
        softmax_in_place(&mut v);
        assert!((v.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(v[2] > v[1] && v[1] > v[0]);
    }

    #[test]
    fn test_softmax_masked_entries() {
        let mut v = vec![0.0, f32::NEG_INFINITY];
        softmax_in_place(&mut v);
        assert_eq!(v, vec![1.0, 0.0]);
    }

    #[test]
    fn test_work_size_total() {
        let ws = WorkSize { shared: 10, per_thread: 3 };
        assert_eq!(ws.total(4), 22);
    }
}
