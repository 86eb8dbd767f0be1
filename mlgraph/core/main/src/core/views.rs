//! Zero-copy shape operations: reshape, views, permute, transpose.
//!
//! All results alias their operand's buffer and are never computed by the
//! executor; only their extents, strides and offset differ.

use crate::api::error::{TensorError, TensorResult};
use crate::api::types::{Op, TensorId, MAX_DIMS, QK};
use crate::core::context::Context;
use crate::core::tensor::contiguous_strides;

impl Context {
    fn view_impl(
        &mut self,
        op: Op,
        a: TensorId,
        ne: [usize; MAX_DIMS],
        n_dims: usize,
        nb: [usize; MAX_DIMS],
        offset: usize,
    ) -> TensorResult<TensorId> {
        let is_node = self.has_grad(a)?;
        let result = self.view_tensor(a)?;
        {
            let t = self.tensor_mut(result)?;
            t.ne = ne;
            t.nb = nb;
            t.n_dims = n_dims;
            t.offset = offset;
        }
        self.link(result, op, Some(a), None, is_node)
    }

    /// Reinterpret a contiguous tensor with new extents and the same element count.
    pub fn reshape(&mut self, a: TensorId, ne: &[usize]) -> TensorResult<TensorId> {
        let t = self.tensor(a)?;
        if !t.is_contiguous() {
            return Err(TensorError::NotContiguous("reshape"));
        }
        if ne.is_empty() || ne.len() > MAX_DIMS {
            return Err(TensorError::InvalidOperation(format!(
                "reshape to {} dimensions",
                ne.len()
            )));
        }
        let mut full = [1; MAX_DIMS];
        full[..ne.len()].copy_from_slice(ne);
        if full.iter().product::<usize>() != t.nelements() {
            return Err(TensorError::ShapeMismatch {
                op: Op::Reshape.name(),
                expected: t.ne.to_vec(),
                got: full.to_vec(),
            });
        }
        if t.dtype.is_quantized() && full[0] % QK != 0 {
            return Err(TensorError::InvalidOperation(format!(
                "reshape of {} needs rows that are whole blocks, got {}",
                t.dtype, full[0]
            )));
        }
        let offset = t.offset;
        self.view_impl(Op::Reshape, a, full, ne.len(), contiguous_strides(&full), offset)
    }

    pub fn reshape_1d(&mut self, a: TensorId, ne0: usize) -> TensorResult<TensorId> {
        self.reshape(a, &[ne0])
    }

    pub fn reshape_2d(&mut self, a: TensorId, ne0: usize, ne1: usize) -> TensorResult<TensorId> {
        self.reshape(a, &[ne0, ne1])
    }

    pub fn reshape_3d(&mut self, a: TensorId, ne0: usize, ne1: usize, ne2: usize) -> TensorResult<TensorId> {
        self.reshape(a, &[ne0, ne1, ne2])
    }

    /// `ne0` consecutive elements of `a` starting `offset` elements in.
    pub fn view_1d(&mut self, a: TensorId, ne0: usize, offset: usize) -> TensorResult<TensorId> {
        self.view_2d(a, ne0, 1, ne0, offset)
    }

    /// An `[ne0, ne1]` window of `a` whose rows are `nb1` elements apart.
    pub fn view_2d(
        &mut self,
        a: TensorId,
        ne0: usize,
        ne1: usize,
        nb1: usize,
        offset: usize,
    ) -> TensorResult<TensorId> {
        let t = self.tensor(a)?;
        if t.grad.is_some() {
            return Err(TensorError::InvalidOperation(
                "view of a tensor that carries a gradient".to_string(),
            ));
        }
        if !t.is_contiguous() {
            return Err(TensorError::NotContiguous("view"));
        }
        if ne1 > 1 && nb1 < ne0 {
            return Err(TensorError::InvalidOperation(format!(
                "view rows of {} elements overlap with a row stride of {}",
                ne0, nb1
            )));
        }
        let end = offset + ne1.saturating_sub(1) * nb1 + ne0;
        if end > t.nelements() {
            return Err(TensorError::IndexOutOfBounds {
                index: end,
                len: t.nelements(),
            });
        }
        let n_dims = if ne1 == 1 { 1 } else { 2 };
        let ne = [ne0, ne1, 1, 1];
        let nb = [1, nb1, nb1 * ne1, nb1 * ne1];
        let offset = t.offset + offset;
        self.view_impl(Op::View, a, ne, n_dims, nb, offset)
    }

    /// Move axis `i` of `a` to position `axes[i]`.
    pub fn permute(&mut self, a: TensorId, axes: [usize; MAX_DIMS]) -> TensorResult<TensorId> {
        let mut seen = [false; MAX_DIMS];
        for &axis in &axes {
            if axis >= MAX_DIMS || seen[axis] {
                return Err(TensorError::InvalidPermutation(axes));
            }
            seen[axis] = true;
        }
        let t = self.tensor(a)?;
        let mut ne = [1; MAX_DIMS];
        let mut nb = [1; MAX_DIMS];
        for (i, &axis) in axes.iter().enumerate() {
            ne[axis] = t.ne[i];
            nb[axis] = t.nb[i];
        }
        let n_dims = t.n_dims;
        let offset = t.offset;
        self.view_impl(Op::Permute, a, ne, n_dims, nb, offset)
    }

    /// Swap the two leading axes.
    pub fn transpose(&mut self, a: TensorId) -> TensorResult<TensorId> {
        let t = self.tensor(a)?;
        let mut ne = t.ne;
        let mut nb = t.nb;
        ne.swap(0, 1);
        nb.swap(0, 1);
        let n_dims = t.n_dims.max(2);
        let offset = t.offset;
        self.view_impl(Op::Transpose, a, ne, n_dims, nb, offset)
    }
}

#[cfg(test)]
mod tests {
    use crate::{ContextParams, ContextPool, DType, Op, TensorError};

    #[test]
    fn test_reshape_aliases() {
        let mut ctx = ContextPool::default().acquire(ContextParams::default()).unwrap();
        let a = ctx.from_f32(&[6], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let r = ctx.reshape_2d(a, 3, 2).unwrap();
        assert_eq!(ctx.tensor(r).unwrap().op(), Op::Reshape);
        assert_eq!(ctx.tensor(r).unwrap().shape(), &[3, 2]);
        ctx.set_f32_1d(r, 0, 10.0).unwrap();
        assert_eq!(ctx.get_f32_1d(a, 0).unwrap(), 10.0);
        assert!(ctx.reshape_2d(a, 4, 2).is_err());
    }

    #[test]
    fn test_transpose_strides() {
        let mut ctx = ContextPool::default().acquire(ContextParams::default()).unwrap();
        let a = ctx.from_f32(&[3, 2], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let t = ctx.transpose(a).unwrap();
        assert_eq!(ctx.tensor(t).unwrap().ne(), [2, 3, 1, 1]);
        assert!(!ctx.tensor(t).unwrap().is_contiguous());
        assert_eq!(ctx.data_f32(t).unwrap(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        assert!(matches!(ctx.reshape_1d(t, 6), Err(TensorError::NotContiguous(_))));
    }

    #[test]
    fn test_permute_validation() {
        let mut ctx = ContextPool::default().acquire(ContextParams::default()).unwrap();
        let a = ctx.new_tensor_3d(DType::F32, 2, 3, 4).unwrap();
        assert!(matches!(
            ctx.permute(a, [0, 0, 1, 2]),
            Err(TensorError::InvalidPermutation(_))
        ));
        assert!(ctx.permute(a, [0, 1, 2, 4]).is_err());
        let p = ctx.permute(a, [2, 0, 1, 3]).unwrap();
        assert_eq!(ctx.tensor(p).unwrap().ne(), [3, 4, 2, 1]);
        assert_eq!(ctx.tensor(p).unwrap().nb(), [2, 6, 1, 24]);
    }

    #[test]
    fn test_view_1d_window() {
        let mut ctx = ContextPool::default().acquire(ContextParams::default()).unwrap();
        let a = ctx.from_f32(&[5], vec![0.0, 1.0, 2.0, 3.0, 4.0]).unwrap();
        let v = ctx.view_1d(a, 2, 3).unwrap();
        assert_eq!(ctx.data_f32(v).unwrap(), vec![3.0, 4.0]);
        assert!(ctx.view_1d(a, 3, 3).is_err());
    }

    #[test]
    fn test_view_rejects_grad() {
        let mut ctx = ContextPool::default().acquire(ContextParams::default()).unwrap();
        let a = ctx.new_tensor_1d(DType::F32, 4).unwrap();
        ctx.set_param(a).unwrap();
        assert!(matches!(
            ctx.view_1d(a, 2, 0),
            Err(TensorError::InvalidOperation(_))
        ));
        assert!(ctx.view_2d(a, 2, 2, 2, 0).is_err());
    }
}
