//! Graph-building operations.
//!
//! Each call validates its operands, allocates the result (a view of the
//! first operand for in-place variants, a fresh tensor otherwise), records
//! the op and operands, and gives out-of-place results a gradient slot when
//! any operand carries one. Nothing is computed here.

use crate::api::error::{TensorError, TensorResult};
use crate::api::types::{DType, Op, TensorId};
use crate::core::context::Context;

impl Context {
    pub(crate) fn has_grad(&self, id: TensorId) -> TensorResult<bool> {
        Ok(self.tensor(id)?.grad.is_some())
    }

    /// Fresh F32 tensor shaped like `like`, used as a gradient slot.
    pub(crate) fn new_grad(&mut self, like: TensorId) -> TensorResult<TensorId> {
        let t = self.tensor(like)?;
        let ne = t.ne;
        let n_dims = t.n_dims;
        self.new_tensor(DType::F32, &ne[..n_dims])
    }

    fn check_same_shape(&self, op: Op, a: TensorId, b: TensorId) -> TensorResult<()> {
        let (ta, tb) = (self.tensor(a)?, self.tensor(b)?);
        if !ta.same_shape(tb) {
            return Err(TensorError::ShapeMismatch {
                op: op.name(),
                expected: ta.ne.to_vec(),
                got: tb.ne.to_vec(),
            });
        }
        Ok(())
    }

    /// Result tensor for an op on `a`: a view when in place, else a new buffer.
    ///
    /// In-place results refuse an `a` that carries a gradient slot, since the
    /// backward pass would need its value from before the mutation.
    fn result_like(&mut self, op: Op, a: TensorId, inplace: bool) -> TensorResult<TensorId> {
        if inplace {
            if self.has_grad(a)? {
                return Err(TensorError::InplaceOnGradient { op: op.name() });
            }
            return self.view_tensor(a);
        }
        let t = self.tensor(a)?;
        let dtype = if t.dtype.is_quantized() { DType::F32 } else { t.dtype };
        let ne = t.ne;
        let n_dims = t.n_dims;
        self.new_tensor(dtype, &ne[..n_dims])
    }

    /// Tag `result` with its op and operands, attaching a gradient slot if needed.
    pub(crate) fn link(
        &mut self,
        result: TensorId,
        op: Op,
        src0: Option<TensorId>,
        src1: Option<TensorId>,
        is_node: bool,
    ) -> TensorResult<TensorId> {
        let grad = if is_node { Some(self.new_grad(result)?) } else { None };
        let t = self.tensor_mut(result)?;
        t.op = op;
        t.src0 = src0;
        t.src1 = src1;
        t.grad = grad;
        Ok(result)
    }

    fn unary_impl(&mut self, op: Op, a: TensorId, inplace: bool) -> TensorResult<TensorId> {
        let is_node = !inplace && self.has_grad(a)?;
        let result = self.result_like(op, a, inplace)?;
        self.link(result, op, Some(a), None, is_node)
    }

    fn binary_impl(&mut self, op: Op, a: TensorId, b: TensorId, inplace: bool) -> TensorResult<TensorId> {
        self.check_same_shape(op, a, b)?;
        let tracked = self.has_grad(a)? || self.has_grad(b)?;
        if inplace && tracked {
            return Err(TensorError::InplaceOnGradient { op: op.name() });
        }
        let result = self.result_like(op, a, inplace)?;
        self.link(result, op, Some(a), Some(b), tracked)
    }

    /// In-place `grad += delta` (or `-=`) while building a backward graph.
    ///
    /// `delta` may carry a gradient slot of its own; backward graphs are not
    /// differentiated again, so only `grad` has to be untracked.
    pub(crate) fn fold_grad_inplace(
        &mut self,
        op: Op,
        grad: TensorId,
        delta: TensorId,
    ) -> TensorResult<TensorId> {
        self.check_same_shape(op, grad, delta)?;
        let result = self.result_like(op, grad, true)?;
        self.link(result, op, Some(grad), Some(delta), false)
    }

    // ==================== Element-wise binary ops ====================

    pub fn add(&mut self, a: TensorId, b: TensorId) -> TensorResult<TensorId> {
        self.binary_impl(Op::Add, a, b, false)
    }

    pub fn add_inplace(&mut self, a: TensorId, b: TensorId) -> TensorResult<TensorId> {
        self.binary_impl(Op::Add, a, b, true)
    }

    pub fn sub(&mut self, a: TensorId, b: TensorId) -> TensorResult<TensorId> {
        self.binary_impl(Op::Sub, a, b, false)
    }

    pub fn sub_inplace(&mut self, a: TensorId, b: TensorId) -> TensorResult<TensorId> {
        self.binary_impl(Op::Sub, a, b, true)
    }

    pub fn mul(&mut self, a: TensorId, b: TensorId) -> TensorResult<TensorId> {
        self.binary_impl(Op::Mul, a, b, false)
    }

    pub fn mul_inplace(&mut self, a: TensorId, b: TensorId) -> TensorResult<TensorId> {
        self.binary_impl(Op::Mul, a, b, true)
    }

    pub fn div(&mut self, a: TensorId, b: TensorId) -> TensorResult<TensorId> {
        self.binary_impl(Op::Div, a, b, false)
    }

    pub fn div_inplace(&mut self, a: TensorId, b: TensorId) -> TensorResult<TensorId> {
        self.binary_impl(Op::Div, a, b, true)
    }

    // ==================== Element-wise unary ops ====================

    /// Copy of `a` in a fresh buffer, computed as a graph node.
    pub fn dup(&mut self, a: TensorId) -> TensorResult<TensorId> {
        self.unary_impl(Op::Dup, a, false)
    }

    pub fn sqr(&mut self, a: TensorId) -> TensorResult<TensorId> {
        self.unary_impl(Op::Sqr, a, false)
    }

    pub fn sqr_inplace(&mut self, a: TensorId) -> TensorResult<TensorId> {
        self.unary_impl(Op::Sqr, a, true)
    }

    pub fn sqrt(&mut self, a: TensorId) -> TensorResult<TensorId> {
        self.unary_impl(Op::Sqrt, a, false)
    }

    pub fn sqrt_inplace(&mut self, a: TensorId) -> TensorResult<TensorId> {
        self.unary_impl(Op::Sqrt, a, true)
    }

    pub fn abs(&mut self, a: TensorId) -> TensorResult<TensorId> {
        self.unary_impl(Op::Abs, a, false)
    }

    pub fn abs_inplace(&mut self, a: TensorId) -> TensorResult<TensorId> {
        self.unary_impl(Op::Abs, a, true)
    }

    /// Sign: -1, 0 or 1 per element.
    pub fn sgn(&mut self, a: TensorId) -> TensorResult<TensorId> {
        self.unary_impl(Op::Sgn, a, false)
    }

    pub fn sgn_inplace(&mut self, a: TensorId) -> TensorResult<TensorId> {
        self.unary_impl(Op::Sgn, a, true)
    }

    pub fn neg(&mut self, a: TensorId) -> TensorResult<TensorId> {
        self.unary_impl(Op::Neg, a, false)
    }

    pub fn neg_inplace(&mut self, a: TensorId) -> TensorResult<TensorId> {
        self.unary_impl(Op::Neg, a, true)
    }

    /// Heaviside step: 1 where `a > 0`, else 0.
    pub fn step(&mut self, a: TensorId) -> TensorResult<TensorId> {
        self.unary_impl(Op::Step, a, false)
    }

    pub fn step_inplace(&mut self, a: TensorId) -> TensorResult<TensorId> {
        self.unary_impl(Op::Step, a, true)
    }

    pub fn relu(&mut self, a: TensorId) -> TensorResult<TensorId> {
        self.unary_impl(Op::Relu, a, false)
    }

    pub fn relu_inplace(&mut self, a: TensorId) -> TensorResult<TensorId> {
        self.unary_impl(Op::Relu, a, true)
    }

    pub fn gelu(&mut self, a: TensorId) -> TensorResult<TensorId> {
        self.unary_impl(Op::Gelu, a, false)
    }

    pub fn gelu_inplace(&mut self, a: TensorId) -> TensorResult<TensorId> {
        self.unary_impl(Op::Gelu, a, true)
    }

    pub fn silu(&mut self, a: TensorId) -> TensorResult<TensorId> {
        self.unary_impl(Op::Silu, a, false)
    }

    pub fn silu_inplace(&mut self, a: TensorId) -> TensorResult<TensorId> {
        self.unary_impl(Op::Silu, a, true)
    }

    // ==================== Normalization ====================

    /// Normalize each row to zero mean and unit variance.
    pub fn norm(&mut self, a: TensorId) -> TensorResult<TensorId> {
        self.unary_impl(Op::Norm, a, false)
    }

    pub fn norm_inplace(&mut self, a: TensorId) -> TensorResult<TensorId> {
        self.unary_impl(Op::Norm, a, true)
    }

    /// Divide each row by its root mean square.
    pub fn rms_norm(&mut self, a: TensorId) -> TensorResult<TensorId> {
        self.unary_impl(Op::RmsNorm, a, false)
    }

    pub fn rms_norm_inplace(&mut self, a: TensorId) -> TensorResult<TensorId> {
        self.unary_impl(Op::RmsNorm, a, true)
    }

    // ==================== Reductions and broadcast ====================

    /// Sum of all elements, as a one-element tensor.
    pub fn sum(&mut self, a: TensorId) -> TensorResult<TensorId> {
        let is_node = self.has_grad(a)?;
        let result = self.new_tensor_1d(DType::F32, 1)?;
        self.link(result, Op::Sum, Some(a), None, is_node)
    }

    /// Mean of each row: `[ne0, ne1, ne2, ne3] -> [1, ne1, ne2, ne3]`.
    pub fn mean(&mut self, a: TensorId) -> TensorResult<TensorId> {
        let t = self.tensor(a)?;
        let ne = [1, t.ne[1], t.ne[2], t.ne[3]];
        let n_dims = t.n_dims;
        let is_node = t.grad.is_some();
        let result = self.new_tensor(DType::F32, &ne[..n_dims])?;
        self.link(result, Op::Mean, Some(a), None, is_node)
    }

    /// Tile `a` to the shape of `b`. Every extent of `b` must be a multiple of `a`'s.
    pub fn repeat(&mut self, a: TensorId, b: TensorId) -> TensorResult<TensorId> {
        let (ta, tb) = (self.tensor(a)?, self.tensor(b)?);
        if !can_tile(&ta.ne, &tb.ne) {
            return Err(TensorError::ShapeMismatch {
                op: Op::Repeat.name(),
                expected: tb.ne.to_vec(),
                got: ta.ne.to_vec(),
            });
        }
        let is_node = ta.grad.is_some();
        if ta.same_shape(tb) && !is_node {
            return Ok(a);
        }
        let ne = tb.ne;
        let n_dims = tb.n_dims;
        let result = self.new_tensor(DType::F32, &ne[..n_dims])?;
        self.link(result, Op::Repeat, Some(a), Some(b), is_node)
    }

    /// Sum the tiles of `a` down to the shape of `b` (inverse of [`Self::repeat`]).
    pub fn repeat_back(&mut self, a: TensorId, b: TensorId) -> TensorResult<TensorId> {
        let (ta, tb) = (self.tensor(a)?, self.tensor(b)?);
        if !can_tile(&tb.ne, &ta.ne) {
            return Err(TensorError::ShapeMismatch {
                op: Op::RepeatBack.name(),
                expected: ta.ne.to_vec(),
                got: tb.ne.to_vec(),
            });
        }
        let is_node = ta.grad.is_some();
        let ne = tb.ne;
        let n_dims = tb.n_dims;
        let result = self.new_tensor(DType::F32, &ne[..n_dims])?;
        self.link(result, Op::RepeatBack, Some(a), Some(b), is_node)
    }

    // ==================== Matrix multiplication ====================

    /// `a: [K, M, B2, B3]`, `b: [K, N, B2, B3]` -> `[M, N, B2, B3]`.
    ///
    /// Both operands are laid out with the shared axis first, so the result
    /// element `(m, n)` is the dot product of row `m` of `a` and row `n` of `b`.
    pub fn mul_mat(&mut self, a: TensorId, b: TensorId) -> TensorResult<TensorId> {
        let (ta, tb) = (self.tensor(a)?, self.tensor(b)?);
        if ta.ne[0] != tb.ne[0] || ta.ne[2] != tb.ne[2] || ta.ne[3] != tb.ne[3] {
            return Err(TensorError::MatmulShapeMismatch { a: ta.ne, b: tb.ne });
        }
        let is_node = ta.grad.is_some() || tb.grad.is_some();
        let ne = [ta.ne[1], tb.ne[1], ta.ne[2], tb.ne[3]];
        // a vector times a matrix still yields one output per row of `b`
        let used = ne.iter().rposition(|&n| n != 1).map_or(1, |i| i + 1);
        let n_dims = ta.n_dims.min(tb.n_dims).max(used);
        let result = self.new_tensor(DType::F32, &ne[..n_dims])?;
        self.link(result, Op::MulMat, Some(a), Some(b), is_node)
    }

    // ==================== Scaling and copies ====================

    fn scale_impl(&mut self, a: TensorId, s: TensorId, inplace: bool) -> TensorResult<TensorId> {
        if !self.tensor(s)?.is_scalar() {
            return Err(TensorError::ShapeMismatch {
                op: Op::Scale.name(),
                expected: vec![1, 1, 1, 1],
                got: self.tensor(s)?.ne.to_vec(),
            });
        }
        let tracked = self.has_grad(a)? || self.has_grad(s)?;
        if inplace && tracked {
            return Err(TensorError::InplaceOnGradient { op: Op::Scale.name() });
        }
        let result = self.result_like(Op::Scale, a, inplace)?;
        self.link(result, Op::Scale, Some(a), Some(s), tracked)
    }

    /// Multiply every element of `a` by the scalar tensor `s`.
    pub fn scale(&mut self, a: TensorId, s: TensorId) -> TensorResult<TensorId> {
        self.scale_impl(a, s, false)
    }

    pub fn scale_inplace(&mut self, a: TensorId, s: TensorId) -> TensorResult<TensorId> {
        self.scale_impl(a, s, true)
    }

    /// Copy `a` into `b`'s buffer, converting element type as needed.
    ///
    /// The result is a view of `b`; both must have the same element count.
    pub fn cpy(&mut self, a: TensorId, b: TensorId) -> TensorResult<TensorId> {
        let (ta, tb) = (self.tensor(a)?, self.tensor(b)?);
        if ta.nelements() != tb.nelements() {
            return Err(TensorError::ShapeMismatch {
                op: Op::Cpy.name(),
                expected: vec![tb.nelements()],
                got: vec![ta.nelements()],
            });
        }
        if tb.grad.is_some() {
            return Err(TensorError::InplaceOnGradient { op: Op::Cpy.name() });
        }
        let is_node = ta.grad.is_some();
        let result = self.view_tensor(b)?;
        self.link(result, Op::Cpy, Some(a), Some(b), is_node)
    }

    /// Gather rows of the matrix `a` selected by the I32 vector `b`.
    pub fn get_rows(&mut self, a: TensorId, b: TensorId) -> TensorResult<TensorId> {
        let (ta, tb) = (self.tensor(a)?, self.tensor(b)?);
        if !ta.is_matrix() || !tb.is_vector() {
            return Err(TensorError::ShapeMismatch {
                op: Op::GetRows.name(),
                expected: vec![ta.ne[0], ta.ne[1]],
                got: tb.ne.to_vec(),
            });
        }
        if tb.dtype != DType::I32 {
            return Err(TensorError::UnsupportedType {
                op: Op::GetRows.name(),
                dtype: tb.dtype,
            });
        }
        let is_node = ta.grad.is_some();
        let ne = [ta.ne[0], tb.ne[0]];
        let result = self.new_tensor(DType::F32, &ne)?;
        self.link(result, Op::GetRows, Some(a), Some(b), is_node)
    }

    // ==================== Attention building blocks ====================

    /// Set `a[i, j]` to -inf wherever `i > n_past + j` (causal mask).
    pub fn diag_mask_inf(&mut self, a: TensorId, n_past: usize) -> TensorResult<TensorId> {
        let is_node = self.has_grad(a)?;
        let past = self.new_i32(to_i32(n_past)?)?;
        let result = self.result_like(Op::DiagMaskInf, a, false)?;
        self.link(result, Op::DiagMaskInf, Some(a), Some(past), is_node)
    }

    /// Row-wise softmax.
    pub fn soft_max(&mut self, a: TensorId) -> TensorResult<TensorId> {
        let is_node = self.has_grad(a)?;
        let result = self.result_like(Op::SoftMax, a, false)?;
        self.link(result, Op::SoftMax, Some(a), None, is_node)
    }

    /// Rotary position embedding over the first `n_dims` elements of each row.
    ///
    /// Axis 2 is the position axis. `mode` 0 rotates every position by
    /// `n_past + i2`; mode 1 rotates only positions `i2 >= n_past`, by `i2`.
    pub fn rope(&mut self, a: TensorId, n_past: usize, n_dims: usize, mode: usize) -> TensorResult<TensorId> {
        let ne0 = self.tensor(a)?.ne[0];
        if n_dims % 2 != 0 || n_dims > ne0 {
            return Err(TensorError::InvalidOperation(format!(
                "rope needs an even n_dims <= {}, got {}",
                ne0, n_dims
            )));
        }
        if mode > 1 {
            return Err(TensorError::InvalidOperation(format!("unknown rope mode {}", mode)));
        }
        let is_node = self.has_grad(a)?;
        let params = self.from_i32(&[3], vec![to_i32(n_past)?, to_i32(n_dims)?, to_i32(mode)?])?;
        let result = self.result_like(Op::Rope, a, false)?;
        self.link(result, Op::Rope, Some(a), Some(params), is_node)
    }

    fn conv_1d_impl(&mut self, op: Op, a: TensorId, b: TensorId, stride: usize) -> TensorResult<TensorId> {
        let (ta, tb) = (self.tensor(a)?, self.tensor(b)?);
        if ta.ne[1] != tb.ne[1] || ta.ne[3] != 1 || tb.ne[2] != 1 || tb.ne[3] != 1 {
            return Err(TensorError::ShapeMismatch {
                op: op.name(),
                expected: vec![ta.ne[0], ta.ne[1], ta.ne[2]],
                got: tb.ne.to_vec(),
            });
        }
        if ta.ne[0] % 2 == 0 {
            return Err(TensorError::InvalidOperation(format!(
                "{} needs an odd kernel width, got {}",
                op.name(),
                ta.ne[0]
            )));
        }
        let is_node = ta.grad.is_some() || tb.grad.is_some();
        let ne = [tb.ne[0] / stride, ta.ne[2]];
        let result = self.new_tensor(DType::F32, &ne)?;
        self.link(result, op, Some(a), Some(b), is_node)
    }

    /// 1-D convolution, stride 1, "same" padding.
    ///
    /// `a` is the kernel `[K, C_in, C_out]` (K odd), `b` the signal `[N, C_in]`;
    /// the result is `[N, C_out]`.
    pub fn conv_1d_1s(&mut self, a: TensorId, b: TensorId) -> TensorResult<TensorId> {
        self.conv_1d_impl(Op::Conv1d1s, a, b, 1)
    }

    /// 1-D convolution, stride 2: result `[N / 2, C_out]`.
    pub fn conv_1d_2s(&mut self, a: TensorId, b: TensorId) -> TensorResult<TensorId> {
        self.conv_1d_impl(Op::Conv1d2s, a, b, 2)
    }

    /// Fused `softmax(k·q / sqrt(D)) · v` per query row.
    ///
    /// `q: [D, N, ..]`, `k: [D, M, ..]`, `v: [M, D, ..]` (values stored
    /// transposed); result `[D, N, ..]`. With `masked`, key `j` is hidden from
    /// query `i` when `j > M - N + i`.
    pub fn flash_attn(&mut self, q: TensorId, k: TensorId, v: TensorId, masked: bool) -> TensorResult<TensorId> {
        let (tq, tk, tv) = (self.tensor(q)?, self.tensor(k)?, self.tensor(v)?);
        let batch_ok = tq.ne[2] == tk.ne[2] && tk.ne[2] == tv.ne[2] && tq.ne[3] == tk.ne[3] && tk.ne[3] == tv.ne[3];
        if tk.ne[0] != tq.ne[0] || tv.ne[1] != tq.ne[0] || tv.ne[0] != tk.ne[1] || !batch_ok {
            return Err(TensorError::ShapeMismatch {
                op: Op::FlashAttn.name(),
                expected: vec![tq.ne[0], tk.ne[1]],
                got: tv.ne.to_vec(),
            });
        }
        let is_node = tq.grad.is_some() || tk.grad.is_some() || tv.grad.is_some();
        let ne = tq.ne;
        let n_dims = tq.n_dims;
        let mask = self.new_i32(i32::from(masked))?;
        let result = self.new_tensor(DType::F32, &ne[..n_dims])?;
        self.link(result, Op::FlashAttn, Some(q), Some(k), is_node)?;
        let t = self.tensor_mut(result)?;
        t.opt[0] = Some(v);
        t.opt[1] = Some(mask);
        Ok(result)
    }

    /// Fused feed-forward block: `c0 · gelu(b0 · a + b1) + c1` per row of `a`.
    ///
    /// `a: [D, N, ..]`, `b0: [D, H]`, `b1: [H]`, `c0: [H, D]`, `c1: [D]`.
    pub fn flash_ff(
        &mut self,
        a: TensorId,
        b0: TensorId,
        b1: TensorId,
        c0: TensorId,
        c1: TensorId,
    ) -> TensorResult<TensorId> {
        let ta = self.tensor(a)?;
        let (d, h) = (ta.ne[0], self.tensor(b0)?.ne[1]);
        let expect = [(b0, [d, h]), (b1, [h, 1]), (c0, [h, d]), (c1, [d, 1])];
        let mut is_node = ta.grad.is_some();
        for (id, [e0, e1]) in expect {
            let t = self.tensor(id)?;
            if t.ne != [e0, e1, 1, 1] {
                return Err(TensorError::ShapeMismatch {
                    op: Op::FlashFf.name(),
                    expected: vec![e0, e1, 1, 1],
                    got: t.ne.to_vec(),
                });
            }
            is_node |= t.grad.is_some();
        }
        let ta = self.tensor(a)?;
        let ne = ta.ne;
        let n_dims = ta.n_dims;
        let result = self.new_tensor(DType::F32, &ne[..n_dims])?;
        self.link(result, Op::FlashFf, Some(a), Some(b0), is_node)?;
        let t = self.tensor_mut(result)?;
        t.opt[0] = Some(b1);
        t.opt[1] = Some(c0);
        t.opt[2] = Some(c1);
        Ok(result)
    }
}

/// True if every extent of `to` is a whole multiple of the matching extent of `from`.
fn can_tile(from: &[usize; 4], to: &[usize; 4]) -> bool {
    from.iter().zip(to.iter()).all(|(&f, &t)| f > 0 && t % f == 0)
}

fn to_i32(v: usize) -> TensorResult<i32> {
    i32::try_from(v).map_err(|_| TensorError::InvalidOperation(format!("{} does not fit in i32", v)))
}
