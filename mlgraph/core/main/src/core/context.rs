//! Allocation context: the tensor table and buffers of one acquired pool slot.

use crate::api::error::{TensorError, TensorResult};
use crate::api::types::{ContextParams, DType, TensorId, MAX_DIMS, QK};
use crate::core::arena::Lease;
use crate::core::runtime::RuntimeConfig;
use crate::core::tensor::{Buffer, BufferId, Tensor};

/// Owns every tensor built inside it. Tensors are addressed by [`TensorId`]
/// and live until the context is released.
pub struct Context {
    lease: Lease,
    config: RuntimeConfig,
    mem_size: usize,
    mem_used: usize,
    pub(crate) tensors: Vec<Tensor>,
    pub(crate) buffers: Vec<Buffer>,
}

impl Context {
    pub(crate) fn new(lease: Lease, config: RuntimeConfig, params: ContextParams) -> Self {
        Self {
            lease,
            config,
            mem_size: params.mem_size,
            mem_used: 0,
            tensors: Vec::new(),
            buffers: Vec::new(),
        }
    }

    /// Index of the pool slot this context occupies.
    pub fn slot(&self) -> usize {
        self.lease.slot()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn mem_size(&self) -> usize {
        self.mem_size
    }

    pub fn mem_used(&self) -> usize {
        self.mem_used
    }

    pub fn n_tensors(&self) -> usize {
        self.tensors.len()
    }

    /// Give the slot back to the pool. Equivalent to dropping the context.
    pub fn release(self) {}

    pub fn tensor(&self, id: TensorId) -> TensorResult<&Tensor> {
        let len = self.tensors.len();
        self.tensors
            .get(id.0)
            .ok_or(TensorError::IndexOutOfBounds { index: id.0, len })
    }

    pub(crate) fn tensor_mut(&mut self, id: TensorId) -> TensorResult<&mut Tensor> {
        let len = self.tensors.len();
        self.tensors
            .get_mut(id.0)
            .ok_or(TensorError::IndexOutOfBounds { index: id.0, len })
    }

    pub(crate) fn push_tensor(&mut self, tensor: Tensor) -> TensorId {
        self.tensors.push(tensor);
        TensorId(self.tensors.len() - 1)
    }

    fn buffer(&self, id: BufferId) -> TensorResult<&Buffer> {
        let len = self.buffers.len();
        self.buffers
            .get(id)
            .ok_or(TensorError::IndexOutOfBounds { index: id, len })
    }

    fn reserve(&mut self, bytes: usize) -> TensorResult<()> {
        let available = self.mem_size.saturating_sub(self.mem_used);
        if bytes > available {
            return Err(TensorError::OutOfMemory {
                needed: bytes,
                available,
            });
        }
        self.mem_used += bytes;
        Ok(())
    }

    fn push_buffer(&mut self, buffer: Buffer) -> TensorResult<BufferId> {
        self.reserve(buffer.nbytes())?;
        self.buffers.push(buffer);
        Ok(self.buffers.len() - 1)
    }

    fn check_shape(dtype: DType, ne: &[usize]) -> TensorResult<[usize; MAX_DIMS]> {
        if ne.is_empty() || ne.len() > MAX_DIMS {
            return Err(TensorError::InvalidOperation(format!(
                "tensors have 1 to {} dimensions, got {}",
                MAX_DIMS,
                ne.len()
            )));
        }
        match dtype {
            DType::F32 | DType::I32 => {}
            DType::Q4_0 | DType::Q4_1 => {
                if ne[0] % QK != 0 {
                    return Err(mlgraph_quant::QuantError::BlockAlignment(format!(
                        "{} rows must be a multiple of {} elements, got {}",
                        dtype, QK, ne[0]
                    ))
                    .into());
                }
            }
            other => {
                return Err(TensorError::UnsupportedType {
                    op: "new_tensor",
                    dtype: other,
                })
            }
        }
        let mut full = [1; MAX_DIMS];
        full[..ne.len()].copy_from_slice(ne);
        Ok(full)
    }

    fn alloc(&mut self, dtype: DType, ne: &[usize], buffer: Buffer) -> TensorResult<TensorId> {
        let full = Self::check_shape(dtype, ne)?;
        let buffer = self.push_buffer(buffer)?;
        Ok(self.push_tensor(Tensor::new(dtype, ne.len(), full, buffer)))
    }

    // ==================== Construction ====================

    /// Allocate a zero-filled tensor.
    ///
    /// Only `F32`, `I32` and the two quantized formats have storage; other
    /// element types fail with [`TensorError::UnsupportedType`].
    pub fn new_tensor(&mut self, dtype: DType, ne: &[usize]) -> TensorResult<TensorId> {
        let full = Self::check_shape(dtype, ne)?;
        let n: usize = full.iter().product();
        let bytes = dtype.row_size(full[0]) * full[1] * full[2] * full[3];
        self.reserve(bytes)?;
        let buffer = match dtype {
            DType::F32 => Buffer::F32(self.lease.alloc_f32(n)),
            DType::I32 => Buffer::I32(vec![0; n]),
            _ => Buffer::Quantized {
                dtype,
                bytes: vec![0; bytes],
            },
        };
        // reserve() already charged the budget for this buffer
        self.buffers.push(buffer);
        let id = self.buffers.len() - 1;
        Ok(self.push_tensor(Tensor::new(dtype, ne.len(), full, id)))
    }

    pub fn new_tensor_1d(&mut self, dtype: DType, ne0: usize) -> TensorResult<TensorId> {
        self.new_tensor(dtype, &[ne0])
    }

    pub fn new_tensor_2d(&mut self, dtype: DType, ne0: usize, ne1: usize) -> TensorResult<TensorId> {
        self.new_tensor(dtype, &[ne0, ne1])
    }

    pub fn new_tensor_3d(
        &mut self,
        dtype: DType,
        ne0: usize,
        ne1: usize,
        ne2: usize,
    ) -> TensorResult<TensorId> {
        self.new_tensor(dtype, &[ne0, ne1, ne2])
    }

    pub fn new_tensor_4d(
        &mut self,
        dtype: DType,
        ne0: usize,
        ne1: usize,
        ne2: usize,
        ne3: usize,
    ) -> TensorResult<TensorId> {
        self.new_tensor(dtype, &[ne0, ne1, ne2, ne3])
    }

    /// A one-element F32 tensor holding `value`.
    pub fn new_f32(&mut self, value: f32) -> TensorResult<TensorId> {
        self.from_f32(&[1], vec![value])
    }

    /// A one-element I32 tensor holding `value`.
    pub fn new_i32(&mut self, value: i32) -> TensorResult<TensorId> {
        self.from_i32(&[1], vec![value])
    }

    /// Wrap existing f32 data; `data.len()` must equal the element count.
    pub fn from_f32(&mut self, ne: &[usize], data: Vec<f32>) -> TensorResult<TensorId> {
        check_len("from_f32", ne, data.len())?;
        self.alloc(DType::F32, ne, Buffer::F32(data))
    }

    /// Wrap existing i32 data; `data.len()` must equal the element count.
    pub fn from_i32(&mut self, ne: &[usize], data: Vec<i32>) -> TensorResult<TensorId> {
        check_len("from_i32", ne, data.len())?;
        self.alloc(DType::I32, ne, Buffer::I32(data))
    }

    /// Wrap packed quantized blocks.
    pub fn from_quantized(&mut self, dtype: DType, ne: &[usize], bytes: Vec<u8>) -> TensorResult<TensorId> {
        if !dtype.is_quantized() {
            return Err(TensorError::UnsupportedType {
                op: "from_quantized",
                dtype,
            });
        }
        let full = Self::check_shape(dtype, ne)?;
        let expected = dtype.row_size(full[0]) * full[1] * full[2] * full[3];
        if bytes.len() != expected {
            return Err(TensorError::ShapeMismatch {
                op: "from_quantized",
                expected: vec![expected],
                got: vec![bytes.len()],
            });
        }
        self.alloc(dtype, ne, Buffer::Quantized { dtype, bytes })
    }

    /// Build a tensor from raw little-endian bytes, as produced by a weight loader.
    pub fn from_bytes(&mut self, dtype: DType, ne: &[usize], bytes: &[u8]) -> TensorResult<TensorId> {
        if !dtype.is_quantized() && bytes.len() % 4 != 0 {
            return Err(TensorError::InvalidOperation(format!(
                "{} bytes is not a whole number of {} elements",
                bytes.len(),
                dtype
            )));
        }
        match dtype {
            DType::F32 => {
                check_len("from_bytes", ne, bytes.len() / 4)?;
                self.from_f32(ne, bytemuck::pod_collect_to_vec(bytes))
            }
            DType::I32 => {
                check_len("from_bytes", ne, bytes.len() / 4)?;
                self.from_i32(ne, bytemuck::pod_collect_to_vec(bytes))
            }
            _ => self.from_quantized(dtype, ne, bytes.to_vec()),
        }
    }

    /// Zero-copy alias of `src` with identical shape and strides.
    pub fn view_tensor(&mut self, src: TensorId) -> TensorResult<TensorId> {
        let s = self.tensor(src)?;
        let mut view = Tensor::new(s.dtype, s.n_dims, s.ne, s.buffer);
        view.nb = s.nb;
        view.offset = s.offset;
        view.view_src = Some(src);
        Ok(self.push_tensor(view))
    }

    /// Same shape and type as `src`, with a fresh zeroed buffer.
    pub fn dup_tensor(&mut self, src: TensorId) -> TensorResult<TensorId> {
        let s = self.tensor(src)?;
        let (dtype, ne) = (s.dtype, s.ne);
        let n_dims = s.n_dims;
        self.new_tensor(dtype, &ne[..n_dims])
    }

    /// Mark `id` as trainable and give it an F32 gradient slot.
    pub fn set_param(&mut self, id: TensorId) -> TensorResult<()> {
        let grad = self.new_grad(id)?;
        let t = self.tensor_mut(id)?;
        t.is_param = true;
        t.grad = Some(grad);
        Ok(())
    }

    pub fn set_name(&mut self, id: TensorId, name: impl Into<String>) -> TensorResult<()> {
        self.tensor_mut(id)?.name = name.into();
        Ok(())
    }

    // ==================== Data access ====================

    /// Logical contents as f32 (strided views are gathered, blocks dequantized).
    pub fn data_f32(&self, id: TensorId) -> TensorResult<Vec<f32>> {
        let t = self.tensor(id)?;
        t.read_f32(self.buffer(t.buffer)?)
    }

    /// Logical contents of an I32 tensor.
    pub fn data_i32(&self, id: TensorId) -> TensorResult<Vec<i32>> {
        let t = self.tensor(id)?;
        match self.buffer(t.buffer)? {
            Buffer::I32(data) => {
                let mut out = Vec::with_capacity(t.nelements());
                for start in t.row_starts() {
                    for i0 in 0..t.ne[0] {
                        let index = start + i0 * t.nb[0];
                        out.push(*data.get(index).ok_or(TensorError::IndexOutOfBounds {
                            index,
                            len: data.len(),
                        })?);
                    }
                }
                Ok(out)
            }
            _ => Err(TensorError::UnsupportedType {
                op: "data_i32",
                dtype: t.dtype,
            }),
        }
    }

    /// Raw little-endian bytes of the tensor in logical order.
    pub fn to_bytes(&self, id: TensorId) -> TensorResult<Vec<u8>> {
        let t = self.tensor(id)?;
        match t.dtype {
            DType::F32 => Ok(bytemuck::cast_slice(&self.data_f32(id)?).to_vec()),
            DType::I32 => Ok(bytemuck::cast_slice(&self.data_i32(id)?).to_vec()),
            dtype => {
                if !t.is_contiguous() {
                    return Err(TensorError::NotContiguous("to_bytes"));
                }
                match self.buffer(t.buffer)? {
                    Buffer::Quantized { bytes, .. } => {
                        let start = t.offset / QK * dtype.type_size();
                        let len = bytes.len();
                        bytes
                            .get(start..start + t.nbytes())
                            .map(<[u8]>::to_vec)
                            .ok_or(TensorError::IndexOutOfBounds { index: start + t.nbytes(), len })
                    }
                    _ => Err(TensorError::UnsupportedType { op: "to_bytes", dtype }),
                }
            }
        }
    }

    /// Overwrite every element with `value`.
    pub fn set_f32(&mut self, id: TensorId, value: f32) -> TensorResult<()> {
        let n = self.tensor(id)?.nelements();
        self.write_f32(id, &vec![value; n])
    }

    /// Overwrite the tensor's contents from logical-order data.
    pub fn set_data_f32(&mut self, id: TensorId, data: &[f32]) -> TensorResult<()> {
        self.write_f32(id, data)
    }

    /// Element at logical (flat) index `i`.
    pub fn get_f32_1d(&self, id: TensorId, i: usize) -> TensorResult<f32> {
        let data = self.data_f32(id)?;
        let len = data.len();
        data.get(i)
            .copied()
            .ok_or(TensorError::IndexOutOfBounds { index: i, len })
    }

    /// Set the element at logical (flat) index `i`.
    pub fn set_f32_1d(&mut self, id: TensorId, i: usize, value: f32) -> TensorResult<()> {
        let mut data = self.data_f32(id)?;
        let len = data.len();
        *data
            .get_mut(i)
            .ok_or(TensorError::IndexOutOfBounds { index: i, len })? = value;
        self.write_f32(id, &data)
    }

    pub(crate) fn write_f32(&mut self, id: TensorId, data: &[f32]) -> TensorResult<()> {
        let t = self.tensor(id)?.clone();
        let len = self.buffers.len();
        let buffer = self
            .buffers
            .get_mut(t.buffer)
            .ok_or(TensorError::IndexOutOfBounds { index: t.buffer, len })?;
        t.write_f32(buffer, data)
    }

    /// Move an F32 tensor's buffer out of the context (see [`Self::restore_f32_buffer`]).
    pub(crate) fn take_f32_buffer(&mut self, id: TensorId) -> TensorResult<Vec<f32>> {
        let buffer = self.tensor(id)?.buffer;
        let len = self.buffers.len();
        match self.buffers.get_mut(buffer) {
            Some(Buffer::F32(data)) => Ok(std::mem::take(data)),
            Some(_) => Err(TensorError::UnsupportedType {
                op: "work buffer",
                dtype: self.tensors[id.0].dtype,
            }),
            None => Err(TensorError::IndexOutOfBounds { index: buffer, len }),
        }
    }

    pub(crate) fn restore_f32_buffer(&mut self, id: TensorId, data: Vec<f32>) -> TensorResult<()> {
        let buffer = self.tensor(id)?.buffer;
        if let Some(Buffer::F32(slot)) = self.buffers.get_mut(buffer) {
            *slot = data;
        }
        Ok(())
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        let recycled = self.buffers.drain(..).filter_map(|buffer| match buffer {
            Buffer::F32(data) => Some(data),
            _ => None,
        });
        self.lease.release(recycled);
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("slot", &self.slot())
            .field("tensors", &self.tensors.len())
            .field("mem_used", &self.mem_used)
            .field("mem_size", &self.mem_size)
            .finish()
    }
}

fn check_len(op: &'static str, ne: &[usize], len: usize) -> TensorResult<()> {
    let expected: usize = ne.iter().product();
    if expected != len {
        return Err(TensorError::ShapeMismatch {
            op,
            expected: vec![expected],
            got: vec![len],
        });
    }
    Ok(())
}
