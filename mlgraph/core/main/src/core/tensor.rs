//! Tensor metadata records and their backing buffers.
//!
//! A [`Tensor`] never owns data directly: it points at a [`Buffer`] in its
//! context through `buffer`, starting `offset` elements in, with per-axis
//! element strides `nb`. Views share a buffer with their source.

use crate::api::error::{TensorError, TensorResult};
use crate::api::types::{DType, Op, TensorId, MAX_DIMS, MAX_OPT, QK};
use smallvec::SmallVec;

pub(crate) type BufferId = usize;

/// Flat storage for one or more tensors.
#[derive(Debug)]
pub(crate) enum Buffer {
    F32(Vec<f32>),
    I32(Vec<i32>),
    Quantized { dtype: DType, bytes: Vec<u8> },
}

impl Buffer {
    pub(crate) fn nbytes(&self) -> usize {
        match self {
            Buffer::F32(v) => v.len() * std::mem::size_of::<f32>(),
            Buffer::I32(v) => v.len() * std::mem::size_of::<i32>(),
            Buffer::Quantized { bytes, .. } => bytes.len(),
        }
    }
}

/// Element strides of a densely packed tensor with extents `ne`.
pub(crate) fn contiguous_strides(ne: &[usize; MAX_DIMS]) -> [usize; MAX_DIMS] {
    let mut nb = [1; MAX_DIMS];
    for i in 1..MAX_DIMS {
        nb[i] = nb[i - 1] * ne[i - 1];
    }
    nb
}

/// A node in the computation graph: shape, strides, producing op and operands.
#[derive(Debug, Clone)]
pub struct Tensor {
    pub(crate) dtype: DType,
    pub(crate) n_dims: usize,
    pub(crate) ne: [usize; MAX_DIMS],
    pub(crate) nb: [usize; MAX_DIMS],
    pub(crate) offset: usize,
    pub(crate) buffer: BufferId,
    pub(crate) op: Op,
    pub(crate) is_param: bool,
    pub(crate) src0: Option<TensorId>,
    pub(crate) src1: Option<TensorId>,
    pub(crate) opt: [Option<TensorId>; MAX_OPT],
    pub(crate) grad: Option<TensorId>,
    pub(crate) n_tasks: usize,
    pub(crate) view_src: Option<TensorId>,
    pub(crate) name: String,
}

impl Tensor {
    pub(crate) fn new(dtype: DType, n_dims: usize, ne: [usize; MAX_DIMS], buffer: BufferId) -> Self {
        Self {
            dtype,
            n_dims,
            ne,
            nb: contiguous_strides(&ne),
            offset: 0,
            buffer,
            op: Op::None,
            is_param: false,
            src0: None,
            src1: None,
            opt: [None; MAX_OPT],
            grad: None,
            n_tasks: 0,
            view_src: None,
            name: String::new(),
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn n_dims(&self) -> usize {
        self.n_dims
    }

    /// Extents of all four axes (unused axes are 1).
    pub fn ne(&self) -> [usize; MAX_DIMS] {
        self.ne
    }

    /// Element strides of all four axes.
    pub fn nb(&self) -> [usize; MAX_DIMS] {
        self.nb
    }

    /// Extents of the used axes only.
    pub fn shape(&self) -> &[usize] {
        &self.ne[..self.n_dims]
    }

    pub fn op(&self) -> Op {
        self.op
    }

    pub fn is_param(&self) -> bool {
        self.is_param
    }

    pub fn src0(&self) -> Option<TensorId> {
        self.src0
    }

    pub fn src1(&self) -> Option<TensorId> {
        self.src1
    }

    pub fn opt(&self) -> [Option<TensorId>; MAX_OPT] {
        self.opt
    }

    pub fn grad(&self) -> Option<TensorId> {
        self.grad
    }

    /// Worker count assigned by the last `compute` run.
    pub fn n_tasks(&self) -> usize {
        self.n_tasks
    }

    /// Tensor whose buffer this one aliases, if it is a view.
    pub fn view_src(&self) -> Option<TensorId> {
        self.view_src
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nelements(&self) -> usize {
        self.ne.iter().product()
    }

    pub fn nrows(&self) -> usize {
        self.ne[1] * self.ne[2] * self.ne[3]
    }

    pub fn nbytes(&self) -> usize {
        self.dtype.row_size(self.ne[0]) * self.nrows()
    }

    pub fn is_scalar(&self) -> bool {
        self.ne.iter().all(|&n| n == 1)
    }

    pub fn is_vector(&self) -> bool {
        self.ne[1] == 1 && self.ne[2] == 1 && self.ne[3] == 1
    }

    pub fn is_matrix(&self) -> bool {
        self.ne[2] == 1 && self.ne[3] == 1
    }

    pub fn is_contiguous(&self) -> bool {
        let expected = contiguous_strides(&self.ne);
        (0..MAX_DIMS).all(|i| self.ne[i] <= 1 || self.nb[i] == expected[i])
    }

    pub fn same_shape(&self, other: &Tensor) -> bool {
        self.ne == other.ne
    }

    /// Operands in traversal order: src0, src1, then the auxiliary slots.
    pub fn operands(&self) -> SmallVec<[TensorId; 2 + MAX_OPT]> {
        self.src0
            .into_iter()
            .chain(self.src1)
            .chain(self.opt.iter().flatten().copied())
            .collect()
    }

    /// Buffer position of the first element of every row, in row-major order.
    pub(crate) fn row_starts(&self) -> impl Iterator<Item = usize> + '_ {
        let [_, ne1, ne2, ne3] = self.ne;
        (0..ne3).flat_map(move |i3| {
            (0..ne2).flat_map(move |i2| {
                (0..ne1).map(move |i1| {
                    self.offset + i1 * self.nb[1] + i2 * self.nb[2] + i3 * self.nb[3]
                })
            })
        })
    }

    /// Logical contents as f32, following strides and dequantizing blocks.
    pub(crate) fn read_f32(&self, buffer: &Buffer) -> TensorResult<Vec<f32>> {
        let n = self.nelements();
        let ne0 = self.ne[0];
        let mut out = Vec::with_capacity(n);

        match buffer {
            Buffer::F32(data) => {
                if self.is_contiguous() {
                    out.extend_from_slice(slice(data, self.offset, n)?);
                } else {
                    for start in self.row_starts() {
                        for i0 in 0..ne0 {
                            out.push(at(data, start + i0 * self.nb[0])?);
                        }
                    }
                }
            }
            Buffer::I32(data) => {
                for start in self.row_starts() {
                    for i0 in 0..ne0 {
                        out.push(at(data, start + i0 * self.nb[0])? as f32);
                    }
                }
            }
            Buffer::Quantized { dtype, bytes } => {
                if ne0 > 1 && self.nb[0] != 1 {
                    return Err(TensorError::NotContiguous("quantized read"));
                }
                for start in self.row_starts() {
                    let raw = block_slice(*dtype, bytes, start, ne0)?;
                    out.extend(dequantize(*dtype, raw, ne0)?);
                }
            }
        }
        Ok(out)
    }

    /// Store `data` (logical order) into the buffer, following strides.
    pub(crate) fn write_f32(&self, buffer: &mut Buffer, data: &[f32]) -> TensorResult<()> {
        if data.len() != self.nelements() {
            return Err(TensorError::ShapeMismatch {
                op: "write",
                expected: vec![self.nelements()],
                got: vec![data.len()],
            });
        }
        let ne0 = self.ne[0];
        if ne0 == 0 {
            return Ok(());
        }
        let rows = data.chunks(ne0);

        match buffer {
            Buffer::F32(dst) => {
                for (start, row) in self.row_starts().zip(rows) {
                    for (i0, &v) in row.iter().enumerate() {
                        *at_mut(dst, start + i0 * self.nb[0])? = v;
                    }
                }
            }
            Buffer::I32(dst) => {
                for (start, row) in self.row_starts().zip(rows) {
                    for (i0, &v) in row.iter().enumerate() {
                        *at_mut(dst, start + i0 * self.nb[0])? = v as i32;
                    }
                }
            }
            Buffer::Quantized { dtype, bytes } => {
                if ne0 > 1 && self.nb[0] != 1 {
                    return Err(TensorError::NotContiguous("quantized write"));
                }
                let dtype = *dtype;
                for (start, row) in self.row_starts().zip(rows) {
                    let packed = quantize(dtype, row)?;
                    block_slice_mut(dtype, bytes, start, ne0)?.copy_from_slice(&packed);
                }
            }
        }
        Ok(())
    }
}

fn at<T: Copy>(data: &[T], index: usize) -> TensorResult<T> {
    data.get(index).copied().ok_or(TensorError::IndexOutOfBounds {
        index,
        len: data.len(),
    })
}

fn at_mut<T>(data: &mut [T], index: usize) -> TensorResult<&mut T> {
    let len = data.len();
    data.get_mut(index)
        .ok_or(TensorError::IndexOutOfBounds { index, len })
}

fn slice<T>(data: &[T], start: usize, len: usize) -> TensorResult<&[T]> {
    data.get(start..start + len).ok_or(TensorError::IndexOutOfBounds {
        index: start + len,
        len: data.len(),
    })
}

fn block_range(dtype: DType, start: usize, n: usize) -> TensorResult<std::ops::Range<usize>> {
    if start % QK != 0 || n % QK != 0 {
        return Err(mlgraph_quant::QuantError::BlockAlignment(format!(
            "{} rows must start and end on {}-element blocks (start {}, len {})",
            dtype, QK, start, n
        ))
        .into());
    }
    let begin = start / QK * dtype.type_size();
    Ok(begin..begin + dtype.row_size(n))
}

fn block_slice(dtype: DType, bytes: &[u8], start: usize, n: usize) -> TensorResult<&[u8]> {
    let range = block_range(dtype, start, n)?;
    let len = bytes.len();
    bytes.get(range.clone()).ok_or(TensorError::IndexOutOfBounds {
        index: range.end,
        len,
    })
}

fn block_slice_mut(dtype: DType, bytes: &mut [u8], start: usize, n: usize) -> TensorResult<&mut [u8]> {
    let range = block_range(dtype, start, n)?;
    let len = bytes.len();
    bytes.get_mut(range.clone()).ok_or(TensorError::IndexOutOfBounds {
        index: range.end,
        len,
    })
}

pub(crate) fn dequantize(dtype: DType, raw: &[u8], n: usize) -> TensorResult<Vec<f32>> {
    match dtype {
        DType::Q4_0 => Ok(mlgraph_quant::dequantize_q4_0(raw, n)?),
        DType::Q4_1 => Ok(mlgraph_quant::dequantize_q4_1(raw, n)?),
        other => Err(TensorError::UnsupportedType { op: "dequantize", dtype: other }),
    }
}

pub(crate) fn quantize(dtype: DType, data: &[f32]) -> TensorResult<Vec<u8>> {
    match dtype {
        DType::Q4_0 => Ok(mlgraph_quant::quantize_q4_0(data)?),
        DType::Q4_1 => Ok(mlgraph_quant::quantize_q4_1(data)?),
        other => Err(TensorError::UnsupportedType { op: "quantize", dtype: other }),
    }
}
