//! Core types for graph construction

pub use mlgraph_quant::QK;

/// Maximum tensor rank.
pub const MAX_DIMS: usize = 4;

/// Number of auxiliary operand slots per tensor.
pub const MAX_OPT: usize = 4;

/// Default bound on the number of nodes (and leafs) in one graph.
pub const DEFAULT_MAX_NODES: usize = 4096;

/// Default number of contexts a pool hands out concurrently.
pub const DEFAULT_MAX_CONTEXTS: usize = 64;

/// Default per-context memory budget in bytes.
pub const DEFAULT_MEM_SIZE: usize = 512 * 1024 * 1024;

/// Handle to a tensor inside its owning [`Context`](crate::Context).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(pub(crate) usize);

impl TensorId {
    /// Position of the tensor in its context's tensor table.
    pub fn index(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for TensorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Element type of a tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DType {
    /// Block-quantized 4-bit: 32 elements/block, 18 bytes/block
    Q4_0,
    /// Block-quantized 4-bit with minimum: 32 elements/block, 20 bytes/block
    Q4_1,
    I8,
    I16,
    I32,
    F16,
    #[default]
    F32,
}

impl DType {
    /// Elements per storage block (1 for scalar types).
    pub fn block_size(&self) -> usize {
        match self {
            DType::Q4_0 | DType::Q4_1 => QK,
            _ => 1,
        }
    }

    /// Bytes per storage block.
    pub fn type_size(&self) -> usize {
        match self {
            DType::Q4_0 => mlgraph_quant::Q4_0_BLOCK_BYTES,
            DType::Q4_1 => mlgraph_quant::Q4_1_BLOCK_BYTES,
            DType::I8 => 1,
            DType::I16 | DType::F16 => 2,
            DType::I32 | DType::F32 => 4,
        }
    }

    pub fn is_quantized(&self) -> bool {
        matches!(self, DType::Q4_0 | DType::Q4_1)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::F16 | DType::F32) || self.is_quantized()
    }

    /// Bytes occupied by `n` elements, rounded up to whole blocks.
    pub fn row_size(&self, n: usize) -> usize {
        n.div_ceil(self.block_size()) * self.type_size()
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DType::Q4_0 => "q4_0",
            DType::Q4_1 => "q4_1",
            DType::I8 => "i8",
            DType::I16 => "i16",
            DType::I32 => "i32",
            DType::F16 => "f16",
            DType::F32 => "f32",
        };
        write!(f, "{}", s)
    }
}

/// Operation that produced a tensor.
///
/// `None` marks leaves (inputs, constants and parameters).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Op {
    #[default]
    None,
    Dup,
    Add,
    Sub,
    Mul,
    Div,
    Sqr,
    Sqrt,
    Sum,
    Mean,
    Repeat,
    /// Sum tiles of the operand back down to a smaller shape.
    RepeatBack,
    Abs,
    Sgn,
    Neg,
    Step,
    Relu,
    Gelu,
    Silu,
    Norm,
    RmsNorm,
    MulMat,
    Scale,
    Cpy,
    Reshape,
    View,
    Permute,
    Transpose,
    GetRows,
    DiagMaskInf,
    SoftMax,
    Rope,
    Conv1d1s,
    Conv1d2s,
    FlashAttn,
    FlashFf,
}

impl Op {
    pub const COUNT: usize = 36;

    pub const ALL: [Op; Op::COUNT] = [
        Op::None,
        Op::Dup,
        Op::Add,
        Op::Sub,
        Op::Mul,
        Op::Div,
        Op::Sqr,
        Op::Sqrt,
        Op::Sum,
        Op::Mean,
        Op::Repeat,
        Op::RepeatBack,
        Op::Abs,
        Op::Sgn,
        Op::Neg,
        Op::Step,
        Op::Relu,
        Op::Gelu,
        Op::Silu,
        Op::Norm,
        Op::RmsNorm,
        Op::MulMat,
        Op::Scale,
        Op::Cpy,
        Op::Reshape,
        Op::View,
        Op::Permute,
        Op::Transpose,
        Op::GetRows,
        Op::DiagMaskInf,
        Op::SoftMax,
        Op::Rope,
        Op::Conv1d1s,
        Op::Conv1d2s,
        Op::FlashAttn,
        Op::FlashFf,
    ];

    pub fn name(&self) -> &'static str {
        crate::core::table::op_info(*self).name
    }

    /// True for ops that only reinterpret their operand's buffer.
    pub fn is_view(&self) -> bool {
        matches!(self, Op::Reshape | Op::View | Op::Permute | Op::Transpose)
    }
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Parameters for a single context acquired from a [`ContextPool`](crate::ContextPool).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextParams {
    /// Byte budget for tensor data allocated in the context.
    pub mem_size: usize,
}

impl Default for ContextParams {
    fn default() -> Self {
        Self {
            mem_size: DEFAULT_MEM_SIZE,
        }
    }
}

impl ContextParams {
    pub fn with_mem_size(mem_size: usize) -> Self {
        Self { mem_size }
    }
}
