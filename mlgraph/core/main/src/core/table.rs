//! Per-op dispatch table: name, parallelism, forward kernel, gradient rule.
//!
//! Indexed by `Op as usize`; adding an op means adding one row here.

use crate::api::types::Op;
use crate::core::autodiff::{self, BackwardFn};
use crate::core::kernels::{attention, conv, elementwise, matmul, norm, reduce, rows, Kernel};

/// How many workers an op fans out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskPolicy {
    Single,
    Threads,
}

pub(crate) struct OpInfo {
    pub op: Op,
    pub name: &'static str,
    pub tasks: TaskPolicy,
    /// `None` for ops that produce no data of their own (leaves and views).
    pub kernel: Option<Kernel>,
    /// `None` where no differentiation rule exists.
    pub backward: Option<BackwardFn>,
}

use TaskPolicy::{Single, Threads};

const fn entry(
    op: Op,
    name: &'static str,
    tasks: TaskPolicy,
    kernel: Option<Kernel>,
    backward: Option<BackwardFn>,
) -> OpInfo {
    OpInfo {
        op,
        name,
        tasks,
        kernel,
        backward,
    }
}

const fn rows_of(compute: crate::core::kernels::ComputeFn) -> Option<Kernel> {
    Some(Kernel::rows(compute))
}

static OPS: [OpInfo; Op::COUNT] = [
    entry(Op::None, "none", Single, None, Some(autodiff::none)),
    entry(Op::Dup, "dup", Single, rows_of(elementwise::dup), Some(autodiff::identity)),
    entry(Op::Add, "add", Threads, rows_of(elementwise::add), Some(autodiff::add)),
    entry(Op::Sub, "sub", Single, rows_of(elementwise::sub), Some(autodiff::sub)),
    entry(Op::Mul, "mul", Single, rows_of(elementwise::mul), Some(autodiff::mul)),
    entry(Op::Div, "div", Single, rows_of(elementwise::div), Some(autodiff::div)),
    entry(Op::Sqr, "sqr", Single, rows_of(elementwise::sqr), Some(autodiff::sqr)),
    entry(Op::Sqrt, "sqrt", Single, rows_of(elementwise::sqrt), Some(autodiff::sqrt)),
    entry(Op::Sum, "sum", Single, rows_of(reduce::sum), Some(autodiff::sum)),
    entry(Op::Mean, "mean", Single, rows_of(reduce::mean), None),
    entry(Op::Repeat, "repeat", Single, rows_of(reduce::repeat), Some(autodiff::repeat)),
    entry(Op::RepeatBack, "repeat_back", Single, rows_of(reduce::repeat_back), None),
    entry(Op::Abs, "abs", Single, rows_of(elementwise::abs), Some(autodiff::abs)),
    entry(Op::Sgn, "sgn", Single, rows_of(elementwise::sgn), Some(autodiff::none)),
    entry(Op::Neg, "neg", Single, rows_of(elementwise::neg), Some(autodiff::neg)),
    entry(Op::Step, "step", Single, rows_of(elementwise::step), Some(autodiff::none)),
    entry(Op::Relu, "relu", Single, rows_of(elementwise::relu), Some(autodiff::relu)),
    entry(Op::Gelu, "gelu", Threads, rows_of(elementwise::gelu), None),
    entry(Op::Silu, "silu", Threads, rows_of(elementwise::silu), None),
    entry(Op::Norm, "norm", Threads, rows_of(norm::norm), None),
    entry(Op::RmsNorm, "rms_norm", Threads, rows_of(norm::rms_norm), None),
    entry(
        Op::MulMat,
        "mul_mat",
        Threads,
        Some(Kernel {
            init: Some(matmul::init),
            compute: matmul::compute,
            finalize: Some(matmul::finalize),
            work: matmul::work,
        }),
        Some(autodiff::mul_mat),
    ),
    entry(Op::Scale, "scale", Threads, rows_of(elementwise::scale), None),
    entry(Op::Cpy, "cpy", Single, rows_of(elementwise::cpy), None),
    entry(Op::Reshape, "reshape", Single, None, None),
    entry(Op::View, "view", Single, None, None),
    entry(Op::Permute, "permute", Single, None, None),
    entry(Op::Transpose, "transpose", Single, None, None),
    entry(Op::GetRows, "get_rows", Single, rows_of(rows::get_rows), None),
    entry(Op::DiagMaskInf, "diag_mask_inf", Single, rows_of(norm::diag_mask_inf), None),
    entry(Op::SoftMax, "soft_max", Threads, rows_of(norm::soft_max), None),
    entry(Op::Rope, "rope", Single, rows_of(rows::rope), None),
    entry(Op::Conv1d1s, "conv_1d_1s", Threads, Some(CONV), None),
    entry(Op::Conv1d2s, "conv_1d_2s", Threads, Some(CONV), None),
    entry(
        Op::FlashAttn,
        "flash_attn",
        Threads,
        Some(Kernel {
            init: None,
            compute: attention::flash_attn,
            finalize: None,
            work: attention::attn_work,
        }),
        None,
    ),
    entry(
        Op::FlashFf,
        "flash_ff",
        Threads,
        Some(Kernel {
            init: None,
            compute: attention::flash_ff,
            finalize: None,
            work: attention::ff_work,
        }),
        None,
    ),
];

const CONV: Kernel = Kernel {
    init: Some(conv::init),
    compute: conv::compute,
    finalize: None,
    work: conv::work,
};

pub(crate) fn op_info(op: Op) -> &'static OpInfo {
    let info = &OPS[op as usize];
    debug_assert_eq!(info.op, op, "dispatch table out of order");
    info
}
