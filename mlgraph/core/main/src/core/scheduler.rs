//! Task-count assignment and scratch planning for a graph run.

use crate::api::error::{TensorError, TensorResult};
use crate::api::types::{DType, Op, TensorId};
use crate::core::context::Context;
use crate::core::graph::Graph;
use crate::core::kernels::{NodeArgs, Operand};
use crate::core::table::{op_info, TaskPolicy};

/// Workers an op fans out to. Depends only on the op and the thread count.
pub(crate) fn n_tasks(op: Op, n_threads: usize) -> usize {
    match op_info(op).tasks {
        TaskPolicy::Threads => n_threads.max(1),
        TaskPolicy::Single => 1,
    }
}

fn require(op: Op, operand: &Operand, ok: impl Fn(DType) -> bool) -> TensorResult<()> {
    if ok(operand.dtype) {
        Ok(())
    } else {
        Err(TensorError::UnsupportedType {
            op: op.name(),
            dtype: operand.dtype,
        })
    }
}

/// Operand element types the kernels can consume.
fn check_types(args: &NodeArgs) -> TensorResult<()> {
    let f32_only = |d: DType| d == DType::F32;
    match args.op {
        Op::MulMat => {
            require(args.op, args.src0()?, |d| d == DType::F32 || d.is_quantized())?;
            require(args.op, args.src1()?, f32_only)
        }
        Op::Conv1d1s | Op::Conv1d2s => {
            require(args.op, args.src0()?, f32_only)?;
            require(args.op, args.src1()?, f32_only)
        }
        Op::FlashAttn => {
            require(args.op, args.src0()?, f32_only)?;
            require(args.op, args.src1()?, f32_only)?;
            require(args.op, args.opt(0)?, f32_only)
        }
        Op::FlashFf => args.present().try_for_each(|o| require(args.op, o, f32_only)),
        _ => Ok(()),
    }
}

/// Stamp every node with its task count and return the scratch size (in f32
/// elements) the largest node needs.
pub(crate) fn plan(ctx: &mut Context, graph: &Graph) -> TensorResult<usize> {
    let mut work_size = 0;
    for &node in graph.nodes() {
        let (op, empty) = {
            let t = ctx.tensor(node)?;
            (t.op, t.nelements() == 0)
        };
        let nth = n_tasks(op, graph.n_threads());
        ctx.tensor_mut(node)?.n_tasks = nth;

        let Some(kernel) = op_info(op).kernel else { continue };
        if empty {
            continue;
        }
        let args = NodeArgs::describe(ctx, node)?;
        check_types(&args)?;
        work_size = work_size.max((kernel.work)(&args, nth).total(nth));
    }
    Ok(work_size)
}

/// Make sure the graph owns a scratch tensor of at least `size` elements.
pub(crate) fn reserve_work(ctx: &mut Context, graph: &mut Graph, size: usize) -> TensorResult<Option<TensorId>> {
    graph.work_size = size;
    if size == 0 {
        return Ok(graph.work);
    }
    let current = match graph.work {
        Some(id) => ctx.tensor(id)?.nelements(),
        None => 0,
    };
    if current < size {
        let id = ctx.new_tensor_1d(DType::F32, size)?;
        ctx.set_name(id, "work")?;
        log::debug!("work buffer: {} -> {} elements", current, size);
        graph.work = Some(id);
    }
    Ok(graph.work)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{build_forward, ContextParams, ContextPool};

    #[test]
    fn test_n_tasks_policy() {
        assert_eq!(n_tasks(Op::Add, 4), 4);
        assert_eq!(n_tasks(Op::MulMat, 3), 3);
        assert_eq!(n_tasks(Op::Sub, 4), 1);
        assert_eq!(n_tasks(Op::Reshape, 4), 1);
        assert_eq!(n_tasks(Op::Add, 0), 1);
    }

    #[test]
    fn test_plan_checks_mul_mat_types() {
        let mut ctx = ContextPool::default().acquire(ContextParams::default()).unwrap();
        let w = ctx.new_tensor_2d(DType::Q4_0, 32, 2).unwrap();
        let v = ctx.new_tensor_2d(DType::F32, 32, 3).unwrap();
        let y = ctx.mul_mat(w, v).unwrap();
        let graph = build_forward(&ctx, y).unwrap();
        assert!(plan(&mut ctx, &graph).is_ok());

        let y = ctx.mul_mat(v, w).unwrap();
        let graph = build_forward(&ctx, y).unwrap();
        assert!(matches!(
            plan(&mut ctx, &graph),
            Err(TensorError::UnsupportedType { op: "mul_mat", dtype: DType::Q4_0 })
        ));
    }

    #[test]
    fn test_plan_sizes_work() {
        let mut ctx = ContextPool::default().acquire(ContextParams::default()).unwrap();
        let k = ctx.new_tensor_3d(DType::F32, 3, 2, 4).unwrap();
        let x = ctx.new_tensor_2d(DType::F32, 8, 2).unwrap();
        let y = ctx.conv_1d_1s(k, x).unwrap();
        let mut graph = build_forward(&ctx, y).unwrap();
        let size = plan(&mut ctx, &graph).unwrap();
        assert_eq!(size, 3 * 2 * 4 + (8 + 2) * 2);

        let work = reserve_work(&mut ctx, &mut graph, size).unwrap().unwrap();
        assert_eq!(ctx.tensor(work).unwrap().nelements(), size);
        assert_eq!(reserve_work(&mut ctx, &mut graph, 4).unwrap(), Some(work));
    }
}
