//! Phased graph execution.
//!
//! Nodes run strictly in graph order. Each node goes through INIT on the
//! calling thread, COMPUTE fanned out over the pool, then FINALIZE on the
//! calling thread. Worker `ith` owns output rows `r` with `r % nth == ith`
//! and its own slice of the private scratch, so kernels never lock.

use crate::api::error::{TensorError, TensorResult};
use crate::api::types::TensorId;
use crate::core::context::Context;
use crate::core::graph::Graph;
use crate::core::kernels::{NodeArgs, Row, Task, Work};
use crate::core::runtime::RuntimeConfig;
use crate::core::scheduler;
use crate::core::table::op_info;
use rayon::prelude::*;
use std::time::{Duration, Instant};

#[derive(Clone, Copy)]
struct Deadline {
    at: Instant,
    limit: Duration,
}

impl Deadline {
    fn check(deadline: Option<Deadline>) -> TensorResult<()> {
        match deadline {
            Some(d) if Instant::now() >= d.at => Err(TensorError::Timeout(d.limit)),
            _ => Ok(()),
        }
    }
}

/// Evaluate every node of `graph` with `graph.n_threads()` workers.
///
/// Results are written into each node's own buffer (through its view for
/// in-place ops). The first kernel error aborts the run.
pub fn compute(ctx: &mut Context, graph: &mut Graph) -> TensorResult<()> {
    let start = Instant::now();
    let deadline = graph.timeout.map(|limit| Deadline {
        at: start + limit,
        limit,
    });

    let work_size = scheduler::plan(ctx, graph)?;
    let work_id = scheduler::reserve_work(ctx, graph, work_size)?;
    let pool = RuntimeConfig::build_pool(graph.n_threads())?;

    let mut work = match work_id {
        Some(id) => ctx.take_f32_buffer(id)?,
        None => Vec::new(),
    };
    let result = graph
        .nodes
        .iter()
        .try_for_each(|&node| run_node(ctx, &pool, node, &mut work, deadline));
    if let Some(id) = work_id {
        ctx.restore_f32_buffer(id, work)?;
    }

    log::debug!(
        "compute: {} nodes, {} threads, work={} in {:.3}ms",
        graph.n_nodes(),
        graph.n_threads(),
        work_size,
        start.elapsed().as_secs_f64() * 1000.0
    );
    result
}

fn run_node(
    ctx: &mut Context,
    pool: &rayon::ThreadPool,
    node: TensorId,
    work: &mut [f32],
    deadline: Option<Deadline>,
) -> TensorResult<()> {
    let t = ctx.tensor(node)?;
    let Some(kernel) = op_info(t.op).kernel else { return Ok(()) };
    let n = t.nelements();
    if n == 0 {
        return Ok(());
    }
    let (row_len, nth) = (t.ne[0], t.n_tasks.max(1));
    Deadline::check(deadline)?;

    let _t = if log::log_enabled!(log::Level::Trace) { Some(Instant::now()) } else { None };

    let args = NodeArgs::gather(ctx, node)?;
    let ws = (kernel.work)(&args, nth);
    let available = work.len();
    let scratch = work.get_mut(..ws.total(nth)).ok_or_else(|| {
        TensorError::InvalidOperation(format!(
            "{} needs {} scratch elements, work buffer has {}",
            args.op.name(),
            ws.total(nth),
            available
        ))
    })?;
    let (shared, private) = scratch.split_at_mut(ws.shared);

    let mut out = vec![0.0f32; n];
    let mut rows: Vec<Row<'_>> = out
        .chunks_mut(row_len)
        .enumerate()
        .map(|(index, data)| Row { index, data })
        .collect();

    if let Some(init) = kernel.init {
        let mut w = Work {
            shared: &mut *shared,
            private: &mut *private,
            per_thread: ws.per_thread,
            nth,
        };
        init(&args, &mut w, &mut rows)?;
        Deadline::check(deadline)?;
    }

    if nth == 1 {
        let mut task = Task {
            ith: 0,
            nth,
            shared: &*shared,
            private: &mut private[..ws.per_thread],
        };
        (kernel.compute)(&args, &mut task, &mut rows)?;
    } else {
        let mut buckets: Vec<Vec<Row<'_>>> = (0..nth).map(|_| Vec::new()).collect();
        for row in rows.drain(..) {
            buckets[row.index % nth].push(row);
        }
        let privs: Vec<&mut [f32]> = if ws.per_thread == 0 {
            (0..nth).map(|_| <&mut [f32]>::default()).collect()
        } else {
            private.chunks_mut(ws.per_thread).take(nth).collect()
        };
        let shared: &[f32] = shared;
        let args = &args;
        pool.install(|| {
            buckets
                .par_iter_mut()
                .zip(privs.into_par_iter())
                .enumerate()
                .map(|(ith, (bucket, private))| {
                    let mut task = Task {
                        ith,
                        nth,
                        shared,
                        private,
                    };
                    (kernel.compute)(args, &mut task, bucket)
                })
                .collect::<TensorResult<Vec<()>>>()
        })?;
        rows = buckets.into_iter().flatten().collect();
    }

    if let Some(finalize) = kernel.finalize {
        Deadline::check(deadline)?;
        let mut w = Work {
            shared,
            private,
            per_thread: ws.per_thread,
            nth,
        };
        finalize(&args, &mut w, &mut rows)?;
    }
    drop(rows);

    ctx.write_f32(node, &out)?;

    if let Some(t) = _t {
        log::trace!(
            "[perf] compute::{} {:?} tasks={} {:.3}ms",
            args.op.name(),
            args.dst,
            nth,
            t.elapsed().as_secs_f64() * 1000.0
        );
    }
    Ok(())
}
