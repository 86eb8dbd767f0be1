use mlgraph_core::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn ctx() -> Context {
    ContextPool::new(RuntimeConfig::with_threads(2))
        .unwrap()
        .acquire(ContextParams::default())
        .unwrap()
}

/// Build `f`, differentiate it, seed the root gradient with ones and run.
fn gradients(
    ctx: &mut Context,
    params: &[TensorId],
    root: TensorId,
    keep: bool,
) -> Vec<Vec<f32>> {
    let mut gf = build_forward(ctx, root).unwrap();
    let mut gb = build_backward(ctx, &mut gf, keep).unwrap();
    let seed = ctx.tensor(root).unwrap().grad().unwrap();
    ctx.set_f32(seed, 1.0).unwrap();
    compute(ctx, &mut gb).unwrap();
    params
        .iter()
        .map(|&p| {
            let g = ctx.tensor(p).unwrap().grad().unwrap();
            ctx.data_f32(g).unwrap()
        })
        .collect()
}

fn assert_close(a: &[f32], b: &[f32], tol: f32) {
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b) {
        assert!((x - y).abs() <= tol, "{} vs {}", x, y);
    }
}

#[test]
fn test_mul_grads_scalars() {
    let _ = env_logger::builder().is_test(true).try_init();
    for keep in [false, true] {
        let mut ctx = ctx();
        let a = ctx.new_f32(3.0).unwrap();
        let b = ctx.new_f32(4.0).unwrap();
        ctx.set_param(a).unwrap();
        ctx.set_param(b).unwrap();
        let y = ctx.mul(a, b).unwrap();
        let g = gradients(&mut ctx, &[a, b], y, keep);
        assert_eq!(g, vec![vec![4.0], vec![3.0]]);
    }
}

#[test]
fn test_add_sub_neg_grads() {
    let mut ctx = ctx();
    let a = ctx.from_f32(&[3], vec![1.0, 2.0, 3.0]).unwrap();
    let b = ctx.from_f32(&[3], vec![4.0, 5.0, 6.0]).unwrap();
    ctx.set_param(a).unwrap();
    ctx.set_param(b).unwrap();
    // y = sum((a + b) - (-b)) -> dy/da = 1, dy/db = 2
    let s = ctx.add(a, b).unwrap();
    let nb = ctx.neg(b).unwrap();
    let d = ctx.sub(s, nb).unwrap();
    let y = ctx.sum(d).unwrap();
    let g = gradients(&mut ctx, &[a, b], y, false);
    assert_eq!(g[0], vec![1.0; 3]);
    assert_eq!(g[1], vec![2.0; 3]);
}

#[test]
fn test_div_sqr_sqrt_grads() {
    let mut ctx = ctx();
    let x = ctx.from_f32(&[2], vec![4.0, 9.0]).unwrap();
    let z = ctx.from_f32(&[2], vec![2.0, 3.0]).unwrap();
    ctx.set_param(x).unwrap();
    ctx.set_param(z).unwrap();
    // y = sum(sqrt(x) + x² + x / z)
    let r = ctx.sqrt(x).unwrap();
    let q = ctx.sqr(x).unwrap();
    let v = ctx.div(x, z).unwrap();
    let s = ctx.add(r, q).unwrap();
    let s = ctx.add(s, v).unwrap();
    let y = ctx.sum(s).unwrap();

    let g = gradients(&mut ctx, &[x, z], y, false);
    // d/dx = 0.5/√x + 2x + 1/z ; d/dz = -x/z²
    assert_close(&g[0], &[0.25 + 8.0 + 0.5, 1.0 / 6.0 + 18.0 + 1.0 / 3.0], 1e-5);
    assert_close(&g[1], &[-1.0, -1.0], 1e-5);
}

#[test]
fn test_abs_relu_grads() {
    let mut ctx = ctx();
    let x = ctx.from_f32(&[4], vec![-2.0, -0.5, 0.5, 3.0]).unwrap();
    ctx.set_param(x).unwrap();
    let a = ctx.abs(x).unwrap();
    let r = ctx.relu(x).unwrap();
    let s = ctx.add(a, r).unwrap();
    let y = ctx.sum(s).unwrap();
    let g = gradients(&mut ctx, &[x], y, false);
    assert_eq!(g[0], vec![-1.0, -1.0, 2.0, 2.0]);
}

#[test]
fn test_repeat_grad_sums_tiles() {
    let mut ctx = ctx();
    let bias = ctx.from_f32(&[2], vec![0.1, 0.2]).unwrap();
    ctx.set_param(bias).unwrap();
    let shape = ctx.new_tensor_2d(DType::F32, 2, 5).unwrap();
    let r = ctx.repeat(bias, shape).unwrap();
    let y = ctx.sum(r).unwrap();
    let g = gradients(&mut ctx, &[bias], y, false);
    assert_eq!(g[0], vec![5.0, 5.0]);
}

#[test]
fn test_mul_mat_right_operand_grad() {
    let mut rng = StdRng::seed_from_u64(42);
    let (k, m, n) = (3, 4, 2);
    let a_data: Vec<f32> = (0..k * m).map(|_| rng.gen_range(-1.0..1.0)).collect();

    let mut ctx = ctx();
    let a = ctx.from_f32(&[k, m], a_data.clone()).unwrap();
    let b = ctx.from_f32(&[k, n], vec![0.5; k * n]).unwrap();
    ctx.set_param(b).unwrap();
    let y = ctx.mul_mat(a, b).unwrap();
    let y = ctx.sum(y).unwrap();
    let g = gradients(&mut ctx, &[b], y, false);

    // d sum(a·b) / d b[kk, nn] = sum over rows m of a[kk, m]
    let mut expected = vec![0.0f32; k * n];
    for nn in 0..n {
        for kk in 0..k {
            expected[nn * k + kk] = (0..m).map(|mm| a_data[mm * k + kk]).sum();
        }
    }
    assert_close(&g[0], &expected, 1e-5);
}

#[test]
fn test_unimplemented_gradient_fails_loudly() {
    let mut ctx = ctx();
    let x = ctx.new_tensor_2d(DType::F32, 4, 2).unwrap();
    ctx.set_param(x).unwrap();
    let builders: [fn(&mut Context, TensorId) -> TensorResult<TensorId>; 4] = [
        |c, x| c.gelu(x),
        |c, x| c.norm(x),
        |c, x| c.reshape_1d(x, 8),
        |c, x| c.transpose(x),
    ];
    for build in builders {
        let y = build(&mut ctx, x).unwrap();
        let mut gf = build_forward(&ctx, y).unwrap();
        assert!(matches!(
            build_backward(&mut ctx, &mut gf, false),
            Err(TensorError::UnimplementedGradient { .. })
        ));
    }
}

#[test]
fn test_backward_graph_extends_forward() {
    let mut ctx = ctx();
    let a = ctx.new_f32(1.0).unwrap();
    ctx.set_param(a).unwrap();
    let y = ctx.sqr(a).unwrap();
    let mut gf = build_forward(&ctx, y).unwrap();
    let n_forward = gf.n_nodes();
    let gb = build_backward(&mut ctx, &mut gf, false).unwrap();
    assert!(gb.n_nodes() > n_forward);
    assert_eq!(&gb.nodes()[..n_forward], gf.nodes());
}
