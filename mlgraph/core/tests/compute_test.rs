use mlgraph_core::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn ctx_with_threads(n: usize) -> Context {
    ContextPool::new(RuntimeConfig::with_threads(n))
        .unwrap()
        .acquire(ContextParams::default())
        .unwrap()
}

fn random_vec(n: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

fn run(ctx: &mut Context, root: TensorId) -> Vec<f32> {
    let mut graph = build_forward(ctx, root).unwrap();
    compute(ctx, &mut graph).unwrap();
    ctx.data_f32(root).unwrap()
}

fn assert_close(a: &[f32], b: &[f32], tol: f32) {
    assert_eq!(a.len(), b.len());
    for (i, (x, y)) in a.iter().zip(b).enumerate() {
        assert!((x - y).abs() <= tol, "element {}: {} vs {}", i, x, y);
    }
}

#[test]
fn test_mul_end_to_end() {
    init_logger();
    let mut ctx = ctx_with_threads(2);
    let a = ctx.from_f32(&[4], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
    let b = ctx.from_f32(&[4], vec![2.0; 4]).unwrap();
    let y = ctx.mul(a, b).unwrap();
    assert_eq!(run(&mut ctx, y), vec![2.0, 4.0, 6.0, 8.0]);
}

#[test]
fn test_sub_after_add_restores_input() {
    let mut ctx = ctx_with_threads(4);
    let xs = random_vec(24, 1);
    let a = ctx.from_f32(&[6, 4], xs.clone()).unwrap();
    let b = ctx.from_f32(&[6, 4], random_vec(24, 2)).unwrap();
    let s = ctx.add(a, b).unwrap();
    let d = ctx.sub(s, b).unwrap();
    assert_close(&run(&mut ctx, d), &xs, 1e-6);
}

#[test]
fn test_task_counts() {
    let mut ctx = ctx_with_threads(4);
    let a = ctx.new_tensor_2d(DType::F32, 4, 4).unwrap();
    let b = ctx.new_tensor_2d(DType::F32, 4, 4).unwrap();
    let s = ctx.add(a, b).unwrap();
    let r = ctx.reshape_1d(s, 16).unwrap();
    let n = ctx.neg(r).unwrap();
    let mut graph = build_forward(&ctx, n).unwrap();
    compute(&mut ctx, &mut graph).unwrap();

    assert_eq!(ctx.tensor(s).unwrap().n_tasks(), 4);
    assert_eq!(ctx.tensor(r).unwrap().n_tasks(), 1);
    assert_eq!(ctx.tensor(n).unwrap().n_tasks(), 1);
}

fn mlp_block(ctx: &mut Context, x: &[f32], w: &[f32]) -> TensorId {
    let x = ctx.from_f32(&[16, 5], x.to_vec()).unwrap();
    let w = ctx.from_f32(&[16, 8], w.to_vec()).unwrap();
    let h = ctx.mul_mat(w, x).unwrap();
    let h = ctx.gelu(h).unwrap();
    let h = ctx.norm(h).unwrap();
    ctx.soft_max(h).unwrap()
}

#[test]
fn test_threads_match_single_thread() {
    init_logger();
    let (x, w) = (random_vec(80, 3), random_vec(128, 4));

    let mut single = ctx_with_threads(1);
    let y1 = mlp_block(&mut single, &x, &w);
    let expected = run(&mut single, y1);

    for n in [2, 3, 8] {
        let mut multi = ctx_with_threads(n);
        let yn = mlp_block(&mut multi, &x, &w);
        assert_close(&run(&mut multi, yn), &expected, 1e-6);
    }
}

#[test]
fn test_mul_mat_values() {
    let mut ctx = ctx_with_threads(2);
    // a rows: [1,2], [3,4], [5,6]; b rows: [1,0], [0,1]
    let a = ctx.from_f32(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    let b = ctx.from_f32(&[2, 2], vec![1.0, 0.0, 0.0, 1.0]).unwrap();
    let y = ctx.mul_mat(a, b).unwrap();
    assert_eq!(ctx.tensor(y).unwrap().shape(), &[3, 2]);
    assert_eq!(run(&mut ctx, y), vec![1.0, 3.0, 5.0, 2.0, 4.0, 6.0]);
}

#[test]
fn test_mul_mat_vector_keeps_every_column() {
    let mut ctx = ctx_with_threads(2);
    let a = ctx.from_f32(&[2], vec![1.0, 2.0]).unwrap();
    let b = ctx.from_f32(&[2, 3], vec![1.0, 1.0, 2.0, 2.0, 3.0, 3.0]).unwrap();
    let y = ctx.mul_mat(a, b).unwrap();
    assert_eq!(run(&mut ctx, y), vec![3.0, 6.0, 9.0]);
}

#[test]
fn test_mul_mat_transposed_operand_matches_contiguous() {
    let a_data = random_vec(6 * 4, 5);
    let b_data = random_vec(6 * 3, 6);
    for threads in [1, 4] {
        let mut ctx = ctx_with_threads(threads);
        let a = ctx.from_f32(&[4, 6], a_data.clone()).unwrap();
        let at = ctx.transpose(a).unwrap();
        let at_copy = ctx.dup(at).unwrap();
        let b = ctx.from_f32(&[6, 3], b_data.clone()).unwrap();

        let strided = ctx.mul_mat(at, b).unwrap();
        let dense = ctx.mul_mat(at_copy, b).unwrap();
        let s = run(&mut ctx, strided);
        let d = run(&mut ctx, dense);
        assert_close(&s, &d, 1e-5);
    }
}

#[test]
fn test_mul_mat_quantized_weights() {
    let mut ctx = ctx_with_threads(2);
    let w_data = random_vec(64 * 4, 7);
    let x_data = random_vec(64 * 2, 8);
    let w_q = ctx.new_tensor_2d(DType::Q4_0, 64, 4).unwrap();
    ctx.set_data_f32(w_q, &w_data).unwrap();
    let w_f = ctx.from_f32(&[64, 4], w_data).unwrap();
    let x = ctx.from_f32(&[64, 2], x_data).unwrap();

    let yq = ctx.mul_mat(w_q, x).unwrap();
    let yf = ctx.mul_mat(w_f, x).unwrap();
    let (q, f) = (run(&mut ctx, yq), run(&mut ctx, yf));
    assert_close(&q, &f, 1.0);
}

#[test]
fn test_soft_max_rows_sum_to_one() {
    let mut ctx = ctx_with_threads(3);
    let a = ctx.from_f32(&[5, 4], random_vec(20, 9)).unwrap();
    let y = ctx.soft_max(a).unwrap();
    let out = run(&mut ctx, y);
    for row in out.chunks(5) {
        assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!(row.iter().all(|&v| v > 0.0));
    }
}

#[test]
fn test_causal_mask_then_soft_max() {
    let mut ctx = ctx_with_threads(2);
    let a = ctx.from_f32(&[3, 3], vec![0.0; 9]).unwrap();
    let m = ctx.diag_mask_inf(a, 0).unwrap();
    let y = ctx.soft_max(m).unwrap();
    let out = run(&mut ctx, y);
    assert_close(&out[0..3], &[1.0, 0.0, 0.0], 1e-6);
    assert_close(&out[3..6], &[0.5, 0.5, 0.0], 1e-6);
    assert_close(&out[6..9], &[1.0 / 3.0; 3], 1e-6);
}

#[test]
fn test_get_rows_from_quantized_table() {
    let mut ctx = ctx_with_threads(1);
    let table: Vec<f32> = (0..32 * 3).map(|i| (i / 32) as f32).collect();
    let emb = ctx.new_tensor_2d(DType::Q4_0, 32, 3).unwrap();
    ctx.set_data_f32(emb, &table).unwrap();
    let ids = ctx.from_i32(&[2], vec![2, 0]).unwrap();
    let rows = ctx.get_rows(emb, ids).unwrap();
    let out = run(&mut ctx, rows);
    assert_close(&out[..32], &[2.0; 32], 0.2);
    assert_close(&out[32..], &[0.0; 32], 0.2);
}

#[test]
fn test_get_rows_out_of_range() {
    let mut ctx = ctx_with_threads(1);
    let emb = ctx.new_tensor_2d(DType::F32, 4, 2).unwrap();
    let ids = ctx.from_i32(&[1], vec![5]).unwrap();
    let rows = ctx.get_rows(emb, ids).unwrap();
    let mut graph = build_forward(&ctx, rows).unwrap();
    assert!(matches!(
        compute(&mut ctx, &mut graph),
        Err(TensorError::IndexOutOfBounds { index: 5, len: 2 })
    ));
}

#[test]
fn test_inplace_writes_through() {
    let mut ctx = ctx_with_threads(2);
    let a = ctx.from_f32(&[3], vec![-1.0, 0.5, 2.0]).unwrap();
    let r = ctx.relu_inplace(a).unwrap();
    run(&mut ctx, r);
    assert_eq!(ctx.data_f32(a).unwrap(), vec![0.0, 0.5, 2.0]);
}

#[test]
fn test_cpy_into_transposed_view() {
    let mut ctx = ctx_with_threads(1);
    let src = ctx.from_f32(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    let dst = ctx.new_tensor_2d(DType::F32, 3, 2).unwrap();
    let dst_t = ctx.transpose(dst).unwrap();
    let c = ctx.cpy(src, dst_t).unwrap();
    run(&mut ctx, c);
    assert_eq!(ctx.data_f32(dst_t).unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    assert_eq!(ctx.data_f32(dst).unwrap(), vec![1.0, 3.0, 5.0, 2.0, 4.0, 6.0]);
}

#[test]
fn test_repeat_and_back() {
    let mut ctx = ctx_with_threads(1);
    let a = ctx.from_f32(&[2], vec![1.0, 2.0]).unwrap();
    let shape = ctx.new_tensor_2d(DType::F32, 4, 3).unwrap();
    let r = ctx.repeat(a, shape).unwrap();
    let back = ctx.repeat_back(r, a).unwrap();
    assert_eq!(run(&mut ctx, r), vec![1.0, 2.0, 1.0, 2.0, 1.0, 2.0, 1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
    assert_eq!(run(&mut ctx, back), vec![6.0, 12.0]);
}

#[test]
fn test_sum_and_mean() {
    let mut ctx = ctx_with_threads(1);
    let a = ctx.from_f32(&[3, 2], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    let s = ctx.sum(a).unwrap();
    let m = ctx.mean(a).unwrap();
    assert_eq!(run(&mut ctx, s), vec![21.0]);
    assert_eq!(run(&mut ctx, m), vec![2.0, 5.0]);
}

#[test]
fn test_norms() {
    let mut ctx = ctx_with_threads(2);
    let a = ctx.from_f32(&[4], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
    let n = ctx.norm(a).unwrap();
    let out = run(&mut ctx, n);
    assert!(out.iter().sum::<f32>().abs() < 1e-5);
    let var = out.iter().map(|v| v * v).sum::<f32>() / 4.0;
    assert!((var - 1.0).abs() < 1e-3);

    let r = ctx.rms_norm(a).unwrap();
    let out = run(&mut ctx, r);
    let ms = out.iter().map(|v| v * v).sum::<f32>() / 4.0;
    assert!((ms - 1.0).abs() < 1e-3);
}

#[test]
fn test_rope_rotates_pairs() {
    let mut ctx = ctx_with_threads(1);
    // [ne0 = 2, ne1 = 1, ne2 = 2 positions]
    let a = ctx.from_f32(&[2, 1, 2], vec![1.0, 0.0, 1.0, 0.0]).unwrap();
    let r = ctx.rope(a, 0, 2, 0).unwrap();
    let out = run(&mut ctx, r);
    assert_close(&out[..2], &[1.0, 0.0], 1e-6);
    assert_close(&out[2..], &[1.0f32.cos(), 1.0f32.sin()], 1e-6);
}

#[test]
fn test_conv_1d_identity_kernel() {
    let mut ctx = ctx_with_threads(2);
    // K = 3, C_in = 1, C_out = 1, kernel [0, 1, 0]
    let k = ctx.from_f32(&[3, 1, 1], vec![0.0, 1.0, 0.0]).unwrap();
    let x = ctx.from_f32(&[6, 1], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    let y1 = ctx.conv_1d_1s(k, x).unwrap();
    let y2 = ctx.conv_1d_2s(k, x).unwrap();
    assert_eq!(run(&mut ctx, y1), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    assert_eq!(run(&mut ctx, y2), vec![1.0, 3.0, 5.0]);
}

#[test]
fn test_conv_1d_box_kernel_pads_edges() {
    let mut ctx = ctx_with_threads(1);
    let k = ctx.from_f32(&[3, 1, 1], vec![1.0, 1.0, 1.0]).unwrap();
    let x = ctx.from_f32(&[4, 1], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
    let y = ctx.conv_1d_1s(k, x).unwrap();
    assert_eq!(run(&mut ctx, y), vec![3.0, 6.0, 9.0, 7.0]);
}

#[test]
fn test_flash_attn_matches_unfused() {
    let (d, n, m) = (4, 3, 5);
    let (qd, kd, vd) = (random_vec(d * n, 10), random_vec(d * m, 11), random_vec(m * d, 12));
    for masked in [false, true] {
        let mut ctx = ctx_with_threads(3);
        let q = ctx.from_f32(&[d, n], qd.clone()).unwrap();
        let k = ctx.from_f32(&[d, m], kd.clone()).unwrap();
        let v = ctx.from_f32(&[m, d], vd.clone()).unwrap();
        let fused = ctx.flash_attn(q, k, v, masked).unwrap();

        // scores [m, n] = k·q, scaled, masked, softmaxed, then v·p -> [d, n]
        let kq = ctx.mul_mat(k, q).unwrap();
        let scale = ctx.new_f32(1.0 / (d as f32).sqrt()).unwrap();
        let kq = ctx.scale(kq, scale).unwrap();
        let kq = if masked { ctx.diag_mask_inf(kq, m - n).unwrap() } else { kq };
        let p = ctx.soft_max(kq).unwrap();
        let out = ctx.mul_mat(v, p).unwrap();

        let f = run(&mut ctx, fused);
        let u = run(&mut ctx, out);
        assert_close(&f, &u, 1e-5);
    }
}

#[test]
fn test_flash_ff_matches_unfused() {
    let (d, h, n) = (4, 6, 2);
    let mut ctx = ctx_with_threads(2);
    let a = ctx.from_f32(&[d, n], random_vec(d * n, 13)).unwrap();
    let b0 = ctx.from_f32(&[d, h], random_vec(d * h, 14)).unwrap();
    let b1 = ctx.from_f32(&[h], random_vec(h, 15)).unwrap();
    let c0 = ctx.from_f32(&[h, d], random_vec(h * d, 16)).unwrap();
    let c1 = ctx.from_f32(&[d], random_vec(d, 17)).unwrap();
    let fused = ctx.flash_ff(a, b0, b1, c0, c1).unwrap();

    let hid = ctx.mul_mat(b0, a).unwrap();
    let b1r = ctx.repeat(b1, hid).unwrap();
    let hid = ctx.add(hid, b1r).unwrap();
    let hid = ctx.gelu(hid).unwrap();
    let o = ctx.mul_mat(c0, hid).unwrap();
    let c1r = ctx.repeat(c1, o).unwrap();
    let o = ctx.add(o, c1r).unwrap();

    let f = run(&mut ctx, fused);
    let u = run(&mut ctx, o);
    assert_close(&f, &u, 1e-5);
}

#[test]
fn test_timeout_aborts() {
    let mut ctx = ctx_with_threads(1);
    let a = ctx.from_f32(&[4], vec![1.0; 4]).unwrap();
    let y = ctx.neg(a).unwrap();
    let mut graph = build_forward(&ctx, y).unwrap();
    graph.set_timeout(Some(std::time::Duration::ZERO));
    assert!(matches!(compute(&mut ctx, &mut graph), Err(TensorError::Timeout(_))));
}

#[test]
fn test_work_buffer_reused() {
    let mut ctx = ctx_with_threads(2);
    let k = ctx.from_f32(&[3, 2, 2], random_vec(12, 18)).unwrap();
    let x = ctx.from_f32(&[8, 2], random_vec(16, 19)).unwrap();
    let y = ctx.conv_1d_1s(k, x).unwrap();
    let mut graph = build_forward(&ctx, y).unwrap();
    compute(&mut ctx, &mut graph).unwrap();
    let work = graph.work().unwrap();
    let first = ctx.data_f32(y).unwrap();
    compute(&mut ctx, &mut graph).unwrap();
    assert_eq!(graph.work(), Some(work));
    assert_eq!(ctx.data_f32(y).unwrap(), first);
}
