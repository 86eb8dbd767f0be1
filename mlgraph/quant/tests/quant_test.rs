use mlgraph_quant::*;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

fn random_data(n: usize, range: f32, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen_range(-range..range)).collect()
}

fn block_error_bound(block: &[f32], levels: f32) -> f32 {
    let (lo, hi) = block
        .iter()
        .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    // half a quantization step plus f16 rounding slack
    (hi - lo) / levels * 0.5 + 5e-2
}

#[test]
fn test_q4_0_error_bounded_per_block() {
    let data = random_data(32 * 16, 4.0, 7);
    let packed = quantize_q4_0(&data).unwrap();
    let restored = dequantize_q4_0(&packed, data.len()).unwrap();

    for (orig, deq) in data.chunks(QK).zip(restored.chunks(QK)) {
        let amax = orig.iter().fold(0.0f32, |a, &v| a.max(v.abs()));
        let bound = amax / 7.0 * 0.5 + 1e-2;
        for (o, d) in orig.iter().zip(deq.iter()) {
            assert!((o - d).abs() <= bound, "Q4_0 error {} > {}", (o - d).abs(), bound);
        }
    }
}

#[test]
fn test_q4_1_error_bounded_per_block() {
    let data = random_data(32 * 16, 10.0, 11);
    let packed = quantize_q4_1(&data).unwrap();
    let restored = dequantize_q4_1(&packed, data.len()).unwrap();

    for (orig, deq) in data.chunks(QK).zip(restored.chunks(QK)) {
        let bound = block_error_bound(orig, 15.0);
        for (o, d) in orig.iter().zip(deq.iter()) {
            assert!((o - d).abs() <= bound, "Q4_1 error {} > {}", (o - d).abs(), bound);
        }
    }
}

#[test]
fn test_packed_sizes() {
    let data = random_data(32 * 3, 1.0, 3);
    assert_eq!(quantize_q4_0(&data).unwrap().len(), 3 * Q4_0_BLOCK_BYTES);
    assert_eq!(quantize_q4_1(&data).unwrap().len(), 3 * Q4_1_BLOCK_BYTES);
}

#[test]
fn test_dequantize_rejects_unaligned_count() {
    let packed = quantize_q4_1(&[1.0; 32]).unwrap();
    assert!(dequantize_q4_1(&packed, 31).is_err());
}
