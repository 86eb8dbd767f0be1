use crate::api::error::{QuantError, QuantResult};
use crate::api::types::*;
use half::f16;
use std::time::Instant;

fn check_alignment(format: &str, n_elements: usize) -> QuantResult<usize> {
    if n_elements % QK != 0 {
        return Err(QuantError::BlockAlignment(format!(
            "{} requires element count divisible by {}, got {}",
            format, QK, n_elements
        )));
    }
    Ok(n_elements / QK)
}

fn check_len(raw: &[u8], expected: usize) -> QuantResult<()> {
    if raw.len() != expected {
        return Err(QuantError::ShapeMismatch {
            expected,
            actual: raw.len(),
        });
    }
    Ok(())
}

fn read_f16(raw: &[u8], offset: usize) -> f32 {
    f16::from_le_bytes([raw[offset], raw[offset + 1]]).to_f32()
}

fn write_f16(out: &mut [u8], offset: usize, value: f32) {
    let bytes = f16::from_f32(value).to_le_bytes();
    out[offset] = bytes[0];
    out[offset + 1] = bytes[1];
}

/// Quantize an f32 slice to Q4_0 format.
///
/// Each block of 32 elements is stored as:
/// - 2 bytes: f16 scale `d = amax / 7` (little-endian)
/// - 16 bytes: 32 x 4-bit packed values (two per byte, low nibble = even index, high nibble = odd)
///
/// Stored nibbles are `round(x / d) + 8`, so the representable range is `[-7d, 7d]`.
/// Requires element count divisible by 32.
pub fn quantize_q4_0(data: &[f32]) -> QuantResult<Vec<u8>> {
    let _t = if log::log_enabled!(log::Level::Trace) { Some(Instant::now()) } else { None };
    let n_blocks = check_alignment("Q4_0", data.len())?;
    let mut output = vec![0u8; n_blocks * Q4_0_BLOCK_BYTES];

    for (block, out) in data
        .chunks_exact(Q4_0_BLOCK_SIZE)
        .zip(output.chunks_exact_mut(Q4_0_BLOCK_BYTES))
    {
        let amax = block.iter().fold(0.0f32, |acc, &v| acc.max(v.abs()));
        let scale = amax / 7.0;
        let inv_scale = if scale == 0.0 { 0.0 } else { 1.0 / scale };
        write_f16(out, 0, scale);

        for i in 0..16 {
            let even_q = (block[2 * i] * inv_scale).round().clamp(-8.0, 7.0) as i8;
            let odd_q = (block[2 * i + 1] * inv_scale).round().clamp(-8.0, 7.0) as i8;
            let even_u = (even_q + 8) as u8;
            let odd_u = (odd_q + 8) as u8;
            out[2 + i] = (odd_u << 4) | (even_u & 0x0F);
        }
    }

    if let Some(t) = _t {
        log::trace!("[perf] quant::quantize_q4_0 blocks={} {:.3}ms", n_blocks, t.elapsed().as_secs_f64() * 1000.0);
    }
    Ok(output)
}

/// Dequantize Q4_0 bytes back to f32.
pub fn dequantize_q4_0(raw: &[u8], n_elements: usize) -> QuantResult<Vec<f32>> {
    let n_blocks = check_alignment("Q4_0", n_elements)?;
    check_len(raw, n_blocks * Q4_0_BLOCK_BYTES)?;

    let mut out_f32 = Vec::with_capacity(n_elements);
    for block in raw.chunks_exact(Q4_0_BLOCK_BYTES) {
        let scale = read_f16(block, 0);
        for &packed in &block[2..] {
            let even_u = packed & 0x0F;
            let odd_u = (packed >> 4) & 0x0F;
            out_f32.push((even_u as i8 - 8) as f32 * scale);
            out_f32.push((odd_u as i8 - 8) as f32 * scale);
        }
    }

    Ok(out_f32)
}

/// Quantize an f32 slice to Q4_1 format.
///
/// Q4_1 block layout (20 bytes): [f16 d][f16 m][16 bytes packed nibbles]
/// where `m` is the block minimum and `d = (max - min) / 15`.
/// Each nibble holds `round((x - m) / d)` in `[0, 15]`.
pub fn quantize_q4_1(data: &[f32]) -> QuantResult<Vec<u8>> {
    let _t = if log::log_enabled!(log::Level::Trace) { Some(Instant::now()) } else { None };
    let n_blocks = check_alignment("Q4_1", data.len())?;
    let mut output = vec![0u8; n_blocks * Q4_1_BLOCK_BYTES];

    for (block, out) in data
        .chunks_exact(Q4_1_BLOCK_SIZE)
        .zip(output.chunks_exact_mut(Q4_1_BLOCK_BYTES))
    {
        let (min, max) = block
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let d = (max - min) / 15.0;
        let inv_d = if d == 0.0 { 0.0 } else { 1.0 / d };
        write_f16(out, 0, d);
        write_f16(out, 2, min);

        for i in 0..16 {
            let lo = ((block[2 * i] - min) * inv_d).round().clamp(0.0, 15.0) as u8;
            let hi = ((block[2 * i + 1] - min) * inv_d).round().clamp(0.0, 15.0) as u8;
            out[4 + i] = (hi << 4) | (lo & 0x0F);
        }
    }

    if let Some(t) = _t {
        log::trace!("[perf] quant::quantize_q4_1 blocks={} {:.3}ms", n_blocks, t.elapsed().as_secs_f64() * 1000.0);
    }
    Ok(output)
}

/// Dequantize Q4_1 bytes back to f32.
pub fn dequantize_q4_1(raw: &[u8], n_elements: usize) -> QuantResult<Vec<f32>> {
    let n_blocks = check_alignment("Q4_1", n_elements)?;
    check_len(raw, n_blocks * Q4_1_BLOCK_BYTES)?;

    let mut out_f32 = Vec::with_capacity(n_elements);
    for block in raw.chunks_exact(Q4_1_BLOCK_BYTES) {
        let d = read_f16(block, 0);
        let m = read_f16(block, 2);

        for &packed in &block[4..] {
            let lo = (packed & 0x0F) as f32;
            let hi = ((packed >> 4) & 0x0F) as f32;
            out_f32.push(d * lo + m);
            out_f32.push(d * hi + m);
        }
    }

    Ok(out_f32)
}
