/// Number of elements per quantization block (both formats).
pub const QK: usize = 32;

/// Number of elements per Q4_0 block.
pub const Q4_0_BLOCK_SIZE: usize = QK;

/// Bytes per Q4_0 block: 2-byte f16 scale + 16 bytes (32 x 4-bit packed).
pub const Q4_0_BLOCK_BYTES: usize = 18;

/// Number of elements per Q4_1 block.
pub const Q4_1_BLOCK_SIZE: usize = QK;

/// Bytes per Q4_1 block: 2-byte f16 scale + 2-byte f16 min + 16 packed bytes.
pub const Q4_1_BLOCK_BYTES: usize = 20;
