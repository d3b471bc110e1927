//! Shared constants: block geometry, scan order, quantization weights and
//! the opsin absorbance transform.

/// Edge length of a DCT block in pixels.
pub const BLOCK_EDGE: usize = 8;

/// Number of coefficients in one block.
pub const BLOCK_SIZE: usize = BLOCK_EDGE * BLOCK_EDGE;

/// Blocks per tile edge. A tile is the granularity of the Y-to-B
/// correlation field.
pub const TILE_TO_BLOCK_RATIO: usize = 8;

/// Zigzag scan order for AC coefficient run-length coding.
#[rustfmt::skip]
pub const ZIGZAG: [usize; 64] = [
     0,  1,  8, 16,  9,  2,  3, 10,
    17, 24, 32, 25, 18, 11,  4,  5,
    12, 19, 26, 33, 40, 48, 41, 34,
    27, 20, 13,  6,  7, 14, 21, 28,
    35, 42, 49, 56, 57, 50, 43, 36,
    29, 22, 15, 23, 30, 37, 44, 51,
    58, 59, 52, 45, 38, 31, 39, 46,
    53, 60, 61, 54, 47, 55, 62, 63,
];

/// Per-frequency quantization weights, natural (row-major) order.
///
/// The stored integer coefficient is `round(real * q / QUANT_WEIGHTS[k])`,
/// so a larger weight means a coarser step at that frequency. The values
/// follow a contrast-sensitivity shape: fine steps near DC, coarser steps
/// toward the high-frequency corner. Calibration constants.
#[rustfmt::skip]
pub const QUANT_WEIGHTS: [f32; 64] = [
    0.0060, 0.0110, 0.0130, 0.0158, 0.0193, 0.0236, 0.0287, 0.0346,
    0.0110, 0.0123, 0.0146, 0.0177, 0.0215, 0.0261, 0.0315, 0.0377,
    0.0130, 0.0146, 0.0172, 0.0206, 0.0247, 0.0296, 0.0353, 0.0418,
    0.0158, 0.0177, 0.0206, 0.0242, 0.0286, 0.0338, 0.0398, 0.0466,
    0.0193, 0.0215, 0.0247, 0.0286, 0.0333, 0.0388, 0.0451, 0.0522,
    0.0236, 0.0261, 0.0296, 0.0338, 0.0388, 0.0446, 0.0512, 0.0586,
    0.0287, 0.0315, 0.0353, 0.0398, 0.0451, 0.0512, 0.0581, 0.0658,
    0.0346, 0.0377, 0.0418, 0.0466, 0.0522, 0.0586, 0.0658, 0.0738,
];

/// Opsin absorbance mixing matrix, row-major 3x3. Applied to linear RGB
/// before the cube-root nonlinearity.
pub const OPSIN_ABSORBANCE_MATRIX: [f32; 9] = [
    0.30,
    0.622,
    0.078, // Row 0
    0.23,
    0.692,
    0.078, // Row 1
    0.243_422_69,
    0.204_767_44,
    0.551_809_87, // Row 2
];

/// Inverse of `OPSIN_ABSORBANCE_MATRIX`, row-major 3x3.
pub const OPSIN_ABSORBANCE_INVERSE: [f32; 9] = [
    11.031_567,
    -9.866_944,
    -0.164_623, // Row 0
    -3.254_147,
    4.418_770,
    -0.164_623, // Row 1
    -3.658_851,
    2.712_923,
    1.945_928, // Row 2
];

/// Bias added to each absorbance channel before the cube root.
pub const OPSIN_ABSORBANCE_BIAS: [f32; 3] =
    [0.003_793_073_3, 0.003_793_073_3, 0.003_793_073_3];

/// `-cbrt(bias)`, folded into the post-cube-root offset.
pub const NEG_OPSIN_ABSORBANCE_BIAS_CBRT: [f32; 3] =
    [-0.155_954_12, -0.155_954_12, -0.155_954_12];

/// Per-channel offsets applied before [`SCALED_OPSIN_SCALE`]. The scaling
/// balances quantization sensitivity across channels: the opponent X
/// channel is numerically tiny but its reconstruction error amplifies
/// strongly through the inverse absorbance matrix.
pub const SCALED_OPSIN_OFFSET: [f32; 3] = [0.015_386_134, 0.0, 0.277_704_59];

/// Per-channel scale factors for the quantization domain.
pub const SCALED_OPSIN_SCALE: [f32; 3] = [22.995_789, 1.183_000_1, 1.502_141_3];
