//! Public parameter and info types.

/// Encoder parameters.
///
/// Exactly one mode is active, selected in this order of precedence:
/// `butteraugli_distance >= 0`, then `target_bitrate > 0`, then
/// `uniform_quant > 0`, then `fast_mode`. If none selects, encoding
/// fails with [`crate::Error::NotImplemented`].
#[derive(Debug, Clone)]
pub struct CompressParams {
    /// Target perceptual distance; negative disables the perceptual mode.
    pub butteraugli_distance: f32,
    /// Target bits per pixel; positive selects the target-size mode.
    pub target_bitrate: f32,
    /// Constant quant multiplier; positive selects the uniform mode.
    pub uniform_quant: f32,
    /// Single-pass encoding with the adaptive-quant heuristic.
    pub fast_mode: bool,
    /// Iteration budget for the perceptual loop.
    pub max_butteraugli_iters: u32,
    /// Append the alpha sub-stream after the payload.
    pub alpha_channel: bool,
    /// Record the quantization field into [`PikInfo`] at each iteration.
    pub dump_quant_state: bool,
}

impl Default for CompressParams {
    fn default() -> Self {
        Self {
            butteraugli_distance: 1.0,
            target_bitrate: 0.0,
            uniform_quant: 0.0,
            fast_mode: false,
            max_butteraugli_iters: 7,
            alpha_channel: false,
            dump_quant_state: false,
        }
    }
}

/// Decoder parameters.
#[derive(Debug, Clone)]
pub struct DecompressParams {
    /// Upper bound on `xsize * ysize`; larger images are rejected.
    pub max_num_pixels: u64,
    /// Reject streams with trailing bytes after all sub-streams.
    pub check_decompressed_size: bool,
}

impl Default for DecompressParams {
    fn default() -> Self {
        Self {
            max_num_pixels: 1 << 30,
            check_decompressed_size: false,
        }
    }
}

/// Write-only debug sink reporting statistics to the caller of the
/// top-level encode/decode entry points.
#[derive(Debug, Clone, Default)]
pub struct PikInfo {
    /// Comparator invocations during rate control.
    pub num_butteraugli_iters: u32,
    /// Bytes consumed by the last decode.
    pub decoded_size: usize,
    /// Quantization-state dumps, one entry per iteration, when
    /// [`CompressParams::dump_quant_state`] is set.
    pub quant_state: Vec<String>,
}
