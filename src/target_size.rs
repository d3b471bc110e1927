//! Target-size search.
//!
//! Starting from the quantization field produced by rate control at unit
//! distance, scales the whole field until the encoded size fits the byte
//! budget: ten halving steps to bracket a fitting scale, then bisection.
//! DC scales less aggressively than AC.

use crate::compressed::CompressedImage;
use crate::image::{scale_image, ImageF};
use crate::types::PikInfo;

/// Applies `scale` to the quantization field (`0.8 * scale + 0.2` on DC)
/// and requantizes. Returns whether the field actually changed.
pub fn scale_quantization_map(
    img: &mut CompressedImage,
    quant_dc: f32,
    quant_field_ac: &ImageF,
    scale: f32,
    dump_quant_state: bool,
    info: &mut PikInfo,
) -> bool {
    let scale_dc = 0.8 * scale + 0.2;
    let changed = img
        .quantizer_mut()
        .set_quant_field(scale_dc * quant_dc, &scale_image(scale, quant_field_ac));
    if dump_quant_state {
        info.quant_state.push(format!(
            "scaling quantization map with scale {}\n{}",
            scale,
            img.quantizer().dump_quantization_map()
        ));
    }
    img.quantize();
    changed
}

/// Searches for the largest scale whose encoding fits `target_size`.
/// If no candidate ever fits, the last (smallest-scale) candidate is
/// returned so callers always get an encoding.
pub fn compress_to_target_size(
    img: &mut CompressedImage,
    target_size: usize,
    dump_quant_state: bool,
    info: &mut PikInfo,
) -> Vec<u8> {
    let (quant_dc, quant_ac) = img.quantizer().get_quant_field();
    let mut scale_bad = 1.0f32;
    let mut scale_good = 1.0f32;
    let mut candidate = Vec::new();
    let mut compressed = Vec::new();
    let mut found = false;
    for _ in 0..10 {
        scale_quantization_map(img, quant_dc, &quant_ac, scale_good, dump_quant_state, info);
        candidate = img.encode();
        if candidate.len() <= target_size {
            compressed = candidate.clone();
            found = true;
            break;
        }
        scale_bad = scale_good;
        scale_good *= 0.5;
    }
    if !found {
        return candidate;
    }
    if scale_good == 1.0 {
        // The baseline field already hit distance 1.0; do not sharpen past it.
        return compressed;
    }
    for _ in 0..16 {
        let scale = 0.5 * (scale_bad + scale_good);
        if !scale_quantization_map(img, quant_dc, &quant_ac, scale, dump_quant_state, info) {
            break;
        }
        candidate = img.encode();
        if candidate.len() <= target_size {
            compressed = candidate;
            scale_good = scale;
        } else {
            scale_bad = scale;
        }
    }
    compressed
}
