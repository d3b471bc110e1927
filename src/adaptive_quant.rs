//! Adaptive quantization for the fast pipeline.
//!
//! Content-aware bit allocation without the perceptual iteration loop:
//! a per-block multiplier field derived from the luma plane, finer where
//! the block is busy and coarser where it is flat. The perceptual path
//! does not use this; it refines its field against the distance map
//! instead.

use crate::image::ImageF;

/// Controls the mapping from local activity to quant multipliers.
const ACTIVITY_SCALE: f32 = 14.0;
const FIELD_MIN: f32 = 0.6;
const FIELD_MAX: f32 = 2.0;

/// Mean absolute deviation of one block, clipped to the image bounds.
fn block_activity(plane: &ImageF, bx: usize, by: usize, block_edge: usize) -> f32 {
    let x0 = bx * block_edge;
    let y0 = by * block_edge;
    let x1 = (x0 + block_edge).min(plane.xsize());
    let y1 = (y0 + block_edge).min(plane.ysize());
    let n = ((x1 - x0) * (y1 - y0)) as f32;

    let mut mean = 0.0f32;
    for y in y0..y1 {
        let row = plane.row(y);
        for &v in &row[x0..x1] {
            mean += v;
        }
    }
    mean /= n;

    let mut dev = 0.0f32;
    for y in y0..y1 {
        let row = plane.row(y);
        for &v in &row[x0..x1] {
            dev += (v - mean).abs();
        }
    }
    dev / n
}

/// Per-block positive quant multiplier field from the luma plane.
///
/// Busy blocks get values above 1.0 (finer quantization), flat blocks
/// fall toward [`FIELD_MIN`]. One 3x3 averaging pass keeps neighboring
/// blocks from diverging sharply.
pub fn adaptive_quantization_map(plane: &ImageF, block_edge: usize) -> ImageF {
    let block_xsize = (plane.xsize() + block_edge - 1) / block_edge;
    let block_ysize = (plane.ysize() + block_edge - 1) / block_edge;
    let mut field = ImageF::new(block_xsize, block_ysize);
    for by in 0..block_ysize {
        for bx in 0..block_xsize {
            let activity = block_activity(plane, bx, by, block_edge);
            let v = (ACTIVITY_SCALE * activity).min(1.0);
            field.set(bx, by, FIELD_MIN + v * (FIELD_MAX - FIELD_MIN));
        }
    }

    let mut smoothed = ImageF::new(block_xsize, block_ysize);
    for by in 0..block_ysize {
        for bx in 0..block_xsize {
            let mut sum = 0.0f32;
            let mut n = 0.0f32;
            for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    let x = bx as i32 + dx;
                    let y = by as i32 + dy;
                    if x >= 0 && y >= 0 && (x as usize) < block_xsize && (y as usize) < block_ysize
                    {
                        sum += field.get(x as usize, y as usize);
                        n += 1.0;
                    }
                }
            }
            smoothed.set(bx, by, sum / n);
        }
    }
    smoothed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_is_positive_and_bounded() {
        let mut plane = ImageF::new(20, 12);
        for y in 0..12 {
            for x in 0..20 {
                plane.set(x, y, if (x / 4 + y / 4) % 2 == 0 { 0.1 } else { 0.9 });
            }
        }
        let field = adaptive_quantization_map(&plane, 8);
        assert_eq!(field.xsize(), 3);
        assert_eq!(field.ysize(), 2);
        for by in 0..field.ysize() {
            for &v in field.row(by) {
                assert!(v >= FIELD_MIN && v <= FIELD_MAX);
            }
        }
    }

    #[test]
    fn test_flat_plane_gets_minimum() {
        let plane = ImageF::filled(16, 16, 0.5);
        let field = adaptive_quantization_map(&plane, 8);
        for by in 0..field.ysize() {
            for &v in field.row(by) {
                assert!((v - FIELD_MIN).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_busy_blocks_get_finer_quant() {
        let mut plane = ImageF::filled(16, 8, 0.5);
        // Right block is a checkerboard, left block flat.
        for y in 0..8 {
            for x in 8..16 {
                plane.set(x, y, if (x + y) % 2 == 0 { 0.0 } else { 1.0 });
            }
        }
        let field = adaptive_quantization_map(&plane, 8);
        assert!(field.get(1, 0) > field.get(0, 0));
    }
}
