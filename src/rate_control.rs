//! Perceptual rate control.
//!
//! Iteratively refines the per-block quantization field until the
//! comparator's distance falls below the target. Each iteration reduces
//! the per-pixel distance map to a per-block maximum, finds local peaks,
//! and sharpens quantization around them with a step size that shrinks
//! over three outer passes.

use crate::compressed::CompressedImage;
use crate::consts::BLOCK_EDGE;
use crate::image::{Image3B, Image3F, ImageF};
use crate::opsin::opsin_to_srgb8;
use crate::types::PikInfo;
use butteraugli_oxide::{compute_butteraugli, ButteraugliParams};

/// Contract of the external comparator: per-pixel distance map plus a
/// scalar aggregate, refreshed by each `compare` call. Finer quantization
/// must not increase the distance.
pub trait PerceptualMetric {
    fn compare(&mut self, srgb: &Image3B);
    fn distance(&self) -> f32;
    fn distmap(&self) -> &ImageF;
}

/// Production metric comparing against the opsin original's sRGB
/// rendering with butteraugli.
pub struct ButteraugliMetric {
    reference: Vec<u8>,
    xsize: usize,
    ysize: usize,
    distance: f32,
    distmap: ImageF,
}

impl ButteraugliMetric {
    pub fn new(opsin_orig: &Image3F) -> Self {
        let xsize = opsin_orig.xsize();
        let ysize = opsin_orig.ysize();
        let reference = opsin_to_srgb8(opsin_orig, xsize, ysize).to_interleaved();
        Self {
            reference,
            xsize,
            ysize,
            distance: 0.0,
            distmap: ImageF::new(xsize, ysize),
        }
    }
}

impl PerceptualMetric for ButteraugliMetric {
    fn compare(&mut self, srgb: &Image3B) {
        let candidate = srgb.to_interleaved();
        let result = compute_butteraugli(
            &self.reference,
            &candidate,
            self.xsize,
            self.ysize,
            &ButteraugliParams::default(),
        )
        .expect("butteraugli comparison failed");
        self.distance = result.score as f32;
        if let Some(map) = result.diffmap {
            for y in 0..self.ysize {
                let dst = self.distmap.row_mut(y);
                let src = map.row(y);
                dst.copy_from_slice(&src[..self.xsize]);
            }
        }
    }

    fn distance(&self) -> f32 {
        self.distance
    }

    fn distmap(&self) -> &ImageF {
        &self.distmap
    }
}

/// Reduces a per-pixel distance map to per-tile maxima. Pixels beyond the
/// image bounds do not exist in the map, so block padding never leaks in.
pub fn tile_dist_map(distmap: &ImageF, tile_size: usize) -> ImageF {
    let tile_xsize = (distmap.xsize() + tile_size - 1) / tile_size;
    let tile_ysize = (distmap.ysize() + tile_size - 1) / tile_size;
    let mut out = ImageF::new(tile_xsize, tile_ysize);
    for tile_y in 0..tile_ysize {
        for tile_x in 0..tile_xsize {
            let x_max = distmap.xsize().min(tile_size * (tile_x + 1));
            let y_max = distmap.ysize().min(tile_size * (tile_y + 1));
            let mut max_dist = 0.0f32;
            for y in tile_size * tile_y..y_max {
                let row = distmap.row(y);
                for &v in &row[tile_size * tile_x..x_max] {
                    max_dist = max_dist.max(v);
                }
            }
            out.set(tile_x, tile_y, max_dist);
        }
    }
    out
}

/// For each cell that stands out against its neighborhood maximum, writes
/// the Chebyshev distance from that peak into the neighborhood (keeping
/// the minimum where peaks overlap). Cells under no peak stay at -1.
pub fn dist_to_peak_map(
    field: &ImageF,
    peak_min: f32,
    local_radius: usize,
    peak_weight: f32,
) -> ImageF {
    let mut result = ImageF::filled(field.xsize(), field.ysize(), -1.0);
    let r = local_radius as i64;
    for y0 in 0..field.ysize() as i64 {
        for x0 in 0..field.xsize() as i64 {
            let x_min = (x0 - r).max(0) as usize;
            let y_min = (y0 - r).max(0) as usize;
            let x_max = ((x0 + 1 + r) as usize).min(field.xsize());
            let y_max = ((y0 + 1 + r) as usize).min(field.ysize());
            let mut local_max = peak_min;
            for y in y_min..y_max {
                for &v in &field.row(y)[x_min..x_max] {
                    local_max = local_max.max(v);
                }
            }
            if field.get(x0 as usize, y0 as usize)
                > (1.0 - peak_weight) * peak_min + peak_weight * local_max
            {
                for y in y_min..y_max {
                    for x in x_min..x_max {
                        let dist = (y as i64 - y0).abs().max(x as i64 - x0).max(x0 - x as i64) as f32;
                        let cur = result.get(x, y);
                        if cur < 0.0 || cur > dist {
                            result.set(x, y, dist);
                        }
                    }
                }
            }
        }
    }
    result
}

/// Sharpens one quant value toward `quant_max` proportionally to `factor`
/// and inversely to the peak distance `d`. Returns false iff the value is
/// already saturated.
pub fn adjust_quant_val(q: &mut f32, d: f32, factor: f32, quant_max: f32) -> bool {
    if *q >= 0.999 * quant_max {
        return false;
    }
    let inv_q = 1.0 / *q;
    let adj_inv_q = inv_q - factor / (d + 1.0);
    *q = 1.0 / adj_inv_q.max(1.0 / quant_max);
    true
}

const MAX_OUTER_ITERS: usize = 3;
const ADJ_SPEED: [f32; MAX_OUTER_ITERS] = [0.1, 0.05, 0.025];
const QUANT_SCALE: [f32; MAX_OUTER_ITERS] = [0.0, 0.8, 0.9];

/// Refines the quantization field of `img` until the metric reports a
/// distance at or below `butteraugli_target`, the comparator budget runs
/// out, or three outer passes converge.
pub fn find_best_quantization<M: PerceptualMetric>(
    img: &mut CompressedImage,
    metric: &mut M,
    butteraugli_target: f32,
    max_butteraugli_iters: u32,
    dump_quant_state: bool,
    info: &mut PikInfo,
) {
    let initial_quant_dc = CompressedImage::INITIAL_QUANT_DC / butteraugli_target;
    let initial_quant_ac = CompressedImage::INITIAL_QUANT_AC / butteraugli_target;
    let mut quant_field = ImageF::filled(img.block_xsize(), img.block_ysize(), initial_quant_ac);
    let mut tile_distmap = ImageF::new(img.block_xsize(), img.block_ysize());
    let mut outer_iter = 0usize;
    let mut butteraugli_iter = 0u32;
    let mut quant_max = 4.0f32;
    loop {
        if img.quantizer_mut().set_quant_field(initial_quant_dc, &quant_field) {
            img.quantize();
            if butteraugli_iter >= max_butteraugli_iters {
                break;
            }
            let srgb = img.to_srgb();
            metric.compare(&srgb);
            tile_distmap = tile_dist_map(metric.distmap(), BLOCK_EDGE);
            butteraugli_iter += 1;
            info.num_butteraugli_iters += 1;
            if dump_quant_state {
                info.quant_state.push(format!(
                    "iter {}: distance {:.6}, quant_max {:.2}\n{}",
                    butteraugli_iter,
                    metric.distance(),
                    quant_max,
                    img.quantizer().dump_quantization_map()
                ));
            }
        }
        // When the field did not change, the previous distance map is
        // still valid and the comparator call is skipped.
        let mut changed = false;
        while !changed && metric.distance() > butteraugli_target {
            let mut radius = 1usize;
            while radius <= 4 && !changed {
                let dist_to_peak =
                    dist_to_peak_map(&tile_distmap, butteraugli_target, radius, 0.65);
                for by in 0..img.block_ysize() {
                    for bx in 0..img.block_xsize() {
                        let d = dist_to_peak.get(bx, by);
                        if d >= 0.0 {
                            let factor = ADJ_SPEED[outer_iter] * tile_distmap.get(bx, by);
                            let mut q = quant_field.get(bx, by);
                            if adjust_quant_val(&mut q, d, factor, quant_max) {
                                quant_field.set(bx, by, q);
                                changed = true;
                            }
                        }
                    }
                }
                radius += 1;
            }
            if quant_max >= 8.0 {
                break;
            }
            if !changed {
                quant_max += 0.5;
            }
        }
        if !changed {
            outer_iter += 1;
            if outer_iter == MAX_OUTER_ITERS {
                break;
            }
            // The index-0 scale is a dead sentinel; this branch is only
            // reachable after the first outer pass.
            debug_assert!(outer_iter >= 1);
            for by in 0..img.block_ysize() {
                for q in quant_field.row_mut(by) {
                    *q *= QUANT_SCALE[outer_iter];
                }
            }
        }
    }
}
