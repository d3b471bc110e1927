//! Y-to-B correlation search.
//!
//! Chooses the correlation values that minimize the estimated
//! entropy-coded size: one global pass setting every entry to the same
//! value, then a per-tile refinement in raster order. The local stage
//! keeps whole-image histograms and updates them incrementally: a tile's
//! old tokens are unweighted, its blocks requantized, and the new tokens
//! added back, so the size objective always describes the full image.

use crate::compressed::{CompressedImage, YTOB_START};
use crate::consts::{BLOCK_SIZE, TILE_TO_BLOCK_RATIO};
use crate::entropy::{
    build_ac_histogram, build_dc_histogram, predict_dc, AcBlockProcessor, HistogramBuilder,
    NUM_CONTEXTS,
};

/// Search state evaluated by [`optimize`]: apply a candidate value, or
/// apply it and report the size objective.
pub trait YToBEval {
    fn set_val(&mut self, ytob: i32);
    fn eval(&mut self, ytob: i32) -> usize;
}

/// Refined grid search over `[minval, maxval]`: sweeps at resolutions 16,
/// 4 and 1, narrowing the range around the best value after each sweep.
/// Leaves the evaluator set to the returned value.
pub fn optimize<E: YToBEval>(
    eval: &mut E,
    minval: i32,
    maxval: i32,
    mut best_val: i32,
    best_objval: &mut usize,
) -> i32 {
    let mut start = minval;
    let mut end = maxval;
    let mut resolution = 16;
    while resolution >= 1 {
        let mut val = start;
        while val <= end {
            let objval = eval.eval(val);
            if objval < *best_objval {
                best_val = val;
                *best_objval = objval;
            }
            val += resolution;
        }
        start = minval.max(best_val - resolution + 1);
        end = maxval.min(best_val + resolution - 1);
        resolution /= 4;
    }
    eval.set_val(best_val);
    best_val
}

/// Global stage: every Y-to-B entry takes the candidate value and the
/// whole image is requantized and re-histogrammed.
pub struct EvalGlobalYToB<'a> {
    img: &'a mut CompressedImage,
}

impl<'a> EvalGlobalYToB<'a> {
    pub fn new(img: &'a mut CompressedImage) -> Self {
        Self { img }
    }
}

impl YToBEval for EvalGlobalYToB<'_> {
    fn set_val(&mut self, ytob: i32) {
        self.img.set_ytob_dc(ytob);
        for tiley in 0..self.img.tile_ysize() {
            for tilex in 0..self.img.tile_xsize() {
                self.img.set_ytob_ac(tilex, tiley, ytob);
            }
        }
        self.img.quantize();
    }

    fn eval(&mut self, ytob: i32) -> usize {
        self.set_val(ytob);
        let residuals = predict_dc(
            self.img.coeffs(),
            self.img.block_xsize(),
            self.img.block_ysize(),
        );
        let dc_histo = build_dc_histogram(&residuals);
        let ac_histo = build_ac_histogram(
            self.img.coeffs(),
            self.img.block_xsize(),
            self.img.block_ysize(),
        );
        dc_histo.encoded_size(1, 2) + ac_histo.encoded_size(1, 2)
    }
}

/// Local stage: one tile's AC value varies while the histograms track the
/// whole image. The DC histogram is frozen at construction.
pub struct EvalLocalYToB<'a> {
    img: &'a mut CompressedImage,
    ac_processor: AcBlockProcessor,
    dc_histo: HistogramBuilder,
    ac_histo: HistogramBuilder,
    tilex: usize,
    tiley: usize,
}

impl<'a> EvalLocalYToB<'a> {
    pub fn new(img: &'a mut CompressedImage) -> Self {
        let residuals = predict_dc(img.coeffs(), img.block_xsize(), img.block_ysize());
        let dc_histo = build_dc_histogram(&residuals);
        let ac_histo = build_ac_histogram(img.coeffs(), img.block_xsize(), img.block_ysize());
        Self {
            img,
            ac_processor: AcBlockProcessor::new(NUM_CONTEXTS),
            dc_histo,
            ac_histo,
            tilex: 0,
            tiley: 0,
        }
    }

    pub fn set_tile(&mut self, tilex: usize, tiley: usize) {
        self.tilex = tilex;
        self.tiley = tiley;
    }

    fn reprocess_tile_blocks(&mut self, weight: i64) {
        self.ac_histo.set_weight(weight);
        for iy in 0..TILE_TO_BLOCK_RATIO {
            for ix in 0..TILE_TO_BLOCK_RATIO {
                let block_y = TILE_TO_BLOCK_RATIO * self.tiley + iy;
                let block_x = TILE_TO_BLOCK_RATIO * self.tilex + ix;
                if block_x >= self.img.block_xsize() || block_y >= self.img.block_ysize() {
                    continue;
                }
                let offset = block_x * BLOCK_SIZE;
                for c in 0..3 {
                    self.ac_processor.process_block(
                        &self.img.coeffs().row(c, block_y)[offset..offset + BLOCK_SIZE],
                        c,
                        &mut self.ac_histo,
                    );
                }
            }
        }
    }

    fn requantize_tile(&mut self) {
        for iy in 0..TILE_TO_BLOCK_RATIO {
            for ix in 0..TILE_TO_BLOCK_RATIO {
                let block_y = TILE_TO_BLOCK_RATIO * self.tiley + iy;
                let block_x = TILE_TO_BLOCK_RATIO * self.tilex + ix;
                if block_x >= self.img.block_xsize() || block_y >= self.img.block_ysize() {
                    continue;
                }
                self.img.quantize_block(block_x, block_y);
            }
        }
    }
}

impl YToBEval for EvalLocalYToB<'_> {
    fn set_val(&mut self, ytob: i32) {
        self.img.set_ytob_ac(self.tilex, self.tiley, ytob);
        self.reprocess_tile_blocks(-1);
        self.requantize_tile();
        self.reprocess_tile_blocks(1);
    }

    fn eval(&mut self, ytob: i32) -> usize {
        self.set_val(ytob);
        self.dc_histo.encoded_size(1, 2) + self.ac_histo.encoded_size(1, 2)
    }
}

/// Runs the global then the local Y-to-B search.
pub fn find_best_ytob_correlation(img: &mut CompressedImage) {
    let tile_xsize = img.tile_xsize();
    let tile_ysize = img.tile_ysize();
    let (global_ytob, mut best_size) = {
        let mut eval_global = EvalGlobalYToB::new(img);
        let mut best_size = eval_global.eval(YTOB_START);
        let best = optimize(&mut eval_global, 0, 255, YTOB_START, &mut best_size);
        (best, best_size)
    };
    let mut eval_local = EvalLocalYToB::new(img);
    for tiley in 0..tile_ysize {
        for tilex in 0..tile_xsize {
            eval_local.set_tile(tilex, tiley);
            optimize(&mut eval_local, 0, 255, global_ytob, &mut best_size);
        }
    }
}
