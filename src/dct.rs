//! Separable 8x8 DCT for the coefficient transform.
//!
//! Forward DCT-II and inverse DCT-III with an orthonormal basis, so the
//! per-frequency quantization weights apply to true coefficient magnitudes.
//! Both directions are matrix passes over `wide::f32x8` rows; a 2-D
//! transform is two 1-D passes with a transpose between them.

use crate::consts::{BLOCK_EDGE, BLOCK_SIZE};
use crate::image::ImageF;
use wide::f32x8;

/// Orthonormal DCT-II basis: `DCT_MATRIX[u][x] = c(u) * cos((2x+1)u*pi/16)`
/// with `c(0) = sqrt(1/8)`, `c(u>0) = 1/2`.
#[rustfmt::skip]
pub(crate) const DCT_MATRIX: [[f32; 8]; 8] = [
    [ 0.35355339,  0.35355339,  0.35355339,  0.35355339,  0.35355339,  0.35355339,  0.35355339,  0.35355339],
    [ 0.49039264,  0.41573481,  0.27778512,  0.09754516, -0.09754516, -0.27778512, -0.41573481, -0.49039264],
    [ 0.46193977,  0.19134172, -0.19134172, -0.46193977, -0.46193977, -0.19134172,  0.19134172,  0.46193977],
    [ 0.41573481, -0.09754516, -0.49039264, -0.27778512,  0.27778512,  0.49039264,  0.09754516, -0.41573481],
    [ 0.35355339, -0.35355339, -0.35355339,  0.35355339,  0.35355339, -0.35355339, -0.35355339,  0.35355339],
    [ 0.27778512, -0.49039264,  0.09754516,  0.41573481, -0.41573481, -0.09754516,  0.49039264, -0.27778512],
    [ 0.19134172, -0.46193977,  0.46193977, -0.19134172, -0.19134172,  0.46193977, -0.46193977,  0.19134172],
    [ 0.09754516, -0.27778512,  0.41573481, -0.49039264,  0.49039264, -0.41573481,  0.27778512, -0.09754516],
];

const fn transpose_mat(m: [[f32; 8]; 8]) -> [[f32; 8]; 8] {
    let mut out = [[0.0f32; 8]; 8];
    let mut u = 0;
    while u < 8 {
        let mut x = 0;
        while x < 8 {
            out[u][x] = m[x][u];
            x += 1;
        }
        u += 1;
    }
    out
}

const DCT_MATRIX_T: [[f32; 8]; 8] = transpose_mat(DCT_MATRIX);

/// One 1-D pass over all eight rows: `out_row[u] = sum_k m[u][k] * row[k]`.
fn matrix_pass(block: &mut [f32; BLOCK_SIZE], m: &[[f32; 8]; 8]) {
    let mut rows = [f32x8::ZERO; 8];
    for (k, row) in rows.iter_mut().enumerate() {
        let mut lane = [0.0f32; 8];
        lane.copy_from_slice(&block[k * BLOCK_EDGE..(k + 1) * BLOCK_EDGE]);
        *row = f32x8::from(lane);
    }
    for u in 0..BLOCK_EDGE {
        let mut acc = f32x8::ZERO;
        for k in 0..BLOCK_EDGE {
            acc += f32x8::splat(m[u][k]) * rows[k];
        }
        block[u * BLOCK_EDGE..(u + 1) * BLOCK_EDGE].copy_from_slice(&acc.to_array());
    }
}

fn transpose(block: &mut [f32; BLOCK_SIZE]) {
    for y in 0..BLOCK_EDGE {
        for x in (y + 1)..BLOCK_EDGE {
            block.swap(y * BLOCK_EDGE + x, x * BLOCK_EDGE + y);
        }
    }
}

/// In-place forward DCT-II of one block, natural coefficient order.
pub fn forward_dct_8x8(block: &mut [f32; BLOCK_SIZE]) {
    matrix_pass(block, &DCT_MATRIX);
    transpose(block);
    matrix_pass(block, &DCT_MATRIX);
    transpose(block);
}

/// In-place inverse DCT-III, undoing [`forward_dct_8x8`].
pub fn inverse_dct_8x8(block: &mut [f32; BLOCK_SIZE]) {
    matrix_pass(block, &DCT_MATRIX_T);
    transpose(block);
    matrix_pass(block, &DCT_MATRIX_T);
    transpose(block);
}

/// Copies the 8x8 pixel block at block coordinates `(bx, by)` out of a
/// plane, replicating the last row/column into padding when the image
/// dimensions are not multiples of 8.
pub fn block_from_plane(plane: &ImageF, bx: usize, by: usize) -> [f32; BLOCK_SIZE] {
    let mut block = [0.0f32; BLOCK_SIZE];
    for iy in 0..BLOCK_EDGE {
        let y = (by * BLOCK_EDGE + iy).min(plane.ysize() - 1);
        let row = plane.row(y);
        for ix in 0..BLOCK_EDGE {
            let x = (bx * BLOCK_EDGE + ix).min(plane.xsize() - 1);
            block[iy * BLOCK_EDGE + ix] = row[x];
        }
    }
    block
}

/// Writes an 8x8 pixel block into a plane sized to whole blocks.
pub fn block_to_plane(block: &[f32; BLOCK_SIZE], plane: &mut ImageF, bx: usize, by: usize) {
    for iy in 0..BLOCK_EDGE {
        let row = plane.row_mut(by * BLOCK_EDGE + iy);
        row[bx * BLOCK_EDGE..(bx + 1) * BLOCK_EDGE]
            .copy_from_slice(&block[iy * BLOCK_EDGE..(iy + 1) * BLOCK_EDGE]);
    }
}
