//! Per-block quantization of DCT coefficients.
//!
//! The quantizer holds a scalar DC multiplier and a per-block AC multiplier
//! field. A stored integer coefficient is `round(real * q / weight[k])`
//! with half-away-from-zero rounding; `weight` is the fixed per-frequency
//! table in [`crate::consts::QUANT_WEIGHTS`]. The rate-control loop mutates
//! the AC field between iterations and uses the change detection of
//! [`Quantizer::set_quant_field`] to find its fixed point.

use crate::consts::{BLOCK_SIZE, QUANT_WEIGHTS};
use crate::image::ImageF;
use std::fmt::Write as _;

#[derive(Debug, Clone)]
pub struct Quantizer {
    q_dc: f32,
    q_ac: ImageF,
}

impl Quantizer {
    /// Creates a quantizer with a uniform field of 1.0.
    pub fn new(block_xsize: usize, block_ysize: usize) -> Self {
        Self {
            q_dc: 1.0,
            q_ac: ImageF::filled(block_xsize, block_ysize, 1.0),
        }
    }

    /// Sets both the DC multiplier and every AC cell to `v`.
    /// Returns whether the quantization state changed.
    pub fn set_quant(&mut self, v: f32) -> bool {
        let field = ImageF::filled(self.q_ac.xsize(), self.q_ac.ysize(), v);
        self.set_quant_field(v, &field)
    }

    /// Replaces the DC multiplier and AC field.
    /// Returns true iff either differs bitwise from the current state.
    pub fn set_quant_field(&mut self, dc: f32, ac: &ImageF) -> bool {
        assert_eq!(ac.xsize(), self.q_ac.xsize());
        assert_eq!(ac.ysize(), self.q_ac.ysize());
        let mut changed = dc.to_bits() != self.q_dc.to_bits();
        if !changed {
            'scan: for y in 0..ac.ysize() {
                let new_row = ac.row(y);
                let cur_row = self.q_ac.row(y);
                for x in 0..ac.xsize() {
                    if new_row[x].to_bits() != cur_row[x].to_bits() {
                        changed = true;
                        break 'scan;
                    }
                }
            }
        }
        if changed {
            self.q_dc = dc;
            self.q_ac = ac.clone();
        }
        changed
    }

    /// Reads back the current DC multiplier and AC field.
    pub fn get_quant_field(&self) -> (f32, ImageF) {
        (self.q_dc, self.q_ac.clone())
    }

    #[inline]
    pub fn quant_dc(&self) -> f32 {
        self.q_dc
    }

    #[inline]
    pub fn quant_ac(&self, bx: usize, by: usize) -> f32 {
        self.q_ac.get(bx, by)
    }

    /// Quantizes one coefficient. `k` is the natural-order frequency index.
    /// Saturation is symmetric so |coefficient| never exceeds 32767.
    #[inline]
    pub fn quantize_coeff(&self, k: usize, bx: usize, by: usize, real: f32) -> i16 {
        let q = if k == 0 { self.q_dc } else { self.q_ac.get(bx, by) };
        let scaled = real * q / QUANT_WEIGHTS[k];
        scaled.round().clamp(-(i16::MAX as f32), i16::MAX as f32) as i16
    }

    /// Inverse of [`Self::quantize_coeff`].
    #[inline]
    pub fn dequantize_coeff(&self, k: usize, bx: usize, by: usize, coeff: i16) -> f32 {
        let q = if k == 0 { self.q_dc } else { self.q_ac.get(bx, by) };
        coeff as f32 * QUANT_WEIGHTS[k] / q
    }

    /// Quantizes a full real-valued block into integer coefficients.
    pub fn quantize_block(&self, bx: usize, by: usize, real: &[f32; BLOCK_SIZE], out: &mut [i16; BLOCK_SIZE]) {
        for k in 0..BLOCK_SIZE {
            out[k] = self.quantize_coeff(k, bx, by, real[k]);
        }
    }

    /// Dequantizes a full block back to real values. No correlation
    /// correction happens here; the compressed image applies Y-to-B on top.
    pub fn dequantize_block(&self, bx: usize, by: usize, coeffs: &[i16; BLOCK_SIZE], out: &mut [f32; BLOCK_SIZE]) {
        for k in 0..BLOCK_SIZE {
            out[k] = self.dequantize_coeff(k, bx, by, coeffs[k]);
        }
    }

    /// Formats the quantization field for the debug sink.
    pub fn dump_quantization_map(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Quantization field (dc = {:.5}):", self.q_dc);
        for y in 0..self.q_ac.ysize() {
            for x in 0..self.q_ac.xsize() {
                let _ = write!(out, " {:.5}", self.q_ac.get(x, y));
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_quant_field_change_detection() {
        let mut q = Quantizer::new(2, 2);
        assert!(q.set_quant(0.75));
        // Identical field: no change.
        assert!(!q.set_quant(0.75));
        let (dc, mut ac) = q.get_quant_field();
        assert!(!q.set_quant_field(dc, &ac));
        // One cell flips a bit: change.
        ac.set(1, 0, 0.75000006);
        assert!(q.set_quant_field(dc, &ac));
    }

    #[test]
    fn test_quantize_constant_field_invariant() {
        let q = {
            let mut q = Quantizer::new(1, 1);
            q.set_quant(2.0);
            q
        };
        let mut real = [0.0f32; BLOCK_SIZE];
        for (k, v) in real.iter_mut().enumerate() {
            *v = (k as f32 - 31.5) * 0.01;
        }
        let mut out = [0i16; BLOCK_SIZE];
        q.quantize_block(0, 0, &real, &mut out);
        for k in 0..BLOCK_SIZE {
            let expected = (real[k] * 2.0 / QUANT_WEIGHTS[k]).round() as i16;
            assert_eq!(out[k], expected, "k = {}", k);
        }
    }

    #[test]
    fn test_rounding_half_away_from_zero() {
        let mut q = Quantizer::new(1, 1);
        q.set_quant(1.0);
        // real * q / weight == 0.5 exactly -> rounds to 1; -0.5 -> -1.
        let w = QUANT_WEIGHTS[5];
        assert_eq!(q.quantize_coeff(5, 0, 0, 0.5 * w), 1);
        assert_eq!(q.quantize_coeff(5, 0, 0, -0.5 * w), -1);
    }

    #[test]
    fn test_saturation_is_symmetric() {
        let mut q = Quantizer::new(1, 1);
        q.set_quant(1000.0);
        // Overflowing magnitudes saturate at +-32767, never i16::MIN.
        assert_eq!(q.quantize_coeff(3, 0, 0, 1e6), i16::MAX);
        assert_eq!(q.quantize_coeff(3, 0, 0, -1e6), -i16::MAX);
    }

    #[test]
    fn test_dequantize_inverts_scale() {
        let mut q = Quantizer::new(1, 1);
        q.set_quant(0.5625);
        let real = 0.37f32;
        let coeff = q.quantize_coeff(9, 0, 0, real);
        let back = q.dequantize_coeff(9, 0, 0, coeff);
        // Within one quantization step.
        assert!((back - real).abs() <= QUANT_WEIGHTS[9] / 0.5625);
    }
}
