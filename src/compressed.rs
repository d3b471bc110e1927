//! The compressed-image representation.
//!
//! [`CompressedImage`] holds both the quantized and the transformed
//! original version of an image and is used by the encoder and the
//! decoder. Coefficients live in an [`Image3W`] whose rows store
//! `block_xsize` consecutive 8x8 blocks of 64 natural-order values.
//! The blue plane is stored decorrelated: the encoder subtracts the
//! Y-to-B prediction computed from the dequantized luma coefficient, the
//! reconstruction adds it back.

use crate::consts::{BLOCK_EDGE, BLOCK_SIZE, TILE_TO_BLOCK_RATIO};
use crate::dct::{block_from_plane, block_to_plane, forward_dct_8x8, inverse_dct_8x8};
use crate::entropy::{
    decode_ac_stream, decode_dc_stream, encode_ac_stream, encode_dc_stream, predict_dc,
    NUM_CONTEXTS, NUM_CONTEXTS_FAST,
};
use crate::error::{Error, Result};
use crate::image::{Image, Image3B, Image3F, Image3U, Image3W, ImageF};
use crate::opsin::{opsin_to_linear_image, opsin_to_srgb16, opsin_to_srgb8};
use crate::quantizer::Quantizer;

/// Starting value for the Y-to-B search and the decoder default.
pub const YTOB_START: i32 = 120;

fn div_ceil_block(v: usize) -> usize {
    (v + BLOCK_EDGE - 1) / BLOCK_EDGE
}

pub struct CompressedImage {
    xsize: usize,
    ysize: usize,
    block_xsize: usize,
    block_ysize: usize,
    tile_xsize: usize,
    tile_ysize: usize,
    quantizer: Quantizer,
    dct_coeffs: Image3W,
    /// Real-valued DCT of the opsin original; encoder-side only.
    coeffs_real: Option<Image3F>,
    /// Pixel-space reconstruction of the quantized coefficients, shared
    /// between encoder iterations and the decoder output path.
    opsin_overlay: Option<Image3F>,
    ytob_dc: i32,
    ytob_ac: Image<i32>,
}

impl CompressedImage {
    /// Initial DC quant multiplier per unit butteraugli distance.
    pub const INITIAL_QUANT_DC: f32 = 1.0625;
    /// Initial AC quant multiplier per unit butteraugli distance.
    pub const INITIAL_QUANT_AC: f32 = 0.5625;

    /// Creates an image in an undefined state; callers must `decode` or
    /// construct with [`CompressedImage::from_opsin`] instead.
    pub fn new(xsize: usize, ysize: usize) -> Self {
        let block_xsize = div_ceil_block(xsize);
        let block_ysize = div_ceil_block(ysize);
        let tile_xsize = (block_xsize + TILE_TO_BLOCK_RATIO - 1) / TILE_TO_BLOCK_RATIO;
        let tile_ysize = (block_ysize + TILE_TO_BLOCK_RATIO - 1) / TILE_TO_BLOCK_RATIO;
        Self {
            xsize,
            ysize,
            block_xsize,
            block_ysize,
            tile_xsize,
            tile_ysize,
            quantizer: Quantizer::new(block_xsize, block_ysize),
            dct_coeffs: Image3W::new(block_xsize * BLOCK_SIZE, block_ysize),
            coeffs_real: None,
            opsin_overlay: None,
            ytob_dc: YTOB_START,
            ytob_ac: Image::filled(tile_xsize, tile_ysize, YTOB_START),
        }
    }

    /// Creates an encoder-side compressed image from an opsin original.
    /// The image stays unquantized until [`CompressedImage::quantize`].
    pub fn from_opsin(opsin: &Image3F) -> Self {
        let mut img = Self::new(opsin.xsize(), opsin.ysize());
        let mut real = Image3F::new(img.block_xsize * BLOCK_SIZE, img.block_ysize);
        for c in 0..3 {
            for by in 0..img.block_ysize {
                for bx in 0..img.block_xsize {
                    let mut block = block_from_plane(opsin.plane(c), bx, by);
                    forward_dct_8x8(&mut block);
                    real.row_mut(c, by)[bx * BLOCK_SIZE..(bx + 1) * BLOCK_SIZE]
                        .copy_from_slice(&block);
                }
            }
        }
        img.coeffs_real = Some(real);
        img.quantize_dc();
        img
    }

    #[inline]
    pub fn xsize(&self) -> usize {
        self.xsize
    }

    #[inline]
    pub fn ysize(&self) -> usize {
        self.ysize
    }

    #[inline]
    pub fn block_xsize(&self) -> usize {
        self.block_xsize
    }

    #[inline]
    pub fn block_ysize(&self) -> usize {
        self.block_ysize
    }

    #[inline]
    pub fn tile_xsize(&self) -> usize {
        self.tile_xsize
    }

    #[inline]
    pub fn tile_ysize(&self) -> usize {
        self.tile_ysize
    }

    pub fn quantizer(&self) -> &Quantizer {
        &self.quantizer
    }

    pub fn quantizer_mut(&mut self) -> &mut Quantizer {
        &mut self.quantizer
    }

    pub fn coeffs(&self) -> &Image3W {
        &self.dct_coeffs
    }

    /// Y-to-B multiplier for DC coefficients.
    #[inline]
    pub fn ytob_dc(&self) -> f32 {
        self.ytob_dc as f32 / 128.0
    }

    /// Y-to-B multiplier for AC coefficients of the tile `(tx, ty)`.
    #[inline]
    pub fn ytob_ac(&self, tx: usize, ty: usize) -> f32 {
        self.ytob_ac.get(tx, ty) as f32 / 128.0
    }

    pub fn set_ytob_dc(&mut self, ytob: i32) {
        debug_assert!((0..=255).contains(&ytob));
        self.ytob_dc = ytob;
    }

    pub fn set_ytob_ac(&mut self, tx: usize, ty: usize, ytob: i32) {
        debug_assert!((0..=255).contains(&ytob));
        self.ytob_ac.set(tx, ty, ytob);
    }

    #[inline]
    fn ytob_for(&self, k: usize, bx: usize, by: usize) -> f32 {
        if k == 0 {
            self.ytob_dc()
        } else {
            self.ytob_ac(bx / TILE_TO_BLOCK_RATIO, by / TILE_TO_BLOCK_RATIO)
        }
    }

    /// Quantizes one block from the encoder-side real coefficients. The
    /// blue plane stores the residual against the Y-to-B prediction.
    pub fn quantize_block(&mut self, bx: usize, by: usize) {
        let offset = bx * BLOCK_SIZE;
        let src: [[f32; BLOCK_SIZE]; 3] = {
            let real = self
                .coeffs_real
                .as_ref()
                .expect("quantize_block requires an opsin original");
            [0, 1, 2].map(|c| {
                real.row(c, by)[offset..offset + BLOCK_SIZE]
                    .try_into()
                    .unwrap()
            })
        };
        let mut y_dequant = [0.0f32; BLOCK_SIZE];
        for (c, src) in src.iter().enumerate() {
            for k in 0..BLOCK_SIZE {
                let value = if c == 2 {
                    src[k] - self.ytob_for(k, bx, by) * y_dequant[k]
                } else {
                    src[k]
                };
                let coeff = self.quantizer.quantize_coeff(k, bx, by, value);
                self.dct_coeffs.row_mut(c, by)[offset + k] = coeff;
                if c == 1 {
                    y_dequant[k] = self.quantizer.dequantize_coeff(k, bx, by, coeff);
                }
            }
        }
    }

    /// First-pass coarse DC: quantizes only coefficient 0 of every block,
    /// leaving AC untouched.
    fn quantize_dc(&mut self) {
        for by in 0..self.block_ysize {
            for bx in 0..self.block_xsize {
                let offset = bx * BLOCK_SIZE;
                let src: [f32; 3] = {
                    let real = self
                        .coeffs_real
                        .as_ref()
                        .expect("quantize_dc requires an opsin original");
                    [0, 1, 2].map(|c| real.row(c, by)[offset])
                };
                let mut y_dequant = 0.0f32;
                for (c, &dc) in src.iter().enumerate() {
                    let value = if c == 2 {
                        dc - self.ytob_dc() * y_dequant
                    } else {
                        dc
                    };
                    let coeff = self.quantizer.quantize_coeff(0, bx, by, value);
                    self.dct_coeffs.row_mut(c, by)[offset] = coeff;
                    if c == 1 {
                        y_dequant = self.quantizer.dequantize_coeff(0, bx, by, coeff);
                    }
                }
            }
        }
    }

    /// Applies the current quantizer to every block and refreshes the
    /// opsin overlay so encoder-side reconstructions match the decoder.
    pub fn quantize(&mut self) {
        for by in 0..self.block_ysize {
            for bx in 0..self.block_xsize {
                self.quantize_block(bx, by);
            }
        }
        self.opsin_overlay = Some(self.reconstruct_opsin());
    }

    /// Dequantizes one block into real per-plane coefficients, applying
    /// the Y-to-B correction to the blue plane.
    pub fn dequantize_block(&self, bx: usize, by: usize) -> [[f32; BLOCK_SIZE]; 3] {
        let offset = bx * BLOCK_SIZE;
        let mut out = [[0.0f32; BLOCK_SIZE]; 3];
        for c in 0..3 {
            let row = self.dct_coeffs.row(c, by);
            for k in 0..BLOCK_SIZE {
                out[c][k] = self.quantizer.dequantize_coeff(k, bx, by, row[offset + k]);
            }
        }
        for k in 0..BLOCK_SIZE {
            out[2][k] += self.ytob_for(k, bx, by) * out[1][k];
        }
        out
    }

    /// Pixel-space opsin image from the quantized coefficients, sized to
    /// whole blocks (callers crop to `xsize` x `ysize`).
    fn reconstruct_opsin(&self) -> Image3F {
        let mut opsin = Image3F::new(
            self.block_xsize * BLOCK_EDGE,
            self.block_ysize * BLOCK_EDGE,
        );
        for by in 0..self.block_ysize {
            for bx in 0..self.block_xsize {
                let mut planes = self.dequantize_block(bx, by);
                for (c, block) in planes.iter_mut().enumerate() {
                    inverse_dct_8x8(block);
                    block_to_plane(block, opsin.plane_mut(c), bx, by);
                }
            }
        }
        opsin
    }

    fn with_overlay<R>(&self, f: impl FnOnce(&Image3F) -> R) -> R {
        match &self.opsin_overlay {
            Some(overlay) => f(overlay),
            None => f(&self.reconstruct_opsin()),
        }
    }

    /// 8-bit sRGB reconstruction.
    pub fn to_srgb(&self) -> Image3B {
        self.with_overlay(|o| opsin_to_srgb8(o, self.xsize, self.ysize))
    }

    /// 16-bit sRGB reconstruction.
    pub fn to_srgb16(&self) -> Image3U {
        self.with_overlay(|o| opsin_to_srgb16(o, self.xsize, self.ysize))
    }

    /// Linear (gamma expanded) sRGB reconstruction.
    pub fn to_linear(&self) -> Image3F {
        self.with_overlay(|o| opsin_to_linear_image(o, self.xsize, self.ysize))
    }

    fn encode_with(&self, num_contexts: usize) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_quantizer(&mut out);
        self.encode_ytob(&mut out);
        let residuals = predict_dc(&self.dct_coeffs, self.block_xsize, self.block_ysize);
        let dc = encode_dc_stream(&residuals, num_contexts);
        out.extend_from_slice(&(dc.len() as u32).to_le_bytes());
        out.extend_from_slice(&dc);
        let ac = encode_ac_stream(
            &self.dct_coeffs,
            self.block_xsize,
            self.block_ysize,
            num_contexts,
        );
        out.extend_from_slice(&(ac.len() as u32).to_le_bytes());
        out.extend_from_slice(&ac);
        out
    }

    /// Lossless encoding of the quantized coefficients with the per-plane
    /// context model.
    pub fn encode(&self) -> Vec<u8> {
        self.encode_with(NUM_CONTEXTS)
    }

    /// Same coder with the single-context model of the fast pipeline.
    pub fn encode_fast(&self) -> Vec<u8> {
        self.encode_with(NUM_CONTEXTS_FAST)
    }

    fn encode_quantizer(&self, out: &mut Vec<u8>) {
        let (q_dc, q_ac) = self.quantizer.get_quant_field();
        out.extend_from_slice(&q_dc.to_bits().to_le_bytes());
        // Run-length over the raster-scanned bit patterns; the field is
        // piecewise constant after rate control so this stays small.
        let mut run_bits: u32 = 0;
        let mut run_len: u32 = 0;
        let flush = |out: &mut Vec<u8>, bits: u32, len: u32| {
            let mut left = len;
            while left > 0 {
                let n = left.min(u16::MAX as u32);
                out.extend_from_slice(&(n as u16).to_le_bytes());
                out.extend_from_slice(&bits.to_le_bytes());
                left -= n;
            }
        };
        for by in 0..self.block_ysize {
            for &q in q_ac.row(by) {
                let bits = q.to_bits();
                if run_len > 0 && bits == run_bits {
                    run_len += 1;
                } else {
                    flush(out, run_bits, run_len);
                    run_bits = bits;
                    run_len = 1;
                }
            }
        }
        flush(out, run_bits, run_len);
    }

    fn encode_ytob(&self, out: &mut Vec<u8>) {
        out.push(self.ytob_dc as u8);
        for ty in 0..self.tile_ysize {
            for tx in 0..self.tile_xsize {
                out.push(self.ytob_ac.get(tx, ty) as u8);
            }
        }
    }

    /// Replaces `self` with the compressed image from the bitstream and
    /// returns the number of bytes consumed. On error the image keeps its
    /// prior (empty) state.
    pub fn decode(&mut self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Err(Error::EmptyInput);
        }
        let mut pos = 0usize;

        // Quantizer section.
        let (q_dc, q_ac, quant_len) =
            decode_quantizer(data, self.block_xsize, self.block_ysize)?;
        pos += quant_len;

        // Y-to-B section.
        let ytob_len = 1 + self.tile_xsize * self.tile_ysize;
        if pos + ytob_len > data.len() {
            return Err(Error::TruncatedPayload {
                needed: pos + ytob_len,
                available: data.len(),
            });
        }
        let ytob_dc = data[pos] as i32;
        let mut ytob_ac = Image::new(self.tile_xsize, self.tile_ysize);
        for ty in 0..self.tile_ysize {
            for tx in 0..self.tile_xsize {
                ytob_ac.set(tx, ty, data[pos + 1 + ty * self.tile_xsize + tx] as i32);
            }
        }
        pos += ytob_len;

        // DC stream.
        let (dc_data, dc_len) = framed_stream(data, pos)?;
        let (dc_values, dc_consumed) =
            decode_dc_stream(dc_data, self.block_xsize, self.block_ysize)?;
        if dc_consumed != dc_data.len() {
            return Err(Error::DecodeFailure("DC stream length mismatch"));
        }
        pos += dc_len;

        // AC stream.
        let (ac_data, ac_len) = framed_stream(data, pos)?;
        let mut coeffs = Image3W::new(self.block_xsize * BLOCK_SIZE, self.block_ysize);
        let ac_consumed = decode_ac_stream(ac_data, self.block_xsize, self.block_ysize, &mut coeffs)?;
        if ac_consumed != ac_data.len() {
            return Err(Error::DecodeFailure("AC stream length mismatch"));
        }
        pos += ac_len;

        for c in 0..3 {
            for by in 0..self.block_ysize {
                for bx in 0..self.block_xsize {
                    coeffs.row_mut(c, by)[bx * BLOCK_SIZE] =
                        dc_values.plane(c).get(bx, by) as i16;
                }
            }
        }

        self.quantizer.set_quant_field(q_dc, &q_ac);
        self.dct_coeffs = coeffs;
        self.ytob_dc = ytob_dc;
        self.ytob_ac = ytob_ac;
        self.coeffs_real = None;
        self.opsin_overlay = Some(self.reconstruct_opsin());
        Ok(pos)
    }
}

fn framed_stream(data: &[u8], pos: usize) -> Result<(&[u8], usize)> {
    if pos + 4 > data.len() {
        return Err(Error::TruncatedPayload {
            needed: pos + 4,
            available: data.len(),
        });
    }
    let len = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap()) as usize;
    if pos + 4 + len > data.len() {
        return Err(Error::TruncatedPayload {
            needed: pos + 4 + len,
            available: data.len(),
        });
    }
    Ok((&data[pos + 4..pos + 4 + len], 4 + len))
}

fn decode_quantizer(
    data: &[u8],
    block_xsize: usize,
    block_ysize: usize,
) -> Result<(f32, ImageF, usize)> {
    let truncated = |needed: usize| Error::TruncatedPayload {
        needed,
        available: data.len(),
    };
    if data.len() < 4 {
        return Err(truncated(4));
    }
    let q_dc = f32::from_bits(u32::from_le_bytes(data[..4].try_into().unwrap()));
    if !q_dc.is_finite() || q_dc <= 0.0 {
        return Err(Error::DecodeFailure("bad DC quant value"));
    }
    let mut pos = 4usize;
    let mut q_ac = ImageF::new(block_xsize, block_ysize);
    let total = block_xsize * block_ysize;
    let mut filled = 0usize;
    while filled < total {
        if pos + 6 > data.len() {
            return Err(truncated(pos + 6));
        }
        let count = u16::from_le_bytes(data[pos..pos + 2].try_into().unwrap()) as usize;
        let bits = u32::from_le_bytes(data[pos + 2..pos + 6].try_into().unwrap());
        pos += 6;
        if count == 0 || filled + count > total {
            return Err(Error::DecodeFailure("quant field run overflow"));
        }
        let value = f32::from_bits(bits);
        if !value.is_finite() || value <= 0.0 {
            return Err(Error::DecodeFailure("bad AC quant value"));
        }
        for i in filled..filled + count {
            q_ac.set(i % block_xsize, i / block_xsize, value);
        }
        filled += count;
    }
    Ok((q_dc, q_ac, pos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Image3F;

    fn test_opsin(xsize: usize, ysize: usize) -> Image3F {
        let mut opsin = Image3F::new(xsize, ysize);
        for c in 0..3 {
            for y in 0..ysize {
                for x in 0..xsize {
                    let v = 0.2 + 0.1 * c as f32
                        + 0.03 * ((x * 7 + y * 13 + c * 29) % 11) as f32;
                    opsin.plane_mut(c).set(x, y, v);
                }
            }
        }
        opsin
    }

    #[test]
    fn test_block_grid_dimensions() {
        let img = CompressedImage::new(9, 17);
        assert_eq!(img.block_xsize(), 2);
        assert_eq!(img.block_ysize(), 3);
        assert_eq!(img.tile_xsize(), 1);
        assert_eq!(img.tile_ysize(), 1);
        let img = CompressedImage::new(65, 64);
        assert_eq!(img.block_xsize(), 9);
        assert_eq!(img.tile_xsize(), 2);
        assert_eq!(img.tile_ysize(), 1);
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let opsin = test_opsin(24, 16);
        let mut img = CompressedImage::from_opsin(&opsin);
        img.quantizer_mut().set_quant(1.0);
        img.set_ytob_dc(140);
        img.set_ytob_ac(0, 0, 97);
        img.quantize();
        let bytes = img.encode();

        let mut decoded = CompressedImage::new(24, 16);
        let consumed = decoded.decode(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded.coeffs(), img.coeffs());
        let (q_dc_a, q_ac_a) = img.quantizer().get_quant_field();
        let (q_dc_b, q_ac_b) = decoded.quantizer().get_quant_field();
        assert_eq!(q_dc_a.to_bits(), q_dc_b.to_bits());
        assert_eq!(q_ac_a, q_ac_b);
        assert_eq!(decoded.ytob_dc, img.ytob_dc);
        assert_eq!(decoded.ytob_ac, img.ytob_ac);
    }

    #[test]
    fn test_fast_encoding_round_trips() {
        let opsin = test_opsin(8, 8);
        let mut img = CompressedImage::from_opsin(&opsin);
        img.quantizer_mut().set_quant(1.5);
        img.quantize();
        let bytes = img.encode_fast();
        let mut decoded = CompressedImage::new(8, 8);
        decoded.decode(&bytes).unwrap();
        assert_eq!(decoded.coeffs(), img.coeffs());
    }

    #[test]
    fn test_reconstruction_consistent_between_sides() {
        let opsin = test_opsin(16, 8);
        let mut img = CompressedImage::from_opsin(&opsin);
        img.quantizer_mut().set_quant(1.0);
        img.quantize();
        let encoder_view = img.to_srgb();
        let bytes = img.encode();
        let mut decoded = CompressedImage::new(16, 8);
        decoded.decode(&bytes).unwrap();
        let decoder_view = decoded.to_srgb();
        for c in 0..3 {
            for y in 0..8 {
                for x in 0..16 {
                    assert_eq!(
                        encoder_view.plane(c).get(x, y),
                        decoder_view.plane(c).get(x, y)
                    );
                }
            }
        }
    }

    #[test]
    fn test_ytob_correction_restores_blue() {
        let opsin = test_opsin(8, 8);
        let mut img = CompressedImage::from_opsin(&opsin);
        img.quantizer_mut().set_quant(4.0);
        for &ytob in &[0, 128, 255] {
            img.set_ytob_dc(ytob);
            img.set_ytob_ac(0, 0, ytob);
            img.quantize();
            let planes = img.dequantize_block(0, 0);
            let real = img.coeffs_real.as_ref().unwrap();
            // Dequantized blue approximates the original real coefficient
            // regardless of the correlation value.
            for k in 0..BLOCK_SIZE {
                let orig = real.row(2, 0)[k];
                let step = crate::consts::QUANT_WEIGHTS[k] / 4.0;
                assert!(
                    (planes[2][k] - orig).abs() <= step,
                    "ytob {} k {}: {} vs {}",
                    ytob,
                    k,
                    planes[2][k],
                    orig
                );
            }
        }
    }

    #[test]
    fn test_decode_rejects_truncated_payload() {
        let opsin = test_opsin(8, 8);
        let mut img = CompressedImage::from_opsin(&opsin);
        img.quantizer_mut().set_quant(1.0);
        img.quantize();
        let bytes = img.encode();
        let mut decoded = CompressedImage::new(8, 8);
        assert!(decoded.decode(&bytes[..bytes.len() - 3]).is_err());
        assert!(decoded.decode(&[]).is_err());
    }
}
