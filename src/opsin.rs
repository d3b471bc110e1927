//! Opsin color space conversion.
//!
//! The codec quantizes in a perceptually-weighted "opsin" space: linear RGB
//! is mixed through an absorbance matrix, passed through a signed cube root,
//! and rotated into opponent channels (X = red-green, Y = luma, B = blue).
//! Unlike the comparator's dynamics image, this transform has an exact
//! algebraic inverse, which the reconstruction path relies on.

use crate::consts::{
    NEG_OPSIN_ABSORBANCE_BIAS_CBRT, OPSIN_ABSORBANCE_BIAS, OPSIN_ABSORBANCE_INVERSE,
    OPSIN_ABSORBANCE_MATRIX, SCALED_OPSIN_OFFSET, SCALED_OPSIN_SCALE,
};
use crate::image::{Image3B, Image3F, Image3U};

/// sRGB gamma decoding (sRGB to linear).
#[inline]
pub fn srgb_to_linear(v: f32) -> f32 {
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

/// sRGB gamma encoding (linear to sRGB).
#[inline]
pub fn linear_to_srgb(v: f32) -> f32 {
    if v <= 0.003_130_8 {
        v * 12.92
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

/// Signed cube root.
#[inline]
fn mixed_cbrt(v: f32) -> f32 {
    if v < 0.0 {
        -((-v).cbrt())
    } else {
        v.cbrt()
    }
}

/// Inverse of the signed cube root.
#[inline]
fn mixed_cube(v: f32) -> f32 {
    if v < 0.0 {
        -((-v).powi(3))
    } else {
        v.powi(3)
    }
}

/// Converts one linear RGB sample to opsin (X, Y, B), scaled for
/// quantization.
#[inline]
pub fn linear_to_opsin(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let m = &OPSIN_ABSORBANCE_MATRIX;
    let bias = &OPSIN_ABSORBANCE_BIAS;

    let mixed0 = m[0] * r + m[1] * g + m[2] * b + bias[0];
    let mixed1 = m[3] * r + m[4] * g + m[5] * b + bias[1];
    let mixed2 = m[6] * r + m[7] * g + m[8] * b + bias[2];

    let neg_bias = &NEG_OPSIN_ABSORBANCE_BIAS_CBRT;
    let l = mixed_cbrt(mixed0) + neg_bias[0];
    let m_ = mixed_cbrt(mixed1) + neg_bias[1];
    let s = mixed_cbrt(mixed2) + neg_bias[2];

    let off = &SCALED_OPSIN_OFFSET;
    let scale = &SCALED_OPSIN_SCALE;
    (
        (0.5 * (l - m_) + off[0]) * scale[0],
        (0.5 * (l + m_) + off[1]) * scale[1],
        (s + off[2]) * scale[2],
    )
}

/// Converts one opsin sample back to linear RGB.
#[inline]
pub fn opsin_to_linear(x: f32, y: f32, b: f32) -> (f32, f32, f32) {
    let off = &SCALED_OPSIN_OFFSET;
    let scale = &SCALED_OPSIN_SCALE;
    let x = x / scale[0] - off[0];
    let y = y / scale[1] - off[1];
    let b = b / scale[2] - off[2];

    let neg_bias = &NEG_OPSIN_ABSORBANCE_BIAS_CBRT;
    let l = (y + x) - neg_bias[0];
    let m_ = (y - x) - neg_bias[1];
    let s = b - neg_bias[2];

    let bias = &OPSIN_ABSORBANCE_BIAS;
    let mixed0 = mixed_cube(l) - bias[0];
    let mixed1 = mixed_cube(m_) - bias[1];
    let mixed2 = mixed_cube(s) - bias[2];

    let inv = &OPSIN_ABSORBANCE_INVERSE;
    let r = inv[0] * mixed0 + inv[1] * mixed1 + inv[2] * mixed2;
    let g = inv[3] * mixed0 + inv[4] * mixed1 + inv[5] * mixed2;
    let b_out = inv[6] * mixed0 + inv[7] * mixed1 + inv[8] * mixed2;
    (r, g, b_out)
}

fn opsin_from_linear_rows(
    xsize: usize,
    ysize: usize,
    mut linear_at: impl FnMut(usize, usize) -> (f32, f32, f32),
) -> Image3F {
    let mut out = Image3F::new(xsize, ysize);
    for y in 0..ysize {
        for x in 0..xsize {
            let (r, g, b) = linear_at(x, y);
            let (ox, oy, ob) = linear_to_opsin(r, g, b);
            out.plane_mut(0).set(x, y, ox);
            out.plane_mut(1).set(x, y, oy);
            out.plane_mut(2).set(x, y, ob);
        }
    }
    out
}

/// Opsin image from 8-bit sRGB.
pub fn opsin_dynamics_image_b(srgb: &Image3B) -> Image3F {
    opsin_from_linear_rows(srgb.xsize(), srgb.ysize(), |x, y| {
        (
            srgb_to_linear(srgb.plane(0).get(x, y) as f32 / 255.0),
            srgb_to_linear(srgb.plane(1).get(x, y) as f32 / 255.0),
            srgb_to_linear(srgb.plane(2).get(x, y) as f32 / 255.0),
        )
    })
}

/// Opsin image from 16-bit sRGB.
pub fn opsin_dynamics_image_u(srgb: &Image3U) -> Image3F {
    opsin_from_linear_rows(srgb.xsize(), srgb.ysize(), |x, y| {
        (
            srgb_to_linear(srgb.plane(0).get(x, y) as f32 / 65535.0),
            srgb_to_linear(srgb.plane(1).get(x, y) as f32 / 65535.0),
            srgb_to_linear(srgb.plane(2).get(x, y) as f32 / 65535.0),
        )
    })
}

/// Opsin image from linear float RGB.
pub fn opsin_dynamics_image_f(linear: &Image3F) -> Image3F {
    opsin_from_linear_rows(linear.xsize(), linear.ysize(), |x, y| {
        (
            linear.plane(0).get(x, y),
            linear.plane(1).get(x, y),
            linear.plane(2).get(x, y),
        )
    })
}

/// Reconstructs 8-bit sRGB from an opsin image, cropping to the requested
/// output dimensions (the opsin buffer may carry block padding).
pub fn opsin_to_srgb8(opsin: &Image3F, xsize: usize, ysize: usize) -> Image3B {
    let mut out = Image3B::new(xsize, ysize);
    for y in 0..ysize {
        for x in 0..xsize {
            let (r, g, b) = opsin_to_linear(
                opsin.plane(0).get(x, y),
                opsin.plane(1).get(x, y),
                opsin.plane(2).get(x, y),
            );
            out.plane_mut(0)
                .set(x, y, (linear_to_srgb(r.clamp(0.0, 1.0)) * 255.0).round() as u8);
            out.plane_mut(1)
                .set(x, y, (linear_to_srgb(g.clamp(0.0, 1.0)) * 255.0).round() as u8);
            out.plane_mut(2)
                .set(x, y, (linear_to_srgb(b.clamp(0.0, 1.0)) * 255.0).round() as u8);
        }
    }
    out
}

/// Reconstructs 16-bit sRGB from an opsin image.
pub fn opsin_to_srgb16(opsin: &Image3F, xsize: usize, ysize: usize) -> Image3U {
    let mut out = Image3U::new(xsize, ysize);
    for y in 0..ysize {
        for x in 0..xsize {
            let (r, g, b) = opsin_to_linear(
                opsin.plane(0).get(x, y),
                opsin.plane(1).get(x, y),
                opsin.plane(2).get(x, y),
            );
            out.plane_mut(0)
                .set(x, y, (linear_to_srgb(r.clamp(0.0, 1.0)) * 65535.0).round() as u16);
            out.plane_mut(1)
                .set(x, y, (linear_to_srgb(g.clamp(0.0, 1.0)) * 65535.0).round() as u16);
            out.plane_mut(2)
                .set(x, y, (linear_to_srgb(b.clamp(0.0, 1.0)) * 65535.0).round() as u16);
        }
    }
    out
}

/// Reconstructs linear (gamma expanded) RGB from an opsin image.
pub fn opsin_to_linear_image(opsin: &Image3F, xsize: usize, ysize: usize) -> Image3F {
    let mut out = Image3F::new(xsize, ysize);
    for y in 0..ysize {
        for x in 0..xsize {
            let (r, g, b) = opsin_to_linear(
                opsin.plane(0).get(x, y),
                opsin.plane(1).get(x, y),
                opsin.plane(2).get(x, y),
            );
            out.plane_mut(0).set(x, y, r);
            out.plane_mut(1).set(x, y, g);
            out.plane_mut(2).set(x, y, b);
        }
    }
    out
}
