//! Top-level encode and decode pipelines.
//!
//! The encoder converts pixels to opsin, builds a compressed image, runs
//! the mode selected by [`CompressParams`] and frames the payload with the
//! container header. The decoder mirrors: header, payload, reconstruction,
//! optional alpha sub-stream.

use crate::adaptive_quant::adaptive_quantization_map;
use crate::alpha::{decode_alpha16, decode_alpha8, encode_alpha16, encode_alpha8};
use crate::compressed::CompressedImage;
use crate::consts::BLOCK_EDGE;
use crate::error::{Error, Result};
use crate::header::{Header, FLAG_ALPHA, FLAG_WEBP_LOSSLESS, HEADER_SIZE, MAX_WIDTH};
use crate::image::{scale_image, Image, Image3, Image3F, MetaImage};
use crate::opsin::{opsin_dynamics_image_b, opsin_dynamics_image_f, opsin_dynamics_image_u};
use crate::rate_control::{find_best_quantization, ButteraugliMetric};
use crate::target_size::compress_to_target_size;
use crate::types::{CompressParams, DecompressParams, PikInfo};
use crate::ytob::find_best_ytob_correlation;

/// Fast-mode DC quant multiplier.
const FAST_QUANT_DC: f32 = 0.769_531_64;
/// Fast-mode scale applied to the adaptive-quant field.
const FAST_QUANT_AC: f32 = 1.520_056_8;

/// Pixel type the pipeline can encode from and decode to: 8-bit sRGB,
/// 16-bit sRGB, or linear float.
pub trait PikPixel: Copy + Default {
    fn to_opsin(color: &Image3<Self>) -> Image3F;
    fn reconstruct(img: &CompressedImage) -> Image3<Self>;
    fn encode_alpha(alpha: &Image<Self>) -> Vec<u8>;
    fn decode_alpha(data: &[u8], xsize: usize, ysize: usize) -> Result<(Image<Self>, usize)>;
}

impl PikPixel for u8 {
    fn to_opsin(color: &Image3<Self>) -> Image3F {
        opsin_dynamics_image_b(color)
    }

    fn reconstruct(img: &CompressedImage) -> Image3<Self> {
        img.to_srgb()
    }

    fn encode_alpha(alpha: &Image<Self>) -> Vec<u8> {
        encode_alpha8(alpha)
    }

    fn decode_alpha(data: &[u8], xsize: usize, ysize: usize) -> Result<(Image<Self>, usize)> {
        decode_alpha8(data, xsize, ysize)
    }
}

impl PikPixel for u16 {
    fn to_opsin(color: &Image3<Self>) -> Image3F {
        opsin_dynamics_image_u(color)
    }

    fn reconstruct(img: &CompressedImage) -> Image3<Self> {
        img.to_srgb16()
    }

    fn encode_alpha(alpha: &Image<Self>) -> Vec<u8> {
        encode_alpha16(alpha)
    }

    fn decode_alpha(data: &[u8], xsize: usize, ysize: usize) -> Result<(Image<Self>, usize)> {
        decode_alpha16(data, xsize, ysize)
    }
}

impl PikPixel for f32 {
    fn to_opsin(color: &Image3<Self>) -> Image3F {
        opsin_dynamics_image_f(color)
    }

    fn reconstruct(img: &CompressedImage) -> Image3<Self> {
        img.to_linear()
    }

    /// Float alpha is carried at 16-bit precision.
    fn encode_alpha(alpha: &Image<Self>) -> Vec<u8> {
        let mut quantized = Image::new(alpha.xsize(), alpha.ysize());
        for y in 0..alpha.ysize() {
            for x in 0..alpha.xsize() {
                quantized.set(x, y, (alpha.get(x, y).clamp(0.0, 1.0) * 65535.0).round() as u16);
            }
        }
        encode_alpha16(&quantized)
    }

    fn decode_alpha(data: &[u8], xsize: usize, ysize: usize) -> Result<(Image<Self>, usize)> {
        let (quantized, consumed) = decode_alpha16(data, xsize, ysize)?;
        let mut alpha = Image::new(xsize, ysize);
        for y in 0..ysize {
            for x in 0..xsize {
                alpha.set(x, y, quantized.get(x, y) as f32 / 65535.0);
            }
        }
        Ok((alpha, consumed))
    }
}

fn compress_to_butteraugli_distance(
    opsin: &Image3F,
    params: &CompressParams,
    info: &mut PikInfo,
) -> Vec<u8> {
    let mut img = CompressedImage::from_opsin(opsin);
    img.quantizer_mut().set_quant(1.0);
    img.quantize();
    find_best_ytob_correlation(&mut img);
    let mut metric = ButteraugliMetric::new(opsin);
    find_best_quantization(
        &mut img,
        &mut metric,
        params.butteraugli_distance,
        params.max_butteraugli_iters,
        params.dump_quant_state,
        info,
    );
    img.encode()
}

fn compress_fast(opsin: &Image3F, _params: &CompressParams, _info: &mut PikInfo) -> Vec<u8> {
    let mut img = CompressedImage::from_opsin(opsin);
    let qf = adaptive_quantization_map(opsin.plane(1), BLOCK_EDGE);
    img.quantizer_mut()
        .set_quant_field(FAST_QUANT_DC, &scale_image(FAST_QUANT_AC, &qf));
    img.quantize();
    img.encode_fast()
}

fn compress_to_size(
    opsin: &Image3F,
    params: &CompressParams,
    target_size: usize,
    info: &mut PikInfo,
) -> Vec<u8> {
    let mut img = CompressedImage::from_opsin(opsin);
    img.quantizer_mut().set_quant(1.0);
    img.quantize();
    find_best_ytob_correlation(&mut img);
    let mut metric = ButteraugliMetric::new(opsin);
    find_best_quantization(
        &mut img,
        &mut metric,
        1.0,
        params.max_butteraugli_iters,
        params.dump_quant_state,
        info,
    );
    compress_to_target_size(&mut img, target_size, params.dump_quant_state, info)
}

/// Encodes an opsin-space image into a framed container.
pub fn opsin_to_pik(
    params: &CompressParams,
    opsin: &Image3F,
    info: &mut PikInfo,
) -> Result<Vec<u8>> {
    if opsin.xsize() == 0 || opsin.ysize() == 0 {
        return Err(Error::EmptyInput);
    }
    let payload = if params.butteraugli_distance >= 0.0 {
        compress_to_butteraugli_distance(opsin, params, info)
    } else if params.target_bitrate > 0.0 {
        let target_size = (opsin.xsize() as f64 * opsin.ysize() as f64
            * params.target_bitrate as f64
            / 8.0) as usize;
        compress_to_size(opsin, params, target_size, info)
    } else if params.uniform_quant > 0.0 {
        let mut img = CompressedImage::from_opsin(opsin);
        img.quantizer_mut().set_quant(params.uniform_quant);
        img.quantize();
        img.encode()
    } else if params.fast_mode {
        compress_fast(opsin, params, info)
    } else {
        return Err(Error::NotImplemented);
    };

    let mut header = Header {
        xsize: opsin.xsize() as u32,
        ysize: opsin.ysize() as u32,
        flags: 0,
    };
    if params.alpha_channel {
        header.flags |= FLAG_ALPHA;
    }
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    header.encode(&mut out);
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Encodes a pixel image, appending the alpha sub-stream when requested.
pub fn pixels_to_pik<T: PikPixel>(
    params: &CompressParams,
    image: &MetaImage<T>,
    info: &mut PikInfo,
) -> Result<Vec<u8>> {
    if image.xsize() == 0 || image.ysize() == 0 {
        return Err(Error::EmptyInput);
    }
    let opsin = T::to_opsin(image.color());
    let mut compressed = opsin_to_pik(params, &opsin, info)?;
    if params.alpha_channel {
        let alpha = image
            .alpha()
            .ok_or(Error::InvalidFormat("alpha_channel set without alpha plane"))?;
        compressed.extend_from_slice(&T::encode_alpha(alpha));
    }
    Ok(compressed)
}

/// Decodes a framed container back to pixels.
pub fn pik_to_pixels<T: PikPixel>(
    params: &DecompressParams,
    compressed: &[u8],
    info: &mut PikInfo,
) -> Result<MetaImage<T>> {
    if compressed.is_empty() {
        return Err(Error::EmptyInput);
    }
    let (header, mut byte_pos) = Header::decode(compressed)?;
    if header.flags & FLAG_WEBP_LOSSLESS != 0 {
        return Err(Error::InvalidFormat("reserved format code"));
    }
    if header.xsize == 0 || header.ysize == 0 {
        return Err(Error::EmptyInput);
    }
    if header.xsize > MAX_WIDTH {
        return Err(Error::DimensionsTooLarge {
            xsize: header.xsize,
            ysize: header.ysize,
            limit: MAX_WIDTH as u64,
        });
    }
    let num_pixels = header.xsize as u64 * header.ysize as u64;
    if num_pixels > params.max_num_pixels {
        return Err(Error::DimensionsTooLarge {
            xsize: header.xsize,
            ysize: header.ysize,
            limit: params.max_num_pixels,
        });
    }

    let xsize = header.xsize as usize;
    let ysize = header.ysize as usize;
    let mut img = CompressedImage::new(xsize, ysize);
    byte_pos += img.decode(&compressed[byte_pos..])?;
    let mut image = MetaImage::from_color(T::reconstruct(&img));

    if header.flags & FLAG_ALPHA != 0 {
        let (alpha, read) = T::decode_alpha(&compressed[byte_pos..], xsize, ysize)?;
        image.set_alpha(alpha);
        byte_pos += read;
    }
    if params.check_decompressed_size && byte_pos != compressed.len() {
        return Err(Error::SizeMismatch {
            consumed: byte_pos,
            total: compressed.len(),
        });
    }
    info.decoded_size = byte_pos;
    Ok(image)
}

/// Decodes into a bare color image; fails if the stream carries alpha.
pub fn pik_to_color_pixels<T: PikPixel>(
    params: &DecompressParams,
    compressed: &[u8],
    info: &mut PikInfo,
) -> Result<Image3<T>> {
    let image = pik_to_pixels::<T>(params, compressed, info)?;
    if image.has_alpha() {
        return Err(Error::UnsupportedAlpha);
    }
    Ok(image.into_color())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Image3B;

    fn uniform_params(quant: f32) -> CompressParams {
        CompressParams {
            butteraugli_distance: -1.0,
            uniform_quant: quant,
            ..CompressParams::default()
        }
    }

    fn test_srgb(xsize: usize, ysize: usize) -> Image3B {
        let mut img = Image3B::new(xsize, ysize);
        for c in 0..3 {
            for y in 0..ysize {
                for x in 0..xsize {
                    img.plane_mut(c)
                        .set(x, y, ((x * 23 + y * 31 + c * 77) % 256) as u8);
                }
            }
        }
        img
    }

    #[test]
    fn test_no_mode_selected_fails() {
        let params = CompressParams {
            butteraugli_distance: -1.0,
            ..CompressParams::default()
        };
        let image = MetaImage::from_color(test_srgb(8, 8));
        let mut info = PikInfo::default();
        assert!(matches!(
            pixels_to_pik(&params, &image, &mut info),
            Err(Error::NotImplemented)
        ));
    }

    #[test]
    fn test_empty_image_rejected() {
        let image = MetaImage::from_color(Image3B::new(0, 8));
        let mut info = PikInfo::default();
        assert!(matches!(
            pixels_to_pik(&uniform_params(1.0), &image, &mut info),
            Err(Error::EmptyInput)
        ));
    }

    #[test]
    fn test_uniform_mode_round_trip() {
        let image = MetaImage::from_color(test_srgb(20, 12));
        let mut info = PikInfo::default();
        let bytes = pixels_to_pik(&uniform_params(1.0), &image, &mut info).unwrap();
        let decoded: MetaImage<u8> =
            pik_to_pixels(&DecompressParams::default(), &bytes, &mut info).unwrap();
        assert_eq!(decoded.xsize(), 20);
        assert_eq!(decoded.ysize(), 12);
        assert!(!decoded.has_alpha());
        assert_eq!(info.decoded_size, bytes.len());
    }

    #[test]
    fn test_fast_mode_round_trip() {
        let params = CompressParams {
            butteraugli_distance: -1.0,
            fast_mode: true,
            ..CompressParams::default()
        };
        let image = MetaImage::from_color(test_srgb(17, 9));
        let mut info = PikInfo::default();
        let bytes = pixels_to_pik(&params, &image, &mut info).unwrap();
        let decoded: MetaImage<u8> =
            pik_to_pixels(&DecompressParams::default(), &bytes, &mut info).unwrap();
        assert_eq!(decoded.xsize(), 17);
        assert_eq!(decoded.ysize(), 9);
    }

    #[test]
    fn test_alpha_round_trip() {
        let mut image = MetaImage::from_color(test_srgb(10, 10));
        let mut alpha = Image::new(10, 10);
        for y in 0..10 {
            for x in 0..10 {
                alpha.set(x, y, (x * 25 + y) as u8);
            }
        }
        image.set_alpha(alpha.clone());
        let params = CompressParams {
            alpha_channel: true,
            ..uniform_params(1.0)
        };
        let mut info = PikInfo::default();
        let bytes = pixels_to_pik(&params, &image, &mut info).unwrap();
        let decoded: MetaImage<u8> = pik_to_pixels(
            &DecompressParams {
                check_decompressed_size: true,
                ..DecompressParams::default()
            },
            &bytes,
            &mut info,
        )
        .unwrap();
        assert_eq!(decoded.alpha(), Some(&alpha));
        // A color-only sink cannot accept the alpha stream.
        assert!(matches!(
            pik_to_color_pixels::<u8>(&DecompressParams::default(), &bytes, &mut info),
            Err(Error::UnsupportedAlpha)
        ));
    }

    #[test]
    fn test_alpha_param_without_plane_fails() {
        let image = MetaImage::from_color(test_srgb(8, 8));
        let params = CompressParams {
            alpha_channel: true,
            ..uniform_params(1.0)
        };
        let mut info = PikInfo::default();
        assert!(pixels_to_pik(&params, &image, &mut info).is_err());
    }

    #[test]
    fn test_reserved_flag_rejected() {
        let mut bytes = Vec::new();
        Header {
            xsize: 8,
            ysize: 8,
            flags: FLAG_WEBP_LOSSLESS,
        }
        .encode(&mut bytes);
        bytes.extend_from_slice(&[0u8; 64]);
        let mut info = PikInfo::default();
        assert!(matches!(
            pik_to_pixels::<u8>(&DecompressParams::default(), &bytes, &mut info),
            Err(Error::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_dimension_limits_enforced() {
        let mut info = PikInfo::default();

        let mut too_wide = Vec::new();
        Header {
            xsize: MAX_WIDTH + 1,
            ysize: 1,
            flags: 0,
        }
        .encode(&mut too_wide);
        assert!(matches!(
            pik_to_pixels::<u8>(&DecompressParams::default(), &too_wide, &mut info),
            Err(Error::DimensionsTooLarge { .. })
        ));

        let mut too_many = Vec::new();
        Header {
            xsize: 4096,
            ysize: 4096,
            flags: 0,
        }
        .encode(&mut too_many);
        let params = DecompressParams {
            max_num_pixels: 1 << 20,
            ..DecompressParams::default()
        };
        assert!(matches!(
            pik_to_pixels::<u8>(&params, &too_many, &mut info),
            Err(Error::DimensionsTooLarge { .. })
        ));
    }

    #[test]
    fn test_trailing_bytes_detected() {
        let image = MetaImage::from_color(test_srgb(8, 8));
        let mut info = PikInfo::default();
        let mut bytes = pixels_to_pik(&uniform_params(1.0), &image, &mut info).unwrap();
        bytes.push(0xEE);
        let strict = DecompressParams {
            check_decompressed_size: true,
            ..DecompressParams::default()
        };
        assert!(matches!(
            pik_to_pixels::<u8>(&strict, &bytes, &mut info),
            Err(Error::SizeMismatch { .. })
        ));
        // Lenient decode ignores the trailing byte.
        assert!(pik_to_pixels::<u8>(&DecompressParams::default(), &bytes, &mut info).is_ok());
    }
}
