//! Round-trip and boundary tests for the pik-oxide codec.

use pik_oxide::opsin::opsin_dynamics_image_f;
use pik_oxide::{
    pik_to_pixels, pixels_to_pik, CompressParams, CompressedImage, DecompressParams, Image3,
    Image3B, Image3F, MetaImage, PikInfo,
};

/// Gradient test image.
fn gradient_image(width: usize, height: usize) -> Image3B {
    let mut img = Image3B::new(width, height);
    for y in 0..height {
        for x in 0..width {
            img.plane_mut(0).set(x, y, (x * 255 / width.max(1)) as u8);
            img.plane_mut(1).set(x, y, (y * 255 / height.max(1)) as u8);
            img.plane_mut(2)
                .set(x, y, ((x + y) * 255 / (width + height)) as u8);
        }
    }
    img
}

/// Uniform color test image.
fn uniform_image(width: usize, height: usize, rgb: [u8; 3]) -> Image3B {
    let mut img = Image3B::new(width, height);
    for (c, &v) in rgb.iter().enumerate() {
        img.plane_mut(c).fill(v);
    }
    img
}

fn uniform_quant_params(quant: f32) -> CompressParams {
    CompressParams {
        butteraugli_distance: -1.0,
        uniform_quant: quant,
        ..CompressParams::default()
    }
}

fn round_trip(params: &CompressParams, image: &Image3B) -> (Vec<u8>, Image3B, PikInfo) {
    let mut info = PikInfo::default();
    let bytes = pixels_to_pik(params, &MetaImage::from_color(image.clone()), &mut info).unwrap();
    let decoded: MetaImage<u8> =
        pik_to_pixels(&DecompressParams::default(), &bytes, &mut info).unwrap();
    (bytes, decoded.into_color(), info)
}

#[test]
fn test_1x1_image_round_trips() {
    let image = uniform_image(1, 1, [200, 40, 90]);
    let (bytes, decoded, _) = round_trip(&uniform_quant_params(1.0), &image);
    assert!(!bytes.is_empty());
    assert_eq!(decoded.xsize(), 1);
    assert_eq!(decoded.ysize(), 1);
    for c in 0..3 {
        let a = image.plane(c).get(0, 0) as i32;
        let b = decoded.plane(c).get(0, 0) as i32;
        assert!((a - b).abs() <= 1, "plane {}: {} vs {}", c, a, b);
    }
}

#[test]
fn test_8x8_uniform_grey_is_exact() {
    let image = uniform_image(8, 8, [128, 128, 128]);
    let (_, decoded, _) = round_trip(&uniform_quant_params(1.0), &image);
    for c in 0..3 {
        for y in 0..8 {
            for x in 0..8 {
                assert_eq!(decoded.plane(c).get(x, y), 128, "plane {} ({},{})", c, x, y);
            }
        }
    }
}

#[test]
fn test_9x9_partial_blocks_round_trip() {
    let image = gradient_image(9, 9);
    let (_, decoded, _) = round_trip(&uniform_quant_params(1.0), &image);
    assert_eq!(decoded.xsize(), 9);
    assert_eq!(decoded.ysize(), 9);
    for c in 0..3 {
        for y in 0..9 {
            for x in 0..9 {
                let a = image.plane(c).get(x, y) as i32;
                let b = decoded.plane(c).get(x, y) as i32;
                assert!(
                    (a - b).abs() <= 20,
                    "plane {} ({},{}): {} vs {}",
                    c,
                    x,
                    y,
                    a,
                    b
                );
            }
        }
    }
}

#[test]
fn test_perceptual_mode_64x64_gradient() {
    // One tile of blocks: the Y-to-B local stage runs exactly once and the
    // global value dominates.
    let image = gradient_image(64, 64);
    let params = CompressParams {
        butteraugli_distance: 3.0,
        max_butteraugli_iters: 2,
        ..CompressParams::default()
    };
    let (bytes, decoded, info) = round_trip(&params, &image);
    assert!(!bytes.is_empty());
    assert!(info.num_butteraugli_iters >= 1);
    assert_eq!(decoded.xsize(), 64);
    assert_eq!(decoded.ysize(), 64);
}

#[test]
fn test_perceptual_mode_zero_iteration_budget() {
    let image = gradient_image(16, 16);
    let params = CompressParams {
        butteraugli_distance: 1.0,
        max_butteraugli_iters: 0,
        ..CompressParams::default()
    };
    let (bytes, decoded, info) = round_trip(&params, &image);
    assert!(!bytes.is_empty());
    assert_eq!(info.num_butteraugli_iters, 0);
    assert_eq!(decoded.xsize(), 16);
}

#[test]
fn test_target_size_with_absurdly_small_target() {
    // 16x16 at this bitrate asks for ~10 bytes, which can never fit; the
    // controller must return its last candidate instead of looping.
    let image = gradient_image(16, 16);
    let params = CompressParams {
        butteraugli_distance: -1.0,
        target_bitrate: 0.3,
        max_butteraugli_iters: 1,
        ..CompressParams::default()
    };
    let mut info = PikInfo::default();
    let bytes = pixels_to_pik(&params, &MetaImage::from_color(image), &mut info).unwrap();
    assert!(bytes.len() > 16);
    let decoded: MetaImage<u8> =
        pik_to_pixels(&DecompressParams::default(), &bytes, &mut info).unwrap();
    assert_eq!(decoded.xsize(), 16);
}

#[test]
fn test_target_size_fits_reasonable_budget() {
    let image = gradient_image(32, 32);
    let baseline = {
        let mut info = PikInfo::default();
        pixels_to_pik(
            &uniform_quant_params(1.0),
            &MetaImage::from_color(image.clone()),
            &mut info,
        )
        .unwrap()
        .len()
    };
    let bitrate = (baseline as f32 * 0.7) * 8.0 / (32.0 * 32.0);
    let params = CompressParams {
        butteraugli_distance: -1.0,
        target_bitrate: bitrate,
        max_butteraugli_iters: 1,
        ..CompressParams::default()
    };
    let mut info = PikInfo::default();
    let bytes = pixels_to_pik(&params, &MetaImage::from_color(image), &mut info).unwrap();
    let target = (32.0 * 32.0 * bitrate as f64 / 8.0) as usize;
    // The container adds its fixed header on top of the payload budget.
    assert!(
        bytes.len() <= target + 12,
        "{} bytes for target {}",
        bytes.len(),
        target
    );
}

#[test]
fn test_to_linear_near_round_trip_at_unit_quant() {
    // Smooth linear-light image through FromOpsin + unit quantization and
    // back, without Y-to-B correlation. Bound: |delta| <= 0.1 per channel.
    let mut linear = Image3F::new(16, 16);
    for c in 0..3 {
        for y in 0..16 {
            for x in 0..16 {
                let v = 0.1
                    + 0.7 * (x as f32 / 15.0) * (0.3 + 0.7 * y as f32 / 15.0)
                    + 0.05 * c as f32;
                linear.plane_mut(c).set(x, y, v);
            }
        }
    }
    let opsin = opsin_dynamics_image_f(&linear);
    let mut img = CompressedImage::from_opsin(&opsin);
    img.set_ytob_dc(0);
    for ty in 0..img.tile_ysize() {
        for tx in 0..img.tile_xsize() {
            img.set_ytob_ac(tx, ty, 0);
        }
    }
    img.quantizer_mut().set_quant(1.0);
    img.quantize();
    let back = img.to_linear();
    for c in 0..3 {
        for y in 0..16 {
            for x in 0..16 {
                let a = linear.plane(c).get(x, y);
                let b = back.plane(c).get(x, y);
                assert!(
                    (a - b).abs() <= 0.1,
                    "plane {} ({},{}): {} vs {}",
                    c,
                    x,
                    y,
                    a,
                    b
                );
            }
        }
    }
}

#[test]
fn test_16bit_pipeline_round_trip() {
    let mut image = Image3::<u16>::new(24, 10);
    for c in 0..3 {
        for y in 0..10 {
            for x in 0..24 {
                image
                    .plane_mut(c)
                    .set(x, y, (x * 2000 + y * 300 + c * 1500) as u16);
            }
        }
    }
    let mut info = PikInfo::default();
    let bytes = pixels_to_pik(
        &uniform_quant_params(1.0),
        &MetaImage::from_color(image.clone()),
        &mut info,
    )
    .unwrap();
    let decoded: MetaImage<u16> =
        pik_to_pixels(&DecompressParams::default(), &bytes, &mut info).unwrap();
    let decoded = decoded.into_color();
    for c in 0..3 {
        for y in 0..10 {
            for x in 0..24 {
                let a = image.plane(c).get(x, y) as i64;
                let b = decoded.plane(c).get(x, y) as i64;
                assert!(
                    (a - b).abs() <= 2500,
                    "plane {} ({},{}): {} vs {}",
                    c,
                    x,
                    y,
                    a,
                    b
                );
            }
        }
    }
}

#[test]
fn test_deterministic_encoding() {
    let image = gradient_image(24, 24);
    let params = uniform_quant_params(1.0);
    let (bytes1, _, _) = round_trip(&params, &image);
    let (bytes2, _, _) = round_trip(&params, &image);
    assert_eq!(bytes1, bytes2);
}

#[test]
fn test_fast_mode_quality_is_reasonable() {
    let image = gradient_image(32, 32);
    let params = CompressParams {
        butteraugli_distance: -1.0,
        fast_mode: true,
        ..CompressParams::default()
    };
    let (_, decoded, _) = round_trip(&params, &image);
    let mut total_err = 0i64;
    for c in 0..3 {
        for y in 0..32 {
            for x in 0..32 {
                total_err +=
                    (image.plane(c).get(x, y) as i64 - decoded.plane(c).get(x, y) as i64).abs();
            }
        }
    }
    let mean_err = total_err as f64 / (3.0 * 32.0 * 32.0);
    assert!(mean_err < 8.0, "mean error {}", mean_err);
}

#[test]
fn test_header_dimensions_drive_reconstruction() {
    for (w, h) in [(1usize, 7usize), (8, 8), (13, 5), (31, 33)] {
        let image = gradient_image(w, h);
        let (_, decoded, info) = round_trip(&uniform_quant_params(1.0), &image);
        assert_eq!(decoded.xsize(), w);
        assert_eq!(decoded.ysize(), h);
        assert!(info.decoded_size > 12);
    }
}
