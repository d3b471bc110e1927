//! # pik-oxide - Perceptually-Tuned Lossy Image Codec
//!
//! pik-oxide compresses RGB images (8-bit, 16-bit, or linear float) into a
//! compact byte stream driven by a perceptual distance target: the encoder
//! iteratively adjusts per-block quantization until the butteraugli
//! distance to the original drops below the requested level, or until the
//! output matches a target byte budget.
//!
//! ## Key Features
//!
//! - **Perceptual rate control**: per-block quantization refined against a
//!   butteraugli distance map over multiple passes
//! - **Y-to-B decorrelation**: a per-tile luma-to-blue correlation model
//!   searched to minimize the entropy-coded size
//! - **Target-size mode**: bisection over a quantization scale to hit an
//!   exact byte budget
//! - **Fast mode**: single-pass encoding with a content-adaptive
//!   quantization field
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pik_oxide::{pixels_to_pik, pik_to_pixels, CompressParams, DecompressParams, PikInfo};
//!
//! let params = CompressParams { butteraugli_distance: 1.0, ..Default::default() };
//! let mut info = PikInfo::default();
//! let bytes = pixels_to_pik(&params, &image, &mut info)?;
//! let decoded = pik_to_pixels::<u8>(&DecompressParams::default(), &bytes, &mut info)?;
//! ```
//!
//! ## Encoding Modes
//!
//! Selected by [`CompressParams`], in order of precedence:
//! `butteraugli_distance >= 0` (perceptual), `target_bitrate > 0`
//! (target size), `uniform_quant > 0` (constant quant), `fast_mode`.

// Core representation
mod consts;
mod error;
mod image;
mod types;

// Coefficient domain
mod dct;
pub mod opsin;
mod quantizer;

// Coding layers
mod alpha;
mod compressed;
mod entropy;
mod header;

// Encoder searches
mod adaptive_quant;
mod rate_control;
mod target_size;
mod ytob;

// Pipeline
mod pik;

// Public API
pub use compressed::CompressedImage;
pub use error::Error;
pub use image::{
    Image, Image3, Image3B, Image3F, Image3U, Image3W, ImageF, MetaImage, MetaImageB, MetaImageF,
    MetaImageU,
};
pub use pik::{opsin_to_pik, pik_to_color_pixels, pik_to_pixels, pixels_to_pik, PikPixel};
pub use quantizer::Quantizer;
pub use rate_control::{ButteraugliMetric, PerceptualMetric};
pub use types::{CompressParams, DecompressParams, PikInfo};

/// Result type for pik-oxide operations
pub type Result<T> = std::result::Result<T, Error>;
