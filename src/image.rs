//! Planar image buffers.
//!
//! The codec works on three-plane images throughout: sRGB input, the opsin
//! perceptual space, and the 16-bit coefficient layout all use [`Image3`].
//! Single-plane fields (quantization maps, distance maps, alpha) use
//! [`Image`].

use imgref::{ImgRef, ImgVec};
use rgb::{RGB16, RGB8};

/// Single-plane rectangular image, row-major, stride == width.
#[derive(Debug, Clone, PartialEq)]
pub struct Image<T> {
    data: Vec<T>,
    xsize: usize,
    ysize: usize,
}

impl<T: Copy + Default> Image<T> {
    /// Creates a zero-initialized image.
    pub fn new(xsize: usize, ysize: usize) -> Self {
        Self {
            data: vec![T::default(); xsize * ysize],
            xsize,
            ysize,
        }
    }

    /// Creates an image filled with `value`.
    pub fn filled(xsize: usize, ysize: usize, value: T) -> Self {
        Self {
            data: vec![value; xsize * ysize],
            xsize,
            ysize,
        }
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
    pub fn row(&self, y: usize) -> &[T] {
        &self.data[y * self.xsize..(y + 1) * self.xsize]
    }

    #[inline]
    pub fn row_mut(&mut self, y: usize) -> &mut [T] {
        &mut self.data[y * self.xsize..(y + 1) * self.xsize]
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> T {
        self.data[y * self.xsize + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: T) {
        self.data[y * self.xsize + x] = value;
    }

    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }
}

/// Multiplies every sample of a float image by `factor`.
pub fn scale_image(factor: f32, image: &Image<f32>) -> Image<f32> {
    let mut out = image.clone();
    for y in 0..out.ysize() {
        for v in out.row_mut(y) {
            *v *= factor;
        }
    }
    out
}

/// Three-plane image. Planes share dimensions; their meaning (RGB, opsin
/// channels, coefficients) depends on context.
#[derive(Debug, Clone, PartialEq)]
pub struct Image3<T> {
    planes: [Image<T>; 3],
}

/// 8-bit sRGB image.
pub type Image3B = Image3<u8>;
/// 16-bit sRGB image.
pub type Image3U = Image3<u16>;
/// Float image: linear RGB or opsin.
pub type Image3F = Image3<f32>;
/// Quantized DCT coefficients, 16-bit signed.
pub type Image3W = Image3<i16>;
/// Single-plane float image.
pub type ImageF = Image<f32>;

impl<T: Copy + Default> Image3<T> {
    pub fn new(xsize: usize, ysize: usize) -> Self {
        Self {
            planes: [
                Image::new(xsize, ysize),
                Image::new(xsize, ysize),
                Image::new(xsize, ysize),
            ],
        }
    }

    #[inline]
    pub fn xsize(&self) -> usize {
        self.planes[0].xsize()
    }

    #[inline]
    pub fn ysize(&self) -> usize {
        self.planes[0].ysize()
    }

    #[inline]
    pub fn plane(&self, c: usize) -> &Image<T> {
        &self.planes[c]
    }

    #[inline]
    pub fn plane_mut(&mut self, c: usize) -> &mut Image<T> {
        &mut self.planes[c]
    }

    #[inline]
    pub fn row(&self, c: usize, y: usize) -> &[T] {
        self.planes[c].row(y)
    }

    #[inline]
    pub fn row_mut(&mut self, c: usize, y: usize) -> &mut [T] {
        self.planes[c].row_mut(y)
    }
}

impl Image3<u8> {
    /// Deinterleaves a borrowed RGB view into planes.
    pub fn from_rgb8(img: ImgRef<'_, RGB8>) -> Self {
        let mut out = Self::new(img.width(), img.height());
        for (y, row) in img.rows().enumerate() {
            for (x, px) in row.iter().enumerate() {
                out.planes[0].set(x, y, px.r);
                out.planes[1].set(x, y, px.g);
                out.planes[2].set(x, y, px.b);
            }
        }
        out
    }

    /// Interleaves the planes into an owned RGB buffer.
    pub fn to_rgb8(&self) -> ImgVec<RGB8> {
        let mut buf = Vec::with_capacity(self.xsize() * self.ysize());
        for y in 0..self.ysize() {
            for x in 0..self.xsize() {
                buf.push(RGB8 {
                    r: self.planes[0].get(x, y),
                    g: self.planes[1].get(x, y),
                    b: self.planes[2].get(x, y),
                });
            }
        }
        ImgVec::new(buf, self.xsize(), self.ysize())
    }

    /// Interleaved bytes in row-major RGB order.
    pub fn to_interleaved(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.xsize() * self.ysize() * 3);
        for y in 0..self.ysize() {
            for x in 0..self.xsize() {
                buf.push(self.planes[0].get(x, y));
                buf.push(self.planes[1].get(x, y));
                buf.push(self.planes[2].get(x, y));
            }
        }
        buf
    }
}

impl Image3<u16> {
    /// Deinterleaves a borrowed 16-bit RGB view into planes.
    pub fn from_rgb16(img: ImgRef<'_, RGB16>) -> Self {
        let mut out = Self::new(img.width(), img.height());
        for (y, row) in img.rows().enumerate() {
            for (x, px) in row.iter().enumerate() {
                out.planes[0].set(x, y, px.r);
                out.planes[1].set(x, y, px.g);
                out.planes[2].set(x, y, px.b);
            }
        }
        out
    }

    /// Interleaves the planes into an owned 16-bit RGB buffer.
    pub fn to_rgb16(&self) -> ImgVec<RGB16> {
        let mut buf = Vec::with_capacity(self.xsize() * self.ysize());
        for y in 0..self.ysize() {
            for x in 0..self.xsize() {
                buf.push(RGB16 {
                    r: self.planes[0].get(x, y),
                    g: self.planes[1].get(x, y),
                    b: self.planes[2].get(x, y),
                });
            }
        }
        ImgVec::new(buf, self.xsize(), self.ysize())
    }
}

/// Color image with an optional alpha plane. The only carrier of alpha
/// through the codec; bare [`Image3`] never has one.
#[derive(Debug, Clone)]
pub struct MetaImage<T> {
    color: Image3<T>,
    alpha: Option<Image<T>>,
}

/// 8-bit meta image.
pub type MetaImageB = MetaImage<u8>;
/// 16-bit meta image.
pub type MetaImageU = MetaImage<u16>;
/// Linear-float meta image.
pub type MetaImageF = MetaImage<f32>;

impl<T: Copy + Default> MetaImage<T> {
    pub fn from_color(color: Image3<T>) -> Self {
        Self { color, alpha: None }
    }

    #[inline]
    pub fn xsize(&self) -> usize {
        self.color.xsize()
    }

    #[inline]
    pub fn ysize(&self) -> usize {
        self.color.ysize()
    }

    pub fn color(&self) -> &Image3<T> {
        &self.color
    }

    pub fn into_color(self) -> Image3<T> {
        self.color
    }

    pub fn has_alpha(&self) -> bool {
        self.alpha.is_some()
    }

    pub fn alpha(&self) -> Option<&Image<T>> {
        self.alpha.as_ref()
    }

    /// Attaches an alpha plane. Must match the color dimensions.
    pub fn set_alpha(&mut self, alpha: Image<T>) {
        assert_eq!(alpha.xsize(), self.xsize());
        assert_eq!(alpha.ysize(), self.ysize());
        self.alpha = Some(alpha);
    }
}
