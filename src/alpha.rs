//! Lossless alpha sub-stream.
//!
//! The alpha plane rides behind the payload when the header's alpha flag
//! is set: left-predicted residuals through the shared entropy layer,
//! one context, framed with a length prefix. Supports 8 and 16 bit
//! depths; the depth is implied by the output pixel type.

use crate::entropy::{
    decode_tables, encode_stream, value_from_extra, BitReader, CoeffProcessor, TokenList,
    DC_ALPHABET,
};
use crate::error::{Error, Result};
use crate::image::Image;

#[inline]
fn prediction(plane: &Image<i32>, x: usize, y: usize) -> i32 {
    if x > 0 {
        plane.get(x - 1, y)
    } else if y > 0 {
        plane.get(0, y - 1)
    } else {
        0
    }
}

fn encode_plane(values: &Image<i32>) -> Vec<u8> {
    let proc = CoeffProcessor::new(1);
    let mut tokens = TokenList::default();
    for y in 0..values.ysize() {
        for x in 0..values.xsize() {
            let residual = values.get(x, y) - prediction(values, x, y);
            proc.process_value(residual, 0, &mut tokens);
        }
    }
    let stream = encode_stream(1, DC_ALPHABET, &tokens.tokens);
    let mut out = Vec::with_capacity(4 + stream.len());
    out.extend_from_slice(&(stream.len() as u32).to_le_bytes());
    out.extend_from_slice(&stream);
    out
}

fn decode_plane(data: &[u8], xsize: usize, ysize: usize, max: i32) -> Result<(Image<i32>, usize)> {
    if data.len() < 4 {
        return Err(Error::TruncatedPayload {
            needed: 4,
            available: data.len(),
        });
    }
    let len = u32::from_le_bytes(data[..4].try_into().unwrap()) as usize;
    if 4 + len > data.len() {
        return Err(Error::TruncatedPayload {
            needed: 4 + len,
            available: data.len(),
        });
    }
    let stream = &data[4..4 + len];
    let (decoder, table_len, _) = decode_tables(stream, DC_ALPHABET)?;
    let mut reader = BitReader::new(&stream[table_len..]);
    let mut plane = Image::new(xsize, ysize);
    for y in 0..ysize {
        for x in 0..xsize {
            let cat = decoder.read_symbol(0, &mut reader)?;
            let extra = reader.read_bits(cat)?;
            let value = prediction(&plane, x, y) + value_from_extra(cat, extra);
            if value < 0 || value > max {
                return Err(Error::DecodeFailure("alpha value out of range"));
            }
            plane.set(x, y, value);
        }
    }
    if table_len + reader.bytes_consumed() != len {
        return Err(Error::DecodeFailure("alpha stream length mismatch"));
    }
    Ok((plane, 4 + len))
}

/// Encodes an 8-bit alpha plane.
pub fn encode_alpha8(alpha: &Image<u8>) -> Vec<u8> {
    let mut values = Image::new(alpha.xsize(), alpha.ysize());
    for y in 0..alpha.ysize() {
        for x in 0..alpha.xsize() {
            values.set(x, y, alpha.get(x, y) as i32);
        }
    }
    encode_plane(&values)
}

/// Decodes an 8-bit alpha plane; returns it with the bytes consumed.
pub fn decode_alpha8(data: &[u8], xsize: usize, ysize: usize) -> Result<(Image<u8>, usize)> {
    let (values, consumed) = decode_plane(data, xsize, ysize, u8::MAX as i32)?;
    let mut alpha = Image::new(xsize, ysize);
    for y in 0..ysize {
        for x in 0..xsize {
            alpha.set(x, y, values.get(x, y) as u8);
        }
    }
    Ok((alpha, consumed))
}

/// Encodes a 16-bit alpha plane.
pub fn encode_alpha16(alpha: &Image<u16>) -> Vec<u8> {
    let mut values = Image::new(alpha.xsize(), alpha.ysize());
    for y in 0..alpha.ysize() {
        for x in 0..alpha.xsize() {
            values.set(x, y, alpha.get(x, y) as i32);
        }
    }
    encode_plane(&values)
}

/// Decodes a 16-bit alpha plane; returns it with the bytes consumed.
pub fn decode_alpha16(data: &[u8], xsize: usize, ysize: usize) -> Result<(Image<u16>, usize)> {
    let (values, consumed) = decode_plane(data, xsize, ysize, u16::MAX as i32)?;
    let mut alpha = Image::new(xsize, ysize);
    for y in 0..ysize {
        for x in 0..xsize {
            alpha.set(x, y, values.get(x, y) as u16);
        }
    }
    Ok((alpha, consumed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alpha8_round_trip() {
        let mut alpha = Image::new(13, 7);
        for y in 0..7 {
            for x in 0..13 {
                alpha.set(x, y, ((x * 40 + y * 3) % 256) as u8);
            }
        }
        let bytes = encode_alpha8(&alpha);
        let (decoded, consumed) = decode_alpha8(&bytes, 13, 7).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, alpha);
    }

    #[test]
    fn test_alpha16_round_trip() {
        let mut alpha = Image::new(5, 5);
        for y in 0..5 {
            for x in 0..5 {
                alpha.set(x, y, (x * 13000 + y * 111) as u16);
            }
        }
        let bytes = encode_alpha16(&alpha);
        let (decoded, consumed) = decode_alpha16(&bytes, 5, 5).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, alpha);
    }

    #[test]
    fn test_constant_alpha_is_tiny() {
        let alpha = Image::filled(64, 64, 255u8);
        let bytes = encode_alpha8(&alpha);
        // One residual of 255 and 4095 zeros: far below a byte per pixel.
        assert!(bytes.len() < 600, "constant alpha took {} bytes", bytes.len());
    }

    #[test]
    fn test_truncated_alpha_rejected() {
        let alpha = Image::filled(8, 8, 128u8);
        let bytes = encode_alpha8(&alpha);
        assert!(decode_alpha8(&bytes[..bytes.len() - 1], 8, 8).is_err());
    }
}
