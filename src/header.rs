//! Container header framing.
//!
//! Layout: `xsize: u32 | ysize: u32 | flags: u32`, little endian, followed
//! by the payload and the optional alpha sub-stream.

use crate::error::{Error, Result};

/// Alpha sub-stream follows the payload.
pub const FLAG_ALPHA: u32 = 1;
/// Reserved legacy format code; never emitted, rejected on decode.
pub const FLAG_WEBP_LOSSLESS: u32 = 2;

/// Widest decodable image.
pub const MAX_WIDTH: u32 = (1 << 25) - 1;

pub const HEADER_SIZE: usize = 12;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Header {
    pub xsize: u32,
    pub ysize: u32,
    pub flags: u32,
}

impl Header {
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.xsize.to_le_bytes());
        out.extend_from_slice(&self.ysize.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
    }

    /// Parses the header and returns it with the bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < HEADER_SIZE {
            return Err(Error::TruncatedHeader);
        }
        let xsize = u32::from_le_bytes(data[0..4].try_into().unwrap());
        let ysize = u32::from_le_bytes(data[4..8].try_into().unwrap());
        let flags = u32::from_le_bytes(data[8..12].try_into().unwrap());
        Ok((
            Self {
                xsize,
                ysize,
                flags,
            },
            HEADER_SIZE,
        ))
    }
}
