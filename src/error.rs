//! Error types for pik-oxide

use std::fmt;

/// Result type for pik-oxide operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for pik-oxide operations
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// Zero-byte payload on decode or zero-dimension image on encode
    EmptyInput,
    /// Header extends past the end of the buffer
    TruncatedHeader,
    /// Payload extends past the end of the buffer
    TruncatedPayload {
        needed: usize,
        available: usize,
    },
    /// Reserved flag set or unrecognized stream structure
    InvalidFormat(&'static str),
    /// Width or total pixel count exceeds the decoder limits
    DimensionsTooLarge {
        xsize: u32,
        ysize: u32,
        limit: u64,
    },
    /// Entropy decoding failed or a stored value violated its bounds
    DecodeFailure(&'static str),
    /// Alpha sub-stream present but the output sink has no alpha channel
    UnsupportedAlpha,
    /// Bytes remained after decoding with exact-size checking enabled
    SizeMismatch {
        consumed: usize,
        total: usize,
    },
    /// Parameter combination selects no encoding mode
    NotImplemented,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::EmptyInput => write!(f, "Empty input"),
            Error::TruncatedHeader => write!(f, "Truncated header"),
            Error::TruncatedPayload { needed, available } => {
                write!(f, "Truncated payload: needed {} bytes, have {}", needed, available)
            }
            Error::InvalidFormat(reason) => write!(f, "Invalid format: {}", reason),
            Error::DimensionsTooLarge { xsize, ysize, limit } => {
                write!(f, "Dimensions {}x{} exceed limit {}", xsize, ysize, limit)
            }
            Error::DecodeFailure(reason) => write!(f, "Decode failed: {}", reason),
            Error::UnsupportedAlpha => write!(f, "Unable to output alpha channel"),
            Error::SizeMismatch { consumed, total } => {
                write!(f, "Compressed data size mismatch: consumed {} of {} bytes", consumed, total)
            }
            Error::NotImplemented => write!(f, "No encoding mode selected"),
        }
    }
}

impl std::error::Error for Error {}
