//! Error types for geoblock operations.
//!
//! A single [`Error`] enum is shared by the core types and the I/O engine so
//! that failures surface unchanged from a block decoder up to the caller of a
//! windowed read.
//!
//! # Categories
//!
//! - **I/O**: [`Io`](Error::Io), [`Decode`](Error::Decode), [`Encode`](Error::Encode)
//! - **Memory**: [`OutOfMemory`](Error::OutOfMemory)
//! - **Arguments**: [`InvalidArgument`](Error::InvalidArgument),
//!   [`WindowOutOfBounds`](Error::WindowOutOfBounds)
//! - **Types**: [`UnsupportedConversion`](Error::UnsupportedConversion)
//! - **Control flow**: [`Cancelled`](Error::Cancelled)
//!
//! I/O and memory errors are retryable once storage or the cache budget has
//! been fixed. Argument and type errors are programming errors.
//!
//! # Usage
//!
//! ```rust
//! use geoblock_core::{Error, Result};
//!
//! fn check_buckets(buckets: usize) -> Result<()> {
//!     if buckets == 0 {
//!         return Err(Error::invalid_argument("bucket count must be positive"));
//!     }
//!     Ok(())
//! }
//!
//! assert!(check_buckets(0).unwrap_err().is_invalid_argument());
//! ```

use thiserror::Error;

use crate::data_type::DataType;

/// Result type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by raster block I/O.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying file or stream error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A block decoder failed to produce pixels.
    #[error("decode error: {0}")]
    Decode(String),

    /// A block encoder failed to write pixels back.
    #[error("encode error: {0}")]
    Encode(String),

    /// The block cache could not make room for a new block.
    #[error("out of memory: {requested} bytes requested with cache budget {budget}")]
    OutOfMemory {
        /// Bytes needed by the new block.
        requested: usize,
        /// Cache budget at the time of the request.
        budget: usize,
    },

    /// An argument was outside its valid domain.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A pixel window does not lie inside the raster.
    #[error("window ({x}, {y}, {width}x{height}) is outside raster {raster_width}x{raster_height}")]
    WindowOutOfBounds {
        /// Window X offset.
        x: usize,
        /// Window Y offset.
        y: usize,
        /// Window width.
        width: usize,
        /// Window height.
        height: usize,
        /// Raster width.
        raster_width: usize,
        /// Raster height.
        raster_height: usize,
    },

    /// No conversion is defined between two pixel types.
    #[error("unsupported conversion from {from} to {to}")]
    UnsupportedConversion {
        /// Source type.
        from: DataType,
        /// Requested type.
        to: DataType,
    },

    /// A progress sink asked the operation to stop.
    #[error("operation cancelled")]
    Cancelled,

    /// A named resource (driver, dataset) was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Write attempted on a dataset opened read-only.
    #[error("dataset is opened read-only")]
    ReadOnly,

    /// The driver does not implement the requested capability.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Every scanned pixel was nodata.
    #[error("no valid pixels found")]
    NoValidPixels,

    /// A file header is malformed.
    #[error("format error: {0}")]
    Format(String),
}

impl Error {
    /// Creates an [`Error::InvalidArgument`] error.
    #[inline]
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Creates an [`Error::Decode`] error.
    #[inline]
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Creates an [`Error::Encode`] error.
    #[inline]
    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    /// Creates an [`Error::UnsupportedConversion`] error.
    #[inline]
    pub fn unsupported_conversion(from: DataType, to: DataType) -> Self {
        Self::UnsupportedConversion { from, to }
    }

    /// Creates an [`Error::Unsupported`] error.
    #[inline]
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Returns `true` for decode, encode and file errors.
    #[inline]
    pub fn is_io_error(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Decode(_) | Self::Encode(_))
    }

    /// Returns `true` for argument errors, including out-of-bounds windows.
    #[inline]
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_) | Self::WindowOutOfBounds { .. })
    }

    /// Returns `true` if the operation was cancelled through a progress sink.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns `true` if retrying may succeed after fixing storage or the
    /// cache budget.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        self.is_io_error() || matches!(self, Self::OutOfMemory { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_error_message() {
        let err = Error::WindowOutOfBounds {
            x: 5,
            y: 6,
            width: 10,
            height: 10,
            raster_width: 12,
            raster_height: 12,
        };
        let msg = err.to_string();
        assert!(msg.contains("(5, 6, 10x10)"));
        assert!(msg.contains("12x12"));
        assert!(err.is_invalid_argument());
        assert!(!err.is_retryable());
    }

    #[test]
    fn classification() {
        let io: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(io.is_io_error());
        assert!(io.is_retryable());

        let oom = Error::OutOfMemory { requested: 10, budget: 5 };
        assert!(oom.is_retryable());
        assert!(!oom.is_io_error());

        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::unsupported_conversion(DataType::CFloat32, DataType::Byte).is_retryable());
    }
}
