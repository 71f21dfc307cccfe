//! # geoblock-core
//!
//! Core types for block-oriented raster I/O.
//!
//! This crate holds the pieces of the raster engine that do no I/O:
//!
//! - [`DataType`], [`Pixel`] - the closed set of sample types
//! - [`convert`] - per-type sample conversion with saturation rules
//! - [`Rect`], [`Window`], [`BlockGrid`] - pixel geometry and block tiling
//! - [`GeoTransform`] - affine pixel-to-world transform
//! - [`ColorInterp`], [`ColorTable`] - band color metadata
//! - [`Error`], [`Result`] - the error type shared by every geoblock crate
//!
//! ## Crate Structure
//!
//! ```text
//! geoblock-core (this crate)
//!    ^
//!    |
//!    +-- geoblock-io (block cache, windowed I/O, statistics, drivers)
//!    +-- geoblock-bench
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod color;
pub mod convert;
pub mod data_type;
pub mod error;
pub mod geo_transform;
pub mod rect;

pub use color::{ColorEntry, ColorInterp, ColorTable, PaletteInterp};
pub use data_type::{DataType, Pixel};
pub use error::{Error, Result};
pub use geo_transform::GeoTransform;
pub use rect::{BlockGrid, Rect, Window};

/// Re-exported so callers can name complex sample types.
pub use num_complex::Complex;

/// Prelude module for convenient imports.
///
/// ```
/// use geoblock_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::color::{ColorEntry, ColorInterp, ColorTable, PaletteInterp};
    pub use crate::data_type::{DataType, Pixel};
    pub use crate::error::{Error, Result};
    pub use crate::geo_transform::GeoTransform;
    pub use crate::rect::{BlockGrid, Rect, Window};
}
