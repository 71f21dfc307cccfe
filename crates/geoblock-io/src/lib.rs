//! # geoblock-io
//!
//! Block-cached raster I/O.
//!
//! Raster bands are tiled into fixed-size blocks. Blocks are decoded on
//! demand by a format [`Driver`]'s codec, held in a bounded LRU
//! [`BlockStore`], and written back when evicted or flushed. On top of the
//! store sit windowed strided reads and writes with type conversion and
//! nearest-neighbour resampling ([`strided`]), streaming statistics and
//! histograms ([`stats`]), and the [`Dataset`] / [`RasterBand`] façade with
//! nodata-aware validity masks ([`mask`]) and in-memory overviews
//! ([`overview`]).
//!
//! # Quick Start
//!
//! ```rust
//! use std::path::Path;
//! use geoblock_core::{DataType, Window};
//! use geoblock_io::prelude::*;
//!
//! let registry = DriverRegistry::with_builtin_drivers();
//! let params = CreateParams::new(64, 64, 1, DataType::UInt16).with_block_size(16, 16);
//! let ds = registry.create("MEM", Path::new("quick"), &params).unwrap();
//!
//! let band = ds.band(1).unwrap();
//! band.fill(42.0, 0.0).unwrap();
//! let px: Vec<f32> = band.read_vec(&Window::new(10, 10, 2, 2)).unwrap();
//! assert_eq!(px, vec![42.0; 4]);
//! ```
//!
//! # Drivers
//!
//! | Name  | Storage                          | Open | Create |
//! |-------|----------------------------------|------|--------|
//! | `GBR` | flat tiled little-endian file    | yes  | yes    |
//! | `MEM` | process memory                   | no   | yes    |
//!
//! # Cache configuration
//!
//! [`CacheConfig::from_env`] reads `GEOBLOCK_CACHEMAX`,
//! `GEOBLOCK_CACHE_OVERRUN` and `GEOBLOCK_BLOCK_SIZE`; see [`config`].
//!
//! # Logging
//!
//! The crate emits [`tracing`] events: `trace` for cache hits and misses,
//! `debug` for evictions, flushes and dataset lifecycle, `warn` for budget
//! overruns and failed flushes on drop. Install any subscriber to see them.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod band;
pub mod block_store;
pub mod config;
pub mod dataset;
pub mod driver;
pub mod mask;
pub mod mem;
pub mod metadata;
pub mod overview;
pub mod progress;
pub mod raw;
pub mod stats;
pub mod strided;

pub use band::RasterBand;
pub use block_store::{BandLayout, BlockCodec, BlockHandle, BlockKey, BlockStore, CacheStats, Intent};
pub use config::{CacheConfig, OverrunPolicy};
pub use dataset::{Access, BandSpacing, Dataset};
pub use driver::{CreateParams, Driver, DriverRegistry};
pub use geoblock_core::{Error, Result};
pub use mem::MemDriver;
pub use mask::{MaskBand, MaskFlags};
pub use metadata::{AreaOrPoint, MetadataStore};
pub use overview::Overview;
pub use progress::{LogProgress, NoProgress, ProgressSink, ScaledProgress};
pub use raw::RawDriver;
pub use stats::{Histogram, HistogramParams, Statistics};
pub use strided::Spacing;

/// Prelude module for convenient imports.
///
/// ```
/// use geoblock_io::prelude::*;
/// ```
pub mod prelude {
    pub use crate::band::RasterBand;
    pub use crate::config::CacheConfig;
    pub use crate::dataset::{Access, Dataset};
    pub use crate::driver::{CreateParams, Driver, DriverRegistry};
    pub use crate::progress::{NoProgress, ProgressSink};
    pub use crate::stats::{HistogramParams, Statistics};
    pub use crate::strided::Spacing;
}
