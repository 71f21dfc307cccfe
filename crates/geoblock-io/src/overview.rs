//! Reduced-resolution overviews.
//!
//! An overview of factor `f` is an in-memory copy of the whole dataset at
//! `ceil(width / f)` x `ceil(height / f)`, sampled with the same
//! nearest-neighbour rule as resampled window reads. Every level is built
//! from full resolution, so levels do not compound rounding.
//!
//! ```rust
//! use std::path::Path;
//! use geoblock_core::{DataType, Window};
//! use geoblock_io::prelude::*;
//!
//! let registry = DriverRegistry::with_builtin_drivers();
//! let ds = registry
//!     .create("MEM", Path::new("pyramid"), &CreateParams::new(100, 60, 1, DataType::Byte))
//!     .unwrap();
//! ds.build_overviews(&[2, 4], &NoProgress).unwrap();
//!
//! let band = ds.band(1).unwrap();
//! assert_eq!(band.overview_count(), 2);
//! let level = band.overview(1).unwrap();
//! assert_eq!(level.factor(), 4);
//! assert_eq!((level.band().x_size(), level.band().y_size()), (25, 15));
//! ```

use std::sync::Arc;

use geoblock_core::{Error, Result, Window};
use tracing::debug;

use crate::band::RasterBand;
use crate::block_store::BandLayout;
use crate::dataset::Dataset;
use crate::mem;
use crate::progress::{ProgressSink, ScaledProgress};
use crate::strided::{Spacing, nearest_index};

/// One overview level of one band.
#[derive(Debug, Clone)]
pub struct Overview {
    dataset: Arc<Dataset>,
    index: usize,
    factor: usize,
}

impl Overview {
    pub(crate) fn new(dataset: Arc<Dataset>, index: usize, factor: usize) -> Self {
        Self { dataset, index, factor }
    }

    /// Reduction factor relative to full resolution.
    pub fn factor(&self) -> usize {
        self.factor
    }

    /// The in-memory dataset holding this level for every band.
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// The reduced band.
    pub fn band(&self) -> RasterBand<'_> {
        RasterBand::new(&self.dataset, self.index)
    }
}

/// Checks, sorts and deduplicates overview factors.
pub(crate) fn normalize_factors(factors: &[usize]) -> Result<Vec<usize>> {
    if let Some(bad) = factors.iter().find(|&&f| f < 2) {
        return Err(Error::invalid_argument(format!("overview factor {bad} must be at least 2")));
    }
    let mut sorted = factors.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    Ok(sorted)
}

/// Builds the level of `factor` for every band of `src`.
pub(crate) fn build(src: &Dataset, factor: usize, progress: &dyn ProgressSink) -> Result<Dataset> {
    let (width, height) = (src.x_size(), src.y_size());
    let (ow, oh) = (width.div_ceil(factor), height.div_ceil(factor));
    let layouts = src
        .layouts()
        .iter()
        .map(|l| BandLayout::new(l.data_type, ow, oh, l.block_width.min(ow), l.block_height.min(oh)))
        .collect();
    let level = mem::companion(
        format!("{}:overview{factor}", src.description()),
        layouts,
        src.companion_config(),
    )?;

    let n = src.band_count();
    for (i, (band, target)) in src.bands().zip(level.bands()).enumerate() {
        if let Some(nodata) = band.nodata() {
            target.set_nodata(nodata);
        }
        let step = ScaledProgress::step(progress, i, n);
        let dt = band.data_type();
        let mut row = vec![0u8; ow * dt.size_bytes()];
        for oy in 0..oh {
            let sy = nearest_index(0, height, oh, oy);
            let window = Window::new(0, sy, width, 1).with_buffer_size(ow, 1);
            band.read_window(&window, &mut row, dt, Spacing::PACKED)?;
            target.write_window(&Window::new(0, oy, ow, 1), &row, dt, Spacing::PACKED)?;
            if !step.report((oy + 1) as f64 / oh as f64, "building overviews") {
                return Err(Error::Cancelled);
            }
        }
    }
    debug!(dataset = %src.description(), factor, width = ow, height = oh, "built overview");
    Ok(level)
}
