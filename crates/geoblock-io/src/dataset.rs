//! Datasets: a set of equally sized bands sharing one block cache.
//!
//! A [`Dataset`] owns the [`BlockStore`] for all of its bands, the per-band
//! properties and the dataset-level georeferencing and metadata. Bands are
//! addressed by number (1-based) and handed out as borrowed
//! [`RasterBand`] handles, so there is no band-to-dataset back pointer.
//!
//! Closing a dataset flushes every dirty block. [`Dataset::close`] reports
//! the first flush error; dropping an unclosed dataset flushes on a best
//! effort basis and logs failures.
//!
//! # Example
//!
//! ```rust
//! use std::path::Path;
//! use geoblock_core::{DataType, Window};
//! use geoblock_io::driver::{CreateParams, DriverRegistry};
//! use geoblock_io::progress::NoProgress;
//!
//! let registry = DriverRegistry::with_builtin_drivers();
//! let ds = registry
//!     .create("MEM", Path::new("demo"), &CreateParams::new(10, 10, 1, DataType::Byte))
//!     .unwrap();
//!
//! let band = ds.band(1).unwrap();
//! let values: Vec<u8> = (0..100).collect();
//! band.write_from(&Window::full(10, 10), &values).unwrap();
//!
//! let stats = band.compute_statistics(false, &NoProgress).unwrap();
//! assert_eq!((stats.min, stats.max), (0.0, 99.0));
//! ds.close().unwrap();
//! ```

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use geoblock_core::{DataType, Error, GeoTransform, Pixel, Result, Window};
use rayon::ThreadPool;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::band::{BandProps, RasterBand};
use crate::block_store::{BandLayout, BlockCodec, BlockStore, CacheStats};
use crate::config::CacheConfig;
use crate::mask;
use crate::metadata::{AREA_OR_POINT, AreaOrPoint, DEFAULT_DOMAIN, MetadataStore};
use crate::overview::{self, Overview};
use crate::progress::{NoProgress, ProgressSink, ScaledProgress};
use crate::stats::Statistics;
use crate::strided::{self, Spacing};

/// How a dataset was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Access {
    /// Pixel writes fail with `Error::ReadOnly`.
    #[default]
    ReadOnly,
    /// Reads and writes allowed.
    Update,
}

/// Byte spacing of a multi-band buffer. Zero fields mean packed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BandSpacing {
    /// Bytes between adjacent pixels of a row.
    pub pixel: usize,
    /// Bytes between the starts of adjacent rows.
    pub line: usize,
    /// Bytes between the starts of adjacent bands.
    pub band: usize,
}

impl BandSpacing {
    /// Band-sequential packed layout.
    pub const PACKED: BandSpacing = BandSpacing { pixel: 0, line: 0, band: 0 };

    /// Pixel-interleaved layout for `bands` bands of `buf_type`.
    pub fn interleaved(buf_type: DataType, bands: usize, width: usize) -> Self {
        // Saturated sizes fail the buffer checks of the transfer.
        let pixel = buf_type.size_bytes().saturating_mul(bands);
        Self { pixel, line: pixel.saturating_mul(width), band: buf_type.size_bytes() }
    }
}

#[derive(Debug, Default)]
struct DatasetInfo {
    geo_transform: Option<GeoTransform>,
    projection: String,
    metadata: MetadataStore,
    mask: Option<Arc<Dataset>>,
    overviews: Vec<(usize, Arc<Dataset>)>,
}

/// An open raster dataset.
pub struct Dataset {
    description: String,
    driver: String,
    access: Access,
    width: usize,
    height: usize,
    store: BlockStore,
    bands: Vec<RwLock<BandProps>>,
    info: RwLock<DatasetInfo>,
    closed: bool,
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("description", &self.description)
            .field("driver", &self.driver)
            .field("access", &self.access)
            .field("size", &(self.width, self.height))
            .field("bands", &self.bands.len())
            .finish()
    }
}

impl Dataset {
    /// Builds a dataset around a codec. Called by drivers.
    ///
    /// Every layout must have the same raster size and pass
    /// [`BandLayout::validate`].
    pub fn new(
        description: impl Into<String>,
        driver: impl Into<String>,
        access: Access,
        codec: Arc<dyn BlockCodec>,
        layouts: Vec<BandLayout>,
        config: CacheConfig,
    ) -> Result<Self> {
        let first = *layouts
            .first()
            .ok_or_else(|| Error::invalid_argument("dataset needs at least one band"))?;
        if first.width == 0 || first.height == 0 {
            return Err(Error::invalid_argument("dataset has an empty raster"));
        }
        for l in &layouts {
            if (l.width, l.height) != (first.width, first.height) {
                return Err(Error::invalid_argument(format!(
                    "band size {}x{} differs from {}x{}",
                    l.width, l.height, first.width, first.height
                )));
            }
            l.validate()?;
        }

        let description = description.into();
        let driver = driver.into();
        debug!(
            dataset = %description,
            driver = %driver,
            width = first.width,
            height = first.height,
            bands = layouts.len(),
            ?access,
            "dataset ready"
        );
        let bands = (0..layouts.len()).map(|_| RwLock::new(BandProps::default())).collect();
        Ok(Self {
            description,
            driver,
            access,
            width: first.width,
            height: first.height,
            store: BlockStore::new(codec, layouts, config),
            bands,
            info: RwLock::new(DatasetInfo::default()),
            closed: false,
        })
    }

    /// Path or name the dataset was opened or created with.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Short name of the driver.
    pub fn driver_name(&self) -> &str {
        &self.driver
    }

    /// Access mode.
    pub fn access(&self) -> Access {
        self.access
    }

    /// Raster width.
    pub fn x_size(&self) -> usize {
        self.width
    }

    /// Raster height.
    pub fn y_size(&self) -> usize {
        self.height
    }

    /// Number of bands.
    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// Band `number`, counting from 1.
    pub fn band(&self, number: usize) -> Result<RasterBand<'_>> {
        if number == 0 || number > self.bands.len() {
            return Err(Error::invalid_argument(format!(
                "band {number} out of range 1..={}",
                self.bands.len()
            )));
        }
        Ok(RasterBand::new(self, number - 1))
    }

    /// All bands in order.
    pub fn bands(&self) -> impl Iterator<Item = RasterBand<'_>> {
        (0..self.bands.len()).map(|i| RasterBand::new(self, i))
    }

    pub(crate) fn layouts(&self) -> &[BandLayout] {
        self.store.layouts()
    }

    pub(crate) fn band_props(&self, index: usize) -> &RwLock<BandProps> {
        &self.bands[index]
    }

    pub(crate) fn check_writable(&self) -> Result<()> {
        match self.access {
            Access::Update => Ok(()),
            Access::ReadOnly => Err(Error::ReadOnly),
        }
    }

    /// Cache settings for in-memory datasets derived from this one.
    pub(crate) fn companion_config(&self) -> CacheConfig {
        CacheConfig::default()
            .with_budget(self.store.budget())
            .with_overrun(self.store.overrun())
    }

    fn info(&self) -> RwLockReadGuard<'_, DatasetInfo> {
        self.info.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn info_mut(&self) -> RwLockWriteGuard<'_, DatasetInfo> {
        self.info.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Georeferencing and metadata
    // ------------------------------------------------------------------

    /// Affine transform, if set.
    pub fn geo_transform(&self) -> Option<GeoTransform> {
        self.info().geo_transform
    }

    /// Sets the affine transform.
    pub fn set_geo_transform(&self, gt: GeoTransform) {
        self.info_mut().geo_transform = Some(gt);
    }

    /// Inverse of the affine transform (georeferenced to pixel/line).
    pub fn inv_geo_transform(&self) -> Option<GeoTransform> {
        self.geo_transform()?.invert()
    }

    /// Spatial reference as WKT; empty when unknown.
    pub fn projection(&self) -> String {
        self.info().projection.clone()
    }

    /// Sets the spatial reference.
    pub fn set_projection(&self, wkt: impl Into<String>) {
        self.info_mut().projection = wkt.into();
    }

    /// Metadata item of `domain`.
    pub fn metadata_item(&self, key: &str, domain: &str) -> Option<String> {
        self.info().metadata.item(key, domain).map(str::to_string)
    }

    /// Sets a metadata item.
    pub fn set_metadata_item(&self, key: &str, value: &str, domain: &str) {
        self.info_mut().metadata.set_item(key, value, domain);
    }

    /// Items of `domain` as `KEY=VALUE`.
    pub fn metadata(&self, domain: &str) -> Vec<String> {
        self.info().metadata.items(domain)
    }

    /// Replaces `domain` with `KEY=VALUE` items.
    pub fn set_metadata<S: AsRef<str>>(&self, items: &[S], domain: &str) -> Result<()> {
        self.info_mut().metadata.set_items(items, domain)
    }

    /// Domains holding dataset metadata.
    pub fn metadata_domains(&self) -> Vec<String> {
        self.info().metadata.domains().into_iter().map(str::to_string).collect()
    }

    /// Pixel-is-area or pixel-is-point; `Area` unless set otherwise.
    pub fn area_or_point(&self) -> AreaOrPoint {
        self.metadata_item(AREA_OR_POINT, DEFAULT_DOMAIN)
            .and_then(|v| AreaOrPoint::from_name(&v))
            .unwrap_or_default()
    }

    /// Sets the `AREA_OR_POINT` item.
    pub fn set_area_or_point(&self, value: AreaOrPoint) {
        self.set_metadata_item(AREA_OR_POINT, value.name(), DEFAULT_DOMAIN);
    }

    // ------------------------------------------------------------------
    // Multi-band pixel access
    // ------------------------------------------------------------------

    fn resolve_bands(&self, bands: &[usize]) -> Result<Vec<usize>> {
        if bands.is_empty() {
            return Ok((0..self.bands.len()).collect());
        }
        bands.iter().map(|&n| self.band(n).map(|b| b.number() - 1)).collect()
    }

    fn band_spacing(window: &Window, buf_type: DataType, spacing: BandSpacing) -> Result<(Spacing, usize)> {
        let (pixel, line) = Spacing::new(spacing.pixel, spacing.line).resolve(buf_type, window.buf_x_size)?;
        let band = match spacing.band {
            0 => line.checked_mul(window.buf_y_size).ok_or_else(|| {
                Error::invalid_argument(format!("band of {} lines at spacing {line} overflows", window.buf_y_size))
            })?,
            band => band,
        };
        Ok((Spacing::new(pixel, line), band))
    }

    fn band_offset(i: usize, band_stride: usize) -> Result<usize> {
        i.checked_mul(band_stride)
            .ok_or_else(|| Error::invalid_argument(format!("band {i} at spacing {band_stride} overflows")))
    }

    /// Reads `window` of the listed bands (1-based; empty means all) into one
    /// buffer.
    pub fn read_window(
        &self,
        bands: &[usize],
        window: &Window,
        buf: &mut [u8],
        buf_type: DataType,
        spacing: BandSpacing,
    ) -> Result<()> {
        let indices = self.resolve_bands(bands)?;
        let (spacing, band_stride) = Self::band_spacing(window, buf_type, spacing)?;
        for (i, &index) in indices.iter().enumerate() {
            let start = Self::band_offset(i, band_stride)?;
            let sub = buf.get_mut(start..).ok_or_else(|| {
                Error::invalid_argument(format!("buffer too small for band {}", index + 1))
            })?;
            strided::read_window(&self.store, index, window, sub, buf_type, spacing)?;
        }
        Ok(())
    }

    /// Writes the listed bands of `window` from one buffer.
    pub fn write_window(
        &self,
        bands: &[usize],
        window: &Window,
        buf: &[u8],
        buf_type: DataType,
        spacing: BandSpacing,
    ) -> Result<()> {
        self.check_writable()?;
        let indices = self.resolve_bands(bands)?;
        let (spacing, band_stride) = Self::band_spacing(window, buf_type, spacing)?;
        for (i, &index) in indices.iter().enumerate() {
            let start = Self::band_offset(i, band_stride)?;
            let sub = buf.get(start..).ok_or_else(|| {
                Error::invalid_argument(format!("buffer too small for band {}", index + 1))
            })?;
            strided::write_window(&self.store, index, window, sub, buf_type, spacing)?;
        }
        Ok(())
    }

    /// Reads `window` of every band into separate vectors, one band per task
    /// on the caller's `pool`.
    pub fn read_bands_as<T: Pixel>(&self, window: &Window, pool: &ThreadPool) -> Result<Vec<Vec<T>>> {
        pool.install(|| {
            (0..self.bands.len())
                .into_par_iter()
                .map(|i| {
                    let mut buf = vec![T::zeroed(); window.buffer_pixels()];
                    RasterBand::new(self, i).read_as(window, &mut buf)?;
                    Ok(buf)
                })
                .collect()
        })
    }

    /// Computes and caches statistics for every band, one band per task on
    /// the caller's `pool`.
    pub fn compute_all_statistics(
        &self,
        approx: bool,
        pool: &ThreadPool,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<Statistics>> {
        let n = self.bands.len();
        pool.install(|| {
            (0..n)
                .into_par_iter()
                .map(|i| {
                    let scaled = ScaledProgress::step(progress, i, n);
                    RasterBand::new(self, i).compute_statistics(approx, &scaled)
                })
                .collect()
        })
    }

    /// Copies every band into `dst`, which must have the same size and band
    /// count.
    pub fn copy_whole_raster(&self, dst: &Dataset, progress: &dyn ProgressSink) -> Result<()> {
        if (self.width, self.height, self.bands.len()) != (dst.width, dst.height, dst.bands.len()) {
            return Err(Error::invalid_argument(format!(
                "cannot copy {}x{}x{} dataset into {}x{}x{}",
                self.width,
                self.height,
                self.bands.len(),
                dst.width,
                dst.height,
                dst.bands.len()
            )));
        }
        let n = self.bands.len();
        for (i, (src, dst_band)) in self.bands().zip(dst.bands()).enumerate() {
            src.copy_whole_raster(&dst_band, &ScaledProgress::step(progress, i, n))?;
        }
        debug!(from = %self.description, to = %dst.description, bands = n, "copied raster");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Masks and overviews
    // ------------------------------------------------------------------

    /// Creates an all-valid mask shared by every band, replacing any
    /// previous one. Bands then report
    /// [`MaskFlags::PER_DATASET`](crate::mask::MaskFlags::PER_DATASET).
    pub fn create_mask_band(&self) -> Result<()> {
        self.check_writable()?;
        let storage = mask::create_storage(self, &self.layouts()[0], "mask")?;
        self.info_mut().mask = Some(storage);
        debug!(dataset = %self.description, "created per-dataset mask");
        Ok(())
    }

    pub(crate) fn dataset_mask(&self) -> Option<Arc<Dataset>> {
        self.info().mask.clone()
    }

    /// Builds in-memory overviews for the given reduction factors, replacing
    /// existing ones. Factors must be at least 2; duplicates are ignored.
    /// On error the previous overviews are kept.
    pub fn build_overviews(&self, factors: &[usize], progress: &dyn ProgressSink) -> Result<()> {
        let factors = overview::normalize_factors(factors)?;
        let mut built = Vec::with_capacity(factors.len());
        for (i, &factor) in factors.iter().enumerate() {
            let scaled = ScaledProgress::step(progress, i, factors.len());
            built.push((factor, Arc::new(overview::build(self, factor, &scaled)?)));
        }
        self.info_mut().overviews = built;
        Ok(())
    }

    /// Number of overview levels.
    pub fn overview_count(&self) -> usize {
        self.info().overviews.len()
    }

    /// Drops every overview.
    pub fn clear_overviews(&self) {
        self.info_mut().overviews.clear();
    }

    /// Overview `level` (0 is the finest) of band index `band`.
    pub(crate) fn overview(&self, band: usize, level: usize) -> Option<Overview> {
        let (factor, dataset) = self.info().overviews.get(level).cloned()?;
        Some(Overview::new(dataset, band, factor))
    }

    // ------------------------------------------------------------------
    // Cache control
    // ------------------------------------------------------------------

    /// The block cache shared by all bands.
    pub fn block_store(&self) -> &BlockStore {
        &self.store
    }

    /// Writes every dirty block back.
    pub fn flush_cache(&self, progress: &dyn ProgressSink) -> Result<()> {
        self.store.flush_all(progress)
    }

    /// Changes the cache budget, evicting down to it.
    pub fn set_cache_budget(&self, bytes: usize) -> Result<()> {
        self.store.set_budget(bytes)
    }

    /// Cache budget in bytes.
    pub fn cache_budget(&self) -> usize {
        self.store.budget()
    }

    /// Bytes held by cached blocks.
    pub fn cache_used(&self) -> usize {
        self.store.used()
    }

    /// Flushes and evicts the least recently used block.
    pub fn flush_one_block(&self) -> Result<bool> {
        self.store.flush_one_block()
    }

    /// Cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.store.stats()
    }

    /// Flushes every dirty block and syncs the codec, returning the first
    /// error.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        let result = self.store.flush_all(&NoProgress).and_then(|()| self.store.sync());
        debug!(dataset = %self.description, ok = result.is_ok(), "closed dataset");
        result
    }
}

impl Drop for Dataset {
    fn drop(&mut self) {
        if self.closed || !self.store.has_dirty() {
            return;
        }
        if let Err(err) = self.store.flush_all(&NoProgress).and_then(|()| self.store.sync()) {
            warn!(dataset = %self.description, error = %err, "flush on drop failed");
        }
    }
}
