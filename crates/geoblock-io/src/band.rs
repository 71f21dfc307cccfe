//! Per-band façade.
//!
//! A [`RasterBand`] is a cheap `(dataset, index)` handle. Pixel access goes
//! to [`crate::strided`] and the dataset's [`BlockStore`]; statistics go to
//! [`crate::stats`]. The band's own state (nodata, scale/offset, color
//! interpretation, metadata) lives in the dataset behind a lock, so handles
//! can be copied freely and used from several threads.
//!
//! Bands are numbered from 1, as in file formats and tooling.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLockReadGuard, RwLockWriteGuard};

use geoblock_core::convert::{can_convert, write_sample};
use geoblock_core::{ColorInterp, ColorTable, Complex, DataType, Error, Pixel, Result, Window};
use tracing::debug;

use crate::block_store::{BandLayout, BlockKey, BlockStore, Intent};
use crate::dataset::Dataset;
use crate::mask::{self, MaskBand, MaskFlags};
use crate::metadata::{DEFAULT_DOMAIN, MetadataStore};
use crate::overview::Overview;
use crate::progress::ProgressSink;
use crate::stats::{self, Histogram, HistogramParams, Statistics};
use crate::strided::{self, Spacing};

const STATISTICS_MINIMUM: &str = "STATISTICS_MINIMUM";
const STATISTICS_MAXIMUM: &str = "STATISTICS_MAXIMUM";
const STATISTICS_MEAN: &str = "STATISTICS_MEAN";
const STATISTICS_STDDEV: &str = "STATISTICS_STDDEV";
const STATISTICS_VALID_COUNT: &str = "STATISTICS_VALID_COUNT";
const STATISTICS_APPROXIMATE: &str = "STATISTICS_APPROXIMATE";

/// Mutable per-band state owned by the dataset.
#[derive(Debug, Clone, Default)]
pub(crate) struct BandProps {
    pub nodata: Option<f64>,
    pub scale: Option<f64>,
    pub offset: Option<f64>,
    pub color_interp: ColorInterp,
    pub color_table: Option<ColorTable>,
    pub unit_type: String,
    pub category_names: Vec<String>,
    pub description: String,
    pub metadata: MetadataStore,
    pub default_histogram: Option<Histogram>,
    pub mask: Option<Arc<Dataset>>,
}

/// Handle to one band of a [`Dataset`].
#[derive(Clone, Copy)]
pub struct RasterBand<'a> {
    dataset: &'a Dataset,
    index: usize,
}

impl fmt::Debug for RasterBand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterBand")
            .field("dataset", &self.dataset.description())
            .field("number", &self.number())
            .field("data_type", &self.data_type())
            .finish()
    }
}

impl<'a> RasterBand<'a> {
    pub(crate) fn new(dataset: &'a Dataset, index: usize) -> Self {
        Self { dataset, index }
    }

    /// Owning dataset.
    pub fn dataset(&self) -> &'a Dataset {
        self.dataset
    }

    /// Band number, starting at 1.
    pub fn number(&self) -> usize {
        self.index + 1
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn store(&self) -> &'a BlockStore {
        self.dataset.block_store()
    }

    fn layout(&self) -> &'a BandLayout {
        // Band indices are checked when the handle is created.
        &self.dataset.layouts()[self.index]
    }

    fn props(&self) -> RwLockReadGuard<'a, BandProps> {
        self.dataset.band_props(self.index).read().unwrap_or_else(PoisonError::into_inner)
    }

    fn props_mut(&self) -> RwLockWriteGuard<'a, BandProps> {
        self.dataset.band_props(self.index).write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Native sample type.
    pub fn data_type(&self) -> DataType {
        self.layout().data_type
    }

    /// Raster width.
    pub fn x_size(&self) -> usize {
        self.layout().width
    }

    /// Raster height.
    pub fn y_size(&self) -> usize {
        self.layout().height
    }

    /// Block width and height.
    pub fn block_size(&self) -> (usize, usize) {
        (self.layout().block_width, self.layout().block_height)
    }

    /// Number of blocks per row and per column.
    pub fn block_count(&self) -> (usize, usize) {
        let grid = self.layout().grid();
        (grid.blocks_x(), grid.blocks_y())
    }

    // ------------------------------------------------------------------
    // Pixel access
    // ------------------------------------------------------------------

    /// Reads `window` into `buf` as samples of `buf_type`.
    pub fn read_window(&self, window: &Window, buf: &mut [u8], buf_type: DataType, spacing: Spacing) -> Result<()> {
        strided::read_window(self.store(), self.index, window, buf, buf_type, spacing)
    }

    /// Writes `buf`, holding samples of `buf_type`, into `window`.
    pub fn write_window(&self, window: &Window, buf: &[u8], buf_type: DataType, spacing: Spacing) -> Result<()> {
        self.dataset.check_writable()?;
        strided::write_window(self.store(), self.index, window, buf, buf_type, spacing)
    }

    /// Reads `window` into a packed typed buffer.
    pub fn read_as<T: Pixel>(&self, window: &Window, buf: &mut [T]) -> Result<()> {
        self.read_window(window, bytemuck::cast_slice_mut(buf), T::DATA_TYPE, Spacing::PACKED)
    }

    /// Reads `window` into a new packed vector.
    pub fn read_vec<T: Pixel>(&self, window: &Window) -> Result<Vec<T>> {
        let mut buf = vec![T::zeroed(); window.buffer_pixels()];
        self.read_as(window, &mut buf)?;
        Ok(buf)
    }

    /// Writes a packed typed buffer into `window`.
    pub fn write_from<T: Pixel>(&self, window: &Window, buf: &[T]) -> Result<()> {
        self.write_window(window, bytemuck::cast_slice(buf), T::DATA_TYPE, Spacing::PACKED)
    }

    /// Copies the native contents of block `(bx, by)`, padding included.
    pub fn read_block(&self, bx: usize, by: usize, buf: &mut [u8]) -> Result<()> {
        let size = self.layout().block_bytes();
        if buf.len() < size {
            return Err(Error::invalid_argument(format!(
                "block buffer of {} bytes, {size} needed",
                buf.len()
            )));
        }
        let handle = self.store().fetch(BlockKey::new(self.index, bx, by), Intent::Read)?;
        buf[..size].copy_from_slice(&handle.data());
        Ok(())
    }

    /// Replaces block `(bx, by)` with native samples.
    pub fn write_block(&self, bx: usize, by: usize, buf: &[u8]) -> Result<()> {
        self.dataset.check_writable()?;
        let size = self.layout().block_bytes();
        if buf.len() < size {
            return Err(Error::invalid_argument(format!(
                "block buffer of {} bytes, {size} needed",
                buf.len()
            )));
        }
        let handle = self.store().fetch(BlockKey::new(self.index, bx, by), Intent::Write)?;
        handle.data_mut()?.copy_from_slice(&buf[..size]);
        handle.mark_dirty()?;
        Ok(())
    }

    /// Sets every pixel to `real + imag·i`; real bands ignore `imag`.
    pub fn fill(&self, real: f64, imag: f64) -> Result<()> {
        self.dataset.check_writable()?;
        let dt = self.data_type();
        let mut sample = vec![0u8; dt.size_bytes()];
        write_sample(dt, Complex::new(real, imag), &mut sample);

        let grid = self.layout().grid();
        for by in 0..grid.blocks_y() {
            for bx in 0..grid.blocks_x() {
                let handle = self.store().fetch(BlockKey::new(self.index, bx, by), Intent::Write)?;
                for chunk in handle.data_mut()?.chunks_exact_mut(sample.len()) {
                    chunk.copy_from_slice(&sample);
                }
                handle.mark_dirty()?;
            }
        }
        debug!(band = self.number(), real, imag, "filled band");
        Ok(())
    }

    /// Writes this band's dirty blocks back.
    pub fn flush_cache(&self, progress: &dyn ProgressSink) -> Result<()> {
        self.store().flush(Some(self.index), progress)
    }

    /// Copies every pixel into `dst`, converting to its type.
    ///
    /// Blocks are copied one at a time in row-major order with progress
    /// reported after each.
    pub fn copy_whole_raster(&self, dst: &RasterBand<'_>, progress: &dyn ProgressSink) -> Result<()> {
        if (self.x_size(), self.y_size()) != (dst.x_size(), dst.y_size()) {
            return Err(Error::invalid_argument(format!(
                "cannot copy {}x{} band into {}x{} band",
                self.x_size(),
                self.y_size(),
                dst.x_size(),
                dst.y_size()
            )));
        }
        dst.dataset.check_writable()?;
        let src_type = self.data_type();
        if !can_convert(src_type, dst.data_type()) {
            return Err(Error::unsupported_conversion(src_type, dst.data_type()));
        }

        let grid = self.layout().grid();
        let total = grid.block_count();
        let mut buf = Vec::new();
        if !progress.report(0.0, "copying raster") {
            return Err(Error::Cancelled);
        }
        for index in 0..total {
            let (bx, by) = grid.block_at(index);
            let rect = grid.block_rect(bx, by);
            let window = Window::new(rect.x, rect.y, rect.width, rect.height);
            buf.resize(rect.area() * src_type.size_bytes(), 0);
            self.read_window(&window, &mut buf, src_type, Spacing::PACKED)?;
            dst.write_window(&window, &buf, src_type, Spacing::PACKED)?;
            if !progress.report((index + 1) as f64 / total as f64, "copying raster") {
                return Err(Error::Cancelled);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Band properties
    // ------------------------------------------------------------------

    /// Nodata value, if set.
    pub fn nodata(&self) -> Option<f64> {
        self.props().nodata
    }

    /// Sets the nodata value.
    pub fn set_nodata(&self, value: f64) {
        self.props_mut().nodata = Some(value);
    }

    /// Clears the nodata value.
    pub fn delete_nodata(&self) {
        self.props_mut().nodata = None;
    }

    /// Scale applied to raw values (`value * scale + offset`), if set.
    pub fn scale(&self) -> Option<f64> {
        self.props().scale
    }

    /// Sets the scale.
    pub fn set_scale(&self, scale: f64) {
        self.props_mut().scale = Some(scale);
    }

    /// Offset applied to raw values, if set.
    pub fn offset(&self) -> Option<f64> {
        self.props().offset
    }

    /// Sets the offset.
    pub fn set_offset(&self, offset: f64) {
        self.props_mut().offset = Some(offset);
    }

    /// Color interpretation.
    pub fn color_interp(&self) -> ColorInterp {
        self.props().color_interp
    }

    /// Sets the color interpretation.
    pub fn set_color_interp(&self, interp: ColorInterp) {
        self.props_mut().color_interp = interp;
    }

    /// Palette, if any.
    pub fn color_table(&self) -> Option<ColorTable> {
        self.props().color_table.clone()
    }

    /// Sets or clears the palette. Setting one makes the band palette-indexed.
    pub fn set_color_table(&self, table: Option<ColorTable>) {
        let mut props = self.props_mut();
        if table.is_some() {
            props.color_interp = ColorInterp::PaletteIndex;
        }
        props.color_table = table;
    }

    /// Unit of pixel values, e.g. `"m"`.
    pub fn unit_type(&self) -> String {
        self.props().unit_type.clone()
    }

    /// Sets the unit of pixel values.
    pub fn set_unit_type(&self, unit: impl Into<String>) {
        self.props_mut().unit_type = unit.into();
    }

    /// Names of classes for classified rasters, indexed by pixel value.
    pub fn category_names(&self) -> Vec<String> {
        self.props().category_names.clone()
    }

    /// Sets the class names.
    pub fn set_category_names(&self, names: Vec<String>) {
        self.props_mut().category_names = names;
    }

    /// Free-form description.
    pub fn description(&self) -> String {
        self.props().description.clone()
    }

    /// Sets the description.
    pub fn set_description(&self, description: impl Into<String>) {
        self.props_mut().description = description.into();
    }

    /// Metadata item of `domain`.
    pub fn metadata_item(&self, key: &str, domain: &str) -> Option<String> {
        self.props().metadata.item(key, domain).map(str::to_string)
    }

    /// Sets a metadata item.
    pub fn set_metadata_item(&self, key: &str, value: &str, domain: &str) {
        self.props_mut().metadata.set_item(key, value, domain);
    }

    /// Items of `domain` as `KEY=VALUE`.
    pub fn metadata(&self, domain: &str) -> Vec<String> {
        self.props().metadata.items(domain)
    }

    /// Replaces `domain` with `KEY=VALUE` items.
    pub fn set_metadata<S: AsRef<str>>(&self, items: &[S], domain: &str) -> Result<()> {
        self.props_mut().metadata.set_items(items, domain)
    }

    // ------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------

    /// Computes statistics, exact or over the default sample, and caches
    /// them as band metadata. Sampled results are tagged
    /// `STATISTICS_APPROXIMATE=YES`.
    pub fn compute_statistics(&self, approx: bool, progress: &dyn ProgressSink) -> Result<Statistics> {
        let stats = if approx {
            stats::compute_approx(self, stats::DEFAULT_SAMPLE_FRACTION, progress)?
        } else {
            stats::compute_exact(self, progress)?
        };
        self.store_statistics(&stats, approx);
        Ok(stats)
    }

    /// Cached statistics, computed first when `force` is set.
    ///
    /// A cached approximation only satisfies callers passing `approx_ok`.
    /// Returns `Ok(None)` when nothing usable is cached and `force` is off.
    pub fn statistics(&self, approx_ok: bool, force: bool, progress: &dyn ProgressSink) -> Result<Option<Statistics>> {
        match self.cached_statistics() {
            Some((cached, approximate)) if approx_ok || !approximate => return Ok(Some(cached)),
            _ => {}
        }
        if !force {
            return Ok(None);
        }
        self.compute_statistics(approx_ok, progress).map(Some)
    }

    /// Stores statistics as band metadata, marked exact.
    pub fn set_statistics(&self, stats: &Statistics) {
        self.store_statistics(stats, false);
    }

    fn store_statistics(&self, stats: &Statistics, approximate: bool) {
        let mut props = self.props_mut();
        let md = &mut props.metadata;
        md.set_item(STATISTICS_MINIMUM, stats.min.to_string(), DEFAULT_DOMAIN);
        md.set_item(STATISTICS_MAXIMUM, stats.max.to_string(), DEFAULT_DOMAIN);
        md.set_item(STATISTICS_MEAN, stats.mean.to_string(), DEFAULT_DOMAIN);
        md.set_item(STATISTICS_STDDEV, stats.std_dev.to_string(), DEFAULT_DOMAIN);
        md.set_item(STATISTICS_VALID_COUNT, stats.valid_count.to_string(), DEFAULT_DOMAIN);
        if approximate {
            md.set_item(STATISTICS_APPROXIMATE, "YES", DEFAULT_DOMAIN);
        } else {
            md.remove_item(STATISTICS_APPROXIMATE, DEFAULT_DOMAIN);
        }
    }

    /// Cached statistics and whether they were sampled.
    fn cached_statistics(&self) -> Option<(Statistics, bool)> {
        let props = self.props();
        let md = &props.metadata;
        let get = |key: &str| md.item(key, DEFAULT_DOMAIN)?.parse::<f64>().ok();
        let stats = Statistics {
            min: get(STATISTICS_MINIMUM)?,
            max: get(STATISTICS_MAXIMUM)?,
            mean: get(STATISTICS_MEAN)?,
            std_dev: get(STATISTICS_STDDEV)?,
            valid_count: md
                .item(STATISTICS_VALID_COUNT, DEFAULT_DOMAIN)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        };
        let approximate = md
            .item(STATISTICS_APPROXIMATE, DEFAULT_DOMAIN)
            .is_some_and(|v| v.eq_ignore_ascii_case("YES"));
        Some((stats, approximate))
    }

    /// Minimum from cached statistics, flagged `true`. Without statistics,
    /// the lower bound of the data type, flagged `false`.
    pub fn minimum(&self) -> (f64, bool) {
        match self.cached_statistics() {
            Some((stats, _)) => (stats.min, true),
            None => (type_range(self.data_type()).0, false),
        }
    }

    /// Maximum from cached statistics, flagged `true`. Without statistics,
    /// the upper bound of the data type, flagged `false`.
    pub fn maximum(&self) -> (f64, bool) {
        match self.cached_statistics() {
            Some((stats, _)) => (stats.max, true),
            None => (type_range(self.data_type()).1, false),
        }
    }

    /// Smallest and largest valid values.
    pub fn compute_min_max(&self, approx: bool, progress: &dyn ProgressSink) -> Result<(f64, f64)> {
        stats::compute_min_max(self, approx, progress)
    }

    /// Bucket counts over `[params.min, params.max)`.
    pub fn histogram(&self, params: &HistogramParams, progress: &dyn ProgressSink) -> Result<Histogram> {
        stats::histogram(self, params, progress)
    }

    /// The band's default histogram, computed first when `force` is set.
    ///
    /// Byte bands use 256 buckets over `[-0.5, 255.5]`. Other types use 256
    /// buckets over the approximate min/max, widened by half a bucket.
    pub fn default_histogram(&self, force: bool, progress: &dyn ProgressSink) -> Result<Option<Histogram>> {
        if let Some(hist) = self.props().default_histogram.clone() {
            return Ok(Some(hist));
        }
        if !force {
            return Ok(None);
        }
        const BUCKETS: usize = 256;
        let (min, max) = if self.data_type() == DataType::Byte {
            (-0.5, 255.5)
        } else {
            let (lo, hi) = self.compute_min_max(true, progress)?;
            if hi > lo {
                let half = (hi - lo) / (2.0 * (BUCKETS - 1) as f64);
                (lo - half, hi + half)
            } else {
                (lo - 0.5, hi + 0.5)
            }
        };
        let params = HistogramParams::new(min, max, BUCKETS)
            .include_out_of_range(true)
            .approx_ok(true);
        let hist = self.histogram(&params, progress)?;
        self.set_default_histogram(hist.clone());
        Ok(Some(hist))
    }

    /// Replaces the default histogram.
    pub fn set_default_histogram(&self, hist: Histogram) {
        self.props_mut().default_histogram = Some(hist);
    }

    // ------------------------------------------------------------------
    // Masks and overviews
    // ------------------------------------------------------------------

    /// The band's validity mask: an explicit per-band mask, else the
    /// dataset's mask, else one derived from nodata, else all valid.
    pub fn mask_band(&self) -> MaskBand<'a> {
        let own = self.props().mask.clone();
        if let Some(storage) = own {
            return MaskBand::stored(*self, storage, MaskFlags::empty());
        }
        if let Some(storage) = self.dataset.dataset_mask() {
            return MaskBand::stored(*self, storage, MaskFlags::PER_DATASET);
        }
        match self.nodata() {
            Some(nodata) => MaskBand::nodata(*self, nodata),
            None => MaskBand::all_valid(*self),
        }
    }

    /// How [`mask_band`](Self::mask_band) is produced.
    pub fn mask_flags(&self) -> MaskFlags {
        self.mask_band().flags()
    }

    /// Creates an all-valid explicit mask. `MaskFlags::PER_DATASET` creates
    /// the dataset-wide mask instead; any other flag is rejected.
    pub fn create_mask_band(&self, flags: MaskFlags) -> Result<()> {
        if flags == MaskFlags::PER_DATASET {
            return self.dataset.create_mask_band();
        }
        if !flags.is_empty() {
            return Err(Error::invalid_argument(format!(
                "mask flags {flags:?} cannot be created"
            )));
        }
        self.dataset.check_writable()?;
        let storage = mask::create_storage(self.dataset, self.layout(), &format!("mask{}", self.number()))?;
        self.props_mut().mask = Some(storage);
        debug!(band = self.number(), "created band mask");
        Ok(())
    }

    /// Number of overview levels.
    pub fn overview_count(&self) -> usize {
        self.dataset.overview_count()
    }

    /// Overview `level`, 0 being the finest.
    pub fn overview(&self, level: usize) -> Option<Overview> {
        self.dataset.overview(self.index, level)
    }
}

/// Representable range of one sample component.
fn type_range(dt: DataType) -> (f64, f64) {
    match dt.component() {
        DataType::Byte => (0.0, u8::MAX as f64),
        DataType::UInt16 => (0.0, u16::MAX as f64),
        DataType::Int16 => (i16::MIN as f64, i16::MAX as f64),
        DataType::UInt32 => (0.0, u32::MAX as f64),
        DataType::Int32 => (i32::MIN as f64, i32::MAX as f64),
        DataType::Float32 => (f32::MIN as f64, f32::MAX as f64),
        _ => (f64::MIN, f64::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{CreateParams, Driver};
    use crate::mem::MemDriver;
    use crate::config::CacheConfig;
    use crate::progress::NoProgress;
    use approx::assert_relative_eq;
    use geoblock_core::{ColorEntry, PaletteInterp};
    use std::path::Path;

    fn dataset(dt: DataType, w: usize, h: usize) -> Dataset {
        let params = CreateParams::new(w, h, 1, dt).with_block_size(4, 4);
        MemDriver.create(Path::new("test"), &params, &CacheConfig::default()).unwrap()
    }

    #[test]
    fn typed_round_trip() {
        let ds = dataset(DataType::Float32, 6, 5);
        let band = ds.band(1).unwrap();
        let data: Vec<f32> = (0..30).map(|i| i as f32 * 0.5).collect();
        band.write_from(&Window::full(6, 5), &data).unwrap();
        let back: Vec<f32> = band.read_vec(&Window::full(6, 5)).unwrap();
        assert_eq!(back, data);
        let as_int: Vec<i32> = band.read_vec(&Window::new(1, 0, 2, 1)).unwrap();
        assert_eq!(as_int, vec![1, 1]);
    }

    #[test]
    fn block_access() {
        let ds = dataset(DataType::UInt16, 8, 8);
        let band = ds.band(1).unwrap();
        let block: Vec<u16> = (0..16).collect();
        band.write_block(1, 1, bytemuck::cast_slice(&block)).unwrap();
        let mut out = vec![0u16; 16];
        band.read_block(1, 1, bytemuck::cast_slice_mut(&mut out)).unwrap();
        assert_eq!(out, block);
        let px: Vec<u16> = band.read_vec(&Window::new(5, 4, 1, 1)).unwrap();
        assert_eq!(px, vec![1]);
        assert!(band.read_block(0, 0, &mut [0u8; 4]).is_err());
    }

    #[test]
    fn fill_complex_and_real() {
        let ds = dataset(DataType::CInt16, 5, 5);
        let band = ds.band(1).unwrap();
        band.fill(3.0, -2.0).unwrap();
        let px: Vec<Complex<i16>> = band.read_vec(&Window::new(4, 4, 1, 1)).unwrap();
        assert_eq!(px, vec![Complex::new(3, -2)]);

        let ds = dataset(DataType::Byte, 5, 5);
        let band = ds.band(1).unwrap();
        band.fill(7.0, 99.0).unwrap();
        let all: Vec<u8> = band.read_vec(&Window::full(5, 5)).unwrap();
        assert!(all.iter().all(|&v| v == 7));
    }

    #[test]
    fn properties() {
        let ds = dataset(DataType::Byte, 4, 4);
        let band = ds.band(1).unwrap();
        assert_eq!(band.nodata(), None);
        band.set_nodata(255.0);
        assert_eq!(band.nodata(), Some(255.0));
        band.delete_nodata();
        assert_eq!(band.nodata(), None);

        band.set_scale(0.5);
        band.set_offset(-10.0);
        assert_eq!((band.scale(), band.offset()), (Some(0.5), Some(-10.0)));

        band.set_unit_type("m");
        band.set_description("elevation");
        band.set_category_names(vec!["water".into(), "land".into()]);
        assert_eq!(band.unit_type(), "m");
        assert_eq!(band.description(), "elevation");
        assert_eq!(band.category_names().len(), 2);

        let mut ct = ColorTable::new(PaletteInterp::Rgb);
        ct.set_entry(1, ColorEntry::rgb(255, 0, 0));
        band.set_color_table(Some(ct));
        assert_eq!(band.color_interp(), ColorInterp::PaletteIndex);
        assert_eq!(band.color_table().unwrap().entry_count(), 2);

        band.set_metadata_item("K", "V", "");
        assert_eq!(band.metadata_item("K", "").as_deref(), Some("V"));
    }

    #[test]
    fn statistics_are_cached() {
        let ds = dataset(DataType::Byte, 4, 4);
        let band = ds.band(1).unwrap();
        let data: Vec<u8> = (0..16).collect();
        band.write_from(&Window::full(4, 4), &data).unwrap();

        assert_eq!(band.statistics(false, false, &NoProgress).unwrap(), None);
        let s = band.statistics(false, true, &NoProgress).unwrap().unwrap();
        assert_relative_eq!(s.mean, 7.5);
        assert_eq!(band.metadata_item(STATISTICS_MAXIMUM, "").as_deref(), Some("15"));

        band.fill(1.0, 0.0).unwrap();
        let cached = band.statistics(false, false, &NoProgress).unwrap().unwrap();
        assert_eq!(cached, s);
    }

    #[test]
    fn sampled_statistics_do_not_pass_as_exact() {
        // 16x16 with 4x4 blocks: the sample visits every fourth block.
        let ds = dataset(DataType::Float32, 16, 16);
        let band = ds.band(1).unwrap();
        let data: Vec<f32> = (0..256).map(|i| (i % 16) as f32).collect();
        band.write_from(&Window::full(16, 16), &data).unwrap();

        let approx = band.compute_statistics(true, &NoProgress).unwrap();
        assert_eq!(band.metadata_item(STATISTICS_APPROXIMATE, "").as_deref(), Some("YES"));
        assert_eq!(band.statistics(true, false, &NoProgress).unwrap(), Some(approx));
        assert_eq!(band.statistics(false, false, &NoProgress).unwrap(), None);

        let exact = band.statistics(false, true, &NoProgress).unwrap().unwrap();
        assert_eq!(exact.valid_count, 256);
        assert_relative_eq!(exact.mean, 7.5);
        assert_eq!((exact.min, exact.max), (0.0, 15.0));
        assert_eq!(band.metadata_item(STATISTICS_APPROXIMATE, ""), None);
        assert_eq!(band.statistics(false, false, &NoProgress).unwrap(), Some(exact));
    }

    #[test]
    fn minimum_and_maximum() {
        let ds = dataset(DataType::Int16, 4, 4);
        let band = ds.band(1).unwrap();
        assert_eq!(band.minimum(), (-32768.0, false));
        assert_eq!(band.maximum(), (32767.0, false));

        let data: Vec<i16> = (0..16).map(|i| i * 3 - 5).collect();
        band.write_from(&Window::full(4, 4), &data).unwrap();
        band.compute_statistics(false, &NoProgress).unwrap();
        assert_eq!(band.minimum(), (-5.0, true));
        assert_eq!(band.maximum(), (40.0, true));
    }

    #[test]
    fn default_histograms() {
        let ds = dataset(DataType::Byte, 4, 4);
        let band = ds.band(1).unwrap();
        band.fill(10.0, 0.0).unwrap();
        assert!(band.default_histogram(false, &NoProgress).unwrap().is_none());
        let h = band.default_histogram(true, &NoProgress).unwrap().unwrap();
        assert_eq!(h.bucket_count(), 256);
        assert_eq!(h.counts()[10], 16);

        let ds = dataset(DataType::Float64, 4, 4);
        let band = ds.band(1).unwrap();
        let data: Vec<f64> = (0..16).map(|i| i as f64).collect();
        band.write_from(&Window::full(4, 4), &data).unwrap();
        let h = band.default_histogram(true, &NoProgress).unwrap().unwrap();
        assert!(h.min() < 0.0 && h.max() > 15.0);
        assert_eq!(h.counts()[0], 1);
        assert_eq!(h.counts()[255], 1);
    }

    #[test]
    fn copy_between_types() {
        let src_ds = dataset(DataType::Int16, 6, 6);
        let dst_ds = dataset(DataType::Float64, 6, 6);
        let src = src_ds.band(1).unwrap();
        let data: Vec<i16> = (0..36).map(|i| i - 18).collect();
        src.write_from(&Window::full(6, 6), &data).unwrap();
        src.copy_whole_raster(&dst_ds.band(1).unwrap(), &NoProgress).unwrap();
        let out: Vec<f64> = dst_ds.band(1).unwrap().read_vec(&Window::full(6, 6)).unwrap();
        assert_eq!(out[0], -18.0);
        assert_eq!(out[35], 17.0);

        let small = dataset(DataType::Float64, 5, 6);
        assert!(src.copy_whole_raster(&small.band(1).unwrap(), &NoProgress).is_err());
    }
}
