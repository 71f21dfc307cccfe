//! Band statistics and histograms.
//!
//! Every scan walks the band block by block through the cache (never a full
//! materialized read), skipping nodata and NaN samples. Complex samples
//! contribute their modulus.
//!
//! - [`compute_exact`] - min/max/mean/stddev over every block
//! - [`compute_approx`] - the same over a fixed stride of blocks
//! - [`compute_min_max`] - extremes only
//! - [`histogram`] - bucket counts over `[min, max)`
//!
//! Mean and variance use Welford's online update in `f64`.
//!
//! # Sampling
//!
//! Approximate scans visit blocks `0, s, 2s, ...` in row-major order, with
//! `s = round(1 / fraction)`. Identical inputs always produce identical
//! estimates.
//!
//! # Cancellation
//!
//! Scans report progress after every block and stop with
//! `Error::Cancelled` when the sink returns `false`. No lease outlives the
//! scan.

use geoblock_core::{DataType, Error, Result};
use tracing::debug;

use crate::band::RasterBand;
use crate::progress::ProgressSink;
use crate::strided::for_each_block;

/// Fraction of blocks visited by approximate scans unless told otherwise.
pub const DEFAULT_SAMPLE_FRACTION: f64 = 0.25;

/// Summary statistics of a band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Statistics {
    /// Smallest valid value.
    pub min: f64,
    /// Largest valid value.
    pub max: f64,
    /// Arithmetic mean.
    pub mean: f64,
    /// Population standard deviation.
    pub std_dev: f64,
    /// Number of valid samples scanned.
    pub valid_count: u64,
}

/// Welford accumulator for count, mean, variance and extremes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl Default for RunningStats {
    fn default() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

impl RunningStats {
    /// Empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one value.
    #[inline]
    pub fn push(&mut self, v: f64) {
        self.count += 1;
        let delta = v - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (v - self.mean);
        self.min = self.min.min(v);
        self.max = self.max.max(v);
    }

    /// Combines two accumulators (Chan et al. parallel update).
    pub fn merge(&mut self, other: &RunningStats) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }
        let n = (self.count + other.count) as f64;
        let delta = other.mean - self.mean;
        self.m2 += other.m2 + delta * delta * self.count as f64 * other.count as f64 / n;
        self.mean += delta * other.count as f64 / n;
        self.count += other.count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Values added so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Final statistics; `None` if nothing was added.
    pub fn finish(&self) -> Option<Statistics> {
        (self.count > 0).then(|| Statistics {
            min: self.min,
            max: self.max,
            mean: self.mean,
            std_dev: (self.m2 / self.count as f64).max(0.0).sqrt(),
            valid_count: self.count,
        })
    }
}

/// Block stride for a sample fraction in `(0, 1]`.
pub fn sample_stride(fraction: f64) -> Result<usize> {
    if !(fraction > 0.0 && fraction <= 1.0) {
        return Err(Error::invalid_argument(format!(
            "sample fraction {fraction} outside (0, 1]"
        )));
    }
    Ok(((1.0 / fraction).round() as usize).max(1))
}

/// Predicate for samples that take part in statistics.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ValidFilter {
    nodata: Option<f64>,
}

impl ValidFilter {
    pub(crate) fn new(data_type: DataType, nodata: Option<f64>) -> Self {
        // Float32 samples are compared against the nodata value as stored.
        let nodata = match data_type {
            DataType::Float32 | DataType::CFloat32 => nodata.map(|v| v as f32 as f64),
            _ => nodata,
        };
        Self { nodata }
    }

    #[inline]
    pub(crate) fn accepts(&self, v: f64) -> bool {
        if v.is_nan() {
            return false;
        }
        self.nodata.is_none_or(|nd| v != nd)
    }
}

fn scan(
    band: &RasterBand<'_>,
    stride: usize,
    progress: &dyn ProgressSink,
    message: &str,
) -> Result<RunningStats> {
    let filter = ValidFilter::new(band.data_type(), band.nodata());
    let mut acc = RunningStats::new();
    for_each_block(band.store(), band.index(), stride, progress, message, |view| {
        for v in view.scalars().filter(|&v| filter.accepts(v)) {
            acc.push(v);
        }
        Ok(())
    })?;
    Ok(acc)
}

/// Exact statistics over every block.
pub fn compute_exact(band: &RasterBand<'_>, progress: &dyn ProgressSink) -> Result<Statistics> {
    let stats = scan(band, 1, progress, "computing statistics")?
        .finish()
        .ok_or(Error::NoValidPixels)?;
    debug!(band = band.number(), ?stats, "computed exact statistics");
    Ok(stats)
}

/// Estimated statistics over a deterministic subsample of blocks.
pub fn compute_approx(
    band: &RasterBand<'_>,
    sample_fraction: f64,
    progress: &dyn ProgressSink,
) -> Result<Statistics> {
    let stride = sample_stride(sample_fraction)?;
    let stats = scan(band, stride, progress, "computing approximate statistics")?
        .finish()
        .ok_or(Error::NoValidPixels)?;
    debug!(band = band.number(), stride, ?stats, "computed approximate statistics");
    Ok(stats)
}

/// Smallest and largest valid values.
pub fn compute_min_max(
    band: &RasterBand<'_>,
    approx: bool,
    progress: &dyn ProgressSink,
) -> Result<(f64, f64)> {
    let stride = if approx { sample_stride(DEFAULT_SAMPLE_FRACTION)? } else { 1 };
    let filter = ValidFilter::new(band.data_type(), band.nodata());
    let mut range: Option<(f64, f64)> = None;
    for_each_block(band.store(), band.index(), stride, progress, "computing min/max", |view| {
        for v in view.scalars().filter(|&v| filter.accepts(v)) {
            range = Some(match range {
                Some((lo, hi)) => (lo.min(v), hi.max(v)),
                None => (v, v),
            });
        }
        Ok(())
    })?;
    range.ok_or(Error::NoValidPixels)
}

/// Histogram request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramParams {
    /// Lower edge of the first bucket.
    pub min: f64,
    /// Upper edge of the last bucket.
    pub max: f64,
    /// Number of buckets.
    pub buckets: usize,
    /// Clamp out-of-range values into the end buckets instead of dropping.
    pub include_out_of_range: bool,
    /// Scan a subsample of blocks.
    pub approx_ok: bool,
}

impl HistogramParams {
    /// Exact histogram, out-of-range values dropped.
    pub fn new(min: f64, max: f64, buckets: usize) -> Self {
        Self {
            min,
            max,
            buckets,
            include_out_of_range: false,
            approx_ok: false,
        }
    }

    /// Sets out-of-range handling.
    pub fn include_out_of_range(mut self, include: bool) -> Self {
        self.include_out_of_range = include;
        self
    }

    /// Allows sampling.
    pub fn approx_ok(mut self, approx: bool) -> Self {
        self.approx_ok = approx;
        self
    }

    /// Rejects empty ranges and zero buckets.
    pub fn validate(&self) -> Result<()> {
        if self.buckets == 0 {
            return Err(Error::invalid_argument("histogram needs at least one bucket"));
        }
        if !(self.max > self.min) {
            return Err(Error::invalid_argument(format!(
                "histogram range [{}, {}] is empty",
                self.min, self.max
            )));
        }
        Ok(())
    }
}

/// Bucket counts of a band. Immutable once computed.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    counts: Vec<u64>,
    min: f64,
    max: f64,
    include_out_of_range: bool,
    dropped: u64,
    scanned: u64,
}

impl Histogram {
    /// Builds a histogram from known counts, e.g. one restored from storage.
    pub fn from_counts(min: f64, max: f64, counts: Vec<u64>, include_out_of_range: bool) -> Result<Self> {
        HistogramParams::new(min, max, counts.len()).validate()?;
        let scanned = counts.iter().sum();
        Ok(Self {
            counts,
            min,
            max,
            include_out_of_range,
            dropped: 0,
            scanned,
        })
    }

    fn empty(params: &HistogramParams) -> Self {
        Self {
            counts: vec![0; params.buckets],
            min: params.min,
            max: params.max,
            include_out_of_range: params.include_out_of_range,
            dropped: 0,
            scanned: 0,
        }
    }

    /// Bucket of `v`: `floor((v - min) / (max - min) * buckets)`, clamped when
    /// out-of-range values are included, `None` when they are dropped.
    #[inline]
    pub fn bucket_for_value(&self, v: f64) -> Option<usize> {
        let n = self.counts.len();
        let idx = ((v - self.min) * n as f64 / (self.max - self.min)).floor();
        if idx >= 0.0 && idx < n as f64 {
            Some(idx as usize)
        } else if self.include_out_of_range {
            Some(if idx < 0.0 { 0 } else { n - 1 })
        } else {
            None
        }
    }

    #[inline]
    fn add(&mut self, v: f64) {
        self.scanned += 1;
        match self.bucket_for_value(v) {
            Some(i) => self.counts[i] += 1,
            None => self.dropped += 1,
        }
    }

    /// Bucket counts.
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Number of buckets.
    pub fn bucket_count(&self) -> usize {
        self.counts.len()
    }

    /// Lower edge of the first bucket.
    pub fn min(&self) -> f64 {
        self.min
    }

    /// Upper edge of the last bucket.
    pub fn max(&self) -> f64 {
        self.max
    }

    /// Width of one bucket.
    pub fn bucket_width(&self) -> f64 {
        (self.max - self.min) / self.counts.len() as f64
    }

    /// Whether out-of-range values were clamped in.
    pub fn includes_out_of_range(&self) -> bool {
        self.include_out_of_range
    }

    /// Values outside `[min, max)` that were dropped.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Valid values scanned.
    pub fn scanned(&self) -> u64 {
        self.scanned
    }

    /// Sum of all buckets.
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Buckets as fractions of the total.
    pub fn normalized(&self) -> Vec<f64> {
        let total = self.total();
        if total == 0 {
            return vec![0.0; self.counts.len()];
        }
        self.counts.iter().map(|&c| c as f64 / total as f64).collect()
    }
}

/// Counts valid samples of `band` into buckets.
pub fn histogram(
    band: &RasterBand<'_>,
    params: &HistogramParams,
    progress: &dyn ProgressSink,
) -> Result<Histogram> {
    params.validate()?;
    let stride = if params.approx_ok { sample_stride(DEFAULT_SAMPLE_FRACTION)? } else { 1 };
    let filter = ValidFilter::new(band.data_type(), band.nodata());
    let mut hist = Histogram::empty(params);
    for_each_block(band.store(), band.index(), stride, progress, "computing histogram", |view| {
        for v in view.scalars().filter(|&v| filter.accepts(v)) {
            hist.add(v);
        }
        Ok(())
    })?;
    debug!(
        band = band.number(),
        buckets = params.buckets,
        scanned = hist.scanned,
        dropped = hist.dropped,
        "computed histogram"
    );
    Ok(hist)
}
