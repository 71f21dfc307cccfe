//! Validity masks.
//!
//! Every band has a mask: a Byte raster of the same size where 255 marks a
//! valid pixel and 0 an invalid one. Unless a mask was created explicitly it
//! is derived on the fly:
//!
//! | Source                        | Flags           |
//! |-------------------------------|-----------------|
//! | explicit per-band mask        | none            |
//! | explicit per-dataset mask     | `PER_DATASET`   |
//! | band nodata value             | `NODATA`        |
//! | nothing                       | `ALL_VALID`     |
//!
//! Nodata masks use the same validity rule as statistics: NaN and the nodata
//! value (as stored, for Float32 bands) are invalid, complex samples are
//! compared by modulus.
//!
//! # Example
//!
//! ```rust
//! use std::path::Path;
//! use geoblock_core::{DataType, Window};
//! use geoblock_io::prelude::*;
//! use geoblock_io::MaskFlags;
//!
//! let registry = DriverRegistry::with_builtin_drivers();
//! let ds = registry
//!     .create("MEM", Path::new("masked"), &CreateParams::new(4, 1, 1, DataType::Int16))
//!     .unwrap();
//! let band = ds.band(1).unwrap();
//! band.write_from(&Window::full(4, 1), &[1i16, -1, 3, -1]).unwrap();
//! band.set_nodata(-1.0);
//!
//! assert_eq!(band.mask_flags(), MaskFlags::NODATA);
//! let mask = band.mask_band().read_vec(&Window::full(4, 1)).unwrap();
//! assert_eq!(mask, vec![255, 0, 255, 0]);
//! ```

use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

use geoblock_core::{Complex, DataType, Error, Result, Window};

use crate::band::RasterBand;
use crate::block_store::BandLayout;
use crate::dataset::Dataset;
use crate::mem;
use crate::stats::ValidFilter;

/// Mask value of a valid pixel.
pub const VALID: u8 = 255;
/// Mask value of an invalid pixel.
pub const INVALID: u8 = 0;

/// How a band's mask is produced.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MaskFlags(u8);

impl MaskFlags {
    /// Every pixel is valid.
    pub const ALL_VALID: MaskFlags = MaskFlags(0x01);
    /// The mask is shared by all bands of the dataset.
    pub const PER_DATASET: MaskFlags = MaskFlags(0x02);
    /// The mask is derived from the nodata value.
    pub const NODATA: MaskFlags = MaskFlags(0x08);

    /// No flags: an explicit per-band mask.
    pub const fn empty() -> Self {
        MaskFlags(0)
    }

    /// Raw bits.
    pub const fn bits(&self) -> u8 {
        self.0
    }

    /// Whether every flag of `other` is set.
    pub const fn contains(&self, other: MaskFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no flag is set.
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for MaskFlags {
    type Output = MaskFlags;

    fn bitor(self, rhs: MaskFlags) -> MaskFlags {
        MaskFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for MaskFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (MaskFlags::ALL_VALID, "ALL_VALID"),
            (MaskFlags::PER_DATASET, "PER_DATASET"),
            (MaskFlags::NODATA, "NODATA"),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| name)
        .collect();
        write!(f, "MaskFlags({})", names.join(" | "))
    }
}

/// Creates the storage of an explicit mask: one Byte band, all valid,
/// tiled like `layout`.
pub(crate) fn create_storage(owner: &Dataset, layout: &BandLayout, name: &str) -> Result<Arc<Dataset>> {
    let mask_layout = BandLayout::new(
        DataType::Byte,
        layout.width,
        layout.height,
        layout.block_width,
        layout.block_height,
    );
    let ds = mem::companion(
        format!("{}:{name}", owner.description()),
        vec![mask_layout],
        owner.companion_config(),
    )?;
    ds.band(1)?.fill(VALID as f64, 0.0)?;
    Ok(Arc::new(ds))
}

#[derive(Debug, Clone)]
enum Source {
    AllValid,
    Nodata(ValidFilter),
    Stored { storage: Arc<Dataset>, flags: MaskFlags },
}

/// The mask of one band, see the [module docs](self).
#[derive(Debug, Clone)]
pub struct MaskBand<'a> {
    band: RasterBand<'a>,
    source: Source,
}

impl<'a> MaskBand<'a> {
    pub(crate) fn all_valid(band: RasterBand<'a>) -> Self {
        Self { band, source: Source::AllValid }
    }

    pub(crate) fn nodata(band: RasterBand<'a>, nodata: f64) -> Self {
        let filter = ValidFilter::new(band.data_type(), Some(nodata));
        Self { band, source: Source::Nodata(filter) }
    }

    pub(crate) fn stored(band: RasterBand<'a>, storage: Arc<Dataset>, flags: MaskFlags) -> Self {
        Self { band, source: Source::Stored { storage, flags } }
    }

    /// How the mask is produced.
    pub fn flags(&self) -> MaskFlags {
        match &self.source {
            Source::AllValid => MaskFlags::ALL_VALID,
            Source::Nodata(_) => MaskFlags::NODATA,
            Source::Stored { flags, .. } => *flags,
        }
    }

    /// The band this mask belongs to.
    pub fn band(&self) -> RasterBand<'a> {
        self.band
    }

    /// Always `Byte`.
    pub fn data_type(&self) -> DataType {
        DataType::Byte
    }

    /// Raster width.
    pub fn x_size(&self) -> usize {
        self.band.x_size()
    }

    /// Raster height.
    pub fn y_size(&self) -> usize {
        self.band.y_size()
    }

    /// Whether the mask can be written.
    pub fn is_writable(&self) -> bool {
        matches!(self.source, Source::Stored { .. })
    }

    /// Reads `window` of the mask into a packed buffer of
    /// `window.buffer_pixels()` bytes.
    pub fn read_window(&self, window: &Window, buf: &mut [u8]) -> Result<()> {
        window.validate(self.x_size(), self.y_size())?;
        let n = window.buffer_pixels();
        if buf.len() < n {
            return Err(Error::invalid_argument(format!(
                "mask buffer of {} bytes, {n} needed",
                buf.len()
            )));
        }
        match &self.source {
            Source::AllValid => buf[..n].fill(VALID),
            Source::Nodata(filter) => {
                // Every type converts to complex, so one read covers them all.
                let values: Vec<Complex<f64>> = self.band.read_vec(window)?;
                let complex = self.band.data_type().is_complex();
                for (out, v) in buf.iter_mut().zip(values) {
                    let scalar = if complex { v.norm() } else { v.re };
                    *out = if filter.accepts(scalar) { VALID } else { INVALID };
                }
            }
            Source::Stored { storage, .. } => storage.band(1)?.read_as(window, &mut buf[..n])?,
        }
        Ok(())
    }

    /// Reads `window` of the mask into a new vector.
    pub fn read_vec(&self, window: &Window) -> Result<Vec<u8>> {
        let mut buf = vec![INVALID; window.buffer_pixels()];
        self.read_window(window, &mut buf)?;
        Ok(buf)
    }

    /// Writes `window` of an explicit mask. Derived masks are read-only.
    pub fn write_window(&self, window: &Window, buf: &[u8]) -> Result<()> {
        match &self.source {
            Source::Stored { storage, .. } => {
                self.band.dataset().check_writable()?;
                storage.band(1)?.write_from(window, buf)
            }
            _ => Err(Error::unsupported(format!(
                "mask of band {} is derived and cannot be written",
                self.band.number()
            ))),
        }
    }

    /// Number of valid pixels in the whole band.
    pub fn count_valid(&self) -> Result<u64> {
        let (w, h) = (self.x_size(), self.y_size());
        let (_, block_h) = self.band.block_size();
        let mut valid = 0u64;
        for y in (0..h).step_by(block_h) {
            let rows = block_h.min(h - y);
            let strip = self.read_vec(&Window::new(0, y, w, rows))?;
            valid += strip.iter().filter(|&&m| m == VALID).count() as u64;
        }
        Ok(valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::driver::{CreateParams, Driver};
    use crate::mem::MemDriver;
    use std::path::Path;

    fn dataset(dt: DataType, bands: usize) -> Dataset {
        let params = CreateParams::new(6, 4, bands, dt).with_block_size(4, 4);
        MemDriver.create(Path::new("mask"), &params, &CacheConfig::default()).unwrap()
    }

    #[test]
    fn flags_follow_nodata() {
        let ds = dataset(DataType::Float32, 1);
        let band = ds.band(1).unwrap();
        assert_eq!(band.mask_flags(), MaskFlags::ALL_VALID);
        assert_eq!(band.mask_band().count_valid().unwrap(), 24);

        band.set_nodata(0.1);
        assert_eq!(band.mask_flags(), MaskFlags::NODATA);
        band.fill(0.1, 0.0).unwrap();
        band.write_from(&Window::new(5, 3, 1, 1), &[2.0f32]).unwrap();
        let mask = band.mask_band();
        assert_eq!(mask.count_valid().unwrap(), 1);
        assert_eq!(mask.read_vec(&Window::new(4, 3, 2, 1)).unwrap(), vec![INVALID, VALID]);
        assert!(!mask.is_writable());
        assert!(mask.write_window(&Window::full(6, 4), &[VALID; 24]).is_err());
    }

    #[test]
    fn nodata_mask_of_complex_band_uses_modulus() {
        let ds = dataset(DataType::CInt16, 1);
        let band = ds.band(1).unwrap();
        band.fill(3.0, 4.0).unwrap();
        band.set_nodata(5.0);
        assert_eq!(band.mask_band().count_valid().unwrap(), 0);
    }

    #[test]
    fn explicit_band_mask() {
        let ds = dataset(DataType::Byte, 2);
        let band = ds.band(1).unwrap();
        band.set_nodata(0.0);
        band.create_mask_band(MaskFlags::empty()).unwrap();
        assert_eq!(band.mask_flags(), MaskFlags::empty());

        let mask = band.mask_band();
        assert!(mask.is_writable());
        assert_eq!(mask.count_valid().unwrap(), 24);
        mask.write_window(&Window::new(0, 0, 2, 1), &[INVALID, INVALID]).unwrap();
        assert_eq!(band.mask_band().count_valid().unwrap(), 22);

        // The second band is unaffected.
        assert_eq!(ds.band(2).unwrap().mask_flags(), MaskFlags::ALL_VALID);
    }

    #[test]
    fn per_dataset_mask_is_shared() {
        let ds = dataset(DataType::UInt16, 3);
        ds.band(2).unwrap().create_mask_band(MaskFlags::PER_DATASET).unwrap();
        for band in ds.bands() {
            assert_eq!(band.mask_flags(), MaskFlags::PER_DATASET);
        }
        let half = Window::new(0, 0, 3, 4);
        ds.band(1).unwrap().mask_band().write_window(&half, &[INVALID; 12]).unwrap();
        assert_eq!(ds.band(3).unwrap().mask_band().count_valid().unwrap(), 12);

        let resampled = Window::full(6, 4).with_buffer_size(2, 1);
        assert_eq!(ds.band(3).unwrap().mask_band().read_vec(&resampled).unwrap(), vec![INVALID, VALID]);
    }

    #[test]
    fn bad_requests() {
        let ds = dataset(DataType::Byte, 1);
        let band = ds.band(1).unwrap();
        assert!(band.create_mask_band(MaskFlags::NODATA).unwrap_err().is_invalid_argument());
        let mask = band.mask_band();
        assert!(mask.read_vec(&Window::new(5, 0, 2, 1)).is_err());
        assert!(mask.read_window(&Window::full(6, 4), &mut [0u8; 3]).unwrap_err().is_invalid_argument());
        assert_eq!(format!("{:?}", MaskFlags::PER_DATASET | MaskFlags::NODATA), "MaskFlags(PER_DATASET | NODATA)");
    }
}
