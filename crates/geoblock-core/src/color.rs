//! Color interpretation and palette tables.
//!
//! - [`ColorInterp`] - what a band's values mean (red, alpha, palette index...)
//! - [`PaletteInterp`] - how the components of a [`ColorEntry`] are read
//! - [`ColorTable`] - a palette for [`ColorInterp::PaletteIndex`] bands
//!
//! # Usage
//!
//! ```rust
//! use geoblock_core::{ColorEntry, ColorTable, PaletteInterp};
//!
//! let mut ct = ColorTable::new(PaletteInterp::Rgb);
//! let n = ct
//!     .create_color_ramp(0, ColorEntry::rgb(0, 0, 0), 10, ColorEntry::rgb(250, 100, 0))
//!     .unwrap();
//! assert_eq!(n, 11);
//! assert_eq!(ct.entry(5), Some(ColorEntry::rgb(125, 50, 0)));
//! ```

use std::fmt;

use crate::error::{Error, Result};

/// Meaning of the values stored in a band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[allow(missing_docs)]
pub enum ColorInterp {
    #[default]
    Undefined,
    GrayIndex,
    PaletteIndex,
    RedBand,
    GreenBand,
    BlueBand,
    AlphaBand,
    HueBand,
    SaturationBand,
    LightnessBand,
    CyanBand,
    MagentaBand,
    YellowBand,
    BlackBand,
    YCbCrY,
    YCbCrCb,
    YCbCrCr,
}

impl ColorInterp {
    const ALL: [ColorInterp; 17] = [
        Self::Undefined,
        Self::GrayIndex,
        Self::PaletteIndex,
        Self::RedBand,
        Self::GreenBand,
        Self::BlueBand,
        Self::AlphaBand,
        Self::HueBand,
        Self::SaturationBand,
        Self::LightnessBand,
        Self::CyanBand,
        Self::MagentaBand,
        Self::YellowBand,
        Self::BlackBand,
        Self::YCbCrY,
        Self::YCbCrCb,
        Self::YCbCrCr,
    ];

    /// Short name, e.g. `"Red"` or `"Palette"`.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Undefined => "Undefined",
            Self::GrayIndex => "Gray",
            Self::PaletteIndex => "Palette",
            Self::RedBand => "Red",
            Self::GreenBand => "Green",
            Self::BlueBand => "Blue",
            Self::AlphaBand => "Alpha",
            Self::HueBand => "Hue",
            Self::SaturationBand => "Saturation",
            Self::LightnessBand => "Lightness",
            Self::CyanBand => "Cyan",
            Self::MagentaBand => "Magenta",
            Self::YellowBand => "Yellow",
            Self::BlackBand => "Black",
            Self::YCbCrY => "YCbCr_Y",
            Self::YCbCrCb => "YCbCr_Cb",
            Self::YCbCrCr => "YCbCr_Cr",
        }
    }

    /// Parses a short name, ignoring ASCII case. Unknown names map to
    /// [`Undefined`](Self::Undefined).
    pub fn from_name(name: &str) -> ColorInterp {
        Self::ALL
            .iter()
            .copied()
            .find(|ci| ci.name().eq_ignore_ascii_case(name))
            .unwrap_or_default()
    }
}

impl fmt::Display for ColorInterp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Component layout of palette entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PaletteInterp {
    /// `c1` is a gray level.
    Gray,
    /// `c1..c4` are red, green, blue, alpha.
    #[default]
    Rgb,
    /// `c1..c4` are cyan, magenta, yellow, black.
    Cmyk,
    /// `c1..c3` are hue, lightness, saturation.
    Hls,
}

impl PaletteInterp {
    /// Short name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Gray => "Gray",
            Self::Rgb => "RGB",
            Self::Cmyk => "CMYK",
            Self::Hls => "HLS",
        }
    }
}

impl fmt::Display for PaletteInterp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One palette entry; component meaning depends on [`PaletteInterp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ColorEntry {
    /// First component.
    pub c1: i16,
    /// Second component.
    pub c2: i16,
    /// Third component.
    pub c3: i16,
    /// Fourth component (alpha for RGB).
    pub c4: i16,
}

impl ColorEntry {
    /// Creates an entry from four components.
    pub const fn new(c1: i16, c2: i16, c3: i16, c4: i16) -> Self {
        Self { c1, c2, c3, c4 }
    }

    /// Opaque RGB entry.
    pub const fn rgb(r: i16, g: i16, b: i16) -> Self {
        Self::new(r, g, b, 255)
    }

    fn lerp(&self, other: &ColorEntry, t: f64) -> ColorEntry {
        let mix = |a: i16, b: i16| (a as f64 + (b as f64 - a as f64) * t).round() as i16;
        ColorEntry::new(
            mix(self.c1, other.c1),
            mix(self.c2, other.c2),
            mix(self.c3, other.c3),
            mix(self.c4, other.c4),
        )
    }
}

/// Palette for palette-indexed bands.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColorTable {
    interp: PaletteInterp,
    entries: Vec<ColorEntry>,
}

impl ColorTable {
    /// Largest index a ramp may address.
    pub const MAX_RAMP_INDEX: usize = 255;

    /// Empty table.
    pub fn new(interp: PaletteInterp) -> Self {
        Self { interp, entries: Vec::new() }
    }

    /// Component layout.
    pub fn palette_interp(&self) -> PaletteInterp {
        self.interp
    }

    /// Number of entries.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Entry at `index`, if present.
    pub fn entry(&self, index: usize) -> Option<ColorEntry> {
        self.entries.get(index).copied()
    }

    /// All entries.
    pub fn entries(&self) -> &[ColorEntry] {
        &self.entries
    }

    /// Sets entry `index`, growing the table with zeroed entries as needed.
    pub fn set_entry(&mut self, index: usize, entry: ColorEntry) {
        if index >= self.entries.len() {
            self.entries.resize(index + 1, ColorEntry::default());
        }
        self.entries[index] = entry;
    }

    /// Fills entries `start..=end` by linear interpolation between two colors.
    ///
    /// Returns the new entry count.
    pub fn create_color_ramp(
        &mut self,
        start: usize,
        start_color: ColorEntry,
        end: usize,
        end_color: ColorEntry,
    ) -> Result<usize> {
        if start > end || end > Self::MAX_RAMP_INDEX {
            return Err(Error::invalid_argument(format!(
                "invalid color ramp range {start}..={end}"
            )));
        }
        let span = end - start;
        for i in 0..=span {
            let t = if span == 0 { 0.0 } else { i as f64 / span as f64 };
            self.set_entry(start + i, start_color.lerp(&end_color, t));
        }
        Ok(self.entry_count())
    }
}
