//! In-memory driver (`MEM`).
//!
//! Datasets live entirely in process memory and disappear when dropped. The
//! driver only creates; there is nothing on disk to open. Unless a block size
//! is configured, each block is one scanline.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use geoblock_core::{Error, Result};
use tracing::debug;

use crate::block_store::{BandLayout, BlockCodec, BlockKey};
use crate::config::CacheConfig;
use crate::dataset::{Access, Dataset};
use crate::driver::{CreateParams, Driver};

/// Block storage backed by one zeroed buffer per band.
#[derive(Debug)]
pub struct MemCodec {
    bands: Mutex<Vec<Vec<u8>>>,
}

impl MemCodec {
    /// Allocates zeroed storage for every block of every band.
    ///
    /// Fails with `InvalidArgument` when a band's size overflows and with
    /// `OutOfMemory` when the allocation is refused.
    pub fn new(layouts: &[BandLayout]) -> Result<Self> {
        let mut bands = Vec::with_capacity(layouts.len());
        for l in layouts {
            let size = l.checked_band_bytes().ok_or_else(|| {
                Error::invalid_argument(format!(
                    "{}x{} band with {}x{} blocks overflows addressable memory",
                    l.width, l.height, l.block_width, l.block_height
                ))
            })?;
            let mut buf = Vec::new();
            buf.try_reserve_exact(size)
                .map_err(|_| Error::OutOfMemory { requested: size, budget: 0 })?;
            buf.resize(size, 0);
            bands.push(buf);
        }
        Ok(Self { bands: Mutex::new(bands) })
    }

    fn block_range(key: BlockKey, layout: &BandLayout) -> std::ops::Range<usize> {
        let start = layout.grid().linear_index(key.x, key.y) * layout.block_bytes();
        start..start + layout.block_bytes()
    }
}

impl BlockCodec for MemCodec {
    fn decode(&self, key: BlockKey, layout: &BandLayout, buf: &mut [u8]) -> Result<()> {
        let bands = self.bands.lock().unwrap_or_else(PoisonError::into_inner);
        let band = bands
            .get(key.band)
            .ok_or_else(|| Error::decode(format!("no storage for {key}")))?;
        buf.copy_from_slice(&band[Self::block_range(key, layout)]);
        Ok(())
    }

    fn encode(&self, key: BlockKey, layout: &BandLayout, buf: &[u8]) -> Result<()> {
        let mut bands = self.bands.lock().unwrap_or_else(PoisonError::into_inner);
        let band = bands
            .get_mut(key.band)
            .ok_or_else(|| Error::encode(format!("no storage for {key}")))?;
        band[Self::block_range(key, layout)].copy_from_slice(buf);
        Ok(())
    }
}

/// The `MEM` driver.
#[derive(Debug, Default)]
pub struct MemDriver;

impl Driver for MemDriver {
    fn short_name(&self) -> &str {
        "MEM"
    }

    fn long_name(&self) -> &str {
        "In Memory Raster"
    }

    fn identify(&self, _path: &Path) -> bool {
        false
    }

    fn open(&self, path: &Path, _access: Access, _config: &CacheConfig) -> Result<Dataset> {
        Err(Error::unsupported(format!(
            "MEM datasets cannot be opened from {}",
            path.display()
        )))
    }

    fn create(&self, path: &Path, params: &CreateParams, config: &CacheConfig) -> Result<Dataset> {
        params.validate()?;
        let (bw, bh) = params
            .block_size
            .or(config.default_block_size)
            .unwrap_or((params.width, 1));
        let layouts = params.layouts(bw, bh);
        let ds = companion(path.display().to_string(), layouts, *config)?;
        debug!(
            name = %path.display(),
            width = params.width,
            height = params.height,
            bands = params.bands,
            data_type = %params.data_type,
            "created MEM dataset"
        );
        Ok(ds)
    }
}

/// Builds an in-memory dataset, e.g. the mask or overview of another one.
pub(crate) fn companion(description: String, layouts: Vec<BandLayout>, config: CacheConfig) -> Result<Dataset> {
    let codec = Arc::new(MemCodec::new(&layouts)?);
    Dataset::new(description, "MEM", Access::Update, codec, layouts, config)
}
