//! Format drivers and the driver registry.
//!
//! A [`Driver`] recognises datasets of one format and builds [`Dataset`]s
//! around its block codec. The [`DriverRegistry`] is an explicit object the
//! application constructs once and passes to wherever datasets are opened;
//! there is no process-wide driver table.
//!
//! # Example
//!
//! ```rust
//! use std::path::Path;
//! use geoblock_core::DataType;
//! use geoblock_io::driver::{CreateParams, DriverRegistry};
//!
//! let registry = DriverRegistry::with_builtin_drivers();
//! assert!(registry.driver_by_name("gbr").is_some());
//!
//! let params = CreateParams::new(256, 256, 3, DataType::Byte);
//! let ds = registry.create("MEM", Path::new("scratch"), &params).unwrap();
//! assert_eq!(ds.band_count(), 3);
//! ```

use std::fmt;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use geoblock_core::{DataType, Error, Result};
use tracing::debug;

use crate::block_store::BandLayout;
use crate::config::CacheConfig;
use crate::dataset::{Access, Dataset};
use crate::mem::MemDriver;
use crate::raw::RawDriver;

/// Creation options for a new dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateParams {
    /// Raster width.
    pub width: usize,
    /// Raster height.
    pub height: usize,
    /// Number of bands.
    pub bands: usize,
    /// Sample type of every band.
    pub data_type: DataType,
    /// Block size; `None` uses the configured default or the driver's own.
    pub block_size: Option<(usize, usize)>,
}

impl CreateParams {
    /// Parameters with driver-chosen block size.
    pub fn new(width: usize, height: usize, bands: usize, data_type: DataType) -> Self {
        Self { width, height, bands, data_type, block_size: None }
    }

    /// Requests a block size.
    pub fn with_block_size(mut self, width: usize, height: usize) -> Self {
        self.block_size = Some((width, height));
        self
    }

    /// Rejects empty rasters, empty blocks and sizes that overflow `usize`.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 || self.bands == 0 {
            return Err(Error::invalid_argument(format!(
                "cannot create {}x{} raster with {} bands",
                self.width, self.height, self.bands
            )));
        }
        let raster_bytes = self
            .width
            .checked_mul(self.height)
            .and_then(|px| px.checked_mul(self.data_type.size_bytes()))
            .and_then(|b| b.checked_mul(self.bands));
        if raster_bytes.is_none() {
            return Err(Error::invalid_argument(format!(
                "{}x{} {} raster with {} bands overflows addressable memory",
                self.width, self.height, self.data_type, self.bands
            )));
        }
        match self.block_size {
            Some((bw, bh)) => {
                BandLayout::new(self.data_type, self.width, self.height, bw, bh).validate()
            }
            None => Ok(()),
        }
    }

    /// One layout per band with the given block size.
    pub fn layouts(&self, block_width: usize, block_height: usize) -> Vec<BandLayout> {
        vec![
            BandLayout::new(self.data_type, self.width, self.height, block_width, block_height);
            self.bands
        ]
    }
}

/// A raster format.
pub trait Driver: Send + Sync + fmt::Debug {
    /// Short identifier, e.g. `"GBR"`.
    fn short_name(&self) -> &str;

    /// Descriptive name.
    fn long_name(&self) -> &str;

    /// File extensions, without the dot.
    fn extensions(&self) -> &[&str] {
        &[]
    }

    /// Whether `path` looks like a dataset of this format.
    fn identify(&self, path: &Path) -> bool;

    /// Opens an existing dataset.
    fn open(&self, path: &Path, access: Access, config: &CacheConfig) -> Result<Dataset>;

    /// Creates a new dataset.
    fn create(&self, path: &Path, params: &CreateParams, config: &CacheConfig) -> Result<Dataset>;

    /// Deletes a dataset's files.
    fn delete(&self, path: &Path) -> Result<()> {
        Err(Error::unsupported(format!(
            "{} cannot delete {}",
            self.short_name(),
            path.display()
        )))
    }
}

/// Ordered set of drivers plus the cache configuration given to every
/// dataset they open.
pub struct DriverRegistry {
    drivers: RwLock<Vec<Arc<dyn Driver>>>,
    config: RwLock<CacheConfig>,
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.driver_names())
            .field("config", &self.config())
            .finish()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_builtin_drivers()
    }
}

impl DriverRegistry {
    /// Empty registry using `config` for every dataset.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            drivers: RwLock::new(Vec::new()),
            config: RwLock::new(config),
        }
    }

    /// Registry with the `GBR` and `MEM` drivers and configuration from the
    /// environment.
    pub fn with_builtin_drivers() -> Self {
        let registry = Self::new(CacheConfig::from_env());
        registry.register(Arc::new(RawDriver));
        registry.register(Arc::new(MemDriver));
        registry
    }

    /// Adds a driver, replacing any driver with the same short name.
    pub fn register(&self, driver: Arc<dyn Driver>) {
        let mut drivers = self.drivers.write().unwrap_or_else(PoisonError::into_inner);
        let name = driver.short_name().to_string();
        if let Some(pos) = drivers
            .iter()
            .position(|d| d.short_name().eq_ignore_ascii_case(&name))
        {
            debug!(driver = %name, "replacing registered driver");
            drivers[pos] = driver;
        } else {
            debug!(driver = %name, "registered driver");
            drivers.push(driver);
        }
    }

    /// Removes a driver by name. Returns whether it was registered.
    pub fn deregister(&self, name: &str) -> bool {
        let mut drivers = self.drivers.write().unwrap_or_else(PoisonError::into_inner);
        let before = drivers.len();
        drivers.retain(|d| !d.short_name().eq_ignore_ascii_case(name));
        drivers.len() != before
    }

    /// Looks up a driver by short name, ignoring case.
    pub fn driver_by_name(&self, name: &str) -> Option<Arc<dyn Driver>> {
        self.drivers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|d| d.short_name().eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Short names in registration order.
    pub fn driver_names(&self) -> Vec<String> {
        self.drivers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|d| d.short_name().to_string())
            .collect()
    }

    /// Number of registered drivers.
    pub fn driver_count(&self) -> usize {
        self.drivers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// First driver that recognises `path`.
    pub fn identify(&self, path: impl AsRef<Path>) -> Option<Arc<dyn Driver>> {
        let path = path.as_ref();
        self.drivers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|d| d.identify(path))
            .cloned()
    }

    /// Opens `path` with the first capable driver.
    pub fn open(&self, path: impl AsRef<Path>, access: Access) -> Result<Dataset> {
        let path = path.as_ref();
        let driver = self
            .identify(path)
            .ok_or_else(|| Error::NotFound(format!("no driver recognises {}", path.display())))?;
        debug!(driver = driver.short_name(), path = %path.display(), ?access, "opening dataset");
        driver.open(path, access, &self.config())
    }

    /// Creates a dataset with the named driver.
    pub fn create(
        &self,
        driver: &str,
        path: impl AsRef<Path>,
        params: &CreateParams,
    ) -> Result<Dataset> {
        let d = self
            .driver_by_name(driver)
            .ok_or_else(|| Error::NotFound(format!("driver {driver}")))?;
        d.create(path.as_ref(), params, &self.config())
    }

    /// Cache configuration handed to new datasets.
    pub fn config(&self) -> CacheConfig {
        *self.config.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the configuration for datasets opened from now on.
    pub fn set_config(&self, config: CacheConfig) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct NullDriver(&'static str);

    impl Driver for NullDriver {
        fn short_name(&self) -> &str {
            self.0
        }
        fn long_name(&self) -> &str {
            "Null"
        }
        fn identify(&self, path: &Path) -> bool {
            path.extension().is_some_and(|e| e == "null")
        }
        fn open(&self, _: &Path, _: Access, _: &CacheConfig) -> Result<Dataset> {
            Err(Error::unsupported("null"))
        }
        fn create(&self, _: &Path, _: &CreateParams, _: &CacheConfig) -> Result<Dataset> {
            Err(Error::unsupported("null"))
        }
    }

    #[test]
    fn builtin_drivers() {
        let reg = DriverRegistry::with_builtin_drivers();
        assert_eq!(reg.driver_names(), vec!["GBR", "MEM"]);
        assert!(reg.driver_by_name("mem").is_some());
        assert!(reg.driver_by_name("GTiff").is_none());
    }

    #[test]
    fn register_replaces_and_deregisters() {
        let reg = DriverRegistry::new(CacheConfig::default());
        reg.register(Arc::new(NullDriver("NULL")));
        reg.register(Arc::new(NullDriver("null")));
        assert_eq!(reg.driver_count(), 1);
        assert!(reg.identify("a/b.null").is_some());
        assert!(reg.deregister("NULL"));
        assert!(!reg.deregister("NULL"));
        assert!(reg.identify("a/b.null").is_none());
    }

    #[test]
    fn open_unknown_is_not_found() {
        let reg = DriverRegistry::new(CacheConfig::default());
        assert!(matches!(reg.open("missing.xyz", Access::ReadOnly), Err(Error::NotFound(_))));
        let params = CreateParams::new(1, 1, 1, DataType::Byte);
        assert!(matches!(reg.create("NOPE", "x", &params), Err(Error::NotFound(_))));
    }

    #[test]
    fn params_validation() {
        assert!(CreateParams::new(0, 5, 1, DataType::Byte).validate().is_err());
        assert!(CreateParams::new(5, 5, 1, DataType::Byte).with_block_size(0, 4).validate().is_err());
        let huge = CreateParams::new(usize::MAX, 2, 1, DataType::Byte);
        assert!(huge.validate().unwrap_err().is_invalid_argument());
        let huge_block = CreateParams::new(5, 5, 1, DataType::Float64).with_block_size(usize::MAX, 2);
        assert!(huge_block.validate().unwrap_err().is_invalid_argument());
        let p = CreateParams::new(5, 5, 2, DataType::Int16);
        assert_eq!(p.layouts(5, 1).len(), 2);
    }

    #[test]
    fn config_is_shared_with_datasets() {
        let reg = DriverRegistry::new(CacheConfig::default().with_budget(4096));
        reg.register(Arc::new(MemDriver));
        let ds = reg.create("MEM", "a", &CreateParams::new(8, 8, 1, DataType::Byte)).unwrap();
        assert_eq!(ds.cache_budget(), 4096);
        reg.set_config(CacheConfig::default().with_budget(1));
        assert_eq!(reg.config().budget, 1);
    }
}
