//! Key/value metadata scoped by domain.
//!
//! Datasets and bands each carry a [`MetadataStore`]. Items live in named
//! domains; `""` is the default domain. Nothing in the engine interprets keys
//! except [`AREA_OR_POINT`] and the cached statistics keys.

use std::collections::BTreeMap;
use std::fmt;

use geoblock_core::{Error, Result};

/// Default metadata domain.
pub const DEFAULT_DOMAIN: &str = "";

/// Whether pixel values describe an area or a point sample.
pub const AREA_OR_POINT: &str = "AREA_OR_POINT";

/// Value of the [`AREA_OR_POINT`] item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AreaOrPoint {
    /// Pixel value is the aggregate of the pixel's area.
    #[default]
    Area,
    /// Pixel value is a sample at the pixel's center.
    Point,
}

impl AreaOrPoint {
    /// Metadata value.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Area => "Area",
            Self::Point => "Point",
        }
    }

    /// Parses a metadata value, ignoring ASCII case.
    pub fn from_name(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("area") {
            Some(Self::Area)
        } else if value.eq_ignore_ascii_case("point") {
            Some(Self::Point)
        } else {
            None
        }
    }
}

impl fmt::Display for AreaOrPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Metadata items grouped by domain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataStore {
    domains: BTreeMap<String, BTreeMap<String, String>>,
}

impl MetadataStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of `key` in `domain`.
    pub fn item(&self, key: &str, domain: &str) -> Option<&str> {
        self.domains.get(domain)?.get(key).map(String::as_str)
    }

    /// Sets `key` in `domain`.
    pub fn set_item(&mut self, key: impl Into<String>, value: impl Into<String>, domain: &str) {
        self.domains
            .entry(domain.to_string())
            .or_default()
            .insert(key.into(), value.into());
    }

    /// Removes `key` from `domain`, returning its value.
    pub fn remove_item(&mut self, key: &str, domain: &str) -> Option<String> {
        let items = self.domains.get_mut(domain)?;
        let value = items.remove(key);
        if items.is_empty() {
            self.domains.remove(domain);
        }
        value
    }

    /// Items of `domain` as `KEY=VALUE` strings, sorted by key.
    pub fn items(&self, domain: &str) -> Vec<String> {
        self.domains
            .get(domain)
            .map(|items| items.iter().map(|(k, v)| format!("{k}={v}")).collect())
            .unwrap_or_default()
    }

    /// Replaces `domain` with `KEY=VALUE` items.
    pub fn set_items<S: AsRef<str>>(&mut self, items: &[S], domain: &str) -> Result<()> {
        let mut parsed = BTreeMap::new();
        for item in items {
            let item = item.as_ref();
            let (k, v) = item
                .split_once('=')
                .ok_or_else(|| Error::invalid_argument(format!("metadata item {item:?} has no '='")))?;
            parsed.insert(k.to_string(), v.to_string());
        }
        if parsed.is_empty() {
            self.domains.remove(domain);
        } else {
            self.domains.insert(domain.to_string(), parsed);
        }
        Ok(())
    }

    /// Names of non-empty domains.
    pub fn domains(&self) -> Vec<&str> {
        self.domains.keys().map(String::as_str).collect()
    }

    /// Whether no domain holds items.
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}
