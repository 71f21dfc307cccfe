//! Block cache configuration.
//!
//! # Environment Variables
//!
//! - `GEOBLOCK_CACHEMAX` - cache budget. Values below 100000 are megabytes,
//!   larger values are bytes.
//! - `GEOBLOCK_CACHE_OVERRUN` - `soft` (default) or `strict`
//! - `GEOBLOCK_BLOCK_SIZE` - default block size of created datasets, `N` or
//!   `WxH`, each side in 16..=16384
//!
//! Unparseable values are ignored and the default is used.

use std::env;
use std::fmt;

/// Default cache budget (64 MB).
pub const DEFAULT_CACHE_BYTES: usize = 64 * 1024 * 1024;

/// `GEOBLOCK_CACHEMAX` values below this are megabytes.
const CACHEMAX_MB_THRESHOLD: u64 = 100_000;

/// Smallest configurable block side.
pub const MIN_BLOCK_SIDE: usize = 16;

/// Largest configurable block side.
pub const MAX_BLOCK_SIDE: usize = 16384;

/// What the block store does when every cached block is leased and a new
/// block does not fit the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverrunPolicy {
    /// Exceed the budget temporarily and log a warning.
    #[default]
    Soft,
    /// Fail the fetch with `Error::OutOfMemory`.
    Strict,
}

impl fmt::Display for OverrunPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Soft => "soft",
            Self::Strict => "strict",
        })
    }
}

/// Settings applied to every dataset's block store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Cache budget in bytes.
    pub budget: usize,
    /// Behaviour when the budget cannot be met.
    pub overrun: OverrunPolicy,
    /// Block size for created datasets; `None` lets the driver choose.
    pub default_block_size: Option<(usize, usize)>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            budget: DEFAULT_CACHE_BYTES,
            overrun: OverrunPolicy::Soft,
            default_block_size: None,
        }
    }
}

impl CacheConfig {
    /// Defaults overridden by `GEOBLOCK_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            budget: env_var("GEOBLOCK_CACHEMAX")
                .and_then(|v| parse_cache_max(&v))
                .unwrap_or(defaults.budget),
            overrun: env_var("GEOBLOCK_CACHE_OVERRUN")
                .and_then(|v| parse_overrun(&v))
                .unwrap_or(defaults.overrun),
            default_block_size: env_var("GEOBLOCK_BLOCK_SIZE").and_then(|v| parse_block_size(&v)),
        }
    }

    /// Same configuration with another budget.
    pub fn with_budget(mut self, budget: usize) -> Self {
        self.budget = budget;
        self
    }

    /// Same configuration with another overrun policy.
    pub fn with_overrun(mut self, overrun: OverrunPolicy) -> Self {
        self.overrun = overrun;
        self
    }

    /// Same configuration with a default block size.
    pub fn with_block_size(mut self, width: usize, height: usize) -> Self {
        self.default_block_size = Some((width, height));
        self
    }
}

/// Parses a `GEOBLOCK_CACHEMAX` value into bytes.
pub fn parse_cache_max(value: &str) -> Option<usize> {
    let n: u64 = value.trim().parse().ok()?;
    let bytes = if n < CACHEMAX_MB_THRESHOLD {
        n.checked_mul(1024 * 1024)?
    } else {
        n
    };
    usize::try_from(bytes).ok()
}

/// Parses a `GEOBLOCK_CACHE_OVERRUN` value.
pub fn parse_overrun(value: &str) -> Option<OverrunPolicy> {
    match value.trim().to_ascii_lowercase().as_str() {
        "soft" | "warn" => Some(OverrunPolicy::Soft),
        "strict" | "error" => Some(OverrunPolicy::Strict),
        _ => None,
    }
}

/// Parses a `GEOBLOCK_BLOCK_SIZE` value (`256` or `512x128`).
pub fn parse_block_size(value: &str) -> Option<(usize, usize)> {
    let value = value.trim().to_ascii_lowercase();
    let (w, h) = match value.split_once('x') {
        Some((w, h)) => (w.trim().parse().ok()?, h.trim().parse().ok()?),
        None => {
            let n = value.parse().ok()?;
            (n, n)
        }
    };
    let side = MIN_BLOCK_SIDE..=MAX_BLOCK_SIDE;
    (side.contains(&w) && side.contains(&h)).then_some((w, h))
}

/// Human-readable byte count for log messages.
pub fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;
    const GB: usize = MB * 1024;
    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{} KB", bytes / KB)
    } else {
        format!("{bytes} B")
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}
