//! Block cache with leases, dirty tracking and LRU eviction.
//!
//! A [`BlockStore`] owns every decoded block of one dataset. Pixel access goes
//! through [`BlockStore::fetch`], which hands out a scoped [`BlockHandle`]
//! lease:
//!
//! - [`Intent::Read`] leases are shared,
//! - [`Intent::Write`] and [`Intent::ReadWrite`] leases are exclusive,
//! - a conflicting fetch waits until the holder drops its handle.
//!
//! On a miss the block is allocated and, unless the intent is a pure
//! `Write`, filled by the [`BlockCodec`]. Before a new block is accepted the
//! least recently used unleased blocks are evicted until it fits the budget.
//! Dirty blocks are encoded before they leave the cache.
//!
//! When every block is leased and the budget is still exceeded, the store
//! follows its [`OverrunPolicy`]: `Soft` accepts the block and logs a warning,
//! `Strict` fails with [`Error::OutOfMemory`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use geoblock_core::DataType;
//! use geoblock_io::block_store::{BandLayout, BlockKey, BlockStore, Intent};
//! use geoblock_io::config::CacheConfig;
//! use geoblock_io::mem::MemCodec;
//!
//! let layout = BandLayout::new(DataType::Byte, 64, 64, 32, 32);
//! let codec = Arc::new(MemCodec::new(&[layout]).unwrap());
//! let store = BlockStore::new(codec, vec![layout], CacheConfig::default());
//!
//! {
//!     let block = store.fetch(BlockKey::new(0, 1, 1), Intent::Write).unwrap();
//!     block.data_mut().unwrap().fill(7);
//!     block.mark_dirty().unwrap();
//! }
//! assert_eq!(store.outstanding_leases(), 0);
//! assert!(store.is_dirty(BlockKey::new(0, 1, 1)));
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use geoblock_core::{BlockGrid, DataType, Error, Result};
use tracing::{debug, trace, warn};

use crate::config::{format_bytes, CacheConfig, OverrunPolicy};
use crate::progress::ProgressSink;

/// Address of one block: band index (0-based) and block column/row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockKey {
    /// Band index within the store, 0-based.
    pub band: usize,
    /// Block row. Ordered before `x` so keys sort in address order.
    pub y: usize,
    /// Block column.
    pub x: usize,
}

impl BlockKey {
    /// Creates a key for block `(x, y)` of `band`.
    #[inline]
    pub const fn new(band: usize, x: usize, y: usize) -> Self {
        Self { band, y, x }
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "band {} block ({}, {})", self.band, self.x, self.y)
    }
}

/// Access intent of a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Shared read access.
    Read,
    /// Exclusive access; a missing block is not decoded. The caller
    /// overwrites the whole block.
    Write,
    /// Exclusive access to decoded contents.
    ReadWrite,
}

impl Intent {
    #[inline]
    fn is_exclusive(self) -> bool {
        !matches!(self, Intent::Read)
    }
}

/// Geometry and sample type of one band, as the store and codecs see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandLayout {
    /// Sample type.
    pub data_type: DataType,
    /// Raster width.
    pub width: usize,
    /// Raster height.
    pub height: usize,
    /// Block width.
    pub block_width: usize,
    /// Block height.
    pub block_height: usize,
}

impl BandLayout {
    /// Creates a layout.
    pub const fn new(
        data_type: DataType,
        width: usize,
        height: usize,
        block_width: usize,
        block_height: usize,
    ) -> Self {
        Self { data_type, width, height, block_width, block_height }
    }

    /// Block tiling of the band.
    #[inline]
    pub const fn grid(&self) -> BlockGrid {
        BlockGrid::new(self.width, self.height, self.block_width, self.block_height)
    }

    /// Bytes per block, including the padding of edge blocks.
    ///
    /// Only meaningful for layouts that pass [`validate`](Self::validate).
    #[inline]
    pub const fn block_bytes(&self) -> usize {
        self.block_width * self.block_height * self.data_type.size_bytes()
    }

    /// Bytes per block, or `None` if the product overflows `usize`.
    #[inline]
    pub const fn checked_block_bytes(&self) -> Option<usize> {
        match self.block_width.checked_mul(self.block_height) {
            Some(pixels) => pixels.checked_mul(self.data_type.size_bytes()),
            None => None,
        }
    }

    /// Bytes of every block of the band, or `None` on overflow or an empty
    /// block.
    pub fn checked_band_bytes(&self) -> Option<usize> {
        if self.block_width == 0 || self.block_height == 0 {
            return None;
        }
        self.grid()
            .checked_block_count()?
            .checked_mul(self.checked_block_bytes()?)
    }

    /// Rejects empty rasters, empty blocks and sizes that overflow `usize`.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::invalid_argument(format!(
                "empty raster {}x{}",
                self.width, self.height
            )));
        }
        if self.block_width == 0 || self.block_height == 0 {
            return Err(Error::invalid_argument(format!(
                "invalid block size {}x{}",
                self.block_width, self.block_height
            )));
        }
        if self.checked_band_bytes().is_none() {
            return Err(Error::invalid_argument(format!(
                "{}x{} {} band with {}x{} blocks overflows addressable memory",
                self.width, self.height, self.data_type, self.block_width, self.block_height
            )));
        }
        Ok(())
    }

    /// Bytes per block row.
    #[inline]
    pub const fn block_line_bytes(&self) -> usize {
        self.block_width * self.data_type.size_bytes()
    }
}

/// Format-specific block decoder and encoder.
///
/// Buffers hold one full block (`layout.block_bytes()`) of native-endian
/// samples, row-major. Pixels of edge blocks outside the raster may hold any
/// value; they are never exposed.
pub trait BlockCodec: Send + Sync + fmt::Debug {
    /// Fills `buf` with the pixels of block `key`.
    fn decode(&self, key: BlockKey, layout: &BandLayout, buf: &mut [u8]) -> Result<()>;

    /// Writes `buf` back as the pixels of block `key`.
    fn encode(&self, key: BlockKey, layout: &BandLayout, buf: &[u8]) -> Result<()>;

    /// Makes encoded blocks durable. Called when a dataset is closed.
    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

/// Cache counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Fetches served from cache.
    pub hits: u64,
    /// Fetches that allocated a block.
    pub misses: u64,
    /// Blocks dropped to make room.
    pub evictions: u64,
    /// Dirty blocks written back.
    pub flushes: u64,
    /// Insertions that exceeded the budget under the soft policy.
    pub overruns: u64,
    /// Highest byte usage seen.
    pub peak_used: usize,
}

impl CacheStats {
    /// Hit rate as percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

type Slot = Arc<RwLock<Vec<u8>>>;

#[derive(Debug)]
struct Entry {
    slot: Slot,
    size: usize,
    readers: usize,
    writer: bool,
    dirty: bool,
    last_access: u64,
}

impl Entry {
    #[inline]
    fn is_leased(&self) -> bool {
        self.writer || self.readers > 0
    }

    #[inline]
    fn admits(&self, intent: Intent) -> bool {
        if intent.is_exclusive() {
            !self.is_leased()
        } else {
            !self.writer
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    blocks: HashMap<BlockKey, Entry>,
    /// Access sequence -> key, oldest first.
    lru: BTreeMap<u64, BlockKey>,
    seq: u64,
    used: usize,
    budget: usize,
    leases: usize,
    stats: CacheStats,
}

impl StoreState {
    fn touch(&mut self, key: BlockKey) {
        self.seq += 1;
        let seq = self.seq;
        if let Some(entry) = self.blocks.get_mut(&key) {
            self.lru.remove(&entry.last_access);
            entry.last_access = seq;
            self.lru.insert(seq, key);
        }
    }

    fn lease(&mut self, key: BlockKey, intent: Intent) {
        if let Some(entry) = self.blocks.get_mut(&key) {
            if intent.is_exclusive() {
                entry.writer = true;
            } else {
                entry.readers += 1;
            }
            self.leases += 1;
        }
    }

    fn release(&mut self, key: BlockKey, exclusive: bool) {
        if let Some(entry) = self.blocks.get_mut(&key) {
            if exclusive {
                entry.writer = false;
            } else {
                entry.readers = entry.readers.saturating_sub(1);
            }
            self.leases = self.leases.saturating_sub(1);
        }
    }

    fn oldest_unleased(&self) -> Option<BlockKey> {
        self.lru
            .values()
            .copied()
            .find(|k| self.blocks.get(k).is_some_and(|e| !e.is_leased()))
    }

    fn remove(&mut self, key: BlockKey) -> Option<Entry> {
        let entry = self.blocks.remove(&key)?;
        self.lru.remove(&entry.last_access);
        self.used = self.used.saturating_sub(entry.size);
        Some(entry)
    }
}

/// Bounded block cache for the bands of one dataset.
pub struct BlockStore {
    codec: Arc<dyn BlockCodec>,
    layouts: Vec<BandLayout>,
    overrun: OverrunPolicy,
    state: Mutex<StoreState>,
    released: Condvar,
}

impl fmt::Debug for BlockStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("BlockStore")
            .field("codec", &self.codec)
            .field("bands", &self.layouts.len())
            .field("blocks", &state.blocks.len())
            .field("used", &state.used)
            .field("budget", &state.budget)
            .finish()
    }
}

impl BlockStore {
    /// Creates an empty store for bands with the given layouts.
    pub fn new(codec: Arc<dyn BlockCodec>, layouts: Vec<BandLayout>, config: CacheConfig) -> Self {
        Self {
            codec,
            layouts,
            overrun: config.overrun,
            state: Mutex::new(StoreState {
                budget: config.budget,
                ..StoreState::default()
            }),
            released: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Layout of band `band` (0-based).
    pub fn layout(&self, band: usize) -> Result<&BandLayout> {
        self.layouts
            .get(band)
            .ok_or_else(|| Error::invalid_argument(format!("band index {band} out of range")))
    }

    /// Layouts of all bands.
    pub fn layouts(&self) -> &[BandLayout] {
        &self.layouts
    }

    /// Number of bands served.
    pub fn band_count(&self) -> usize {
        self.layouts.len()
    }

    fn check_key(&self, key: BlockKey) -> Result<&BandLayout> {
        let layout = self.layout(key.band)?;
        if !layout.grid().contains_block(key.x, key.y) {
            return Err(Error::invalid_argument(format!("{key} outside block grid")));
        }
        Ok(layout)
    }

    /// Leases block `key`, loading it on a miss.
    ///
    /// Blocks while another thread holds a conflicting lease on the same
    /// block. The lease ends when the handle is dropped.
    pub fn fetch(&self, key: BlockKey, intent: Intent) -> Result<BlockHandle<'_>> {
        let layout = *self.check_key(key)?;
        let mut state = self.lock();

        loop {
            let cached = match state.blocks.get(&key) {
                Some(entry) if entry.admits(intent) => Some(Arc::clone(&entry.slot)),
                Some(_) => None,
                None => break,
            };
            if let Some(slot) = cached {
                state.lease(key, intent);
                state.touch(key);
                state.stats.hits += 1;
                trace!(%key, ?intent, "block cache hit");
                return Ok(BlockHandle::new(self, key, slot, intent.is_exclusive()));
            }
            state = self.released.wait(state).unwrap_or_else(PoisonError::into_inner);
        }

        state.stats.misses += 1;
        let size = layout
            .checked_block_bytes()
            .ok_or_else(|| Error::invalid_argument(format!("block size of {key} overflows")))?;
        self.make_room(&mut state, size)?;

        let mut buf = Vec::new();
        buf.try_reserve_exact(size).map_err(|_| Error::OutOfMemory {
            requested: size,
            budget: state.budget,
        })?;
        buf.resize(size, 0);

        let slot: Slot = Arc::new(RwLock::new(buf));
        state.blocks.insert(
            key,
            Entry {
                slot: Arc::clone(&slot),
                size,
                readers: 0,
                writer: false,
                dirty: false,
                last_access: 0,
            },
        );
        // Exclusive while loading so concurrent fetches of this key wait.
        state.lease(key, Intent::Write);
        state.touch(key);
        state.used += size;
        state.stats.peak_used = state.stats.peak_used.max(state.used);
        drop(state);
        trace!(%key, ?intent, "block cache miss");

        if intent != Intent::Write {
            let decoded = {
                let mut data = slot.write().unwrap_or_else(PoisonError::into_inner);
                self.codec.decode(key, &layout, &mut data)
            };
            if let Err(err) = decoded {
                let mut state = self.lock();
                state.release(key, true);
                state.remove(key);
                drop(state);
                self.released.notify_all();
                debug!(%key, error = %err, "block decode failed");
                return Err(err);
            }
        }

        if intent == Intent::Read {
            let mut state = self.lock();
            state.release(key, true);
            state.lease(key, Intent::Read);
            drop(state);
            // Other readers may now share the block.
            self.released.notify_all();
        }

        Ok(BlockHandle::new(self, key, slot, intent.is_exclusive()))
    }

    /// Evicts until `needed` more bytes fit, applying the overrun policy when
    /// every remaining block is leased.
    fn make_room(&self, state: &mut StoreState, needed: usize) -> Result<()> {
        if self.evict_until(state, needed)? {
            return Ok(());
        }
        match self.overrun {
            OverrunPolicy::Soft => {
                state.stats.overruns += 1;
                warn!(
                    used = %format_bytes(state.used),
                    needed = %format_bytes(needed),
                    budget = %format_bytes(state.budget),
                    "block cache over budget, all cached blocks are leased"
                );
                Ok(())
            }
            OverrunPolicy::Strict => Err(Error::OutOfMemory {
                requested: needed,
                budget: state.budget,
            }),
        }
    }

    /// Evicts LRU unleased blocks until `used + needed <= budget`.
    /// Returns `false` if that could not be reached.
    fn evict_until(&self, state: &mut StoreState, needed: usize) -> Result<bool> {
        while state.used + needed > state.budget {
            let Some(key) = state.oldest_unleased() else {
                return Ok(false);
            };
            self.evict(state, key)?;
        }
        Ok(true)
    }

    /// Writes back (if dirty) and drops one unleased block.
    fn evict(&self, state: &mut StoreState, key: BlockKey) -> Result<()> {
        let dirty = state.blocks.get(&key).is_some_and(|e| e.dirty);
        if dirty {
            self.write_back(state, key)?;
        }
        if state.remove(key).is_some() {
            state.stats.evictions += 1;
            debug!(%key, dirty, used = state.used, "evicted block");
        }
        Ok(())
    }

    /// Encodes a dirty, unleased block while the store lock is held.
    fn write_back(&self, state: &mut StoreState, key: BlockKey) -> Result<()> {
        let layout = *self.layout(key.band)?;
        let Some(entry) = state.blocks.get_mut(&key) else {
            return Ok(());
        };
        {
            let data = entry.slot.read().unwrap_or_else(PoisonError::into_inner);
            self.codec.encode(key, &layout, &data)?;
        }
        entry.dirty = false;
        state.stats.flushes += 1;
        Ok(())
    }

    /// Marks the block behind `handle` dirty.
    pub fn mark_dirty(&self, handle: &BlockHandle<'_>) -> Result<()> {
        handle.mark_dirty()
    }

    /// Writes every dirty block of `band` (or of all bands when `None`) back
    /// through the codec, in address order.
    ///
    /// Every block is attempted; the first error is returned afterwards.
    /// Returns [`Error::Cancelled`] if `progress` asks to stop. Flushing a
    /// clean store does nothing.
    pub fn flush(&self, band: Option<usize>, progress: &dyn ProgressSink) -> Result<()> {
        let mut keys: Vec<BlockKey> = {
            let state = self.lock();
            state
                .blocks
                .iter()
                .filter(|(k, e)| e.dirty && band.is_none_or(|b| k.band == b))
                .map(|(k, _)| *k)
                .collect()
        };
        keys.sort_unstable();

        let total = keys.len();
        let mut first_error = None;
        let mut flushed = 0usize;

        for (i, key) in keys.into_iter().enumerate() {
            match self.flush_block(key) {
                Ok(true) => flushed += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(%key, error = %err, "block flush failed");
                    first_error.get_or_insert(err);
                }
            }
            if !progress.report((i + 1) as f64 / total as f64, "flushing blocks") {
                return Err(first_error.unwrap_or(Error::Cancelled));
            }
        }

        if flushed > 0 {
            debug!(?band, flushed, "flushed dirty blocks");
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Flushes every dirty block of every band.
    pub fn flush_all(&self, progress: &dyn ProgressSink) -> Result<()> {
        self.flush(None, progress)
    }

    /// Asks the codec to make written blocks durable.
    pub fn sync(&self) -> Result<()> {
        self.codec.sync()
    }

    /// Encodes one block if still dirty, holding a shared lease meanwhile.
    fn flush_block(&self, key: BlockKey) -> Result<bool> {
        let layout = *self.layout(key.band)?;
        let mut state = self.lock();
        let slot = loop {
            let ready = match state.blocks.get(&key) {
                None => return Ok(false),
                Some(e) if !e.dirty => return Ok(false),
                Some(e) if e.admits(Intent::Read) => Some(Arc::clone(&e.slot)),
                Some(_) => None,
            };
            if let Some(slot) = ready {
                break slot;
            }
            state = self.released.wait(state).unwrap_or_else(PoisonError::into_inner);
        };
        state.lease(key, Intent::Read);
        drop(state);

        let result = {
            let data = slot.read().unwrap_or_else(PoisonError::into_inner);
            self.codec.encode(key, &layout, &data)
        };

        let mut state = self.lock();
        state.release(key, false);
        if result.is_ok() {
            if let Some(entry) = state.blocks.get_mut(&key) {
                entry.dirty = false;
            }
            state.stats.flushes += 1;
        }
        drop(state);
        self.released.notify_all();
        result.map(|()| true)
    }

    /// Writes back (if dirty) and evicts the least recently used unleased
    /// block. Returns `false` when no block could be evicted.
    pub fn flush_one_block(&self) -> Result<bool> {
        let mut state = self.lock();
        let Some(key) = state.oldest_unleased() else {
            return Ok(false);
        };
        self.evict(&mut state, key)?;
        Ok(true)
    }

    /// Changes the budget and evicts unleased blocks down to it.
    pub fn set_budget(&self, budget: usize) -> Result<()> {
        let mut state = self.lock();
        state.budget = budget;
        debug!(budget = %format_bytes(budget), "block cache budget changed");
        self.evict_until(&mut state, 0).map(|_| ())
    }

    /// Current budget in bytes.
    pub fn budget(&self) -> usize {
        self.lock().budget
    }

    /// What happens when every cached block is leased and the budget is full.
    pub fn overrun(&self) -> OverrunPolicy {
        self.overrun
    }

    /// Bytes held by cached blocks.
    pub fn used(&self) -> usize {
        self.lock().used
    }

    /// Snapshot of cache counters.
    pub fn stats(&self) -> CacheStats {
        self.lock().stats.clone()
    }

    /// Number of live leases.
    pub fn outstanding_leases(&self) -> usize {
        self.lock().leases
    }

    /// Number of cached blocks.
    pub fn block_count(&self) -> usize {
        self.lock().blocks.len()
    }

    /// Whether block `key` is cached.
    pub fn is_cached(&self, key: BlockKey) -> bool {
        self.lock().blocks.contains_key(&key)
    }

    /// Whether block `key` is cached and dirty.
    pub fn is_dirty(&self, key: BlockKey) -> bool {
        self.lock().blocks.get(&key).is_some_and(|e| e.dirty)
    }

    /// Whether any cached block is dirty.
    pub fn has_dirty(&self) -> bool {
        self.lock().blocks.values().any(|e| e.dirty)
    }
}

/// Scoped lease on one cached block. Dropping it releases the lease.
pub struct BlockHandle<'a> {
    store: &'a BlockStore,
    key: BlockKey,
    slot: Slot,
    exclusive: bool,
}

impl<'a> BlockHandle<'a> {
    fn new(store: &'a BlockStore, key: BlockKey, slot: Slot, exclusive: bool) -> Self {
        Self { store, key, slot, exclusive }
    }

    /// Address of the leased block.
    pub fn key(&self) -> BlockKey {
        self.key
    }

    /// Whether the lease is exclusive.
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// Read access to the block's samples.
    pub fn data(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write access; fails on a shared lease.
    pub fn data_mut(&self) -> Result<RwLockWriteGuard<'_, Vec<u8>>> {
        if !self.exclusive {
            return Err(Error::invalid_argument(format!(
                "{} is leased for reading only",
                self.key
            )));
        }
        Ok(self.slot.write().unwrap_or_else(PoisonError::into_inner))
    }

    /// Flags the block for write-back before eviction; fails on a shared
    /// lease.
    pub fn mark_dirty(&self) -> Result<()> {
        if !self.exclusive {
            return Err(Error::invalid_argument(format!(
                "{} is leased for reading only",
                self.key
            )));
        }
        let mut state = self.store.lock();
        if let Some(entry) = state.blocks.get_mut(&self.key) {
            entry.dirty = true;
        }
        Ok(())
    }
}

impl fmt::Debug for BlockHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockHandle")
            .field("key", &self.key)
            .field("exclusive", &self.exclusive)
            .finish()
    }
}

impl Drop for BlockHandle<'_> {
    fn drop(&mut self) {
        let mut state = self.store.lock();
        state.release(self.key, self.exclusive);
        drop(state);
        self.store.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemCodec;
    use crate::progress::NoProgress;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn layout() -> BandLayout {
        BandLayout::new(DataType::Byte, 16, 16, 8, 8)
    }

    fn store_with_budget(budget: usize) -> (Arc<MemCodec>, BlockStore) {
        let codec = Arc::new(MemCodec::new(&[layout()]).unwrap());
        let config = CacheConfig::default().with_budget(budget);
        let store = BlockStore::new(codec.clone(), vec![layout()], config);
        (codec, store)
    }

    /// Codec that counts calls and can be told to fail.
    #[derive(Debug, Default)]
    struct CountingCodec {
        decodes: AtomicUsize,
        encodes: AtomicUsize,
        fail_decode: bool,
    }

    impl BlockCodec for CountingCodec {
        fn decode(&self, key: BlockKey, _: &BandLayout, buf: &mut [u8]) -> Result<()> {
            self.decodes.fetch_add(1, Ordering::SeqCst);
            if self.fail_decode {
                return Err(Error::decode(format!("cannot read {key}")));
            }
            buf.fill(key.x as u8 + 10 * key.y as u8);
            Ok(())
        }

        fn encode(&self, _: BlockKey, _: &BandLayout, _: &[u8]) -> Result<()> {
            self.encodes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn miss_then_hit() {
        let codec = Arc::new(CountingCodec::default());
        let store = BlockStore::new(codec.clone(), vec![layout()], CacheConfig::default());
        {
            let h = store.fetch(BlockKey::new(0, 1, 0), Intent::Read).unwrap();
            assert!(h.data().iter().all(|&v| v == 1));
        }
        let _h = store.fetch(BlockKey::new(0, 1, 0), Intent::Read).unwrap();
        assert_eq!(codec.decodes.load(Ordering::SeqCst), 1);
        let stats = store.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert_eq!(store.used(), 64);
    }

    #[test]
    fn pure_write_skips_decode() {
        let codec = Arc::new(CountingCodec::default());
        let store = BlockStore::new(codec.clone(), vec![layout()], CacheConfig::default());
        let h = store.fetch(BlockKey::new(0, 0, 0), Intent::Write).unwrap();
        assert!(h.data().iter().all(|&v| v == 0));
        drop(h);
        let _h = store.fetch(BlockKey::new(0, 1, 1), Intent::ReadWrite).unwrap();
        assert_eq!(codec.decodes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn decode_failure_leaves_nothing_behind() {
        let codec = Arc::new(CountingCodec { fail_decode: true, ..Default::default() });
        let store = BlockStore::new(codec, vec![layout()], CacheConfig::default());
        let err = store.fetch(BlockKey::new(0, 0, 0), Intent::Read).unwrap_err();
        assert!(err.is_io_error());
        assert_eq!(store.block_count(), 0);
        assert_eq!(store.used(), 0);
        assert_eq!(store.outstanding_leases(), 0);
    }

    #[test]
    fn shared_read_leases() {
        let (_, store) = store_with_budget(1 << 20);
        let a = store.fetch(BlockKey::new(0, 0, 0), Intent::Read).unwrap();
        let b = store.fetch(BlockKey::new(0, 0, 0), Intent::Read).unwrap();
        assert_eq!(store.outstanding_leases(), 2);
        assert!(a.data_mut().is_err());
        drop((a, b));
        assert_eq!(store.outstanding_leases(), 0);
    }

    #[test]
    fn dirty_block_flushed_before_eviction() {
        let codec = Arc::new(CountingCodec::default());
        let config = CacheConfig::default().with_budget(64);
        let store = BlockStore::new(codec.clone(), vec![layout()], config);
        {
            let h = store.fetch(BlockKey::new(0, 0, 0), Intent::Write).unwrap();
            h.data_mut().unwrap().fill(9);
            h.mark_dirty().unwrap();
        }
        let _h = store.fetch(BlockKey::new(0, 1, 0), Intent::Read).unwrap();
        assert_eq!(codec.encodes.load(Ordering::SeqCst), 1);
        assert!(!store.is_cached(BlockKey::new(0, 0, 0)));
        assert_eq!(store.stats().evictions, 1);
    }

    #[test]
    fn evicted_data_survives_in_codec() {
        let (_, store) = store_with_budget(64);
        {
            let h = store.fetch(BlockKey::new(0, 0, 0), Intent::Write).unwrap();
            h.data_mut().unwrap().fill(42);
            h.mark_dirty().unwrap();
        }
        drop(store.fetch(BlockKey::new(0, 1, 1), Intent::Read).unwrap());
        let h = store.fetch(BlockKey::new(0, 0, 0), Intent::Read).unwrap();
        assert!(h.data().iter().all(|&v| v == 42));
    }

    #[test]
    fn soft_overrun_when_all_leased() {
        let (_, store) = store_with_budget(64);
        let a = store.fetch(BlockKey::new(0, 0, 0), Intent::Read).unwrap();
        let b = store.fetch(BlockKey::new(0, 1, 0), Intent::Read).unwrap();
        assert_eq!(store.used(), 128);
        assert_eq!(store.stats().overruns, 1);
        drop((a, b));
        drop(store.fetch(BlockKey::new(0, 0, 1), Intent::Read).unwrap());
        assert!(store.used() <= store.budget());
    }

    #[test]
    fn strict_overrun_fails() {
        let codec = Arc::new(MemCodec::new(&[layout()]).unwrap());
        let config = CacheConfig::default()
            .with_budget(64)
            .with_overrun(OverrunPolicy::Strict);
        let store = BlockStore::new(codec, vec![layout()], config);
        let _a = store.fetch(BlockKey::new(0, 0, 0), Intent::Read).unwrap();
        let err = store.fetch(BlockKey::new(0, 1, 0), Intent::Read).unwrap_err();
        assert!(matches!(err, Error::OutOfMemory { requested: 64, budget: 64 }));
        assert_eq!(store.outstanding_leases(), 1);
    }

    #[test]
    fn shared_lease_cannot_dirty() {
        let (_, store) = store_with_budget(1 << 20);
        let h = store.fetch(BlockKey::new(0, 0, 0), Intent::Read).unwrap();
        assert!(h.mark_dirty().unwrap_err().is_invalid_argument());
        assert!(store.mark_dirty(&h).is_err());
        drop(h);
        assert!(!store.is_dirty(BlockKey::new(0, 0, 0)));
        assert!(!store.has_dirty());
    }

    #[test]
    fn flush_is_idempotent() {
        let codec = Arc::new(CountingCodec::default());
        let store = BlockStore::new(codec.clone(), vec![layout()], CacheConfig::default());
        for x in 0..2 {
            let h = store.fetch(BlockKey::new(0, x, 0), Intent::Write).unwrap();
            h.mark_dirty().unwrap();
        }
        store.flush_all(&NoProgress).unwrap();
        store.flush_all(&NoProgress).unwrap();
        assert_eq!(codec.encodes.load(Ordering::SeqCst), 2);
        assert!(!store.has_dirty());
        assert_eq!(store.block_count(), 2);
    }

    #[test]
    fn flush_cancel() {
        let (_, store) = store_with_budget(1 << 20);
        for x in 0..2 {
            store.fetch(BlockKey::new(0, x, 0), Intent::Write).unwrap().mark_dirty().unwrap();
        }
        let stop = |_: f64, _: &str| false;
        assert!(store.flush_all(&stop).unwrap_err().is_cancelled());
        assert_eq!(store.outstanding_leases(), 0);
        assert!(store.has_dirty());
    }

    #[test]
    fn flush_one_and_set_budget() {
        let (_, store) = store_with_budget(1 << 20);
        for y in 0..2 {
            for x in 0..2 {
                drop(store.fetch(BlockKey::new(0, x, y), Intent::Read).unwrap());
            }
        }
        assert!(store.flush_one_block().unwrap());
        assert!(!store.is_cached(BlockKey::new(0, 0, 0)));
        store.set_budget(64).unwrap();
        assert_eq!(store.block_count(), 1);
        assert!(store.is_cached(BlockKey::new(0, 1, 1)));
        store.set_budget(0).unwrap();
        assert!(!store.flush_one_block().unwrap());
    }

    #[test]
    fn rejects_bad_keys() {
        let (_, store) = store_with_budget(1 << 20);
        assert!(store.fetch(BlockKey::new(1, 0, 0), Intent::Read).is_err());
        assert!(store.fetch(BlockKey::new(0, 2, 0), Intent::Read).is_err());
    }

    #[test]
    fn writer_waits_for_reader() {
        let (_, store) = store_with_budget(1 << 20);
        let reader = store.fetch(BlockKey::new(0, 0, 0), Intent::Read).unwrap();
        std::thread::scope(|s| {
            let t = s.spawn(|| {
                let h = store.fetch(BlockKey::new(0, 0, 0), Intent::Write).unwrap();
                h.data_mut().unwrap().fill(5);
            });
            std::thread::sleep(std::time::Duration::from_millis(20));
            assert!(reader.data().iter().all(|&v| v == 0));
            drop(reader);
            t.join().unwrap();
        });
        let h = store.fetch(BlockKey::new(0, 0, 0), Intent::Read).unwrap();
        assert!(h.data().iter().all(|&v| v == 5));
    }
}
