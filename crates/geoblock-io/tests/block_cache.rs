//! Block cache budget, eviction and concurrency behaviour.

use std::sync::Arc;
use std::thread;

use approx::assert_relative_eq;
use geoblock_core::{DataType, Error, Window};
use geoblock_io::mem::MemCodec;
use geoblock_io::prelude::*;
use geoblock_io::{BandLayout, BlockKey, BlockStore, Intent, OverrunPolicy};

fn store(layout: BandLayout, config: CacheConfig) -> BlockStore {
    BlockStore::new(Arc::new(MemCodec::new(&[layout]).unwrap()), vec![layout], config)
}

#[test]
fn one_block_budget_evicts_on_every_miss() {
    let layout = BandLayout::new(DataType::Byte, 12, 4, 4, 4);
    let s = store(layout, CacheConfig::default().with_budget(layout.block_bytes()));

    for x in 0..3 {
        let handle = s.fetch(BlockKey::new(0, x, 0), Intent::Read).unwrap();
        drop(handle);
        assert!(s.used() <= s.budget());
    }
    let stats = s.stats();
    assert_eq!(stats.misses, 3);
    assert_eq!(stats.evictions, 2);
    assert_eq!(s.block_count(), 1);
    assert!(s.is_cached(BlockKey::new(0, 2, 0)));
}

#[test]
fn budget_below_one_block_still_serves_fetches() {
    let layout = BandLayout::new(DataType::Byte, 12, 4, 4, 4);
    assert_eq!(layout.block_bytes(), 16);
    let s = store(layout, CacheConfig::default().with_budget(8));

    for x in 0..3 {
        let handle = s.fetch(BlockKey::new(0, x, 0), Intent::Read).unwrap();
        assert_eq!(handle.data().len(), 16);
    }
    let stats = s.stats();
    assert!(stats.overruns > 0);
    assert_eq!(stats.evictions, 2);
    assert_eq!(s.block_count(), 1);
    assert_eq!(s.outstanding_leases(), 0);

    // A zero budget empties the cache and fetches keep working.
    s.set_budget(0).unwrap();
    assert_eq!(s.used(), 0);
    let handle = s.fetch(BlockKey::new(0, 0, 0), Intent::ReadWrite).unwrap();
    handle.data_mut().unwrap().fill(5);
    handle.mark_dirty().unwrap();
    drop(handle);
    drop(s.fetch(BlockKey::new(0, 1, 0), Intent::Read).unwrap());
    assert_eq!(s.outstanding_leases(), 0);
    assert!(s.fetch(BlockKey::new(0, 0, 0), Intent::Read).unwrap().data().iter().all(|&b| b == 5));
}

#[test]
fn evicted_dirty_block_is_written_back() {
    let layout = BandLayout::new(DataType::Byte, 8, 4, 4, 4);
    let s = store(layout, CacheConfig::default().with_budget(layout.block_bytes()));

    {
        let handle = s.fetch(BlockKey::new(0, 0, 0), Intent::Write).unwrap();
        handle.data_mut().unwrap().fill(7);
        handle.mark_dirty().unwrap();
    }
    // Loading the neighbour pushes the dirty block out.
    drop(s.fetch(BlockKey::new(0, 1, 0), Intent::Read).unwrap());
    assert!(!s.is_cached(BlockKey::new(0, 0, 0)));
    assert_eq!(s.stats().flushes, 1);

    let handle = s.fetch(BlockKey::new(0, 0, 0), Intent::Read).unwrap();
    assert!(handle.data().iter().all(|&b| b == 7));
}

#[test]
fn leased_blocks_overrun_softly() {
    let layout = BandLayout::new(DataType::Byte, 8, 4, 4, 4);
    let s = store(layout, CacheConfig::default().with_budget(layout.block_bytes()));

    let held = s.fetch(BlockKey::new(0, 0, 0), Intent::Read).unwrap();
    let other = s.fetch(BlockKey::new(0, 1, 0), Intent::Read).unwrap();
    assert_eq!(s.stats().overruns, 1);
    assert!(s.used() > s.budget());
    drop((held, other));

    // Re-applying the budget evicts the now unleased blocks.
    s.set_budget(layout.block_bytes()).unwrap();
    assert!(s.used() <= s.budget());
    assert_eq!(s.outstanding_leases(), 0);
}

#[test]
fn strict_policy_refuses_to_overrun() {
    let layout = BandLayout::new(DataType::Byte, 8, 4, 4, 4);
    let config = CacheConfig::default()
        .with_budget(layout.block_bytes())
        .with_overrun(OverrunPolicy::Strict);
    let s = store(layout, config);

    let _held = s.fetch(BlockKey::new(0, 0, 0), Intent::Read).unwrap();
    let err = s.fetch(BlockKey::new(0, 1, 0), Intent::Read).unwrap_err();
    assert!(matches!(err, Error::OutOfMemory { .. }));
    assert!(!s.is_cached(BlockKey::new(0, 1, 0)));
}

#[test]
fn shared_read_leases_coexist() {
    let layout = BandLayout::new(DataType::UInt16, 4, 4, 4, 4);
    let s = store(layout, CacheConfig::default());
    let a = s.fetch(BlockKey::new(0, 0, 0), Intent::Read).unwrap();
    let b = s.fetch(BlockKey::new(0, 0, 0), Intent::Read).unwrap();
    assert_eq!(s.outstanding_leases(), 2);
    assert!(!a.is_exclusive());
    assert!(b.data_mut().is_err());
}

#[test]
fn concurrent_readers_see_consistent_pixels() {
    let params = CreateParams::new(96, 96, 1, DataType::UInt32).with_block_size(16, 16);
    let registry = DriverRegistry::with_builtin_drivers();
    // Room for a handful of blocks so readers keep evicting each other.
    registry.set_config(CacheConfig::default().with_budget(4 * 16 * 16 * 4));
    let ds = registry.create("MEM", "concurrent", &params).unwrap();

    let values: Vec<u32> = (0..96 * 96).collect();
    ds.band(1).unwrap().write_from(&Window::full(96, 96), &values).unwrap();

    thread::scope(|scope| {
        for t in 0..4usize {
            let ds = &ds;
            scope.spawn(move || {
                let band = ds.band(1).unwrap();
                for i in 0..20usize {
                    let x = (t * 13 + i * 7) % 80;
                    let y = (t * 5 + i * 11) % 80;
                    let px: Vec<u32> = band.read_vec(&Window::new(x, y, 16, 16)).unwrap();
                    for (row, chunk) in px.chunks_exact(16).enumerate() {
                        let start = ((y + row) * 96 + x) as u32;
                        assert_eq!(chunk[0], start);
                        assert_eq!(chunk[15], start + 15);
                    }
                }
            });
        }
    });

    assert_eq!(ds.block_store().outstanding_leases(), 0);
    assert!(ds.cache_stats().evictions > 0);
}

#[test]
fn concurrent_writers_on_disjoint_rows() {
    let params = CreateParams::new(32, 32, 1, DataType::Int16).with_block_size(8, 8);
    let ds = DriverRegistry::with_builtin_drivers()
        .create("MEM", "writers", &params)
        .unwrap();

    thread::scope(|scope| {
        for t in 0..4usize {
            let ds = &ds;
            scope.spawn(move || {
                let band = ds.band(1).unwrap();
                let rows = vec![t as i16 + 1; 32 * 8];
                band.write_from(&Window::new(0, t * 8, 32, 8), &rows).unwrap();
            });
        }
    });

    let band = ds.band(1).unwrap();
    let stats = band.compute_statistics(false, &NoProgress).unwrap();
    assert_eq!(stats.min, 1.0);
    assert_eq!(stats.max, 4.0);
    assert_relative_eq!(stats.mean, 2.5);
    ds.flush_cache(&NoProgress).unwrap();
    assert!(!ds.block_store().has_dirty());
}
