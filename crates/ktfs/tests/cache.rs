mod common;

use common::{Counting, Faulty};
use ktfs::{Cache, Error, MemDisk, Storage, BLOCK_SIZE, CACHE_BLOCKS};

fn disk_cache(blocks: usize) -> Cache<Counting<MemDisk>> {
    Cache::new(Counting::new(MemDisk::new(blocks))).unwrap()
}

#[test]
fn rejects_foreign_block_sizes() {
    struct WideDisk;

    impl Storage for WideDisk {
        type Error = ();

        fn block_size(&self) -> usize {
            4096
        }

        fn fetch(&mut self, _: u64, _: &mut [u8]) -> Result<(), ()> {
            Ok(())
        }

        fn store(&mut self, _: u64, _: &[u8]) -> Result<(), ()> {
            Ok(())
        }
    }

    assert!(matches!(Cache::new(WideDisk), Err(Error::NotSupported)));
}

#[test]
fn rejects_misaligned_positions() {
    let mut cache = disk_cache(8);
    assert!(matches!(cache.get(1), Err(Error::Invalid)));
    assert!(matches!(cache.get(511), Err(Error::Invalid)));
    assert_eq!(cache.storage().fetches.get(), 0);
}

#[test]
fn repeated_get_hits_the_same_buffer() {
    let mut cache = disk_cache(8);

    let h = cache.get(0).unwrap();
    let first = cache.block(&h).as_ptr();
    cache.release(h, false);

    let h = cache.get(0).unwrap();
    assert_eq!(cache.block(&h).as_ptr(), first);
    cache.release(h, false);

    // One backing fetch serves both acquisitions.
    assert_eq!(cache.storage().fetches.get(), 1);
}

#[test]
fn release_dirty_then_flush_reaches_the_device() {
    let mut cache = disk_cache(8);

    let h = cache.get(0).unwrap();
    cache.block_mut(&h)[0] = 0xAA;
    cache.block_mut(&h)[1] = 0x55;
    cache.release(h, true);

    cache.flush().unwrap();

    let disk = cache.storage();
    assert_eq!(disk.inner.contents()[0], 0xAA);
    assert_eq!(disk.inner.contents()[1], 0x55);
    assert_eq!(disk.stores.get(), 1);

    // A second flush has nothing left to write.
    cache.flush().unwrap();
    assert_eq!(cache.storage().stores.get(), 1);
}

#[test]
fn flush_skips_pinned_blocks_and_reports_busy() {
    let mut cache = disk_cache(8);

    let pin = cache.get(0).unwrap();
    let h = cache.get(0).unwrap();
    cache.block_mut(&h)[0] = 0x42;
    cache.release(h, true);

    // Still pinned once: flush must not write it out.
    assert!(matches!(cache.flush(), Err(Error::Busy)));
    assert_eq!(cache.storage().stores.get(), 0);

    cache.release(pin, false);
    cache.flush().unwrap();
    assert_eq!(cache.storage().stores.get(), 1);
    assert_eq!(cache.storage().inner.contents()[0], 0x42);
}

#[test]
fn evicts_least_recently_acquired_when_full() {
    let mut cache = disk_cache(CACHE_BLOCKS + 2);

    for i in 0..CACHE_BLOCKS as u64 {
        let h = cache.get(i * BLOCK_SIZE as u64).unwrap();
        cache.release(h, false);
    }
    assert_eq!(cache.storage().fetches.get(), CACHE_BLOCKS);

    // Every slot is occupied; the next get evicts position 0...
    let h = cache.get(CACHE_BLOCKS as u64 * BLOCK_SIZE as u64).unwrap();
    cache.release(h, false);

    // ...so re-acquiring position 0 must go back to the device.
    let h = cache.get(0).unwrap();
    cache.release(h, false);

    assert_eq!(cache.storage().fetches.get(), CACHE_BLOCKS + 2);
}

#[test]
fn pinned_blocks_are_not_eviction_victims() {
    let mut cache = disk_cache(CACHE_BLOCKS + 2);

    // Pin position 0 (oldest stamp), fill the rest of the cache.
    let pinned = cache.get(0).unwrap();
    for i in 1..CACHE_BLOCKS as u64 {
        let h = cache.get(i * BLOCK_SIZE as u64).unwrap();
        cache.release(h, false);
    }

    // The eviction must pick the oldest *unpinned* slot (position 1*512).
    let h = cache.get(CACHE_BLOCKS as u64 * BLOCK_SIZE as u64).unwrap();
    cache.release(h, false);

    // Position 0 is still resident: no extra fetch.
    let before = cache.storage().fetches.get();
    let again = cache.get(0).unwrap();
    assert_eq!(cache.storage().fetches.get(), before);

    cache.release(again, false);
    cache.release(pinned, false);
}

#[test]
fn get_fails_busy_when_everything_is_pinned() {
    let mut cache = disk_cache(CACHE_BLOCKS + 2);

    let handles: Vec<_> = (0..CACHE_BLOCKS as u64)
        .map(|i| cache.get(i * BLOCK_SIZE as u64).unwrap())
        .collect();

    assert!(matches!(
        cache.get(CACHE_BLOCKS as u64 * BLOCK_SIZE as u64),
        Err(Error::Busy)
    ));

    for h in handles {
        cache.release(h, false);
    }
}

#[test]
fn evicting_a_dirty_block_writes_it_back_first() {
    let mut cache = disk_cache(CACHE_BLOCKS + 2);

    let h = cache.get(0).unwrap();
    cache.block_mut(&h)[7] = 0x99;
    cache.release(h, true);

    // Force position 0 out of the cache.
    for i in 1..=CACHE_BLOCKS as u64 {
        let h = cache.get(i * BLOCK_SIZE as u64).unwrap();
        cache.release(h, false);
    }

    assert_eq!(cache.storage().stores.get(), 1);
    assert_eq!(cache.storage().inner.contents()[7], 0x99);

    // And reading it again observes the written-back data.
    let h = cache.get(0).unwrap();
    assert_eq!(cache.block(&h)[7], 0x99);
    cache.release(h, false);
}

#[test]
fn fetch_failure_leaves_the_slot_invalid() {
    let mut cache = Cache::new(Faulty::new(MemDisk::new(8))).unwrap();

    cache.storage().fail_fetch.set(true);
    assert!(matches!(cache.get(0), Err(Error::Storage(_))));

    // Once the device recovers, the same position loads normally.
    cache.storage().fail_fetch.set(false);
    let h = cache.get(0).unwrap();
    cache.release(h, false);
}

#[test]
fn flush_aborts_on_device_error_and_retries_cleanly() {
    let mut cache = Cache::new(Faulty::new(MemDisk::new(8))).unwrap();

    for pos in [0, BLOCK_SIZE as u64] {
        let h = cache.get(pos).unwrap();
        cache.block_mut(&h)[0] = 1;
        cache.release(h, true);
    }

    cache.storage().fail_store.set(true);
    assert!(matches!(cache.flush(), Err(Error::Storage(_))));

    // Nothing was lost: the retry writes both blocks.
    cache.storage().fail_store.set(false);
    cache.flush().unwrap();
    assert_eq!(cache.storage().inner.contents()[0], 1);
    assert_eq!(cache.storage().inner.contents()[BLOCK_SIZE], 1);
}

#[test]
fn release_balances_pins() {
    let mut cache = disk_cache(8);

    // Pin the same block N times, release N times (one release dirty).
    let handles: Vec<_> = (0..5).map(|_| cache.get(0).unwrap()).collect();
    for (i, h) in handles.into_iter().enumerate() {
        cache.release(h, i == 0);
    }

    // The pin count is back to zero, so flush must not report Busy.
    cache.flush().unwrap();
    assert_eq!(cache.storage().stores.get(), 1);
}
