//! Fixed-capacity write-back block cache.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::error::Error;
use crate::layout::BLOCK_SIZE;

/// Number of blocks held by a cache.
pub const CACHE_BLOCKS: usize = 64;

/// A block-granular storage backend.
///
/// Positions passed to [`fetch`](Storage::fetch) and [`store`](Storage::store)
/// are block-aligned and the buffers are exactly one block long.
pub trait Storage {
    /// Error type reported by the device.
    type Error;

    /// Device block size in bytes.
    fn block_size(&self) -> usize;

    /// Reads one block at byte position `pos` into `buf`.
    fn fetch(&mut self, pos: u64, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Writes one block from `buf` at byte position `pos`.
    fn store(&mut self, pos: u64, buf: &[u8]) -> Result<(), Self::Error>;
}

struct Slot {
    pos: u64,
    last_used: u64,
    pins: u32,
    valid: bool,
    dirty: bool,
    data: Box<[u8; BLOCK_SIZE]>,
}

/// A pinned reference to a cached block.
///
/// The handle is not `Clone`: each successful [`Cache::get`] must be paired
/// with exactly one [`Cache::release`].
#[derive(Debug)]
pub struct BlockHandle {
    slot: usize,
}

/// Write-back block cache over a [`Storage`] backend.
///
/// Replacement is least-recently-acquired among unpinned slots: a block's
/// stamp is refreshed when it is handed out, not when it is released, so a
/// block held across a long operation does not appear older than a cold scan
/// that swept the cache in the meantime.
pub struct Cache<S> {
    storage: S,
    slots: Vec<Slot>,
    use_counter: u64,
}

impl<S: Storage> Cache<S> {
    /// Creates a cache over `storage`.
    ///
    /// The device block size must equal the cache block size.
    pub fn new(storage: S) -> Result<Self, Error<S::Error>> {
        if storage.block_size() != BLOCK_SIZE {
            return Err(Error::NotSupported);
        }

        let mut slots = Vec::with_capacity(CACHE_BLOCKS);
        for _ in 0..CACHE_BLOCKS {
            slots.push(Slot {
                pos: 0,
                last_used: 0,
                pins: 0,
                valid: false,
                dirty: false,
                data: Box::new([0u8; BLOCK_SIZE]),
            });
        }

        Ok(Self {
            storage,
            slots,
            use_counter: 0,
        })
    }

    /// Pins the block at byte position `pos` and returns a handle to it.
    ///
    /// `pos` must be block-aligned. On a miss, a victim slot is reloaded from
    /// the backing device, writing its previous contents back first if dirty.
    /// Fails with [`Error::Busy`] if every slot is pinned.
    pub fn get(&mut self, pos: u64) -> Result<BlockHandle, Error<S::Error>> {
        if pos % BLOCK_SIZE as u64 != 0 {
            return Err(Error::Invalid);
        }

        let slot = match self.lookup(pos) {
            Some(i) => i,
            None => self.load(pos)?,
        };

        self.slots[slot].pins += 1;
        self.use_counter += 1;
        self.slots[slot].last_used = self.use_counter;

        Ok(BlockHandle { slot })
    }

    /// Returns the cached bytes of a pinned block.
    pub fn block(&self, handle: &BlockHandle) -> &[u8; BLOCK_SIZE] {
        &self.slots[handle.slot].data
    }

    /// Returns the cached bytes of a pinned block for modification.
    ///
    /// The modification only reaches the backing device once the block is
    /// released dirty and written back.
    pub fn block_mut(&mut self, handle: &BlockHandle) -> &mut [u8; BLOCK_SIZE] {
        &mut self.slots[handle.slot].data
    }

    /// Unpins a block previously returned by [`Cache::get`].
    ///
    /// `dirty` marks the block as modified. The last-used stamp is not
    /// refreshed here; ordering is by acquire time.
    pub fn release(&mut self, handle: BlockHandle, dirty: bool) {
        let slot = &mut self.slots[handle.slot];

        if dirty {
            slot.dirty = true;
        }
        if slot.pins > 0 {
            slot.pins -= 1;
        }
    }

    /// Writes every dirty unpinned block back to the device.
    ///
    /// A pinned dirty block makes the call report [`Error::Busy`], but the
    /// walk continues so unpinned blocks are still cleaned. A device error
    /// aborts the walk.
    pub fn flush(&mut self) -> Result<(), Error<S::Error>> {
        let Self { storage, slots, .. } = self;
        let mut busy = false;

        for slot in slots.iter_mut() {
            if !slot.valid || !slot.dirty {
                continue;
            }

            if slot.pins != 0 {
                busy = true;
                continue;
            }

            storage
                .store(slot.pos, &slot.data[..])
                .map_err(Error::Storage)?;
            slot.dirty = false;
        }

        if busy {
            Err(Error::Busy)
        } else {
            Ok(())
        }
    }

    /// Returns the backing storage device.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn lookup(&self, pos: u64) -> Option<usize> {
        self.slots.iter().position(|s| s.valid && s.pos == pos)
    }

    /// Selects a victim slot and loads the block at `pos` into it.
    fn load(&mut self, pos: u64) -> Result<usize, Error<S::Error>> {
        let victim = self.pick_victim().ok_or(Error::Busy)?;

        let Self { storage, slots, .. } = self;
        let slot = &mut slots[victim];

        if slot.valid && slot.dirty {
            storage
                .store(slot.pos, &slot.data[..])
                .map_err(Error::Storage)?;
            slot.dirty = false;
        }

        if let Err(e) = storage.fetch(pos, &mut slot.data[..]) {
            slot.valid = false;
            slot.pins = 0;
            return Err(Error::Storage(e));
        }

        slot.pos = pos;
        slot.valid = true;
        slot.dirty = false;

        Ok(victim)
    }

    /// Prefers an invalid slot; otherwise the least-recently-acquired
    /// unpinned one. `None` if every slot is pinned.
    fn pick_victim(&self) -> Option<usize> {
        let mut victim: Option<usize> = None;

        for (i, slot) in self.slots.iter().enumerate() {
            if !slot.valid {
                return Some(i);
            }

            if slot.pins == 0
                && victim.map_or(true, |v| slot.last_used < self.slots[v].last_used)
            {
                victim = Some(i);
            }
        }

        victim
    }
}
