//! Virtqueue rings.
//!
//! The three rings of a split virtqueue, allocated zeroed and handed to the
//! device by physical address (the kernel runs identity-mapped). Ring memory
//! is shared with a DMA peer: the device-written parts are only ever read
//! volatilely, and index publications are fenced.

use core::alloc::Layout;
use core::mem::size_of;
use core::ptr;

use riscv::instructions::fence;

/// A descriptor chain flag: the `next` field is valid.
pub const DESC_F_NEXT: u16 = 1;
/// The buffer is written by the device.
pub const DESC_F_WRITE: u16 = 2;

/// A buffer descriptor.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Desc {
    pub addr: u64,
    pub len: u32,
    pub flags: u16,
    pub next: u16,
}

#[repr(C)]
struct AvailHdr {
    flags: u16,
    idx: u16,
    // ring[len] follows
}

/// An entry of the used ring: the head descriptor of a retired chain and the
/// number of bytes the device wrote.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct UsedElem {
    pub id: u32,
    pub len: u32,
}

#[repr(C)]
struct UsedHdr {
    flags: u16,
    idx: u16,
    // ring[len] follows
}

/// A split virtqueue of fixed length.
pub struct Virtq {
    len: u16,
    desc: *mut Desc,
    avail: *mut AvailHdr,
    avail_ring: *mut u16,
    used: *const UsedHdr,
    used_ring: *const UsedElem,
}

// SAFETY: the raw pointers reference allocations owned by the queue.
unsafe impl Send for Virtq {}

impl Virtq {
    /// Allocates the descriptor table and both rings, zeroed.
    pub fn new(len: u16) -> Self {
        assert!(len > 0 && len.is_power_of_two());
        let n = len as usize;

        let desc = alloc_ring(size_of::<Desc>() * n) as *mut Desc;
        let avail =
            alloc_ring(size_of::<AvailHdr>() + size_of::<u16>() * n) as *mut AvailHdr;
        let used =
            alloc_ring(size_of::<UsedHdr>() + size_of::<UsedElem>() * n) as *mut UsedHdr;

        Self {
            len,
            desc,
            avail,
            // SAFETY: the flexible ring arrays start right after each header.
            avail_ring: unsafe { avail.add(1) as *mut u16 },
            used,
            used_ring: unsafe { used.add(1) as *const UsedElem },
        }
    }

    /// Queue length in descriptors.
    pub fn len(&self) -> u16 {
        self.len
    }

    /// Writes descriptor `index`.
    pub fn set_desc(&mut self, index: u16, desc: Desc) {
        assert!(index < self.len);
        // SAFETY: in-bounds slot of the descriptor table.
        unsafe { ptr::write_volatile(self.desc.add(index as usize), desc) };
    }

    /// Publishes a descriptor chain head on the available ring.
    pub fn push_avail(&mut self, head: u16) {
        // SAFETY: the available ring is driver-owned; the device only reads
        // entries below the published index.
        unsafe {
            let idx = ptr::read_volatile(ptr::addr_of!((*self.avail).idx));
            ptr::write_volatile(self.avail_ring.add(idx as usize % self.len as usize), head);
            fence();
            ptr::write_volatile(ptr::addr_of_mut!((*self.avail).idx), idx.wrapping_add(1));
        }
        fence();
    }

    /// The device's producer index on the used ring.
    pub fn used_idx(&self) -> u16 {
        // SAFETY: device-written header, read-only for us.
        unsafe { ptr::read_volatile(ptr::addr_of!((*self.used).idx)) }
    }

    /// Reads the used-ring entry for consumer position `seq`.
    pub fn used_elem(&self, seq: u16) -> UsedElem {
        // SAFETY: in-bounds slot of the used ring.
        unsafe { ptr::read_volatile(self.used_ring.add(seq as usize % self.len as usize)) }
    }

    /// Rewinds both ring indices; only valid while the queue is reset at the
    /// transport.
    pub fn reset_indices(&mut self) {
        // SAFETY: the device is not looking at a reset queue.
        unsafe {
            ptr::write_volatile(ptr::addr_of_mut!((*self.avail).idx), 0);
            ptr::write_volatile(ptr::addr_of_mut!((*(self.used as *mut UsedHdr)).idx), 0);
        }
    }

    /// Physical address of the descriptor table.
    pub fn desc_addr(&self) -> u64 {
        self.desc as u64
    }

    /// Physical address of the available ring.
    pub fn avail_addr(&self) -> u64 {
        self.avail as u64
    }

    /// Physical address of the used ring.
    pub fn used_addr(&self) -> u64 {
        self.used as u64
    }
}

/// Ring allocations are shared with the device and never freed; queues have
/// the same lifetime as the driver that owns them.
fn alloc_ring(size: usize) -> *mut u8 {
    let layout = Layout::from_size_align(size, 16).unwrap();

    // SAFETY: layout is valid and nonzero.
    let ptr = unsafe { alloc::alloc::alloc_zeroed(layout) };
    assert!(!ptr.is_null(), "virtqueue allocation failed");

    ptr
}
