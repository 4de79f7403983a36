//! Kernel heap.

use buddy_system_allocator::LockedHeap;

use crate::config;

#[global_allocator]
static HEAP: LockedHeap<32> = LockedHeap::empty();

/// Hands the fixed heap region to the allocator.
///
/// Must run before anything allocates, and only once.
pub fn init() {
    unsafe {
        HEAP.lock()
            .init(config::HEAP_START, config::HEAP_END - config::HEAP_START);
    }
}
