//! Board configuration for the QEMU `virt` machine.

#![allow(unused)]

/// PLIC register block.
pub const PLIC_BASE: usize = 0x0c00_0000;
/// Size of the PLIC register block.
pub const PLIC_SIZE: usize = 0x0060_0000;
/// Number of interrupt sources wired to the PLIC.
pub const PLIC_SRC_COUNT: u32 = 96;
/// Highest interrupt priority supported by the PLIC.
pub const PLIC_PRIO_MAX: u32 = 7;
/// Interrupt contexts exposed by the PLIC (hart 0 M-mode and S-mode).
pub const PLIC_CTX_COUNT: u32 = 2;

/// First UART register block.
pub const UART0_BASE: usize = 0x1000_0000;
/// Distance between consecutive UART register blocks.
pub const UART_STRIDE: usize = 0x100;
/// Interrupt source of UART 0; UART `i` uses `UART0_IRQ + i`.
pub const UART0_IRQ: u32 = 10;
/// Number of UARTs attached at boot; the virt board wires exactly one.
pub const UART_COUNT: usize = 1;

/// Goldfish RTC register block.
pub const RTC_BASE: usize = 0x0010_1000;

/// First VirtIO MMIO slot.
pub const VIRTIO_BASE: usize = 0x1000_1000;
/// Distance between consecutive VirtIO slots.
pub const VIRTIO_STRIDE: usize = 0x1000;
/// Interrupt source of VirtIO slot 0; slot `i` uses `VIRTIO0_IRQ + i`.
pub const VIRTIO0_IRQ: u32 = 1;
/// Number of VirtIO slots probed at boot.
pub const VIRTIO_COUNT: usize = 8;

/// End of physical RAM.
pub const RAM_END: usize = 0x8800_0000;

/// Real-time counter frequency in ticks per second.
pub const TIMER_FREQ: u64 = 10_000_000;

/// Load window for user executables.
pub const LOAD_BASE: u64 = 0x8010_0000;
/// End of the executable load window; the kernel heap starts here.
pub const LOAD_LIMIT: u64 = 0x8100_0000;

/// Kernel heap range.
pub const HEAP_START: usize = LOAD_LIMIT as usize;
/// End of the kernel heap.
pub const HEAP_END: usize = RAM_END;

/// Mount point of the primary storage device.
pub const MOUNT_NAME: &str = "c";
/// Device backing the primary mount.
pub const STORAGE_NAME: &str = "vioblk";
/// Instance of the device backing the primary mount.
pub const STORAGE_INSTANCE: u32 = 0;
/// Executable launched once the file system is mounted.
pub const INIT_EXE: &str = "init";
