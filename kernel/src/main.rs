//! tealos is an educational kernel for a single rv64 hart: cooperative
//! threads, PLIC-routed device interrupts, a VirtIO block device feeding a
//! write-back block cache, a read-only ktfs file system, and an ELF loader
//! that launches the init program with a console I/O handle.
//!
//! tealos is developed and tested using [QEMU](https://www.qemu.org/). It has
//! not been tested on real hardware and some things may thus not work as
//! expected.

#![no_std]
#![no_main]

extern crate alloc;

use alloc::boxed::Box;

/// Utility macros.
#[macro_use]
mod macros;

/// Architecture-specific functions.
mod arch;
/// Board configuration.
mod config;
/// Polled console.
mod console;
/// Device manager.
mod device;
/// Device and peripheral drivers.
mod drivers;
/// Error kinds.
mod error;
/// Mount table and file systems.
mod fs;
/// Kernel heap.
mod heap;
/// Interrupt manager.
mod intr;
/// Executable loading.
mod loader;
/// Memory-mapped I/O primitives.
mod mmio;
/// Panic support.
mod panic;
/// Thread manager.
mod thread;
/// Timer-driven sleeps.
mod timer;
/// Uniform I/O.
mod uio;

const TEALOS_ASCII_LOGO: &str = r#"
  _             _
 | |_ ___  __ _| | ___  ___
 | __/ _ \/ _` | |/ _ \/ __|
 | ||  __/ (_| | | (_) \__ \
  \__\___|\__,_|_|\___/|___/
"#;

/// Kernel entry point, called from the boot assembly with a valid stack.
#[no_mangle]
pub extern "C" fn kmain() -> ! {
    arch::riscv::entry::clear_bss();

    console::init();
    arch::riscv::trap::init();
    intr::init();
    heap::init();
    thread::init();
    timer::init();

    kprintln!("{}", TEALOS_ASCII_LOGO);

    let sbi_version = sbi::Base::get_spec_version();
    kprintln!("SBI spec version {}.{}", sbi_version.major, sbi_version.minor);

    attach_devices();

    arch::riscv::irq::enable();

    mount_cdrive();
    run_init();
}

fn attach_devices() {
    drivers::rtc::attach();

    for i in 0..config::UART_COUNT {
        drivers::uart::attach(i);
    }

    for i in 0..config::VIRTIO_COUNT {
        drivers::virtio::attach(
            config::VIRTIO_BASE + i * config::VIRTIO_STRIDE,
            config::VIRTIO0_IRQ + i as u32,
        );
    }
}

/// Opens the primary storage device and mounts the file system on it.
fn mount_cdrive() {
    let hd = match device::find_storage(config::STORAGE_NAME, config::STORAGE_INSTANCE) {
        Some(hd) => hd,
        None => {
            kprintln!(
                "storage device {}{} not found",
                config::STORAGE_NAME,
                config::STORAGE_INSTANCE
            );
            arch::riscv::halt_failure();
        }
    };

    if let Err(e) = hd.clone().open() {
        kprintln!(
            "opening {}{} failed: {}",
            config::STORAGE_NAME,
            config::STORAGE_INSTANCE,
            e
        );
        arch::riscv::halt_failure();
    }

    if let Err(e) = fs::KtfsVolume::mount(config::MOUNT_NAME, hd) {
        kprintln!("mounting {} failed: {}", config::MOUNT_NAME, e);
        arch::riscv::halt_failure();
    }
}

/// Loads and launches the init executable in its own thread, passing it a
/// console handle, and waits for it to finish.
fn run_init() -> ! {
    let spawned = thread::spawn("init", || {
        let exe = match fs::open_file(config::MOUNT_NAME, config::INIT_EXE) {
            Ok(exe) => exe,
            Err(e) => {
                kprintln!("{}: {}; terminating", config::INIT_EXE, e);
                arch::riscv::halt_failure();
            }
        };

        let entry = match loader::load(&exe) {
            Ok(entry) => entry,
            Err(e) => {
                kprintln!("loading {}: {}; terminating", config::INIT_EXE, e);
                arch::riscv::halt_failure();
            }
        };

        exe.close();

        kprintln!("launching {} at {:#x}", config::INIT_EXE, entry);

        // The init program owns its console handle; it is leaked to it on
        // purpose.
        let console = Box::into_raw(Box::new(console::uio()));

        // SAFETY: the loader validated that `entry` lies inside the window
        // the image was just placed in.
        let entry: extern "C" fn(*mut uio::Uio) = unsafe { core::mem::transmute(entry as usize) };
        entry(console);
    });

    if let Err(e) = spawned {
        kprintln!("spawning init: {}", e);
        arch::riscv::halt_failure();
    }

    if let Err(e) = thread::join(None) {
        kprintln!("waiting for init: {}", e);
        arch::riscv::halt_failure();
    }

    // The init program returned: flush state and shut down cleanly.
    fs::flush_all();
    thread::exit();
}
