use core::panic::PanicInfo;

/// Implements the kernel's panic behavior.
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    if crate::thread::initialized() {
        kprintln!(
            "Kernel panic in thread {}: {}",
            crate::thread::current_name(),
            info
        );
    } else {
        kprintln!("Kernel panic: {}", info);
    }

    kprintln!("Halting!");

    crate::arch::riscv::halt_failure();
}
