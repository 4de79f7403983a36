//! RISC-V platform primitives: boot entry, interrupt control, timekeeping,
//! trap handling, and the thread context switch.

use riscv::instructions::wfi;
use riscv::registers::{SiFlags, Sie, Sstatus, SstatusFlags};

pub mod entry;
pub mod irq;
pub mod switch;
pub mod time;
pub mod trap;

/// Halts execution on the current hart forever.
pub fn halt() -> ! {
    // Disable all interrupts.
    // SAFETY: we are halting, if something goes wrong, we don't care
    unsafe { Sstatus::clear(SstatusFlags::SIE) };
    Sie::clear(SiFlags::SSIE | SiFlags::STIE | SiFlags::SEIE);

    // Loop forever
    loop {
        wfi();
    }
}

/// Shuts the machine down, reporting success to the execution environment.
pub fn halt_success() -> ! {
    let _ = sbi::SystemReset::reset(sbi::ResetType::Shutdown, sbi::ResetReason::None);
    halt();
}

/// Shuts the machine down, reporting failure to the execution environment.
pub fn halt_failure() -> ! {
    let _ = sbi::SystemReset::reset(sbi::ResetType::Shutdown, sbi::ResetReason::SystemFailure);
    halt();
}
