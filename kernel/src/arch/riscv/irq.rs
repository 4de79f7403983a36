//! Disables and enables interrupts on the current hart.

use riscv::registers::{Sstatus, SstatusFlags};

/// Enables interrupts for the current context.
pub fn enable() {
    // SAFETY: the trap vector is installed before anything enables interrupts
    unsafe { Sstatus::set(SstatusFlags::SIE) };
}

/// Disables interrupts for the current context.
pub fn disable() {
    unsafe { Sstatus::clear(SstatusFlags::SIE) };
}

/// Keeps interrupts disabled for its lifetime, restoring the previous enable
/// state on drop. Guards nest.
pub struct IrqGuard {
    was_enabled: bool,
}

impl IrqGuard {
    /// Disables interrupts, remembering whether they were enabled.
    pub fn new() -> Self {
        // SAFETY: clearing SIE only defers interrupt delivery
        let prev = unsafe { Sstatus::read_and_clear(SstatusFlags::SIE) };

        Self {
            was_enabled: prev.contains(SstatusFlags::SIE),
        }
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if self.was_enabled {
            enable();
        }
    }
}

/// Runs `f` with interrupts disabled.
pub fn with_disabled<R>(f: impl FnOnce() -> R) -> R {
    let _guard = IrqGuard::new();
    f()
}
