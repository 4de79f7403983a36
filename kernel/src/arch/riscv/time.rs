//! Access to the real-time counter.

/// Returns the number of ticks elapsed since boot.
pub fn ticks() -> u64 {
    riscv::registers::Time::read()
}
