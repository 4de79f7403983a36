//! Access to various system registers.

use core::arch::asm;

use bitflags::bitflags;

bitflags! {
    /// Flags for the `sstatus` register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SstatusFlags: u64 {
        /// S-Mode interrupt enable.
        const SIE = 1 << 1;
        /// S-Mode previous interrupt enable.
        const SPIE = 1 << 5;
        /// U-Mode big endian memory access.
        const UBE = 1 << 6;
        /// S-Mode previous privilege level.
        const SPP = 1 << 8;
        /// Permit S-Mode user memory access.
        const SUM = 1 << 18;
        /// Make executable readable.
        const MXR = 1 << 19;
        /// Dirty state presence.
        const SD = 1 << 63;
    }
}

/// The `sstatus` register keeps track of the processor’s current operating state.
#[derive(Debug)]
pub struct Sstatus;

impl Sstatus {
    /// Reads the content of `sstatus`.
    #[inline]
    pub fn read() -> SstatusFlags {
        SstatusFlags::from_bits_truncate(Self::read_raw())
    }

    /// Reads the raw content of `sstatus`.
    #[inline]
    pub fn read_raw() -> u64 {
        let value: u64;
        unsafe {
            asm!("csrr {}, sstatus", out(reg) value, options(nomem));
        }
        value
    }

    /// Sets the specified flags to `sstatus`.
    ///
    /// ## Safety
    ///
    /// This function is unsafe because it's possible to violate memory safety through it.
    #[inline]
    pub unsafe fn set(flags: SstatusFlags) {
        unsafe { asm!("csrs sstatus, {}", in(reg) flags.bits(), options(nostack)) };
    }

    /// Clears the specified flags from `sstatus`.
    ///
    /// ## Safety
    ///
    /// This function is unsafe because it's possible to violate memory safety through it.
    #[inline]
    pub unsafe fn clear(flags: SstatusFlags) {
        unsafe { asm!("csrc sstatus, {}", in(reg) flags.bits(), options(nostack)) };
    }

    /// Atomically sets the specified flags and returns the previous register content.
    ///
    /// ## Safety
    ///
    /// This function is unsafe because it's possible to violate memory safety through it.
    #[inline]
    pub unsafe fn read_and_set(flags: SstatusFlags) -> SstatusFlags {
        let prev: u64;
        unsafe {
            asm!("csrrs {}, sstatus, {}", out(reg) prev, in(reg) flags.bits(), options(nostack));
        }
        SstatusFlags::from_bits_truncate(prev)
    }

    /// Atomically clears the specified flags and returns the previous register content.
    ///
    /// ## Safety
    ///
    /// This function is unsafe because it's possible to violate memory safety through it.
    #[inline]
    pub unsafe fn read_and_clear(flags: SstatusFlags) -> SstatusFlags {
        let prev: u64;
        unsafe {
            asm!("csrrc {}, sstatus, {}", out(reg) prev, in(reg) flags.bits(), options(nostack));
        }
        SstatusFlags::from_bits_truncate(prev)
    }
}

bitflags! {
    /// Flags for the `sie`/`sip` registers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SiFlags: u64 {
        /// S-Mode software interrupt enable.
        const SSIE = 1 << 1;
        /// S-Mode timer interrupt enable.
        const STIE = 1 << 5;
        /// S-Mode external interrupt enable.
        const SEIE = 1 << 9;
    }
}

/// The `sie` register contains interrupt enable bits.
#[derive(Debug)]
pub struct Sie;

impl Sie {
    /// Reads the content of `sie`.
    #[inline]
    pub fn read() -> SiFlags {
        SiFlags::from_bits_truncate(Self::read_raw())
    }

    /// Reads the raw content of `sie`.
    #[inline]
    pub fn read_raw() -> u64 {
        let value: u64;
        unsafe {
            asm!("csrr {}, sie", out(reg) value, options(nomem));
        }
        value
    }

    /// Writes flags to `sie`.
    #[inline]
    pub fn write(flags: SiFlags) {
        unsafe { asm!("csrw sie, {}", in(reg) flags.bits(), options(nostack)) };
    }

    /// Sets the specified flags to `sie`.
    #[inline]
    pub fn set(flags: SiFlags) {
        unsafe { asm!("csrs sie, {}", in(reg) flags.bits(), options(nostack)) };
    }

    /// Clears the specified flags from `sie`.
    #[inline]
    pub fn clear(flags: SiFlags) {
        unsafe { asm!("csrc sie, {}", in(reg) flags.bits(), options(nostack)) };
    }
}

/// The `sip` register contains interrupt pending bits.
#[derive(Debug)]
pub struct Sip;

impl Sip {
    /// Reads the content of `sip`.
    #[inline]
    pub fn read() -> SiFlags {
        SiFlags::from_bits_truncate(Self::read_raw())
    }

    /// Reads the raw content of `sip`.
    #[inline]
    pub fn read_raw() -> u64 {
        let value: u64;
        unsafe {
            asm!("csrr {}, sip", out(reg) value, options(nomem));
        }
        value
    }
}

/// The `stvec` register holds trap vector configuration.
#[derive(Debug)]
pub struct Stvec;

impl Stvec {
    /// Reads the content of `stvec`.
    #[inline]
    pub fn read() -> u64 {
        let value: u64;
        unsafe {
            asm!("csrr {}, stvec", out(reg) value, options(nomem));
        }
        value
    }

    /// Writes to `stvec`.
    #[inline]
    pub fn write(v: u64) {
        unsafe { asm!("csrw stvec, {}", in(reg) v, options(nostack)) };
    }
}

/// The `stval` register holds exception-specific information to assist software in handling a trap.
#[derive(Debug)]
pub struct Stval;

impl Stval {
    /// Reads the content of `stval`.
    #[inline]
    pub fn read() -> u64 {
        let value: u64;
        unsafe {
            asm!("csrr {}, stval", out(reg) value, options(nomem));
        }
        value
    }
}

/// The `time` register is a read-only shadow of the memory-mapped real-time counter.
#[derive(Debug)]
pub struct Time;

impl Time {
    /// Reads the content of `time`.
    #[inline]
    pub fn read() -> u64 {
        let value: u64;
        unsafe {
            asm!("csrr {}, time", out(reg) value, options(nomem));
        }
        value
    }
}
