//! Goldfish RTC driver.
//!
//! A read-only 64-bit nanosecond clock, exposed as a serial-class device
//! that delivers 8-byte timestamps.

use alloc::sync::Arc;

use crate::config::RTC_BASE;
use crate::device::{self, Device, SerialDev};
use crate::error::Result;
use crate::mmio::RO;

#[repr(C)]
struct RegisterBlock {
    time_low: RO<u32>, // reading latches time_high
    time_high: RO<u32>,
}

/// The Goldfish real-time clock.
pub struct Rtc {
    regs: &'static RegisterBlock,
}

// SAFETY: the register block is read-only.
unsafe impl Send for Rtc {}
unsafe impl Sync for Rtc {}

/// Registers the RTC.
pub fn attach() {
    let rtc = Arc::new(Rtc {
        // SAFETY: the board config names a real RTC register block.
        regs: unsafe { &*(RTC_BASE as *const RegisterBlock) },
    });

    device::register("rtc", Some(Device::Serial(rtc)));
}

impl Rtc {
    fn read_time(&self) -> u64 {
        // The low word must be read first; it latches the high word.
        let low = self.regs.time_low.read();
        let high = self.regs.time_high.read();

        (high as u64) << 32 | low as u64
    }
}

impl SerialDev for Rtc {
    fn block_size(&self) -> usize {
        8
    }

    fn open(self: Arc<Self>) -> Result<()> {
        Ok(())
    }

    fn close(&self) {}

    fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < 8 {
            return Ok(0);
        }

        buf[..8].copy_from_slice(&self.read_time().to_le_bytes());
        Ok(8)
    }
}
