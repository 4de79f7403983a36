//! Polled console on UART 0.
//!
//! UART 0 is owned by the console and never runs in interrupt mode; the
//! remaining UARTs are driven by the ring-buffered serial driver.

use core::fmt::{self, Write};

use lazy_static::lazy_static;
use spin::Mutex;

use crate::config;
use crate::drivers::uart::{RegisterBlock, LCR_DLAB, LSR_DR, LSR_THRE};
use crate::error::Result;
use crate::uio::{Uio, UioOps};

/// Polled driver of the console UART.
struct Console {
    p: &'static RegisterBlock,
}

// SAFETY: register access is volatile and the console sits behind a mutex.
unsafe impl Send for Console {}

lazy_static! {
    static ref CONSOLE: Mutex<Console> = Mutex::new(Console::new(config::UART0_BASE));
}

impl Console {
    fn new(addr: usize) -> Self {
        Self {
            // SAFETY: the board config names a real UART register block.
            p: unsafe { &*(addr as *const RegisterBlock) },
        }
    }

    /// Programs the UART for polled operation.
    ///
    /// The baud rate divisor is set to 1, the fastest rate. On a virtualized
    /// board the actual rate does not matter.
    fn configure(&mut self) {
        unsafe {
            self.p.ier.write(0x00);
            self.p.lcr.write(LCR_DLAB);
            self.p.data.write(0x01); // DLL
            self.p.ier.write(0x00); // DLM
            self.p.lcr.write(0x00);
        }
    }

    /// Writes a single byte, spinning until the transmit register is free.
    fn put(&mut self, val: u8) {
        while self.p.lsr.read() & LSR_THRE == 0 {}
        unsafe { self.p.data.write(val) };
    }

    /// Returns the next received byte, or `None` if the Rx queue is empty.
    fn get(&mut self) -> Option<u8> {
        if self.p.lsr.read() & LSR_DR != 0 {
            Some(self.p.data.read())
        } else {
            None
        }
    }
}

impl Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for b in s.bytes() {
            self.put(b);
        }
        Ok(())
    }
}

/// Initializes the console hardware.
pub fn init() {
    CONSOLE.lock().configure();
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    CONSOLE.lock().write_fmt(args).unwrap();
}

/// Console endpoint exposed through the uniform I/O interface.
struct ConsoleUio;

impl UioOps for ConsoleUio {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut con = CONSOLE.lock();

        // Block for the first byte, then drain whatever else is pending.
        let mut n = 0;
        loop {
            match con.get() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                    if n == buf.len() {
                        break;
                    }
                }
                None if n > 0 => break,
                None => continue,
            }
        }

        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let mut con = CONSOLE.lock();
        for &b in buf {
            con.put(b);
        }
        Ok(buf.len())
    }
}

/// Opens a uniform I/O handle on the console.
pub fn uio() -> Uio {
    Uio::new(ConsoleUio)
}
