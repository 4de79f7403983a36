//! NS8250-compatible serial port driver.
//!
//! Each UART carries a receive and a transmit ring buffer. The ISR moves
//! bytes between the rings and the hardware and masks its own interrupt
//! sources when there is nothing to move, so a full receive ring throttles
//! the device instead of spinning.

use alloc::boxed::Box;
use alloc::sync::Arc;

use spin::Mutex;

use crate::arch::riscv::irq::IrqGuard;
use crate::config::{UART0_BASE, UART0_IRQ, UART_STRIDE};
use crate::device::{self, Device, SerialDev};
use crate::error::{Error, Result};
use crate::intr;
use crate::mmio::{RO, RW};
use crate::thread::Condition;

const UART_INTR_PRIO: u32 = 1;
const RING_SIZE: usize = 64;

pub(crate) const IER_DRIE: u8 = 1 << 0;
pub(crate) const IER_THREIE: u8 = 1 << 1;
pub(crate) const LSR_DR: u8 = 1 << 0;
pub(crate) const LSR_OE: u8 = 1 << 1;
pub(crate) const LSR_THRE: u8 = 1 << 5;
pub(crate) const LCR_DLAB: u8 = 1 << 7;

/// The NS8250 register file, shared with the polled console on UART 0.
///
/// The driver only touches the data, interrupt-enable, line-control, and
/// line-status registers; the interrupt-identification, modem, and scratch
/// registers appear solely so every used register lands at its hardware
/// offset.
#[repr(C)]
pub(crate) struct RegisterBlock {
    /// RBR on read, THR on write, DLL with DLAB set.
    pub(crate) data: RW<u8>,
    /// Interrupt enable; DLM with DLAB set.
    pub(crate) ier: RW<u8>,
    _iir: RO<u8>,
    pub(crate) lcr: RW<u8>,
    _mcr: RO<u8>,
    pub(crate) lsr: RO<u8>,
    _msr: RO<u8>,
    _scratch: RO<u8>,
}

/// Fixed-size byte queue; positions wrap at `u16` width, so a full ring is
/// `tail - head == RING_SIZE`.
struct RingBuf {
    head: u16,
    tail: u16,
    data: [u8; RING_SIZE],
}

impl RingBuf {
    const fn new() -> Self {
        Self {
            head: 0,
            tail: 0,
            data: [0; RING_SIZE],
        }
    }

    fn reset(&mut self) {
        self.head = 0;
        self.tail = 0;
    }

    fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    fn is_full(&self) -> bool {
        self.tail.wrapping_sub(self.head) as usize == RING_SIZE
    }

    fn put(&mut self, b: u8) {
        self.data[self.tail as usize % RING_SIZE] = b;
        self.tail = self.tail.wrapping_add(1);
    }

    fn get(&mut self) -> u8 {
        let b = self.data[self.head as usize % RING_SIZE];
        self.head = self.head.wrapping_add(1);
        b
    }
}

struct UartState {
    opened: bool,
    rx: RingBuf,
    tx: RingBuf,
    /// Number of receiver overruns reported by the hardware.
    overruns: u64,
}

/// A ring-buffered, interrupt-driven UART.
pub struct Uart {
    regs: &'static RegisterBlock,
    irqno: u32,
    state: Mutex<UartState>,
    rx_not_empty: Condition,
    tx_not_full: Condition,
}

// SAFETY: register access is volatile and the mutable state sits behind the
// spin mutex, which is only taken with interrupts disabled.
unsafe impl Send for Uart {}
unsafe impl Sync for Uart {}

/// Probes and registers UART `index`.
///
/// UART 0 is used for the console and is not attached as a normal device; it
/// still registers to reserve the `uart0` name, but lookups return nothing.
pub fn attach(index: usize) {
    if index == 0 {
        device::register("uart", None);
        return;
    }

    let base = UART0_BASE + index * UART_STRIDE;
    let uart = Arc::new(Uart {
        // SAFETY: the board config names a real UART register block.
        regs: unsafe { &*(base as *const RegisterBlock) },
        irqno: UART0_IRQ + index as u32,
        state: Mutex::new(UartState {
            opened: false,
            rx: RingBuf::new(),
            tx: RingBuf::new(),
            overruns: 0,
        }),
        rx_not_empty: Condition::new("uart.rxnotempty"),
        tx_not_full: Condition::new("uart.txnotfull"),
    });

    // Program the divisor latch and leave all interrupts masked; the ISR is
    // registered when the device is opened.
    unsafe {
        uart.regs.ier.write(0x00);
        uart.regs.lcr.write(LCR_DLAB);
        uart.regs.data.write(0x01); // DLL
        uart.regs.ier.write(0x00); // DLM
        uart.regs.lcr.write(0x00);
    }

    device::register("uart", Some(Device::Serial(uart)));
}

impl Uart {
    fn isr(&self) {
        let lsr = self.regs.lsr.read();
        let mut st = self.state.lock();

        if lsr & LSR_OE != 0 {
            st.overruns += 1;
        }

        if lsr & LSR_DR != 0 {
            if !st.rx.is_full() {
                st.rx.put(self.regs.data.read());
                self.rx_not_empty.broadcast();
            } else {
                // Throttle until a reader makes room.
                unsafe { self.regs.ier.write(self.regs.ier.read() & !IER_DRIE) };
            }
        }

        if lsr & LSR_THRE != 0 {
            if !st.tx.is_empty() {
                let b = st.tx.get();
                unsafe { self.regs.data.write(b) };
                self.tx_not_full.broadcast();
            } else {
                unsafe { self.regs.ier.write(self.regs.ier.read() & !IER_THREIE) };
            }
        }
    }
}

impl SerialDev for Uart {
    fn open(self: Arc<Self>) -> Result<()> {
        {
            let _guard = IrqGuard::new();
            let mut st = self.state.lock();

            if st.opened {
                return Err(Error::Busy);
            }

            st.rx.reset();
            st.tx.reset();

            // Flush any stale byte out of the receive register, then enable
            // data-ready interrupts.
            let _ = self.regs.data.read();
            unsafe { self.regs.ier.write(IER_DRIE) };

            st.opened = true;
        }

        let dev = self.clone();
        intr::enable_source(
            self.irqno,
            UART_INTR_PRIO,
            Box::new(move |_| dev.isr()),
        );

        Ok(())
    }

    fn close(&self) {
        let overruns;
        {
            let _guard = IrqGuard::new();
            let mut st = self.state.lock();

            if !st.opened {
                return;
            }

            unsafe { self.regs.ier.write(0x00) };
            st.opened = false;
            overruns = st.overruns;
        }

        intr::disable_source(self.irqno);

        if overruns > 0 {
            kprintln!("uart: {} receiver overruns", overruns);
        }

        // Release anyone parked on the rings.
        self.rx_not_empty.broadcast();
        self.tx_not_full.broadcast();
    }

    fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let _guard = IrqGuard::new();

        loop {
            let mut st = self.state.lock();

            if !st.opened {
                return Err(Error::Invalid);
            }

            if !st.rx.is_empty() {
                let mut n = 0;
                while n < buf.len() && !st.rx.is_empty() {
                    buf[n] = st.rx.get();
                    n += 1;
                }
                return Ok(n);
            }

            // Ring is empty: make sure receive interrupts are live, then
            // sleep until the ISR fills something in.
            unsafe { self.regs.ier.write(self.regs.ier.read() | IER_DRIE) };
            drop(st);
            self.rx_not_empty.wait();
        }
    }

    fn send(&self, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let _guard = IrqGuard::new();
        let mut n = 0;

        while n < buf.len() {
            let mut st = self.state.lock();

            if !st.opened {
                return Err(Error::Invalid);
            }

            if st.tx.is_full() {
                unsafe { self.regs.ier.write(self.regs.ier.read() | IER_THREIE) };
                drop(st);
                self.tx_not_full.wait();
                continue;
            }

            while n < buf.len() && !st.tx.is_full() {
                let b = buf[n];
                st.tx.put(b);
                n += 1;
            }

            // Kick the transmitter after each burst.
            unsafe { self.regs.ier.write(self.regs.ier.read() | IER_THREIE) };
        }

        Ok(n)
    }
}
