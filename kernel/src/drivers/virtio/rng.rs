//! VirtIO entropy device driver.
//!
//! A single-descriptor queue: each receive posts the staging buffer, waits
//! for the used ring to advance, and copies out however many bytes the
//! device delivered.

use alloc::boxed::Box;
use alloc::sync::Arc;

use core::cell::UnsafeCell;

use spin::Mutex;

use crate::arch::riscv::irq::IrqGuard;
use crate::device::{self, Device, SerialDev};
use crate::error::{Error, Result};
use crate::intr;
use crate::thread::{Condition, Lock};

use super::virtq::{Desc, Virtq, DESC_F_WRITE};
use super::{features, Status, Transport};

const VIORNG_INTR_PRIO: u32 = 1;

/// Size of the staging buffer, and thus the largest single request.
const BUF_SIZE: usize = 256;

struct RngState {
    vq: Virtq,
    opened: bool,
    last_used: u16,
}

/// A VirtIO entropy device.
pub struct VioRng {
    transport: Transport,
    irqno: u32,
    /// Serializes receives between threads.
    lock: Lock,
    /// State shared with the ISR; spin-held with interrupts disabled only.
    state: Mutex<RngState>,
    /// Signalled by the ISR when the used ring advances.
    ready: Condition,
    /// Device-written staging buffer.
    buf: UnsafeCell<[u8; BUF_SIZE]>,
}

// SAFETY: the staging buffer is only read after the device has retired the
// request, under the device lock.
unsafe impl Send for VioRng {}
unsafe impl Sync for VioRng {}

/// Configures a probed entropy device and registers it as `viorng`.
pub fn attach(transport: Transport, irqno: u32) {
    // Recognize the device
    transport.update_status(Status::ACKNOWLEDGE);
    transport.update_status(Status::DRIVER);

    if transport
        .negotiate_features(0, features::VERSION_1)
        .is_err()
    {
        kprintln!("viorng: feature negotiation failed");
        return;
    }

    let vq = Virtq::new(1);
    transport.attach_virtq(0, &vq);

    let dev = Arc::new(VioRng {
        transport,
        irqno,
        lock: Lock::new(),
        state: Mutex::new(RngState {
            vq,
            opened: false,
            last_used: 0,
        }),
        ready: Condition::new("viorng.ready"),
        buf: UnsafeCell::new([0; BUF_SIZE]),
    });

    // The single descriptor always points at the staging buffer; only its
    // length changes per request.
    {
        let mut st = dev.state.lock();
        let addr = dev.buf.get() as u64;
        st.vq.set_desc(
            0,
            Desc {
                addr,
                len: BUF_SIZE as u32,
                flags: DESC_F_WRITE,
                next: 0,
            },
        );
    }

    device::register("viorng", Some(Device::Serial(dev.clone())));

    dev.transport.update_status(Status::DRIVER_OK);
}

impl VioRng {
    fn isr(&self) {
        self.transport.interrupt_ack(self.transport.interrupt_status());
        self.ready.broadcast();
    }
}

impl SerialDev for VioRng {
    fn open(self: Arc<Self>) -> Result<()> {
        {
            let _guard = IrqGuard::new();
            let mut st = self.state.lock();

            if st.opened {
                return Err(Error::Busy);
            }

            st.vq.reset_indices();
            st.last_used = 0;
            st.opened = true;
        }

        self.transport.enable_virtq(0);

        let dev = self.clone();
        intr::enable_source(self.irqno, VIORNG_INTR_PRIO, Box::new(move |_| dev.isr()));

        Ok(())
    }

    fn close(&self) {
        {
            let _guard = IrqGuard::new();
            let mut st = self.state.lock();

            if !st.opened {
                return;
            }
            st.opened = false;
        }

        intr::disable_source(self.irqno);
        self.transport.reset_virtq(0);
        self.ready.broadcast();
    }

    fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        self.lock.acquire();
        let result = self.recv_locked(buf);
        self.lock.release();
        result
    }
}

impl VioRng {
    fn recv_locked(&self, buf: &mut [u8]) -> Result<usize> {
        let request = buf.len().min(BUF_SIZE);

        {
            let _guard = IrqGuard::new();
            let mut st = self.state.lock();

            if !st.opened {
                return Err(Error::Invalid);
            }

            let addr = self.buf.get() as u64;
            st.vq.set_desc(
                0,
                Desc {
                    addr,
                    len: request as u32,
                    flags: DESC_F_WRITE,
                    next: 0,
                },
            );
            st.vq.push_avail(0);
        }

        self.transport.notify(0);

        // Wait for the used ring to move past our request.
        let received = {
            let _guard = IrqGuard::new();

            loop {
                let mut st = self.state.lock();

                if !st.opened {
                    return Err(Error::Invalid);
                }

                if st.vq.used_idx() != st.last_used {
                    let elem = st.vq.used_elem(st.last_used);
                    st.last_used = st.vq.used_idx();
                    break (elem.len as usize).min(request);
                }

                drop(st);
                self.ready.wait();
            }
        };

        // SAFETY: the device retired the request, so the staging buffer is
        // stable; the device lock keeps other readers out.
        let staged = unsafe { &*self.buf.get() };
        buf[..received].copy_from_slice(&staged[..received]);

        Ok(received)
    }
}
