//! VirtIO block device driver.
//!
//! Requests travel as three-descriptor chains (header, data, status byte)
//! whose head index doubles as a ticket number. The submitting thread parks
//! on the ticket's condition; the ISR retires used-ring entries, fills in
//! the status, and wakes the ticket. Heads advance by three per request and
//! are never reclaimed individually, so the queue length bounds the number
//! of requests in flight.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use core::cell::{Cell, UnsafeCell};
use core::mem::size_of;

use bitflags::bitflags;
use spin::Mutex;

use crate::arch::riscv::irq::IrqGuard;
use crate::device::{self, Device, StorageDev};
use crate::error::{Error, Result};
use crate::intr;
use crate::thread::{Condition, Lock};

use super::virtq::{Desc, Virtq, DESC_F_NEXT, DESC_F_WRITE};
use super::{features, Status, Transport};

const VIOBLK_INTR_PRIO: u32 = 1;

/// Logical sector size of the device.
const SECTOR_SIZE: u64 = 512;

/// Hard cap on the negotiated queue length.
const QUEUE_LIMIT: u32 = 128;

/// Heap set aside for the ticket array; bounds the queue length as well.
const TICKET_ARENA: usize = 4096;

const REQ_IN: u32 = 0;
const REQ_OUT: u32 = 1;

bitflags! {
    #[derive(Debug, Clone, Copy)]
    struct DeviceFeatures: u64 {
        const BARRIER      = 1 << 0;
        const SIZE_MAX     = 1 << 1;
        const SEG_MAX      = 1 << 2;
        const GEOMETRY     = 1 << 4;
        const RO           = 1 << 5;
        const BLK_SIZE     = 1 << 6;
        const SCSI         = 1 << 7;
        const FLUSH        = 1 << 9;
        const TOPOLOGY     = 1 << 10;
        const CONFIG_WCE   = 1 << 11;
        const MQ           = 1 << 12;
        const DISCARD      = 1 << 13;
        const WRITE_ZEROES = 1 << 14;

        // Device-independent features
        const RING_INDIRECT_DESC = features::RING_INDIRECT_DESC;
        const VERSION_1          = features::VERSION_1;
        const RING_RESET         = features::RING_RESET;
    }
}

/// Request header, read by the device through descriptor 0.
#[repr(C)]
struct BlkReq {
    kind: u32,
    reserved: u32,
    sector: u64,
}

/// Rendezvous between a submitting thread and the ISR, one per descriptor
/// chain head. The request header and status byte live here so the device
/// has stable addresses to DMA through.
struct Ticket {
    done: Cell<bool>,
    status: Cell<u8>,
    cond: Condition,
    req: UnsafeCell<BlkReq>,
    status_byte: UnsafeCell<u8>,
}

impl Ticket {
    fn new() -> Self {
        Self {
            done: Cell::new(false),
            status: Cell::new(0xFF),
            cond: Condition::new("vioblk.ticket"),
            req: UnsafeCell::new(BlkReq {
                kind: REQ_IN,
                reserved: 0,
                sector: 0,
            }),
            status_byte: UnsafeCell::new(0xFF),
        }
    }
}

struct BlkState {
    vq: Virtq,
    opened: bool,
    /// Next chain head; advances by three per request, round-robin.
    free_desc: u16,
    /// Our consumer position on the used ring.
    last_used: u16,
}

/// A VirtIO block device.
pub struct VioBlk {
    transport: Transport,
    irqno: u32,
    capacity: u64,
    /// Serializes open/close and request submission between threads.
    lock: Lock,
    /// State shared with the ISR; spin-held with interrupts disabled only.
    state: Mutex<BlkState>,
    tickets: Box<[Ticket]>,
}

// SAFETY: ticket cells are only touched with interrupts disabled on the one
// hart, and ring state is behind the spin mutex.
unsafe impl Send for VioBlk {}
unsafe impl Sync for VioBlk {}

/// Configures a probed block device and registers it as `vioblk`.
pub fn attach(transport: Transport, irqno: u32) {
    // Recognize the device
    transport.update_status(Status::ACKNOWLEDGE);
    transport.update_status(Status::DRIVER);

    let needed =
        DeviceFeatures::VERSION_1 | DeviceFeatures::RING_RESET | DeviceFeatures::RING_INDIRECT_DESC;
    let wanted = DeviceFeatures::BLK_SIZE | DeviceFeatures::TOPOLOGY;

    let enabled = match transport.negotiate_features(wanted.bits(), needed.bits()) {
        Ok(bits) => DeviceFeatures::from_bits_retain(bits),
        Err(_) => {
            kprintln!("vioblk: feature negotiation failed");
            return;
        }
    };

    // If the device reports a block size, it must at least be sane; the
    // storage interface itself works in 512-byte sectors.
    if enabled.contains(DeviceFeatures::BLK_SIZE) {
        let blksz = transport.read_config_u32(20);
        assert!(blksz.is_power_of_two());
    }

    let capacity = transport.read_config_u64(0) * SECTOR_SIZE;

    let qmax = transport.max_queue_len(0);
    if qmax == 0 {
        kprintln!("vioblk: queue 0 not available");
        transport.update_status(Status::FAILED);
        return;
    }

    // Queue length: what the device allows, capped by our limit and by the
    // ticket arena, rounded down to a power of two.
    let ticket_cap = (TICKET_ARENA / size_of::<Ticket>()).max(1) as u32;
    let mut limit = qmax.min(QUEUE_LIMIT).min(ticket_cap);
    if !limit.is_power_of_two() {
        limit = limit.next_power_of_two() / 2;
    }
    let qlen = limit as u16;

    let vq = Virtq::new(qlen);
    transport.attach_virtq(0, &vq);

    let tickets: Vec<Ticket> = (0..qlen).map(|_| Ticket::new()).collect();

    let dev = Arc::new(VioBlk {
        transport,
        irqno,
        capacity,
        lock: Lock::new(),
        state: Mutex::new(BlkState {
            vq,
            opened: false,
            free_desc: 0,
            last_used: 0,
        }),
        tickets: tickets.into_boxed_slice(),
    });

    let instno = device::register("vioblk", Some(Device::Storage(dev.clone())));

    // Device is now live
    dev.transport.update_status(Status::DRIVER_OK);

    kprintln!(
        "vioblk{}: {} sectors disk ({} MiB), queue length {}",
        instno,
        capacity / SECTOR_SIZE,
        capacity >> 20,
        qlen,
    );
}

impl VioBlk {
    /// Retires every fresh used-ring entry and wakes its ticket. Runs in
    /// interrupt context.
    fn isr(&self) {
        let int_status = self.transport.interrupt_status();

        {
            let mut st = self.state.lock();

            while st.last_used != st.vq.used_idx() {
                let elem = st.vq.used_elem(st.last_used);
                let ticket = &self.tickets[elem.id as usize % self.tickets.len()];

                // SAFETY: the device is done with this chain, so the status
                // byte is stable.
                ticket.status.set(unsafe { *ticket.status_byte.get() });
                ticket.done.set(true);
                ticket.cond.broadcast();

                st.last_used = st.last_used.wrapping_add(1);
            }
        }

        self.transport.interrupt_ack(int_status);
    }

    /// Submits one request and sleeps until the device retires it.
    fn transfer(&self, kind: u32, sector: u64, buf: *mut u8, len: usize) -> Result<usize> {
        self.lock.acquire();
        let result = self.transfer_locked(kind, sector, buf, len);
        self.lock.release();
        result
    }

    fn transfer_locked(&self, kind: u32, sector: u64, buf: *mut u8, len: usize) -> Result<usize> {
        let head;

        {
            let _guard = IrqGuard::new();
            let mut st = self.state.lock();

            if !st.opened {
                return Err(Error::Invalid);
            }

            let qlen = st.vq.len();
            head = st.free_desc;
            let data = (head + 1) % qlen;
            let status = (head + 2) % qlen;
            st.free_desc = (head + 3) % qlen;

            let ticket = &self.tickets[head as usize];
            ticket.done.set(false);
            ticket.status.set(0xFF);

            // SAFETY: the previous request on this head has been retired, so
            // the device no longer references these buffers.
            unsafe {
                *ticket.req.get() = BlkReq {
                    kind,
                    reserved: 0,
                    sector,
                };
                *ticket.status_byte.get() = 0xFF;
            }

            st.vq.set_desc(
                head,
                Desc {
                    addr: ticket.req.get() as u64,
                    len: size_of::<BlkReq>() as u32,
                    flags: DESC_F_NEXT,
                    next: data,
                },
            );
            st.vq.set_desc(
                data,
                Desc {
                    addr: buf as u64,
                    len: len as u32,
                    flags: if kind == REQ_IN { DESC_F_WRITE } else { 0 } | DESC_F_NEXT,
                    next: status,
                },
            );
            st.vq.set_desc(
                status,
                Desc {
                    addr: ticket.status_byte.get() as u64,
                    len: 1,
                    flags: DESC_F_WRITE,
                    next: 0,
                },
            );

            st.vq.push_avail(head);
        }

        self.transport.notify(0);

        let ticket = &self.tickets[head as usize];

        {
            let _guard = IrqGuard::new();
            while !ticket.done.get() {
                ticket.cond.wait();
            }
        }

        if ticket.status.get() == 0 {
            Ok(len)
        } else {
            Err(Error::Io)
        }
    }

    /// Clamps a transfer to the end of the device; out-of-range tails are
    /// truncated rather than rejected.
    fn truncate(&self, pos: u64, len: usize) -> usize {
        if pos >= self.capacity {
            return 0;
        }

        let len = (len as u64).min(self.capacity - pos);
        (len - len % SECTOR_SIZE) as usize
    }
}

impl StorageDev for VioBlk {
    fn block_size(&self) -> usize {
        SECTOR_SIZE as usize
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn open(self: Arc<Self>) -> Result<()> {
        self.lock.acquire();

        let result = (|| {
            {
                let _guard = IrqGuard::new();
                let mut st = self.state.lock();

                if st.opened {
                    return Err(Error::Busy);
                }

                st.vq.reset_indices();
                st.free_desc = 0;
                st.last_used = 0;
                st.opened = true;
            }

            self.transport.enable_virtq(0);

            let dev = self.clone();
            intr::enable_source(self.irqno, VIOBLK_INTR_PRIO, Box::new(move |_| dev.isr()));

            Ok(())
        })();

        self.lock.release();
        result
    }

    fn close(&self) {
        self.lock.acquire();

        let was_open = {
            let _guard = IrqGuard::new();
            let mut st = self.state.lock();
            core::mem::replace(&mut st.opened, false)
        };

        if was_open {
            intr::disable_source(self.irqno);
            self.transport.reset_virtq(0);

            // Fail any request still waiting on its ticket.
            let _guard = IrqGuard::new();
            for ticket in self.tickets.iter() {
                if !ticket.done.get() {
                    ticket.status.set(0xFF);
                    ticket.done.set(true);
                    ticket.cond.broadcast();
                }
            }
        }

        self.lock.release();
    }

    fn fetch(&self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        if pos % SECTOR_SIZE != 0 || buf.len() as u64 % SECTOR_SIZE != 0 {
            return Err(Error::Invalid);
        }

        let len = self.truncate(pos, buf.len());
        if len == 0 {
            return Ok(0);
        }

        self.transfer(REQ_IN, pos / SECTOR_SIZE, buf.as_mut_ptr(), len)
    }

    fn store(&self, pos: u64, buf: &[u8]) -> Result<usize> {
        if pos % SECTOR_SIZE != 0 || buf.len() as u64 % SECTOR_SIZE != 0 {
            return Err(Error::Invalid);
        }

        let len = self.truncate(pos, buf.len());
        if len == 0 {
            return Ok(0);
        }

        self.transfer(REQ_OUT, pos / SECTOR_SIZE, buf.as_ptr() as *mut u8, len)
    }
}
