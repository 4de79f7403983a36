//! VirtIO subsystem.
//!
//! The MMIO transport (modern, version 2) probes a slot, negotiates features
//! over the two 32-bit selector windows, and wires virtqueues up to the
//! device. Device-class drivers sit on top: block and entropy.

use bitflags::bitflags;

use crate::error::{Error, Result};
use crate::mmio::Regmap;

pub mod blk;
pub mod rng;
pub mod virtq;

use virtq::Virtq;

/// Size of one MMIO slot, device configuration space included.
const SLOT_SIZE: usize = 0x200;

const MAGIC_VALUE: u32 = u32::from_le_bytes(*b"virt");
const MMIO_VERSION: u32 = 2;

const DEVICE_ID_BLOCK: u32 = 2;
const DEVICE_ID_ENTROPY: u32 = 4;

bitflags! {
    /// VirtIO status register bits.
    #[derive(Debug, Clone, Copy)]
    pub struct Status: u32 {
        /// The guest OS has found the device and recognized it as a valid virtio device
        const ACKNOWLEDGE = 1;
        /// The guest OS knows how to drive the device
        const DRIVER = 2;
        /// The driver is set up and ready to drive the device
        const DRIVER_OK = 4;
        /// The driver has acknowledged the features it understands
        const FEATURES_OK = 8;
        /// The device has experienced an error from which it can’t recover
        const DEVICE_NEEDS_RESET = 64;
        /// Something went wrong in the guest, and it has given up on the device
        const FAILED = 128;
    }
}

/// Device-independent feature bits shared by every VirtIO device.
pub mod features {
    /// The device supports indirect descriptors.
    pub const RING_INDIRECT_DESC: u64 = 1 << 28;
    /// The device complies with the modern (non-legacy) specification.
    pub const VERSION_1: u64 = 1 << 32;
    /// Individual virtqueues can be reset.
    pub const RING_RESET: u64 = 1 << 40;
}

/// Generic memory-mapped VirtIO transport.
pub struct Transport {
    regmap: Regmap,
}

#[allow(unused)]
impl Transport {
    // Register offsets
    const MAGIC: usize = 0x00;
    const VERSION: usize = 0x04;
    const DEVICE_ID: usize = 0x08;
    const VENDOR_ID: usize = 0x0c;
    const DEVICE_FEATURES: usize = 0x10;
    const DEVICE_FEATURES_SEL: usize = 0x14;
    const DRIVER_FEATURES: usize = 0x20;
    const DRIVER_FEATURES_SEL: usize = 0x24;
    const QUEUE_SEL: usize = 0x30;
    const QUEUE_NUM_MAX: usize = 0x34;
    const QUEUE_NUM: usize = 0x38;
    const QUEUE_READY: usize = 0x44;
    const QUEUE_NOTIFY: usize = 0x50;
    const INTERRUPT_STATUS: usize = 0x60;
    const INTERRUPT_ACK: usize = 0x64;
    const STATUS: usize = 0x70;
    const QUEUE_DESC_LOW: usize = 0x80;
    const QUEUE_DESC_HIGH: usize = 0x84;
    const QUEUE_DRIVER_LOW: usize = 0x90;
    const QUEUE_DRIVER_HIGH: usize = 0x94;
    const QUEUE_DEVICE_LOW: usize = 0xa0;
    const QUEUE_DEVICE_HIGH: usize = 0xa4;
    const CONFIG: usize = 0x100;
}

impl Transport {
    /// Creates a transport over the MMIO slot at `base`.
    ///
    /// # Safety
    ///
    /// `base` must point to a VirtIO MMIO register block.
    pub unsafe fn new(base: usize) -> Self {
        Self {
            regmap: unsafe { Regmap::new(base, SLOT_SIZE) },
        }
    }

    /// Checks the slot's identity registers and returns the device ID, or
    /// `None` for an empty slot or a foreign register block.
    pub fn probe(&self) -> Option<u32> {
        if self.regmap.read::<u32>(Self::MAGIC) != MAGIC_VALUE {
            return None;
        }
        if self.regmap.read::<u32>(Self::VERSION) != MMIO_VERSION {
            return None;
        }

        // A device ID of 0 indicates a placeholder device
        match self.regmap.read::<u32>(Self::DEVICE_ID) {
            0 => None,
            id => Some(id),
        }
    }

    fn status(&self) -> Status {
        Status::from_bits_retain(self.regmap.read(Self::STATUS))
    }

    /// Adds the given bits to the device's status register.
    pub fn update_status(&self, status: Status) {
        self.regmap
            .write(Self::STATUS, (self.status() | status).bits());
    }

    fn read_device_features(&self) -> u64 {
        self.regmap.write(Self::DEVICE_FEATURES_SEL, 0u32);
        let low = self.regmap.read::<u32>(Self::DEVICE_FEATURES) as u64;
        self.regmap.write(Self::DEVICE_FEATURES_SEL, 1u32);
        let high = self.regmap.read::<u32>(Self::DEVICE_FEATURES) as u64;

        high << 32 | low
    }

    fn write_driver_features(&self, features: u64) {
        self.regmap.write(Self::DRIVER_FEATURES_SEL, 0u32);
        self.regmap
            .write(Self::DRIVER_FEATURES, features as u32);
        self.regmap.write(Self::DRIVER_FEATURES_SEL, 1u32);
        self.regmap
            .write(Self::DRIVER_FEATURES, (features >> 32) as u32);
    }

    /// Negotiates features with the device.
    ///
    /// Every bit of `needed` must be offered or the negotiation fails;
    /// `wanted` bits are enabled opportunistically. Returns the accepted set.
    pub fn negotiate_features(&self, wanted: u64, needed: u64) -> Result<u64> {
        let offered = self.read_device_features();

        if offered & needed != needed {
            self.update_status(Status::FAILED);
            return Err(Error::NotSupported);
        }

        let enabled = needed | (wanted & offered);
        self.write_driver_features(enabled);

        self.update_status(Status::FEATURES_OK);
        if !self.status().contains(Status::FEATURES_OK) {
            self.update_status(Status::FAILED);
            return Err(Error::NotSupported);
        }

        Ok(enabled)
    }

    /// Largest queue length the device accepts for queue `index`.
    pub fn max_queue_len(&self, index: u32) -> u32 {
        self.regmap.write(Self::QUEUE_SEL, index);
        self.regmap.read(Self::QUEUE_NUM_MAX)
    }

    /// Hands the virtqueue's rings to the device.
    pub fn attach_virtq(&self, index: u32, vq: &Virtq) {
        self.regmap.write(Self::QUEUE_SEL, index);
        assert!(
            self.regmap.read::<u32>(Self::QUEUE_READY) == 0,
            "virtqueue {} already live",
            index
        );

        self.regmap.write(Self::QUEUE_NUM, vq.len() as u32);

        let desc = vq.desc_addr();
        self.regmap.write(Self::QUEUE_DESC_LOW, desc as u32);
        self.regmap.write(Self::QUEUE_DESC_HIGH, (desc >> 32) as u32);

        let avail = vq.avail_addr();
        self.regmap.write(Self::QUEUE_DRIVER_LOW, avail as u32);
        self.regmap
            .write(Self::QUEUE_DRIVER_HIGH, (avail >> 32) as u32);

        let used = vq.used_addr();
        self.regmap.write(Self::QUEUE_DEVICE_LOW, used as u32);
        self.regmap
            .write(Self::QUEUE_DEVICE_HIGH, (used >> 32) as u32);
    }

    /// Marks the virtqueue live.
    pub fn enable_virtq(&self, index: u32) {
        self.regmap.write(Self::QUEUE_SEL, index);
        self.regmap.write(Self::QUEUE_READY, 1u32);
    }

    /// Takes the virtqueue away from the device again.
    pub fn reset_virtq(&self, index: u32) {
        self.regmap.write(Self::QUEUE_SEL, index);
        self.regmap.write(Self::QUEUE_READY, 0u32);
    }

    /// Notifies the device that new buffers are available in the queue.
    pub fn notify(&self, index: u32) {
        self.regmap.write(Self::QUEUE_NOTIFY, index);
    }

    /// Reads the interrupt status register.
    pub fn interrupt_status(&self) -> u32 {
        self.regmap.read(Self::INTERRUPT_STATUS)
    }

    /// Acknowledges the given interrupt status bits.
    pub fn interrupt_ack(&self, status: u32) {
        self.regmap.write(Self::INTERRUPT_ACK, status);
    }

    /// Reads a 32-bit field of the device configuration space.
    pub fn read_config_u32(&self, offset: usize) -> u32 {
        self.regmap.read(Self::CONFIG + offset)
    }

    /// Reads a 64-bit field of the device configuration space, re-reading
    /// until both halves come from the same generation.
    pub fn read_config_u64(&self, offset: usize) -> u64 {
        let mut old = self.read_config_u32(offset) as u64
            | (self.read_config_u32(offset + 4) as u64) << 32;

        loop {
            let new = self.read_config_u32(offset) as u64
                | (self.read_config_u32(offset + 4) as u64) << 32;
            if old == new {
                break;
            }
            old = new;
        }

        old
    }
}

/// Probes the VirtIO slot at `base` and attaches a driver if one matches.
pub fn attach(base: usize, irqno: u32) {
    // SAFETY: the board config enumerates the MMIO slots.
    let transport = unsafe { Transport::new(base) };

    let Some(dev_id) = transport.probe() else {
        return;
    };

    match dev_id {
        DEVICE_ID_BLOCK => blk::attach(transport, irqno),
        DEVICE_ID_ENTROPY => rng::attach(transport, irqno),
        id => kprintln!("virtio: unsupported device {} at {:#x}", id, base),
    }
}
