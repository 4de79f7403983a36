//! Device manager.
//!
//! Devices register under a (name, class) pair and are numbered per name in
//! registration order, so the second "uart" becomes `uart1`. Lookups hand
//! out shared references to the class interface.

#![allow(unused)]

use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::error::{Error, Result};

/// Serial-class device interface: byte-stream endpoints (UARTs, the entropy
/// device, the RTC).
pub trait SerialDev: Send + Sync {
    /// Transfer granularity in bytes.
    fn block_size(&self) -> usize {
        1
    }

    /// Claims the device for I/O.
    fn open(self: Arc<Self>) -> Result<()>;

    /// Releases the device, waking any blocked callers.
    fn close(&self);

    /// Receives up to `buf.len()` bytes.
    fn recv(&self, buf: &mut [u8]) -> Result<usize>;

    /// Sends the bytes of `buf`.
    fn send(&self, _buf: &[u8]) -> Result<usize> {
        Err(Error::NotSupported)
    }
}

/// Storage-class device interface: block-addressed endpoints.
pub trait StorageDev: Send + Sync {
    /// Device block size in bytes.
    fn block_size(&self) -> usize;

    /// Device capacity in bytes.
    fn capacity(&self) -> u64;

    /// Claims the device for I/O.
    fn open(self: Arc<Self>) -> Result<()>;

    /// Releases the device, waking any blocked callers.
    fn close(&self);

    /// Reads `buf.len()` bytes starting at byte position `pos`.
    ///
    /// Positions and lengths are multiples of the block size. Transfers
    /// reaching past the end of the device are truncated, so the returned
    /// count may be short (zero at or past the end).
    fn fetch(&self, pos: u64, buf: &mut [u8]) -> Result<usize>;

    /// Writes `buf.len()` bytes starting at byte position `pos`, with the
    /// same alignment and truncation rules as [`StorageDev::fetch`].
    fn store(&self, pos: u64, buf: &[u8]) -> Result<usize>;
}

/// A registered device of some class.
#[derive(Clone)]
pub enum Device {
    /// Serial-class device.
    Serial(Arc<dyn SerialDev>),
    /// Storage-class device.
    Storage(Arc<dyn StorageDev>),
}

struct Record {
    name: &'static str,
    instno: u32,
    dev: Option<Device>,
}

static DEVICES: Mutex<Vec<Record>> = Mutex::new(Vec::new());

/// Registers a device and returns its instance number.
///
/// `None` reserves the instance number without making the device findable;
/// the console claims `uart0` this way.
pub fn register(name: &'static str, dev: Option<Device>) -> u32 {
    let mut devices = DEVICES.lock();

    let instno = devices.iter().filter(|r| r.name == name).count() as u32;
    devices.push(Record { name, instno, dev });

    instno
}

fn find(name: &str, instno: u32) -> Option<Device> {
    let devices = DEVICES.lock();

    devices
        .iter()
        .find(|r| r.name == name && r.instno == instno)
        .and_then(|r| r.dev.clone())
}

/// Looks up a serial-class device.
pub fn find_serial(name: &str, instno: u32) -> Option<Arc<dyn SerialDev>> {
    match find(name, instno) {
        Some(Device::Serial(dev)) => Some(dev),
        _ => None,
    }
}

/// Looks up a storage-class device.
pub fn find_storage(name: &str, instno: u32) -> Option<Arc<dyn StorageDev>> {
    match find(name, instno) {
        Some(Device::Storage(dev)) => Some(dev),
        _ => None,
    }
}
