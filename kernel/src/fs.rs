//! File systems: the mount table and the ktfs volume binding.
//!
//! Mounted file systems register under a short name; `open_file` routes a
//! (mount, file) pair to the owning file system and hands back a uniform
//! I/O handle.

use alloc::sync::Arc;
use alloc::vec::Vec;

use core::cell::UnsafeCell;

use spin::Mutex;

use crate::device::StorageDev;
use crate::error::{Error, Result};
use crate::thread::Lock;
use crate::uio::{Cntl, Uio, UioOps};

/// A mounted file system.
pub trait FileSystem: Send + Sync {
    /// Opens the named file.
    fn open(self: Arc<Self>, name: &str) -> Result<Uio>;

    /// Writes any cached state back to the backing device.
    fn flush(&self) -> Result<()>;
}

struct Mount {
    name: &'static str,
    fs: Arc<dyn FileSystem>,
}

static MOUNTS: Mutex<Vec<Mount>> = Mutex::new(Vec::new());

/// Attaches a file system under a mount-point name.
pub fn attach(name: &'static str, fs: Arc<dyn FileSystem>) -> Result<()> {
    let mut mounts = MOUNTS.lock();

    if mounts.iter().any(|m| m.name == name) {
        return Err(Error::Exists);
    }

    mounts.push(Mount { name, fs });
    Ok(())
}

/// Opens `name` on the file system mounted as `mount`.
pub fn open_file(mount: &str, name: &str) -> Result<Uio> {
    let fs = MOUNTS
        .lock()
        .iter()
        .find(|m| m.name == mount)
        .map(|m| m.fs.clone())
        .ok_or(Error::NoEntry)?;

    fs.open(name)
}

/// Flushes every mounted file system; errors are reported but not fatal.
pub fn flush_all() {
    let mounted: Vec<Arc<dyn FileSystem>> =
        MOUNTS.lock().iter().map(|m| m.fs.clone()).collect();

    for fs in mounted {
        if let Err(e) = fs.flush() {
            kprintln!("fs: flush failed: {}", e);
        }
    }
}

/// Storage-device adapter feeding the ktfs block cache.
struct Disk {
    dev: Arc<dyn StorageDev>,
}

impl ktfs::Storage for Disk {
    type Error = Error;

    fn block_size(&self) -> usize {
        self.dev.block_size()
    }

    fn fetch(&mut self, pos: u64, buf: &mut [u8]) -> Result<()> {
        match self.dev.fetch(pos, buf) {
            Ok(n) if n == buf.len() => Ok(()),
            Ok(_) => Err(Error::Io),
            Err(e) => Err(e),
        }
    }

    fn store(&mut self, pos: u64, buf: &[u8]) -> Result<()> {
        match self.dev.store(pos, buf) {
            Ok(n) if n == buf.len() => Ok(()),
            Ok(_) => Err(Error::Io),
            Err(e) => Err(e),
        }
    }
}

/// A mounted ktfs volume: the reader from the `ktfs` crate behind the mount
/// lock, fed by a block cache over the storage device.
pub struct KtfsVolume {
    lock: Lock,
    fs: UnsafeCell<ktfs::Ktfs<Disk>>,
}

// SAFETY: the inner reader is only reached through `with`, which holds the
// mount lock.
unsafe impl Send for KtfsVolume {}
unsafe impl Sync for KtfsVolume {}

impl KtfsVolume {
    /// Creates a cache over the opened device, mounts the volume, and
    /// attaches it under `name`.
    pub fn mount(name: &'static str, dev: Arc<dyn StorageDev>) -> Result<()> {
        let cache = ktfs::Cache::new(Disk { dev })?;
        let fs = ktfs::Ktfs::mount(cache)?;

        attach(
            name,
            Arc::new(KtfsVolume {
                lock: Lock::new(),
                fs: UnsafeCell::new(fs),
            }),
        )
    }

    fn with<R>(&self, f: impl FnOnce(&mut ktfs::Ktfs<Disk>) -> R) -> R {
        self.lock.acquire();
        // SAFETY: the mount lock serializes access, and volume code never
        // re-enters `with` while holding it.
        let r = f(unsafe { &mut *self.fs.get() });
        self.lock.release();
        r
    }
}

impl FileSystem for KtfsVolume {
    fn open(self: Arc<Self>, name: &str) -> Result<Uio> {
        let file = self.with(|fs| fs.open(name))?;

        Ok(Uio::new(KtfsFile { vol: self, file }))
    }

    fn flush(&self) -> Result<()> {
        self.with(|fs| fs.flush())?;
        Ok(())
    }
}

/// An open file on a ktfs volume.
struct KtfsFile {
    vol: Arc<KtfsVolume>,
    file: ktfs::File,
}

impl UioOps for KtfsFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Self { vol, file } = self;
        Ok(vol.with(|fs| fs.read(file, buf))?)
    }

    fn cntl(&mut self, op: Cntl) -> Result<u64> {
        match op {
            Cntl::GetEnd => Ok(self.file.size()),
            Cntl::GetPos => Ok(self.file.pos()),
            Cntl::SetPos(pos) => {
                let Self { vol, file } = self;
                vol.with(|fs| fs.seek(file, pos))?;
                Ok(0)
            }
            Cntl::SetEnd(_) => Err(Error::NotSupported),
        }
    }
}
