//! Executable loading.
//!
//! Binds the ELF loader to uniform I/O: the image is streamed out of a file
//! handle with positioned reads and placed directly into the fixed load
//! window.

use crate::config::{LOAD_BASE, LOAD_LIMIT};
use crate::error::Result;
use crate::uio::{Cntl, Uio};

struct UioSource<'a> {
    uio: &'a Uio,
}

impl elf::Source for UioSource<'_> {
    type Error = crate::error::Error;

    fn len(&mut self) -> Result<u64> {
        self.uio.cntl(Cntl::GetEnd)
    }

    fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        self.uio.cntl(Cntl::SetPos(pos))?;
        self.uio.read(buf)
    }
}

struct WindowMemory;

impl elf::Memory for WindowMemory {
    fn segment_mut(&mut self, addr: u64, len: usize) -> &mut [u8] {
        // SAFETY: the loader only asks for ranges it has validated against
        // the load window, which is reserved for user images.
        unsafe { core::slice::from_raw_parts_mut(addr as *mut u8, len) }
    }
}

/// Loads the executable behind `exe` into the load window and returns its
/// entry address.
pub fn load(exe: &Uio) -> Result<u64> {
    let loader = elf::Loader::new(LOAD_BASE, LOAD_LIMIT);
    let entry = loader.load(&mut UioSource { uio: exe }, &mut WindowMemory)?;

    // The window now holds new code.
    riscv::instructions::fence_i();

    Ok(entry)
}
