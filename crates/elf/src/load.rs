use crate::{abi, Elf64Header, Elf64Phdr, ElfError};

/// Byte source backing an ELF image, typically a file handle.
pub trait Source {
    /// Error type reported by the backing source.
    type Error;

    /// Returns the total size of the image in bytes.
    fn len(&mut self) -> Result<u64, Self::Error>;

    /// Reads up to `buf.len()` bytes starting at absolute position `pos`.
    ///
    /// Returns the number of bytes actually read; 0 indicates end of image.
    fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

/// Destination memory for loadable segments.
///
/// The loader validates every range against its window before asking for it,
/// so implementations may assume `addr..addr + len` is inside the window.
pub trait Memory {
    /// Returns the writable bytes backing `addr..addr + len`.
    fn segment_mut(&mut self, addr: u64, len: usize) -> &mut [u8];
}

/// Errors that can occur while loading an executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError<E> {
    /// The ELF header could not be parsed.
    Header(ElfError),
    /// The image is not an `ET_EXEC` executable.
    NotExecutable,
    /// The image does not target RISC-V.
    WrongMachine,
    /// The image has no program headers.
    NoSegments,
    /// The entry point lies outside the load window.
    EntryOutsideWindow,
    /// The program header table extends past the end of the image.
    TableOutOfBounds,
    /// A segment's file slice extends past the end of the image.
    SegmentOutOfBounds,
    /// A segment's destination range lies outside the load window.
    SegmentOutsideWindow,
    /// A segment declares a memory size smaller than its file size.
    BadSegmentSize,
    /// The image ended before a read could be completed.
    UnexpectedEof,
    /// The backing source reported an error.
    Source(E),
}

impl<E> From<ElfError> for LoadError<E> {
    fn from(e: ElfError) -> Self {
        LoadError::Header(e)
    }
}

/// Loader for rv64 executables placed in a fixed physical window.
#[derive(Debug, Clone)]
pub struct Loader {
    base: u64,
    limit: u64,
}

impl Loader {
    /// Creates a loader that accepts images targeting `[base, limit)`.
    pub fn new(base: u64, limit: u64) -> Self {
        assert!(base < limit);
        Self { base, limit }
    }

    /// Validates the image in `src` and places its `PT_LOAD` segments into `mem`.
    ///
    /// On success, returns the image's entry point address. The whole program
    /// header table and every placed segment must lie inside the image, and
    /// every destination range (and the entry point) must lie inside the load
    /// window.
    pub fn load<S: Source, M: Memory>(
        &self,
        src: &mut S,
        mem: &mut M,
    ) -> Result<u64, LoadError<S::Error>> {
        let file_size = src.len().map_err(LoadError::Source)?;

        let mut ehdr_buf = [0u8; abi::EHDR_SIZE];
        read_exact_at(src, 0, &mut ehdr_buf)?;

        let hdr = Elf64Header::parse(&ehdr_buf)?;

        if !hdr.is_executable() {
            return Err(LoadError::NotExecutable);
        }
        if hdr.e_machine != abi::EM_RISCV {
            return Err(LoadError::WrongMachine);
        }
        if hdr.e_phnum == 0 {
            return Err(LoadError::NoSegments);
        }
        if hdr.e_entry < self.base || hdr.e_entry >= self.limit {
            return Err(LoadError::EntryOutsideWindow);
        }

        // The program header table must fit inside the image.
        let table_len = hdr.e_phnum as u64 * abi::PHDR_SIZE as u64;
        let table_end = hdr
            .e_phoff
            .checked_add(table_len)
            .ok_or(LoadError::TableOutOfBounds)?;
        if table_end > file_size {
            return Err(LoadError::TableOutOfBounds);
        }

        for i in 0..hdr.e_phnum {
            let ph_off = hdr.e_phoff + i as u64 * abi::PHDR_SIZE as u64;

            let mut phdr_buf = [0u8; abi::PHDR_SIZE];
            read_exact_at(src, ph_off, &mut phdr_buf)?;

            let phdr = Elf64Phdr::parse(&phdr_buf)?;
            if !phdr.is_load() {
                continue;
            }

            self.place(src, mem, &phdr, file_size)?;
        }

        Ok(hdr.e_entry)
    }

    fn place<S: Source, M: Memory>(
        &self,
        src: &mut S,
        mem: &mut M,
        phdr: &Elf64Phdr,
        file_size: u64,
    ) -> Result<(), LoadError<S::Error>> {
        if phdr.p_memsz < phdr.p_filesz {
            return Err(LoadError::BadSegmentSize);
        }
        if phdr.p_memsz == 0 {
            return Ok(());
        }

        // Destination range must lie inside the load window.
        let dst_end = phdr
            .p_vaddr
            .checked_add(phdr.p_memsz)
            .ok_or(LoadError::SegmentOutsideWindow)?;
        if phdr.p_vaddr < self.base || dst_end > self.limit {
            return Err(LoadError::SegmentOutsideWindow);
        }

        // File slice must lie inside the image.
        let src_end = phdr
            .p_offset
            .checked_add(phdr.p_filesz)
            .ok_or(LoadError::SegmentOutOfBounds)?;
        if src_end > file_size {
            return Err(LoadError::SegmentOutOfBounds);
        }

        let file_len = phdr.p_filesz as usize;
        let dst = mem.segment_mut(phdr.p_vaddr, phdr.p_memsz as usize);

        read_exact_at(src, phdr.p_offset, &mut dst[..file_len])?;

        // Zero-fill the bss tail.
        dst[file_len..].fill(0);

        Ok(())
    }
}

fn read_exact_at<S: Source>(
    src: &mut S,
    pos: u64,
    buf: &mut [u8],
) -> Result<(), LoadError<S::Error>> {
    let mut done = 0;

    while done < buf.len() {
        let n = src
            .read_at(pos + done as u64, &mut buf[done..])
            .map_err(LoadError::Source)?;
        if n == 0 {
            return Err(LoadError::UnexpectedEof);
        }
        done += n;
    }

    Ok(())
}
