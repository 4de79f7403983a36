//! Minimal ELF64 little-endian parser and executable loader.
//! Supports reading the ELF header, decoding program headers, and placing
//! `PT_LOAD` segments into a fixed load window.
//!
//! Safety model:
//! - Uses bounds-checked slicing + manual LE decoding.
//! - No unsafe required.

#![no_std]

pub mod abi;

mod load;

pub use load::{LoadError, Loader, Memory, Source};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    TooSmall,
    BadMagic,
    NotElf64,
    NotLittleEndian,
    BadVersion,
    BadHeaderSize,
    BadPhEntSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf64Header {
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u64,
    pub e_phoff: u64,
    pub e_shoff: u64,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

impl Elf64Header {
    /// Parses the ELF64 file header from the first [`abi::EHDR_SIZE`] bytes of `data`.
    pub fn parse(data: &[u8]) -> Result<Self, ElfError> {
        if data.len() < abi::EHDR_SIZE {
            return Err(ElfError::TooSmall);
        }

        // e_ident
        if data[0..4] != abi::ELFMAG {
            return Err(ElfError::BadMagic);
        }
        if data[abi::EI_CLASS] != abi::ELFCLASS64 {
            return Err(ElfError::NotElf64);
        }
        if data[abi::EI_DATA] != abi::ELFDATA2LSB {
            return Err(ElfError::NotLittleEndian);
        }
        if data[abi::EI_VERSION] != abi::EV_CURRENT {
            return Err(ElfError::BadVersion);
        }

        // Fixed offsets for ELF64 header fields (System V ABI).
        // Layout:
        // 0x00 e_ident[16]
        // 0x10 e_type (2)
        // 0x12 e_machine (2)
        // 0x14 e_version (4)
        // 0x18 e_entry (8)
        // 0x20 e_phoff (8)
        // 0x28 e_shoff (8)
        // 0x30 e_flags (4)
        // 0x34 e_ehsize (2)
        // 0x36 e_phentsize (2)
        // 0x38 e_phnum (2)
        // 0x3A e_shentsize (2)
        // 0x3C e_shnum (2)
        // 0x3E e_shstrndx (2)

        let hdr = Self {
            e_type: read_u16_le(&data[0x10..]),
            e_machine: read_u16_le(&data[0x12..]),
            e_version: read_u32_le(&data[0x14..]),
            e_entry: read_u64_le(&data[0x18..]),
            e_phoff: read_u64_le(&data[0x20..]),
            e_shoff: read_u64_le(&data[0x28..]),
            e_flags: read_u32_le(&data[0x30..]),
            e_ehsize: read_u16_le(&data[0x34..]),
            e_phentsize: read_u16_le(&data[0x36..]),
            e_phnum: read_u16_le(&data[0x38..]),
            e_shentsize: read_u16_le(&data[0x3A..]),
            e_shnum: read_u16_le(&data[0x3C..]),
            e_shstrndx: read_u16_le(&data[0x3E..]),
        };

        // Sanity checks.
        if hdr.e_ehsize as usize != abi::EHDR_SIZE {
            return Err(ElfError::BadHeaderSize);
        }
        if hdr.e_phnum != 0 && hdr.e_phentsize as usize != abi::PHDR_SIZE {
            return Err(ElfError::BadPhEntSize);
        }

        Ok(hdr)
    }

    pub fn is_executable(&self) -> bool {
        self.e_type == abi::ET_EXEC
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf64Phdr {
    pub p_type: u32,
    pub p_flags: u32,
    pub p_offset: u64,
    pub p_vaddr: u64,
    pub p_paddr: u64,
    pub p_filesz: u64,
    pub p_memsz: u64,
    pub p_align: u64,
}

impl Elf64Phdr {
    /// Parses a program header entry from the first [`abi::PHDR_SIZE`] bytes of `data`.
    pub fn parse(data: &[u8]) -> Result<Self, ElfError> {
        // ELF64 Phdr is 56 bytes:
        // 0x00 p_type   (4)
        // 0x04 p_flags  (4)
        // 0x08 p_offset (8)
        // 0x10 p_vaddr  (8)
        // 0x18 p_paddr  (8)
        // 0x20 p_filesz (8)
        // 0x28 p_memsz  (8)
        // 0x30 p_align  (8)
        if data.len() < abi::PHDR_SIZE {
            return Err(ElfError::TooSmall);
        }
        Ok(Self {
            p_type: read_u32_le(&data[0x00..]),
            p_flags: read_u32_le(&data[0x04..]),
            p_offset: read_u64_le(&data[0x08..]),
            p_vaddr: read_u64_le(&data[0x10..]),
            p_paddr: read_u64_le(&data[0x18..]),
            p_filesz: read_u64_le(&data[0x20..]),
            p_memsz: read_u64_le(&data[0x28..]),
            p_align: read_u64_le(&data[0x30..]),
        })
    }

    pub fn is_load(&self) -> bool {
        self.p_type == abi::PT_LOAD
    }

    pub fn is_readable(&self) -> bool {
        (self.p_flags & abi::PF_R) != 0
    }

    pub fn is_writable(&self) -> bool {
        (self.p_flags & abi::PF_W) != 0
    }

    pub fn is_executable(&self) -> bool {
        (self.p_flags & abi::PF_X) != 0
    }
}

fn read_u16_le(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

fn read_u32_le(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn read_u64_le(b: &[u8]) -> u64 {
    u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}
