//! Constants from the ELF specification and the System V ABI.

/// ELF magic bytes (`\x7fELF`).
pub const ELFMAG: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// `e_ident` index of the file class byte.
pub const EI_CLASS: usize = 4;
/// `e_ident` index of the data encoding byte.
pub const EI_DATA: usize = 5;
/// `e_ident` index of the file version byte.
pub const EI_VERSION: usize = 6;

/// 64-bit object file class.
pub const ELFCLASS64: u8 = 2;
/// Little-endian data encoding.
pub const ELFDATA2LSB: u8 = 1;
/// Current ELF version.
pub const EV_CURRENT: u8 = 1;

/// Executable file type.
pub const ET_EXEC: u16 = 2;

/// RISC-V machine type.
pub const EM_RISCV: u16 = 243;

/// Loadable program segment.
pub const PT_LOAD: u32 = 1;

/// Executable segment flag.
pub const PF_X: u32 = 0x1;
/// Writable segment flag.
pub const PF_W: u32 = 0x2;
/// Readable segment flag.
pub const PF_R: u32 = 0x4;

/// Size of the ELF64 file header.
pub const EHDR_SIZE: usize = 64;
/// Size of an ELF64 program header entry.
pub const PHDR_SIZE: usize = 56;
