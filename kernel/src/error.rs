//! Kernel-wide error kinds.

use core::fmt;

/// Result type used throughout the kernel.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors surfaced by kernel interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Invalid argument.
    Invalid,
    /// Device or resource busy.
    Busy,
    /// Operation not supported.
    NotSupported,
    /// I/O error.
    Io,
    /// Bad format.
    BadFormat,
    /// No such file or object.
    NoEntry,
    /// Too many open files.
    TooManyOpen,
    /// Out of memory.
    OutOfMemory,
    /// Too many threads.
    OutOfThreads,
    /// Object already exists.
    Exists,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Error::Invalid => "invalid argument",
            Error::Busy => "busy",
            Error::NotSupported => "not supported",
            Error::Io => "i/o error",
            Error::BadFormat => "bad format",
            Error::NoEntry => "no such entry",
            Error::TooManyOpen => "too many open files",
            Error::OutOfMemory => "out of memory",
            Error::OutOfThreads => "too many threads",
            Error::Exists => "already exists",
        })
    }
}

impl From<ktfs::Error<Error>> for Error {
    fn from(e: ktfs::Error<Error>) -> Self {
        match e {
            ktfs::Error::Storage(e) => e,
            ktfs::Error::Invalid => Error::Invalid,
            ktfs::Error::NotSupported => Error::NotSupported,
            ktfs::Error::NoEntry => Error::NoEntry,
            ktfs::Error::Busy => Error::Busy,
            _ => Error::Io,
        }
    }
}

impl From<elf::LoadError<Error>> for Error {
    fn from(e: elf::LoadError<Error>) -> Self {
        match e {
            elf::LoadError::Source(e) => e,
            elf::LoadError::UnexpectedEof => Error::Io,
            _ => Error::BadFormat,
        }
    }
}
