/// Errors reported by the cache and the file system reader.
///
/// `E` is the error type of the backing storage device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error<E> {
    /// The backing storage device reported an error.
    Storage(E),
    /// Invalid argument (misaligned position, out-of-range seek).
    Invalid,
    /// The operation or format is not supported.
    NotSupported,
    /// No such file, or a block pointer on the lookup path is null.
    NoEntry,
    /// Every cache slot is pinned.
    Busy,
}

impl<E: core::fmt::Display> core::fmt::Display for Error<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Storage(e) => write!(f, "storage error: {}", e),
            Error::Invalid => write!(f, "invalid argument"),
            Error::NotSupported => write!(f, "not supported"),
            Error::NoEntry => write!(f, "no such entry"),
            Error::Busy => write!(f, "busy"),
        }
    }
}
