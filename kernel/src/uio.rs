//! Uniform I/O.
//!
//! Files, devices, and the console are all reached through [`Uio`] handles.
//! A handle is reference counted: clones share the same endpoint, and the
//! backing close runs when the last clone is dropped.

#![allow(unused)]

use alloc::boxed::Box;
use alloc::sync::Arc;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::error::{Error, Result};

/// Control operations understood by uniform I/O endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cntl {
    /// Query the size of the endpoint in bytes.
    GetEnd,
    /// Set the size of the endpoint in bytes.
    SetEnd(u64),
    /// Query the current position.
    GetPos,
    /// Set the current position.
    SetPos(u64),
}

/// Operations a backing endpoint may support. Unimplemented operations
/// report [`Error::NotSupported`].
pub trait UioOps: Send {
    /// Reads into `buf`, returning the number of bytes delivered.
    fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Err(Error::NotSupported)
    }

    /// Writes from `buf`, returning the number of bytes consumed.
    fn write(&mut self, _buf: &[u8]) -> Result<usize> {
        Err(Error::NotSupported)
    }

    /// Performs a control operation; queries return their result.
    fn cntl(&mut self, _op: Cntl) -> Result<u64> {
        Err(Error::NotSupported)
    }

    /// Releases the backing endpoint. Runs once, when the last handle goes
    /// away.
    fn close(&mut self) {}
}

struct UioCell {
    ops: Mutex<Box<dyn UioOps>>,
}

/// A reference-counted handle on an I/O endpoint.
pub struct Uio {
    cell: Arc<UioCell>,
}

impl Uio {
    /// Wraps an endpoint in a fresh handle with one reference.
    pub fn new(ops: impl UioOps + 'static) -> Self {
        Self {
            cell: Arc::new(UioCell {
                ops: Mutex::new(Box::new(ops)),
            }),
        }
    }

    /// Returns the shared null endpoint, whose reads and writes are not
    /// supported.
    pub fn null() -> Self {
        struct NullUio;
        impl UioOps for NullUio {}

        lazy_static! {
            static ref NULL: Uio = Uio::new(NullUio);
        }

        NULL.clone()
    }

    /// Reads into `buf` through the endpoint.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.cell.ops.lock().read(buf)
    }

    /// Writes from `buf` through the endpoint.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        self.cell.ops.lock().write(buf)
    }

    /// Performs a control operation on the endpoint.
    pub fn cntl(&self, op: Cntl) -> Result<u64> {
        self.cell.ops.lock().cntl(op)
    }

    /// Number of live handles on this endpoint.
    pub fn refcnt(&self) -> usize {
        Arc::strong_count(&self.cell)
    }

    /// Drops this handle; the backing endpoint closes with the last one.
    pub fn close(self) {
        drop(self);
    }
}

impl Clone for Uio {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl Drop for Uio {
    fn drop(&mut self) {
        // Last handle out closes the endpoint. Single-hart: no concurrent
        // clone can appear between the count check and the close.
        if Arc::strong_count(&self.cell) == 1 {
            self.cell.ops.lock().close();
        }
    }
}
