//! Read-only implementation of the ktfs on-disk file system, together with
//! the write-back block cache that feeds it.
//!
//! The crate is independent of any particular storage device: both the cache
//! and the file system reader are generic over a [`Storage`] backend, and all
//! on-disk structures are decoded with explicit little-endian accesses rather
//! than by casting device memory.

#![no_std]

extern crate alloc;

mod cache;
mod error;
mod fs;
mod layout;
mod memdisk;

pub use cache::{BlockHandle, Cache, Storage, CACHE_BLOCKS};
pub use error::Error;
pub use fs::{File, Ktfs};
pub use layout::{
    DirEntry, Inode, Layout, Superblock, BLOCK_PTRS, BLOCK_SIZE, DINDIRECT_COUNT, DIRECT_COUNT,
    DIRENT_SIZE, INODE_SIZE, MAX_NAME_LEN, SUPERBLOCK_SIZE,
};
pub use memdisk::{MemDisk, OutOfRange};
