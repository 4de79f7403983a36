//! Read-only file system reader.

use crate::cache::{Cache, Storage};
use crate::error::Error;
use crate::layout::{
    DirEntry, Inode, Layout, Superblock, BLOCK_PTRS, BLOCK_SIZE, DINDIRECT_COUNT, DIRECT_COUNT,
    DIRENT_SIZE, INODE_SIZE,
};

/// An open file: a copy of its inode and directory entry plus the read
/// position. All metadata is copied out of the cache at open time, so a file
/// handle never pins cache blocks between operations.
#[derive(Debug, Clone)]
pub struct File {
    inode: Inode,
    entry: DirEntry,
    pos: u64,
    size: u64,
}

impl File {
    /// File length in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Current read position in bytes.
    pub fn pos(&self) -> u64 {
        self.pos
    }

    /// Name the file was opened under.
    pub fn name(&self) -> &[u8] {
        self.entry.name()
    }
}

/// A mounted ktfs volume over a block cache.
pub struct Ktfs<S: Storage> {
    cache: Cache<S>,
    superblock: Superblock,
    layout: Layout,
}

impl<S: Storage> Ktfs<S> {
    /// Mounts the volume whose superblock is at block 0 of the cached device.
    pub fn mount(mut cache: Cache<S>) -> Result<Self, Error<S::Error>> {
        let handle = cache.get(0)?;
        let superblock = Superblock::parse(cache.block(&handle));
        cache.release(handle, false);

        let layout = Layout::from_superblock(&superblock);

        Ok(Self {
            cache,
            superblock,
            layout,
        })
    }

    /// Returns the volume superblock.
    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    /// Opens the root-directory file named by `path`.
    ///
    /// The reader is root-flat: leading `/` separators are skipped, and any
    /// remaining separator (or an empty or `\` name) is rejected with
    /// [`Error::NotSupported`].
    pub fn open(&mut self, path: &str) -> Result<File, Error<S::Error>> {
        if path.is_empty() || path == "\\" {
            return Err(Error::NotSupported);
        }

        let name = path.trim_start_matches('/');
        if name.is_empty() || name.contains('/') {
            return Err(Error::NotSupported);
        }

        let (entry, inode) = self.find(name)?;

        Ok(File {
            size: inode.size as u64,
            inode,
            entry,
            pos: 0,
        })
    }

    /// Reads from the file's current position into `buf`.
    ///
    /// Returns the number of bytes copied, which is short when the file ends
    /// first; 0 at end of file. A mapping or cache error is returned only if
    /// nothing has been delivered yet, otherwise the short count stands.
    pub fn read(&mut self, file: &mut File, buf: &mut [u8]) -> Result<usize, Error<S::Error>> {
        if file.pos >= file.size {
            return Ok(0);
        }

        let want = buf.len().min((file.size - file.pos) as usize);
        let mut done = 0;

        while done < want {
            let offset = (file.pos % BLOCK_SIZE as u64) as usize;
            let chunk = (BLOCK_SIZE - offset).min(want - done);

            let result = self
                .map_block(&file.inode, file.pos / BLOCK_SIZE as u64)
                .and_then(|blkno| self.cache.get(blkno as u64 * BLOCK_SIZE as u64));

            let handle = match result {
                Ok(handle) => handle,
                Err(e) if done == 0 => return Err(e),
                Err(_) => break,
            };

            buf[done..done + chunk]
                .copy_from_slice(&self.cache.block(&handle)[offset..offset + chunk]);
            self.cache.release(handle, false);

            done += chunk;
            file.pos += chunk as u64;
        }

        Ok(done)
    }

    /// Repositions the file. Positions up to and including the file size are
    /// permitted.
    pub fn seek(&mut self, file: &mut File, pos: u64) -> Result<(), Error<S::Error>> {
        if pos > file.size {
            return Err(Error::Invalid);
        }

        file.pos = pos;
        Ok(())
    }

    /// Writes all dirty cached blocks back to the device.
    pub fn flush(&mut self) -> Result<(), Error<S::Error>> {
        self.cache.flush()
    }

    /// Consumes the volume and returns the underlying cache.
    pub fn into_cache(self) -> Cache<S> {
        self.cache
    }

    /// Loads an inode from the inode table.
    fn read_inode(&mut self, ino: u32) -> Result<Inode, Error<S::Error>> {
        if ino >= self.layout.inode_count {
            return Err(Error::NoEntry);
        }

        let block = self.layout.inode_table_start + ino / self.layout.inodes_per_block;
        let offset = (ino % self.layout.inodes_per_block) as usize * INODE_SIZE;

        let handle = self.cache.get(block as u64 * BLOCK_SIZE as u64)?;
        let inode = Inode::parse(&self.cache.block(&handle)[offset..offset + INODE_SIZE]);
        self.cache.release(handle, false);

        Ok(inode)
    }

    /// Reads entry `index` of the block-number array stored in block `blkno`.
    fn block_entry(&mut self, blkno: u32, index: usize) -> Result<u32, Error<S::Error>> {
        if blkno == 0 {
            return Err(Error::NoEntry);
        }
        if index >= BLOCK_PTRS {
            return Err(Error::Invalid);
        }

        let handle = self.cache.get(blkno as u64 * BLOCK_SIZE as u64)?;
        let raw = self.cache.block(&handle);
        let entry = u32::from_le_bytes([
            raw[index * 4],
            raw[index * 4 + 1],
            raw[index * 4 + 2],
            raw[index * 4 + 3],
        ]);
        self.cache.release(handle, false);

        Ok(entry)
    }

    /// Maps a logical block index within a file to a physical block number,
    /// walking direct, single-indirect, and double-indirect pointers. Any
    /// null pointer on the path reports [`Error::NoEntry`].
    fn map_block(&mut self, inode: &Inode, index: u64) -> Result<u32, Error<S::Error>> {
        const PTRS: u64 = BLOCK_PTRS as u64;

        if index < DIRECT_COUNT as u64 {
            return nonnull(inode.direct[index as usize]);
        }

        let mut index = index - DIRECT_COUNT as u64;

        if index < PTRS {
            nonnull(inode.indirect)?;
            let blkno = self.block_entry(inode.indirect, index as usize)?;
            return nonnull(blkno);
        }

        index -= PTRS;

        for i in 0..DINDIRECT_COUNT {
            let span = PTRS * PTRS;
            if index < span {
                nonnull(inode.dindirect[i])?;
                let level1 = self.block_entry(inode.dindirect[i], (index / PTRS) as usize)?;
                nonnull(level1)?;
                let level2 = self.block_entry(level1, (index % PTRS) as usize)?;
                return nonnull(level2);
            }
            index -= span;
        }

        Err(Error::Invalid)
    }

    /// Looks `name` up in the root directory and returns the matching entry
    /// together with the inode it references.
    fn find(&mut self, name: &str) -> Result<(DirEntry, Inode), Error<S::Error>> {
        let root = self.read_inode(self.superblock.root_inode)?;
        let entries = root.size as u64 / DIRENT_SIZE as u64;

        for i in 0..entries {
            let blkno = self.map_block(&root, i / self.layout.dirents_per_block as u64)?;

            let handle = self.cache.get(blkno as u64 * BLOCK_SIZE as u64)?;
            let offset = (i % self.layout.dirents_per_block as u64) as usize * DIRENT_SIZE;
            let entry = DirEntry::parse(&self.cache.block(&handle)[offset..offset + DIRENT_SIZE]);
            self.cache.release(handle, false);

            if entry.is_live() && entry.name_matches(name) {
                let inode = self.read_inode(entry.inode)?;
                return Ok((entry, inode));
            }
        }

        Err(Error::NoEntry)
    }
}

fn nonnull<E>(blkno: u32) -> Result<u32, Error<E>> {
    if blkno == 0 {
        Err(Error::NoEntry)
    } else {
        Ok(blkno)
    }
}
