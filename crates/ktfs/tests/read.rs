mod common;

use common::{standard_image, Counting, ImageBuilder};
use ktfs::{Cache, Error, Ktfs, MemDisk, BLOCK_SIZE};

fn mounted() -> Ktfs<Counting<MemDisk>> {
    let cache = Cache::new(Counting::new(standard_image())).unwrap();
    Ktfs::mount(cache).unwrap()
}

#[test]
fn mount_reads_the_superblock() {
    let fs = mounted();
    let sb = fs.superblock();

    assert_eq!(sb.block_count, 64);
    assert_eq!(sb.inode_bitmap_blocks, 1);
    assert_eq!(sb.block_bitmap_blocks, 1);
    assert_eq!(sb.inode_blocks, 1);
    assert_eq!(sb.root_inode, 0);
}

#[test]
fn open_rejects_non_root_paths() {
    let mut fs = mounted();

    assert!(matches!(fs.open(""), Err(Error::NotSupported)));
    assert!(matches!(fs.open("\\"), Err(Error::NotSupported)));
    assert!(matches!(fs.open("a/b"), Err(Error::NotSupported)));
    assert!(matches!(fs.open("/a/b"), Err(Error::NotSupported)));
    assert!(matches!(fs.open("///"), Err(Error::NotSupported)));
}

#[test]
fn open_missing_file_is_no_entry() {
    let mut fs = mounted();
    assert!(matches!(fs.open("nope"), Err(Error::NoEntry)));
}

#[test]
fn reads_a_small_file() {
    let mut fs = mounted();
    let mut file = fs.open("hello").unwrap();

    assert_eq!(file.size(), 4);
    assert_eq!(file.name(), b"hello");

    let mut buf = [0u8; 16];
    let n = fs.read(&mut file, &mut buf).unwrap();
    assert_eq!(n, 4);
    assert_eq!(&buf[..4], b"TEST");
    assert_eq!(file.pos(), 4);

    // End of file.
    assert_eq!(fs.read(&mut file, &mut buf).unwrap(), 0);
}

#[test]
fn leading_slashes_are_skipped() {
    let mut fs = mounted();
    let file = fs.open("/hello").unwrap();
    assert_eq!(file.size(), 4);
}

#[test]
fn reopen_returns_identical_contents() {
    let mut fs = mounted();

    let mut first = Vec::new();
    let mut file = fs.open("indirect").unwrap();
    let mut buf = [0u8; 700];
    loop {
        let n = fs.read(&mut file, &mut buf).unwrap();
        if n == 0 {
            break;
        }
        first.extend_from_slice(&buf[..n]);
    }
    assert_eq!(first.len() as u64, file.size());

    let mut second = Vec::new();
    let mut file = fs.open("indirect").unwrap();
    loop {
        let n = fs.read(&mut file, &mut buf).unwrap();
        if n == 0 {
            break;
        }
        second.extend_from_slice(&buf[..n]);
    }

    assert_eq!(first, second);
}

#[test]
fn read_straddles_direct_and_indirect_blocks() {
    let mut fs = mounted();
    let mut file = fs.open("indirect").unwrap();

    // Last 8 bytes of direct block 3 ('D'), first 8 of the single-indirect
    // block ('E').
    fs.seek(&mut file, 4 * BLOCK_SIZE as u64 - 8).unwrap();

    let mut buf = [0u8; 16];
    assert_eq!(fs.read(&mut file, &mut buf).unwrap(), 16);
    assert_eq!(&buf[..8], &[b'D'; 8]);
    assert_eq!(&buf[8..], &[b'E'; 8]);
}

#[test]
fn double_indirect_boundary_maps_correctly() {
    let mut fs = mounted();
    let mut file = fs.open("big").unwrap();

    // First byte of the first double-indirect data block, at logical offset
    // (direct + single-indirect span) * block size.
    fs.seek(&mut file, (4 + 128) * BLOCK_SIZE as u64).unwrap();

    let mut buf = [0u8; 8];
    assert_eq!(fs.read(&mut file, &mut buf).unwrap(), 8);
    assert_eq!(buf, [b'Z'; 8]);
}

#[test]
fn unmapped_blocks_read_as_no_entry() {
    let mut fs = mounted();
    let mut file = fs.open("big").unwrap();

    // The sparse file has no direct blocks; reading from the start fails
    // before any byte is produced.
    let mut buf = [0u8; 8];
    assert!(matches!(fs.read(&mut file, &mut buf), Err(Error::NoEntry)));
}

#[test]
fn seek_is_bounded_by_the_file_size() {
    let mut fs = mounted();
    let mut file = fs.open("hello").unwrap();

    // Seeking exactly to the end is permitted; past it is not.
    fs.seek(&mut file, 4).unwrap();
    assert_eq!(file.pos(), 4);
    assert!(matches!(fs.seek(&mut file, 5), Err(Error::Invalid)));
    assert_eq!(file.pos(), 4);

    let mut buf = [0u8; 4];
    assert_eq!(fs.read(&mut file, &mut buf).unwrap(), 0);
}

#[test]
fn midstream_mapping_failure_returns_the_short_count() {
    // A file that claims two blocks but only maps the first.
    let mut b = ImageBuilder::new(16);
    b.inode(0, 16, [common::ROOT_DIR_BLOCK, 0, 0, 0], 0, [0, 0]);
    b.dirent(common::ROOT_DIR_BLOCK, 0, 1, "torn");
    b.inode(1, 600, [5, 0, 0, 0], 0, [0, 0]);
    b.fill(5, b'x');

    let cache = Cache::new(b.disk()).unwrap();
    let mut fs = Ktfs::mount(cache).unwrap();
    let mut file = fs.open("torn").unwrap();

    // The first block is delivered, then the hole stops the read short.
    let mut buf = [0u8; 600];
    assert_eq!(fs.read(&mut file, &mut buf).unwrap(), BLOCK_SIZE);
    assert_eq!(&buf[..BLOCK_SIZE], &[b'x'; BLOCK_SIZE][..]);

    // With nothing delivered, the error surfaces directly.
    assert!(matches!(fs.read(&mut file, &mut buf), Err(Error::NoEntry)));
}

#[test]
fn directory_names_compare_bounded() {
    // An entry whose name occupies the full field (no room for the NUL).
    let mut b = ImageBuilder::new(16);
    b.inode(0, 16, [common::ROOT_DIR_BLOCK, 0, 0, 0], 0, [0, 0]);
    b.dirent(common::ROOT_DIR_BLOCK, 0, 1, "abcdefghijk");
    b.inode(1, 1, [5, 0, 0, 0], 0, [0, 0]);
    b.fill(5, b'!');

    let cache = Cache::new(b.disk()).unwrap();
    let mut fs = Ktfs::mount(cache).unwrap();

    // Exact match works, and so does a longer name truncated by the on-disk
    // limit; a shorter prefix does not match.
    assert!(fs.open("abcdefghijk").is_ok());
    assert!(fs.open("abcdefghijklmnop").is_ok());
    assert!(matches!(fs.open("abcdefghij"), Err(Error::NoEntry)));
}

#[test]
fn file_reads_go_through_the_cache() {
    let mut fs = mounted();

    let mut file = fs.open("hello").unwrap();
    let mut buf = [0u8; 4];
    fs.read(&mut file, &mut buf).unwrap();
    let after_first = fs.into_cache().storage().fetches.get();

    // Mount + open + read again: opening and re-reading the same blocks hits
    // the cache, so a second pass adds no backing fetches.
    let cache = Cache::new(Counting::new(standard_image())).unwrap();
    let mut fs = Ktfs::mount(cache).unwrap();
    let mut file = fs.open("hello").unwrap();
    fs.read(&mut file, &mut buf).unwrap();
    let once = fs.read(&mut file, &mut buf).unwrap();
    assert_eq!(once, 0);

    let mut file = fs.open("hello").unwrap();
    fs.read(&mut file, &mut buf).unwrap();

    assert_eq!(fs.into_cache().storage().fetches.get(), after_first);
}