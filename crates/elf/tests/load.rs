use elf::{abi, LoadError, Loader, Memory, Source};

const WINDOW_BASE: u64 = 0x8010_0000;
const WINDOW_LIMIT: u64 = 0x8100_0000;

/// A segment to place in a synthesized image.
struct Segment {
    vaddr: u64,
    data: Vec<u8>,
    memsz: u64,
    p_type: u32,
}

impl Segment {
    fn load(vaddr: u64, data: &[u8], memsz: u64) -> Self {
        Self {
            vaddr,
            data: data.to_vec(),
            memsz,
            p_type: abi::PT_LOAD,
        }
    }
}

/// Builds a minimal rv64 ET_EXEC image with the given entry and segments.
fn build_image(entry: u64, segments: &[Segment]) -> Vec<u8> {
    let phoff = abi::EHDR_SIZE as u64;
    let data_off = phoff + (segments.len() * abi::PHDR_SIZE) as u64;

    let mut image = vec![0u8; data_off as usize];

    // e_ident
    image[0..4].copy_from_slice(&abi::ELFMAG);
    image[abi::EI_CLASS] = abi::ELFCLASS64;
    image[abi::EI_DATA] = abi::ELFDATA2LSB;
    image[abi::EI_VERSION] = abi::EV_CURRENT;

    put_u16(&mut image, 0x10, abi::ET_EXEC);
    put_u16(&mut image, 0x12, abi::EM_RISCV);
    put_u32(&mut image, 0x14, 1);
    put_u64(&mut image, 0x18, entry);
    put_u64(&mut image, 0x20, phoff);
    put_u16(&mut image, 0x34, abi::EHDR_SIZE as u16);
    put_u16(&mut image, 0x36, abi::PHDR_SIZE as u16);
    put_u16(&mut image, 0x38, segments.len() as u16);

    let mut off = data_off;
    for (i, seg) in segments.iter().enumerate() {
        let ph = phoff as usize + i * abi::PHDR_SIZE;
        put_u32(&mut image, ph, seg.p_type);
        put_u32(&mut image, ph + 0x04, abi::PF_R | abi::PF_X);
        put_u64(&mut image, ph + 0x08, off);
        put_u64(&mut image, ph + 0x10, seg.vaddr);
        put_u64(&mut image, ph + 0x20, seg.data.len() as u64);
        put_u64(&mut image, ph + 0x28, seg.memsz);
        put_u64(&mut image, ph + 0x30, 0x1000);

        image.extend_from_slice(&seg.data);
        off += seg.data.len() as u64;
    }

    image
}

fn put_u16(b: &mut [u8], off: usize, v: u16) {
    b[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

fn put_u32(b: &mut [u8], off: usize, v: u32) {
    b[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

fn put_u64(b: &mut [u8], off: usize, v: u64) {
    b[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

/// In-memory image source.
struct VecSource(Vec<u8>);

impl Source for VecSource {
    type Error = ();

    fn len(&mut self) -> Result<u64, ()> {
        Ok(self.0.len() as u64)
    }

    fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<usize, ()> {
        let pos = pos.min(self.0.len() as u64) as usize;
        let n = buf.len().min(self.0.len() - pos);
        buf[..n].copy_from_slice(&self.0[pos..pos + n]);
        Ok(n)
    }
}

/// A source that reports a larger size than it can deliver.
struct LyingSource(VecSource, u64);

impl Source for LyingSource {
    type Error = ();

    fn len(&mut self) -> Result<u64, ()> {
        Ok(self.1)
    }

    fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<usize, ()> {
        self.0.read_at(pos, buf)
    }
}

/// Window-backed destination memory.
struct WindowMem(Vec<u8>);

impl WindowMem {
    fn new() -> Self {
        Self(vec![0xEE; (WINDOW_LIMIT - WINDOW_BASE) as usize])
    }

    fn bytes(&self, addr: u64, len: usize) -> &[u8] {
        let off = (addr - WINDOW_BASE) as usize;
        &self.0[off..off + len]
    }
}

impl Memory for WindowMem {
    fn segment_mut(&mut self, addr: u64, len: usize) -> &mut [u8] {
        let off = (addr - WINDOW_BASE) as usize;
        &mut self.0[off..off + len]
    }
}

fn loader() -> Loader {
    Loader::new(WINDOW_BASE, WINDOW_LIMIT)
}

#[test]
fn places_segments_and_zeroes_bss() {
    let text = b"\x13\x05\x00\x00ret-and-some-code".to_vec();
    let image = build_image(
        WINDOW_BASE,
        &[Segment::load(WINDOW_BASE, &text, text.len() as u64 + 16)],
    );

    let mut mem = WindowMem::new();
    let entry = loader()
        .load(&mut VecSource(image), &mut mem)
        .expect("load failed");

    assert_eq!(entry, WINDOW_BASE);
    assert_eq!(mem.bytes(WINDOW_BASE, text.len()), &text[..]);
    assert_eq!(
        mem.bytes(WINDOW_BASE + text.len() as u64, 16),
        &[0u8; 16][..]
    );
}

#[test]
fn entry_bytes_come_from_the_containing_segment() {
    // Entry points into the middle of the segment; the bytes at the entry
    // address must equal the file contents at p_offset + (entry - p_vaddr).
    let data: Vec<u8> = (0..200u8).collect();
    let vaddr = WINDOW_BASE + 0x1000;
    let entry = vaddr + 64;

    let image = build_image(entry, &[Segment::load(vaddr, &data, data.len() as u64)]);
    let expected = data[64..80].to_vec();

    let mut mem = WindowMem::new();
    let got_entry = loader()
        .load(&mut VecSource(image), &mut mem)
        .expect("load failed");

    assert_eq!(got_entry, entry);
    assert_eq!(mem.bytes(entry, 16), &expected[..]);
}

#[test]
fn skips_non_load_segments() {
    let mut seg = Segment::load(0x10, b"ignored", 7);
    seg.p_type = 4; // PT_NOTE, with a vaddr far outside the window

    let code = Segment::load(WINDOW_BASE, b"code", 4);
    let image = build_image(WINDOW_BASE, &[seg, code]);

    let mut mem = WindowMem::new();
    assert!(loader().load(&mut VecSource(image), &mut mem).is_ok());
}

#[test]
fn rejects_bad_ident() {
    let good = build_image(WINDOW_BASE, &[Segment::load(WINDOW_BASE, b"x", 1)]);
    let mut mem = WindowMem::new();

    let mut bad_magic = good.clone();
    bad_magic[0] = 0x7E;
    assert!(matches!(
        loader().load(&mut VecSource(bad_magic), &mut mem),
        Err(LoadError::Header(elf::ElfError::BadMagic))
    ));

    let mut bad_class = good.clone();
    bad_class[abi::EI_CLASS] = 1; // ELFCLASS32
    assert!(matches!(
        loader().load(&mut VecSource(bad_class), &mut mem),
        Err(LoadError::Header(elf::ElfError::NotElf64))
    ));

    let mut bad_data = good;
    bad_data[abi::EI_DATA] = 2; // big-endian
    assert!(matches!(
        loader().load(&mut VecSource(bad_data), &mut mem),
        Err(LoadError::Header(elf::ElfError::NotLittleEndian))
    ));
}

#[test]
fn rejects_wrong_type_and_machine() {
    let good = build_image(WINDOW_BASE, &[Segment::load(WINDOW_BASE, b"x", 1)]);
    let mut mem = WindowMem::new();

    let mut dynamic = good.clone();
    put_u16(&mut dynamic, 0x10, 3); // ET_DYN
    assert!(matches!(
        loader().load(&mut VecSource(dynamic), &mut mem),
        Err(LoadError::NotExecutable)
    ));

    let mut x86 = good;
    put_u16(&mut x86, 0x12, 62); // EM_X86_64
    assert!(matches!(
        loader().load(&mut VecSource(x86), &mut mem),
        Err(LoadError::WrongMachine)
    ));
}

#[test]
fn rejects_entry_outside_window() {
    let mut mem = WindowMem::new();

    let below = build_image(WINDOW_BASE - 8, &[Segment::load(WINDOW_BASE, b"x", 1)]);
    assert!(matches!(
        loader().load(&mut VecSource(below), &mut mem),
        Err(LoadError::EntryOutsideWindow)
    ));

    let at_limit = build_image(WINDOW_LIMIT, &[Segment::load(WINDOW_BASE, b"x", 1)]);
    assert!(matches!(
        loader().load(&mut VecSource(at_limit), &mut mem),
        Err(LoadError::EntryOutsideWindow)
    ));
}

#[test]
fn rejects_bad_segment_geometry() {
    let mut mem = WindowMem::new();

    // memsz smaller than filesz
    let mut shrunk = Segment::load(WINDOW_BASE, b"longer than memsz", 4);
    shrunk.memsz = 4;
    let image = build_image(WINDOW_BASE, &[shrunk]);
    assert!(matches!(
        loader().load(&mut VecSource(image), &mut mem),
        Err(LoadError::BadSegmentSize)
    ));

    // destination straddles the end of the window
    let straddle = Segment::load(WINDOW_LIMIT - 4, b"12345678", 8);
    let image = build_image(WINDOW_LIMIT - 4, &[straddle]);
    assert!(matches!(
        loader().load(&mut VecSource(image), &mut mem),
        Err(LoadError::SegmentOutsideWindow)
    ));
}

#[test]
fn rejects_truncated_images() {
    let mut mem = WindowMem::new();

    // Program header table extends past the end of the file.
    let mut image = build_image(WINDOW_BASE, &[Segment::load(WINDOW_BASE, b"x", 1)]);
    put_u16(&mut image, 0x38, 40); // absurd e_phnum
    assert!(matches!(
        loader().load(&mut VecSource(image), &mut mem),
        Err(LoadError::TableOutOfBounds)
    ));

    // Segment file slice extends past the end of the file.
    let image = build_image(WINDOW_BASE, &[Segment::load(WINDOW_BASE, b"abcd", 4)]);
    let truncated = image[..image.len() - 2].to_vec();
    assert!(matches!(
        loader().load(&mut VecSource(truncated), &mut mem),
        Err(LoadError::SegmentOutOfBounds)
    ));
}

#[test]
fn short_reads_surface_as_eof() {
    let image = build_image(WINDOW_BASE, &[Segment::load(WINDOW_BASE, b"abcd", 4)]);
    let claimed = image.len() as u64 + 64;
    let mut truncated = image;
    truncated.truncate(truncated.len() - 2);

    let mut mem = WindowMem::new();
    assert!(matches!(
        loader().load(&mut LyingSource(VecSource(truncated), claimed), &mut mem),
        Err(LoadError::UnexpectedEof)
    ));
}
