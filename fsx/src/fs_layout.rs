//! On-disk layout of an fsx image.
//!
//! The device is an array of 1024-byte blocks:
//!
//! ```text
//! | 0: superblock | inode bitmap | block bitmap | inode table | data blocks ... |
//! ```
//!
//! All integers are stored little-endian. Records are encoded and decoded
//! field by field so the in-memory types never depend on `repr(C)` layout.

use std::borrow::Cow;

/// Size of one device and filesystem block in bytes.
pub const BLOCK_SIZE: usize = 1024;

/// Magic number stored in the first word of the superblock.
pub const FS_MAGIC: u32 = 0x3736_3030;

/// Inode number of the root directory. Inode 0 is never handed out.
pub const ROOT_INODE: u32 = 1;

pub const N_DIRECT: usize = 6;
pub const FILENAME_SIZE: usize = 28;
/// Longest name a directory entry can hold (the last byte stays NUL).
pub const MAX_NAME_LEN: usize = FILENAME_SIZE - 1;

pub const INODE_SIZE: usize = 64;
pub const DIRENT_SIZE: usize = 32;
pub const POINTER_SIZE: usize = 4;

pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;
pub const DIRENTS_PER_BLOCK: usize = BLOCK_SIZE / DIRENT_SIZE;
pub const PTRS_PER_BLOCK: usize = BLOCK_SIZE / POINTER_SIZE;
pub const BITS_PER_BLOCK: usize = BLOCK_SIZE * 8;

// File type bits, same values as the host's stat(2) mode.
pub const S_IFMT: u32 = 0o170000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;

pub fn is_dir_mode(mode: u32) -> bool {
    mode & S_IFMT == S_IFDIR
}

fn get_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

fn get_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn put_u16(buf: &mut [u8], off: usize, v: u16) {
    buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

/// Filesystem-wide parameters, read once at mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
    pub magic: u32,
    /// Inode bitmap size in blocks.
    pub inode_map_sz: u32,
    /// Inode table size in blocks.
    pub inode_region_sz: u32,
    /// Block bitmap size in blocks.
    pub block_map_sz: u32,
    /// Total blocks, including the superblock, bitmaps and inode table.
    pub num_blocks: u32,
    pub root_inode: u32,
}

impl Superblock {
    pub fn decode(buf: &[u8]) -> Self {
        Self {
            magic: get_u32(buf, 0),
            inode_map_sz: get_u32(buf, 4),
            inode_region_sz: get_u32(buf, 8),
            block_map_sz: get_u32(buf, 12),
            num_blocks: get_u32(buf, 16),
            root_inode: get_u32(buf, 20),
        }
    }

    /// Encodes into a full, zero-padded block.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; BLOCK_SIZE];
        put_u32(&mut buf, 0, self.magic);
        put_u32(&mut buf, 4, self.inode_map_sz);
        put_u32(&mut buf, 8, self.inode_region_sz);
        put_u32(&mut buf, 12, self.block_map_sz);
        put_u32(&mut buf, 16, self.num_blocks);
        put_u32(&mut buf, 20, self.root_inode);
        buf
    }
}

/// Block addresses of each region, derived from the superblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub inode_map_base: u32,
    pub inode_map_blocks: u32,
    pub block_map_base: u32,
    pub block_map_blocks: u32,
    pub inode_base: u32,
    pub inode_blocks: u32,
    /// First block after the metadata regions.
    pub data_start: u32,
    pub n_inodes: u32,
    pub n_blocks: u32,
}

impl Geometry {
    pub fn from_superblock(sb: &Superblock) -> Self {
        let inode_map_base = 1;
        let block_map_base = inode_map_base + sb.inode_map_sz;
        let inode_base = block_map_base + sb.block_map_sz;
        Self {
            inode_map_base,
            inode_map_blocks: sb.inode_map_sz,
            block_map_base,
            block_map_blocks: sb.block_map_sz,
            inode_base,
            inode_blocks: sb.inode_region_sz,
            data_start: inode_base + sb.inode_region_sz,
            n_inodes: sb.inode_region_sz * INODES_PER_BLOCK as u32,
            n_blocks: sb.num_blocks,
        }
    }

    /// Inode table block holding `inum`.
    pub fn inode_block(&self, inum: u32) -> u32 {
        self.inode_base + inum / INODES_PER_BLOCK as u32
    }
}

/// Metadata and block pointers of one file or directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Inode {
    pub uid: u16,
    pub gid: u16,
    /// Permission and type bits.
    pub mode: u32,
    pub ctime: u32,
    pub mtime: u32,
    /// Valid bytes in the file. Stored on disk as a signed 32-bit value.
    pub size: u32,
    pub direct: [u32; N_DIRECT],
    pub indir_1: u32,
    pub indir_2: u32,
}

impl Inode {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_dir(&self) -> bool {
        is_dir_mode(self.mode)
    }

    pub fn decode(buf: &[u8]) -> Self {
        let mut direct = [0u32; N_DIRECT];
        for (i, d) in direct.iter_mut().enumerate() {
            *d = get_u32(buf, 20 + i * 4);
        }
        Self {
            uid: get_u16(buf, 0),
            gid: get_u16(buf, 2),
            mode: get_u32(buf, 4),
            ctime: get_u32(buf, 8),
            mtime: get_u32(buf, 12),
            size: get_u32(buf, 16),
            direct,
            indir_1: get_u32(buf, 44),
            indir_2: get_u32(buf, 48),
        }
    }

    /// Writes the 64-byte record into `buf`; the trailing pad is zeroed.
    pub fn encode_into(&self, buf: &mut [u8]) {
        put_u16(buf, 0, self.uid);
        put_u16(buf, 2, self.gid);
        put_u32(buf, 4, self.mode);
        put_u32(buf, 8, self.ctime);
        put_u32(buf, 12, self.mtime);
        put_u32(buf, 16, self.size);
        for (i, d) in self.direct.iter().enumerate() {
            put_u32(buf, 20 + i * 4, *d);
        }
        put_u32(buf, 44, self.indir_1);
        put_u32(buf, 48, self.indir_2);
        buf[52..INODE_SIZE].fill(0);
    }
}

const DIRENT_VALID: u32 = 1 << 0;
const DIRENT_IS_DIR: u32 = 1 << 1;
const DIRENT_INODE_SHIFT: u32 = 2;

/// Fixed-size record mapping a name to an inode inside a directory block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    pub valid: bool,
    pub is_dir: bool,
    /// 30-bit inode reference.
    pub inode: u32,
    pub name: [u8; FILENAME_SIZE],
}

impl DirEntry {
    pub fn empty() -> Self {
        Self {
            valid: false,
            is_dir: false,
            inode: 0,
            name: [0; FILENAME_SIZE],
        }
    }

    /// Builds a valid entry. Names longer than `MAX_NAME_LEN` are cut so the
    /// terminating NUL always fits; path parsing rejects them before this.
    pub fn new(inode: u32, name: &str, is_dir: bool) -> Self {
        let mut e = DirEntry::empty();
        e.valid = true;
        e.is_dir = is_dir;
        e.inode = inode;
        e.set_name(name);
        e
    }

    pub fn set_name(&mut self, name: &str) {
        let bytes = name.as_bytes();
        let len = bytes.len().min(MAX_NAME_LEN);
        self.name = [0; FILENAME_SIZE];
        self.name[..len].copy_from_slice(&bytes[..len]);
    }

    /// Name bytes up to the first NUL.
    pub fn name_bytes(&self) -> &[u8] {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(FILENAME_SIZE);
        &self.name[..end]
    }

    pub fn name_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.name_bytes())
    }

    pub fn name_eq(&self, name: &str) -> bool {
        self.name_bytes() == name.as_bytes()
    }

    pub fn decode(buf: &[u8]) -> Self {
        let word = get_u32(buf, 0);
        let mut name = [0u8; FILENAME_SIZE];
        name.copy_from_slice(&buf[4..DIRENT_SIZE]);
        Self {
            valid: word & DIRENT_VALID != 0,
            is_dir: word & DIRENT_IS_DIR != 0,
            inode: word >> DIRENT_INODE_SHIFT,
            name,
        }
    }

    pub fn encode_into(&self, buf: &mut [u8]) {
        let mut word = (self.inode & 0x3fff_ffff) << DIRENT_INODE_SHIFT;
        if self.valid {
            word |= DIRENT_VALID;
        }
        if self.is_dir {
            word |= DIRENT_IS_DIR;
        }
        put_u32(buf, 0, word);
        buf[4..DIRENT_SIZE].copy_from_slice(&self.name);
    }
}

/// Decodes a block of block numbers (an indirect block).
pub fn decode_pointers(buf: &[u8]) -> Vec<u32> {
    buf.chunks_exact(POINTER_SIZE)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

pub fn encode_pointers(ptrs: &[u32]) -> Vec<u8> {
    let mut buf = vec![0u8; BLOCK_SIZE];
    for (chunk, p) in buf.chunks_exact_mut(POINTER_SIZE).zip(ptrs) {
        chunk.copy_from_slice(&p.to_le_bytes());
    }
    buf
}
