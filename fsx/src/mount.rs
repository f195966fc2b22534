//! A mounted fsx filesystem and its path-based entry points.

use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};

use crate::bitmap::BitSet;
use crate::device::BlockDevice;
use crate::error::{FsError, Result};
use crate::fs_layout::{
    Geometry, Inode, Superblock, BITS_PER_BLOCK, BLOCK_SIZE, FS_MAGIC, INODES_PER_BLOCK,
    INODE_SIZE, MAX_NAME_LEN, ROOT_INODE, S_IFDIR, S_IFMT, S_IFREG,
};
use crate::mapper::{Tier, MAX_FILE_SIZE};
use crate::path::parse;

/// Attributes of one file or directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub inum: u32,
    pub mode: u32,
    pub uid: u16,
    pub gid: u16,
    pub size: u64,
    /// Blocks of `blksize` bytes covered by `size`.
    pub blocks: u64,
    pub blksize: u32,
    pub nlink: u32,
    pub ctime: u32,
    pub mtime: u32,
    /// Not stored; reported as `mtime`.
    pub atime: u32,
}

impl FileStat {
    fn from_inode(inum: u32, inode: &Inode) -> Self {
        let size = u64::from(inode.size);
        Self {
            inum,
            mode: inode.mode,
            uid: inode.uid,
            gid: inode.gid,
            size,
            blocks: size.div_ceil(BLOCK_SIZE as u64),
            blksize: BLOCK_SIZE as u32,
            nlink: 1,
            ctime: inode.ctime,
            mtime: inode.mtime,
            atime: inode.mtime,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirListing {
    pub name: String,
    pub stat: FileStat,
}

/// Filesystem-wide usage, as reported by `statfs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStats {
    pub block_size: u32,
    /// Blocks in the data region.
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub available_blocks: u64,
    pub total_inodes: u64,
    pub free_inodes: u64,
    pub max_name_len: u32,
}

/// Seconds since the epoch, as stored in inode timestamps.
pub(crate) fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Owner recorded on new inodes: the calling process.
pub(crate) fn process_owner() -> (u16, u16) {
    // SAFETY: getuid and getgid cannot fail and touch no memory.
    let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
    (uid as u16, gid as u16)
}

/// In-memory state of a mounted image: the superblock, both bitmaps and the
/// whole inode table. The device is owned exclusively for the lifetime of the
/// mount and every mutation is written through before returning.
pub struct FilesystemMount<D: BlockDevice> {
    pub(crate) device: D,
    pub(crate) superblock: Superblock,
    pub(crate) geo: Geometry,
    pub(crate) inode_map: BitSet,
    pub(crate) block_map: BitSet,
    pub(crate) inodes: Vec<Inode>,
    pub(crate) owner: (u16, u16),
}

fn corrupt(msg: impl Into<String>) -> FsError {
    FsError::Corrupt(msg.into())
}

// Checks the superblock against itself and the device before any region is
// addressed through it.
fn validate(sb: &Superblock, device_blocks: u32) -> Result<()> {
    if sb.magic != FS_MAGIC {
        return Err(corrupt(format!("bad magic {:#010x}", sb.magic)));
    }
    if sb.inode_map_sz == 0 || sb.block_map_sz == 0 || sb.inode_region_sz == 0 {
        return Err(corrupt("empty metadata region"));
    }
    let data_start = 1
        + u64::from(sb.inode_map_sz)
        + u64::from(sb.block_map_sz)
        + u64::from(sb.inode_region_sz);
    if sb.num_blocks > device_blocks || data_start >= u64::from(sb.num_blocks) {
        return Err(corrupt(format!(
            "regions do not fit: {} metadata blocks, {} in superblock, {} on device",
            data_start, sb.num_blocks, device_blocks
        )));
    }
    let n_inodes = u64::from(sb.inode_region_sz) * INODES_PER_BLOCK as u64;
    if u64::from(sb.inode_map_sz) * (BITS_PER_BLOCK as u64) < n_inodes
        || u64::from(sb.block_map_sz) * (BITS_PER_BLOCK as u64) < u64::from(sb.num_blocks)
    {
        return Err(corrupt("bitmap too small for its region"));
    }
    if sb.root_inode != ROOT_INODE {
        return Err(corrupt(format!("root inode is {}", sb.root_inode)));
    }
    Ok(())
}

impl<D: BlockDevice> FilesystemMount<D> {
    /// Reads the superblock, both bitmaps and the inode table from `device`.
    pub fn mount(device: D) -> Result<Self> {
        if device.num_blocks() == 0 {
            return Err(corrupt("empty device"));
        }
        let mut block = vec![0u8; BLOCK_SIZE];
        device.read(0, 1, &mut block)?;
        let superblock = Superblock::decode(&block);
        validate(&superblock, device.num_blocks())?;
        let geo = Geometry::from_superblock(&superblock);

        let mut map = vec![0u8; geo.inode_map_blocks as usize * BLOCK_SIZE];
        device.read(geo.inode_map_base, geo.inode_map_blocks, &mut map)?;
        let inode_map = BitSet::from_bytes(map);

        let mut map = vec![0u8; geo.block_map_blocks as usize * BLOCK_SIZE];
        device.read(geo.block_map_base, geo.block_map_blocks, &mut map)?;
        let block_map = BitSet::from_bytes(map);

        let mut table = vec![0u8; geo.inode_blocks as usize * BLOCK_SIZE];
        device.read(geo.inode_base, geo.inode_blocks, &mut table)?;
        let inodes: Vec<Inode> = table.chunks_exact(INODE_SIZE).map(Inode::decode).collect();

        if !inodes[ROOT_INODE as usize].is_dir() {
            return Err(corrupt("root inode is not a directory"));
        }

        info!(
            "mounted fsx: {} blocks, {} inodes, data at block {}",
            geo.n_blocks, geo.n_inodes, geo.data_start
        );
        Ok(Self {
            device,
            superblock,
            geo,
            inode_map,
            block_map,
            inodes,
            owner: process_owner(),
        })
    }

    /// The superblock read at mount time.
    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geo
    }

    /// Cached copy of inode `inum`, if it is within the table.
    pub fn inode(&self, inum: u32) -> Option<&Inode> {
        self.inodes.get(inum as usize)
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Flushes and hands back the device.
    pub fn into_device(mut self) -> Result<D> {
        self.device.flush(0, self.geo.n_blocks)?;
        Ok(self.device)
    }

    /// Attributes of the file or directory at `path`.
    pub fn stat(&self, path: &str) -> Result<FileStat> {
        let inum = self.resolve(path)?;
        Ok(FileStat::from_inode(inum, &self.inodes[inum as usize]))
    }

    /// Names and attributes of every entry of the directory at `path`, in
    /// slot order. `.` and `..` are not stored and not listed.
    pub fn list_directory(&self, path: &str) -> Result<Vec<DirListing>> {
        let inum = self.resolve(path)?;
        let block = self.load_dir(inum)?;
        block
            .iter()
            .map(|e| -> Result<DirListing> {
                let inode = self.inodes.get(e.inode as usize).ok_or_else(|| {
                    corrupt(format!("entry {} points to inode {}", e.name_str(), e.inode))
                })?;
                Ok(DirListing {
                    name: e.name_str().into_owned(),
                    stat: FileStat::from_inode(e.inode, inode),
                })
            })
            .collect()
    }

    /// Block and inode usage. Only the data region counts towards the block
    /// totals.
    pub fn statfs(&self) -> FsStats {
        let free = u64::from(self.count_free_blocks());
        FsStats {
            block_size: BLOCK_SIZE as u32,
            total_blocks: u64::from(self.geo.n_blocks - self.geo.data_start),
            free_blocks: free,
            available_blocks: free,
            total_inodes: u64::from(self.geo.n_inodes),
            free_inodes: u64::from(self.count_free_inodes()),
            max_name_len: MAX_NAME_LEN as u32,
        }
    }

    /// Creates a file or, with `is_dir`, a directory with its single entry
    /// block. Returns the new inode number.
    pub fn create(&mut self, path: &str, mode: u32, is_dir: bool) -> Result<u32> {
        let (parent, leaf) = self.resolve_parent(path)?;
        match self.lookup(parent, &leaf) {
            Ok(_) => return Err(FsError::AlreadyExists),
            Err(FsError::NotFound) => {}
            Err(e) => return Err(e),
        }
        // A full parent is reported before anything is reserved.
        self.load_dir(parent)?.find_free_slot()?;

        let inum = self.allocate_inode()?;
        let dir_block = if is_dir {
            match self.allocate_block() {
                Ok(blk) => Some(blk),
                Err(e) => {
                    self.free_inode(inum);
                    return Err(e);
                }
            }
        } else {
            None
        };

        let t = now();
        let (uid, gid) = self.owner;
        let type_bits = if is_dir { S_IFDIR } else { S_IFREG };
        let inode = &mut self.inodes[inum as usize];
        *inode = Inode {
            uid,
            gid,
            mode: (mode & !S_IFMT) | type_bits,
            ctime: t,
            mtime: t,
            ..Inode::empty()
        };
        if let Some(blk) = dir_block {
            inode.direct[0] = blk;
        }
        self.persist_inode(inum)?;
        if dir_block.is_some() {
            self.persist_block_bitmap()?;
        }
        self.add_entry(parent, &leaf, inum, is_dir)?;

        debug!("create {} -> inode {} (mode {:o})", path, inum, self.inodes[inum as usize].mode);
        Ok(inum)
    }

    /// Creates an empty regular file.
    pub fn mknod(&mut self, path: &str, mode: u32) -> Result<u32> {
        self.create(path, mode, false)
    }

    /// Creates an empty directory.
    pub fn mkdir(&mut self, path: &str, mode: u32) -> Result<u32> {
        self.create(path, mode, true)
    }

    /// Removes a regular file, releasing all of its blocks.
    pub fn unlink(&mut self, path: &str) -> Result<()> {
        let (parent, leaf) = self.resolve_parent(path)?;
        let inum = self.lookup(parent, &leaf)?;
        if self.inodes[inum as usize].is_dir() {
            return Err(FsError::IsADirectory);
        }
        self.release_file_blocks(inum)?;
        self.remove_entry(parent, &leaf)?;
        self.drop_inode(inum)?;
        debug!("unlink {} (inode {})", path, inum);
        Ok(())
    }

    /// Removes an empty directory.
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        if parse(path)?.is_empty() {
            return Err(FsError::InvalidArgument);
        }
        let (parent, leaf) = self.resolve_parent(path)?;
        let inum = self.lookup(parent, &leaf)?;
        if !self.inodes[inum as usize].is_dir() {
            return Err(FsError::NotADirectory);
        }
        if !self.load_dir(inum)?.is_empty() {
            return Err(FsError::NotEmpty);
        }
        let blk = self.inodes[inum as usize].direct[0];
        self.free_block(blk);
        self.remove_entry(parent, &leaf)?;
        self.drop_inode(inum)?;
        self.persist_block_bitmap()?;
        debug!("rmdir {} (inode {})", path, inum);
        Ok(())
    }

    /// `unlink` or `rmdir`, whichever fits the target.
    pub fn delete(&mut self, path: &str) -> Result<()> {
        let inum = self.resolve(path)?;
        if inum == ROOT_INODE {
            return Err(FsError::InvalidArgument);
        }
        if self.inodes[inum as usize].is_dir() {
            self.rmdir(path)
        } else {
            self.unlink(path)
        }
    }

    fn drop_inode(&mut self, inum: u32) -> Result<()> {
        self.inodes[inum as usize] = Inode::empty();
        self.free_inode(inum);
        self.persist_inode(inum)
    }

    /// Renames an entry within its directory.
    pub fn rename(&mut self, src: &str, dst: &str) -> Result<()> {
        if parse(src)?.is_empty() || parse(dst)?.is_empty() {
            return Err(FsError::InvalidArgument);
        }
        self.resolve(src)?;
        match self.resolve(dst) {
            Ok(_) => return Err(FsError::AlreadyExists),
            Err(e @ (FsError::Device(_) | FsError::Corrupt(_))) => return Err(e),
            Err(_) => {}
        }
        let (src_parent, src_leaf) = self.resolve_parent(src)?;
        // The source parent resolves, so a destination parent that does not
        // cannot be the same directory.
        let (dst_parent, dst_leaf) = match self.resolve_parent(dst) {
            Ok(found) => found,
            Err(e @ (FsError::Device(_) | FsError::Corrupt(_))) => return Err(e),
            Err(_) => return Err(FsError::InvalidArgument),
        };
        if src_parent != dst_parent {
            return Err(FsError::InvalidArgument);
        }

        let mut block = self.load_dir(src_parent)?;
        if !block.rename(&src_leaf, &dst_leaf) {
            return Err(FsError::NotFound);
        }
        self.store_dir(src_parent, &block)?;
        debug!("rename {} -> {}", src, dst);
        Ok(())
    }

    /// Replaces the permission bits; the file type is kept.
    pub fn change_mode(&mut self, path: &str, mode: u32) -> Result<()> {
        let inum = self.resolve(path)?;
        let inode = &mut self.inodes[inum as usize];
        inode.mode = (inode.mode & S_IFMT) | (mode & !S_IFMT);
        debug!("chmod {} {:o}", path, inode.mode);
        self.persist_inode(inum)
    }

    /// Sets the modification time, in seconds since the epoch.
    pub fn change_time(&mut self, path: &str, mtime: u32) -> Result<()> {
        let inum = self.resolve(path)?;
        self.inodes[inum as usize].mtime = mtime;
        debug!("utime {} {}", path, mtime);
        self.persist_inode(inum)
    }

    /// Truncates a file. Only truncation to zero length is supported.
    pub fn truncate(&mut self, path: &str, len: u64) -> Result<()> {
        if len != 0 {
            return Err(FsError::InvalidArgument);
        }
        let inum = self.resolve(path)?;
        if self.inodes[inum as usize].is_dir() {
            return Err(FsError::IsADirectory);
        }
        debug!("truncate {}", path);
        self.release_file_blocks(inum)
    }

    fn file_inode(&self, path: &str) -> Result<u32> {
        let inum = self.resolve(path)?;
        if self.inodes[inum as usize].is_dir() {
            return Err(FsError::IsADirectory);
        }
        Ok(inum)
    }

    fn dir_inode(&self, path: &str) -> Result<u32> {
        let inum = self.resolve(path)?;
        if !self.inodes[inum as usize].is_dir() {
            return Err(FsError::NotADirectory);
        }
        Ok(inum)
    }

    /// Checks that `path` is a file; the inode number serves as its handle.
    pub fn open(&self, path: &str) -> Result<u32> {
        self.file_inode(path)
    }

    /// Closes a file opened with `open`. Nothing is held open, so this only
    /// rechecks the path.
    pub fn release(&self, path: &str) -> Result<()> {
        self.file_inode(path).map(|_| ())
    }

    /// Checks that `path` is a directory and returns its inode number.
    pub fn opendir(&self, path: &str) -> Result<u32> {
        self.dir_inode(path)
    }

    /// Counterpart of `opendir`.
    pub fn releasedir(&self, path: &str) -> Result<()> {
        self.dir_inode(path).map(|_| ())
    }

    /// Reads up to `buf.len()` bytes at `offset`. Returns 0 at or past the
    /// end of the file, and a short count when a hole is reached.
    pub fn read(&self, path: &str, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let inum = self.file_inode(path)?;
        let size = u64::from(self.inodes[inum as usize].size);
        if offset >= size {
            return Ok(0);
        }
        let len = buf.len().min((size - offset) as usize);

        let mut done = 0;
        while done < len {
            let pos = offset + done as u64;
            let Some(tier) = Tier::containing(pos) else {
                break;
            };
            let n = ((tier.end() - pos) as usize).min(len - done);
            let got = self.read_tier(inum, tier, pos - tier.start(), &mut buf[done..done + n])?;
            done += got;
            if got < n {
                break;
            }
        }
        debug!("read {} at {}: {} of {} bytes", path, offset, done, buf.len());
        Ok(done)
    }

    /// Writes `data` at `offset`, which may not lie past the end of the
    /// file. Returns the number of bytes written; a short count means the
    /// device filled up or the file reached its maximum size part way.
    pub fn write(&mut self, path: &str, offset: u64, data: &[u8]) -> Result<usize> {
        let inum = self.file_inode(path)?;
        let size = u64::from(self.inodes[inum as usize].size);
        if offset > size {
            return Err(FsError::InvalidArgument);
        }
        if data.is_empty() {
            return Ok(0);
        }
        if offset >= MAX_FILE_SIZE {
            return Err(FsError::FileTooLarge);
        }

        let mut done = 0;
        while done < data.len() {
            let pos = offset + done as u64;
            let Some(tier) = Tier::containing(pos) else {
                break;
            };
            let n = ((tier.end() - pos) as usize).min(data.len() - done);
            let put = self.write_tier(inum, tier, pos - tier.start(), &data[done..done + n])?;
            done += put;
            if put < n {
                break;
            }
        }

        if done == 0 {
            warn!("write {} at {}: no space", path, offset);
            return Err(FsError::NoSpace);
        }
        let inode = &mut self.inodes[inum as usize];
        inode.size = inode.size.max((offset + done as u64) as u32);
        inode.mtime = now();
        self.persist_inode(inum)?;
        debug!("write {} at {}: {} of {} bytes", path, offset, done, data.len());
        Ok(done)
    }
}
