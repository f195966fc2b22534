//! Translation of file byte ranges into block transfers.
//!
//! A file's bytes are addressed through three tiers laid end to end:
//!
//! ```text
//! | direct: 6 blocks | single-indirect: 256 blocks | double-indirect: 256 * 256 blocks |
//! ```
//!
//! Callers split requests at tier boundaries; every function here works on a
//! byte offset relative to the start of one tier and never crosses into the
//! next one.

use log::{trace, warn};

use crate::device::BlockDevice;
use crate::error::Result;
use crate::fs_layout::{BLOCK_SIZE, N_DIRECT, PTRS_PER_BLOCK};
use crate::mount::FilesystemMount;

const BS: u64 = BLOCK_SIZE as u64;

pub const DIRECT_SPAN: u64 = N_DIRECT as u64 * BS;
pub const SINGLE_SPAN: u64 = PTRS_PER_BLOCK as u64 * BS;
pub const DOUBLE_SPAN: u64 = PTRS_PER_BLOCK as u64 * SINGLE_SPAN;

/// Largest addressable file size in bytes.
pub const MAX_FILE_SIZE: u64 = DIRECT_SPAN + SINGLE_SPAN + DOUBLE_SPAN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Direct,
    SingleIndirect,
    DoubleIndirect,
}

impl Tier {
    /// First byte of the tier within the file.
    pub fn start(self) -> u64 {
        match self {
            Tier::Direct => 0,
            Tier::SingleIndirect => DIRECT_SPAN,
            Tier::DoubleIndirect => DIRECT_SPAN + SINGLE_SPAN,
        }
    }

    pub fn span(self) -> u64 {
        match self {
            Tier::Direct => DIRECT_SPAN,
            Tier::SingleIndirect => SINGLE_SPAN,
            Tier::DoubleIndirect => DOUBLE_SPAN,
        }
    }

    pub fn end(self) -> u64 {
        self.start() + self.span()
    }

    /// Tier holding byte `pos`, or `None` past the maximum file size.
    pub fn containing(pos: u64) -> Option<Tier> {
        [Tier::Direct, Tier::SingleIndirect, Tier::DoubleIndirect]
            .into_iter()
            .find(|t| pos < t.end())
    }
}

/// Where a run of pointers is stored, so a newly installed pointer can be
/// written back.
#[derive(Debug, Clone, Copy)]
enum PointerOwner {
    /// The direct pointers of an inode.
    Inode(u32),
    /// An indirect block.
    Block(u32),
}

/// Yields `(pointer index, offset in block, chunk length)` for `len` bytes
/// starting at byte `rel` of a pointer run.
fn chunks(rel: u64, len: usize) -> impl Iterator<Item = (usize, usize, usize)> {
    let mut pos = rel;
    let end = rel + len as u64;
    std::iter::from_fn(move || {
        if pos >= end {
            return None;
        }
        let idx = (pos / BS) as usize;
        let intra = (pos % BS) as usize;
        let n = (BLOCK_SIZE - intra).min((end - pos) as usize);
        pos += n as u64;
        Some((idx, intra, n))
    })
}

impl<D: BlockDevice> FilesystemMount<D> {
    /// Reads `buf.len()` bytes starting `rel` bytes into `tier` of inode
    /// `inum`. Stops at the first unallocated block and returns the number
    /// of bytes copied.
    pub fn read_tier(&self, inum: u32, tier: Tier, rel: u64, buf: &mut [u8]) -> Result<usize> {
        debug_assert!(rel + buf.len() as u64 <= tier.span());
        let inode = self.inodes[inum as usize];

        match tier {
            Tier::Direct => self.read_run(&inode.direct, rel, buf),
            Tier::SingleIndirect => {
                if inode.indir_1 == 0 {
                    return Ok(0);
                }
                let ptrs = self.read_pointers(inode.indir_1)?;
                self.read_run(&ptrs, rel, buf)
            }
            Tier::DoubleIndirect => {
                if inode.indir_2 == 0 {
                    return Ok(0);
                }
                let outer = self.read_pointers(inode.indir_2)?;
                let mut done = 0;
                while done < buf.len() {
                    let pos = rel + done as u64;
                    let single = outer[(pos / SINGLE_SPAN) as usize];
                    if single == 0 {
                        break;
                    }
                    let inner_rel = pos % SINGLE_SPAN;
                    let n = ((SINGLE_SPAN - inner_rel) as usize).min(buf.len() - done);
                    let inner = self.read_pointers(single)?;
                    let got = self.read_run(&inner, inner_rel, &mut buf[done..done + n])?;
                    done += got;
                    if got < n {
                        break;
                    }
                }
                Ok(done)
            }
        }
    }

    fn read_run(&self, ptrs: &[u32], rel: u64, buf: &mut [u8]) -> Result<usize> {
        let mut done = 0;
        for (idx, intra, n) in chunks(rel, buf.len()) {
            let blk = ptrs[idx];
            if blk == 0 {
                break;
            }
            trace!("read block {} [{}..{}]", blk, intra, intra + n);
            let data = self.read_block(blk)?;
            buf[done..done + n].copy_from_slice(&data[intra..intra + n]);
            done += n;
        }
        Ok(done)
    }

    /// Writes `data` starting `rel` bytes into `tier` of inode `inum`,
    /// allocating blocks as needed. Returns the number of bytes written,
    /// which is short only when the device runs out of free blocks.
    pub fn write_tier(&mut self, inum: u32, tier: Tier, rel: u64, data: &[u8]) -> Result<usize> {
        debug_assert!(rel + data.len() as u64 <= tier.span());

        match tier {
            Tier::Direct => {
                let mut ptrs = self.inodes[inum as usize].direct;
                self.write_run(&mut ptrs, PointerOwner::Inode(inum), rel, data)
            }
            Tier::SingleIndirect => {
                let Some(indir) = self.ensure_indirect(inum, Tier::SingleIndirect)? else {
                    return Ok(0);
                };
                let mut ptrs = self.read_pointers(indir)?;
                self.write_run(&mut ptrs, PointerOwner::Block(indir), rel, data)
            }
            Tier::DoubleIndirect => {
                let Some(indir) = self.ensure_indirect(inum, Tier::DoubleIndirect)? else {
                    return Ok(0);
                };
                let mut outer = self.read_pointers(indir)?;
                let mut done = 0;
                while done < data.len() {
                    let pos = rel + done as u64;
                    let slot = (pos / SINGLE_SPAN) as usize;
                    if outer[slot] == 0 {
                        let Some(blk) = self.try_allocate_block()? else {
                            break;
                        };
                        outer[slot] = blk;
                        self.write_pointers(indir, &outer)?;
                        self.persist_block_bitmap()?;
                    }
                    let single = outer[slot];
                    let inner_rel = pos % SINGLE_SPAN;
                    let n = ((SINGLE_SPAN - inner_rel) as usize).min(data.len() - done);
                    let mut inner = self.read_pointers(single)?;
                    let put = self.write_run(
                        &mut inner,
                        PointerOwner::Block(single),
                        inner_rel,
                        &data[done..done + n],
                    )?;
                    done += put;
                    if put < n {
                        break;
                    }
                }
                Ok(done)
            }
        }
    }

    /// Returns the inode's single- or double-indirect block, allocating it
    /// if absent. `None` means no block was free.
    fn ensure_indirect(&mut self, inum: u32, tier: Tier) -> Result<Option<u32>> {
        let inode = &self.inodes[inum as usize];
        let current = match tier {
            Tier::Direct => return Ok(None),
            Tier::SingleIndirect => inode.indir_1,
            Tier::DoubleIndirect => inode.indir_2,
        };
        if current != 0 {
            return Ok(Some(current));
        }

        let Some(blk) = self.try_allocate_block()? else {
            return Ok(None);
        };
        let inode = &mut self.inodes[inum as usize];
        if tier == Tier::SingleIndirect {
            inode.indir_1 = blk;
        } else {
            inode.indir_2 = blk;
        }
        self.persist_inode(inum)?;
        self.persist_block_bitmap()?;
        trace!("inode {}: {:?} block {}", inum, tier, blk);
        Ok(Some(blk))
    }

    fn write_run(
        &mut self,
        ptrs: &mut [u32],
        owner: PointerOwner,
        rel: u64,
        data: &[u8],
    ) -> Result<usize> {
        let mut done = 0;
        for (idx, intra, n) in chunks(rel, data.len()) {
            if ptrs[idx] == 0 {
                let Some(blk) = self.try_allocate_block()? else {
                    warn!("write stopped after {} bytes: no free blocks", done);
                    break;
                };
                ptrs[idx] = blk;
                self.install(owner, idx, ptrs)?;
            }
            self.merge_block(ptrs[idx], intra, &data[done..done + n])?;
            done += n;
        }
        Ok(done)
    }

    /// Persists the pointer just stored at `ptrs[idx]` together with the
    /// block bitmap that reserved it.
    fn install(&mut self, owner: PointerOwner, idx: usize, ptrs: &[u32]) -> Result<()> {
        match owner {
            PointerOwner::Inode(inum) => {
                self.inodes[inum as usize].direct[idx] = ptrs[idx];
                self.persist_inode(inum)?;
            }
            PointerOwner::Block(blk) => self.write_pointers(blk, ptrs)?,
        }
        self.persist_block_bitmap()
    }

    // Read-modify-write unless the chunk covers the whole block.
    fn merge_block(&mut self, blk: u32, intra: usize, chunk: &[u8]) -> Result<()> {
        trace!("write block {} [{}..{}]", blk, intra, intra + chunk.len());
        if chunk.len() == BLOCK_SIZE {
            return self.write_block(blk, chunk);
        }
        let mut buf = self.read_block(blk)?;
        buf[intra..intra + chunk.len()].copy_from_slice(chunk);
        self.write_block(blk, &buf)
    }

    /// Frees every data and indirect block of `inum` and resets its size and
    /// pointers to zero.
    pub fn release_file_blocks(&mut self, inum: u32) -> Result<()> {
        let inode = self.inodes[inum as usize];
        let mut freed = Vec::new();

        freed.extend(inode.direct.iter().copied().filter(|&b| b != 0));
        if inode.indir_1 != 0 {
            freed.extend(self.read_pointers(inode.indir_1)?.into_iter().filter(|&b| b != 0));
            freed.push(inode.indir_1);
        }
        if inode.indir_2 != 0 {
            for single in self.read_pointers(inode.indir_2)? {
                if single == 0 {
                    continue;
                }
                freed.extend(self.read_pointers(single)?.into_iter().filter(|&b| b != 0));
                freed.push(single);
            }
            freed.push(inode.indir_2);
        }

        for &blk in &freed {
            self.free_block(blk);
        }
        let inode = &mut self.inodes[inum as usize];
        inode.direct = [0; N_DIRECT];
        inode.indir_1 = 0;
        inode.indir_2 = 0;
        inode.size = 0;
        trace!("inode {}: released {} blocks", inum, freed.len());

        self.persist_inode(inum)?;
        self.persist_block_bitmap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::RamDisk;
    use crate::mkfs::format;

    fn fs_with_file(len: usize) -> (FilesystemMount<RamDisk>, u32) {
        let mut disk = RamDisk::new(1024);
        format(&mut disk, 32).unwrap();
        let mut fs = FilesystemMount::mount(disk).unwrap();
        let inum = fs.mknod("/f", 0o644).unwrap();
        let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
        assert_eq!(fs.write("/f", 0, &data).unwrap(), len);
        (fs, inum)
    }

    #[test]
    fn read_stops_at_direct_hole() {
        let (mut fs, inum) = fs_with_file(3000);
        fs.inodes[inum as usize].direct[1] = 0;

        let mut buf = vec![0u8; 3000];
        assert_eq!(fs.read("/f", 0, &mut buf).unwrap(), BLOCK_SIZE);
        assert_eq!(fs.read("/f", 1500, &mut buf).unwrap(), 0);
        assert_eq!(fs.read("/f", 2048, &mut buf).unwrap(), 3000 - 2048);
        assert_eq!(fs.stat("/f").unwrap().size, 3000);
    }

    #[test]
    fn read_stops_at_single_indirect_hole() {
        let len = DIRECT_SPAN as usize + 4 * BLOCK_SIZE;
        let (mut fs, inum) = fs_with_file(len);
        let indir = fs.inodes[inum as usize].indir_1;
        let mut ptrs = fs.read_pointers(indir).unwrap();
        ptrs[2] = 0;
        fs.write_pointers(indir, &ptrs).unwrap();

        let mut buf = vec![0u8; len];
        let short = DIRECT_SPAN as usize + 2 * BLOCK_SIZE;
        assert_eq!(fs.read("/f", 0, &mut buf).unwrap(), short);
        assert_eq!(buf[short - 1], (short - 1) as u8);

        // Without the indirect block the read ends at the direct tier.
        fs.inodes[inum as usize].indir_1 = 0;
        assert_eq!(fs.read("/f", 0, &mut buf).unwrap(), DIRECT_SPAN as usize);
    }

    #[test]
    fn read_stops_at_double_indirect_hole() {
        let start = Tier::DoubleIndirect.start();
        let len = start as usize + 2 * BLOCK_SIZE;
        let (mut fs, inum) = fs_with_file(len);
        let outer = fs.read_pointers(fs.inodes[inum as usize].indir_2).unwrap();
        let inner_blk = outer[0];
        let mut inner = fs.read_pointers(inner_blk).unwrap();
        inner[1] = 0;
        fs.write_pointers(inner_blk, &inner).unwrap();

        let mut buf = vec![0u8; 4 * BLOCK_SIZE];
        assert_eq!(fs.read("/f", start - 100, &mut buf).unwrap(), 100 + BLOCK_SIZE);
    }

    #[test]
    fn tier_boundaries() {
        assert_eq!(DIRECT_SPAN, 6 * 1024);
        assert_eq!(SINGLE_SPAN, 256 * 1024);
        assert_eq!(DOUBLE_SPAN, 64 * 1024 * 1024);

        assert_eq!(Tier::containing(0), Some(Tier::Direct));
        assert_eq!(Tier::containing(DIRECT_SPAN - 1), Some(Tier::Direct));
        assert_eq!(Tier::containing(DIRECT_SPAN), Some(Tier::SingleIndirect));
        assert_eq!(Tier::containing(Tier::DoubleIndirect.start()), Some(Tier::DoubleIndirect));
        assert_eq!(Tier::containing(MAX_FILE_SIZE - 1), Some(Tier::DoubleIndirect));
        assert_eq!(Tier::containing(MAX_FILE_SIZE), None);
    }

    #[test]
    fn chunks_split_on_block_edges() {
        let parts: Vec<_> = chunks(1000, 1100).collect();
        assert_eq!(parts, [(0, 1000, 24), (1, 0, 1024), (2, 0, 52)]);
        assert_eq!(chunks(2048, 0).count(), 0);
    }
}
