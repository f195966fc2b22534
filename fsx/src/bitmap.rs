//! Free-space bookkeeping for inodes and blocks.
//!
//! Both maps are held in memory for the lifetime of the mount and written
//! back whole by the metadata writer. Bit `i` lives in byte `i / 8` at bit
//! position `i % 8`; a set bit means allocated.

use log::{trace, warn};

use crate::device::BlockDevice;
use crate::error::{FsError, Result};
use crate::fs_layout::{BLOCK_SIZE, ROOT_INODE};
use crate::mount::FilesystemMount;

/// Fixed-size bit-set sized from a bitmap region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitSet {
    bytes: Vec<u8>,
}

impl BitSet {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// An all-clear set spanning `blocks` bitmap blocks.
    pub fn with_blocks(blocks: u32) -> Self {
        Self {
            bytes: vec![0u8; blocks as usize * BLOCK_SIZE],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of addressable bits.
    pub fn capacity(&self) -> usize {
        self.bytes.len() * 8
    }

    // Bits past the end read as allocated so callers never hand them out.
    pub fn get(&self, idx: u32) -> bool {
        let b = (idx / 8) as usize;
        match self.bytes.get(b) {
            Some(byte) => byte & (1 << (idx % 8)) != 0,
            None => true,
        }
    }

    pub fn set(&mut self, idx: u32) {
        if let Some(byte) = self.bytes.get_mut((idx / 8) as usize) {
            *byte |= 1 << (idx % 8);
        }
    }

    pub fn clear(&mut self, idx: u32) {
        if let Some(byte) = self.bytes.get_mut((idx / 8) as usize) {
            *byte &= !(1 << (idx % 8));
        }
    }

    /// Lowest clear bit in `[start, limit)`.
    pub fn first_clear(&self, start: u32, limit: u32) -> Option<u32> {
        (start..limit).find(|&i| !self.get(i))
    }

    pub fn count_clear(&self, start: u32, limit: u32) -> u32 {
        (start..limit).filter(|&i| !self.get(i)).count() as u32
    }
}

// First inode handed out; 0 is invalid and 1 is the root directory.
const FIRST_FREE_INODE: u32 = ROOT_INODE + 1;

impl<D: BlockDevice> FilesystemMount<D> {
    /// Reserves the lowest free inode number.
    pub fn allocate_inode(&mut self) -> Result<u32> {
        match self.inode_map.first_clear(FIRST_FREE_INODE, self.geo.n_inodes) {
            Some(inum) => {
                self.inode_map.set(inum);
                trace!("allocated inode {}", inum);
                Ok(inum)
            }
            None => {
                warn!("no free inodes");
                Err(FsError::NoSpace)
            }
        }
    }

    /// Reserves the lowest free block and zero-fills it on the device.
    ///
    /// The bit is only set once the zero block is written, so a device
    /// failure leaves the map untouched.
    pub fn allocate_block(&mut self) -> Result<u32> {
        let Some(blkno) = self.block_map.first_clear(0, self.geo.n_blocks) else {
            warn!("no free blocks");
            return Err(FsError::NoSpace);
        };
        let zeros = [0u8; BLOCK_SIZE];
        self.device.write(blkno, 1, &zeros)?;
        self.block_map.set(blkno);
        trace!("allocated block {}", blkno);
        Ok(blkno)
    }

    /// `allocate_block` with exhaustion reported as `None`.
    pub(crate) fn try_allocate_block(&mut self) -> Result<Option<u32>> {
        match self.allocate_block() {
            Ok(blkno) => Ok(Some(blkno)),
            Err(FsError::NoSpace) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Returns an inode number to the free map. The inode record itself is
    /// left to the caller.
    pub fn free_inode(&mut self, inum: u32) {
        if inum < FIRST_FREE_INODE || inum >= self.geo.n_inodes {
            warn!("refusing to free inode {}", inum);
            return;
        }
        self.inode_map.clear(inum);
    }

    /// Returns a block to the free map. Content is not touched; blocks are
    /// zeroed when next allocated.
    pub fn free_block(&mut self, blkno: u32) {
        if blkno < self.geo.data_start || blkno >= self.geo.n_blocks {
            warn!("refusing to free block {}", blkno);
            return;
        }
        self.block_map.clear(blkno);
    }

    pub fn count_free_blocks(&self) -> u32 {
        self.block_map.count_clear(0, self.geo.n_blocks)
    }

    pub fn count_free_inodes(&self) -> u32 {
        self.inode_map.count_clear(FIRST_FREE_INODE, self.geo.n_inodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_order_is_lsb_first() {
        let mut bs = BitSet::with_blocks(1);
        bs.set(0);
        bs.set(9);
        assert_eq!(bs.as_bytes()[0], 0b0000_0001);
        assert_eq!(bs.as_bytes()[1], 0b0000_0010);
        assert!(bs.get(9));
        bs.clear(9);
        assert!(!bs.get(9));
    }

    #[test]
    fn first_clear_scans_from_start() {
        let mut bs = BitSet::with_blocks(1);
        for i in 0..5 {
            bs.set(i);
        }
        assert_eq!(bs.first_clear(0, 100), Some(5));
        assert_eq!(bs.first_clear(2, 5), None);
        bs.clear(3);
        assert_eq!(bs.first_clear(2, 100), Some(3));
        assert_eq!(bs.count_clear(0, 10), 6);
    }

    #[test]
    fn bits_past_the_region_read_as_allocated() {
        let bs = BitSet::with_blocks(1);
        assert_eq!(bs.capacity(), BLOCK_SIZE * 8);
        assert!(bs.get(BLOCK_SIZE as u32 * 8));
        let end = BLOCK_SIZE as u32 * 8;
        assert_eq!(bs.first_clear(end, end + 64), None);
    }
}
