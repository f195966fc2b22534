//! Write-through persistence of inodes and bitmaps.
//!
//! Every structural change is written back before the operation returns.
//! Nothing is batched; repeated calls rewrite the same regions.

use crate::device::BlockDevice;
use crate::error::{FsError, Result};
use crate::fs_layout::{
    decode_pointers, encode_pointers, BLOCK_SIZE, INODES_PER_BLOCK, INODE_SIZE,
};
use crate::mount::FilesystemMount;

impl<D: BlockDevice> FilesystemMount<D> {
    /// Writes the inode table block holding `inum`, then the whole inode
    /// bitmap.
    pub fn persist_inode(&mut self, inum: u32) -> Result<()> {
        let first = (inum as usize / INODES_PER_BLOCK) * INODES_PER_BLOCK;
        let mut buf = vec![0u8; BLOCK_SIZE];
        for (slot, inode) in buf
            .chunks_exact_mut(INODE_SIZE)
            .zip(&self.inodes[first..first + INODES_PER_BLOCK])
        {
            inode.encode_into(slot);
        }
        self.device.write(self.geo.inode_block(inum), 1, &buf)?;
        self.device.write(
            self.geo.inode_map_base,
            self.geo.inode_map_blocks,
            self.inode_map.as_bytes(),
        )?;
        Ok(())
    }

    pub fn persist_block_bitmap(&mut self) -> Result<()> {
        self.device.write(
            self.geo.block_map_base,
            self.geo.block_map_blocks,
            self.block_map.as_bytes(),
        )?;
        Ok(())
    }

    pub(crate) fn read_block(&self, blkno: u32) -> Result<Vec<u8>> {
        self.check_data_block(blkno)?;
        let mut buf = vec![0u8; BLOCK_SIZE];
        self.device.read(blkno, 1, &mut buf)?;
        Ok(buf)
    }

    pub(crate) fn write_block(&mut self, blkno: u32, buf: &[u8]) -> Result<()> {
        self.check_data_block(blkno)?;
        self.device.write(blkno, 1, buf)?;
        Ok(())
    }

    pub(crate) fn read_pointers(&self, blkno: u32) -> Result<Vec<u32>> {
        Ok(decode_pointers(&self.read_block(blkno)?))
    }

    pub(crate) fn write_pointers(&mut self, blkno: u32, ptrs: &[u32]) -> Result<()> {
        self.write_block(blkno, &encode_pointers(ptrs))
    }

    // Pointers into the metadata regions can only come from a damaged image.
    fn check_data_block(&self, blkno: u32) -> Result<()> {
        if blkno < self.geo.data_start || blkno >= self.geo.n_blocks {
            return Err(FsError::Corrupt(format!(
                "block pointer {} outside data region",
                blkno
            )));
        }
        Ok(())
    }
}
